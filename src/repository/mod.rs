//! Repository layer: the storage port used by the services and its backends.
//!
//! Every method is a single-record operation. Ledger mutations
//! (`reserve_copy`, `attach_loan`, ...) are conditional updates applied by the
//! backend in one step, so concurrent callers never observe a half-applied
//! counter change. Nothing here spans more than one record; ordering of
//! multi-record writes is the circulation service's job.

pub mod books;
pub mod loans;
pub mod members;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        book::{Book, BookQuery},
        loan::{LoanQuery, LoanRecord},
        member::{Member, MemberQuery},
    },
};

pub use memory::MemoryStore;

/// Persistence operations needed by the catalog, membership and circulation services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CirculationStore: Send + Sync {
    // --- Books ---------------------------------------------------------------

    async fn insert_book(&self, book: &Book) -> AppResult<()>;
    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>>;
    async fn find_book_by_isbn(&self, isbn: &str) -> AppResult<Option<Book>>;
    async fn list_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)>;
    /// Write descriptive fields and quantities. `None` when the book is gone or
    /// the stored shelf count no longer matches `expected_available`.
    async fn update_book(&self, book: &Book, expected_available: i32) -> AppResult<Option<Book>>;
    /// Delete only if no copy is on loan
    async fn delete_book(&self, id: Uuid) -> AppResult<bool>;
    /// `available_quantity -= 1` if `available_quantity > 0`
    async fn reserve_copy(&self, id: Uuid) -> AppResult<Option<Book>>;
    /// `available_quantity += 1` if `available_quantity < quantity`
    async fn release_copy(&self, id: Uuid) -> AppResult<Option<Book>>;
    /// `quantity -= 1` if a copy is on loan
    async fn retire_copy(&self, id: Uuid) -> AppResult<Option<Book>>;

    // --- Members -------------------------------------------------------------

    async fn insert_member(&self, member: &Member) -> AppResult<()>;
    async fn get_member(&self, id: Uuid) -> AppResult<Option<Member>>;
    async fn find_member_by_email(&self, email: &str) -> AppResult<Option<Member>>;
    async fn list_members(&self, query: &MemberQuery) -> AppResult<(Vec<Member>, i64)>;
    /// Write profile fields; loan references and counters are left untouched
    async fn update_member(&self, member: &Member) -> AppResult<Option<Member>>;
    /// Delete only if the member has no open loan
    async fn delete_member(&self, id: Uuid) -> AppResult<bool>;
    /// Append the loan if the member holds fewer than `max_open` open loans.
    /// `None` when the member is gone or already at the limit.
    async fn attach_loan(
        &self,
        member_id: Uuid,
        loan_id: Uuid,
        at: DateTime<Utc>,
        max_open: u32,
    ) -> AppResult<Option<Member>>;
    /// Undo `attach_loan` for a checkout that did not complete
    async fn revoke_loan(&self, member_id: Uuid, loan_id: Uuid) -> AppResult<Option<Member>>;
    async fn detach_loan(&self, member_id: Uuid, loan_id: Uuid, fine: Decimal) -> AppResult<Option<Member>>;
    async fn settle_fine(&self, member_id: Uuid, amount: Decimal, paid: bool) -> AppResult<Option<Member>>;

    // --- Loans ---------------------------------------------------------------

    async fn insert_loan(&self, loan: &LoanRecord) -> AppResult<()>;
    async fn get_loan(&self, id: Uuid) -> AppResult<Option<LoanRecord>>;
    async fn find_loan_by_transaction(&self, transaction_id: &str) -> AppResult<Option<LoanRecord>>;
    /// Write the loan if the stored version still equals `loan.version`.
    /// Returns the stored record (version incremented), or `None` on a stale write.
    async fn update_loan(&self, loan: &LoanRecord) -> AppResult<Option<LoanRecord>>;
    /// Flip every borrowed loan due before `now` to overdue. Returns the count.
    async fn mark_overdue(&self, now: DateTime<Utc>) -> AppResult<u64>;
    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<LoanRecord>, i64)>;
    async fn loans_for_member(&self, member_id: Uuid) -> AppResult<Vec<LoanRecord>>;
    async fn fines_assessed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<LoanRecord>>;

    /// Cheap round trip used by the readiness check
    async fn ping(&self) -> AppResult<()>;
}

/// Postgres-backed repository holding one sub-repository per collection
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub members: members::MembersRepository,
    pub loans: loans::LoansRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            members: members::MembersRepository::new(pool.clone()),
            loans: loans::LoansRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl CirculationStore for Repository {
    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        self.books.insert(book).await
    }

    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.books.get_by_id(id).await
    }

    async fn find_book_by_isbn(&self, isbn: &str) -> AppResult<Option<Book>> {
        self.books.get_by_isbn(isbn).await
    }

    async fn list_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        self.books.search(query).await
    }

    async fn update_book(&self, book: &Book, expected_available: i32) -> AppResult<Option<Book>> {
        self.books.update(book, expected_available).await
    }

    async fn delete_book(&self, id: Uuid) -> AppResult<bool> {
        self.books.delete_if_shelved(id).await
    }

    async fn reserve_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.books.reserve_copy(id).await
    }

    async fn release_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.books.release_copy(id).await
    }

    async fn retire_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.books.retire_copy(id).await
    }

    async fn insert_member(&self, member: &Member) -> AppResult<()> {
        self.members.insert(member).await
    }

    async fn get_member(&self, id: Uuid) -> AppResult<Option<Member>> {
        self.members.get_by_id(id).await
    }

    async fn find_member_by_email(&self, email: &str) -> AppResult<Option<Member>> {
        self.members.get_by_email(email).await
    }

    async fn list_members(&self, query: &MemberQuery) -> AppResult<(Vec<Member>, i64)> {
        self.members.search(query).await
    }

    async fn update_member(&self, member: &Member) -> AppResult<Option<Member>> {
        self.members.update_profile(member).await
    }

    async fn delete_member(&self, id: Uuid) -> AppResult<bool> {
        self.members.delete_if_idle(id).await
    }

    async fn attach_loan(
        &self,
        member_id: Uuid,
        loan_id: Uuid,
        at: DateTime<Utc>,
        max_open: u32,
    ) -> AppResult<Option<Member>> {
        self.members.attach_loan(member_id, loan_id, at, max_open).await
    }

    async fn revoke_loan(&self, member_id: Uuid, loan_id: Uuid) -> AppResult<Option<Member>> {
        self.members.revoke_loan(member_id, loan_id).await
    }

    async fn detach_loan(&self, member_id: Uuid, loan_id: Uuid, fine: Decimal) -> AppResult<Option<Member>> {
        self.members.detach_loan(member_id, loan_id, fine).await
    }

    async fn settle_fine(&self, member_id: Uuid, amount: Decimal, paid: bool) -> AppResult<Option<Member>> {
        self.members.settle_fine(member_id, amount, paid).await
    }

    async fn insert_loan(&self, loan: &LoanRecord) -> AppResult<()> {
        self.loans.insert(loan).await
    }

    async fn get_loan(&self, id: Uuid) -> AppResult<Option<LoanRecord>> {
        self.loans.get_by_id(id).await
    }

    async fn find_loan_by_transaction(&self, transaction_id: &str) -> AppResult<Option<LoanRecord>> {
        self.loans.get_by_transaction_id(transaction_id).await
    }

    async fn update_loan(&self, loan: &LoanRecord) -> AppResult<Option<LoanRecord>> {
        self.loans.update_versioned(loan).await
    }

    async fn mark_overdue(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.loans.mark_overdue(now).await
    }

    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<LoanRecord>, i64)> {
        self.loans.search(query).await
    }

    async fn loans_for_member(&self, member_id: Uuid) -> AppResult<Vec<LoanRecord>> {
        self.loans.get_member_loans(member_id).await
    }

    async fn fines_assessed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<LoanRecord>> {
        self.loans.fines_assessed_between(from, to).await
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Normalize 1-based page/limit into (page, limit, offset)
pub fn page_window(page: Option<i64>, limit: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(10).clamp(1, 100);
    (page, limit, (page - 1) * limit)
}
