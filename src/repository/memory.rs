//! In-process store used for development (`database.url = "memory"`) and tests.
//!
//! Each method takes the lock once, so every operation is atomic with respect
//! to the single record it touches, matching the Postgres backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{normalize_isbn, Book, BookQuery},
        loan::{LoanQuery, LoanRecord, LoanSort, LoanStatus, SortOrder},
        member::{Member, MemberQuery},
    },
};

use super::{page_window, CirculationStore};

#[derive(Default)]
struct Collections {
    books: HashMap<Uuid, Book>,
    members: HashMap<Uuid, Member>,
    loans: HashMap<Uuid, LoanRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn paginate<T>(items: Vec<T>, page: Option<i64>, limit: Option<i64>) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let (_, limit, offset) = page_window(page, limit);
    let page = items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    (page, total)
}

fn book_matches(book: &Book, query: &BookQuery) -> bool {
    query.title.as_deref().map_or(true, |t| contains_ci(&book.title, t))
        && query.author.as_deref().map_or(true, |a| contains_ci(&book.author, a))
        && query
            .genre
            .as_deref()
            .map_or(true, |g| book.genre.as_deref().map_or(false, |bg| contains_ci(bg, g)))
        && query.isbn.as_deref().map_or(true, |i| book.isbn == normalize_isbn(i))
        && query.q.as_deref().map_or(true, |q| {
            q.split_whitespace().all(|word| {
                contains_ci(&book.title, word)
                    || contains_ci(&book.author, word)
                    || book.genre.as_deref().map_or(false, |g| contains_ci(g, word))
            })
        })
        && (!query.available_only.unwrap_or(false) || book.available_quantity > 0)
}

fn member_matches(member: &Member, query: &MemberQuery) -> bool {
    query.q.as_deref().map_or(true, |q| {
        let q = q.trim();
        contains_ci(&member.name, q) || contains_ci(&member.email, q) || contains_ci(&member.member_code, q)
    }) && query.name.as_deref().map_or(true, |n| contains_ci(&member.name, n))
        && query
            .email
            .as_deref()
            .map_or(true, |e| member.email == e.trim().to_lowercase())
        && query.membership_type.map_or(true, |t| member.membership_type == t)
        && query.is_active.map_or(true, |a| member.is_active == a)
}

fn loan_matches(loan: &LoanRecord, query: &LoanQuery) -> bool {
    query.user_id.map_or(true, |id| loan.member_id == id)
        && query.book_id.map_or(true, |id| loan.book_id == id)
        && query.status.map_or(true, |s| loan.status == s)
        && query.from_date.map_or(true, |from| loan.borrow_date >= from)
        && query.to_date.map_or(true, |to| loan.borrow_date <= to)
        && query
            .transaction_id
            .as_deref()
            .map_or(true, |txn| loan.transaction_id == txn)
}

/// Apply a guarded ledger mutation to one book
fn adjust_book(books: &mut HashMap<Uuid, Book>, id: Uuid, op: impl FnOnce(&mut Book) -> bool) -> Option<Book> {
    let book = books.get_mut(&id)?;
    if op(book) {
        book.updated_at = Utc::now();
        Some(book.clone())
    } else {
        None
    }
}

#[async_trait]
impl CirculationStore for MemoryStore {
    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        let mut db = self.inner.write().await;
        if db.books.values().any(|b| b.isbn == book.isbn) {
            return Err(AppError::Conflict("Book with this ISBN already exists".to_string()));
        }
        db.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.inner.read().await.books.get(&id).cloned())
    }

    async fn find_book_by_isbn(&self, isbn: &str) -> AppResult<Option<Book>> {
        let isbn = normalize_isbn(isbn);
        Ok(self.inner.read().await.books.values().find(|b| b.isbn == isbn).cloned())
    }

    async fn list_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let db = self.inner.read().await;
        let mut books: Vec<Book> = db.books.values().filter(|b| book_matches(b, query)).cloned().collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(paginate(books, query.page, query.limit))
    }

    async fn update_book(&self, book: &Book, expected_available: i32) -> AppResult<Option<Book>> {
        let mut db = self.inner.write().await;
        if db.books.values().any(|b| b.isbn == book.isbn && b.id != book.id) {
            return Err(AppError::Conflict("Book with this ISBN already exists".to_string()));
        }
        match db.books.get_mut(&book.id) {
            Some(stored) if stored.available_quantity == expected_available => {
                *stored = Book {
                    created_at: stored.created_at,
                    updated_at: Utc::now(),
                    ..book.clone()
                };
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_book(&self, id: Uuid) -> AppResult<bool> {
        let mut db = self.inner.write().await;
        match db.books.get(&id) {
            Some(b) if b.quantity == b.available_quantity => {
                db.books.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reserve_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(adjust_book(&mut self.inner.write().await.books, id, Book::reserve_copy))
    }

    async fn release_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(adjust_book(&mut self.inner.write().await.books, id, Book::release_copy))
    }

    async fn retire_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(adjust_book(&mut self.inner.write().await.books, id, Book::retire_copy))
    }

    async fn insert_member(&self, member: &Member) -> AppResult<()> {
        let mut db = self.inner.write().await;
        if db.members.values().any(|m| m.email == member.email) {
            return Err(AppError::Conflict("User with this email already exists".to_string()));
        }
        if db.members.values().any(|m| m.member_code == member.member_code) {
            return Err(AppError::Conflict("Member code already in use".to_string()));
        }
        db.members.insert(member.id, member.clone());
        Ok(())
    }

    async fn get_member(&self, id: Uuid) -> AppResult<Option<Member>> {
        Ok(self.inner.read().await.members.get(&id).cloned())
    }

    async fn find_member_by_email(&self, email: &str) -> AppResult<Option<Member>> {
        let email = email.trim().to_lowercase();
        Ok(self.inner.read().await.members.values().find(|m| m.email == email).cloned())
    }

    async fn list_members(&self, query: &MemberQuery) -> AppResult<(Vec<Member>, i64)> {
        let db = self.inner.read().await;
        let mut members: Vec<Member> = db
            .members
            .values()
            .filter(|m| member_matches(m, query))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(paginate(members, query.page, query.limit))
    }

    async fn update_member(&self, member: &Member) -> AppResult<Option<Member>> {
        let mut db = self.inner.write().await;
        if db.members.values().any(|m| m.email == member.email && m.id != member.id) {
            return Err(AppError::Conflict("User with this email already exists".to_string()));
        }
        let Some(stored) = db.members.get_mut(&member.id) else {
            return Ok(None);
        };
        stored.name = member.name.clone();
        stored.email = member.email.clone();
        stored.phone = member.phone.clone();
        stored.membership_type = member.membership_type;
        stored.membership_expiry = member.membership_expiry;
        stored.is_active = member.is_active;
        stored.notes = member.notes.clone();
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn delete_member(&self, id: Uuid) -> AppResult<bool> {
        let mut db = self.inner.write().await;
        match db.members.get(&id) {
            Some(m) if m.open_loans.is_empty() => {
                db.members.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn attach_loan(
        &self,
        member_id: Uuid,
        loan_id: Uuid,
        at: DateTime<Utc>,
        max_open: u32,
    ) -> AppResult<Option<Member>> {
        let mut db = self.inner.write().await;
        Ok(db
            .members
            .get_mut(&member_id)
            .filter(|m| m.current_borrow_count() < max_open as usize)
            .map(|m| {
                m.attach_loan(loan_id, at);
                m.updated_at = Utc::now();
                m.clone()
            }))
    }

    async fn revoke_loan(&self, member_id: Uuid, loan_id: Uuid) -> AppResult<Option<Member>> {
        let mut db = self.inner.write().await;
        Ok(db.members.get_mut(&member_id).and_then(|m| {
            if !m.revoke_loan(loan_id) {
                return None;
            }
            m.updated_at = Utc::now();
            Some(m.clone())
        }))
    }

    async fn detach_loan(&self, member_id: Uuid, loan_id: Uuid, fine: Decimal) -> AppResult<Option<Member>> {
        let mut db = self.inner.write().await;
        Ok(db.members.get_mut(&member_id).map(|m| {
            m.detach_loan(loan_id, fine);
            m.updated_at = Utc::now();
            m.clone()
        }))
    }

    async fn settle_fine(&self, member_id: Uuid, amount: Decimal, paid: bool) -> AppResult<Option<Member>> {
        let mut db = self.inner.write().await;
        Ok(db.members.get_mut(&member_id).map(|m| {
            m.settle_fine(amount, paid);
            m.updated_at = Utc::now();
            m.clone()
        }))
    }

    async fn insert_loan(&self, loan: &LoanRecord) -> AppResult<()> {
        let mut db = self.inner.write().await;
        if db.loans.values().any(|l| l.transaction_id == loan.transaction_id) {
            return Err(AppError::Conflict("Duplicate transaction id".to_string()));
        }
        db.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn get_loan(&self, id: Uuid) -> AppResult<Option<LoanRecord>> {
        Ok(self.inner.read().await.loans.get(&id).cloned())
    }

    async fn find_loan_by_transaction(&self, transaction_id: &str) -> AppResult<Option<LoanRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .loans
            .values()
            .find(|l| l.transaction_id == transaction_id)
            .cloned())
    }

    async fn update_loan(&self, loan: &LoanRecord) -> AppResult<Option<LoanRecord>> {
        let mut db = self.inner.write().await;
        match db.loans.get_mut(&loan.id) {
            Some(stored) if stored.version == loan.version => {
                *stored = LoanRecord {
                    version: loan.version + 1,
                    ..loan.clone()
                };
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_overdue(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut db = self.inner.write().await;
        let mut flipped = 0;
        for loan in db.loans.values_mut() {
            if loan.refresh_overdue(now) {
                loan.version += 1;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<LoanRecord>, i64)> {
        let db = self.inner.read().await;
        let mut loans: Vec<LoanRecord> = db.loans.values().filter(|l| loan_matches(l, query)).cloned().collect();

        let sort_by = query.sort_by.unwrap_or_default();
        loans.sort_by(|a, b| {
            let ord = match sort_by {
                LoanSort::BorrowDate => a.borrow_date.cmp(&b.borrow_date),
                LoanSort::DueDate => a.due_date.cmp(&b.due_date),
                LoanSort::ReturnDate => a.return_date.cmp(&b.return_date),
                LoanSort::Status => a.status.as_str().cmp(b.status.as_str()),
            };
            ord.then(a.id.cmp(&b.id))
        });
        if query.sort_order.unwrap_or_default() == SortOrder::Desc {
            loans.reverse();
        }

        Ok(paginate(loans, query.page, query.limit))
    }

    async fn loans_for_member(&self, member_id: Uuid) -> AppResult<Vec<LoanRecord>> {
        let db = self.inner.read().await;
        let mut loans: Vec<LoanRecord> = db.loans.values().filter(|l| l.member_id == member_id).cloned().collect();
        loans.sort_by(|a, b| b.borrow_date.cmp(&a.borrow_date));
        Ok(loans)
    }

    async fn fines_assessed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<LoanRecord>> {
        let db = self.inner.read().await;
        let mut loans: Vec<LoanRecord> = db
            .loans
            .values()
            .filter(|l| {
                l.fine.amount > Decimal::ZERO
                    && l.fine.assessed_date.map_or(false, |d| d >= from && d <= to)
            })
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.fine.assessed_date);
        Ok(loans)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}
