//! Borrowing lifecycle engine
//!
//! Loads the loan and its ledgers, applies the lazy overdue flip, validates
//! the transition, assesses fines and persists the touched records in a fixed
//! order: the loan first, then the book, then the member. Checkout is the one
//! exception: the copy is reserved first because the conditional decrement is
//! the availability gate, then the member's loan slot is claimed (conditional
//! on the borrow limit), then the loan is recorded. Each earlier step is
//! undone when a later one fails.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    config::CirculationConfig,
    error::{AppError, AppResult},
    models::{
        loan::{
            generate_transaction_id, BookCondition, CheckoutRequest, LoanQuery, LoanRecord, LoanSort, LoanStatus, LoanView,
            PaymentMethod, PaymentStatus, SortOrder, UpdateLoanRequest,
        },
        member::MemberShort,
        report::{FineGroup, FineReport, HistorySummary, UserHistory},
    },
    repository::CirculationStore,
};

use super::fines::FinePolicy;

/// Window of the fine report when the caller gives no start date
const DEFAULT_REPORT_DAYS: i64 = 30;

fn loan_not_found() -> AppError {
    AppError::NotFound("Borrow record not found".to_string())
}

fn member_not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}

#[derive(Clone)]
pub struct CirculationService {
    store: Arc<dyn CirculationStore>,
    rules: CirculationConfig,
    fines: FinePolicy,
}

impl CirculationService {
    pub fn new(store: Arc<dyn CirculationStore>, rules: CirculationConfig) -> Self {
        let fines = FinePolicy::new(&rules);
        Self { store, rules, fines }
    }

    pub fn view(&self, loan: LoanRecord, now: DateTime<Utc>) -> LoanView {
        LoanView {
            days_remaining: loan.days_remaining(now),
            borrow_duration: loan.borrow_duration(now),
            is_overdue: loan.is_overdue(now),
            estimated_fine: self.fines.estimate(&loan, now),
            loan,
        }
    }

    /// Fetch a loan, persisting the overdue flip if its due date has passed
    async fn load_loan(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<LoanRecord> {
        let mut loan = self.store.get_loan(id).await?.ok_or_else(loan_not_found)?;
        if !loan.refresh_overdue(now) {
            return Ok(loan);
        }

        match self.store.update_loan(&loan).await? {
            Some(stored) => {
                tracing::info!("Loan {} is now overdue", stored.transaction_id);
                Ok(stored)
            }
            None => {
                // Another request wrote first; take its copy and re-derive the status
                let mut fresh = self.store.get_loan(id).await?.ok_or_else(loan_not_found)?;
                fresh.refresh_overdue(now);
                Ok(fresh)
            }
        }
    }

    /// Versioned write of a loan
    async fn persist(&self, loan: &LoanRecord) -> AppResult<LoanRecord> {
        match self.store.update_loan(loan).await? {
            Some(stored) => Ok(stored),
            None => {
                tracing::warn!(
                    "Stale write rejected for loan {} (version {})",
                    loan.transaction_id,
                    loan.version
                );
                Err(AppError::Conflict(
                    "Borrow record was modified by another request, please retry".to_string(),
                ))
            }
        }
    }

    /// Compensate a copy reservation made by a checkout that did not complete
    async fn release_reserved(&self, book_id: Uuid) {
        if let Err(e) = self.store.release_copy(book_id).await {
            tracing::error!("Reserved copy of book {} was not released: {}", book_id, e);
        }
    }

    // --- Transitions -------------------------------------------------------

    /// Check a book out to a member
    pub async fn checkout(&self, request: CheckoutRequest) -> AppResult<LoanView> {
        self.checkout_at(request, Utc::now()).await
    }

    pub async fn checkout_at(&self, request: CheckoutRequest, now: DateTime<Utc>) -> AppResult<LoanView> {
        let due_date = match request.due_date {
            Some(due) if due <= now => return Err(AppError::validation("dueDate must be in the future")),
            Some(due) => due,
            None => now + Duration::days(self.rules.loan_days),
        };
        let condition = request.book_condition.unwrap_or_default();
        if condition == BookCondition::Lost {
            return Err(AppError::validation("bookCondition cannot be lost at checkout"));
        }

        let member = self
            .store
            .get_member(request.user_id)
            .await?
            .ok_or_else(member_not_found)?;
        if !member.is_membership_valid(now) {
            tracing::warn!("Checkout refused: membership of {} is not valid", member.id);
            return Err(AppError::MembershipInvalid);
        }
        let open = member.current_borrow_count();
        if open >= self.rules.max_active_loans as usize {
            tracing::warn!("Checkout refused: {} already has {} open loans", member.id, open);
            return Err(AppError::BorrowLimitReached {
                current: open,
                max: self.rules.max_active_loans,
            });
        }
        if self.rules.block_on_unpaid_fines && member.fines_outstanding > Decimal::ZERO {
            tracing::warn!(
                "Checkout refused: {} owes {} in fines",
                member.id,
                member.fines_outstanding
            );
            return Err(AppError::UnpaidFines(member.fines_outstanding));
        }

        let book = self
            .store
            .get_book(request.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;
        if !book.is_available() {
            return Err(AppError::NoCopiesAvailable);
        }

        let mut loan = LoanRecord::new(member.id, book.id, now, due_date, condition, request.notes);
        while self
            .store
            .find_loan_by_transaction(&loan.transaction_id)
            .await?
            .is_some()
        {
            loan.transaction_id = generate_transaction_id();
        }

        if self.store.reserve_copy(book.id).await?.is_none() {
            tracing::warn!("Checkout refused: last copy of book {} was taken", book.id);
            return Err(AppError::NoCopiesAvailable);
        }

        match self
            .store
            .attach_loan(member.id, loan.id, now, self.rules.max_active_loans)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.release_reserved(book.id).await;
                // Distinguish a member deleted meanwhile from one who hit the limit
                let current = self
                    .store
                    .get_member(member.id)
                    .await?
                    .ok_or_else(member_not_found)?
                    .current_borrow_count();
                tracing::warn!(
                    "Checkout refused: {} reached {} open loans concurrently",
                    member.id,
                    current
                );
                return Err(AppError::BorrowLimitReached {
                    current,
                    max: self.rules.max_active_loans,
                });
            }
            Err(e) => {
                tracing::error!("Failed to attach loan to member {}: {}", member.id, e);
                self.release_reserved(book.id).await;
                return Err(e);
            }
        }

        if let Err(e) = self.store.insert_loan(&loan).await {
            tracing::error!("Failed to record loan for book {}: {}", book.id, e);
            self.release_reserved(book.id).await;
            if let Err(revoke) = self.store.revoke_loan(member.id, loan.id).await {
                tracing::error!(
                    "Loan {} left attached to member {}: {}",
                    loan.transaction_id,
                    member.id,
                    revoke
                );
            }
            return Err(e);
        }

        tracing::info!(
            "Loan {} created: book {} to member {}, due {}",
            loan.transaction_id,
            book.id,
            member.id,
            loan.due_date
        );
        Ok(self.view(loan, now))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<LoanView> {
        self.get_at(id, Utc::now()).await
    }

    pub async fn get_at(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<LoanView> {
        let loan = self.load_loan(id, now).await?;
        Ok(self.view(loan, now))
    }

    /// Administrative edit of notes, checkout condition, due date and the
    /// borrowed to overdue edge
    pub async fn update(&self, id: Uuid, request: UpdateLoanRequest) -> AppResult<LoanView> {
        self.update_at(id, request, Utc::now()).await
    }

    pub async fn update_at(
        &self,
        id: Uuid,
        request: UpdateLoanRequest,
        now: DateTime<Utc>,
    ) -> AppResult<LoanView> {
        let mut loan = self.load_loan(id, now).await?;

        if let Some(status) = request.status {
            let allowed = status == loan.status
                || (loan.status == LoanStatus::Borrowed && status == LoanStatus::Overdue);
            if !allowed {
                tracing::warn!(
                    "Status change {} -> {} refused for loan {}",
                    loan.status,
                    status,
                    loan.transaction_id
                );
                return Err(AppError::InvalidTransition(format!(
                    "Cannot change status from {} to {}, use the return endpoint to close a loan",
                    loan.status, status
                )));
            }
            loan.status = status;
        }
        if let Some(due) = request.due_date {
            if loan.status.is_terminal() {
                return Err(AppError::InvalidTransition(
                    "Cannot change the due date of a closed loan".to_string(),
                ));
            }
            if due <= now {
                return Err(AppError::validation("dueDate must be in the future"));
            }
            loan.due_date = due;
        }
        if let Some(condition) = request.book_condition {
            if condition == BookCondition::Lost {
                return Err(AppError::validation("bookCondition cannot be lost at checkout"));
            }
            loan.book_condition.checked_out = condition;
        }
        if request.notes.is_some() {
            loan.notes = request.notes;
        }
        loan.updated_at = now;

        let stored = self.persist(&loan).await?;
        tracing::info!("Loan {} updated", stored.transaction_id);
        Ok(self.view(stored, now))
    }

    /// Extend the due date of an on-time loan
    pub async fn renew(&self, id: Uuid, extension_days: Option<i64>) -> AppResult<LoanView> {
        self.renew_at(id, extension_days, Utc::now()).await
    }

    pub async fn renew_at(
        &self,
        id: Uuid,
        extension_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<LoanView> {
        let loan = self.load_loan(id, now).await?;

        let days = extension_days.unwrap_or(self.rules.renewal_days);
        if days < 1 || days > self.rules.max_renewal_days {
            return Err(AppError::validation(format!(
                "extensionDays must be between 1 and {}",
                self.rules.max_renewal_days
            )));
        }
        let mut renewed = loan.clone();
        let entry = match renewed.renew(days, now, self.rules.max_renewals) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Renewal of loan {} refused: {}", loan.transaction_id, e);
                return Err(e);
            }
        };

        let member = self.store.get_member(loan.member_id).await?;
        if !member.map_or(false, |m| m.is_membership_valid(now)) {
            tracing::warn!(
                "Renewal of loan {} refused: membership of {} is not valid",
                loan.transaction_id,
                loan.member_id
            );
            return Err(AppError::MembershipInvalid);
        }

        let stored = self.persist(&renewed).await?;
        tracing::info!(
            "Loan {} renewed until {} ({}/{})",
            stored.transaction_id,
            entry.new_due_date,
            stored.renewal_count,
            self.rules.max_renewals
        );
        Ok(self.view(stored, now))
    }

    /// Close a loan. A `lost` condition takes the copy out of the collection.
    pub async fn return_loan(&self, id: Uuid, condition: Option<BookCondition>) -> AppResult<LoanView> {
        self.return_loan_at(id, condition, Utc::now()).await
    }

    pub async fn return_loan_at(
        &self,
        id: Uuid,
        condition: Option<BookCondition>,
        now: DateTime<Utc>,
    ) -> AppResult<LoanView> {
        let mut loan = self.load_loan(id, now).await?;
        if loan.status.is_terminal() {
            tracing::warn!("Loan {} is already {}", loan.transaction_id, loan.status);
            return Err(AppError::AlreadyReturned);
        }

        let condition = condition.unwrap_or_default();
        let fine = self.fines.assess(&loan, condition, now);
        let fine_amount = fine.amount;
        loan.close(condition, fine, now)?;
        let stored = self.persist(&loan).await?;

        let book = if stored.status == LoanStatus::Lost {
            self.store.retire_copy(stored.book_id).await
        } else {
            self.store.release_copy(stored.book_id).await
        };
        match book {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                "Inventory of book {} left unchanged by loan {}",
                stored.book_id,
                stored.transaction_id
            ),
            Err(e) => {
                tracing::error!(
                    "Loan {} closed but book {} not updated: {}",
                    stored.transaction_id,
                    stored.book_id,
                    e
                );
                return Err(e);
            }
        }

        match self.store.detach_loan(stored.member_id, stored.id, fine_amount).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                "Member {} of loan {} no longer exists",
                stored.member_id,
                stored.transaction_id
            ),
            Err(e) => {
                tracing::error!(
                    "Loan {} closed but member {} not updated: {}",
                    stored.transaction_id,
                    stored.member_id,
                    e
                );
                return Err(e);
            }
        }

        tracing::info!(
            "Loan {} {} with fine {}",
            stored.transaction_id,
            stored.status,
            fine_amount
        );
        Ok(self.view(stored, now))
    }

    /// Settle the fine of a closed loan
    pub async fn pay_fine(
        &self,
        id: Uuid,
        method: PaymentMethod,
        amount: Option<Decimal>,
    ) -> AppResult<LoanView> {
        self.pay_fine_at(id, method, amount, Utc::now()).await
    }

    pub async fn pay_fine_at(
        &self,
        id: Uuid,
        method: PaymentMethod,
        amount: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> AppResult<LoanView> {
        let mut loan = self.load_loan(id, now).await?;
        let credited = match loan.settle_fine(method, amount, now) {
            Ok(owed) => owed,
            Err(e) => {
                tracing::warn!("Fine payment on loan {} refused: {}", loan.transaction_id, e);
                return Err(e);
            }
        };
        let stored = self.persist(&loan).await?;

        let paid = method != PaymentMethod::Waived;
        match self.store.settle_fine(stored.member_id, credited, paid).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                "Member {} of loan {} no longer exists",
                stored.member_id,
                stored.transaction_id
            ),
            Err(e) => {
                tracing::error!(
                    "Fine of loan {} settled but member {} not updated: {}",
                    stored.transaction_id,
                    stored.member_id,
                    e
                );
                return Err(e);
            }
        }

        tracing::info!(
            "Fine of {} on loan {} {}",
            credited,
            stored.transaction_id,
            stored.fine.payment_status.as_str()
        );
        Ok(self.view(stored, now))
    }

    // --- Read paths --------------------------------------------------------

    /// Filtered, paginated listing. Stale loans are flipped first.
    pub async fn list(&self, query: &LoanQuery) -> AppResult<(Vec<LoanView>, i64)> {
        self.list_at(query, Utc::now()).await
    }

    pub async fn list_at(&self, query: &LoanQuery, now: DateTime<Utc>) -> AppResult<(Vec<LoanView>, i64)> {
        let flipped = self.store.mark_overdue(now).await?;
        if flipped > 0 {
            tracing::info!("{} loans marked overdue", flipped);
        }
        let (loans, total) = self.store.list_loans(query).await?;
        let views = loans.into_iter().map(|l| self.view(l, now)).collect();
        Ok((views, total))
    }

    /// Overdue loans, earliest due first
    pub async fn list_overdue(&self, page: Option<i64>, limit: Option<i64>) -> AppResult<(Vec<LoanView>, i64)> {
        self.list_overdue_at(page, limit, Utc::now()).await
    }

    pub async fn list_overdue_at(
        &self,
        page: Option<i64>,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<LoanView>, i64)> {
        let query = LoanQuery {
            status: Some(LoanStatus::Overdue),
            sort_by: Some(LoanSort::DueDate),
            sort_order: Some(SortOrder::Asc),
            page,
            limit,
            ..LoanQuery::default()
        };
        self.list_at(&query, now).await
    }

    /// Every loan of a member with summary counts
    pub async fn user_history(&self, member_id: Uuid) -> AppResult<UserHistory> {
        self.user_history_at(member_id, Utc::now()).await
    }

    pub async fn user_history_at(&self, member_id: Uuid, now: DateTime<Utc>) -> AppResult<UserHistory> {
        let member = self.store.get_member(member_id).await?.ok_or_else(member_not_found)?;
        self.store.mark_overdue(now).await?;

        let loans: Vec<LoanView> = self
            .store
            .loans_for_member(member_id)
            .await?
            .into_iter()
            .map(|l| self.view(l, now))
            .collect();

        Ok(UserHistory {
            user: MemberShort::from(&member),
            summary: HistorySummary::from_loans(&loans),
            loans,
        })
    }

    /// Fines assessed in `[from, to]`, grouped by payment status
    pub async fn fine_report(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<FineReport> {
        self.fine_report_at(from, to, Utc::now()).await
    }

    pub async fn fine_report_at(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<FineReport> {
        let to = to.unwrap_or(now);
        let from = from.unwrap_or(to - Duration::days(DEFAULT_REPORT_DAYS));
        if from > to {
            return Err(AppError::validation("from must not be after to"));
        }

        let loans = self.store.fines_assessed_between(from, to).await?;

        let groups = [PaymentStatus::Unpaid, PaymentStatus::Paid, PaymentStatus::Waived]
            .into_iter()
            .map(|status| {
                let (count, total) = loans
                    .iter()
                    .filter(|l| l.fine.payment_status == status)
                    .fold((0, Decimal::ZERO), |(count, total), l| (count + 1, total + l.fine.amount));
                FineGroup {
                    payment_status: status,
                    count,
                    total,
                }
            })
            .collect();

        Ok(FineReport {
            from,
            to,
            groups,
            total_assessed: loans.iter().map(|l| l.fine.amount).sum(),
            total_outstanding: loans.iter().map(|l| l.fine.outstanding()).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            book::Book,
            loan::FineReason,
            member::{CreateMember, Member},
        },
        repository::{MemoryStore, MockCirculationStore},
    };
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn book(quantity: i32) -> Book {
        Book {
            id: Uuid::new_v4(),
            isbn: format!("978{:010}", rand::random::<u32>()),
            title: "A Wizard of Earthsea".to_string(),
            author: "Ursula K. Le Guin".to_string(),
            published_year: Some(1968),
            genre: Some("Fantasy".to_string()),
            description: None,
            shelf: None,
            section: None,
            quantity,
            available_quantity: quantity,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn member(name: &str) -> Member {
        CreateMember {
            name: name.to_string(),
            email: format!("{}@example.org", name.to_lowercase()),
            phone: None,
            address: None,
            membership_type: None,
            membership_date: Some(t0() - Duration::days(30)),
            membership_expiry: None,
            notes: None,
        }
        .into_member(t0() - Duration::days(30), 1)
    }

    fn checkout_request(member: &Member, book: &Book) -> CheckoutRequest {
        CheckoutRequest {
            user_id: member.id,
            book_id: book.id,
            due_date: None,
            book_condition: None,
            notes: None,
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        service: CirculationService,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_rules(CirculationConfig::default())
        }

        fn with_rules(rules: CirculationConfig) -> Self {
            let store = Arc::new(MemoryStore::new());
            let service = CirculationService::new(store.clone(), rules);
            Self { store, service }
        }

        async fn book(&self, quantity: i32) -> Book {
            let b = book(quantity);
            self.store.insert_book(&b).await.unwrap();
            b
        }

        async fn member(&self, name: &str) -> Member {
            let m = member(name);
            self.store.insert_member(&m).await.unwrap();
            m
        }

        async fn stored_book(&self, id: Uuid) -> Book {
            self.store.get_book(id).await.unwrap().unwrap()
        }

        async fn stored_member(&self, id: Uuid) -> Member {
            self.store.get_member(id).await.unwrap().unwrap()
        }

        async fn stored_loan(&self, id: Uuid) -> LoanRecord {
            self.store.get_loan(id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_last_copy_checkout_return_and_payment() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let alice = fx.member("Alice").await;
        let bob = fx.member("Bob").await;

        let loan = fx.service.checkout_at(checkout_request(&alice, &b), t0()).await.unwrap();
        assert_eq!(loan.loan.status, LoanStatus::Borrowed);
        assert_eq!(loan.loan.due_date, t0() + Duration::days(14));
        assert!(loan.loan.transaction_id.starts_with("TXN-"));
        assert_eq!(fx.stored_book(b.id).await.available_quantity, 0);
        assert_eq!(fx.stored_member(alice.id).await.open_loans, vec![loan.loan.id]);

        let err = fx.service.checkout_at(checkout_request(&bob, &b), t0()).await.unwrap_err();
        assert_eq!(err, AppError::NoCopiesAvailable);
        assert_eq!(fx.stored_book(b.id).await.available_quantity, 0);

        let returned_at = loan.loan.due_date + Duration::days(3);
        let returned = fx
            .service
            .return_loan_at(loan.loan.id, Some(BookCondition::Good), returned_at)
            .await
            .unwrap();
        assert_eq!(returned.loan.status, LoanStatus::Returned);
        assert_eq!(returned.loan.return_date, Some(returned_at));
        assert_eq!(returned.loan.fine.amount, Decimal::new(300, 2));
        assert_eq!(returned.loan.fine.reason, Some(FineReason::Late));
        assert_eq!(returned.days_remaining, 0);
        assert_eq!(fx.stored_book(b.id).await.available_quantity, 1);

        let a = fx.stored_member(alice.id).await;
        assert!(a.open_loans.is_empty());
        assert_eq!((a.total_borrowed, a.total_returned), (1, 1));
        assert_eq!(a.fines_outstanding, Decimal::new(300, 2));

        let paid = fx
            .service
            .pay_fine_at(loan.loan.id, PaymentMethod::Cash, Some(Decimal::new(300, 2)), returned_at)
            .await
            .unwrap();
        assert_eq!(paid.loan.fine.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.loan.fine.payment_method, Some(PaymentMethod::Cash));

        let a = fx.stored_member(alice.id).await;
        assert_eq!(a.fines_outstanding, Decimal::ZERO);
        assert_eq!(a.fines_paid, Decimal::new(300, 2));
    }

    #[tokio::test]
    async fn test_return_on_due_date_is_free() {
        let fx = Fixture::new();
        let b = fx.book(2).await;
        let m = fx.member("Carol").await;

        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap();
        let returned = fx
            .service
            .return_loan_at(loan.loan.id, None, loan.loan.due_date)
            .await
            .unwrap();
        assert_eq!(returned.loan.fine.amount, Decimal::ZERO);
        assert_eq!(returned.loan.book_condition.returned, Some(BookCondition::Good));

        let err = fx
            .service
            .pay_fine_at(loan.loan.id, PaymentMethod::Cash, None, loan.loan.due_date)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::NoFineDue);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_of_last_copy_admit_one() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let alice = fx.member("Alice").await;
        let bob = fx.member("Bob").await;

        let (first, second) = tokio::join!(
            fx.service.checkout_at(checkout_request(&alice, &b), t0()),
            fx.service.checkout_at(checkout_request(&bob, &b), t0()),
        );

        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        let err = first.err().or(second.err()).unwrap();
        assert_eq!(err, AppError::NoCopiesAvailable);
        assert_eq!(fx.stored_book(b.id).await.available_quantity, 0);
    }

    #[tokio::test]
    async fn test_checkout_preconditions() {
        let rules = CirculationConfig {
            max_active_loans: 1,
            ..CirculationConfig::default()
        };
        let fx = Fixture::with_rules(rules);
        let b = fx.book(5).await;
        let m = fx.member("Dora").await;

        let err = fx
            .service
            .checkout_at(
                CheckoutRequest {
                    due_date: Some(t0() - Duration::hours(1)),
                    ..checkout_request(&m, &b)
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let missing = CheckoutRequest {
            book_id: Uuid::new_v4(),
            ..checkout_request(&m, &b)
        };
        assert!(matches!(
            fx.service.checkout_at(missing, t0()).await,
            Err(AppError::NotFound(_))
        ));

        fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap();
        let err = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap_err();
        assert_eq!(err, AppError::BorrowLimitReached { current: 1, max: 1 });
        assert_eq!(fx.stored_book(b.id).await.available_quantity, 4);
    }

    #[tokio::test]
    async fn test_checkout_refused_for_expired_membership_and_unpaid_fines() {
        let fx = Fixture::new();
        let b = fx.book(3).await;

        let mut expired = member("Eve");
        expired.membership_expiry = t0() - Duration::days(1);
        fx.store.insert_member(&expired).await.unwrap();
        let err = fx.service.checkout_at(checkout_request(&expired, &b), t0()).await.unwrap_err();
        assert_eq!(err, AppError::MembershipInvalid);

        let mut debtor = member("Frank");
        debtor.fines_outstanding = Decimal::new(250, 2);
        fx.store.insert_member(&debtor).await.unwrap();
        let err = fx.service.checkout_at(checkout_request(&debtor, &b), t0()).await.unwrap_err();
        assert_eq!(err, AppError::UnpaidFines(Decimal::new(250, 2)));

        assert_eq!(fx.stored_book(b.id).await.available_quantity, 3);
    }

    #[tokio::test]
    async fn test_renewal_extends_due_date() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let m = fx.member("Grace").await;

        let due = t0() + Duration::days(5);
        let loan = fx
            .service
            .checkout_at(
                CheckoutRequest {
                    due_date: Some(due),
                    ..checkout_request(&m, &b)
                },
                t0(),
            )
            .await
            .unwrap();

        let renewed = fx.service.renew_at(loan.loan.id, Some(7), t0()).await.unwrap();
        assert_eq!(renewed.loan.due_date, due + Duration::days(7));
        assert_eq!(renewed.loan.renewal_count, 1);
        assert_eq!(renewed.loan.renewal_history.len(), 1);
        assert_eq!(renewed.loan.renewal_history[0].previous_due_date, due);
        assert_eq!(renewed.days_remaining, 12);
    }

    #[tokio::test]
    async fn test_renewal_rejections_leave_record_unchanged() {
        let rules = CirculationConfig {
            max_renewals: 1,
            ..CirculationConfig::default()
        };
        let fx = Fixture::with_rules(rules);
        let b = fx.book(3).await;
        let m = fx.member("Heidi").await;

        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;
        fx.service.renew_at(loan.id, None, t0()).await.unwrap();
        let before = fx.stored_loan(loan.id).await;
        let err = fx.service.renew_at(loan.id, None, t0()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(fx.stored_loan(loan.id).await, before);

        let err = fx.service.renew_at(loan.id, Some(31), t0()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Unknown loan is reported before the extension is checked
        let err = fx.service.renew_at(Uuid::new_v4(), Some(0), t0()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Overdue: the flip is persisted, the renewal is not
        let late = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;
        let after_due = late.due_date + Duration::days(1);
        let err = fx.service.renew_at(late.id, Some(7), after_due).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        let stored = fx.stored_loan(late.id).await;
        assert_eq!(stored.status, LoanStatus::Overdue);
        assert_eq!(stored.due_date, late.due_date);
        assert_eq!(stored.renewal_count, 0);

        // Returned
        let done = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;
        fx.service.return_loan_at(done.id, None, t0()).await.unwrap();
        let before = fx.stored_loan(done.id).await;
        let err = fx.service.renew_at(done.id, Some(7), t0()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(fx.stored_loan(done.id).await, before);
    }

    #[tokio::test]
    async fn test_renewal_requires_valid_membership() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let m = fx.member("Ivan").await;
        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;

        let mut lapsed = fx.stored_member(m.id).await;
        lapsed.is_active = false;
        fx.store.update_member(&lapsed).await.unwrap();

        let err = fx.service.renew_at(loan.id, Some(7), t0()).await.unwrap_err();
        assert_eq!(err, AppError::MembershipInvalid);
        assert_eq!(fx.stored_loan(loan.id).await.renewal_count, 0);
    }

    #[tokio::test]
    async fn test_read_flips_overdue_and_persists() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let m = fx.member("Judy").await;
        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;

        let on_time = fx.service.get_at(loan.id, t0() + Duration::days(1)).await.unwrap();
        assert_eq!(on_time.loan.status, LoanStatus::Borrowed);
        assert_eq!(on_time.days_remaining, 13);

        let later = loan.due_date + Duration::days(2);
        let view = fx.service.get_at(loan.id, later).await.unwrap();
        assert_eq!(view.loan.status, LoanStatus::Overdue);
        assert!(view.is_overdue);
        assert_eq!(view.days_remaining, -2);
        assert_eq!(view.estimated_fine, Some(Decimal::new(200, 2)));
        assert_eq!(fx.stored_loan(loan.id).await.status, LoanStatus::Overdue);
    }

    #[tokio::test]
    async fn test_lost_book_leaves_collection() {
        let fx = Fixture::new();
        let b = fx.book(2).await;
        let m = fx.member("Karl").await;
        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;

        let lost = fx
            .service
            .return_loan_at(loan.id, Some(BookCondition::Lost), t0() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(lost.loan.status, LoanStatus::Lost);
        assert_eq!(lost.loan.fine.amount, Decimal::new(5000, 2));
        assert_eq!(lost.loan.fine.reason, Some(FineReason::Lost));

        let stored = fx.stored_book(b.id).await;
        assert_eq!((stored.quantity, stored.available_quantity), (1, 1));

        let err = fx
            .service
            .return_loan_at(loan.id, None, t0() + Duration::days(3))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::AlreadyReturned);
        assert_eq!(fx.stored_book(b.id).await, stored);
    }

    #[tokio::test]
    async fn test_damaged_return_and_waiver() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let m = fx.member("Liam").await;
        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;

        let returned = fx
            .service
            .return_loan_at(loan.id, Some(BookCondition::Damaged), loan.due_date + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(returned.loan.fine.amount, Decimal::new(1100, 2));
        assert_eq!(returned.loan.fine.reason, Some(FineReason::Damaged));
        assert_eq!(fx.stored_book(b.id).await.available_quantity, 1);

        let waived = fx
            .service
            .pay_fine_at(loan.id, PaymentMethod::Waived, None, loan.due_date + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(waived.loan.fine.payment_status, PaymentStatus::Waived);

        let stored = fx.stored_member(m.id).await;
        assert_eq!(stored.fines_outstanding, Decimal::ZERO);
        assert_eq!(stored.fines_paid, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_fine_payment_rules() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let m = fx.member("Mallory").await;
        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;
        let end = loan.due_date + Duration::days(4);
        fx.service.return_loan_at(loan.id, None, end).await.unwrap();

        let err = fx
            .service
            .pay_fine_at(loan.id, PaymentMethod::Card, Some(Decimal::new(100, 2)), end)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPayment { .. }));
        assert_eq!(fx.stored_loan(loan.id).await.fine.payment_status, PaymentStatus::Unpaid);

        let paid = fx
            .service
            .pay_fine_at(loan.id, PaymentMethod::Card, Some(Decimal::new(500, 2)), end)
            .await
            .unwrap();
        assert_eq!(paid.loan.fine.amount_tendered, Some(Decimal::new(500, 2)));

        let err = fx
            .service
            .pay_fine_at(loan.id, PaymentMethod::Card, None, end)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::AlreadyPaid);

        let stored = fx.stored_member(m.id).await;
        assert_eq!(stored.fines_outstanding, Decimal::ZERO);
        assert_eq!(stored.fines_paid, Decimal::new(400, 2));
    }

    #[tokio::test]
    async fn test_update_rules() {
        let fx = Fixture::new();
        let b = fx.book(1).await;
        let m = fx.member("Nina").await;
        let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;

        let err = fx
            .service
            .update_at(
                loan.id,
                UpdateLoanRequest {
                    status: Some(LoanStatus::Returned),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let err = fx
            .service
            .update_at(
                loan.id,
                UpdateLoanRequest {
                    due_date: Some(t0() - Duration::days(1)),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let new_due = t0() + Duration::days(20);
        let updated = fx
            .service
            .update_at(
                loan.id,
                UpdateLoanRequest {
                    due_date: Some(new_due),
                    notes: Some("Shelved behind the desk".to_string()),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(updated.loan.due_date, new_due);
        assert_eq!(updated.loan.notes.as_deref(), Some("Shelved behind the desk"));
        assert_eq!(updated.loan.version, 1);
        // Ledgers are untouched by administrative edits
        assert_eq!(fx.stored_book(b.id).await.available_quantity, 0);
    }

    #[tokio::test]
    async fn test_overdue_listing_and_history() {
        let fx = Fixture::new();
        let b = fx.book(3).await;
        let m = fx.member("Oscar").await;

        let first = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;
        let second = fx
            .service
            .checkout_at(checkout_request(&m, &b), t0() + Duration::days(3))
            .await
            .unwrap()
            .loan;
        let third = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;
        fx.service.return_loan_at(third.id, None, t0() + Duration::days(1)).await.unwrap();

        let now = first.due_date + Duration::days(5);
        let (overdue, total) = fx.service.list_overdue_at(None, None, now).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(overdue[0].loan.id, first.id);
        assert_eq!(overdue[1].loan.id, second.id);
        assert_eq!(overdue[0].estimated_fine, Some(Decimal::new(500, 2)));

        let history = fx.service.user_history_at(m.id, now).await.unwrap();
        assert_eq!(history.loans.len(), 3);
        assert_eq!(history.summary.active, 2);
        assert_eq!(history.summary.overdue, 2);
        assert_eq!(history.summary.returned, 1);

        let err = fx.service.user_history_at(Uuid::new_v4(), now).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fine_report_groups_by_status() {
        let fx = Fixture::new();
        let b = fx.book(3).await;
        let m = fx.member("Peggy").await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let loan = fx.service.checkout_at(checkout_request(&m, &b), t0()).await.unwrap().loan;
            ids.push(loan.id);
        }
        let end = t0() + Duration::days(16);
        for id in &ids {
            fx.service.return_loan_at(*id, None, end).await.unwrap();
        }
        fx.service.pay_fine_at(ids[0], PaymentMethod::Cash, None, end).await.unwrap();
        fx.service.pay_fine_at(ids[1], PaymentMethod::Waived, None, end).await.unwrap();

        let report = fx
            .service
            .fine_report_at(Some(t0()), Some(end + Duration::days(1)), end)
            .await
            .unwrap();
        assert_eq!(report.total_assessed, Decimal::new(600, 2));
        assert_eq!(report.total_outstanding, Decimal::new(200, 2));
        let counts: Vec<usize> = report.groups.iter().map(|g| g.count).collect();
        assert_eq!(counts, vec![1, 1, 1]);

        let err = fx
            .service
            .fine_report_at(Some(end), Some(t0()), end)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_failed_loan_insert_releases_reserved_copy() {
        let b = book(1);
        let m = member("Quinn");
        let request = checkout_request(&m, &b);

        let mut store = MockCirculationStore::new();
        let member_row = m.clone();
        store
            .expect_get_member()
            .returning(move |_| Ok(Some(member_row.clone())));
        let book_row = b.clone();
        store.expect_get_book().returning(move |_| Ok(Some(book_row.clone())));
        store.expect_find_loan_by_transaction().returning(|_| Ok(None));
        let reserved = Book {
            available_quantity: 0,
            ..b.clone()
        };
        store
            .expect_reserve_copy()
            .times(1)
            .returning(move |_| Ok(Some(reserved.clone())));
        store
            .expect_insert_loan()
            .times(1)
            .returning(|_| Err(AppError::StorageUnavailable("connection reset".to_string())));
        let released = b.clone();
        store
            .expect_release_copy()
            .times(1)
            .returning(move |_| Ok(Some(released.clone())));
        let attached = m.clone();
        store
            .expect_attach_loan()
            .times(1)
            .returning(move |_, _, _, _| Ok(Some(attached.clone())));
        let revoked = m.clone();
        store
            .expect_revoke_loan()
            .withf(move |member_id, _| *member_id == revoked.id)
            .times(1)
            .returning(|_, _| Ok(None));

        let service = CirculationService::new(Arc::new(store), CirculationConfig::default());
        let err = service.checkout_at(request, t0()).await.unwrap_err();
        assert!(matches!(err, AppError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_copy_taken_between_read_and_reserve_is_refused() {
        let b = book(1);
        let m = member("Sybil");
        let request = checkout_request(&m, &b);

        let mut store = MockCirculationStore::new();
        let member_row = m.clone();
        store
            .expect_get_member()
            .returning(move |_| Ok(Some(member_row.clone())));
        // The read still shows the last copy on the shelf
        let book_row = b.clone();
        store.expect_get_book().returning(move |_| Ok(Some(book_row.clone())));
        store.expect_find_loan_by_transaction().returning(|_| Ok(None));
        store.expect_reserve_copy().times(1).returning(|_| Ok(None));
        store.expect_release_copy().never();
        store.expect_attach_loan().never();
        store.expect_insert_loan().never();

        let service = CirculationService::new(Arc::new(store), CirculationConfig::default());
        let err = service.checkout_at(request, t0()).await.unwrap_err();
        assert_eq!(err, AppError::NoCopiesAvailable);
    }

    #[tokio::test]
    async fn test_borrow_limit_reached_between_read_and_attach_is_refused() {
        let rules = CirculationConfig {
            max_active_loans: 2,
            ..CirculationConfig::default()
        };
        let b = book(3);
        let m = member("Trent");
        let request = checkout_request(&m, &b);

        // First read: one open loan. Second read, after the refused attach: two.
        let mut at_limit = m.clone();
        at_limit.open_loans = vec![Uuid::new_v4(), Uuid::new_v4()];
        let mut below_limit = m.clone();
        below_limit.open_loans = vec![at_limit.open_loans[0]];
        let reads = std::sync::atomic::AtomicUsize::new(0);

        let mut store = MockCirculationStore::new();
        store.expect_get_member().times(2).returning(move |_| {
            if reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(Some(below_limit.clone()))
            } else {
                Ok(Some(at_limit.clone()))
            }
        });
        let book_row = b.clone();
        store.expect_get_book().returning(move |_| Ok(Some(book_row.clone())));
        store.expect_find_loan_by_transaction().returning(|_| Ok(None));
        let reserved = Book {
            available_quantity: 2,
            ..b.clone()
        };
        store
            .expect_reserve_copy()
            .times(1)
            .returning(move |_| Ok(Some(reserved.clone())));
        store
            .expect_attach_loan()
            .withf(|_, _, _, max_open| *max_open == 2)
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        let released = b.clone();
        store
            .expect_release_copy()
            .times(1)
            .returning(move |_| Ok(Some(released.clone())));
        store.expect_insert_loan().never();

        let service = CirculationService::new(Arc::new(store), rules);
        let err = service.checkout_at(request, t0()).await.unwrap_err();
        assert_eq!(err, AppError::BorrowLimitReached { current: 2, max: 2 });
    }

    #[tokio::test]
    async fn test_member_write_failure_after_return_leaves_partial_state() {
        let b = book(1);
        let m = member("Rupert");
        let loan = LoanRecord::new(
            m.id,
            b.id,
            t0(),
            t0() + Duration::days(14),
            BookCondition::Good,
            None,
        );
        let loan_id = loan.id;

        let mut store = MockCirculationStore::new();
        store.expect_get_loan().returning(move |_| Ok(Some(loan.clone())));
        store
            .expect_update_loan()
            .times(1)
            .returning(|l| Ok(Some(LoanRecord { version: l.version + 1, ..l.clone() })));
        let released = b.clone();
        store
            .expect_release_copy()
            .times(1)
            .returning(move |_| Ok(Some(released.clone())));
        store.expect_retire_copy().never();
        store
            .expect_detach_loan()
            .times(1)
            .returning(|_, _, _| Err(AppError::StorageUnavailable("connection reset".to_string())));

        let service = CirculationService::new(Arc::new(store), CirculationConfig::default());
        let err = service
            .return_loan_at(loan_id, None, t0() + Duration::days(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_stale_loan_write_is_a_conflict() {
        let b = book(1);
        let m = member("Sybil");
        let loan = LoanRecord::new(m.id, b.id, t0(), t0() + Duration::days(14), BookCondition::Good, None);
        let loan_id = loan.id;

        let mut store = MockCirculationStore::new();
        store.expect_get_loan().returning(move |_| Ok(Some(loan.clone())));
        store.expect_update_loan().times(1).returning(|_| Ok(None));
        store.expect_release_copy().never();
        store.expect_detach_loan().never();

        let service = CirculationService::new(Arc::new(store), CirculationConfig::default());
        let err = service.return_loan_at(loan_id, None, t0()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
