//! Loan (borrow) record, its state machine and related types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};

const DAY_MS: i64 = 86_400_000;

/// Whole days covered by `span`, rounded up (negative spans round toward zero).
pub fn whole_days_ceil(span: Duration) -> i64 {
    let ms = span.num_milliseconds();
    if ms > 0 {
        (ms + DAY_MS - 1) / DAY_MS
    } else {
        -((-ms) / DAY_MS)
    }
}

/// Loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
pub enum LoanStatus {
    Borrowed,
    Overdue,
    Returned,
    Lost,
}

impl LoanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoanStatus::Returned | LoanStatus::Lost)
    }

    /// Edges of the loan state machine
    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Borrowed, Overdue) | (Borrowed, Returned) | (Borrowed, Lost) | (Overdue, Returned) | (Overdue, Lost)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Borrowed => "borrowed",
            LoanStatus::Overdue => "overdue",
            LoanStatus::Returned => "returned",
            LoanStatus::Lost => "lost",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Physical condition of a copy at checkout or return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "book_condition", rename_all = "lowercase")]
pub enum BookCondition {
    Excellent,
    Good,
    Fair,
    Poor,
    Damaged,
    Lost,
}

impl Default for BookCondition {
    fn default() -> Self {
        BookCondition::Good
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "fine_reason", rename_all = "lowercase")]
pub enum FineReason {
    Late,
    Damaged,
    Lost,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Waived,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Waived => "waived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Online,
    Waived,
}

/// Fine attached to a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Fine {
    #[schema(value_type = String, example = "3.00")]
    pub amount: Decimal,
    pub reason: Option<FineReason>,
    pub payment_status: PaymentStatus,
    pub assessed_date: Option<DateTime<Utc>>,
    pub paid_date: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethod>,
    #[schema(value_type = Option<String>)]
    pub amount_tendered: Option<Decimal>,
}

impl Default for Fine {
    fn default() -> Self {
        Self {
            amount: Decimal::ZERO,
            reason: None,
            payment_status: PaymentStatus::Unpaid,
            assessed_date: None,
            paid_date: None,
            payment_method: None,
            amount_tendered: None,
        }
    }
}

impl Fine {
    pub fn assessed(amount: Decimal, reason: Option<FineReason>, at: DateTime<Utc>) -> Self {
        Self {
            amount,
            reason: if amount > Decimal::ZERO { reason } else { None },
            assessed_date: Some(at),
            ..Self::default()
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.payment_status, PaymentStatus::Paid | PaymentStatus::Waived)
    }

    /// Amount still owed by the member
    pub fn outstanding(&self) -> Decimal {
        if self.is_settled() {
            Decimal::ZERO
        } else {
            self.amount
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenewalEntry {
    pub renewed_at: DateTime<Utc>,
    pub previous_due_date: DateTime<Utc>,
    pub new_due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRecord {
    pub checked_out: BookCondition,
    pub returned: Option<BookCondition>,
}

/// One checkout, from borrow to resolution. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoanRecord {
    pub id: Uuid,
    /// Human-readable identifier (`TXN-XXXXXXXX`)
    pub transaction_id: String,
    pub member_id: Uuid,
    pub book_id: Uuid,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub fine: Fine,
    pub renewal_count: i32,
    pub renewal_history: Vec<RenewalEntry>,
    pub book_condition: ConditionRecord,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every persisted write
    pub version: i64,
}

pub fn generate_transaction_id() -> String {
    format!("TXN-{:08X}", rand::random::<u32>())
}

/// Status a loan has at `now`, accounting for a due date that passed since
/// the record was last written.
pub fn effective_status(loan: &LoanRecord, now: DateTime<Utc>) -> LoanStatus {
    if loan.status == LoanStatus::Borrowed && now > loan.due_date {
        LoanStatus::Overdue
    } else {
        loan.status
    }
}

impl LoanRecord {
    pub fn new(
        member_id: Uuid,
        book_id: Uuid,
        now: DateTime<Utc>,
        due_date: DateTime<Utc>,
        condition: BookCondition,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: generate_transaction_id(),
            member_id,
            book_id,
            borrow_date: now,
            due_date,
            return_date: None,
            status: LoanStatus::Borrowed,
            fine: Fine::default(),
            renewal_count: 0,
            renewal_history: Vec::new(),
            book_condition: ConditionRecord {
                checked_out: condition,
                returned: None,
            },
            notes,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.due_date
    }

    /// Days until due (negative once past due, 0 once resolved)
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        if self.status.is_terminal() {
            return 0;
        }
        whole_days_ceil(self.due_date - now)
    }

    pub fn borrow_duration(&self, now: DateTime<Utc>) -> i64 {
        let end = self.return_date.unwrap_or(now);
        whole_days_ceil(end - self.borrow_date)
    }

    /// Lazy overdue detection. Returns true when the status flipped.
    pub fn refresh_overdue(&mut self, now: DateTime<Utc>) -> bool {
        let status = effective_status(self, now);
        if status != self.status {
            self.status = status;
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    /// Extend the due date of a current, on-time loan.
    pub fn renew(&mut self, extension_days: i64, now: DateTime<Utc>, max_renewals: u32) -> AppResult<RenewalEntry> {
        if self.status != LoanStatus::Borrowed {
            return Err(AppError::InvalidTransition(format!(
                "Cannot renew a loan with status {}",
                self.status
            )));
        }
        if self.is_overdue(now) {
            return Err(AppError::InvalidTransition(
                "Cannot renew an overdue loan".to_string(),
            ));
        }
        if self.renewal_count >= max_renewals as i32 {
            return Err(AppError::InvalidTransition(format!(
                "Maximum renewals reached ({}/{})",
                self.renewal_count, max_renewals
            )));
        }
        if extension_days < 1 {
            return Err(AppError::validation("extensionDays must be at least 1"));
        }

        let previous = self.due_date;
        self.due_date = previous + Duration::days(extension_days);
        self.renewal_count += 1;
        let entry = RenewalEntry {
            renewed_at: now,
            previous_due_date: previous,
            new_due_date: self.due_date,
        };
        self.renewal_history.push(entry.clone());
        self.updated_at = now;

        Ok(entry)
    }

    /// Close the loan as returned (or lost) and attach the assessed fine.
    pub fn close(&mut self, condition: BookCondition, fine: Fine, now: DateTime<Utc>) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::AlreadyReturned);
        }
        let next = if condition == BookCondition::Lost {
            LoanStatus::Lost
        } else {
            LoanStatus::Returned
        };
        // Overdue is recorded first so the stored history reflects the flip
        self.refresh_overdue(now);
        debug_assert!(self.status.can_transition_to(next));

        self.status = next;
        self.return_date = Some(now);
        self.book_condition.returned = Some(condition);
        self.fine = fine;
        self.updated_at = now;
        Ok(())
    }

    /// Mark the fine as paid or waived. Returns the amount credited to the member.
    pub fn settle_fine(
        &mut self,
        method: PaymentMethod,
        tendered: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        if self.fine.amount <= Decimal::ZERO {
            return Err(AppError::NoFineDue);
        }
        if self.fine.is_settled() {
            return Err(AppError::AlreadyPaid);
        }
        let owed = self.fine.amount;

        let status = if method == PaymentMethod::Waived {
            PaymentStatus::Waived
        } else {
            let tendered = tendered.unwrap_or(owed);
            if tendered <= Decimal::ZERO {
                return Err(AppError::validation("amount must be greater than 0"));
            }
            if tendered < owed {
                return Err(AppError::InsufficientPayment { owed, tendered });
            }
            self.fine.amount_tendered = Some(tendered.round_dp(2));
            PaymentStatus::Paid
        };

        self.fine.payment_status = status;
        self.fine.payment_method = Some(method);
        self.fine.paid_date = Some(now);
        self.updated_at = now;
        Ok(owed)
    }
}

/// Loan with values derived at read time
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: LoanRecord,
    pub days_remaining: i64,
    pub borrow_duration: i64,
    pub is_overdue: bool,
    /// Fine owed if the loan were closed now (open loans only)
    #[schema(value_type = Option<String>)]
    pub estimated_fine: Option<Decimal>,
}

/// Checkout request
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(alias = "memberId")]
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub book_condition: Option<BookCondition>,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
}

/// Generic loan update request
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLoanRequest {
    pub status: Option<LoanStatus>,
    pub due_date: Option<DateTime<Utc>>,
    pub book_condition: Option<BookCondition>,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub book_condition: Option<BookCondition>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest {
    #[validate(range(min = 1, max = 30, message = "extensionDays must be between 1 and 30"))]
    pub extension_days: Option<i64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayFineRequest {
    pub payment_method: PaymentMethod,
    #[schema(value_type = Option<String>)]
    pub amount: Option<Decimal>,
}

/// Sortable loan fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum LoanSort {
    #[default]
    BorrowDate,
    DueDate,
    ReturnDate,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Loan listing filters
#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoanQuery {
    #[serde(alias = "memberId")]
    pub user_id: Option<Uuid>,
    pub book_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    pub sort_by: Option<LoanSort>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams, ToSchema)]
pub struct PageQuery {
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams, ToSchema)]
pub struct FineReportQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
