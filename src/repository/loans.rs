//! Loans repository for database operations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, FromRow, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::loan::{
        BookCondition, ConditionRecord, Fine, FineReason, LoanQuery, LoanRecord, LoanSort, LoanStatus,
        PaymentMethod, PaymentStatus, RenewalEntry, SortOrder,
    },
};

use super::page_window;

const LOAN_COLUMNS: &str = "id, transaction_id, member_id, book_id, borrow_date, due_date, return_date, \
     status, fine_amount, fine_reason, fine_payment_status, fine_assessed_date, fine_paid_date, \
     fine_payment_method, fine_amount_tendered, renewal_count, renewal_history, \
     checked_out_condition, returned_condition, notes, created_at, updated_at, version";

/// Flat row shape of the `loans` table
#[derive(Debug, FromRow)]
struct LoanRow {
    id: Uuid,
    transaction_id: String,
    member_id: Uuid,
    book_id: Uuid,
    borrow_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    return_date: Option<DateTime<Utc>>,
    status: LoanStatus,
    fine_amount: Decimal,
    fine_reason: Option<FineReason>,
    fine_payment_status: PaymentStatus,
    fine_assessed_date: Option<DateTime<Utc>>,
    fine_paid_date: Option<DateTime<Utc>>,
    fine_payment_method: Option<PaymentMethod>,
    fine_amount_tendered: Option<Decimal>,
    renewal_count: i32,
    renewal_history: Json<Vec<RenewalEntry>>,
    checked_out_condition: BookCondition,
    returned_condition: Option<BookCondition>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<LoanRow> for LoanRecord {
    fn from(r: LoanRow) -> Self {
        Self {
            id: r.id,
            transaction_id: r.transaction_id,
            member_id: r.member_id,
            book_id: r.book_id,
            borrow_date: r.borrow_date,
            due_date: r.due_date,
            return_date: r.return_date,
            status: r.status,
            fine: Fine {
                amount: r.fine_amount,
                reason: r.fine_reason,
                payment_status: r.fine_payment_status,
                assessed_date: r.fine_assessed_date,
                paid_date: r.fine_paid_date,
                payment_method: r.fine_payment_method,
                amount_tendered: r.fine_amount_tendered,
            },
            renewal_count: r.renewal_count,
            renewal_history: r.renewal_history.0,
            book_condition: ConditionRecord {
                checked_out: r.checked_out_condition,
                returned: r.returned_condition,
            },
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
            version: r.version,
        }
    }
}

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Option<LoanRecord>> {
        let row = sqlx::query_as::<_, LoanRow>(&format!("SELECT {} FROM loans WHERE id = $1", LOAN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn get_by_transaction_id(&self, transaction_id: &str) -> AppResult<Option<LoanRecord>> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            "SELECT {} FROM loans WHERE transaction_id = $1",
            LOAN_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn insert(&self, loan: &LoanRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (
                id, transaction_id, member_id, book_id, borrow_date, due_date, return_date,
                status, fine_amount, fine_reason, fine_payment_status, fine_assessed_date,
                fine_paid_date, fine_payment_method, fine_amount_tendered,
                renewal_count, renewal_history, checked_out_condition, returned_condition,
                notes, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(loan.id)
        .bind(&loan.transaction_id)
        .bind(loan.member_id)
        .bind(loan.book_id)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.status)
        .bind(loan.fine.amount)
        .bind(loan.fine.reason)
        .bind(loan.fine.payment_status)
        .bind(loan.fine.assessed_date)
        .bind(loan.fine.paid_date)
        .bind(loan.fine.payment_method)
        .bind(loan.fine.amount_tendered)
        .bind(loan.renewal_count)
        .bind(Json(&loan.renewal_history))
        .bind(loan.book_condition.checked_out)
        .bind(loan.book_condition.returned)
        .bind(&loan.notes)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .bind(loan.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Optimistic write: succeeds only if nobody wrote the loan since it was read
    pub async fn update_versioned(&self, loan: &LoanRecord) -> AppResult<Option<LoanRecord>> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            UPDATE loans
            SET due_date = $3, return_date = $4, status = $5,
                fine_amount = $6, fine_reason = $7, fine_payment_status = $8,
                fine_assessed_date = $9, fine_paid_date = $10, fine_payment_method = $11,
                fine_amount_tendered = $12, renewal_count = $13, renewal_history = $14,
                checked_out_condition = $15, returned_condition = $16, notes = $17,
                updated_at = $18, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.id)
        .bind(loan.version)
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.status)
        .bind(loan.fine.amount)
        .bind(loan.fine.reason)
        .bind(loan.fine.payment_status)
        .bind(loan.fine.assessed_date)
        .bind(loan.fine.paid_date)
        .bind(loan.fine.payment_method)
        .bind(loan.fine.amount_tendered)
        .bind(loan.renewal_count)
        .bind(Json(&loan.renewal_history))
        .bind(loan.book_condition.checked_out)
        .bind(loan.book_condition.returned)
        .bind(&loan.notes)
        .bind(loan.updated_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn mark_overdue(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = 'overdue', updated_at = $1, version = version + 1
            WHERE status = 'borrowed' AND due_date < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Filtered, sorted, paginated listing
    pub async fn search(&self, query: &LoanQuery) -> AppResult<(Vec<LoanRecord>, i64)> {
        let (_, limit, offset) = page_window(query.page, query.limit);

        fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &LoanQuery) {
            builder.push(" WHERE 1=1");
            if let Some(member_id) = query.user_id {
                builder.push(" AND member_id = ").push_bind(member_id);
            }
            if let Some(book_id) = query.book_id {
                builder.push(" AND book_id = ").push_bind(book_id);
            }
            if let Some(status) = query.status {
                builder.push(" AND status = ").push_bind(status);
            }
            if let Some(from) = query.from_date {
                builder.push(" AND borrow_date >= ").push_bind(from);
            }
            if let Some(to) = query.to_date {
                builder.push(" AND borrow_date <= ").push_bind(to);
            }
            if let Some(ref txn) = query.transaction_id {
                builder.push(" AND transaction_id = ").push_bind(txn.clone());
            }
        }

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM loans");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let column = match query.sort_by.unwrap_or_default() {
            LoanSort::BorrowDate => "borrow_date",
            LoanSort::DueDate => "due_date",
            LoanSort::ReturnDate => "return_date",
            LoanSort::Status => "status",
        };
        let direction = match query.sort_order.unwrap_or_default() {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM loans", LOAN_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(format!(" ORDER BY {} {} NULLS LAST, id LIMIT ", column, direction))
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = select.build_query_as::<LoanRow>().fetch_all(&self.pool).await?;

        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    /// Every loan of a member, newest first
    pub async fn get_member_loans(&self, member_id: Uuid) -> AppResult<Vec<LoanRecord>> {
        let rows = sqlx::query_as::<_, LoanRow>(&format!(
            "SELECT {} FROM loans WHERE member_id = $1 ORDER BY borrow_date DESC",
            LOAN_COLUMNS
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn fines_assessed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<LoanRecord>> {
        let rows = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            SELECT {} FROM loans
            WHERE fine_amount > 0 AND fine_assessed_date >= $1 AND fine_assessed_date <= $2
            ORDER BY fine_assessed_date
            "#,
            LOAN_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
