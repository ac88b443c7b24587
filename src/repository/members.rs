//! Members repository for database operations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::member::{Member, MemberQuery},
};

use super::page_window;

const MEMBER_COLUMNS: &str = "id, member_code, name, email, phone, address, membership_type, \
     membership_date, membership_expiry, is_active, open_loans, total_borrowed, total_returned, \
     fines_paid, fines_outstanding, last_borrow_date, notes, created_at, updated_at";

#[derive(Clone)]
pub struct MembersRepository {
    pool: Pool<Postgres>,
}

impl MembersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!("SELECT {} FROM members WHERE id = $1", MEMBER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(member)
    }

    pub async fn get_by_email(&self, email: &str) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE email = $1",
            MEMBER_COLUMNS
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    /// Search members with pagination
    pub async fn search(&self, query: &MemberQuery) -> AppResult<(Vec<Member>, i64)> {
        let (_, limit, offset) = page_window(query.page, query.limit);

        fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &MemberQuery) {
            builder.push(" WHERE 1=1");
            if let Some(ref q) = query.q {
                let pattern = format!("%{}%", q.trim());
                builder
                    .push(" AND (name ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR email ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR member_code ILIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
            if let Some(ref name) = query.name {
                builder.push(" AND name ILIKE ").push_bind(format!("%{}%", name));
            }
            if let Some(ref email) = query.email {
                builder.push(" AND email = ").push_bind(email.trim().to_lowercase());
            }
            if let Some(kind) = query.membership_type {
                builder.push(" AND membership_type = ").push_bind(kind);
            }
            if let Some(active) = query.is_active {
                builder.push(" AND is_active = ").push_bind(active);
            }
        }

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM members");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM members", MEMBER_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY name ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let members = select.build_query_as::<Member>().fetch_all(&self.pool).await?;

        Ok((members, total))
    }

    pub async fn insert(&self, m: &Member) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO members (
                id, member_code, name, email, phone, membership_type,
                membership_date, membership_expiry, is_active, open_loans,
                total_borrowed, total_returned, fines_paid, fines_outstanding,
                last_borrow_date, notes, created_at, updated_at, address
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(m.id)
        .bind(&m.member_code)
        .bind(&m.name)
        .bind(&m.email)
        .bind(&m.phone)
        .bind(m.membership_type)
        .bind(m.membership_date)
        .bind(m.membership_expiry)
        .bind(m.is_active)
        .bind(&m.open_loans)
        .bind(m.total_borrowed)
        .bind(m.total_returned)
        .bind(m.fines_paid)
        .bind(m.fines_outstanding)
        .bind(m.last_borrow_date)
        .bind(&m.notes)
        .bind(m.created_at)
        .bind(m.updated_at)
        .bind(Json(&m.address))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_profile(&self, m: &Member) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            r#"
            UPDATE members
            SET name = $2, email = $3, phone = $4, membership_type = $5,
                membership_expiry = $6, is_active = $7, notes = $8, address = $9,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(m.id)
        .bind(&m.name)
        .bind(&m.email)
        .bind(&m.phone)
        .bind(m.membership_type)
        .bind(m.membership_expiry)
        .bind(m.is_active)
        .bind(&m.notes)
        .bind(Json(&m.address))
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    pub async fn delete_if_idle(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM members WHERE id = $1 AND cardinality(open_loans) = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Conditional on the open-loan count, so concurrent checkouts cannot pass the limit
    pub async fn attach_loan(
        &self,
        member_id: Uuid,
        loan_id: Uuid,
        at: DateTime<Utc>,
        max_open: u32,
    ) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            r#"
            UPDATE members
            SET open_loans = CASE WHEN $2 = ANY(open_loans) THEN open_loans ELSE array_append(open_loans, $2) END,
                total_borrowed = total_borrowed + 1,
                last_borrow_date = $3,
                updated_at = NOW()
            WHERE id = $1 AND cardinality(open_loans) < $4
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(member_id)
        .bind(loan_id)
        .bind(at)
        .bind(i64::from(max_open))
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    pub async fn revoke_loan(&self, member_id: Uuid, loan_id: Uuid) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            r#"
            UPDATE members
            SET open_loans = array_remove(open_loans, $2),
                total_borrowed = GREATEST(total_borrowed - 1, 0),
                updated_at = NOW()
            WHERE id = $1 AND $2 = ANY(open_loans)
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(member_id)
        .bind(loan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    pub async fn detach_loan(&self, member_id: Uuid, loan_id: Uuid, fine: Decimal) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            r#"
            UPDATE members
            SET open_loans = array_remove(open_loans, $2),
                total_returned = total_returned + 1,
                fines_outstanding = fines_outstanding + GREATEST($3, 0),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(member_id)
        .bind(loan_id)
        .bind(fine)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    pub async fn settle_fine(&self, member_id: Uuid, amount: Decimal, paid: bool) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            r#"
            UPDATE members
            SET fines_outstanding = GREATEST(fines_outstanding - $2, 0),
                fines_paid = fines_paid + CASE WHEN $3 THEN $2 ELSE 0 END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(member_id)
        .bind(amount)
        .bind(paid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }
}
