//! Member (membership ledger) model and related types

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::loan::whole_days_ceil;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "membership_type", rename_all = "lowercase")]
pub enum MembershipType {
    #[default]
    Regular,
    Premium,
    Student,
    Staff,
}

pub fn generate_member_code() -> String {
    format!("LIB-U{:06X}", rand::random::<u32>() & 0x00FF_FFFF)
}

/// Postal address, every part optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

/// Library member with borrowing counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: Uuid,
    /// Library card code (`LIB-UXXXXXX`)
    pub member_code: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    #[sqlx(json)]
    pub address: Address,
    pub membership_type: MembershipType,
    pub membership_date: DateTime<Utc>,
    pub membership_expiry: DateTime<Utc>,
    pub is_active: bool,
    /// Loans not yet returned or lost
    pub open_loans: Vec<Uuid>,
    pub total_borrowed: i32,
    pub total_returned: i32,
    #[schema(value_type = String)]
    pub fines_paid: Decimal,
    #[schema(value_type = String)]
    pub fines_outstanding: Decimal,
    pub last_borrow_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn is_membership_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.membership_expiry
    }

    pub fn membership_days_remaining(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_membership_valid(now) {
            return 0;
        }
        whole_days_ceil(self.membership_expiry - now)
    }

    pub fn current_borrow_count(&self) -> usize {
        self.open_loans.len()
    }

    /// Record a new open loan
    pub fn attach_loan(&mut self, loan_id: Uuid, at: DateTime<Utc>) {
        if !self.open_loans.contains(&loan_id) {
            self.open_loans.push(loan_id);
        }
        self.total_borrowed += 1;
        self.last_borrow_date = Some(at);
    }

    /// Drop a loan that was attached but never recorded. False if it was not open.
    pub fn revoke_loan(&mut self, loan_id: Uuid) -> bool {
        let before = self.open_loans.len();
        self.open_loans.retain(|id| *id != loan_id);
        if self.open_loans.len() == before {
            return false;
        }
        self.total_borrowed = (self.total_borrowed - 1).max(0);
        true
    }

    /// Close an open loan, adding any newly assessed fine to the outstanding total
    pub fn detach_loan(&mut self, loan_id: Uuid, fine: Decimal) {
        self.open_loans.retain(|id| *id != loan_id);
        self.total_returned += 1;
        if fine > Decimal::ZERO {
            self.fines_outstanding += fine;
        }
    }

    /// Move a settled fine out of the outstanding total. `paid` is false for waivers.
    pub fn settle_fine(&mut self, amount: Decimal, paid: bool) {
        self.fines_outstanding = (self.fines_outstanding - amount).max(Decimal::ZERO);
        if paid {
            self.fines_paid += amount;
        }
    }
}

/// Member with values derived at read time
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    #[serde(flatten)]
    pub member: Member,
    pub is_membership_valid: bool,
    pub membership_days_remaining: i64,
    pub current_borrow_count: usize,
}

impl MemberView {
    pub fn new(member: Member, now: DateTime<Utc>) -> Self {
        Self {
            is_membership_valid: member.is_membership_valid(now),
            membership_days_remaining: member.membership_days_remaining(now),
            current_borrow_count: member.current_borrow_count(),
            member,
        }
    }
}

/// Create member request
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateMember {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Please provide a valid email address"))]
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<Address>,
    pub membership_type: Option<MembershipType>,
    pub membership_date: Option<DateTime<Utc>>,
    pub membership_expiry: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl CreateMember {
    pub fn into_member(self, now: DateTime<Utc>, membership_years: i32) -> Member {
        let start = self.membership_date.unwrap_or(now);
        let expiry = self.membership_expiry.unwrap_or_else(|| {
            start
                .checked_add_months(Months::new(12 * membership_years.max(0) as u32))
                .unwrap_or(start)
        });
        Member {
            id: Uuid::new_v4(),
            member_code: generate_member_code(),
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            phone: self.phone,
            address: self.address.unwrap_or_default(),
            membership_type: self.membership_type.unwrap_or_default(),
            membership_date: start,
            membership_expiry: expiry,
            is_active: true,
            open_loans: Vec::new(),
            total_borrowed: 0,
            total_returned: 0,
            fines_paid: Decimal::ZERO,
            fines_outstanding: Decimal::ZERO,
            last_borrow_date: None,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Update member request
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMember {
    #[validate(length(min = 1, max = 200, message = "Name cannot be empty"))]
    pub name: Option<String>,
    #[validate(email(message = "Please provide a valid email address"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<Address>,
    pub membership_type: Option<MembershipType>,
    pub membership_expiry: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

impl UpdateMember {
    pub fn apply(self, member: &mut Member) {
        if let Some(name) = self.name {
            member.name = name.trim().to_string();
        }
        if let Some(email) = self.email {
            member.email = email.trim().to_lowercase();
        }
        if self.phone.is_some() {
            member.phone = self.phone;
        }
        if let Some(address) = self.address {
            member.address = address;
        }
        if let Some(kind) = self.membership_type {
            member.membership_type = kind;
        }
        if let Some(expiry) = self.membership_expiry {
            member.membership_expiry = expiry;
        }
        if let Some(active) = self.is_active {
            member.is_active = active;
        }
        if self.notes.is_some() {
            member.notes = self.notes;
        }
    }
}

/// Member query parameters
#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberQuery {
    /// Free text over name, email and member code
    pub q: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub membership_type: Option<MembershipType>,
    pub is_active: Option<bool>,
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}

/// Compact member reference embedded in reports
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberShort {
    pub id: Uuid,
    pub member_code: String,
    pub name: String,
    pub email: String,
}

impl From<&Member> for MemberShort {
    fn from(m: &Member) -> Self {
        Self {
            id: m.id,
            member_code: m.member_code.clone(),
            name: m.name.clone(),
            email: m.email.clone(),
        }
    }
}
