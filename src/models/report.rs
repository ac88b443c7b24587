//! Read-side report shapes (member history, fine report)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use super::{
    loan::{LoanStatus, LoanView, PaymentStatus},
    member::MemberShort,
};

/// Loan counts and fine totals for one member
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total: usize,
    pub active: usize,
    pub overdue: usize,
    pub returned: usize,
    pub lost: usize,
    #[schema(value_type = String)]
    pub total_fines: Decimal,
    #[schema(value_type = String)]
    pub unpaid_fines: Decimal,
}

impl HistorySummary {
    pub fn from_loans(loans: &[LoanView]) -> Self {
        let mut summary = Self {
            total: loans.len(),
            ..Self::default()
        };
        for view in loans {
            let loan = &view.loan;
            match loan.status {
                LoanStatus::Borrowed => summary.active += 1,
                LoanStatus::Overdue => {
                    summary.active += 1;
                    summary.overdue += 1;
                }
                LoanStatus::Returned => summary.returned += 1,
                LoanStatus::Lost => summary.lost += 1,
            }
            summary.total_fines += loan.fine.amount;
            summary.unpaid_fines += loan.fine.outstanding();
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserHistory {
    pub user: MemberShort,
    pub summary: HistorySummary,
    pub loans: Vec<LoanView>,
}

/// Fines of one payment status within the report window
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FineGroup {
    pub payment_status: PaymentStatus,
    pub count: usize,
    #[schema(value_type = String)]
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FineReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub groups: Vec<FineGroup>,
    #[schema(value_type = String)]
    pub total_assessed: Decimal,
    #[schema(value_type = String)]
    pub total_outstanding: Decimal,
}
