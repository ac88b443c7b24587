//! Fine policy: what a member owes when a loan is closed

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    config::{CirculationConfig, FineSchedule},
    models::loan::{whole_days_ceil, BookCondition, Fine, FineReason, LoanRecord},
};

/// Length of each progressive tier, in days
const TIER_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct FinePolicy {
    schedule: FineSchedule,
    daily_rate: Decimal,
    lost_book_fee: Decimal,
    damage_fee: Decimal,
}

impl FinePolicy {
    pub fn new(config: &CirculationConfig) -> Self {
        Self {
            schedule: config.fine_schedule,
            daily_rate: config.daily_fine_rate,
            lost_book_fee: config.lost_book_fee,
            damage_fee: config.damage_fee,
        }
    }

    /// Whole days between due date and `end`, 0 when on time
    pub fn days_overdue(due_date: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        whole_days_ceil(end - due_date).max(0)
    }

    /// Late charge for `days` overdue under the configured schedule
    pub fn late_fee(&self, days: i64) -> Decimal {
        if days <= 0 {
            return Decimal::ZERO;
        }
        let rate = self.daily_rate;
        let fee = match self.schedule {
            FineSchedule::Flat => rate * Decimal::from(days),
            FineSchedule::Progressive => {
                let base = days.min(TIER_DAYS);
                let middle = (days - TIER_DAYS).clamp(0, TIER_DAYS);
                let rest = (days - 2 * TIER_DAYS).max(0);
                rate * Decimal::from(base)
                    + rate * Decimal::new(15, 1) * Decimal::from(middle)
                    + rate * Decimal::TWO * Decimal::from(rest)
            }
        };
        round_money(fee)
    }

    /// Fine assessed when the loan is closed at `end` in `condition`
    pub fn assess(&self, loan: &LoanRecord, condition: BookCondition, end: DateTime<Utc>) -> Fine {
        let late = self.late_fee(Self::days_overdue(loan.due_date, end));

        let (amount, reason) = match condition {
            BookCondition::Lost => (self.lost_book_fee, FineReason::Lost),
            BookCondition::Damaged => (self.damage_fee + late, FineReason::Damaged),
            _ => (late, FineReason::Late),
        };

        Fine::assessed(round_money(amount), Some(reason), end)
    }

    /// Late fine the loan would carry if returned in good condition at `now`.
    /// `None` once the loan is resolved.
    pub fn estimate(&self, loan: &LoanRecord, now: DateTime<Utc>) -> Option<Decimal> {
        if loan.status.is_terminal() {
            return None;
        }
        Some(self.late_fee(Self::days_overdue(loan.due_date, now)))
    }
}

/// Two decimal places, never negative
fn round_money(amount: Decimal) -> Decimal {
    let mut amount = amount.round_dp(2).max(Decimal::ZERO);
    amount.rescale(2);
    amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::loan::{LoanStatus, PaymentStatus};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn policy(schedule: FineSchedule) -> FinePolicy {
        FinePolicy::new(&CirculationConfig {
            fine_schedule: schedule,
            ..CirculationConfig::default()
        })
    }

    fn loan() -> LoanRecord {
        let borrowed = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        LoanRecord::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            borrowed,
            borrowed + Duration::days(14),
            BookCondition::Good,
            None,
        )
    }

    #[test]
    fn test_on_time_return_is_free() {
        let p = policy(FineSchedule::Flat);
        let l = loan();
        let fine = p.assess(&l, BookCondition::Good, l.due_date);
        assert_eq!(fine.amount, Decimal::ZERO);
        assert_eq!(fine.reason, None);
        assert_eq!(fine.payment_status, PaymentStatus::Unpaid);
    }

    #[test]
    fn test_partial_day_counts_as_full_day() {
        let p = policy(FineSchedule::Flat);
        let l = loan();
        let fine = p.assess(&l, BookCondition::Good, l.due_date + Duration::hours(2));
        assert_eq!(fine.amount, Decimal::ONE);
        assert_eq!(fine.reason, Some(FineReason::Late));
    }

    #[test]
    fn test_flat_schedule() {
        let p = policy(FineSchedule::Flat);
        assert_eq!(p.late_fee(3), Decimal::new(300, 2));
        assert_eq!(p.late_fee(20), Decimal::new(2000, 2));
    }

    #[test]
    fn test_progressive_tiers() {
        let p = policy(FineSchedule::Progressive);
        assert_eq!(p.late_fee(5), Decimal::new(500, 2));
        // 7 * 1.00 + 3 * 1.50
        assert_eq!(p.late_fee(10), Decimal::new(1150, 2));
        // 7 * 1.00 + 7 * 1.50 + 6 * 2.00
        assert_eq!(p.late_fee(20), Decimal::new(2950, 2));
    }

    #[test]
    fn test_lost_is_flat_fee_regardless_of_time() {
        let p = policy(FineSchedule::Flat);
        let l = loan();
        for end in [l.borrow_date + Duration::days(1), l.due_date + Duration::days(60)] {
            let fine = p.assess(&l, BookCondition::Lost, end);
            assert_eq!(fine.amount, Decimal::new(5000, 2));
            assert_eq!(fine.reason, Some(FineReason::Lost));
        }
    }

    #[test]
    fn test_damaged_adds_late_fine() {
        let p = policy(FineSchedule::Flat);
        let l = loan();
        let on_time = p.assess(&l, BookCondition::Damaged, l.due_date);
        assert_eq!(on_time.amount, Decimal::new(1000, 2));
        assert_eq!(on_time.reason, Some(FineReason::Damaged));

        let late = p.assess(&l, BookCondition::Damaged, l.due_date + Duration::days(2));
        assert_eq!(late.amount, Decimal::new(1200, 2));
    }

    #[test]
    fn test_estimate() {
        let p = policy(FineSchedule::Flat);
        let mut l = loan();
        assert_eq!(p.estimate(&l, l.borrow_date), Some(Decimal::ZERO));
        assert_eq!(p.estimate(&l, l.due_date + Duration::days(4)), Some(Decimal::new(400, 2)));
        l.status = LoanStatus::Returned;
        assert_eq!(p.estimate(&l, l.due_date + Duration::days(4)), None);
    }
}
