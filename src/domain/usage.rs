use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::ids::UserId;

/// Running daily token/job totals for a user. Unique on `(user_id,
/// date)`; monotonically non-decreasing within a day.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageDaily {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub tokens_used: Decimal,
    pub jobs_completed: i32,
}

impl UsageDaily {
    pub fn zeroed(user_id: UserId, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            tokens_used: Decimal::ZERO,
            jobs_completed: 0,
        }
    }
}
