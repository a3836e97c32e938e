use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Immutable, seeded pricing/priority tier. Plan `id = 1` is the default
/// "free" plan that new users are assigned to.
#[derive(Debug, Clone, Copy, FromRow, Serialize, Deserialize)]
pub struct Plan {
    pub id: i32,
    pub daily_token_limit: Decimal,
    pub priority: i16,
}

impl Plan {
    pub const FREE_PLAN_ID: i32 = 1;
}
