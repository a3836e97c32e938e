use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::ids::UserId;

/// A caller on some frontend platform. Created lazily on first admission
/// and never deleted during normal operation. Unique on
/// `(platform, platform_user_id)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub platform: String,
    pub platform_user_id: String,
    pub plan_id: i32,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}
