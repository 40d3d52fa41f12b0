use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub free_generations: i64,
    pub balance: i64,
    pub total_generated: i64,
    pub registered_at: NaiveDateTime,
}

impl UserRow {
    pub fn has_remaining(&self) -> bool {
        self.free_generations > 0 || self.balance > 0
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GenerationRow {
    pub id: i64,
    pub user_id: i64,
    pub prompt: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeKind {
    Free,
    Paid,
}

impl ChargeKind {
    pub fn label(self) -> &'static str {
        match self {
            ChargeKind::Free => "🆓 бесплатная",
            ChargeKind::Paid => "💰 платная",
        }
    }
}

/// Counters left on the user record after a successful `consume_one`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct QuotaSnapshot {
    pub free_generations: i64,
    pub balance: i64,
    pub total_generated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCharge {
    pub kind: ChargeKind,
    pub remaining: QuotaSnapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct LedgerStats {
    pub total_users: i64,
    pub total_generated: i64,
    pub total_balance: i64,
}
