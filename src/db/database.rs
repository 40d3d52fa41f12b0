use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::models::{
    ChargeKind, GenerationRow, LedgerStats, QuotaCharge, QuotaSnapshot, UserRow,
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("user {0} is not registered")]
    UserNotFound(i64),
    #[error("user {0} has no free or paid generations left")]
    InsufficientQuota(i64),
    #[error("invalid credit amount {0}: must be positive and keep the balance in range")]
    InvalidAmount(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

const USER_COLUMNS: &str =
    "user_id, username, display_name, free_generations, balance, total_generated, registered_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    free_generations: i64,
}

impl Database {
    pub async fn init(database_url: &str, free_generations: i64) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database is a separate database.
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(std::time::Duration::from_secs(1800)) })
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (\
                user_id INTEGER PRIMARY KEY,\
                username TEXT,\
                display_name TEXT,\
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),\
                free_generations INTEGER NOT NULL DEFAULT 3 CHECK (free_generations >= 0),\
                total_generated INTEGER NOT NULL DEFAULT 0,\
                registered_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS generations (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                user_id INTEGER NOT NULL,\
                prompt TEXT NOT NULL,\
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,\
                FOREIGN KEY(user_id) REFERENCES users(user_id)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_generations_user_id ON generations(user_id);")
            .execute(&pool)
            .await?;

        info!("Database tables created successfully");

        Ok(Database {
            pool,
            free_generations: free_generations.max(0),
        })
    }

    pub async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Registers the user on first contact. Returns `true` when a new row was written.
    pub async fn ensure_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        display_name: &str,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            "INSERT INTO users (user_id, username, display_name, free_generations, balance) \
             VALUES (?, ?, ?, ?, 0) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(username)
        .bind(display_name)
        .bind(self.free_generations)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        if created {
            info!(user_id, "Registered new user");
        }
        Ok(created)
    }

    pub async fn get_user(&self, user_id: i64) -> LedgerResult<Option<UserRow>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?");
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn require_user(&self, user_id: i64) -> LedgerResult<UserRow> {
        self.get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    /// Charges one generation, free counter first. Each step is a conditional
    /// update so the check and the decrement cannot be split by another caller.
    pub async fn consume_one(&self, user_id: i64) -> LedgerResult<QuotaCharge> {
        let mut tx = self.pool.begin().await?;

        let free = sqlx::query_as::<_, QuotaSnapshot>(
            "UPDATE users \
             SET free_generations = free_generations - 1, total_generated = total_generated + 1 \
             WHERE user_id = ? AND free_generations > 0 \
             RETURNING free_generations, balance, total_generated",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let charge = match free {
            Some(remaining) => Some(QuotaCharge {
                kind: ChargeKind::Free,
                remaining,
            }),
            None => sqlx::query_as::<_, QuotaSnapshot>(
                "UPDATE users \
                 SET balance = balance - 1, total_generated = total_generated + 1 \
                 WHERE user_id = ? AND balance > 0 \
                 RETURNING free_generations, balance, total_generated",
            )
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|remaining| QuotaCharge {
                kind: ChargeKind::Paid,
                remaining,
            }),
        };

        let Some(charge) = charge else {
            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Err(if exists > 0 {
                LedgerError::InsufficientQuota(user_id)
            } else {
                LedgerError::UserNotFound(user_id)
            });
        };

        tx.commit().await?;
        debug!(
            user_id,
            kind = ?charge.kind,
            free_left = charge.remaining.free_generations,
            paid_left = charge.remaining.balance,
            "Consumed one generation"
        );
        Ok(charge)
    }

    pub async fn credit(&self, user_id: i64, amount: i64) -> LedgerResult<UserRow> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        // SQLite turns an overflowing INTEGER sum into REAL, so the guard lives in the WHERE.
        let query = format!(
            "UPDATE users SET balance = balance + ? \
             WHERE user_id = ? AND balance <= ? RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(amount)
            .bind(user_id)
            .bind(i64::MAX - amount)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return match self.get_user(user_id).await? {
                Some(_) => Err(LedgerError::InvalidAmount(amount)),
                None => Err(LedgerError::UserNotFound(user_id)),
            };
        };

        info!(user_id, amount, balance = row.balance, "Credited paid generations");
        Ok(row)
    }

    pub async fn record_generation(&self, user_id: i64, prompt: &str) -> LedgerResult<i64> {
        let result = sqlx::query("INSERT INTO generations (user_id, prompt) VALUES (?, ?)")
            .bind(user_id)
            .bind(prompt)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn count_generations(&self, user_id: i64) -> LedgerResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM generations WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn recent_generations(
        &self,
        user_id: i64,
        limit: i64,
    ) -> LedgerResult<Vec<GenerationRow>> {
        let rows = sqlx::query_as::<_, GenerationRow>(
            "SELECT id, user_id, prompt, created_at FROM generations \
             WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn ledger_stats(&self) -> LedgerResult<LedgerStats> {
        let stats = sqlx::query_as::<_, LedgerStats>(
            "SELECT COUNT(*) AS total_users, \
             COALESCE(SUM(total_generated), 0) AS total_generated, \
             COALESCE(SUM(balance), 0) AS total_balance \
             FROM users",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
