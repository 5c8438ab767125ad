//! Ledger persistence backend (spec.md §6 "Persisted state layout": audit ledger is an
//! append-only insert). Grounded directly on the teacher's
//! `ibank-core/src/storage.rs::{LedgerStorageConfig, PersistentLedger, PostgresLedgerStore}`
//! split: an in-memory authoritative ledger, optionally mirrored to Postgres, with the
//! entry persisted before it is committed in-memory, and hydrate-and-hash-verify on
//! startup. Generalized from the teacher's commitment/audit/outcome entry kinds to this
//! platform's single `LedgerEntry` shape (spec.md §3).

use super::ledger::{AppendOnlyLedger, LedgerEntry};
use crate::error::{AgentPayError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// Ledger persistence backend configuration (spec.md §1: persistence backends are opaque
/// stores behind repository interfaces; this is the one concrete shape the platform ships
/// out of the box, matching the teacher's env-var driven choice).
#[derive(Debug, Clone)]
pub enum LedgerStorageConfig {
    Memory,
    Postgres { database_url: String, max_connections: u32 },
}

impl LedgerStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres { database_url: database_url.into(), max_connections }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for LedgerStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

enum LedgerStorageBackend {
    Memory,
    Postgres(PostgresLedgerStore),
}

/// Runtime ledger wrapper that keeps the in-memory `AppendOnlyLedger` authoritative while
/// optionally mirroring each append to PostgreSQL. Entries persist before they commit
/// in-memory, so a crash between the two leaves the in-memory chain short rather than the
/// store ahead of it — the next `bootstrap` rehydrates and hash-verifies the full chain.
pub struct PersistentLedger {
    ledger: AppendOnlyLedger,
    backend: LedgerStorageBackend,
}

impl PersistentLedger {
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Result<Self> {
        Ok(Self { ledger: AppendOnlyLedger::from_entries(entries)?, backend: LedgerStorageBackend::Memory })
    }

    pub async fn bootstrap(config: LedgerStorageConfig) -> Result<Self> {
        match config {
            LedgerStorageConfig::Memory => {
                Ok(Self { ledger: AppendOnlyLedger::new(), backend: LedgerStorageBackend::Memory })
            }
            LedgerStorageConfig::Postgres { database_url, max_connections } => {
                let store = PostgresLedgerStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let entries = store.load_entries().await?;
                let ledger = AppendOnlyLedger::from_entries(entries)?;
                Ok(Self { ledger, backend: LedgerStorageBackend::Postgres(store) })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            LedgerStorageBackend::Memory => "memory",
            LedgerStorageBackend::Postgres(_) => "postgres",
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        self.ledger.entries()
    }

    pub fn as_append_only(&self) -> &AppendOnlyLedger {
        &self.ledger
    }

    pub async fn append(
        &mut self,
        entry_type: impl Into<String>,
        actor: impl Into<String>,
        subject: impl Into<String>,
        amount_minor: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<LedgerEntry> {
        let entry = self.ledger.build_entry(entry_type, actor, subject, amount_minor, metadata);
        if let LedgerStorageBackend::Postgres(store) = &self.backend {
            store.insert_entry(&entry).await?;
        }
        self.ledger.commit_built(entry)
    }
}

struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| AgentPayError::service("service_unavailable", format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agentpay_audit_entries (
                ledger_index BIGINT PRIMARY KEY,
                entry_id TEXT NOT NULL UNIQUE,
                entry_type TEXT NOT NULL,
                actor TEXT NOT NULL,
                subject TEXT NOT NULL,
                amount_minor BIGINT NULL,
                metadata JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                prev_hash TEXT NOT NULL,
                entry_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AgentPayError::service("service_unavailable", format!("postgres schema create failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_agentpay_audit_subject ON agentpay_audit_entries (subject)")
            .execute(&self.pool)
            .await
            .map_err(|e| AgentPayError::service("service_unavailable", format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT ledger_index, entry_id, entry_type, actor, subject, amount_minor,
                   metadata, created_at, prev_hash, entry_hash
            FROM agentpay_audit_entries
            ORDER BY ledger_index ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgentPayError::service("service_unavailable", format!("postgres load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let index: i64 = row
                .try_get("ledger_index")
                .map_err(|e| AgentPayError::Internal(format!("postgres decode ledger_index failed: {e}")))?;
            entries.push(LedgerEntry {
                entry_id: row.try_get("entry_id").map_err(|e| AgentPayError::Internal(format!("postgres decode entry_id failed: {e}")))?,
                index: index
                    .try_into()
                    .map_err(|_| AgentPayError::Internal("negative ledger index in storage".to_string()))?,
                entry_type: row
                    .try_get("entry_type")
                    .map_err(|e| AgentPayError::Internal(format!("postgres decode entry_type failed: {e}")))?,
                actor: row.try_get("actor").map_err(|e| AgentPayError::Internal(format!("postgres decode actor failed: {e}")))?,
                subject: row.try_get("subject").map_err(|e| AgentPayError::Internal(format!("postgres decode subject failed: {e}")))?,
                amount_minor: row
                    .try_get("amount_minor")
                    .map_err(|e| AgentPayError::Internal(format!("postgres decode amount_minor failed: {e}")))?,
                metadata: row.try_get("metadata").map_err(|e| AgentPayError::Internal(format!("postgres decode metadata failed: {e}")))?,
                created_at: row
                    .try_get("created_at")
                    .map_err(|e| AgentPayError::Internal(format!("postgres decode created_at failed: {e}")))?,
                prev_hash: row
                    .try_get("prev_hash")
                    .map_err(|e| AgentPayError::Internal(format!("postgres decode prev_hash failed: {e}")))?,
                entry_hash: row
                    .try_get("entry_hash")
                    .map_err(|e| AgentPayError::Internal(format!("postgres decode entry_hash failed: {e}")))?,
            });
        }
        Ok(entries)
    }

    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let index: i64 = entry
            .index
            .try_into()
            .map_err(|_| AgentPayError::Internal("ledger index exceeds postgres BIGINT range".to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO agentpay_audit_entries (
                ledger_index, entry_id, entry_type, actor, subject, amount_minor,
                metadata, created_at, prev_hash, entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(index)
        .bind(&entry.entry_id)
        .bind(&entry.entry_type)
        .bind(&entry.actor)
        .bind(&entry.subject)
        .bind(entry.amount_minor)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AgentPayError::service("service_unavailable", format!("postgres insert failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_round_trips_appends() {
        let mut ledger = PersistentLedger::bootstrap(LedgerStorageConfig::Memory).await.unwrap();
        ledger.append("mandate_accepted", "verifier", "agent_1", Some(5000), serde_json::json!({})).await.unwrap();
        assert_eq!(ledger.backend_label(), "memory");
        assert_eq!(ledger.entries().len(), 1);
        assert!(ledger.as_append_only().verify_chain().is_ok());
    }
}
