//! Environment-variable configuration (SPEC_FULL.md §A, §B "Config"). Mirrors the teacher's
//! `IBANK_LEDGER_STORAGE` / `IBANK_LEDGER_DATABASE_URL` / `IBANK_LEDGER_PG_MAX_CONNECTIONS`
//! convention, renamed to the `AGENTPAY_*` prefix. No CLI parsing crate is introduced since
//! this crate exposes no CLI surface (spec.md §1 Out of scope).

use agentpay_core::audit::LedgerStorageConfig;
use std::time::Duration;

/// Everything [`crate::Service::bootstrap`] needs to wire up a running instance.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ledger_storage: LedgerStorageConfig,
    pub allowed_domains: Vec<String>,
    pub anchor: AnchorSettings,
    pub checkout_sweep_interval: Duration,
    pub escrow_sweep_interval: Duration,
    pub drift_sweep_interval: Duration,
    pub manual_review_poll_interval: Duration,
    pub kyc_webhook_secret: Vec<u8>,
    pub kyb_webhook_secret: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AnchorSettings {
    pub interval: Duration,
    pub min_entries_per_anchor: u64,
    pub max_entries_per_anchor: u64,
    pub chain: String,
}

impl Default for AnchorSettings {
    fn default() -> Self {
        Self { interval: Duration::from_secs(300), min_entries_per_anchor: 1, max_entries_per_anchor: 10_000, chain: "base".to_string() }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ledger_storage: LedgerStorageConfig::Memory,
            allowed_domains: Vec::new(),
            anchor: AnchorSettings::default(),
            checkout_sweep_interval: Duration::from_secs(60),
            escrow_sweep_interval: Duration::from_secs(60),
            drift_sweep_interval: Duration::from_secs(900),
            manual_review_poll_interval: Duration::from_secs(30),
            kyc_webhook_secret: b"changeme".to_vec(),
            kyb_webhook_secret: b"changeme".to_vec(),
        }
    }
}

impl Settings {
    /// Reads `AGENTPAY_*` environment variables, falling back to [`Default`] for anything
    /// unset. `AGENTPAY_LEDGER_STORAGE=postgres` requires `AGENTPAY_LEDGER_DATABASE_URL` (or
    /// the bare `DATABASE_URL`), matching the teacher's `resolve_ledger_storage` fallback.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Self::default();

        if let Ok(domains) = std::env::var("AGENTPAY_ALLOWED_DOMAINS") {
            settings.allowed_domains = domains.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }

        let ledger_storage_mode = std::env::var("AGENTPAY_LEDGER_STORAGE").unwrap_or_else(|_| "memory".to_string());
        let database_url = std::env::var("AGENTPAY_LEDGER_DATABASE_URL").ok().or_else(|| std::env::var("DATABASE_URL").ok());
        let max_connections: u32 = std::env::var("AGENTPAY_LEDGER_PG_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        settings.ledger_storage = match ledger_storage_mode.as_str() {
            "memory" => LedgerStorageConfig::Memory,
            "postgres" => {
                let url = database_url.ok_or_else(|| {
                    anyhow::anyhow!("AGENTPAY_LEDGER_STORAGE=postgres requires AGENTPAY_LEDGER_DATABASE_URL or DATABASE_URL")
                })?;
                LedgerStorageConfig::postgres(url, max_connections)
            }
            "auto" => match database_url {
                Some(url) => LedgerStorageConfig::postgres(url, max_connections),
                None => LedgerStorageConfig::Memory,
            },
            other => anyhow::bail!("unknown AGENTPAY_LEDGER_STORAGE value '{}' (expected memory|postgres|auto)", other),
        };

        if let Ok(secs) = env_u64("AGENTPAY_ANCHOR_INTERVAL_SECS") {
            settings.anchor.interval = Duration::from_secs(secs);
        }
        if let Ok(n) = env_u64("AGENTPAY_ANCHOR_MIN_ENTRIES") {
            settings.anchor.min_entries_per_anchor = n;
        }
        if let Ok(n) = env_u64("AGENTPAY_ANCHOR_MAX_ENTRIES") {
            settings.anchor.max_entries_per_anchor = n;
        }
        if let Ok(chain) = std::env::var("AGENTPAY_ANCHOR_CHAIN") {
            settings.anchor.chain = chain;
        }
        if let Ok(secs) = env_u64("AGENTPAY_CHECKOUT_SWEEP_INTERVAL_SECS") {
            settings.checkout_sweep_interval = Duration::from_secs(secs);
        }
        if let Ok(secs) = env_u64("AGENTPAY_ESCROW_SWEEP_INTERVAL_SECS") {
            settings.escrow_sweep_interval = Duration::from_secs(secs);
        }
        if let Ok(secs) = env_u64("AGENTPAY_DRIFT_SWEEP_INTERVAL_SECS") {
            settings.drift_sweep_interval = Duration::from_secs(secs);
        }
        if let Ok(secs) = env_u64("AGENTPAY_MANUAL_REVIEW_POLL_INTERVAL_SECS") {
            settings.manual_review_poll_interval = Duration::from_secs(secs);
        }
        if let Ok(secret) = std::env::var("AGENTPAY_KYC_WEBHOOK_SECRET") {
            settings.kyc_webhook_secret = secret.into_bytes();
        }
        if let Ok(secret) = std::env::var("AGENTPAY_KYB_WEBHOOK_SECRET") {
            settings.kyb_webhook_secret = secret.into_bytes();
        }

        Ok(settings)
    }
}

fn env_u64(name: &str) -> Result<u64, ()> {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_memory_backed() {
        let settings = Settings::default();
        assert_eq!(settings.ledger_storage.label(), "memory");
        assert_eq!(settings.anchor.chain, "base");
    }
}
