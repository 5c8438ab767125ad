//! Declarative policy engine (spec.md §4.3): priority-ordered `Policy`/`Rule` evaluation
//! over a transaction, escalating through an allow/flag/require-approval/deny ladder.
//!
//! Grounded on the teacher's `aas-policy::PolicyEngine` shape (priority-sorted,
//! `RwLock`-guarded policy list, escalation-ladder `evaluate()`); the rule conditions
//! themselves reuse [`crate::plugin`]'s built-in rule evaluators so the same time
//! restriction / amount bound / merchant blocklist / velocity limit semantics apply whether
//! a rule is attached to a named `Policy` here or wrapped in a `CustomPolicyPlugin`.

use crate::plugin::{
    evaluate_amount_limit, evaluate_merchant_blocklist, evaluate_time_restriction, evaluate_velocity_limit, BuiltinRule, Transaction,
};
use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// What happens to the overall evaluation when a rule's condition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Deny,
    RequireApproval,
    Flag,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub condition: BuiltinRule,
    pub action_on_fail: RuleAction,
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub id: String,
    pub name: String,
    /// Lower values evaluate first; a `Deny` at any priority short-circuits the ladder.
    pub priority: i32,
    pub enabled: bool,
    pub rules: Vec<Rule>,
}

impl Policy {
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self { id: id.into(), name: name.into(), priority, enabled: true, rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Inputs to one evaluation pass. `history` feeds velocity-limit rules only.
pub struct EvaluationContext<'a> {
    pub transaction: &'a Transaction,
    pub history: &'a [Transaction],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TriggeredRule {
    pub policy_id: String,
    pub rule_id: String,
    pub action: RuleAction,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PolicyEvaluation {
    pub allowed: bool,
    pub requires_approval: bool,
    pub triggered: Vec<TriggeredRule>,
}

/// Priority-ordered policy set (spec.md §4.3). Registry-style mutations (`add_policy`,
/// `set_enabled`) take the write lock; `evaluate` takes only the read lock so concurrent
/// requests never block each other absent a concurrent mutation.
#[derive(Default)]
pub struct PolicyEngine {
    policies: RwLock<Vec<Policy>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_policy(&self, policy: Policy) {
        let mut guard = self.policies.write().expect("policy engine mutex poisoned");
        guard.push(policy);
        guard.sort_by_key(|p| p.priority);
    }

    pub fn remove_policy(&self, id: &str) -> bool {
        let mut guard = self.policies.write().expect("policy engine mutex poisoned");
        let before = guard.len();
        guard.retain(|p| p.id != id);
        guard.len() != before
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut guard = self.policies.write().expect("policy engine mutex poisoned");
        match guard.iter_mut().find(|p| p.id == id) {
            Some(policy) => {
                policy.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.policies.read().expect("policy engine mutex poisoned").clone()
    }

    /// Evaluates every enabled policy's rules in priority order. A `Deny` trigger
    /// short-circuits the remaining ladder; `RequireApproval` and `Flag` accumulate and
    /// evaluation continues through lower-priority policies.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> PolicyEvaluation {
        let guard = self.policies.read().expect("policy engine mutex poisoned");
        let mut triggered = Vec::new();
        let mut requires_approval = false;

        for policy in guard.iter().filter(|p| p.enabled) {
            for rule in &policy.rules {
                let decision = match &rule.condition {
                    BuiltinRule::TimeRestriction(r) => evaluate_time_restriction(r, ctx.now),
                    BuiltinRule::AmountLimit(r) => evaluate_amount_limit(r, ctx.transaction),
                    BuiltinRule::MerchantBlocklist(r) => evaluate_merchant_blocklist(r, ctx.transaction),
                    BuiltinRule::VelocityLimit(r) => evaluate_velocity_limit(r, ctx.transaction, ctx.history),
                };
                if decision.approved {
                    continue;
                }
                triggered.push(TriggeredRule {
                    policy_id: policy.id.clone(),
                    rule_id: rule.id.clone(),
                    action: rule.action_on_fail,
                    reason: decision.reason,
                });
                match rule.action_on_fail {
                    RuleAction::Deny => {
                        return PolicyEvaluation { allowed: false, requires_approval: false, triggered };
                    }
                    RuleAction::RequireApproval => requires_approval = true,
                    RuleAction::Flag => {}
                }
            }
        }

        PolicyEvaluation { allowed: true, requires_approval, triggered }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::AmountLimitRule;

    fn tx(amount_minor: i64) -> Transaction {
        Transaction {
            amount_minor,
            currency: "USD".into(),
            merchant: "acme".into(),
            merchant_name: "Acme".into(),
            merchant_category: "retail".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn deny_short_circuits_remaining_policies() {
        let engine = PolicyEngine::new();
        engine.add_policy(Policy::new("p1", "amount cap", 0).with_rule(Rule {
            id: "r1".into(),
            description: "max 1000".into(),
            condition: BuiltinRule::AmountLimit(AmountLimitRule { max_amount_minor: Some(1_000), min_amount_minor: None, currency: None }),
            action_on_fail: RuleAction::Deny,
        }));
        engine.add_policy(Policy::new("p2", "flag large", 10).with_rule(Rule {
            id: "r2".into(),
            description: "flag over 500".into(),
            condition: BuiltinRule::AmountLimit(AmountLimitRule { max_amount_minor: Some(500), min_amount_minor: None, currency: None }),
            action_on_fail: RuleAction::Flag,
        }));

        let history = Vec::new();
        let transaction = tx(5_000);
        let ctx = EvaluationContext { transaction: &transaction, history: &history, now: Utc::now() };
        let evaluation = engine.evaluate(&ctx);

        assert!(!evaluation.allowed);
        assert_eq!(evaluation.triggered.len(), 1);
        assert_eq!(evaluation.triggered[0].policy_id, "p1");
    }

    #[test]
    fn require_approval_does_not_block_but_is_recorded() {
        let engine = PolicyEngine::new();
        engine.add_policy(Policy::new("p1", "escalate large", 0).with_rule(Rule {
            id: "r1".into(),
            description: "escalate over 100".into(),
            condition: BuiltinRule::AmountLimit(AmountLimitRule { max_amount_minor: Some(100), min_amount_minor: None, currency: None }),
            action_on_fail: RuleAction::RequireApproval,
        }));

        let history = Vec::new();
        let transaction = tx(200);
        let ctx = EvaluationContext { transaction: &transaction, history: &history, now: Utc::now() };
        let evaluation = engine.evaluate(&ctx);

        assert!(evaluation.allowed);
        assert!(evaluation.requires_approval);
    }

    #[test]
    fn disabled_policy_is_skipped() {
        let engine = PolicyEngine::new();
        engine.add_policy(Policy::new("p1", "blocked merchant", 0).with_rule(Rule {
            id: "r1".into(),
            description: "block acme".into(),
            condition: BuiltinRule::MerchantBlocklist(crate::plugin::MerchantBlocklistRule {
                blocked_merchants: vec!["acme".into()],
                blocked_categories: vec![],
            }),
            action_on_fail: RuleAction::Deny,
        }));
        engine.set_enabled("p1", false);

        let history = Vec::new();
        let transaction = tx(100);
        let ctx = EvaluationContext { transaction: &transaction, history: &history, now: Utc::now() };
        let evaluation = engine.evaluate(&ctx);
        assert!(evaluation.allowed);
    }

    #[test]
    fn policies_evaluate_in_priority_order() {
        let engine = PolicyEngine::new();
        engine.add_policy(Policy::new("low", "low priority deny", 100).with_rule(Rule {
            id: "r1".into(),
            description: "never passes".into(),
            condition: BuiltinRule::AmountLimit(AmountLimitRule { max_amount_minor: Some(0), min_amount_minor: None, currency: None }),
            action_on_fail: RuleAction::Deny,
        }));
        engine.add_policy(Policy::new("high", "high priority deny", 0).with_rule(Rule {
            id: "r1".into(),
            description: "never passes".into(),
            condition: BuiltinRule::AmountLimit(AmountLimitRule { max_amount_minor: Some(0), min_amount_minor: None, currency: None }),
            action_on_fail: RuleAction::Deny,
        }));

        let history = Vec::new();
        let transaction = tx(10);
        let ctx = EvaluationContext { transaction: &transaction, history: &history, now: Utc::now() };
        let evaluation = engine.evaluate(&ctx);
        assert_eq!(evaluation.triggered[0].policy_id, "high");
    }
}
