//! Velocity governance (spec.md §4.2): wraps [`crate::ratelimit::SlidingWindowLimiter`] with
//! the trust framework's per-tier defaults and the liveness-termination side effect that KYA
//! revocation (`trust::kya::revoke`) requires.

use crate::error::{AgentPayError, Result};
use crate::ids::AgentId;
use crate::ratelimit::{SlidingWindowLimiter, WindowKind, WindowSet};
use std::collections::HashSet;
use std::sync::Mutex;

/// Governs per-agent transaction velocity and tracks agents whose KYA has been revoked —
/// a revoked agent is rejected outright regardless of its rate-limit standing (spec.md §4.2:
/// "the caller must terminate the agent's liveness tracking").
pub struct VelocityGovernor {
    limiter: SlidingWindowLimiter,
    windows: WindowSet,
    terminated: Mutex<HashSet<String>>,
}

impl VelocityGovernor {
    pub fn new() -> Self {
        Self { limiter: SlidingWindowLimiter::new(), windows: WindowSet::velocity_defaults(), terminated: Mutex::new(HashSet::new()) }
    }

    pub fn with_windows(windows: WindowSet) -> Self {
        Self { limiter: SlidingWindowLimiter::new(), windows, terminated: Mutex::new(HashSet::new()) }
    }

    /// Checks and records one transaction attempt for `agent_id`. Returns `Ok(())` if the
    /// attempt is within velocity bounds and the agent is live, or an error identifying the
    /// exceeded window / termination otherwise.
    pub fn check(&self, agent_id: &AgentId, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        if self.terminated.lock().expect("velocity governor mutex poisoned").contains(agent_id.as_str()) {
            return Err(AgentPayError::policy("agent_liveness_terminated", "agent KYA was revoked; liveness tracking terminated"));
        }
        match self.limiter.check_and_record(agent_id.as_str(), &self.windows, now) {
            None => Ok(()),
            Some(window) => Err(AgentPayError::rate_limit(window.reason_code(), format!("velocity limit exceeded: {:?}", window))),
        }
    }

    /// Terminates liveness tracking for `agent_id`; all subsequent `check` calls reject
    /// until the agent is re-onboarded (out of scope here — a fresh `AgentId` is minted).
    pub fn terminate(&self, agent_id: &AgentId) {
        self.terminated.lock().expect("velocity governor mutex poisoned").insert(agent_id.as_str().to_string());
    }

    pub fn is_terminated(&self, agent_id: &AgentId) -> bool {
        self.terminated.lock().expect("velocity governor mutex poisoned").contains(agent_id.as_str())
    }

    pub fn current_counts(&self, agent_id: &AgentId) -> (usize, usize, usize) {
        self.limiter.current_counts(agent_id.as_str())
    }
}

impl Default for VelocityGovernor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn terminated_agent_is_always_rejected() {
        let governor = VelocityGovernor::new();
        let agent = AgentId::new();
        assert!(governor.check(&agent, Utc::now()).is_ok());
        governor.terminate(&agent);
        assert!(governor.check(&agent, Utc::now()).is_err());
    }

    #[test]
    fn exceeding_minute_window_is_rejected() {
        let windows = WindowSet {
            minute: crate::ratelimit::WindowLimit::new(chrono::Duration::minutes(1), 1),
            hour: crate::ratelimit::WindowLimit::new(chrono::Duration::hours(1), 100),
            day: crate::ratelimit::WindowLimit::new(chrono::Duration::days(1), 500),
        };
        let governor = VelocityGovernor::with_windows(windows);
        let agent = AgentId::new();
        let now = Utc::now();
        assert!(governor.check(&agent, now).is_ok());
        assert!(governor.check(&agent, now).is_err());
    }
}
