//! Periodic budget cycles and per-agent allocation strategies (spec.md §4.9),
//! grounded on `original_source/.../budget_allocator.py`. Amounts are minor units (i64)
//! throughout, matching [`crate::money`], rather than the original's `Decimal`.

use crate::error::{AgentPayError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    Fixed,
    Proportional,
    PerformanceBased,
    Rollover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Weekly,
    Monthly,
    Quarterly,
}

impl BudgetPeriod {
    fn duration(&self) -> Duration {
        match self {
            BudgetPeriod::Weekly => Duration::days(7),
            BudgetPeriod::Monthly => Duration::days(30),
            BudgetPeriod::Quarterly => Duration::days(90),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Active,
    Closed,
}

/// Per-agent configuration consumed by an allocation strategy. Not every field is used by
/// every strategy: `fixed_amount_minor` is FIXED-only, `weight` PROPORTIONAL-only.
#[derive(Debug, Clone, Default)]
pub struct AgentAllocationConfig {
    pub agent_id: String,
    pub fixed_amount_minor: Option<i64>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentPerformanceRecord {
    pub agent_id: String,
    pub spent_minor: i64,
    pub value_generated_minor: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AgentSpendRecord {
    pub agent_id: String,
    pub allocated_minor: i64,
    pub spent_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub id: String,
    pub agent_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub period: BudgetPeriod,
    pub strategy: AllocationStrategy,
    pub allocated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cycle_id: String,
    pub adjustments: Vec<AllocationAdjustment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationAdjustment {
    pub timestamp: DateTime<Utc>,
    pub old_amount_minor: i64,
    pub new_amount_minor: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCycle {
    pub id: String,
    pub org_id: String,
    pub period: BudgetPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_budget_minor: i64,
    pub currency: String,
    pub strategy: AllocationStrategy,
    pub allocations: Vec<BudgetAllocation>,
    pub status: CycleStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub rollover_from: Option<String>,
    pub rollover_amount_minor: i64,
    pub unspent_total_minor: Option<i64>,
}

impl BudgetCycle {
    pub fn allocated_total_minor(&self) -> i64 {
        self.allocations.iter().map(|a| a.amount_minor).sum()
    }

    pub fn unallocated_minor(&self) -> i64 {
        self.total_budget_minor - self.allocated_total_minor()
    }

    pub fn is_active(&self) -> bool {
        self.status == CycleStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }
}

/// FIXED: predefined per-agent amounts, remainder split equally among the rest.
fn allocate_fixed(total_budget_minor: i64, agents: &[AgentAllocationConfig]) -> Result<Vec<(String, i64)>> {
    if agents.is_empty() {
        return Ok(Vec::new());
    }
    let mut allocations = Vec::new();
    let mut predefined_total = 0i64;
    let mut without_fixed = Vec::new();
    for agent in agents {
        if let Some(amount) = agent.fixed_amount_minor {
            allocations.push((agent.agent_id.clone(), amount));
            predefined_total += amount;
        } else {
            without_fixed.push(agent);
        }
    }
    if without_fixed.is_empty() {
        if predefined_total > total_budget_minor {
            return Err(AgentPayError::validation("budget_predefined_exceeds_total", "predefined fixed amounts exceed total budget"));
        }
        return Ok(allocations);
    }
    let remaining = total_budget_minor - predefined_total;
    if remaining < 0 {
        return Err(AgentPayError::validation("budget_predefined_exceeds_total", "predefined fixed amounts exceed total budget"));
    }
    let share = remaining / without_fixed.len() as i64;
    let mut remainder = remaining - share * without_fixed.len() as i64;
    for agent in without_fixed {
        let mut amount = share;
        if remainder > 0 {
            amount += 1;
            remainder -= 1;
        }
        allocations.push((agent.agent_id.clone(), amount));
    }
    Ok(allocations)
}

/// PROPORTIONAL: weighted split, weights normalized to sum to the total budget.
fn allocate_proportional(total_budget_minor: i64, agents: &[AgentAllocationConfig]) -> Result<Vec<(String, i64)>> {
    if agents.is_empty() {
        return Ok(Vec::new());
    }
    for agent in agents {
        if agent.weight.is_none() {
            return Err(AgentPayError::validation("budget_missing_weight", format!("agent '{}' missing required weight", agent.agent_id)));
        }
    }
    let total_weight: f64 = agents.iter().map(|a| a.weight.unwrap_or(0.0)).sum();
    if total_weight <= 0.0 {
        return Err(AgentPayError::validation("budget_non_positive_weight", "total weight must be positive"));
    }
    Ok(agents
        .iter()
        .map(|agent| {
            let proportion = agent.weight.unwrap_or(0.0) / total_weight;
            (agent.agent_id.clone(), (total_budget_minor as f64 * proportion).round() as i64)
        })
        .collect())
}

/// PERFORMANCE_BASED: ROI-weighted allocation with a per-agent floor (default 5% of
/// total), falling back to an equal split when no history or no positive ROI exists.
fn allocate_performance_based(total_budget_minor: i64, agents: &[AgentAllocationConfig], history: &[AgentPerformanceRecord], min_allocation_pct: f64) -> Vec<(String, i64)> {
    if agents.is_empty() {
        return Vec::new();
    }
    if history.is_empty() {
        let share = total_budget_minor / agents.len() as i64;
        return agents.iter().map(|a| (a.agent_id.clone(), share)).collect();
    }

    let mut performance: HashMap<String, f64> = HashMap::new();
    for record in history {
        let roi = if record.spent_minor > 0 { record.value_generated_minor as f64 / record.spent_minor as f64 } else { 0.0 };
        performance
            .entry(record.agent_id.clone())
            .and_modify(|existing| *existing = (*existing + roi) / 2.0)
            .or_insert(roi);
    }

    let total_roi: f64 = performance.values().sum();
    if total_roi <= 0.0 {
        let share = total_budget_minor / agents.len() as i64;
        return agents.iter().map(|a| (a.agent_id.clone(), share)).collect();
    }

    let min_amount = (total_budget_minor as f64 * min_allocation_pct).round() as i64;
    let mut allocations: Vec<(String, i64)> = agents
        .iter()
        .map(|agent| {
            let amount = match performance.get(&agent.agent_id) {
                Some(roi) => {
                    let proportion = roi / total_roi;
                    ((total_budget_minor as f64 * proportion).round() as i64).max(min_amount)
                }
                None => min_amount,
            };
            (agent.agent_id.clone(), amount)
        })
        .collect();

    let allocated_total: i64 = allocations.iter().map(|(_, a)| a).sum();
    if allocated_total > total_budget_minor && allocated_total > 0 {
        let scale = total_budget_minor as f64 / allocated_total as f64;
        for (_, amount) in allocations.iter_mut() {
            *amount = (*amount as f64 * scale).round() as i64;
        }
    }
    allocations
}

/// ROLLOVER: unused budget from `history` carries forward capped at `rollover_cap_pct` of
/// the agent's prior allocation; the remaining fresh budget splits equally.
fn allocate_rollover(total_budget_minor: i64, agents: &[AgentAllocationConfig], history: &[AgentSpendRecord], rollover_cap_pct: f64) -> Result<Vec<(String, i64)>> {
    if agents.is_empty() {
        return Ok(Vec::new());
    }
    let mut rollover: HashMap<String, i64> = HashMap::new();
    for record in history {
        let unused = record.allocated_minor - record.spent_minor;
        if unused > 0 {
            let max_rollover = (record.allocated_minor as f64 * rollover_cap_pct).round() as i64;
            rollover.insert(record.agent_id.clone(), unused.min(max_rollover));
        }
    }
    let total_rollover: i64 = rollover.values().sum();
    let fresh_budget = total_budget_minor - total_rollover;
    if fresh_budget < 0 {
        return Err(AgentPayError::validation("budget_rollover_exceeds_total", "rollover amount exceeds total budget"));
    }
    let base_share = fresh_budget / agents.len() as i64;
    Ok(agents.iter().map(|agent| (agent.agent_id.clone(), base_share + rollover.get(&agent.agent_id).copied().unwrap_or(0))).collect())
}

#[derive(Default)]
struct Cycles {
    by_id: HashMap<String, BudgetCycle>,
}

/// Orchestrates cycle creation, closing, and per-agent adjustments; enforces spec.md §8
/// Testable Property 6: `Σallocations.amount ≤ total_budget + rollover`.
#[derive(Default)]
pub struct BudgetAllocator {
    cycles: RwLock<Cycles>,
    performance_min_allocation_pct: f64,
    rollover_cap_pct: f64,
}

impl BudgetAllocator {
    pub fn new() -> Self {
        Self { cycles: RwLock::new(Cycles::default()), performance_min_allocation_pct: 0.05, rollover_cap_pct: 0.25 }
    }

    pub fn create_cycle(
        &self,
        org_id: impl Into<String>,
        period: BudgetPeriod,
        total_budget_minor: i64,
        currency: impl Into<String>,
        strategy: AllocationStrategy,
        agents: &[AgentAllocationConfig],
        performance_history: &[AgentPerformanceRecord],
        rollover_history: &[AgentSpendRecord],
        rollover_from: Option<String>,
        rollover_amount_minor: i64,
        start_date: Option<DateTime<Utc>>,
    ) -> Result<BudgetCycle> {
        let currency = currency.into();
        let start = start_date.unwrap_or_else(Utc::now);
        let end = start + period.duration();

        let raw_allocations = match strategy {
            AllocationStrategy::Fixed => allocate_fixed(total_budget_minor, agents)?,
            AllocationStrategy::Proportional => allocate_proportional(total_budget_minor, agents)?,
            AllocationStrategy::PerformanceBased => allocate_performance_based(total_budget_minor, agents, performance_history, self.performance_min_allocation_pct),
            AllocationStrategy::Rollover => allocate_rollover(total_budget_minor, agents, rollover_history, self.rollover_cap_pct)?,
        };

        let allocated_total: i64 = raw_allocations.iter().map(|(_, a)| a).sum();
        if allocated_total > total_budget_minor + rollover_amount_minor {
            return Err(AgentPayError::validation(
                "budget_allocation_exceeds_cap",
                format!("allocated total {} exceeds budget+rollover cap {}", allocated_total, total_budget_minor + rollover_amount_minor),
            ));
        }

        let cycle_id = format!("cycle_{}", Ulid::new());
        let allocations = raw_allocations
            .into_iter()
            .map(|(agent_id, amount_minor)| BudgetAllocation {
                id: format!("alloc_{}", Ulid::new()),
                agent_id,
                amount_minor,
                currency: currency.clone(),
                period,
                strategy,
                allocated_at: Utc::now(),
                expires_at: end,
                cycle_id: cycle_id.clone(),
                adjustments: Vec::new(),
            })
            .collect();

        let cycle = BudgetCycle {
            id: cycle_id.clone(),
            org_id: org_id.into(),
            period,
            start_date: start,
            end_date: end,
            total_budget_minor,
            currency,
            strategy,
            allocations,
            status: CycleStatus::Active,
            created_at: Utc::now(),
            closed_at: None,
            rollover_from,
            rollover_amount_minor,
            unspent_total_minor: None,
        };

        let mut guard = self.cycles.write().expect("budget allocator lock poisoned");
        guard.by_id.insert(cycle_id, cycle.clone());
        Ok(cycle)
    }

    pub fn get_cycle(&self, cycle_id: &str) -> Option<BudgetCycle> {
        let guard = self.cycles.read().expect("budget allocator lock poisoned");
        guard.by_id.get(cycle_id).cloned()
    }

    pub fn get_current_cycle(&self, org_id: &str) -> Option<BudgetCycle> {
        let guard = self.cycles.read().expect("budget allocator lock poisoned");
        let now = Utc::now();
        guard.by_id.values().find(|c| c.org_id == org_id && c.is_active() && c.start_date <= now && now <= c.end_date).cloned()
    }

    pub fn get_agent_budget(&self, agent_id: &str, cycle_id: &str) -> Option<BudgetAllocation> {
        let guard = self.cycles.read().expect("budget allocator lock poisoned");
        guard.by_id.get(cycle_id)?.allocations.iter().find(|a| a.agent_id == agent_id).cloned()
    }

    pub fn close_cycle(&self, cycle_id: &str, spending: &[AgentSpendRecord]) -> Result<BudgetCycle> {
        let mut guard = self.cycles.write().expect("budget allocator lock poisoned");
        let cycle = guard.by_id.get_mut(cycle_id).ok_or_else(|| AgentPayError::not_found("budget_cycle_not_found", format!("cycle '{}' not found", cycle_id)))?;
        if cycle.status == CycleStatus::Closed {
            return Err(AgentPayError::state("budget_cycle_already_closed", "budget cycle is already closed"));
        }
        let spent_by_agent: HashMap<&str, i64> = spending.iter().map(|s| (s.agent_id.as_str(), s.spent_minor)).collect();
        let unspent_total: i64 = cycle
            .allocations
            .iter()
            .map(|a| {
                let spent = spent_by_agent.get(a.agent_id.as_str()).copied().unwrap_or(0);
                (a.amount_minor - spent).max(0)
            })
            .sum();
        cycle.status = CycleStatus::Closed;
        cycle.closed_at = Some(Utc::now());
        cycle.unspent_total_minor = Some(unspent_total);
        Ok(cycle.clone())
    }

    pub fn adjust_allocation(&self, cycle_id: &str, agent_id: &str, new_amount_minor: i64, reason: impl Into<String>) -> Result<BudgetAllocation> {
        let mut guard = self.cycles.write().expect("budget allocator lock poisoned");
        let cycle = guard.by_id.get_mut(cycle_id).ok_or_else(|| AgentPayError::not_found("budget_cycle_not_found", format!("cycle '{}' not found", cycle_id)))?;
        if cycle.status != CycleStatus::Active {
            return Err(AgentPayError::state("budget_cycle_not_active", "cannot adjust allocation in a non-active cycle"));
        }
        let allocation = cycle
            .allocations
            .iter_mut()
            .find(|a| a.agent_id == agent_id)
            .ok_or_else(|| AgentPayError::not_found("budget_allocation_not_found", format!("no allocation for agent '{}' in cycle '{}'", agent_id, cycle_id)))?;
        let old_amount = allocation.amount_minor;
        allocation.amount_minor = new_amount_minor;
        allocation.adjustments.push(AllocationAdjustment { timestamp: Utc::now(), old_amount_minor: old_amount, new_amount_minor, reason: reason.into() });
        Ok(allocation.clone())
    }

    pub fn get_budget_utilization(&self, agent_id: &str, cycle_id: &str, spent_minor: i64) -> Result<BudgetUtilization> {
        let allocation = self
            .get_agent_budget(agent_id, cycle_id)
            .ok_or_else(|| AgentPayError::not_found("budget_allocation_not_found", format!("no allocation for agent '{}' in cycle '{}'", agent_id, cycle_id)))?;
        let remaining = allocation.amount_minor - spent_minor;
        let utilization_pct = if allocation.amount_minor > 0 { (spent_minor as f64 / allocation.amount_minor as f64) * 100.0 } else { 0.0 };
        Ok(BudgetUtilization { agent_id: agent_id.to_string(), cycle_id: cycle_id.to_string(), allocated_minor: allocation.amount_minor, spent_minor, remaining_minor: remaining, utilization_pct })
    }

    /// Closes the current active cycle and opens a new one whose total is
    /// `new_total_budget_minor + unspent_total` (spec.md §4.9).
    pub fn auto_rollover(&self, org_id: &str, new_total_budget_minor: i64, currency: &str, agents: &[AgentAllocationConfig], spending: &[AgentSpendRecord]) -> Result<BudgetCycle> {
        let current = self.get_current_cycle(org_id).ok_or_else(|| AgentPayError::not_found("budget_cycle_not_found", format!("no active cycle for org '{}'", org_id)))?;
        let closed = self.close_cycle(&current.id, spending)?;
        let unspent_total = closed.unspent_total_minor.unwrap_or(0);

        let rollover_history: Vec<AgentSpendRecord> = closed
            .allocations
            .iter()
            .map(|a| {
                let spent = spending.iter().find(|s| s.agent_id == a.agent_id).map(|s| s.spent_minor).unwrap_or(0);
                AgentSpendRecord { agent_id: a.agent_id.clone(), allocated_minor: a.amount_minor, spent_minor: spent }
            })
            .collect();

        self.create_cycle(
            org_id,
            closed.period,
            new_total_budget_minor + unspent_total,
            currency,
            AllocationStrategy::Rollover,
            agents,
            &[],
            &rollover_history,
            Some(closed.id.clone()),
            unspent_total,
            None,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetUtilization {
    pub agent_id: String,
    pub cycle_id: String,
    pub allocated_minor: i64,
    pub spent_minor: i64,
    pub remaining_minor: i64,
    pub utilization_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents(ids: &[&str]) -> Vec<AgentAllocationConfig> {
        ids.iter().map(|id| AgentAllocationConfig { agent_id: id.to_string(), ..Default::default() }).collect()
    }

    #[test]
    fn fixed_strategy_splits_remainder_equally() {
        let allocator = BudgetAllocator::new();
        let cycle = allocator
            .create_cycle("org_1", BudgetPeriod::Monthly, 1000, "USD", AllocationStrategy::Fixed, &agents(&["a", "b"]), &[], &[], None, 0, None)
            .unwrap();
        assert_eq!(cycle.allocated_total_minor(), 1000);
        assert_eq!(cycle.allocations.len(), 2);
    }

    #[test]
    fn proportional_strategy_requires_weights() {
        let allocator = BudgetAllocator::new();
        let result = allocator.create_cycle("org_1", BudgetPeriod::Monthly, 1000, "USD", AllocationStrategy::Proportional, &agents(&["a", "b"]), &[], &[], None, 0, None);
        assert!(result.is_err());
    }

    #[test]
    fn allocation_never_exceeds_budget_plus_rollover() {
        let allocator = BudgetAllocator::new();
        let mut configured = agents(&["a", "b"]);
        configured[0].fixed_amount_minor = Some(2000);
        let result = allocator.create_cycle("org_1", BudgetPeriod::Monthly, 1000, "USD", AllocationStrategy::Fixed, &configured, &[], &[], None, 0, None);
        assert!(result.is_err());
    }

    #[test]
    fn close_cycle_computes_unspent_total() {
        let allocator = BudgetAllocator::new();
        let cycle = allocator.create_cycle("org_1", BudgetPeriod::Weekly, 1000, "USD", AllocationStrategy::Fixed, &agents(&["a", "b"]), &[], &[], None, 0, None).unwrap();
        let spending = vec![AgentSpendRecord { agent_id: "a".to_string(), allocated_minor: 500, spent_minor: 200 }];
        let closed = allocator.close_cycle(&cycle.id, &spending).unwrap();
        assert_eq!(closed.unspent_total_minor, Some(300 + 500));
    }

    #[test]
    fn auto_rollover_adds_unspent_to_new_total() {
        let allocator = BudgetAllocator::new();
        allocator.create_cycle("org_1", BudgetPeriod::Weekly, 1000, "USD", AllocationStrategy::Fixed, &agents(&["a", "b"]), &[], &[], None, 0, None).unwrap();
        let spending = vec![
            AgentSpendRecord { agent_id: "a".to_string(), allocated_minor: 500, spent_minor: 100 },
            AgentSpendRecord { agent_id: "b".to_string(), allocated_minor: 500, spent_minor: 500 },
        ];
        let new_cycle = allocator.auto_rollover("org_1", 1000, "USD", &agents(&["a", "b"]), &spending).unwrap();
        assert_eq!(new_cycle.total_budget_minor, 1000 + 400);
    }
}
