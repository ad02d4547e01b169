//! Session-wide provider state
//!
//! Tracks the last reported [`RateBudget`] of each provider and whether the
//! provider has been disabled for the rest of the run. A single async mutex
//! guards the whole map: a sibling call that flips a provider to disabled is
//! visible to every call that checks afterwards.

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::types::{ProviderId, RateBudget};

/// What to do after a provider reports its remaining budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Continue,
    /// Short window spent, long window not: sleep, then continue
    CoolDown,
    /// Long window spent: no more calls this session
    Exhausted,
}

impl BudgetDecision {
    pub fn evaluate(budget: &RateBudget) -> Self {
        if budget.long_remaining == 0 {
            BudgetDecision::Exhausted
        } else if budget.short_remaining == 0 {
            BudgetDecision::CoolDown
        } else {
            BudgetDecision::Continue
        }
    }
}

/// Why a provider stopped being called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    BudgetExhausted,
    Unauthorized,
}

#[derive(Debug, Default)]
struct ProviderSession {
    budget: Option<RateBudget>,
    disabled: Option<DisableReason>,
}

/// Per-run provider state shared by all calls of a run
#[derive(Debug, Default)]
pub struct SessionState {
    providers: Mutex<HashMap<ProviderId, ProviderSession>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_disabled(&self, provider: ProviderId) -> bool {
        let providers = self.providers.lock().await;
        providers.get(&provider).and_then(|s| s.disabled).is_some()
    }

    pub async fn disabled_reason(&self, provider: ProviderId) -> Option<DisableReason> {
        let providers = self.providers.lock().await;
        providers.get(&provider).and_then(|s| s.disabled)
    }

    /// Mark a provider disabled; returns `true` if it was enabled before
    pub async fn disable(&self, provider: ProviderId, reason: DisableReason) -> bool {
        let mut providers = self.providers.lock().await;
        let session = providers.entry(provider).or_default();
        let newly = session.disabled.is_none();
        if newly {
            session.disabled = Some(reason);
        }
        newly
    }

    /// Store reported budget and apply the session transition
    pub async fn record_budget(&self, provider: ProviderId, budget: RateBudget) -> BudgetDecision {
        let decision = BudgetDecision::evaluate(&budget);

        let mut providers = self.providers.lock().await;
        let session = providers.entry(provider).or_default();
        session.budget = Some(budget);
        if decision == BudgetDecision::Exhausted && session.disabled.is_none() {
            session.disabled = Some(DisableReason::BudgetExhausted);
        }

        decision
    }

    pub async fn budget(&self, provider: ProviderId) -> Option<RateBudget> {
        let providers = self.providers.lock().await;
        providers.get(&provider).and_then(|s| s.budget)
    }
}
