//! Rate/Retry Controller
//!
//! Wraps every provider call with:
//! - a session check (disabled providers are skipped without a call)
//! - a per-call timeout (timeouts count as transient failures)
//! - the retry combinator for transient failures
//! - budget bookkeeping and cool-downs from reported [`RateBudget`]s
//!
//! Failures never escape: the caller gets a [`ControlledResponse`] whose
//! candidate list is empty when the provider contributed nothing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::rate_budget::{BudgetDecision, DisableReason, SessionState};
use super::retry::{cancellable_sleep, with_retry, RetryPolicy};
use crate::config::RetryConfig;
use crate::types::{CandidateResult, ProviderError, ProviderId, ProviderResponse};

/// Final state of one controlled call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// Provider answered "nothing here"
    NotFound,
    /// Transient failures until the attempt ceiling
    Exhausted,
    /// Provider's long-term budget is spent
    LimitReached,
    /// Provider was already disabled for the session
    Skipped,
    /// Non-retryable failure (credentials, malformed response)
    Failed,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::NotFound => "not_found",
            CallOutcome::Exhausted => "exhausted",
            CallOutcome::LimitReached => "limit_reached",
            CallOutcome::Skipped => "skipped",
            CallOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlledResponse {
    pub candidates: Vec<CandidateResult>,
    pub outcome: CallOutcome,
}

impl ControlledResponse {
    fn empty(outcome: CallOutcome) -> Self {
        Self {
            candidates: Vec::new(),
            outcome,
        }
    }
}

/// Error of a single attempt
#[derive(Debug)]
enum AttemptError {
    Provider(ProviderError),
    Disabled,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Provider(err) => write!(f, "{}", err),
            AttemptError::Disabled => f.write_str("provider disabled for session"),
        }
    }
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptError::Provider(ProviderError::Transient(_))
                | AttemptError::Provider(ProviderError::RateLimitExceeded { long_term: false, .. })
        )
    }
}

/// Controller shared by all provider calls of a run
#[derive(Debug, Clone)]
pub struct ProviderController {
    policy: RetryPolicy,
    timeout: Duration,
    cooldown: Duration,
    session: Arc<SessionState>,
    cancel: CancellationToken,
}

impl ProviderController {
    pub fn new(
        policy: RetryPolicy,
        timeout: Duration,
        cooldown: Duration,
        session: Arc<SessionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy,
            timeout,
            cooldown,
            session,
            cancel,
        }
    }

    pub fn from_config(config: &RetryConfig, session: Arc<SessionState>, cancel: CancellationToken) -> Self {
        Self::new(config.policy(), config.timeout(), config.cooldown(), session, cancel)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn is_available(&self, provider: ProviderId) -> bool {
        !self.session.is_disabled(provider).await
    }

    /// Run one provider operation under the session's rate and retry policy
    pub async fn call<F, Fut>(&self, provider: ProviderId, operation_name: &str, operation: F) -> ControlledResponse
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProviderResponse, ProviderError>>,
    {
        if self.session.is_disabled(provider).await {
            debug!(provider = %provider, operation = operation_name, "Provider disabled for session, skipping");
            return ControlledResponse::empty(CallOutcome::Skipped);
        }

        let result = with_retry(
            operation_name,
            &self.policy,
            &self.cancel,
            AttemptError::is_retryable,
            || self.attempt(provider, &operation),
        )
        .await;

        match result {
            Ok(response) => {
                if let Some(budget) = response.budget {
                    self.apply_budget(provider, budget).await;
                }
                debug!(
                    provider = %provider,
                    operation = operation_name,
                    candidates = response.candidates.len(),
                    "Provider call succeeded"
                );
                ControlledResponse {
                    candidates: response.candidates,
                    outcome: CallOutcome::Success,
                }
            }
            Err(AttemptError::Disabled) => ControlledResponse::empty(CallOutcome::Skipped),
            Err(AttemptError::Provider(err)) => self.contain_failure(provider, operation_name, err).await,
        }
    }

    async fn attempt<F, Fut>(&self, provider: ProviderId, operation: &F) -> Result<ProviderResponse, AttemptError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProviderResponse, ProviderError>>,
    {
        // Re-check: a sibling call may have exhausted the budget meanwhile
        if self.session.is_disabled(provider).await {
            return Err(AttemptError::Disabled);
        }

        let result = match tokio::time::timeout(self.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Transient(format!("timed out after {:?}", self.timeout))),
        };

        match result {
            Ok(response) => Ok(response),
            Err(ProviderError::RateLimitExceeded { long_term: false, message }) => {
                info!(
                    provider = %provider,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Short-term rate limit hit, cooling down"
                );
                cancellable_sleep(self.cooldown, &self.cancel).await;
                Err(AttemptError::Provider(ProviderError::RateLimitExceeded {
                    long_term: false,
                    message,
                }))
            }
            Err(err) => Err(AttemptError::Provider(err)),
        }
    }

    async fn apply_budget(&self, provider: ProviderId, budget: crate::types::RateBudget) {
        match self.session.record_budget(provider, budget).await {
            BudgetDecision::Continue => {
                debug!(
                    provider = %provider,
                    short_remaining = budget.short_remaining,
                    long_remaining = budget.long_remaining,
                    "Rate budget"
                );
            }
            BudgetDecision::CoolDown => {
                info!(
                    provider = %provider,
                    long_remaining = budget.long_remaining,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Short-term budget spent, cooling down"
                );
                cancellable_sleep(self.cooldown, &self.cancel).await;
            }
            BudgetDecision::Exhausted => {
                warn!(provider = %provider, "Long-term budget spent, provider disabled for this run");
            }
        }
    }

    async fn contain_failure(&self, provider: ProviderId, operation_name: &str, err: ProviderError) -> ControlledResponse {
        match err {
            ProviderError::NotFound => {
                debug!(provider = %provider, operation = operation_name, "No result");
                ControlledResponse::empty(CallOutcome::NotFound)
            }
            ProviderError::Transient(message) => {
                warn!(provider = %provider, operation = operation_name, error = %message, "Provider gave no contribution after retries");
                ControlledResponse::empty(CallOutcome::Exhausted)
            }
            ProviderError::RateLimitExceeded { long_term: true, message } => {
                if self.session.disable(provider, DisableReason::BudgetExhausted).await {
                    warn!(provider = %provider, error = %message, "Rate limit exceeded, provider disabled for this run");
                }
                ControlledResponse::empty(CallOutcome::LimitReached)
            }
            ProviderError::RateLimitExceeded { long_term: false, message } => {
                warn!(provider = %provider, operation = operation_name, error = %message, "Rate limited until retries ran out");
                ControlledResponse::empty(CallOutcome::Exhausted)
            }
            ProviderError::Unauthorized(message) => {
                if self.session.disable(provider, DisableReason::Unauthorized).await {
                    warn!(provider = %provider, error = %message, "Credentials rejected, provider disabled for this run");
                }
                ControlledResponse::empty(CallOutcome::Failed)
            }
            ProviderError::Parse(message) => {
                warn!(provider = %provider, operation = operation_name, error = %message, "Unexpected provider response");
                ControlledResponse::empty(CallOutcome::Failed)
            }
        }
    }
}
