use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::AppError;
use crate::models::Business;
use crate::storage::CallStorage;

/// Gate consulted before a call row is written.
#[async_trait]
pub trait QuotaChecker: Send + Sync {
    /// `Err(AppError::QuotaExceeded)` rejects the call before anything is stored.
    async fn check_call_quota(&self, business: &Business) -> Result<(), AppError>;
}

/// Caps the number of calls stored for businesses on a trial plan.
pub struct TrialQuotaChecker {
    calls: Arc<dyn CallStorage>,
    limit: i64,
}

impl TrialQuotaChecker {
    pub fn new(calls: Arc<dyn CallStorage>, limit: i64) -> Self {
        Self { calls, limit }
    }
}

#[async_trait]
impl QuotaChecker for TrialQuotaChecker {
    async fn check_call_quota(&self, business: &Business) -> Result<(), AppError> {
        if !business.is_trial {
            return Ok(());
        }

        let Some(agent_id) = business.agent_id.as_deref() else {
            return Ok(());
        };

        let used = self.calls.count_calls(agent_id).await?;
        if used >= self.limit {
            tracing::warn!(
                "Trial business {} reached its call limit ({}/{})",
                business.id,
                used,
                self.limit
            );
            return Err(AppError::QuotaExceeded(format!(
                "Trial limit of {} calls reached. Upgrade to keep receiving calls.",
                self.limit
            )));
        }

        Ok(())
    }
}

/// Accepts every call.
pub struct Unlimited;

#[async_trait]
impl QuotaChecker for Unlimited {
    async fn check_call_quota(&self, _business: &Business) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_storage::MemoryStorage;
    use crate::models::{CallOutcome, LeadFields, NewCall};
    use uuid::Uuid;

    fn trial_business(is_trial: bool) -> Business {
        Business {
            id: Uuid::new_v4(),
            name: "Acme Plumbing".to_string(),
            owner_name: None,
            owner_phone: "+15550009999".to_string(),
            owner_email: None,
            agent_id: Some("agent-1".to_string()),
            requires_approval: false,
            is_trial,
        }
    }

    async fn store_with_calls(n: usize) -> Arc<MemoryStorage> {
        let store = Arc::new(MemoryStorage::new());
        for i in 0..n {
            store
                .insert_call(&NewCall {
                    call_id: format!("call-{}", i),
                    caller_phone: String::new(),
                    business_ref: "agent-1".to_string(),
                    transcript: None,
                    lead: LeadFields::default(),
                    outcome: CallOutcome::CallbackScheduled,
                    recording_url: None,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn trial_business_is_capped() {
        let store = store_with_calls(2).await;
        let checker = TrialQuotaChecker::new(store, 2);

        let err = checker
            .check_call_quota(&trial_business(true))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn paid_business_is_never_capped() {
        let store = store_with_calls(3).await;
        let checker = TrialQuotaChecker::new(store, 2);
        assert!(checker.check_call_quota(&trial_business(false)).await.is_ok());
    }

    #[tokio::test]
    async fn trial_business_under_limit_passes() {
        let store = store_with_calls(1).await;
        let checker = TrialQuotaChecker::new(store, 2);
        assert!(checker.check_call_quota(&trial_business(true)).await.is_ok());
    }
}
