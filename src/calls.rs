use std::sync::Arc;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    ApprovalStatus, Business, Call, CallOutcome, InsertOutcome, Lead, LeadFields, NewCall,
    NewLead,
};
use crate::quota::QuotaChecker;
use crate::services::BlobUploader;
use crate::storage::CallStorage;

/// Input for [`CallRecordStore::create`].
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub call_id: String,
    pub caller_phone: String,
    pub business_ref: String,
    pub transcript: Option<String>,
    pub lead: LeadFields,
    /// Provider-hosted recording to copy into blob storage.
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedCall {
    pub call: Call,
    /// The call_id was already stored; nothing was written.
    pub duplicate: bool,
    pub lead: Option<Lead>,
}

/// Owns the Call lifecycle: idempotent creation, late analysis merges and
/// approval transitions.
pub struct CallRecordStore {
    calls: Arc<dyn CallStorage>,
    quota: Arc<dyn QuotaChecker>,
    recordings: Option<Arc<dyn BlobUploader>>,
}

impl CallRecordStore {
    pub fn new(calls: Arc<dyn CallStorage>, quota: Arc<dyn QuotaChecker>) -> Self {
        Self {
            calls,
            quota,
            recordings: None,
        }
    }

    pub fn with_recordings(mut self, uploader: Arc<dyn BlobUploader>) -> Self {
        self.recordings = Some(uploader);
        self
    }

    /// Create the call row for `call_ended`.
    ///
    /// A repeated `call_id` returns the stored call with `duplicate = true`
    /// before quota or recording work is done.
    pub async fn create(
        &self,
        request: CreateCall,
        business: Option<&Business>,
    ) -> Result<CreatedCall, AppError> {
        if let Some(existing) = self.calls.find_call(&request.call_id).await? {
            tracing::info!("Duplicate call_ended for {}, keeping stored call", request.call_id);
            return Ok(CreatedCall {
                call: existing,
                duplicate: true,
                lead: None,
            });
        }

        if let Some(business) = business {
            self.quota.check_call_quota(business).await?;
        }

        let outcome = CallOutcome::from_lead(&request.lead);
        let recording_url = self
            .transfer_recording(&request.call_id, request.recording_url.as_deref())
            .await;

        let new_call = NewCall {
            call_id: request.call_id,
            caller_phone: request.caller_phone,
            business_ref: request.business_ref,
            transcript: request.transcript,
            lead: request.lead,
            outcome,
            recording_url,
        };

        let call = match self
            .calls
            .insert_call(&new_call)
            .await
            .with_context(|| format!("Failed to store call {}", new_call.call_id))?
        {
            InsertOutcome::Inserted(call) => call,
            InsertOutcome::Existing(call) => {
                // Lost a race with a concurrent redelivery.
                tracing::info!("Call {} was stored concurrently", call.call_id);
                return Ok(CreatedCall {
                    call,
                    duplicate: true,
                    lead: None,
                });
            }
        };
        tracing::info!("Call saved: {} -> {}", call.call_id, outcome);

        let lead = match business {
            Some(business) if outcome == CallOutcome::LeadCaptured => {
                self.create_lead(&call, &new_call.lead, business).await
            }
            _ => None,
        };

        Ok(CreatedCall {
            call,
            duplicate: false,
            lead,
        })
    }

    async fn transfer_recording(&self, call_id: &str, source: Option<&str>) -> Option<String> {
        let source = source.filter(|url| !url.trim().is_empty())?;
        let Some(uploader) = self.recordings.as_ref() else {
            tracing::debug!("Blob storage not configured, skipping recording for {}", call_id);
            return None;
        };

        match uploader.upload_recording(call_id, source).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::error!("Failed to upload recording for call {}: {}", call_id, e);
                None
            }
        }
    }

    /// Lead failures are logged only; the call is already committed.
    async fn create_lead(
        &self,
        call: &Call,
        fields: &LeadFields,
        business: &Business,
    ) -> Option<Lead> {
        let new_lead = NewLead {
            business_id: business.id,
            call_id: call.call_id.clone(),
            caller_name: fields
                .lead_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            caller_phone: call.caller_phone.clone(),
            service_needed: fields.service_type.clone(),
            notes: fields.summary.clone(),
        };

        match self.calls.insert_lead(&new_lead).await {
            Ok(Some(lead)) => {
                tracing::info!("Lead created: {} for business {}", lead.id, business.id);
                Some(lead)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to create lead record for {}: {}", call.call_id, e);
                None
            }
        }
    }

    /// Fill fields still null on the stored call. Unknown calls are a no-op.
    pub async fn merge_analysis(
        &self,
        call_id: &str,
        lead: &LeadFields,
    ) -> Result<Option<Call>, AppError> {
        let merged = self.calls.fill_missing(call_id, lead).await?;
        match merged {
            Some(_) => tracing::info!("Call updated with analysis: {}", call_id),
            None => tracing::warn!("call_analyzed for unknown call_id: {}", call_id),
        }
        Ok(merged)
    }

    /// Returns false when the call was no longer pending.
    pub async fn set_approval(
        &self,
        call_id: &str,
        decision: ApprovalStatus,
    ) -> Result<bool, AppError> {
        self.calls.set_approval(call_id, decision).await
    }

    pub async fn find_latest_pending(&self, business_ref: &str) -> Result<Option<Call>, AppError> {
        self.calls.latest_pending(business_ref).await
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Call>, AppError> {
        self.calls.recent_calls(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_storage::MemoryStorage;
    use crate::quota::{TrialQuotaChecker, Unlimited};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FailingUploader;

    #[async_trait]
    impl BlobUploader for FailingUploader {
        async fn upload_recording(&self, _: &str, _: &str) -> Result<String, AppError> {
            Err(AppError::DeliveryFailed("blob down".to_string()))
        }
    }

    struct FixedUploader;

    #[async_trait]
    impl BlobUploader for FixedUploader {
        async fn upload_recording(&self, call_id: &str, _: &str) -> Result<String, AppError> {
            Ok(format!("https://blob.test/{}.mp3", call_id))
        }
    }

    fn business() -> Business {
        Business {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            owner_name: None,
            owner_phone: "+15550009999".to_string(),
            owner_email: None,
            agent_id: Some("agent-1".to_string()),
            requires_approval: false,
            is_trial: true,
        }
    }

    fn request(call_id: &str, lead: LeadFields) -> CreateCall {
        CreateCall {
            call_id: call_id.to_string(),
            caller_phone: "+15551234567".to_string(),
            business_ref: "agent-1".to_string(),
            transcript: Some("hello".to_string()),
            lead,
            recording_url: Some("https://provider.test/rec.wav".to_string()),
        }
    }

    fn named_lead() -> LeadFields {
        LeadFields {
            lead_name: Some("Jane".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_sets_pending_and_derived_outcome() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CallRecordStore::new(storage.clone(), Arc::new(Unlimited));

        let created = store
            .create(request("c1", named_lead()), Some(&business()))
            .await
            .unwrap();

        assert!(!created.duplicate);
        assert_eq!(created.call.outcome, Some(CallOutcome::LeadCaptured));
        assert_eq!(created.call.approval_status, Some(ApprovalStatus::Pending));
        assert_eq!(created.lead.as_ref().map(|l| l.caller_name.as_str()), Some("Jane"));
        assert_eq!(storage.leads().await.len(), 1);
    }

    #[tokio::test]
    async fn upload_failure_leaves_recording_null() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CallRecordStore::new(storage, Arc::new(Unlimited))
            .with_recordings(Arc::new(FailingUploader));

        let created = store
            .create(request("c1", LeadFields::default()), None)
            .await
            .unwrap();
        assert_eq!(created.call.recording_url, None);
        assert_eq!(created.call.outcome, Some(CallOutcome::CallbackScheduled));
    }

    #[tokio::test]
    async fn upload_success_stores_blob_url() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CallRecordStore::new(storage, Arc::new(Unlimited))
            .with_recordings(Arc::new(FixedUploader));

        let created = store
            .create(request("c9", LeadFields::default()), None)
            .await
            .unwrap();
        assert_eq!(
            created.call.recording_url.as_deref(),
            Some("https://blob.test/c9.mp3")
        );
    }

    #[tokio::test]
    async fn duplicate_skips_quota_and_keeps_first_row() {
        let storage = Arc::new(MemoryStorage::new());
        let quota = Arc::new(TrialQuotaChecker::new(storage.clone(), 1));
        let store = CallRecordStore::new(storage.clone(), quota);

        store
            .create(request("c1", named_lead()), Some(&business()))
            .await
            .unwrap();
        // Trial limit is now reached, but a redelivery must still succeed.
        let again = store
            .create(request("c1", LeadFields::default()), Some(&business()))
            .await
            .unwrap();

        assert!(again.duplicate);
        assert_eq!(again.call.lead_name.as_deref(), Some("Jane"));
        assert_eq!(storage.call_count().await, 1);
    }

    #[tokio::test]
    async fn quota_rejection_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let quota = Arc::new(TrialQuotaChecker::new(storage.clone(), 0));
        let store = CallRecordStore::new(storage.clone(), quota);

        let err = store
            .create(request("c1", named_lead()), Some(&business()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded(_)));
        assert_eq!(storage.call_count().await, 0);
    }

    #[tokio::test]
    async fn merge_on_unknown_call_is_noop() {
        let store = CallRecordStore::new(Arc::new(MemoryStorage::new()), Arc::new(Unlimited));
        let merged = store.merge_analysis("ghost", &named_lead()).await.unwrap();
        assert!(merged.is_none());
    }
}
