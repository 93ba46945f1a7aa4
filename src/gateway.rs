use std::sync::Arc;

use crate::approval::ApprovalWorkflow;
use crate::calls::{CallRecordStore, CreateCall};
use crate::errors::{AppError, ResultExt};
use crate::lead_extractor;
use crate::notifications::NotificationDispatcher;
use crate::storage::BusinessDirectory;
use crate::webhook_models::{
    ApprovalResponse, CallEventData, EventKind, InboundSms, IngestResponse, ProviderEvent,
};

/// Entry point for provider and carrier webhooks.
pub struct IngestGateway {
    calls: Arc<CallRecordStore>,
    businesses: Arc<dyn BusinessDirectory>,
    notifier: Arc<NotificationDispatcher>,
    approvals: ApprovalWorkflow,
}

impl IngestGateway {
    pub fn new(
        calls: Arc<CallRecordStore>,
        businesses: Arc<dyn BusinessDirectory>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        let approvals = ApprovalWorkflow::new(calls.clone(), businesses.clone(), notifier.clone());
        Self {
            calls,
            businesses,
            notifier,
            approvals,
        }
    }

    pub fn calls(&self) -> &CallRecordStore {
        &self.calls
    }

    pub async fn handle_provider_event(
        &self,
        event: ProviderEvent,
    ) -> Result<IngestResponse, AppError> {
        match event.kind() {
            EventKind::CallStarted => {
                let data = CallEventData::from_value(&event.data);
                tracing::info!("Call started: {}", data.call_id().unwrap_or("<no call_id>"));
                Ok(IngestResponse::ok())
            }
            EventKind::CallEnded => self.handle_call_ended(&event.data).await,
            EventKind::CallAnalyzed => self.handle_call_analyzed(&event.data).await,
            EventKind::Other(name) => {
                tracing::debug!("Ignoring provider event '{}'", name);
                Ok(IngestResponse::acknowledged(name))
            }
        }
    }

    /// Create the call, then notify. The call is committed before any
    /// notification is attempted; notification outcomes never change the response.
    async fn handle_call_ended(&self, raw: &serde_json::Value) -> Result<IngestResponse, AppError> {
        let data = CallEventData::from_value(raw);
        let call_id = data
            .call_id()
            .ok_or_else(|| AppError::InvalidPayload("call_ended requires data.call_id".to_string()))?
            .to_string();

        let business_ref = data.agent_id.clone().unwrap_or_default();
        let business = if business_ref.is_empty() {
            None
        } else {
            self.businesses.find_by_agent_id(&business_ref).await?
        };
        if business.is_none() {
            tracing::warn!("No business for agent '{}' (call {})", business_ref, call_id);
        }

        let lead = lead_extractor::extract(data.call_analysis.as_ref());
        let created = self
            .calls
            .create(
                CreateCall {
                    call_id: call_id.clone(),
                    caller_phone: data.from_number.clone().unwrap_or_default(),
                    business_ref,
                    transcript: data.transcript.clone(),
                    lead: lead.clone(),
                    recording_url: data.recording_url.clone(),
                },
                business.as_ref(),
            )
            .await
            .with_context(|| format!("call_ended {}", call_id))?;

        let mut response = IngestResponse::ok();
        response.call_id = Some(created.call.call_id.clone());
        response.outcome = created.call.outcome;

        if created.duplicate {
            response.duplicate = Some(true);
            return Ok(response);
        }

        let report = self
            .notifier
            .dispatch_new_call(&created.call, business.as_ref(), &lead)
            .await;
        tracing::info!(
            "Notifications for {}: {} delivered, {} failed, {} queued, {} dashboards",
            call_id,
            report.delivered,
            report.failed,
            report.queued,
            report.broadcast_to
        );

        Ok(response)
    }

    async fn handle_call_analyzed(
        &self,
        raw: &serde_json::Value,
    ) -> Result<IngestResponse, AppError> {
        let data = CallEventData::from_value(raw);
        let Some(call_id) = data.call_id() else {
            tracing::warn!("call_analyzed without call_id, ignoring");
            return Ok(IngestResponse::ok());
        };

        let lead = lead_extractor::extract(data.call_analysis.as_ref());
        self.calls.merge_analysis(call_id, &lead).await?;

        let mut response = IngestResponse::ok();
        response.call_id = Some(call_id.to_string());
        Ok(response)
    }

    pub async fn handle_inbound_sms(&self, sms: &InboundSms) -> Result<ApprovalResponse, AppError> {
        self.approvals.handle_reply(sms).await
    }
}
