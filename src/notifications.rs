//! Best-effort fan-out of call notifications.
//!
//! Every delivery runs as its own task under a timeout. A failure, timeout or
//! panic in one task is logged (and optionally queued for replay) without
//! affecting the others or the webhook response.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::broadcast::{BroadcastHub, DashboardEvent};
use crate::errors::AppError;
use crate::messages;
use crate::models::{ApprovalStatus, Business, Call, CallOutcome, LeadFields};
use crate::retry_queue::{RetryProcessor, RetryQueue};
use crate::services::{EmailSender, OutboundEmail, SmsSender};

pub const SMS_SERVICE: &str = "twilio";
pub const EMAIL_SERVICE: &str = "sendgrid";

/// One outbound message. Also the payload stored in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryJob {
    Sms { to: String, body: String },
    Email(OutboundEmail),
}

impl DeliveryJob {
    pub fn service(&self) -> &'static str {
        match self {
            DeliveryJob::Sms { .. } => SMS_SERVICE,
            DeliveryJob::Email(_) => EMAIL_SERVICE,
        }
    }

    fn recipient(&self) -> &str {
        match self {
            DeliveryJob::Sms { to, .. } => to,
            DeliveryJob::Email(email) => &email.to,
        }
    }
}

/// The configured outbound channels. A `None` channel is disabled.
#[derive(Clone, Default)]
pub struct Channels {
    pub sms: Option<Arc<dyn SmsSender>>,
    pub email: Option<Arc<dyn EmailSender>>,
}

impl Channels {
    fn enabled(&self, job: &DeliveryJob) -> bool {
        match job {
            DeliveryJob::Sms { .. } => self.sms.is_some(),
            DeliveryJob::Email(_) => self.email.is_some(),
        }
    }

    pub async fn deliver(&self, job: &DeliveryJob) -> Result<(), AppError> {
        match job {
            DeliveryJob::Sms { to, body } => match self.sms.as_ref() {
                Some(sms) => sms.send_sms(to, body).await,
                None => Err(AppError::DeliveryFailed("SMS channel is disabled".to_string())),
            },
            DeliveryJob::Email(email) => match self.email.as_ref() {
                Some(sender) => sender.send_email(email).await,
                None => Err(AppError::DeliveryFailed("email channel is disabled".to_string())),
            },
        }
    }

    /// Deliver under `timeout`, turning a panic or timeout into a delivery failure.
    async fn deliver_guarded(&self, job: &DeliveryJob, timeout: Duration) -> Result<(), AppError> {
        let attempt = AssertUnwindSafe(self.deliver(job)).catch_unwind();
        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::DeliveryFailed(format!(
                "{} delivery panicked",
                job.service()
            ))),
            Err(_) => Err(AppError::DeliveryFailed(format!(
                "{} delivery timed out after {:?}",
                job.service(),
                timeout
            ))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// Failures saved to the retry queue.
    pub queued: usize,
    /// Dashboards that received the broadcast.
    pub broadcast_to: usize,
}

pub struct NotificationDispatcher {
    channels: Channels,
    hub: BroadcastHub,
    retries: Option<Arc<RetryQueue>>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(hub: BroadcastHub, timeout: Duration) -> Self {
        Self {
            channels: Channels::default(),
            hub,
            retries: None,
            timeout,
        }
    }

    pub fn with_sms(mut self, sms: Arc<dyn SmsSender>) -> Self {
        self.channels.sms = Some(sms);
        self
    }

    pub fn with_email(mut self, email: Arc<dyn EmailSender>) -> Self {
        self.channels.email = Some(email);
        self
    }

    /// Queue failed deliveries for later replay.
    pub fn with_retry_queue(mut self, queue: Arc<RetryQueue>) -> Self {
        self.retries = Some(queue);
        self
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Notifications for a freshly created call: caller confirmation, owner
    /// SMS (summary or approval request), owner lead email and the dashboard
    /// `new_call` event.
    pub async fn dispatch_new_call(
        &self,
        call: &Call,
        business: Option<&Business>,
        lead: &LeadFields,
    ) -> DispatchReport {
        let mut jobs = Vec::new();

        if !call.caller_phone.trim().is_empty() {
            jobs.push(DeliveryJob::Sms {
                to: call.caller_phone.clone(),
                body: messages::caller_confirmation(business.map(|b| b.name.as_str())),
            });
        }

        if let Some(business) = business {
            if !business.owner_phone.trim().is_empty() {
                let body = if business.requires_approval {
                    messages::approval_request(call, lead)
                } else {
                    messages::owner_summary(&call.caller_phone, lead)
                };
                jobs.push(DeliveryJob::Sms {
                    to: business.owner_phone.clone(),
                    body,
                });
            }

            let owner_email = business
                .owner_email
                .as_deref()
                .filter(|e| !e.trim().is_empty());
            if let (Some(owner_email), Some(CallOutcome::LeadCaptured)) = (owner_email, call.outcome) {
                jobs.push(DeliveryJob::Email(messages::lead_email(
                    owner_email,
                    &business.name,
                    &call.caller_phone,
                    lead,
                )));
            }
        }

        let mut report = self.run(jobs).await;
        report.broadcast_to = self.hub.broadcast(&DashboardEvent::NewCall { call: call.clone() });
        report
    }

    /// Confirm an owner decision by SMS and tell dashboards.
    pub async fn dispatch_approval(
        &self,
        call: &Call,
        business: &Business,
        decision: ApprovalStatus,
    ) -> DispatchReport {
        let job = DeliveryJob::Sms {
            to: business.owner_phone.clone(),
            body: messages::approval_confirmation(call, decision),
        };
        let mut report = self.run(vec![job]).await;
        report.broadcast_to = self.hub.broadcast(&DashboardEvent::ApprovalUpdated {
            call_id: call.call_id.clone(),
            approval_status: decision,
            business_ref: call.business_ref.clone(),
        });
        report
    }

    /// Single SMS reply, e.g. help text or "nothing pending".
    pub async fn send_sms(&self, to: &str, body: String) -> DispatchReport {
        self.run(vec![DeliveryJob::Sms {
            to: to.to_string(),
            body,
        }])
        .await
    }

    async fn run(&self, jobs: Vec<DeliveryJob>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut tasks = JoinSet::new();

        for job in jobs {
            if !self.channels.enabled(&job) {
                tracing::debug!(
                    "{} channel disabled, skipping message to {}",
                    job.service(),
                    job.recipient()
                );
                continue;
            }

            let channels = self.channels.clone();
            let retries = self.retries.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                match channels.deliver_guarded(&job, timeout).await {
                    Ok(()) => (true, false),
                    Err(e) => {
                        tracing::error!(
                            "{} delivery to {} failed: {}",
                            job.service(),
                            job.recipient(),
                            e
                        );
                        let queued = match retries {
                            Some(queue) => enqueue(&queue, &job, &e).await,
                            None => false,
                        };
                        (false, queued)
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((true, _)) => report.delivered += 1,
                Ok((false, queued)) => {
                    report.failed += 1;
                    if queued {
                        report.queued += 1;
                    }
                }
                Err(e) => {
                    tracing::error!("Notification task aborted: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

async fn enqueue(queue: &RetryQueue, job: &DeliveryJob, error: &AppError) -> bool {
    let payload = match serde_json::to_value(job) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize delivery job: {}", e);
            return false;
        }
    };
    match queue.enqueue(job.service(), &payload, &error.to_string()).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("Failed to queue {} delivery for retry: {}", job.service(), e);
            false
        }
    }
}

/// Replays queued [`DeliveryJob`]s through the live channels.
pub struct DeliveryReplayer {
    channels: Channels,
    timeout: Duration,
}

impl DeliveryReplayer {
    pub fn new(channels: Channels, timeout: Duration) -> Self {
        Self { channels, timeout }
    }
}

#[async_trait]
impl RetryProcessor for DeliveryReplayer {
    async fn process(&self, service: &str, payload: &Value) -> Result<(), AppError> {
        let job: DeliveryJob = serde_json::from_value(payload.clone()).map_err(|e| {
            AppError::InvalidPayload(format!("unreadable {} retry payload: {}", service, e))
        })?;

        if job.service() != service {
            return Err(AppError::InvalidPayload(format!(
                "retry entry tagged '{}' holds a {} job",
                service,
                job.service()
            )));
        }

        self.channels.deliver_guarded(&job, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_payload_is_tagged() {
        let job = DeliveryJob::Sms {
            to: "+1555".to_string(),
            body: "hi".to_string(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value, json!({"kind": "sms", "to": "+1555", "body": "hi"}));
        assert_eq!(job.service(), "twilio");
    }

    #[tokio::test]
    async fn replayer_rejects_mismatched_service() {
        let replayer = DeliveryReplayer::new(Channels::default(), Duration::from_secs(1));
        let payload = json!({"kind": "sms", "to": "+1555", "body": "hi"});
        let err = replayer.process("sendgrid", &payload).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn replay_fails_when_channel_disabled() {
        let replayer = DeliveryReplayer::new(Channels::default(), Duration::from_secs(1));
        let payload = json!({"kind": "sms", "to": "+1555", "body": "hi"});
        let err = replayer.process("twilio", &payload).await.unwrap_err();
        assert!(err.is_delivery_failure());
    }
}
