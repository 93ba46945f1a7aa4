//! Owner YES/NO replies to booking requests.

use std::sync::Arc;

use crate::calls::CallRecordStore;
use crate::errors::AppError;
use crate::messages;
use crate::models::ApprovalStatus;
use crate::notifications::NotificationDispatcher;
use crate::storage::BusinessDirectory;
use crate::webhook_models::{ApprovalResponse, InboundSms};

const AFFIRMATIVE: &[&str] = &["YES", "Y", "APPROVE", "APPROVED", "ACCEPT"];
const NEGATIVE: &[&str] = &["NO", "N", "REJECT", "REJECTED", "DECLINE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    Approve,
    Reject,
    Unrecognized,
}

impl ReplyIntent {
    pub fn decision(self) -> Option<ApprovalStatus> {
        match self {
            ReplyIntent::Approve => Some(ApprovalStatus::Approved),
            ReplyIntent::Reject => Some(ApprovalStatus::Rejected),
            ReplyIntent::Unrecognized => None,
        }
    }
}

/// Classify a reply body after trimming and uppercasing it.
pub fn classify(body: &str) -> ReplyIntent {
    let normalized = body.trim().to_uppercase();
    if AFFIRMATIVE.contains(&normalized.as_str()) {
        ReplyIntent::Approve
    } else if NEGATIVE.contains(&normalized.as_str()) {
        ReplyIntent::Reject
    } else {
        ReplyIntent::Unrecognized
    }
}

pub struct ApprovalWorkflow {
    calls: Arc<CallRecordStore>,
    businesses: Arc<dyn BusinessDirectory>,
    notifier: Arc<NotificationDispatcher>,
}

impl ApprovalWorkflow {
    pub fn new(
        calls: Arc<CallRecordStore>,
        businesses: Arc<dyn BusinessDirectory>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            calls,
            businesses,
            notifier,
        }
    }

    /// Resolve an inbound owner SMS against the latest pending call.
    ///
    /// Unknown senders, unrecognized bodies and an empty queue are all
    /// successful no-ops; only storage failures are errors.
    pub async fn handle_reply(&self, sms: &InboundSms) -> Result<ApprovalResponse, AppError> {
        let from = sms.from.trim();
        let intent = classify(&sms.body);
        tracing::info!("Inbound SMS from {} classified as {:?}", from, intent);

        let Some(decision) = intent.decision() else {
            // Help text only goes to numbers we know; never reply to strangers.
            if self.businesses.find_by_owner_phone(from).await?.is_some() {
                self.notifier.send_sms(from, messages::approval_help()).await;
            }
            return Ok(ApprovalResponse::message("unrecognized reply"));
        };

        let Some(business) = self.businesses.find_by_owner_phone(from).await? else {
            tracing::warn!("Approval reply from unknown number {}", from);
            return Ok(ApprovalResponse::message("unknown sender"));
        };

        let Some(agent_id) = business.agent_id.as_deref() else {
            tracing::warn!("Business {} has no agent id, nothing can be pending", business.id);
            self.notifier.send_sms(from, messages::nothing_pending()).await;
            return Ok(ApprovalResponse::message("no pending"));
        };

        let Some(call) = self.calls.find_latest_pending(agent_id).await? else {
            tracing::info!("No pending booking for business {}", business.id);
            self.notifier.send_sms(from, messages::nothing_pending()).await;
            return Ok(ApprovalResponse::message("no pending"));
        };

        if !self.calls.set_approval(&call.call_id, decision).await? {
            // Decided by a concurrent reply between the lookup and the update.
            tracing::info!("Call {} was no longer pending", call.call_id);
            self.notifier.send_sms(from, messages::nothing_pending()).await;
            return Ok(ApprovalResponse::message("no pending"));
        }

        tracing::info!("Call {} {} by owner of business {}", call.call_id, decision, business.id);
        self.notifier.dispatch_approval(&call, &business, decision).await;

        Ok(ApprovalResponse::decided(call.call_id, decision))
    }
}
