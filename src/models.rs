use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

/// Enums stored as TEXT columns: `as_str` for binding, `FromStr` for decoding.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::InternalError(format!(
                        "unknown {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Lifecycle of a provider call.
    CallStatus {
        Active => "active",
        Completed => "completed",
        Failed => "failed",
    }
);

text_enum!(
    /// Result of a call, decided once when the call record is created.
    CallOutcome {
        LeadCaptured => "lead_captured",
        CallbackScheduled => "callback_scheduled",
        Escalated => "escalated",
        Voicemail => "voicemail",
    }
);

text_enum!(
    /// Owner decision on a captured booking. `Approved` and `Rejected` are terminal.
    ApprovalStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

text_enum!(
    LeadSource {
        Call => "call",
        Web => "web",
        Manual => "manual",
    }
);

text_enum!(
    LeadStatus {
        New => "new",
        Contacted => "contacted",
        Converted => "converted",
        Lost => "lost",
    }
);

text_enum!(
    /// State of a queued delivery. `Success` and `Failed` are terminal.
    RetryStatus {
        Pending => "pending",
        Retrying => "retrying",
        Success => "success",
        Failed => "failed",
    }
);

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl RetryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryStatus::Success | RetryStatus::Failed)
    }
}

// ============ Lead extraction ============

/// Canonical lead fields pulled out of a provider analysis payload.
///
/// Every field is optional: an absent analysis yields `LeadFields::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadFields {
    pub lead_name: Option<String>,
    pub lead_address: Option<String>,
    pub service_type: Option<String>,
    pub urgency: Option<String>,
    pub summary: Option<String>,
}

impl LeadFields {
    pub fn is_empty(&self) -> bool {
        self.lead_name.is_none()
            && self.lead_address.is_none()
            && self.service_type.is_none()
            && self.urgency.is_none()
            && self.summary.is_none()
    }

    /// A lead is captured when the caller gave a name or asked for a service.
    pub fn captures_lead(&self) -> bool {
        has_text(&self.lead_name) || has_text(&self.service_type)
    }
}

pub(crate) fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl CallOutcome {
    /// Outcome for a freshly created call.
    pub fn from_lead(lead: &LeadFields) -> Self {
        if lead.captures_lead() {
            CallOutcome::LeadCaptured
        } else {
            CallOutcome::CallbackScheduled
        }
    }
}

// ============ Database Models ============

/// Durable record of one provider-handled phone call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Internal identifier.
    pub id: Uuid,
    /// Provider correlation id. Unique.
    pub call_id: String,
    pub caller_phone: String,
    /// Provider agent id of the business that took the call.
    pub business_ref: String,
    pub status: CallStatus,
    pub outcome: Option<CallOutcome>,
    pub approval_status: Option<ApprovalStatus>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub lead_name: Option<String>,
    pub lead_address: Option<String>,
    pub service_type: Option<String>,
    pub urgency: Option<String>,
    pub recording_url: Option<String>,
    pub transcript_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Call {
    pub fn is_pending_approval(&self) -> bool {
        self.approval_status == Some(ApprovalStatus::Pending)
    }

    pub fn lead_fields(&self) -> LeadFields {
        LeadFields {
            lead_name: self.lead_name.clone(),
            lead_address: self.lead_address.clone(),
            service_type: self.service_type.clone(),
            urgency: self.urgency.clone(),
            summary: self.summary.clone(),
        }
    }
}

/// Values for a call row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub call_id: String,
    pub caller_phone: String,
    pub business_ref: String,
    pub transcript: Option<String>,
    pub lead: LeadFields,
    pub outcome: CallOutcome,
    pub recording_url: Option<String>,
}

/// Result of an idempotent insert keyed on `call_id`.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Call),
    /// A row with this `call_id` already existed and was left untouched.
    Existing(Call),
}

impl InsertOutcome {
    pub fn call(&self) -> &Call {
        match self {
            InsertOutcome::Inserted(call) | InsertOutcome::Existing(call) => call,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, InsertOutcome::Existing(_))
    }
}

/// Business configuration as read from the CRM tables.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub owner_name: Option<String>,
    /// Exact value the carrier reports as `From` on owner replies.
    pub owner_phone: String,
    pub owner_email: Option<String>,
    /// Provider agent id; matches `Call::business_ref`.
    pub agent_id: Option<String>,
    /// Owner must SMS YES/NO before a captured booking is final.
    pub requires_approval: bool,
    pub is_trial: bool,
}

/// Opportunity derived from a call whose outcome is `lead_captured`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub business_id: Uuid,
    pub call_id: String,
    pub caller_name: String,
    pub caller_phone: String,
    pub service_needed: Option<String>,
    pub notes: Option<String>,
    pub source: LeadSource,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub business_id: Uuid,
    pub call_id: String,
    pub caller_name: String,
    pub caller_phone: String,
    pub service_needed: Option<String>,
    pub notes: Option<String>,
}

/// Failed best-effort delivery awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRetryEntry {
    pub id: Uuid,
    /// Provider tag, e.g. "twilio" or "sendgrid".
    pub service: String,
    pub payload: Value,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub status: RetryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
