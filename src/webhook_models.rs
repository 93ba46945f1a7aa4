use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ApprovalStatus, CallOutcome};

/// Envelope posted by the voice provider: `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEvent {
    pub event: String,

    /// Event body; shape depends on `event`.
    #[serde(default)]
    pub data: Value,
}

/// Known provider event kinds. Anything else is acknowledged and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CallStarted,
    CallEnded,
    CallAnalyzed,
    Other(String),
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        match self.event.as_str() {
            "call_started" => EventKind::CallStarted,
            "call_ended" => EventKind::CallEnded,
            "call_analyzed" => EventKind::CallAnalyzed,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// Keys the provider has used for the analysis blob, in order of preference.
const ANALYSIS_KEYS: &[&str] = &["call_analysis", "analysis"];

/// Body of `call_ended` and `call_analyzed` events.
///
/// Decoded field by field: a value of the wrong type only drops that field,
/// never the rest of the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallEventData {
    /// Provider correlation id. Required for `call_ended`.
    pub call_id: Option<String>,

    /// Caller number as reported by the provider.
    pub from_number: Option<String>,

    /// Provider agent id; identifies the business.
    pub agent_id: Option<String>,

    pub transcript: Option<String>,

    /// Free-form analysis blob fed to the lead extractor.
    pub call_analysis: Option<Value>,

    pub recording_url: Option<String>,
}

impl CallEventData {
    /// A body that isn't an object yields an empty record, so the caller can
    /// report the missing `call_id` instead of a parse error.
    pub fn from_value(data: &Value) -> Self {
        Self {
            call_id: scalar_text(data, "call_id"),
            from_number: scalar_text(data, "from_number"),
            agent_id: scalar_text(data, "agent_id"),
            transcript: scalar_text(data, "transcript"),
            call_analysis: ANALYSIS_KEYS
                .iter()
                .find_map(|key| data.get(*key).filter(|v| v.is_object()))
                .cloned(),
            recording_url: scalar_text(data, "recording_url"),
        }
    }

    /// `call_id` if present and non-blank.
    pub fn call_id(&self) -> Option<&str> {
        self.call_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Strings as-is, numbers stringified; anything else is absent.
fn scalar_text(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Carrier inbound SMS form body. Extra carrier fields are ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundSms {
    #[serde(rename = "From")]
    pub from: String,

    #[serde(rename = "Body", default)]
    pub body: String,
}

/// Response for `POST /webhooks/provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CallOutcome>,

    /// Set when `call_ended` repeated a call_id that was already stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

impl IngestResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            event: None,
            call_id: None,
            outcome: None,
            duplicate: None,
        }
    }

    pub fn acknowledged(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            ..Self::ok()
        }
    }
}

/// Response for `POST /webhooks/sms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApprovalResponse {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            approval_status: None,
            call_id: None,
            message: Some(message.into()),
        }
    }

    pub fn decided(call_id: impl Into<String>, status: ApprovalStatus) -> Self {
        Self {
            status: "ok".to_string(),
            approval_status: Some(status),
            call_id: Some(call_id.into()),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentCallsQuery {
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_call_ended_body() {
        let event: ProviderEvent = serde_json::from_value(json!({
            "event": "call_ended",
            "data": {
                "call_id": "c1",
                "from_number": "+15551234567",
                "agent_id": "agent-9",
                "call_analysis": {"custom_analysis_data": {"caller_name": "Jane"}},
                "disconnection_reason": "user_hangup"
            }
        }))
        .unwrap();

        assert_eq!(event.kind(), EventKind::CallEnded);
        let data = CallEventData::from_value(&event.data);
        assert_eq!(data.call_id(), Some("c1"));
        assert_eq!(data.agent_id.as_deref(), Some("agent-9"));
        assert!(data.call_analysis.is_some());
    }

    #[test]
    fn mistyped_fields_do_not_hide_call_id() {
        let data = CallEventData::from_value(&json!({
            "call_id": "c2",
            "from_number": 15550001,
            "agent_id": {"id": "agent-9"},
            "transcript": ["hi"]
        }));
        assert_eq!(data.call_id(), Some("c2"));
        assert_eq!(data.from_number.as_deref(), Some("15550001"));
        assert_eq!(data.agent_id, None);
        assert_eq!(data.transcript, None);
    }

    #[test]
    fn short_analysis_key_is_accepted() {
        let data = CallEventData::from_value(&json!({
            "call_id": "c3",
            "analysis": {"custom": {"caller_name": "John"}}
        }));
        assert_eq!(data.call_analysis, Some(json!({"custom": {"caller_name": "John"}})));

        let both = CallEventData::from_value(&json!({
            "call_analysis": {"call_summary": "primary"},
            "analysis": {"call_summary": "fallback"}
        }));
        assert_eq!(both.call_analysis, Some(json!({"call_summary": "primary"})));
    }

    #[test]
    fn blank_call_id_counts_as_missing() {
        let data = CallEventData::from_value(&json!({"call_id": "   "}));
        assert_eq!(data.call_id(), None);

        let data = CallEventData::from_value(&json!("not an object"));
        assert_eq!(data.call_id(), None);
    }

    #[test]
    fn unknown_event_kind_is_preserved() {
        let event: ProviderEvent =
            serde_json::from_value(json!({"event": "call_transferred"})).unwrap();
        assert_eq!(event.kind(), EventKind::Other("call_transferred".to_string()));
    }

    #[test]
    fn response_omits_empty_fields() {
        let body = serde_json::to_value(ApprovalResponse::message("no pending")).unwrap();
        assert_eq!(body, json!({"status": "ok", "message": "no pending"}));
    }
}
