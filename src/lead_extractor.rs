//! Maps a provider analysis payload onto canonical lead fields.
//!
//! Custom fields live under `custom_analysis_data` (or `custom`); each canonical field has
//! an ordered alias list and the first alias carrying a non-empty value wins.
//! The summary is read from the top-level `call_summary`.

use serde_json::Value;

use crate::models::LeadFields;

const CUSTOM_DATA_KEYS: &[&str] = &["custom_analysis_data", "custom"];
const SUMMARY_KEY: &str = "call_summary";

const NAME_ALIASES: &[&str] = &["caller_name", "name"];
const ADDRESS_ALIASES: &[&str] = &["address", "caller_address"];
const SERVICE_ALIASES: &[&str] = &["service_type", "service_needed"];
const URGENCY_ALIASES: &[&str] = &["urgency", "priority"];

/// Extract lead fields. `None`, `null` or a non-object analysis yields empty fields.
pub fn extract(analysis: Option<&Value>) -> LeadFields {
    let Some(analysis) = analysis.filter(|a| a.is_object()) else {
        return LeadFields::default();
    };

    let custom = CUSTOM_DATA_KEYS
        .iter()
        .find_map(|key| analysis.get(*key).filter(|c| c.is_object()));

    LeadFields {
        lead_name: first_alias(custom, NAME_ALIASES),
        lead_address: first_alias(custom, ADDRESS_ALIASES),
        service_type: first_alias(custom, SERVICE_ALIASES),
        urgency: first_alias(custom, URGENCY_ALIASES),
        summary: analysis.get(SUMMARY_KEY).and_then(text_value),
    }
}

fn first_alias(custom: Option<&Value>, aliases: &[&str]) -> Option<String> {
    let custom = custom?;
    aliases
        .iter()
        .find_map(|alias| custom.get(*alias).and_then(text_value))
}

/// Scalar values become text; empty strings, null, arrays and objects are absent.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_analysis_yields_empty_fields() {
        assert_eq!(extract(None), LeadFields::default());
        assert_eq!(extract(Some(&Value::Null)), LeadFields::default());
        assert!(extract(Some(&json!("garbage"))).is_empty());
    }

    #[test]
    fn primary_aliases_are_preferred() {
        let analysis = json!({
            "call_summary": "Leaking pipe under sink",
            "custom_analysis_data": {
                "caller_name": "John Doe",
                "name": "Johnny",
                "address": "12 Elm St",
                "service_type": "plumbing",
                "urgency": "high"
            }
        });

        let lead = extract(Some(&analysis));
        assert_eq!(lead.lead_name.as_deref(), Some("John Doe"));
        assert_eq!(lead.lead_address.as_deref(), Some("12 Elm St"));
        assert_eq!(lead.service_type.as_deref(), Some("plumbing"));
        assert_eq!(lead.urgency.as_deref(), Some("high"));
        assert_eq!(lead.summary.as_deref(), Some("Leaking pipe under sink"));
    }

    #[test]
    fn empty_primary_alias_falls_through() {
        let analysis = json!({
            "custom_analysis_data": {
                "caller_name": "",
                "name": "Jane",
                "service_needed": "roof repair",
                "priority": "low"
            }
        });

        let lead = extract(Some(&analysis));
        assert_eq!(lead.lead_name.as_deref(), Some("Jane"));
        assert_eq!(lead.service_type.as_deref(), Some("roof repair"));
        assert_eq!(lead.urgency.as_deref(), Some("low"));
        assert_eq!(lead.lead_address, None);
    }

    #[test]
    fn summary_does_not_need_custom_data() {
        let lead = extract(Some(&json!({"call_summary": "Wrong number"})));
        assert_eq!(lead.summary.as_deref(), Some("Wrong number"));
        assert_eq!(lead.lead_name, None);
        assert!(!lead.captures_lead());
    }

    #[test]
    fn short_custom_key_is_accepted() {
        let lead = extract(Some(&json!({
            "custom": {"caller_name": "John", "service_type": "roof repair"}
        })));
        assert_eq!(lead.lead_name.as_deref(), Some("John"));
        assert_eq!(lead.service_type.as_deref(), Some("roof repair"));
        assert!(lead.captures_lead());
    }

    #[test]
    fn numeric_values_are_stringified() {
        let lead = extract(Some(&json!({"custom_analysis_data": {"priority": 1}})));
        assert_eq!(lead.urgency.as_deref(), Some("1"));
    }
}
