/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;
use serde_json::{json, Value};

use call_pipeline_api::approval::{classify, ReplyIntent};
use call_pipeline_api::lead_extractor::extract;
use call_pipeline_api::memory_storage::MemoryStorage;
use call_pipeline_api::models::{CallOutcome, LeadFields, NewCall};
use call_pipeline_api::retry_queue::{backoff_after, BACKOFF_MINUTES};
use call_pipeline_api::storage::CallStorage;

fn text() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-zA-Z ]{0,12}")
}

fn lead_fields() -> impl Strategy<Value = LeadFields> {
    (text(), text(), text(), text(), text()).prop_map(
        |(lead_name, lead_address, service_type, urgency, summary)| LeadFields {
            lead_name,
            lead_address,
            service_type,
            urgency,
            summary,
        },
    )
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "\\PC{0,16}".prop_map(Value::String),
        Just(json!([1, 2])),
        Just(json!({"nested": true})),
    ]
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

// Property: outcome is lead_captured exactly when a name or service is present
proptest! {
    #[test]
    fn outcome_follows_name_or_service(lead in lead_fields()) {
        let expected = has_text(&lead.lead_name) || has_text(&lead.service_type);
        prop_assert_eq!(
            CallOutcome::from_lead(&lead) == CallOutcome::LeadCaptured,
            expected
        );
    }
}

// Property: reply classification
proptest! {
    #[test]
    fn classify_never_panics(body in "\\PC*") {
        let _ = classify(&body);
    }

    #[test]
    fn yes_is_case_and_whitespace_insensitive(
        word in prop::sample::select(vec!["yes", "y", "approve", "approved", "accept"]),
        upper in any::<bool>(),
        pad in " {0,3}"
    ) {
        let word = if upper { word.to_uppercase() } else { word.to_string() };
        let body = format!("{}{}{}", pad, word, pad);
        prop_assert_eq!(classify(&body), ReplyIntent::Approve);
    }

    #[test]
    fn bodies_with_digits_are_unrecognized(body in "[a-z]{0,4}[0-9]{1,4}") {
        prop_assert_eq!(classify(&body), ReplyIntent::Unrecognized);
    }
}

// Property: extraction is total and never yields blank text
proptest! {
    #[test]
    fn extract_never_panics_and_trims(
        name in scalar(),
        service in scalar(),
        summary in scalar()
    ) {
        let analysis = json!({
            "call_summary": summary,
            "custom_analysis_data": {"caller_name": name, "service_needed": service}
        });
        let lead = extract(Some(&analysis));
        for field in [&lead.lead_name, &lead.service_type, &lead.summary] {
            if let Some(v) = field {
                prop_assert!(!v.is_empty());
                prop_assert_eq!(v.trim(), v.as_str());
            }
        }
    }
}

// Property: call_analyzed merges never clear or overwrite stored fields
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fill_missing_only_adds(stored in lead_fields(), incoming in lead_fields()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let merged = runtime.block_on(async {
            let storage = MemoryStorage::new();
            let call = NewCall {
                call_id: "prop-call".to_string(),
                caller_phone: "+15551234567".to_string(),
                business_ref: "agent".to_string(),
                transcript: None,
                lead: stored.clone(),
                outcome: CallOutcome::from_lead(&stored),
                recording_url: None,
            };
            storage.insert_call(&call).await.unwrap();
            storage.fill_missing("prop-call", &incoming).await.unwrap().unwrap()
        });

        let pairs = [
            (&stored.lead_name, &incoming.lead_name, &merged.lead_name),
            (&stored.lead_address, &incoming.lead_address, &merged.lead_address),
            (&stored.service_type, &incoming.service_type, &merged.service_type),
            (&stored.urgency, &incoming.urgency, &merged.urgency),
            (&stored.summary, &incoming.summary, &merged.summary),
        ];
        for (before, offered, after) in pairs {
            match before {
                Some(value) => prop_assert_eq!(after.as_ref(), Some(value)),
                None if has_text(offered) => prop_assert_eq!(after, offered),
                None => prop_assert_eq!(after, &None),
            }
        }
        prop_assert_eq!(merged.outcome, Some(CallOutcome::from_lead(&stored)));
    }
}

// Property: backoff never exceeds the last step
proptest! {
    #[test]
    fn backoff_is_bounded(attempts in -5i32..100) {
        let minutes = backoff_after(attempts).num_minutes();
        prop_assert!(minutes >= BACKOFF_MINUTES[0]);
        prop_assert!(minutes <= BACKOFF_MINUTES[BACKOFF_MINUTES.len() - 1]);
    }
}
