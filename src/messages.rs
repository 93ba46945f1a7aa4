//! SMS and email bodies.

use crate::models::{ApprovalStatus, Call, LeadFields};
use crate::services::OutboundEmail;

const SUMMARY_SMS_CHARS: usize = 300;
const REF_CHARS: usize = 8;
const FALLBACK_BUSINESS_NAME: &str = "our team";

pub fn caller_confirmation(business_name: Option<&str>) -> String {
    format!(
        "Thanks for calling {}! We've received your request and someone will get back to you shortly.",
        business_name.unwrap_or(FALLBACK_BUSINESS_NAME)
    )
}

fn lead_lines(parts: &mut Vec<String>, caller_phone: &str, lead: &LeadFields) {
    if let Some(name) = present(&lead.lead_name) {
        parts.push(format!("Name: {}", name));
    }
    parts.push(format!("Phone: {}", caller_phone));
    if let Some(service) = present(&lead.service_type) {
        parts.push(format!("Service: {}", service));
    }
    if let Some(urgency) = present(&lead.urgency) {
        parts.push(format!("Urgency: {}", urgency.to_uppercase()));
    }
}

/// Owner summary sent for every call of a business without the approval workflow.
pub fn owner_summary(caller_phone: &str, lead: &LeadFields) -> String {
    let mut parts = vec!["📞 New lead:".to_string()];
    lead_lines(&mut parts, caller_phone, lead);
    if let Some(summary) = present(&lead.summary) {
        parts.push(format!("Summary: {}", truncate_chars(summary, SUMMARY_SMS_CHARS)));
    }
    parts.push("Reply STOP to opt out.".to_string());
    parts.join("\n")
}

/// Booking request for businesses that approve calls by SMS.
pub fn approval_request(call: &Call, lead: &LeadFields) -> String {
    let mut parts = vec!["📞 New booking request:".to_string()];
    lead_lines(&mut parts, &call.caller_phone, lead);
    parts.push(String::new());
    parts.push("Reply YES to approve or NO to reject.".to_string());
    parts.push(format!("Ref: {}", short_ref(&call.call_id)));
    parts.join("\n")
}

pub fn approval_confirmation(call: &Call, decision: ApprovalStatus) -> String {
    let verb = match decision {
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
        ApprovalStatus::Pending => "left pending",
    };
    let who = call.lead_name.as_deref().unwrap_or(call.caller_phone.as_str());
    format!(
        "Booking {} for {} (Ref: {}).",
        verb,
        who,
        short_ref(&call.call_id)
    )
}

pub fn approval_help() -> String {
    "Sorry, we didn't understand that. Reply YES to approve or NO to reject the latest booking request."
        .to_string()
}

pub fn nothing_pending() -> String {
    "There are no booking requests waiting for your approval.".to_string()
}

pub fn lead_email(
    owner_email: &str,
    business_name: &str,
    caller_phone: &str,
    lead: &LeadFields,
) -> OutboundEmail {
    let lead_name = present(&lead.lead_name).unwrap_or("Unknown");
    let service = present(&lead.service_type);

    let service_html = service
        .map(|s| format!("<p><strong>Service Needed:</strong> {}</p>", escape_html(s)))
        .unwrap_or_default();
    let html = format!(
        r#"<html>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
      <h2 style="color: #4A90E2;">New Lead Alert!</h2>
      <p>You have a new lead for {business}:</p>
      <div style="background-color: #f5f5f5; padding: 15px; border-radius: 5px; margin: 20px 0;">
        <p><strong>Name:</strong> {name}</p>
        <p><strong>Phone:</strong> {phone}</p>
        {service}
      </div>
      <p style="color: #666; font-size: 14px; margin-top: 40px;">
        This lead was automatically captured by your AI phone assistant.
      </p>
    </div>
  </body>
</html>"#,
        business = escape_html(business_name),
        name = escape_html(lead_name),
        phone = escape_html(caller_phone),
        service = service_html,
    );

    let mut text = vec![
        "New Lead Alert!".to_string(),
        String::new(),
        format!("You have a new lead for {}:", business_name),
        String::new(),
        format!("Name: {}", lead_name),
        format!("Phone: {}", caller_phone),
    ];
    if let Some(service) = service {
        text.push(format!("Service Needed: {}", service));
    }
    text.push(String::new());
    text.push("This lead was automatically captured by your AI phone assistant.".to_string());

    OutboundEmail {
        to: owner_email.to_string(),
        subject: format!("New Lead for {}", business_name),
        html,
        text: text.join("\n"),
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// First `REF_CHARS` characters of a call id, shown to owners for reference.
pub fn short_ref(call_id: &str) -> &str {
    match call_id.char_indices().nth(REF_CHARS) {
        Some((idx, _)) => &call_id[..idx],
        None => call_id,
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> LeadFields {
        LeadFields {
            lead_name: Some("John Doe".to_string()),
            service_type: Some("plumbing".to_string()),
            urgency: Some("high".to_string()),
            summary: Some("x".repeat(500)),
            ..Default::default()
        }
    }

    #[test]
    fn caller_confirmation_falls_back_to_generic_name() {
        assert!(caller_confirmation(None).starts_with("Thanks for calling our team!"));
        assert!(caller_confirmation(Some("Acme")).starts_with("Thanks for calling Acme!"));
    }

    #[test]
    fn owner_summary_uppercases_urgency_and_truncates_summary() {
        let body = owner_summary("+15551234567", &lead());
        assert!(body.contains("Name: John Doe"));
        assert!(body.contains("Urgency: HIGH"));
        assert!(body.contains(&format!("Summary: {}\n", "x".repeat(300))));
        assert!(!body.contains(&"x".repeat(301)));
        assert!(body.ends_with("Reply STOP to opt out."));
    }

    #[test]
    fn owner_summary_skips_absent_fields() {
        let body = owner_summary("+15551234567", &LeadFields::default());
        assert_eq!(body, "📞 New lead:\nPhone: +15551234567\nReply STOP to opt out.");
    }

    #[test]
    fn short_ref_handles_short_ids() {
        assert_eq!(short_ref("abcdefghijk"), "abcdefgh");
        assert_eq!(short_ref("abc"), "abc");
    }

    #[test]
    fn lead_email_escapes_html() {
        let mut fields = lead();
        fields.lead_name = Some("<script>".to_string());
        let email = lead_email("owner@example.com", "Acme & Sons", "+1555", &fields);
        assert_eq!(email.subject, "New Lead for Acme & Sons");
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(email.html.contains("Acme &amp; Sons"));
        assert!(email.text.contains("Name: <script>"));
    }
}
