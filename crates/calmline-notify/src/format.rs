//! Message bodies for each delivery channel.

use calmline_types::Urgency;

use crate::NotificationRequest;

/// Longest SMS body sent, in characters.
pub const SMS_MAX_CHARS: usize = 320;

fn is_urgent(urgency: Urgency) -> bool {
    matches!(urgency, Urgency::Critical | Urgency::High)
}

pub fn sms_body(request: &NotificationRequest) -> String {
    let body = format!(
        "{}{}: {} - {}",
        if is_urgent(request.urgency) { "[URGENT] " } else { "" },
        request.kind.label(),
        request.caller.summary(),
        request.content.trim()
    );
    truncate_chars(&body, SMS_MAX_CHARS)
}

pub fn email_subject(request: &NotificationRequest) -> String {
    format!(
        "{}{} from {}",
        if is_urgent(request.urgency) { "[URGENT] " } else { "" },
        request.kind.label(),
        request.caller.summary()
    )
}

pub fn email_html(request: &NotificationRequest) -> String {
    let mut html = format!(
        "<h2>{}</h2>\n<p><strong>Caller:</strong> {}</p>\n<p><strong>Urgency:</strong> {}</p>\n",
        escape_html(request.kind.label()),
        escape_html(&request.caller.summary()),
        request.urgency.as_str()
    );
    html.push_str("<p>");
    html.push_str(&escape_html(request.content.trim()).replace('\n', "<br>\n"));
    html.push_str("</p>\n");
    if let Some(call_id) = &request.call_id {
        html.push_str(&format!("<p><small>Call {}</small></p>\n", escape_html(call_id)));
    }
    html
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
