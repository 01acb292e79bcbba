use parley_core::format_unix_ms_rfc3339;

use crate::escalation_registry::EscalationRequest;

/// Renders the chat message that asks a human to answer `request`.
pub fn render_escalation_message(request: &EscalationRequest, marker: char) -> String {
    let mut lines = vec![
        "❓ Escalation".to_string(),
        String::new(),
        request.question.clone(),
    ];
    if let Some(context) = request
        .context
        .as_deref()
        .map(str::trim)
        .filter(|context| !context.is_empty())
    {
        lines.push(String::new());
        lines.push("Context:".to_string());
        lines.push(context.to_string());
    }
    lines.push(String::new());
    lines.push(format!(
        "Expires: {}",
        format_unix_ms_rfc3339(request.expires_unix_ms)
    ));
    lines.push(format!("Reply with {marker}{} <answer>", request.id));
    lines.join("\n")
}
