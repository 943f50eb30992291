//! Context document handed to the agent.
//!
//! ```text
//! <messages conversation="ID">
//! <message id="…" sender="NAME" sender_id="…" time="RFC3339">BODY</message>
//! <message …><attachment path="/abs/path"/>BODY</message>
//! <message …><attachment ref="REF" unresolved="true"/>BODY</message>
//! </messages>
//! ```

use std::path::Path;

use {askama::Template, courier_common::time::format_rfc3339, courier_store::Event};

use crate::Result;

#[derive(Template)]
#[template(
    ext = "xml",
    escape = "html",
    source = r#"<messages conversation="{{ conversation_id }}">
{% for m in messages %}<message id="{{ m.id }}" sender="{{ m.sender }}" sender_id="{{ m.sender_id }}" time="{{ m.time }}">{% if let Some(path) = m.path %}<attachment path="{{ path.display() }}"/>{% endif %}{% if let Some(reference) = m.unresolved_ref %}<attachment ref="{{ reference }}" unresolved="true"/>{% endif %}{{ m.body }}</message>
{% endfor %}</messages>"#
)]
struct ContextDocument<'a> {
    conversation_id: &'a str,
    messages: Vec<MessageView<'a>>,
}

struct MessageView<'a> {
    id: &'a str,
    sender: &'a str,
    sender_id: &'a str,
    time: String,
    path: Option<&'a Path>,
    /// Set only when the attachment has no local path yet.
    unresolved_ref: Option<&'a str>,
    body: &'a str,
}

impl<'a> From<&'a Event> for MessageView<'a> {
    fn from(event: &'a Event) -> Self {
        let path = event.media_path.as_deref();
        Self {
            id: &event.id,
            sender: &event.sender_display_name,
            sender_id: &event.sender_id,
            time: format_rfc3339(event.timestamp),
            path,
            unresolved_ref: event.attachment_ref.as_deref().filter(|_| path.is_none()),
            body: &event.body,
        }
    }
}

/// Serialize events, in order, into the context document. Attribute values
/// and bodies are escaped.
pub fn render(conversation_id: &str, events: &[Event]) -> Result<String> {
    let document = ContextDocument {
        conversation_id,
        messages: events.iter().map(MessageView::from).collect(),
    };
    Ok(document.render()?)
}
