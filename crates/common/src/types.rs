use serde::{Deserialize, Serialize};

/// Which echoed messages are allowed back into an agent's context.
///
/// Self-authored events are the bridge's own replies seen again on the
/// inbound stream. Bot events come from other automated senders listed in
/// `dispatch.bot_senders`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EchoPolicy {
    pub include_self: bool,
    pub include_bots: bool,
}

/// Per-conversation dispatch policy, persisted alongside the conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConversationPolicy {
    /// Only dispatch once a pending event mentions the trigger pattern.
    /// Earlier events stay pending and are sent along as context.
    pub requires_trigger: bool,
    pub echo: EchoPolicy,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_exclude_all_echoes() {
        let policy = ConversationPolicy::default();
        assert!(!policy.requires_trigger);
        assert!(!policy.echo.include_self);
        assert!(!policy.echo.include_bots);
    }

    #[test]
    fn partial_policy_json_fills_defaults() {
        let policy: ConversationPolicy =
            serde_json::from_str(r#"{"echo":{"include_bots":true}}"#).unwrap();
        assert!(policy.echo.include_bots);
        assert!(!policy.echo.include_self);
        assert!(!policy.requires_trigger);
    }
}
