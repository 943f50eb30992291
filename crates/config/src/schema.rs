/// Config schema types (store, dispatch, agent runtime, media, transport, metrics).
use std::{collections::HashMap, path::PathBuf};

use {
    courier_common::types::ConversationPolicy,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub agent: AgentConfig,
    pub media: MediaConfig,
    pub whatsapp: WhatsAppConfig,
    pub metrics: MetricsConfig,
}

/// Durable store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. Defaults to `<data_dir>/courier.db`.
    pub path: Option<PathBuf>,
}

/// Batching and dispatch behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Name the agent answers to. Used for reply prefixes and the default
    /// trigger pattern.
    pub assistant_name: String,
    /// Regex that marks an event as a trigger. Defaults to `@<assistant_name>`
    /// at a word boundary, case-insensitive.
    pub trigger_pattern: Option<String>,
    /// Sender IDs (glob patterns) of other automated participants.
    pub bot_senders: Vec<String>,
    /// Policy applied to conversations registered without explicit flags.
    pub default_policy: ConversationPolicy,
    /// Upper bound on events serialised into one context document. Only the
    /// most recent events are kept when the bound is exceeded. The cursor
    /// still moves past the older ones, so they are never dispatched.
    pub max_batch_events: Option<usize>,
    /// Prefix outbound replies with `"<assistant_name>: "`.
    pub prefix_replies: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Andy".into(),
            trigger_pattern: None,
            bot_senders: Vec::new(),
            default_policy: ConversationPolicy::default(),
            max_batch_events: None,
            prefix_replies: true,
        }
    }
}

impl DispatchConfig {
    /// Trigger regex source, falling back to the assistant mention.
    #[must_use]
    pub fn effective_trigger_pattern(&self) -> String {
        match &self.trigger_pattern {
            Some(pattern) => pattern.clone(),
            None => format!(r"(?i)(^|\W)@{}\b", regex::escape(&self.assistant_name)),
        }
    }

    /// Prefix added to outbound replies, if enabled.
    #[must_use]
    pub fn reply_prefix(&self) -> Option<String> {
        self.prefix_replies
            .then(|| format!("{}: ", self.assistant_name))
    }
}

/// External agent runtime invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Program spawned once per invocation (e.g. `docker`).
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Upper bound for one agent run. The process then gets SIGTERM, and
    /// SIGKILL after a short grace period.
    pub timeout_secs: u64,
    /// Stdout beyond this many bytes is discarded and the output treated as
    /// malformed.
    pub max_output_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "docker".into(),
            args: vec![
                "run".into(),
                "-i".into(),
                "--rm".into(),
                "courier-agent:latest".into(),
            ],
            env: HashMap::new(),
            working_dir: None,
            timeout_secs: 30 * 60,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Attachment resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory the transport downloads attachments into. Defaults to
    /// `<data_dir>/media`.
    pub dir: Option<PathBuf>,
    pub resolve_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: None,
            resolve_timeout_secs: 10,
        }
    }
}

/// WhatsApp sidecar transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub enabled: bool,
    /// WebSocket URL of the Baileys sidecar.
    pub sidecar_url: String,
    pub account_id: String,
    /// How long to wait for the sidecar to acknowledge an outbound message.
    pub send_timeout_secs: u64,
    pub connect_attempts: u32,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sidecar_url: "ws://127.0.0.1:9877".into(),
            account_id: "default".into(),
            send_timeout_secs: 30,
            connect_attempts: 10,
        }
    }
}

/// Metrics collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address for a Prometheus scrape endpoint, e.g. `127.0.0.1:9464`.
    pub listen: Option<String>,
    /// Extra labels attached to every metric.
    pub labels: HashMap<String, String>,
}
