//! Hands a context document to the agent runtime and delivers its reply.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    courier_agents::{AgentRequest, AgentRuntime},
    courier_channels::ChannelOutbound,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, histogram, invoker as invoker_metrics};

use crate::{Error, Result};

const INTERNAL_OPEN: &str = "<internal>";
const INTERNAL_CLOSE: &str = "</internal>";

/// Runs one dispatch for a rendered batch. `Ok` means the agent finished and
/// any reply was acknowledged by the transport.
#[async_trait]
pub trait BatchInvoker: Send + Sync {
    async fn invoke(&self, conversation_id: &str, context_document: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Transport account replies are sent from.
    pub account_id: String,
    pub assistant_name: String,
    /// Prepended to every reply, e.g. `"Andy: "`.
    pub reply_prefix: Option<String>,
    /// Bound on the whole invocation, reply delivery included.
    pub timeout: Duration,
}

pub struct AgentInvoker {
    runtime: Arc<dyn AgentRuntime>,
    outbound: Arc<dyn ChannelOutbound>,
    config: InvokerConfig,
}

impl AgentInvoker {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        outbound: Arc<dyn ChannelOutbound>,
        config: InvokerConfig,
    ) -> Self {
        Self {
            runtime,
            outbound,
            config,
        }
    }

    async fn run_and_reply(&self, conversation_id: &str, context_document: &str) -> Result<()> {
        let request = AgentRequest {
            conversation_id: conversation_id.to_string(),
            assistant_name: self.config.assistant_name.clone(),
            context: context_document.to_string(),
        };

        #[cfg(feature = "metrics")]
        counter!(invoker_metrics::INVOCATIONS_TOTAL).increment(1);
        let started = Instant::now();
        let result = self.runtime.run(request).await;
        #[cfg(feature = "metrics")]
        histogram!(invoker_metrics::RUNTIME_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let reply = result.map_err(|e| match e {
            courier_agents::Error::Timeout { after } => Error::InvokerTimeout { after },
            source => Error::InvokerCrash { source },
        })?;

        let text = reply.text.as_deref().map(strip_internal).unwrap_or_default();
        if text.is_empty() {
            debug!(
                conversation_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "agent finished without a reply"
            );
            return Ok(());
        }

        let text = match &self.config.reply_prefix {
            Some(prefix) => format!("{prefix}{text}"),
            None => text,
        };
        self.outbound
            .send_text(&self.config.account_id, conversation_id, &text)
            .await
            .map_err(|source| Error::SendFailed { source })?;

        #[cfg(feature = "metrics")]
        counter!(invoker_metrics::REPLIES_SENT_TOTAL).increment(1);
        info!(
            conversation_id,
            chars = text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reply delivered"
        );
        Ok(())
    }
}

#[async_trait]
impl BatchInvoker for AgentInvoker {
    async fn invoke(&self, conversation_id: &str, context_document: &str) -> Result<()> {
        let result = match tokio::time::timeout(
            self.config.timeout,
            self.run_and_reply(conversation_id, context_document),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::InvokerTimeout {
                after: self.config.timeout,
            }),
        };

        if let Err(Error::InvokerTimeout { after }) = &result {
            #[cfg(feature = "metrics")]
            counter!(invoker_metrics::TIMEOUTS_TOTAL).increment(1);
            warn!(conversation_id, timeout_secs = after.as_secs(), "agent invocation timed out");
        }
        result
    }
}

/// Remove `<internal>…</internal>` sections and surrounding whitespace.
/// An unclosed `<internal>` hides everything after it.
#[must_use]
pub fn strip_internal(text: &str) -> String {
    let mut visible = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(INTERNAL_OPEN) {
        visible.push_str(&rest[..start]);
        let after_open = &rest[start + INTERNAL_OPEN.len()..];
        rest = match after_open.find(INTERNAL_CLOSE) {
            Some(end) => &after_open[end + INTERNAL_CLOSE.len()..],
            None => "",
        };
    }
    visible.push_str(rest);
    visible.trim().to_string()
}
