use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    courier_channels::{ChannelOutbound, Error, Result},
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{channels as channel_metrics, counter, labels};

use crate::{sidecar::SidecarHandle, types::GatewayMessage};

/// Outbound sender; a send completes once the sidecar acknowledges it.
#[derive(Clone)]
pub struct WhatsAppOutbound {
    sidecar: Arc<RwLock<Option<SidecarHandle>>>,
    send_timeout: Duration,
}

impl WhatsAppOutbound {
    pub fn new(sidecar: Arc<RwLock<Option<SidecarHandle>>>, send_timeout: Duration) -> Self {
        Self {
            sidecar,
            send_timeout,
        }
    }

    async fn handle(&self) -> Result<SidecarHandle> {
        self.sidecar
            .read()
            .await
            .clone()
            .filter(SidecarHandle::is_connected)
            .ok_or_else(|| Error::unavailable("whatsapp sidecar not connected"))
    }

    async fn send_and_wait(&self, account_id: &str, to: &str, text: &str) -> Result<()> {
        let handle = self.handle().await?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let ack = handle.expect_ack(&request_id);

        let msg = GatewayMessage::SendText {
            request_id: request_id.clone(),
            account_id: account_id.to_string(),
            to: to.to_string(),
            text: text.to_string(),
        };
        if let Err(e) = handle.send(&msg) {
            handle.cancel_ack(&request_id);
            return Err(Error::unavailable(e));
        }

        match tokio::time::timeout(self.send_timeout, ack).await {
            Err(_) => {
                handle.cancel_ack(&request_id);
                Err(Error::timeout("send_text"))
            },
            Ok(Err(_)) => Err(Error::unavailable(
                "sidecar connection closed before acknowledgement",
            )),
            Ok(Ok(ack)) if ack.success => {
                debug!(account_id, to, request_id, message_id = ?ack.message_id, "message sent");
                Ok(())
            },
            Ok(Ok(ack)) => Err(Error::rejected(
                "send_text",
                ack.error.unwrap_or_else(|| "no reason given".into()),
            )),
        }
    }
}

#[async_trait]
impl ChannelOutbound for WhatsAppOutbound {
    async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<()> {
        let result = self.send_and_wait(account_id, to, text).await;
        match &result {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!(channel_metrics::MESSAGES_SENT_TOTAL, labels::CHANNEL => "whatsapp")
                    .increment(1);
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(channel_metrics::ERRORS_TOTAL, labels::CHANNEL => "whatsapp")
                    .increment(1);
                warn!(account_id, to, error = %e, "whatsapp send failed");
            },
        }
        result
    }

    async fn send_typing(&self, account_id: &str, to: &str) -> Result<()> {
        let handle = self.handle().await?;
        handle
            .send(&GatewayMessage::SendTyping {
                account_id: account_id.to_string(),
                to: to.to_string(),
            })
            .map_err(Error::unavailable)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{sidecar::connect, types::SidecarMessage},
        futures::StreamExt,
        tokio::net::TcpListener,
    };

    /// Accepts a connection and never acknowledges anything.
    async fn silent_sidecar() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while ws.next().await.is_some() {}
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn unacknowledged_send_times_out() {
        let (handle, _closed) = connect(&silent_sidecar().await, Arc::new(|_: SidecarMessage| {}))
            .await
            .unwrap();
        let outbound = WhatsAppOutbound::new(
            Arc::new(RwLock::new(Some(handle))),
            Duration::from_millis(50),
        );
        let err = outbound
            .send_text("default", "4915550001@s.whatsapp.net", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn send_without_connection_is_unavailable() {
        let outbound = WhatsAppOutbound::new(Arc::new(RwLock::new(None)), Duration::from_secs(1));
        let err = outbound
            .send_text("default", "4915550001@s.whatsapp.net", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }
}
