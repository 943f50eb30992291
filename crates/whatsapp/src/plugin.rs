//! WhatsApp Web channel plugin implementation.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock as StdRwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    courier_channels::{
        ChannelHealthSnapshot, ChannelOutbound, ChannelPlugin, ChannelStatus, Error,
        InboundAttachment, InboundEvent, InboundSink, Result,
    },
    courier_common::time::secs_to_ms,
    courier_config::WhatsAppConfig,
    tokio::{
        sync::{RwLock, mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{channels as channel_metrics, counter, labels};

use crate::{
    outbound::WhatsAppOutbound,
    sidecar::{MessageCallback, SidecarHandle, connect_with_retry},
    state::{AccountState, AccountStateMap, mark_all_disconnected, update_state},
    types::{ConnectionState, GatewayMessage, SidecarMessage},
};

/// Called with the account id each time a known account reports connected,
/// including after a sidecar reconnect.
pub type ConnectedHook = Arc<dyn Fn(&str) + Send + Sync>;

/// WhatsApp Web channel plugin (via Baileys sidecar).
pub struct WhatsAppPlugin {
    config: WhatsAppConfig,
    accounts: AccountStateMap,
    outbound: WhatsAppOutbound,
    sidecar: Arc<RwLock<Option<SidecarHandle>>>,
    sink: Option<Arc<dyn InboundSink>>,
    on_connected: Option<ConnectedHook>,
    tasks: Vec<JoinHandle<()>>,
}

impl WhatsAppPlugin {
    pub fn new(config: WhatsAppConfig) -> Self {
        let sidecar: Arc<RwLock<Option<SidecarHandle>>> = Arc::new(RwLock::new(None));
        let outbound = WhatsAppOutbound::new(
            Arc::clone(&sidecar),
            Duration::from_secs(config.send_timeout_secs),
        );
        Self {
            config,
            accounts: Arc::new(StdRwLock::new(HashMap::new())),
            outbound,
            sidecar,
            sink: None,
            on_connected: None,
            tasks: Vec::new(),
        }
    }

    /// Where inbound messages go. Without a sink they are logged and dropped.
    pub fn with_inbound_sink(mut self, sink: Arc<dyn InboundSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run `hook` whenever an account becomes able to send.
    pub fn with_connected_hook(mut self, hook: ConnectedHook) -> Self {
        self.on_connected = Some(hook);
        self
    }

    /// Get a shared reference to the outbound sender.
    pub fn shared_outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(self.outbound.clone())
    }

    pub fn account_ids(&self) -> Vec<String> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.keys().cloned().collect()
    }

    pub fn connection_state(&self, account_id: &str) -> Option<ConnectionState> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account_id).map(|s| s.connection_state.clone())
    }

    /// Current QR code for an account waiting to be linked.
    pub fn qr_code(&self, account_id: &str) -> Option<String> {
        match self.connection_state(account_id)? {
            ConnectionState::QrReceived(qr) => Some(qr),
            _ => None,
        }
    }

    /// Connect to the sidecar unless already connected. Inbound frames are
    /// delivered to the sink in arrival order by one task.
    async fn ensure_sidecar_connected(&mut self) -> Result<()> {
        if let Some(handle) = self.sidecar.read().await.as_ref()
            && handle.is_connected()
        {
            return Ok(());
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let accounts = Arc::clone(&self.accounts);
        let on_connected = self.on_connected.clone();
        let callback: MessageCallback = Arc::new(move |msg| {
            handle_sidecar_message(msg, &accounts, &inbound_tx, on_connected.as_ref());
        });

        let (handle, disconnect_rx) = connect_with_retry(
            &self.config.sidecar_url,
            Arc::clone(&callback),
            self.config.connect_attempts,
        )
        .await
        .map_err(Error::unavailable)?;
        *self.sidecar.write().await = Some(handle);

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.tasks
            .push(tokio::spawn(deliver_inbound(inbound_rx, self.sink.clone())));
        self.tasks.push(tokio::spawn(supervise(
            self.config.sidecar_url.clone(),
            callback,
            Arc::clone(&self.sidecar),
            Arc::clone(&self.accounts),
            disconnect_rx,
        )));
        Ok(())
    }

    /// Drop the sidecar connection and stop background tasks.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        *self.sidecar.write().await = None;
        mark_all_disconnected(&self.accounts);
    }
}

#[async_trait]
impl ChannelPlugin for WhatsAppPlugin {
    fn id(&self) -> &str {
        "whatsapp"
    }

    fn name(&self) -> &str {
        "WhatsApp Web"
    }

    async fn start_account(&mut self, account_id: &str) -> Result<()> {
        info!(account_id, url = %self.config.sidecar_url, "starting whatsapp account");
        {
            let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
            accounts.insert(account_id.to_string(), AccountState::new(account_id));
        }

        if let Err(e) = self.ensure_sidecar_connected().await {
            warn!(account_id, error = %e, "failed to connect to sidecar");
            return Err(e);
        }

        let sidecar = self.sidecar.read().await;
        if let Some(handle) = sidecar.as_ref() {
            // Set before sending: the sidecar may answer before `send` returns.
            update_state(&self.accounts, account_id, ConnectionState::WaitingForQr);
            handle
                .send(&GatewayMessage::Login {
                    account_id: account_id.to_string(),
                })
                .map_err(Error::unavailable)?;
        }
        Ok(())
    }

    async fn stop_account(&mut self, account_id: &str) -> Result<()> {
        let removed = {
            let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
            accounts.remove(account_id).is_some()
        };
        if !removed {
            return Err(Error::unknown_account(account_id));
        }

        if let Some(handle) = self.sidecar.read().await.as_ref() {
            let _ = handle.send(&GatewayMessage::Logout {
                account_id: account_id.to_string(),
            });
        }
        info!(account_id, "stopped whatsapp account");
        Ok(())
    }

    fn outbound(&self) -> Option<&dyn ChannelOutbound> {
        Some(&self.outbound)
    }

    fn status(&self) -> Option<&dyn ChannelStatus> {
        Some(self)
    }
}

#[async_trait]
impl ChannelStatus for WhatsAppPlugin {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot> {
        let state = self
            .connection_state(account_id)
            .ok_or_else(|| Error::unknown_account(account_id))?;
        let (connected, details) = match state {
            ConnectionState::Connected { phone_number } => {
                (true, phone_number.map(|p| format!("phone: {p}")))
            },
            ConnectionState::QrReceived(_) => (false, Some("waiting for QR code scan".into())),
            ConnectionState::WaitingForQr => (false, Some("generating QR code".into())),
            ConnectionState::Disconnected => (false, Some("disconnected".into())),
        };
        Ok(ChannelHealthSnapshot {
            connected,
            account_id: account_id.to_string(),
            details,
        })
    }
}

/// Reconnect after the sidecar drops, logging every known account back in.
async fn supervise(
    url: String,
    callback: MessageCallback,
    sidecar: Arc<RwLock<Option<SidecarHandle>>>,
    accounts: AccountStateMap,
    mut disconnect_rx: oneshot::Receiver<()>,
) {
    loop {
        let _ = (&mut disconnect_rx).await;
        mark_all_disconnected(&accounts);
        warn!(url = %url, "sidecar connection lost, reconnecting");

        let (handle, next_rx) = loop {
            match connect_with_retry(&url, Arc::clone(&callback), 10).await {
                Ok(conn) => break conn,
                Err(e) => warn!(url = %url, error = %e, "sidecar still unreachable"),
            }
        };

        let account_ids: Vec<String> = {
            let accounts = accounts.read().unwrap_or_else(|e| e.into_inner());
            accounts.keys().cloned().collect()
        };
        for account_id in account_ids {
            update_state(&accounts, &account_id, ConnectionState::WaitingForQr);
            if let Err(e) = handle.send(&GatewayMessage::Login {
                account_id: account_id.clone(),
            }) {
                warn!(account_id = %account_id, error = %e, "re-login failed");
            }
        }
        *sidecar.write().await = Some(handle);
        disconnect_rx = next_rx;
    }
}

/// Forward inbound events to the sink one at a time.
async fn deliver_inbound(
    mut inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
    sink: Option<Arc<dyn InboundSink>>,
) {
    while let Some(event) = inbound_rx.recv().await {
        let Some(sink) = sink.as_ref() else {
            debug!(chat_id = %event.chat_id, "no inbound sink, dropping message");
            continue;
        };
        let chat_id = event.chat_id.clone();
        let message_id = event.message_id.clone();
        if let Err(e) = sink.deliver(event).await {
            #[cfg(feature = "metrics")]
            counter!(channel_metrics::ERRORS_TOTAL, labels::CHANNEL => "whatsapp").increment(1);
            warn!(chat_id = %chat_id, message_id = %message_id, error = %e, "inbound message not recorded");
        }
    }
}

/// Handle a frame from the sidecar.
fn handle_sidecar_message(
    msg: SidecarMessage,
    accounts: &AccountStateMap,
    inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
    on_connected: Option<&ConnectedHook>,
) {
    match msg {
        SidecarMessage::Qr { account_id, qr } => {
            debug!(account_id, "received QR code from sidecar");
            update_state(accounts, &account_id, ConnectionState::QrReceived(qr));
        },
        SidecarMessage::Connected {
            account_id,
            phone_number,
        } => {
            info!(account_id, ?phone_number, "whatsapp connected");
            let known = update_state(accounts, &account_id, ConnectionState::Connected {
                phone_number,
            });
            if known && let Some(hook) = on_connected {
                hook(&account_id);
            }
        },
        SidecarMessage::Disconnected { account_id, reason } => {
            warn!(account_id, reason, "whatsapp disconnected");
            update_state(accounts, &account_id, ConnectionState::Disconnected);
        },
        SidecarMessage::LoggedOut { account_id } => {
            info!(account_id, "whatsapp logged out");
            update_state(accounts, &account_id, ConnectionState::Disconnected);
        },
        SidecarMessage::Error { account_id, error } => {
            warn!(?account_id, error, "sidecar error");
        },
        SidecarMessage::SendResult { request_id, .. } => {
            debug!(request_id, "send result outside the ack path");
        },
        inbound @ SidecarMessage::InboundMessage { .. } => {
            let Some(event) = to_inbound_event(inbound) else {
                return;
            };
            let known = accounts
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains_key(&event.account_id);
            if !known {
                debug!(account_id = %event.account_id, "message for unknown account ignored");
                return;
            }
            #[cfg(feature = "metrics")]
            counter!(channel_metrics::MESSAGES_RECEIVED_TOTAL, labels::CHANNEL => "whatsapp")
                .increment(1);
            debug!(
                chat_id = %event.chat_id,
                message_id = %event.message_id,
                from_me = event.from_me,
                "received inbound message"
            );
            let _ = inbound_tx.send(event);
        },
    }
}

/// Map a sidecar inbound frame to the transport-neutral event.
pub fn to_inbound_event(msg: SidecarMessage) -> Option<InboundEvent> {
    let SidecarMessage::InboundMessage {
        account_id,
        message_id,
        chat_jid,
        sender_jid,
        sender_name,
        from_me,
        is_group,
        chat_name,
        body,
        media_ref,
        media_type,
        timestamp,
    } = msg
    else {
        return None;
    };
    Some(InboundEvent {
        account_id,
        chat_id: chat_jid,
        message_id,
        sender_id: sender_jid,
        sender_name,
        body,
        timestamp_ms: secs_to_ms(timestamp),
        from_me,
        is_group,
        chat_name,
        attachment: media_ref.map(|reference| InboundAttachment {
            reference,
            mime_type: media_type,
        }),
    })
}
