use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context,
    courier_agents::{AgentRuntime, CommandRuntime},
    courier_channels::ChannelPlugin,
    courier_config::CourierConfig,
    courier_dispatch::{
        AgentInvoker, Batcher, BatcherConfig, DispatchArbiter, InvokerConfig, Normalizer,
    },
    courier_media::{LocalMediaStore, MediaResolver},
    courier_metrics::{MetricsRecorderConfig, init_metrics},
    courier_store::Store,
    courier_whatsapp::{ConnectedHook, WhatsAppPlugin},
    tokio::signal,
    tracing::{info, warn},
};

use crate::db_commands::open_store;

/// Wire the pipeline, start the transport, and serve until a shutdown signal.
pub async fn run(config: CourierConfig) -> anyhow::Result<()> {
    let listen = config
        .metrics
        .listen
        .as_deref()
        .map(str::parse::<SocketAddr>)
        .transpose()
        .context("metrics.listen is not a socket address")?;
    let _metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        listen,
        global_labels: config.metrics.labels.clone().into_iter().collect(),
    })?;

    let store: Arc<dyn Store> = Arc::new(open_store(&config).await?);

    let media_dir = config
        .media
        .dir
        .clone()
        .unwrap_or_else(|| courier_config::data_dir().join("media"));
    let media = LocalMediaStore::new(&media_dir);
    media.ensure_dir().await?;

    let runtime = CommandRuntime::from_config(&config.agent);
    // The runtime enforces its own timeout first; this outer bound also covers
    // termination and the reply acknowledgement.
    let invoke_timeout = runtime.timeout()
        + runtime.termination_grace()
        + Duration::from_secs(config.whatsapp.send_timeout_secs);

    let Pipeline {
        arbiter,
        mut whatsapp,
    } = wire(&config, store, Arc::new(runtime), Arc::new(media), invoke_timeout)?;

    if config.whatsapp.enabled {
        whatsapp
            .start_account(&config.whatsapp.account_id)
            .await
            .context("starting whatsapp transport")?;
    } else {
        warn!("whatsapp transport disabled, pending events stay queued until it is enabled");
    }

    info!(
        assistant = %config.dispatch.assistant_name,
        media_dir = %media_dir.display(),
        "courier running"
    );

    shutdown_signal().await;

    // In-flight dispatches still need the transport to deliver their replies.
    arbiter.shutdown().await;
    whatsapp.shutdown().await;
    info!("courier stopped");
    Ok(())
}

/// The dispatch core wired to the WhatsApp transport, not yet started.
pub(crate) struct Pipeline {
    pub arbiter: DispatchArbiter,
    pub whatsapp: WhatsAppPlugin,
}

/// Connect normaliser, batcher, invoker and arbiter to the transport. The
/// backlog sweep runs each time the account connects, so replies recovered
/// from a previous run always have a live outbound.
pub(crate) fn wire(
    config: &CourierConfig,
    store: Arc<dyn Store>,
    runtime: Arc<dyn AgentRuntime>,
    media: Arc<dyn MediaResolver>,
    invoke_timeout: Duration,
) -> anyhow::Result<Pipeline> {
    let whatsapp = WhatsAppPlugin::new(config.whatsapp.clone());
    let invoker = AgentInvoker::new(runtime, whatsapp.shared_outbound(), InvokerConfig {
        account_id: config.whatsapp.account_id.clone(),
        assistant_name: config.dispatch.assistant_name.clone(),
        reply_prefix: config.dispatch.reply_prefix(),
        timeout: invoke_timeout,
    });
    let batcher = Batcher::new(
        Arc::clone(&store),
        BatcherConfig::from_config(&config.dispatch, &config.media)?,
    )
    .with_media(media);
    let arbiter = DispatchArbiter::new(Arc::new(batcher), Arc::new(invoker));
    let normalizer = Normalizer::new(store, Arc::new(arbiter.clone()))
        .with_reply_prefix(config.dispatch.reply_prefix());
    let whatsapp = whatsapp
        .with_inbound_sink(Arc::new(normalizer))
        .with_connected_hook(recover_on_connect(arbiter.clone()));
    Ok(Pipeline { arbiter, whatsapp })
}

fn recover_on_connect(arbiter: DispatchArbiter) -> ConnectedHook {
    Arc::new(move |account_id: &str| {
        let arbiter = arbiter.clone();
        let account_id = account_id.to_string();
        tokio::spawn(async move {
            match arbiter.recover().await {
                Ok(recovered) => info!(account_id = %account_id, recovered, "backlog sweep done"),
                Err(e) => warn!(account_id = %account_id, error = %e, "backlog sweep failed"),
            }
        });
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use {
        super::*,
        courier_agents::{OUTPUT_END_MARKER, OUTPUT_START_MARKER},
        courier_common::types::ConversationPolicy,
        courier_config::WhatsAppConfig,
        courier_dispatch::DispatchState,
        courier_store::{ConversationStore, Event, EventStore, InMemoryStore},
        courier_whatsapp::GatewayMessage,
        futures::{SinkExt, StreamExt},
        tokio::{net::TcpListener, sync::mpsc},
        tokio_tungstenite::{accept_async, tungstenite::Message},
    };

    /// Sidecar that reports connected on login and acknowledges every send,
    /// forwarding the sent text to the test.
    async fn acking_sidecar() -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while let Some(Ok(Message::Text(frame))) = ws.next().await {
                let reply = match serde_json::from_str::<GatewayMessage>(&frame).unwrap() {
                    GatewayMessage::Login { account_id } => serde_json::json!({
                        "type": "connected",
                        "account_id": account_id,
                    }),
                    GatewayMessage::SendText {
                        request_id, text, ..
                    } => {
                        let _ = sent_tx.send(text);
                        serde_json::json!({
                            "type": "send_result",
                            "request_id": request_id,
                            "success": true,
                        })
                    },
                    _ => continue,
                };
                ws.send(Message::Text(reply.to_string().into()))
                    .await
                    .unwrap();
            }
        });
        (format!("ws://{addr}"), sent_rx)
    }

    fn replying_agent(text: &str) -> Arc<dyn AgentRuntime> {
        let script = format!(
            "cat >/dev/null; printf '%s\\n' '{OUTPUT_START_MARKER}' '{{\"status\":\"success\",\"result\":\"{text}\"}}' '{OUTPUT_END_MARKER}'"
        );
        Arc::new(
            CommandRuntime::new("sh")
                .with_args(["-c", script.as_str()])
                .with_timeout(Duration::from_secs(10)),
        )
    }

    fn pending_event() -> Event {
        Event {
            id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "4915550001@s.whatsapp.net".into(),
            sender_display_name: "Alice".into(),
            body: "still waiting on an answer".into(),
            timestamp: 1_000,
            is_self_authored: false,
            attachment_ref: None,
            media_path: None,
        }
    }

    #[tokio::test]
    async fn backlog_is_swept_once_the_transport_connects() {
        let (sidecar_url, mut sent) = acking_sidecar().await;
        let store = Arc::new(InMemoryStore::new());
        store
            .register("c1", None, &ConversationPolicy::default())
            .await
            .unwrap();
        store.upsert_event(&pending_event()).await.unwrap();

        let config = CourierConfig {
            whatsapp: WhatsAppConfig {
                sidecar_url,
                connect_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let media_dir = tempfile::tempdir().unwrap();
        let Pipeline {
            arbiter,
            mut whatsapp,
        } = wire(
            &config,
            store.clone(),
            replying_agent("hi"),
            Arc::new(LocalMediaStore::new(media_dir.path())),
            Duration::from_secs(20),
        )
        .unwrap();

        // Nothing is dispatched while the transport is down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(arbiter.state("c1"), DispatchState::Idle);
        assert_eq!(store.cursor("c1").await.unwrap(), 0);

        whatsapp.start_account("default").await.unwrap();
        let text = tokio::time::timeout(Duration::from_secs(10), sent.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "Andy: hi");

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.cursor("c1").await.unwrap() != 1_000 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        arbiter.shutdown().await;
        whatsapp.shutdown().await;
    }
}
