//! Client-side connection supervisor: reconnect-forever loop, reader and
//! writer halves, heartbeat ticker.
//!
//! Grounded on `lib_common/src/ingestors/yahoo_wss.rs`'s reconnect loop
//! shape and `original_source/go/client.go`'s `Reader`/`Writer`/`Dispatch`/
//! `Run`.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lib_common::message::WireMessage;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::redis_system::RedisSystem;

pub struct ClientSession {
    pub id: String,
    pub coordinator_url: String,
    pub heartbeat_interval: Duration,
    pub systems: HashMap<String, RedisSystem>,
}

impl ClientSession {
    pub fn new(id: impl Into<String>, coordinator_url: impl Into<String>, heartbeat_interval: Duration) -> Self {
        ClientSession {
            id: id.into(),
            coordinator_url: coordinator_url.into(),
            heartbeat_interval,
            systems: HashMap::new(),
        }
    }

    pub fn register_system(&mut self, system: RedisSystem) {
        self.systems.insert(system.name.clone(), system);
    }

    /// Runs the reconnect-forever loop until `shutdown` fires.
    pub async fn run(mut self, shutdown: tokio_graceful::ShutdownGuard) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.connect_and_serve(&shutdown) => {
                    match result {
                        Ok(()) => info!("connection to coordinator closed"),
                        Err(e) => warn!(error = %e, "connection to coordinator failed"),
                    }
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
        }
    }

    async fn connect_and_serve(&mut self, shutdown: &tokio_graceful::ShutdownGuard) -> anyhow::Result<()> {
        let (stream, _) = tokio_tungstenite::connect_async(&self.coordinator_url).await?;
        info!(url = %self.coordinator_url, "connected to coordinator");
        let (mut write, mut read) = stream.split();

        send(&mut write, &WireMessage::ClientStarted { id: self.id.clone() }).await?;

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = heartbeat.tick() => {
                    send(&mut write, &WireMessage::Heartbeat { id: self.id.clone() }).await?;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<WireMessage>(&text) {
                                Ok(msg) => {
                                    if let Some(reply) = self.handle_message(msg).await {
                                        send(&mut write, &reply).await?;
                                    }
                                }
                                Err(e) => warn!(error = %e, "dropping malformed message from coordinator"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "websocket error");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, message: WireMessage) -> Option<WireMessage> {
        match message {
            WireMessage::Ping { system_name, token } => {
                let system = self.systems.get_mut(&system_name)?;
                system.redeem_token(&token).then(|| WireMessage::Pong {
                    id: self.id.clone(),
                    system_name,
                    token,
                })
            }
            WireMessage::Invalidate { system_name, token } => {
                let system = self.systems.get_mut(&system_name)?;
                system.invalidate(&token).await.then(|| WireMessage::ClientInvalidated {
                    id: self.id.clone(),
                    system_name,
                    token,
                })
            }
            WireMessage::Reconfigure {
                system_name,
                token,
                server,
            } => {
                let system = self.systems.get_mut(&system_name)?;
                system.reconfigure(&token, &server);
                None
            }
            _ => None,
        }
    }
}

async fn send(
    write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    message: &WireMessage,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(message)?;
    write.send(Message::Text(text.into())).await?;
    Ok(())
}
