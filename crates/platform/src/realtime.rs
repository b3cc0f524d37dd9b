//! WebSocket change feed: joins a topic filtered to one user's
//! bookmarks and forwards any row-change frame as a `ChangeEvent`.
//! Payload contents are never trusted; consumers re-fetch instead.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{domain::UserId, protocol::RealtimeFrame};
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::{ChangeFeed, ChangeSubscription};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const CHANGE_EVENT_CAPACITY: usize = 64;

pub struct WsChangeFeed {
    base_url: String,
    anon_key: String,
}

impl WsChangeFeed {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }
}

/// Derives the realtime socket URL from the platform's HTTP base URL.
fn change_socket_url(base_url: &str, anon_key: &str) -> Result<String> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("platform url must start with http:// or https://"));
    };
    let ws_base = ws_base.trim_end_matches('/');
    Ok(format!(
        "{ws_base}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0"
    ))
}

fn topic_for_user(user_id: &UserId) -> String {
    format!("realtime:public:bookmarks:user_id=eq.{user_id}")
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn open(&self, user_id: &UserId) -> Result<ChangeSubscription> {
        let ws_url = change_socket_url(&self.base_url, &self.anon_key)?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect change socket: {ws_url}"))?;
        let (mut writer, mut reader) = ws_stream.split();

        let topic = topic_for_user(user_id);
        let join = serde_json::to_string(&RealtimeFrame::join(topic.clone()))?;
        writer
            .send(Message::Text(join))
            .await
            .context("failed to join change topic")?;
        debug!(topic, "change subscription opened");

        let (events, _) = broadcast::channel(CHANGE_EVENT_CAPACITY);
        let events_tx = events.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        // Tell the server we are leaving the topic
                        // before the socket goes away.
                        if let Ok(frame) = serde_json::to_string(&RealtimeFrame::leave(topic.clone())) {
                            let _ = writer.send(Message::Text(frame)).await;
                        }
                        break;
                    }
                    _ = heartbeat.tick() => {
                        let Ok(frame) = serde_json::to_string(&RealtimeFrame::heartbeat()) else {
                            continue;
                        };
                        if writer.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    msg = reader.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<RealtimeFrame>(&text) {
                                Ok(frame) => {
                                    if let Some(event) = frame.as_change_event() {
                                        let _ = events_tx.send(event);
                                    }
                                }
                                Err(err) => {
                                    warn!("ignoring malformed realtime frame: {err}");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("change socket receive failed: {err}");
                            break;
                        }
                    }
                }
            }
            debug!("change subscription reader stopped");
        });

        Ok(ChangeSubscription::new(events, Some(task)).with_shutdown(shutdown_tx))
    }
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
