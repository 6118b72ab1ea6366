//! Legacy stdout bridge.
//!
//! Writes each bus event as one JSON object per line with exactly the fields
//! `{type, id, name, message, data}`, the wire format the desktop
//! subprocess integration has always consumed.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::warn;

use super::Subscription;
use crate::store::models::Event;

#[derive(Serialize)]
struct LegacyEvent {
    #[serde(rename = "type")]
    event_type: String,
    id: String,
    name: String,
    message: String,
    data: HashMap<String, Value>,
}

impl From<Event> for LegacyEvent {
    fn from(event: Event) -> Self {
        LegacyEvent {
            event_type: event.event_type,
            id: event.id,
            name: event.name,
            message: event.message,
            data: event.data,
        }
    }
}

/// Pumps a subscription into a writer in the legacy line-JSON format.
pub struct LegacyBridge {
    task: JoinHandle<()>,
}

impl LegacyBridge {
    /// Start pumping. The bridge runs until the subscription ends (bus
    /// shutdown) or the bridge is closed.
    pub fn spawn(
        mut subscription: Subscription,
        mut writer: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let line = match serde_json::to_vec(&LegacyEvent::from(event)) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("legacy bridge: encode event: {e}");
                        continue;
                    }
                };
                if writer.write_all(&line).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                {
                    break;
                }
                let _ = writer.flush().await;
            }
        });
        Self { task }
    }

    /// Stop the bridge and its subscription.
    pub fn close(self) {
        self.task.abort();
    }
}
