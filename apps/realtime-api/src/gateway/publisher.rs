//! Write-side adapter: turn a domain mutation into one best-effort channel publish.

use std::sync::Arc;

use super::events::{Event, EventName, ReauthorizeRequest, TargetRefs, REAUTHORIZE_CHANNEL};
use super::fanout::Transport;

/// Stateless and cheap to clone. Nothing here returns an error: a mutation has already
/// committed by the time it is published, and fan-out failures are only logged.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    strict: bool,
}

impl Publisher {
    /// With `strict`, unknown event names panic (development); otherwise they are
    /// logged and dropped.
    pub fn new(transport: Arc<dyn Transport>, strict: bool) -> Self {
        Self { transport, strict }
    }

    pub async fn publish(&self, name: EventName, refs: TargetRefs, payload: impl Into<String>) {
        let event = match Event::new(name, refs, payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(event = %name, error = %e, "event payload is not valid JSON, dropping");
                return;
            }
        };
        let body = match serde_json::to_string(&event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(event = %name, error = %e, "failed to encode event, dropping");
                return;
            }
        };
        if let Err(e) = self.transport.publish(name.channel(), body).await {
            tracing::warn!(event = %name, error = %e, "event publish failed");
        }
    }

    /// Publish by wire name, for callers that carry names as strings.
    pub async fn publish_named(&self, name: &str, refs: TargetRefs, payload: impl Into<String>) {
        match name.parse::<EventName>() {
            Ok(name) => self.publish(name, refs, payload).await,
            Err(unknown) if self.strict => panic!("{unknown}"),
            Err(unknown) => tracing::warn!(error = %unknown, "dropping event with unknown name"),
        }
    }

    /// Ask every broker to re-check its sockets, optionally only those of one user.
    pub async fn request_reauthorization(&self, user_id: Option<&str>) {
        let request = ReauthorizeRequest {
            user_id: user_id.map(str::to_string),
        };
        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode reauthorize request");
                return;
            }
        };
        if let Err(e) = self.transport.publish(REAUTHORIZE_CHANNEL, body).await {
            tracing::warn!(error = %e, "reauthorize request publish failed");
        }
    }
}
