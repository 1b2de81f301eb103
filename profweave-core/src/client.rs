//! The collaborators a profiling integration is attached to.

use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::capture::CaptureEngine;
use crate::config::ClientOptions;
use crate::telemetry::{Envelope, Scope};
use crate::transport::Transport;

/// Bundles options, the capture engine, the transport and the current scope.
pub struct ProfilingClient {
    options: ClientOptions,
    engine: Arc<dyn CaptureEngine>,
    transport: Arc<dyn Transport>,
    scope: Scope,
}

impl ProfilingClient {
    pub fn new(
        options: ClientOptions,
        engine: Arc<dyn CaptureEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            options,
            engine,
            transport,
            scope: Scope::new(),
        }
    }

    /// Use `scope` as the current (propagation) scope.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn engine(&self) -> &Arc<dyn CaptureEngine> {
        &self.engine
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Hand `envelope` to the transport without waiting for the result.
    ///
    /// Failures are logged and never retried. Without a runtime the envelope
    /// is dropped.
    pub fn send_detached(&self, envelope: Envelope) {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                "No async runtime available; dropping envelope {}",
                envelope.envelope_id
            );
            return;
        };

        let transport = Arc::clone(&self.transport);
        handle.spawn(async move {
            let envelope_id = envelope.envelope_id.clone();
            match transport.send(envelope).await {
                Ok(()) => trace!("Sent envelope {} via {}", envelope_id, transport.name()),
                Err(e) => warn!(
                    "Failed to send envelope {} via {}: {:#}",
                    envelope_id,
                    transport.name(),
                    e
                ),
            }
        });
    }
}

impl std::fmt::Debug for ProfilingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilingClient")
            .field("options", &self.options)
            .field("transport", &self.transport.name())
            .finish()
    }
}
