//! Demo host: drives root spans through the lifecycle hub the way a tracing
//! layer would, builds transaction events for them and ships every batch
//! through the configured transport.

use anyhow::{Context, Result};
use profweave_core::profiling::clock::unix_seconds;
use profweave_core::{
    Envelope, LifecycleHub, ProfilingClient, ProfilingIntegration, ProfilingMode, Scope,
    SpanHandle, TelemetryEvent, Transport,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Workload shape for one `run`
#[derive(Debug, Clone)]
pub struct Workload {
    pub duration: Duration,
    pub spans: usize,
    pub span_length: Duration,
}

/// Totals reported at the end of a run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub transactions: usize,
    pub profiles: usize,
}

pub struct DemoHost {
    hub: Arc<LifecycleHub>,
    integration: Arc<ProfilingIntegration>,
    transport: Arc<dyn Transport>,
}

impl DemoHost {
    pub fn new(client: Arc<ProfilingClient>) -> Result<Self> {
        let transport = Arc::clone(client.transport());
        let hub = LifecycleHub::new();
        let integration = ProfilingIntegration::setup(client, &hub)
            .context("Failed to set up profiling integration")?;
        Ok(Self {
            hub,
            integration,
            transport,
        })
    }

    pub fn mode(&self) -> ProfilingMode {
        self.integration.mode()
    }

    pub async fn run(&self, workload: &Workload) -> Result<RunSummary> {
        let deadline = Instant::now() + workload.duration;
        let mut summary = RunSummary::default();

        if self.mode() == ProfilingMode::Continuous {
            self.integration.profiler().start();
        }

        for index in 0..workload.spans {
            if Instant::now() >= deadline {
                debug!(completed = index, "Run duration reached, no more spans");
                break;
            }
            let attached = self.run_span(index, workload.span_length).await?;
            summary.transactions += 1;
            summary.profiles += attached;
        }

        tokio::time::sleep_until(deadline).await;
        self.integration.teardown();
        // Chunk flushes are detached; give them a moment before the runtime exits.
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!(
            transactions = summary.transactions,
            profiles = summary.profiles,
            "Demo run finished"
        );
        Ok(summary)
    }

    async fn run_span(&self, index: usize, length: Duration) -> Result<usize> {
        let root = SpanHandle::root(format!("demo-job-{index}"), Scope::new());
        let started = unix_seconds(SystemTime::now());
        self.hub.span_started(&root);

        let child = root.child("demo.step");
        self.hub.span_started(&child);
        tokio::time::sleep(length / 2).await;
        self.hub.span_ended(&child);
        tokio::time::sleep(length - length / 2).await;

        self.hub.span_ended(&root);
        let ended = unix_seconds(SystemTime::now());

        let mut event = TelemetryEvent::transaction(root.name.clone(), started, ended);
        root.scope.apply_to_event(&mut event);
        self.hub.preprocess_event(&mut event);

        let mut envelope = Envelope::from_events([event]);
        if let Err(e) = self.hub.before_envelope(&mut envelope) {
            warn!("Sending envelope without profiles: {}", e);
        }
        let attached = envelope.profiles().count();

        self.transport
            .send(envelope)
            .await
            .with_context(|| format!("Failed to send envelope for {}", root.name))?;
        Ok(attached)
    }
}
