//! The repath engine: one endpoint's worker loops and their shared state.
//!
//! ```text
//!  ┌──────────────┐   egress   ┌───────────────┐   NIC
//!  │ ProbeEmitter │ ─────────▶ │               │ ◀────▶
//!  └──────────────┘            │ TransportPump │
//!  ┌──────────────┐ ◀───────── │               │
//!  │ ControlEngine│  ingress   └───────────────┘
//!  └──────────────┘ ─────────▶ (egress)
//! ```
//!
//! Every endpoint runs the pump and the processing loop; the sender also
//! runs the probe emitter.

mod active;
mod event;
mod probe;
mod processor;

pub use active::{ActivePath, ActiveState};
pub use event::{EngineEvent, SwitchCause};
pub use probe::ProbeEmitter;
pub use processor::ControlEngine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::EngineStats;
use crate::protocol::ControlCodec;
use crate::transport::{BufferPool, FrameQueue, Nic, TransportPump};
use crate::util::Clock;

/// Handles shared by the loops of one endpoint.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) codec: Arc<ControlCodec>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ingress: Arc<FrameQueue>,
    pub(crate) egress: Arc<FrameQueue>,
    pub(crate) stats: Arc<EngineStats>,
    pub(crate) active: ActivePath,
    pub(crate) events: broadcast::Sender<EngineEvent>,
}

/// One side of the link: configuration plus the state its loops share.
pub struct Endpoint {
    config: Config,
    pool: Arc<BufferPool>,
    shared: Shared,
    running: Arc<AtomicBool>,
}

impl Endpoint {
    /// Build an endpoint from a validated configuration.
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let engine = &config.engine;
        let pool = BufferPool::with_max(engine.pool_size);
        let codec = Arc::new(ControlCodec::new(
            config.envelope.clone(),
            Arc::clone(&pool),
            Arc::clone(&clock),
        ));
        let (events, _) = broadcast::channel(256);

        let shared = Shared {
            codec,
            clock,
            ingress: Arc::new(FrameQueue::new("ingress", engine.ring_size)),
            egress: Arc::new(FrameQueue::new("egress", engine.ring_size)),
            stats: Arc::new(EngineStats::new()),
            active: ActivePath::new(engine.initial_path),
            events,
        };

        Ok(Self {
            config,
            pool,
            shared,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pool the NIC should receive into.
    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.pool)
    }

    pub fn codec(&self) -> Arc<ControlCodec> {
        Arc::clone(&self.shared.codec)
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.shared.stats)
    }

    pub fn active_path(&self) -> ActivePath {
        self.shared.active.clone()
    }

    pub fn ingress(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.shared.ingress)
    }

    pub fn egress(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.shared.egress)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Create the processing loop. Each call starts from empty state.
    pub fn control_engine(&self) -> ControlEngine {
        ControlEngine::new(&self.config.engine, self.config.role, &self.shared)
    }

    /// Create the probe loop, if this role sends probes.
    pub fn probe_emitter(&self) -> Option<ProbeEmitter> {
        self.config.role.emits_probes().then(|| {
            ProbeEmitter::new(
                Arc::clone(&self.shared.codec),
                Arc::clone(&self.shared.egress),
                Arc::clone(&self.shared.stats),
            )
        })
    }

    /// Create the pump for `nic`.
    pub fn pump<N: Nic>(&self, nic: N) -> TransportPump<N> {
        TransportPump::new(
            nic,
            Arc::clone(&self.shared.ingress),
            Arc::clone(&self.shared.egress),
            Arc::clone(&self.shared.stats),
            self.config.engine.burst_size,
        )
    }

    /// Spawn every loop of this role on the current runtime.
    pub fn spawn<N: Nic + 'static>(&self, nic: N) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);

        let engine = &self.config.engine;
        let mut tasks = vec![
            tokio::spawn(self.pump(nic).run(self.running.clone(), engine.idle_backoff)),
            tokio::spawn(
                self.control_engine()
                    .run(self.running.clone(), engine.idle_backoff),
            ),
        ];

        if let Some(emitter) = self.probe_emitter() {
            tasks.push(tokio::spawn(
                emitter.run(self.running.clone(), engine.probe_interval),
            ));
        }

        info!(
            role = %self.config.role,
            initial_path = %engine.initial_path,
            loops = tasks.len(),
            "endpoint started"
        );
        tasks
    }

    /// Ask every spawned loop to finish.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.config.role)
            .field("active", &self.shared.active.get())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
