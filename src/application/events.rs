//! Event emission system for real-time communication with presentation code
//!
//! The orchestrator publishes phase changes, progress snapshots and user
//! notices on a broadcast channel. Presentation code subscribes and renders;
//! it never mutates orchestrator state through this channel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::domain::{ProgressSnapshot, RunPhase};

/// User-facing notices. Each variant maps to one kind of toast/banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// No target matched the configuration; no run was started
    NothingToProcess,
    ConfirmationRequired { count: usize },
    /// Neutral: the user stopped the run, nothing was logged
    Cancelled { processed: usize },
    Completed { updated: usize, errors: usize },
    /// The run's own control flow failed
    RunFailed { message: String },
    /// The run finished but its log entry could not be stored
    PersistenceFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    PhaseChanged { from: RunPhase, to: RunPhase },
    Progress(ProgressSnapshot),
    Notice(Notice),
}

impl OrchestratorEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "bulk-phase-changed",
            Self::Progress(_) => "bulk-progress",
            Self::Notice(_) => "bulk-notice",
        }
    }
}

/// Event emitter for sending real-time updates to subscribers
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<OrchestratorEvent>,
    /// Whether event emission is enabled
    enabled: Arc<RwLock<bool>>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            enabled: Arc::new(RwLock::new(true)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Enable or disable event emission
    pub async fn set_enabled(&self, enabled: bool) {
        let mut enabled_guard = self.enabled.write().await;
        *enabled_guard = enabled;
        debug!("Event emission {}", if enabled { "enabled" } else { "disabled" });
    }

    pub async fn is_enabled(&self) -> bool {
        *self.enabled.read().await
    }

    pub async fn emit_event(&self, event: OrchestratorEvent) {
        if !self.is_enabled().await {
            return;
        }

        let event_name = event.event_name();
        // No subscribers is not an error; the run proceeds without listeners
        match self.sender.send(event) {
            Ok(receivers) => debug!("Emitted {} to {} subscribers", event_name, receivers),
            Err(_) => debug!("No subscribers for {}", event_name),
        }
    }

    pub async fn emit_phase_change(&self, from: RunPhase, to: RunPhase) {
        self.emit_event(OrchestratorEvent::PhaseChanged { from, to })
            .await;
    }

    pub async fn emit_progress(&self, snapshot: ProgressSnapshot) {
        self.emit_event(OrchestratorEvent::Progress(snapshot)).await;
    }

    pub async fn emit_notice(&self, notice: Notice) {
        self.emit_event(OrchestratorEvent::Notice(notice)).await;
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(crate::infrastructure::config::defaults::EVENT_BUFFER_SIZE)
    }
}
