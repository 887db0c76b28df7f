//! Orchestrator (C6, spec §4.6).
//!
//! Owns the tick loop: C1 -> C2 -> C3 -> C4 -> C5, plus two inbound routes
//! (user-response, focus-mode). Implemented with `tokio::select!` over the
//! tick interval, the cancellation token, and the inbound-event channels —
//! directly the shape of the teacher's `ProcessingLoop::run`.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcast::{Broadcaster, InboundEvent};
use crate::config::OrbitConfig;
use crate::context::ContextAggregator;
use crate::decision::DecisionGate;
use crate::fsm::{map_user_action, BehaviorFsm, Event, FsmNotification};
use crate::intent::IntentProposer;
use crate::storage::{EventLog, EventRecord};
use crate::types::IntentKind;

/// External commands routed into the orchestrator outside the tick cadence
/// (spec §4.6 "focus-mode route").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    EnterFocusMode,
    ExitFocusMode,
}

/// A cheap, cloneable handle for sending control commands into a running
/// orchestrator from elsewhere in the process (CLI, signal handler, tray menu).
#[derive(Clone)]
pub struct OrchestratorHandle {
    control_tx: mpsc::Sender<ControlCommand>,
}

impl OrchestratorHandle {
    pub async fn enter_focus_mode(&self) {
        let _ = self.control_tx.send(ControlCommand::EnterFocusMode).await;
    }

    pub async fn exit_focus_mode(&self) {
        let _ = self.control_tx.send(ControlCommand::ExitFocusMode).await;
    }
}

/// Session statistics accumulated across the run, mirroring the teacher's
/// `PipelineStats` (logged once at shutdown, spec §4.6 supplement).
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub iterations: u64,
    pub intents_generated: u64,
    pub intents_approved: u64,
    pub intents_rejected: u64,
    pub errors: u64,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ORBIT session: {} ticks, {} intents ({} approved, {} rejected), {} errors",
            self.iterations,
            self.intents_generated,
            self.intents_approved,
            self.intents_rejected,
            self.errors
        )
    }
}

pub struct Orchestrator {
    context: ContextAggregator,
    proposer: IntentProposer,
    gate: DecisionGate,
    fsm: BehaviorFsm,
    fsm_notifications: mpsc::Receiver<FsmNotification>,
    broadcaster: Broadcaster,
    inbound_rx: mpsc::Receiver<InboundEvent>,
    control_rx: mpsc::Receiver<ControlCommand>,
    control_tx: mpsc::Sender<ControlCommand>,
    event_log: Option<EventLog>,
    tick_interval: Duration,
    stats: RunStats,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: ContextAggregator,
        proposer: IntentProposer,
        gate: DecisionGate,
        fsm: BehaviorFsm,
        fsm_notifications: mpsc::Receiver<FsmNotification>,
        broadcaster: Broadcaster,
        inbound_rx: mpsc::Receiver<InboundEvent>,
        event_log: Option<EventLog>,
        tick_interval: Duration,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(8);
        Self {
            context,
            proposer,
            gate,
            fsm,
            fsm_notifications,
            broadcaster,
            inbound_rx,
            control_rx,
            control_tx,
            event_log,
            tick_interval,
            stats: RunStats::default(),
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            control_tx: self.control_tx.clone(),
        }
    }

    /// Run the tick loop until `cancel` fires. Returns final session
    /// statistics (spec §4.6 supplement: logged once at shutdown).
    pub async fn run(mut self, cancel: CancellationToken) -> RunStats {
        info!("{}", "=".repeat(60));
        info!("Starting ORBIT orchestrator");
        info!("{}", "=".repeat(60));

        let mut ticker = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }

                _ = ticker.tick() => {
                    self.stats.iterations += 1;
                    if let Err(e) = self.run_tick().await {
                        self.stats.errors += 1;
                        error!(error = %e, "error in tick, continuing");
                    }
                }

                Some(event) = self.inbound_rx.recv() => {
                    self.handle_inbound(event).await;
                }

                Some(command) = self.control_rx.recv() => {
                    self.handle_control(command);
                }

                Some(notification) = self.fsm_notifications.recv() => {
                    self.handle_fsm_notification(notification).await;
                }
            }
        }

        info!("{}", "=".repeat(60));
        info!("ORBIT session statistics");
        info!("{}", self.stats);
        info!("{}", "=".repeat(60));
        info!("ORBIT stopped");

        self.stats
    }

    /// One tick: C1 -> C2 -> C3 -> C4 -> C5 (spec §4.6).
    async fn run_tick(&mut self) -> Result<(), anyhow::Error> {
        let snapshot = self.context.snapshot();

        if snapshot.is_interesting() && self.fsm.current_state() == crate::fsm::State::Idle {
            self.fsm.trigger(Event::ContextChanged, None);
        }

        self.fsm.tick();

        if self.fsm.current_state() == crate::fsm::State::Observing {
            let intent = self.proposer.propose(&snapshot).await;

            if intent.kind != IntentKind::None {
                self.stats.intents_generated += 1;
                let age_seconds = (Utc::now() - intent.created_at).num_seconds();
                let decision = self.gate.evaluate(intent, &snapshot, age_seconds);

                if decision.approved {
                    self.stats.intents_approved += 1;
                    self.fsm.trigger(Event::IntentApproved, Some(decision.intent));
                } else {
                    self.stats.intents_rejected += 1;
                    warn!(reason = %decision.reason, "intent rejected");
                }
            }
        }

        if let Some(log) = &self.event_log {
            let record = EventRecord {
                timestamp: snapshot.timestamp,
                event_type: "context_snapshot".to_string(),
                app_name: snapshot.active_app.clone(),
                window_title: snapshot.window_title.clone(),
                idle_time: snapshot.idle_seconds,
                file_changes: snapshot.recent_file_changes,
                error_count: snapshot.error_count,
                data: serde_json::json!({ "fsm_state": self.fsm.current_state() }),
            };
            if let Err(e) = log.append(&record) {
                warn!(error = %e, "failed to persist context snapshot to event log");
            }
        }

        Ok(())
    }

    async fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::UserAction(payload) => {
                let Some(fsm_event) = map_user_action(&payload.action) else {
                    warn!(action = %payload.action, "unrecognized user action, ignoring");
                    return;
                };

                if fsm_event == Event::UserDismiss {
                    self.gate.record_dismiss();
                    if let Some(intent) = self.fsm.held_intent() {
                        self.gate.record_kind_dismiss(intent.kind);
                    }
                }

                self.fsm.trigger(fsm_event, None);
            }
            InboundEvent::Pong(id) => {
                self.broadcaster.record_pong(id).await;
            }
        }
    }

    fn handle_control(&mut self, command: ControlCommand) {
        let event = match command {
            ControlCommand::EnterFocusMode => Event::EnterFocusMode,
            ControlCommand::ExitFocusMode => Event::ExitFocusMode,
        };
        self.fsm.trigger(event, None);
    }

    async fn handle_fsm_notification(&self, notification: FsmNotification) {
        match notification {
            FsmNotification::UiUpdate(update) => {
                self.broadcaster.publish(update).await;
            }
            FsmNotification::Transitioned { from, to, event } => {
                info!(?from, ?to, ?event, "FSM transition");
            }
        }
    }
}

/// Build the fixed set of components an orchestrator needs from loaded
/// configuration, wiring thresholds/timeouts the way `main.rs` does at
/// startup.
pub fn tick_interval_from_config(config: &OrbitConfig) -> Duration {
    config.polling_interval()
}
