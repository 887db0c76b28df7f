//! ORBIT: ambient desktop agent decision pipeline
//!
//! A four-stage pipeline (Context Aggregator -> Intent Proposer -> Decision
//! Gate -> Behavior FSM) plus an orchestrator tick loop and a UI broadcast
//! layer.
//!
//! ## Architecture
//!
//! - **Context Aggregator (C1)**: fuses monitor adapters into a Snapshot
//! - **Intent Proposer (C2)**: LLM-primary or variety-pool fallback proposal
//! - **Decision Gate (C3)**: confidence decay, cooldowns, spam filtering
//! - **Behavior FSM (C4)**: six-state UI-facing state machine
//! - **UI Broadcast (C5)**: websocket fan-out to UI subscribers
//! - **Orchestrator (C6)**: the tick loop threading the above together

pub mod broadcast;
pub mod config;
pub mod context;
pub mod decision;
pub mod fsm;
pub mod intent;
pub mod llm;
pub mod monitors;
pub mod orchestrator;
pub mod storage;
pub mod types;

pub use config::OrbitConfig;
pub use orchestrator::{Orchestrator, OrchestratorHandle, RunStats};
pub use types::{Decision, Intent, IntentKind, Snapshot};
