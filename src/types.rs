//! Core data model shared by every pipeline stage (spec §3).
//!
//! All cross-component data is passed by value: no type here holds a
//! reference into another component's state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Idle-time bucket derived from elapsed idle seconds via fixed thresholds
/// {60, 180, 300} (spec §3, boundary cases in spec §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleLevel {
    Active,
    Short,
    Medium,
    Long,
}

impl IdleLevel {
    pub fn from_seconds(idle_seconds: u64) -> Self {
        if idle_seconds >= 300 {
            IdleLevel::Long
        } else if idle_seconds >= 180 {
            IdleLevel::Medium
        } else if idle_seconds >= 60 {
            IdleLevel::Short
        } else {
            IdleLevel::Active
        }
    }
}

/// An immutable fused context reading at one tick (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub active_app: Option<String>,
    pub window_title: Option<String>,
    pub idle_seconds: u64,
    pub idle_level: IdleLevel,
    pub recent_file_changes: u32,
    pub error_count: u64,
    pub latency_ms: u64,
    pub snapshot_count: u64,
}

impl Snapshot {
    /// True once idle time crosses the "short" idle threshold (spec §3
    /// idle-level thresholds), matching the original's idle flag — not
    /// merely "any nonzero idle time."
    pub fn is_idle(&self) -> bool {
        self.idle_seconds >= 60
    }

    /// "Interesting" context per spec §4.6 step 2 / the original
    /// `BehaviorController._is_interesting_context`.
    pub fn is_interesting(&self) -> bool {
        self.idle_seconds >= 180 || self.recent_file_changes > 3 || self.error_count > 0
    }
}

/// The semantic category of an Intent (spec §3). For v0.2 only
/// `SuggestHelp` and `None` are admissible — `Remind` and `Info` are kept as
/// variants so the wire/LLM contract can round-trip them, but the proposer
/// normalizes every occurrence of either down to `None` (spec §4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    SuggestHelp,
    Remind,
    Info,
    None,
}

impl IntentKind {
    /// Normalize a free-text kind (from the LLM response or elsewhere) to
    /// the admissible v0.2 subset. Only a case-insensitive match on
    /// "suggest_help" or "help" survives; everything else becomes `None`
    /// (spec §4.2: "remind & info" are locked out for v0.2).
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("suggest_help") || lower.contains("help") {
            IntentKind::SuggestHelp
        } else {
            IntentKind::None
        }
    }
}

/// A proposal from the Intent Proposer (spec §3).
///
/// `reasoning` is a confidentiality invariant: it must never leak past C2's
/// boundary toward C4, the UI broadcaster, or the event-log sink. Builders
/// that construct an `Intent` meant to cross that boundary must call
/// [`Intent::strip_reasoning`] first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: f64,
    pub message: String,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl Intent {
    pub fn none(now: DateTime<Utc>) -> Self {
        Self {
            kind: IntentKind::None,
            confidence: 0.0,
            message: String::new(),
            reasoning: String::new(),
            created_at: now,
        }
    }

    /// Clamp confidence into [0.0, 1.0].
    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }

    /// Clear the internal reasoning field. Must be called before an Intent
    /// crosses the C2 boundary toward C3/C4/C5/the event log.
    pub fn strip_reasoning(mut self) -> Self {
        self.reasoning.clear();
        self
    }
}

/// Result of Decision Gate evaluation (spec §3). Ephemeral — never stored
/// beyond the tick that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub approved: bool,
    pub intent: Intent,
    pub reason: String,
    pub earliest_next_allowed: Option<DateTime<Utc>>,
}

impl Decision {
    pub fn approved(intent: Intent) -> Self {
        Self {
            approved: true,
            intent,
            reason: String::new(),
            earliest_next_allowed: None,
        }
    }

    pub fn rejected(
        intent: Intent,
        reason: impl Into<String>,
        earliest_next_allowed: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            approved: false,
            intent,
            reason: reason.into(),
            earliest_next_allowed,
        }
    }
}
