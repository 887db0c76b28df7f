//! Decision Gate (C3, spec §4.3).
//!
//! Accepts or rejects a proposed [`Intent`] given the current cooldowns,
//! spam budget, and dismissal-driven confidence decay. Ledgers here are
//! touched only from the orchestrator's tick task (spec §5).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::config::DecisionThresholds;
use crate::types::{Decision, Intent, IntentKind, Snapshot};

/// Per-kind last-popup timestamp table, global last-popup timestamp, and
/// last-dismissal timestamp (spec §3 "Cooldown Ledger").
#[derive(Debug, Default)]
struct CooldownLedger {
    last_popup_by_kind: HashMap<IntentKind, DateTime<Utc>>,
    last_popup_global: Option<DateTime<Utc>>,
    last_dismiss: Option<DateTime<Utc>>,
}

impl CooldownLedger {
    fn record_popup(&mut self, kind: IntentKind, now: DateTime<Utc>) {
        self.last_popup_by_kind.insert(kind, now);
        self.last_popup_global = Some(now);
    }

    fn record_dismiss(&mut self, now: DateTime<Utc>) {
        self.last_dismiss = Some(now);
    }

    fn clear(&mut self) {
        self.last_popup_by_kind.clear();
        self.last_popup_global = None;
        self.last_dismiss = None;
    }
}

/// Append-only ring of popup timestamps within the last rolling hour, plus a
/// per-kind ring of recent popup timestamps (spec §3 "Spam Ledger").
/// Trimmed on every query.
#[derive(Debug, Default)]
struct SpamLedger {
    all: VecDeque<DateTime<Utc>>,
    by_kind: HashMap<IntentKind, VecDeque<DateTime<Utc>>>,
}

const SPAM_WINDOW_SECS: i64 = 3600;

impl SpamLedger {
    fn trim(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(SPAM_WINDOW_SECS);
        while matches!(self.all.front(), Some(t) if *t < cutoff) {
            self.all.pop_front();
        }
        for ring in self.by_kind.values_mut() {
            while matches!(ring.front(), Some(t) if *t < cutoff) {
                ring.pop_front();
            }
        }
    }

    fn count_last_hour(&mut self, now: DateTime<Utc>) -> usize {
        self.trim(now);
        self.all.len()
    }

    fn last_same_kind(&mut self, kind: IntentKind, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.trim(now);
        self.by_kind.get(&kind).and_then(|ring| ring.back().copied())
    }

    fn record_popup(&mut self, kind: IntentKind, now: DateTime<Utc>) {
        self.all.push_back(now);
        self.by_kind.entry(kind).or_default().push_back(now);
    }

    fn clear(&mut self) {
        self.all.clear();
        self.by_kind.clear();
    }
}

/// Per-kind monotonic dismissal count plus last-seen context, used to
/// compute the confidence-decay terms (spec §3 "Dismissal Counters").
#[derive(Debug, Default)]
struct DismissalCounters {
    dismiss_count_by_kind: HashMap<IntentKind, u32>,
    last_context: Option<Snapshot>,
}

impl DismissalCounters {
    fn record_kind_dismiss(&mut self, kind: IntentKind) {
        *self.dismiss_count_by_kind.entry(kind).or_insert(0) += 1;
    }

    fn dismiss_count(&self, kind: IntentKind) -> u32 {
        self.dismiss_count_by_kind.get(&kind).copied().unwrap_or(0)
    }

    fn clear(&mut self) {
        self.dismiss_count_by_kind.clear();
        self.last_context = None;
    }
}

/// The Decision Gate (spec §4.3).
pub struct DecisionGate {
    thresholds: DecisionThresholds,
    cooldowns: CooldownLedger,
    spam: SpamLedger,
    dismissals: DismissalCounters,
}

impl DecisionGate {
    pub fn new(thresholds: DecisionThresholds) -> Self {
        Self {
            thresholds,
            cooldowns: CooldownLedger::default(),
            spam: SpamLedger::default(),
            dismissals: DismissalCounters::default(),
        }
    }

    /// Evaluate a proposed Intent against the current snapshot. `age_seconds`
    /// is the time elapsed since the Intent was created (spec §4.3 step 1).
    /// An Intent of kind `none` must never be passed here — callers
    /// short-circuit before calling (spec §4.3 "Tie-break and edge cases").
    pub fn evaluate(&mut self, intent: Intent, snapshot: &Snapshot, age_seconds: i64) -> Decision {
        debug_assert_ne!(intent.kind, IntentKind::None, "kind=none must never reach evaluate()");

        let now = Utc::now();
        let age_seconds = age_seconds.max(0);

        // 1. Confidence decay.
        let decayed = self.apply_decay(intent.confidence, intent.kind, snapshot, age_seconds);

        let mut decayed_intent = intent.clone();
        decayed_intent.confidence = decayed;

        // 2. Threshold.
        if decayed < self.thresholds.confidence_threshold {
            return Decision::rejected(decayed_intent, "confidence too low", None);
        }

        // 3. Cooldown, checked dismiss -> global -> per-kind.
        if let Some((reason, deadline)) = self.check_cooldowns(intent.kind, now) {
            return Decision::rejected(decayed_intent, reason, Some(deadline));
        }

        // 4. Spam filter.
        if let Some(reason) = self.check_spam(intent.kind, now) {
            return Decision::rejected(decayed_intent, reason, None);
        }

        // 5. Record popup atomically with approval.
        self.cooldowns.record_popup(intent.kind, now);
        self.spam.record_popup(intent.kind, now);

        Decision::approved(decayed_intent)
    }

    fn apply_decay(
        &mut self,
        confidence: f64,
        kind: IntentKind,
        snapshot: &Snapshot,
        age_seconds: i64,
    ) -> f64 {
        let delta_dismiss = 0.10 * f64::from(self.dismissals.dismiss_count(kind));

        let delta_context = match &self.dismissals.last_context {
            Some(prev) => {
                if prev.active_app != snapshot.active_app || prev.is_idle() != snapshot.is_idle() {
                    0.15
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let delta_time = if age_seconds > 60 {
            (age_seconds as f64 / 300.0 * 0.20).min(0.20)
        } else {
            0.0
        };

        // Always updates the stored previous-snapshot, even if the intent is
        // later rejected (spec §4.3).
        self.dismissals.last_context = Some(snapshot.clone());

        (confidence - delta_dismiss - delta_context - delta_time).clamp(0.0, 1.0)
    }

    fn check_cooldowns(
        &mut self,
        kind: IntentKind,
        now: DateTime<Utc>,
    ) -> Option<(&'static str, DateTime<Utc>)> {
        if let Some(last_dismiss) = self.cooldowns.last_dismiss {
            let deadline = last_dismiss
                + chrono::Duration::seconds(self.thresholds.dismiss_cooldown_secs as i64);
            if now < deadline {
                return Some(("Dismiss cooldown active — dismissed recently", deadline));
            }
        }

        if let Some(last_global) = self.cooldowns.last_popup_global {
            let deadline =
                last_global + chrono::Duration::seconds(self.thresholds.global_cooldown_secs as i64);
            if now < deadline {
                return Some(("Global cooldown active", deadline));
            }
        }

        if let Some(last_kind) = self.cooldowns.last_popup_by_kind.get(&kind) {
            let deadline = *last_kind
                + chrono::Duration::seconds(self.thresholds.per_kind_cooldown_secs as i64);
            if now < deadline {
                return Some(("Per-kind cooldown active", deadline));
            }
        }

        None
    }

    fn check_spam(&mut self, kind: IntentKind, now: DateTime<Utc>) -> Option<&'static str> {
        if self.spam.count_last_hour(now) as u32 >= self.thresholds.max_popups_per_hour {
            return Some("Spam filter: hourly popup budget exhausted");
        }
        if let Some(last_same) = self.spam.last_same_kind(kind, now) {
            let window = chrono::Duration::seconds(self.thresholds.same_kind_window_secs as i64);
            if now - last_same < window {
                return Some("Spam filter: same kind seen too recently");
            }
        }
        None
    }

    /// Stamp the global dismiss timestamp (spec §4.3 `record_dismiss()`).
    pub fn record_dismiss(&mut self) {
        self.cooldowns.record_dismiss(Utc::now());
    }

    /// Increment the per-kind dismissal count used by confidence decay
    /// (spec §4.3 `record_kind_dismiss(kind)`).
    pub fn record_kind_dismiss(&mut self, kind: IntentKind) {
        self.dismissals.record_kind_dismiss(kind);
    }

    /// Clear all ledgers and counters (spec §4.3 `reset()`).
    pub fn reset(&mut self) {
        self.cooldowns.clear();
        self.spam.clear();
        self.dismissals.clear();
    }
}
