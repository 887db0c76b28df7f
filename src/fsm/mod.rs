//! Behavior FSM (C4, spec §4.4).
//!
//! The FSM is a pure state machine: it performs no I/O itself. State changes
//! and UI-update emissions are notified to the orchestrator via outbound
//! channels (spec §9 "Callbacks -> channels"), never direct callbacks.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::Intent;

/// FSM states (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Observing,
    Suggesting,
    Executing,
    Suppressed,
    CooldownGlobal,
}

/// Events that trigger state transitions (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ContextChanged,
    IntentApproved,
    UserDismiss,
    UserAction,
    Timeout,
    CooldownExpired,
    EnterFocusMode,
    ExitFocusMode,
}

/// Emotion tag carried on a UI Update (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutral,
    Curious,
    Helpful,
    Working,
    Quiet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bubble {
    pub text: String,
    pub available_actions: Vec<String>,
}

/// Message broadcast to UI subscribers (spec §3, §4.4). Immutable once
/// broadcast; never contains the Intent's `reasoning` text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiUpdate {
    pub state: State,
    pub emotion: Emotion,
    pub visible: bool,
    pub bubble: Option<Bubble>,
}

const DEFAULT_SUGGESTION: &str = "Ada yang bisa kubantu?";
const DEFAULT_TRANSITION_HISTORY: usize = 100;

/// One entry in the bounded transition history (spec §4.4).
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: State,
    pub to: State,
    pub event: Event,
    pub timestamp: DateTime<Utc>,
}

/// A notification emitted by the FSM: either a raw state transition or a
/// derived UI update (spec §4.4 "notifies ... via two callbacks (or two
/// outbound channels)").
#[derive(Debug, Clone)]
pub enum FsmNotification {
    Transitioned { from: State, to: State, event: Event },
    UiUpdate(UiUpdate),
}

fn next_state(current: State, event: Event) -> Option<State> {
    use Event::*;
    use State::*;
    match (current, event) {
        (Idle, ContextChanged) => Some(Observing),
        (Idle, IntentApproved) => Some(Suggesting),
        (Idle, EnterFocusMode) => Some(CooldownGlobal),

        (Observing, IntentApproved) => Some(Suggesting),
        (Observing, Timeout) => Some(Idle),
        (Observing, EnterFocusMode) => Some(CooldownGlobal),

        (Suggesting, UserDismiss) => Some(Suppressed),
        (Suggesting, UserAction) => Some(Executing),
        (Suggesting, Timeout) => Some(Idle),
        (Suggesting, EnterFocusMode) => Some(CooldownGlobal),

        (Executing, Timeout) => Some(Idle),
        (Executing, UserDismiss) => Some(Suppressed),

        (Suppressed, CooldownExpired) => Some(Idle),

        (CooldownGlobal, ExitFocusMode) => Some(Idle),

        _ => None,
    }
}

fn timeout_secs(state: State) -> Option<i64> {
    match state {
        State::Observing => Some(30),
        State::Suggesting => Some(60),
        State::Executing => Some(10),
        State::Suppressed => Some(600),
        State::Idle | State::CooldownGlobal => None,
    }
}

pub struct BehaviorFsm {
    current_state: State,
    entered_at: DateTime<Utc>,
    held_intent: Option<Intent>,
    history: VecDeque<TransitionRecord>,
    history_capacity: usize,
    notifications: mpsc::Sender<FsmNotification>,
}

impl BehaviorFsm {
    pub fn new(notifications: mpsc::Sender<FsmNotification>) -> Self {
        Self {
            current_state: State::Idle,
            entered_at: Utc::now(),
            held_intent: None,
            history: VecDeque::new(),
            history_capacity: DEFAULT_TRANSITION_HISTORY,
            notifications,
        }
    }

    pub fn current_state(&self) -> State {
        self.current_state
    }

    pub fn held_intent(&self) -> Option<&Intent> {
        self.held_intent.as_ref()
    }

    /// Trigger an event; a no-op if the event isn't valid in the current
    /// state (spec §4.4 "missing events are no-ops"). Returns true if a
    /// transition occurred.
    pub fn trigger(&mut self, event: Event, intent: Option<Intent>) -> bool {
        let Some(to) = next_state(self.current_state, event) else {
            tracing::debug!(?event, state = ?self.current_state, "event not valid in current state");
            return false;
        };
        self.transition_to(to, event, intent);
        true
    }

    fn transition_to(&mut self, to: State, event: Event, intent: Option<Intent>) {
        let from = self.current_state;
        let now = Utc::now();

        self.history.push_back(TransitionRecord {
            from,
            to,
            event,
            timestamp: now,
        });
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }

        self.current_state = to;
        self.entered_at = now;
        if matches!(to, State::Suggesting) {
            self.held_intent = intent;
        } else if !matches!(to, State::Executing) {
            self.held_intent = None;
        }

        tracing::info!(?from, ?to, ?event, "FSM state transition");

        let _ = self
            .notifications
            .try_send(FsmNotification::Transitioned { from, to, event });
        let ui = self.ui_output();
        let _ = self.notifications.try_send(FsmNotification::UiUpdate(ui));
    }

    /// Check whether the current state has timed out and, if so, fire
    /// TIMEOUT (or COOLDOWN_EXPIRED for SUPPRESSED). Called at cadence by
    /// the orchestrator (spec §4.4 `tick()`).
    pub fn tick(&mut self) -> bool {
        let Some(timeout) = timeout_secs(self.current_state) else {
            return false;
        };
        let elapsed = (Utc::now() - self.entered_at).num_seconds();
        if elapsed < timeout {
            return false;
        }
        let event = if self.current_state == State::Suppressed {
            Event::CooldownExpired
        } else {
            Event::Timeout
        };
        self.trigger(event, None)
    }

    /// Derive an immutable UI Update from the current state and held Intent
    /// (spec §4.4).
    pub fn ui_output(&self) -> UiUpdate {
        match self.current_state {
            State::Idle => UiUpdate {
                state: State::Idle,
                emotion: Emotion::Neutral,
                visible: false,
                bubble: None,
            },
            State::Observing => UiUpdate {
                state: State::Observing,
                emotion: Emotion::Curious,
                visible: true,
                bubble: None,
            },
            State::Suggesting => {
                let text = self
                    .held_intent
                    .as_ref()
                    .map(|i| i.message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_SUGGESTION.to_string());
                UiUpdate {
                    state: State::Suggesting,
                    emotion: Emotion::Helpful,
                    visible: true,
                    bubble: Some(Bubble {
                        text,
                        available_actions: vec!["Ya".into(), "Nanti".into(), "Dismiss".into()],
                    }),
                }
            }
            State::Executing => UiUpdate {
                state: State::Executing,
                emotion: Emotion::Working,
                visible: true,
                bubble: Some(Bubble {
                    text: "Sedang diproses...".to_string(),
                    available_actions: vec![],
                }),
            },
            State::Suppressed | State::CooldownGlobal => UiUpdate {
                state: self.current_state,
                emotion: Emotion::Quiet,
                visible: false,
                bubble: None,
            },
        }
    }

    pub fn history(&self, limit: usize) -> Vec<TransitionRecord> {
        self.history.iter().rev().take(limit).cloned().collect()
    }
}

/// Map a raw user-action string from the UI into an [`Event`] (spec §4.4).
/// Unknown strings are ignored.
pub fn map_user_action(action: &str) -> Option<Event> {
    match action {
        "Ya" | "Yes" | "OK" => Some(Event::UserAction),
        "Nanti" | "Later" => Some(Event::Timeout),
        "Dismiss" => Some(Event::UserDismiss),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm() -> (BehaviorFsm, mpsc::Receiver<FsmNotification>) {
        let (tx, rx) = mpsc::channel(32);
        (BehaviorFsm::new(tx), rx)
    }

    fn intent() -> Intent {
        Intent {
            kind: crate::types::IntentKind::SuggestHelp,
            confidence: 0.8,
            message: "halo!".into(),
            reasoning: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn idle_to_observing_on_context_changed() {
        let (mut fsm, _rx) = fsm();
        assert!(fsm.trigger(Event::ContextChanged, None));
        assert_eq!(fsm.current_state(), State::Observing);
    }

    #[test]
    fn idle_to_suggesting_direct_on_intent_approved() {
        let (mut fsm, _rx) = fsm();
        assert!(fsm.trigger(Event::IntentApproved, Some(intent())));
        assert_eq!(fsm.current_state(), State::Suggesting);
    }

    #[test]
    fn invalid_event_is_noop() {
        let (mut fsm, _rx) = fsm();
        assert!(!fsm.trigger(Event::UserDismiss, None));
        assert_eq!(fsm.current_state(), State::Idle);
    }

    #[test]
    fn suggesting_ui_output_has_expected_actions() {
        let (mut fsm, _rx) = fsm();
        fsm.trigger(Event::IntentApproved, Some(intent()));
        let ui = fsm.ui_output();
        assert!(ui.visible);
        let bubble = ui.bubble.expect("suggesting state has a bubble");
        assert_eq!(bubble.available_actions, vec!["Ya", "Nanti", "Dismiss"]);
        assert_eq!(bubble.text, "halo!");
    }

    #[test]
    fn reasoning_never_reaches_ui_output() {
        let (mut fsm, _rx) = fsm();
        let mut leaky = intent();
        leaky.reasoning = "internal chain of thought".into();
        fsm.trigger(Event::IntentApproved, Some(leaky));
        let ui = fsm.ui_output();
        let serialized = serde_json::to_string(&ui).unwrap();
        assert!(!serialized.contains("chain of thought"));
    }

    #[test]
    fn enter_focus_mode_silences_from_idle() {
        let (mut fsm, _rx) = fsm();
        assert!(fsm.trigger(Event::EnterFocusMode, None));
        assert_eq!(fsm.current_state(), State::CooldownGlobal);
        assert!(!fsm.ui_output().visible);
    }

    #[test]
    fn user_action_mapping() {
        assert_eq!(map_user_action("Ya"), Some(Event::UserAction));
        assert_eq!(map_user_action("Later"), Some(Event::Timeout));
        assert_eq!(map_user_action("Dismiss"), Some(Event::UserDismiss));
        assert_eq!(map_user_action("banana"), None);
    }

    #[test]
    fn all_transitions_are_in_the_table() {
        // Spec §8: "forall transitions (s, e, s'): (s, e, s') appears in the
        // transition table of §4.4." — this asserts the inverse: every table
        // entry is reachable and produces exactly the declared next state.
        use Event::*;
        use State::*;
        let table: &[(State, Event, State)] = &[
            (Idle, ContextChanged, Observing),
            (Idle, IntentApproved, Suggesting),
            (Idle, EnterFocusMode, CooldownGlobal),
            (Observing, IntentApproved, Suggesting),
            (Observing, Timeout, Idle),
            (Observing, EnterFocusMode, CooldownGlobal),
            (Suggesting, UserDismiss, Suppressed),
            (Suggesting, UserAction, Executing),
            (Suggesting, Timeout, Idle),
            (Suggesting, EnterFocusMode, CooldownGlobal),
            (Executing, Timeout, Idle),
            (Executing, UserDismiss, Suppressed),
            (Suppressed, CooldownExpired, Idle),
            (CooldownGlobal, ExitFocusMode, Idle),
        ];
        for (from, event, to) in table {
            assert_eq!(next_state(*from, *event), Some(*to));
        }
    }
}
