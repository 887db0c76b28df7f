//! Intent Proposer (C2, spec §4.2).
//!
//! Runs in one of three modes (LLM-primary, fallback-only, auto) and exposes
//! a single `propose(snapshot) -> Intent` entry point. The fallback path is
//! the only proposer path ORBIT ships: the original rule-based v1 brain is
//! retired outright in favor of the variety-pool-aware v2 behavior (spec
//! open question, resolved in favor of v2-only).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{Timelike, Utc};
use rand::Rng;

use crate::config::AiMode;
use crate::llm::{resolve_model, LlmClient, LlmError};
use crate::types::{Intent, IntentKind, Snapshot};

/// Coding-editor keyword match used by the fallback rule (spec §4.2).
const CODING_APP_KEYWORDS: [&str; 3] = ["code", "studio", "python"];

const LLM_SYSTEM_PROMPT: &str = "Kamu adalah Luna, AI assistant untuk ORBIT.\n\
Kepribadian: Ramah, informatif, dan pendukung.\n\
Gaya bahasa: Santai namun profesional dalam Bahasa Indonesia.\n\
Suara: Tenang dan meyakinkan.\n\n\
Tugasmu: Mengamati konteks user dan memberikan saran HANYA jika benar-benar dibutuhkan.\n\
Jangan mengganggu atau spam. Bersikap humble dan tidak memaksa.";

fn build_prompt(snapshot: &Snapshot) -> String {
    let hour = Utc::now().format("%H:%M");
    format!(
        "Analisis konteks user berikut:\n\n\
Context:\n\
- Active window: {}\n\
- Idle time: {} seconds\n\
- Recent file changes: {}\n\
- Time of day: {hour}\n\n\
Based on this context, decide on ONE action:\n\
1. \"suggest_help\" - User might need assistance\n\
2. \"none\" - No action needed (user is focused)\n\n\
ALLOWED INTENTS (v0.2): suggest_help, none ONLY\n\n\
Respond in JSON:\n\
{{\n  \"intent\": \"suggest_help\",\n  \"confidence\": 0.85,\n  \"reasoning\": \"...\",\n  \"message\": \"...\"\n}}\n\n\
Field `reasoning` is strictly internal and never surfaced to UI or persisted.\n\
Keep message in Bahasa Indonesia, casual tone, max 80 chars.",
        snapshot.active_app.as_deref().unwrap_or("Unknown"),
        snapshot.idle_seconds,
        snapshot.recent_file_changes,
    )
}

/// Static message pools, equivalent to the original `dummy_responses.json`.
/// Kept as compiled-in defaults; the Rust crate carries no JSON asset loader
/// since the pool content itself is not externally configurable in v0.2.
struct MessagePools {
    base: Vec<&'static str>,
    error_detected: Vec<&'static str>,
    long_idle: Vec<&'static str>,
    morning: Vec<&'static str>,
    afternoon: Vec<&'static str>,
    evening: Vec<&'static str>,
    night: Vec<&'static str>,
}

impl Default for MessagePools {
    fn default() -> Self {
        Self {
            base: vec![
                "Butuh bantuan?",
                "Mau aku bantu?",
                "Lagi stuck nih?",
                "Ada yang bisa ku bantu?",
                "Mau diskusi masalahnya?",
            ],
            error_detected: vec![
                "Keliatan ada error, mau aku bantu cek?",
                "Error lagi? Coba cerita, barangkali bisa dibantu.",
                "Ada yang crash nih, mau dibantu debug?",
            ],
            long_idle: vec![
                "Udah lama diem, masih di sini?",
                "Kelamaan mandang layar, mau istirahat dulu?",
                "Masih stuck? Udah lumayan lama nih.",
            ],
            morning: vec!["Pagi! Semangat ngoding-nya?", "Udah mulai fokus pagi ini?"],
            afternoon: vec!["Siang, masih semangat?", "Udah makan siang belum?"],
            evening: vec!["Sore, masih lanjut kerja?", "Udah mau selesai buat hari ini?"],
            night: vec!["Malam-malam masih begadang?", "Jangan lupa istirahat ya."],
        }
    }
}

/// Variety-pool fallback proposer (spec §4.2), equivalent to the original
/// `DummyModePool`. Owns usage counters and last-message/last-suggest-time
/// state so selections favor least-used messages and respect a minimum
/// inter-message interval.
pub struct VarietyPool {
    pools: MessagePools,
    last_message: Option<String>,
    last_suggest_at: Option<Instant>,
    usage_count: HashMap<String, u32>,
    min_interval: Duration,
}

impl VarietyPool {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            pools: MessagePools::default(),
            last_message: None,
            last_suggest_at: None,
            usage_count: HashMap::new(),
            min_interval,
        }
    }

    fn select_pool(&self, idle_seconds: u64, error_count: u64) -> Vec<&'static str> {
        if error_count > 0 {
            return self.pools.error_detected.clone();
        }
        if idle_seconds >= 600 {
            return self.pools.long_idle.clone();
        }
        let hour = Utc::now().hour();
        let mood = if (5..12).contains(&hour) {
            &self.pools.morning
        } else if (12..17).contains(&hour) {
            &self.pools.afternoon
        } else if (17..22).contains(&hour) {
            &self.pools.evening
        } else {
            &self.pools.night
        };
        mood.iter().chain(self.pools.base.iter()).copied().collect()
    }

    /// Pick the next message, or `None` if the minimum inter-message
    /// interval has not elapsed (spec §4.2 step 4 — not an error, just
    /// "no message this time").
    pub fn next_message(&mut self, idle_seconds: u64, error_count: u64) -> Option<String> {
        if let Some(last) = self.last_suggest_at {
            if last.elapsed() < self.min_interval {
                return None;
            }
        }

        let pool = self.select_pool(idle_seconds, error_count);
        let available: Vec<&str> = pool
            .iter()
            .copied()
            .filter(|m| self.last_message.as_deref() != Some(*m))
            .collect();
        let candidates: Vec<&str> = if available.is_empty() { pool } else { available };

        let weights: Vec<f64> = candidates
            .iter()
            .map(|m| 1.0 / (1.0 + f64::from(*self.usage_count.get(*m).unwrap_or(&0))))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut roll = rand::thread_rng().gen_range(0.0..total.max(f64::EPSILON));
        let mut chosen = candidates[0];
        for (m, w) in candidates.iter().zip(weights.iter()) {
            if roll < *w {
                chosen = m;
                break;
            }
            roll -= w;
        }

        let msg = chosen.to_string();
        *self.usage_count.entry(msg.clone()).or_insert(0) += 1;
        self.last_message = Some(msg.clone());
        self.last_suggest_at = Some(Instant::now());
        Some(msg)
    }
}

/// Confidence formula for the fallback path (spec §4.2). `rng` is injected
/// so tests can supply a fixed generator if needed; production uses the
/// thread-local RNG.
fn fallback_confidence(idle_seconds: u64, error_count: u64) -> f64 {
    let mut confidence = 0.70;
    confidence += if idle_seconds >= 300 {
        0.10
    } else if idle_seconds >= 180 {
        0.05
    } else {
        0.0
    };
    if error_count > 0 {
        confidence += 0.05;
    }
    let noise = rand::thread_rng().gen_range(-0.03..=0.03);
    (confidence + noise).clamp(0.70, 0.90)
}

fn app_is_coding_related(active_app: Option<&str>) -> bool {
    let Some(app) = active_app else {
        return false;
    };
    let lower = app.to_ascii_lowercase();
    CODING_APP_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Statistics mirroring the original `AIBrainV2.get_stats()`.
#[derive(Debug, Clone, Default)]
pub struct ProposerStats {
    pub llm_calls: u64,
    pub fallback_calls: u64,
    pub failures: u64,
    pub total_proposals: u64,
}

/// C2 — generates intents from context snapshots, degrading from LLM to a
/// deterministic variety-pool fallback on failure or by configuration.
pub struct IntentProposer {
    mode: AiMode,
    model: String,
    llm: LlmClient,
    llm_healthy: bool,
    consecutive_failures: u32,
    pool: VarietyPool,
    stats: ProposerStats,
}

impl IntentProposer {
    pub fn new(mode: AiMode, model: String, llm: LlmClient, min_interval: Duration) -> Self {
        let llm_healthy = !matches!(mode, AiMode::Dummy);
        Self {
            mode,
            model,
            llm,
            llm_healthy,
            consecutive_failures: 0,
            pool: VarietyPool::new(min_interval),
            stats: ProposerStats::default(),
        }
    }

    pub fn stats(&self) -> ProposerStats {
        self.stats.clone()
    }

    /// Re-run the LLM health check and resolve the active model against
    /// whatever the endpoint currently lists (spec §6 autodetection).
    pub async fn refresh_health(&mut self) {
        if matches!(self.mode, AiMode::Dummy) {
            self.llm_healthy = false;
            return;
        }
        match self.llm.list_models().await {
            Ok(models) => {
                if let Some(resolved) = resolve_model(&self.model, &models) {
                    self.model = resolved;
                    self.llm_healthy = true;
                    self.consecutive_failures = 0;
                } else {
                    self.llm_healthy = false;
                }
            }
            Err(_) => self.llm_healthy = false,
        }
    }

    /// Propose an Intent for the given snapshot (spec §4.2).
    pub async fn propose(&mut self, snapshot: &Snapshot) -> Intent {
        self.stats.total_proposals += 1;

        let should_try_llm = matches!(self.mode, AiMode::Ollama | AiMode::Auto) && self.llm_healthy;
        if should_try_llm {
            match self.try_llm(snapshot).await {
                Ok(intent) => {
                    self.stats.llm_calls += 1;
                    self.consecutive_failures = 0;
                    return intent;
                }
                Err(_) => {
                    self.stats.failures += 1;
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= 3 {
                        self.llm_healthy = false;
                    }
                }
            }
        }

        self.stats.fallback_calls += 1;
        self.fallback(snapshot)
    }

    async fn try_llm(&self, snapshot: &Snapshot) -> Result<Intent, LlmError> {
        let prompt = build_prompt(snapshot);
        let parsed = self
            .llm
            .generate(&self.model, &prompt, LLM_SYSTEM_PROMPT)
            .await?;

        Ok(Intent {
            kind: parsed.normalized_kind(),
            confidence: parsed.confidence,
            message: parsed.message.clone(),
            reasoning: parsed.reasoning.clone(),
            created_at: Utc::now(),
        }
        .clamp_confidence()
        .strip_reasoning())
    }

    fn fallback(&mut self, snapshot: &Snapshot) -> Intent {
        let now = Utc::now();
        if snapshot.idle_seconds >= 300 && app_is_coding_related(snapshot.active_app.as_deref()) {
            if let Some(message) = self
                .pool
                .next_message(snapshot.idle_seconds, snapshot.error_count)
            {
                let confidence = fallback_confidence(snapshot.idle_seconds, snapshot.error_count);
                return Intent {
                    kind: IntentKind::SuggestHelp,
                    confidence,
                    message,
                    reasoning: String::new(),
                    created_at: now,
                };
            }
        }
        Intent::none(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use std::time::Duration as StdDuration;

    fn snapshot(idle_seconds: u64, active_app: Option<&str>, error_count: u64) -> Snapshot {
        Snapshot {
            timestamp: Utc::now(),
            active_app: active_app.map(str::to_string),
            window_title: None,
            idle_seconds,
            idle_level: crate::types::IdleLevel::from_seconds(idle_seconds),
            recent_file_changes: 0,
            error_count,
            latency_ms: 0,
            snapshot_count: 1,
        }
    }

    fn dummy_proposer(min_interval: StdDuration) -> IntentProposer {
        let llm = LlmClient::new("http://localhost:11434", StdDuration::from_secs(5));
        IntentProposer::new(AiMode::Dummy, "llama3.1:8b".to_string(), llm, min_interval)
    }

    #[test]
    fn fallback_confidence_is_bounded() {
        for _ in 0..50 {
            let c = fallback_confidence(300, 1);
            assert!((0.70..=0.90).contains(&c));
        }
    }

    #[tokio::test]
    async fn fallback_emits_none_when_not_idle_enough() {
        let mut proposer = dummy_proposer(StdDuration::from_secs(30));
        let snap = snapshot(10, Some("Code.exe"), 0);
        let intent = proposer.propose(&snap).await;
        assert_eq!(intent.kind, IntentKind::None);
    }

    #[tokio::test]
    async fn fallback_emits_none_when_app_not_coding_related() {
        let mut proposer = dummy_proposer(StdDuration::from_secs(30));
        let snap = snapshot(400, Some("Spotify.exe"), 0);
        let intent = proposer.propose(&snap).await;
        assert_eq!(intent.kind, IntentKind::None);
    }

    #[tokio::test]
    async fn fallback_suggests_help_when_idle_and_coding() {
        let mut proposer = dummy_proposer(StdDuration::from_secs(30));
        let snap = snapshot(400, Some("Code.exe"), 0);
        let intent = proposer.propose(&snap).await;
        assert_eq!(intent.kind, IntentKind::SuggestHelp);
        assert!(!intent.message.is_empty());
        assert!(intent.reasoning.is_empty());
    }

    #[tokio::test]
    async fn fallback_respects_minimum_interval() {
        let mut proposer = dummy_proposer(StdDuration::from_secs(3600));
        let snap = snapshot(400, Some("Code.exe"), 0);
        let first = proposer.propose(&snap).await;
        let second = proposer.propose(&snap).await;
        assert_eq!(first.kind, IntentKind::SuggestHelp);
        assert_eq!(second.kind, IntentKind::None);
    }

    #[test]
    fn variety_pool_excludes_last_message_until_reset() {
        let mut pool = VarietyPool::new(StdDuration::from_millis(0));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let msg = pool.next_message(0, 0).unwrap();
            seen.insert(msg);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn variety_pool_selects_error_pool_when_errors_present() {
        let mut pool = VarietyPool::new(StdDuration::from_millis(0));
        let msg = pool.next_message(0, 1).unwrap();
        assert!(pool.pools.error_detected.contains(&msg.as_str()));
    }
}
