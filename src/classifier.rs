//! Rule-based attack classification. Each event folds into a per-IP profile
//! held in a concurrent keyed map; an optional external scorer can refine the
//! verdict but never blocks or overrides the fail-safe severity floor.

use crate::error::NetlureError;
use crate::event::{AttackEvent, EventType};
use crate::service::Protocol;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn bump(self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            _ => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifiedType {
    Probe,
    ScanFlood,
    BruteForce,
    Reflection,
}

/// Aggregated view of one source IP's behavior. Never deleted by the core;
/// retention is a storage concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackProfile {
    pub ip: IpAddr,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub event_count: u64,
    pub protocols_used: BTreeSet<Protocol>,
    pub rate_per_minute: f64,
    pub classified_type: ClassifiedType,
    pub severity: Severity,
}

/// Refined verdict from an external scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub classified_type: ClassifiedType,
    pub severity: Severity,
    pub confidence: f64,
}

/// Extension point for an out-of-process classifier (ML model, threat-intel
/// feed). Invoked with a timeout; any failure leaves the rule-based result
/// standing.
#[async_trait::async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, snapshot: &AttackProfile) -> Result<Score>;
}

const CRED_SET_MAX: usize = 256;
const WINDOW_EVENTS_MAX: usize = 4096;

struct ProfileState {
    profile: AttackProfile,
    window: VecDeque<DateTime<Utc>>,
    distinct_credentials: HashSet<String>,
    auth_attempts: u64,
    amplification_requests: u64,
}

pub struct ClassifierConfig {
    /// Trailing window for rate_per_minute.
    pub window: Duration,
    /// Events per minute considered a flood from a single protocol.
    pub flood_rate: f64,
    /// Distinct credential pairs before an IP is a brute-forcer.
    pub brute_force_credentials: usize,
    /// Time allowed for one external scorer call.
    pub scorer_timeout: std::time::Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            window: Duration::seconds(60),
            flood_rate: 60.0,
            brute_force_credentials: 5,
            scorer_timeout: std::time::Duration::from_millis(250),
        }
    }
}

pub struct Classifier {
    profiles: DashMap<IpAddr, ProfileState>,
    cfg: ClassifierConfig,
    scorer: Option<Arc<dyn Scorer>>,
}

impl Classifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        Self { profiles: DashMap::new(), cfg, scorer: None }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Fold one event into its source's profile and re-derive the verdict.
    pub fn observe(&self, event: &AttackEvent) {
        let now = event.timestamp;
        let mut entry = self.profiles.entry(event.source_ip).or_insert_with(|| ProfileState {
            profile: AttackProfile {
                ip: event.source_ip,
                first_seen: now,
                last_seen: now,
                event_count: 0,
                protocols_used: BTreeSet::new(),
                rate_per_minute: 0.0,
                classified_type: ClassifiedType::Probe,
                severity: Severity::Low,
            },
            window: VecDeque::new(),
            distinct_credentials: HashSet::new(),
            auth_attempts: 0,
            amplification_requests: 0,
        });
        let state = entry.value_mut();

        state.profile.last_seen = now;
        state.profile.event_count += 1;
        state.profile.protocols_used.insert(event.protocol);

        state.window.push_back(now);
        let cutoff = now - self.cfg.window;
        while state.window.front().is_some_and(|t| *t < cutoff) {
            state.window.pop_front();
        }
        while state.window.len() > WINDOW_EVENTS_MAX {
            state.window.pop_front();
        }
        // Window is 60s, so the in-window count is already per-minute.
        state.profile.rate_per_minute =
            (state.window.len() as f64 * 60.0 / self.cfg.window.num_seconds().max(1) as f64).max(0.0);

        match event.event_type {
            EventType::AuthAttempt => {
                state.auth_attempts += 1;
                if state.distinct_credentials.len() < CRED_SET_MAX {
                    let user = event.extracted_fields.get("username").map(String::as_str).unwrap_or("");
                    let pass = event.extracted_fields.get("password").map(String::as_str).unwrap_or("");
                    state.distinct_credentials.insert(format!("{user}\x00{pass}"));
                }
            }
            EventType::AmplificationRequest => state.amplification_requests += 1,
            _ => {}
        }

        state.profile.classified_type = self.derive_type(state);
        state.profile.severity = self.derive_severity(state);
        debug!(
            ip = %event.source_ip,
            events = state.profile.event_count,
            rate = state.profile.rate_per_minute,
            kind = ?state.profile.classified_type,
            "profile updated"
        );
    }

    /// Ordered heuristics. Amplification evidence wins over the flood rule so
    /// a reflection flood is never misfiled as a plain scan.
    fn derive_type(&self, state: &ProfileState) -> ClassifiedType {
        if state.amplification_requests > 0 {
            ClassifiedType::Reflection
        } else if state.distinct_credentials.len() >= self.cfg.brute_force_credentials {
            ClassifiedType::BruteForce
        } else if state.profile.rate_per_minute >= self.cfg.flood_rate
            && state.profile.protocols_used.len() == 1
        {
            ClassifiedType::ScanFlood
        } else {
            ClassifiedType::Probe
        }
    }

    /// Monotone in rate and protocol diversity; ties resolve upward.
    fn derive_severity(&self, state: &ProfileState) -> Severity {
        let rate = state.profile.rate_per_minute;
        let mut sev = if rate >= self.cfg.flood_rate * 5.0 {
            Severity::Critical
        } else if rate >= self.cfg.flood_rate {
            Severity::High
        } else if rate >= self.cfg.flood_rate / 6.0 {
            Severity::Medium
        } else {
            Severity::Low
        };
        if state.profile.protocols_used.len() >= 3 {
            sev = sev.bump();
        }
        match state.profile.classified_type {
            ClassifiedType::Reflection => sev.max(Severity::High),
            ClassifiedType::BruteForce => sev.max(Severity::Medium),
            _ => sev,
        }
    }

    /// Run the external scorer, if configured, against a snapshot of the
    /// profile. Timeouts and errors keep the rule-based verdict; an adopted
    /// external severity never drops below the rule-based floor.
    pub async fn refine(&self, ip: IpAddr) {
        let Some(scorer) = self.scorer.clone() else { return };
        let Some(snapshot) = self.snapshot(ip) else { return };
        let rule_severity = snapshot.severity;
        match tokio::time::timeout(self.cfg.scorer_timeout, scorer.score(&snapshot)).await {
            Ok(Ok(score)) => {
                if let Some(mut state) = self.profiles.get_mut(&ip) {
                    state.profile.classified_type = score.classified_type;
                    state.profile.severity = score.severity.max(rule_severity);
                }
            }
            Ok(Err(e)) => {
                warn!(%ip, error = %NetlureError::Classifier(e.to_string()), "external scorer failed");
            }
            Err(_) => {
                warn!(%ip, "external scorer timed out; rule-based verdict stands");
            }
        }
    }

    pub fn snapshot(&self, ip: IpAddr) -> Option<AttackProfile> {
        self.profiles.get(&ip).map(|s| s.profile.clone())
    }

    pub fn profiles(&self) -> Vec<AttackProfile> {
        self.profiles.iter().map(|s| s.profile.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::excerpt;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn event(
        ip: &str,
        protocol: Protocol,
        event_type: EventType,
        at: DateTime<Utc>,
        fields: &[(&str, &str)],
    ) -> AttackEvent {
        AttackEvent {
            id: Uuid::new_v4(),
            timestamp: at,
            source_ip: ip.parse().unwrap(),
            source_port: 40000,
            protocol,
            transport: protocol.transport(),
            event_type,
            payload_size: 12,
            payload_excerpt: excerpt(b"test"),
            extracted_fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn amplification_flood_classifies_as_reflection_high() {
        let c = Classifier::new(ClassifierConfig::default());
        let start = Utc::now();
        // 150 ANY queries inside 10 seconds from one source.
        for i in 0..150 {
            let at = start + Duration::milliseconds(i * 66);
            c.observe(&event(
                "203.0.113.9",
                Protocol::Dns,
                EventType::AmplificationRequest,
                at,
                &[("qtype", "ANY")],
            ));
        }
        let p = c.snapshot("203.0.113.9".parse().unwrap()).unwrap();
        assert_eq!(p.classified_type, ClassifiedType::Reflection);
        assert!(p.severity >= Severity::High);
        assert!(p.rate_per_minute > 0.0);
    }

    #[test]
    fn distinct_credentials_classify_as_brute_force() {
        let c = Classifier::new(ClassifierConfig::default());
        let start = Utc::now();
        for i in 0..10 {
            let user = format!("user{i}");
            c.observe(&event(
                "198.51.100.7",
                Protocol::Ftp,
                EventType::AuthAttempt,
                start + Duration::seconds(i),
                &[("username", user.as_str()), ("password", "hunter2")],
            ));
        }
        let p = c.snapshot("198.51.100.7".parse().unwrap()).unwrap();
        assert_eq!(p.classified_type, ClassifiedType::BruteForce);
        assert_eq!(p.event_count, 10);
    }

    #[test]
    fn repeated_credentials_stay_probe() {
        let c = Classifier::new(ClassifierConfig::default());
        let start = Utc::now();
        for i in 0..4 {
            c.observe(&event(
                "198.51.100.8",
                Protocol::Ssh,
                EventType::AuthAttempt,
                start + Duration::seconds(i * 20),
                &[("username", "root"), ("password", "root")],
            ));
        }
        let p = c.snapshot("198.51.100.8".parse().unwrap()).unwrap();
        assert_eq!(p.classified_type, ClassifiedType::Probe);
    }

    #[test]
    fn single_protocol_flood_classifies_as_scan() {
        let c = Classifier::new(ClassifierConfig::default());
        let start = Utc::now();
        for i in 0..120 {
            c.observe(&event(
                "192.0.2.4",
                Protocol::Http,
                EventType::Probe,
                start + Duration::milliseconds(i * 100),
                &[],
            ));
        }
        let p = c.snapshot("192.0.2.4".parse().unwrap()).unwrap();
        assert_eq!(p.classified_type, ClassifiedType::ScanFlood);
    }

    #[test]
    fn rate_decays_outside_window() {
        let c = Classifier::new(ClassifierConfig::default());
        let start = Utc::now() - Duration::seconds(300);
        for i in 0..50 {
            c.observe(&event("192.0.2.5", Protocol::Redis, EventType::Command, start + Duration::seconds(i / 10), &[]));
        }
        // One fresh event: all older timestamps fall out of the window.
        c.observe(&event("192.0.2.5", Protocol::Redis, EventType::Command, Utc::now(), &[]));
        let p = c.snapshot("192.0.2.5".parse().unwrap()).unwrap();
        assert!(p.rate_per_minute >= 0.0);
        assert!(p.rate_per_minute <= 2.0);
        assert_eq!(p.event_count, 51);
    }

    #[test]
    fn protocol_diversity_raises_severity() {
        let c = Classifier::new(ClassifierConfig::default());
        let now = Utc::now();
        for (i, proto) in [Protocol::Ssh, Protocol::Ftp, Protocol::Redis, Protocol::Mysql]
            .iter()
            .enumerate()
        {
            for n in 0..5 {
                c.observe(&event(
                    "192.0.2.6",
                    *proto,
                    EventType::Probe,
                    now + Duration::seconds((i * 5 + n) as i64),
                    &[],
                ));
            }
        }
        let p = c.snapshot("192.0.2.6".parse().unwrap()).unwrap();
        assert!(p.severity >= Severity::Medium);
        assert_eq!(p.protocols_used.len(), 4);
    }

    struct FixedScorer(Score);
    #[async_trait::async_trait]
    impl Scorer for FixedScorer {
        async fn score(&self, _snapshot: &AttackProfile) -> Result<Score> {
            Ok(self.0.clone())
        }
    }

    struct FailingScorer;
    #[async_trait::async_trait]
    impl Scorer for FailingScorer {
        async fn score(&self, _snapshot: &AttackProfile) -> Result<Score> {
            anyhow::bail!("model unavailable")
        }
    }

    #[tokio::test]
    async fn external_scorer_cannot_lower_severity() {
        let c = Classifier::new(ClassifierConfig::default()).with_scorer(Arc::new(FixedScorer(Score {
            classified_type: ClassifiedType::ScanFlood,
            severity: Severity::Low,
            confidence: 0.9,
        })));
        let now = Utc::now();
        for i in 0..10 {
            c.observe(&event(
                "192.0.2.7",
                Protocol::Dns,
                EventType::AmplificationRequest,
                now + Duration::seconds(i),
                &[],
            ));
        }
        let before = c.snapshot("192.0.2.7".parse().unwrap()).unwrap();
        c.refine("192.0.2.7".parse().unwrap()).await;
        let after = c.snapshot("192.0.2.7".parse().unwrap()).unwrap();
        assert_eq!(after.classified_type, ClassifiedType::ScanFlood);
        assert!(after.severity >= before.severity);
    }

    #[tokio::test]
    async fn failing_scorer_leaves_rule_based_verdict() {
        let c = Classifier::new(ClassifierConfig::default()).with_scorer(Arc::new(FailingScorer));
        c.observe(&event("192.0.2.8", Protocol::Ntp, EventType::AmplificationRequest, Utc::now(), &[]));
        c.refine("192.0.2.8".parse().unwrap()).await;
        let p = c.snapshot("192.0.2.8".parse().unwrap()).unwrap();
        assert_eq!(p.classified_type, ClassifiedType::Reflection);
    }
}
