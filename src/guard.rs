//! Rate limiter and temporary blacklist guarding the management API surface.
//! In-memory, amortized O(1) per check; blacklist expiry is lazy with an
//! optional sweep for memory hygiene.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    RateLimited,
    Blacklisted,
}

#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    pub window_start: DateTime<Utc>,
    pub request_count: u32,
}

#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub ban_duration: Duration,
    pub whitelist: HashSet<IpAddr>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window: Duration::seconds(60),
            max_requests: 30,
            ban_duration: Duration::seconds(600),
            whitelist: HashSet::new(),
        }
    }
}

pub struct Guard {
    cfg: GuardConfig,
    windows: DashMap<IpAddr, RateLimitEntry>,
    blacklist: DashMap<IpAddr, BlacklistEntry>,
}

impl Guard {
    pub fn new(cfg: GuardConfig) -> Self {
        Self { cfg, windows: DashMap::new(), blacklist: DashMap::new() }
    }

    pub fn check(&self, ip: IpAddr) -> Verdict {
        self.check_at(ip, Utc::now())
    }

    /// Clock-injected variant so TTL behavior is testable without sleeping.
    pub fn check_at(&self, ip: IpAddr, now: DateTime<Utc>) -> Verdict {
        if self.cfg.whitelist.contains(&ip) {
            return Verdict::Allowed;
        }

        if let Some(entry) = self.blacklist.get(&ip) {
            if now < entry.expires_at {
                return Verdict::Blacklisted;
            }
            drop(entry);
            self.blacklist.remove(&ip);
        }

        let mut entry = self.windows.entry(ip).or_insert_with(|| RateLimitEntry {
            window_start: now,
            request_count: 0,
        });
        if now - entry.window_start >= self.cfg.window {
            entry.window_start = now;
            entry.request_count = 0;
        }
        entry.request_count += 1;
        if entry.request_count > self.cfg.max_requests {
            drop(entry);
            self.ban(ip, now, "management API rate limit exceeded");
            return Verdict::RateLimited;
        }
        Verdict::Allowed
    }

    fn ban(&self, ip: IpAddr, now: DateTime<Utc>, reason: &str) {
        info!(%ip, reason, ban_seconds = self.cfg.ban_duration.num_seconds(), "blacklisting");
        self.blacklist.insert(
            ip,
            BlacklistEntry {
                reason: reason.to_string(),
                // Exactly creation time + configured duration.
                expires_at: now + self.cfg.ban_duration,
            },
        );
    }

    pub fn is_blacklisted(&self, ip: IpAddr) -> bool {
        self.blacklist
            .get(&ip)
            .map(|e| Utc::now() < e.expires_at)
            .unwrap_or(false)
    }

    /// Drop expired bans and stale windows. Not required for correctness.
    pub fn sweep(&self) {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) {
        self.blacklist.retain(|_, e| now < e.expires_at);
        self.windows.retain(|_, e| now - e.window_start < self.cfg.window * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(max: u32) -> Guard {
        Guard::new(GuardConfig {
            window: Duration::seconds(10),
            max_requests: max,
            ban_duration: Duration::seconds(30),
            whitelist: HashSet::new(),
        })
    }

    #[test]
    fn allows_up_to_limit_then_rate_limits_then_blacklists() {
        let g = guard(5);
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        let t0 = Utc::now();
        for _ in 0..5 {
            assert_eq!(g.check_at(ip, t0), Verdict::Allowed);
        }
        // First violation creates the ban and reports RateLimited.
        assert_eq!(g.check_at(ip, t0), Verdict::RateLimited);
        // Thereafter the ban itself answers.
        assert_eq!(g.check_at(ip, t0), Verdict::Blacklisted);
        assert_eq!(g.check_at(ip, t0 + Duration::seconds(29)), Verdict::Blacklisted);
    }

    #[test]
    fn ban_expires_lazily_after_ttl() {
        let g = guard(2);
        let ip: IpAddr = "10.1.1.2".parse().unwrap();
        let t0 = Utc::now();
        for _ in 0..3 {
            g.check_at(ip, t0);
        }
        assert_eq!(g.check_at(ip, t0), Verdict::Blacklisted);
        // At exactly t0 + ban duration the entry has expired and the window
        // restarts fresh.
        assert_eq!(g.check_at(ip, t0 + Duration::seconds(30)), Verdict::Allowed);
    }

    #[test]
    fn whitelist_always_allowed() {
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        let mut cfg = GuardConfig { max_requests: 1, ..GuardConfig::default() };
        cfg.whitelist.insert(ip);
        let g = Guard::new(cfg);
        let t0 = Utc::now();
        for _ in 0..100 {
            assert_eq!(g.check_at(ip, t0), Verdict::Allowed);
        }
    }

    #[test]
    fn window_resets_after_elapse() {
        let g = guard(3);
        let ip: IpAddr = "10.1.1.3".parse().unwrap();
        let t0 = Utc::now();
        for _ in 0..3 {
            assert_eq!(g.check_at(ip, t0), Verdict::Allowed);
        }
        // New window: the counter starts over.
        assert_eq!(g.check_at(ip, t0 + Duration::seconds(10)), Verdict::Allowed);
    }

    #[test]
    fn sweep_clears_expired_entries() {
        let g = guard(1);
        let ip: IpAddr = "10.1.1.4".parse().unwrap();
        let t0 = Utc::now();
        g.check_at(ip, t0);
        g.check_at(ip, t0);
        assert!(g.blacklist.contains_key(&ip));
        g.sweep_at(t0 + Duration::seconds(31));
        assert!(!g.blacklist.contains_key(&ip));
        assert!(!g.windows.contains_key(&ip));
    }
}
