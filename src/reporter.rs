//! Reporter: periodically drains the event buffer and POSTs batches to the
//! backend as JSON with exponential-backoff retries. Batches are persisted to
//! disk before sending and recovered on startup, with a retention cap on
//! pending files.

use crate::config::Config;
use crate::error::NetlureError;
use crate::event::{AttackEvent, EventBus};
use crate::geo::{GeoInfo, GeoLookup};
use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct Payload<'a> {
    events: &'a [AttackEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    source_geo: Option<BTreeMap<String, GeoInfo>>,
}

pub struct Reporter {
    cfg: Config,
    bus: Arc<EventBus>,
    client: Client,
    shutdown: broadcast::Receiver<()>,
    geo: Option<Arc<dyn GeoLookup>>,
}

impl Reporter {
    pub fn new(cfg: Config, bus: Arc<EventBus>, shutdown: broadcast::Receiver<()>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self { cfg, bus, client, shutdown, geo: None }
    }

    pub fn with_geo(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub async fn run(&mut self) -> Result<()> {
        // On startup, attempt to recover and resend any pending files left on disk.
        self.recover_pending_files().await;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => { info!("reporter shutdown"); return Ok(()); }
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.cfg.report_interval_seconds)) => {}
            }

            let events = self.bus.drain();
            if events.is_empty() {
                continue;
            }

            // Persist the pending batch before sending (rotated file).
            let pending_dir = self.pending_dir();
            let _ = fs::create_dir_all(&pending_dir);
            self.prune_old_pending_files(&pending_dir, true);
            let file_name = format!("pending_{}.json", Utc::now().timestamp_micros());
            let pending_path = pending_dir.join(&file_name);
            if let Ok(s) = serde_json::to_string(&events) {
                let _ = fs::write(&pending_path, s);
            }

            let Some(url) = self.cfg.backend_url.clone() else {
                warn!("no backend URL configured; batch kept on disk only");
                continue;
            };

            let payload = self.payload(&events).await;
            if self.send_payload_with_retry(&url, &payload).await {
                let _ = fs::remove_file(&pending_path);
                debug!(count = events.len(), "batch delivered and pending file removed");
            } else {
                warn!(
                    error = %NetlureError::SinkUnavailable(url),
                    "failed to deliver batch after retries; re-buffering"
                );
                // Back into the buffer for the next interval; the bounded bus
                // drops oldest-first if sessions outran delivery meanwhile.
                self.bus.requeue(events);
            }
        }
    }

    async fn payload<'a>(&self, events: &'a [AttackEvent]) -> Payload<'a> {
        let source_geo = match &self.geo {
            None => None,
            Some(geo) => {
                let mut map = BTreeMap::new();
                for ev in events {
                    let key = ev.source_ip.to_string();
                    if !map.contains_key(&key) {
                        map.insert(key, geo.lookup(ev.source_ip).await);
                    }
                }
                Some(map)
            }
        };
        Payload { events, source_geo }
    }

    fn pending_dir(&self) -> PathBuf {
        self.cfg.data_dir.join("pending")
    }

    /// Prune oldest pending_*.json files to enforce retention. If account_new
    /// is true, we prune assuming one more file will soon be added.
    pub fn prune_old_pending_files(&self, pending_dir: &PathBuf, account_new: bool) {
        if let Ok(entries) = fs::read_dir(pending_dir) {
            let mut files: Vec<_> = entries
                .flatten()
                .filter_map(|e| {
                    let p = e.path();
                    let name = p.file_name()?.to_str()?;
                    if name.starts_with("pending_") && name.ends_with(".json") {
                        let modified = e.metadata().ok()?.modified().ok()?;
                        Some((p, modified))
                    } else {
                        None
                    }
                })
                .collect();
            files.sort_by_key(|(_, m)| *m);
            let count = files.len();
            let limit = self.cfg.max_pending_files;
            if count > 0 && (count >= limit || (account_new && count + 1 > limit)) {
                let excess = if account_new { count + 1 - limit } else { count - limit };
                for (p, _) in files.into_iter().take(excess) {
                    let _ = fs::remove_file(p);
                }
            }
        }
    }

    async fn recover_pending_files(&self) {
        let pending_dir = self.pending_dir();
        let mut candidates: Vec<PathBuf> = Vec::new();
        let single = self.cfg.data_dir.join("pending_report.json");
        if single.exists() {
            candidates.push(single);
        }
        if let Ok(entries) = fs::read_dir(&pending_dir) {
            for e in entries.flatten() {
                let p = e.path();
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with("pending_") && name.ends_with(".json") {
                        candidates.push(p);
                    }
                }
            }
        }

        for path in candidates {
            let Ok(s) = fs::read_to_string(&path) else { continue };
            let Ok(events) = serde_json::from_str::<Vec<AttackEvent>>(&s) else { continue };
            let Some(url) = self.cfg.backend_url.clone() else { continue };
            let payload = self.payload(&events).await;
            if self.send_payload_with_retry(&url, &payload).await {
                let _ = fs::remove_file(&path);
            }
        }
    }

    /// Run pending-file recovery once (used by `--resend-pending`).
    pub async fn recover_pending_files_once(&self) {
        self.recover_pending_files().await;
    }

    async fn send_payload_with_retry(&self, url: &str, payload: &Payload<'_>) -> bool {
        let mut backoff = 1u64;
        let max_retries = 5;
        for _attempt in 0..=max_retries {
            let mut req = self.client.post(url).json(payload);
            if let Some(token) = &self.cfg.backend_token {
                req = req.bearer_auth(token);
            }
            match req.send().await {
                Ok(r) if r.status().is_success() => return true,
                Ok(r) => warn!(status = ?r.status(), "report failed status"),
                Err(e) => warn!(error = ?e, "report POST error"),
            }
            tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
            backoff = std::cmp::min(backoff * 2, 60);
        }
        false
    }

    /// Send a single batch immediately (used by integration tests).
    pub async fn send_once(&self, events: Vec<AttackEvent>) -> bool {
        // Persist first so the batch survives even without a backend.
        let _ = fs::create_dir_all(&self.cfg.data_dir);
        let pending_path = self.cfg.data_dir.join("pending_report.json");
        if let Ok(s) = serde_json::to_string(&events) {
            let _ = fs::write(&pending_path, s);
        }

        let Some(url) = &self.cfg.backend_url else { return true };
        let payload = self.payload(&events).await;
        let ok = self.send_payload_with_retry(url, &payload).await;
        if ok {
            let _ = fs::remove_file(&pending_path);
        }
        ok
    }
}
