//! Liveness Prober (spec.md §4.3): a connection-pooled, CSeq-demultiplexed
//! RTSP `DESCRIBE` client. One reader thread per pooled TCP connection,
//! keyed by `(host, port)`, dispatches responses to pending probes by CSeq.

mod endpoint;
mod rtsp;

pub use rtsp::ProbeOutcome;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use endpoint::{Endpoint, HeartbeatConfig};

/// Implemented by anything that can answer "is this URL live". The
/// supervisor depends on this trait rather than the concrete pooled prober
/// so tests can substitute a fake that returns scripted outcomes (spec.md
/// §8 "Supervisor scenarios").
pub trait LivenessProber: Send + Sync {
    fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;

    /// Reconfigures the optional idle-connection heartbeat (spec.md §4.3).
    /// Fakes that don't pool connections have nothing to configure.
    fn configure_heartbeat(&self, _enabled: bool, _interval_secs: u64) {}
}

struct EndpointKey {
    host: String,
    port: u16,
}

fn parse_endpoint(url: &str) -> Option<EndpointKey> {
    let rest = url.strip_prefix("rtsp://")?;
    let after_auth = match rest.split_once('@') {
        Some((_, after)) => after,
        None => rest,
    };
    let host_port = after_auth.split(['/', '?']).next().unwrap_or(after_auth);
    if let Some(stripped) = host_port.strip_prefix('[') {
        // IPv6 literal: [::1]:554
        let (host, port_part) = stripped.split_once(']')?;
        let port = port_part
            .strip_prefix(':')
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(554);
        return Some(EndpointKey { host: host.to_string(), port });
    }
    match host_port.split_once(':') {
        Some((host, port)) => Some(EndpointKey {
            host: host.to_string(),
            port: port.parse().unwrap_or(554),
        }),
        None => Some(EndpointKey {
            host: host_port.to_string(),
            port: 554,
        }),
    }
}

/// The pooled/demuxed prober (spec.md §4.3's target design). Holds at most
/// `capacity` open sockets, keyed by `(host, port)`, with an idle TTL.
pub struct PooledProber {
    capacity: usize,
    idle_ttl: Duration,
    connect_timeout: Duration,
    pool: Mutex<HashMap<(String, u16), Arc<Endpoint>>>,
    /// Recency order for LRU eviction once `capacity` is exceeded.
    order: Mutex<Vec<(String, u16)>>,
    heartbeat: Arc<HeartbeatConfig>,
}

impl PooledProber {
    pub fn new() -> Self {
        Self {
            capacity: 64,
            idle_ttl: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(2),
            pool: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            heartbeat: Arc::new(HeartbeatConfig::new()),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    fn touch(&self, key: &(String, u16)) {
        let mut order = self.order.lock().expect("order lock poisoned");
        order.retain(|k| k != key);
        order.push(key.clone());
    }

    fn evict_idle_and_overflow(&self) {
        let now = Instant::now();
        let mut pool = self.pool.lock().expect("pool lock poisoned");
        let idle: Vec<(String, u16)> = pool
            .iter()
            .filter(|(_, ep)| {
                ep.is_dead()
                    || now.duration_since(*ep.last_activity.lock().expect("last_activity lock poisoned"))
                        >= self.idle_ttl
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &idle {
            if let Some(ep) = pool.remove(key) {
                ep.fail_all_pending();
            }
        }
        drop(pool);
        if !idle.is_empty() {
            let mut order = self.order.lock().expect("order lock poisoned");
            order.retain(|k| !idle.contains(k));
        }

        let mut pool = self.pool.lock().expect("pool lock poisoned");
        while pool.len() > self.capacity {
            let evicted = {
                let mut order = self.order.lock().expect("order lock poisoned");
                if order.is_empty() {
                    break;
                }
                order.remove(0)
            };
            if let Some(ep) = pool.remove(&evicted) {
                ep.fail_all_pending();
            }
        }
    }

    fn endpoint_for(&self, key: &EndpointKey) -> std::io::Result<Arc<Endpoint>> {
        self.evict_idle_and_overflow();
        let map_key = (key.host.clone(), key.port);
        {
            let pool = self.pool.lock().expect("pool lock poisoned");
            if let Some(ep) = pool.get(&map_key) {
                if !ep.is_dead() {
                    self.touch(&map_key);
                    return Ok(ep.clone());
                }
            }
        }
        let endpoint = Endpoint::connect(&key.host, key.port, self.connect_timeout, self.heartbeat.clone())?;
        self.pool.lock().expect("pool lock poisoned").insert(map_key.clone(), endpoint.clone());
        self.touch(&map_key);
        Ok(endpoint)
    }

    /// Current number of pending (outstanding) probes for an endpoint, for
    /// tests asserting spec.md §8's "pending map empty after eviction"
    /// invariant.
    #[cfg(test)]
    pub fn pending_count(&self, host: &str, port: u16) -> usize {
        let pool = self.pool.lock().expect("pool lock poisoned");
        pool.get(&(host.to_string(), port)).map(|e| e.pending_count()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_tracked(&self, host: &str, port: u16) -> bool {
        self.pool.lock().expect("pool lock poisoned").contains_key(&(host.to_string(), port))
    }
}

impl Default for PooledProber {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessProber for PooledProber {
    fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let Some(key) = parse_endpoint(url) else {
            return ProbeOutcome::Invalid;
        };
        let endpoint = match self.endpoint_for(&key) {
            Ok(ep) => ep,
            Err(_) => return ProbeOutcome::Error,
        };
        let (cseq, rx) = match endpoint.describe(url) {
            Ok(pair) => pair,
            Err(_) => return ProbeOutcome::Error,
        };
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => {
                endpoint.forget_pending(cseq);
                ProbeOutcome::Timeout
            }
        }
    }

    fn configure_heartbeat(&self, enabled: bool, interval_secs: u64) {
        self.heartbeat.set(enabled, interval_secs);
    }
}
