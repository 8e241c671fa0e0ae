use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::rtsp::{build_describe_request, build_options_request, try_parse_response, ProbeOutcome};

const HEARTBEAT_TICK: Duration = Duration::from_secs(1);
const HEARTBEAT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, live-updatable heartbeat configuration (spec.md §4.3 "Optional
/// heartbeat"). Every pooled endpoint reads the same instance so a settings
/// change takes effect for already-open connections, not just new ones.
pub(super) struct HeartbeatConfig {
    enabled: AtomicBool,
    interval_secs: AtomicU64,
}

impl HeartbeatConfig {
    pub(super) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            interval_secs: AtomicU64::new(5),
        }
    }

    pub(super) fn set(&self, enabled: bool, interval_secs: u64) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.interval_secs.store(interval_secs, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.load(Ordering::SeqCst).max(1))
    }
}

/// One `(hostname, port)` connection (spec.md §4.3). Holds the open socket,
/// the CSeq counter, and the pending-request map. A dedicated reader thread
/// owns the read half of the socket and dispatches complete responses to
/// their matching pending request by CSeq; responses with no match are
/// dropped (including heartbeat replies). A second dedicated thread sends an
/// OPTIONS heartbeat on an idle connection when enabled, keeping it warm so
/// the next real probe skips the connect handshake.
pub struct Endpoint {
    writer: Mutex<TcpStream>,
    state: Mutex<EndpointState>,
    pub last_activity: Mutex<Instant>,
    last_url: Mutex<Option<String>>,
    dead: Arc<AtomicBool>,
}

struct EndpointState {
    next_cseq: u64,
    pending: HashMap<u64, Sender<ProbeOutcome>>,
}

impl Endpoint {
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        heartbeat: Arc<HeartbeatConfig>,
    ) -> std::io::Result<Arc<Self>> {
        let addr = format!("{host}:{port}");
        let stream = {
            let mut last_err = None;
            let mut resolved = addr.clone().to_string();
            // Resolve + connect with a bounded timeout, same shape as
            // std::net::TcpStream::connect_timeout but accepting a hostname.
            use std::net::ToSocketAddrs;
            let mut stream = None;
            for sock_addr in addr.to_socket_addrs()? {
                resolved = sock_addr.to_string();
                match TcpStream::connect_timeout(&sock_addr, connect_timeout) {
                    Ok(s) => {
                        stream = Some(s);
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            stream.ok_or_else(|| {
                last_err.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address for {resolved}"))
                })
            })?
        };

        let reader_stream = stream.try_clone()?;
        let endpoint = Arc::new(Endpoint {
            writer: Mutex::new(stream),
            state: Mutex::new(EndpointState {
                next_cseq: 1,
                pending: HashMap::new(),
            }),
            last_activity: Mutex::new(Instant::now()),
            last_url: Mutex::new(None),
            dead: Arc::new(AtomicBool::new(false)),
        });

        let reader_endpoint = endpoint.clone();
        std::thread::spawn(move || reader_loop(reader_stream, reader_endpoint));

        let heartbeat_endpoint = endpoint.clone();
        std::thread::spawn(move || heartbeat_loop(heartbeat_endpoint, heartbeat));

        Ok(endpoint)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Sends a DESCRIBE and returns a receiver the caller awaits (with its
    /// own timeout). CSeq assignment and pending-map insertion happen under
    /// one lock, satisfying the atomicity requirement in spec.md §5.
    pub fn describe(&self, url: &str) -> std::io::Result<(u64, Receiver<ProbeOutcome>)> {
        *self.last_url.lock().expect("last_url lock poisoned") = Some(url.to_string());
        self.send_request(|cseq| build_describe_request(url, cseq))
    }

    pub fn heartbeat(&self, url: &str) -> std::io::Result<(u64, Receiver<ProbeOutcome>)> {
        self.send_request(|cseq| build_options_request(url, cseq))
    }

    fn send_request(
        &self,
        build: impl FnOnce(u64) -> Vec<u8>,
    ) -> std::io::Result<(u64, Receiver<ProbeOutcome>)> {
        let (tx, rx) = mpsc::channel();
        let cseq = {
            let mut state = self.state.lock().expect("endpoint state lock poisoned");
            let cseq = state.next_cseq;
            state.next_cseq += 1;
            state.pending.insert(cseq, tx);
            cseq
        };
        let bytes = build(cseq);
        let mut writer = self.writer.lock().expect("endpoint writer lock poisoned");
        if let Err(err) = writer.write_all(&bytes) {
            drop(writer);
            let mut state = self.state.lock().expect("endpoint state lock poisoned");
            state.pending.remove(&cseq);
            return Err(err);
        }
        *self.last_activity.lock().expect("last_activity lock poisoned") = Instant::now();
        Ok((cseq, rx))
    }

    /// Removes a pending request without resolving it (used when the
    /// caller's own timeout fires before a response arrived).
    pub fn forget_pending(&self, cseq: u64) {
        let mut state = self.state.lock().expect("endpoint state lock poisoned");
        state.pending.remove(&cseq);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("endpoint state lock poisoned").pending.len()
    }

    /// Resolves every outstanding pending request as `Error` and marks the
    /// endpoint dead. Called on transport close/error and on eviction.
    pub fn fail_all_pending(&self) {
        self.dead.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().expect("endpoint state lock poisoned");
        for (_, tx) in state.pending.drain() {
            let _ = tx.send(ProbeOutcome::Error);
        }
    }
}

/// Sends an OPTIONS heartbeat once the connection has been idle for the
/// configured interval, so a pooled connection with no active traffic
/// doesn't get evicted or silently drop (spec.md §4.3). No-ops until a
/// DESCRIBE has recorded a URL to heartbeat against.
fn heartbeat_loop(endpoint: Arc<Endpoint>, config: Arc<HeartbeatConfig>) {
    loop {
        std::thread::sleep(HEARTBEAT_TICK);
        if endpoint.is_dead() {
            return;
        }
        if !config.enabled() {
            continue;
        }
        let idle_for = endpoint
            .last_activity
            .lock()
            .expect("last_activity lock poisoned")
            .elapsed();
        if idle_for < config.interval() {
            continue;
        }
        let url = endpoint.last_url.lock().expect("last_url lock poisoned").clone();
        let Some(url) = url else { continue };
        let Ok((cseq, rx)) = endpoint.heartbeat(&url) else {
            return;
        };
        if rx.recv_timeout(HEARTBEAT_REPLY_TIMEOUT).is_err() {
            endpoint.forget_pending(cseq);
        }
    }
}

fn reader_loop(mut stream: TcpStream, endpoint: Arc<Endpoint>) {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        if endpoint.is_dead() {
            return;
        }
        match stream.read(&mut chunk) {
            Ok(0) => {
                endpoint.fail_all_pending();
                return;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match try_parse_response(&buf) {
                        Some((parsed, consumed)) => {
                            buf.drain(..consumed);
                            *endpoint.last_activity.lock().expect("last_activity lock poisoned") =
                                Instant::now();
                            if let Some(cseq) = parsed.cseq {
                                let sender = {
                                    let mut state =
                                        endpoint.state.lock().expect("endpoint state lock poisoned");
                                    state.pending.remove(&cseq)
                                };
                                if let Some(sender) = sender {
                                    let _ = sender.send(parsed.outcome);
                                }
                                // Unmatched CSeq (including heartbeat replies
                                // and unsolicited responses): dropped.
                            }
                        }
                        None => break,
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(_) => {
                endpoint.fail_all_pending();
                return;
            }
        }
    }
}
