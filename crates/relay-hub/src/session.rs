//! Per-connection session lifecycle: register, run both loops, tear down once.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics::{counter, histogram};
use relay_core::{ClientId, Payload};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use crate::client::{ClientHandle, Mailbox};
use crate::connection::{Connection, ConnectionSink, ConnectionSource, Inbound};
use crate::hub::Hub;
use crate::telemetry;

/// Upper bound on closing the sink once a session is torn down.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The peer sent a close frame or ended the stream.
    PeerClosed,
    /// Reading from the connection failed.
    ReadError,
    /// Writing to the connection failed.
    WriteError,
    /// No liveness from the peer within the heartbeat timeout.
    HeartbeatTimeout,
    /// The hub closed the handle (slow consumer or explicit unregister).
    Evicted,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::WriteError => "write_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Ping period; `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Maximum silence from the peer before the session is dropped.
    pub heartbeat_timeout: Duration,
    /// Re-broadcast every inbound message to all clients.
    pub relay_inbound: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Some(Duration::from_secs(30)),
            heartbeat_timeout: Duration::from_secs(60),
            relay_inbound: false,
        }
    }
}

/// Summary returned when a session finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The session's client.
    pub client_id: ClientId,
    /// First termination cause observed.
    pub reason: CloseReason,
    /// Time from registration to teardown.
    pub duration: Duration,
}

/// One-shot guard around unregister-and-close.
///
/// Both loops and any external trigger race on [`trigger`](Self::trigger);
/// only the first records its reason and performs teardown.
pub struct TeardownGate {
    hub: Arc<Hub>,
    handle: Arc<ClientHandle>,
    reason: OnceLock<CloseReason>,
}

impl TeardownGate {
    /// Gate for `handle`, registered in `hub`.
    pub fn new(hub: Arc<Hub>, handle: Arc<ClientHandle>) -> Self {
        Self {
            hub,
            handle,
            reason: OnceLock::new(),
        }
    }

    /// Tear down if nobody has yet. Returns whether this call did.
    pub fn trigger(&self, reason: CloseReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        let _ = self.hub.unregister(self.handle.id());
        let _ = self.handle.close();
        true
    }

    /// The winning reason, once triggered.
    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }
}

/// Register a new client for `conn` and drive it on a spawned task.
///
/// The client is in the hub's live set when this returns.
pub fn spawn_session<C: Connection>(
    conn: C,
    hub: Arc<Hub>,
    options: SessionOptions,
    shutdown: CancellationToken,
) -> (ClientId, JoinHandle<SessionOutcome>) {
    let (handle, mailbox) = hub.client();
    hub.register(handle.clone());
    let client_id = handle.id().clone();
    let task = tokio::spawn(drive(conn, hub, handle, mailbox, options, shutdown));
    (client_id, task)
}

/// Register a new client for `conn` and drive it to completion.
pub async fn run_session<C: Connection>(
    conn: C,
    hub: Arc<Hub>,
    options: SessionOptions,
    shutdown: CancellationToken,
) -> SessionOutcome {
    let (handle, mailbox) = hub.client();
    hub.register(handle.clone());
    drive(conn, hub, handle, mailbox, options, shutdown).await
}

#[instrument(skip_all, fields(client_id = %handle.id()))]
async fn drive<C: Connection>(
    conn: C,
    hub: Arc<Hub>,
    handle: Arc<ClientHandle>,
    mailbox: Mailbox,
    options: SessionOptions,
    shutdown: CancellationToken,
) -> SessionOutcome {
    let started = Instant::now();
    info!("client connected");
    counter!(telemetry::SESSIONS_OPENED_TOTAL).increment(1);

    let gate = Arc::new(TeardownGate::new(hub.clone(), handle.clone()));
    let (sink, source) = conn.split();

    let mut writer = tokio::spawn(
        write_loop(
            sink,
            mailbox,
            handle.clone(),
            gate.clone(),
            options.heartbeat_interval,
            options.heartbeat_timeout,
        )
        .instrument(Span::current()),
    );

    read_loop(source, &hub, &handle, &gate, options.relay_inbound, &shutdown).await;

    // The handle is closed by now; the writer only has its bounded sink close left.
    match tokio::time::timeout(CLOSE_TIMEOUT * 2, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(error = %e, "write task failed");
            let _ = gate.trigger(CloseReason::WriteError);
        }
        Err(_) => {
            warn!("write task did not finish, aborting");
            writer.abort();
        }
    }

    let reason = gate.reason().unwrap_or(CloseReason::Evicted);
    let duration = started.elapsed();
    counter!(telemetry::SESSIONS_CLOSED_TOTAL, "reason" => reason.as_str()).increment(1);
    histogram!(telemetry::SESSION_DURATION_SECONDS).record(duration.as_secs_f64());
    info!(
        %reason,
        duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        dropped = handle.drop_count(),
        "client disconnected"
    );

    SessionOutcome {
        client_id: handle.id().clone(),
        reason,
        duration,
    }
}

async fn read_loop<S: ConnectionSource>(
    mut source: S,
    hub: &Hub,
    handle: &ClientHandle,
    gate: &TeardownGate,
    relay_inbound: bool,
    shutdown: &CancellationToken,
) {
    let reason = loop {
        let event = tokio::select! {
            biased;
            () = handle.closed() => break CloseReason::Evicted,
            () = shutdown.cancelled() => break CloseReason::Shutdown,
            event = source.next_event() => event,
        };

        match event {
            Some(Ok(Inbound::Message(payload))) => {
                handle.mark_alive();
                debug!(bytes = payload.len(), "inbound message");
                if relay_inbound {
                    relay(hub, payload);
                }
            }
            Some(Ok(Inbound::Heartbeat)) => handle.mark_alive(),
            Some(Ok(Inbound::Close)) | None => break CloseReason::PeerClosed,
            Some(Err(e)) if e.is_closed() => {
                debug!(error = %e, "connection closed by peer");
                break CloseReason::PeerClosed;
            }
            Some(Err(e)) => {
                warn!(error = %e, "read failed");
                break CloseReason::ReadError;
            }
        }
    };

    if gate.trigger(reason) {
        debug!(%reason, "read loop initiated teardown");
    }
}

fn relay(hub: &Hub, payload: Payload) {
    let report = hub.broadcast(payload);
    debug!(
        recipients = report.delivered,
        evicted = report.evicted_count(),
        "relayed inbound message"
    );
}

async fn write_loop<S: ConnectionSink>(
    mut sink: S,
    mut mailbox: Mailbox,
    handle: Arc<ClientHandle>,
    gate: Arc<TeardownGate>,
    heartbeat_interval: Option<Duration>,
    heartbeat_timeout: Duration,
) {
    let mut ticker = heartbeat_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let reason = loop {
        tokio::select! {
            biased;
            () = handle.closed() => break CloseReason::Evicted,
            payload = mailbox.recv() => {
                let Some(payload) = payload else {
                    break CloseReason::Evicted;
                };
                let sent = tokio::select! {
                    biased;
                    () = handle.closed() => None,
                    result = sink.send(payload) => Some(result),
                };
                match sent {
                    None => break CloseReason::Evicted,
                    Some(Ok(())) => {}
                    Some(Err(e)) if e.is_closed() => {
                        debug!(error = %e, "write to closed connection");
                        break CloseReason::WriteError;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "write failed");
                        break CloseReason::WriteError;
                    }
                }
            }
            () = tick(ticker.as_mut()) => {
                let silent_for = handle.last_seen_elapsed();
                if silent_for > heartbeat_timeout {
                    warn!(silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX), "heartbeat timeout");
                    break CloseReason::HeartbeatTimeout;
                }
                let pinged = tokio::select! {
                    biased;
                    () = handle.closed() => None,
                    result = sink.ping() => Some(result),
                };
                match pinged {
                    None => break CloseReason::Evicted,
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "ping failed");
                        break CloseReason::WriteError;
                    }
                }
            }
        }
    };

    if gate.trigger(reason) {
        debug!(%reason, "write loop initiated teardown");
    }
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "error closing connection"),
        Err(_) => warn!("connection close timed out"),
    }
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnection, MemoryPeer};

    fn quiet() -> SessionOptions {
        SessionOptions {
            heartbeat_interval: None,
            ..SessionOptions::default()
        }
    }

    fn start(
        hub: &Arc<Hub>,
        options: SessionOptions,
        shutdown: &CancellationToken,
    ) -> (ClientId, JoinHandle<SessionOutcome>, MemoryPeer) {
        let (conn, peer) = MemoryConnection::pair();
        let (id, task) = spawn_session(conn, hub.clone(), options, shutdown.clone());
        (id, task, peer)
    }

    #[tokio::test]
    async fn registered_before_loops_run() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (id, task, peer) = start(&hub, quiet(), &token);
        assert!(hub.contains(&id));
        let _ = peer.close();
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_unregisters_and_closes_once() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (id, task, mut peer) = start(&hub, quiet(), &token);

        let _ = hub.broadcast("hi".into());
        assert_eq!(peer.recv().await.unwrap().as_text(), Some("hi"));

        assert!(peer.close());
        let outcome = task.await.unwrap();
        assert_eq!(outcome.client_id, id);
        assert_eq!(outcome.reason, CloseReason::PeerClosed);
        assert!(hub.is_empty());
        assert_eq!(peer.closes(), 1);
    }

    #[tokio::test]
    async fn stream_end_counts_as_peer_close() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (_id, task, mut peer) = start(&hub, quiet(), &token);
        peer.hang_up();
        assert_eq!(task.await.unwrap().reason, CloseReason::PeerClosed);
        assert_eq!(peer.closes(), 1);
    }

    #[tokio::test]
    async fn write_error_tears_down() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (_id, task, peer) = start(&hub, quiet(), &token);
        peer.set_fail_writes(true);
        let _ = hub.broadcast("x".into());

        let outcome = task.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::WriteError);
        assert!(hub.is_empty());
        assert_eq!(peer.closes(), 1);
    }

    #[tokio::test]
    async fn read_error_tears_down() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (_id, task, peer) = start(&hub, quiet(), &token);
        assert!(peer.fail_read("connection reset"));

        let outcome = task.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::ReadError);
        assert!(hub.is_empty());
        assert_eq!(peer.closes(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_read_and_write_errors_close_once() {
        for _ in 0..50 {
            let hub = Arc::new(Hub::default());
            let token = CancellationToken::new();
            let (id, task, peer) = start(&hub, quiet(), &token);
            peer.set_fail_writes(true);
            let _ = hub.broadcast("x".into());
            let _ = peer.fail_read("reset");

            let outcome = task.await.unwrap();
            assert!(matches!(
                outcome.reason,
                CloseReason::ReadError | CloseReason::WriteError
            ));
            assert_eq!(peer.closes(), 1);
            assert!(!hub.unregister(&id));
        }
    }

    #[test]
    fn teardown_gate_fires_once_across_threads() {
        let hub = Arc::new(Hub::default());
        let (handle, _mailbox) = hub.client();
        hub.register(handle.clone());
        let gate = Arc::new(TeardownGate::new(hub.clone(), handle.clone()));

        let reasons = [
            CloseReason::ReadError,
            CloseReason::WriteError,
            CloseReason::HeartbeatTimeout,
            CloseReason::Shutdown,
        ];
        let winners: usize = reasons
            .into_iter()
            .map(|reason| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.trigger(reason))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| usize::from(t.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
        assert!(gate.reason().is_some());
        assert!(hub.is_empty());
        assert!(handle.is_closed());
        assert!(!gate.trigger(CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn external_unregister_reports_evicted() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (id, task, peer) = start(&hub, quiet(), &token);
        assert!(hub.unregister(&id));
        assert!(!hub.unregister(&id));

        assert_eq!(task.await.unwrap().reason, CloseReason::Evicted);
        assert_eq!(peer.closes(), 1);
    }

    #[tokio::test]
    async fn stalled_consumer_is_evicted_without_affecting_others() {
        let hub = Arc::new(Hub::new(2));
        let token = CancellationToken::new();
        let (slow_id, slow_task, slow_peer) = start(&hub, quiet(), &token);
        let (fast_id, fast_task, mut fast_peer) = start(&hub, quiet(), &token);
        slow_peer.set_stalled(true);

        let mut evicted = Vec::new();
        for i in 0..5 {
            let msg = format!("m{i}");
            evicted.extend(hub.broadcast(Payload::from(msg.clone())).evicted);
            assert_eq!(fast_peer.recv().await.unwrap().as_text(), Some(msg.as_str()));
        }

        assert_eq!(evicted, vec![slow_id.clone()]);
        let outcome = slow_task.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::Evicted);
        assert_eq!(slow_peer.closes(), 1);
        assert!(hub.contains(&fast_id));

        assert!(fast_peer.close());
        assert_eq!(fast_task.await.unwrap().reason, CloseReason::PeerClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let options = SessionOptions {
            heartbeat_interval: Some(Duration::from_secs(1)),
            heartbeat_timeout: Duration::from_secs(3),
            relay_inbound: false,
        };
        let (_id, task, peer) = start(&hub, options, &token);

        let outcome = task.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::HeartbeatTimeout);
        assert!(outcome.duration > Duration::from_secs(3));
        assert!(peer.pings() >= 2);
        assert_eq!(peer.closes(), 1);
        assert!(hub.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_session_alive() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let options = SessionOptions {
            heartbeat_interval: Some(Duration::from_secs(1)),
            heartbeat_timeout: Duration::from_secs(3),
            relay_inbound: false,
        };
        let (_id, task, peer) = start(&hub, options, &token);

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(peer.heartbeat());
        }
        assert!(!task.is_finished());

        let outcome = task.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::HeartbeatTimeout);
        assert!(outcome.duration > Duration::from_secs(13));
    }

    #[tokio::test]
    async fn shutdown_ends_session() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (_a, task_a, peer_a) = start(&hub, quiet(), &token);
        let (_b, task_b, peer_b) = start(&hub, quiet(), &token);

        token.cancel();
        assert_eq!(task_a.await.unwrap().reason, CloseReason::Shutdown);
        assert_eq!(task_b.await.unwrap().reason, CloseReason::Shutdown);
        assert_eq!(peer_a.closes(), 1);
        assert_eq!(peer_b.closes(), 1);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn inbound_relayed_to_all_when_enabled() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let options = SessionOptions {
            relay_inbound: true,
            ..quiet()
        };
        let (_a, _task_a, mut peer_a) = start(&hub, options.clone(), &token);
        let (_b, _task_b, mut peer_b) = start(&hub, options, &token);

        assert!(peer_a.send("from a"));
        assert_eq!(peer_a.recv().await.unwrap().as_text(), Some("from a"));
        assert_eq!(peer_b.recv().await.unwrap().as_text(), Some("from a"));
    }

    #[tokio::test]
    async fn inbound_not_relayed_by_default() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (_a, _task_a, peer_a) = start(&hub, quiet(), &token);
        let (_b, _task_b, mut peer_b) = start(&hub, quiet(), &token);

        assert!(peer_a.send("private"));
        tokio::task::yield_now().await;
        let _ = hub.broadcast("marker".into());
        assert_eq!(peer_b.recv().await.unwrap().as_text(), Some("marker"));
    }

    #[tokio::test]
    async fn run_session_drives_inline() {
        let hub = Arc::new(Hub::default());
        let (conn, peer) = MemoryConnection::pair();
        assert!(peer.close());
        let outcome = run_session(conn, hub.clone(), quiet(), CancellationToken::new()).await;
        assert_eq!(outcome.reason, CloseReason::PeerClosed);
        assert!(hub.is_empty());
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::PeerClosed.as_str(), "peer_closed");
        assert_eq!(CloseReason::HeartbeatTimeout.to_string(), "heartbeat_timeout");
        assert_eq!(CloseReason::Evicted.as_str(), "evicted");
    }

    #[tokio::test(start_paused = true)]
    async fn hung_close_does_not_block_teardown() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let (_id, task, peer) = start(&hub, quiet(), &token);
        peer.set_hung(true);
        assert!(peer.close());

        let outcome = tokio::time::timeout(CLOSE_TIMEOUT * 4, task)
            .await
            .expect("session should finish despite a hung close")
            .unwrap();
        assert_eq!(outcome.reason, CloseReason::PeerClosed);
        assert!(hub.is_empty());
        assert_eq!(peer.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_ping_does_not_block_teardown() {
        let hub = Arc::new(Hub::default());
        let token = CancellationToken::new();
        let options = SessionOptions {
            heartbeat_interval: Some(Duration::from_secs(1)),
            heartbeat_timeout: Duration::from_secs(60),
            relay_inbound: false,
        };
        let (_id, task, peer) = start(&hub, options, &token);
        peer.set_hung(true);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(peer.pings(), 1);
        assert!(peer.fail_read("connection reset"));

        let outcome = tokio::time::timeout(CLOSE_TIMEOUT * 4, task)
            .await
            .expect("session should finish despite a hung ping")
            .unwrap();
        assert_eq!(outcome.reason, CloseReason::ReadError);
        assert!(hub.is_empty());
        assert_eq!(peer.pings(), 1);
        assert_eq!(peer.closes(), 1);
    }
}
