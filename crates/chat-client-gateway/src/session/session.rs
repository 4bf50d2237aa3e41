//! Gateway session state machine
//!
//! Owns one shard's transport: connects, performs the Hello/Identify (or
//! Resume) handshake, pumps frames, and recovers from transport loss with
//! resume-first reconnects under capped jittered backoff. All mutable
//! session state is written only by the session's own tasks; callers
//! observe through [`GatewaySession::status`] and the event channel.

use super::heartbeat::spawn_heartbeat;
use super::{SessionState, SessionStatus};
use crate::error::GatewayError;
use crate::events::{ShardEvent, ShardId};
use crate::limiter::IdentifyRateLimiter;
use crate::protocol::{
    CloseCode, GatewayMessage, IdentifyPayload, IdentifyProperties, OpCode, ReadyPayload,
    ResumePayload,
};
use chat_client_common::ClientConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Buffer for frames queued by the heartbeat task
const OUTBOUND_BUFFER: usize = 16;

/// First reconnect backoff step
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Reconnect backoff ceiling
const BACKOFF_CAP: Duration = Duration::from_secs(120);

/// Consecutive reconnect failures before the shard gives up
const MAX_RECONNECT_FAILURES: u32 = 10;

/// Invalid-session handshake rejections tolerated per connection attempt
const INVALID_SESSION_BUDGET: u32 = 3;

/// Dispatch event type that completes a fresh login
const READY_EVENT: &str = "READY";

/// Dispatch event type that completes a resume
const RESUMED_EVENT: &str = "RESUMED";

/// Sentinel for "no close requested during a pending open"
const NO_ABORT: u32 = u32::MAX;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One shard's gateway connection lifecycle
pub struct GatewaySession {
    shard: ShardId,
    config: Arc<ClientConfig>,
    state: Arc<SessionState>,
    identify_limiter: Arc<IdentifyRateLimiter>,
    events: mpsc::UnboundedSender<ShardEvent>,
    runner: Mutex<Option<RunnerHandle>>,

    /// A handshake is in flight outside the runner lock
    opening: AtomicBool,

    /// Close code requested while a handshake was in flight, or
    /// [`NO_ABORT`]
    abort_open: AtomicU32,
}

/// Clears the opening flag on every exit path, including cancellation
struct OpeningGuard<'a>(&'a AtomicBool);

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct RunnerHandle {
    commands: mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

enum Command {
    Close(u16),
}

impl GatewaySession {
    /// Create a session for one shard
    ///
    /// `events` is the injected hook everything observed on this shard is
    /// forwarded through; the session holds no reference to its owner.
    #[must_use]
    pub fn new(
        shard: ShardId,
        config: Arc<ClientConfig>,
        identify_limiter: Arc<IdentifyRateLimiter>,
        events: mpsc::UnboundedSender<ShardEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shard,
            config,
            state: Arc::new(SessionState::new()),
            identify_limiter,
            events,
            runner: Mutex::new(None),
            opening: AtomicBool::new(false),
            abort_open: AtomicU32::new(NO_ABORT),
        })
    }

    /// The shard this session serves
    #[must_use]
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Last dispatch sequence observed on the current session
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.state.sequence()
    }

    /// When the last heartbeat went out on the current transport
    #[must_use]
    pub fn last_heartbeat_sent(&self) -> Option<std::time::Instant> {
        self.state.last_heartbeat_sent()
    }

    /// When the last heartbeat acknowledgement arrived on the current
    /// transport
    #[must_use]
    pub fn last_heartbeat_ack(&self) -> Option<std::time::Instant> {
        self.state.last_heartbeat_ack()
    }

    /// Establish the transport and complete the login handshake
    ///
    /// Resumes the previous session when one survives, otherwise performs
    /// a fresh identify (waiting for an identify-limiter slot first). On
    /// success the read loop and heartbeat tasks are running and the
    /// stream is live.
    ///
    /// Fails fast, without retry, on fatal close codes
    /// ([`GatewayError::FatalClose`]); transient failures are also
    /// surfaced here, but retrying `open()` may succeed for those.
    pub async fn open(&self) -> Result<(), GatewayError> {
        {
            let mut slot = self.runner.lock().await;
            if slot.as_ref().is_some_and(|handle| !handle.join.is_finished()) {
                return Err(GatewayError::AlreadyOpen);
            }
            *slot = None;
            if self.opening.swap(true, Ordering::SeqCst) {
                return Err(GatewayError::AlreadyOpen);
            }
            self.abort_open.store(NO_ABORT, Ordering::SeqCst);
        }
        let opening = OpeningGuard(&self.opening);

        // The handshake runs with the slot lock released so close() stays
        // responsive while a connection attempt is in flight
        let mut runner = SessionRunner {
            shard: self.shard,
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            identify_limiter: Arc::clone(&self.identify_limiter),
            events: self.events.clone(),
        };
        let established = runner.establish().await;

        let mut slot = self.runner.lock().await;
        drop(opening);
        let conn = match established {
            Ok(conn) => conn,
            Err(err) => {
                self.state.set_status(SessionStatus::Disconnected);
                return Err(err);
            }
        };

        let (commands, command_rx) = mpsc::channel(1);
        let join = tokio::spawn(runner.run(conn, command_rx));
        match self.abort_open.swap(NO_ABORT, Ordering::SeqCst) {
            NO_ABORT => {
                *slot = Some(RunnerHandle { commands, join });
            }
            code => {
                // A close raced the handshake and wins; the session opened
                // and is torn straight back down
                let _ = commands.send(Command::Close(code as u16)).await;
                let _ = join.await;
                self.state.set_status(SessionStatus::Disconnected);
            }
        }
        Ok(())
    }

    /// Close the connection with the given WebSocket close code
    ///
    /// Codes 1000/1001 tell the server to invalidate the session; any
    /// other code leaves it resumable. Idempotent: closing a closed
    /// session is a no-op. A close issued while `open()` is still
    /// handshaking returns promptly and the open tears itself down once
    /// the handshake settles.
    pub async fn close(&self, code: u16) {
        if self.opening.load(Ordering::SeqCst) {
            self.abort_open.store(u32::from(code), Ordering::SeqCst);
        }
        let handle = self.runner.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.commands.send(Command::Close(code)).await;
            let _ = handle.join.await;
        }
        self.state.set_status(SessionStatus::Disconnected);
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("shard", &self.shard)
            .field("status", &self.state.status())
            .finish()
    }
}

/// A live transport with its attendant tasks and channels
struct ActiveConn {
    sink: WsSink,
    read: WsRead,
    heartbeat: JoinHandle<()>,
    outbound_rx: mpsc::Receiver<GatewayMessage>,
    zombie_rx: mpsc::Receiver<()>,
}

impl ActiveConn {
    /// Tear the transport down, optionally sending a close code first
    async fn shutdown(mut self, code: Option<u16>) {
        self.heartbeat.abort();
        if let Some(code) = code {
            let frame = CloseFrame {
                code: code.into(),
                reason: "".into(),
            };
            let _ = self.sink.send(Message::Close(Some(frame))).await;
        }
        let _ = self.sink.close().await;
    }
}

/// What the read loop decided after handling input
enum Flow {
    /// Caller asked us to close with this code
    Closed(u16),
    /// Transport must be replaced; `resume` says whether the session is
    /// worth reattaching to, `delay` defers the first attempt
    Reconnect { resume: bool, delay: Duration },
    /// Server refused us in a way retry cannot fix
    Fatal(CloseCode),
}

/// Handshake result for one connection attempt
enum ConnectOutcome<C = ActiveConn> {
    Established(C),
    Invalidated { resumable: bool },
}

/// The task-side half of a session: owns all mutation
struct SessionRunner {
    shard: ShardId,
    config: Arc<ClientConfig>,
    state: Arc<SessionState>,
    identify_limiter: Arc<IdentifyRateLimiter>,
    events: mpsc::UnboundedSender<ShardEvent>,
}

impl SessionRunner {
    fn emit(&self, event: ShardEvent) {
        // A gone consumer is not this layer's problem
        let _ = self.events.send(event);
    }

    /// Connect and complete the login handshake, retrying internally when
    /// the server invalidates the session mid-handshake
    async fn establish(&mut self) -> Result<ActiveConn, GatewayError> {
        let mut invalidations: u32 = 0;
        let mut allow_resume = true;

        loop {
            match self.connect_once(allow_resume).await? {
                ConnectOutcome::Established(conn) => return Ok(conn),
                ConnectOutcome::Invalidated { resumable } => {
                    invalidations += 1;
                    if invalidations >= INVALID_SESSION_BUDGET {
                        return Err(GatewayError::Handshake(format!(
                            "session invalidated {invalidations} times in a row"
                        )));
                    }
                    if !resumable {
                        self.state.clear_session();
                    }
                    allow_resume = resumable;

                    // The server wants breathing room before the next login
                    let delay = invalid_session_delay();
                    tracing::warn!(
                        shard = %self.shard,
                        resumable,
                        delay_ms = delay.as_millis() as u64,
                        "session invalidated during handshake; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// One transport establishment: connect, Hello, heartbeat, login
    async fn connect_once(&mut self, allow_resume: bool) -> Result<ConnectOutcome, GatewayError> {
        let resume_target = if allow_resume {
            self.state.resume_target()
        } else {
            None
        };
        let url = if resume_target.is_some() {
            self.state
                .resume_gateway_url()
                .unwrap_or_else(|| self.config.gateway_url.clone())
        } else {
            self.config.gateway_url.clone()
        };

        self.state.set_status(SessionStatus::Connecting);
        tracing::info!(
            shard = %self.shard,
            url = %url,
            resuming = resume_target.is_some(),
            "connecting to gateway"
        );

        let deadline = Instant::now() + self.config.handshake_timeout;
        let (ws, _response) = timeout_at(deadline, connect_async(url.as_str()))
            .await
            .map_err(|_| GatewayError::HandshakeTimeout)??;
        let (mut sink, mut read) = ws.split();

        self.state.set_status(SessionStatus::WaitingForHello);
        let hello = loop {
            let frame = timeout_at(deadline, read.next())
                .await
                .map_err(|_| GatewayError::HandshakeTimeout)?;
            match frame {
                None => {
                    return Err(GatewayError::Handshake(
                        "connection closed before Hello".to_string(),
                    ))
                }
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Message::Text(text))) => {
                    let msg = GatewayMessage::from_json(&text)?;
                    match msg.as_hello() {
                        Some(hello) => break hello,
                        None => {
                            return Err(GatewayError::Handshake(format!(
                                "expected Hello, got {}",
                                msg.op
                            )))
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => return Err(self.handshake_close_error(frame)),
                Some(Ok(_)) => {}
            }
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        tracing::debug!(
            shard = %self.shard,
            heartbeat_interval_ms = hello.heartbeat_interval,
            "hello received"
        );
        self.emit(ShardEvent::Connected { shard: self.shard });

        self.state.reset_heartbeat();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (zombie_tx, zombie_rx) = mpsc::channel(1);
        let heartbeat = spawn_heartbeat(
            self.shard,
            Arc::clone(&self.state),
            interval,
            self.config.heartbeat_jitter,
            outbound_tx,
            zombie_tx,
        );

        let mut conn = ActiveConn {
            sink,
            read,
            heartbeat,
            outbound_rx,
            zombie_rx,
        };

        match self.login(&mut conn, resume_target).await {
            Ok(ConnectOutcome::Established(())) => Ok(ConnectOutcome::Established(conn)),
            Ok(ConnectOutcome::Invalidated { resumable }) => {
                conn.shutdown(None).await;
                Ok(ConnectOutcome::Invalidated { resumable })
            }
            Err(err) => {
                conn.shutdown(None).await;
                Err(err)
            }
        }
    }

    /// Send Resume or Identify and wait for the stream to go live
    async fn login(
        &mut self,
        conn: &mut ActiveConn,
        resume_target: Option<(String, u64)>,
    ) -> Result<ConnectOutcome<()>, GatewayError> {
        if let Some((session_id, seq)) = resume_target {
            self.state.set_status(SessionStatus::Resuming);
            tracing::info!(shard = %self.shard, session_id = %session_id, seq, "resuming session");

            let frame = GatewayMessage::resume(&ResumePayload {
                token: self.config.token.clone(),
                session_id,
                seq,
            });
            send_frame(&mut conn.sink, &frame).await?;
        } else {
            self.state.set_status(SessionStatus::Identifying);
            // A fresh login forgets the old session; the sequence restarts
            // from whatever the new stream dispatches first
            self.state.clear_session();

            // The cluster-wide spacing wait is unbounded by design; the
            // handshake timeout only covers the frames around it
            let permit = self.identify_limiter.acquire(self.shard.number, None).await?;
            tracing::info!(shard = %self.shard, bucket = permit.key(), "identifying");

            let payload = IdentifyPayload {
                token: self.config.token.clone(),
                properties: IdentifyProperties::library(),
                intents: self.config.intents,
                shard: Some([self.shard.number, self.shard.total]),
            };
            let sent = send_frame(&mut conn.sink, &GatewayMessage::identify(&payload)).await;
            drop(permit);
            sent?;
        }

        let deadline = Instant::now() + self.config.handshake_timeout;
        self.await_live(conn, deadline).await
    }

    /// Pump frames until READY or RESUMED completes the handshake
    async fn await_live(
        &mut self,
        conn: &mut ActiveConn,
        deadline: Instant,
    ) -> Result<ConnectOutcome<()>, GatewayError> {
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return Err(GatewayError::HandshakeTimeout),
                Some(frame) = conn.outbound_rx.recv() => {
                    send_frame(&mut conn.sink, &frame).await?;
                }
                frame = conn.read.next() => match frame {
                    None => {
                        return Err(GatewayError::Handshake(
                            "connection closed during login".to_string(),
                        ))
                    }
                    Some(Err(err)) => return Err(err.into()),
                    Some(Ok(Message::Close(frame))) => return Err(self.handshake_close_error(frame)),
                    Some(Ok(Message::Text(text))) => {
                        let msg = GatewayMessage::from_json(&text)?;
                        match msg.op {
                            OpCode::Dispatch => {
                                if let Some(done) = self.handle_login_dispatch(&msg)? {
                                    return Ok(done);
                                }
                            }
                            OpCode::HeartbeatAck => self.state.record_heartbeat_ack(),
                            OpCode::Heartbeat => {
                                let beat = GatewayMessage::heartbeat(self.state.sequence());
                                send_frame(&mut conn.sink, &beat).await?;
                            }
                            OpCode::InvalidSession => {
                                let resumable = msg.as_invalid_session().unwrap_or(false);
                                return Ok(ConnectOutcome::Invalidated { resumable });
                            }
                            OpCode::Reconnect => {
                                return Err(GatewayError::Handshake(
                                    "server requested reconnect during login".to_string(),
                                ))
                            }
                            op => {
                                tracing::warn!(shard = %self.shard, op = %op, "unexpected frame during login");
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Handle a dispatch observed during login; READY/RESUMED finish it
    fn handle_login_dispatch(
        &mut self,
        msg: &GatewayMessage,
    ) -> Result<Option<ConnectOutcome<()>>, GatewayError> {
        let Some((event_type, seq, payload)) = msg.as_dispatch() else {
            tracing::warn!(shard = %self.shard, "malformed dispatch frame during login");
            return Ok(None);
        };

        let event_type = event_type.to_string();
        self.forward_dispatch(&event_type, seq, payload);

        match event_type.as_str() {
            READY_EVENT => {
                let ready: ReadyPayload = serde_json::from_value(payload.clone())?;
                self.state
                    .set_session(ready.session_id.clone(), ready.resume_gateway_url);
                self.state.set_status(SessionStatus::Connected);
                tracing::info!(shard = %self.shard, session_id = %ready.session_id, "session ready");
                self.emit(ShardEvent::Ready {
                    shard: self.shard,
                    session_id: ready.session_id,
                });
                Ok(Some(ConnectOutcome::Established(())))
            }
            RESUMED_EVENT => {
                self.state.set_status(SessionStatus::Connected);
                tracing::info!(shard = %self.shard, "session resumed");
                self.emit(ShardEvent::Resumed { shard: self.shard });
                Ok(Some(ConnectOutcome::Established(())))
            }
            _ => Ok(None),
        }
    }

    /// Forward a dispatch downstream if its sequence advances the stream
    fn forward_dispatch(&self, event_type: &str, seq: u64, payload: &serde_json::Value) {
        if self.state.observe_sequence(seq) {
            tracing::trace!(shard = %self.shard, event_type, seq, "dispatch");
            self.emit(ShardEvent::Dispatch {
                shard: self.shard,
                event_type: event_type.to_string(),
                sequence: seq,
                payload: payload.clone(),
            });
        } else {
            tracing::warn!(
                shard = %self.shard,
                event_type,
                seq,
                last = ?self.state.sequence(),
                "non-advancing dispatch sequence; dropping frame"
            );
        }
    }

    /// Map a close frame received mid-handshake to an error
    fn handshake_close_error(&self, frame: Option<CloseFrame<'_>>) -> GatewayError {
        let code = frame.and_then(|f| CloseCode::from_u16(u16::from(f.code)));
        match code {
            Some(code) if code.is_fatal() => GatewayError::FatalClose(code),
            Some(code) => {
                if !code.can_resume() {
                    self.state.clear_session();
                }
                GatewayError::Handshake(format!("closed during handshake: {code}"))
            }
            None => GatewayError::Handshake("closed during handshake".to_string()),
        }
    }

    /// Main loop: pump the live stream, reconnecting until told to stop
    async fn run(mut self, conn: ActiveConn, mut commands: mpsc::Receiver<Command>) {
        let mut conn = conn;
        loop {
            match self.drive(&mut conn, &mut commands).await {
                Flow::Closed(code) => {
                    conn.shutdown(Some(code)).await;
                    if code == 1000 || code == 1001 {
                        self.state.clear_session();
                    }
                    self.state.set_status(SessionStatus::Disconnected);
                    tracing::info!(shard = %self.shard, code, "session closed by request");
                    self.emit(ShardEvent::Disconnected {
                        shard: self.shard,
                        code: None,
                    });
                    return;
                }
                Flow::Fatal(code) => {
                    conn.shutdown(None).await;
                    self.state.set_status(SessionStatus::Disconnected);
                    tracing::error!(shard = %self.shard, code = %code, "fatal gateway close; shard stopped");
                    self.emit(ShardEvent::Disconnected {
                        shard: self.shard,
                        code: Some(code),
                    });
                    return;
                }
                Flow::Reconnect { resume, delay } => {
                    conn.shutdown(None).await;
                    if !resume {
                        self.state.clear_session();
                    }
                    self.state.set_status(SessionStatus::Reconnecting);
                    self.emit(ShardEvent::Reconnecting { shard: self.shard });

                    match self.reconnect(delay, &mut commands).await {
                        Some(new_conn) => conn = new_conn,
                        None => return,
                    }
                }
            }
        }
    }

    /// Handle stream input until something changes the flow
    async fn drive(&mut self, conn: &mut ActiveConn, commands: &mut mpsc::Receiver<Command>) -> Flow {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    return match cmd {
                        Some(Command::Close(code)) => Flow::Closed(code),
                        // Session handle dropped: shut down cleanly
                        None => Flow::Closed(1000),
                    };
                }
                Some(()) = conn.zombie_rx.recv() => {
                    tracing::warn!(shard = %self.shard, "zombied connection; forcing reconnect");
                    return Flow::Reconnect { resume: true, delay: Duration::ZERO };
                }
                Some(frame) = conn.outbound_rx.recv() => {
                    if let Err(err) = send_frame(&mut conn.sink, &frame).await {
                        tracing::warn!(shard = %self.shard, error = %err, "write failed");
                        return Flow::Reconnect { resume: true, delay: Duration::ZERO };
                    }
                }
                frame = conn.read.next() => match frame {
                    None => {
                        tracing::warn!(shard = %self.shard, "gateway stream ended");
                        return Flow::Reconnect { resume: true, delay: Duration::ZERO };
                    }
                    Some(Err(err)) => {
                        tracing::warn!(shard = %self.shard, error = %err, "read failed");
                        return Flow::Reconnect { resume: true, delay: Duration::ZERO };
                    }
                    Some(Ok(message)) => {
                        if let Some(flow) = self.handle_message(conn, message).await {
                            return flow;
                        }
                    }
                },
            }
        }
    }

    /// Handle one WebSocket message on the live stream
    async fn handle_message(&mut self, conn: &mut ActiveConn, message: Message) -> Option<Flow> {
        match message {
            Message::Text(text) => match GatewayMessage::from_json(&text) {
                Ok(msg) => self.handle_frame(conn, &msg).await,
                Err(err) => {
                    // Unknown opcodes fail closed: logged, never guessed at
                    tracing::warn!(shard = %self.shard, error = %err, "undecodable frame; ignoring");
                    None
                }
            },
            Message::Close(frame) => {
                let code = frame.and_then(|f| CloseCode::from_u16(u16::from(f.code)));
                Some(close_flow(code))
            }
            Message::Binary(_) => {
                tracing::warn!(shard = %self.shard, "binary frame on a JSON stream; ignoring");
                None
            }
            _ => None,
        }
    }

    /// Exhaustive dispatch over the server's opcodes
    async fn handle_frame(&mut self, conn: &mut ActiveConn, msg: &GatewayMessage) -> Option<Flow> {
        match msg.op {
            OpCode::Dispatch => {
                if let Some((event_type, seq, payload)) = msg.as_dispatch() {
                    let event_type = event_type.to_string();
                    self.forward_dispatch(&event_type, seq, payload);
                } else {
                    tracing::warn!(shard = %self.shard, "malformed dispatch frame; ignoring");
                }
                None
            }
            OpCode::HeartbeatAck => {
                tracing::trace!(shard = %self.shard, "heartbeat acknowledged");
                self.state.record_heartbeat_ack();
                None
            }
            OpCode::Heartbeat => {
                // Server requested an immediate beat
                let beat = GatewayMessage::heartbeat(self.state.sequence());
                if let Err(err) = send_frame(&mut conn.sink, &beat).await {
                    tracing::warn!(shard = %self.shard, error = %err, "heartbeat response failed");
                    return Some(Flow::Reconnect { resume: true, delay: Duration::ZERO });
                }
                None
            }
            OpCode::Reconnect => {
                tracing::info!(shard = %self.shard, "server requested reconnect");
                Some(Flow::Reconnect { resume: true, delay: Duration::ZERO })
            }
            OpCode::InvalidSession => {
                let resumable = msg.as_invalid_session().unwrap_or(false);
                tracing::warn!(shard = %self.shard, resumable, "session invalidated");
                // Only a fresh login needs breathing room; a resume
                // reattaches immediately like a server-requested reconnect
                let delay = if resumable {
                    Duration::ZERO
                } else {
                    invalid_session_delay()
                };
                Some(Flow::Reconnect {
                    resume: resumable,
                    delay,
                })
            }
            op => {
                tracing::warn!(shard = %self.shard, op = %op, "unexpected server frame; ignoring");
                None
            }
        }
    }

    /// Re-establish the transport with capped jittered backoff
    ///
    /// Returns None when the shard stops (fatal close, retry budget
    /// exhausted, or a close command during backoff); status and events
    /// are already settled in that case.
    async fn reconnect(
        &mut self,
        initial_delay: Duration,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Option<ActiveConn> {
        let mut failures: u32 = 0;
        let mut delay = initial_delay;

        loop {
            if !delay.is_zero() {
                tokio::select! {
                    () = sleep(delay) => {}
                    _ = commands.recv() => {
                        self.state.set_status(SessionStatus::Disconnected);
                        self.emit(ShardEvent::Disconnected { shard: self.shard, code: None });
                        return None;
                    }
                }
            }

            match self.establish().await {
                Ok(conn) => {
                    tracing::info!(shard = %self.shard, failures, "reconnected");
                    return Some(conn);
                }
                Err(GatewayError::FatalClose(code)) => {
                    self.state.set_status(SessionStatus::Disconnected);
                    tracing::error!(shard = %self.shard, code = %code, "fatal close during reconnect; shard stopped");
                    self.emit(ShardEvent::Disconnected {
                        shard: self.shard,
                        code: Some(code),
                    });
                    return None;
                }
                Err(err) => {
                    failures += 1;
                    if failures >= MAX_RECONNECT_FAILURES {
                        self.state.set_status(SessionStatus::Disconnected);
                        tracing::error!(
                            shard = %self.shard,
                            failures,
                            error = %err,
                            "reconnect budget exhausted; shard stopped"
                        );
                        self.emit(ShardEvent::Disconnected { shard: self.shard, code: None });
                        return None;
                    }

                    delay = backoff_delay(failures);
                    tracing::warn!(
                        shard = %self.shard,
                        error = %err,
                        failures,
                        next_attempt_ms = delay.as_millis() as u64,
                        "reconnect attempt failed; backing off"
                    );
                }
            }
        }
    }
}

/// Map a peer close code to the resulting flow
fn close_flow(code: Option<CloseCode>) -> Flow {
    match code {
        Some(code) if code.is_fatal() => Flow::Fatal(code),
        Some(code) => Flow::Reconnect {
            resume: code.can_resume(),
            delay: Duration::ZERO,
        },
        // Unclassified codes are treated like transport loss
        None => Flow::Reconnect {
            resume: true,
            delay: Duration::ZERO,
        },
    }
}

/// Backoff for the nth consecutive reconnect failure
fn backoff_delay(failures: u32) -> Duration {
    let exp = BACKOFF_BASE
        .saturating_mul(2_u32.saturating_pow(failures.saturating_sub(1)))
        .min(BACKOFF_CAP);
    exp.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
}

/// Delay before re-logging-in after an invalid session
fn invalid_session_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1_000..=5_000))
}

async fn send_frame(sink: &mut WsSink, frame: &GatewayMessage) -> Result<(), GatewayError> {
    let json = frame.to_json()?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
