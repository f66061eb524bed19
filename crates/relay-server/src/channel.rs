//! The session channel: transport events in, envelopes out, and back.
//!
//! [`ChannelCore`] owns every table the bridge keeps:
//!
//! - the consumer [`Inbox`]
//! - the HTTP and websockets [`Dialogues`]
//! - the [`CorrelationTable`] of initial-leg waiters, keyed by request identity
//! - the [`SessionRegistry`] of live transports
//!
//! Two transport paths feed it. An upgraded connection on any path runs
//! [`ChannelCore::run_upgraded_session`]: it forwards the HTTP REQUEST and a
//! CONNECT, then waits (bounded by the response timeout) for the consumer to
//! resolve the request while relaying client frames as SEND. The
//! `/socket.io/` endpoint instead produces [`SessionEvent`]s, all dispatched
//! through [`ChannelCore::handle_event`].
//!
//! The consumer talks back through [`ChannelCore::send`], which dispatches on
//! the envelope's protocol id.
//!
//! [`SessionChannel`] wraps the core with the STOPPED/RUNNING lifecycle.

use std::net::SocketAddr;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsFrame, WebSocket};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use relay_core::{Address, SessionKey};
use relay_protocol::{
    Dialogue, DialogueError, DialogueLabel, Dialogues, Envelope, HttpContent, HttpMessage, Message,
    Payload, ProtocolId, Role, WebsocketsContent, WebsocketsMessage, WebsocketsPerformative,
};
use relay_settings::ServerSettings;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::correlation::{CorrelationTable, ResolveOutcome};
use crate::errors::{ChannelError, Result, TransportError};
use crate::inbox::{Inbox, TryEnqueueError};
use crate::server;
use crate::sessions::{Session, SessionRegistry};
use crate::spec::{AllowAll, ApiSpec, ParsedRequest, SpecValidator};
use crate::transport::{CloseReason, Framing, Transport, WsTransport};

/// Event names on the multiplexed endpoint that never carry client data.
pub const RESERVED_EVENTS: &[&str] = &["connect", "disconnect", "agent"];

/// How long `disconnect` waits for the server task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Whether the channel is accepting connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Not accepting connections; sends fail.
    Stopped,
    /// Serving.
    Running,
}

/// How an upgraded session ended.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    /// The consumer answered the initial leg with this message.
    Resolved(Payload),
    /// The window elapsed and the consumer never addressed the session.
    Unhandled,
    /// The window elapsed after the consumer had addressed the session.
    TimedOut,
    /// The client went away first.
    ClientClosed,
    /// The channel shut down, or the pending entry was dropped.
    Cancelled,
    /// The session could not be set up.
    Failed(String),
}

impl SessionOutcome {
    fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Self::Resolved(Payload::Http(msg)) => match &msg.content {
                HttpContent::Response {
                    status_code,
                    status_text,
                    ..
                } => Some(CloseReason::new(1000, format!("{status_code} {status_text}"))),
                HttpContent::Request { .. } => Some(CloseReason::normal()),
            },
            Self::Resolved(Payload::Websockets(msg)) => match &msg.content {
                WebsocketsContent::ConnectionAck { success: true } => Some(CloseReason::new(1000, "200 OK")),
                WebsocketsContent::Error { message, .. } => Some(CloseReason::new(1011, message.clone())),
                WebsocketsContent::Disconnect { reason } => {
                    Some(CloseReason::new(1000, reason.clone().unwrap_or_default()))
                }
                _ => Some(CloseReason::normal()),
            },
            Self::Unhandled | Self::TimedOut => Some(CloseReason::normal()),
            Self::Cancelled => Some(CloseReason::going_away()),
            Self::Failed(reason) => Some(CloseReason::new(1011, reason.clone())),
            Self::ClientClosed => None,
        }
    }
}

/// Transport-level happenings on the multiplexed endpoint.
#[derive(Debug)]
pub enum SessionEvent {
    /// A client socket connected at `url`.
    Connect {
        /// Transport key.
        key: SessionKey,
        /// Path the client connected to.
        url: String,
        /// Write half of the socket.
        transport: Arc<dyn Transport>,
    },
    /// A client emitted `event` with `data`.
    Frame {
        /// Transport key.
        key: SessionKey,
        /// Event name.
        event: String,
        /// Payload as text.
        data: String,
        /// Write half of the socket, used if the session must be synthesized.
        transport: Arc<dyn Transport>,
    },
    /// The client socket went away.
    Disconnect {
        /// Transport key.
        key: SessionKey,
    },
}

fn server_role<C>(_: &Message<C>, _: &Address) -> Role {
    Role::Server
}

/// Shared state behind the channel and its HTTP handlers.
pub struct ChannelCore {
    address: Address,
    target: Address,
    response_timeout: Duration,
    validator: Arc<dyn SpecValidator>,
    inbox: RwLock<Option<Arc<Inbox>>>,
    shutdown: RwLock<CancellationToken>,
    pending: CorrelationTable<DialogueLabel, Payload>,
    sessions: SessionRegistry,
    http_dialogues: Mutex<Dialogues<HttpContent>>,
    ws_dialogues: Mutex<Dialogues<WebsocketsContent>>,
    started: Instant,
}

impl ChannelCore {
    /// A stopped core for `settings`, validating requests with `validator`.
    pub fn new(settings: &ServerSettings, validator: Arc<dyn SpecValidator>) -> Self {
        let address = Address::from(settings.connection_id.as_str());
        Self {
            target: Address::from(settings.target_skill_id.as_str()),
            response_timeout: settings.response_timeout(),
            validator,
            inbox: RwLock::new(None),
            shutdown: RwLock::new(CancellationToken::new()),
            pending: CorrelationTable::new(),
            sessions: SessionRegistry::new(),
            http_dialogues: Mutex::new(Dialogues::new(address.clone(), server_role)),
            ws_dialogues: Mutex::new(Dialogues::new(address.clone(), server_role)),
            started: Instant::now(),
            address,
        }
    }

    /// Address the bridge signs envelopes with.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Address of the consumer.
    pub fn target(&self) -> &Address {
        &self.target
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        if self.inbox.read().is_some() {
            ChannelState::Running
        } else {
            ChannelState::Stopped
        }
    }

    /// Whether the channel is running.
    pub fn is_running(&self) -> bool {
        self.state() == ChannelState::Running
    }

    /// When the core was created.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Number of live transport sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Number of correlation entries awaiting (or holding) a resolution.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Run the request validator over an upgrade request.
    pub fn validate(&self, request: &ParsedRequest) -> bool {
        self.validator.verify(request)
    }

    pub(crate) fn open(&self, inbox_capacity: usize, shutdown: CancellationToken) {
        *self.shutdown.write() = shutdown;
        *self.inbox.write() = Some(Arc::new(Inbox::new(inbox_capacity)));
    }

    pub(crate) fn close(&self) {
        if let Some(inbox) = self.inbox.write().take() {
            inbox.close();
        }
        self.shutdown.read().cancel();
    }

    /// Close every live transport and drop every table entry.
    pub(crate) async fn teardown(&self) {
        let sessions = self.sessions.drain();
        for session in &sessions {
            let _ = session.transport().close(Some(CloseReason::going_away())).await;
        }
        self.pending.clear();
        *self.http_dialogues.lock() = Dialogues::new(self.address.clone(), server_role);
        *self.ws_dialogues.lock() = Dialogues::new(self.address.clone(), server_role);
        debug!(closed = sessions.len(), "channel tables released");
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.read().clone()
    }

    fn current_inbox(&self) -> Option<Arc<Inbox>> {
        self.inbox.read().clone()
    }

    /// Queue an envelope for the consumer.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<()> {
        let inbox = self.current_inbox().ok_or(ChannelError::NotConnected)?;
        inbox.enqueue(envelope).await
    }

    /// Next envelope for the consumer; `None` once stopped.
    pub async fn receive(&self) -> Option<Envelope> {
        let inbox = self.current_inbox()?;
        inbox.receive().await
    }

    async fn forward(&self, msg: impl Into<Payload>) {
        let envelope = Envelope::new(self.target.clone(), self.address.clone(), msg);
        if let Err(error) = self.enqueue(envelope).await {
            debug!(%error, "inbox closed, dropping message");
        }
    }

    /// Queue messages produced while serving the consumer's own `send`.
    ///
    /// The consumer may be the only task draining the inbox, so this never
    /// waits for room. Whatever does not fit is queued in order by a
    /// background task.
    fn hand_off(&self, messages: Vec<WebsocketsMessage>) {
        let Some(inbox) = self.current_inbox() else {
            debug!("inbox closed, dropping messages");
            return;
        };
        let mut envelopes: VecDeque<Envelope> = messages
            .into_iter()
            .map(|msg| Envelope::new(self.target.clone(), self.address.clone(), msg))
            .collect();
        while let Some(envelope) = envelopes.pop_front() {
            match inbox.try_enqueue(envelope) {
                Ok(()) => {}
                Err(TryEnqueueError::Closed) => {
                    debug!("inbox closed, dropping messages");
                    return;
                }
                Err(TryEnqueueError::Full(envelope)) => {
                    envelopes.push_front(*envelope);
                    debug!(queued = envelopes.len(), "inbox full, queueing in the background");
                    drop(tokio::spawn(async move {
                        for envelope in envelopes {
                            if inbox.enqueue(envelope).await.is_err() {
                                break;
                            }
                        }
                    }));
                    return;
                }
            }
        }
    }

    // ── Upgraded connections ────────────────────────────────────────────

    /// Drive one upgraded connection from CONNECT to close.
    #[instrument(skip_all, fields(session = %key, url = %request.url()))]
    pub(crate) async fn run_upgraded_session(
        self: Arc<Self>,
        key: SessionKey,
        socket: WebSocket,
        request: ParsedRequest,
    ) -> SessionOutcome {
        let token = self.shutdown_token();
        let (sink, mut stream) = socket.split();
        let (transport, _writer) = WsTransport::spawn(sink, Framing::Raw);

        let created = self
            .http_dialogues
            .lock()
            .create(&self.target, request.to_content());
        let (request_msg, request_id) = match created {
            Ok(created) => created,
            Err(error) => return self.abort_session(&*transport, error.to_string()).await,
        };
        let _guard = SessionGuard {
            core: self.clone(),
            key: key.clone(),
            request_id: request_id.clone(),
        };
        let mut resolution = match self.pending.register(request_id.clone()) {
            Ok(rx) => rx,
            Err(error) => return self.abort_session(&*transport, error.to_string()).await,
        };

        if let Err(error) = self.enqueue(Envelope::new(self.target.clone(), self.address.clone(), request_msg)).await {
            return self.abort_session(&*transport, error.to_string()).await;
        }
        let opened = self
            .open_session(key.clone(), request.url(), Some(request_id), transport.clone())
            .await;
        let session = match opened {
            Ok(session) => session,
            Err(error) => return self.abort_session(&*transport, error.to_string()).await,
        };
        info!("session opened");

        let deadline = tokio::time::sleep(self.response_timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break SessionOutcome::Cancelled,
                resolved = &mut resolution => {
                    break resolved.map_or(SessionOutcome::Cancelled, SessionOutcome::Resolved);
                }
                () = &mut deadline => {
                    break if session.was_handled() {
                        SessionOutcome::TimedOut
                    } else {
                        SessionOutcome::Unhandled
                    };
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        self.forward_client_frame(&session, text.to_string()).await;
                    }
                    Some(Ok(WsFrame::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => self.forward_client_frame(&session, text).await,
                        Err(_) => debug!(len = bytes.len(), "dropping non-UTF8 binary frame"),
                    },
                    Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => {}
                    Some(Ok(WsFrame::Close(_))) | None => break SessionOutcome::ClientClosed,
                    Some(Err(error)) => {
                        debug!(%error, "socket read failed");
                        break SessionOutcome::ClientClosed;
                    }
                },
            }
        };

        match &outcome {
            SessionOutcome::Resolved(payload) => {
                info!(protocol = %payload.protocol_id(), "request resolved");
            }
            SessionOutcome::Unhandled => warn!(
                protocol = %ProtocolId::HTTP,
                "request timed out without being handled; ensure the consumer handles this protocol"
            ),
            SessionOutcome::TimedOut => info!("response window elapsed"),
            SessionOutcome::ClientClosed => info!("client closed the connection"),
            SessionOutcome::Cancelled | SessionOutcome::Failed(_) => debug!(?outcome, "session ended"),
        }
        self.close_session(&key, outcome.close_reason()).await;
        outcome
    }

    async fn abort_session(&self, transport: &dyn Transport, reason: String) -> SessionOutcome {
        error!(%reason, "could not open session");
        let outcome = SessionOutcome::Failed(reason);
        let _ = transport.close(outcome.close_reason()).await;
        outcome
    }

    // ── Multiplexed connections ─────────────────────────────────────────

    /// Drive one connection on the event endpoint until it goes away.
    #[instrument(skip_all, fields(session = %key, url = %url))]
    pub(crate) async fn run_event_session(self: Arc<Self>, key: SessionKey, socket: WebSocket, url: String) {
        let token = self.shutdown_token();
        let (sink, mut stream) = socket.split();
        let (transport, _writer) = WsTransport::spawn(sink, Framing::Event);
        let transport: Arc<dyn Transport> = transport;

        let connect = SessionEvent::Connect {
            key: key.clone(),
            url,
            transport: transport.clone(),
        };
        if let Err(error) = self.handle_event(connect).await {
            warn!(%error, "could not open session");
            let _ = transport.close(Some(CloseReason::new(1011, error.to_string()))).await;
            return;
        }

        loop {
            let text = tokio::select! {
                biased;
                () = token.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(WsFrame::Text(text))) => text.to_string(),
                    Some(Ok(WsFrame::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => continue,
                    Some(Ok(WsFrame::Close(_)) | Err(_)) | None => break,
                },
            };
            let Some((event, data)) = parse_event_frame(&text) else {
                debug!("ignoring malformed event frame");
                continue;
            };
            if event == "disconnect" {
                break;
            }
            let frame = SessionEvent::Frame {
                key: key.clone(),
                event,
                data,
                transport: transport.clone(),
            };
            if let Err(error) = self.handle_event(frame).await {
                warn!(%error, "event dropped");
            }
        }

        if let Err(error) = self.handle_event(SessionEvent::Disconnect { key }).await {
            debug!(%error, "disconnect after shutdown");
        }
    }

    /// Apply one transport event.
    pub async fn handle_event(&self, event: SessionEvent) -> Result<()> {
        if !self.is_running() {
            return Err(ChannelError::NotConnected);
        }
        match event {
            SessionEvent::Connect { key, url, transport } => {
                info!(session = %key, %url, "client connected");
                let _ = self.open_session(key, url, None, transport).await?;
            }
            SessionEvent::Frame {
                key,
                event,
                data,
                transport,
            } => {
                if RESERVED_EVENTS.contains(&event.as_str()) {
                    debug!(session = %key, %event, "reserved event ignored");
                    return Ok(());
                }
                let session = match self.sessions.get(&key) {
                    Some(session) => session,
                    None => {
                        debug!(session = %key, %event, "frame without a session, opening one");
                        self.open_session(key, event, None, transport).await?
                    }
                };
                self.forward_client_frame(&session, data).await;
            }
            SessionEvent::Disconnect { key } => self.close_session(&key, None).await,
        }
        Ok(())
    }

    // ── Shared session plumbing ─────────────────────────────────────────

    async fn open_session(
        &self,
        key: SessionKey,
        url: String,
        request_id: Option<DialogueLabel>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Session>> {
        let created = self
            .ws_dialogues
            .lock()
            .create(&self.target, WebsocketsContent::Connect { url });
        let (connect, label) = created?;
        let registered = self
            .sessions
            .register(Session::new(key, label.clone(), request_id, transport));
        let session = match registered {
            Ok(session) => session,
            Err(error) => {
                let _ = self.ws_dialogues.lock().remove(&label);
                return Err(error.into());
            }
        };
        self.forward(connect).await;
        Ok(session)
    }

    async fn forward_client_frame(&self, session: &Session, data: String) {
        let replies = {
            let mut dialogues = self.ws_dialogues.lock();
            reply_after_ack(&mut dialogues, session.dialogue(), WebsocketsContent::Send { data })
        };
        match replies {
            Ok(messages) => {
                for msg in messages {
                    self.forward(msg).await;
                }
            }
            Err(error) => warn!(session = %session.key(), %error, "client frame does not fit the dialogue, dropping"),
        }
    }

    /// Close a session's transport and tell the consumer with DISCONNECT.
    ///
    /// Safe to call for unknown or already closed sessions.
    pub async fn close_session(&self, key: &SessionKey, reason: Option<CloseReason>) {
        let Some(session) = self.sessions.remove(key) else {
            debug!(session = %key, "session already closed");
            return;
        };
        match session.transport().close(reason).await {
            Ok(()) | Err(TransportError::Closed) => {}
            Err(error) => debug!(session = %key, %error, "transport close failed"),
        }
        self.release_request(&session);
        for msg in self.disconnect_dialogue(session.dialogue(), None) {
            self.forward(msg).await;
        }
        info!(session = %key, "session closed");
    }

    fn release_request(&self, session: &Session) {
        if let Some(request_id) = session.request_id() {
            let _ = self.pending.remove(request_id);
            let _ = self.http_dialogues.lock().remove(request_id);
        }
    }

    /// Reply DISCONNECT on a dialogue and drop the dialogue, returning what
    /// the consumer must be told.
    fn disconnect_dialogue(&self, label: &DialogueLabel, reason: Option<String>) -> Vec<WebsocketsMessage> {
        let mut dialogues = self.ws_dialogues.lock();
        let replies = reply_after_ack(&mut dialogues, label, WebsocketsContent::Disconnect { reason });
        let _ = dialogues.remove(label);
        replies.unwrap_or_else(|error| {
            debug!(dialogue = %label, %error, "dialogue cannot take a DISCONNECT");
            Vec::new()
        })
    }

    // ── Consumer → client ───────────────────────────────────────────────

    /// Deliver an envelope from the consumer.
    ///
    /// Fails only for logic faults: a stopped channel, an unknown protocol id,
    /// or an envelope whose payload contradicts its protocol id.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_running() {
            return Err(ChannelError::NotConnected);
        }
        let declared = envelope.protocol_id().clone();
        if declared != ProtocolId::HTTP && declared != ProtocolId::WEBSOCKETS {
            return Err(ChannelError::UnsupportedProtocol(declared));
        }
        let carried = envelope.message().protocol_id();
        if declared != carried {
            return Err(ChannelError::ProtocolMismatch { declared, carried });
        }
        let sender = envelope.sender().clone();
        match envelope.into_message() {
            Payload::Http(msg) => self.on_http_message(&sender, msg),
            Payload::Websockets(msg) => self.on_ws_message(&sender, msg).await,
        }
        Ok(())
    }

    fn on_http_message(&self, sender: &Address, msg: HttpMessage) {
        let updated = self.http_dialogues.lock().update(msg.clone(), sender);
        let label = match updated {
            Ok(label) => label,
            Err(error) => {
                warn!(%error, performative = %msg.performative(), "could not match reply to a request dialogue");
                return;
            }
        };
        if let Some(session) = self.sessions.find_by_dialogue(&label) {
            session.mark_handled();
        }
        let outcome = self.pending.resolve(&label, Payload::Http(msg));
        debug!(request = %label, ?outcome, "initial leg reply");
    }

    async fn on_ws_message(&self, sender: &Address, msg: WebsocketsMessage) {
        let performative = msg.performative();
        let updated = self.ws_dialogues.lock().update(msg.clone(), sender);
        let label = match updated {
            Ok(label) => label,
            Err(error) => {
                warn!(%error, %performative, "could not match message to a session dialogue");
                return;
            }
        };
        let session = self.sessions.find_by_dialogue(&label);
        if let Some(session) = &session {
            session.mark_handled();
        }

        match performative {
            WebsocketsPerformative::ConnectionAck | WebsocketsPerformative::Error => {
                self.resolve_initial_leg(session.as_deref(), msg);
            }
            WebsocketsPerformative::Send => self.write_to_client(&label, session, &msg).await,
            WebsocketsPerformative::Disconnect => self.on_consumer_disconnect(&label, session, msg).await,
            WebsocketsPerformative::Connect
            | WebsocketsPerformative::Receive
            | WebsocketsPerformative::DisconnectAck => {
                debug!(dialogue = %label, %performative, "no transport action");
            }
        }
    }

    fn resolve_initial_leg(&self, session: Option<&Session>, msg: WebsocketsMessage) {
        let Some(request_id) = session.and_then(Session::request_id) else {
            return;
        };
        if self.pending.resolve(request_id, Payload::Websockets(msg)) == ResolveOutcome::AlreadyResolved {
            debug!(request = %request_id, "initial leg already resolved");
        }
    }

    async fn write_to_client(&self, label: &DialogueLabel, session: Option<Arc<Session>>, msg: &WebsocketsMessage) {
        let Some(data) = msg.content.data() else {
            return;
        };
        let Some(session) = session else {
            warn!(dialogue = %label, "no live session for dialogue, disconnecting");
            self.hand_off(self.disconnect_dialogue(label, Some(format!("no live session for dialogue {label}"))));
            return;
        };
        match session.transport().send_text(data).await {
            Ok(()) => debug!(session = %session.key(), len = data.len(), "frame written"),
            Err(error) => {
                warn!(session = %session.key(), %error, "write failed, disconnecting");
                let _ = self.sessions.remove(session.key());
                self.hand_off(self.disconnect_dialogue(label, Some(error.to_string())));
            }
        }
    }

    async fn on_consumer_disconnect(
        &self,
        label: &DialogueLabel,
        session: Option<Arc<Session>>,
        msg: WebsocketsMessage,
    ) {
        let ack = self
            .ws_dialogues
            .lock()
            .reply(label, WebsocketsContent::DisconnectAck { success: true });

        if let Some(session) = session {
            if self.sessions.remove(session.key()).is_some() {
                let reason = match &msg.content {
                    WebsocketsContent::Disconnect { reason } => reason.clone().unwrap_or_default(),
                    _ => String::new(),
                };
                self.resolve_initial_leg(Some(&session), msg);
                if let Err(error) = session.transport().close(Some(CloseReason::new(1000, reason))).await {
                    debug!(session = %session.key(), %error, "transport close failed");
                }
                info!(session = %session.key(), "session closed by consumer");
            }
        }

        match ack {
            Ok(ack) => self.hand_off(vec![ack]),
            Err(error) => warn!(dialogue = %label, %error, "could not acknowledge DISCONNECT"),
        }
    }
}

/// Reply on `label`, first acknowledging the handshake if the dialogue still
/// sits at CONNECT.
fn reply_after_ack(
    dialogues: &mut Dialogues<WebsocketsContent>,
    label: &DialogueLabel,
    content: WebsocketsContent,
) -> std::result::Result<Vec<WebsocketsMessage>, DialogueError> {
    let mut messages = Vec::with_capacity(2);
    if dialogues.get(label).and_then(Dialogue::last_performative) == Some(WebsocketsPerformative::Connect) {
        messages.push(dialogues.reply(label, WebsocketsContent::ConnectionAck { success: true })?);
    }
    messages.push(dialogues.reply(label, content)?);
    Ok(messages)
}

/// Split `{"event": name, "data": payload}` into name and payload text.
fn parse_event_frame(text: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let event = value.get("event")?.as_str()?.to_owned();
    let data = match value.get("data") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    Some((event, data))
}

/// Drops an upgraded session's table entries however its task ends.
struct SessionGuard {
    core: Arc<ChannelCore>,
    key: SessionKey,
    request_id: DialogueLabel,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.core.sessions.remove(&self.key) {
            debug!(session = %self.key, "session dropped without close");
            let _ = self.core.ws_dialogues.lock().remove(session.dialogue());
        }
        let _ = self.core.pending.remove(&self.request_id);
        let _ = self.core.http_dialogues.lock().remove(&self.request_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionChannel
// ─────────────────────────────────────────────────────────────────────────────

/// Wait up to `grace` for the server task, aborting it if it is still
/// running. Returns whether it finished on its own.
async fn join_or_abort(mut task: JoinHandle<()>, grace: Duration) -> bool {
    if tokio::time::timeout(grace, &mut task).await.is_ok() {
        return true;
    }
    warn!(grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX), "server did not stop in time, aborting");
    task.abort();
    false
}

enum Lifecycle {
    Stopped,
    Running {
        shutdown: CancellationToken,
        task: JoinHandle<()>,
        local_addr: SocketAddr,
    },
}

/// The session channel with its STOPPED/RUNNING lifecycle.
pub struct SessionChannel {
    core: Arc<ChannelCore>,
    settings: ServerSettings,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl SessionChannel {
    /// A stopped channel; loads the API spec named in `settings`, if any.
    pub fn new(settings: ServerSettings) -> Result<Self> {
        let validator: Arc<dyn SpecValidator> = match &settings.api_spec_path {
            Some(path) => Arc::new(ApiSpec::load(Path::new(path))?),
            None => Arc::new(AllowAll),
        };
        Ok(Self::with_validator(settings, validator))
    }

    /// A stopped channel using `validator` for upgrade requests.
    pub fn with_validator(settings: ServerSettings, validator: Arc<dyn SpecValidator>) -> Self {
        Self {
            core: Arc::new(ChannelCore::new(&settings, validator)),
            settings,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Shared core.
    pub fn core(&self) -> &Arc<ChannelCore> {
        &self.core
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    /// Bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running { local_addr, .. } => Some(*local_addr),
            Lifecycle::Stopped => None,
        }
    }

    /// Open the inbox and start serving. A no-op while running.
    ///
    /// On failure the channel stays stopped and the error is returned.
    pub async fn connect(&self) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Running { local_addr, .. } = &*lifecycle {
            debug!(%local_addr, "already connected");
            return Ok(*local_addr);
        }

        let shutdown = CancellationToken::new();
        self.core.open(self.settings.inbox_capacity, shutdown.clone());
        match server::start(self.core.clone(), &self.settings, shutdown.clone()).await {
            Ok((local_addr, task)) => {
                info!(
                    %local_addr,
                    tls = self.settings.tls_paths().is_some(),
                    connection = %self.core.address(),
                    target = %self.core.target(),
                    "relay listening"
                );
                *lifecycle = Lifecycle::Running {
                    shutdown,
                    task,
                    local_addr,
                };
                Ok(local_addr)
            }
            Err(error) => {
                error!(%error, addr = %self.settings.bind_addr(), "failed to start server");
                self.core.close();
                Err(error)
            }
        }
    }

    /// Stop serving and release the inbox and every table. Idempotent.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running { shutdown, task, .. } = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) else {
            debug!("already stopped");
            return;
        };
        info!("relay disconnecting");
        shutdown.cancel();
        self.core.close();
        self.core.teardown().await;
        let _ = join_or_abort(task, SHUTDOWN_GRACE).await;
        info!("relay stopped");
    }

    /// See [`ChannelCore::send`].
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.core.send(envelope).await
    }

    /// See [`ChannelCore::receive`].
    pub async fn receive(&self) -> Option<Envelope> {
        self.core.receive().await
    }

    /// See [`ChannelCore::handle_event`].
    pub async fn handle_event(&self, event: SessionEvent) -> Result<()> {
        self.core.handle_event(event).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use assert_matches::assert_matches;
    use relay_core::logging::capture_logs;
    use relay_protocol::HttpPerformative;
    use std::collections::BTreeMap;
    use tracing::Level;

    fn settings() -> ServerSettings {
        ServerSettings {
            port: 0,
            ..ServerSettings::default()
        }
    }

    fn running_core() -> Arc<ChannelCore> {
        let core = Arc::new(ChannelCore::new(&settings(), Arc::new(AllowAll)));
        core.open(0, CancellationToken::new());
        core
    }

    /// The consumer's side of every dialogue.
    struct Consumer {
        address: Address,
        bridge: Address,
        ws: Dialogues<WebsocketsContent>,
        http: Dialogues<HttpContent>,
    }

    fn client_role<C>(_: &Message<C>, _: &Address) -> Role {
        Role::Client
    }

    impl Consumer {
        fn new(core: &ChannelCore) -> Self {
            Self {
                address: core.target().clone(),
                bridge: core.address().clone(),
                ws: Dialogues::new(core.target().clone(), client_role),
                http: Dialogues::new(core.target().clone(), client_role),
            }
        }

        /// Receive the next websockets message, tracking it.
        async fn next_ws(&mut self, core: &ChannelCore) -> (DialogueLabel, WebsocketsMessage) {
            let envelope = tokio::time::timeout(Duration::from_secs(1), core.receive())
                .await
                .expect("inbox stalled")
                .expect("inbox closed");
            assert_eq!(envelope.to(), &self.address);
            let Payload::Websockets(msg) = envelope.into_message() else {
                panic!("expected a websockets message");
            };
            let label = self.ws.update(msg.clone(), &self.bridge).unwrap();
            (label, msg)
        }

        fn reply(&mut self, label: &DialogueLabel, content: WebsocketsContent) -> Envelope {
            let msg = self.ws.reply(label, content).unwrap();
            Envelope::new(self.bridge.clone(), self.address.clone(), msg)
        }
    }

    async fn inbox_is_empty(core: &ChannelCore) -> bool {
        tokio::time::timeout(Duration::from_millis(50), core.receive()).await.is_err()
    }

    async fn connect_event_session(
        core: &ChannelCore,
        consumer: &mut Consumer,
        key: &str,
        transport: Arc<MockTransport>,
    ) -> DialogueLabel {
        core.handle_event(SessionEvent::Connect {
            key: SessionKey::from(key),
            url: "/socket.io/".into(),
            transport,
        })
        .await
        .unwrap();
        let (label, msg) = consumer.next_ws(core).await;
        assert_eq!(msg.content, WebsocketsContent::Connect { url: "/socket.io/".into() });
        label
    }

    async fn send_frame(core: &ChannelCore, key: &str, data: &str, transport: Arc<MockTransport>) {
        core.handle_event(SessionEvent::Frame {
            key: SessionKey::from(key),
            event: "message".into(),
            data: data.into(),
            transport,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn ping_pong_on_established_session() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::new();
        let label = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;

        send_frame(&core, "sid-1", "ping", transport.clone()).await;
        let (_, ack) = consumer.next_ws(&core).await;
        assert_eq!(ack.content, WebsocketsContent::ConnectionAck { success: true });
        let (same, ping) = consumer.next_ws(&core).await;
        assert_eq!(same, label);
        assert_eq!(ping.content, WebsocketsContent::Send { data: "ping".into() });

        let pong = consumer.reply(&label, WebsocketsContent::Send { data: "pong".into() });
        core.send(pong).await.unwrap();
        assert_eq!(transport.sent(), vec!["pong".to_owned()]);
        assert!(inbox_is_empty(&core).await);
    }

    #[tokio::test]
    async fn reset_on_write_becomes_disconnect() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::failing(TransportError::Reset);
        let label = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;
        send_frame(&core, "sid-1", "ping", transport.clone()).await;
        let _ = consumer.next_ws(&core).await;
        let _ = consumer.next_ws(&core).await;

        let pong = consumer.reply(&label, WebsocketsContent::Send { data: "pong".into() });
        core.send(pong).await.unwrap();

        let (_, disconnect) = consumer.next_ws(&core).await;
        assert_matches!(
            disconnect.content,
            WebsocketsContent::Disconnect { reason: Some(reason) } if reason.contains("reset")
        );
        assert_eq!(core.live_sessions(), 0);
    }

    #[tokio::test]
    async fn full_inbox_does_not_block_consumer_send() {
        let core = Arc::new(ChannelCore::new(&settings(), Arc::new(AllowAll)));
        core.open(1, CancellationToken::new());
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::failing(TransportError::Reset);
        let label = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;
        let ack = consumer.reply(&label, WebsocketsContent::ConnectionAck { success: true });
        core.send(ack).await.unwrap();
        send_frame(&core, "sid-1", "ping", transport.clone()).await;

        let pong = consumer.reply(&label, WebsocketsContent::Send { data: "pong".into() });
        tokio::time::timeout(Duration::from_secs(1), core.send(pong))
            .await
            .expect("send waited on the consumer's own inbox")
            .unwrap();

        let (_, ping) = consumer.next_ws(&core).await;
        assert_eq!(ping.content, WebsocketsContent::Send { data: "ping".into() });
        let (_, disconnect) = consumer.next_ws(&core).await;
        assert_eq!(disconnect.performative(), WebsocketsPerformative::Disconnect);
        assert_eq!(core.live_sessions(), 0);
    }

    #[tokio::test]
    async fn send_on_unlocatable_session_replies_disconnect() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::new();
        let label = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;
        send_frame(&core, "sid-1", "ping", transport.clone()).await;
        let _ = consumer.next_ws(&core).await;
        let _ = consumer.next_ws(&core).await;

        let _ = core.sessions.remove(&SessionKey::from("sid-1"));
        let pong = consumer.reply(&label, WebsocketsContent::Send { data: "pong".into() });
        core.send(pong).await.unwrap();

        let (_, disconnect) = consumer.next_ws(&core).await;
        assert_matches!(
            disconnect.content,
            WebsocketsContent::Disconnect { reason: Some(reason) } if reason.contains("no live session")
        );
        assert!(transport.sent().is_empty());
        assert!(core.ws_dialogues.lock().is_empty());
    }

    #[tokio::test]
    async fn client_disconnect_acknowledges_then_disconnects() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::new();
        let _ = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;

        core.handle_event(SessionEvent::Disconnect { key: SessionKey::from("sid-1") })
            .await
            .unwrap();
        let (_, ack) = consumer.next_ws(&core).await;
        assert_eq!(ack.performative(), WebsocketsPerformative::ConnectionAck);
        let (_, disconnect) = consumer.next_ws(&core).await;
        assert_eq!(disconnect.content, WebsocketsContent::Disconnect { reason: None });

        assert!(transport.is_closed());
        assert_eq!(core.live_sessions(), 0);
        assert!(core.ws_dialogues.lock().is_empty());

        core.handle_event(SessionEvent::Disconnect { key: SessionKey::from("sid-1") })
            .await
            .unwrap();
        assert!(inbox_is_empty(&core).await);
    }

    #[tokio::test]
    async fn consumer_disconnect_closes_transport_and_acks() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::new();
        let label = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;
        let ack = consumer.reply(&label, WebsocketsContent::ConnectionAck { success: true });
        core.send(ack).await.unwrap();

        let bye = consumer.reply(&label, WebsocketsContent::disconnect("done"));
        core.send(bye).await.unwrap();

        let (_, ack) = consumer.next_ws(&core).await;
        assert_eq!(ack.content, WebsocketsContent::DisconnectAck { success: true });
        assert!(transport.is_closed());
        assert_eq!(transport.closes.lock()[0].as_ref().map(|r| r.reason.clone()), Some("done".into()));
        assert_eq!(core.live_sessions(), 0);
        assert!(consumer.ws.is_empty());
        assert!(core.ws_dialogues.lock().is_empty());
    }

    #[tokio::test]
    async fn frame_without_session_synthesizes_one() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::new();
        core.handle_event(SessionEvent::Frame {
            key: SessionKey::from("late"),
            event: "chat".into(),
            data: "hi".into(),
            transport: transport.clone(),
        })
        .await
        .unwrap();

        let (label, connect) = consumer.next_ws(&core).await;
        assert_eq!(connect.content, WebsocketsContent::Connect { url: "chat".into() });
        let _ = consumer.next_ws(&core).await;
        let (same, send) = consumer.next_ws(&core).await;
        assert_eq!(same, label);
        assert_eq!(send.content, WebsocketsContent::Send { data: "hi".into() });
        assert_eq!(core.live_sessions(), 1);
    }

    #[tokio::test]
    async fn reserved_events_are_ignored() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::new();
        let _ = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;
        for event in RESERVED_EVENTS {
            core.handle_event(SessionEvent::Frame {
                key: SessionKey::from("sid-1"),
                event: (*event).to_owned(),
                data: "x".into(),
                transport: transport.clone(),
            })
            .await
            .unwrap();
        }
        assert!(inbox_is_empty(&core).await);
    }

    #[tokio::test]
    async fn duplicate_connect_is_rejected() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let _ = connect_event_session(&core, &mut consumer, "sid-1", MockTransport::new()).await;
        let err = core
            .handle_event(SessionEvent::Connect {
                key: SessionKey::from("sid-1"),
                url: "/socket.io/".into(),
                transport: MockTransport::new(),
            })
            .await
            .unwrap_err();
        assert_matches!(err, ChannelError::Correlation(_));
        assert_eq!(core.ws_dialogues.lock().len(), 1);
    }

    fn events_request() -> ParsedRequest {
        ParsedRequest {
            method: "GET".into(),
            path: "/events".into(),
            query: None,
            version: "HTTP/1.1".into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn connection_ack_resolves_initial_leg() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let (_, request_id) = core
            .http_dialogues
            .lock()
            .create(core.target(), events_request().to_content())
            .unwrap();
        let resolution = core.pending.register(request_id.clone()).unwrap();
        let _ = core
            .open_session(SessionKey::from("k"), "/events".into(), Some(request_id), MockTransport::new())
            .await
            .unwrap();
        let (label, _) = consumer.next_ws(&core).await;

        let ack = consumer.reply(&label, WebsocketsContent::ConnectionAck { success: true });
        core.send(ack).await.unwrap();
        assert_matches!(
            resolution.await.unwrap(),
            Payload::Websockets(msg) if msg.content == WebsocketsContent::ConnectionAck { success: true }
        );
    }

    #[tokio::test]
    async fn frames_after_resolution_do_not_resolve_again() {
        let (logs, _guard) = capture_logs();
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let (_, request_id) = core
            .http_dialogues
            .lock()
            .create(core.target(), events_request().to_content())
            .unwrap();
        let _resolution = core.pending.register(request_id.clone()).unwrap();
        let _ = core
            .open_session(SessionKey::from("k"), "/events".into(), Some(request_id), MockTransport::new())
            .await
            .unwrap();
        let (label, _) = consumer.next_ws(&core).await;

        let error = consumer.reply(
            &label,
            WebsocketsContent::Error {
                code: relay_protocol::ErrorCode::InvalidDialogue,
                message: "nope".into(),
            },
        );
        core.send(error).await.unwrap();
        let again = consumer.reply(&label, WebsocketsContent::Send { data: "late".into() });
        core.send(again).await.unwrap();
        assert!(!logs.has_event(Level::WARN, "no pending request"));
        assert_eq!(core.pending_requests(), 1);
    }

    #[tokio::test]
    async fn http_response_resolves_initial_leg() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let request = events_request();
        let (request_msg, request_id) = core
            .http_dialogues
            .lock()
            .create(core.target(), request.to_content())
            .unwrap();
        let resolution = core.pending.register(request_id).unwrap();

        let consumer_label = consumer.http.update(request_msg, &consumer.bridge.clone()).unwrap();
        let response = consumer
            .http
            .reply(&consumer_label, HttpContent::response(204, "No Content"))
            .unwrap();
        core.send(Envelope::new(consumer.bridge.clone(), consumer.address.clone(), response))
            .await
            .unwrap();

        let Payload::Http(msg) = resolution.await.unwrap() else {
            panic!("expected an HTTP resolution");
        };
        assert_eq!(msg.performative(), HttpPerformative::Response);
        assert!(core.http_dialogues.lock().is_empty());
    }

    #[tokio::test]
    async fn unmatched_http_reply_warns() {
        let (logs, _guard) = capture_logs();
        let core = running_core();
        let stray = Message::new(
            relay_protocol::DialogueReference::fresh(),
            -1,
            1,
            HttpContent::response(200, "OK"),
        );
        core.send(Envelope::new(core.address().clone(), core.target().clone(), stray))
            .await
            .unwrap();
        assert!(logs.has_event(Level::WARN, "could not match reply"));
        assert_eq!(core.pending_requests(), 0);
    }

    #[tokio::test]
    async fn unsupported_protocol_is_rejected() {
        let core = running_core();
        let msg = Message::opening(
            relay_protocol::DialogueReference::fresh(),
            WebsocketsContent::Send { data: "x".into() },
        );
        let envelope = Envelope::with_protocol_id(
            core.address().clone(),
            core.target().clone(),
            ProtocolId::other("someone/gossip:1.0.0"),
            msg,
        );
        assert_matches!(core.send(envelope).await, Err(ChannelError::UnsupportedProtocol(_)));
    }

    #[tokio::test]
    async fn mismatched_protocol_is_rejected() {
        let core = running_core();
        let msg = Message::opening(
            relay_protocol::DialogueReference::fresh(),
            WebsocketsContent::Send { data: "x".into() },
        );
        let envelope = Envelope::with_protocol_id(
            core.address().clone(),
            core.target().clone(),
            ProtocolId::HTTP,
            msg,
        );
        assert_matches!(core.send(envelope).await, Err(ChannelError::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn stopped_core_rejects_use() {
        let core = ChannelCore::new(&settings(), Arc::new(AllowAll));
        assert_eq!(core.state(), ChannelState::Stopped);
        let msg = Message::opening(
            relay_protocol::DialogueReference::fresh(),
            WebsocketsContent::Send { data: "x".into() },
        );
        let envelope = Envelope::new(core.address().clone(), core.target().clone(), msg);
        assert_matches!(core.send(envelope).await, Err(ChannelError::NotConnected));
        assert_matches!(
            core.handle_event(SessionEvent::Disconnect { key: SessionKey::from("k") }).await,
            Err(ChannelError::NotConnected)
        );
        assert!(core.receive().await.is_none());
    }

    #[tokio::test]
    async fn teardown_releases_everything() {
        let core = running_core();
        let mut consumer = Consumer::new(&core);
        let transport = MockTransport::new();
        let _ = connect_event_session(&core, &mut consumer, "sid-1", transport.clone()).await;
        let _rx = core.pending.register(DialogueLabel {
            reference: relay_protocol::DialogueReference::fresh(),
            opponent: core.target().clone(),
            starter: core.address().clone(),
        });

        core.close();
        core.teardown().await;
        assert_eq!(core.state(), ChannelState::Stopped);
        assert_eq!(core.live_sessions(), 0);
        assert_eq!(core.pending_requests(), 0);
        assert!(transport.is_closed());
        assert!(core.receive().await.is_none());
    }

    #[test]
    fn event_frames_parse() {
        assert_eq!(
            parse_event_frame(r#"{"event":"message","data":"ping"}"#),
            Some(("message".into(), "ping".into()))
        );
        assert_eq!(
            parse_event_frame(r#"{"event":"message","data":{"a":1}}"#),
            Some(("message".into(), r#"{"a":1}"#.into()))
        );
        assert_eq!(parse_event_frame(r#"{"event":"x"}"#), Some(("x".into(), String::new())));
        assert_eq!(parse_event_frame("ping"), None);
        assert_eq!(parse_event_frame(r#"{"data":"x"}"#), None);
    }

    #[test]
    fn outcome_close_reasons() {
        let response = Message::new(
            relay_protocol::DialogueReference::fresh(),
            -1,
            1,
            HttpContent::response(404, "Not Found"),
        );
        let reason = SessionOutcome::Resolved(Payload::Http(response)).close_reason().unwrap();
        assert_eq!(reason.reason, "404 Not Found");
        let ack = Message::new(
            relay_protocol::DialogueReference::fresh(),
            -1,
            1,
            WebsocketsContent::ConnectionAck { success: true },
        );
        assert_eq!(
            SessionOutcome::Resolved(Payload::Websockets(ack)).close_reason(),
            Some(CloseReason::new(1000, "200 OK"))
        );
        assert_eq!(SessionOutcome::ClientClosed.close_reason(), None);
        assert_eq!(SessionOutcome::Unhandled.close_reason(), Some(CloseReason::normal()));
    }

    #[tokio::test]
    async fn server_task_that_stops_is_joined() {
        let token = CancellationToken::new();
        let task = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();
        assert!(join_or_abort(task, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn stuck_server_task_is_aborted() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _tx = tx;
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        assert!(!join_or_abort(task, Duration::from_millis(50)).await);
        assert!(rx.await.is_err());
    }
}
