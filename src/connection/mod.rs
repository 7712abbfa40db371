//! Connection lifecycle.
//!
//! [`ConnectionManager`] owns the transport, the login handshake, the outbound
//! queue, keepalive and reconnect timers, and the entity cache. All mutable
//! state sits behind one mutex; events are collected while it is held and
//! published after it is released, so subscribers may call back into the
//! manager.

mod commands;
mod inbound;
mod state;

pub use commands::{MediaUpload, TextOptions};
pub use state::ConnectionState;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::auth::{normalize_phone_number, ActiveAuth, PairingCodeAuthenticator, QrAuthenticator};
use crate::binary::{encode_node, Node};
use crate::cache::{Chat, Contact, EntityCache, Message};
use crate::config::{AuthMethod, ClientConfig};
use crate::crypto;
use crate::error::{AuthError, ConnectionError, EncryptionError, Error, Result, ValidationError};
use crate::event_bus::EventBus;
use crate::media::MediaUploader;
use crate::protocol::{self, RequestTracker};
use crate::socket::{
    ConnectRequest, Connector, Outbound, TransportEvent, TransportHandle, WebSocketConnector,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use crate::store::{Credentials, FileSessionStore, SessionRecord, SessionStore, UserProfile};
use crate::timer::{ScheduledTask, TaskSet};
use crate::types::{ConnectionUpdate, Event, Jid};

use ConnectionState::*;

const KEEPALIVE: &str = "keepalive";
const RECONNECT: &str = "reconnect";

/// The open transport. Dropping it stops the reader task.
struct Transport {
    id: u64,
    outgoing: mpsc::UnboundedSender<Outbound>,
    _stop: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct Backoff {
    attempts: u32,
    /// Close that started the current run of attempts. Delays are measured from here.
    first_close: Option<Instant>,
}

/// How a login proceeds once the transport is open.
enum Login {
    Resume,
    Qr(QrAuthenticator),
    Pairing(PairingCodeAuthenticator, String),
}

struct ConnInner {
    state: ConnectionState,
    credentials: Option<Credentials>,
    profile: Option<UserProfile>,
    transport: Option<Transport>,
    transport_seq: u64,
    /// Frames on the transport are sealed with the session key.
    encrypted: bool,
    auth: Option<ActiveAuth>,
    resuming: bool,
    queue: VecDeque<Vec<u8>>,
    timers: TaskSet,
    backoff: Backoff,
    intentional_close: bool,
    cache: EntityCache,
    uploader: Option<Arc<dyn MediaUploader>>,
}

/// Side effects gathered under the lock and run after it is released.
#[derive(Default)]
struct Effects {
    events: Vec<Event>,
    save: Option<SessionRecord>,
    clear_session: bool,
    confirm_pairing: Option<PairingCodeAuthenticator>,
    fail_login: Option<String>,
    fetch_snapshot: bool,
}

struct Shared {
    config: ClientConfig,
    bus: EventBus,
    store: Arc<dyn SessionStore>,
    connector: Arc<dyn Connector>,
    requests: RequestTracker,
    inner: Mutex<ConnInner>,
}

/// Session identity as exposed to callers. Never carries private key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub state: ConnectionState,
    pub client_id: Option<String>,
    pub public_key: Option<String>,
    pub wid: Option<String>,
    pub user: Option<UserProfile>,
    pub can_resume: bool,
    pub queued_frames: usize,
}

/// Client connection. Cloning shares the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnInner {
    fn transition(
        &mut self,
        to: ConnectionState,
        code: Option<u16>,
        reason: Option<String>,
        fx: &mut Effects,
    ) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition(to) {
            warn!("unexpected connection transition {from} -> {to}");
        }
        debug!("connection {from} -> {to}");
        self.state = to;
        fx.events.push(Event::ConnectionUpdate(ConnectionUpdate {
            from,
            state: to,
            code,
            reason,
        }));
    }

    fn is_current(&self, id: u64) -> bool {
        self.transport.as_ref().is_some_and(|t| t.id == id)
    }

    fn session_key(&self) -> std::result::Result<[u8; 32], EncryptionError> {
        self.credentials
            .as_ref()
            .and_then(|c| c.enc_key)
            .ok_or(EncryptionError::MissingKey("enc_key"))
    }

    /// Write one frame to the transport. `Ok(false)` when there is no open transport.
    fn write(&self, plain: &[u8]) -> Result<bool> {
        let Some(transport) = &self.transport else {
            return Ok(false);
        };
        let frame = if self.encrypted {
            crypto::encrypt(plain, &self.session_key()?)?
        } else {
            plain.to_vec()
        };
        Ok(transport.outgoing.send(Outbound::Frame(frame)).is_ok())
    }

    /// Write a node straight to the transport, bypassing the queue.
    fn send_direct(&self, node: &Node) {
        let sent = encode_node(node)
            .map_err(Error::from)
            .and_then(|frame| self.write(&frame));
        match sent {
            Ok(true) => {}
            Ok(false) => debug!("dropping <{}>: transport is not open", node.tag),
            Err(e) => warn!("failed to send <{}>: {e}", node.tag),
        }
    }

    /// Send when ready, otherwise queue for the next time the session is ready.
    fn send_or_queue(&mut self, frame: Vec<u8>) -> Result<()> {
        self.queue.push_back(frame);
        if self.state == Ready {
            self.flush_queue()?;
        }
        Ok(())
    }

    fn flush_queue(&mut self) -> Result<()> {
        while let Some(frame) = self.queue.pop_front() {
            match self.write(&frame) {
                Ok(true) => {}
                Ok(false) => {
                    self.queue.push_front(frame);
                    break;
                }
                Err(e) => {
                    self.queue.push_front(frame);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Drop the transport and everything tied to it.
    fn teardown(&mut self, close_code: Option<u16>) {
        self.timers.cancel(KEEPALIVE);
        if let Some(transport) = self.transport.take() {
            if let Some(code) = close_code {
                let _ = transport.outgoing.send(Outbound::Close(code));
            }
        }
        self.encrypted = false;
        self.resuming = false;
        if let Some(auth) = self.auth.take() {
            auth.as_authenticator().reset();
        }
    }

    fn own_jid(&self) -> Option<Jid> {
        self.credentials
            .as_ref()
            .and_then(|c| c.wid.as_deref())
            .and_then(|wid| wid.parse::<Jid>().ok())
            .map(|jid| jid.to_non_ad())
    }
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                bus: EventBus::new(),
                store,
                connector,
                requests: RequestTracker::new(),
                inner: Mutex::new(ConnInner {
                    state: Closed,
                    credentials: None,
                    profile: None,
                    transport: None,
                    transport_seq: 0,
                    encrypted: false,
                    auth: None,
                    resuming: false,
                    queue: VecDeque::new(),
                    timers: TaskSet::new(),
                    backoff: Backoff::default(),
                    intentional_close: false,
                    cache: EntityCache::new(),
                    uploader: None,
                }),
            }),
        }
    }

    /// WebSocket transport and a file store under `config.session_dir`.
    pub fn from_config(config: ClientConfig) -> Self {
        let store = Arc::new(FileSessionStore::new(config.session_dir.clone()));
        Self::new(config, Arc::new(WebSocketConnector::new()), store)
    }

    fn lock(&self) -> MutexGuard<'_, ConnInner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Bus every event of this connection is published on.
    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn set_media_uploader(&self, uploader: Arc<dyn MediaUploader>) {
        self.lock().uploader = Some(uploader);
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn session_info(&self) -> SessionInfo {
        let inner = self.lock();
        let credentials = inner.credentials.as_ref();
        SessionInfo {
            session_id: self.shared.config.session_id.clone(),
            state: inner.state,
            client_id: credentials.map(|c| BASE64.encode(c.client_id())),
            public_key: credentials.map(|c| BASE64.encode(c.public_key())),
            wid: credentials.and_then(|c| c.wid.clone()),
            user: inner.profile.clone(),
            can_resume: credentials.is_some_and(Credentials::can_resume),
            queued_frames: inner.queue.len(),
        }
    }

    pub fn chat(&self, id: &Jid) -> Option<Chat> {
        self.lock().cache.chat(id).cloned()
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.lock().cache.chats()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.lock().cache.message(id).cloned()
    }

    pub fn messages(&self, chat_id: &Jid) -> Vec<Message> {
        self.lock().cache.messages_for(chat_id)
    }

    pub fn contact(&self, id: &Jid) -> Option<Contact> {
        self.lock().cache.contact(id).cloned()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.lock().cache.contacts()
    }

    /// Open the transport and start logging in.
    ///
    /// Returns once the login stanza is on the wire; readiness is reported
    /// through `connection.update` events. A stored session is resumed,
    /// otherwise the configured authenticator issues a challenge. The first
    /// attempt is not retried: a failure is returned to the caller.
    pub async fn connect(&self) -> Result<()> {
        self.shared.config.validate()?;
        let stored = self.shared.store.load(&self.shared.config.session_id)?;
        let restored = match &stored {
            Some(record) => Some(record.credentials()?),
            None => None,
        };

        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            if inner.state != Closed {
                return Err(Error::InvalidState {
                    action: "connect",
                    state: inner.state.as_str(),
                });
            }
            inner.intentional_close = false;
            inner.backoff = Backoff::default();
            inner.timers.cancel(RECONNECT);
            if let Some(credentials) = restored {
                inner.credentials = Some(credentials);
                inner.profile = stored.and_then(|record| record.user);
            }
            inner.transition(Connecting, None, None, &mut fx);
        }
        self.apply(fx);

        info!("connecting to {}", self.shared.config.endpoint);
        self.open().await.map_err(|e| {
            self.abandon_attempt(&e);
            e
        })
    }

    /// One connection attempt: open the transport, then send the login.
    async fn open(&self) -> Result<()> {
        let config = &self.shared.config;
        let request = ConnectRequest {
            endpoint: config.endpoint.clone(),
            origin: config.origin.clone(),
            user_agent: config.user_agent.clone(),
        };
        let connecting = self.shared.connector.connect(request);
        let handle = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout(config.connect_timeout).into()),
        };
        let login = self.attach(handle)?;
        if let Err(e) = self.start_login(login) {
            self.fail_login(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// An attempt failed before the transport opened.
    fn abandon_attempt(&self, error: &Error) {
        warn!("connection attempt failed: {error}");
        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            if inner.state == Connecting {
                inner.transition(Closed, None, Some(error.to_string()), &mut fx);
            }
        }
        self.apply(fx);
    }

    fn attach(&self, handle: TransportHandle) -> Result<Login> {
        let TransportHandle { outgoing, incoming } = handle;
        let mut fx = Effects::default();
        let login = {
            let mut inner = self.lock();
            if inner.state != Connecting || inner.intentional_close {
                let _ = outgoing.send(Outbound::Close(NORMAL_CLOSURE));
                return Err(ConnectionError::Cancelled.into());
            }
            inner.transport_seq += 1;
            let id = inner.transport_seq;
            let (stop, stopped) = oneshot::channel();
            tokio::spawn(read_loop(Arc::downgrade(&self.shared), id, incoming, stopped));
            inner.transport = Some(Transport {
                id,
                outgoing,
                _stop: stop,
            });
            inner.transition(Connected, None, None, &mut fx);
            inner.transition(Authenticating, None, None, &mut fx);
            self.begin_login(&mut inner)
        };
        self.apply(fx);
        Ok(login)
    }

    /// Pick the login path. A resumable session sends its login right away.
    fn begin_login(&self, inner: &mut ConnInner) -> Login {
        let config = &self.shared.config;
        let credentials = inner.credentials.get_or_insert_with(Credentials::generate);
        if credentials.can_resume() {
            let payload = crypto::derive_auth_payload(credentials);
            let login = protocol::build_resume_login(&payload, credentials.wid.as_deref());
            inner.resuming = true;
            inner.send_direct(&login);
            info!("resuming stored session");
            return Login::Resume;
        }
        match &config.auth_method {
            AuthMethod::Qr => {
                let qr = QrAuthenticator::new(
                    self.shared.bus.clone(),
                    config.qr_timeout,
                    config.qr_refresh_interval,
                );
                inner.auth = Some(ActiveAuth::Qr(qr.clone()));
                Login::Qr(qr)
            }
            AuthMethod::PairingCode { phone_number } => {
                let pairing = PairingCodeAuthenticator::new(self.shared.bus.clone(), config.pairing_timeout);
                inner.auth = Some(ActiveAuth::Pairing(pairing.clone()));
                Login::Pairing(pairing, phone_number.clone())
            }
        }
    }

    /// Issue the challenge and send its login. Runs without the lock held,
    /// since authenticators publish their own events.
    fn start_login(&self, login: Login) -> Result<()> {
        let Some(credentials) = self.lock().credentials.clone() else {
            return Err(AuthError::NotAuthenticating.into());
        };
        match login {
            Login::Resume => Ok(()),
            Login::Qr(qr) => {
                qr.generate_challenge(&credentials)?;
                self.send_qr_login(&qr, &credentials);
                Ok(())
            }
            Login::Pairing(pairing, phone_number) => {
                let request = pairing.request_challenge(&phone_number, &credentials)?;
                self.lock().send_direct(&protocol::build_pair_code_login(&request));
                Ok(())
            }
        }
    }

    fn send_qr_login(&self, qr: &QrAuthenticator, credentials: &Credentials) {
        if let Some(challenge) = qr.challenge() {
            let login = protocol::build_qr_login(
                &challenge.reference,
                credentials.client_id(),
                credentials.public_key(),
            );
            self.lock().send_direct(&login);
        }
    }

    /// Replace the current QR challenge with a fresh one.
    pub fn refresh_qr(&self) -> Result<String> {
        let (qr, credentials) = {
            let inner = self.lock();
            match (&inner.auth, &inner.credentials) {
                (Some(ActiveAuth::Qr(qr)), Some(credentials)) if inner.state == Authenticating => {
                    (qr.clone(), credentials.clone())
                }
                _ => return Err(AuthError::NotAuthenticating.into()),
            }
        };
        let code = qr.refresh(&credentials)?;
        self.send_qr_login(&qr, &credentials);
        Ok(code)
    }

    /// Switch the running login to a pairing code for `phone_number`.
    ///
    /// The number is validated before anything is sent. The code is published
    /// as `pairing_code` once the server acknowledges the request.
    pub fn request_pairing_code(&self, phone_number: &str) -> Result<()> {
        normalize_phone_number(phone_number)?;
        let (pairing, credentials) = {
            let mut inner = self.lock();
            if inner.state != Authenticating || inner.resuming {
                return Err(AuthError::NotAuthenticating.into());
            }
            let Some(credentials) = inner.credentials.clone() else {
                return Err(AuthError::NotAuthenticating.into());
            };
            let existing = match &inner.auth {
                Some(ActiveAuth::Pairing(pairing)) => Some(pairing.clone()),
                _ => None,
            };
            let pairing = match existing {
                Some(pairing) => pairing,
                None => {
                    if let Some(previous) = inner.auth.take() {
                        previous.as_authenticator().reset();
                    }
                    let pairing = PairingCodeAuthenticator::new(
                        self.shared.bus.clone(),
                        self.shared.config.pairing_timeout,
                    );
                    inner.auth = Some(ActiveAuth::Pairing(pairing.clone()));
                    pairing
                }
            };
            (pairing, credentials)
        };
        let request = pairing.request_challenge(phone_number, &credentials)?;
        self.lock().send_direct(&protocol::build_pair_code_login(&request));
        Ok(())
    }

    /// Abort the login: publish `auth.failure` and close without reconnecting.
    ///
    /// A rejected resume also discards the stored session.
    fn fail_login(&self, error: String) {
        warn!("login failed: {error}");
        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            if inner.resuming {
                inner.credentials = None;
                inner.profile = None;
                fx.clear_session = true;
            }
            inner.intentional_close = true;
            inner.timers.cancel_all();
            inner.backoff = Backoff::default();
            inner.teardown(Some(NORMAL_CLOSURE));
            fx.events.push(Event::AuthFailure { error: error.clone() });
            if inner.state != Closed {
                inner.transition(Closed, Some(NORMAL_CLOSURE), Some(error), &mut fx);
                fx.events.push(Event::Disconnected);
            }
        }
        self.shared.requests.cancel_all();
        self.apply(fx);
    }

    fn apply(&self, fx: Effects) {
        let session_id = &self.shared.config.session_id;
        if fx.clear_session {
            if let Err(e) = self.shared.store.clear(session_id) {
                warn!("failed to clear stored session: {e}");
            }
        }
        if let Some(record) = &fx.save {
            if let Err(e) = self.shared.store.save(session_id, record) {
                error!("failed to persist session: {e}");
            }
        }
        for event in &fx.events {
            self.shared.bus.publish(event);
        }
        if let Some(pairing) = fx.confirm_pairing {
            pairing.confirm_issued();
        }
        if let Some(error) = fx.fail_login {
            self.fail_login(error);
        }
        if fx.fetch_snapshot {
            self.spawn_snapshot();
        }
    }

    /// Request the chat and contact lists and merge them into the cache.
    fn spawn_snapshot(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let id = manager.shared.requests.next_id();
            match manager.query(protocol::build_snapshot_query(&id)).await {
                Ok(response) => manager.apply_snapshot(&response),
                Err(e) => warn!("initial sync failed: {e}"),
            }
        });
    }

    fn apply_snapshot(&self, response: &Node) {
        let (chats, contacts) = protocol::parse_snapshot(response);
        let events: Vec<Event> = {
            let mut inner = self.lock();
            inner.cache.apply_snapshot(&chats, &contacts);
            chats
                .iter()
                .filter_map(|update| inner.cache.chat(&update.id).cloned())
                .map(Event::ChatUpdate)
                .collect()
        };
        info!("synced {} chats and {} contacts", chats.len(), contacts.len());
        for event in &events {
            self.shared.bus.publish(event);
        }
    }

    fn arm_keepalive(&self, inner: &mut ConnInner) {
        let every = self.shared.config.keep_alive_interval;
        let weak = Arc::downgrade(&self.shared);
        inner.timers.insert(
            KEEPALIVE,
            ScheduledTask::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
                loop {
                    ticker.tick().await;
                    let Some(shared) = weak.upgrade() else { return };
                    ConnectionManager { shared }.send_keepalive();
                }
            }),
        );
    }

    fn send_keepalive(&self) {
        let inner = self.lock();
        if inner.state == Ready {
            let id = self.shared.requests.next_id();
            debug!("keepalive ping {id}");
            inner.send_direct(&protocol::build_ping(&id));
        }
    }

    /// Queue a raw frame. It goes out immediately when the session is ready,
    /// otherwise on the next transition to ready, in submission order.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.lock().send_or_queue(frame)
    }

    pub fn send_node(&self, node: &Node) -> Result<()> {
        self.send_frame(encode_node(node)?)
    }

    /// Send an IQ and wait for the response with the same id.
    pub async fn query(&self, node: Node) -> Result<Node> {
        let id = node
            .get_attr("id")
            .map(String::from)
            .ok_or(ValidationError::Empty("iq id"))?;
        let response = self.shared.requests.register(&id);
        if let Err(e) = self.send_node(&node) {
            self.shared.requests.cancel(&id);
            return Err(e);
        }
        self.shared
            .requests
            .wait(&id, response, self.shared.config.request_timeout)
            .await
    }

    fn handle_close(&self, id: u64, code: u16, reason: String) {
        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            if !inner.is_current(id) {
                return;
            }
            inner.teardown(None);
            let reason = (!reason.is_empty()).then_some(reason);
            inner.transition(Closed, Some(code), reason, &mut fx);
            fx.events.push(Event::Disconnected);

            let unexpected = !inner.intentional_close && code != NORMAL_CLOSURE;
            if unexpected {
                warn!("connection closed unexpectedly (code {code})");
                if self.shared.config.auto_reconnect {
                    inner.backoff.first_close.get_or_insert_with(Instant::now);
                    self.schedule_reconnect(&mut inner, &mut fx);
                }
            } else {
                info!("connection closed (code {code})");
            }
        }
        self.shared.requests.cancel_all();
        self.apply(fx);
    }

    /// Attempt `n` runs `n * retry_delay` after the close that started the run.
    fn schedule_reconnect(&self, inner: &mut ConnInner, fx: &mut Effects) {
        let config = &self.shared.config;
        if inner.backoff.attempts >= config.retry_count {
            warn!("giving up after {} reconnect attempts", inner.backoff.attempts);
            inner.backoff = Backoff::default();
            fx.events.push(Event::ConnectionFailed);
            return;
        }
        let attempt = inner.backoff.attempts + 1;
        let first_close = *inner.backoff.first_close.get_or_insert_with(Instant::now);
        let at = first_close + config.retry_delay * attempt;
        info!(
            "reconnect attempt {attempt}/{} in {:?}",
            config.retry_count,
            at.saturating_duration_since(Instant::now())
        );
        let weak = Arc::downgrade(&self.shared);
        inner.timers.insert(
            RECONNECT,
            ScheduledTask::spawn(async move {
                tokio::time::sleep_until(at).await;
                if let Some(shared) = weak.upgrade() {
                    ConnectionManager { shared }.reconnect(attempt).await;
                }
            }),
        );
    }

    async fn reconnect(&self, attempt: u32) {
        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            if let Some(task) = inner.timers.take(RECONNECT) {
                task.detach();
            }
            if inner.state != Closed || inner.intentional_close {
                return;
            }
            inner.backoff.attempts = attempt;
            inner.transition(Connecting, None, None, &mut fx);
        }
        self.apply(fx);

        if let Err(e) = self.open().await {
            warn!("reconnect attempt {attempt} failed: {e}");
            let mut fx = Effects::default();
            {
                let mut inner = self.lock();
                if inner.state == Connecting {
                    inner.transition(Closed, None, Some(e.to_string()), &mut fx);
                    if !inner.intentional_close {
                        self.schedule_reconnect(&mut inner, &mut fx);
                    }
                }
            }
            self.apply(fx);
        }
    }

    /// Close the connection and cancel every pending timer. No reconnect follows.
    /// Calling it again is a no-op.
    pub fn disconnect(&self) {
        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            inner.intentional_close = true;
            inner.timers.cancel_all();
            inner.backoff = Backoff::default();
            inner.teardown(Some(NORMAL_CLOSURE));
            if inner.state != Closed {
                inner.transition(Closed, Some(NORMAL_CLOSURE), Some("disconnect".into()), &mut fx);
                fx.events.push(Event::Disconnected);
            }
        }
        self.shared.requests.cancel_all();
        self.apply(fx);
    }

    /// Disconnect and drop anything still queued.
    pub fn shutdown(&self) {
        self.disconnect();
        let dropped = {
            let mut inner = self.lock();
            let dropped = inner.queue.len();
            inner.queue.clear();
            dropped
        };
        info!("shut down, {dropped} queued frames dropped");
    }

    /// Unlink this session on the server and forget it locally.
    pub async fn logout(&self) -> Result<()> {
        let id = self.shared.requests.next_id();
        let mut fx = Effects::default();
        let response = {
            let mut inner = self.lock();
            if inner.state != Ready {
                return Err(Error::InvalidState {
                    action: "log out",
                    state: inner.state.as_str(),
                });
            }
            inner.intentional_close = true;
            inner.transition(LoggingOut, None, None, &mut fx);
            let wid = inner.credentials.as_ref().and_then(|c| c.wid.clone());
            let response = self.shared.requests.register(&id);
            inner.send_direct(&protocol::build_logout(&id, wid.as_deref()));
            response
        };
        self.apply(fx);

        let timeout = self.shared.config.request_timeout;
        if let Err(e) = self.shared.requests.wait(&id, response, timeout).await {
            warn!("logout was not acknowledged: {e}");
        }

        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            inner.timers.cancel_all();
            inner.teardown(Some(NORMAL_CLOSURE));
            inner.credentials = None;
            inner.profile = None;
            inner.queue.clear();
            fx.clear_session = true;
            if inner.state != Closed {
                inner.transition(Closed, Some(NORMAL_CLOSURE), Some("logged out".into()), &mut fx);
                fx.events.push(Event::Disconnected);
            }
        }
        self.shared.requests.cancel_all();
        self.apply(fx);
        info!("logged out");
        Ok(())
    }
}

async fn read_loop(
    shared: Weak<Shared>,
    id: u64,
    mut incoming: mpsc::UnboundedReceiver<TransportEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop => return,
            event = incoming.recv() => event,
        };
        let Some(shared) = shared.upgrade() else { return };
        let manager = ConnectionManager { shared };
        match event {
            Some(TransportEvent::Frame(frame)) => manager.handle_frame(id, frame),
            Some(TransportEvent::Closed { code, reason }) => {
                manager.handle_close(id, code, reason);
                return;
            }
            None => {
                manager.handle_close(id, ABNORMAL_CLOSURE, "transport dropped".into());
                return;
            }
        }
    }
}
