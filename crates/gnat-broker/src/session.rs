//! Session management
//!
//! A [`Connection`] is the part of a client other connections may touch: its
//! id and its outbound queue. It lives in the broker's registry so publishes
//! can reach it. A [`Session`] is owned by the connection's task and carries
//! everything else: decoder state, handshake flags and the local table of
//! subscriptions.

use bytes::Bytes;
use gnat_core::protocol::{self, err_frame};
use gnat_core::{ConnectOptions, Error, Result, Subject};
use gnat_transport::{TransportError, TransportSender};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::parser::{ParseState, SessionHandler};
use crate::subscription::Subscription;
use crate::watcher::PongWatcher;

/// Connection identifier
pub type ConnectionId = u64;

/// Generate a random non-negative 63-bit connection id
pub fn generate_connection_id() -> ConnectionId {
    rand::thread_rng().gen_range(1..=i64::MAX as u64)
}

/// Registry entry for a connected client
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    sender: Arc<dyn TransportSender>,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: Arc<dyn TransportSender>) -> Self {
        Self { id, addr, sender }
    }

    /// Queue a frame without waiting. Returns whether it was queued.
    pub fn send(&self, frame: Bytes) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(TransportError::NotConnected) | Err(TransportError::ConnectionClosed) => {
                debug!(client_id = self.id, "Dropping frame for closed connection");
                false
            }
            Err(e) => {
                warn!(client_id = self.id, "Dropping frame: {}", e);
                false
            }
        }
    }

    /// Flush queued frames and close the transport
    pub async fn close(&self) {
        if let Err(e) = self.sender.close().await {
            debug!(client_id = self.id, "Close failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

/// Operations subject to the handshake gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Ping,
    Pong,
    Pub,
    Sub,
    Unsub,
}

/// Per-connection protocol state
pub struct Session {
    connection: Arc<Connection>,
    broker: Broker,
    parse: ParseState,
    awaiting_connect: bool,
    awaiting_pong: Arc<AtomicBool>,
    /// Local subscriber id -> subscribed subject
    subscriptions: HashMap<u32, Subject>,
    watcher: Option<PongWatcher>,
    options: Option<ConnectOptions>,
    closed: bool,
}

impl Session {
    pub fn new(broker: Broker, connection: Arc<Connection>) -> Self {
        let capacity = broker.config().buffer_capacity;
        Self {
            connection,
            broker,
            parse: ParseState::new(capacity),
            awaiting_connect: true,
            awaiting_pong: Arc::new(AtomicBool::new(false)),
            subscriptions: HashMap::new(),
            watcher: None,
            options: None,
            closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Options from the most recent CONNECT
    pub fn options(&self) -> Option<&ConnectOptions> {
        self.options.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn awaiting_connect(&self) -> bool {
        self.awaiting_connect
    }

    pub fn awaiting_pong(&self) -> bool {
        self.awaiting_pong.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Subject registered under a subscriber id
    pub fn subscription(&self, subscriber_id: u32) -> Option<&Subject> {
        self.subscriptions.get(&subscriber_id)
    }

    /// Enforce the handshake: nothing before CONNECT, nothing but PONG
    /// while the initial PING is outstanding
    pub fn verify_state(&self, operation: Operation) -> Result<()> {
        if self.awaiting_connect && operation != Operation::Connect {
            return Err(Error::ConnectionOperationExpected);
        }
        if self.awaiting_pong() && operation != Operation::Pong {
            return Err(Error::PongOperationExpected);
        }
        Ok(())
    }

    fn send(&self, frame: &'static [u8]) {
        self.connection.send(Bytes::from_static(frame));
    }

    fn start_pong_watcher(&mut self) {
        let config = self.broker.config();
        self.watcher = Some(PongWatcher::spawn(
            self.connection.clone(),
            self.awaiting_pong.clone(),
            config.pong_poll_interval(),
            config.pong_timeout(),
        ));
    }

    /// Remove every subscription of this session from the broker
    fn unsubscribe_all(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }

        let id = self.connection.id;
        let entries: Vec<(Subscription, Subject)> = self
            .subscriptions
            .drain()
            .map(|(sid, subject)| (Subscription::new(sid, id), subject))
            .collect();
        debug!(client_id = id, count = entries.len(), "Removing subscriptions");
        self.broker.unsubscribe_batch(
            entries
                .iter()
                .map(|(subscription, subject)| (subscription, subject.tokens())),
        );
    }

    /// Tear the session down: drop its subscriptions, stop the pong watcher
    /// and close the transport after queued frames are flushed
    pub async fn close(mut self) {
        self.closed = true;
        self.unsubscribe_all();
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        self.connection.close().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl SessionHandler for Session {
    fn parse_state(&mut self) -> &mut ParseState {
        &mut self.parse
    }

    fn process_connect(&mut self, options: ConnectOptions) -> Result<()> {
        self.verify_state(Operation::Connect)?;

        if self.awaiting_connect {
            self.awaiting_connect = false;
            info!(
                client_id = self.id(),
                name = options.name.as_deref().unwrap_or(""),
                "Client handshake started"
            );
            self.options = Some(options);
            self.send(protocol::OK_PING);
            self.awaiting_pong.store(true, Ordering::SeqCst);
            self.start_pong_watcher();
        } else {
            debug!(client_id = self.id(), "CONNECT");
            self.options = Some(options);
            self.send(protocol::OK);
        }
        Ok(())
    }

    fn process_ping(&mut self) -> Result<()> {
        self.verify_state(Operation::Ping)?;
        self.send(protocol::PONG);
        Ok(())
    }

    fn process_pong(&mut self) -> Result<()> {
        self.verify_state(Operation::Pong)?;
        if self.awaiting_pong.swap(false, Ordering::SeqCst) {
            info!(client_id = self.id(), "Client handshake complete");
        }
        Ok(())
    }

    fn process_pub_args(&mut self, args: &str) -> Result<()> {
        self.verify_state(Operation::Pub)?;

        let (subject, size) = parse_subject_and_number(args)?;
        let size = usize::try_from(size).map_err(|_| Error::MaximumMessageSizeReached)?;
        if size > self.parse.capacity() {
            return Err(Error::MaximumMessageSizeReached);
        }
        self.parse.set_pending_publish(subject, size);
        Ok(())
    }

    fn process_pub(&mut self, payload: &[u8]) -> Result<()> {
        self.verify_state(Operation::Pub)?;

        let subject = Subject::parse_publish(self.parse.pending_subject())?;
        let delivered = self.broker.deliver(&subject, payload);
        debug!(
            client_id = self.id(),
            subject = %subject,
            size = payload.len(),
            delivered,
            "PUB"
        );
        self.send(protocol::OK);
        Ok(())
    }

    fn process_sub(&mut self, args: &str) -> Result<()> {
        self.verify_state(Operation::Sub)?;

        let (subject, sid) = parse_subject_and_number(args)?;
        let sid = u32::try_from(sid).map_err(|_| Error::ArgumentParse)?;
        let subject = Subject::parse_subscribe(subject)?;
        if self.subscriptions.contains_key(&sid) {
            return Err(Error::ExistingSubscriptionId(sid));
        }

        let subscription = Subscription::new(sid, self.id());
        self.broker.subscribe(subscription, subject.tokens());
        debug!(client_id = self.id(), sid, subject = %subject, "SUB");
        self.subscriptions.insert(sid, subject);
        self.send(protocol::OK);
        Ok(())
    }

    fn process_unsub(&mut self, args: &str) -> Result<()> {
        self.verify_state(Operation::Unsub)?;

        let mut parts = args.split_ascii_whitespace();
        let sid = match (parts.next(), parts.next()) {
            (Some(sid), None) => parse_number(sid)?,
            _ => return Err(Error::ArgumentParse),
        };
        let sid = u32::try_from(sid).map_err(|_| Error::ArgumentParse)?;

        let subject = self
            .subscriptions
            .remove(&sid)
            .ok_or(Error::NoSuchSubscriptionId(sid))?;
        let subscription = Subscription::new(sid, self.id());
        self.broker
            .unsubscribe_batch([(&subscription, subject.tokens())]);
        debug!(client_id = self.id(), sid, subject = %subject, "UNSUB");
        self.send(protocol::OK);
        Ok(())
    }

    fn close_connection(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        warn!(client_id = self.id(), "Closing connection: {}", reason);
        self.closed = true;
        self.connection.send(err_frame(reason));
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.signal_stop();
        }
    }

    fn send_error(&mut self, message: &str) {
        debug!(client_id = self.id(), "Rejected operation: {}", message);
        self.connection.send(err_frame(message));
    }
}

/// Parse a decimal count or id. Only ASCII digits are accepted.
pub fn parse_number(s: &str) -> Result<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::ArgumentParse);
    }
    s.parse().map_err(|_| Error::ArgumentParse)
}

/// Split a `<subject> <number>` argument line
pub fn parse_subject_and_number(args: &str) -> Result<(&str, u64)> {
    let mut parts = args.split_ascii_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(subject), Some(number), None) => Ok((subject, parse_number(number)?)),
        _ => Err(Error::ArgumentParse),
    }
}
