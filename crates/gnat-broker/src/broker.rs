//! Broker implementation
//!
//! The broker accepts connections, gives each one a task that decodes its
//! inbound stream, and routes published messages to matching subscribers.

use dashmap::DashMap;
use gnat_core::protocol::{err_frame, msg_frame, ServerInfo};
use gnat_core::Subject;
use gnat_transport::{
    TcpServer, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::parser::decode;
use crate::session::{generate_connection_id, Connection, ConnectionId, Session};
use crate::subscription::{SubjectTrie, Subscription};

/// Diagnostic written to connections refused by the connection limit
pub const MAX_CONNECTIONS_EXCEEDED: &str = "Maximum connections exceeded";

/// gnat broker
///
/// Cloning is cheap; clones share the same registry, trie and shutdown signal.
#[derive(Clone)]
pub struct Broker {
    config: Arc<BrokerConfig>,
    server_id: u64,
    /// Connected clients
    connections: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    /// Held while a new connection is checked against the limit and inserted
    admission: Arc<Mutex<()>>,
    /// Subscription index
    subscriptions: Arc<SubjectTrie>,
    /// Bound address of the listener
    local_addr: Arc<RwLock<Option<SocketAddr>>>,
    /// Set to true to stop accepting
    shutdown: Arc<watch::Sender<bool>>,
}

impl Broker {
    /// Create a new broker
    pub fn new(config: BrokerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            server_id: rand::thread_rng().gen_range(1..=i64::MAX as u64),
            connections: Arc::new(DashMap::new()),
            admission: Arc::new(Mutex::new(())),
            subscriptions: Arc::new(SubjectTrie::new()),
            local_addr: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    /// Address the broker is listening on, once serving
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    // =========================================================================
    // Connection Registry
    // =========================================================================

    pub fn register_connection(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id, connection);
    }

    pub fn unregister_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(&id).map(|(_, connection)| connection)
    }

    pub fn lookup_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register a new client unless the connection limit is reached.
    ///
    /// The slot is taken before the connection's task starts, so a burst of
    /// accepts cannot overshoot `max_connections`.
    fn admit(&self, sender: &Arc<dyn TransportSender>, addr: SocketAddr) -> Option<Arc<Connection>> {
        let _admission = self.admission.lock();

        let max = self.config.max_connections;
        if max > 0 && self.connections.len() >= max {
            return None;
        }

        let id = loop {
            let id = generate_connection_id();
            if !self.connections.contains_key(&id) {
                break id;
            }
        };
        let connection = Arc::new(Connection::new(id, addr, sender.clone()));
        self.register_connection(connection.clone());
        Some(connection)
    }

    // =========================================================================
    // Subscriptions and Routing
    // =========================================================================

    pub fn subscribe(&self, subscription: Subscription, tokens: &[String]) {
        self.subscriptions.add(subscription, tokens);
    }

    /// Remove subscriptions; entries whose path is unknown are skipped
    pub fn unsubscribe_batch<'a, I>(&self, entries: I)
    where
        I: IntoIterator<Item = (&'a Subscription, &'a [String])>,
    {
        self.subscriptions.remove_batch(entries);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Send a published payload to every matching subscription.
    ///
    /// Returns the number of frames queued. Subscriptions of connections
    /// that have already left the registry are skipped.
    pub fn deliver(&self, subject: &Subject, payload: &[u8]) -> usize {
        let matched = self.subscriptions.match_for_publish(subject.tokens());
        let mut delivered = 0;

        for subscription in matched {
            let Some(connection) = self.lookup_connection(subscription.connection_id) else {
                continue;
            };
            let frame = msg_frame(subject.as_str(), subscription.subscriber_id, payload);
            if connection.send(frame) {
                delivered += 1;
            }
        }

        delivered
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Bind a TCP listener and serve until [`stop`](Self::stop) is called
    pub async fn serve(&self, addr: &str) -> Result<()> {
        let server = TcpServer::bind(addr).await?;
        self.serve_on(server).await
    }

    /// Serve on any transport server
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        let local_addr = server.local_addr()?;
        *self.local_addr.write() = Some(local_addr);
        info!(server_id = self.server_id, "Broker accepting connections on {}", local_addr);

        let mut shutdown = self.shutdown.subscribe();

        while !*shutdown.borrow() {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
                _ = shutdown.changed() => {}
            }
        }

        info!("Broker stopped accepting connections");
        Ok(())
    }

    /// Stop accepting connections. Existing connections are left running.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    fn handle_connection<R>(&self, sender: Arc<dyn TransportSender>, receiver: R, addr: SocketAddr)
    where
        R: TransportReceiver + 'static,
    {
        let Some(connection) = self.admit(&sender, addr) else {
            warn!(
                "Refusing {}: {} connections open",
                addr, self.config.max_connections
            );
            tokio::spawn(async move {
                let _ = sender.try_send(err_frame(MAX_CONNECTIONS_EXCEEDED));
                let _ = sender.close().await;
                drop(receiver);
            });
            return;
        };

        let broker = self.clone();
        tokio::spawn(async move {
            broker.run_connection(connection, receiver).await;
        });
    }

    fn server_info(&self, connection: &Connection) -> ServerInfo {
        let local = self.local_addr();
        ServerInfo {
            server_id: self.server_id,
            server_name: self.config.name.clone(),
            version: gnat_core::VERSION.to_string(),
            client_id: connection.id,
            client_ip: connection.addr.ip().to_string(),
            host_ip: local
                .map(|a| a.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
                .to_string(),
            host_port: local.map(|a| a.port()).unwrap_or(gnat_core::DEFAULT_PORT),
        }
    }

    /// Drive one connection from INFO to teardown
    async fn run_connection<R>(&self, connection: Arc<Connection>, mut receiver: R)
    where
        R: TransportReceiver,
    {
        let client_id = connection.id;
        let mut session = Session::new(self.clone(), connection.clone());
        info!(client_id, "Client connected from {}", connection.addr);

        match self.server_info(&connection).to_frame() {
            Ok(frame) => {
                connection.send(frame);
            }
            Err(e) => error!(client_id, "Failed to encode INFO: {}", e),
        }

        while let Some(event) = receiver.recv().await {
            match event {
                TransportEvent::Data(chunk) => {
                    decode(&mut session, &chunk);
                    if session.is_closed() {
                        break;
                    }
                }
                TransportEvent::Disconnected { reason } => {
                    debug!(client_id, "Transport disconnected: {:?}", reason);
                    break;
                }
                TransportEvent::Error(e) => {
                    error!(client_id, "Transport error: {}", e);
                    break;
                }
            }
        }

        self.unregister_connection(client_id);
        session.close().await;
        info!(client_id, "Client disconnected");
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
