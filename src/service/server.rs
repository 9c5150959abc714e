//! Rendezvous server.
//!
//! Every peer gets a reader task and a writer task around a shared
//! [`Connection`]. Readers forward inbound messages to one server task, which
//! owns the [`Registry`] and handles messages one at a time, so hostship
//! grants are serialized without further locking. Writers drain a bounded
//! per-peer queue; a peer that lets its queue fill up is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{GrantPolicy, ServerConfig, TransportConfig};
use crate::core::message::{DataMessage, Message, MessageType};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::control::{
    password_digest, AuthenticationResult, ConnectionCount, Credentials, HostshipClaim,
    HostshipVerdict, PasswordDigest, StatusUpdate,
};
use crate::protocol::status::Status;
use crate::transport::Connection;
use crate::utils::metrics::global_metrics;

pub type PeerId = u64;

#[derive(Debug)]
enum ServerInput {
    Message { id: PeerId, msg: Message },
    Left { id: PeerId },
}

struct PeerEntry {
    outbound: mpsc::Sender<Message>,
    closer: CancellationToken,
    /// Set once the peer has authenticated.
    name: Option<String>,
}

/// Arbitration state: who is connected, who authenticated, who is host.
struct Registry {
    peers: HashMap<PeerId, PeerEntry>,
    host: Option<PeerId>,
    password: PasswordDigest,
    host_password: PasswordDigest,
    policy: GrantPolicy,
    kicked: Vec<PeerId>,
}

impl Registry {
    fn new(config: &ServerConfig) -> Self {
        Self {
            peers: HashMap::new(),
            host: None,
            password: password_digest(&config.password),
            host_password: password_digest(&config.host_password),
            policy: config.grant_policy,
            kicked: Vec::new(),
        }
    }

    fn join(&mut self, id: PeerId, outbound: mpsc::Sender<Message>, closer: CancellationToken) {
        self.peers.insert(
            id,
            PeerEntry {
                outbound,
                closer,
                name: None,
            },
        );
    }

    fn len(&self) -> usize {
        self.peers.len()
    }

    fn authenticated(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers
            .iter()
            .filter(|(_, p)| p.name.is_some() && !p.closer.is_cancelled())
            .map(|(id, _)| *id)
    }

    fn is_authenticated(&self, id: PeerId) -> bool {
        self.peers.get(&id).is_some_and(|p| p.name.is_some())
    }

    fn host_name(&self) -> Option<String> {
        self.host
            .and_then(|h| self.peers.get(&h))
            .and_then(|p| p.name.clone())
    }

    /// Process one inbound message, then drop anyone who fell behind.
    fn handle(&mut self, id: PeerId, msg: Message) {
        self.dispatch(id, msg);
        self.reap();
    }

    /// Forget a peer whose connection ended.
    fn leave(&mut self, id: PeerId) {
        self.remove(id);
        self.reap();
    }

    fn dispatch(&mut self, id: PeerId, msg: Message) {
        if msg.message_type == MessageType::Authentication {
            self.authenticate(id, &msg);
            return;
        }
        if !self.is_authenticated(id) {
            warn!(peer = id, kind = msg.message_type.name(), "Discarding message from unauthenticated peer");
            return;
        }

        match msg.message_type {
            MessageType::HostshipRequest => self.hostship_request(id, &msg),
            MessageType::HostshipResignation => self.hostship_resignation(id),
            MessageType::Data => self.relay(id, msg),
            other => warn!(peer = id, kind = other.name(), "Discarding server-bound control message"),
        }
    }

    fn authenticate(&mut self, id: PeerId, msg: &Message) {
        if self.is_authenticated(id) {
            debug!(peer = id, "Ignoring repeated authentication");
            return;
        }
        let credentials = match Credentials::from_message(msg) {
            Ok(c) => c,
            Err(e) => {
                warn!(peer = id, error = %e, "Malformed credentials");
                global_metrics().protocol_error();
                self.kick(id);
                return;
            }
        };

        if credentials.password != self.password {
            warn!(peer = id, name = %credentials.name, "Authentication rejected");
            self.deliver(id, AuthenticationResult::Rejected.to_message());
            // Dropping the queue sender lets the writer flush the rejection
            // and then close.
            self.peers.remove(&id);
            return;
        }

        info!(peer = id, name = %credentials.name, "Peer authenticated");
        if let Some(entry) = self.peers.get_mut(&id) {
            entry.name = Some(credentials.name);
        }
        self.deliver(id, AuthenticationResult::Accepted.to_message());
        self.send_status(id);
        self.broadcast_count();
    }

    fn hostship_request(&mut self, id: PeerId, msg: &Message) {
        let claim = match HostshipClaim::from_message(msg) {
            Ok(c) => c,
            Err(e) => {
                warn!(peer = id, error = %e, "Malformed hostship request");
                global_metrics().protocol_error();
                self.kick(id);
                return;
            }
        };

        let authorized = claim.host_password == self.host_password;
        let granted = authorized
            && match self.policy {
                GrantPolicy::Takeover => true,
                GrantPolicy::FirstRequesterWins => self.host.is_none() || self.host == Some(id),
            };

        if !granted {
            info!(peer = id, authorized, "Hostship denied");
            self.deliver(id, HostshipVerdict::Denied.to_message());
            return;
        }

        if let Some(previous) = self.host.filter(|h| *h != id) {
            info!(peer = id, previous, "Hostship taken over");
        } else {
            info!(peer = id, "Hostship granted");
        }
        self.host = Some(id);
        self.deliver(id, HostshipVerdict::Granted.to_message());
        self.broadcast_status();
    }

    fn hostship_resignation(&mut self, id: PeerId) {
        if self.host != Some(id) {
            debug!(peer = id, "Ignoring resignation from non-host");
            return;
        }
        info!(peer = id, "Host resigned");
        self.host = None;
        self.broadcast_status();
    }

    fn relay(&mut self, id: PeerId, msg: Message) {
        if self.host != Some(id) {
            debug!(peer = id, "Dropping data from non-host");
            return;
        }
        // Clients treat a bad data envelope as fatal; stop it here.
        if let Err(e) = DataMessage::from_content(&msg.content) {
            warn!(peer = id, error = %e, "Malformed data from host");
            global_metrics().protocol_error();
            self.kick(id);
            return;
        }
        let targets: Vec<PeerId> = self.authenticated().filter(|p| *p != id).collect();
        for target in targets {
            self.deliver(target, msg.clone());
        }
    }

    fn status_for(&self, id: PeerId) -> StatusUpdate {
        match self.host {
            Some(h) if h == id => StatusUpdate::new(Status::Host, self.host_name()),
            Some(_) => StatusUpdate::new(Status::ClientWithHost, self.host_name()),
            None => StatusUpdate::new(Status::ClientWithoutHost, None),
        }
    }

    fn send_status(&mut self, id: PeerId) {
        match self.status_for(id).to_message() {
            Ok(msg) => self.deliver(id, msg),
            Err(e) => error!(peer = id, error = %e, "Failed to encode status"),
        }
    }

    fn broadcast_status(&mut self) {
        let targets: Vec<PeerId> = self.authenticated().collect();
        for id in targets {
            self.send_status(id);
        }
    }

    fn broadcast_count(&mut self) {
        let targets: Vec<PeerId> = self.authenticated().collect();
        let msg = ConnectionCount(targets.len() as u32).to_message();
        for id in targets {
            self.deliver(id, msg.clone());
        }
    }

    fn deliver(&mut self, id: PeerId, msg: Message) {
        let Some(entry) = self.peers.get(&id).filter(|p| !p.closer.is_cancelled()) else {
            return;
        };
        match entry.outbound.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = id, "{}", constants::ERR_OUTBOUND_QUEUE_FULL);
                self.kick(id);
            }
            // Writer already gone; its reader reports the departure.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn kick(&mut self, id: PeerId) {
        if let Some(entry) = self.peers.get(&id).filter(|p| !p.closer.is_cancelled()) {
            entry.closer.cancel();
            self.kicked.push(id);
        }
    }

    fn reap(&mut self) {
        while let Some(id) = self.kicked.pop() {
            self.remove(id);
        }
    }

    fn remove(&mut self, id: PeerId) {
        let Some(entry) = self.peers.remove(&id) else {
            return;
        };
        entry.closer.cancel();
        if entry.name.is_none() {
            return;
        }

        info!(peer = id, name = ?entry.name, "Peer left");
        if self.host == Some(id) {
            self.host = None;
            self.broadcast_status();
        }
        self.broadcast_count();
    }

    fn clear(&mut self) {
        for (_, entry) in self.peers.drain() {
            entry.closer.cancel();
        }
        self.host = None;
        self.kicked.clear();
    }
}

pub struct ParallelServer {
    listener: TcpListener,
    config: ServerConfig,
    transport: TransportConfig,
}

impl ParallelServer {
    /// Validate the configuration and bind the listener.
    #[instrument(skip_all, fields(address = %config.address))]
    pub async fn bind(config: ServerConfig, transport: TransportConfig) -> Result<Self> {
        let mut errors = config.validate();
        errors.extend(transport.validate());
        if !errors.is_empty() {
            return Err(ProtocolError::ConfigError(errors.join("; ")));
        }

        let listener = TcpListener::bind(&config.address).await?;
        info!(address = %listener.local_addr()?, "Rendezvous server listening");
        Ok(Self {
            listener,
            config,
            transport,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown_rx` fires or its sender is dropped.
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let (input_tx, mut input_rx) = mpsc::channel(self.config.backpressure_limit);
        let active = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new(&self.config);
        let mut next_id: PeerId = 0;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for peers to leave...");
                    registry.clear();
                    // Readers blocked on a full input queue fail instead of waiting.
                    input_rx.close();
                    self.wait_for_peers(&active).await;
                    global_metrics().log_metrics();
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if registry.len() >= self.config.max_connections {
                                warn!(peer = %addr, limit = self.config.max_connections, "Connection limit reached, refusing peer");
                                continue;
                            }
                            next_id += 1;
                            let (outbound, closer) =
                                self.spawn_peer(next_id, stream, addr, input_tx.clone(), active.clone());
                            registry.join(next_id, outbound, closer);
                            debug!(peer = next_id, %addr, "Peer connected");
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }

                Some(input) = input_rx.recv() => {
                    match input {
                        ServerInput::Message { id, msg } => registry.handle(id, msg),
                        ServerInput::Left { id } => registry.leave(id),
                    }
                }
            }
        }
    }

    fn spawn_peer(
        &self,
        id: PeerId,
        stream: TcpStream,
        addr: SocketAddr,
        input_tx: mpsc::Sender<ServerInput>,
        active: Arc<AtomicUsize>,
    ) -> (mpsc::Sender<Message>, CancellationToken) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let connection = Arc::new(Connection::new(stream, &self.transport, addr.to_string()));
        let (outbound, mut queue) = mpsc::channel::<Message>(self.config.backpressure_limit);
        let closer = CancellationToken::new();
        active.fetch_add(1, Ordering::AcqRel);

        let reader = connection.clone();
        tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(msg) => {
                        if input_tx.send(ServerInput::Message { id, msg }).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if !matches!(e, ProtocolError::ConnectionClosed) {
                            debug!(peer = id, error = %e, "Peer read failed");
                        }
                        break;
                    }
                }
            }
            reader.disconnect();
            active.fetch_sub(1, Ordering::AcqRel);
            let _ = input_tx.send(ServerInput::Left { id }).await;
        });

        let writer = connection;
        let stop = closer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    next = queue.recv() => match next {
                        Some(msg) => {
                            if writer.send_message(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            writer.disconnect();
        });

        (outbound, closer)
    }

    async fn wait_for_peers(&self, active: &AtomicUsize) {
        let timeout = tokio::time::sleep(self.config.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                _ = &mut timeout => {
                    warn!("Shutdown timeout reached, forcing exit");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    let remaining = active.load(Ordering::Acquire);
                    if remaining == 0 {
                        info!("All peers gone, shutting down");
                        break;
                    }
                    debug!(remaining, "Waiting for peers to leave");
                }
            }
        }
    }
}

/// Run a rendezvous server until Ctrl-C.
pub async fn start_server(config: ServerConfig, transport: TransportConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(config, transport, shutdown_rx).await
}

/// Run a rendezvous server until `shutdown_rx` fires.
pub async fn start_server_with_shutdown(
    config: ServerConfig,
    transport: TransportConfig,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    ParallelServer::bind(config, transport)
        .await?
        .run(shutdown_rx)
        .await
}
