//! One node's membership in a parallel session.
//!
//! [`ParallelPeer`] ties a [`Connection`] to the session state machine, the
//! hostship arbiter and the data channel. A spawned receive loop is the only
//! place remote-driven transitions happen; the application observes them
//! through the [`PeerEvent`] receiver returned on connect.
//!
//! The receive loop waits while the event channel is full. Local calls never
//! do: events they raise go through an unbounded queue the loop forwards.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{PeerConfig, TransportConfig};
use crate::core::message::{DataMessage, Message};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::control::{AuthenticationResult, ControlEvent, Credentials};
use crate::protocol::dispatcher::DataChannel;
use crate::protocol::hostship::HostshipArbiter;
use crate::protocol::session::{Session, Transition};
use crate::protocol::status::Status;
use crate::transport::Connection;
use crate::utils::metrics::global_metrics;

/// Something the application may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    StatusChanged { from: Status, to: Status },
    HostChanged(Option<String>),
    ConnectionCount(u32),
    /// A data message no registered handler accepted.
    Data(DataMessage),
    /// Emitted once, after the session has dropped to `Disconnected`.
    Disconnected,
}

impl From<Transition> for PeerEvent {
    fn from(t: Transition) -> Self {
        PeerEvent::StatusChanged {
            from: t.from,
            to: t.to,
        }
    }
}

pub struct ParallelPeer<S> {
    connection: Arc<Connection<S>>,
    session: Arc<Session>,
    arbiter: HostshipArbiter,
    data_channel: DataChannel,
    /// Events raised by local calls, emitted in order by the receive loop.
    local_events: mpsc::UnboundedSender<PeerEvent>,
}

impl ParallelPeer<TcpStream> {
    /// Connect to the rendezvous server at `config.address` and authenticate.
    ///
    /// Returns once the credentials are sent; acceptance arrives later as a
    /// `StatusChanged` event to `ClientWithoutHost`.
    #[instrument(skip_all, fields(address = %config.address, name = %config.name))]
    pub async fn connect(
        config: &PeerConfig,
        transport: &TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<PeerEvent>)> {
        let connection =
            Connection::connect(&config.address, transport, config.connection_timeout).await?;
        Self::start(connection, config).await
    }
}

impl<S> ParallelPeer<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Join a session over an already established stream.
    pub async fn from_stream(
        stream: S,
        config: &PeerConfig,
        transport: &TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<PeerEvent>)> {
        let connection = Connection::new(stream, transport, config.address.clone());
        Self::start(connection, config).await
    }

    async fn start(
        connection: Connection<S>,
        config: &PeerConfig,
    ) -> Result<(Self, mpsc::Receiver<PeerEvent>)> {
        let connection = Arc::new(connection);
        let session = Arc::new(Session::new(config.name.clone()));
        let arbiter = HostshipArbiter::new(session.clone(), &config.host_password);
        let data_channel = DataChannel::new();
        let (events, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let (local_events, local_rx) = mpsc::unbounded_channel();

        let transition = session.begin_connecting()?;
        let _ = events.send(transition.into()).await;

        let credentials = Credentials::new(&config.password, &config.host_password, &config.name);
        if let Err(e) = Self::send_credentials(&connection, &credentials).await {
            connection.disconnect();
            session.reset();
            return Err(e);
        }

        let receive_loop = ReceiveLoop {
            connection: connection.clone(),
            session: session.clone(),
            arbiter: arbiter.clone(),
            data_channel: data_channel.clone(),
            events,
            local_events: local_rx,
        };
        tokio::spawn(receive_loop.run());

        Ok((
            Self {
                connection,
                session,
                arbiter,
                data_channel,
                local_events,
            },
            events_rx,
        ))
    }

    async fn send_credentials(connection: &Connection<S>, credentials: &Credentials) -> Result<()> {
        connection.send_message(credentials.to_message()?).await
    }

    pub fn local_name(&self) -> &str {
        self.session.local_name()
    }

    pub fn status(&self) -> Status {
        self.session.status()
    }

    pub fn host_name(&self) -> Option<String> {
        self.session.host_name()
    }

    pub fn is_host(&self) -> bool {
        self.session.is_host()
    }

    /// Authenticated peers in the session, as last reported by the server.
    pub fn connection_count(&self) -> u32 {
        self.session.connection_count()
    }

    /// Handlers registered here see data messages before the event channel.
    pub fn data_channel(&self) -> &DataChannel {
        &self.data_channel
    }

    /// Ask the server for hostship. The verdict arrives as events.
    pub async fn request_hostship(&self) -> Result<()> {
        let msg = self.arbiter.request()?;
        self.connection.send_message(msg).await
    }

    /// Drop hostship. Local status changes before the server is told.
    ///
    /// Never waits on the event channel, so it is safe to call while
    /// handling an event.
    pub async fn resign_hostship(&self) -> Result<()> {
        let (transition, msg) = self.arbiter.resign()?;
        let sent = self.connection.send_message(msg).await;
        let _ = self.local_events.send(transition.into());
        let _ = self.local_events.send(PeerEvent::HostChanged(None));
        sent
    }

    /// Send a data message to the session.
    pub async fn send_data(&self, msg: DataMessage) -> Result<()> {
        let status = self.session.status();
        if !status.is_authenticated() {
            return Err(ProtocolError::StateConflict {
                status,
                reason: constants::ERR_NOT_CONNECTED,
            });
        }
        self.connection.send_message(msg.into_message()).await
    }

    /// Leave the session. The receive loop winds down on its own.
    pub fn disconnect(&self) {
        self.connection.disconnect();
        let transition = self.session.reset();
        if transition.changed() {
            let _ = self.local_events.send(transition.into());
        }
    }
}

impl<S> Drop for ParallelPeer<S> {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

struct ReceiveLoop<S> {
    connection: Arc<Connection<S>>,
    session: Arc<Session>,
    arbiter: HostshipArbiter,
    data_channel: DataChannel,
    events: mpsc::Sender<PeerEvent>,
    local_events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl<S> ReceiveLoop<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn run(mut self) {
        let name = self.session.local_name().to_string();
        let reason = loop {
            tokio::select! {
                biased;
                Some(event) = self.local_events.recv() => self.emit(event).await,
                received = self.connection.recv() => {
                    let msg = match received {
                        Ok(msg) => msg,
                        Err(e) => break e,
                    };
                    if let Err(e) = self.handle(msg).await {
                        if e.is_fatal() {
                            break e;
                        }
                        if matches!(e, ProtocolError::StateConflict { .. }) {
                            global_metrics().state_conflict();
                        }
                        warn!(node = %name, error = %e, "Discarded message");
                    }
                }
            }
        };

        self.connection.disconnect();
        while let Ok(event) = self.local_events.try_recv() {
            self.emit(event).await;
        }
        match reason {
            ProtocolError::ConnectionClosed => info!(node = %name, "Left session"),
            e => error!(node = %name, error = %e, "Left session"),
        }

        let had_host = self.session.host_name().is_some();
        let transition = self.session.reset();
        if transition.changed() {
            self.emit(transition.into()).await;
        }
        if had_host {
            self.emit(PeerEvent::HostChanged(None)).await;
        }
        self.emit(PeerEvent::Disconnected).await;
    }

    async fn emit(&self, event: PeerEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event).await;
    }

    async fn handle(&self, msg: Message) -> Result<()> {
        if !msg.message_type.is_control() {
            let data = msg.into_data_message()?;
            return match self.data_channel.dispatch(&data) {
                Err(ProtocolError::UnexpectedMessage) => {
                    self.emit(PeerEvent::Data(data)).await;
                    Ok(())
                }
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "Data handler failed");
                    Ok(())
                }
                other => other,
            };
        }

        let event = ControlEvent::from_message(&msg)?;
        let host_before = self.session.host_name();

        let transition = match &event {
            ControlEvent::HostshipVerdict(verdict) => self.arbiter.on_verdict(*verdict)?,
            other => self.session.apply(other)?,
        };
        debug!(event = ?event, from = %transition.from, to = %transition.to, "Applied control message");

        if transition.changed() {
            self.emit(transition.into()).await;
        }
        let host_after = self.session.host_name();
        if host_after != host_before {
            self.emit(PeerEvent::HostChanged(host_after)).await;
        }

        match event {
            ControlEvent::ConnectionCount(count) => {
                self.emit(PeerEvent::ConnectionCount(count)).await;
                Ok(())
            }
            ControlEvent::Authentication(AuthenticationResult::Rejected) => {
                Err(ProtocolError::AuthenticationRejected)
            }
            _ => Ok(()),
        }
    }
}
