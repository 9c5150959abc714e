//! A framed, socket-owning link to one remote participant.
//!
//! The stream is split into independently locked halves so one task can sit
//! in [`Connection::recv`] while others send. Sends are serialized by the
//! writer lock, which keeps each frame contiguous on the wire.
//!
//! [`Connection::disconnect`] is synchronous and may race with in-flight
//! operations: it flips the open flag and cancels a token that every pending
//! send and receive selects on, so they fail fast with
//! [`ProtocolError::ConnectionClosed`] instead of waiting on the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::TransportConfig;
use crate::core::codec::MessageCodec;
use crate::core::message::{DataMessage, Message};
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{with_timeout, with_timeout_error};

type Reader<S> = FramedRead<ReadHalf<S>, MessageCodec>;
type Writer<S> = FramedWrite<WriteHalf<S>, MessageCodec>;

pub struct Connection<S> {
    label: String,
    reader: Mutex<Option<Reader<S>>>,
    writer: Mutex<Option<Writer<S>>>,
    open: AtomicBool,
    cancel: CancellationToken,
    send_timeout: Duration,
    max_message_size: usize,
}

impl Connection<TcpStream> {
    /// Open a TCP connection to `addr` (`host:port`), giving up after
    /// `timeout`.
    #[instrument(skip(config))]
    pub async fn connect(
        addr: &str,
        config: &TransportConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let stream = with_timeout(TcpStream::connect(addr), timeout).await??;
        stream.set_nodelay(true)?;
        let label = stream
            .peer_addr()
            .map(|a: SocketAddr| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        info!(peer = %label, "Connected");
        Ok(Self::new(stream, config, label))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Take ownership of an established stream.
    pub fn new(stream: S, config: &TransportConfig, label: impl Into<String>) -> Self {
        let codec = MessageCodec::new(config.max_message_size);
        let (read_half, write_half) = tokio::io::split(stream);
        global_metrics().connection_established();

        Self {
            label: label.into(),
            reader: Mutex::new(Some(FramedRead::new(read_half, codec))),
            writer: Mutex::new(Some(FramedWrite::new(write_half, codec))),
            open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            send_timeout: config.send_timeout,
            max_message_size: config.max_message_size,
        }
    }

    /// Write one whole frame.
    ///
    /// A message over the size limit is refused before touching the socket
    /// and leaves the connection usable. Any other failure, including a send
    /// blocked past the send timeout, closes the connection.
    pub async fn send_message(&self, msg: Message) -> Result<()> {
        if msg.content.len() > self.max_message_size {
            warn!(
                peer = %self.label,
                bytes = msg.content.len(),
                "Refusing to send oversized message"
            );
            return Err(ProtocolError::OversizedMessage(msg.content.len()));
        }
        if !self.is_connected_or_connecting() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let kind = msg.message_type;
        let frame_len = msg.frame_len();

        let mut guard = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ProtocolError::ConnectionClosed),
            guard = self.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return Err(ProtocolError::ConnectionClosed);
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            sent = with_timeout_error(writer.send(msg), self.send_timeout) => sent,
        };

        match result {
            Ok(()) => {
                global_metrics().message_sent(frame_len as u64);
                trace!(peer = %self.label, kind = kind.name(), bytes = frame_len, "Sent");
                Ok(())
            }
            Err(e) => {
                guard.take();
                drop(guard);
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Send a data message, logging rather than returning any failure.
    pub async fn send_data_message(&self, msg: DataMessage) {
        if let Err(e) = self.send_message(msg.into_message()).await {
            warn!(peer = %self.label, error = %e, "Failed to send data message");
        }
    }

    /// Wait for the next whole message.
    ///
    /// Returns [`ProtocolError::ConnectionClosed`] at end of stream or once
    /// the connection has been disconnected. A framing error is returned once
    /// and closes the connection.
    pub async fn recv(&self) -> Result<Message> {
        if !self.is_connected_or_connecting() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let mut guard = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ProtocolError::ConnectionClosed),
            guard = self.reader.lock() => guard,
        };
        let Some(reader) = guard.as_mut() else {
            return Err(ProtocolError::ConnectionClosed);
        };

        let next = tokio::select! {
            _ = self.cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            next = reader.next() => Ok(next),
        };

        match next {
            Ok(Some(Ok(msg))) => {
                global_metrics().message_received(msg.frame_len() as u64);
                trace!(
                    peer = %self.label,
                    kind = msg.message_type.name(),
                    bytes = msg.content.len(),
                    "Received"
                );
                Ok(msg)
            }
            Ok(Some(Err(e))) | Err(e) => {
                guard.take();
                drop(guard);
                self.fail(&e);
                Err(e)
            }
            Ok(None) => {
                guard.take();
                drop(guard);
                debug!(peer = %self.label, "Closed by remote");
                self.disconnect();
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// One non-blocking decode cycle.
    ///
    /// `None` when no whole message is buffered or the connection is down.
    pub fn receive_message(&self) -> Option<Message> {
        self.recv().now_or_never().and_then(Result::ok)
    }
}

impl<S> Connection<S> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_connected_or_connecting(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the socket. Safe to call repeatedly and from any task.
    pub fn disconnect(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        // A half held by an in-flight operation is released by that
        // operation once it observes the cancellation.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        global_metrics().connection_closed();
        debug!(peer = %self.label, "Disconnected");
    }

    fn fail(&self, e: &ProtocolError) {
        // Already torn down by `disconnect`; nothing left to report.
        if !self.is_connected_or_connecting() {
            return;
        }
        if e.is_protocol_violation() {
            global_metrics().protocol_error();
        } else {
            global_metrics().transport_error();
        }
        error!(peer = %self.label, error = %e, "Connection failed");
        self.disconnect();
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.cancel.cancel();
            global_metrics().connection_closed();
        }
    }
}
