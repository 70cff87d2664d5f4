//! Per-connection transport bundle and its background tasks.
//!
//! One writer task owns the TCP write half and drains a FIFO of pre-encoded
//! payloads, so enqueue order is transmit order and serialization never
//! happens under the write path. One reader task owns the read half and is
//! the single consumer of the inbound message stream. Client endpoints run a
//! third task reading the datagram socket; accepted endpoints receive their
//! datagrams from the listener's demultiplexer instead.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mooring_core::NetworkId;

use crate::endpoint::{Endpoint, Shared};
use crate::error::{is_expected_close, LinkError};
use crate::wire;

/// Datagram send side of a connection.
pub(crate) struct UdpChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    /// `Some` on client endpoints: the session id prefixed onto every
    /// outgoing datagram so the listener can route it. Accepted endpoints
    /// send bare payloads; the client has exactly one peer.
    prefix: Option<NetworkId>,
}

impl UdpChannel {
    pub(crate) fn new(socket: Arc<UdpSocket>, peer: SocketAddr, prefix: Option<NetworkId>) -> Self {
        Self {
            socket,
            peer,
            prefix,
        }
    }

    /// Fire one datagram. Callers opted out of feedback: failures are
    /// logged at debug level and dropped.
    pub(crate) fn send(&self, payload: &[u8]) {
        let buf;
        let bytes: &[u8] = match self.prefix {
            Some(id) => {
                buf = wire::prefix_datagram(id, payload);
                &buf
            }
            None => payload,
        };
        if let Err(err) = self.socket.try_send_to(bytes, self.peer) {
            tracing::debug!(peer = %self.peer, %err, "dropping unreliable datagram");
        }
    }
}

/// The live transports of one connection.
pub(crate) struct Link {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    udp: UdpChannel,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Link {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Vec<u8>>, udp: UdpChannel) -> Self {
        Self {
            outbound,
            udp,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a reliable payload. Returns `false` if the writer is gone.
    pub(crate) fn send(&self, payload: Vec<u8>) -> bool {
        self.outbound.send(payload).is_ok()
    }

    /// Fire an unreliable payload.
    pub(crate) fn send_datagram(&self, payload: &[u8]) {
        self.udp.send(payload);
    }

    pub(crate) fn add_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().expect("link task list poisoned").push(task);
    }

    /// Abort every background task. Dropping the halves they own closes the
    /// transports; close errors are nobody's business at teardown.
    pub(crate) fn abort(&self) {
        for task in self.tasks.lock().expect("link task list poisoned").drain(..) {
            task.abort();
        }
    }
}

/// Writer task: single consumer of the outbound FIFO.
pub(crate) async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut writer: OwnedWriteHalf,
    shared: Weak<Shared>,
) {
    while let Some(payload) = rx.recv().await {
        if let Err(err) = wire::write_frame(&mut writer, &payload).await {
            tracing::debug!(%err, "reliable write failed");
            if let Some(shared) = shared.upgrade() {
                let reason = match err {
                    wire::FrameError::Io(io_err) if is_expected_close(&io_err) => None,
                    wire::FrameError::Io(io_err) => Some(LinkError::Io(io_err)),
                    wire::FrameError::TooLarge { len } => Some(LinkError::protocol(format!(
                        "outbound frame of {len} bytes exceeds the frame cap"
                    ))),
                };
                Endpoint::from_shared(shared).teardown(reason);
            }
            return;
        }
    }
    // Sender side dropped during teardown; closing the half sends FIN.
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut writer).await;
}

/// Reader task: single consumer of the inbound reliable stream.
///
/// Decodes each frame and routes it; user code never runs here, handlers
/// hand invocation bodies to the endpoint's scheduler.
pub(crate) async fn run_reader(mut reader: OwnedReadHalf, shared: Weak<Shared>) {
    loop {
        match wire::read_frame(&mut reader).await {
            Ok(payload) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let endpoint = Endpoint::from_shared(shared);
                match endpoint.serializer().decode(&payload) {
                    Ok(envelope) => endpoint.dispatch(envelope),
                    Err(err) => {
                        tracing::warn!(%err, "undecodable frame, tearing down");
                        endpoint.teardown(Some(LinkError::Codec(err)));
                        return;
                    }
                }
            }
            Err(err) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let reason = match err {
                    wire::FrameError::Io(io_err) if is_expected_close(&io_err) => {
                        tracing::debug!("reliable channel closed by peer");
                        None
                    }
                    wire::FrameError::Io(io_err) => Some(LinkError::Io(io_err)),
                    wire::FrameError::TooLarge { len } => {
                        Some(LinkError::protocol(format!("inbound frame of {len} bytes exceeds the frame cap")))
                    }
                };
                Endpoint::from_shared(shared).teardown(reason);
                return;
            }
        }
    }
}

/// Datagram task for client endpoints: single consumer of the socket.
pub(crate) async fn run_datagram_reader(socket: Arc<UdpSocket>, shared: Weak<Shared>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, _from)) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                Endpoint::from_shared(shared).handle_datagram(&buf[..n]);
            }
            Err(err) => {
                tracing::debug!(%err, "datagram receive failed");
                if shared.upgrade().is_none() {
                    return;
                }
            }
        }
    }
}
