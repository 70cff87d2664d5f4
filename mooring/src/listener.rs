//! Server bootstrap: accept connections and demultiplex datagrams.
//!
//! One listener owns a TCP acceptor and one shared datagram socket. Each
//! accepted connection gets an [`Endpoint`] built from a template builder, a
//! fresh session [`NetworkId`] from a recycling allocator, and the
//! accepted-side handshake. Client-originated datagrams arrive on the shared
//! socket prefixed with their session id; the demultiplexer strips the
//! prefix and routes the payload to the owning endpoint. Server-originated
//! datagrams go out through the same socket, unprefixed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

use mooring_core::{IdAllocator, NetworkId};

use crate::endpoint::{Endpoint, EndpointBuilder, Shared};
use crate::error::{LinkError, LinkResult};
use crate::wire;

struct Sessions {
    ids: IdAllocator,
    by_id: HashMap<u16, Weak<Shared>>,
}

impl Sessions {
    fn allocate(&mut self) -> Option<NetworkId> {
        let Sessions { ids, by_id } = self;
        // Reclaim ids whose endpoints are gone before minting fresh ones.
        by_id.retain(|id, shared| {
            if shared.upgrade().is_some() {
                true
            } else {
                ids.release(*id);
                false
            }
        });
        ids.allocate().map(NetworkId)
    }
}

struct ListenerInner {
    tcp: TcpListener,
    udp: Arc<UdpSocket>,
    udp_port: u16,
    template: EndpointBuilder,
    sessions: Mutex<Sessions>,
}

/// Accepts connections and hands out connected [`Endpoint`]s.
pub struct Listener {
    inner: Arc<ListenerInner>,
    demux: JoinHandle<()>,
}

impl Listener {
    /// Bind the TCP acceptor and the shared datagram socket.
    ///
    /// `template` supplies the root, binder, serializer, caps, and hooks for
    /// every accepted endpoint.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] if either socket cannot be bound.
    pub async fn bind(addr: SocketAddr, template: EndpointBuilder) -> LinkResult<Listener> {
        let tcp = TcpListener::bind(addr).await?;
        let local = tcp.local_addr()?;
        let udp = Arc::new(UdpSocket::bind(SocketAddr::new(local.ip(), 0)).await?);
        let udp_port = udp.local_addr()?.port();

        let inner = Arc::new(ListenerInner {
            tcp,
            udp: udp.clone(),
            udp_port,
            template,
            sessions: Mutex::new(Sessions {
                // Session id 0 means "unassigned" and is never handed out.
                ids: IdAllocator::new(1),
                by_id: HashMap::new(),
            }),
        });
        let demux = tokio::spawn(run_demux(udp, Arc::downgrade(&inner)));
        tracing::debug!(%local, udp_port, "listener bound");
        Ok(Listener { inner, demux })
    }

    /// The TCP address the listener is bound to.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] if the socket cannot report its address.
    pub fn local_addr(&self) -> LinkResult<SocketAddr> {
        Ok(self.inner.tcp.local_addr()?)
    }

    /// The port of the shared datagram socket.
    pub fn udp_port(&self) -> u16 {
        self.inner.udp_port
    }

    /// Accept one connection, run the accepted-side handshake, and return
    /// the connected endpoint.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] on accept failure, [`LinkError::Protocol`] when the
    /// session id space is exhausted or the handshake is violated.
    pub async fn accept(&self) -> LinkResult<Endpoint> {
        let (stream, peer) = self.inner.tcp.accept().await?;
        stream.set_nodelay(true)?;

        let network_id = self
            .inner
            .sessions
            .lock()
            .expect("session table poisoned")
            .allocate()
            .ok_or_else(|| LinkError::protocol("session id space exhausted"))?;

        let endpoint = self.inner.template.clone().build();
        match endpoint
            .attach_accepted(
                stream,
                network_id,
                self.inner.udp.clone(),
                self.inner.udp_port,
            )
            .await
        {
            Ok(()) => {
                let mut sessions = self.inner.sessions.lock().expect("session table poisoned");
                sessions
                    .by_id
                    .insert(network_id.0, Arc::downgrade(&endpoint.shared));
                tracing::debug!(%peer, id = %network_id, "accepted connection");
                Ok(endpoint)
            }
            Err(err) => {
                tracing::debug!(%peer, %err, "handshake failed");
                self.inner
                    .sessions
                    .lock()
                    .expect("session table poisoned")
                    .ids
                    .release(network_id.0);
                Err(err)
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.demux.abort();
    }
}

/// Single consumer of the shared datagram socket.
async fn run_demux(udp: Arc<UdpSocket>, inner: Weak<ListenerInner>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (n, from) = match udp.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                tracing::debug!(%err, "listener datagram receive failed");
                if inner.upgrade().is_none() {
                    return;
                }
                continue;
            }
        };
        let Some((id, payload)) = wire::split_datagram(&buf[..n]) else {
            tracing::debug!(%from, "dropping runt datagram");
            continue;
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let shared = {
            let sessions = inner.sessions.lock().expect("session table poisoned");
            sessions.by_id.get(&id.0).and_then(Weak::upgrade)
        };
        match shared {
            Some(shared) => Endpoint::from_shared(shared).handle_datagram(payload),
            None => tracing::debug!(%from, %id, "datagram for unknown session"),
        }
    }
}
