//! The per-connection RPC runtime.
//!
//! An [`Endpoint`] is one side of a duplex link. It owns the three tables of
//! the shared-object protocol (held objects, remote proxies, pending
//! operations) behind one master lock, a writer task that serializes access
//! to the reliable channel, a reader task that is the channel's single
//! consumer, and the datagram path for fire-and-forget calls. The public
//! surface is the per-kind request primitives plus the observable properties
//! of the connection.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};

use mooring_core::{
    Envelope, JsonSerializer, MethodId, NetworkId, ObjectId, OperationId, PropertyId, RefOwner,
    Serializer, SharedHandle, SharedRef, SharedTypeBinder, Value,
};

use crate::error::{LinkError, LinkResult};
use crate::proxy::ProxyCore;
use crate::rpc::ReplyFuture;
use crate::scheduler::{TaskScheduler, TokioScheduler};

mod dispatch;
mod handshake;
mod link;
mod marshal;
mod tables;

use link::{Link, UdpChannel};
use tables::{HeldTable, PendingTable, ProxyTable};

/// Observer invoked on unexpected transport faults.
pub type NetworkErrorHook = Arc<dyn Fn(&LinkError) + Send + Sync>;

/// Observer invoked when the connection ends, expectedly or not.
pub type DisconnectedHook = Arc<dyn Fn() + Send + Sync>;

/// Everything behind an endpoint handle. Handles are cheap clones.
pub(crate) struct Shared {
    pub(crate) local_root: SharedHandle,
    pub(crate) binder: Arc<dyn SharedTypeBinder>,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) max_held: usize,
    pub(crate) max_remote: usize,
    scheduler: Mutex<Option<Arc<dyn TaskScheduler>>>,
    runtime: Mutex<Option<tokio::runtime::Handle>>,
    on_network_error: Option<NetworkErrorHook>,
    on_disconnected: Option<DisconnectedHook>,
    state: Mutex<State>,
}

/// Mutable connection state; the master lock.
pub(crate) struct State {
    connected: bool,
    connecting: bool,
    network_id: NetworkId,
    link: Option<Arc<Link>>,
    held: HeldTable,
    proxies: ProxyTable,
    pending: PendingTable,
    peer_root: Option<SharedHandle>,
}

/// Configures and produces an [`Endpoint`].
#[derive(Clone)]
pub struct EndpointBuilder {
    root: SharedHandle,
    binder: Arc<dyn SharedTypeBinder>,
    serializer: Arc<dyn Serializer>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    runtime: Option<tokio::runtime::Handle>,
    max_held: usize,
    max_remote: usize,
    on_network_error: Option<NetworkErrorHook>,
    on_disconnected: Option<DisconnectedHook>,
}

impl EndpointBuilder {
    fn new(root: SharedHandle, binder: Arc<dyn SharedTypeBinder>) -> Self {
        Self {
            root,
            binder,
            serializer: Arc::new(JsonSerializer),
            scheduler: None,
            runtime: None,
            max_held: usize::from(u16::MAX),
            max_remote: usize::from(u16::MAX),
            on_network_error: None,
            on_disconnected: None,
        }
    }

    /// Replace the default JSON serializer.
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Run inbound invocation bodies and hooks on this scheduler instead of
    /// the current tokio runtime.
    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Runtime handle used by the blocking connect form.
    pub fn runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Cap the held-object table. Exceeding it is fatal for the connection.
    pub fn max_held_objects(mut self, limit: usize) -> Self {
        self.max_held = limit;
        self
    }

    /// Cap the remote-proxy table. Exceeding it is fatal for the connection.
    pub fn max_remote_objects(mut self, limit: usize) -> Self {
        self.max_remote = limit;
        self
    }

    /// Observe unexpected transport faults. Runs at most once per
    /// connection, before the disconnected hook.
    pub fn on_network_error(
        mut self,
        hook: impl Fn(&LinkError) + Send + Sync + 'static,
    ) -> Self {
        self.on_network_error = Some(Arc::new(hook));
        self
    }

    /// Observe the end of the connection. Runs at most once per connection.
    pub fn on_disconnected(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(hook));
        self
    }

    /// Produce the endpoint, not yet connected.
    pub fn build(self) -> Endpoint {
        Endpoint {
            shared: Arc::new(Shared {
                local_root: self.root,
                binder: self.binder,
                serializer: self.serializer,
                max_held: self.max_held,
                max_remote: self.max_remote,
                scheduler: Mutex::new(self.scheduler),
                runtime: Mutex::new(self.runtime),
                on_network_error: self.on_network_error,
                on_disconnected: self.on_disconnected,
                state: Mutex::new(State {
                    connected: false,
                    connecting: false,
                    network_id: NetworkId::UNASSIGNED,
                    link: None,
                    held: HeldTable::new(),
                    proxies: ProxyTable::new(),
                    pending: PendingTable::new(),
                    peer_root: None,
                }),
            }),
        }
    }
}

/// One side of a connection: the engine exposing a local object graph and
/// proxying the peer's.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) shared: Arc<Shared>,
}

impl Endpoint {
    /// Start configuring an endpoint around its bootstrap root and binder.
    pub fn builder(root: SharedHandle, binder: Arc<dyn SharedTypeBinder>) -> EndpointBuilder {
        EndpointBuilder::new(root, binder)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().expect("endpoint state lock poisoned")
    }

    // ----------------------------------------------------------------------
    // Connection lifecycle
    // ----------------------------------------------------------------------

    /// Connect to a listener. `"localhost"` maps to `127.0.0.1`.
    ///
    /// # Errors
    ///
    /// [`LinkError::InUse`] if this endpoint is already connected or
    /// connecting; [`LinkError::Io`] on transport failure;
    /// [`LinkError::Protocol`] on handshake violations.
    pub async fn connect(&self, host: &str, port: u16) -> LinkResult<()> {
        {
            let mut state = self.lock_state();
            if state.connected || state.connecting {
                return Err(LinkError::InUse);
            }
            state.connecting = true;
        }
        let result = self.connect_inner(host, port).await;
        if result.is_err() {
            self.lock_state().connecting = false;
        }
        result
    }

    async fn connect_inner(&self, host: &str, port: u16) -> LinkResult<()> {
        let ip = handshake::resolve_host(host)?;
        let mut stream = TcpStream::connect((ip, port)).await?;
        stream.set_nodelay(true)?;

        let bind_addr: SocketAddr = if ip.is_ipv6() {
            (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into()
        } else {
            (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into()
        };
        let udp = Arc::new(UdpSocket::bind(bind_addr).await?);
        let udp_port = udp.local_addr()?.port();

        self.capture_runtime();
        let outcome = handshake::connecting(
            &mut stream,
            self.shared.local_root.type_name(),
            udp_port,
        )
        .await?;

        let peer_ip = stream.peer_addr()?.ip();
        let peer_udp =
            handshake::peer_datagram_addr(udp.local_addr()?.is_ipv6(), peer_ip, outcome.peer_udp_port);
        let channel = UdpChannel::new(udp.clone(), peer_udp, Some(outcome.network_id));
        self.bootstrap_link(stream, outcome, Some(udp), channel)
    }

    /// Blocking convenience over [`Endpoint::connect`].
    ///
    /// Requires a runtime handle from
    /// [`EndpointBuilder::runtime`]; must not be called from inside an async
    /// task.
    ///
    /// # Errors
    ///
    /// As [`Endpoint::connect`], plus [`LinkError::Protocol`] when no runtime
    /// handle is configured.
    pub fn connect_blocking(&self, host: &str, port: u16) -> LinkResult<()> {
        let handle = self
            .shared
            .runtime
            .lock()
            .expect("runtime slot poisoned")
            .clone()
            .ok_or_else(|| {
                LinkError::protocol("blocking connect requires a configured runtime handle")
            })?;
        handle.block_on(self.connect(host, port))
    }

    /// Wire an accepted connection into this endpoint (listener side).
    pub(crate) async fn attach_accepted(
        &self,
        mut stream: TcpStream,
        network_id: NetworkId,
        udp: Arc<UdpSocket>,
        udp_port: u16,
    ) -> LinkResult<()> {
        {
            let mut state = self.lock_state();
            if state.connected || state.connecting {
                return Err(LinkError::InUse);
            }
            state.connecting = true;
        }
        self.capture_runtime();
        let result = async {
            let outcome = handshake::accepted(
                &mut stream,
                network_id,
                self.shared.local_root.type_name(),
                udp_port,
            )
            .await?;
            let peer_ip = stream.peer_addr()?.ip();
            let peer_udp = handshake::peer_datagram_addr(
                udp.local_addr()?.is_ipv6(),
                peer_ip,
                outcome.peer_udp_port,
            );
            let channel = UdpChannel::new(udp, peer_udp, None);
            self.bootstrap_link(stream, outcome, None, channel)
        }
        .await;
        if result.is_err() {
            self.lock_state().connecting = false;
        }
        result
    }

    /// Install the link, spawn its tasks, and build the peer-root proxy.
    ///
    /// Must run inside a tokio runtime. The root is installed before the
    /// reader task starts so the peer's first request finds it.
    fn bootstrap_link(
        &self,
        stream: TcpStream,
        outcome: handshake::HandshakeOutcome,
        datagram_socket: Option<Arc<UdpSocket>>,
        channel: UdpChannel,
    ) -> LinkResult<()> {
        self.ensure_scheduler();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (read_half, write_half) = stream.into_split();
        let link = Arc::new(Link::new(outbound_tx, channel));

        {
            let mut state = self.lock_state();
            state.connecting = false;
            state.connected = true;
            state.network_id = outcome.network_id;
            state.link = Some(link.clone());
            state.held.install_root(self.shared.local_root.clone());
        }

        let weak = Arc::downgrade(&self.shared);
        let handle = tokio::runtime::Handle::current();
        link.add_task(handle.spawn(link::run_writer(outbound_rx, write_half, weak.clone())));
        link.add_task(handle.spawn(link::run_reader(read_half, weak.clone())));
        if let Some(socket) = datagram_socket {
            link.add_task(handle.spawn(link::run_datagram_reader(socket, weak)));
        }

        let root_ref = SharedRef {
            id: ObjectId::ROOT,
            type_name: outcome.peer_root_type,
            owner: RefOwner::Sender,
        };
        match self.resolve_or_build_proxy(&root_ref) {
            Ok(proxy) => {
                self.lock_state().peer_root = Some(proxy);
                tracing::debug!(id = %outcome.network_id, "endpoint connected");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "failed to build peer root proxy");
                self.teardown(None);
                Err(err)
            }
        }
    }

    /// Idempotent teardown: close transports, fail pending operations, sever
    /// proxies, empty the tables, fire observers at most once.
    pub fn disconnect(&self) {
        self.teardown(None);
    }

    pub(crate) fn teardown(&self, reason: Option<LinkError>) {
        let (was_connected, link, pending, proxies, peer_root) = {
            let mut state = self.lock_state();
            let was_connected = state.connected;
            state.connected = false;
            state.connecting = false;
            let link = state.link.take();
            let pending = state.pending.drain();
            let proxies = state.proxies.drain();
            state.held.clear();
            let peer_root = state.peer_root.take();
            (was_connected, link, pending, proxies, peer_root)
        };

        if let Some(link) = &link {
            link.abort();
        }
        for weak_core in &proxies {
            if let Some(core) = weak_core.upgrade() {
                core.sever();
            }
        }
        // Severed above; dropping it sends nothing.
        drop(peer_root);
        for tx in pending {
            let _ = tx.send(Err(LinkError::disconnected_mid_operation()));
        }

        if was_connected {
            tracing::debug!(unexpected = reason.is_some(), "endpoint disconnected");
            let on_network_error = self.shared.on_network_error.clone();
            let on_disconnected = self.shared.on_disconnected.clone();
            let fire = move || {
                if let (Some(hook), Some(reason)) = (&on_network_error, &reason) {
                    hook(reason);
                }
                if let Some(hook) = &on_disconnected {
                    hook();
                }
            };
            match self.configured_scheduler() {
                Some(scheduler) => scheduler.spawn(Box::pin(async move { fire() })),
                None => fire(),
            }
        }
    }

    // ----------------------------------------------------------------------
    // Request primitives
    // ----------------------------------------------------------------------

    /// Invoke a method on a peer-owned object.
    ///
    /// Await the returned future, or use [`ReplyFuture::wait`] as the
    /// blocking form.
    pub fn call_method(
        &self,
        target: ObjectId,
        method: MethodId,
        generics: Vec<String>,
        args: Vec<Value>,
    ) -> ReplyFuture {
        let args = match self.marshal_args(args) {
            Ok(args) => args,
            Err(err) => return ReplyFuture::failed(err),
        };
        self.submit(move |op| Envelope::CallMethod {
            target,
            method,
            generics,
            args,
            op,
        })
    }

    /// Invoke a fire-and-forget method on a peer-owned object.
    ///
    /// No operation is allocated and no reply is expected; datagram send
    /// failures are silently dropped.
    ///
    /// # Errors
    ///
    /// [`LinkError::Disconnected`] when not connected, and marshalling or
    /// encoding failures — those are local.
    pub fn call_method_unreliable(
        &self,
        target: ObjectId,
        method: MethodId,
        generics: Vec<String>,
        args: Vec<Value>,
    ) -> LinkResult<()> {
        let args = self.marshal_args(args)?;
        let link = {
            let state = self.lock_state();
            if !state.connected {
                return Err(LinkError::Disconnected);
            }
            state.link.clone()
        };
        let Some(link) = link else {
            return Err(LinkError::Disconnected);
        };
        let envelope = Envelope::CallMethodUnreliable {
            target,
            method,
            generics,
            args,
        };
        let bytes = self.shared.serializer.encode(&envelope)?;
        link.send_datagram(&bytes);
        Ok(())
    }

    /// Read a property of a peer-owned object.
    pub fn get_property(&self, target: ObjectId, property: PropertyId) -> ReplyFuture {
        self.submit(move |op| Envelope::GetProperty {
            target,
            property,
            op,
        })
    }

    /// Write a property of a peer-owned object.
    ///
    /// The reply confirms the write or carries the peer-side fault.
    pub fn set_property(&self, target: ObjectId, property: PropertyId, value: Value) -> ReplyFuture {
        let value = match self.marshal_value(value) {
            Ok(value) => value,
            Err(err) => return ReplyFuture::failed(err),
        };
        self.submit(move |op| Envelope::SetProperty {
            target,
            property,
            value,
            op,
        })
    }

    /// Read an indexer of a peer-owned object.
    pub fn get_indexer(
        &self,
        target: ObjectId,
        property: PropertyId,
        index: Vec<Value>,
    ) -> ReplyFuture {
        let index = match self.marshal_args(index) {
            Ok(index) => index,
            Err(err) => return ReplyFuture::failed(err),
        };
        self.submit(move |op| Envelope::GetIndexer {
            target,
            property,
            index,
            op,
        })
    }

    /// Write an indexer of a peer-owned object.
    pub fn set_indexer(
        &self,
        target: ObjectId,
        property: PropertyId,
        value: Value,
        index: Vec<Value>,
    ) -> ReplyFuture {
        let marshaled = self
            .marshal_value(value)
            .and_then(|value| Ok((value, self.marshal_args(index)?)));
        let (value, index) = match marshaled {
            Ok(parts) => parts,
            Err(err) => return ReplyFuture::failed(err),
        };
        self.submit(move |op| Envelope::SetIndexer {
            target,
            property,
            value,
            index,
            op,
        })
    }

    /// Allocate a pending operation, encode, and enqueue on the reliable
    /// channel. Shared shape of every reply-carrying primitive.
    fn submit<F>(&self, build: F) -> ReplyFuture
    where
        F: FnOnce(OperationId) -> Envelope,
    {
        let (tx, rx) = oneshot::channel();
        let reply = ReplyFuture::new(rx);

        let (op, link) = {
            let mut state = self.lock_state();
            if !state.connected {
                drop(state);
                let _ = tx.send(Err(LinkError::Disconnected));
                return reply;
            }
            let Some(link) = state.link.clone() else {
                drop(state);
                let _ = tx.send(Err(LinkError::Disconnected));
                return reply;
            };
            match state.pending.insert(tx) {
                Ok(op) => (op, link),
                Err(tx) => {
                    drop(state);
                    let _ = tx.send(Err(LinkError::protocol("operation id space exhausted")));
                    return reply;
                }
            }
        };

        let envelope = build(op);
        match self.shared.serializer.encode(&envelope) {
            Ok(bytes) => {
                if !link.send(bytes) {
                    self.fail_pending(op, LinkError::Disconnected);
                }
            }
            Err(err) => self.fail_pending(op, LinkError::Codec(err)),
        }
        reply
    }

    fn fail_pending(&self, op: OperationId, err: LinkError) {
        if let Some(tx) = self.lock_state().pending.remove(op) {
            let _ = tx.send(Err(err));
        }
    }

    // ----------------------------------------------------------------------
    // Observable properties
    // ----------------------------------------------------------------------

    /// The peer's bootstrap root proxy, once connected.
    pub fn server(&self) -> Option<SharedHandle> {
        self.lock_state().peer_root.clone()
    }

    /// Accepted-side alias for [`Endpoint::server`]: the connecting peer's
    /// root proxy.
    pub fn remote_client(&self) -> Option<SharedHandle> {
        self.server()
    }

    /// The session id shared by both ends of this connection.
    pub fn network_id(&self) -> NetworkId {
        self.lock_state().network_id
    }

    /// Whether the endpoint is currently connected.
    pub fn connected(&self) -> bool {
        self.lock_state().connected
    }

    /// The local bootstrap root.
    pub fn local(&self) -> SharedHandle {
        self.shared.local_root.clone()
    }

    /// The payload serializer in use.
    pub fn serializer(&self) -> Arc<dyn Serializer> {
        self.shared.serializer.clone()
    }

    /// The proxy binder in use.
    pub fn binder(&self) -> Arc<dyn SharedTypeBinder> {
        self.shared.binder.clone()
    }

    /// The scheduler for user-visible work, once one is configured or
    /// defaulted at connect time.
    pub fn scheduler(&self) -> Option<Arc<dyn TaskScheduler>> {
        self.configured_scheduler()
    }

    /// Cap on the held-object table.
    pub fn max_held_objects(&self) -> usize {
        self.shared.max_held
    }

    /// Cap on the remote-proxy table.
    pub fn max_remote_objects(&self) -> usize {
        self.shared.max_remote
    }

    /// How many local objects the peer currently holds references to.
    pub fn held_object_count(&self) -> usize {
        self.lock_state().held.len()
    }

    /// How many peer-owned ids have proxy entries here.
    pub fn remote_proxy_count(&self) -> usize {
        self.lock_state().proxies.len()
    }

    /// How many operations are awaiting replies.
    pub fn pending_operation_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    // ----------------------------------------------------------------------
    // Internal plumbing
    // ----------------------------------------------------------------------

    fn capture_runtime(&self) {
        let mut slot = self.shared.runtime.lock().expect("runtime slot poisoned");
        if slot.is_none() {
            *slot = Some(tokio::runtime::Handle::current());
        }
    }

    fn configured_scheduler(&self) -> Option<Arc<dyn TaskScheduler>> {
        self.shared
            .scheduler
            .lock()
            .expect("scheduler slot poisoned")
            .clone()
    }

    /// The scheduler, defaulting to the current runtime on first use.
    fn ensure_scheduler(&self) -> Arc<dyn TaskScheduler> {
        let mut slot = self.shared.scheduler.lock().expect("scheduler slot poisoned");
        match &*slot {
            Some(scheduler) => scheduler.clone(),
            None => {
                let scheduler: Arc<dyn TaskScheduler> = Arc::new(TokioScheduler::current());
                *slot = Some(scheduler.clone());
                scheduler
            }
        }
    }

    /// Run user-visible work off the reader task.
    pub(crate) fn spawn_user(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.ensure_scheduler().spawn(Box::pin(task));
    }

    /// A proxy's last strong reference is gone: drop its table entry (unless
    /// a successor took the id) and credit the owner.
    pub(crate) fn proxy_dropped(&self, id: ObjectId, count: u32, identity: &Weak<ProxyCore>) {
        let link = {
            let mut state = self.lock_state();
            state.proxies.remove_if(id, identity);
            if !state.connected {
                return;
            }
            state.link.clone()
        };
        let Some(link) = link else {
            return;
        };
        if count == 0 {
            return;
        }
        let envelope = Envelope::Release { count, target: id };
        match self.shared.serializer.encode(&envelope) {
            Ok(bytes) => {
                if link.send(bytes) {
                    tracing::debug!(%id, count, "released remote reference");
                }
            }
            Err(err) => tracing::warn!(%err, %id, "failed to encode release"),
        }
    }
}
