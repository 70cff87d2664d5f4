//! Receiver-side handles for peer-owned objects.
//!
//! Every proxy object wraps a [`RemoteRef`]. The ref's shared core tracks the
//! inbound-occurrence count and the link back to the owning [`Endpoint`];
//! when the last proxy clone drops, the core's `Drop` impl credits the
//! accumulated count back to the owner as one batched `Release`. Disconnection
//! severs the core instead: a severed ref fails every member access with
//! [`LinkError::Disconnected`] and its eventual drop is silent.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use mooring_core::{MethodId, ObjectId, PropertyId, RemoteHandle, Value};

use crate::endpoint::Endpoint;
use crate::error::{LinkError, LinkResult};
use crate::rpc::ReplyFuture;

/// Shared lifetime state behind every clone of one proxy's [`RemoteRef`].
pub(crate) struct ProxyCore {
    id: ObjectId,
    type_name: String,
    /// How many inbound occurrences of this id produced or reused this proxy.
    inbound: AtomicU32,
    /// Severed (set to `None`) on disconnect.
    endpoint: Mutex<Option<Endpoint>>,
    /// Identity of this core, for the table to tell a dropped core apart
    /// from a rebuilt successor under the same id.
    self_weak: Weak<ProxyCore>,
}

impl ProxyCore {
    /// A fresh core for the first inbound occurrence of `id`.
    pub(crate) fn new(id: ObjectId, type_name: String, endpoint: Endpoint) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            type_name,
            inbound: AtomicU32::new(1),
            endpoint: Mutex::new(Some(endpoint)),
            self_weak: weak.clone(),
        })
    }

    /// Record one more inbound occurrence resolving to this proxy.
    pub(crate) fn bump_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::SeqCst);
    }

    /// Cut the link to the endpoint; later member access fails
    /// deterministically and the eventual drop sends nothing.
    pub(crate) fn sever(&self) {
        self.endpoint.lock().expect("proxy endpoint lock poisoned").take();
    }

    fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
            .lock()
            .expect("proxy endpoint lock poisoned")
            .clone()
    }
}

impl Drop for ProxyCore {
    fn drop(&mut self) {
        // Exclusive access: no lock needed, and no lock-order entanglement
        // with a concurrent sever (a severed core has nothing to do here).
        let endpoint = match self.endpoint.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(endpoint) = endpoint {
            let count = *self.inbound.get_mut();
            endpoint.proxy_dropped(self.id, count, &self.self_weak);
        }
    }
}

/// The handle a proxy object holds onto its remote counterpart.
///
/// Clones share one lifetime core; per-kind accessors forward to the owning
/// endpoint's request primitives with this handle's target id. All accessors
/// return a [`ReplyFuture`]; use [`ReplyFuture::wait`] for the blocking form.
#[derive(Clone)]
pub struct RemoteRef {
    core: Arc<ProxyCore>,
}

impl RemoteRef {
    pub(crate) fn from_core(core: Arc<ProxyCore>) -> Self {
        Self { core }
    }

    /// Recover the engine handle from a proxy object, if `obj` is one.
    pub fn from_object(obj: &Arc<dyn mooring_core::SharedObject>) -> Option<RemoteRef> {
        obj.remote_handle()?
            .as_any()
            .downcast_ref::<RemoteRef>()
            .cloned()
    }

    /// Slot of the referenced object in the owner's held table.
    pub fn object_id(&self) -> ObjectId {
        self.core.id
    }

    /// Declared shared-interface type of the referenced object.
    pub fn type_name(&self) -> &str {
        &self.core.type_name
    }

    /// The owning endpoint, unless this ref was severed by a disconnect.
    pub fn endpoint(&self) -> LinkResult<Endpoint> {
        self.core.endpoint().ok_or(LinkError::Disconnected)
    }

    /// Invoke a method on the remote object.
    pub fn call_method(
        &self,
        method: MethodId,
        generics: Vec<String>,
        args: Vec<Value>,
    ) -> ReplyFuture {
        match self.endpoint() {
            Ok(ep) => ep.call_method(self.core.id, method, generics, args),
            Err(e) => ReplyFuture::failed(e),
        }
    }

    /// Invoke a fire-and-forget method on the remote object.
    ///
    /// # Errors
    ///
    /// [`LinkError::Disconnected`] if the ref is severed or the endpoint is
    /// down; datagram send failures are silently dropped.
    pub fn call_method_unreliable(
        &self,
        method: MethodId,
        generics: Vec<String>,
        args: Vec<Value>,
    ) -> LinkResult<()> {
        self.endpoint()?
            .call_method_unreliable(self.core.id, method, generics, args)
    }

    /// Read a property of the remote object.
    pub fn get_property(&self, property: PropertyId) -> ReplyFuture {
        match self.endpoint() {
            Ok(ep) => ep.get_property(self.core.id, property),
            Err(e) => ReplyFuture::failed(e),
        }
    }

    /// Write a property of the remote object; the reply confirms or carries
    /// the peer-side fault.
    pub fn set_property(&self, property: PropertyId, value: Value) -> ReplyFuture {
        match self.endpoint() {
            Ok(ep) => ep.set_property(self.core.id, property, value),
            Err(e) => ReplyFuture::failed(e),
        }
    }

    /// Read an indexer of the remote object.
    pub fn get_indexer(&self, property: PropertyId, index: Vec<Value>) -> ReplyFuture {
        match self.endpoint() {
            Ok(ep) => ep.get_indexer(self.core.id, property, index),
            Err(e) => ReplyFuture::failed(e),
        }
    }

    /// Write an indexer of the remote object.
    pub fn set_indexer(&self, property: PropertyId, value: Value, index: Vec<Value>) -> ReplyFuture {
        match self.endpoint() {
            Ok(ep) => ep.set_indexer(self.core.id, property, value, index),
            Err(e) => ReplyFuture::failed(e),
        }
    }
}

impl RemoteHandle for RemoteRef {
    fn object_id(&self) -> ObjectId {
        self.core.id
    }

    fn shared_type(&self) -> &str {
        &self.core.type_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
