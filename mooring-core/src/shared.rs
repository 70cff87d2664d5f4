//! Shareable objects, member descriptors, and the proxy-binder seam.
//!
//! A *shareable* object crosses the wire as a reference rather than by value.
//! On its owning side it is any [`SharedObject`]; on the receiving side the
//! binder wraps a [`RemoteHandle`] into a concrete proxy type that also
//! implements [`SharedObject`] and answers [`SharedObject::remote_handle`]
//! with `Some`, which is how the marshaller tells proxies and local objects
//! apart.
//!
//! The engine never knows concrete shared types. It asks the binder for a
//! type's [`LocalTypeData`] and drives the boxed invokers in it; how those
//! descriptors come to exist (hand-written, generated, reflected) is the
//! binder's business.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::fault::RemoteFault;
use crate::ids::{MethodId, ObjectId, PropertyId};
use crate::value::Value;

/// A boxed future, the return shape of every descriptor invoker.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A live shareable instance.
pub type SharedHandle = Arc<dyn SharedObject>;

/// Implemented by every instance that may cross the wire as a reference.
pub trait SharedObject: Send + Sync + 'static {
    /// The serializer-stable name of the declared shared interface.
    fn type_name(&self) -> &str;

    /// Self as `Any`, so descriptor invokers can downcast to the concrete
    /// type.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// The remote handle, if this instance is a proxy for a peer-owned
    /// object. Local objects return `None` (the default).
    fn remote_handle(&self) -> Option<&dyn RemoteHandle> {
        None
    }
}

/// What a proxy holds onto its remote counterpart.
///
/// The engine's concrete handle type implements this; the indirection keeps
/// proxy construction expressible here without depending on the engine crate.
pub trait RemoteHandle: Send + Sync + 'static {
    /// Slot in the owner's held-object table.
    fn object_id(&self) -> ObjectId;

    /// Declared shared-interface type of the referenced object.
    fn shared_type(&self) -> &str;

    /// Self as `Any`, so binder factories can recover the concrete handle.
    fn as_any(&self) -> &dyn Any;
}

/// Outcome of a descriptor invocation.
pub type InvokeResult = Result<Value, RemoteFault>;

/// Boxed invoker for one method: `(target, args, generics) -> future`.
pub type MethodInvoker =
    Box<dyn Fn(SharedHandle, Vec<Value>, Vec<String>) -> BoxFuture<InvokeResult> + Send + Sync>;

/// Boxed reader for one property or indexer: `(target, index_args) -> future`.
pub type PropertyGetter =
    Box<dyn Fn(SharedHandle, Vec<Value>) -> BoxFuture<InvokeResult> + Send + Sync>;

/// Boxed writer for one property or indexer:
/// `(target, value, index_args) -> future`.
pub type PropertySetter = Box<
    dyn Fn(SharedHandle, Value, Vec<Value>) -> BoxFuture<Result<(), RemoteFault>> + Send + Sync,
>;

/// One method of a shared type.
pub struct MethodDescriptor {
    /// Declared fire-and-forget: calls travel on the unreliable channel and
    /// produce no reply.
    pub unreliable: bool,
    /// The invocation body.
    pub invoke: MethodInvoker,
}

impl MethodDescriptor {
    /// A reliable method with the given invoker.
    pub fn reliable(invoke: MethodInvoker) -> Self {
        Self {
            unreliable: false,
            invoke,
        }
    }

    /// A fire-and-forget method with the given invoker.
    pub fn unreliable(invoke: MethodInvoker) -> Self {
        Self {
            unreliable: true,
            invoke,
        }
    }
}

/// One property (or indexer) of a shared type. Either accessor may be absent.
#[derive(Default)]
pub struct PropertyDescriptor {
    /// Reader, if the member is readable.
    pub get: Option<PropertyGetter>,
    /// Writer, if the member is writable.
    pub set: Option<PropertySetter>,
}

impl PropertyDescriptor {
    /// A read-only member.
    pub fn readable(get: PropertyGetter) -> Self {
        Self {
            get: Some(get),
            set: None,
        }
    }

    /// A read-write member.
    pub fn read_write(get: PropertyGetter, set: PropertySetter) -> Self {
        Self {
            get: Some(get),
            set: Some(set),
        }
    }
}

/// The resolved invocation surface of one shared type.
pub struct LocalTypeData {
    /// The serializer-stable type name these descriptors belong to.
    pub type_name: String,
    /// Methods by selector.
    pub methods: HashMap<MethodId, MethodDescriptor>,
    /// Properties and indexers by selector.
    pub properties: HashMap<PropertyId, PropertyDescriptor>,
}

impl LocalTypeData {
    /// An empty descriptor set for `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            methods: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Add a method descriptor.
    pub fn with_method(mut self, id: MethodId, descriptor: MethodDescriptor) -> Self {
        self.methods.insert(id, descriptor);
        self
    }

    /// Add a property descriptor.
    pub fn with_property(mut self, id: PropertyId, descriptor: PropertyDescriptor) -> Self {
        self.properties.insert(id, descriptor);
        self
    }
}

/// Builds a concrete proxy around a remote handle.
pub type ProxyFactory = Box<dyn Fn(Arc<dyn RemoteHandle>) -> SharedHandle + Send + Sync>;

/// The proxy-binder collaborator consumed by the engine.
///
/// Maps a shared-interface name to a proxy constructor (receiving side) and
/// to its invocation descriptors (owning side).
pub trait SharedTypeBinder: Send + Sync + 'static {
    /// Wrap `handle` in the concrete proxy type for `type_name`, or `None`
    /// if the type is unknown here.
    fn make_proxy(&self, type_name: &str, handle: Arc<dyn RemoteHandle>) -> Option<SharedHandle>;

    /// The invocation surface of `type_name`, or `None` if unknown.
    fn local_data(&self, type_name: &str) -> Option<Arc<LocalTypeData>>;
}

/// A plain table-driven binder.
///
/// Populate it during startup, then share it immutably behind an `Arc`.
#[derive(Default)]
pub struct TypeRegistry {
    factories: HashMap<String, ProxyFactory>,
    locals: HashMap<String, Arc<LocalTypeData>>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the proxy constructor for a shared type.
    pub fn register_proxy(&mut self, type_name: impl Into<String>, factory: ProxyFactory) {
        self.factories.insert(type_name.into(), factory);
    }

    /// Register the invocation descriptors for a shared type.
    pub fn register_local(&mut self, data: LocalTypeData) {
        self.locals.insert(data.type_name.clone(), Arc::new(data));
    }
}

impl SharedTypeBinder for TypeRegistry {
    fn make_proxy(&self, type_name: &str, handle: Arc<dyn RemoteHandle>) -> Option<SharedHandle> {
        self.factories.get(type_name).map(|f| f(handle))
    }

    fn local_data(&self, type_name: &str) -> Option<Arc<LocalTypeData>> {
        self.locals.get(type_name).cloned()
    }
}
