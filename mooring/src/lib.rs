//! # mooring
//!
//! A bidirectional, object-oriented RPC runtime. Two processes expose live
//! object graphs to each other over one duplex link: objects whose declared
//! type is shareable cross the wire as reference-counted ids and materialize
//! as proxies on the other side, with member access transparently forwarded
//! back to the owner. References are transitive — objects returned by remote
//! methods become new proxies — and are reclaimed when no live proxies
//! remain.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │              Application objects                  │
//! │      SharedObject impls + binder descriptors      │
//! ├───────────────────────────────────────────────────┤
//! │     Endpoint (per-connection engine)              │
//! │     • held / proxy / pending tables, one lock     │
//! │     • request primitives, reply futures           │
//! │     • lifetime protocol (batched Release)         │
//! ├───────────────────────────────────────────────────┤
//! │     Channels                                      │
//! │     • reliable: framed TCP, writer-task FIFO      │
//! │     • unreliable: datagrams, fire-and-forget      │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use mooring::{Endpoint, Listener};
//!
//! // Server: expose a root object.
//! let listener = Listener::bind(addr, Endpoint::builder(root, binder)).await?;
//! let session = listener.accept().await?;
//!
//! // Client: connect and talk to the server's root.
//! let endpoint = Endpoint::builder(client_root, binder).build();
//! endpoint.connect("localhost", port).await?;
//! let reply = endpoint
//!     .call_method(ObjectId::ROOT, ECHO, vec![], vec![Value::from(42)])
//!     .await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Error types for endpoint operations.
pub mod error;

/// Wire framing for both channels.
pub mod wire;

/// The reply future returned by request primitives.
pub mod rpc;

/// The scheduler seam for user-visible work.
pub mod scheduler;

/// Receiver-side handles for peer-owned objects.
pub mod proxy;

/// The per-connection RPC runtime.
pub mod endpoint;

/// Server bootstrap: accept loop and datagram demultiplexing.
pub mod listener;

// Re-export the vocabulary crate's surface for convenience.
pub use mooring_core::{
    BoxFuture, CodecError, Envelope, IdAllocator, InvokeResult, JsonSerializer, LocalTypeData,
    MethodDescriptor, MethodId, MethodInvoker, NetworkId, ObjectId, OperationId,
    PropertyDescriptor, PropertyGetter, PropertyId, PropertySetter, ProxyFactory, RefOwner,
    RemoteFault, RemoteHandle, Serializer, SharedHandle, SharedObject, SharedRef,
    SharedTypeBinder, TypeRegistry, Value, WireValue,
};

pub use endpoint::{DisconnectedHook, Endpoint, EndpointBuilder, NetworkErrorHook};
pub use error::{LinkError, LinkResult};
pub use listener::Listener;
pub use proxy::RemoteRef;
pub use rpc::ReplyFuture;
pub use scheduler::{TaskScheduler, TokioScheduler};
