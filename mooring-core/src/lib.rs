//! # mooring-core
//!
//! Vocabulary types for the mooring object-RPC runtime: identifiers, the
//! runtime/wire value model, protocol envelopes, the pluggable serializer,
//! and the shareable-object / proxy-binder trait seams.
//!
//! The engine lives in the `mooring` crate; everything here is pure data and
//! traits so that binders and serializers can be written without pulling in
//! the transport machinery.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Identifier newtypes and the recycling slot allocator.
pub mod ids;

/// Runtime values, wire values, and shared references.
pub mod value;

/// The serializable fault raised by failed remote invocations.
pub mod fault;

/// Protocol message envelopes.
pub mod envelope;

/// Pluggable payload serialization.
pub mod codec;

/// Shareable objects, descriptors, and the binder seam.
pub mod shared;

pub use codec::{CodecError, JsonSerializer, Serializer};
pub use envelope::Envelope;
pub use fault::RemoteFault;
pub use ids::{IdAllocator, MethodId, NetworkId, ObjectId, OperationId, PropertyId};
pub use shared::{
    BoxFuture, InvokeResult, LocalTypeData, MethodDescriptor, MethodInvoker, PropertyDescriptor,
    PropertyGetter, PropertySetter, ProxyFactory, RemoteHandle, SharedHandle, SharedObject,
    SharedTypeBinder, TypeRegistry,
};
pub use value::{RefOwner, SharedRef, Value, WireValue};
