//! Wire envelopes: one variant per message kind.
//!
//! The serde variant tag is the message tag; a pluggable
//! [`Serializer`](crate::codec::Serializer) turns envelopes into payload
//! bytes and back. Request kinds carry an [`OperationId`] that the matching
//! `Return*` reply echoes; [`Envelope::CallMethodUnreliable`] and
//! [`Envelope::Release`] expect no reply.

use serde::{Deserialize, Serialize};

use crate::fault::RemoteFault;
use crate::ids::{MethodId, ObjectId, OperationId, PropertyId};
use crate::value::WireValue;

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// Invoke a method on the target and reply with [`Envelope::ReturnMethod`].
    CallMethod {
        /// Held-table slot of the target on the receiving side.
        target: ObjectId,
        /// Method selector within the target's descriptor.
        method: MethodId,
        /// Generic type arguments, as serializer-stable names.
        generics: Vec<String>,
        /// Marshaled call arguments.
        args: Vec<WireValue>,
        /// Correlation id echoed by the reply.
        op: OperationId,
    },
    /// Reply to [`Envelope::CallMethod`].
    ReturnMethod {
        /// Correlation id of the originating request.
        op: OperationId,
        /// Marshaled return value; `Null` for void.
        result: WireValue,
        /// Fault raised by the invocation body, if any.
        error: Option<RemoteFault>,
    },
    /// Invoke a method with no reply; delivered over the datagram channel.
    CallMethodUnreliable {
        /// Held-table slot of the target on the receiving side.
        target: ObjectId,
        /// Method selector within the target's descriptor.
        method: MethodId,
        /// Generic type arguments.
        generics: Vec<String>,
        /// Marshaled call arguments.
        args: Vec<WireValue>,
    },
    /// Read a property; replied with [`Envelope::ReturnProperty`].
    GetProperty {
        /// Held-table slot of the target.
        target: ObjectId,
        /// Property selector.
        property: PropertyId,
        /// Correlation id.
        op: OperationId,
    },
    /// Reply to [`Envelope::GetProperty`] or [`Envelope::SetProperty`].
    ReturnProperty {
        /// Correlation id of the originating request.
        op: OperationId,
        /// Marshaled property value; `Null` for a set confirmation.
        result: WireValue,
        /// Fault raised by the accessor, if any.
        error: Option<RemoteFault>,
    },
    /// Write a property; confirmation arrives as [`Envelope::ReturnProperty`].
    SetProperty {
        /// Held-table slot of the target.
        target: ObjectId,
        /// Property selector.
        property: PropertyId,
        /// Marshaled value to assign.
        value: WireValue,
        /// Correlation id.
        op: OperationId,
    },
    /// Read an indexer; replied with [`Envelope::ReturnIndexer`].
    GetIndexer {
        /// Held-table slot of the target.
        target: ObjectId,
        /// Indexer selector (shares the property id space).
        property: PropertyId,
        /// Marshaled index arguments.
        index: Vec<WireValue>,
        /// Correlation id.
        op: OperationId,
    },
    /// Write an indexer; confirmation arrives as [`Envelope::ReturnIndexer`].
    SetIndexer {
        /// Held-table slot of the target.
        target: ObjectId,
        /// Indexer selector.
        property: PropertyId,
        /// Marshaled value to assign.
        value: WireValue,
        /// Marshaled index arguments.
        index: Vec<WireValue>,
        /// Correlation id.
        op: OperationId,
    },
    /// Reply to [`Envelope::GetIndexer`] or [`Envelope::SetIndexer`].
    ReturnIndexer {
        /// Correlation id of the originating request.
        op: OperationId,
        /// Marshaled indexer value; `Null` for a set confirmation.
        result: WireValue,
        /// Fault raised by the accessor, if any.
        error: Option<RemoteFault>,
    },
    /// Credit `count` prior inbound occurrences of `target` back to its owner.
    Release {
        /// How many inbound occurrences are being credited.
        count: u32,
        /// Held-table slot on the receiving (owning) side.
        target: ObjectId,
    },
}
