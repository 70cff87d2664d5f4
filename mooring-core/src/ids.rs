//! Identifier newtypes and the recycling slot allocator.
//!
//! Every id on the wire is 16 bits. Ids are only meaningful relative to one
//! side of one connection: an [`ObjectId`] addresses the *owner's* held-object
//! table, an [`OperationId`] correlates one request/reply pair, and a
//! [`NetworkId`] names one accepted session on a listener.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-session endpoint identity.
///
/// The listener allocates one for each accepted connection and the connecting
/// side adopts it during the handshake. `0` means "not yet assigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u16);

impl NetworkId {
    /// The unassigned id a freshly constructed endpoint carries.
    pub const UNASSIGNED: NetworkId = NetworkId(0);
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:{}", self.0)
    }
}

/// Slot in the owning side's held-object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u16);

impl ObjectId {
    /// The bootstrap root installed by the handshake.
    ///
    /// Reserved for the lifetime of the connection; the allocator never hands
    /// it out.
    pub const ROOT: ObjectId = ObjectId(0);
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Correlates one in-flight request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub u16);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

/// Selects a method within a shared type's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId(pub u16);

/// Selects a property (or indexer) within a shared type's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub u16);

/// Append-with-recycled-ids allocator over the 16-bit id space.
///
/// Freed slots are reused before the high-water mark advances, so long-lived
/// connections do not burn through the id space. An id below `start` is never
/// produced (the held-object allocator starts at 1 to keep
/// [`ObjectId::ROOT`] reserved).
#[derive(Debug)]
pub struct IdAllocator {
    start: u16,
    next: u32,
    free: Vec<u16>,
}

impl IdAllocator {
    /// Create an allocator whose first fresh id is `start`.
    pub fn new(start: u16) -> Self {
        Self {
            start,
            next: u32::from(start),
            free: Vec::new(),
        }
    }

    /// Hand out an id, recycling freed slots first.
    ///
    /// Returns `None` once the 16-bit space is exhausted and no slot is free.
    pub fn allocate(&mut self) -> Option<u16> {
        if let Some(id) = self.free.pop() {
            return Some(id);
        }
        if self.next <= u32::from(u16::MAX) {
            let id = self.next as u16;
            self.next += 1;
            Some(id)
        } else {
            None
        }
    }

    /// Return an id to the free pool.
    ///
    /// Ids below `start` are ignored; they were never allocated from here.
    pub fn release(&mut self, id: u16) {
        if id >= self.start {
            self.free.push(id);
        }
    }

    /// Forget all allocations, as if freshly constructed.
    pub fn reset(&mut self) {
        self.next = u32::from(self.start);
        self.free.clear();
    }
}
