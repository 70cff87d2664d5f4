//! The three id-keyed tables behind the endpoint's master lock.
//!
//! `HeldTable` is the owner side of the lifetime protocol: objects the peer
//! may reference, with per-id send counts. `ProxyTable` is the receiver side:
//! weak handles to live proxies. `PendingTable` correlates outstanding
//! requests with their reply slots.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::oneshot;

use mooring_core::{IdAllocator, ObjectId, OperationId, SharedHandle, SharedObject, Value};

use crate::error::{LinkError, LinkResult};
use crate::proxy::ProxyCore;

/// Thin-pointer address of a shared handle, for the by-value inverse index.
fn handle_addr(obj: &SharedHandle) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

struct HeldEntry {
    object: SharedHandle,
    send_count: u64,
}

/// Owner-side table: objects the peer may reference by id.
pub(crate) struct HeldTable {
    entries: HashMap<ObjectId, HeldEntry>,
    by_addr: HashMap<usize, ObjectId>,
    ids: IdAllocator,
}

impl HeldTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_addr: HashMap::new(),
            // Slot 0 is the bootstrap root, installed explicitly.
            ids: IdAllocator::new(1),
        }
    }

    /// Install the bootstrap root at [`ObjectId::ROOT`] with one outstanding
    /// send (the handshake occurrence).
    pub(crate) fn install_root(&mut self, root: SharedHandle) {
        self.by_addr.insert(handle_addr(&root), ObjectId::ROOT);
        self.entries.insert(
            ObjectId::ROOT,
            HeldEntry {
                object: root,
                send_count: 1,
            },
        );
    }

    /// Record one outbound occurrence of `obj`, reusing its id if it is
    /// already held.
    ///
    /// # Errors
    ///
    /// [`LinkError::Overflow`] when a fresh entry would exceed `cap`.
    pub(crate) fn register(&mut self, obj: &SharedHandle, cap: usize) -> LinkResult<ObjectId> {
        let addr = handle_addr(obj);
        if let Some(&id) = self.by_addr.get(&addr) {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.send_count += 1;
                return Ok(id);
            }
        }
        if self.entries.len() >= cap {
            return Err(LinkError::Overflow {
                table: "held objects",
                limit: cap,
            });
        }
        let id = self
            .ids
            .allocate()
            .map(ObjectId)
            .ok_or_else(|| LinkError::protocol("held-object id space exhausted"))?;
        self.by_addr.insert(addr, id);
        self.entries.insert(
            id,
            HeldEntry {
                object: obj.clone(),
                send_count: 1,
            },
        );
        Ok(id)
    }

    /// Owner-side lookup by id.
    pub(crate) fn get(&self, id: ObjectId) -> Option<SharedHandle> {
        self.entries.get(&id).map(|e| e.object.clone())
    }

    /// Credit `count` releases against `id`.
    ///
    /// A release for an id that is no longer held is a no-op. A credit larger
    /// than the outstanding send count is protocol divergence.
    pub(crate) fn release(&mut self, id: ObjectId, count: u32) -> LinkResult<()> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(());
        };
        let count = u64::from(count);
        if count > entry.send_count {
            return Err(LinkError::protocol(format!(
                "release of {count} exceeds outstanding send count {} for {id}",
                entry.send_count
            )));
        }
        entry.send_count -= count;
        if entry.send_count == 0 {
            if let Some(entry) = self.entries.remove(&id) {
                self.by_addr.remove(&handle_addr(&entry.object));
            }
            // ROOT stays reserved; the allocator never handed it out.
            self.ids.release(id.0);
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn send_count(&self, id: ObjectId) -> Option<u64> {
        self.entries.get(&id).map(|e| e.send_count)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.by_addr.clear();
        self.ids.reset();
    }
}

struct ProxyEntry {
    proxy: Weak<dyn SharedObject>,
    core: Weak<ProxyCore>,
}

/// Receiver-side table: weak handles to live proxies for peer-owned objects.
pub(crate) struct ProxyTable {
    entries: HashMap<ObjectId, ProxyEntry>,
}

impl ProxyTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Reuse the live proxy for `id`, bumping its inbound count.
    ///
    /// Returns `None` if no entry exists or the proxy has been collected
    /// (the caller then rebuilds under the same lock).
    pub(crate) fn resolve(&self, id: ObjectId) -> Option<SharedHandle> {
        let entry = self.entries.get(&id)?;
        let proxy = entry.proxy.upgrade()?;
        let core = entry.core.upgrade()?;
        core.bump_inbound();
        Some(proxy)
    }

    /// Install (or replace) the entry for `id`.
    pub(crate) fn insert(&mut self, id: ObjectId, proxy: &SharedHandle, core: &Arc<ProxyCore>) {
        self.entries.insert(
            id,
            ProxyEntry {
                proxy: Arc::downgrade(proxy),
                core: Arc::downgrade(core),
            },
        );
    }

    /// Remove the entry for `id` only if it still belongs to `core`.
    ///
    /// A dropped proxy must not clobber the entry of a successor that was
    /// rebuilt under the same id while the drop was in flight.
    pub(crate) fn remove_if(&mut self, id: ObjectId, core: &Weak<ProxyCore>) -> bool {
        let matches = self
            .entries
            .get(&id)
            .map(|e| Weak::ptr_eq(&e.core, core))
            .unwrap_or(false);
        if matches {
            self.entries.remove(&id);
        }
        matches
    }

    pub(crate) fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Empty the table, handing back the cores so the caller can sever them.
    pub(crate) fn drain(&mut self) -> Vec<Weak<ProxyCore>> {
        self.entries.drain().map(|(_, e)| e.core).collect()
    }
}

/// Outstanding request futures keyed by operation id.
pub(crate) struct PendingTable {
    slots: HashMap<OperationId, oneshot::Sender<LinkResult<Value>>>,
    ids: IdAllocator,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: HashMap::new(),
            ids: IdAllocator::new(0),
        }
    }

    /// Allocate an operation id for `tx`.
    ///
    /// Hands `tx` back if the id space is exhausted (65 536 concurrently
    /// pending operations).
    pub(crate) fn insert(
        &mut self,
        tx: oneshot::Sender<LinkResult<Value>>,
    ) -> Result<OperationId, oneshot::Sender<LinkResult<Value>>> {
        match self.ids.allocate() {
            Some(raw) => {
                let op = OperationId(raw);
                self.slots.insert(op, tx);
                Ok(op)
            }
            None => Err(tx),
        }
    }

    /// Take the result slot for `op`, freeing the id for reuse.
    pub(crate) fn remove(&mut self, op: OperationId) -> Option<oneshot::Sender<LinkResult<Value>>> {
        let tx = self.slots.remove(&op)?;
        self.ids.release(op.0);
        Some(tx)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Take every outstanding slot, resetting the allocator.
    pub(crate) fn drain(&mut self) -> Vec<oneshot::Sender<LinkResult<Value>>> {
        self.ids.reset();
        self.slots.drain().map(|(_, tx)| tx).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::collections::HashSet;

    struct Plain;

    impl SharedObject for Plain {
        fn type_name(&self) -> &str {
            "IPlain"
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn plain() -> SharedHandle {
        Arc::new(Plain)
    }

    #[test]
    fn register_reuses_id_and_counts_sends() {
        let mut held = HeldTable::new();
        let obj = plain();
        let a = held.register(&obj, usize::MAX).expect("register");
        let b = held.register(&obj, usize::MAX).expect("register again");
        assert_eq!(a, b);
        assert_eq!(held.send_count(a), Some(2));
        assert_eq!(held.len(), 1);
    }

    #[test]
    fn distinct_objects_get_distinct_ids() {
        let mut held = HeldTable::new();
        let a = held.register(&plain(), usize::MAX).expect("register");
        let b = held.register(&plain(), usize::MAX).expect("register");
        assert_ne!(a, b);
    }

    #[test]
    fn partial_release_keeps_the_entry() {
        let mut held = HeldTable::new();
        let obj = plain();
        let id = held.register(&obj, usize::MAX).expect("register");
        for _ in 0..4 {
            held.register(&obj, usize::MAX).expect("register");
        }
        held.release(id, 3).expect("release");
        assert_eq!(held.send_count(id), Some(2));
        held.release(id, 2).expect("release rest");
        assert_eq!(held.len(), 0);
        assert!(held.get(id).is_none());
    }

    #[test]
    fn release_of_unknown_id_is_a_no_op() {
        let mut held = HeldTable::new();
        held.release(ObjectId(40), 2).expect("tolerated");
    }

    #[test]
    fn over_release_is_a_protocol_fault() {
        let mut held = HeldTable::new();
        let obj = plain();
        let id = held.register(&obj, usize::MAX).expect("register");
        let err = held.release(id, 2).expect_err("must diverge");
        assert!(matches!(err, LinkError::Protocol { .. }));
    }

    #[test]
    fn cap_is_enforced_for_fresh_entries_only() {
        let mut held = HeldTable::new();
        let obj = plain();
        held.register(&obj, 1).expect("first");
        held.register(&obj, 1).expect("reuse is fine at cap");
        let err = held.register(&plain(), 1).expect_err("fresh entry over cap");
        assert!(matches!(
            err,
            LinkError::Overflow {
                table: "held objects",
                limit: 1
            }
        ));
    }

    #[test]
    fn released_ids_are_recycled() {
        let mut held = HeldTable::new();
        let id = held.register(&plain(), usize::MAX).expect("register");
        held.release(id, 1).expect("release");
        let next = held.register(&plain(), usize::MAX).expect("register");
        assert_eq!(id, next);
    }

    #[test]
    fn root_install_supports_reuse_by_value() {
        let mut held = HeldTable::new();
        let root = plain();
        held.install_root(root.clone());
        let id = held.register(&root, usize::MAX).expect("resend root");
        assert_eq!(id, ObjectId::ROOT);
        assert_eq!(held.send_count(ObjectId::ROOT), Some(2));
    }

    #[test]
    fn pending_ids_are_unique_while_in_flight() {
        let mut pending = PendingTable::new();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let (tx, _rx) = oneshot::channel();
            let op = pending.insert(tx).expect("insert");
            assert!(seen.insert(op));
        }
        assert_eq!(pending.len(), 100);
    }

    #[test]
    fn pending_recycles_completed_ids() {
        let mut pending = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        let op = pending.insert(tx).expect("insert");
        assert!(pending.remove(op).is_some());
        let (tx, _rx) = oneshot::channel();
        let next = pending.insert(tx).expect("insert");
        assert_eq!(op, next);
    }

    #[test]
    fn pending_drain_takes_everything() {
        let mut pending = PendingTable::new();
        for _ in 0..5 {
            let (tx, _rx) = oneshot::channel();
            pending.insert(tx).expect("insert");
        }
        let drained = pending.drain();
        assert_eq!(drained.len(), 5);
        assert_eq!(pending.len(), 0);
    }
}
