//! Reference translation between runtime values and wire values.
//!
//! Outbound: live objects become [`SharedRef`]s — local shareables register
//! in the held table (sender-owned), proxies of this connection encode their
//! remote id (receiver-owned). Inbound: sender-owned refs resolve or build
//! proxies, receiver-owned refs retrieve the original local instance, which
//! is what makes reference round-trips identity-preserving.

use std::collections::BTreeMap;
use std::sync::Arc;

use mooring_core::{
    ObjectId, RefOwner, RemoteHandle, SharedHandle, SharedRef, Value, WireValue,
};

use crate::endpoint::Endpoint;
use crate::error::{LinkError, LinkResult};
use crate::proxy::{ProxyCore, RemoteRef};

impl Endpoint {
    /// Translate an outbound value tree, registering embedded shareables.
    pub(crate) fn marshal_value(&self, value: Value) -> LinkResult<WireValue> {
        Ok(match value {
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(b),
            Value::Int(n) => WireValue::Int(n),
            Value::Float(x) => WireValue::Float(x),
            Value::Str(s) => WireValue::Str(s),
            Value::List(items) => WireValue::List(self.marshal_args(items)?),
            Value::Map(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k, self.marshal_value(v)?);
                }
                WireValue::Map(out)
            }
            Value::Object(obj) => WireValue::Shared(self.marshal_object(&obj)?),
        })
    }

    /// Translate a list of outbound values.
    pub(crate) fn marshal_args(&self, args: Vec<Value>) -> LinkResult<Vec<WireValue>> {
        args.into_iter().map(|v| self.marshal_value(v)).collect()
    }

    fn marshal_object(&self, obj: &SharedHandle) -> LinkResult<SharedRef> {
        if let Some(remote) = RemoteRef::from_object(obj) {
            // A proxy: encode the owner's id so the reference travels home.
            let owner = remote.endpoint()?;
            if !Arc::ptr_eq(&owner.shared, &self.shared) {
                return Err(LinkError::protocol(
                    "proxy belongs to a different connection; \
                     client-to-client routing is not supported",
                ));
            }
            return Ok(SharedRef {
                id: remote.object_id(),
                type_name: obj.type_name().to_string(),
                owner: RefOwner::Receiver,
            });
        }
        let id = self.register_local_for_send(obj)?;
        Ok(SharedRef {
            id,
            type_name: obj.type_name().to_string(),
            owner: RefOwner::Sender,
        })
    }

    /// Translate an inbound value tree, materializing embedded references.
    pub(crate) fn unmarshal_value(&self, value: WireValue) -> LinkResult<Value> {
        Ok(match value {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(n) => Value::Int(n),
            WireValue::Float(x) => Value::Float(x),
            WireValue::Str(s) => Value::Str(s),
            WireValue::List(items) => Value::List(self.unmarshal_args(items)?),
            WireValue::Map(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k, self.unmarshal_value(v)?);
                }
                Value::Map(out)
            }
            WireValue::Shared(shared_ref) => match shared_ref.owner {
                // The sender owns it: it materializes as a proxy here.
                RefOwner::Sender => Value::Object(self.resolve_or_build_proxy(&shared_ref)?),
                // We own it: hand back the original instance.
                RefOwner::Receiver => {
                    let obj = self
                        .retrieve_local(shared_ref.id)
                        .ok_or(LinkError::AccessDenied(shared_ref.id))?;
                    Value::Object(obj)
                }
            },
        })
    }

    /// Translate a list of inbound values.
    pub(crate) fn unmarshal_args(&self, args: Vec<WireValue>) -> LinkResult<Vec<Value>> {
        args.into_iter().map(|v| self.unmarshal_value(v)).collect()
    }

    /// Serializer hook: record one outbound occurrence of a local shareable,
    /// reusing its id when it is already held.
    ///
    /// # Errors
    ///
    /// [`LinkError::Disconnected`] off-link; [`LinkError::Overflow`] past the
    /// held-object cap, which also terminates the connection.
    pub(crate) fn register_local_for_send(&self, obj: &SharedHandle) -> LinkResult<ObjectId> {
        let max_held = self.shared.max_held;
        let result = {
            let mut state = self.lock_state();
            if !state.connected {
                return Err(LinkError::Disconnected);
            }
            state.held.register(obj, max_held)
        };
        if let Err(err) = &result {
            if matches!(err, LinkError::Overflow { .. }) {
                tracing::warn!(%err, "held-object cap exceeded, terminating");
                self.teardown(Some(LinkError::Overflow {
                    table: "held objects",
                    limit: max_held,
                }));
            }
        }
        result
    }

    /// Serializer hook: reuse the live proxy for a sender-owned reference or
    /// build a fresh one via the binder.
    ///
    /// The expired-weak rebuild happens under the master lock so two inbound
    /// occurrences cannot race into two proxies for one id.
    ///
    /// # Errors
    ///
    /// [`LinkError::Disconnected`] off-link; [`LinkError::Overflow`] past the
    /// remote-proxy cap (terminates the connection); [`LinkError::Protocol`]
    /// when the binder does not know the declared type.
    pub(crate) fn resolve_or_build_proxy(&self, shared_ref: &SharedRef) -> LinkResult<SharedHandle> {
        let max_remote = self.shared.max_remote;
        // Outlives the lock guard below: a fresh core must never see its
        // last strong reference dropped while the master lock is held, or
        // its release notification would re-enter the lock.
        let mut keepalive: Option<Arc<ProxyCore>> = None;

        let outcome: LinkResult<SharedHandle> = {
            let mut state = self.lock_state();
            if !state.connected {
                return Err(LinkError::Disconnected);
            }
            if let Some(existing) = state.proxies.resolve(shared_ref.id) {
                return Ok(existing);
            }
            if !state.proxies.contains(shared_ref.id) && state.proxies.len() >= max_remote {
                Err(LinkError::Overflow {
                    table: "remote proxies",
                    limit: max_remote,
                })
            } else {
                let core = ProxyCore::new(
                    shared_ref.id,
                    shared_ref.type_name.clone(),
                    self.clone(),
                );
                keepalive = Some(core.clone());
                let handle: Arc<dyn RemoteHandle> = Arc::new(RemoteRef::from_core(core.clone()));
                match self.shared.binder.make_proxy(&shared_ref.type_name, handle) {
                    Some(proxy) => {
                        state.proxies.insert(shared_ref.id, &proxy, &core);
                        Ok(proxy)
                    }
                    None => {
                        core.sever();
                        Err(LinkError::protocol(format!(
                            "no proxy binding for shared type {:?}",
                            shared_ref.type_name
                        )))
                    }
                }
            }
        };

        if let Err(err) = &outcome {
            if matches!(err, LinkError::Overflow { .. }) {
                tracing::warn!(limit = max_remote, "remote-proxy cap exceeded, terminating");
                self.teardown(Some(LinkError::Overflow {
                    table: "remote proxies",
                    limit: max_remote,
                }));
            }
        }
        drop(keepalive);
        outcome
    }

    /// Serializer hook: owner-side lookup of a held object.
    pub(crate) fn retrieve_local(&self, id: ObjectId) -> Option<SharedHandle> {
        self.lock_state().held.get(id)
    }
}
