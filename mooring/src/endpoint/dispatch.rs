//! Inbound message routing and the invocation executor.
//!
//! The reader task decodes one envelope at a time and routes it here.
//! Request handlers do their table lookup under the master lock, unmarshal
//! off it, and hand the invocation body to the endpoint's scheduler; user
//! code never runs on the reader. Reply handlers complete the pending
//! operation. `Release` credits the held table.

use std::backtrace::Backtrace;
use std::sync::Arc;

use mooring_core::{
    Envelope, LocalTypeData, MethodId, ObjectId, OperationId, PropertyId, RemoteFault,
    SharedHandle, Value, WireValue,
};

use crate::endpoint::Endpoint;
use crate::error::LinkError;

/// Which `Return*` kind answers the request being handled.
#[derive(Clone, Copy)]
enum ReplyKind {
    Method,
    Property,
    Indexer,
}

impl ReplyKind {
    fn envelope(self, op: OperationId, result: WireValue, error: Option<RemoteFault>) -> Envelope {
        match self {
            ReplyKind::Method => Envelope::ReturnMethod { op, result, error },
            ReplyKind::Property => Envelope::ReturnProperty { op, result, error },
            ReplyKind::Indexer => Envelope::ReturnIndexer { op, result, error },
        }
    }
}

impl Endpoint {
    /// Route one decoded envelope. Called from the reliable reader task.
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::CallMethod {
                target,
                method,
                generics,
                args,
                op,
            } => self.handle_call(target, method, generics, args, Some(op)),
            Envelope::CallMethodUnreliable {
                target,
                method,
                generics,
                args,
            } => self.handle_call(target, method, generics, args, None),
            Envelope::GetProperty {
                target,
                property,
                op,
            } => self.handle_get(target, property, Vec::new(), op, ReplyKind::Property),
            Envelope::GetIndexer {
                target,
                property,
                index,
                op,
            } => self.handle_get(target, property, index, op, ReplyKind::Indexer),
            Envelope::SetProperty {
                target,
                property,
                value,
                op,
            } => self.handle_set(target, property, value, Vec::new(), op, ReplyKind::Property),
            Envelope::SetIndexer {
                target,
                property,
                value,
                index,
                op,
            } => self.handle_set(target, property, value, index, op, ReplyKind::Indexer),
            Envelope::ReturnMethod { op, result, error }
            | Envelope::ReturnProperty { op, result, error }
            | Envelope::ReturnIndexer { op, result, error } => {
                self.handle_return(op, result, error)
            }
            Envelope::Release { count, target } => self.handle_release(count, target),
        }
    }

    /// Route one datagram payload. Called from the client's datagram task or
    /// the listener's demultiplexer.
    pub(crate) fn handle_datagram(&self, payload: &[u8]) {
        match self.shared.serializer.decode(payload) {
            Ok(Envelope::CallMethodUnreliable {
                target,
                method,
                generics,
                args,
            }) => self.handle_call(target, method, generics, args, None),
            Ok(other) => {
                tracing::debug!(?other, "ignoring non-datagram envelope on the unreliable channel")
            }
            Err(err) => tracing::debug!(%err, "dropping undecodable datagram"),
        }
    }

    fn handle_call(
        &self,
        target: ObjectId,
        method: MethodId,
        generics: Vec<String>,
        args: Vec<WireValue>,
        op: Option<OperationId>,
    ) {
        let reply_to = op.map(|op| (ReplyKind::Method, op));
        let Some(obj) = self.lookup_target(target, reply_to) else {
            return;
        };
        let Some(data) = self.lookup_data(&obj, reply_to) else {
            return;
        };
        let args = match self.unmarshal_args(args) {
            Ok(args) => args,
            Err(err) => {
                self.reply_with_error(reply_to, &err);
                return;
            }
        };

        let endpoint = self.clone();
        self.spawn_user(async move {
            let result = match data.methods.get(&method) {
                Some(descriptor) => (descriptor.invoke)(obj, args, generics).await,
                None => Err(RemoteFault::new(
                    "MemberNotFound",
                    format!("no method {} on {}", method.0, data.type_name),
                )),
            };
            match op {
                Some(op) => endpoint.finish_reply(ReplyKind::Method, op, result),
                // Fire-and-forget callers opted out of feedback.
                None => {
                    if let Err(fault) = result {
                        tracing::debug!(%fault, "unreliable invocation failed");
                    }
                }
            }
        });
    }

    fn handle_get(
        &self,
        target: ObjectId,
        property: PropertyId,
        index: Vec<WireValue>,
        op: OperationId,
        kind: ReplyKind,
    ) {
        let reply_to = Some((kind, op));
        let Some(obj) = self.lookup_target(target, reply_to) else {
            return;
        };
        let Some(data) = self.lookup_data(&obj, reply_to) else {
            return;
        };
        let index = match self.unmarshal_args(index) {
            Ok(index) => index,
            Err(err) => {
                self.reply_with_error(reply_to, &err);
                return;
            }
        };

        let endpoint = self.clone();
        self.spawn_user(async move {
            let result = match data.properties.get(&property).and_then(|p| p.get.as_ref()) {
                Some(getter) => getter(obj, index).await,
                None => Err(RemoteFault::new(
                    "MemberNotFound",
                    format!("no readable property {} on {}", property.0, data.type_name),
                )),
            };
            endpoint.finish_reply(kind, op, result);
        });
    }

    fn handle_set(
        &self,
        target: ObjectId,
        property: PropertyId,
        value: WireValue,
        index: Vec<WireValue>,
        op: OperationId,
        kind: ReplyKind,
    ) {
        let reply_to = Some((kind, op));
        let Some(obj) = self.lookup_target(target, reply_to) else {
            return;
        };
        let Some(data) = self.lookup_data(&obj, reply_to) else {
            return;
        };
        let unmarshaled = self
            .unmarshal_value(value)
            .and_then(|value| Ok((value, self.unmarshal_args(index)?)));
        let (value, index) = match unmarshaled {
            Ok(parts) => parts,
            Err(err) => {
                self.reply_with_error(reply_to, &err);
                return;
            }
        };

        let endpoint = self.clone();
        self.spawn_user(async move {
            let result = match data.properties.get(&property).and_then(|p| p.set.as_ref()) {
                Some(setter) => setter(obj, value, index).await.map(|()| Value::Null),
                None => Err(RemoteFault::new(
                    "MemberNotFound",
                    format!("no writable property {} on {}", property.0, data.type_name),
                )),
            };
            endpoint.finish_reply(kind, op, result);
        });
    }

    fn handle_return(&self, op: OperationId, result: WireValue, error: Option<RemoteFault>) {
        let tx = self.lock_state().pending.remove(op);
        let Some(tx) = tx else {
            tracing::debug!(%op, "reply for an operation that is no longer pending");
            return;
        };
        let outcome = match error {
            Some(fault) => Err(LinkError::Remote(fault)),
            None => self.unmarshal_value(result),
        };
        let _ = tx.send(outcome);
    }

    fn handle_release(&self, count: u32, target: ObjectId) {
        let result = self.lock_state().held.release(target, count);
        match result {
            Ok(()) => tracing::debug!(%target, count, "credited release"),
            Err(err) => {
                tracing::warn!(%err, "release divergence, terminating");
                self.teardown(Some(err));
            }
        }
    }

    /// Master-lock lookup of a request target; answers `AccessDenied` on a
    /// miss when the request expects a reply.
    fn lookup_target(
        &self,
        target: ObjectId,
        reply_to: Option<(ReplyKind, OperationId)>,
    ) -> Option<SharedHandle> {
        let obj = {
            let state = self.lock_state();
            if !state.connected {
                return None;
            }
            state.held.get(target)
        };
        if obj.is_none() {
            tracing::warn!(%target, "peer referenced an object not held here");
            if let Some((kind, op)) = reply_to {
                let fault = RemoteFault::new("AccessDenied", format!("does not hold {target}"))
                    .with_stack(Backtrace::force_capture().to_string())
                    .with_source(self.fault_source());
                self.send_reply(kind, op, WireValue::Null, Some(fault));
            }
        }
        obj
    }

    /// Resolve the target's descriptors from the binder.
    fn lookup_data(
        &self,
        obj: &SharedHandle,
        reply_to: Option<(ReplyKind, OperationId)>,
    ) -> Option<Arc<LocalTypeData>> {
        let data = self.shared.binder.local_data(obj.type_name());
        if data.is_none() {
            tracing::warn!(type_name = obj.type_name(), "no descriptors for held type");
            if let Some((kind, op)) = reply_to {
                let fault = RemoteFault::new(
                    "TypeNotBound",
                    format!("no invocation descriptors for {}", obj.type_name()),
                )
                .with_source(self.fault_source());
                self.send_reply(kind, op, WireValue::Null, Some(fault));
            }
        }
        data
    }

    /// Marshal an invocation outcome and answer the request.
    fn finish_reply(&self, kind: ReplyKind, op: OperationId, result: Result<Value, RemoteFault>) {
        match result {
            Ok(value) => match self.marshal_value(value) {
                Ok(wire) => self.send_reply(kind, op, wire, None),
                Err(err) => {
                    let fault = self.fault_from_error(&err);
                    self.send_reply(kind, op, WireValue::Null, Some(fault));
                }
            },
            Err(fault) => {
                let fault = if fault.source.is_empty() {
                    fault.with_source(self.fault_source())
                } else {
                    fault
                };
                self.send_reply(kind, op, WireValue::Null, Some(fault));
            }
        }
    }

    fn reply_with_error(&self, reply_to: Option<(ReplyKind, OperationId)>, err: &LinkError) {
        tracing::debug!(%err, "failed to unmarshal inbound request payload");
        if let Some((kind, op)) = reply_to {
            let fault = self.fault_from_error(err);
            self.send_reply(kind, op, WireValue::Null, Some(fault));
        }
    }

    fn fault_from_error(&self, err: &LinkError) -> RemoteFault {
        let type_name = match err {
            LinkError::AccessDenied(_) => "AccessDenied",
            LinkError::Overflow { .. } => "Overflow",
            LinkError::Codec(_) => "SerializationError",
            LinkError::Disconnected => "Disconnected",
            _ => "LinkError",
        };
        RemoteFault::new(type_name, err.to_string()).with_source(self.fault_source())
    }

    fn fault_source(&self) -> String {
        format!("endpoint {}", self.network_id())
    }

    fn send_reply(
        &self,
        kind: ReplyKind,
        op: OperationId,
        result: WireValue,
        error: Option<RemoteFault>,
    ) {
        let link = {
            let state = self.lock_state();
            if !state.connected {
                return;
            }
            state.link.clone()
        };
        let Some(link) = link else {
            return;
        };
        let envelope = kind.envelope(op, result, error);
        match self.shared.serializer.encode(&envelope) {
            Ok(bytes) => {
                if !link.send(bytes) {
                    tracing::debug!(%op, "reply dropped, writer is gone");
                }
            }
            Err(err) => {
                tracing::warn!(%err, %op, "failed to encode reply, answering with a fault");
                let fallback = kind.envelope(
                    op,
                    WireValue::Null,
                    Some(
                        RemoteFault::new("SerializationError", err.to_string())
                            .with_source(self.fault_source()),
                    ),
                );
                if let Ok(bytes) = self.shared.serializer.encode(&fallback) {
                    let _ = link.send(bytes);
                }
            }
        }
    }
}
