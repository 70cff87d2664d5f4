//! Shared fixtures for the end-to-end suites: a root type with methods,
//! properties, and an indexer, a counter factory, and a generic proxy that
//! forwards every member through a `RemoteRef`.

#![allow(dead_code)]

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mooring::{
    Endpoint, EndpointBuilder, Listener, LocalTypeData, MethodDescriptor, MethodId,
    PropertyDescriptor, PropertyId, ProxyFactory, RemoteFault, RemoteHandle, RemoteRef,
    SharedHandle, SharedObject, TypeRegistry, Value,
};

// Root members.
pub const ECHO: MethodId = MethodId(1);
pub const NEW_COUNTER: MethodId = MethodId(2);
pub const SLOW: MethodId = MethodId(3);
pub const HOLD: MethodId = MethodId(4);
pub const FETCH: MethodId = MethodId(5);
pub const RECORD: MethodId = MethodId(6);
pub const TYPE_OF: MethodId = MethodId(7);
pub const GREETING: PropertyId = PropertyId(1);
pub const ENTRIES: PropertyId = PropertyId(2);

// Counter members.
pub const INCREMENT: MethodId = MethodId(1);

/// The bootstrap root both suites expose.
#[derive(Default)]
pub struct TestRoot {
    pub greeting: Mutex<String>,
    pub entries: Mutex<BTreeMap<String, String>>,
    pub held: Mutex<Option<SharedHandle>>,
    pub recorded: Mutex<Vec<i64>>,
}

impl SharedObject for TestRoot {
    fn type_name(&self) -> &str {
        "ITestRoot"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A shareable returned by `NEW_COUNTER`.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl SharedObject for Counter {
    fn type_name(&self) -> &str {
        "ICounter"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Generic proxy: any shared type forwards through its `RemoteRef`.
pub struct ProxyObject {
    type_name: &'static str,
    handle: RemoteRef,
}

impl SharedObject for ProxyObject {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn remote_handle(&self) -> Option<&dyn RemoteHandle> {
        Some(&self.handle)
    }
}

fn proxy_factory(type_name: &'static str) -> ProxyFactory {
    Box::new(move |handle| {
        let handle = handle
            .as_any()
            .downcast_ref::<RemoteRef>()
            .cloned()
            .expect("binder received a foreign handle");
        Arc::new(ProxyObject { type_name, handle })
    })
}

fn expect_root(obj: SharedHandle) -> Result<Arc<TestRoot>, RemoteFault> {
    obj.as_any()
        .downcast::<TestRoot>()
        .map_err(|_| RemoteFault::new("TypeError", "target is not ITestRoot"))
}

fn expect_counter(obj: SharedHandle) -> Result<Arc<Counter>, RemoteFault> {
    obj.as_any()
        .downcast::<Counter>()
        .map_err(|_| RemoteFault::new("TypeError", "target is not ICounter"))
}

fn int_arg(args: &[Value]) -> Result<i64, RemoteFault> {
    args.first()
        .and_then(Value::as_int)
        .ok_or_else(|| RemoteFault::new("ArgumentError", "expected an integer argument"))
}

fn str_arg(value: &Value) -> Result<String, RemoteFault> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RemoteFault::new("ArgumentError", "expected a string"))
}

fn root_data() -> LocalTypeData {
    LocalTypeData::new("ITestRoot")
        .with_method(
            ECHO,
            MethodDescriptor::reliable(Box::new(|_obj, args, _generics| {
                Box::pin(async move { Ok(Value::from(int_arg(&args)?)) })
            })),
        )
        .with_method(
            NEW_COUNTER,
            MethodDescriptor::reliable(Box::new(|_obj, _args, _generics| {
                Box::pin(async move {
                    let counter: SharedHandle = Arc::new(Counter::default());
                    Ok(Value::Object(counter))
                })
            })),
        )
        .with_method(
            SLOW,
            MethodDescriptor::reliable(Box::new(|_obj, _args, _generics| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Value::Null)
                })
            })),
        )
        .with_method(
            HOLD,
            MethodDescriptor::reliable(Box::new(|obj, mut args, _generics| {
                Box::pin(async move {
                    let root = expect_root(obj)?;
                    if args.is_empty() {
                        return Err(RemoteFault::new("ArgumentError", "hold expects a shareable"));
                    }
                    let handle = args
                        .remove(0)
                        .as_object()
                        .cloned()
                        .ok_or_else(|| {
                            RemoteFault::new("ArgumentError", "hold expects a shareable")
                        })?;
                    *root.held.lock().expect("held slot") = Some(handle);
                    Ok(Value::Null)
                })
            })),
        )
        .with_method(
            FETCH,
            MethodDescriptor::reliable(Box::new(|obj, _args, _generics| {
                Box::pin(async move {
                    let root = expect_root(obj)?;
                    let held = root.held.lock().expect("held slot").clone();
                    Ok(match held {
                        Some(handle) => Value::Object(handle),
                        None => Value::Null,
                    })
                })
            })),
        )
        .with_method(
            RECORD,
            MethodDescriptor::unreliable(Box::new(|obj, args, _generics| {
                Box::pin(async move {
                    let root = expect_root(obj)?;
                    let n = int_arg(&args)?;
                    root.recorded.lock().expect("recorded").push(n);
                    Ok(Value::Null)
                })
            })),
        )
        .with_method(
            TYPE_OF,
            MethodDescriptor::reliable(Box::new(|_obj, _args, generics| {
                Box::pin(async move {
                    let name = generics.first().cloned().ok_or_else(|| {
                        RemoteFault::new("ArgumentError", "expected a generic argument")
                    })?;
                    Ok(Value::from(name))
                })
            })),
        )
        .with_property(
            GREETING,
            PropertyDescriptor::read_write(
                Box::new(|obj, _index| {
                    Box::pin(async move {
                        let root = expect_root(obj)?;
                        let greeting = root.greeting.lock().expect("greeting").clone();
                        Ok(Value::from(greeting))
                    })
                }),
                Box::new(|obj, value, _index| {
                    Box::pin(async move {
                        let root = expect_root(obj)?;
                        *root.greeting.lock().expect("greeting") = str_arg(&value)?;
                        Ok(())
                    })
                }),
            ),
        )
        .with_property(
            ENTRIES,
            PropertyDescriptor::read_write(
                Box::new(|obj, index| {
                    Box::pin(async move {
                        let root = expect_root(obj)?;
                        let key = str_arg(index.first().unwrap_or(&Value::Null))?;
                        let entries = root.entries.lock().expect("entries");
                        match entries.get(&key) {
                            Some(value) => Ok(Value::from(value.clone())),
                            None => Err(RemoteFault::new(
                                "KeyNotFound",
                                format!("no entry for {key:?}"),
                            )),
                        }
                    })
                }),
                Box::new(|obj, value, index| {
                    Box::pin(async move {
                        let root = expect_root(obj)?;
                        let key = str_arg(index.first().unwrap_or(&Value::Null))?;
                        let value = str_arg(&value)?;
                        root.entries.lock().expect("entries").insert(key, value);
                        Ok(())
                    })
                }),
            ),
        )
}

fn counter_data() -> LocalTypeData {
    LocalTypeData::new("ICounter").with_method(
        INCREMENT,
        MethodDescriptor::reliable(Box::new(|obj, _args, _generics| {
            Box::pin(async move {
                let counter = expect_counter(obj)?;
                let next = counter.value.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Value::from(next as i64))
            })
        })),
    )
}

/// The binder both sides of every test pair share.
pub fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register_proxy("ITestRoot", proxy_factory("ITestRoot"));
    registry.register_proxy("ICounter", proxy_factory("ICounter"));
    registry.register_local(root_data());
    registry.register_local(counter_data());
    Arc::new(registry)
}

/// A connected endpoint pair plus typed handles to both roots.
pub struct Pair {
    pub listener: Listener,
    pub server: Endpoint,
    pub client: Endpoint,
    pub server_root: Arc<TestRoot>,
    pub client_root: Arc<TestRoot>,
}

/// Connect a pair over localhost with default configuration.
pub async fn pair() -> Pair {
    pair_with(|b| b, |b| b).await
}

/// Route `RUST_LOG`-filtered engine traces into test output.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Connect a pair, letting each side adjust its builder.
pub async fn pair_with(
    server_cfg: impl FnOnce(EndpointBuilder) -> EndpointBuilder,
    client_cfg: impl FnOnce(EndpointBuilder) -> EndpointBuilder,
) -> Pair {
    init_tracing();
    let binder = registry();
    let server_root = Arc::new(TestRoot::default());
    let client_root = Arc::new(TestRoot::default());
    let server_handle: SharedHandle = server_root.clone();
    let client_handle: SharedHandle = client_root.clone();

    let template = server_cfg(Endpoint::builder(server_handle, binder.clone()));
    let listener = Listener::bind("127.0.0.1:0".parse().expect("loopback"), template)
        .await
        .expect("bind listener");
    let port = listener.local_addr().expect("listener addr").port();

    let client = client_cfg(Endpoint::builder(client_handle, binder)).build();
    let (accepted, connected) = tokio::join!(listener.accept(), client.connect("localhost", port));
    connected.expect("client connect");
    let server = accepted.expect("accept");

    Pair {
        listener,
        server,
        client,
        server_root,
        client_root,
    }
}

/// The `RemoteRef` inside a proxy value.
pub fn remote_ref(value: &Value) -> RemoteRef {
    let obj = value.as_object().expect("expected a proxy value");
    RemoteRef::from_object(obj).expect("expected a proxy object")
}

/// Poll `cond` until it holds or `deadline` passes.
pub async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
