//! End-to-end request/reply scenarios over localhost pairs: method calls in
//! both directions, properties, indexers, generics, and the unreliable
//! channel.

mod common;

use std::time::Duration;

use mooring::{LinkError, ObjectId, Value};

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_round_trip() {
    let pair = pair().await;

    let reply = pair
        .client
        .call_method(ObjectId::ROOT, ECHO, Vec::new(), vec![Value::from(42)])
        .await
        .expect("echo");
    assert_eq!(reply, Value::from(42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn calls_flow_through_the_root_proxy() {
    let pair = pair().await;

    let server_proxy = pair.client.server().expect("peer root proxy");
    let root = mooring::RemoteRef::from_object(&server_proxy).expect("root handle");
    assert_eq!(root.object_id(), ObjectId::ROOT);
    assert_eq!(root.type_name(), "ITestRoot");

    let reply = root
        .call_method(ECHO, Vec::new(), vec![Value::from(-7)])
        .await
        .expect("echo via proxy");
    assert_eq!(reply, Value::from(-7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_calls_the_client_back() {
    let pair = pair().await;

    let client_proxy = pair.server.remote_client().expect("client root proxy");
    let root = mooring::RemoteRef::from_object(&client_proxy).expect("client handle");
    let reply = root
        .call_method(ECHO, Vec::new(), vec![Value::from(9)])
        .await
        .expect("echo toward client");
    assert_eq!(reply, Value::from(9));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn both_sides_agree_on_the_session_id() {
    let pair = pair().await;
    assert_eq!(pair.client.network_id(), pair.server.network_id());
    assert_ne!(pair.client.network_id().0, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn property_round_trip() {
    let pair = pair().await;

    pair.client
        .set_property(ObjectId::ROOT, GREETING, Value::from("hello"))
        .await
        .expect("set greeting");
    let reply = pair
        .client
        .get_property(ObjectId::ROOT, GREETING)
        .await
        .expect("get greeting");
    assert_eq!(reply, Value::from("hello"));
    assert_eq!(
        *pair.server_root.greeting.lock().expect("greeting"),
        "hello"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn indexer_round_trip_and_missing_key() {
    let pair = pair().await;

    pair.client
        .set_indexer(
            ObjectId::ROOT,
            ENTRIES,
            Value::from("v"),
            vec![Value::from("k")],
        )
        .await
        .expect("set entry");
    let reply = pair
        .client
        .get_indexer(ObjectId::ROOT, ENTRIES, vec![Value::from("k")])
        .await
        .expect("get entry");
    assert_eq!(reply, Value::from("v"));

    let err = pair
        .client
        .get_indexer(ObjectId::ROOT, ENTRIES, vec![Value::from("missing")])
        .await
        .expect_err("missing key must fault");
    match err {
        LinkError::Remote(fault) => {
            assert_eq!(fault.type_name, "KeyNotFound");
            assert!(fault.message.contains("missing"));
        }
        other => panic!("expected a remote fault, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generic_arguments_reach_the_invoker() {
    let pair = pair().await;

    let reply = pair
        .client
        .call_method(
            ObjectId::ROOT,
            TYPE_OF,
            vec!["System.Int32".to_string()],
            Vec::new(),
        )
        .await
        .expect("typed call");
    assert_eq!(reply, Value::from("System.Int32"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_faults() {
    let pair = pair().await;

    let err = pair
        .client
        .call_method(ObjectId::ROOT, mooring::MethodId(99), Vec::new(), Vec::new())
        .await
        .expect_err("unknown member must fault");
    match err {
        LinkError::Remote(fault) => assert_eq!(fault.type_name, "MemberNotFound"),
        other => panic!("expected a remote fault, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_target_is_access_denied() {
    let pair = pair().await;

    let err = pair
        .client
        .call_method(ObjectId(77), ECHO, Vec::new(), vec![Value::from(1)])
        .await
        .expect_err("unheld target must fault");
    match err {
        LinkError::Remote(fault) => {
            assert_eq!(fault.type_name, "AccessDenied");
            assert!(fault.message.contains("does not hold"));
            assert!(!fault.stack.is_empty());
        }
        other => panic!("expected a remote fault, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_wait_resolves_off_runtime() {
    let pair = pair().await;

    let future = pair
        .client
        .call_method(ObjectId::ROOT, ECHO, Vec::new(), vec![Value::from(5)]);
    let reply = tokio::task::spawn_blocking(move || future.wait())
        .await
        .expect("join")
        .expect("echo");
    assert_eq!(reply, Value::from(5));
}

// Current-thread flavor: spawned invocation bodies run in arrival order, so
// the observed sequence mirrors transmit order.
#[tokio::test]
async fn unreliable_calls_are_fire_and_forget() {
    let pair = pair().await;

    for n in 0..1000i64 {
        pair.client
            .call_method_unreliable(ObjectId::ROOT, RECORD, Vec::new(), vec![Value::from(n)])
            .expect("unreliable send");
    }
    // No reply traffic: nothing is ever pending.
    assert_eq!(pair.client.pending_operation_count(), 0);

    // Deliveries are best-effort; wait for the stream to go quiet.
    let mut last = usize::MAX;
    let mut quiet = 0;
    while quiet < 5 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let now = pair.server_root.recorded.lock().expect("recorded").len();
        quiet = if now == last { quiet + 1 } else { 0 };
        last = now;
    }

    let recorded = pair.server_root.recorded.lock().expect("recorded").clone();
    assert!(recorded.len() <= 1000);
    assert!(
        recorded.windows(2).all(|w| w[0] < w[1]),
        "deliveries must preserve transmit order"
    );
    assert!(
        recorded.iter().all(|n| (0..1000).contains(n)),
        "deliveries must be a subset of what was sent"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreliable_faults_are_swallowed() {
    let pair = pair().await;

    // Bad argument type: the invocation faults on the server, nobody hears.
    pair.client
        .call_method_unreliable(ObjectId::ROOT, RECORD, Vec::new(), vec![Value::from("x")])
        .expect("unreliable send");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(pair.server.connected());
    assert!(pair.server_root.recorded.lock().expect("recorded").is_empty());
}
