#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end exchange tests: handshake, typed façades, ordering,
//! concurrency, encryption, and the TLS socket mode.

use futures::future::BoxFuture;
use object_exchange::{
    converse, Client, ClientConfig, Listener, ListenerConfig, ObjectService, Reply,
    RequestContext, Result, SocketMode, TextService, VersionPolicy,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn loopback(secret: Option<&str>, mode: SocketMode) -> ListenerConfig {
    ListenerConfig {
        address: "127.0.0.1:0".into(),
        secret: secret.map(str::to_owned),
        mode,
        ..ListenerConfig::default()
    }
}

fn client_for(listener: &Listener, secret: Option<&str>, mode: SocketMode) -> ClientConfig {
    ClientConfig {
        address: listener.local_addr().to_string(),
        secret: secret.map(str::to_owned),
        mode,
        ..ClientConfig::default()
    }
}

fn echo_handler(_ctx: &RequestContext, action: &str, data: Value) -> Result<Reply<Value>> {
    Ok(Reply::Answer(json!({ "action": action, "data": data })))
}

async fn echo_listener(secret: Option<&str>, mode: SocketMode) -> Listener {
    let mut listener = Listener::bind(&loopback(secret, mode)).await.unwrap();
    listener.start(Arc::new(ObjectService::new(echo_handler)));
    listener
}

#[tokio::test]
async fn request_value_yields_the_handlers_list_reply() {
    let mut listener = Listener::bind(&loopback(None, SocketMode::Plain))
        .await
        .unwrap();
    listener.start(Arc::new(ObjectService::new(
        |_ctx: &RequestContext, action: &str, data: Value| {
            assert_eq!(action, "list_books");
            assert_eq!(data.as_array().map(Vec::len), Some(3));
            Ok(Reply::Answer(json!(["dune", "hyperion", "solaris"])))
        },
    )));

    let mut client = Client::connect(&client_for(&listener, None, SocketMode::Plain))
        .await
        .unwrap();
    let reply = client
        .request("list_books", json!(["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(reply, json!(["dune", "hyperion", "solaris"]));
    client.close().await.unwrap();

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn sequential_exchanges_reply_in_request_order() {
    let mut listener = echo_listener(None, SocketMode::Plain).await;
    let mut client = Client::connect(&client_for(&listener, None, SocketMode::Plain))
        .await
        .unwrap();

    for i in 0..20u32 {
        let reply = client.request("echo", json!(i)).await.unwrap();
        assert_eq!(reply["data"], json!(i));
    }
    assert!(client.tally().bytes_sent() > 0);
    assert!(client.tally().bytes_received() > 0);
    client.close().await.unwrap();

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_are_served_independently() {
    let mut listener = echo_listener(None, SocketMode::Plain).await;
    let config = client_for(&listener, None, SocketMode::Plain);

    let mut tasks = tokio::task::JoinSet::new();
    for k in 0..8u32 {
        let config = config.clone();
        tasks.spawn(async move {
            let mut client = Client::connect(&config).await.unwrap();
            for i in 0..5u32 {
                let reply = client.request("echo", json!([k, i])).await.unwrap();
                assert_eq!(reply["data"], json!([k, i]));
            }
            client.close().await.unwrap();
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    // all handlers finished: the in-flight counter is back to zero
    tokio::time::timeout(Duration::from_secs(5), async {
        while listener.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handlers should drain");

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn matching_keys_exchange_encrypted_frames() {
    let mut listener = echo_listener(Some("shelf key"), SocketMode::Plain).await;
    let mut client = Client::connect(&client_for(&listener, Some("shelf key"), SocketMode::Plain))
        .await
        .unwrap();

    let reply = client.request("echo", json!({"title": "dune"})).await.unwrap();
    assert_eq!(reply["data"], json!({"title": "dune"}));
    client.close().await.unwrap();

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn wrong_key_fails_the_handshake_and_skips_the_handler() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&invocations);

    let mut listener = Listener::bind(&loopback(Some("right"), SocketMode::Plain))
        .await
        .unwrap();
    listener.start(Arc::new(ObjectService::new(
        move |_ctx: &RequestContext, _action: &str, data: Value| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Reply::Answer(data))
        },
    )));

    let err = Client::connect(&client_for(&listener, Some("wrong"), SocketMode::Plain))
        .await
        .unwrap_err();
    match err {
        object_exchange::ExchangeError::Handshake(msg) => {
            assert_eq!(msg, "server did not accept the encryption key")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    // A correct key still gets through afterwards.
    let mut client = Client::connect(&client_for(&listener, Some("right"), SocketMode::Plain))
        .await
        .unwrap();
    client.request("echo", json!("ok")).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    client.close().await.unwrap();

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn tls_mode_round_trip() {
    let mut listener = echo_listener(None, SocketMode::AnonymousTls).await;
    let mut client = Client::connect(&client_for(&listener, None, SocketMode::AnonymousTls))
        .await
        .unwrap();

    let reply = client.request("echo", json!("over tls")).await.unwrap();
    assert_eq!(reply["data"], json!("over tls"));
    client.close().await.unwrap();

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn text_facade_negotiates_a_fixed_version() {
    let mut listener = Listener::bind(&loopback(None, SocketMode::Plain))
        .await
        .unwrap();
    listener.start(Arc::new(TextService::with_policy(
        |ctx: &RequestContext, data: &str| {
            Ok(Reply::Answer(format!(
                "v{} #{} {}",
                ctx.version, ctx.request_id, data
            )))
        },
        VersionPolicy::Fixed("1.0".into()),
    )));

    let config = ClientConfig {
        version: "9.9".into(),
        ..client_for(&listener, None, SocketMode::Plain)
    };
    let mut client = Client::connect(&config).await.unwrap();
    assert_eq!(client.version(), "1.0");

    assert_eq!(client.exchange_text("first").await.unwrap(), "v1.0 #1 first");
    assert_eq!(
        client.exchange_text("second").await.unwrap(),
        "v1.0 #2 second"
    );
    client.close().await.unwrap();

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn hangup_reply_forces_the_connection_closed() {
    let mut listener = Listener::bind(&loopback(None, SocketMode::Plain))
        .await
        .unwrap();
    listener.start(Arc::new(TextService::new(
        |_ctx: &RequestContext, data: &str| {
            if data == "quit" {
                Ok(Reply::Hangup("bye".into()))
            } else {
                Ok(Reply::Answer(format!("ok {data}")))
            }
        },
    )));

    let mut client = Client::connect(&client_for(&listener, None, SocketMode::Plain))
        .await
        .unwrap();
    assert_eq!(client.exchange_text("hello").await.unwrap(), "ok hello");
    assert_eq!(client.exchange_text("quit").await.unwrap(), "bye");

    // The server has hung up: no further reply arrives. The attempt either
    // absorbs the protocol end as an empty string or fails on the closed
    // socket, but never yields a handler reply.
    match client.exchange_text("after").await {
        Ok(reply) => assert!(reply.is_empty(), "unexpected reply: {reply}"),
        Err(_) => {}
    }
    let _ = client.close().await;

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

fn count_conversation(client: &mut Client) -> BoxFuture<'_, Result<usize>> {
    Box::pin(async move {
        let a = client.request("echo", json!(1)).await?;
        let b = client.request("echo", json!(2)).await?;
        Ok(a["data"].as_u64().unwrap_or(0) as usize + b["data"].as_u64().unwrap_or(0) as usize)
    })
}

#[tokio::test]
async fn converse_runs_a_conversation_and_closes() {
    let mut listener = echo_listener(None, SocketMode::Plain).await;
    let config = client_for(&listener, None, SocketMode::Plain);

    let total = converse(&config, count_conversation).await.unwrap();
    assert_eq!(total, 3);

    listener.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn detached_conversations_report_errors_to_the_hook() {
    let errored = Arc::new(AtomicBool::new(false));
    let hook_flag = Arc::clone(&errored);
    let hook: object_exchange::ErrorHook = Arc::new(move |_e| {
        hook_flag.store(true, Ordering::SeqCst);
    });

    // Nothing listens here: the detached conversation fails to connect and
    // the failure lands on the hook instead of crossing task boundaries.
    let config = ClientConfig {
        address: "127.0.0.1:1".into(),
        connect_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    };

    fn never(client: &mut Client) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _ = client.exchange_text("unreachable").await?;
            Ok(())
        })
    }

    object_exchange::converse_detached(config, never, hook)
        .await
        .unwrap();
    assert!(errored.load(Ordering::SeqCst));
}
