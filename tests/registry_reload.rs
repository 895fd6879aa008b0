//! Snapshot publication under concurrent use.
//!
//! Each generation registers two tools that both answer with the generation
//! number. A reader that ever observes a mix of generations, or a call that
//! fails because a publish raced it, indicates a torn swap.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;

use mcp_learning_server::capability::{handler_fn, CapabilityDescriptor, CapabilityKind, InvocationResult};
use mcp_learning_server::mcp::protocol::{JsonRpcReply, JsonRpcRequest, RequestId};
use mcp_learning_server::mcp::{Dispatcher, DispatcherSettings, Session};
use mcp_learning_server::provider::StaticProvider;
use mcp_learning_server::registry::{CapabilityRegistry, RegistrySnapshot, SnapshotBuilder};

fn generation(n: u64) -> RegistrySnapshot {
    let tool = |name: &str| {
        CapabilityDescriptor::tool(
            name,
            handler_fn(move |_| async move { InvocationResult::json(json!({ "generation": n })) }),
        )
    };
    let provider = StaticProvider::new(format!("gen-{n}"), vec![tool("left"), tool("right")]);
    let mut builder = SnapshotBuilder::new(Duration::from_secs(5));
    builder.add_provider(&provider).unwrap();
    builder.finish()
}

async fn ready(dispatcher: &Dispatcher, id: &str) -> Session {
    let session = Session::connected(id);
    let reply = dispatcher
        .handle_request(
            &session,
            JsonRpcRequest::new(RequestId::Number(0), "initialize", Some(json!({"protocolVersion": "2025-06-18"}))),
        )
        .await;
    assert!(reply.error().is_none());
    session
}

fn generation_of(reply: &JsonRpcReply) -> u64 {
    let result = reply.result().unwrap_or_else(|| panic!("call failed: {reply:?}"));
    result["structuredContent"]["generation"].as_u64().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_a_mixed_snapshot() {
    let registry = Arc::new(CapabilityRegistry::with_snapshot(generation(0)));

    let publisher = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            for n in 1..=200 {
                registry.publish(generation(n));
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        readers.push(tokio::spawn(async move {
            let mut last_version = 0;
            for _ in 0..500 {
                let snapshot = registry.current();
                assert!(snapshot.version() >= last_version, "version went backwards");
                last_version = snapshot.version();

                let providers: Vec<&str> = snapshot
                    .list(CapabilityKind::Tool)
                    .map(|c| c.provider.as_str())
                    .collect();
                assert_eq!(providers.len(), 2);
                assert_eq!(providers[0], providers[1]);
                tokio::task::yield_now().await;
            }
        }));
    }

    publisher.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(registry.current().version(), 201);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_succeed_while_reloading() {
    let registry = Arc::new(CapabilityRegistry::with_snapshot(generation(0)));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), DispatcherSettings::default()));

    let publisher = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            for n in 1..=100 {
                registry.publish(generation(n));
                tokio::task::yield_now().await;
            }
        })
    };

    let mut callers = Vec::new();
    for caller in 0..4 {
        let dispatcher = Arc::clone(&dispatcher);
        callers.push(tokio::spawn(async move {
            let session = ready(&dispatcher, &format!("caller-{caller}")).await;
            let mut seen = 0;
            for id in 1..=100 {
                let name = if id % 2 == 0 { "left" } else { "right" };
                let reply = dispatcher
                    .handle_request(
                        &session,
                        JsonRpcRequest::new(
                            RequestId::Number(id),
                            "tools/call",
                            Some(json!({ "name": name, "arguments": {} })),
                        ),
                    )
                    .await;
                let generation = generation_of(&reply);
                assert!(generation >= seen, "generation went backwards");
                seen = generation;
            }
        }));
    }

    publisher.await.unwrap();
    for caller in callers {
        caller.await.unwrap();
    }
}

#[tokio::test]
async fn test_in_flight_call_finishes_on_its_snapshot() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let gated = {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        CapabilityDescriptor::tool(
            "gated",
            handler_fn(move |_| {
                let started = Arc::clone(&started);
                let release = Arc::clone(&release);
                async move {
                    started.notify_one();
                    release.notified().await;
                    InvocationResult::text("finished")
                }
            }),
        )
    };
    let mut builder = SnapshotBuilder::new(Duration::from_secs(5));
    builder.add_provider(&StaticProvider::new("gate", vec![gated])).unwrap();

    let registry = Arc::new(CapabilityRegistry::with_snapshot(builder.finish()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), DispatcherSettings::default()));
    let session = Arc::new(ready(&dispatcher, "gate").await);

    let call = {
        let dispatcher = Arc::clone(&dispatcher);
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            dispatcher
                .handle_request(
                    &session,
                    JsonRpcRequest::new(RequestId::Number(1), "tools/call", Some(json!({"name": "gated"}))),
                )
                .await
        })
    };

    started.notified().await;
    registry.publish(generation(1));
    release.notify_one();

    let reply = call.await.unwrap();
    let result = reply.result().unwrap();
    assert_eq!(result["content"][0]["text"], Value::from("finished"));

    let reply = dispatcher
        .handle_request(
            &session,
            JsonRpcRequest::new(RequestId::Number(2), "tools/call", Some(json!({"name": "gated"}))),
        )
        .await;
    assert_eq!(reply.error().unwrap().code, -32601);
}
