//! tests/bus_tests.rs
//!
//! End-to-end broker/client behavior: ordered fan-out, pattern delivery,
//! no replay for late subscribers, KV with TTL, sorted-set trimming.

use std::net::SocketAddr;
use std::time::Duration;

use dustbot_bus::{Broker, BusClient};
use dustbot_common::keys;

async fn start_broker() -> SocketAddr {
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().unwrap();
    tokio::spawn(broker.run());
    addr
}

#[tokio::test]
async fn subscribers_receive_in_publish_order() {
    let addr = start_broker().await;
    let publisher = BusClient::connect(&addr.to_string()).await.unwrap();
    let consumer = BusClient::connect(&addr.to_string()).await.unwrap();

    let mut sub = consumer.subscribe(&["command.gamble"]).await.unwrap();

    for i in 0..100 {
        publisher
            .publish("command.gamble", &format!("envelope-{i}"))
            .await
            .unwrap();
    }

    for i in 0..100 {
        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("delivery should arrive")
            .expect("subscription should stay open");
        assert_eq!(delivery.topic, "command.gamble");
        assert_eq!(delivery.payload, format!("envelope-{i}"));
        assert!(delivery.pattern.is_none());
    }
}

#[tokio::test]
async fn every_subscriber_gets_exactly_one_copy() {
    let addr = start_broker().await;
    let publisher = BusClient::connect(&addr.to_string()).await.unwrap();
    let a = BusClient::connect(&addr.to_string()).await.unwrap();
    let b = BusClient::connect(&addr.to_string()).await.unwrap();

    let mut sub_a = a.subscribe(&["chat.received"]).await.unwrap();
    let mut sub_b = b.subscribe(&["chat.received"]).await.unwrap();

    publisher.publish("chat.received", "hello").await.unwrap();

    let got_a = tokio::time::timeout(Duration::from_secs(2), sub_a.recv())
        .await
        .unwrap()
        .unwrap();
    let got_b = tokio::time::timeout(Duration::from_secs(2), sub_b.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got_a.payload, "hello");
    assert_eq!(got_b.payload, "hello");

    // exactly one copy each
    publisher.publish("chat.send", "other topic").await.unwrap();
    let extra = tokio::time::timeout(Duration::from_millis(200), sub_a.recv()).await;
    assert!(extra.is_err(), "no second delivery expected on chat.received");
    drop(sub_b);
}

#[tokio::test]
async fn pattern_subscription_matches_one_segment() {
    let addr = start_broker().await;
    let publisher = BusClient::connect(&addr.to_string()).await.unwrap();
    let consumer = BusClient::connect(&addr.to_string()).await.unwrap();

    let mut sub = consumer.psubscribe(&["command.*"]).await.unwrap();

    publisher.publish("command.gamble", "a").await.unwrap();
    publisher.publish("command.fight.extra", "b").await.unwrap();
    publisher.publish("chat.received", "c").await.unwrap();
    publisher.publish("command.invest", "d").await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.topic, "command.gamble");
    assert_eq!(first.pattern.as_deref(), Some("command.*"));

    let second = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.topic, "command.invest");
}

#[tokio::test]
async fn late_subscribers_see_no_past_messages() {
    let addr = start_broker().await;
    let publisher = BusClient::connect(&addr.to_string()).await.unwrap();

    publisher.publish("chat.received", "before").await.unwrap();

    let consumer = BusClient::connect(&addr.to_string()).await.unwrap();
    let mut sub = consumer.subscribe(&["chat.received"]).await.unwrap();

    publisher.publish("chat.received", "after").await.unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.payload, "after");
}

#[tokio::test]
async fn unsubscribe_stops_deliveries() {
    let addr = start_broker().await;
    let publisher = BusClient::connect(&addr.to_string()).await.unwrap();
    let consumer = BusClient::connect(&addr.to_string()).await.unwrap();

    let mut sub = consumer.subscribe(&["chat.received"]).await.unwrap();
    publisher.publish("chat.received", "one").await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .is_some()
    );

    consumer.unsubscribe_all().await.unwrap();
    publisher.publish("chat.received", "two").await.unwrap();
    let after = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await;
    assert!(after.is_err(), "no delivery after unsubscribe");
}

#[tokio::test]
async fn kv_roundtrip_and_ttl() {
    let addr = start_broker().await;
    let client = BusClient::connect(&addr.to_string()).await.unwrap();

    client.set("user:alice", r#"{"name":"alice"}"#).await.unwrap();
    assert_eq!(
        client.get("user:alice").await.unwrap().as_deref(),
        Some(r#"{"name":"alice"}"#)
    );
    assert!(client.exists("user:alice").await.unwrap());
    assert!(client.del("user:alice").await.unwrap());
    assert!(!client.exists("user:alice").await.unwrap());
    assert_eq!(client.get("user:alice").await.unwrap(), None);

    let blob_key = keys::cache_blob("emotes", "42", "image");
    client.set_ex(&blob_key, "png-bytes", Duration::from_secs(1)).await.unwrap();
    assert!(client.exists(&blob_key).await.unwrap());
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(client.get(&blob_key).await.unwrap(), None);
}

#[tokio::test]
async fn keys_is_administrative_glob() {
    let addr = start_broker().await;
    let client = BusClient::connect(&addr.to_string()).await.unwrap();

    client.set("user:alice", "{}").await.unwrap();
    client.set("user:bob", "{}").await.unwrap();
    client.set("cache:last_cleared", "now").await.unwrap();

    let users = client.keys("user:*").await.unwrap();
    assert_eq!(users, vec!["user:alice".to_string(), "user:bob".to_string()]);
}

#[tokio::test]
async fn sorted_set_trim_keeps_most_recent() {
    let addr = start_broker().await;
    let client = BusClient::connect(&addr.to_string()).await.unwrap();

    let bound = 25i64;
    for i in 0..40 {
        client
            .zadd("messages:chat", 1000.0 + i as f64, &format!("msg-{i}"))
            .await
            .unwrap();
        let n = client.zcard("messages:chat").await.unwrap();
        if n > bound {
            client
                .zremrangebyrank("messages:chat", 0, n - bound - 1)
                .await
                .unwrap();
        }
    }

    assert_eq!(client.zcard("messages:chat").await.unwrap(), bound);
    let newest = client.zrevrange("messages:chat", 0, 0).await.unwrap();
    assert_eq!(newest, vec!["msg-39".to_string()]);
    let oldest_kept = client.zrevrange("messages:chat", -1, -1).await.unwrap();
    assert_eq!(oldest_kept, vec!["msg-15".to_string()]);
}

#[tokio::test]
async fn zremrangebyscore_removes_window() {
    let addr = start_broker().await;
    let client = BusClient::connect(&addr.to_string()).await.unwrap();

    for i in 0..10 {
        client
            .zadd("messages:system", i as f64, &format!("rec-{i}"))
            .await
            .unwrap();
    }
    let removed = client
        .zremrangebyscore("messages:system", 0.0, 4.0)
        .await
        .unwrap();
    assert_eq!(removed, 5);
    assert_eq!(client.zcard("messages:system").await.unwrap(), 5);
}

#[tokio::test]
async fn publisher_surfaces_failure_when_broker_is_unresponsive() {
    // Bound but never served: the TCP handshake lands in the backlog and no
    // request is ever answered.
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().unwrap();

    let client = BusClient::connect(&addr.to_string()).await.unwrap();

    // The publish must error (request timeout), never silently drop.
    let result = tokio::time::timeout(
        Duration::from_secs(8),
        client.publish("chat.send", "lost"),
    )
    .await;
    match result {
        Ok(outcome) => assert!(outcome.is_err()),
        Err(_) => panic!("publish should fail fast, not hang"),
    }
}
