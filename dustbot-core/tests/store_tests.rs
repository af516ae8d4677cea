//! tests/store_tests.rs

use std::net::SocketAddr;

use dustbot_bus::{Broker, BusClient};
use dustbot_common::error::Error;
use dustbot_common::keys;
use dustbot_core::history::{HistoryBounds, HistoryClass, HistoryStore};
use dustbot_core::user_store::UserStore;

async fn start_bus() -> (SocketAddr, BusClient) {
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().unwrap();
    tokio::spawn(broker.run());
    let client = BusClient::connect(&addr.to_string()).await.unwrap();
    (addr, client)
}

#[tokio::test]
async fn get_or_create_is_idempotent() {
    let (_, bus) = start_bus().await;
    let store = UserStore::new(bus);

    let first = store.get_or_create("Alice", "Alice").await.unwrap();
    let second = store.get_or_create("alice", "Alice").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.name, "alice");
    assert_eq!(first.log.chat, 0);
    assert_eq!(first.log.command, 0);
    assert!(first.dustbunnies.is_none());
}

#[tokio::test]
async fn single_writer_increments_sum() {
    let (_, bus) = start_bus().await;
    let store = UserStore::new(bus);

    let increments = [3i64, 7, 11, 1, 20];
    for n in increments {
        store
            .update("bob", "Bob", |user| {
                user.credit(n);
                Ok(())
            })
            .await
            .unwrap();
    }

    let user = store.get("bob").await.unwrap().unwrap();
    assert_eq!(user.balance(), increments.iter().sum::<i64>());
}

#[tokio::test]
async fn failed_debit_mutates_nothing() {
    let (_, bus) = start_bus().await;
    let store = UserStore::new(bus);

    store
        .update("carol", "Carol", |user| {
            user.credit(100);
            Ok(())
        })
        .await
        .unwrap();

    let result = store
        .update("carol", "Carol", |user| {
            user.debit(500)?;
            user.gambling_mut().input += 500;
            Ok(())
        })
        .await;

    assert!(matches!(
        result,
        Err(Error::InsufficientFunds {
            requested: 500,
            held: 100
        })
    ));

    let user = store.get("carol").await.unwrap().unwrap();
    assert_eq!(user.balance(), 100);
    assert!(user.gambling.is_none(), "aborted write must persist nothing");
}

#[tokio::test]
async fn legacy_keys_fold_into_aggregate() {
    let (_, bus) = start_bus().await;

    bus.set(
        "dustbunnies:dusty",
        r#"{"name":"dusty","display_name":"Dusty","collected_dustbunnies":250,"message_count":40}"#,
    )
    .await
    .unwrap();
    bus.set(
        "banking:dusty",
        r#"{"points_invested":90,"total_bunnies_collected":12,"last_interest_collected":3}"#,
    )
    .await
    .unwrap();
    bus.set("global:dusty", r#"{"lurk":4,"unlurk":2}"#).await.unwrap();

    let store = UserStore::new(bus.clone());
    let user = store.get_or_create("dusty", "Dusty").await.unwrap();

    assert_eq!(user.balance(), 250);
    assert_eq!(user.banking.as_ref().unwrap().bunnies_invested, 90);
    assert_eq!(user.log.lurk, 4);
    assert_eq!(user.log.unlurk, 2);

    // legacy keys are gone and the fold does not repeat
    assert!(!bus.exists("dustbunnies:dusty").await.unwrap());
    assert!(!bus.exists("banking:dusty").await.unwrap());
    assert!(!bus.exists("global:dusty").await.unwrap());

    let again = store.get_or_create("dusty", "Dusty").await.unwrap();
    assert_eq!(again, user);
}

#[tokio::test]
async fn history_evicts_oldest_beyond_bound() {
    let (_, bus) = start_bus().await;
    let bounds = HistoryBounds {
        all: 50,
        chat: 50,
        command: 50,
        system: 50,
        admin: 50,
    };
    let history = HistoryStore::with_bounds(bus.clone(), bounds);

    for i in 0..60 {
        let payload = format!(
            r#"{{"type":"chat","source":"twitch","timestamp":"2026-01-01T00:00:00Z","content":"m{i}"}}"#
        );
        history
            .append(HistoryClass::Chat, None, &payload)
            .await
            .unwrap();
    }

    assert_eq!(bus.zcard(keys::MESSAGES_CHAT).await.unwrap(), 50);
    assert_eq!(bus.zcard(keys::MESSAGES_ALL).await.unwrap(), 50);

    let recent = history.recent(HistoryClass::Chat, 1).await.unwrap();
    assert!(recent[0].contains("\"content\":\"m59\""));

    let all = history.recent(HistoryClass::Chat, 50).await.unwrap();
    assert!(!all.iter().any(|m| m.contains("\"content\":\"m0\"")));
    assert!(!all.iter().any(|m| m.contains("\"content\":\"m9\"")));
    assert!(all.iter().any(|m| m.contains("\"content\":\"m10\"")));
}

#[tokio::test]
async fn per_name_history_set_is_written() {
    let (_, bus) = start_bus().await;
    let history = HistoryStore::new(bus.clone());

    let payload = r#"{"type":"command","source":"twitch","timestamp":"2026-01-01T00:00:00Z","content":"50"}"#;
    history
        .append(HistoryClass::Command, Some("gamble"), payload)
        .await
        .unwrap();

    assert_eq!(bus.zcard("commands:gamble").await.unwrap(), 1);
    assert_eq!(bus.zcard(keys::MESSAGES_COMMAND).await.unwrap(), 1);

    history
        .append(HistoryClass::System, Some("supervisor"), r#"{"content":"up"}"#)
        .await
        .unwrap();
    assert_eq!(bus.zcard("system:supervisor").await.unwrap(), 1);
}
