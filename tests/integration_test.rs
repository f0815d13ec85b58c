//! Integration tests for convo-cache
//!
//! These exercise the library end to end over a real SQLite history file, and
//! the CLI binary over a temporary state directory.

use assert_cmd::Command;
use chrono::{DateTime, TimeZone, Utc};
use convo_cache::adapter::{ChatListAdapter, DisplayKind, ListChange};
use convo_cache::config::Config;
use convo_cache::consolidate::{merge_sequential, tail_merge};
use convo_cache::history::SqliteHistory;
use convo_cache::message::{Message, MessageKind, ReceiptStatus};
use convo_cache::registry::{ActiveSessionRegistry, ChatMode};
use convo_cache::session::{PageLoader, SessionState};
use convo_cache::store::MessageStore;
use predicates::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const BOB: &str = "bob@example.org";
const ME: &str = "me@example.org";
const BASE_MS: i64 = 1_700_000_000_000;

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(BASE_MS + ms).unwrap()
}

fn inc(uid: &str, ms: i64, body: &str) -> Message {
    Message::incoming(uid, BOB, at(ms), body).with_sender_name("Bob")
}

fn out(uid: &str, ms: i64, body: &str) -> Message {
    Message::outgoing(uid, ME, at(ms), body).with_receipt(ReceiptStatus::ServerSent)
}

/// `n` messages two minutes apart, alternating direction, so none merge
fn conversation(n: i64) -> Vec<Message> {
    (0..n)
        .map(|i| {
            let uid = format!("m{:02}", i);
            if i % 2 == 0 {
                inc(&uid, i * 120_000, "ping")
            } else {
                out(&uid, i * 120_000, "pong")
            }
        })
        .collect()
}

fn history_with(temp_dir: &TempDir, msgs: &[Message]) -> (Config, Arc<SqliteHistory>) {
    let config = Config::for_test(temp_dir.path());
    let history = SqliteHistory::new(&config.history_db);
    history.init().unwrap();
    history.insert_messages(BOB, msgs).unwrap();
    (config, Arc::new(history))
}

/// Scrolling to the top loads the next 30 older messages
#[test]
fn test_scroll_to_top_loads_next_page() {
    let temp_dir = TempDir::new().unwrap();
    let (config, history) = history_with(&temp_dir, &conversation(60));
    let mut adapter = ChatListAdapter::new(MessageStore::new(BOB, history, &config));

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    adapter.subscribe(move |c: &ListChange| sink.lock().unwrap().push(c.clone()));

    assert_eq!(adapter.load_page(true).len(), 30);
    assert_eq!(adapter.count(), 30);
    assert_eq!(adapter.store().boundary(), Some(at(30 * 120_000)));

    let older = adapter.load_page(false);
    assert_eq!(older.len(), 30);
    assert_eq!(adapter.count(), 60);
    assert_eq!(adapter.message_at(0).unwrap().uid, "m00");
    assert_eq!(
        *changes.lock().unwrap(),
        vec![
            ListChange::Prepended { added: 30 },
            ListChange::Prepended { added: 30 }
        ]
    );

    // Nothing older left
    assert!(adapter.load_page(false).is_empty());
    assert_eq!(adapter.count(), 60);
}

/// A deleted message at the top of the list stays gone when scrolling further
#[test]
fn test_deleted_top_message_not_reloaded() {
    let temp_dir = TempDir::new().unwrap();
    let (config, history) = history_with(&temp_dir, &conversation(60));
    let mut adapter = ChatListAdapter::new(MessageStore::new(BOB, history, &config));
    adapter.load_page(true);

    let ids: HashSet<String> = ["m30".to_string()].into_iter().collect();
    assert_eq!(adapter.delete_by_ids(&ids), 1);
    assert_eq!(adapter.message_at(0).unwrap().uid, "m31");

    let older = adapter.load_page(false);
    assert_eq!(older.len(), 30);
    assert_eq!(older.last().unwrap().uid, "m29");
    assert_eq!(adapter.count(), 59);
    assert!(!adapter.units().iter().any(|u| u.has_seen("m30")));
}

/// The older page's last message merges into the unit at the top of the list
#[test]
fn test_next_page_merges_into_boundary_unit() {
    let temp_dir = TempDir::new().unwrap();
    let mut msgs = conversation(60);
    // m29 becomes an incoming message 10s before incoming m30
    msgs[29] = inc("m29", 30 * 120_000 - 10_000, "ping before");
    let (config, history) = history_with(&temp_dir, &msgs);
    let mut adapter = ChatListAdapter::new(MessageStore::new(BOB, history, &config));

    adapter.load_page(true);
    assert_eq!(adapter.count(), 30);
    adapter.load_page(false);
    assert_eq!(adapter.count(), 59);

    let boundary = adapter.unit(29).unwrap();
    assert_eq!(boundary.message_ids(), vec!["m29", "m30"]);
    assert_eq!(boundary.body(), "ping before<br/>ping");
}

#[test]
fn test_tail_merge_orders_history_before_cache() {
    let window = 60_000;
    let history = merge_sequential(Vec::new(), &[inc("h1", 0, "h1"), out("h2", 1_000, "h2")], window);
    let cache = merge_sequential(Vec::new(), &[inc("c1", 300_000, "c1")], window);

    let merged = tail_merge(history.clone(), cache, window);
    let ids: Vec<&str> = merged.iter().map(|u| u.root().uid.as_str()).collect();
    assert_eq!(ids, vec!["h1", "h2", "c1"]);

    // Re-running the merge changes nothing
    assert_eq!(tail_merge(history, merged.clone(), window), merged);
}

#[test]
fn test_live_correction_and_receipts() {
    let temp_dir = TempDir::new().unwrap();
    let (config, history) = history_with(&temp_dir, &[]);
    let mut adapter = ChatListAdapter::new(MessageStore::new(BOB, history, &config));
    adapter.load_page(true);

    adapter.append_live(out("x", 0, "helo"));
    adapter.append_live(out("y", 5_000, "how are yuo"));
    adapter.append_live(inc("z", 10_000, "fine"));

    let target = adapter.last_outgoing_for_correction().unwrap().uid.clone();
    assert_eq!(target, "y");
    adapter.set_correction_target(Some(target.clone()));
    assert_eq!(
        adapter.classify(adapter.unit(0).unwrap()),
        DisplayKind::CorrectedOutgoing
    );

    adapter.append_live(out("y2", 20_000, "how are you").correcting(target));
    adapter.set_correction_target(None);
    assert_eq!(adapter.count(), 2);
    assert_eq!(adapter.unit(0).unwrap().body(), "helo<br/>how are you");
    assert_eq!(adapter.classify(adapter.unit(0).unwrap()), DisplayKind::Outgoing);

    assert!(adapter
        .update_delivery_receipt("x", ReceiptStatus::Delivered)
        .is_some());
    assert_eq!(
        adapter.unit(0).unwrap().receipt_status(),
        ReceiptStatus::ServerSent
    );
    assert!(adapter
        .update_delivery_receipt("y", ReceiptStatus::Delivered)
        .is_none());
}

#[test]
fn test_non_merge_kinds_stay_separate() {
    let temp_dir = TempDir::new().unwrap();
    let system = Message::new("s", BOB, MessageKind::System, at(1_000), "Bob is now online");
    let msgs = vec![
        inc("a", 0, "hi"),
        system,
        inc("b", 2_000, "I'm at LatLng: 48.85N, 2.35E"),
        inc("c", 3_000, "https://upload.example.org/cat.png"),
        inc("d", 4_000, "bye"),
    ];
    let (config, history) = history_with(&temp_dir, &msgs);
    let mut adapter = ChatListAdapter::new(MessageStore::new(BOB, history, &config));
    adapter.load_page(true);

    assert_eq!(adapter.count(), 5);
    assert_eq!(adapter.classify(adapter.unit(1).unwrap()), DisplayKind::System);
    let loc = adapter.unit(2).unwrap().location().unwrap();
    assert!((loc.latitude - 48.85).abs() < 1e-9);
    assert_eq!(adapter.locations_of_kind(MessageKind::Incoming).len(), 1);
}

#[test]
fn test_purge_removes_from_view_and_history() {
    let temp_dir = TempDir::new().unwrap();
    let (config, history) = history_with(&temp_dir, &conversation(4));
    let mut adapter = ChatListAdapter::new(MessageStore::new(BOB, history, &config));
    adapter.load_page(true);

    let ids: HashSet<String> = ["m01".to_string(), "m02".to_string()].into_iter().collect();
    assert_eq!(adapter.purge_by_ids(&ids), 2);
    assert_eq!(adapter.count(), 2);

    // A fresh view over the same file no longer sees them
    let history = Arc::new(SqliteHistory::new(&config.history_db));
    let mut fresh = ChatListAdapter::new(MessageStore::new(BOB, history, &config));
    let ids: Vec<String> = fresh.load_page(true).into_iter().map(|m| m.uid).collect();
    assert_eq!(ids, vec!["m00", "m03"]);
}

#[tokio::test]
async fn test_registry_sessions_load_in_background() {
    let temp_dir = TempDir::new().unwrap();
    let (config, history) = history_with(&temp_dir, &conversation(45));
    let registry = ActiveSessionRegistry::new(&config, history);

    let session = registry.open(BOB, Some("Bob"), ChatMode::Single).unwrap();
    registry.set_current(Some(BOB)).unwrap();

    let loader = PageLoader::new(Arc::clone(&session));
    assert_eq!(loader.load(true).await.unwrap().len(), 30);
    assert_eq!(loader.load(false).await.unwrap().len(), 15);
    assert_eq!(session.lock().state(), SessionState::Ready);
    assert_eq!(session.lock().adapter().count(), 45);

    // Re-entering the conversation reuses the cache
    let again = registry.open(BOB, None, ChatMode::Single).unwrap();
    assert!(Arc::ptr_eq(&session, &again));
    assert_eq!(loader.load(true).await.unwrap().len(), 45);

    registry.dispose();
    assert!(matches!(
        loader.load(true).await,
        Err(convo_cache::Error::SessionClosed(_))
    ));
}

// ============================================================================
// CLI
// ============================================================================

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.json");
    let config = serde_json::json!({ "state_dir": dir.join("state") });
    std::fs::write(&path, config.to_string()).unwrap();
    path
}

fn cli(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("convo-cache").unwrap();
    cmd.arg("--config").arg(config).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_import_and_show() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());

    cli(&config)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("History database ready"));

    let msgs = vec![
        inc("a", 0, "hello"),
        inc("b", 20_000, "again"),
        out("c", 300_000, "hi Bob"),
    ];
    let file = temp_dir.path().join("msgs.json");
    std::fs::write(&file, serde_json::to_string(&msgs).unwrap()).unwrap();

    cli(&config)
        .args(["import", BOB])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 3 messages"));

    cli(&config)
        .args(["show", BOB])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello<br/>again"))
        .stdout(predicate::str::contains("outgoing"));

    cli(&config)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("* {}", BOB)));

    cli(&config)
        .args(["delete", BOB, "b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 1"));
}

#[test]
fn test_cli_show_without_database_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());

    cli(&config)
        .args(["show", BOB])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no history database"));
}

#[test]
fn test_cli_rejects_bad_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, r#"{ "history_chunk_size": 0 }"#).unwrap();

    cli(&path)
        .arg("sessions")
        .assert()
        .failure()
        .stderr(predicate::str::contains("history_chunk_size"));
}
