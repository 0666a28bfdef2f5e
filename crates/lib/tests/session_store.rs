//! Integration tests for the SQLite session store: history written by the agent
//! path, rows written by other tools, and fail-soft reads.

use lib::session::{Content, Role, SessionStore};
use rusqlite::{params, Connection};

fn temp_store() -> (SessionStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(dir.path().join("data").join("conversations.db"));
    (store, dir)
}

fn raw(store: &SessionStore) -> Connection {
    Connection::open(store.path()).expect("open raw connection")
}

#[test]
fn missing_database_reads_empty_and_is_not_created() {
    let (store, _dir) = temp_store();
    assert!(store.list_sessions(50).is_empty());
    assert!(store.get_messages("nope").is_empty());
    assert!(!store.session_exists("nope"));
    assert!(!store.delete_session("nope"));
    assert!(!store.path().exists());
}

#[test]
fn one_turn_lists_with_preview_and_messages_in_order() {
    let (store, _dir) = temp_store();
    store
        .append_messages(
            "s1",
            &[
                (Role::User, Content::from("Hi")),
                (Role::Assistant, Content::from("Hello!")),
            ],
        )
        .expect("append");

    let sessions = store.list_sessions(50);
    assert_eq!(sessions.len(), 1);
    let s = &sessions[0];
    assert_eq!(s.session_id, "s1");
    assert_eq!(s.message_count, 2);
    assert_eq!(s.first_message.as_deref(), Some("Hi"));
    assert_eq!(s.preview(), "Hi");
    assert!(s.created_at.is_some());

    let messages = store.get_messages("s1");
    let pairs: Vec<(Role, String)> = messages
        .iter()
        .map(|m| (m.role, m.content.to_plain_text()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (Role::User, "Hi".to_string()),
            (Role::Assistant, "Hello!".to_string())
        ]
    );
}

#[test]
fn most_recently_updated_session_listed_first_and_limit_applies() {
    let (store, _dir) = temp_store();
    store.init().expect("init");
    let conn = raw(&store);
    for (id, updated) in [
        ("old", "2024-01-01 10:00:00"),
        ("new", "2024-03-01 10:00:00"),
        ("mid", "2024-02-01 10:00:00"),
    ] {
        conn.execute(
            "INSERT INTO agent_sessions (session_id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![id, updated],
        )
        .expect("insert session");
    }

    let ids: Vec<String> = store
        .list_sessions(50)
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(ids, vec!["new", "mid", "old"]);
    assert_eq!(store.list_sessions(2).len(), 2);

    // Appending to an old session moves it to the top.
    store
        .append_message("old", Role::User, &Content::from("bump"))
        .expect("append");
    assert_eq!(store.list_sessions(1)[0].session_id, "old");
}

#[test]
fn long_first_message_truncated_and_fallback_labels() {
    let (store, _dir) = temp_store();
    let long = "x".repeat(60);
    store
        .append_message("long", Role::User, &Content::from(long.as_str()))
        .expect("append");
    store
        .append_message("assistant-first", Role::Assistant, &Content::from("I speak first"))
        .expect("append");

    let sessions = store.list_sessions(50);
    let by_id = |id: &str| sessions.iter().find(|s| s.session_id == id).expect("listed");

    let preview = by_id("long").preview();
    assert_eq!(preview, format!("{}...", "x".repeat(50)));

    let fallback = by_id("assistant-first");
    assert_eq!(fallback.first_message, None);
    assert!(fallback.preview().starts_with("Conversation "));
}

#[test]
fn malformed_rows_are_skipped() {
    let (store, _dir) = temp_store();
    store
        .append_message("s1", Role::User, &Content::from("good"))
        .expect("append");
    let conn = raw(&store);
    for data in [
        "not json",
        r#"{"role":"narrator","content":"x"}"#,
        r#"{"content":"no role"}"#,
    ] {
        conn.execute(
            "INSERT INTO agent_messages (session_id, message_data, created_at) VALUES ('s1', ?1, '2024-01-01 00:00:00')",
            params![data],
        )
        .expect("insert");
    }
    conn.execute(
        "INSERT INTO agent_messages (session_id, message_data, created_at) VALUES ('s1', ?1, 'yesterday')",
        params![r#"{"role":"user","content":"bad time"}"#],
    )
    .expect("insert");
    conn.execute(
        "INSERT INTO agent_messages (session_id, message_data, created_at) VALUES ('s1', ?1, '2030-01-01T00:00:00')",
        params![r#"{"role":"assistant","content":[{"type":"text","text":"blocks"}],"extra":1}"#],
    )
    .expect("insert");

    let texts: Vec<String> = store
        .get_messages("s1")
        .iter()
        .map(|m| m.content.to_plain_text())
        .collect();
    assert_eq!(texts, vec!["good", "blocks"]);
    assert_eq!(store.list_sessions(50)[0].message_count, 6);
}

#[test]
fn delete_removes_session_and_messages_only_once() {
    let (store, _dir) = temp_store();
    store
        .append_message("keep", Role::User, &Content::from("a"))
        .expect("append");
    store
        .append_message("drop", Role::User, &Content::from("b"))
        .expect("append");

    assert!(store.session_exists("drop"));
    assert!(store.delete_session("drop"));
    assert!(!store.session_exists("drop"));
    assert!(store.get_messages("drop").is_empty());
    assert!(!store.delete_session("drop"));

    let remaining: i64 = raw(&store)
        .query_row(
            "SELECT COUNT(*) FROM agent_messages WHERE session_id = 'drop'",
            [],
            |row| row.get(0),
        )
        .expect("count");
    assert_eq!(remaining, 0);
    assert_eq!(store.list_sessions(50).len(), 1);
}

#[test]
fn appended_messages_round_trip_in_order() {
    let (store, _dir) = temp_store();
    let blocks: Content = serde_json::from_str(
        r#"[{"type":"output_text","text":"Part one"},{"type":"output_text","text":"Part two"}]"#,
    )
    .expect("blocks");
    let turns = vec![
        (Role::User, Content::from("first")),
        (Role::Assistant, blocks),
        (Role::User, Content::from("second")),
        (Role::Assistant, Content::from("third")),
    ];
    store.append_messages("s1", &turns[..2]).expect("append");
    for (role, content) in &turns[2..] {
        store.append_message("s1", *role, content).expect("append");
    }

    let messages = store.get_messages("s1");
    assert_eq!(messages.len(), turns.len());
    for (m, (role, content)) in messages.iter().zip(&turns) {
        assert_eq!(m.role, *role);
        assert_eq!(&m.content, content);
    }
    assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[test]
fn empty_or_foreign_database_file_lists_nothing() {
    let (store, dir) = temp_store();
    std::fs::create_dir_all(dir.path().join("data")).expect("mkdir");
    std::fs::write(store.path(), b"").expect("empty file");
    assert!(store.list_sessions(50).is_empty());
    assert!(!store.delete_session("s1"));

    std::fs::write(store.path(), b"definitely not sqlite").expect("garbage");
    assert!(store.list_sessions(50).is_empty());
    assert!(store.get_messages("s1").is_empty());
}

#[test]
fn mixed_timestamp_forms_sort_by_time_not_text() {
    let (store, _dir) = temp_store();
    store.init().expect("init");
    let conn = raw(&store);
    conn.execute_batch(
        "INSERT INTO agent_sessions (session_id, created_at, updated_at)
            VALUES ('older', '2024-01-02T03:00:00', '2024-01-02T03:00:00');
        INSERT INTO agent_sessions (session_id, created_at, updated_at)
            VALUES ('newer', '2024-01-02 01:00:00', '2024-01-02 04:00:00.000');",
    )
    .expect("sessions");
    // Inserted newest first so that id order disagrees with time order.
    for (text, created_at) in [
        ("fourth", "2024-01-02 03:04:08"),
        ("third", "2024-01-02T05:04:07+02:00"),
        ("second", "2024-01-02 03:04:06.000"),
        ("first", "2024-01-02T03:04:05"),
    ] {
        conn.execute(
            "INSERT INTO agent_messages (session_id, message_data, created_at)
                VALUES ('newer', ?1, ?2)",
            params![
                serde_json::json!({"role": "user", "content": text}).to_string(),
                created_at
            ],
        )
        .expect("message");
    }

    let texts: Vec<String> = store
        .get_messages("newer")
        .iter()
        .map(|m| m.content.to_plain_text())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third", "fourth"]);

    let sessions = store.list_sessions(50);
    let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["newer", "older"]);
    assert_eq!(sessions[0].first_message.as_deref(), Some("first"));
}
