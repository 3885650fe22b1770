// ABOUTME: End-to-end tests mirroring a SQLite source into a SQLite store via a config file
// ABOUTME: Exercises config loading, fetcher/store construction, and count-all delete detection

use std::fs;
use std::path::Path;

use collection_replicator::config::ReplicationConfig;
use rusqlite::Connection;
use tempfile::TempDir;

fn create_source(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER NOT NULL);
         INSERT INTO users VALUES (1, 'alice', 1);
         INSERT INTO users VALUES (2, 'bob', 1);
         INSERT INTO users VALUES (3, 'carol', 1);
         INSERT INTO users VALUES (4, 'dave', 0);",
    )
    .unwrap();
    conn
}

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let text = format!(
        r#"
[engine]
yield_every = 2
yield_delay_ms = 0
idle_delay_ms = 0

[[sources]]
name = "users"
delay_seconds = 60
args = ["SELECT id, name FROM users WHERE active = ?1 ORDER BY id", 1]

[sources.fetch]
kind = "sqlite"
path = "{source}"

[sources.store]
kind = "sqlite"
path = "{mirror}"
table = "users_mirror"
"#,
        source = dir.path().join("source.db").display(),
        mirror = dir.path().join("mirror").join("mirror.db").display(),
    );
    let path = dir.path().join("replication.toml");
    fs::write(&path, text).unwrap();
    path
}

#[tokio::test]
async fn test_sqlite_source_mirrors_into_sqlite_store() {
    let dir = TempDir::new().unwrap();
    let source = create_source(&dir.path().join("source.db"));
    let config_path = write_config(&dir);
    let config = ReplicationConfig::load(&config_path).unwrap();

    // First run: everything active is inserted
    {
        let (mut scheduler, collections) = config.build(false).unwrap();
        let stats = scheduler.run_round().await;
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.failures, 0);

        let users = &collections[0];
        assert_eq!(users.name(), "users");
        let mut keys = users.store().keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["1", "2", "3"]);
        let doc = users.store().get("2").unwrap().unwrap();
        assert_eq!(doc["name"], serde_json::json!("bob"));
        assert!(users.store().fast_count().is_none());
    }

    source
        .execute_batch(
            "UPDATE users SET name = 'robert' WHERE id = 2;
             DELETE FROM users WHERE id = 3;",
        )
        .unwrap();

    // A restarted process picks up the persisted mirror and converges it
    let (mut scheduler, collections) = config.build(false).unwrap();
    scheduler.run_round().await;

    let status = scheduler.status();
    let outcome = status[0].last_outcome.as_ref().unwrap();
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.deleted, 1);
    assert!(outcome.delete_scanned);

    let users = &collections[0];
    let mut keys = users.store().keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["1", "2"]);
    let doc = users.store().get("2").unwrap().unwrap();
    assert_eq!(doc["name"], serde_json::json!("robert"));
}

#[tokio::test]
async fn test_missing_source_database_fails_build() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir);
    let config = ReplicationConfig::load(&config_path).unwrap();

    assert!(config.build(false).is_err());
}

#[test]
fn test_load_reports_missing_file() {
    let err = ReplicationConfig::load(Path::new("/nonexistent/replication.toml")).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read config file"));
}
