use std::time::{SystemTime, UNIX_EPOCH};

use rqlite_http::{
    BackupFormat, BackupOptions, Connection, ExecuteManyOptions, ExecuteOptions, RqliteError,
    Value,
};

/// Comma-separated node base URLs of a live cluster, e.g.
/// `RQLITE_HOSTS=http://localhost:4001,http://localhost:4003`.
fn load_live_hosts() -> Result<Vec<String>, String> {
    let raw = std::env::var("RQLITE_HOSTS")
        .map_err(|_| "RQLITE_HOSTS env is required for live tests".to_owned())?;
    let hosts: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
        .collect();
    if hosts.is_empty() {
        return Err("RQLITE_HOSTS contained no host URLs".to_owned());
    }
    Ok(hosts)
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be after epoch")
        .as_millis()
}

#[tokio::test]
async fn live_roundtrip_bulk_error_and_backup() {
    let hosts = match load_live_hosts() {
        Ok(hosts) => hosts,
        Err(_) => {
            eprintln!("skipping live test: RQLITE_HOSTS not set");
            return;
        }
    };

    let db = Connection::new(&hosts).expect("connection must build");
    let table = format!("users_live_{}", unique_suffix());

    db.execute(
        &format!("CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"),
        (),
        ExecuteOptions::default(),
    )
    .await
    .expect("table creation must succeed");

    let written = db
        .execute(
            &format!("INSERT INTO {table} (name) VALUES (?)"),
            [Value::text("Kit")],
            ExecuteOptions::default(),
        )
        .await
        .expect("insert must succeed");
    assert_eq!(written.rows_affected(), Some(1));

    let read = db
        .execute(
            &format!("SELECT id, name FROM {table} WHERE name = ?"),
            [Value::text("Kit")],
            ExecuteOptions::default(),
        )
        .await
        .expect("read must succeed");
    assert_eq!(read.results().map(<[_]>::len), Some(1));

    let bulk = db
        .execute_many(
            [
                (
                    format!("INSERT INTO {table} (name) VALUES (?)"),
                    [Value::text("BatchA")],
                ),
                (
                    format!("INSER INTO {table} (name) VALUES (?)"),
                    [Value::text("BatchB")],
                ),
            ],
            ExecuteManyOptions {
                raise_on_error: false,
                ..ExecuteManyOptions::default()
            },
        )
        .await
        .expect("bulk must return per-item outcomes");
    assert!(bulk.first_error().is_some());

    let path = std::env::temp_dir().join(format!("rqlite_http_live_{}.db", unique_suffix()));
    db.backup_to_file(BackupFormat::Binary, &path, BackupOptions::default())
        .await
        .expect("backup must succeed");
    let snapshot = tokio::fs::read(&path).await.expect("snapshot must exist");
    assert_eq!(&snapshot[..16], b"SQLite format 3\0");
    tokio::fs::remove_file(&path).await.expect("cleanup");

    let cleanup = db
        .execute(
            &format!("DROP TABLE IF EXISTS {table}"),
            (),
            ExecuteOptions::default(),
        )
        .await;
    if let Err(RqliteError::Sql { message, .. }) = cleanup {
        panic!("cleanup failed with sql error: {message}");
    }
}
