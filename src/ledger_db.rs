use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

pub(crate) const ADMIN_DATA_TABLES: &[&str] = &[
    "customers",
    "spaces",
    "assignments",
    "payments",
    "external_invoices",
    "manual_links",
    "import_jobs",
];

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init.sql",
        include_str!("../db/migrations/0001_init.sql"),
    ),
    (
        "0002_external_invoices_and_links.sql",
        include_str!("../db/migrations/0002_external_invoices_and_links.sql"),
    ),
];

#[derive(Debug, Serialize)]
pub struct LedgerDbStatus {
    pub db_path: String,
    pub exists: bool,
    pub migration_files: Vec<String>,
    pub applied_versions: Vec<String>,
    pub pending_versions: Vec<String>,
    pub schema_migrations_table_exists: bool,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
    pub pending_total: usize,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminDbTableCountRow {
    pub table: String,
    pub row_count: i64,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminDbStatsResult {
    pub db_path: String,
    pub table_count: usize,
    pub total_rows: i64,
    pub rows: Vec<LedgerAdminDbTableCountRow>,
}

/// Opens a connection with foreign keys enforced; used by every writer.
pub(crate) fn open_ledger_connection(db_path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(db_path).map_err(|e| format!("open database failed: {e}"))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| format!("enable foreign_keys failed: {e}"))?;
    Ok(conn)
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn has_schema_migrations_table(conn: &Connection) -> rusqlite::Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations')",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v != 0)?;
    Ok(exists)
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

pub(crate) fn list_non_system_tables(conn: &Connection) -> Result<HashSet<String>, String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
        .map_err(|e| format!("read sqlite_master failed: {e}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| format!("query sqlite_master failed: {e}"))?;
    let mut names = HashSet::new();
    for row in rows {
        names.insert(row.map_err(|e| format!("read table name failed: {e}"))?);
    }
    Ok(names)
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn query_admin_db_stats_at_path(db_path: &Path) -> Result<LedgerAdminDbStatsResult, String> {
    if !db_path.exists() {
        return Err(format!("database not found: {}", db_path.to_string_lossy()));
    }

    let conn = Connection::open(db_path).map_err(|e| format!("open database failed: {e}"))?;
    let existing = list_non_system_tables(&conn)?;

    let mut rows = Vec::new();
    let mut total_rows = 0_i64;
    for table in ADMIN_DATA_TABLES {
        if !existing.contains(*table) {
            continue;
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row_count = conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .map_err(|e| format!("count rows of {table} failed: {e}"))?;
        total_rows += row_count;
        rows.push(LedgerAdminDbTableCountRow {
            table: (*table).to_string(),
            row_count,
        });
    }

    Ok(LedgerAdminDbStatsResult {
        db_path: db_path.to_string_lossy().to_string(),
        table_count: rows.len(),
        total_rows,
        rows,
    })
}

pub fn inspect_status_at_path(db_path: &Path) -> Result<LedgerDbStatus, String> {
    let migration_files = MIGRATIONS
        .iter()
        .map(|(v, _)| (*v).to_string())
        .collect::<Vec<_>>();
    if !db_path.exists() {
        return Ok(LedgerDbStatus {
            db_path: db_path.to_string_lossy().to_string(),
            exists: false,
            migration_files: migration_files.clone(),
            applied_versions: Vec::new(),
            pending_versions: migration_files,
            schema_migrations_table_exists: false,
            ready: false,
        });
    }

    let conn = Connection::open(db_path).map_err(|e| format!("open database failed: {e}"))?;
    let schema_table_exists = has_schema_migrations_table(&conn)
        .map_err(|e| format!("check schema_migrations failed: {e}"))?;

    let applied_versions = if schema_table_exists {
        load_applied_versions(&conn).map_err(|e| format!("read schema_migrations failed: {e}"))?
    } else {
        Vec::new()
    };
    let applied_set = applied_versions.iter().cloned().collect::<HashSet<_>>();
    let pending_versions = migration_files
        .iter()
        .filter(|v| !applied_set.contains(*v))
        .cloned()
        .collect::<Vec<_>>();

    Ok(LedgerDbStatus {
        db_path: db_path.to_string_lossy().to_string(),
        exists: true,
        migration_files,
        applied_versions,
        pending_versions: pending_versions.clone(),
        schema_migrations_table_exists: schema_table_exists,
        ready: pending_versions.is_empty(),
    })
}

pub fn apply_embedded_migrations(db_path: &Path) -> Result<LedgerDbMigrateResult, String> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("create database directory failed: {e}"))?;
        }
    }

    let mut conn = open_ledger_connection(db_path)?;
    ensure_schema_migrations_table(&conn)
        .map_err(|e| format!("initialise schema_migrations failed: {e}"))?;

    let already = load_applied_versions(&conn)
        .map_err(|e| format!("read applied migrations failed: {e}"))?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();

    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn
            .transaction()
            .map_err(|e| format!("begin migration transaction failed ({version}): {e}"))?;
        tx.execute_batch(sql)
            .map_err(|e| format!("run migration failed ({version}): {e}"))?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )
        .map_err(|e| format!("record schema_migrations failed ({version}): {e}"))?;
        tx.commit()
            .map_err(|e| format!("commit migration failed ({version}): {e}"))?;
        log::info!("applied migration {version} to {}", db_path.to_string_lossy());
        applied_now.push((*version).to_string());
    }

    let final_applied_total = load_applied_versions(&conn)
        .map_err(|e| format!("read migration result failed: {e}"))?
        .len();
    let pending_total = MIGRATIONS.len().saturating_sub(final_applied_total);

    Ok(LedgerDbMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total: final_applied_total,
        pending_total,
    })
}
