use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::ledger_db::{inspect_status_at_path, query_admin_db_stats_at_path, quote_ident};
use crate::pending_rent::{query_pending_rent_at_db_path, PendingRentQueryRequest};
use crate::period::PeriodKey;
use crate::reconciliation::{query_reconciliation_at_db_path, ReconciliationQueryRequest};

fn table_exists(conn: &Connection, table: &str) -> Result<bool, String> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|e| format!("check table exists failed ({table}): {e}"))?;
    Ok(exists != 0)
}

fn count_rows_if_exists(conn: &Connection, table: &str) -> Result<Option<i64>, String> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let count = conn
        .query_row(&sql, [], |row| row.get::<_, i64>(0))
        .map_err(|e| format!("count rows failed ({table}): {e}"))?;
    Ok(Some(count))
}

fn push_table_probe(
    checks: &mut Map<String, Value>,
    failures: &mut Vec<String>,
    conn: &Connection,
    check_name: &str,
    table: &str,
) {
    match count_rows_if_exists(conn, table) {
        Ok(Some(row_count)) => {
            checks.insert(
                check_name.to_string(),
                json!({
                    "ok": true,
                    "rows": row_count,
                }),
            );
        }
        Ok(None) => failures.push(format!("{check_name} failed: missing table {table}")),
        Err(e) => failures.push(format!("{check_name} failed: {e}")),
    }
}

fn scalar(conn: &Connection, sql: &str) -> Result<i64, String> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map_err(|e| format!("health query failed: {e}"))
}

/// Uses the same parser as pending detection, so every row counted here is
/// one that falls back to the evaluation month.
fn count_unusable_start_dates(conn: &Connection) -> Result<usize, String> {
    let mut stmt = conn
        .prepare("SELECT start_date FROM assignments WHERE LOWER(TRIM(status)) = 'active'")
        .map_err(|e| format!("health query failed: {e}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, Option<String>>(0))
        .map_err(|e| format!("health query failed: {e}"))?;
    let mut count = 0;
    for row in rows {
        let start = row.map_err(|e| format!("health query failed: {e}"))?;
        if start.as_deref().and_then(PeriodKey::parse).is_none() {
            count += 1;
        }
    }
    Ok(count)
}

fn latest_invoice_month(conn: &Connection) -> Result<Option<String>, String> {
    conn.query_row("SELECT MAX(month_key) FROM external_invoices", [], |row| {
        row.get::<_, Option<String>>(0)
    })
    .map_err(|e| format!("read latest invoice month failed: {e}"))
}

fn finish(failures: Vec<String>, warnings: Vec<String>, checks: Map<String, Value>) -> Value {
    json!({
        "ok": failures.is_empty(),
        "checked_at": Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "failures": failures,
        "warnings": warnings,
        "checks": Value::Object(checks),
    })
}

/// Probes a ledger database end to end. Problems are reported in the
/// payload; only an unreadable path is returned as `Err`.
pub fn runtime_db_health_check_at_db_path(db_path: &Path) -> Result<Value, String> {
    let mut failures: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut checks = Map::<String, Value>::new();
    checks.insert(
        "db_path".to_string(),
        Value::String(db_path.to_string_lossy().to_string()),
    );

    let status = inspect_status_at_path(db_path)?;
    checks.insert(
        "migrations".to_string(),
        json!({
            "ok": status.ready,
            "applied": status.applied_versions,
            "pending": status.pending_versions,
        }),
    );
    if !status.exists {
        failures.push("db_status failed: database file does not exist".to_string());
        return Ok(finish(failures, warnings, checks));
    }
    if !status.ready {
        failures.push(format!(
            "db_status failed: pending migrations {}",
            status.pending_versions.join(", ")
        ));
    }

    let total_rows = match query_admin_db_stats_at_path(db_path) {
        Ok(stats) => {
            checks.insert(
                "db_stats".to_string(),
                json!({
                    "table_count": stats.table_count,
                    "total_rows": stats.total_rows,
                }),
            );
            stats.total_rows
        }
        Err(e) => {
            failures.push(format!("db_stats failed: {e}"));
            return Ok(finish(failures, warnings, checks));
        }
    };

    let conn = match Connection::open(db_path) {
        Ok(c) => c,
        Err(e) => {
            failures.push(format!("open_db failed: {e}"));
            return Ok(finish(failures, warnings, checks));
        }
    };

    push_table_probe(&mut checks, &mut failures, &conn, "query_assignments", "assignments");
    push_table_probe(&mut checks, &mut failures, &conn, "query_payments", "payments");
    push_table_probe(&mut checks, &mut failures, &conn, "query_invoices", "external_invoices");
    push_table_probe(&mut checks, &mut failures, &conn, "query_links", "manual_links");

    if !failures.is_empty() {
        return Ok(finish(failures, warnings, checks));
    }

    match count_unusable_start_dates(&conn) {
        Ok(0) => {}
        Ok(n) => warnings.push(format!(
            "{n} active assignments have a missing or malformed start date; pending rent starts at the evaluation month"
        )),
        Err(e) => failures.push(format!("assignment_dates failed: {e}")),
    }

    match scalar(
        &conn,
        r#"
        SELECT COUNT(*) FROM manual_links l
        LEFT JOIN payments p ON p.id = l.payment_id
        LEFT JOIN external_invoices i ON i.id = l.invoice_id
        WHERE p.id IS NULL OR i.id IS NULL
        "#,
    ) {
        Ok(0) => {}
        Ok(n) => warnings.push(format!("{n} manual links point at missing records")),
        Err(e) => failures.push(format!("link_integrity failed: {e}")),
    }

    match query_pending_rent_at_db_path(db_path, PendingRentQueryRequest::default()) {
        Ok(payload) => {
            checks.insert(
                "pending_rent".to_string(),
                json!({
                    "ok": true,
                    "evaluation_month": payload["evaluation_month"],
                    "row_count": payload["summary"]["row_count"],
                    "total_text": payload["summary"]["total_text"],
                }),
            );
        }
        Err(e) => failures.push(format!("pending_rent failed: {e}")),
    }

    match latest_invoice_month(&conn) {
        Ok(Some(month)) => match query_reconciliation_at_db_path(
            db_path,
            ReconciliationQueryRequest {
                month: Some(month.clone()),
                gst_only: None,
            },
        ) {
            Ok(payload) => {
                let mismatch_count = payload["summary"]["mismatch_count"].as_i64().unwrap_or(0);
                checks.insert(
                    "reconciliation".to_string(),
                    json!({
                        "ok": true,
                        "month": month,
                        "row_count": payload["summary"]["row_count"],
                        "mismatch_count": mismatch_count,
                    }),
                );
                if mismatch_count > 0 {
                    warnings.push(format!(
                        "reconciliation for {month} has {mismatch_count} mismatched rows"
                    ));
                }
            }
            Err(e) => failures.push(format!("reconciliation failed: {e}")),
        },
        Ok(None) => {
            warnings.push("no external invoices imported; skipped reconciliation check".to_string());
            checks.insert(
                "reconciliation".to_string(),
                json!({
                    "ok": false,
                    "reason": "no_external_invoices",
                }),
            );
        }
        Err(e) => failures.push(format!("reconciliation failed: {e}")),
    }

    if total_rows == 0 {
        warnings.push("database has no business data (total_rows = 0)".to_string());
    }

    Ok(finish(failures, warnings, checks))
}
