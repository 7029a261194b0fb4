use chrono::{Local, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

use crate::gst::gst_amount;
use crate::ledger_db::open_ledger_connection;
use crate::money::{cents_to_rupee_text, cents_to_rupees, parse_amount_to_cents, rupees_to_cents};
use crate::period::PeriodKey;

#[derive(Debug, Default, Deserialize)]
pub struct RecordPaymentRequest {
    pub assignment_id: Option<String>,
    pub payer_name: Option<String>,
    pub base_amount: Option<String>,
    pub gst_included: Option<bool>,
    pub payment_date: Option<String>,
    pub paid_for_month: Option<String>,
    pub method: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LinkPaymentInvoiceRequest {
    pub payment_id: Option<String>,
    pub invoice_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnlinkPaymentRequest {
    pub payment_id: Option<String>,
}

/// Row as written to `payments`. Amounts in paise.
#[derive(Debug, Clone)]
pub struct PaymentFields {
    pub assignment_id: Option<String>,
    pub payer_name: Option<String>,
    pub amount_cents: i64,
    pub gst_amount_cents: i64,
    pub payment_date: Option<String>,
    pub paid_for_month: Option<String>,
    pub method: Option<String>,
    pub notes: Option<String>,
}

fn trimmed(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn normalize_payment_date(raw: Option<String>) -> Result<String, String> {
    match trimmed(raw) {
        None => Ok(Local::now().date_naive().format("%Y-%m-%d").to_string()),
        Some(text) => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .map_err(|_| format!("payment_date must be YYYY-MM-DD, got: {text}")),
    }
}

fn normalize_paid_for_month(raw: Option<String>) -> Result<Option<String>, String> {
    match trimmed(raw) {
        None => Ok(None),
        Some(text) => PeriodKey::parse(&text)
            .map(|p| Some(p.to_string()))
            .ok_or_else(|| format!("paid_for_month must be YYYY-MM, got: {text}")),
    }
}

fn map_sqlite_conflict(prefix: &str, err: rusqlite::Error) -> String {
    let msg = err.to_string();
    if msg.contains("FOREIGN KEY constraint failed") {
        format!("{prefix} (referenced record not found): {msg}")
    } else {
        format!("{prefix}: {msg}")
    }
}

pub fn create_payment(conn: &Connection, fields: &PaymentFields) -> Result<String, String> {
    let id = format!("pay_{}", Uuid::new_v4().simple());
    conn.execute(
        r#"
        INSERT INTO payments(
            id, assignment_id, payer_name, amount_cents, gst_amount_cents,
            payment_date, paid_for_month, method, notes
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            id,
            fields.assignment_id,
            fields.payer_name,
            fields.amount_cents,
            fields.gst_amount_cents,
            fields.payment_date,
            fields.paid_for_month,
            fields.method,
            fields.notes
        ],
    )
    .map_err(|e| map_sqlite_conflict("write payment failed", e))?;
    Ok(id)
}

/// Points `payment_id` at `invoice_id`. Any other payment holding the same
/// invoice loses its link; an existing row for this payment is updated.
pub fn upsert_manual_link(conn: &Connection, payment_id: &str, invoice_id: &str) -> Result<(), String> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| format!("begin link transaction failed: {e}"))?;
    tx.execute(
        "DELETE FROM manual_links WHERE invoice_id = ?1 AND payment_id <> ?2",
        params![invoice_id, payment_id],
    )
    .map_err(|e| format!("release previous invoice link failed: {e}"))?;
    tx.execute(
        r#"
        INSERT INTO manual_links(payment_id, invoice_id)
        VALUES (?1, ?2)
        ON CONFLICT(payment_id) DO UPDATE SET
            invoice_id=excluded.invoice_id,
            linked_at=datetime('now')
        "#,
        params![payment_id, invoice_id],
    )
    .map_err(|e| map_sqlite_conflict("write manual link failed", e))?;
    tx.commit()
        .map_err(|e| format!("commit link transaction failed: {e}"))?;
    Ok(())
}

/// Returns whether a link existed.
pub fn delete_manual_link(conn: &Connection, payment_id: &str) -> Result<bool, String> {
    let removed = conn
        .execute("DELETE FROM manual_links WHERE payment_id = ?1", [payment_id])
        .map_err(|e| format!("delete manual link failed: {e}"))?;
    Ok(removed > 0)
}

struct AssignmentPricing {
    base_cents: i64,
    gst_included: bool,
}

fn load_assignment_pricing(
    conn: &Connection,
    assignment_id: &str,
) -> Result<AssignmentPricing, String> {
    conn.query_row(
        r#"
        SELECT a.monthly_price_cents, s.price_cents, a.gst_included
        FROM assignments a
        JOIN spaces s ON s.id = a.space_id
        WHERE a.id = ?1
        "#,
        [assignment_id],
        |row| {
            let override_cents = row.get::<_, Option<i64>>(0)?;
            let space_cents = row.get::<_, i64>(1)?;
            Ok(AssignmentPricing {
                base_cents: override_cents.filter(|v| *v > 0).unwrap_or(space_cents),
                gst_included: row.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
    .map_err(|e| format!("read assignment failed: {e}"))?
    .ok_or_else(|| format!("assignment not found: {assignment_id}"))
}

pub fn record_payment_at_db_path(
    db_path: &Path,
    req: RecordPaymentRequest,
) -> Result<Value, String> {
    let assignment_id = trimmed(req.assignment_id);
    let payer_name = trimmed(req.payer_name);
    let base_input = match trimmed(req.base_amount) {
        Some(text) => Some(parse_amount_to_cents(&text)?),
        None => None,
    };
    let payment_date = normalize_payment_date(req.payment_date)?;
    let paid_for_month = normalize_paid_for_month(req.paid_for_month)?;

    let conn = open_ledger_connection(db_path)?;

    let (base_cents, gst_included) = match assignment_id.as_deref() {
        Some(id) => {
            let pricing = load_assignment_pricing(&conn, id)?;
            (
                base_input.unwrap_or(pricing.base_cents),
                req.gst_included.unwrap_or(pricing.gst_included),
            )
        }
        None => {
            if payer_name.is_none() {
                return Err("payer_name is required when no assignment_id is given".to_string());
            }
            let base = base_input.ok_or_else(|| {
                "base_amount is required when no assignment_id is given".to_string()
            })?;
            (base, req.gst_included.unwrap_or(false))
        }
    };
    if base_cents <= 0 {
        return Err("base_amount must be greater than 0".to_string());
    }

    let gst_cents = rupees_to_cents(gst_amount(cents_to_rupees(base_cents), gst_included));
    let fields = PaymentFields {
        assignment_id: assignment_id.clone(),
        payer_name,
        amount_cents: base_cents + gst_cents,
        gst_amount_cents: gst_cents,
        payment_date: Some(payment_date.clone()),
        paid_for_month: paid_for_month.clone(),
        method: trimmed(req.method),
        notes: trimmed(req.notes),
    };
    let payment_id = create_payment(&conn, &fields)?;
    log::info!(
        "recorded payment {payment_id} ({} + {} GST) for {}",
        cents_to_rupee_text(base_cents),
        cents_to_rupee_text(gst_cents),
        assignment_id.as_deref().unwrap_or("manual entry")
    );

    Ok(json!({
        "id": payment_id,
        "assignment_id": assignment_id,
        "payment_date": payment_date,
        "paid_for_month": paid_for_month,
        "gst_included": gst_included,
        "base_amount_cents": base_cents,
        "gst_amount_cents": gst_cents,
        "amount_cents": base_cents + gst_cents,
        "amount": cents_to_rupee_text(base_cents + gst_cents),
    }))
}

fn ensure_row_exists(conn: &Connection, table: &str, id: &str, label: &str) -> Result<(), String> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?1");
    let found = conn
        .query_row(&sql, [id], |row| row.get::<_, i64>(0))
        .optional()
        .map_err(|e| format!("read {label} failed: {e}"))?;
    if found.is_none() {
        return Err(format!("{label} not found: {id}"));
    }
    Ok(())
}

pub fn link_payment_invoice_at_db_path(
    db_path: &Path,
    req: LinkPaymentInvoiceRequest,
) -> Result<Value, String> {
    let payment_id =
        trimmed(req.payment_id).ok_or_else(|| "payment_id is required".to_string())?;
    let invoice_id =
        trimmed(req.invoice_id).ok_or_else(|| "invoice_id is required".to_string())?;

    let conn = open_ledger_connection(db_path)?;
    ensure_row_exists(&conn, "payments", &payment_id, "payment")?;
    ensure_row_exists(&conn, "external_invoices", &invoice_id, "invoice")?;
    upsert_manual_link(&conn, &payment_id, &invoice_id)?;
    log::info!("linked payment {payment_id} to invoice {invoice_id}");

    Ok(json!({
        "payment_id": payment_id,
        "invoice_id": invoice_id,
    }))
}

pub fn unlink_payment_at_db_path(
    db_path: &Path,
    req: UnlinkPaymentRequest,
) -> Result<Value, String> {
    let payment_id =
        trimmed(req.payment_id).ok_or_else(|| "payment_id is required".to_string())?;
    let conn = open_ledger_connection(db_path)?;
    let removed = delete_manual_link(&conn, &payment_id)?;
    if removed {
        log::info!("unlinked payment {payment_id}");
    }
    Ok(json!({
        "payment_id": payment_id,
        "removed": removed,
    }))
}
