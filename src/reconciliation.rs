use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::ledger_db::open_ledger_connection;
use crate::money::{format_inr, round_to};
use crate::period::PeriodKey;
use crate::records::{ExternalInvoice, ManualLink, Payment};
use crate::snapshot_queries::{
    load_external_invoices, load_manual_links, load_payments, InvoiceFilter, PaymentFilter,
};

/// Totals within this many currency units of each other count as equal.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Default, Deserialize)]
pub struct ReconciliationQueryRequest {
    pub month: Option<String>,
    pub gst_only: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Match,
    Mismatch,
    InternalOnly,
    /// Present only in the imported accounting ledger.
    ZohoOnly,
}

impl ComparisonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonStatus::Match => "match",
            ComparisonStatus::Mismatch => "mismatch",
            ComparisonStatus::InternalOnly => "internal_only",
            ComparisonStatus::ZohoOnly => "zoho_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSource {
    ManualLink,
    NameBucket,
    Singleton,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SideTotals {
    pub count: usize,
    pub amount: f64,
    pub base: f64,
    pub gst: f64,
}

impl SideTotals {
    fn add_payment(&mut self, payment: &Payment) {
        self.count += 1;
        self.amount += payment.amount;
        self.base += payment.base_amount();
        self.gst += payment.gst_amount;
    }

    fn add_invoice(&mut self, invoice: &ExternalInvoice) {
        self.count += 1;
        self.amount += invoice.total_amount;
        self.base += invoice.base_amount;
        self.gst += invoice.gst_amount;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub status: ComparisonStatus,
    pub source: RowSource,
    pub customer_name: String,
    pub payment_ids: Vec<String>,
    pub invoice_ids: Vec<String>,
    pub invoice_numbers: Vec<String>,
    pub internal: SideTotals,
    pub external: SideTotals,
    pub amount_delta: f64,
    pub base_delta: f64,
    pub gst_delta: f64,
}

impl ComparisonRow {
    fn build(
        source: RowSource,
        customer_name: String,
        payments: &[&Payment],
        invoices: &[&ExternalInvoice],
    ) -> Self {
        let mut internal = SideTotals::default();
        for p in payments {
            internal.add_payment(p);
        }
        let mut external = SideTotals::default();
        for inv in invoices {
            external.add_invoice(inv);
        }
        let status = classify(&internal, &external);
        ComparisonRow {
            status,
            source,
            customer_name,
            payment_ids: payments.iter().map(|p| p.id.clone()).collect(),
            invoice_ids: invoices.iter().map(|i| i.id.clone()).collect(),
            invoice_numbers: invoices.iter().map(|i| i.invoice_number.clone()).collect(),
            amount_delta: internal.amount - external.amount,
            base_delta: internal.base - external.base,
            gst_delta: internal.gst - external.gst,
            internal,
            external,
        }
    }
}

fn classify(internal: &SideTotals, external: &SideTotals) -> ComparisonStatus {
    match (internal.count, external.count) {
        (0, _) => ComparisonStatus::ZohoOnly,
        (_, 0) => ComparisonStatus::InternalOnly,
        _ if (internal.amount - external.amount).abs() > AMOUNT_TOLERANCE => {
            ComparisonStatus::Mismatch
        }
        _ => ComparisonStatus::Match,
    }
}

/// Case-insensitive, whitespace-collapsed key used to bucket names.
pub fn name_key(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn payment_in_scope(payment: &Payment, month: PeriodKey, gst_only: bool) -> bool {
    payment.ledger_period() == Some(month) && (!gst_only || payment.has_gst())
}

pub fn invoice_in_scope(invoice: &ExternalInvoice, month: PeriodKey, gst_only: bool) -> bool {
    invoice.period() == Some(month) && (!gst_only || invoice.has_gst())
}

#[derive(Default)]
struct NameBucket<'a> {
    label: String,
    payments: Vec<&'a Payment>,
    invoices: Vec<&'a ExternalInvoice>,
}

/// Compares one month of internal payments against imported invoices.
///
/// Manual links are honoured first, then the leftovers are bucketed by
/// customer name and summed per side. Entries without any usable name end
/// up as single-entry rows at the end.
pub fn compare_month(
    payments: &[Payment],
    invoices: &[ExternalInvoice],
    links: &[ManualLink],
    month: PeriodKey,
    gst_only: bool,
) -> Vec<ComparisonRow> {
    let payments = payments
        .iter()
        .filter(|p| payment_in_scope(p, month, gst_only))
        .collect::<Vec<_>>();
    let invoices = invoices
        .iter()
        .filter(|i| invoice_in_scope(i, month, gst_only))
        .collect::<Vec<_>>();
    let payment_by_id = payments
        .iter()
        .map(|p| (p.id.as_str(), *p))
        .collect::<HashMap<_, _>>();
    let invoice_by_id = invoices
        .iter()
        .map(|i| (i.id.as_str(), *i))
        .collect::<HashMap<_, _>>();

    let mut rows = Vec::new();
    let mut used_payments: HashSet<&str> = HashSet::new();
    let mut used_invoices: HashSet<&str> = HashSet::new();

    for link in links {
        let (Some(payment), Some(invoice)) = (
            payment_by_id.get(link.payment_id.as_str()),
            invoice_by_id.get(link.invoice_id.as_str()),
        ) else {
            continue;
        };
        if used_payments.contains(payment.id.as_str()) || used_invoices.contains(invoice.id.as_str()) {
            continue;
        }
        used_payments.insert(payment.id.as_str());
        used_invoices.insert(invoice.id.as_str());
        let name = {
            let internal = payment.customer_name();
            if internal.is_empty() {
                invoice.customer_name.trim().to_string()
            } else {
                internal
            }
        };
        rows.push(ComparisonRow::build(
            RowSource::ManualLink,
            name,
            &[*payment],
            &[*invoice],
        ));
    }

    let mut buckets: BTreeMap<String, NameBucket<'_>> = BTreeMap::new();
    let mut loose_payments = Vec::new();
    let mut loose_invoices = Vec::new();

    for payment in payments.iter().filter(|p| !used_payments.contains(p.id.as_str())) {
        let name = payment.customer_name();
        let key = name_key(&name);
        if key.is_empty() {
            loose_payments.push(*payment);
            continue;
        }
        let bucket = buckets.entry(key).or_default();
        if bucket.label.is_empty() {
            bucket.label = name;
        }
        bucket.payments.push(*payment);
    }
    for invoice in invoices.iter().filter(|i| !used_invoices.contains(i.id.as_str())) {
        let key = name_key(&invoice.customer_name);
        if key.is_empty() {
            loose_invoices.push(*invoice);
            continue;
        }
        let bucket = buckets.entry(key).or_default();
        if bucket.label.is_empty() {
            bucket.label = invoice.customer_name.trim().to_string();
        }
        bucket.invoices.push(*invoice);
    }

    for bucket in buckets.into_values() {
        rows.push(ComparisonRow::build(
            RowSource::NameBucket,
            bucket.label,
            &bucket.payments,
            &bucket.invoices,
        ));
    }
    for payment in loose_payments {
        rows.push(ComparisonRow::build(
            RowSource::Singleton,
            String::new(),
            &[payment],
            &[],
        ));
    }
    for invoice in loose_invoices {
        rows.push(ComparisonRow::build(
            RowSource::Singleton,
            String::new(),
            &[],
            &[invoice],
        ));
    }
    rows
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComparisonSummary {
    pub row_count: usize,
    pub match_count: usize,
    pub mismatch_count: usize,
    pub internal_only_count: usize,
    pub zoho_only_count: usize,
    pub internal: SideTotals,
    pub external: SideTotals,
}

pub fn summarize(rows: &[ComparisonRow]) -> ComparisonSummary {
    let mut summary = ComparisonSummary {
        row_count: rows.len(),
        ..ComparisonSummary::default()
    };
    for row in rows {
        match row.status {
            ComparisonStatus::Match => summary.match_count += 1,
            ComparisonStatus::Mismatch => summary.mismatch_count += 1,
            ComparisonStatus::InternalOnly => summary.internal_only_count += 1,
            ComparisonStatus::ZohoOnly => summary.zoho_only_count += 1,
        }
        summary.internal.count += row.internal.count;
        summary.internal.amount += row.internal.amount;
        summary.internal.base += row.internal.base;
        summary.internal.gst += row.internal.gst;
        summary.external.count += row.external.count;
        summary.external.amount += row.external.amount;
        summary.external.base += row.external.base;
        summary.external.gst += row.external.gst;
    }
    summary
}

fn side_to_json(side: &SideTotals) -> Value {
    json!({
        "count": side.count,
        "amount": round_to(side.amount, 2),
        "base": round_to(side.base, 2),
        "gst": round_to(side.gst, 2),
        "amount_text": format_inr(side.amount),
    })
}

fn comparison_row_to_json(row: &ComparisonRow) -> Value {
    json!({
        "status": row.status,
        "source": row.source,
        "customer_name": row.customer_name,
        "payment_ids": row.payment_ids,
        "invoice_ids": row.invoice_ids,
        "invoice_numbers": row.invoice_numbers,
        "internal": side_to_json(&row.internal),
        "external": side_to_json(&row.external),
        "amount_delta": round_to(row.amount_delta, 2),
        "base_delta": round_to(row.base_delta, 2),
        "gst_delta": round_to(row.gst_delta, 2),
        "amount_delta_text": format_inr(row.amount_delta),
    })
}

pub(crate) fn parse_month_param(raw: Option<&str>) -> Result<PeriodKey, String> {
    let text = raw.unwrap_or("").trim();
    if text.is_empty() {
        return Err("month is required (YYYY-MM)".to_string());
    }
    PeriodKey::parse(text).ok_or_else(|| format!("month must be YYYY-MM, got: {text}"))
}

pub fn query_reconciliation_at_db_path(
    db_path: &Path,
    req: ReconciliationQueryRequest,
) -> Result<Value, String> {
    let month = parse_month_param(req.month.as_deref())?;
    let gst_only = req.gst_only.unwrap_or(false);

    let conn = open_ledger_connection(db_path)?;
    let payments = load_payments(
        &conn,
        &PaymentFilter {
            month: Some(month),
            assignment_ids: None,
        },
    )?;
    let invoices = load_external_invoices(&conn, &InvoiceFilter { month: Some(month) })?;
    let links = load_manual_links(&conn)?;

    let rows = compare_month(&payments, &invoices, &links, month, gst_only);
    let summary = summarize(&rows);
    log::debug!(
        "reconciliation {month}: {} rows, {} match, {} mismatch",
        summary.row_count,
        summary.match_count,
        summary.mismatch_count
    );

    Ok(json!({
        "month": month,
        "gst_only": gst_only,
        "summary": {
            "row_count": summary.row_count,
            "match_count": summary.match_count,
            "mismatch_count": summary.mismatch_count,
            "internal_only_count": summary.internal_only_count,
            "zoho_only_count": summary.zoho_only_count,
            "internal": side_to_json(&summary.internal),
            "external": side_to_json(&summary.external),
            "difference": round_to(summary.internal.amount - summary.external.amount, 2),
            "difference_text": format_inr(summary.internal.amount - summary.external.amount),
        },
        "rows": rows.iter().map(comparison_row_to_json).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::records::{Customer, ExternalInvoice, Payment};

    pub(crate) fn payment(id: &str, name: &str, amount: f64, gst: f64, date: &str) -> Payment {
        Payment {
            id: id.to_string(),
            assignment_id: None,
            customer: Some(Customer {
                id: format!("c_{id}"),
                name: if name.is_empty() { None } else { Some(name.to_string()) },
                ..Customer::default()
            }),
            payer_name: None,
            amount,
            gst_amount: gst,
            payment_date: Some(date.to_string()),
            paid_for_month: None,
            method: None,
            notes: None,
        }
    }

    pub(crate) fn invoice(id: &str, name: &str, total: f64, gst: f64, date: &str) -> ExternalInvoice {
        ExternalInvoice {
            id: id.to_string(),
            invoice_number: format!("INV-{id}"),
            invoice_date: date.to_string(),
            customer_name: name.to_string(),
            total_amount: total,
            base_amount: total - gst,
            gst_amount: gst,
            month_key: date[..7].to_string(),
        }
    }
}
