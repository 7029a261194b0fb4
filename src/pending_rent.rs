use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::billing_cycle::{BillingCycle, SpaceCategory};
use crate::gst::gst_amount;
use crate::ledger_db::open_ledger_connection;
use crate::money::{format_inr, round_to};
use crate::period::{enumerate_periods, PeriodKey};
use crate::records::{Assignment, AssignmentStatus, Payment};
use crate::snapshot_queries::{load_assignments, load_payments, AssignmentFilter, PaymentFilter};

#[derive(Debug, Default, Deserialize)]
pub struct PendingRentQueryRequest {
    pub evaluation_month: Option<String>,
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingRentRow {
    pub assignment_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub space_id: String,
    pub space_name: String,
    pub space_category: SpaceCategory,
    pub period: PeriodKey,
    pub base_amount: f64,
    pub gst_amount: f64,
    pub total_amount: f64,
    pub gst_included: bool,
    pub payment_destination: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingGrouping {
    None,
    Period,
    Customer,
}

impl PendingGrouping {
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        match raw.unwrap_or("").trim().to_lowercase().as_str() {
            "" | "none" => Ok(PendingGrouping::None),
            "period" | "month" => Ok(PendingGrouping::Period),
            "customer" => Ok(PendingGrouping::Customer),
            other => Err(format!("group_by must be one of none/period/customer, got: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PendingGrouping::None => "none",
            PendingGrouping::Period => "period",
            PendingGrouping::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingRentGroup {
    pub key: String,
    pub label: String,
    pub rows: Vec<PendingRentRow>,
}

/// Periods each assignment has paid for. A payment counts for both its
/// paid-for month and the month it was received in.
pub fn paid_periods_by_assignment(payments: &[Payment]) -> HashMap<&str, HashSet<PeriodKey>> {
    let mut out: HashMap<&str, HashSet<PeriodKey>> = HashMap::new();
    for payment in payments {
        let Some(assignment_id) = payment.assignment_id.as_deref() else {
            continue;
        };
        let entry = out.entry(assignment_id).or_default();
        if let Some(period) = payment.paid_for_period() {
            entry.insert(period);
        }
        if let Some(period) = payment.receipt_period() {
            entry.insert(period);
        }
    }
    out
}

/// Unpaid months for one assignment up to `evaluation`. Missing or
/// unreadable start dates fall back to the evaluation month, unreadable end
/// dates are treated as ongoing: we would rather over-report than hide rent.
pub fn pending_periods_for_assignment(
    assignment: &Assignment,
    paid: Option<&HashSet<PeriodKey>>,
    evaluation: PeriodKey,
) -> Vec<PeriodKey> {
    if assignment.status != AssignmentStatus::Active {
        return Vec::new();
    }
    if assignment.space.billing_cycle() != BillingCycle::Monthly {
        return Vec::new();
    }

    let from = assignment
        .start_date
        .as_deref()
        .and_then(PeriodKey::parse)
        .unwrap_or(evaluation);
    let cap = match assignment.end_date.as_deref().and_then(PeriodKey::parse) {
        Some(end) if end < evaluation => end,
        _ => evaluation,
    };

    enumerate_periods(from, cap)
        .into_iter()
        .filter(|period| paid.map_or(true, |set| !set.contains(period)))
        .collect()
}

pub fn detect_pending_rent(
    assignments: &[Assignment],
    payments: &[Payment],
    evaluation: PeriodKey,
) -> Vec<PendingRentRow> {
    let paid = paid_periods_by_assignment(payments);
    let mut rows = Vec::new();
    for assignment in assignments {
        let periods =
            pending_periods_for_assignment(assignment, paid.get(assignment.id.as_str()), evaluation);
        if periods.is_empty() {
            continue;
        }
        let base = assignment.base_price();
        let gst = gst_amount(base, assignment.gst_included);
        for period in periods {
            rows.push(PendingRentRow {
                assignment_id: assignment.id.clone(),
                customer_id: assignment.customer.id.clone(),
                customer_name: assignment.customer.display_name(),
                space_id: assignment.space.id.clone(),
                space_name: assignment.space.name.clone(),
                space_category: assignment.space.category.clone(),
                period,
                base_amount: base,
                gst_amount: gst,
                total_amount: base + gst,
                gst_included: assignment.gst_included,
                payment_destination: assignment.payment_destination.clone(),
            });
        }
    }
    rows
}

fn sort_within_group(rows: &mut [PendingRentRow]) {
    rows.sort_by(|a, b| {
        a.space_name
            .cmp(&b.space_name)
            .then(a.period.cmp(&b.period))
            .then(a.assignment_id.cmp(&b.assignment_id))
    });
}

/// Ungrouped, by period (newest first) or by customer (name ascending).
/// Inside every group rows run by space name, then period.
pub fn group_pending_rows(
    rows: Vec<PendingRentRow>,
    grouping: PendingGrouping,
) -> Vec<PendingRentGroup> {
    let mut groups = match grouping {
        PendingGrouping::None => {
            if rows.is_empty() {
                Vec::new()
            } else {
                vec![PendingRentGroup {
                    key: "all".to_string(),
                    label: "All pending".to_string(),
                    rows,
                }]
            }
        }
        PendingGrouping::Period => {
            let mut by_period: BTreeMap<PeriodKey, Vec<PendingRentRow>> = BTreeMap::new();
            for row in rows {
                by_period.entry(row.period).or_default().push(row);
            }
            by_period
                .into_iter()
                .rev()
                .map(|(period, rows)| PendingRentGroup {
                    key: period.to_string(),
                    label: period.to_string(),
                    rows,
                })
                .collect()
        }
        PendingGrouping::Customer => {
            let mut by_customer: BTreeMap<(String, String), Vec<PendingRentRow>> = BTreeMap::new();
            for row in rows {
                by_customer
                    .entry((row.customer_name.to_lowercase(), row.customer_id.clone()))
                    .or_default()
                    .push(row);
            }
            by_customer
                .into_values()
                .map(|rows| PendingRentGroup {
                    key: rows[0].customer_id.clone(),
                    label: rows[0].customer_name.clone(),
                    rows,
                })
                .collect()
        }
    };
    for group in &mut groups {
        sort_within_group(&mut group.rows);
    }
    groups
}

fn pending_row_to_json(row: &PendingRentRow) -> Value {
    json!({
        "assignment_id": row.assignment_id,
        "customer_id": row.customer_id,
        "customer_name": row.customer_name,
        "space_id": row.space_id,
        "space_name": row.space_name,
        "space_category": row.space_category,
        "period": row.period,
        "base_amount": round_to(row.base_amount, 2),
        "gst_amount": round_to(row.gst_amount, 2),
        "total_amount": round_to(row.total_amount, 2),
        "base_amount_text": format_inr(row.base_amount),
        "gst_amount_text": format_inr(row.gst_amount),
        "total_amount_text": format_inr(row.total_amount),
        "gst_included": row.gst_included,
        "payment_destination": row.payment_destination,
    })
}

fn totals(rows: &[PendingRentRow]) -> (f64, f64, f64) {
    rows.iter().fold((0.0, 0.0, 0.0), |acc, r| {
        (acc.0 + r.base_amount, acc.1 + r.gst_amount, acc.2 + r.total_amount)
    })
}

pub fn parse_evaluation_month(raw: Option<&str>) -> Result<PeriodKey, String> {
    let text = raw.unwrap_or("").trim();
    if text.is_empty() {
        return Ok(PeriodKey::current());
    }
    PeriodKey::parse(text).ok_or_else(|| format!("evaluation_month must be YYYY-MM, got: {text}"))
}

pub fn query_pending_rent_at_db_path(
    db_path: &Path,
    req: PendingRentQueryRequest,
) -> Result<Value, String> {
    let evaluation = parse_evaluation_month(req.evaluation_month.as_deref())?;
    let grouping = PendingGrouping::parse(req.group_by.as_deref())?;

    let conn = open_ledger_connection(db_path)?;
    let assignments = load_assignments(
        &conn,
        &AssignmentFilter {
            status: Some(AssignmentStatus::Active),
        },
    )?;
    let payments = load_payments(
        &conn,
        &PaymentFilter {
            month: None,
            assignment_ids: Some(assignments.iter().map(|a| a.id.clone()).collect()),
        },
    )?;

    let rows = detect_pending_rent(&assignments, &payments, evaluation);
    let (base_total, gst_total, grand_total) = totals(&rows);
    let assignment_count = rows
        .iter()
        .map(|r| r.assignment_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let customer_count = rows
        .iter()
        .map(|r| r.customer_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let row_count = rows.len();
    log::debug!(
        "pending rent at {evaluation}: {row_count} rows over {assignment_count} assignments"
    );

    let groups = group_pending_rows(rows, grouping)
        .iter()
        .map(|group| {
            let (base, gst, total) = totals(&group.rows);
            json!({
                "key": group.key,
                "label": group.label,
                "row_count": group.rows.len(),
                "base_total": round_to(base, 2),
                "gst_total": round_to(gst, 2),
                "total": round_to(total, 2),
                "total_text": format_inr(total),
                "rows": group.rows.iter().map(pending_row_to_json).collect::<Vec<_>>(),
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "evaluation_month": evaluation,
        "group_by": grouping.as_str(),
        "summary": {
            "row_count": row_count,
            "assignment_count": assignment_count,
            "customer_count": customer_count,
            "base_total": round_to(base_total, 2),
            "gst_total": round_to(gst_total, 2),
            "total": round_to(grand_total, 2),
            "base_total_text": format_inr(base_total),
            "gst_total_text": format_inr(gst_total),
            "total_text": format_inr(grand_total),
        },
        "groups": groups,
    }))
}
