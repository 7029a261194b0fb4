use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;

use crate::ledger_db::open_ledger_connection;
use crate::money::round_to;
use crate::period::PeriodKey;
use crate::reconciliation::{invoice_in_scope, parse_month_param, payment_in_scope};
use crate::record_mutations::upsert_manual_link;
use crate::records::{ExternalInvoice, ManualLink, Payment};
use crate::snapshot_queries::{
    load_external_invoices, load_manual_links, load_payments, InvoiceFilter, PaymentFilter,
};

/// Amounts must be closer than this to be considered at all.
pub const AMOUNT_WINDOW: f64 = 10.0;
pub const MIN_ACCEPT_SCORE: u32 = 100;
const AMOUNT_SCORE: u32 = 100;
const NAME_SCORE: u32 = 50;
const CLOSE_AMOUNT_SCORE: u32 = 20;
const SIGNIFICANT_WORD_MIN_CHARS: usize = 4;

#[derive(Debug, Default, Deserialize)]
pub struct AutoAssignRequest {
    pub month: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkProposal {
    pub payment_id: String,
    pub invoice_id: String,
    pub invoice_number: String,
    pub customer_name: String,
    pub score: u32,
    pub name_match: bool,
    pub amount_diff: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AutoAssignPlan {
    pub proposals: Vec<LinkProposal>,
    pub unmatched_invoice_ids: Vec<String>,
    pub candidate_invoice_count: usize,
    pub candidate_payment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkFailure {
    pub payment_id: String,
    pub invoice_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct AutoAssignOutcome {
    pub linked: Vec<LinkProposal>,
    pub failures: Vec<LinkFailure>,
}

/// Persists one payment/invoice association. Each call stands alone; a
/// failure must leave previously written links untouched.
pub trait LinkWriter {
    fn upsert_link(&mut self, payment_id: &str, invoice_id: &str) -> Result<(), String>;
}

pub struct SqliteLinkWriter<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteLinkWriter<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl LinkWriter for SqliteLinkWriter<'_> {
    fn upsert_link(&mut self, payment_id: &str, invoice_id: &str) -> Result<(), String> {
        upsert_manual_link(self.conn, payment_id, invoice_id)
    }
}

fn significant_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= SIGNIFICANT_WORD_MIN_CHARS)
        .collect()
}

/// Loose customer-name comparison, tried per variant: equality, containment
/// either way, a shared word longer than three characters, then such a word
/// of one side appearing anywhere in the other.
pub fn name_matches(variants: &[String], invoice_name: &str) -> bool {
    let target = invoice_name.trim().to_lowercase();
    if target.is_empty() {
        return false;
    }
    let target_words = significant_words(&target);

    for variant in variants {
        let candidate = variant.trim().to_lowercase();
        if candidate.is_empty() {
            continue;
        }
        if candidate == target {
            return true;
        }
        if candidate.contains(&target) || target.contains(&candidate) {
            return true;
        }
        let candidate_words = significant_words(&candidate);
        if candidate_words.iter().any(|w| target_words.contains(w)) {
            return true;
        }
        if candidate_words.iter().any(|w| target.contains(w))
            || target_words.iter().any(|w| candidate.contains(w))
        {
            return true;
        }
    }
    false
}

/// Zero when the amount window is missed; such candidates are never linked.
pub fn score_candidate(payment: &Payment, invoice: &ExternalInvoice) -> (u32, bool, f64) {
    let diff = (payment.amount - invoice.total_amount).abs();
    if diff.is_nan() || diff >= AMOUNT_WINDOW {
        return (0, false, diff);
    }
    let name_match = name_matches(&payment.name_variants(), &invoice.customer_name);
    let mut score = AMOUNT_SCORE;
    if name_match {
        score += NAME_SCORE;
    }
    if diff < 1.0 {
        score += CLOSE_AMOUNT_SCORE;
    }
    (score, name_match, diff)
}

/// Pairs this month's unlinked GST-bearing invoices with unlinked GST-bearing
/// payments. Invoices are visited in input order and each takes the highest
/// scoring payment still free; equal scores keep the earlier payment.
pub fn propose_links(
    payments: &[Payment],
    invoices: &[ExternalInvoice],
    links: &[ManualLink],
    month: PeriodKey,
) -> AutoAssignPlan {
    let linked_payments = links
        .iter()
        .map(|l| l.payment_id.as_str())
        .collect::<HashSet<_>>();
    let linked_invoices = links
        .iter()
        .map(|l| l.invoice_id.as_str())
        .collect::<HashSet<_>>();

    let payments = payments
        .iter()
        .filter(|p| payment_in_scope(p, month, true) && !linked_payments.contains(p.id.as_str()))
        .collect::<Vec<_>>();
    let invoices = invoices
        .iter()
        .filter(|i| invoice_in_scope(i, month, true) && !linked_invoices.contains(i.id.as_str()))
        .collect::<Vec<_>>();

    let mut plan = AutoAssignPlan {
        candidate_invoice_count: invoices.len(),
        candidate_payment_count: payments.len(),
        ..AutoAssignPlan::default()
    };
    let mut claimed = vec![false; payments.len()];

    for invoice in invoices {
        let mut best: Option<(usize, u32, bool, f64)> = None;
        for (pi, payment) in payments.iter().enumerate() {
            if claimed[pi] {
                continue;
            }
            let (score, name_match, diff) = score_candidate(payment, invoice);
            if score == 0 {
                continue;
            }
            if best.map_or(true, |(_, best_score, _, _)| score > best_score) {
                best = Some((pi, score, name_match, diff));
            }
        }

        match best {
            Some((pi, score, name_match, diff)) if score >= MIN_ACCEPT_SCORE => {
                claimed[pi] = true;
                log::debug!(
                    "invoice {} -> payment {} (score {score})",
                    invoice.invoice_number,
                    payments[pi].id
                );
                plan.proposals.push(LinkProposal {
                    payment_id: payments[pi].id.clone(),
                    invoice_id: invoice.id.clone(),
                    invoice_number: invoice.invoice_number.clone(),
                    customer_name: invoice.customer_name.clone(),
                    score,
                    name_match,
                    amount_diff: diff,
                });
            }
            _ => plan.unmatched_invoice_ids.push(invoice.id.clone()),
        }
    }
    plan
}

/// Writes every proposal independently; failures are collected, not raised.
pub fn apply_proposals<W: LinkWriter>(writer: &mut W, proposals: &[LinkProposal]) -> AutoAssignOutcome {
    let mut outcome = AutoAssignOutcome::default();
    for proposal in proposals {
        match writer.upsert_link(&proposal.payment_id, &proposal.invoice_id) {
            Ok(()) => outcome.linked.push(proposal.clone()),
            Err(message) => {
                log::warn!(
                    "link payment {} -> invoice {} failed: {message}",
                    proposal.payment_id,
                    proposal.invoice_id
                );
                outcome.failures.push(LinkFailure {
                    payment_id: proposal.payment_id.clone(),
                    invoice_id: proposal.invoice_id.clone(),
                    message,
                });
            }
        }
    }
    outcome
}

pub fn auto_assign_links_at_db_path(db_path: &Path, req: AutoAssignRequest) -> Result<Value, String> {
    let month = parse_month_param(req.month.as_deref())?;

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

    let plan = propose_links(&payments, &invoices, &links, month);
    let mut writer = SqliteLinkWriter::new(&conn);
    let outcome = apply_proposals(&mut writer, &plan.proposals);
    log::info!(
        "auto-assign {month}: linked {}, unmatched {}, failed {}",
        outcome.linked.len(),
        plan.unmatched_invoice_ids.len(),
        outcome.failures.len()
    );

    Ok(json!({
        "month": month,
        "candidate_invoice_count": plan.candidate_invoice_count,
        "candidate_payment_count": plan.candidate_payment_count,
        "linked_count": outcome.linked.len(),
        "unmatched_count": plan.unmatched_invoice_ids.len(),
        "failed_count": outcome.failures.len(),
        "unmatched_invoice_ids": plan.unmatched_invoice_ids,
        "failures": outcome.failures,
        "links": outcome.linked.iter().map(|l| json!({
            "payment_id": l.payment_id,
            "invoice_id": l.invoice_id,
            "invoice_number": l.invoice_number,
            "customer_name": l.customer_name,
            "score": l.score,
            "name_match": l.name_match,
            "amount_diff": round_to(l.amount_diff, 2),
        })).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::{create_migrated_db, seed};
    use crate::reconciliation::fixtures::{invoice, payment};
    use std::fs;

    fn month(text: &str) -> PeriodKey {
        PeriodKey::parse(text).expect("valid month")
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn name_match_tiers() {
        assert!(name_matches(&names(&["Asha Rao"]), "asha rao"));
        assert!(name_matches(&names(&["Rao Labs"]), "Rao Labs Pvt Ltd"));
        assert!(name_matches(&names(&["Vikram Shah"]), "Shah, Vikram"));
        assert!(name_matches(&names(&["", "Meera"]), "MeeraDesigns"));
        // word of one side buried inside a fused word of the other
        assert!(name_matches(&names(&["Rao Enterprises"]), "RaoEnterprises Ltd"));
        assert!(name_matches(&names(&["MeeraDesigns Studio"]), "Meera Designs"));
        assert!(!name_matches(&names(&["Asha Rao"]), "Vikram Shah"));
        assert!(!name_matches(&names(&["Al Bo"]), "Bo Al Co"));
        assert!(!name_matches(&names(&["Asha Rao"]), "   "));
        assert!(!name_matches(&[], "Asha Rao"));
    }

    #[test]
    fn scoring_prefers_named_and_close_amounts() {
        let named = payment("p1", "Asha Rao", 11_800.0, 1_800.0, "2024-03-02");
        let stranger = payment("p2", "Vikram Shah", 11_800.0, 1_800.0, "2024-03-02");
        let near = payment("p3", "Asha Rao", 11_805.0, 1_800.0, "2024-03-02");
        let inv = invoice("i1", "Asha Rao", 11_800.0, 1_800.0, "2024-03-01");
        assert_eq!(score_candidate(&named, &inv).0, 170);
        assert_eq!(score_candidate(&stranger, &inv).0, 120);
        assert_eq!(score_candidate(&near, &inv).0, 150);

        let plan = propose_links(&[stranger, named], &[inv], &[], month("2024-03"));
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(plan.proposals[0].payment_id, "p1");
        assert!(plan.proposals[0].name_match);
    }

    #[test]
    fn name_match_never_rescues_large_amount_gap() {
        let inv = invoice("i1", "Asha Rao", 11_800.0, 1_800.0, "2024-03-01");
        let far = payment("p1", "Asha Rao", 11_810.0, 1_800.0, "2024-03-02");
        let plan = propose_links(&[far], &[inv.clone()], &[], month("2024-03"));
        assert!(plan.proposals.is_empty());
        assert_eq!(plan.unmatched_invoice_ids, vec!["i1"]);

        let inside = payment("p2", "Somebody Else", 11_790.5, 1_800.0, "2024-03-02");
        let plan = propose_links(&[inside], &[inv], &[], month("2024-03"));
        assert_eq!(plan.proposals.len(), 1);
        assert!(!plan.proposals[0].name_match);
        assert_eq!(plan.proposals[0].score, 100);
    }

    #[test]
    fn claimed_payment_is_not_reused_and_ties_keep_first() {
        let p1 = payment("p1", "Asha Rao", 5_900.0, 900.0, "2024-03-02");
        let p2 = payment("p2", "Asha Rao", 5_900.0, 900.0, "2024-03-03");
        let i1 = invoice("i1", "Asha Rao", 5_900.0, 900.0, "2024-03-01");
        let i2 = invoice("i2", "Asha Rao", 5_900.0, 900.0, "2024-03-15");
        let i3 = invoice("i3", "Asha Rao", 5_900.0, 900.0, "2024-03-20");
        let plan = propose_links(&[p1, p2], &[i1, i2, i3], &[], month("2024-03"));
        let pairs = plan
            .proposals
            .iter()
            .map(|p| (p.invoice_id.as_str(), p.payment_id.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("i1", "p1"), ("i2", "p2")]);
        assert_eq!(plan.unmatched_invoice_ids, vec!["i3"]);
    }

    #[test]
    fn already_linked_and_non_gst_entries_are_excluded() {
        let linked = payment("p1", "Asha Rao", 5_900.0, 900.0, "2024-03-02");
        let no_gst = payment("p2", "Asha Rao", 5_900.0, 0.0, "2024-03-02");
        let inv = invoice("i1", "Asha Rao", 5_900.0, 900.0, "2024-03-01");
        let links = vec![ManualLink {
            payment_id: "p1".to_string(),
            invoice_id: "i-other".to_string(),
        }];
        let plan = propose_links(&[linked, no_gst], &[inv], &links, month("2024-03"));
        assert_eq!(plan.candidate_payment_count, 0);
        assert!(plan.proposals.is_empty());
    }

    struct FlakyWriter {
        fail_for: &'static str,
        written: Vec<(String, String)>,
    }

    impl LinkWriter for FlakyWriter {
        fn upsert_link(&mut self, payment_id: &str, invoice_id: &str) -> Result<(), String> {
            if payment_id == self.fail_for {
                return Err("disk I/O error".to_string());
            }
            self.written
                .push((payment_id.to_string(), invoice_id.to_string()));
            Ok(())
        }
    }

    #[test]
    fn failed_write_does_not_abort_batch() {
        let payments = vec![
            payment("p1", "Asha Rao", 1_180.0, 180.0, "2024-03-02"),
            payment("p2", "Vikram Shah", 2_360.0, 360.0, "2024-03-02"),
            payment("p3", "Meera Iyer", 3_540.0, 540.0, "2024-03-02"),
        ];
        let invoices = vec![
            invoice("i1", "Asha Rao", 1_180.0, 180.0, "2024-03-01"),
            invoice("i2", "Vikram Shah", 2_360.0, 360.0, "2024-03-01"),
            invoice("i3", "Meera Iyer", 3_540.0, 540.0, "2024-03-01"),
        ];
        let plan = propose_links(&payments, &invoices, &[], month("2024-03"));
        assert_eq!(plan.proposals.len(), 3);

        let mut writer = FlakyWriter {
            fail_for: "p2",
            written: Vec::new(),
        };
        let outcome = apply_proposals(&mut writer, &plan.proposals);
        assert_eq!(outcome.linked.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].payment_id, "p2");
        assert_eq!(
            writer.written,
            vec![
                ("p1".to_string(), "i1".to_string()),
                ("p3".to_string(), "i3".to_string())
            ]
        );
    }

    fn link_set(db_path: &Path) -> Vec<(String, String)> {
        let conn = Connection::open(db_path).expect("open");
        let mut out = load_manual_links(&conn)
            .expect("links")
            .into_iter()
            .map(|l| (l.payment_id, l.invoice_id))
            .collect::<Vec<_>>();
        out.sort();
        out
    }

    #[test]
    fn rerunning_auto_assign_is_a_no_op() {
        let db_path = create_migrated_db("cowork_auto_assign_test");
        seed(
            &db_path,
            r#"
            INSERT INTO customers(id, first_name, last_name, company_name) VALUES
              ('c1', 'Asha', 'Rao', 'Rao Labs Pvt Ltd'),
              ('c2', 'Vikram', 'Shah', NULL);
            INSERT INTO spaces(id, name, category, price_cents) VALUES
              ('s1', 'Cabin 1', 'Private Cabin', 2500000),
              ('s2', 'Desk 9', 'Hot Desk', 600000);
            INSERT INTO assignments(id, customer_id, space_id, start_date, gst_included) VALUES
              ('a1', 'c1', 's1', '2024-01-01', 1),
              ('a2', 'c2', 's2', '2024-01-01', 1);
            INSERT INTO payments(id, assignment_id, amount_cents, gst_amount_cents, payment_date) VALUES
              ('p1', 'a1', 2950000, 450000, '2024-03-05'),
              ('p2', 'a2', 708000, 108000, '2024-03-07'),
              ('p3', 'a2', 708000, 108000, '2024-04-07');
            INSERT INTO external_invoices(id, invoice_number, invoice_date, customer_name, total_cents, base_cents, gst_cents, month_key) VALUES
              ('i1', 'INV-101', '2024-03-01', 'RAO LABS PVT LTD', 2950000, 2500000, 450000, '2024-03'),
              ('i2', 'INV-102', '2024-03-01', 'Vikram Shah', 708000, 600000, 108000, '2024-03'),
              ('i3', 'INV-103', '2024-03-01', 'Unknown Tenant', 99900, 84661, 15239, '2024-03');
            "#,
        );

        let first = auto_assign_links_at_db_path(
            &db_path,
            AutoAssignRequest {
                month: Some("2024-03".to_string()),
            },
        )
        .expect("first run");
        assert_eq!(first["linked_count"], 2);
        assert_eq!(first["unmatched_count"], 1);
        assert_eq!(first["failed_count"], 0);
        let after_first = link_set(&db_path);
        assert_eq!(
            after_first,
            vec![
                ("p1".to_string(), "i1".to_string()),
                ("p2".to_string(), "i2".to_string())
            ]
        );

        let second = auto_assign_links_at_db_path(
            &db_path,
            AutoAssignRequest {
                month: Some("2024-03".to_string()),
            },
        )
        .expect("second run");
        assert_eq!(second["linked_count"], 0);
        assert_eq!(second["candidate_payment_count"], 0);
        assert_eq!(link_set(&db_path), after_first);

        let _ = fs::remove_file(&db_path);
    }
}
