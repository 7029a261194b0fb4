use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, Row};

use crate::billing_cycle::SpaceCategory;
use crate::money::cents_to_rupees;
use crate::period::PeriodKey;
use crate::records::{
    Assignment, AssignmentStatus, Customer, ExternalInvoice, ManualLink, Payment, Space,
};

#[derive(Debug, Default, Clone)]
pub struct AssignmentFilter {
    pub status: Option<AssignmentStatus>,
}

#[derive(Debug, Default, Clone)]
pub struct PaymentFilter {
    /// Keeps payments whose `Payment::ledger_period` equals this period.
    /// Applied after loading so legacy date spellings are judged the same
    /// way the matcher judges them.
    pub month: Option<PeriodKey>,
    pub assignment_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone)]
pub struct InvoiceFilter {
    /// Matched against `ExternalInvoice::period`.
    pub month: Option<PeriodKey>,
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn customer_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get::<_, String>(offset)?,
        first_name: row.get::<_, Option<String>>(offset + 1)?,
        last_name: row.get::<_, Option<String>>(offset + 2)?,
        name: row.get::<_, Option<String>>(offset + 3)?,
        company_name: row.get::<_, Option<String>>(offset + 4)?,
        gst_liable: row.get::<_, i64>(offset + 5)? != 0,
    })
}

pub fn load_assignments(
    conn: &Connection,
    filter: &AssignmentFilter,
) -> Result<Vec<Assignment>, String> {
    let mut conditions = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    if let Some(status) = filter.status {
        conditions.push("LOWER(TRIM(a.status)) = ?".to_string());
        params.push(SqlValue::Text(status.as_str().to_string()));
    }
    let sql = format!(
        r#"
        SELECT a.id, a.start_date, a.end_date, a.status, a.monthly_price_cents,
               a.gst_included, a.payment_destination,
               c.id, c.first_name, c.last_name, c.name, c.company_name, c.gst_liable,
               s.id, s.name, s.category, s.price_cents, s.is_available
        FROM assignments a
        JOIN customers c ON c.id = a.customer_id
        JOIN spaces s ON s.id = a.space_id
        {}
        ORDER BY s.name ASC, a.id ASC
        "#,
        where_clause(&conditions)
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| format!("query assignments failed: {e}"))?;
    let iter = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(Assignment {
                id: row.get::<_, String>(0)?,
                start_date: row.get::<_, Option<String>>(1)?,
                end_date: row.get::<_, Option<String>>(2)?,
                status: AssignmentStatus::parse(&row.get::<_, String>(3)?),
                monthly_price: row.get::<_, Option<i64>>(4)?.map(cents_to_rupees),
                gst_included: row.get::<_, i64>(5)? != 0,
                payment_destination: row.get::<_, Option<String>>(6)?,
                customer: customer_from_row(row, 7)?,
                space: Space {
                    id: row.get::<_, String>(13)?,
                    name: row.get::<_, String>(14)?,
                    category: SpaceCategory::parse(&row.get::<_, String>(15)?),
                    price: cents_to_rupees(row.get::<_, i64>(16)?),
                    is_available: row.get::<_, i64>(17)? != 0,
                },
            })
        })
        .map_err(|e| format!("query assignments failed: {e}"))?;
    let mut out = Vec::new();
    for row in iter {
        out.push(row.map_err(|e| format!("read assignment failed: {e}"))?);
    }
    Ok(out)
}

pub fn load_payments(conn: &Connection, filter: &PaymentFilter) -> Result<Vec<Payment>, String> {
    let mut conditions = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    if let Some(ids) = &filter.assignment_ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let marks = vec!["?"; ids.len()].join(", ");
        conditions.push(format!("p.assignment_id IN ({marks})"));
        params.extend(ids.iter().cloned().map(SqlValue::Text));
    }
    let sql = format!(
        r#"
        SELECT p.id, p.assignment_id, p.payer_name, p.amount_cents, p.gst_amount_cents,
               p.payment_date, p.paid_for_month, p.method, p.notes,
               c.id, c.first_name, c.last_name, c.name, c.company_name, c.gst_liable
        FROM payments p
        LEFT JOIN assignments a ON a.id = p.assignment_id
        LEFT JOIN customers c ON c.id = a.customer_id
        {}
        ORDER BY p.payment_date ASC, p.created_at ASC, p.id ASC
        "#,
        where_clause(&conditions)
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| format!("query payments failed: {e}"))?;
    let iter = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let customer = match row.get::<_, Option<String>>(9)? {
                Some(_) => Some(customer_from_row(row, 9)?),
                None => None,
            };
            Ok(Payment {
                id: row.get::<_, String>(0)?,
                assignment_id: row.get::<_, Option<String>>(1)?,
                payer_name: row.get::<_, Option<String>>(2)?,
                amount: cents_to_rupees(row.get::<_, i64>(3)?),
                gst_amount: cents_to_rupees(row.get::<_, i64>(4)?),
                payment_date: row.get::<_, Option<String>>(5)?,
                paid_for_month: row.get::<_, Option<String>>(6)?,
                method: row.get::<_, Option<String>>(7)?,
                notes: row.get::<_, Option<String>>(8)?,
                customer,
            })
        })
        .map_err(|e| format!("query payments failed: {e}"))?;
    let mut out = Vec::new();
    for row in iter {
        let payment = row.map_err(|e| format!("read payment failed: {e}"))?;
        if filter.month.is_none() || payment.ledger_period() == filter.month {
            out.push(payment);
        }
    }
    Ok(out)
}

pub fn load_external_invoices(
    conn: &Connection,
    filter: &InvoiceFilter,
) -> Result<Vec<ExternalInvoice>, String> {
    let sql = r#"
        SELECT id, invoice_number, invoice_date, customer_name, total_cents, base_cents,
               gst_cents, month_key
        FROM external_invoices
        ORDER BY invoice_date ASC, invoice_number ASC
        "#;
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| format!("query external invoices failed: {e}"))?;
    let iter = stmt
        .query_map([], |row| {
            Ok(ExternalInvoice {
                id: row.get::<_, String>(0)?,
                invoice_number: row.get::<_, String>(1)?,
                invoice_date: row.get::<_, String>(2)?,
                customer_name: row.get::<_, String>(3)?,
                total_amount: cents_to_rupees(row.get::<_, i64>(4)?),
                base_amount: cents_to_rupees(row.get::<_, i64>(5)?),
                gst_amount: cents_to_rupees(row.get::<_, i64>(6)?),
                month_key: row.get::<_, String>(7)?,
            })
        })
        .map_err(|e| format!("query external invoices failed: {e}"))?;
    let mut out = Vec::new();
    for row in iter {
        let invoice = row.map_err(|e| format!("read external invoice failed: {e}"))?;
        if filter.month.is_none() || invoice.period() == filter.month {
            out.push(invoice);
        }
    }
    Ok(out)
}

pub fn load_manual_links(conn: &Connection) -> Result<Vec<ManualLink>, String> {
    let mut stmt = conn
        .prepare("SELECT payment_id, invoice_id FROM manual_links ORDER BY linked_at ASC, payment_id ASC")
        .map_err(|e| format!("query manual links failed: {e}"))?;
    let iter = stmt
        .query_map([], |row| {
            Ok(ManualLink {
                payment_id: row.get::<_, String>(0)?,
                invoice_id: row.get::<_, String>(1)?,
            })
        })
        .map_err(|e| format!("query manual links failed: {e}"))?;
    let mut out = Vec::new();
    for row in iter {
        out.push(row.map_err(|e| format!("read manual link failed: {e}"))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::{create_migrated_db, seed};
    use std::fs;

    #[test]
    fn snapshot_reads_embed_customer_and_space() {
        let db_path = create_migrated_db("cowork_snapshot_test");
        seed(
            &db_path,
            r#"
            INSERT INTO customers(id, first_name, last_name, gst_liable) VALUES ('c1', 'Asha', 'Rao', 1);
            INSERT INTO spaces(id, name, category, price_cents) VALUES
              ('s1', 'Cabin 2', 'Private Cabin', 2500000),
              ('s2', 'Desk 7', 'Hot Desk', 600000);
            INSERT INTO assignments(id, customer_id, space_id, start_date, status, monthly_price_cents, gst_included) VALUES
              ('a1', 'c1', 's1', '2024-01-01', 'active', NULL, 1),
              ('a2', 'c1', 's2', '2023-06-01', 'Completed', 550000, 0);
            INSERT INTO payments(id, assignment_id, amount_cents, gst_amount_cents, payment_date, paid_for_month) VALUES
              ('p1', 'a1', 2950000, 450000, '2024-02-03', '2024-02'),
              ('p2', NULL, 118000, 18000, NULL, '2024-02'),
              ('p3', 'a1', 2950000, 450000, '2024-03-04', '2024-03'),
              ('p4', 'a1', 2950000, 450000, '2024/02/09', NULL),
              ('p5', 'a1', 2950000, 450000, 'n/a', '2024-02');
            INSERT INTO external_invoices(id, invoice_number, invoice_date, customer_name, total_cents, base_cents, gst_cents, month_key) VALUES
              ('i1', 'INV-1', '2024-02-01', 'Asha Rao', 2950000, 2500000, 450000, '2024-02'),
              ('i2', 'INV-2', '2024-02-20', 'Asha Rao', 2950000, 2500000, 450000, ''),
              ('i3', 'INV-3', '2024-03-01', 'Asha Rao', 2950000, 2500000, 450000, '2024-03');
            "#,
        );
        let conn = Connection::open(&db_path).expect("open");

        let active = load_assignments(
            &conn,
            &AssignmentFilter {
                status: Some(AssignmentStatus::Active),
            },
        )
        .expect("load active");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].customer.display_name(), "Asha Rao");
        assert_eq!(active[0].space.category, SpaceCategory::PrivateCabin);
        assert_eq!(active[0].base_price(), 25_000.0);

        let all = load_assignments(&conn, &AssignmentFilter::default()).expect("load all");
        assert_eq!(all.len(), 2);
        let a2 = all.iter().find(|a| a.id == "a2").expect("a2");
        assert_eq!(a2.status, AssignmentStatus::Completed);
        assert_eq!(a2.base_price(), 5_500.0);

        let feb = load_payments(
            &conn,
            &PaymentFilter {
                month: PeriodKey::parse("2024-02"),
                assignment_ids: None,
            },
        )
        .expect("load feb payments");
        let ids = feb.iter().map(|p| p.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids.len(), 4);
        assert!(["p1", "p2", "p4", "p5"].iter().all(|id| ids.contains(id)));
        let p1 = feb.iter().find(|p| p.id == "p1").expect("p1");
        assert_eq!(p1.customer_name(), "Asha Rao");
        let p2 = feb.iter().find(|p| p.id == "p2").expect("p2");
        assert!(p2.customer.is_none());

        let feb_invoices = load_external_invoices(
            &conn,
            &InvoiceFilter {
                month: PeriodKey::parse("2024-02"),
            },
        )
        .expect("load feb invoices");
        let invoice_numbers = feb_invoices
            .iter()
            .map(|i| i.invoice_number.as_str())
            .collect::<Vec<_>>();
        assert_eq!(invoice_numbers, vec!["INV-1", "INV-2"]);

        drop(conn);
        let _ = fs::remove_file(&db_path);
    }
}
