use calamine::{open_workbook_auto, Reader};
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::ledger_db::open_ledger_connection;
use crate::money::{cents_to_rupee_text, parse_amount_to_cents};

pub const DEFAULT_SOURCE_TYPE: &str = "zoho_invoices";
const REQUIRED_FIELDS: &[&str] = &["invoice_date", "customer_name", "total_amount"];
const MAX_ERROR_SAMPLES: usize = 20;
const PREVIEW_ROW_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct InvoicePreviewRequest {
    pub source_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceImportRequest {
    pub source_path: Option<String>,
    pub source_type: Option<String>,
}

#[derive(Debug, Clone)]
struct ParsedInvoiceRow {
    invoice_number: String,
    invoice_date: String,
    customer_name: String,
    total_cents: i64,
    base_cents: i64,
    gst_cents: i64,
}

impl ParsedInvoiceRow {
    fn month_key(&self) -> &str {
        &self.invoice_date[..7]
    }

    fn preview_json(&self) -> Value {
        json!({
            "invoice_number": self.invoice_number,
            "invoice_date": self.invoice_date,
            "customer_name": self.customer_name,
            "total": cents_to_rupee_text(self.total_cents),
            "base": cents_to_rupee_text(self.base_cents),
            "gst": cents_to_rupee_text(self.gst_cents),
        })
    }
}

#[derive(Debug)]
struct ParseInputFileResult {
    rows: Vec<ParsedInvoiceRow>,
    errors: Vec<String>,
    mapping: BTreeMap<String, String>,
    header_row: usize,
}

#[derive(Debug)]
struct AliasSpec {
    field: &'static str,
    aliases: &'static [&'static str],
}

const INVOICE_ALIAS_SPECS: &[AliasSpec] = &[
    AliasSpec {
        field: "invoice_number",
        aliases: &[
            "Invoice Number",
            "Invoice No",
            "Invoice No.",
            "Invoice#",
            "Inv No",
            "Bill Number",
            "Document Number",
        ],
    },
    AliasSpec {
        field: "invoice_date",
        aliases: &[
            "Invoice Date",
            "Date",
            "Inv Date",
            "Bill Date",
            "Document Date",
        ],
    },
    AliasSpec {
        field: "customer_name",
        aliases: &[
            "Customer Name",
            "Customer",
            "Client Name",
            "Client",
            "Billing Name",
            "Party Name",
            "Display Name",
        ],
    },
    AliasSpec {
        field: "total_amount",
        aliases: &[
            "Total",
            "Invoice Total",
            "Total Amount",
            "Grand Total",
            "Total (INR)",
            "Total (BCY)",
            "Amount",
        ],
    },
    AliasSpec {
        field: "base_amount",
        aliases: &[
            "Sub Total",
            "SubTotal",
            "Sub Total (BCY)",
            "Taxable Amount",
            "Taxable Value",
            "Base Amount",
            "Amount Before Tax",
        ],
    },
    AliasSpec {
        field: "gst_amount",
        aliases: &["GST", "GST Amount", "Total GST", "Tax Amount", "Total Tax", "Tax"],
    },
    AliasSpec {
        field: "cgst",
        aliases: &["CGST", "CGST Amount"],
    },
    AliasSpec {
        field: "sgst",
        aliases: &["SGST", "SGST Amount", "UTGST"],
    },
    AliasSpec {
        field: "igst",
        aliases: &["IGST", "IGST Amount"],
    },
];

fn trim_cell(text: &str) -> String {
    text.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_string()
}

fn normalize_key(key: &str) -> String {
    trim_cell(key)
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn row_get(row: &[String], idx: Option<usize>) -> String {
    idx.and_then(|i| row.get(i).cloned())
        .map(|s| trim_cell(&s))
        .unwrap_or_default()
}

fn resolve_alias_mapping_from_row(row: &[String], specs: &[AliasSpec]) -> HashMap<String, usize> {
    let mut normalized: HashMap<String, usize> = HashMap::new();
    for (idx, cell) in row.iter().enumerate() {
        let key = normalize_key(cell);
        if !key.is_empty() {
            normalized.entry(key).or_insert(idx);
        }
    }

    let mut mapping = HashMap::new();
    for spec in specs {
        for alias in spec.aliases {
            if let Some(idx) = normalized.get(&normalize_key(alias)) {
                mapping.insert(spec.field.to_string(), *idx);
                break;
            }
        }
    }
    mapping
}

fn find_header_row(
    rows: &[Vec<String>],
    specs: &[AliasSpec],
    required: &[&str],
) -> Result<(usize, HashMap<String, usize>), String> {
    'outer: for (idx, row) in rows.iter().enumerate() {
        let mapping = resolve_alias_mapping_from_row(row, specs);
        for req in required {
            if !mapping.contains_key(*req) {
                continue 'outer;
            }
        }
        return Ok((idx, mapping));
    }
    Err(format!(
        "invalid invoice file: no header row with columns {}",
        required.join(", ")
    ))
}

fn mapping_headers(
    header_row: &[String],
    mapping_idx: &HashMap<String, usize>,
) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();
    for (field, idx) in mapping_idx {
        if let Some(header) = header_row.get(*idx) {
            mapping.insert(field.clone(), trim_cell(header));
        }
    }
    mapping
}

fn expand_year(year: i32, raw_len: usize) -> i32 {
    if raw_len <= 2 {
        2000 + year
    } else {
        year
    }
}

fn parse_numeric_parts(text: &str) -> Option<Vec<(i32, usize)>> {
    let parts = text.split(['-', '/', '.']).collect::<Vec<_>>();
    if parts.len() != 3 {
        return None;
    }
    let mut out = Vec::with_capacity(3);
    for part in parts {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        out.push((part.parse::<i32>().ok()?, part.len()));
    }
    Some(out)
}

fn from_parts(year: i32, month: i32, day: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

fn parse_spreadsheet_serial(text: &str) -> Option<NaiveDate> {
    let number = text.parse::<f64>().ok()?;
    if !number.is_finite() || number <= 0.0 || number > 2_958_465.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(number.floor() as i64))
}

/// Accepts `YYYY-MM-DD`, day-first `DD/MM/YYYY` (also with `-` or `.`),
/// month-first when the day-first reading is impossible, `12 Jan 2024`
/// style and spreadsheet serial numbers.
pub fn parse_invoice_date(raw: &str) -> Result<NaiveDate, String> {
    let text = trim_cell(raw);
    if text.is_empty() {
        return Err("missing invoice date".to_string());
    }

    let first_token = text.split([' ', 'T']).next().unwrap_or_default();
    if let Some(parts) = parse_numeric_parts(first_token) {
        let (a, a_len) = parts[0];
        let (b, _) = parts[1];
        let (c, c_len) = parts[2];
        if a_len == 4 {
            if let Some(date) = from_parts(a, b, c) {
                return Ok(date);
            }
        } else {
            let year = expand_year(c, c_len);
            if let Some(date) = from_parts(year, b, a).or_else(|| from_parts(year, a, b)) {
                return Ok(date);
            }
        }
    }

    for fmt in ["%d %b %Y", "%d-%b-%Y", "%d %B %Y", "%b %d, %Y", "%B %d, %Y", "%d-%b-%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&text, fmt) {
            return Ok(date);
        }
    }

    parse_spreadsheet_serial(&text).ok_or_else(|| format!("unsupported date format: {raw}"))
}

fn amount_or_none(text: &str) -> Result<Option<i64>, String> {
    if text.is_empty() {
        Ok(None)
    } else {
        parse_amount_to_cents(text).map(Some)
    }
}

fn fallback_invoice_number(date: &str, customer: &str, total_cents: i64) -> String {
    let digest = Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("cowork:invoice:{date}:{customer}:{total_cents}").as_bytes(),
    );
    format!("AUTO-{}", &digest.simple().to_string()[..12])
}

fn invoice_id_from_number(invoice_number: &str) -> String {
    let digest = Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("cowork:external_invoice:{invoice_number}").as_bytes(),
    );
    format!("inv_{}", &digest.simple().to_string()[..16])
}

fn parse_invoice_row(row: &[String], mapping_idx: &HashMap<String, usize>) -> Result<ParsedInvoiceRow, String> {
    let cell = |field: &str| row_get(row, mapping_idx.get(field).copied());
    let overflow = || "amount out of range: invoice amounts overflow".to_string();

    let invoice_date = parse_invoice_date(&cell("invoice_date"))?
        .format("%Y-%m-%d")
        .to_string();
    let customer_name = cell("customer_name");
    let total = amount_or_none(&cell("total_amount"))?;
    let base = amount_or_none(&cell("base_amount"))?;

    let gst = match amount_or_none(&cell("gst_amount"))? {
        Some(v) => Some(v),
        None => {
            let split = [cell("cgst"), cell("sgst"), cell("igst")]
                .iter()
                .map(|t| amount_or_none(t))
                .collect::<Result<Vec<_>, _>>()?;
            if split.iter().any(Option::is_some) {
                let sum = split
                    .into_iter()
                    .flatten()
                    .try_fold(0_i64, i64::checked_add)
                    .ok_or_else(overflow)?;
                Some(sum)
            } else {
                None
            }
        }
    };

    let (total_cents, base_cents, gst_cents) = match (total, base, gst) {
        (Some(t), Some(b), Some(g)) => (t, b, g),
        (Some(t), Some(b), None) => (t, b, t.checked_sub(b).ok_or_else(overflow)?),
        (Some(t), None, Some(g)) => (t, t.checked_sub(g).ok_or_else(overflow)?, g),
        (Some(t), None, None) => (t, t, 0),
        (None, Some(b), g) => {
            let g = g.unwrap_or(0);
            (b.checked_add(g).ok_or_else(overflow)?, b, g)
        }
        (None, None, _) => return Err("missing total amount".to_string()),
    };

    let invoice_number = {
        let v = cell("invoice_number");
        if v.is_empty() {
            fallback_invoice_number(&invoice_date, &customer_name, total_cents)
        } else {
            v
        }
    };

    Ok(ParsedInvoiceRow {
        invoice_number,
        invoice_date,
        customer_name,
        total_cents,
        base_cents,
        gst_cents,
    })
}

fn parse_invoice_rows(rows: &[Vec<String>]) -> Result<ParseInputFileResult, String> {
    let (header_idx, mapping_idx) = find_header_row(rows, INVOICE_ALIAS_SPECS, REQUIRED_FIELDS)?;
    let mapping = mapping_headers(&rows[header_idx], &mapping_idx);

    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    for (offset, row) in rows[(header_idx + 1)..].iter().enumerate() {
        let line_no = header_idx + 2 + offset;
        if row.iter().all(|c| trim_cell(c).is_empty()) {
            continue;
        }
        let date_raw = row_get(row, mapping_idx.get("invoice_date").copied());
        let customer_raw = row_get(row, mapping_idx.get("customer_name").copied());
        let total_raw = row_get(row, mapping_idx.get("total_amount").copied());
        if date_raw.is_empty() && customer_raw.is_empty() && total_raw.is_empty() {
            continue;
        }
        match parse_invoice_row(row, &mapping_idx) {
            Ok(item) => parsed.push(item),
            Err(err) => {
                log::warn!("skipping invoice row {line_no}: {err}");
                errors.push(format!("row {line_no}: {err}"));
            }
        }
    }

    Ok(ParseInputFileResult {
        rows: parsed,
        errors,
        mapping,
        header_row: header_idx + 1,
    })
}

fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| format!("read CSV failed: {e}"))?;

    let mut rows = Vec::new();
    // Excel exports are often Windows-1252; undecodable bytes become U+FFFD.
    for rec in reader.byte_records() {
        let rec = rec.map_err(|e| format!("read CSV row failed: {e}"))?;
        rows.push(
            rec.iter()
                .map(|field| trim_cell(&String::from_utf8_lossy(field)))
                .collect(),
        );
    }
    Ok(rows)
}

fn read_xlsx_rows(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let mut workbook = open_workbook_auto(path).map_err(|e| format!("open xlsx failed: {e}"))?;
    let sheet_names = workbook.sheet_names().to_owned();
    let first_sheet = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| "invalid invoice file: xlsx has no worksheet".to_string())?;

    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| format!("read xlsx worksheet failed: {e}"))?;

    Ok(range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| trim_cell(&cell.to_string()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>())
}

fn parse_input_file(file_path: &Path) -> Result<ParseInputFileResult, String> {
    if !file_path.exists() {
        return Err(format!("import file not found: {}", file_path.to_string_lossy()));
    }
    if !file_path.is_file() {
        return Err(format!(
            "invalid invoice file: not a regular file: {}",
            file_path.to_string_lossy()
        ));
    }

    let suffix = file_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let rows = match suffix.as_str() {
        "csv" => read_csv_rows(file_path)?,
        "xlsx" | "xls" => read_xlsx_rows(file_path)?,
        _ => {
            return Err(format!(
                "invalid invoice file: unsupported format .{suffix} (expected .csv or .xlsx)"
            ))
        }
    };
    parse_invoice_rows(&rows)
}

fn ensure_schema_ready(conn: &Connection) -> Result<(), String> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('external_invoices','import_jobs')",
        )
        .map_err(|e| format!("check database tables failed: {e}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| format!("read database tables failed: {e}"))?;
    let mut table_names = HashSet::new();
    for row in rows {
        table_names.insert(row.map_err(|e| format!("read database tables failed: {e}"))?);
    }
    let missing = ["external_invoices", "import_jobs"]
        .iter()
        .filter(|t| !table_names.contains(**t))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(format!(
            "database schema not ready, missing tables: {}; run migrations first",
            missing.join(", ")
        ));
    }
    Ok(())
}

/// Imported invoices are immutable: a number already on file is left alone.
fn insert_invoice(
    conn: &Connection,
    row: &ParsedInvoiceRow,
    source_type: &str,
    source_file: &str,
    import_job_id: &str,
) -> Result<bool, String> {
    let changed = conn
        .execute(
            r#"
            INSERT INTO external_invoices(
                id, invoice_number, invoice_date, customer_name, total_cents, base_cents,
                gst_cents, month_key, source_type, source_file, import_job_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(invoice_number) DO NOTHING
            "#,
            params![
                invoice_id_from_number(&row.invoice_number),
                row.invoice_number,
                row.invoice_date,
                row.customer_name,
                row.total_cents,
                row.base_cents,
                row.gst_cents,
                row.month_key(),
                source_type,
                source_file,
                import_job_id,
            ],
        )
        .map_err(|e| format!("write invoice {} failed: {e}", row.invoice_number))?;
    Ok(changed > 0)
}

fn resolve_source_path_text(source_path: Option<String>) -> Result<String, String> {
    let path = source_path.unwrap_or_default().trim().to_string();
    if path.is_empty() {
        return Err("source_path is required".to_string());
    }
    Ok(path)
}

pub fn preview_invoice_file_at_path(file_path: &Path) -> Result<Value, String> {
    let parsed = parse_input_file(file_path)?;
    Ok(json!({
        "file": file_path.to_string_lossy().to_string(),
        "header_row": parsed.header_row,
        "mapping": parsed.mapping,
        "parsed_count": parsed.rows.len(),
        "error_count": parsed.errors.len(),
        "errors": parsed.errors.iter().take(MAX_ERROR_SAMPLES).collect::<Vec<_>>(),
        "preview_rows": parsed
            .rows
            .iter()
            .take(PREVIEW_ROW_LIMIT)
            .map(ParsedInvoiceRow::preview_json)
            .collect::<Vec<_>>(),
    }))
}

pub fn import_invoice_file_at_db_path(
    db_path: &Path,
    file_path: &Path,
    source_type: &str,
) -> Result<Value, String> {
    let parsed = parse_input_file(file_path)?;

    let conn = open_ledger_connection(db_path)?;
    ensure_schema_ready(&conn)?;

    let job_id = Uuid::new_v4().to_string();
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let file_text = file_path.to_string_lossy().to_string();
    let metadata_json = serde_json::to_string(&json!({
        "source_type": source_type,
        "source_file": file_text,
        "header_row": parsed.header_row,
        "mapping": parsed.mapping,
    }))
    .map_err(|e| format!("serialize import job metadata failed: {e}"))?;

    conn.execute(
        r#"
        INSERT INTO import_jobs(id, source_type, source_file, status, started_at, total_count, imported_count, error_count, metadata_json)
        VALUES (?1, ?2, ?3, 'running', ?4, 0, 0, 0, ?5)
        "#,
        params![job_id, source_type, file_text, started_at, metadata_json],
    )
    .map_err(|e| format!("create import job failed: {e}"))?;

    let total_count = (parsed.rows.len() + parsed.errors.len()) as i64;
    let mut imported_count = 0_i64;
    let mut duplicate_count = 0_i64;
    let mut error_count = parsed.errors.len() as i64;
    let mut error_samples = parsed
        .errors
        .iter()
        .take(MAX_ERROR_SAMPLES)
        .cloned()
        .collect::<Vec<_>>();

    for row in &parsed.rows {
        match insert_invoice(&conn, row, source_type, &file_text, &job_id) {
            Ok(true) => imported_count += 1,
            Ok(false) => duplicate_count += 1,
            Err(err) => {
                log::warn!("{err}");
                error_count += 1;
                if error_samples.len() < MAX_ERROR_SAMPLES {
                    error_samples.push(err);
                }
            }
        }
    }

    let finished_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let error_message = if error_samples.is_empty() {
        None
    } else {
        Some(error_samples.join("\n"))
    };
    conn.execute(
        r#"
        UPDATE import_jobs
        SET status='success',
            finished_at=?1,
            total_count=?2,
            imported_count=?3,
            error_count=?4,
            error_message=?5
        WHERE id=?6
        "#,
        params![
            finished_at,
            total_count,
            imported_count,
            error_count,
            error_message,
            job_id
        ],
    )
    .map_err(|e| format!("update import job failed: {e}"))?;

    log::info!(
        "imported {imported_count} invoices from {file_text} ({duplicate_count} already on file, {error_count} skipped)"
    );

    Ok(json!({
        "db_path": db_path.to_string_lossy().to_string(),
        "file": file_text,
        "source_type": source_type,
        "imported_count": imported_count,
        "duplicate_count": duplicate_count,
        "error_count": error_count,
        "import_job_id": job_id,
        "errors": error_samples,
    }))
}

pub fn preview_invoice_file(req: InvoicePreviewRequest) -> Result<Value, String> {
    let source_path = resolve_source_path_text(req.source_path)?;
    preview_invoice_file_at_path(Path::new(&source_path))
}

pub fn import_invoice_file(db_path: &Path, req: InvoiceImportRequest) -> Result<Value, String> {
    let source_path = resolve_source_path_text(req.source_path)?;
    let source_type = req
        .source_type
        .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string());
    let source_type = source_type.trim();
    if source_type.is_empty() {
        return Err("source_type must not be empty".to_string());
    }
    import_invoice_file_at_db_path(db_path, Path::new(&source_path), source_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::{create_migrated_db, create_temp_path};
    use std::fs;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn invoice_dates_accept_common_spellings() {
        assert_eq!(parse_invoice_date("2024-03-05"), Ok(ymd(2024, 3, 5)));
        assert_eq!(parse_invoice_date("2024-03-05T10:00:00"), Ok(ymd(2024, 3, 5)));
        assert_eq!(parse_invoice_date("05/03/2024"), Ok(ymd(2024, 3, 5)));
        assert_eq!(parse_invoice_date("05-03-2024"), Ok(ymd(2024, 3, 5)));
        assert_eq!(parse_invoice_date("05.03.24"), Ok(ymd(2024, 3, 5)));
        assert_eq!(parse_invoice_date("03/25/2024"), Ok(ymd(2024, 3, 25)));
        assert_eq!(parse_invoice_date("12 Jan 2024"), Ok(ymd(2024, 1, 12)));
        assert_eq!(parse_invoice_date("12-Jan-2024"), Ok(ymd(2024, 1, 12)));
        assert_eq!(parse_invoice_date("45352"), Ok(ymd(2024, 3, 1)));
        assert!(parse_invoice_date("").is_err());
        assert!(parse_invoice_date("next tuesday").is_err());
        assert!(parse_invoice_date("31/31/2024").is_err());
    }

    #[test]
    fn gst_falls_back_to_split_columns_then_difference() {
        let rows = vec![
            vec!["Invoice Report".to_string()],
            vec![],
            vec![
                "Invoice Date", "Invoice#", "Customer Name", "Sub Total", "CGST", "SGST", "Total",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            vec!["01/03/2024", "INV-1", "Asha Rao", "10,000.00", "900", "900", "₹11,800.00"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            vec!["02/03/2024", "INV-2", "Vikram Shah", "5000", "", "", "5900"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            vec!["03/03/2024", "", "Walk-in", "", "", "", "Rs. 500"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        ];
        let parsed = parse_invoice_rows(&rows).expect("parse rows");
        assert_eq!(parsed.header_row, 3);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.rows.len(), 3);

        assert_eq!(parsed.rows[0].gst_cents, 180_000);
        assert_eq!(parsed.rows[0].total_cents, 1_180_000);
        assert_eq!(parsed.rows[1].gst_cents, 90_000);
        assert_eq!(parsed.rows[1].base_cents, 500_000);
        assert_eq!(parsed.rows[2].gst_cents, 0);
        assert_eq!(parsed.rows[2].base_cents, 50_000);
        assert!(parsed.rows[2].invoice_number.starts_with("AUTO-"));
        assert_eq!(parsed.rows[0].month_key(), "2024-03");
    }

    #[test]
    fn missing_required_header_is_rejected() {
        let rows = vec![vec!["Invoice#".to_string(), "Total".to_string()]];
        let err = parse_invoice_rows(&rows).expect_err("no header");
        assert!(err.contains("no header row"));
    }

    fn write_sample_invoice_csv(path: &Path) {
        let csv = "\
Zoho Books - Invoice Details\n\
Invoice Number,Invoice Date,Customer Name,Taxable Amount,GST Amount,Invoice Total\n\
INV-0101,05/03/2024,Asha Rao,\"10,000.00\",\"1,800.00\",\"11,800.00\"\n\
INV-0102,06/03/2024,Rao Labs Pvt Ltd,25000,4500,29500\n\
INV-0103,not-a-date,Vikram Shah,5000,900,5900\n\
INV-0104,12 Mar 2024,Meera Iyer,,,abc\n\
,,,,,\n\
Total,,,,,\"47,200.00\"\n";
        fs::write(path, csv).expect("write temp invoice csv");
    }

    #[test]
    fn invoice_csv_preview_and_reimport_are_idempotent() {
        let db_path = create_migrated_db("cowork_invoice_import_test");
        let csv_path = create_temp_path("cowork_invoice_fixture", "csv");
        write_sample_invoice_csv(&csv_path);

        let preview = preview_invoice_file_at_path(&csv_path).expect("preview invoices");
        assert_eq!(preview["parsed_count"], 2);
        assert_eq!(preview["error_count"], 3);
        assert_eq!(preview["header_row"], 2);
        assert_eq!(preview["mapping"]["total_amount"], "Invoice Total");

        let first = import_invoice_file_at_db_path(&db_path, &csv_path, "zoho_csv")
            .expect("first import");
        let second = import_invoice_file_at_db_path(&db_path, &csv_path, "zoho_csv")
            .expect("second import");
        assert_eq!(first["imported_count"], 2);
        assert_eq!(first["error_count"], 3);
        assert_eq!(second["imported_count"], 0);
        assert_eq!(second["duplicate_count"], 2);

        let conn = Connection::open(&db_path).expect("open temp db for verification");
        let invoice_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM external_invoices", [], |row| row.get(0))
            .expect("count invoices");
        let job_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM import_jobs WHERE source_type='zoho_csv' AND status='success'",
                [],
                |row| row.get(0),
            )
            .expect("count import jobs");
        let (month_key, gst_cents): (String, i64) = conn
            .query_row(
                "SELECT month_key, gst_cents FROM external_invoices WHERE invoice_number='INV-0101'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("read imported invoice");
        assert_eq!(invoice_count, 2);
        assert_eq!(job_count, 2);
        assert_eq!(month_key, "2024-03");
        assert_eq!(gst_cents, 180_000);

        let _ = fs::remove_file(&csv_path);
        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn windows_1252_cell_does_not_sink_the_batch() {
        let csv_path = create_temp_path("cowork_invoice_cp1252", "csv");
        let mut bytes = b"Invoice Number,Invoice Date,Customer Name,Invoice Total\n\
INV-1,01/03/2024,Asha Rao,1180\n\
INV-2,02/03/2024,Jos"
            .to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b" Cafe,2360\nINV-3,03/03/2024,Vikram Shah,590\n");
        fs::write(&csv_path, bytes).expect("write cp1252 csv");

        let preview = preview_invoice_file_at_path(&csv_path).expect("preview invoices");
        assert_eq!(preview["parsed_count"], 3);
        assert_eq!(preview["error_count"], 0);
        assert_eq!(preview["preview_rows"][1]["customer_name"], "Jos\u{FFFD} Cafe");
        assert_eq!(preview["preview_rows"][2]["invoice_number"], "INV-3");

        let _ = fs::remove_file(&csv_path);
    }

    #[test]
    fn overflowing_amounts_become_row_errors() {
        let header = ["Invoice Date", "Customer Name", "Sub Total", "GST", "Total"];
        let rows = vec![
            header.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            vec!["01/03/2024", "Asha Rao", "92233720368547758.07", "1", ""]
                .into_iter()
                .map(str::to_string)
                .collect(),
            vec!["02/03/2024", "Vikram Shah", "", "2", "-92233720368547758.07"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            vec!["03/03/2024", "Meera Iyer", "1000", "180", ""]
                .into_iter()
                .map(str::to_string)
                .collect(),
        ];
        let parsed = parse_invoice_rows(&rows).expect("parse rows");
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].total_cents, 118_000);
        assert_eq!(parsed.errors.len(), 2);
        assert!(parsed.errors[0].starts_with("row 2: amount out of range"));
        assert!(parsed.errors[1].starts_with("row 3: amount out of range"));
    }

    #[test]
    fn unsupported_extension_and_missing_path() {
        let txt_path = create_temp_path("cowork_invoice_fixture", "txt");
        fs::write(&txt_path, "Invoice Date,Customer,Total\n").expect("write txt");
        let err = preview_invoice_file_at_path(&txt_path).expect_err("txt rejected");
        assert!(err.contains("unsupported format"));
        let _ = fs::remove_file(&txt_path);

        let err = preview_invoice_file(InvoicePreviewRequest { source_path: None })
            .expect_err("path required");
        assert!(err.contains("source_path is required"));
    }
}
