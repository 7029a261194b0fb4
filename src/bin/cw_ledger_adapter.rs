use cowork_ledger::{
    apply_embedded_migrations, auto_assign_links_at_db_path, import_invoice_file,
    inspect_status_at_path, link_payment_invoice_at_db_path, load_config, preview_invoice_file,
    query_admin_db_stats_at_path, query_pending_rent_at_db_path, query_reconciliation_at_db_path,
    record_payment_at_db_path, runtime_db_health_check_at_db_path, unlink_payment_at_db_path,
    AutoAssignRequest, InvoiceImportRequest, InvoicePreviewRequest, LedgerConfig,
    LinkPaymentInvoiceRequest, PendingRentQueryRequest, ReconciliationQueryRequest,
    RecordPaymentRequest, UnlinkPaymentRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::io::{self, Read};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    case: Option<AdapterCaseMeta>,
    endpoint: AdapterEndpoint,
    #[serde(default)]
    query: Value,
    dataset: Option<AdapterDataset>,
}

#[derive(Debug, Deserialize)]
struct AdapterCaseMeta {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterEndpoint {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterDataset {
    db_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

fn classify_error_message(message: &str) -> String {
    let validation_keywords = [
        "is required",
        "must be",
        "must not be",
        "invalid amount",
        "amount out of range",
        "invalid invoice file",
        "unsupported date format",
        "config file invalid",
    ];
    if validation_keywords.iter().any(|k| message.contains(k)) {
        return "VALIDATION_ERROR".to_string();
    }

    if message.contains("not found") {
        return "NOT_FOUND_ERROR".to_string();
    }

    let storage_keywords = ["failed", "database", "schema not ready"];
    if storage_keywords.iter().any(|k| message.contains(k)) {
        return "STORAGE_ERROR".to_string();
    }

    "UNKNOWN_ERROR".to_string()
}

fn classify_adapter_error(message: &str) -> String {
    if message.starts_with("unsupported endpoint path:") {
        "UNSUPPORTED_ENDPOINT".to_string()
    } else if message.starts_with("unsupported schema_version:")
        || message.starts_with("request.")
        || message.starts_with("request root invalid:")
        || message.starts_with("invalid JSON request:")
        || message == "empty stdin request"
    {
        "ADAPTER_PROTOCOL_ERROR".to_string()
    } else {
        classify_error_message(message)
    }
}

fn error_response(
    category: impl Into<String>,
    message: impl Into<String>,
    error_type: impl Into<String>,
) -> AdapterResponse {
    AdapterResponse::Error {
        error: AdapterErrorBody {
            category: category.into(),
            message: message.into(),
            error_type: error_type.into(),
        },
    }
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin_json() -> Result<Value, String> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| format!("read stdin failed: {e}"))?;
    if raw.trim().is_empty() {
        return Err("empty stdin request".to_string());
    }
    serde_json::from_str::<Value>(&raw).map_err(|e| format!("invalid JSON request: {e}"))
}

fn parse_query<T: DeserializeOwned>(query: Value, endpoint: &str) -> Result<T, String> {
    let query = if query.is_null() { json!({}) } else { query };
    serde_json::from_value(query).map_err(|e| format!("request.query invalid for {endpoint}: {e}"))
}

fn init_logging(config: Option<&LedgerConfig>, verbose: bool) {
    let fallback = if verbose {
        "debug".to_string()
    } else {
        config
            .and_then(|c| c.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(fallback))
        .target(env_logger::Target::Stderr)
        .try_init();
}

fn dispatch(req: AdapterRequest, config: &LedgerConfig) -> Result<Value, String> {
    if req.schema_version != 1 {
        return Err(format!(
            "unsupported schema_version: {}",
            req.schema_version
        ));
    }

    let path = req
        .endpoint
        .path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "request.endpoint.path missing".to_string())?;
    let db_path = req
        .dataset
        .as_ref()
        .and_then(|d| d.db_path.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| config.resolve_ledger_db_path());
    log::debug!("dispatch {path} against {}", db_path.to_string_lossy());

    match path {
        "/api/db/status" => {
            let status = inspect_status_at_path(&db_path)?;
            serde_json::to_value(status).map_err(|e| format!("serialize db status failed: {e}"))
        }
        "/api/db/migrate" => {
            let result = apply_embedded_migrations(&db_path)?;
            serde_json::to_value(result).map_err(|e| format!("serialize migrate result failed: {e}"))
        }
        "/api/db/stats" => {
            let stats = query_admin_db_stats_at_path(&db_path)?;
            serde_json::to_value(stats).map_err(|e| format!("serialize db stats failed: {e}"))
        }
        "/api/health" => runtime_db_health_check_at_db_path(&db_path),
        "/api/billing/pending" => {
            let mut query_req: PendingRentQueryRequest = parse_query(req.query, "pending")?;
            if query_req.evaluation_month.is_none() {
                query_req.evaluation_month = config.evaluation_month.clone();
            }
            query_pending_rent_at_db_path(&db_path, query_req)
        }
        "/api/billing/payments" => {
            let query_req: RecordPaymentRequest = parse_query(req.query, "payments")?;
            record_payment_at_db_path(&db_path, query_req)
        }
        "/api/reconciliation/compare" => {
            let query_req: ReconciliationQueryRequest = parse_query(req.query, "compare")?;
            query_reconciliation_at_db_path(&db_path, query_req)
        }
        "/api/reconciliation/auto-assign" => {
            let query_req: AutoAssignRequest = parse_query(req.query, "auto-assign")?;
            auto_assign_links_at_db_path(&db_path, query_req)
        }
        "/api/reconciliation/link" => {
            let query_req: LinkPaymentInvoiceRequest = parse_query(req.query, "link")?;
            link_payment_invoice_at_db_path(&db_path, query_req)
        }
        "/api/reconciliation/unlink" => {
            let query_req: UnlinkPaymentRequest = parse_query(req.query, "unlink")?;
            unlink_payment_at_db_path(&db_path, query_req)
        }
        "/api/import/invoices/preview" => {
            let query_req: InvoicePreviewRequest = parse_query(req.query, "invoice preview")?;
            preview_invoice_file(query_req)
        }
        "/api/import/invoices" => {
            let query_req: InvoiceImportRequest = parse_query(req.query, "invoice import")?;
            import_invoice_file(&db_path, query_req)
        }
        _ => Err(format!("unsupported endpoint path: {path}")),
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");

    let config = load_config();
    init_logging(config.as_ref().ok(), verbose);

    let resp = match config
        .and_then(|config| {
            let req = read_stdin_json().and_then(|v| {
                serde_json::from_value::<AdapterRequest>(v)
                    .map_err(|e| format!("request root invalid: {e}"))
            })?;
            if verbose {
                if let Some(case_id) = req.case.as_ref().and_then(|c| c.id.as_deref()) {
                    log::info!("case={case_id}");
                }
                if let Some(path) = req.endpoint.path.as_deref() {
                    log::info!("endpoint={path}");
                }
            }
            dispatch(req, &config)
        }) {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(message) => {
            let category = classify_adapter_error(&message);
            log::warn!("{category}: {message}");
            error_response(category, message, "AdapterError")
        }
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories_follow_message_shape() {
        assert_eq!(
            classify_adapter_error("unsupported endpoint path: /api/nope"),
            "UNSUPPORTED_ENDPOINT"
        );
        assert_eq!(
            classify_adapter_error("request.query invalid for compare: bad"),
            "ADAPTER_PROTOCOL_ERROR"
        );
        assert_eq!(
            classify_adapter_error("month must be YYYY-MM, got: March"),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            classify_adapter_error("assignment not found: a9"),
            "NOT_FOUND_ERROR"
        );
        assert_eq!(
            classify_adapter_error("open database failed: unable to open"),
            "STORAGE_ERROR"
        );
        assert_eq!(classify_adapter_error("something odd"), "UNKNOWN_ERROR");
    }

    #[test]
    fn unknown_endpoint_is_rejected_before_touching_storage() {
        let req: AdapterRequest = serde_json::from_value(json!({
            "schema_version": 1,
            "endpoint": {"path": "/api/nope"},
            "dataset": {"db_path": "/nonexistent/cowork.db"},
        }))
        .expect("request");
        let err = dispatch(req, &LedgerConfig::default()).expect_err("unsupported");
        assert!(err.starts_with("unsupported endpoint path:"));
    }
}
