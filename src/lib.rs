mod admin_health;
pub mod auto_assign;
pub mod billing_cycle;
pub mod config;
pub mod gst;
mod invoice_import;
mod ledger_db;
pub mod money;
pub mod pending_rent;
pub mod period;
mod record_mutations;
pub mod reconciliation;
pub mod records;
pub mod snapshot_queries;

pub use admin_health::runtime_db_health_check_at_db_path;
pub use auto_assign::{auto_assign_links_at_db_path, AutoAssignRequest, LinkWriter};
pub use config::{load_config, LedgerConfig};
pub use invoice_import::{
    import_invoice_file, import_invoice_file_at_db_path, preview_invoice_file,
    preview_invoice_file_at_path, InvoiceImportRequest, InvoicePreviewRequest,
};
pub use ledger_db::{
    apply_embedded_migrations, inspect_status_at_path, query_admin_db_stats_at_path,
    LedgerAdminDbStatsResult, LedgerDbMigrateResult, LedgerDbStatus,
};
pub use pending_rent::{query_pending_rent_at_db_path, PendingRentQueryRequest};
pub use reconciliation::{query_reconciliation_at_db_path, ReconciliationQueryRequest};
pub use record_mutations::{
    create_payment, delete_manual_link, link_payment_invoice_at_db_path,
    record_payment_at_db_path, unlink_payment_at_db_path, upsert_manual_link,
    LinkPaymentInvoiceRequest, PaymentFields, RecordPaymentRequest, UnlinkPaymentRequest,
};
