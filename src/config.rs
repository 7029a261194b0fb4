use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "COWORK_LEDGER_CONFIG";
pub const DB_PATH_ENV: &str = "COWORK_LEDGER_DB";
pub const EVAL_MONTH_ENV: &str = "COWORK_LEDGER_EVAL_MONTH";
const DEFAULT_LEDGER_DB_RELATIVE_PATH: &str = "data/ledger/cowork.db";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: Option<PathBuf>,
    /// `YYYY-MM`; pins the pending-rent evaluation month (useful for month-end runs).
    pub evaluation_month: Option<String>,
    pub log_level: Option<String>,
}

impl LedgerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("read config file failed ({}): {e}", path.to_string_lossy()))?;
        serde_json::from_str::<Self>(&raw)
            .map_err(|e| format!("config file invalid ({}): {e}", path.to_string_lossy()))
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(db_path) = non_empty(DB_PATH_ENV) {
            self.db_path = Some(PathBuf::from(db_path));
        }
        if let Some(month) = non_empty(EVAL_MONTH_ENV) {
            self.evaluation_month = Some(month);
        }
        self
    }

    pub fn resolve_ledger_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_DB_RELATIVE_PATH))
    }
}

/// File named by `COWORK_LEDGER_CONFIG` (if any), then environment overrides.
pub fn load_config() -> Result<LedgerConfig, String> {
    let base = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => LedgerConfig::from_json_file(Path::new(path.trim()))?,
        _ => LedgerConfig::default(),
    };
    Ok(base.apply_overrides(|key| std::env::var(key).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::create_temp_path;
    use std::collections::HashMap;

    #[test]
    fn json_file_then_overrides() {
        let path = create_temp_path("cowork_ledger_config_test", "json");
        fs::write(
            &path,
            r#"{"db_path": "/var/lib/cowork/ledger.db", "log_level": "debug"}"#,
        )
        .expect("write config");

        let cfg = LedgerConfig::from_json_file(&path).expect("load config");
        assert_eq!(cfg.resolve_ledger_db_path(), PathBuf::from("/var/lib/cowork/ledger.db"));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert!(cfg.evaluation_month.is_none());

        let env = HashMap::from([
            (DB_PATH_ENV.to_string(), "/tmp/override.db".to_string()),
            (EVAL_MONTH_ENV.to_string(), " 2024-03 ".to_string()),
        ]);
        let cfg = cfg.apply_overrides(|key| env.get(key).cloned());
        assert_eq!(cfg.resolve_ledger_db_path(), PathBuf::from("/tmp/override.db"));
        assert_eq!(cfg.evaluation_month.as_deref(), Some("2024-03"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn defaults_when_nothing_configured() {
        let cfg = LedgerConfig::default().apply_overrides(|_| None);
        assert_eq!(
            cfg.resolve_ledger_db_path(),
            PathBuf::from(DEFAULT_LEDGER_DB_RELATIVE_PATH)
        );
    }

    #[test]
    fn malformed_config_file_is_reported() {
        let path = create_temp_path("cowork_ledger_bad_config_test", "json");
        fs::write(&path, "{not json").expect("write config");
        let err = LedgerConfig::from_json_file(&path).expect_err("should fail");
        assert!(err.contains("config file invalid"));
        let _ = fs::remove_file(&path);
    }
}
