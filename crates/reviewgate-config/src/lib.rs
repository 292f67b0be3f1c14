mod types;

pub use types::*;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result as AnyResult;
use globset::Glob;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCategory {
    Type,
    Range,
    Dependency,
}

impl ValidationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationCategory::Type => "type",
            ValidationCategory::Range => "range",
            ValidationCategory::Dependency => "dependency",
        }
    }
}

impl fmt::Display for ValidationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse error [type]: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    #[error("config validation error [{category}] for `{field}`: {message}")]
    Validation {
        category: ValidationCategory,
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn category(&self) -> Option<ValidationCategory> {
        match self {
            ConfigError::Read { .. } => None,
            ConfigError::Parse { .. } => Some(ValidationCategory::Type),
            ConfigError::Validation { category, .. } => Some(*category),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub fn load_from(path: impl AsRef<Path>) -> AnyResult<Config> {
    load_from_typed(path).map_err(anyhow::Error::new)
}

pub fn load_from_typed(path: impl AsRef<Path>) -> Result<Config> {
    let path_ref = path.as_ref();
    let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    let cfg: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse { source })?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    validate_enum("output.format", cfg.output.format.as_str(), &["text", "json"])?;

    validate_range_u8("phpcs.severity", cfg.phpcs.severity, 0, 10)?;
    validate_range_u32("scan.retries", cfg.scan.retries, 0, 10)?;

    validate_globs("autoapprove.filetypes", &cfg.autoapprove.filetypes)?;
    validate_globs("wpscan.paths", &cfg.wpscan.paths)?;

    if cfg.phpcs.enabled && cfg.phpcs.standard.trim().is_empty() {
        return Err(validation_error(
            ValidationCategory::Dependency,
            "phpcs.standard",
            "must be non-empty when `phpcs.enabled = true`",
        ));
    }

    let included: BTreeSet<&str> = cfg.phpcs.sniffs_include.iter().map(String::as_str).collect();
    for excluded in &cfg.phpcs.sniffs_exclude {
        if included.contains(excluded.as_str()) {
            return Err(validation_error(
                ValidationCategory::Dependency,
                "phpcs.sniffs_exclude",
                format!("sniff `{excluded}` is present in both sniffs_include and sniffs_exclude"),
            ));
        }
    }

    if cfg.wpscan.enabled {
        if cfg.wpscan.api_token_env.trim().is_empty() {
            return Err(validation_error(
                ValidationCategory::Dependency,
                "wpscan.api_token_env",
                "must be non-empty when `wpscan.enabled = true`",
            ));
        }
        if cfg.wpscan.paths.is_empty() {
            return Err(validation_error(
                ValidationCategory::Dependency,
                "wpscan.paths",
                "must name at least one addon directory when `wpscan.enabled = true`",
            ));
        }
    }

    if cfg.autoapprove.enabled && cfg.autoapprove.label_name.trim().is_empty() {
        return Err(validation_error(
            ValidationCategory::Dependency,
            "autoapprove.label_name",
            "must be non-empty when `autoapprove.enabled = true`",
        ));
    }

    Ok(())
}

fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(validation_error(
            ValidationCategory::Type,
            field,
            format!("invalid value `{value}` (expected: {})", allowed.join("|")),
        ))
    }
}

fn validate_range_u8(field: &'static str, value: u8, min: u8, max: u8) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(validation_error(
            ValidationCategory::Range,
            field,
            format!("`{value}` is outside allowed range {min}..={max}"),
        ))
    }
}

fn validate_range_u32(field: &'static str, value: u32, min: u32, max: u32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(validation_error(
            ValidationCategory::Range,
            field,
            format!("`{value}` is outside allowed range {min}..={max}"),
        ))
    }
}

fn validate_globs(field: &'static str, globs: &[String]) -> Result<()> {
    for pattern in globs {
        Glob::new(pattern).map_err(|err| {
            validation_error(
                ValidationCategory::Type,
                field,
                format!("invalid glob pattern `{pattern}`: {err}"),
            )
        })?;
    }
    Ok(())
}

fn validation_error(
    category: ValidationCategory,
    field: &'static str,
    message: impl Into<String>,
) -> ConfigError {
    ConfigError::Validation {
        category,
        field,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{load_from, load_from_typed, Config, ConfigError, ValidationCategory};

    static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

    fn write_temp_config(content: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        path.push(format!("reviewgate-config-test-{ts}-{seq}.toml"));
        fs::write(&path, content).expect("write temp config");
        path
    }

    #[test]
    fn validation_reports_type_category_for_invalid_enum() {
        let path = write_temp_config(
            r#"
[output]
format = "markdown"
"#,
        );

        let err = load_from_typed(&path).expect_err("must fail for invalid enum");
        assert_eq!(err.category(), Some(ValidationCategory::Type));
        match err {
            ConfigError::Validation {
                category, field, ..
            } => {
                assert_eq!(category, ValidationCategory::Type);
                assert_eq!(field, "output.format");
            }
            other => panic!("unexpected error: {other}"),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn validation_reports_range_category_for_severity() {
        let path = write_temp_config(
            r#"
[phpcs]
severity = 11
"#,
        );

        let err = load_from_typed(&path).expect_err("must fail for range violation");
        assert_eq!(err.category(), Some(ValidationCategory::Range));
        match err {
            ConfigError::Validation {
                category, field, ..
            } => {
                assert_eq!(category, ValidationCategory::Range);
                assert_eq!(field, "phpcs.severity");
            }
            other => panic!("unexpected error: {other}"),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn overlapping_sniff_lists_are_a_dependency_error() {
        let path = write_temp_config(
            r#"
[phpcs]
sniffs_include = ["WordPress.Security.EscapeOutput"]
sniffs_exclude = ["WordPress.Security.EscapeOutput"]
"#,
        );

        let err = load_from_typed(&path).expect_err("must fail for dependency violation");
        assert_eq!(err.category(), Some(ValidationCategory::Dependency));
        match err {
            ConfigError::Validation {
                category, field, ..
            } => {
                assert_eq!(category, ValidationCategory::Dependency);
                assert_eq!(field, "phpcs.sniffs_exclude");
            }
            other => panic!("unexpected error: {other}"),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn wpscan_enabled_requires_addon_paths() {
        let path = write_temp_config(
            r#"
[wpscan]
enabled = true
"#,
        );

        let err = load_from_typed(&path).expect_err("must fail without wpscan paths");
        assert_eq!(err.category(), Some(ValidationCategory::Dependency));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn invalid_autoapprove_glob_is_a_type_error() {
        let path = write_temp_config(
            r#"
[autoapprove]
enabled = true
filetypes = ["**/*.{css"]
"#,
        );

        let err = load_from_typed(&path).expect_err("must fail for invalid glob");
        assert_eq!(err.category(), Some(ValidationCategory::Type));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn config_example_matches_default_config() {
        let example_path =
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/reviewgate.toml.example");
        let loaded = load_from(&example_path).expect("load config example");
        assert_eq!(loaded, Config::default());
    }
}
