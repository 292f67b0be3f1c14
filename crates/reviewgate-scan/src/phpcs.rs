use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use reviewgate_core::{Issue, IssueLevel, IssueRecord, ToolId};
use serde::Deserialize;

use crate::exec::{execute_with_retry, RetryBudget};
use crate::ScanTool;

/// Runs PHPCS with `--report=json`. Exit code 0 means clean, 1 means
/// issues were found, 2 means fixable issues were found; all three carry
/// a usable report.
pub struct PhpcsTool {
    php_path: String,
    phpcs_path: String,
    standard: String,
    severity: u8,
    sniffs_include: Vec<String>,
    sniffs_exclude: Vec<String>,
    budget: RetryBudget,
}

impl PhpcsTool {
    pub fn new(
        php_path: impl Into<String>,
        phpcs_path: impl Into<String>,
        standard: impl Into<String>,
        severity: u8,
        sniffs_include: Vec<String>,
        sniffs_exclude: Vec<String>,
        budget: RetryBudget,
    ) -> Self {
        Self {
            php_path: php_path.into(),
            phpcs_path: phpcs_path.into(),
            standard: standard.into(),
            severity,
            sniffs_include,
            sniffs_exclude,
            budget,
        }
    }

    fn build_args(&self, path: &str) -> Vec<String> {
        let mut args = vec![
            self.phpcs_path.clone(),
            "--report=json".to_string(),
            format!("--standard={}", self.standard),
            format!("--severity={}", self.severity),
            "-q".to_string(),
        ];
        if !self.sniffs_include.is_empty() {
            args.push(format!("--sniffs={}", self.sniffs_include.join(",")));
        }
        if !self.sniffs_exclude.is_empty() {
            args.push(format!("--exclude={}", self.sniffs_exclude.join(",")));
        }
        args.push(path.to_string());
        args
    }
}

impl ScanTool for PhpcsTool {
    fn id(&self) -> ToolId {
        ToolId::Phpcs
    }

    fn can_scan(&self, path: &str) -> bool {
        path.ends_with(".php")
    }

    fn scan_file(&self, repo_root: &Path, path: &str) -> Result<Vec<IssueRecord>> {
        let args = self.build_args(path);
        let output = execute_with_retry(&self.php_path, &args, repo_root, &[0, 1, 2], self.budget)?;
        parse_phpcs_report(&output.stdout, path)
    }
}

#[derive(Debug, Deserialize)]
struct PhpcsReport {
    files: BTreeMap<String, PhpcsFileReport>,
}

#[derive(Debug, Deserialize)]
struct PhpcsFileReport {
    messages: Vec<PhpcsMessage>,
}

#[derive(Debug, Deserialize)]
struct PhpcsMessage {
    message: String,
    source: String,
    severity: u8,
    fixable: bool,
    #[serde(rename = "type")]
    kind: String,
    line: u32,
    column: u32,
}

/// Maps a PHPCS JSON report to issue records. PHPCS keys the report by the
/// path it was invoked with, but relative and absolute spellings both occur,
/// so every file entry in the report is attributed to the scanned path.
pub fn parse_phpcs_report(report_json: &str, file_name: &str) -> Result<Vec<IssueRecord>> {
    let report: PhpcsReport =
        serde_json::from_str(report_json).context("malformed PHPCS JSON report")?;

    let mut records = Vec::new();
    for file_report in report.files.into_values() {
        for msg in file_report.messages {
            let level = match msg.kind.as_str() {
                "ERROR" => IssueLevel::Error,
                "WARNING" => IssueLevel::Warning,
                _ => IssueLevel::Info,
            };
            records.push(IssueRecord {
                tool: ToolId::Phpcs,
                file_name: file_name.to_string(),
                file_line: msg.line,
                issue: Issue {
                    message: msg.message,
                    source: msg.source,
                    severity: msg.severity.clamp(1, 10),
                    fixable: msg.fixable,
                    level,
                    line: msg.line,
                    column: msg.column,
                },
            });
        }
    }
    Ok(records)
}
