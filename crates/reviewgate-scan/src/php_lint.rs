use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use reviewgate_core::{Issue, IssueLevel, IssueRecord, ToolId};

use crate::exec::{execute_with_retry, RetryBudget};
use crate::ScanTool;

const LINT_SEVERITY: u8 = 5;

/// Runs `php -l` against changed PHP files. The interpreter exits 255 on a
/// parse failure, which is an expected outcome, not an invocation error.
pub struct PhpLintTool {
    php_path: String,
    budget: RetryBudget,
}

impl PhpLintTool {
    pub fn new(php_path: impl Into<String>, budget: RetryBudget) -> Self {
        Self {
            php_path: php_path.into(),
            budget,
        }
    }
}

impl ScanTool for PhpLintTool {
    fn id(&self) -> ToolId {
        ToolId::Lint
    }

    fn can_scan(&self, path: &str) -> bool {
        path.ends_with(".php")
    }

    fn scan_file(&self, repo_root: &Path, path: &str) -> Result<Vec<IssueRecord>> {
        let args = vec![
            "-l".to_string(),
            "-d".to_string(),
            "error_reporting=E_ALL".to_string(),
            "-d".to_string(),
            "display_errors=1".to_string(),
            path.to_string(),
        ];
        let output = execute_with_retry(
            &self.php_path,
            &args,
            repo_root,
            &[0, 255],
            self.budget,
        )?;
        Ok(parse_lint_output(
            &format!("{}\n{}", output.stdout, output.stderr),
            path,
        ))
    }
}

/// Extracts diagnostics from `php -l` output. The interpreter prints the
/// same message to stdout and stderr, so identical (line, message) pairs
/// collapse into one record.
pub fn parse_lint_output(output: &str, file_name: &str) -> Vec<IssueRecord> {
    let mut seen: BTreeSet<(u32, String)> = BTreeSet::new();
    let mut records = Vec::new();

    for raw_line in output.lines() {
        let trimmed = raw_line.trim();
        if !trimmed.contains("error") && !trimmed.contains("Error") {
            continue;
        }
        let Some((message_part, line_part)) = trimmed.rsplit_once(" on line ") else {
            continue;
        };
        let Ok(line) = line_part.trim().parse::<u32>() else {
            continue;
        };

        // Strip the redundant " in /path/to/file" tail; the record already
        // carries the file name.
        let message = match message_part.rsplit_once(" in ") {
            Some((head, tail)) if tail.contains(file_name) || tail.starts_with('/') => {
                head.trim().to_string()
            }
            _ => message_part.trim().to_string(),
        };

        if !seen.insert((line, message.clone())) {
            continue;
        }
        records.push(IssueRecord {
            tool: ToolId::Lint,
            file_name: file_name.to_string(),
            file_line: line,
            issue: Issue {
                message,
                source: "php-lint".to_string(),
                severity: LINT_SEVERITY,
                fixable: false,
                level: IssueLevel::Error,
                line,
                column: 0,
            },
        });
    }

    records
}
