//! Issue producers feeding the reconciliation pipeline. Each tool turns a
//! changed file into zero or more issue records; the orchestrator scans
//! every unique file once and attributes the records to each implicated PR.

mod approvals;
pub mod exec;
pub mod php_lint;
pub mod phpcs;
pub mod svg;
pub mod wpscan;

pub use approvals::compute_auto_approved_files;
pub use exec::{execute_with_retry, ExecOutput, RetryBudget};
pub use php_lint::PhpLintTool;
pub use phpcs::PhpcsTool;
pub use svg::SvgTool;
pub use wpscan::WpscanTool;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use reviewgate_core::{IssueRecord, PrNumber, ResultsAggregate, ToolId};

/// One issue producer. Tool-specific severity mapping stays behind this
/// trait so the reconciliation core never sees raw scanner output.
pub trait ScanTool {
    fn id(&self) -> ToolId;

    /// Whether this tool applies to the given repo-relative path.
    fn can_scan(&self, path: &str) -> bool;

    /// Scans one file. An Err fails this file/tool unit only; the
    /// orchestrator keeps going.
    fn scan_file(&self, repo_root: &Path, path: &str) -> Result<Vec<IssueRecord>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    /// Unique (tool, file) units actually scanned.
    pub scanned_units: usize,
    /// Units that failed after retries were exhausted.
    pub failed_units: usize,
}

/// Runs every tool over the changed files of a commit and fills the shared
/// aggregate. Files shared between PRs are scanned once; the records are
/// cloned into each implicated PR. Counters are registered up front so a
/// clean scan still shows zeroed buckets for every enabled tool.
pub fn run_tools(
    tools: &[Box<dyn ScanTool>],
    repo_root: &Path,
    changed_files_by_pr: &BTreeMap<PrNumber, Vec<String>>,
    results: &mut ResultsAggregate,
) -> ScanSummary {
    let mut summary = ScanSummary::default();

    for tool in tools {
        for pr in changed_files_by_pr.keys() {
            results.init_stats(tool.id(), *pr);
        }
    }

    let unique_files: BTreeSet<&str> = changed_files_by_pr
        .values()
        .flat_map(|files| files.iter().map(String::as_str))
        .collect();

    let mut records_by_unit: BTreeMap<(ToolId, &str), Vec<IssueRecord>> = BTreeMap::new();
    for tool in tools {
        for path in unique_files.iter().copied() {
            if !tool.can_scan(path) {
                continue;
            }
            summary.scanned_units += 1;
            match tool.scan_file(repo_root, path) {
                Ok(records) => {
                    records_by_unit.insert((tool.id(), path), records);
                }
                Err(err) => {
                    summary.failed_units += 1;
                    eprintln!(
                        "warning: {} failed for `{path}`: {err:#}",
                        tool.id().label()
                    );
                }
            }
        }
    }

    for (pr, files) in changed_files_by_pr {
        for tool in tools {
            for path in files {
                if let Some(records) = records_by_unit.get(&(tool.id(), path.as_str())) {
                    for record in records {
                        results.push_issue(*pr, record.clone());
                    }
                }
            }
        }
    }

    summary
}
