use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type PrNumber = u64;

/// Identifier of the scanner that produced an issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ToolId {
    Lint,
    Phpcs,
    Svg,
    WpscanApi,
}

impl ToolId {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::Lint => "lint",
            ToolId::Phpcs => "phpcs",
            ToolId::Svg => "svg",
            ToolId::WpscanApi => "wpscan-api",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ToolId::Lint => "PHP lint",
            ToolId::Phpcs => "PHPCS",
            ToolId::Svg => "SVG scan",
            ToolId::WpscanApi => "WPScan vulnerability scan",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueLevel {
    Info,
    Warning,
    Error,
}

impl IssueLevel {
    /// Counter bucket name in the stats map ("ERROR" -> "error").
    pub fn stat_key(self) -> &'static str {
        match self {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
            IssueLevel::Info => "info",
        }
    }

    fn label(self) -> &'static str {
        match self {
            IssueLevel::Error => "Error",
            IssueLevel::Warning => "Warning",
            IssueLevel::Info => "Info",
        }
    }
}

/// One diagnostic as emitted by a scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub message: String,
    pub source: String,
    /// 1..=10; raw scanner scales are mapped into this range by each tool.
    pub severity: u8,
    pub fixable: bool,
    pub level: IssueLevel,
    pub line: u32,
    pub column: u32,
}

/// A finding attached to a file/line of a commit. Immutable once produced:
/// downstream stages remove or reorder records, never edit fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueRecord {
    pub tool: ToolId,
    pub file_name: String,
    pub file_line: u32,
    pub issue: Issue,
}

impl IssueRecord {
    /// Canonical review-comment body for this record. The deduplicator
    /// compares against this exact rendering, so posting and matching
    /// must go through the same function.
    pub fn comment_body(&self) -> String {
        format!(
            "**{}** severity {}: {} ( {} )",
            self.issue.level.label(),
            self.issue.severity,
            self.issue.message,
            self.issue.source
        )
    }
}

/// Files classified as safe for a commit, keyed by path with the approval
/// reason tag as value (e.g. "autoapprove-filetypes", "ap-svg-files").
pub type AutoApprovedFiles = BTreeMap<String, String>;

/// PRs whose comment list was truncated by the budget enforcer.
pub type PrsCommentsMaxed = BTreeMap<PrNumber, bool>;

type StatCounters = BTreeMap<String, u64>;

/// Issues and per-tool counters for one commit scan.
///
/// Invariant: for every tool/PR/level, the counter equals the number of
/// matching records in `issues`. Every stage that removes a record
/// decrements the matching counter by exactly one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultsAggregate {
    pub issues: BTreeMap<PrNumber, Vec<IssueRecord>>,
    pub stats: BTreeMap<ToolId, BTreeMap<PrNumber, StatCounters>>,
}

impl ResultsAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers zeroed counters for a tool/PR pair. Scanners call this up
    /// front so an untouched tool still shows `{error: 0, warning: 0}`.
    pub fn init_stats(&mut self, tool: ToolId, pr: PrNumber) {
        let counters = self.stats.entry(tool).or_default().entry(pr).or_default();
        for key in ["error", "warning"] {
            counters.entry(key.to_string()).or_insert(0);
        }
        self.issues.entry(pr).or_default();
    }

    /// Appends a record and increments the matching counter.
    pub fn push_issue(&mut self, pr: PrNumber, record: IssueRecord) {
        let counters = self
            .stats
            .entry(record.tool)
            .or_default()
            .entry(pr)
            .or_default();
        *counters
            .entry(record.issue.level.stat_key().to_string())
            .or_insert(0) += 1;
        self.issues.entry(pr).or_default().push(record);
    }

    /// Decrements the counter for one removed record. Counters never go
    /// negative: a missing bucket stays absent and a zero bucket stays zero.
    pub fn decrement_stat(&mut self, tool: ToolId, pr: PrNumber, level: IssueLevel) {
        if let Some(counters) = self
            .stats
            .get_mut(&tool)
            .and_then(|per_pr| per_pr.get_mut(&pr))
        {
            if let Some(count) = counters.get_mut(level.stat_key()) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Zeroes every counter for a PR across all tools present in stats.
    pub fn zero_stats_for_pr(&mut self, pr: PrNumber) {
        for per_pr in self.stats.values_mut() {
            if let Some(counters) = per_pr.get_mut(&pr) {
                for count in counters.values_mut() {
                    *count = 0;
                }
            }
        }
    }

    pub fn issue_count(&self, pr: PrNumber) -> usize {
        self.issues.get(&pr).map(Vec::len).unwrap_or(0)
    }

    pub fn stat(&self, tool: ToolId, pr: PrNumber, level: IssueLevel) -> u64 {
        self.stats
            .get(&tool)
            .and_then(|per_pr| per_pr.get(&pr))
            .and_then(|counters| counters.get(level.stat_key()))
            .copied()
            .unwrap_or(0)
    }

    /// Checks the stats/issues consistency invariant. Test helper; production
    /// data is not adversarial, so this is asserted in tests, not at runtime.
    pub fn stats_consistent(&self) -> bool {
        for (tool, per_pr) in &self.stats {
            for (pr, counters) in per_pr {
                for (bucket, count) in counters {
                    let actual = self
                        .issues
                        .get(pr)
                        .map(|records| {
                            records
                                .iter()
                                .filter(|r| r.tool == *tool && r.issue.level.stat_key() == bucket)
                                .count() as u64
                        })
                        .unwrap_or(0);
                    if actual != *count {
                        return false;
                    }
                }
            }
        }
        true
    }
}
