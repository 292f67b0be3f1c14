use anyhow::{Context as _, Result};

use crate::model::{AutoApprovedFiles, IssueLevel, PrNumber, ResultsAggregate, ToolId};

/// Per-PR outcome of the auto-approval state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    AllFilesApprovedNoIssues,
    NotApprovable,
    AlreadyApproved,
}

impl ApprovalState {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::AllFilesApprovedNoIssues => "approved",
            ApprovalState::NotApprovable => "not-approvable",
            ApprovalState::AlreadyApproved => "already-approved",
        }
    }
}

/// Effectful side of approval: review submission and labelling. Label adds
/// are idempotent on the GitHub side, so re-labelling is a caller no-op.
pub trait ApprovalSink {
    fn has_bot_approval(&self, pr: PrNumber) -> Result<bool>;
    fn submit_approval(&self, pr: PrNumber, body: &str) -> Result<()>;
    fn add_label(&self, pr: PrNumber, label: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ApprovalInput<'a> {
    pub pr: PrNumber,
    /// Every file touched by the PR, whether scanned or not.
    pub changed_files: &'a [String],
    pub auto_approved_files: &'a AutoApprovedFiles,
    pub results: &'a ResultsAggregate,
    pub wpscan_enabled: bool,
}

/// Pure decision: approvable only when every touched file is pre-classified
/// as safe and no unresolved issue remains for the PR. The
/// `AlreadyApproved` guard lives in [`run_auto_approval`] since it needs the
/// sink.
pub fn decide(input: &ApprovalInput<'_>) -> ApprovalState {
    let all_files_approved = input
        .changed_files
        .iter()
        .all(|file| input.auto_approved_files.contains_key(file));
    if !all_files_approved {
        return ApprovalState::NotApprovable;
    }

    if input.results.issue_count(input.pr) > 0 {
        return ApprovalState::NotApprovable;
    }

    if input.wpscan_enabled {
        let errors = input
            .results
            .stat(ToolId::WpscanApi, input.pr, IssueLevel::Error);
        let warnings = input
            .results
            .stat(ToolId::WpscanApi, input.pr, IssueLevel::Warning);
        if errors > 0 || warnings > 0 {
            return ApprovalState::NotApprovable;
        }
    }

    ApprovalState::AllFilesApprovedNoIssues
}

/// Runs the state machine for one PR and dispatches the approval exactly
/// once. Re-running against an already-approved PR is a no-op. Submission
/// failures are propagated without retry; retries belong to the HTTP
/// collaborator.
pub fn run_auto_approval(
    input: &ApprovalInput<'_>,
    sink: &dyn ApprovalSink,
    label: &str,
) -> Result<ApprovalState> {
    if sink
        .has_bot_approval(input.pr)
        .context("failed to check for an existing approval review")?
    {
        return Ok(ApprovalState::AlreadyApproved);
    }

    match decide(input) {
        ApprovalState::AllFilesApprovedNoIssues => {
            sink.submit_approval(
                input.pr,
                "Auto-approved: all changed files are pre-approved and no issues were found.",
            )
            .context("failed to submit approval review")?;
            sink.add_label(input.pr, label)
                .context("failed to apply approval label")?;
            Ok(ApprovalState::AllFilesApprovedNoIssues)
        }
        state => Ok(state),
    }
}
