mod approval;
mod dump;
mod model;
mod reconcile;

pub use approval::{decide, run_auto_approval, ApprovalInput, ApprovalSink, ApprovalState};
pub use dump::{PrMeta, PrSummary, ResultsDump};
pub use model::{
    AutoApprovedFiles, Issue, IssueLevel, IssueRecord, PrNumber, PrsCommentsMaxed,
    ResultsAggregate, ToolId,
};
pub use reconcile::{
    enforce_comment_budget, remove_approved_file_issues, remove_existing_comment_issues,
    sort_results_by_severity, DedupOutcome, ExistingComment, ReviewCommentProvider,
    StaticCommentProvider,
};
