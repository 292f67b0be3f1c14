use std::collections::BTreeMap;

use reviewgate_core::{
    decide, enforce_comment_budget, remove_approved_file_issues, remove_existing_comment_issues,
    sort_results_by_severity, ApprovalInput, ApprovalState, AutoApprovedFiles, ExistingComment,
    Issue, IssueLevel, IssueRecord, PrsCommentsMaxed, ResultsAggregate, StaticCommentProvider,
    ToolId,
};

fn record(tool: ToolId, file: &str, line: u32, level: IssueLevel, severity: u8) -> IssueRecord {
    IssueRecord {
        tool,
        file_name: file.to_string(),
        file_line: line,
        issue: Issue {
            message: format!("problem at {file}:{line}"),
            source: "WordPress.Security.EscapeOutput".to_string(),
            severity,
            fixable: false,
            level,
            line,
            column: 3,
        },
    }
}

/// Full reconciliation pass in the pipeline's stage order: approved-file
/// removal, dedup, sort, budget, then the approval decision reading the
/// final issue set.
#[test]
fn full_pipeline_preserves_stats_invariant_at_every_stage() {
    const PR: u64 = 42;
    let mut results = ResultsAggregate::new();
    results.init_stats(ToolId::Phpcs, PR);
    results.init_stats(ToolId::Lint, PR);

    let approved_svg = record(ToolId::Phpcs, "icon.svg", 1, IssueLevel::Warning, 5);
    let posted = record(ToolId::Phpcs, "page.php", 10, IssueLevel::Error, 8);
    let low = record(ToolId::Phpcs, "page.php", 20, IssueLevel::Warning, 3);
    let high = record(ToolId::Lint, "page.php", 30, IssueLevel::Error, 9);
    for r in [&approved_svg, &posted, &low, &high] {
        results.push_issue(PR, r.clone());
    }
    assert!(results.stats_consistent());

    let mut approved_files = AutoApprovedFiles::new();
    approved_files.insert("icon.svg".to_string(), "ap-svg-files".to_string());
    remove_approved_file_issues(&mut results, &approved_files);
    assert!(results.stats_consistent());
    assert_eq!(results.issue_count(PR), 3);

    let mut provider = StaticCommentProvider::default();
    provider.comments.insert(
        PR,
        vec![ExistingComment {
            file_name: posted.file_name.clone(),
            line: posted.file_line,
            body: posted.comment_body(),
            from_dismissed_review: false,
            review_author: "reviewgate-bot".to_string(),
        }],
    );
    let outcome = remove_existing_comment_issues(&mut results, &provider, false, &[]);
    assert_eq!(outcome.removed, 1);
    assert!(results.stats_consistent());

    sort_results_by_severity(&mut results, true);
    let ordered: Vec<u8> = results.issues[&PR]
        .iter()
        .map(|r| r.issue.severity)
        .collect();
    assert_eq!(ordered, vec![9, 3]);
    assert!(results.stats_consistent());

    let mut maxed = PrsCommentsMaxed::new();
    enforce_comment_budget(&mut results, 2, &provider, &mut maxed);
    // One live comment + budget of two leaves room for exactly one new issue.
    assert_eq!(results.issue_count(PR), 1);
    assert_eq!(results.issues[&PR][0].issue.severity, 9);
    assert_eq!(maxed.get(&PR), Some(&true));
    assert!(results.stats_consistent());

    let changed = vec!["icon.svg".to_string(), "page.php".to_string()];
    let input = ApprovalInput {
        pr: PR,
        changed_files: &changed,
        auto_approved_files: &approved_files,
        results: &results,
        wpscan_enabled: false,
    };
    assert_eq!(decide(&input), ApprovalState::NotApprovable);
}

#[test]
fn clean_scan_of_approved_files_is_approvable() {
    const PR: u64 = 7;
    let mut results = ResultsAggregate::new();
    results.init_stats(ToolId::Svg, PR);

    let mut approved_files = AutoApprovedFiles::new();
    approved_files.insert("logo.svg".to_string(), "ap-svg-files".to_string());
    approved_files.insert("theme.css".to_string(), "autoapprove-filetypes".to_string());

    sort_results_by_severity(&mut results, true);
    let mut maxed = BTreeMap::new();
    enforce_comment_budget(&mut results, 10, &StaticCommentProvider::default(), &mut maxed);
    assert!(maxed.is_empty());

    let changed = vec!["logo.svg".to_string(), "theme.css".to_string()];
    let input = ApprovalInput {
        pr: PR,
        changed_files: &changed,
        auto_approved_files: &approved_files,
        results: &results,
        wpscan_enabled: true,
    };
    assert_eq!(decide(&input), ApprovalState::AllFilesApprovedNoIssues);
}
