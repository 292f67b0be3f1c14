use std::collections::BTreeMap;
use std::mem;

use anyhow::Result;

use crate::model::{
    AutoApprovedFiles, IssueRecord, PrNumber, PrsCommentsMaxed, ResultsAggregate,
};

/// A review comment already live on GitHub, as seen by the deduplicator and
/// the budget enforcer. Produced by the GitHub collaborator, filtered to the
/// bot's own identity.
#[derive(Debug, Clone)]
pub struct ExistingComment {
    pub file_name: String,
    pub line: u32,
    pub body: String,
    pub from_dismissed_review: bool,
    pub review_author: String,
}

/// Read access to the comments the bot already posted on a PR.
pub trait ReviewCommentProvider {
    fn bot_review_comments(&self, pr: PrNumber, skip_cache: bool)
        -> Result<Vec<ExistingComment>>;
}

/// Sorts each PR's issue list in descending severity order. Ties keep their
/// relative input order (`sort_by` is stable). Stats are untouched. Disabled
/// means the aggregate is returned exactly as given.
pub fn sort_results_by_severity(results: &mut ResultsAggregate, enabled: bool) {
    if !enabled {
        return;
    }
    for records in results.issues.values_mut() {
        records.sort_by(|a, b| b.issue.severity.cmp(&a.issue.severity));
    }
}

/// Drops every issue whose file was auto-approved, decrementing the matching
/// counter per removed record. Relative order of surviving issues is kept.
/// Returns the number of removed records.
pub fn remove_approved_file_issues(
    results: &mut ResultsAggregate,
    auto_approved_files: &AutoApprovedFiles,
) -> usize {
    let mut removed = 0;
    let prs: Vec<PrNumber> = results.issues.keys().copied().collect();
    for pr in prs {
        let Some(list) = results.issues.get_mut(&pr) else {
            continue;
        };
        let records = mem::take(list);
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if auto_approved_files.contains_key(&record.file_name) {
                results.decrement_stat(record.tool, pr, record.issue.level);
                removed += 1;
            } else {
                kept.push(record);
            }
        }
        results.issues.insert(pr, kept);
    }
    removed
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub removed: usize,
    /// PRs whose comment fetch failed; treated as having no existing
    /// comments so nothing is silently lost (fail-open toward re-posting).
    pub fetch_failures: Vec<(PrNumber, String)>,
}

/// Removes issues that already have a live, matching bot comment on the PR.
///
/// A comment from a dismissed review still counts as existing when
/// `skip_dismissed` is false, unless its review author is in
/// `dismissed_exclude_authors` (those comments are ignored and the issue is
/// re-posted). With `skip_dismissed` true, dismissed-review comments never
/// suppress an issue.
pub fn remove_existing_comment_issues(
    results: &mut ResultsAggregate,
    provider: &dyn ReviewCommentProvider,
    skip_dismissed: bool,
    dismissed_exclude_authors: &[String],
) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let prs: Vec<PrNumber> = results.issues.keys().copied().collect();
    for pr in prs {
        let comments = match provider.bot_review_comments(pr, true) {
            Ok(comments) => comments,
            Err(err) => {
                outcome.fetch_failures.push((pr, format!("{err:#}")));
                continue;
            }
        };

        let live: Vec<&ExistingComment> = comments
            .iter()
            .filter(|comment| {
                if !comment.from_dismissed_review {
                    return true;
                }
                if skip_dismissed {
                    return false;
                }
                !dismissed_exclude_authors.contains(&comment.review_author)
            })
            .collect();

        if live.is_empty() {
            continue;
        }

        let Some(list) = results.issues.get_mut(&pr) else {
            continue;
        };
        let records = mem::take(list);
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            let already_posted = live.iter().any(|comment| {
                comment.file_name == record.file_name
                    && comment.line == record.file_line
                    && comment.body == record.comment_body()
            });
            if already_posted {
                results.decrement_stat(record.tool, pr, record.issue.level);
                outcome.removed += 1;
            } else {
                kept.push(record);
            }
        }
        results.issues.insert(pr, kept);
    }
    outcome
}

/// Caps each PR's issue list so existing live comments plus new ones stay
/// within `max` (0 = unlimited). Comments from dismissed reviews are not
/// live and never consume the budget. Truncation keeps the head of the list
/// in its current, already-sorted order; boundary ties are resolved purely
/// by list position. Truncated PRs are marked in `prs_comments_maxed`.
pub fn enforce_comment_budget(
    results: &mut ResultsAggregate,
    max: u32,
    provider: &dyn ReviewCommentProvider,
    prs_comments_maxed: &mut PrsCommentsMaxed,
) {
    if max == 0 {
        return;
    }

    let prs: Vec<PrNumber> = results.issues.keys().copied().collect();
    for pr in prs {
        // Fetch failures count as zero existing comments, same fail-open
        // stance as the deduplicator.
        let existing = provider
            .bot_review_comments(pr, false)
            .map(|comments| {
                comments
                    .iter()
                    .filter(|comment| !comment.from_dismissed_review)
                    .count()
            })
            .unwrap_or(0);

        let pending = results.issue_count(pr);
        let allowed_new = (max as usize).saturating_sub(existing);

        if allowed_new == 0 {
            if pending > 0 {
                results.issues.insert(pr, Vec::new());
                results.zero_stats_for_pr(pr);
            }
            prs_comments_maxed.insert(pr, true);
            continue;
        }

        if allowed_new >= pending {
            continue;
        }

        let Some(list) = results.issues.get_mut(&pr) else {
            continue;
        };
        let mut records = mem::take(list);
        let dropped: Vec<IssueRecord> = records.split_off(allowed_new);
        for record in &dropped {
            results.decrement_stat(record.tool, pr, record.issue.level);
        }
        results.issues.insert(pr, records);
        prs_comments_maxed.insert(pr, true);
    }
}

/// In-memory provider used by tests and dry runs.
#[derive(Debug, Default)]
pub struct StaticCommentProvider {
    pub comments: BTreeMap<PrNumber, Vec<ExistingComment>>,
}

impl ReviewCommentProvider for StaticCommentProvider {
    fn bot_review_comments(
        &self,
        pr: PrNumber,
        _skip_cache: bool,
    ) -> Result<Vec<ExistingComment>> {
        Ok(self.comments.get(&pr).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssueLevel, ToolId};
    use crate::test_support::sample_record;

    struct FailingProvider;

    impl ReviewCommentProvider for FailingProvider {
        fn bot_review_comments(
            &self,
            _pr: PrNumber,
            _skip_cache: bool,
        ) -> Result<Vec<ExistingComment>> {
            anyhow::bail!("comment fetch unavailable")
        }
    }

    fn results_with(records: &[(PrNumber, IssueRecord)]) -> ResultsAggregate {
        let mut results = ResultsAggregate::new();
        for (pr, record) in records {
            results.push_issue(*pr, record.clone());
        }
        results
    }

    fn comment_for(record: &IssueRecord) -> ExistingComment {
        ExistingComment {
            file_name: record.file_name.clone(),
            line: record.file_line,
            body: record.comment_body(),
            from_dismissed_review: false,
            review_author: "reviewgate-bot".to_string(),
        }
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let first_sev5 = sample_record(ToolId::Phpcs, "a.php", 1, IssueLevel::Warning, 5);
        let second_sev5 = sample_record(ToolId::Phpcs, "b.php", 2, IssueLevel::Warning, 5);
        let sev8 = sample_record(ToolId::Phpcs, "c.php", 3, IssueLevel::Error, 8);
        let mut results = results_with(&[
            (4, first_sev5.clone()),
            (4, second_sev5.clone()),
            (4, sev8.clone()),
        ]);

        sort_results_by_severity(&mut results, true);
        let sorted = &results.issues[&4];
        assert_eq!(sorted[0], sev8);
        assert_eq!(sorted[1], first_sev5);
        assert_eq!(sorted[2], second_sev5);

        // Sorting twice yields identical output.
        let snapshot = results.clone();
        sort_results_by_severity(&mut results, true);
        assert_eq!(results, snapshot);
    }

    #[test]
    fn sort_disabled_returns_input_unmodified() {
        let mut results = results_with(&[
            (1, sample_record(ToolId::Lint, "a.php", 1, IssueLevel::Error, 2)),
            (1, sample_record(ToolId::Lint, "b.php", 1, IssueLevel::Error, 9)),
        ]);
        let snapshot = results.clone();
        sort_results_by_severity(&mut results, false);
        assert_eq!(results, snapshot);
    }

    #[test]
    fn approved_file_removal_keeps_unapproved_and_adjusts_stats() {
        let approved = sample_record(ToolId::Phpcs, "bla-10.php", 5, IssueLevel::Warning, 5);
        let kept_a = sample_record(ToolId::Phpcs, "bla-8.php", 3, IssueLevel::Error, 5);
        let kept_b = sample_record(ToolId::Phpcs, "bla-8.php", 9, IssueLevel::Error, 5);
        let mut results = results_with(&[
            (12, kept_a.clone()),
            (12, approved.clone()),
            (12, kept_b.clone()),
        ]);
        assert_eq!(results.stat(ToolId::Phpcs, 12, IssueLevel::Error), 2);
        assert_eq!(results.stat(ToolId::Phpcs, 12, IssueLevel::Warning), 1);

        let mut approved_files = AutoApprovedFiles::new();
        approved_files.insert("bla-10.php".to_string(), "ap-svg-files".to_string());

        let removed = remove_approved_file_issues(&mut results, &approved_files);
        assert_eq!(removed, 1);
        assert_eq!(results.issues[&12], vec![kept_a, kept_b]);
        assert_eq!(results.stat(ToolId::Phpcs, 12, IssueLevel::Error), 2);
        assert_eq!(results.stat(ToolId::Phpcs, 12, IssueLevel::Warning), 0);
        assert!(results.stats_consistent());
    }

    #[test]
    fn dedup_removes_issue_with_live_matching_comment() {
        let posted = sample_record(ToolId::Phpcs, "a.php", 4, IssueLevel::Error, 5);
        let fresh = sample_record(ToolId::Phpcs, "a.php", 8, IssueLevel::Error, 5);
        let mut results = results_with(&[(3, posted.clone()), (3, fresh.clone())]);

        let mut provider = StaticCommentProvider::default();
        provider.comments.insert(3, vec![comment_for(&posted)]);

        let outcome = remove_existing_comment_issues(&mut results, &provider, false, &[]);
        assert_eq!(outcome.removed, 1);
        assert_eq!(results.issues[&3], vec![fresh]);
        assert_eq!(results.stat(ToolId::Phpcs, 3, IssueLevel::Error), 1);
        assert!(results.stats_consistent());
    }

    #[test]
    fn dedup_requires_equivalent_message_content() {
        let record = sample_record(ToolId::Phpcs, "a.php", 4, IssueLevel::Error, 5);
        let mut results = results_with(&[(3, record.clone())]);

        let mut stale = comment_for(&record);
        stale.body = "different message entirely".to_string();
        let mut provider = StaticCommentProvider::default();
        provider.comments.insert(3, vec![stale]);

        let outcome = remove_existing_comment_issues(&mut results, &provider, false, &[]);
        assert_eq!(outcome.removed, 0);
        assert_eq!(results.issues[&3], vec![record]);
    }

    #[test]
    fn dismissed_comment_still_counts_unless_author_excluded() {
        let record = sample_record(ToolId::Phpcs, "a.php", 4, IssueLevel::Error, 5);

        let mut dismissed = comment_for(&record);
        dismissed.from_dismissed_review = true;
        dismissed.review_author = "alice".to_string();
        let mut provider = StaticCommentProvider::default();
        provider.comments.insert(3, vec![dismissed]);

        // Not excluded: the dismissed comment suppresses re-posting.
        let mut results = results_with(&[(3, record.clone())]);
        let outcome = remove_existing_comment_issues(&mut results, &provider, false, &[]);
        assert_eq!(outcome.removed, 1);
        assert!(results.issues[&3].is_empty());

        // Excluded author: the comment is ignored, issue is re-posted.
        let mut results = results_with(&[(3, record.clone())]);
        let outcome = remove_existing_comment_issues(
            &mut results,
            &provider,
            false,
            &["alice".to_string()],
        );
        assert_eq!(outcome.removed, 0);
        assert_eq!(results.issues[&3], vec![record.clone()]);

        // skip_dismissed: dismissed comments never suppress.
        let mut results = results_with(&[(3, record.clone())]);
        let outcome = remove_existing_comment_issues(&mut results, &provider, true, &[]);
        assert_eq!(outcome.removed, 0);
        assert_eq!(results.issues[&3], vec![record]);
    }

    #[test]
    fn dedup_fails_open_when_fetch_fails() {
        let record = sample_record(ToolId::Lint, "a.php", 4, IssueLevel::Error, 5);
        let mut results = results_with(&[(3, record.clone())]);

        let outcome = remove_existing_comment_issues(&mut results, &FailingProvider, false, &[]);
        assert_eq!(outcome.removed, 0);
        assert_eq!(outcome.fetch_failures.len(), 1);
        assert_eq!(outcome.fetch_failures[0].0, 3);
        assert_eq!(results.issues[&3], vec![record]);
    }

    #[test]
    fn budget_max_one_with_one_existing_comment_clears_pr() {
        let a = sample_record(ToolId::Phpcs, "a.php", 1, IssueLevel::Warning, 5);
        let b = sample_record(ToolId::Phpcs, "a.php", 2, IssueLevel::Warning, 5);
        let mut results = results_with(&[(9, a.clone()), (9, b)]);
        assert_eq!(results.stat(ToolId::Phpcs, 9, IssueLevel::Warning), 2);

        let mut provider = StaticCommentProvider::default();
        provider.comments.insert(9, vec![comment_for(&a)]);

        let mut maxed = PrsCommentsMaxed::new();
        enforce_comment_budget(&mut results, 1, &provider, &mut maxed);

        assert!(results.issues[&9].is_empty());
        assert_eq!(results.stat(ToolId::Phpcs, 9, IssueLevel::Warning), 0);
        assert_eq!(maxed.get(&9), Some(&true));
        assert!(results.stats_consistent());
    }

    #[test]
    fn budget_ignores_dismissed_review_comments() {
        let record = sample_record(ToolId::Phpcs, "a.php", 1, IssueLevel::Warning, 5);
        let mut results = results_with(&[(9, record.clone())]);

        let mut dismissed = comment_for(&record);
        dismissed.from_dismissed_review = true;
        let mut provider = StaticCommentProvider::default();
        provider.comments.insert(9, vec![dismissed]);

        let mut maxed = PrsCommentsMaxed::new();
        enforce_comment_budget(&mut results, 1, &provider, &mut maxed);

        // The dismissed comment is not live, so the budget stays open.
        assert_eq!(results.issues[&9], vec![record]);
        assert_eq!(results.stat(ToolId::Phpcs, 9, IssueLevel::Warning), 1);
        assert!(maxed.is_empty());
        assert!(results.stats_consistent());
    }

    #[test]
    fn budget_partial_truncation_keeps_head_in_order() {
        let first = sample_record(ToolId::Phpcs, "a.php", 1, IssueLevel::Error, 9);
        let second = sample_record(ToolId::Phpcs, "a.php", 2, IssueLevel::Warning, 5);
        let third = sample_record(ToolId::Phpcs, "a.php", 3, IssueLevel::Warning, 5);
        let mut results = results_with(&[(9, first.clone()), (9, second.clone()), (9, third)]);

        let mut maxed = PrsCommentsMaxed::new();
        enforce_comment_budget(&mut results, 2, &StaticCommentProvider::default(), &mut maxed);

        assert_eq!(results.issues[&9], vec![first, second]);
        assert_eq!(results.stat(ToolId::Phpcs, 9, IssueLevel::Error), 1);
        assert_eq!(results.stat(ToolId::Phpcs, 9, IssueLevel::Warning), 1);
        assert_eq!(maxed.get(&9), Some(&true));
        assert!(results.stats_consistent());
    }

    #[test]
    fn budget_noop_when_under_limit() {
        let record = sample_record(ToolId::Phpcs, "a.php", 1, IssueLevel::Warning, 5);
        let mut results = results_with(&[(9, record)]);
        let snapshot = results.clone();

        let mut maxed = PrsCommentsMaxed::new();
        enforce_comment_budget(
            &mut results,
            100,
            &StaticCommentProvider::default(),
            &mut maxed,
        );

        assert_eq!(results, snapshot);
        assert!(maxed.is_empty());
    }

    #[test]
    fn budget_zero_means_unlimited() {
        let record = sample_record(ToolId::Phpcs, "a.php", 1, IssueLevel::Warning, 5);
        let mut results = results_with(&[(9, record)]);
        let snapshot = results.clone();

        let mut maxed = PrsCommentsMaxed::new();
        enforce_comment_budget(&mut results, 0, &StaticCommentProvider::default(), &mut maxed);

        assert_eq!(results, snapshot);
        assert!(maxed.is_empty());
    }
}
