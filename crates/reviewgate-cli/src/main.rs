use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;

use anyhow::{anyhow, Context as _, Result};
use clap::{Args, Parser, Subcommand};

use reviewgate_config::{load_from, Config};
use reviewgate_core::{
    decide, enforce_comment_budget, remove_approved_file_issues, remove_existing_comment_issues,
    run_auto_approval, sort_results_by_severity, ApprovalInput, ApprovalState, PrMeta, PrNumber,
    PrsCommentsMaxed, ResultsAggregate, ResultsDump, ReviewCommentProvider, StaticCommentProvider,
    ToolId,
};
use reviewgate_github::{GithubClient, InlineComment, RetryPolicy};
use reviewgate_scan::{
    compute_auto_approved_files, run_tools, PhpLintTool, PhpcsTool, RetryBudget, ScanTool,
    SvgTool, WpscanTool,
};

#[derive(Parser, Debug)]
#[command(
    name = "reviewgate",
    version,
    about = "Reconciles static-analysis results into pull-request reviews."
)]
struct Cli {
    /// Repo root (default: current dir)
    #[arg(long)]
    repo: Option<PathBuf>,

    /// Config file path (default: reviewgate.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a commit and reconcile the results against its pull requests
    Scan(Box<ScanArgs>),

    /// Print environment and config diagnostics
    Doctor,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Commit to scan (default: HEAD)
    #[arg(long)]
    commit: Option<String>,

    /// Output format: text|json
    #[arg(long)]
    format: Option<String>,

    /// Override reviews.comments_total_max (0 = unlimited)
    #[arg(long)]
    comments_max: Option<u32>,

    /// Sort issues by descending severity before budgeting
    #[arg(long)]
    sort_by_severity: bool,

    /// Run the full local pipeline without any GitHub traffic
    #[arg(long)]
    dry_run: bool,

    /// PR numbers to simulate in a dry run (default: 1)
    #[arg(long)]
    pr: Vec<PrNumber>,

    /// Target repository (owner/name; default: GITHUB_REPOSITORY)
    #[arg(long)]
    github_repo: Option<String>,

    /// Environment variable holding the GitHub token
    #[arg(long, default_value = "GITHUB_TOKEN")]
    github_token_env: String,

    /// Max attempts per GitHub request
    #[arg(long, default_value_t = 4)]
    github_retry_max_attempts: u32,

    /// Initial retry backoff in milliseconds
    #[arg(long, default_value_t = 500)]
    github_retry_backoff_ms: u64,

    /// Max retry backoff in milliseconds
    #[arg(long, default_value_t = 8000)]
    github_retry_max_backoff_ms: u64,

    /// Write the results dump JSON to a file
    #[arg(long)]
    results_output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanErrorKind {
    Input,
    Config,
    Runtime,
    Output,
    Submit,
}

impl ScanErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ScanErrorKind::Input => "input",
            ScanErrorKind::Config => "config",
            ScanErrorKind::Runtime => "runtime",
            ScanErrorKind::Output => "output",
            ScanErrorKind::Submit => "submit",
        }
    }

    fn exit_code(self) -> i32 {
        match self {
            ScanErrorKind::Input => 2,
            ScanErrorKind::Config => 3,
            ScanErrorKind::Runtime => 4,
            ScanErrorKind::Output => 5,
            ScanErrorKind::Submit => 6,
        }
    }
}

#[derive(Debug)]
struct ScanError {
    kind: ScanErrorKind,
    source: anyhow::Error,
}

impl ScanError {
    fn new(kind: ScanErrorKind, source: anyhow::Error) -> Self {
        Self { kind, source }
    }

    fn render(&self) -> String {
        format!(
            "reviewgate scan error [{}]: {:#}",
            self.kind.as_str(),
            self.source
        )
    }

    fn print(&self) {
        eprintln!("{}", self.render());
    }

    fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    #[cfg(test)]
    fn kind(&self) -> ScanErrorKind {
        self.kind
    }
}

type ScanResult<T> = std::result::Result<T, ScanError>;

/// One implicated PR with everything the pipeline needs about it.
struct PrUnit {
    number: PrNumber,
    meta: PrMeta,
    changed_files: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let repo_root = cli.repo.unwrap_or(std::env::current_dir()?);

    match cli.cmd {
        Command::Doctor => run_doctor(&repo_root, cli.config.as_deref()),
        Command::Scan(scan) => {
            let code = match execute_scan(&repo_root, cli.config.as_deref(), *scan) {
                Ok(code) => code,
                Err(err) => {
                    err.print();
                    err.exit_code()
                }
            };
            std::process::exit(code);
        }
    }
}

fn run_doctor(repo_root: &Path, config_override: Option<&Path>) -> Result<()> {
    let config_path = resolve_config_path(repo_root, config_override);
    println!("reviewgate doctor");
    println!("- repo_root: {}", repo_root.display());
    println!(
        "- config_path: {}",
        config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<default only>".to_string())
    );

    match diagnose_git(repo_root) {
        Ok((head, dirty)) => println!("- git: ok (head: {head}, dirty_files: {dirty})"),
        Err(err) => println!("- git: error ({err})"),
    }

    let cfg = match config_path.as_deref().map(load_from).transpose() {
        Ok(cfg) => {
            println!("- config: ok");
            cfg.unwrap_or_default()
        }
        Err(err) => {
            println!("- config: error ({err:#})");
            return Ok(());
        }
    };

    if cfg.lint.enabled || cfg.phpcs.enabled {
        match probe_tool(&cfg.lint.php_path, "--version") {
            Ok(version) => println!("- php: ok ({version})"),
            Err(err) => println!("- php: error ({err:#})"),
        }
    }
    if cfg.phpcs.enabled {
        match probe_tool(&cfg.phpcs.phpcs_path, "--version") {
            Ok(version) => println!("- phpcs: ok ({version})"),
            Err(err) => println!("- phpcs: error ({err:#})"),
        }
    }
    if cfg.wpscan.enabled {
        let present = std::env::var(&cfg.wpscan.api_token_env).is_ok();
        println!(
            "- wpscan_token ({}): {}",
            cfg.wpscan.api_token_env,
            if present { "set" } else { "missing" }
        );
    }

    Ok(())
}

fn execute_scan(
    repo_root: &Path,
    config_override: Option<&Path>,
    scan: ScanArgs,
) -> ScanResult<i32> {
    let ScanArgs {
        commit,
        format,
        comments_max,
        sort_by_severity,
        dry_run,
        pr,
        github_repo,
        github_token_env,
        github_retry_max_attempts,
        github_retry_backoff_ms,
        github_retry_max_backoff_ms,
        results_output,
    } = scan;

    let config_path = resolve_config_path(repo_root, config_override);
    let mut cfg = match config_path.as_deref() {
        Some(path) => load_from(path).map_err(|err| {
            ScanError::new(ScanErrorKind::Config, err.context("failed to load config"))
        })?,
        None => Config::default(),
    };
    apply_scan_overrides(&mut cfg, format.as_deref(), comments_max, sort_by_severity)?;

    let commit = match commit {
        Some(commit) => commit,
        None => git_head_commit(repo_root).map_err(|err| {
            ScanError::new(ScanErrorKind::Runtime, err.context("failed to resolve HEAD"))
        })?,
    };

    let (repo_owner, repo_name) = resolve_repo_identity(github_repo.as_deref(), dry_run, repo_root)
        .map_err(|err| ScanError::new(ScanErrorKind::Input, err))?;

    let client: Option<GithubClient> = if dry_run {
        None
    } else {
        let token = std::env::var(&github_token_env).map_err(|_| {
            ScanError::new(
                ScanErrorKind::Input,
                anyhow!("environment variable `{github_token_env}` is not set"),
            )
        })?;
        let client = GithubClient::new(repo_owner.clone(), repo_name.clone(), &token)
            .map_err(|err| ScanError::new(ScanErrorKind::Runtime, err))?
            .with_retry(RetryPolicy {
                max_attempts: github_retry_max_attempts,
                backoff_base_ms: github_retry_backoff_ms,
                backoff_max_ms: github_retry_max_backoff_ms,
            });
        Some(client)
    };

    let units = match client.as_ref() {
        Some(client) => implicated_units(client, repo_root, &commit, &cfg)?,
        None => dry_run_units(repo_root, &commit, &pr)?,
    };
    if units.is_empty() {
        println!("no open pull requests implicate commit {commit}");
    }

    let tools = build_tools(&cfg, dry_run).map_err(|err| {
        ScanError::new(ScanErrorKind::Config, err.context("failed to set up scan tools"))
    })?;
    let changed_files_by_pr: BTreeMap<PrNumber, Vec<String>> = units
        .iter()
        .map(|unit| (unit.number, unit.changed_files.clone()))
        .collect();

    let mut results = ResultsAggregate::new();
    let summary = run_tools(&tools, repo_root, &changed_files_by_pr, &mut results);
    if summary.failed_units > 0 {
        eprintln!(
            "warning: {} scan unit(s) failed; their issues are missing from this run",
            summary.failed_units
        );
    }

    let all_changed: BTreeSet<String> = changed_files_by_pr
        .values()
        .flat_map(|files| files.iter().cloned())
        .collect();
    let all_changed_list: Vec<String> = all_changed.iter().cloned().collect();
    let clean_svg = if cfg.svg.enabled {
        clean_svg_files(&all_changed, &results)
    } else {
        BTreeSet::new()
    };
    let auto_approved =
        compute_auto_approved_files(&cfg.autoapprove.filetypes, &all_changed_list, &clean_svg)
            .map_err(|err| ScanError::new(ScanErrorKind::Config, err))?;

    let static_provider = StaticCommentProvider::default();
    let provider: &dyn ReviewCommentProvider = match client.as_ref() {
        Some(client) => client,
        None => &static_provider,
    };

    remove_approved_file_issues(&mut results, &auto_approved);

    let dedup = remove_existing_comment_issues(
        &mut results,
        provider,
        cfg.reviews.skip_dismissed,
        &cfg.reviews.dismissed_exclude_authors,
    );
    for (pr, err) in &dedup.fetch_failures {
        eprintln!(
            "warning: could not fetch existing comments for PR #{pr}: {err}; \
             issues may be posted again"
        );
    }

    sort_results_by_severity(&mut results, cfg.reviews.sort_by_severity);

    let mut maxed = PrsCommentsMaxed::new();
    enforce_comment_budget(
        &mut results,
        cfg.reviews.comments_total_max,
        provider,
        &mut maxed,
    );

    let mut approval_states: BTreeMap<PrNumber, ApprovalState> = BTreeMap::new();
    if cfg.autoapprove.enabled {
        for unit in &units {
            let input = ApprovalInput {
                pr: unit.number,
                changed_files: &unit.changed_files,
                auto_approved_files: &auto_approved,
                results: &results,
                wpscan_enabled: cfg.wpscan.enabled,
            };
            let state = match client.as_ref() {
                Some(client) => run_auto_approval(&input, client, &cfg.autoapprove.label_name)
                    .map_err(|err| ScanError::new(ScanErrorKind::Submit, err))?,
                None => decide(&input),
            };
            approval_states.insert(unit.number, state);
        }
    }

    if let Some(client) = client.as_ref() {
        for unit in &units {
            let Some(records) = results.issues.get(&unit.number) else {
                continue;
            };
            if records.is_empty() {
                continue;
            }
            let comments: Vec<InlineComment> = records
                .iter()
                .map(|record| InlineComment {
                    path: record.file_name.clone(),
                    line: record.file_line.max(1),
                    body: record.comment_body(),
                })
                .collect();
            let body = format!(
                "Found {} issue(s) while scanning commit {commit}.",
                comments.len()
            );
            client
                .post_review(unit.number, &commit, &body, &comments)
                .map_err(|err| {
                    ScanError::new(
                        ScanErrorKind::Submit,
                        err.context(format!("failed to post review on PR #{}", unit.number)),
                    )
                })?;
        }
    }

    let metas: BTreeMap<PrNumber, PrMeta> = units
        .iter()
        .map(|unit| (unit.number, unit.meta.clone()))
        .collect();
    let dump = ResultsDump::new(results, repo_owner, repo_name, commit.clone(), &metas);

    match cfg.output.format.as_str() {
        "json" => {
            let pretty = serde_json::to_string_pretty(&dump).map_err(|err| {
                ScanError::new(
                    ScanErrorKind::Output,
                    anyhow!("failed to encode results dump: {err}"),
                )
            })?;
            println!("{pretty}");
        }
        _ => print_text_summary(&dump, &maxed, &approval_states),
    }

    if let Some(path) = results_output.as_ref() {
        write_results_dump(path, &dump)?;
    }

    Ok(0)
}

fn print_text_summary(
    dump: &ResultsDump,
    maxed: &PrsCommentsMaxed,
    approval_states: &BTreeMap<PrNumber, ApprovalState>,
) {
    println!("reviewgate scan {}", dump.commit);
    println!("- repo: {}/{}", dump.repo_owner, dump.repo_name);
    for (pr, records) in &dump.results.issues {
        let mut line = format!("- PR #{pr}: {} issue(s) remaining", records.len());
        if maxed.get(pr) == Some(&true) {
            line.push_str(" (comment budget reached)");
        }
        if let Some(state) = approval_states.get(pr) {
            line.push_str(&format!(", approval: {}", state.as_str()));
        }
        println!("{line}");
    }
}

fn write_results_dump(path: &Path, dump: &ResultsDump) -> ScanResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            ScanError::new(
                ScanErrorKind::Output,
                anyhow!("failed to create results directory: {parent:?}: {err}"),
            )
        })?;
    }
    let pretty = serde_json::to_string_pretty(dump).map_err(|err| {
        ScanError::new(
            ScanErrorKind::Output,
            anyhow!("failed to encode results dump: {err}"),
        )
    })?;
    fs::write(path, pretty).map_err(|err| {
        ScanError::new(
            ScanErrorKind::Output,
            anyhow!("failed to write results dump: {path:?}: {err}"),
        )
    })
}

fn apply_scan_overrides(
    cfg: &mut Config,
    format: Option<&str>,
    comments_max: Option<u32>,
    sort_by_severity: bool,
) -> ScanResult<()> {
    if let Some(format) = format {
        if format != "text" && format != "json" {
            return Err(ScanError::new(
                ScanErrorKind::Input,
                anyhow!("invalid value for output.format from cli: `{format}` (expected: text|json)"),
            ));
        }
        cfg.output.format = format.to_string();
    }
    if let Some(max) = comments_max {
        cfg.reviews.comments_total_max = max;
    }
    if sort_by_severity {
        cfg.reviews.sort_by_severity = true;
    }
    Ok(())
}

fn resolve_repo_identity(
    github_repo: Option<&str>,
    dry_run: bool,
    repo_root: &Path,
) -> Result<(String, String)> {
    let from_env = std::env::var("GITHUB_REPOSITORY").ok();
    if let Some(spec) = github_repo.map(str::to_string).or(from_env) {
        return split_repo_spec(&spec);
    }
    if dry_run {
        let name = repo_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string());
        return Ok(("local".to_string(), name));
    }
    Err(anyhow!(
        "github repository was not provided (use --github-repo or GITHUB_REPOSITORY)"
    ))
}

fn split_repo_spec(spec: &str) -> Result<(String, String)> {
    match spec.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(anyhow!("invalid repository spec `{spec}` (expected owner/name)")),
    }
}

fn implicated_units(
    client: &GithubClient,
    repo_root: &Path,
    commit: &str,
    cfg: &Config,
) -> ScanResult<Vec<PrUnit>> {
    let prs = client
        .fetch_implicated_prs(
            commit,
            &cfg.reviews.branches_ignore,
            cfg.reviews.skip_draft_prs,
        )
        .map_err(|err| {
            ScanError::new(
                ScanErrorKind::Runtime,
                err.context("failed to list implicated pull requests"),
            )
        })?;

    let mut units = Vec::with_capacity(prs.len());
    for pr in prs {
        let changed_files =
            git_changed_files(repo_root, &pr.base.sha, commit).map_err(|err| {
                ScanError::new(
                    ScanErrorKind::Runtime,
                    err.context(format!("failed to diff PR #{}", pr.number)),
                )
            })?;
        units.push(PrUnit {
            number: pr.number,
            meta: pr.meta(),
            changed_files,
        });
    }
    Ok(units)
}

fn dry_run_units(repo_root: &Path, commit: &str, prs: &[PrNumber]) -> ScanResult<Vec<PrUnit>> {
    let changed_files = git_commit_files(repo_root, commit).map_err(|err| {
        ScanError::new(
            ScanErrorKind::Runtime,
            err.context("failed to list files changed by the commit"),
        )
    })?;
    let numbers: Vec<PrNumber> = if prs.is_empty() { vec![1] } else { prs.to_vec() };
    Ok(numbers
        .into_iter()
        .map(|number| PrUnit {
            number,
            meta: PrMeta {
                title: Some(format!("Dry-run PR #{number}")),
                base_branch: "main".to_string(),
                head_branch: "detached".to_string(),
                creator: "local".to_string(),
            },
            changed_files: changed_files.clone(),
        })
        .collect())
}

fn build_tools(cfg: &Config, dry_run: bool) -> Result<Vec<Box<dyn ScanTool>>> {
    let budget = RetryBudget::new(cfg.scan.retries, cfg.scan.retry_delay_ms);
    let mut tools: Vec<Box<dyn ScanTool>> = Vec::new();

    if cfg.lint.enabled {
        tools.push(Box::new(PhpLintTool::new(cfg.lint.php_path.as_str(), budget)));
    }
    if cfg.phpcs.enabled {
        tools.push(Box::new(PhpcsTool::new(
            cfg.phpcs.php_path.as_str(),
            cfg.phpcs.phpcs_path.as_str(),
            cfg.phpcs.standard.as_str(),
            cfg.phpcs.severity,
            cfg.phpcs.sniffs_include.clone(),
            cfg.phpcs.sniffs_exclude.clone(),
            budget,
        )));
    }
    if cfg.svg.enabled {
        tools.push(Box::new(SvgTool));
    }
    if cfg.wpscan.enabled {
        if dry_run {
            eprintln!("warning: skipping WPScan lookups in dry run");
        } else {
            let token = std::env::var(&cfg.wpscan.api_token_env).with_context(|| {
                format!("environment variable `{}` is not set", cfg.wpscan.api_token_env)
            })?;
            tools.push(Box::new(WpscanTool::new(
                cfg.wpscan.api_url.as_str(),
                &token,
                cfg.wpscan.paths.clone(),
                budget,
            )?));
        }
    }

    Ok(tools)
}

/// SVG files whose content scan produced no findings; eligible for the
/// SVG auto-approval reason.
fn clean_svg_files(changed: &BTreeSet<String>, results: &ResultsAggregate) -> BTreeSet<String> {
    let mut flagged = BTreeSet::new();
    for records in results.issues.values() {
        for record in records {
            if record.tool == ToolId::Svg {
                flagged.insert(record.file_name.clone());
            }
        }
    }
    changed
        .iter()
        .filter(|file| file.to_ascii_lowercase().ends_with(".svg") && !flagged.contains(*file))
        .cloned()
        .collect()
}

fn resolve_config_path(repo_root: &Path, override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(path.to_path_buf());
    }
    let default = repo_root.join("reviewgate.toml");
    default.exists().then_some(default)
}

fn diagnose_git(repo_root: &Path) -> Result<(String, usize)> {
    let inside = git_output(repo_root, &["rev-parse", "--is-inside-work-tree"]);
    if inside.is_err() {
        return Err(anyhow!("not a git repository"));
    }

    let head = git_output(repo_root, &["rev-parse", "--short", "HEAD"])
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unborn".to_string());

    let status = git_output(repo_root, &["status", "--porcelain"])?;
    Ok((head, status.lines().count()))
}

fn probe_tool(program: &str, arg: &str) -> Result<String> {
    let output = ProcessCommand::new(program)
        .arg(arg)
        .output()
        .with_context(|| format!("failed to invoke `{program}`"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "`{program} {arg}` failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or("").to_string())
}

fn git_output(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = ProcessCommand::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .with_context(|| format!("failed to invoke git {args:?}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn git_head_commit(repo_root: &Path) -> Result<String> {
    git_output(repo_root, &["rev-parse", "HEAD"]).map(|s| s.trim().to_string())
}

/// Files changed by one commit.
fn git_commit_files(repo_root: &Path, commit: &str) -> Result<Vec<String>> {
    let output = git_output(
        repo_root,
        &["diff-tree", "--no-commit-id", "--name-only", "-r", commit],
    )?;
    Ok(output.lines().map(str::to_string).collect())
}

/// Files changed between a PR base and the scanned commit.
fn git_changed_files(repo_root: &Path, base: &str, head: &str) -> Result<Vec<String>> {
    let range = format!("{base}...{head}");
    let output = git_output(repo_root, &["diff", "--name-only", &range])?;
    Ok(output.lines().map(str::to_string).collect())
}
