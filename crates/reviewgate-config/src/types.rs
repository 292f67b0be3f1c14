use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub reviews: ReviewsConfig,
    #[serde(default)]
    pub lint: LintConfig,
    #[serde(default)]
    pub phpcs: PhpcsConfig,
    #[serde(default)]
    pub svg: SvgConfig,
    #[serde(default)]
    pub wpscan: WpscanConfig,
    #[serde(default)]
    pub autoapprove: AutoApproveConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: String, // "text" | "json"
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

fn default_format() -> String {
    "text".to_string()
}

/// Knobs for the reconciliation stages that decide what ends up on a PR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewsConfig {
    /// Sort each PR's issue list by descending severity before budgeting.
    #[serde(default)]
    pub sort_by_severity: bool,

    /// Maximum live review comments per PR; 0 means unlimited.
    #[serde(default = "default_comments_total_max")]
    pub comments_total_max: u32,

    /// Treat comments from dismissed reviews as gone (re-post their issues).
    #[serde(default)]
    pub skip_dismissed: bool,

    /// Authors whose dismissed-review comments never suppress re-posting.
    #[serde(default)]
    pub dismissed_exclude_authors: Vec<String>,

    /// Do not implicate draft PRs.
    #[serde(default)]
    pub skip_draft_prs: bool,

    /// Base branches whose PRs are never implicated.
    #[serde(default)]
    pub branches_ignore: Vec<String>,
}

impl Default for ReviewsConfig {
    fn default() -> Self {
        Self {
            sort_by_severity: false,
            comments_total_max: default_comments_total_max(),
            skip_dismissed: false,
            dismissed_exclude_authors: Vec::new(),
            skip_draft_prs: false,
            branches_ignore: Vec::new(),
        }
    }
}

fn default_comments_total_max() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LintConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_php_path")]
    pub php_path: String,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            php_path: default_php_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhpcsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_php_path")]
    pub php_path: String,
    #[serde(default = "default_phpcs_path")]
    pub phpcs_path: String,
    #[serde(default = "default_standard")]
    pub standard: String,
    /// Minimum severity reported by PHPCS, 0..=10.
    #[serde(default = "default_phpcs_severity")]
    pub severity: u8,
    #[serde(default)]
    pub sniffs_include: Vec<String>,
    #[serde(default)]
    pub sniffs_exclude: Vec<String>,
}

impl Default for PhpcsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            php_path: default_php_path(),
            phpcs_path: default_phpcs_path(),
            standard: default_standard(),
            severity: default_phpcs_severity(),
            sniffs_include: Vec::new(),
            sniffs_exclude: Vec::new(),
        }
    }
}

fn default_phpcs_path() -> String {
    "phpcs".to_string()
}

fn default_standard() -> String {
    "WordPress".to_string()
}

fn default_phpcs_severity() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SvgConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WpscanConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_wpscan_api_url")]
    pub api_url: String,
    /// Environment variable holding the WPScan API token.
    #[serde(default = "default_wpscan_token_env")]
    pub api_token_env: String,
    /// Directories whose immediate children are plugin/theme slugs.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Default for WpscanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_wpscan_api_url(),
            api_token_env: default_wpscan_token_env(),
            paths: Vec::new(),
        }
    }
}

fn default_wpscan_api_url() -> String {
    "https://wpscan.com/api/v3".to_string()
}

fn default_wpscan_token_env() -> String {
    "WPSCAN_API_TOKEN".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoApproveConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Glob patterns for files considered trivially safe.
    #[serde(default)]
    pub filetypes: Vec<String>,
    #[serde(default = "default_approve_label")]
    pub label_name: String,
}

impl Default for AutoApproveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filetypes: Vec::new(),
            label_name: default_approve_label(),
        }
    }
}

fn default_approve_label() -> String {
    "auto-approved".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanConfig {
    /// Extra attempts after the first for each subprocess invocation.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    700
}

fn default_enabled() -> bool {
    true
}

fn default_php_path() -> String {
    "php".to_string()
}
