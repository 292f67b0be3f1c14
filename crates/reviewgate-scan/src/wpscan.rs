use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;

use anyhow::{anyhow, Context as _, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use reviewgate_core::{Issue, IssueLevel, IssueRecord, ToolId};
use serde::Deserialize;

use crate::exec::RetryBudget;

const WPSCAN_SOURCE: &str = "wpscan-api.security";
const USER_AGENT_VALUE: &str = concat!("reviewgate/", env!("CARGO_PKG_VERSION"));

/// Looks up addon slugs against the WPScan vulnerability API. Changed files
/// under a configured addon directory implicate the whole addon, so the
/// report for a slug is fetched once and reused for every file in it.
pub struct WpscanTool {
    api_url: String,
    client: Client,
    addon_paths: Vec<String>,
    budget: RetryBudget,
    report_cache: RefCell<BTreeMap<String, Vec<WpscanVulnerability>>>,
}

impl WpscanTool {
    pub fn new(
        api_url: impl Into<String>,
        api_token: &str,
        addon_paths: Vec<String>,
        budget: RetryBudget,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Token token={api_token}"))
            .context("WPScan API token contains invalid header characters")?;
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("build WPScan HTTP client")?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client,
            addon_paths,
            budget,
            report_cache: RefCell::new(BTreeMap::new()),
        })
    }

    fn vulnerabilities_for(&self, slug: &str) -> Result<Vec<WpscanVulnerability>> {
        if let Some(cached) = self.report_cache.borrow().get(slug) {
            return Ok(cached.clone());
        }

        let url = format!("{}/plugins/{slug}", self.api_url);
        let response = self
            .get_with_retry(&url)
            .with_context(|| format!("WPScan API request for `{slug}`"))?;

        let vulnerabilities = if response.status() == reqwest::StatusCode::NOT_FOUND {
            // Unknown slug: the addon is not tracked, which is not an error.
            Vec::new()
        } else if response.status().is_success() {
            let body = response
                .text()
                .with_context(|| format!("WPScan API response body for `{slug}`"))?;
            parse_wpscan_report(&body, slug)?
        } else {
            return Err(anyhow!(
                "WPScan API returned status {} for `{slug}`",
                response.status()
            ));
        };

        self.report_cache
            .borrow_mut()
            .insert(slug.to_string(), vulnerabilities.clone());
        Ok(vulnerabilities)
    }

    /// Sends a GET with the same fixed-delay budget the subprocess tools
    /// use. Throttling and server errors are retried; every other status is
    /// returned to the caller as-is.
    fn get_with_retry(&self, url: &str) -> Result<Response> {
        let attempts = self.budget.retries.saturating_add(1);
        let mut last_failure: Option<anyhow::Error> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                thread::sleep(self.budget.delay);
            }
            match self.client.get(url).send() {
                Ok(response) if retryable_status(response.status()) => {
                    last_failure = Some(anyhow!(
                        "WPScan API returned status {}",
                        response.status()
                    ));
                }
                Ok(response) => return Ok(response),
                Err(err) => last_failure = Some(anyhow::Error::new(err)),
            }
        }

        Err(last_failure.unwrap_or_else(|| anyhow!("request was never sent")))
            .with_context(|| format!("request failed after {attempts} attempt(s)"))
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl crate::ScanTool for WpscanTool {
    fn id(&self) -> ToolId {
        ToolId::WpscanApi
    }

    fn can_scan(&self, path: &str) -> bool {
        addon_slug_for_path(&self.addon_paths, path).is_some()
    }

    fn scan_file(&self, _repo_root: &Path, path: &str) -> Result<Vec<IssueRecord>> {
        let Some(slug) = addon_slug_for_path(&self.addon_paths, path) else {
            return Ok(Vec::new());
        };
        let vulnerabilities = self.vulnerabilities_for(&slug)?;
        Ok(issues_for_addon(&slug, path, &vulnerabilities))
    }
}

/// Resolves the addon slug a changed file belongs to: the first path
/// component after a configured addon directory. `plugins/hello-dolly/x.php`
/// with `plugins` configured yields `hello-dolly`.
pub fn addon_slug_for_path(addon_paths: &[String], changed_path: &str) -> Option<String> {
    for base in addon_paths {
        let base = base.trim_matches('/');
        let Some(rest) = changed_path.strip_prefix(base).and_then(|r| r.strip_prefix('/')) else {
            continue;
        };
        // A file sitting directly in the addon directory has no slug.
        if let Some((slug, _)) = rest.split_once('/') {
            if !slug.is_empty() {
                return Some(slug.to_string());
            }
        }
    }
    None
}

#[derive(Debug, Clone, Deserialize)]
pub struct WpscanVulnerability {
    pub title: String,
    #[serde(default)]
    pub vuln_type: Option<String>,
    #[serde(default)]
    pub fixed_in: Option<String>,
    #[serde(default)]
    pub cvss: Option<WpscanCvss>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WpscanCvss {
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct WpscanAddonReport {
    #[serde(default)]
    vulnerabilities: Vec<WpscanVulnerability>,
}

/// Parses the WPScan API response for one slug. The response is an object
/// keyed by the slug itself.
pub fn parse_wpscan_report(body: &str, slug: &str) -> Result<Vec<WpscanVulnerability>> {
    let mut reports: BTreeMap<String, WpscanAddonReport> =
        serde_json::from_str(body).context("malformed WPScan API response")?;
    let Some(report) = reports.remove(slug) else {
        return Ok(Vec::new());
    };
    Ok(report.vulnerabilities)
}

/// Maps vulnerabilities for an addon to issue records attributed to the
/// changed file. Every known vulnerability is an error; the severity is the
/// CVSS score clamped into the 1..=10 scale, defaulting to the midpoint when
/// the API carries no score.
pub fn issues_for_addon(
    slug: &str,
    file_name: &str,
    vulnerabilities: &[WpscanVulnerability],
) -> Vec<IssueRecord> {
    vulnerabilities
        .iter()
        .map(|vuln| {
            let severity = severity_from_cvss(vuln.cvss.as_ref().map(|c| c.score));
            let fix = match &vuln.fixed_in {
                Some(version) => format!("fixed in {version}"),
                None => "no fixed version published".to_string(),
            };
            let source = match &vuln.vuln_type {
                Some(kind) => format!("{WPSCAN_SOURCE}.{kind}"),
                None => WPSCAN_SOURCE.to_string(),
            };
            IssueRecord {
                tool: ToolId::WpscanApi,
                file_name: file_name.to_string(),
                file_line: 1,
                issue: Issue {
                    message: format!(
                        "Addon `{slug}` has a known vulnerability: {} ({fix})",
                        vuln.title
                    ),
                    source,
                    severity,
                    fixable: vuln.fixed_in.is_some(),
                    level: IssueLevel::Error,
                    line: 1,
                    column: 0,
                },
            }
        })
        .collect()
}

fn severity_from_cvss(score: Option<f64>) -> u8 {
    match score {
        Some(score) => (score.round() as i64).clamp(1, 10) as u8,
        None => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "hello-dolly": {
            "friendly_name": "Hello Dolly",
            "latest_version": "1.7.2",
            "vulnerabilities": [
                {
                    "title": "Hello Dolly < 1.7 - Reflected XSS",
                    "vuln_type": "XSS",
                    "fixed_in": "1.7",
                    "cvss": {"score": 6.1}
                },
                {
                    "title": "Hello Dolly - Unscored issue"
                }
            ]
        }
    }"#;

    #[test]
    fn slug_resolution_uses_first_component_after_addon_dir() {
        let paths = vec!["plugins".to_string()];
        assert_eq!(
            addon_slug_for_path(&paths, "plugins/hello-dolly/hello.php"),
            Some("hello-dolly".to_string())
        );
        assert_eq!(
            addon_slug_for_path(&paths, "plugins/hello-dolly/inc/util.php"),
            Some("hello-dolly".to_string())
        );
        assert_eq!(addon_slug_for_path(&paths, "plugins/index.php"), None);
        assert_eq!(addon_slug_for_path(&paths, "themes/twentytwenty/a.php"), None);
    }

    #[test]
    fn report_parses_vulnerabilities_for_slug() {
        let vulns = parse_wpscan_report(REPORT, "hello-dolly").expect("parse report");
        assert_eq!(vulns.len(), 2);
        assert_eq!(vulns[0].fixed_in.as_deref(), Some("1.7"));
    }

    #[test]
    fn report_for_other_slug_is_empty() {
        let vulns = parse_wpscan_report(REPORT, "akismet").expect("parse report");
        assert!(vulns.is_empty());
    }

    #[test]
    fn cvss_score_becomes_clamped_severity() {
        let vulns = parse_wpscan_report(REPORT, "hello-dolly").expect("parse report");
        let records = issues_for_addon("hello-dolly", "plugins/hello-dolly/hello.php", &vulns);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].issue.severity, 6);
        assert_eq!(records[0].issue.level, IssueLevel::Error);
        assert!(records[0].issue.fixable);
        assert!(records[0].issue.source.ends_with(".XSS"));

        // No CVSS score falls back to the midpoint.
        assert_eq!(records[1].issue.severity, 5);
        assert!(!records[1].issue.fixable);
    }

    #[test]
    fn extreme_cvss_scores_stay_in_scale() {
        assert_eq!(severity_from_cvss(Some(0.0)), 1);
        assert_eq!(severity_from_cvss(Some(10.0)), 10);
        assert_eq!(severity_from_cvss(Some(14.5)), 10);
    }

    #[test]
    fn retry_applies_to_throttling_and_server_errors_only() {
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!retryable_status(StatusCode::OK));
        assert!(!retryable_status(StatusCode::NOT_FOUND));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
    }
}
