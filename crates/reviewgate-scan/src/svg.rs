use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use reviewgate_core::{Issue, IssueLevel, IssueRecord, ToolId};

use crate::ScanTool;

const SVG_SOURCE: &str = "WordPressVIPMinimum.Security.SVG.DisallowedTags";
const SVG_SEVERITY: u8 = 5;

const DISALLOWED_TAGS: &[&str] = &["script", "iframe", "object", "embed", "foreignobject"];

/// Scans SVG files for active content. SVGs are XML and can embed script,
/// event handlers, and javascript: URLs, none of which belong in an asset
/// uploaded to a site.
pub struct SvgTool;

impl ScanTool for SvgTool {
    fn id(&self) -> ToolId {
        ToolId::Svg
    }

    fn can_scan(&self, path: &str) -> bool {
        path.to_ascii_lowercase().ends_with(".svg")
    }

    fn scan_file(&self, repo_root: &Path, path: &str) -> Result<Vec<IssueRecord>> {
        let content = fs::read_to_string(repo_root.join(path))
            .with_context(|| format!("read SVG file `{path}`"))?;
        Ok(scan_svg_content(&content, path))
    }
}

/// Flags every line containing a disallowed construct. Matching is
/// case-insensitive since XML tag names in SVG are not, in practice,
/// consistently cased by generators.
pub fn scan_svg_content(content: &str, file_name: &str) -> Vec<IssueRecord> {
    let mut records = Vec::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let line = raw_line.to_ascii_lowercase();

        for finding in findings_for_line(&line) {
            records.push(IssueRecord {
                tool: ToolId::Svg,
                file_name: file_name.to_string(),
                file_line: line_no,
                issue: Issue {
                    message: finding,
                    source: SVG_SOURCE.to_string(),
                    severity: SVG_SEVERITY,
                    fixable: false,
                    level: IssueLevel::Error,
                    line: line_no,
                    column: 0,
                },
            });
        }
    }

    records
}

fn findings_for_line(line: &str) -> Vec<String> {
    let mut findings = Vec::new();

    for tag in DISALLOWED_TAGS {
        if line.contains(&format!("<{tag}")) {
            findings.push(format!("Disallowed tag `<{tag}>` found in SVG file"));
        }
    }

    if has_event_handler_attribute(line) {
        findings.push("Disallowed event-handler attribute found in SVG file".to_string());
    }

    if line.contains("javascript:") {
        findings.push("Disallowed `javascript:` URL found in SVG file".to_string());
    }

    findings
}

/// Detects `on*=` attributes such as onload= or onclick=. The character
/// before "on" must not be alphanumeric, so attribute names like
/// "transition=" do not trip the check.
fn has_event_handler_attribute(line: &str) -> bool {
    let bytes = line.as_bytes();
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find("on") {
        let at = search_from + pos;
        let boundary = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        if boundary {
            let rest = &bytes[at + 2..];
            let name_len = rest.iter().take_while(|b| b.is_ascii_alphabetic()).count();
            if name_len > 0 && rest.get(name_len) == Some(&b'=') {
                return true;
            }
        }
        search_from = at + 2;
    }
    false
}
