use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use reviewgate_core::AutoApprovedFiles;

const REASON_FILETYPES: &str = "autoapprove-filetypes";
const REASON_SVG: &str = "ap-svg-files";

/// Classifies changed files as safe to auto-approve. Two sources: the
/// configured file-type glob patterns, and SVG files whose content scan
/// came back clean. Glob matches take precedence when both apply.
pub fn compute_auto_approved_files(
    filetype_globs: &[String],
    changed_files: &[String],
    clean_svg_files: &BTreeSet<String>,
) -> Result<AutoApprovedFiles> {
    let glob_set = compile_globs(filetype_globs)?;

    let mut approved = AutoApprovedFiles::new();
    for file in changed_files {
        if glob_set.is_match(file) {
            approved.insert(file.clone(), REASON_FILETYPES.to_string());
        } else if clean_svg_files.contains(file) {
            approved.insert(file.clone(), REASON_SVG.to_string());
        }
    }
    Ok(approved)
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid glob pattern `{pattern}`"))?;
        builder.add(glob);
    }
    builder.build().context("compile glob set")
}
