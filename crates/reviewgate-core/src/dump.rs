use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{PrNumber, ResultsAggregate};

/// Pull-request metadata as handed to the dump by the GitHub collaborator.
/// Stubs without a title (e.g. malformed API objects) are dropped when the
/// dump is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrMeta {
    pub title: Option<String>,
    pub base_branch: String,
    pub head_branch: String,
    pub creator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrSummary {
    pub title: String,
    pub base_branch: String,
    pub head_branch: String,
    pub creator: String,
}

/// Final serialized form of a commit scan, written after submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultsDump {
    pub results: ResultsAggregate,
    #[serde(rename = "repo-owner")]
    pub repo_owner: String,
    #[serde(rename = "repo-name")]
    pub repo_name: String,
    pub commit: String,
    pub prs_implicated: BTreeMap<PrNumber, PrSummary>,
}

impl ResultsDump {
    pub fn new(
        results: ResultsAggregate,
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
        commit: impl Into<String>,
        prs: &BTreeMap<PrNumber, PrMeta>,
    ) -> Self {
        let prs_implicated = prs
            .iter()
            .filter_map(|(number, meta)| {
                let title = meta.title.clone()?;
                Some((
                    *number,
                    PrSummary {
                        title,
                        base_branch: meta.base_branch.clone(),
                        head_branch: meta.head_branch.clone(),
                        creator: meta.creator.clone(),
                    },
                ))
            })
            .collect();

        Self {
            results,
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
            commit: commit.into(),
            prs_implicated,
        }
    }
}
