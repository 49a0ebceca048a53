//! Repository detection
//!
//! Finds the git root of a working directory and derives the remote search
//! project from its `origin` URL. Only Azure DevOps remotes are recognized.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

static AZURE_DEVOPS_REMOTE: OnceLock<Regex> = OnceLock::new();

fn azure_devops_remote() -> &'static Regex {
    AZURE_DEVOPS_REMOTE.get_or_init(|| {
        Regex::new(
            r"(?i)^https://(?P<account>.+)\.(?P<domain>visualstudio\.com|azure\.com)/(?P<collection_or_project>[^/]+)(/(?P<project>.+))?/_git/(_full/|_optimized/)?(?P<repo>.+)$",
        )
        .expect("Azure DevOps remote pattern is valid")
    })
}

/// Identity of the remote project backing a local checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoInfo {
    /// Local repository root (directory containing `.git`)
    pub root_dir: PathBuf,
    /// e.g. `https://contoso.visualstudio.com/Tools`
    pub project_uri: String,
    pub project_name: String,
    pub repo_name: String,
}

impl RepoInfo {
    /// Detect repository info for `dir` or any of its ancestors
    ///
    /// Returns `Ok(None)` when `dir` is not inside a git repository or the
    /// origin is not a recognized remote.
    pub fn detect(dir: impl AsRef<Path>) -> Result<Option<Self>> {
        let Some(root) = find_repo_root(dir.as_ref()) else {
            log::debug!("No git repository found above {}", dir.as_ref().display());
            return Ok(None);
        };

        let remote_url = get_remote_url(&root)?;
        let info = Self::from_remote_url(&root, &remote_url);
        if info.is_none() {
            log::debug!("Remote '{}' is not an Azure DevOps repository", remote_url);
        }
        Ok(info)
    }

    /// Parse an Azure DevOps clone URL
    pub fn from_remote_url(root_dir: impl Into<PathBuf>, remote_url: &str) -> Option<Self> {
        let url = strip_user_info(remote_url.trim());
        let captures = azure_devops_remote().captures(&url)?;

        let account = &captures["account"];
        let domain = &captures["domain"];
        let collection_or_project = &captures["collection_or_project"];
        let repo_name = captures["repo"].trim_end_matches('/').to_string();

        let project_name = match captures.name("project") {
            Some(project) => project.as_str().to_string(),
            None if !collection_or_project.is_empty()
                && !collection_or_project.eq_ignore_ascii_case("DefaultCollection") =>
            {
                collection_or_project.to_string()
            }
            None => repo_name.clone(),
        };

        // dev.azure.com keeps the organization in the path
        let project_uri = if account.eq_ignore_ascii_case("dev") && domain.eq_ignore_ascii_case("azure.com") {
            format!("https://dev.azure.com/{}/{}", collection_or_project, project_name)
        } else {
            format!("https://{}.{}/{}", account, domain, project_name)
        };

        Some(Self {
            root_dir: root_dir.into(),
            project_uri,
            project_name,
            repo_name,
        })
    }

    /// Filters restricting a search to this repository on `branch`
    pub fn search_filters(&self, branch: &str) -> HashMap<String, Vec<String>> {
        HashMap::from([
            ("Project".to_string(), vec![self.project_name.clone()]),
            ("Repository".to_string(), vec![self.repo_name.clone()]),
            ("Branch".to_string(), vec![branch.to_string()]),
        ])
    }
}

/// Walk up from `dir` to the first directory containing `.git`
pub fn find_repo_root(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    dir.ancestors()
        .find(|candidate| candidate.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Read `remote.origin.url` for the repository at `root`
pub fn get_remote_url(root: impl AsRef<Path>) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root.as_ref())
        .args(["config", "--get", "remote.origin.url"])
        .output()
        .context("Failed to execute git config")?;

    if !output.status.success() {
        anyhow::bail!(
            "git config --get remote.origin.url failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let url = String::from_utf8(output.stdout)
        .context("Invalid UTF-8 in remote URL")?
        .trim()
        .to_string();

    Ok(url)
}

/// `https://user@host/...` -> `https://host/...`
fn strip_user_info(url: &str) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => {
            let authority_end = rest.find('/').unwrap_or(rest.len());
            match rest[..authority_end].rfind('@') {
                Some(at) => format!("https://{}", &rest[at + 1..]),
                None => url.to_string(),
            }
        }
        None => url.to_string(),
    }
}
