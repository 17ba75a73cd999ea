//! Git repository source.
//!
//! Clones or updates a repository into a local scratch cache and exposes the
//! checkout as a plain directory for the ingestion walk, together with
//! repo/branch/commit provenance. Clones are shallow and credential
//! prompting is disabled — a private repository without ambient credentials
//! fails fast as `Unauthorized` instead of hanging on a prompt.
//!
//! Cache layout: `<cache_root>/<sha256(url)[..16]>/`; subsequent ingests of
//! the same URL fetch and hard-reset instead of recloning.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, ErrorKind, Result};
use crate::merkle::hash_bytes;

/// A prepared local checkout with provenance.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    pub dir: PathBuf,
    pub repo_url: String,
    pub branch: String,
    pub commit: String,
}

/// Clone (or update) `repo_url` at `branch` under `cache_root`.
///
/// Blocking: callers on the async runtime wrap this in `spawn_blocking`.
pub fn prepare_checkout(
    repo_url: &str,
    branch: Option<&str>,
    cache_root: &Path,
) -> Result<GitCheckout> {
    if repo_url.trim().is_empty() {
        return Err(Error::validation("repository URL must not be empty"));
    }

    let key = &hash_bytes(repo_url.as_bytes())[..16];
    let checkout_dir = cache_root.join(key);
    std::fs::create_dir_all(cache_root)?;

    let branch = branch.unwrap_or("main");

    if checkout_dir.join(".git").exists() {
        run_git(&checkout_dir, &["fetch", "--depth", "1", "origin", branch], repo_url)?;
        run_git(
            &checkout_dir,
            &["reset", "--hard", &format!("origin/{branch}")],
            repo_url,
        )?;
    } else {
        let dir_str = checkout_dir.to_string_lossy().to_string();
        run_git(
            cache_root,
            &[
                "clone", "--depth", "1", "--branch", branch, "--single-branch", repo_url, &dir_str,
            ],
            repo_url,
        )?;
    }

    let commit = run_git(&checkout_dir, &["rev-parse", "HEAD"], repo_url)?
        .trim()
        .to_string();

    Ok(GitCheckout {
        dir: checkout_dir,
        repo_url: repo_url.to_string(),
        branch: branch.to_string(),
        commit,
    })
}

fn run_git(cwd: &Path, args: &[&str], repo_url: &str) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_ASKPASS", "true")
        .output()
        .map_err(|e| {
            Error::new(ErrorKind::Io, format!("failed to run git: {e}")).with_source(e)
        })?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let kind = if stderr.contains("Authentication failed")
        || stderr.contains("could not read Username")
        || stderr.contains("Permission denied")
    {
        ErrorKind::Unauthorized
    } else {
        ErrorKind::Io
    };
    Err(
        Error::new(kind, format!("git {} failed: {}", args[0], stderr.trim()))
            .with_resource(repo_url),
    )
}

/// Short repository name for provenance (`org/repo` stripped of host and
/// `.git`).
pub fn repo_short_name(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/').trim_end_matches(".git");
    let without_scheme = trimmed
        .rsplit_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    // git@host:org/repo
    let without_user = without_scheme
        .rsplit_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(without_scheme);
    let segments: Vec<&str> = without_user.split('/').filter(|s| !s.is_empty()).collect();
    match segments.len() {
        0 => trimmed.to_string(),
        1 => segments[0].to_string(),
        n => format!("{}/{}", segments[n - 2], segments[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_variants() {
        assert_eq!(
            repo_short_name("https://github.com/acme/platform.git"),
            "acme/platform"
        );
        assert_eq!(
            repo_short_name("git@github.com:acme/platform.git"),
            "acme/platform"
        );
        assert_eq!(repo_short_name("https://gitlab.com/a/b/"), "a/b");
        assert_eq!(repo_short_name("local-repo"), "local-repo");
    }

    #[test]
    fn checkout_dirs_are_stable_per_url() {
        let root = Path::new("/tmp/cache");
        let a = &hash_bytes(b"https://github.com/a/x.git")[..16];
        let b = &hash_bytes(b"https://github.com/a/y.git")[..16];
        assert_ne!(root.join(a), root.join(b));
    }
}
