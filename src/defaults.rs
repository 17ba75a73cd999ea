//! Scope defaults and automatic scoping.
//!
//! Defaults live in a small JSON file (by default
//! `~/.context/claude-mcp.json`) storing `{project, dataset}` so transports
//! can omit explicit scope on every call. [`auto_scope`] derives a scope for
//! a source when neither the caller nor the defaults provide one.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopeDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
}

/// Load defaults; a missing file yields empty defaults.
pub fn load_defaults(path: &Path) -> Result<ScopeDefaults> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ScopeDefaults::default())
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content).map_err(|e| {
        Error::new(
            ErrorKind::Io,
            format!("defaults file {} is unreadable: {e}", path.display()),
        )
    })
}

/// Persist defaults, creating the parent directory as needed.
pub fn save_defaults(path: &Path, defaults: &ScopeDefaults) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(defaults)
        .map_err(|e| Error::internal(format!("defaults serialize: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Derive a `(project, dataset)` scope for a source.
///
/// Precedence: stored defaults, then the explicit identifier, then a name
/// derived from the source itself (directory name for local code, repository
/// short name for git, domain for web).
pub fn auto_scope(
    defaults: &ScopeDefaults,
    path: &str,
    source_kind: &str,
    identifier: Option<&str>,
) -> (String, String) {
    let project = defaults
        .project
        .clone()
        .or_else(|| identifier.map(|s| s.to_string()))
        .unwrap_or_else(|| {
            Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "default".to_string())
        });

    let dataset = defaults.dataset.clone().unwrap_or_else(|| match source_kind {
        "git" | "github" => identifier
            .map(|s| s.to_string())
            .unwrap_or_else(|| "code".to_string()),
        "web" | "crawl" => crate::crawl::domain_of(path).unwrap_or_else(|| "web".to_string()),
        _ => "code".to_string(),
    });

    (project, dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("claude-mcp.json");

        assert_eq!(load_defaults(&path).unwrap(), ScopeDefaults::default());

        let defaults = ScopeDefaults {
            project: Some("acme".into()),
            dataset: Some("main".into()),
        };
        save_defaults(&path, &defaults).unwrap();
        assert_eq!(load_defaults(&path).unwrap(), defaults);
    }

    #[test]
    fn auto_scope_precedence() {
        let empty = ScopeDefaults::default();
        let (p, d) = auto_scope(&empty, "/home/u/projects/widget", "local", None);
        assert_eq!(p, "widget");
        assert_eq!(d, "code");

        let (p, _) = auto_scope(&empty, "/x", "local", Some("named"));
        assert_eq!(p, "named");

        let set = ScopeDefaults {
            project: Some("pinned".into()),
            dataset: Some("docs".into()),
        };
        let (p, d) = auto_scope(&set, "/anything", "local", Some("ignored"));
        assert_eq!(p, "pinned");
        assert_eq!(d, "docs");
    }

    #[test]
    fn auto_scope_web_uses_domain() {
        let empty = ScopeDefaults::default();
        let (_, d) = auto_scope(&empty, "https://docs.rs/tokio", "web", None);
        assert_eq!(d, "docs.rs");
    }
}
