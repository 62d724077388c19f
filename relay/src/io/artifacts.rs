//! Artifact files exchanged between agents.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

/// Human-provided inputs that survive `relay reset --clean`.
pub const PRESERVED_INPUTS: &[&str] = &["context.md", "acceptance_checklist.md"];

/// An artifact loaded for prompt assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

/// Entries containing `*` are globs; they name a family of outputs, not a file.
pub fn is_glob(name: &str) -> bool {
    name.contains('*')
}

/// Concrete (non-glob) entries of a role's `writes`, in declared order.
pub fn concrete_writes(writes: &[String]) -> Vec<&str> {
    writes
        .iter()
        .map(String::as_str)
        .filter(|name| !is_glob(name))
        .collect()
}

/// Read an artifact, truncated to `max_chars` characters.
///
/// A missing file reads as empty.
pub fn read_artifact(path: &Path, max_chars: usize) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("read artifact {}", path.display()))?;
    Ok(truncate_chars(&content, max_chars))
}

/// Load each non-glob, existing artifact in `names`, in order.
pub fn read_artifacts(dir: &Path, names: &[String], max_chars: usize) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    for name in names.iter().filter(|name| !is_glob(name)) {
        let path = dir.join(name);
        if !path.is_file() {
            debug!(artifact = %name, "input artifact missing, skipping");
            continue;
        }
        artifacts.push(Artifact {
            name: name.clone(),
            content: read_artifact(&path, max_chars)?,
        });
    }
    Ok(artifacts)
}

/// Keep the first `max_chars` characters and note how many were dropped.
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let kept: String = content.chars().take(max_chars).collect();
    format!(
        "{kept}\n\n[... truncated, {} chars remaining]",
        group_thousands(total - max_chars)
    )
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Delete every file in `dir` except those named in `keep`. Returns removed paths.
pub fn clean_artifacts(dir: &Path, keep: &[&str]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dir.is_dir() {
        return Ok(removed);
    }
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let path = entry.path();
        let keep_it = entry
            .file_name()
            .to_str()
            .is_some_and(|name| keep.contains(&name));
        if keep_it || !path.is_file() {
            continue;
        }
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        removed.push(path);
    }
    removed.sort();
    Ok(removed)
}
