//! Side-effecting operations: `.relay/` layout, stores, prompts, agent backends.

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod init;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod state_store;
pub mod workflow_store;

use std::fs;
use std::io::{BufReader, Stdin};
use std::path::Path;

use anyhow::{Context, Result};

/// Write `contents` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Line reader over stdin shared by the manual backend and the verdict prompt.
pub type ConsoleInput = BufReader<Stdin>;

/// Reads one byte per fill, so no reader holds input meant for another.
/// `Stdin` locks per read instead of for the reader's lifetime.
pub fn console_input() -> ConsoleInput {
    BufReader::with_capacity(1, std::io::stdin())
}
