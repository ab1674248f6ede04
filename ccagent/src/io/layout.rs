//! Fixed project layout and the init draft writer.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::draft::Draft;
use crate::core::text::sanitize_relative_path;
use crate::io::files::write_text;
use crate::io::progress::{ProgressLog, timestamp};

pub const CONSTITUTION_DIR: &str = "constitution";
pub const BACKLOG_FILE: &str = "prd.json";
pub const PROGRESS_FILE: &str = "progress.txt";
pub const CONFIG_FILE: &str = "ccagent.toml";

/// Paths ccagent reads and writes under a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub constitution_dir: PathBuf,
    pub backlog: PathBuf,
    pub progress: PathBuf,
    pub config: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            constitution_dir: root.join(CONSTITUTION_DIR),
            backlog: root.join(BACKLOG_FILE),
            progress: root.join(PROGRESS_FILE),
            config: root.join(CONFIG_FILE),
            root,
        }
    }

    pub fn progress_log(&self) -> ProgressLog {
        ProgressLog::new(&self.progress)
    }
}

/// Refuse to overwrite an existing charter unless `force` is set.
pub fn ensure_init_target(paths: &ProjectPaths, force: bool) -> Result<()> {
    if force {
        return Ok(());
    }
    if paths.constitution_dir.exists() {
        bail!("constitution/ already exists. Re-run with --force to replace it.");
    }
    if paths.backlog.exists() {
        bail!("prd.json already exists. Re-run with --force to replace it.");
    }
    Ok(())
}

/// Write a locked draft: rule files, backlog, and the progress log entry.
pub fn write_draft(paths: &ProjectPaths, draft: &Draft, force: bool) -> Result<()> {
    ensure_init_target(paths, force)?;

    let mut files = Vec::new();
    for (relative, content) in draft.file_entries() {
        let safe = sanitize_relative_path(relative)
            .with_context(|| format!("Invalid relative path: {relative}"))?;
        let text = if content.ends_with('\n') {
            content.to_string()
        } else {
            format!("{content}\n")
        };
        files.push((safe, text));
    }

    if paths.constitution_dir.exists() {
        info!(dir = %paths.constitution_dir.display(), "replacing existing constitution");
        fs::remove_dir_all(&paths.constitution_dir)
            .with_context(|| format!("remove {}", paths.constitution_dir.display()))?;
    }
    if paths.backlog.exists() {
        fs::remove_file(&paths.backlog)
            .with_context(|| format!("remove {}", paths.backlog.display()))?;
    }

    for (safe, text) in &files {
        debug!(file = %safe.display(), "writing draft file");
        write_text(&paths.root.join(safe), text)?;
    }

    let mut prd = serde_json::to_string_pretty(&Value::Object(draft.prd.clone()))
        .context("serialize prd")?;
    prd.push('\n');
    write_text(&paths.backlog, &prd)?;

    let log = paths.progress_log();
    log.ensure_exists()?;
    log.append(&format!(
        "[{}] constitution locked from ccagent init ({} stories)",
        timestamp(),
        draft.story_count()
    ))?;
    Ok(())
}

/// Relative paths of draft files, for operator output.
pub fn written_files(draft: &Draft) -> Vec<String> {
    let mut files: Vec<String> = draft
        .file_entries()
        .filter_map(|(relative, _)| sanitize_relative_path(relative).ok())
        .map(|path| display_path(&path))
        .collect();
    files.push(BACKLOG_FILE.to_string());
    files
}

fn display_path(path: &Path) -> String {
    path.components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
