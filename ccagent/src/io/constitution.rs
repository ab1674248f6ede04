//! Load the rule text ("constitution") from the rules directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

/// Extensions treated as non-text assets and skipped.
const BINARY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "ico", "pdf"];

/// Concatenate every text file under `dir` into one labeled blob.
///
/// Files are visited recursively in path order. Each becomes a section
/// `### <relative/path>` followed by a blank line and its trimmed content;
/// sections are separated by blank lines. Paths always use `/`.
pub fn load_constitution(dir: &Path) -> Result<String> {
    if !dir.is_dir() {
        bail!("Missing constitution directory: {}", dir.display());
    }

    let mut files = Vec::new();
    collect_files(dir, &mut files)?;

    let mut sections = Vec::with_capacity(files.len());
    for path in files {
        let relative = relative_label(dir, &path);
        if is_binary_asset(&path) {
            debug!(file = %relative, "skipping binary asset");
            continue;
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let Ok(text) = String::from_utf8(bytes) else {
            warn!(file = %relative, "skipping non-UTF-8 file in constitution");
            continue;
        };
        sections.push(format!("### {relative}\n\n{}", text.trim()));
    }
    debug!(sections = sections.len(), "loaded constitution");
    Ok(sections.join("\n\n"))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("list directory {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_label(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_binary_asset(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            BINARY_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_sorted_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("constitution");
        fs::create_dir_all(dir.join("rules")).expect("mkdir");
        fs::write(dir.join("invariants.md"), "\n# Invariants\n- never panic\n\n").expect("write");
        fs::write(dir.join("CONSTITUTION.md"), "# Constitution").expect("write");
        fs::write(dir.join("rules/naming.md"), "snake_case").expect("write");
        fs::write(dir.join("diagram.PNG"), [0x89, b'P', b'N', b'G']).expect("write");

        let text = load_constitution(&dir).expect("load");
        assert_eq!(
            text,
            "### CONSTITUTION.md\n\n# Constitution\n\n\
             ### invariants.md\n\n# Invariants\n- never panic\n\n\
             ### rules/naming.md\n\nsnake_case"
        );
    }

    #[test]
    fn skips_non_utf8_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("blob.bin"), [0xff, 0xfe, 0x00]).expect("write");
        fs::write(temp.path().join("notes.md"), "ok").expect("write");
        assert_eq!(load_constitution(temp.path()).expect("load"), "### notes.md\n\nok");
    }

    #[test]
    fn empty_directory_yields_empty_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(load_constitution(temp.path()).expect("load"), "");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_constitution(&temp.path().join("nope")).expect_err("missing");
        assert!(err.to_string().contains("Missing constitution directory"));
    }
}
