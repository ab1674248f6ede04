//! Small text helpers for commit messages, progress lines and user input.

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};

const SLUG_MAX_CHARS: usize = 48;
const SLUG_FALLBACK: &str = "story";

/// Commit-message slug: lowercase ASCII alphanumerics joined by single `-`.
pub fn safe_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(SLUG_MAX_CHARS).collect();
    if slug.is_empty() {
        SLUG_FALLBACK.to_string()
    } else {
        slug
    }
}

/// Collapse whitespace runs and truncate to `limit` characters with `...`.
pub fn short_text(text: &str, limit: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= limit {
        return collapsed;
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = collapsed.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Whether a steering reply accepts the current draft.
pub fn is_approval(reply: &str) -> bool {
    let reply = reply.trim().to_lowercase();
    ["looks good", "build it", "approved"]
        .iter()
        .any(|phrase| reply.contains(phrase))
        || reply == "approve"
        || reply == "ok"
}

/// Normalize an agent-supplied path so it stays inside the project root.
///
/// Leading `/` and `.` components are dropped; `..` is resolved lexically and
/// rejected once it would climb above the root.
pub fn sanitize_relative_path(raw: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(raw.trim()).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if !out.pop() {
                    bail!("path escapes project root: {raw}");
                }
            }
        }
    }
    if out.as_os_str().is_empty() {
        bail!("path is empty: {raw:?}");
    }
    Ok(out)
}
