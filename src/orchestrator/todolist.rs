//! Todolist parsing and checkbox rewriting.
//!
//! A task line is an optional list bullet (`-`, `*`, `+`) followed by a
//! checkbox: `[ ] text` is pending, `[x] text` (or `[X]`) is done. Every
//! other line is prose and is preserved untouched.

use std::path::Path;

use crate::{AppError, Result};

const UNCHECKED: &str = "[ ] ";
const CHECKED: &str = "[x] ";

/// One checkbox line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoItem {
    /// Zero-based line number in the file.
    pub line: usize,
    /// Task text after the checkbox, trimmed.
    pub text: String,
    /// Whether the box is checked.
    pub done: bool,
}

fn parse_line(line: &str) -> Option<(bool, &str)> {
    let mut rest = line.trim_start();
    for bullet in ["- ", "* ", "+ "] {
        if let Some(stripped) = rest.strip_prefix(bullet) {
            rest = stripped.trim_start();
            break;
        }
    }

    let (done, text) = if let Some(text) = rest.strip_prefix(UNCHECKED) {
        (false, text)
    } else if let Some(text) = rest
        .strip_prefix(CHECKED)
        .or_else(|| rest.strip_prefix("[X] "))
    {
        (true, text)
    } else {
        return None;
    };

    let text = text.trim();
    (!text.is_empty()).then_some((done, text))
}

/// Every checkbox line in `content`, in file order.
#[must_use]
pub fn parse(content: &str) -> Vec<TodoItem> {
    content
        .lines()
        .enumerate()
        .filter_map(|(line, raw)| {
            parse_line(raw).map(|(done, text)| TodoItem {
                line,
                text: text.to_owned(),
                done,
            })
        })
        .collect()
}

/// Unchecked tasks in file order. Checked tasks are skipped outright.
#[must_use]
pub fn pending(content: &str) -> Vec<TodoItem> {
    parse(content).into_iter().filter(|item| !item.done).collect()
}

/// Check the first `[ ] <text>` occurrence in `content`.
///
/// Returns `None` when no such unchecked marker exists.
#[must_use]
pub fn mark_done(content: &str, text: &str) -> Option<String> {
    let needle = format!("{UNCHECKED}{text}");
    content
        .contains(&needle)
        .then(|| content.replacen(&needle, &format!("{CHECKED}{text}"), 1))
}

/// Read the pending tasks of the todolist at `path`.
///
/// # Errors
///
/// Returns `AppError::Todolist` if the file cannot be read.
pub async fn load_pending(path: &Path) -> Result<Vec<TodoItem>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::Todolist(format!("cannot read {}: {err}", path.display())))?;
    Ok(pending(&content))
}

/// Check `text` off in the todolist at `path`. Returns whether the file
/// changed.
///
/// # Errors
///
/// Returns `AppError::Todolist` if the file cannot be read or written.
pub async fn mark_done_in_file(path: &Path, text: &str) -> Result<bool> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::Todolist(format!("cannot read {}: {err}", path.display())))?;
    let Some(updated) = mark_done(&content, text) else {
        return Ok(false);
    };
    tokio::fs::write(path, updated)
        .await
        .map_err(|err| AppError::Todolist(format!("cannot write {}: {err}", path.display())))?;
    Ok(true)
}
