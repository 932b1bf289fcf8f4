//! Terminal-session naming: `<prefix>-<tool>-<slug>`.

const MAX_SLUG_LEN: usize = 32;

/// Reduce task text to a short lowercase `a-z0-9-` slug.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(MAX_SLUG_LEN);
    let mut dash = false;
    for ch in text.chars() {
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("task");
    }
    slug
}

/// Terminal-session name for a tool working on `task`.
#[must_use]
pub fn session_name(prefix: &str, tool: &str, task: &str) -> String {
    format!("{prefix}-{}-{}", slugify(tool), slugify(task))
}

/// Name of the always-on coordinating session for `prefix`.
#[must_use]
pub fn coordinator_name(prefix: &str) -> String {
    format!("{prefix}-coordinator")
}

/// Whether `name` falls in the coordinator's reserved namespace.
#[must_use]
pub fn is_reserved(prefix: &str, name: &str) -> bool {
    let coordinator = coordinator_name(prefix);
    name == coordinator
        || name
            .strip_prefix(&coordinator)
            .is_some_and(|rest| rest.starts_with('-'))
}
