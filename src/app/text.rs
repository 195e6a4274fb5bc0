//! Text helpers shared by the handlers: mention extraction, task-list
//! toggling in markdown comments, slug and username validation.

use std::sync::LazyLock;

use regex::Regex;

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)@([\da-z][-\da-z_]{0,38})").expect("valid mention regex")
});

static TASK_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)([-*])\s+\[[ xX]\]\s?").expect("valid task item regex"));

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][-a-z0-9_]{0,38}$").expect("valid username regex"));

pub const MAX_PROJECT_NAME_LEN: usize = 14;

/// Usernames mentioned as `@name`, lower-cased, in order of first appearance.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for caps in MENTION_RE.captures_iter(content) {
        let name = caps[1].to_lowercase();
        if !mentions.contains(&name) {
            mentions.push(name);
        }
    }
    mentions
}

/// Check or uncheck the task-list item on a 1-based line of `content`.
///
/// Returns `None` when the line does not exist or is not a task-list item.
pub fn toggle_task_item(content: &str, line: usize, checked: bool) -> Option<String> {
    if line == 0 {
        return None;
    }
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let target = lines.get_mut(line - 1)?;
    if !TASK_ITEM_RE.is_match(target) {
        return None;
    }
    let mark = if checked { "x" } else { " " };
    *target = TASK_ITEM_RE
        .replace(target, format!("${{1}}${{2}} [{}] ", mark))
        .into_owned();
    Some(lines.join("\n"))
}

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_RE.is_match(slug)
}

pub fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub fn is_valid_project_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= MAX_PROJECT_NAME_LEN
}

/// Lower-case, ASCII-alphanumeric slug for object keys. Never empty.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("file");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_require_leading_whitespace() {
        let mentions = extract_mentions("@Alice ping @bob and mail me at joe@example.com");
        assert_eq!(mentions, vec!["alice", "bob"]);
    }

    #[test]
    fn mentions_are_deduplicated() {
        let mentions = extract_mentions("@ann\n@ann @ben_1 @ANN");
        assert_eq!(mentions, vec!["ann", "ben_1"]);
    }

    #[test]
    fn mentions_cap_name_length() {
        let long = format!("@{}", "a".repeat(45));
        assert_eq!(extract_mentions(&long), vec!["a".repeat(39)]);
    }

    #[test]
    fn toggles_checkbox_on_given_line() {
        let content = "Steps:\n- [ ] write tests\n  * [x] ship";
        let checked = toggle_task_item(content, 2, true).unwrap();
        assert_eq!(checked, "Steps:\n- [x] write tests\n  * [x] ship");
        let unchecked = toggle_task_item(&checked, 3, false).unwrap();
        assert_eq!(unchecked, "Steps:\n- [x] write tests\n  * [ ] ship");
    }

    #[test]
    fn toggle_rejects_non_task_lines() {
        let content = "Steps:\n- plain bullet";
        assert!(toggle_task_item(content, 1, true).is_none());
        assert!(toggle_task_item(content, 2, true).is_none());
        assert!(toggle_task_item(content, 0, true).is_none());
        assert!(toggle_task_item(content, 9, true).is_none());
    }

    #[test]
    fn slug_validation() {
        assert!(is_valid_slug("web-app"));
        assert!(is_valid_slug("v2"));
        assert!(!is_valid_slug("Web-App"));
        assert!(!is_valid_slug("-web"));
        assert!(!is_valid_slug("web--app"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn username_validation() {
        assert!(is_valid_username("notgr"));
        assert!(is_valid_username("a-b_c"));
        assert!(!is_valid_username("_lead"));
        assert!(!is_valid_username("Upper"));
        assert!(!is_valid_username(&"a".repeat(40)));
    }

    #[test]
    fn project_name_length_is_capped() {
        assert!(is_valid_project_name("Backend"));
        assert!(!is_valid_project_name("   "));
        assert!(!is_valid_project_name("a very long project name"));
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("My Holiday Photo (1)"), "my-holiday-photo-1");
        assert_eq!(slugify("__"), "file");
        assert_eq!(slugify("report.final"), "report-final");
    }
}
