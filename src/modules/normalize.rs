//! Display cleanup for catalog entries.

use std::sync::LazyLock;

use derive_more::with_trait::Display;
use regex::Regex;

use crate::modules::types::LinkRecord;

static HANDLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(\w+)").expect("handle pattern"));
static LINK_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("link handle pattern"));
static TME_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"t\.me/([A-Za-z0-9_]+)").expect("t.me pattern"));

const DEFAULT_DESCRIPTION: &str = "Community submitted channel/group";
const DESCRIPTION_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LinkKind {
    Channel,
    Group,
    Telegram,
}

/// What a catalog card shows for a record. The record itself is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{title} [{kind}]")]
pub struct DisplayLink {
    pub title: String,
    pub username: Option<String>,
    pub kind: LinkKind,
    pub initial: char,
    pub description: String,
}

pub fn normalize(record: &LinkRecord) -> DisplayLink {
    let mut title = if !record.title.is_empty() {
        record.title.clone()
    } else {
        record
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Untitled".to_string())
    };
    let mut username = record
        .username_display
        .clone()
        .or_else(|| record.username.clone())
        .filter(|u| !u.is_empty());

    if is_invite_code(&title) {
        if username.is_none() {
            username = username_from_link(&record.link);
        }
        title = username.clone().unwrap_or_else(|| "Invite Link".to_string());
    }

    if let Some(captures) = HANDLE.captures(&title) {
        let handle = captures[1].to_string();
        let rest = HANDLE.replace_all(&title, "").trim().to_string();
        title = if rest.is_empty() { handle.clone() } else { rest };
        username = Some(handle);
    }

    if username.is_none() {
        username = username_from_link(&record.link);
    }

    title = strip_kind_words(&title);
    if title.is_empty() {
        if let Some(name) = &username {
            title = name.clone();
        }
    }
    title = capitalize_first(&title);

    let initial = title
        .chars()
        .next()
        .map(|c| c.to_uppercase().next().unwrap_or(c))
        .unwrap_or('T');

    DisplayLink {
        title,
        username,
        kind: kind_of(record.description.as_deref()),
        initial,
        description: clean_description(record.description.as_deref()),
    }
}

/// `+hash` invite links, or long opaque identifiers.
fn is_invite_code(title: &str) -> bool {
    title.starts_with('+')
        || (title.chars().count() > 15
            && title
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
}

pub fn username_from_link(link: &str) -> Option<String> {
    if let Some(captures) = LINK_HANDLE.captures(link) {
        return Some(captures[1].to_string());
    }
    TME_PATH.captures(link).map(|c| c[1].to_string())
}

fn strip_kind_words(title: &str) -> String {
    title
        .split_whitespace()
        .filter(|word| !word.eq_ignore_ascii_case("group") && !word.eq_ignore_ascii_case("channel"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn kind_of(description: Option<&str>) -> LinkKind {
    let lower = description.unwrap_or_default().to_lowercase();
    if lower.contains("channel") {
        LinkKind::Channel
    } else if lower.contains("group") {
        LinkKind::Group
    } else {
        LinkKind::Telegram
    }
}

fn clean_description(description: Option<&str>) -> String {
    match description {
        None | Some("") => DEFAULT_DESCRIPTION.to_string(),
        Some(d) if d.contains("Type:") => DEFAULT_DESCRIPTION.to_string(),
        Some(d) if d.chars().count() > DESCRIPTION_LIMIT => {
            format!("{}...", d.chars().take(DESCRIPTION_LIMIT).collect::<String>())
        }
        Some(d) => d.to_string(),
    }
}
