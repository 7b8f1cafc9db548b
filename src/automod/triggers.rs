//! Content matchers for the stateless trigger kinds.
//!
//! Each matcher returns the fragments that caused the match, or `None`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::event::Attachment;
use crate::spec::automod::Keyword;

lazy_static! {
    static ref LINK: Regex =
        Regex::new(r"(?i)\bhttps?://([^\s/?#<>]+)[^\s<>]*").expect("Valid link regex");
    static ref INVITE: Regex = Regex::new(
        r"(?i)\b(?:discord\.gg|discord(?:app)?\.com/invite)/([a-z0-9-]+)"
    )
    .expect("Valid invite regex");
    static ref MENTION: Regex =
        Regex::new(r"<@[!&]?\d+>|@everyone|@here").expect("Valid mention regex");
    static ref CUSTOM_EMOJI: Regex = Regex::new(r"<a?:\w+:\d+>").expect("Valid emoji regex");
    static ref UNICODE_EMOJI: Regex =
        Regex::new(r"\p{Extended_Pictographic}").expect("Valid emoji regex");
}

fn non_empty(found: Vec<String>) -> Option<Vec<String>> {
    if found.is_empty() {
        None
    } else {
        Some(found)
    }
}

/// Case-insensitive substring match. A keyword is suppressed when any of
/// its allowed phrases also appears in the message.
pub fn keywords(content: &str, keywords: &[Keyword]) -> Option<Vec<String>> {
    let lowered = content.to_lowercase();
    let found = keywords
        .iter()
        .filter(|keyword| !keyword.word().is_empty())
        .filter(|keyword| lowered.contains(&keyword.word().to_lowercase()))
        .filter(|keyword| {
            !keyword
                .allowed()
                .iter()
                .any(|allowed| lowered.contains(&allowed.to_lowercase()))
        })
        .map(|keyword| keyword.word().to_string())
        .collect();
    non_empty(found)
}

pub fn patterns(content: &str, compiled: &[Regex]) -> Option<Vec<String>> {
    let found = compiled
        .iter()
        .filter_map(|regex| regex.find(content))
        .map(|m| m.as_str().to_string())
        .collect();
    non_empty(found)
}

fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().to_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// With `blocked` set, links containing a blocked fragment match. Otherwise
/// every link whose host is not allowed matches.
pub fn links(content: &str, blocked: &[String], allowed: &[String]) -> Option<Vec<String>> {
    let found = LINK
        .captures_iter(content)
        .filter(|caps| {
            let url = caps[0].to_lowercase();
            let host = caps[1].to_lowercase();
            if blocked.is_empty() {
                !allowed.iter().any(|domain| host_matches(&host, domain))
            } else {
                blocked
                    .iter()
                    .any(|fragment| url.contains(&fragment.to_lowercase()))
            }
        })
        .map(|caps| caps[0].to_string())
        .collect();
    non_empty(found)
}

pub fn invites(content: &str, allowed: &[String]) -> Option<Vec<String>> {
    let found = INVITE
        .captures_iter(content)
        .filter(|caps| {
            !allowed
                .iter()
                .any(|code| code.eq_ignore_ascii_case(&caps[1]))
        })
        .map(|caps| caps[0].to_string())
        .collect();
    non_empty(found)
}

/// Share of uppercase letters, in percent, once the message has at least
/// `min_length` letters.
pub fn caps(content: &str, threshold: f64, min_length: usize) -> Option<Vec<String>> {
    let letters: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() || letters.len() < min_length {
        return None;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    let percent = upper as f64 * 100.0 / letters.len() as f64;
    (percent >= threshold).then(|| vec![format!("{:.0}%", percent)])
}

fn at_limit(matched: Vec<String>, max: usize) -> Option<Vec<String>> {
    (!matched.is_empty() && matched.len() >= max).then_some(matched)
}

pub fn emoji(content: &str, max: usize) -> Option<Vec<String>> {
    let stripped = CUSTOM_EMOJI.replace_all(content, "");
    let matched = CUSTOM_EMOJI
        .find_iter(content)
        .chain(UNICODE_EMOJI.find_iter(&stripped))
        .map(|m| m.as_str().to_string())
        .collect();
    at_limit(matched, max)
}

pub fn mentions(content: &str, max: usize) -> Option<Vec<String>> {
    let matched = MENTION
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .collect();
    at_limit(matched, max)
}

pub fn newlines(content: &str, max: usize) -> Option<Vec<String>> {
    let count = content.matches('\n').count();
    (count > 0 && count >= max).then(|| vec![count.to_string()])
}

/// Blocked extensions win over the allowed list; with neither, the message
/// matches once it carries at least `max` attachments.
pub fn attachments(
    attachments: &[Attachment],
    blocked: &[String],
    allowed: &[String],
    max: usize,
) -> Option<Vec<String>> {
    let normalize = |ext: &String| ext.trim_start_matches('.').to_ascii_lowercase();
    let blocked: Vec<String> = blocked.iter().map(normalize).collect();
    let allowed: Vec<String> = allowed.iter().map(normalize).collect();
    let found = attachments
        .iter()
        .filter(|attachment| {
            let ext = attachment.extension().unwrap_or_default();
            if !blocked.is_empty() {
                blocked.contains(&ext)
            } else if !allowed.is_empty() {
                !allowed.contains(&ext)
            } else {
                attachments.len() >= max
            }
        })
        .map(|attachment| attachment.filename.clone())
        .collect();
    non_empty(found)
}
