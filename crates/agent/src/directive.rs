//! The directive grammar the model writes in text mode.
//!
//! ```text
//! THINK: I need the sum first.
//! ACTION: add(2, 3)
//! ```
//!
//! Markers (`THINK`, `THINKING`, `ACTION`, `ANSWER`, `DONE`, `ASK`) are
//! case-insensitive, may be indented, and accept an ASCII `:` or a
//! full-width `：`. A section runs until the next marker line.

use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// A recognized line marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Ask,
    Answer,
    Think,
    Action,
}

// Longer keywords first so THINKING wins over THINK.
const KEYWORDS: &[(&str, Marker)] = &[
    ("THINKING", Marker::Think),
    ("THINK", Marker::Think),
    ("ANSWER", Marker::Answer),
    ("DONE", Marker::Answer),
    ("ASK", Marker::Ask),
    ("ACTION", Marker::Action),
];

fn strip_colon(s: &str) -> Option<&str> {
    s.strip_prefix(':').or_else(|| s.strip_prefix('：'))
}

/// Split a line into its marker and the remainder after the colon.
pub fn split_marker(line: &str) -> Option<(Marker, &str)> {
    let trimmed = line.trim_start();
    let upper = trimmed.to_ascii_uppercase();
    for (keyword, marker) in KEYWORDS {
        if !upper.starts_with(keyword) {
            continue;
        }
        let after = trimmed[keyword.len()..].trim_start_matches([' ', '\t']);
        if let Some(rest) = strip_colon(after) {
            return Some((*marker, rest.trim_start()));
        }
    }
    None
}

/// Whether more input could still turn `partial` into a marker line.
///
/// A complete marker with nothing after it yet still counts, so the
/// whitespace following the colon is never emitted as content.
pub fn could_be_marker_prefix(partial: &str) -> bool {
    let trimmed = partial.trim_start();
    if trimmed.is_empty() {
        return true;
    }
    let upper = trimmed.to_ascii_uppercase();
    KEYWORDS.iter().any(|(keyword, _)| {
        if keyword.len() >= upper.len() {
            return keyword.starts_with(upper.as_str());
        }
        if !upper.starts_with(keyword) {
            return false;
        }
        let after = trimmed[keyword.len()..].trim_start_matches([' ', '\t']);
        match strip_colon(after) {
            Some(rest) => rest.trim_matches([' ', '\t']).is_empty(),
            None => after.is_empty(),
        }
    })
}

/// An action parsed from `Name(args…)` or `Name, literal`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub name: String,
    pub args: Vec<Value>,
}

/// The sections found in one model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    pub ask: Option<String>,
    pub answer: Option<String>,
    pub thought: Option<String>,
    pub action: Option<ParsedAction>,
    /// An `ACTION:` section was present but could not be parsed.
    pub malformed_action: bool,
}

/// Parse a reply into its directive sections. The first occurrence of
/// each marker wins.
pub fn parse_reply(text: &str) -> ParsedReply {
    let mut sections: Vec<(Marker, Vec<&str>)> = Vec::new();
    for line in text.lines() {
        match split_marker(line) {
            Some((marker, rest)) => sections.push((marker, vec![rest])),
            None => {
                if let Some((_, lines)) = sections.last_mut() {
                    lines.push(line);
                }
            }
        }
    }

    let mut reply = ParsedReply::default();
    for (marker, lines) in sections {
        let body = lines.join("\n").trim().to_string();
        match marker {
            Marker::Ask if reply.ask.is_none() => reply.ask = Some(body),
            Marker::Answer if reply.answer.is_none() => reply.answer = Some(body),
            Marker::Think if reply.thought.is_none() => reply.thought = Some(body),
            Marker::Action if reply.action.is_none() => match parse_action(&body) {
                Some(action) => {
                    reply.action = Some(action);
                    reply.malformed_action = false;
                }
                None => reply.malformed_action = true,
            },
            _ => {}
        }
    }
    reply
}

fn is_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Parse an action body: `Name(arg1, arg2, …)`, `Name, literal`, or a
/// bare `Name`.
pub fn parse_action(body: &str) -> Option<ParsedAction> {
    let body = body.trim().trim_matches('`').trim();
    let (name, args) = match body.find('(') {
        Some(open) => {
            let name = body[..open].trim();
            let inner = match body.rfind(')') {
                Some(close) if close > open => &body[open + 1..close],
                _ => &body[open + 1..],
            };
            (name, parse_arguments(inner))
        }
        None => match body.split_once(',') {
            Some((name, rest)) => (name.trim(), parse_arguments(rest)),
            None => (body.lines().next().unwrap_or("").trim(), Vec::new()),
        },
    };

    if !is_tool_name(name) {
        return None;
    }
    Some(ParsedAction {
        name: name.to_string(),
        args,
    })
}

/// Parse an argument list: a JSON array body first, then a relaxed
/// comma split that honors quotes and brackets.
pub fn parse_arguments(inner: &str) -> Vec<Value> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Vec::new();
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&format!("[{inner}]")) {
        return items;
    }
    split_top_level(inner)
        .into_iter()
        .filter(|piece| !piece.is_empty())
        .map(parse_literal)
        .collect()
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth -= 1,
            ',' if depth <= 0 => {
                pieces.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(s[start..].trim());
    pieces
}

fn parse_literal(piece: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(piece) {
        return value;
    }
    // `key=value` style: keep the value
    let piece = match piece.split_once('=') {
        Some((key, value)) if is_tool_name(key.trim()) => value.trim(),
        _ => piece,
    };
    if let Ok(value) = serde_json::from_str::<Value>(piece) {
        return value;
    }
    let unquoted = piece
        .strip_prefix('\'')
        .and_then(|p| p.strip_suffix('\''))
        .or_else(|| piece.strip_prefix('"').and_then(|p| p.strip_suffix('"')))
        .unwrap_or(piece);
    Value::String(unquoted.to_string())
}

static LOOSE_CALL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_.\-]*)\s*\(([^()]*)\)").ok());

/// Find the first `name(args)` anywhere in free text whose name is a
/// known tool.
pub fn find_loose_action(text: &str, known: &[String]) -> Option<ParsedAction> {
    LOOSE_CALL.as_ref()?.captures_iter(text).find_map(|caps| {
        let name = caps.get(1)?.as_str();
        if !known.iter().any(|k| k == name) {
            return None;
        }
        let inner = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        Some(ParsedAction {
            name: name.to_string(),
            args: parse_arguments(inner),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_markers_case_insensitively() {
        assert_eq!(split_marker("ANSWER: 4"), Some((Marker::Answer, "4")));
        assert_eq!(split_marker("  answer:4"), Some((Marker::Answer, "4")));
        assert_eq!(split_marker("Done：ok"), Some((Marker::Answer, "ok")));
        assert_eq!(split_marker("THINKING: hmm"), Some((Marker::Think, "hmm")));
        assert_eq!(split_marker("ASK : which one?"), Some((Marker::Ask, "which one?")));
        assert_eq!(split_marker("ANSWERED: no"), None);
        assert_eq!(split_marker("The answer: 4"), None);
    }

    #[test]
    fn marker_prefix_detection() {
        assert!(could_be_marker_prefix(""));
        assert!(could_be_marker_prefix("AN"));
        assert!(could_be_marker_prefix("  thi"));
        assert!(could_be_marker_prefix("ANSWER"));
        assert!(could_be_marker_prefix("ANSWER:"));
        assert!(could_be_marker_prefix("ANSWER: "));
        assert!(!could_be_marker_prefix("ANSWER: 4"));
        assert!(!could_be_marker_prefix("Hello"));
        assert!(!could_be_marker_prefix("ASKED"));
    }

    #[test]
    fn parses_json_arguments() {
        let action = parse_action(r#"Foo("a", 1, true)"#).unwrap();
        assert_eq!(action.name, "Foo");
        assert_eq!(action.args, vec![json!("a"), json!(1), json!(true)]);
    }

    #[test]
    fn parses_comma_form_without_parentheses() {
        let action = parse_action(r#"Foo, "a""#).unwrap();
        assert_eq!(action.name, "Foo");
        assert_eq!(action.args, vec![json!("a")]);
    }

    #[test]
    fn relaxed_split_honors_quotes_and_brackets() {
        let action = parse_action("search('rust, tokio', [1, 2], plain text)").unwrap();
        assert_eq!(
            action.args,
            vec![json!("rust, tokio"), json!([1, 2]), json!("plain text")]
        );
    }

    #[test]
    fn bare_name_has_no_arguments() {
        let action = parse_action("current_time").unwrap();
        assert_eq!(action.name, "current_time");
        assert!(action.args.is_empty());
        assert_eq!(parse_action("current_time()").unwrap().args, Vec::<Value>::new());
    }

    #[test]
    fn rejects_non_identifier_names() {
        assert!(parse_action("I will add the numbers").is_none());
        assert!(parse_action("").is_none());
    }

    #[test]
    fn reply_with_thought_and_action() {
        let reply = parse_reply("THINK: need the sum\nACTION: add(2,3)");
        assert_eq!(reply.thought.as_deref(), Some("need the sum"));
        assert_eq!(
            reply.action,
            Some(ParsedAction {
                name: "add".into(),
                args: vec![json!(2), json!(3)]
            })
        );
        assert!(reply.answer.is_none());
    }

    #[test]
    fn answer_collects_continuation_lines() {
        let reply = parse_reply("Some preamble\nANSWER: line one\nline two\nTHINK: trailing");
        assert_eq!(reply.answer.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn ask_runs_to_next_marker() {
        let reply = parse_reply("ASK: Which city?\nPlease be specific.\nACTION: x()");
        assert_eq!(reply.ask.as_deref(), Some("Which city?\nPlease be specific."));
    }

    #[test]
    fn malformed_action_is_flagged() {
        let reply = parse_reply("THINK: hmm\nACTION: ???");
        assert!(reply.action.is_none());
        assert!(reply.malformed_action);
    }

    #[test]
    fn loose_pattern_restricted_to_known_tools() {
        let known = vec!["add".to_string()];
        let text = "Let me print(x) and then add(2, 3) to get it.";
        let action = find_loose_action(text, &known).unwrap();
        assert_eq!(action.name, "add");
        assert_eq!(action.args, vec![json!(2), json!(3)]);
        assert!(find_loose_action("nothing callable here", &known).is_none());
    }
}
