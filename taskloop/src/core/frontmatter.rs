//! Frontmatter block parser/serializer for task documents.
//!
//! The block is a flat list of `key: value` lines between `---` delimiters.
//! Unchanged lines render back byte-for-byte; only keys passed to
//! [`ParsedDocument::set`] are rewritten. Shapes outside the flat subset
//! (nested mappings, block lists, block scalars) are rejected instead of being
//! silently defaulted.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::core::types::{LoopStatus, TaskStatus};
use crate::error::FormatError;

const DELIMITER: &str = "---";

pub const DEFAULT_MAX_ITERATIONS: u32 = 128;

/// A typed frontmatter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn str(value: impl Into<String>) -> Self {
        FieldValue::Str(value.into())
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "null" || raw == "~" {
            return Ok(FieldValue::Null);
        }
        match raw {
            "true" => return Ok(FieldValue::Bool(true)),
            "false" => return Ok(FieldValue::Bool(false)),
            _ => {}
        }
        if let Some(first) = raw.chars().next()
            && matches!(first, '{' | '|' | '>' | '&' | '*' | '!')
        {
            return Err(format!("unsupported value shape '{raw}'"));
        }
        if raw.starts_with('[') {
            let inner = raw
                .strip_prefix('[')
                .and_then(|r| r.strip_suffix(']'))
                .ok_or_else(|| format!("unterminated list '{raw}'"))?;
            let items = inner
                .split(',')
                .map(|item| unquote(item.trim()).to_string())
                .filter(|item| !item.is_empty())
                .collect();
            return Ok(FieldValue::List(items));
        }
        if is_quoted(raw) {
            return Ok(FieldValue::Str(unquote(raw).to_string()));
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(FieldValue::Int(n));
        }
        Ok(FieldValue::Str(raw.to_string()))
    }

    /// Render for a `key: value` line.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(n) => n.to_string(),
            FieldValue::Str(s) => render_scalar(s),
            FieldValue::List(items) => {
                let rendered: Vec<String> = items.iter().map(|s| render_scalar(s)).collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn is_quoted(raw: &str) -> bool {
    raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
}

fn unquote(raw: &str) -> &str {
    if is_quoted(raw) {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// Quote strings that would otherwise read back as another type.
fn render_scalar(s: &str) -> String {
    let ambiguous = s.is_empty()
        || matches!(s, "null" | "~" | "true" | "false")
        || s.parse::<i64>().is_ok()
        || s.contains(',')
        || s.contains(": ")
        || s.starts_with(['[', '{', '|', '>', '&', '*', '!', '#', '"', '\''])
        || s != s.trim();
    if ambiguous {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Blank line or `#` comment, kept verbatim.
    Verbatim(String),
    Entry {
        key: String,
        value: FieldValue,
        raw: String,
    },
}

/// A task document split into frontmatter entries and an untouched body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    lines: Vec<Line>,
    body: String,
}

impl ParsedDocument {
    /// Split `raw` into frontmatter and body.
    ///
    /// Fails with [`FormatError`] when the leading `---` block is missing or
    /// contains a line outside the supported flat shape.
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let mut lines_iter = raw.split_inclusive('\n');
        let first = lines_iter.next().unwrap_or("");
        if first.trim_end() != DELIMITER {
            return Err(FormatError::new("no frontmatter found (expected leading '---')"));
        }

        let mut consumed = first.len();
        let mut lines = Vec::new();
        let mut seen = HashSet::new();
        let mut closed = false;
        for line in lines_iter {
            consumed += line.len();
            let text = line.trim_end_matches(['\n', '\r']);
            if text == DELIMITER {
                closed = true;
                break;
            }
            lines.push(parse_line(text, &mut seen)?);
        }
        if !closed {
            return Err(FormatError::new("frontmatter is not terminated by '---'"));
        }

        Ok(Self {
            lines,
            body: raw[consumed..].to_string(),
        })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value, .. } if k == key => Some(value),
            _ => None,
        })
    }

    /// First present key among `keys`, returning the key that matched.
    pub fn get_any<'a>(&self, keys: &[&'a str]) -> Option<(&'a str, &FieldValue)> {
        keys.iter()
            .find_map(|key| self.get(key).map(|value| (*key, value)))
    }

    /// Set `key`, rewriting its line in place or appending it.
    pub fn set(&mut self, key: &str, value: FieldValue) {
        self.set_with_aliases(key, &[], value);
    }

    /// Set `key`; if only a legacy alias is present, that line is renamed.
    pub fn set_with_aliases(&mut self, key: &str, aliases: &[&str], value: FieldValue) {
        let raw = format!("{key}: {}", value.render());
        let position = self
            .lines
            .iter()
            .position(|line| matches!(line, Line::Entry { key: k, .. } if k == key))
            .or_else(|| {
                self.lines.iter().position(
                    |line| matches!(line, Line::Entry { key: k, .. } if aliases.contains(&k.as_str())),
                )
            });
        let entry = Line::Entry {
            key: key.to_string(),
            value,
            raw,
        };
        match position {
            Some(idx) => self.lines[idx] = entry,
            None => self.lines.push(entry),
        }
    }

    pub fn set_body(&mut self, body: String) {
        self.body = body;
    }

    pub fn render(&self) -> String {
        let mut buf = String::new();
        buf.push_str(DELIMITER);
        buf.push('\n');
        for line in &self.lines {
            match line {
                Line::Verbatim(raw) | Line::Entry { raw, .. } => buf.push_str(raw),
            }
            buf.push('\n');
        }
        buf.push_str(DELIMITER);
        buf.push('\n');
        buf.push_str(&self.body);
        buf
    }
}

fn parse_line(text: &str, seen: &mut HashSet<String>) -> Result<Line, FormatError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Line::Verbatim(text.to_string()));
    }
    if text.starts_with([' ', '\t']) || trimmed.starts_with("- ") {
        return Err(FormatError::new(format!(
            "nested or multi-line frontmatter is not supported: '{trimmed}'"
        )));
    }
    let (key, value) = text
        .split_once(':')
        .ok_or_else(|| FormatError::new(format!("expected 'key: value', got '{trimmed}'")))?;
    let key = key.trim();
    if !is_valid_key(key) {
        return Err(FormatError::new(format!("invalid frontmatter key '{key}'")));
    }
    if !seen.insert(key.to_string()) {
        return Err(FormatError::new(format!("duplicate frontmatter key '{key}'")));
    }
    let value = FieldValue::parse(value)
        .map_err(|reason| FormatError::new(format!("field '{key}': {reason}")))?;
    Ok(Line::Entry {
        key: key.to_string(),
        value,
        raw: text.to_string(),
    })
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Canonical field names and their accepted legacy aliases.
pub mod keys {
    pub const ID: &str = "id";
    pub const STATUS: &str = "status";
    pub const LOOP_STATUS: &str = "loop_status";
    pub const LOOP_STATUS_ALIASES: &[&str] = &["loopStatus"];
    pub const ITERATION: &str = "iteration";
    pub const MAX_ITERATIONS: &str = "max_iterations";
    pub const MAX_ITERATIONS_ALIASES: &[&str] = &["maxIterations"];
    pub const EFFORT_LEVEL: &str = "effort_level";
    pub const EFFORT_LEVEL_ALIASES: &[&str] = &["sla_tier"];
    pub const LAST_PHASE: &str = "last_phase";
    pub const FAILING_CRITERIA: &str = "failing_criteria";
    pub const VERIFICATION_SUMMARY: &str = "verification_summary";
    pub const UPDATED: &str = "updated";
}

/// Typed projection of the frontmatter with defaulting rules applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frontmatter {
    pub id: String,
    pub status: TaskStatus,
    pub loop_status: LoopStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub effort_level: String,
    pub last_phase: Option<String>,
    pub failing_criteria: Vec<String>,
    pub verification_summary: String,
}

impl Frontmatter {
    pub fn from_document(doc: &ParsedDocument) -> Result<Self, FormatError> {
        let id = match doc.get(keys::ID) {
            None | Some(FieldValue::Null) => "unknown".to_string(),
            Some(FieldValue::Str(s)) => s.clone(),
            Some(FieldValue::Int(n)) => n.to_string(),
            Some(other) => return Err(mismatch(keys::ID, "a scalar", other)),
        };

        let status = parse_enum(doc.get(keys::STATUS), keys::STATUS)?.unwrap_or(TaskStatus::Draft);

        let loop_status = parse_enum(
            lookup(doc, keys::LOOP_STATUS, keys::LOOP_STATUS_ALIASES),
            keys::LOOP_STATUS,
        )?
        .unwrap_or(LoopStatus::Idle);

        let iteration = parse_count(doc.get(keys::ITERATION), keys::ITERATION)?.unwrap_or(0);

        let max_iterations = match parse_count(
            lookup(doc, keys::MAX_ITERATIONS, keys::MAX_ITERATIONS_ALIASES),
            keys::MAX_ITERATIONS,
        )? {
            Some(0) => {
                return Err(FormatError::new(format!(
                    "field '{}' must be greater than zero",
                    keys::MAX_ITERATIONS
                )));
            }
            Some(n) => n,
            None => DEFAULT_MAX_ITERATIONS,
        };

        let effort_level = lookup(doc, keys::EFFORT_LEVEL, keys::EFFORT_LEVEL_ALIASES)
            .and_then(scalar_text)
            .unwrap_or_else(|| "Standard".to_string());

        let last_phase = doc.get(keys::LAST_PHASE).and_then(scalar_text);

        let failing_criteria = match doc.get(keys::FAILING_CRITERIA) {
            None | Some(FieldValue::Null) => Vec::new(),
            Some(FieldValue::List(items)) => items.clone(),
            Some(other) => return Err(mismatch(keys::FAILING_CRITERIA, "a list", other)),
        };

        let verification_summary = doc
            .get(keys::VERIFICATION_SUMMARY)
            .and_then(scalar_text)
            .unwrap_or_else(|| "0/0".to_string());

        Ok(Self {
            id,
            status,
            loop_status,
            iteration,
            max_iterations,
            effort_level,
            last_phase,
            failing_criteria,
            verification_summary,
        })
    }
}

fn lookup<'a>(doc: &'a ParsedDocument, key: &str, aliases: &[&str]) -> Option<&'a FieldValue> {
    doc.get(key)
        .or_else(|| aliases.iter().find_map(|alias| doc.get(alias)))
}

fn scalar_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Str(s) if !s.is_empty() => Some(s.clone()),
        FieldValue::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_enum<T: FromStr<Err = String>>(
    value: Option<&FieldValue>,
    key: &str,
) -> Result<Option<T>, FormatError> {
    match value {
        None | Some(FieldValue::Null) => Ok(None),
        Some(FieldValue::Str(s)) => s
            .parse()
            .map(Some)
            .map_err(|err| FormatError::new(format!("field '{key}': {err}"))),
        Some(other) => Err(mismatch(key, "a string", other)),
    }
}

fn parse_count(value: Option<&FieldValue>, key: &str) -> Result<Option<u32>, FormatError> {
    match value {
        None | Some(FieldValue::Null) => Ok(None),
        Some(FieldValue::Int(n)) => u32::try_from(*n)
            .map(Some)
            .map_err(|_| FormatError::new(format!("field '{key}' out of range: {n}"))),
        Some(other) => Err(mismatch(key, "a non-negative integer", other)),
    }
}

fn mismatch(key: &str, expected: &str, got: &FieldValue) -> FormatError {
    FormatError::new(format!("field '{key}' must be {expected}, got '{got}'"))
}

/// First `# ` heading of the body.
pub fn extract_title(body: &str) -> String {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("Untitled")
        .to_string()
}
