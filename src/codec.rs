//! ClientQuery wire codec
//!
//! Pure helpers for the `key=value` record format: value escaping, entity
//! and record parsing, status terminators and command encoding.
//!
//! ```text
//! clid=5 cid=1 client_nickname=Ana\sB|clid=6 cid=1 client_nickname=Bo
//! error id=0 msg=ok
//! ```

use std::collections::HashMap;
use std::fmt;

/// Prefix of the status record that terminates every command response
pub const STATUS_PREFIX: &str = "error id=";

/// Prefix shared by every unsolicited notification record
pub const NOTIFY_PREFIX: &str = "notify";

/// Escape a field value for the wire
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ' ' => out.push_str("\\s"),
            '|' => out.push_str("\\p"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`] in a single pass
///
/// `\t` and `\r` are also decoded since the voice client emits them.
/// Unknown sequences pass through untouched.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('/') => out.push('/'),
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// One `|`-delimited group of decoded `key=value` fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entity {
    fields: HashMap<String, String>,
}

impl Entity {
    /// Raw value of `key`, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Value of `key`, or `""` when absent
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// `true` when the field is present and equals `"1"`
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v == "1")
    }

    /// Check if the field is present
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Set a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Copy over every field of `base` this entity does not carry itself
    pub fn inherit(&mut self, base: &Entity) {
        for (k, v) in &base.fields {
            self.fields.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Check if the entity has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, String)> for Entity {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Parse one entity; tokens without `=` are ignored
pub fn parse_entity(text: &str) -> Entity {
    text.split_whitespace()
        .filter_map(|token| token.split_once('='))
        .map(|(k, v)| (k.to_string(), unescape(v)))
        .collect()
}

/// Parse a record into its `|`-separated entities
pub fn parse_record(text: &str) -> Vec<Entity> {
    text.split('|').map(parse_entity).collect()
}

/// Terminating `error id=<n> msg=<text>` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub id: u32,
    pub msg: String,
}

impl Status {
    /// Success status
    pub fn ok() -> Self {
        Self {
            id: 0,
            msg: "ok".to_string(),
        }
    }

    /// Parse a status record, `None` if the line is something else
    pub fn parse(line: &str) -> Option<Self> {
        if !line.starts_with(STATUS_PREFIX) {
            return None;
        }
        let entity = parse_entity(line);
        let id = entity.get("id")?.parse().ok()?;
        Some(Self {
            id,
            msg: entity.value("msg").to_string(),
        })
    }

    /// Check if this is `id=0`
    pub fn is_ok(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error id={} msg={}", self.id, self.msg)
    }
}

/// Whether a record is an unsolicited notification
pub fn is_notification(line: &str) -> bool {
    line.starts_with(NOTIFY_PREFIX)
}

/// Command line builder
///
/// Values are escaped; flags are emitted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    parts: Vec<String>,
}

impl Command {
    /// Start a command with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parts: Vec::new(),
        }
    }

    /// Add an escaped `key=value` argument
    pub fn arg(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.parts
            .push(format!("{}={}", key, escape(value.as_ref())));
        self
    }

    /// Add a `-flag` option
    pub fn flag(mut self, flag: &str) -> Self {
        self.parts.push(format!("-{}", flag));
        self
    }

    /// Render the wire line, without the newline
    pub fn to_wire(&self) -> String {
        let mut line = self.name.clone();
        for part in &self.parts {
            line.push(' ');
            line.push_str(part);
        }
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak credentials into logs
        if self.name == "auth" {
            return write!(f, "auth apikey=***");
        }
        write!(f, "{}", self.to_wire())
    }
}
