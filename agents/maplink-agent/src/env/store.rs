//! Environment Store
//!
//! Owns the local `.env` file: the single source of truth for project
//! settings, the deployed resource identifier and the integration record.
//! Comments, blank lines and key order survive a rewrite, and every flush
//! replaces the file atomically.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{MaplinkError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// `raw` is the entry as read, rendered back until the value changes
    Pair {
        key: String,
        value: String,
        raw: Option<String>,
    },
    Raw(String),
}

/// Key-value configuration backed by a dotenv-style file
#[derive(Debug, Clone)]
pub struct EnvStore {
    path: Option<PathBuf>,
    lines: Vec<Line>,
    dirty: bool,
}

impl EnvStore {
    /// Load from `path`. A missing file yields an empty store that will be
    /// created on the first flush.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lines = match std::fs::read_to_string(&path) {
            Ok(content) => parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Env file not found, starting empty");
                Vec::new()
            }
            Err(source) => return Err(MaplinkError::ConfigWrite { path, source }),
        };

        Ok(Self {
            path: Some(path),
            lines,
            dirty: false,
        })
    }

    /// Store with no backing file; `flush` only clears the dirty flag
    pub fn in_memory() -> Self {
        Self {
            path: None,
            lines: Vec::new(),
            dirty: false,
        }
    }

    /// Parse `content` into a store with no backing file
    pub fn from_str_in_memory(content: &str) -> Self {
        Self {
            path: None,
            lines: parse(content),
            dirty: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Value for `name`. Empty values read as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Pair { key, value, .. } if key == name && !value.is_empty() => {
                Some(value.as_str())
            }
            _ => None,
        })
    }

    /// Value for `name`, or `default` when absent
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Update `name` in memory. The change reaches disk on the next `flush`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let existing = self.lines.iter_mut().rev().find_map(|line| match line {
            Line::Pair { key, value, raw } if key == name => Some((value, raw)),
            _ => None,
        });

        match existing {
            Some((current, _)) if *current == value => return,
            Some((current, raw)) => {
                *current = value;
                *raw = None;
            }
            None => self.lines.push(Line::Pair {
                key: name.to_string(),
                value,
                raw: None,
            }),
        }
        self.dirty = true;
    }

    /// Drop `name` from the store
    pub fn remove(&mut self, name: &str) {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, Line::Pair { key, .. } if key == name));
        if self.lines.len() != before {
            self.dirty = true;
        }
    }

    /// Whether there are changes not yet flushed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Keys from `required` that have no value
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| self.get(key).is_none())
            .map(|key| key.to_string())
            .collect()
    }

    /// Fail with `MissingConfig` unless every key in `required` has a value
    pub fn require(&self, required: &[&str]) -> Result<()> {
        let keys = self.missing(required);
        if keys.is_empty() {
            Ok(())
        } else {
            Err(MaplinkError::MissingConfig { keys })
        }
    }

    /// Render the store in file form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Pair { raw: Some(raw), .. } => out.push_str(raw),
                Line::Pair { key, value, raw: None } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote(value));
                }
                Line::Raw(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }

    /// Atomically rewrite the backing file: write a temp file next to it,
    /// sync, then rename over the original.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };

        let write_err = |source: std::io::Error| MaplinkError::ConfigWrite {
            path: path.clone(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(self.render().as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(path = %path.display(), "Env file flushed");
        self.dirty = false;
        Ok(())
    }
}

fn parse(content: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut raw_lines = content.lines();

    while let Some(first) = raw_lines.next() {
        let trimmed = first.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            lines.push(Line::Raw(first.to_string()));
            continue;
        }

        let mut entry = first.to_string();
        while opens_quote(&entry) {
            let Some(next) = raw_lines.next() else { break };
            entry.push('\n');
            entry.push_str(next);
        }
        lines.push(parse_entry(entry));
    }
    lines
}

/// Parse one assignment (possibly spanning lines) with the dotenv grammar
fn parse_entry(entry: String) -> Line {
    match dotenvy::from_read_iter(entry.as_bytes()).next() {
        Some(Ok((key, value))) => Line::Pair {
            key,
            value,
            raw: Some(entry),
        },
        Some(Err(e)) => {
            warn!(error = %e, "Keeping unparseable env file line as is");
            Line::Raw(entry)
        }
        None => Line::Raw(entry),
    }
}

/// Whether `entry` stops inside a quoted value that continues on the next line
fn opens_quote(entry: &str) -> bool {
    let Some((_, value)) = entry.split_once('=') else {
        return false;
    };
    let mut chars = value.trim_start().chars();
    let quote = match chars.next() {
        Some(quote @ ('"' | '\'')) => quote,
        _ => return false,
    };

    let mut escaped = false;
    for c in chars {
        match c {
            '\\' if quote == '"' && !escaped => escaped = true,
            c if c == quote && !escaped => return false,
            _ => escaped = false,
        }
    }
    true
}

/// Render `value` so the dotenv grammar reads it back unchanged
fn quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$'));
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
