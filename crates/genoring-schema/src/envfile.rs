//! Module environment files.
//!
//! Files hold `KEY=VALUE` lines and `#` documentation comments. The engine
//! only reads and rewrites the key/value pairs; comments, blank lines and
//! ordering are written back verbatim.
//!
//! Comment lines directly above a variable may carry tags:
//! `@customize` (should be customized), `@customizable`, `@install`
//! (used at install time) and `@runtime` (used at runtime).

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("environment file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid environment variable name '{0}'")]
    InvalidKey(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarTags {
    pub should_customize: bool,
    pub customizable: bool,
    pub install_time: bool,
    pub runtime: bool,
}

impl VarTags {
    fn absorb(&mut self, comment: &str) {
        for word in comment.split_whitespace() {
            match word {
                "@customize" => self.should_customize = true,
                "@customizable" => self.customizable = true,
                "@install" => self.install_time = true,
                "@runtime" => self.runtime = true,
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Verbatim(String),
    Var {
        key: String,
        value: String,
        tags: VarTags,
        /// Original text, rendered as-is until the value changes.
        raw: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<Line>,
}

/// Environment variable names accepted in env files and passed to hooks.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl EnvFile {
    pub fn parse(content: &str) -> Self {
        let mut lines = Vec::new();
        let mut pending = VarTags::default();
        for raw in content.lines() {
            let trimmed = raw.trim();
            if let Some(comment) = trimmed.strip_prefix('#') {
                pending.absorb(comment);
                lines.push(Line::Verbatim(raw.to_owned()));
                continue;
            }
            if trimmed.is_empty() {
                pending = VarTags::default();
                lines.push(Line::Verbatim(raw.to_owned()));
                continue;
            }
            match trimmed.split_once('=') {
                Some((key, value)) if is_valid_key(key.trim()) => {
                    lines.push(Line::Var {
                        key: key.trim().to_owned(),
                        value: unquote(value.trim()).to_owned(),
                        tags: pending,
                        raw: Some(raw.to_owned()),
                    });
                }
                _ => lines.push(Line::Verbatim(raw.to_owned())),
            }
            pending = VarTags::default();
        }
        Self { lines }
    }

    pub fn load(path: &Path) -> Result<Self, EnvFileError> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|l| match l {
            Line::Var { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn tags(&self, key: &str) -> Option<VarTags> {
        self.lines.iter().find_map(|l| match l {
            Line::Var { key: k, tags, .. } if k == key => Some(*tags),
            _ => None,
        })
    }

    /// Set `key`, rewriting the existing line in place or appending a new one.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), EnvFileError> {
        if !is_valid_key(key) {
            return Err(EnvFileError::InvalidKey(key.to_owned()));
        }
        for line in &mut self.lines {
            if let Line::Var {
                key: k,
                value: v,
                raw,
                ..
            } = line
            {
                if k == key {
                    value.clone_into(v);
                    *raw = None;
                    return Ok(());
                }
            }
        }
        self.lines.push(Line::Var {
            key: key.to_owned(),
            value: value.to_owned(),
            tags: VarTags::default(),
            raw: None,
        });
        Ok(())
    }

    /// Key/value pairs in file order; later duplicates win.
    pub fn vars(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for line in &self.lines {
            if let Line::Var { key, value, .. } = line {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }

    /// Variables tagged as needing customization that still hold an empty value.
    pub fn uncustomized(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::Var {
                    key, value, tags, ..
                } if tags.should_customize && value.is_empty() => {
                    Some(key.as_str())
                }
                _ => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Verbatim(raw)
                | Line::Var {
                    raw: Some(raw), ..
                } => out.push_str(raw),
                Line::Var { key, value, .. } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
            }
            out.push('\n');
        }
        out
    }

    /// Atomically write the file next to its destination.
    pub fn save(&self, path: &Path) -> Result<(), EnvFileError> {
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| EnvFileError::Io(e.error))?;
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
