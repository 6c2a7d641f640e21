//! Dependency constraint lines declared by module descriptors.
//!
//! Grammar:
//!
//! ```text
//! [profile,profile:][service] (REQUIRES|CONFLICTS|BEFORE|AFTER) clause (OR clause)*
//! clause := module [cmp MAJOR.MINOR] [element]
//! cmp    := = | < | <= | > | >=
//! ```
//!
//! A line without any keyword is not a constraint and parses to `None`. A line
//! with a keyword but malformed clauses is an error.

use crate::types::{ModuleName, ServiceName};
use crate::version::{Comparator, Version};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("constraint '{line}': {reason}")]
    Malformed { line: String, reason: String },
}

fn malformed(line: &str, reason: impl Into<String>) -> ConstraintError {
    ConstraintError::Malformed {
        line: line.to_owned(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Requires,
    Conflicts,
    Before,
    After,
}

impl ConstraintKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "REQUIRES" => Some(Self::Requires),
            "CONFLICTS" => Some(Self::Conflicts),
            "BEFORE" => Some(Self::Before),
            "AFTER" => Some(Self::After),
            _ => None,
        }
    }

    /// REQUIRES and CONFLICTS gate lifecycle operations; BEFORE and AFTER
    /// only order service startup.
    pub fn is_gating(self) -> bool {
        matches!(self, Self::Requires | Self::Conflicts)
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requires => "REQUIRES",
            Self::Conflicts => "CONFLICTS",
            Self::Before => "BEFORE",
            Self::After => "AFTER",
        })
    }
}

/// One alternative target of a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub module: ModuleName,
    pub version: Option<(Comparator, Version)>,
    /// Target service or volume of `module`.
    pub element: Option<String>,
}

impl Clause {
    /// True when no version test is attached or `actual` passes it.
    pub fn version_matches(&self, actual: Option<&Version>) -> bool {
        match (&self.version, actual) {
            (None, _) => true,
            (Some((cmp, expected)), Some(actual)) => cmp.matches(actual, expected),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module)?;
        if let Some((cmp, version)) = &self.version {
            write!(f, " {cmp} {version}")?;
        }
        if let Some(element) = &self.element {
            write!(f, " {element}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Empty means every profile.
    pub profiles: Vec<String>,
    /// Subject service; `None` means every service of the declaring module.
    pub service: Option<ServiceName>,
    pub kind: ConstraintKind,
    pub clauses: Vec<Clause>,
}

/// Read-only view of the enabled module set used to evaluate constraints.
pub trait ModuleSet {
    /// Installed version of `module` if it is enabled, `None` otherwise.
    /// An enabled module with an unparsable version yields `Some(None)`.
    fn enabled_version(&self, module: &ModuleName) -> Option<Option<Version>>;

    /// Whether `module` provides the service or volume `element`.
    fn provides(&self, module: &ModuleName, element: &str) -> bool;
}

impl Constraint {
    /// Returns true if any clause is satisfied by `set`.
    pub fn any_clause_matches(&self, set: &impl ModuleSet) -> bool {
        self.clauses.iter().any(|clause| {
            let Some(version) = set.enabled_version(&clause.module) else {
                return false;
            };
            clause.version_matches(version.as_ref())
                && clause
                    .element
                    .as_deref()
                    .map_or(true, |e| set.provides(&clause.module, e))
        })
    }

    /// Evaluate a gating constraint. REQUIRES holds when any clause matches;
    /// CONFLICTS holds when none does. Ordering constraints always hold.
    pub fn is_satisfied_by(&self, set: &impl ModuleSet) -> bool {
        match self.kind {
            ConstraintKind::Requires => self.any_clause_matches(set),
            ConstraintKind::Conflicts => !self.any_clause_matches(set),
            ConstraintKind::Before | ConstraintKind::After => true,
        }
    }

    /// Expand the profile scope against the concrete profile list. The
    /// `online` scope stands for every online sub-profile.
    pub fn expand_profiles(&self, all: &[String], online: &[String]) -> Vec<String> {
        if self.profiles.is_empty() {
            return all.to_vec();
        }
        let mut out: Vec<String> = Vec::new();
        for profile in &self.profiles {
            let expanded: Vec<&String> = if profile == "online" {
                online.iter().collect()
            } else {
                all.iter().filter(|p| *p == profile).collect()
            };
            for p in expanded {
                if !out.contains(p) {
                    out.push(p.clone());
                }
            }
        }
        out
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.profiles.is_empty() {
            write!(f, "{}:", self.profiles.join(","))?;
        }
        if let Some(service) = &self.service {
            write!(f, "{service} ")?;
        } else if !self.profiles.is_empty() {
            f.write_str(" ")?;
        }
        write!(f, "{}", self.kind)?;
        for (i, clause) in self.clauses.iter().enumerate() {
            if i == 0 {
                write!(f, " {clause}")?;
            } else {
                write!(f, " OR {clause}")?;
            }
        }
        Ok(())
    }
}

/// Parse one constraint line.
pub fn parse(line: &str) -> Result<Option<Constraint>, ConstraintError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let Some(kw_index) = tokens.iter().position(|t| ConstraintKind::parse(t).is_some()) else {
        return Ok(None);
    };
    let Some(kind) = ConstraintKind::parse(tokens[kw_index]) else {
        return Ok(None);
    };

    let (profiles, service) = parse_subject(trimmed, &tokens[..kw_index])?;

    let mut clauses = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for token in &tokens[kw_index + 1..] {
        if token.eq_ignore_ascii_case("or") {
            clauses.push(parse_clause(trimmed, &current)?);
            current.clear();
        } else {
            current.push(token);
        }
    }
    clauses.push(parse_clause(trimmed, &current)?);

    Ok(Some(Constraint {
        profiles,
        service,
        kind,
        clauses,
    }))
}

fn parse_subject(
    line: &str,
    prefix: &[&str],
) -> Result<(Vec<String>, Option<ServiceName>), ConstraintError> {
    let split_profiles = |raw: &str| -> Result<Vec<String>, ConstraintError> {
        let profiles: Vec<String> = raw.split(',').map(|p| p.trim().to_owned()).collect();
        if profiles.iter().any(String::is_empty) {
            return Err(malformed(line, "empty profile name"));
        }
        Ok(profiles)
    };
    let service = |raw: &str| -> Option<ServiceName> {
        (!raw.is_empty()).then(|| ServiceName::new(raw))
    };

    match prefix {
        [] => Ok((Vec::new(), None)),
        [single] => match single.split_once(':') {
            Some((profiles, rest)) => Ok((split_profiles(profiles)?, service(rest))),
            None => Ok((Vec::new(), service(single))),
        },
        [profiles, subject] => {
            let Some(profiles) = profiles.strip_suffix(':') else {
                return Err(malformed(line, "expected 'profile:' before the service name"));
            };
            if subject.contains(':') {
                return Err(malformed(line, "unexpected ':' in service name"));
            }
            Ok((split_profiles(profiles)?, service(subject)))
        }
        _ => Err(malformed(line, "too many tokens before the constraint keyword")),
    }
}

fn parse_clause(line: &str, tokens: &[&str]) -> Result<Clause, ConstraintError> {
    let Some((module, rest)) = tokens.split_first() else {
        return Err(malformed(line, "empty clause"));
    };
    if !crate::types::is_valid_module_name(module) {
        return Err(malformed(line, format!("invalid module name '{module}'")));
    }

    let mut rest: Vec<&str> = rest.to_vec();
    let mut version = None;

    if let Some(first) = rest.first().copied() {
        let op_len = first
            .find(|c: char| !matches!(c, '<' | '>' | '='))
            .unwrap_or(first.len());
        if op_len > 0 {
            let cmp = Comparator::parse(&first[..op_len])
                .ok_or_else(|| malformed(line, format!("invalid comparator '{}'", &first[..op_len])))?;
            let raw = if op_len < first.len() {
                rest.remove(0);
                &first[op_len..]
            } else {
                rest.remove(0);
                if rest.is_empty() {
                    return Err(malformed(line, format!("comparator '{cmp}' without version")));
                }
                rest.remove(0)
            };
            let parsed = Version::parse(raw)
                .ok_or_else(|| malformed(line, format!("invalid version '{raw}'")))?;
            version = Some((cmp, parsed));
        } else if let Some(parsed) = Version::parse(first) {
            rest.remove(0);
            version = Some((Comparator::Eq, parsed));
        }
    }

    let element = match rest.as_slice() {
        [] => None,
        [element] => Some((*element).to_owned()),
        _ => return Err(malformed(line, format!("unexpected tokens '{}'", rest.join(" ")))),
    };

    Ok(Clause {
        module: ModuleName::new(*module),
        version,
        element,
    })
}
