//! Version strings of the form `MAJOR.MINOR[-QUALIFIER[N]]`.
//!
//! Qualifiers rank `dev` > release > `RC` > `beta` > `alpha`, so a development
//! snapshot of 2.0 sorts above the 2.0 release and release candidates sort
//! below it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Qualifier {
    Alpha,
    Beta,
    Rc,
    Release,
    Dev,
}

impl Qualifier {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            "rc" => Some(Self::Rc),
            "dev" => Some(Self::Dev),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Rc => "RC",
            Self::Release => "",
            Self::Dev => "dev",
        }
    }
}

/// A parsed module, service, or volume version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub qualifier: Qualifier,
    pub qualifier_number: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            qualifier: Qualifier::Release,
            qualifier_number: 0,
        }
    }

    /// Parse a version string. Returns `None` when the input does not follow
    /// `MAJOR.MINOR[-QUALIFIER[N]]`; callers decide whether that is an error.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (numbers, suffix) = match input.split_once('-') {
            Some((n, s)) => (n, Some(s)),
            None => (input, None),
        };
        let (major, minor) = numbers.split_once('.')?;
        let major = parse_number(major)?;
        let minor = parse_number(minor)?;

        let (qualifier, qualifier_number) = match suffix {
            None => (Qualifier::Release, 0),
            Some(s) => {
                let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
                let (label, digits) = s.split_at(split);
                let qualifier = Qualifier::parse(label)?;
                let number = if digits.is_empty() {
                    0
                } else {
                    parse_number(digits)?
                };
                (qualifier, number)
            }
        };

        Some(Self {
            major,
            minor,
            qualifier,
            qualifier_number,
        })
    }

    /// Two versions are compatible for sharing a volume when their major
    /// components match.
    pub fn major_matches(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

fn parse_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.qualifier.cmp(&other.qualifier))
            .then(self.qualifier_number.cmp(&other.qualifier_number))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.qualifier != Qualifier::Release {
            write!(f, "-{}", self.qualifier.label())?;
            if self.qualifier_number > 0 {
                write!(f, "{}", self.qualifier_number)?;
            }
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid version '{raw}'")))
    }
}

/// Comparison operator used in dependency constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparator {
    #[default]
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }

    /// Evaluate `actual <op> expected`.
    pub fn matches(self, actual: &Version, expected: &Version) -> bool {
        let ord = actual.cmp(expected);
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// Sort version tags from highest to lowest, dropping tags that do not parse.
pub fn sort_tags_desc<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut parsed: Vec<(Version, &str)> = tags
        .iter()
        .filter_map(|t| Version::parse(t.as_ref()).map(|v| (v, t.as_ref())))
        .collect();
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    parsed.into_iter().map(|(_, t)| t.to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parses_release_and_qualified_versions() {
        assert_eq!(v("1.2"), Version::new(1, 2));
        let rc = v("2.0-RC2");
        assert_eq!(rc.qualifier, Qualifier::Rc);
        assert_eq!(rc.qualifier_number, 2);
        assert_eq!(v("2.0-beta").qualifier_number, 0);
        assert_eq!(v("3.1-dev").qualifier, Qualifier::Dev);
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "1", "1.", ".1", "a.b", "1.0-gamma", "1.0-RCx", "1.0.3", "-1.0"] {
            assert!(Version::parse(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn qualifier_ordering() {
        assert!(v("2.0-dev") > v("2.0"));
        assert!(v("2.0") > v("2.0-RC1"));
        assert!(v("2.0-RC1") > v("2.0-beta3"));
        assert!(v("2.0-beta3") > v("2.0-alpha1"));
        assert!(v("1.0-RC") < v("1.0-RC2"));
    }

    #[test]
    fn numeric_minor_ordering() {
        assert!(v("2.10") > v("2.9"));
        assert!(v("10.0") > v("9.99"));
    }

    #[test]
    fn compare_is_reflexive_and_antisymmetric() {
        let all = ["2.0-dev", "2.0", "2.0-RC1", "2.0-beta3", "2.0-alpha1", "1.9", "2.1-RC"];
        for a in all {
            assert_eq!(v(a).cmp(&v(a)), Ordering::Equal);
            for b in all {
                assert_eq!(v(a).cmp(&v(b)), v(b).cmp(&v(a)).reverse());
            }
        }
    }

    #[test]
    fn sort_tags_highest_first() {
        let tags = ["2.0-alpha1", "2.0", "latest", "2.0-dev", "2.0-RC1", "1.9", "2.0-beta3"];
        assert_eq!(
            sort_tags_desc(&tags),
            vec!["2.0-dev", "2.0", "2.0-RC1", "2.0-beta3", "2.0-alpha1", "1.9"]
        );
    }

    #[test]
    fn comparators() {
        assert!(Comparator::Ge.matches(&v("1.2"), &v("1.0")));
        assert!(Comparator::Ge.matches(&v("1.0"), &v("1.0")));
        assert!(!Comparator::Lt.matches(&v("1.0"), &v("1.0")));
        assert!(Comparator::Le.matches(&v("1.0-RC1"), &v("1.0")));
        assert!(Comparator::Eq.matches(&v("1.0"), &v("1.0")));
        assert!(Comparator::Gt.matches(&v("1.0-dev"), &v("1.0")));
    }

    #[test]
    fn display_roundtrips() {
        for s in ["1.2", "2.0-RC2", "2.0-beta", "3.0-dev"] {
            assert_eq!(v(s).to_string(), s);
        }
    }
}
