//! Path patterns used to select filters.
//!
//! Ant-style syntax, matched segment by segment:
//!
//! | Segment  | Matches                                      |
//! |----------|----------------------------------------------|
//! | `literal`| exactly that segment                         |
//! | `*`      | exactly one segment                          |
//! | `{name}` | exactly one non-empty segment (captured)     |
//! | `**`     | zero or more trailing segments (last only)   |
//!
//! An empty pattern, `**` and `/**` match every path. Empty segments are
//! dropped on both sides, so trailing and doubled slashes do not matter.

use regex::Regex;

use crate::core::{Error, Result};

/// Pattern syntax of a filter entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatternStyle {
    #[default]
    Ant,
    /// Full-path regular expression.
    Regex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
    Variable(String),
    /// `**`, always the last segment.
    Rest,
}

#[derive(Clone, Debug)]
enum Matcher {
    All,
    Ant(Vec<Segment>),
    Regex(Regex),
}

/// Variables captured by a successful match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathMatch {
    variables: Vec<(String, String)>,
}

impl PathMatch {
    /// Value captured for `{name}`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A compiled path pattern.
#[derive(Clone, Debug)]
pub struct PathPattern {
    source: String,
    matcher: Matcher,
}

impl PathPattern {
    /// Compile an Ant-style pattern.
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let raw = split_segments(pattern);
        let mut segments = Vec::with_capacity(raw.len());

        for (i, seg) in raw.iter().enumerate() {
            let parsed = match *seg {
                "**" if i + 1 == raw.len() => Segment::Rest,
                "**" => return Err(invalid("'**' is only allowed as the last segment")),
                "*" => Segment::Wildcard,
                s if s.starts_with('{') && s.ends_with('}') => {
                    let name = &s[1..s.len() - 1];
                    if name.is_empty() || name.contains(['{', '}', '*']) {
                        return Err(invalid("malformed variable segment"));
                    }
                    Segment::Variable(name.to_string())
                }
                s if s.contains(['{', '}']) => {
                    return Err(invalid("variables must span a whole segment"))
                }
                s if s.contains('*') => {
                    return Err(invalid("wildcards must span a whole segment"))
                }
                s => Segment::Literal(s.to_string()),
            };
            segments.push(parsed);
        }

        let matcher = if segments.is_empty() && pattern.trim().is_empty()
            || segments == [Segment::Rest]
        {
            Matcher::All
        } else {
            Matcher::Ant(segments)
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// Compile a full-path regular expression.
    pub fn regex(pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            matcher: Matcher::Regex(regex),
        })
    }

    /// Compile a pattern in the given style.
    pub fn compile(pattern: &str, style: PatternStyle) -> Result<Self> {
        match style {
            PatternStyle::Ant => Self::parse(pattern),
            PatternStyle::Regex => Self::regex(pattern),
        }
    }

    /// The pattern as written.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn is_match_all(&self) -> bool {
        matches!(self.matcher, Matcher::All)
    }

    /// Check a raw request path.
    pub fn matches(&self, path: &str) -> bool {
        self.matches_split(&split_segments(path), path)
    }

    /// Check a path already split with [`split_segments`].
    ///
    /// The registry splits the request path once and reuses it for every entry.
    pub(crate) fn matches_split(&self, segments: &[&str], path: &str) -> bool {
        match &self.matcher {
            Matcher::All => true,
            Matcher::Ant(pattern) => walk(pattern, segments, None),
            Matcher::Regex(regex) => regex.is_match(normalize_trailing(path)),
        }
    }

    /// Match and capture `{name}` segments.
    pub fn captures(&self, path: &str) -> Option<PathMatch> {
        let segments = split_segments(path);
        match &self.matcher {
            Matcher::All => Some(PathMatch::default()),
            Matcher::Ant(pattern) => {
                let mut captured = PathMatch::default();
                walk(pattern, &segments, Some(&mut captured)).then_some(captured)
            }
            Matcher::Regex(regex) => {
                let caps = regex.captures(normalize_trailing(path))?;
                let variables = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                Some(PathMatch { variables })
            }
        }
    }
}

/// Left-to-right match; `**` ends the walk by consuming everything left.
fn walk(pattern: &[Segment], path: &[&str], mut captured: Option<&mut PathMatch>) -> bool {
    for (i, seg) in pattern.iter().enumerate() {
        if *seg == Segment::Rest {
            return true;
        }
        let Some(actual) = path.get(i) else {
            return false;
        };
        match seg {
            Segment::Literal(lit) if lit != actual => return false,
            Segment::Variable(name) => {
                if let Some(c) = captured.as_deref_mut() {
                    c.variables.push((name.clone(), actual.to_string()));
                }
            }
            _ => {}
        }
    }
    pattern.len() == path.len()
}

/// Split a path into its non-empty `/`-separated segments.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn normalize_trailing(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// One-shot convenience: compile `pattern` (Ant style) and test `path`.
///
/// Invalid patterns never match.
pub fn matches(pattern: &str, path: &str) -> bool {
    PathPattern::parse(pattern)
        .map(|p| p.matches(path))
        .unwrap_or(false)
}
