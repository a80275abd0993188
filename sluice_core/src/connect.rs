//! Parsing of connection strings.
//!
//! A connection string names the events a reaction subscribes to, as a
//! dotted path of identifiers with optional `*`/`**` fan-out markers, an
//! optional `:label` suffix controlling dispatch order, and an optional
//! leading `!` that suppresses the unknown-event warning:
//!
//! ```text
//! ConnectionString := ['!'] Segment ('.' Segment)* [':' Label]
//! Segment          := Identifier ['*' | '**']
//! Label            := any non-empty character sequence
//! ```

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

/// Error raised when a connection string fails to parse.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("empty connection string")]
    Empty,

    #[error("empty path segment in {string:?}")]
    EmptySegment { string: String },

    #[error("invalid identifier {name:?} in {string:?}")]
    BadIdentifier { name: String, string: String },

    #[error("too many stars on segment {name:?} in {string:?}")]
    BadStar { name: String, string: String },

    #[error("empty label in {string:?}")]
    EmptyLabel { string: String },
}

/// Fan-out marker on a path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Star {
    /// Plain segment: the value is followed as a single component.
    #[default]
    None,
    /// `*`: the value is a sequence of components; connect to every element.
    Each,
    /// `**`: like `*`, applied recursively down the same-named field.
    Deep,
}

impl Star {
    fn suffix(&self) -> &'static str {
        match self {
            Star::None => "",
            Star::Each => "*",
            Star::Deep => "**",
        }
    }
}

/// One segment of a parsed connection path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub star: Star,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.star.suffix())
    }
}

/// A parsed connection string.
///
/// Parsing and re-displaying yields the normalized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    /// `!` prefix: suppress the warning for unknown terminal event types.
    pub suppress_unknown: bool,
    /// The dotted path; never empty.
    pub segments: Vec<Segment>,
    /// Optional `:label` suffix; never empty when present.
    pub label: Option<String>,
}

impl ConnectionSpec {
    pub fn parse(string: &str) -> Result<Self, ParseError> {
        let (suppress_unknown, rest) = match string.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, string),
        };

        // The label starts at the first ':' and may itself contain colons.
        let (path, label) = match rest.split_once(':') {
            Some((_, label)) if label.is_empty() => {
                return Err(ParseError::EmptyLabel {
                    string: string.to_owned(),
                })
            }
            Some((path, label)) => (path, Some(label.to_owned())),
            None => (rest, None),
        };

        if path.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            if part.is_empty() {
                return Err(ParseError::EmptySegment {
                    string: string.to_owned(),
                });
            }
            let (name, star) = if let Some(name) = part.strip_suffix("**") {
                (name, Star::Deep)
            } else if let Some(name) = part.strip_suffix('*') {
                (name, Star::Each)
            } else {
                (part, Star::None)
            };
            if name.contains('*') {
                return Err(ParseError::BadStar {
                    name: part.to_owned(),
                    string: string.to_owned(),
                });
            }
            if !is_identifier(name) {
                return Err(ParseError::BadIdentifier {
                    name: name.to_owned(),
                    string: string.to_owned(),
                });
            }
            segments.push(Segment {
                name: name.to_owned(),
                star,
            });
        }

        Ok(Self {
            suppress_unknown,
            segments,
            label,
        })
    }

    /// The final segment of the path.
    pub fn terminal(&self) -> &Segment {
        self.segments
            .last()
            .expect("a parsed spec has at least one segment")
    }

    /// The event type this spec ultimately subscribes to: the final
    /// segment's name.
    pub fn event_type(&self) -> &str {
        &self.terminal().name
    }

    /// The ordering label: the explicit `:label` if given, otherwise the
    /// provided default (conventionally the reaction's own name).
    pub fn label_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.label.as_deref().unwrap_or(default)
    }
}

impl FromStr for ConnectionSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.suppress_unknown {
            write!(f, "!")?;
        }
        write!(f, "{}", self.segments.iter().join("."))?;
        if let Some(label) = &self.label {
            write!(f, ":{label}")?;
        }
        Ok(())
    }
}

/// Whether `s` is a valid ASCII identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let spec = ConnectionSpec::parse("first_name").unwrap();
        assert!(!spec.suppress_unknown);
        assert_eq!(spec.segments.len(), 1);
        assert_eq!(spec.event_type(), "first_name");
        assert_eq!(spec.label, None);
        assert_eq!(spec.label_or("greet"), "greet");
    }

    #[test]
    fn test_parse_full() {
        let spec = ConnectionSpec::parse("!foo.children**.text:mylabel").unwrap();
        assert!(spec.suppress_unknown);
        assert_eq!(spec.segments.len(), 3);
        assert_eq!(spec.segments[0].star, Star::None);
        assert_eq!(spec.segments[1].name, "children");
        assert_eq!(spec.segments[1].star, Star::Deep);
        assert_eq!(spec.event_type(), "text");
        assert_eq!(spec.label_or("ignored"), "mylabel");
    }

    #[test]
    fn test_label_may_contain_colons() {
        let spec = ConnectionSpec::parse("foo:a:b").unwrap();
        assert_eq!(spec.label.as_deref(), Some("a:b"));
    }

    #[test]
    fn test_normalized_round_trip() {
        for s in [
            "foo",
            "!foo",
            "a.b.c",
            "children*.foo",
            "children**",
            "!foo.children**.text:mylabel",
            "foo:a:b",
        ] {
            let spec: ConnectionSpec = s.parse().unwrap();
            assert_eq!(spec.to_string(), s);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(ConnectionSpec::parse(""), Err(ParseError::Empty)));
        assert!(matches!(ConnectionSpec::parse("!"), Err(ParseError::Empty)));
        assert!(matches!(
            ConnectionSpec::parse("a..b"),
            Err(ParseError::EmptySegment { .. })
        ));
        assert!(matches!(
            ConnectionSpec::parse("foo:"),
            Err(ParseError::EmptyLabel { .. })
        ));
        assert!(matches!(
            ConnectionSpec::parse("a.9b"),
            Err(ParseError::BadIdentifier { .. })
        ));
        assert!(matches!(
            ConnectionSpec::parse("a***"),
            Err(ParseError::BadStar { name, .. }) if name == "a***"
        ));
        assert!(matches!(
            ConnectionSpec::parse("a*b.c"),
            Err(ParseError::BadIdentifier { .. }) | Err(ParseError::BadStar { .. })
        ));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("_foo"));
        assert!(is_identifier("foo_1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1foo"));
        assert!(!is_identifier("fo-o"));
    }
}
