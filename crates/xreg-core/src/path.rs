//! Attribute path language
//!
//! A [`Path`] addresses a location inside an entity's attributes. Every path
//! has three text renderings:
//!
//! - display: `labels.stage`, `tags[2]`, `['my.key'].x`, `#nextversionid`
//! - storage: `labels,stage,` or `tags,#2,` - one flat string per leaf
//!   attribute, used as the name column of attribute rows
//! - abstract: `tags#` - the storage form with index values dropped, used to
//!   compare data locations against model shapes

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Delimiter written after every part in the storage rendering
pub const STORAGE_DELIM: char = ',';

/// Marker prefixing indexed parts in the storage rendering
pub const INDEX_MARKER: char = '#';

const ESCAPE: char = '\\';

/// One step of a [`Path`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPart {
    /// Map/object key
    Key(String),
    /// Array element
    Index(usize),
}

impl PathPart {
    /// Text of a key part, `None` for indices
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Key(k) => Some(k),
            Self::Index(_) => None,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

/// Syntax error raised while parsing a display path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// `found` is `None` when the path ended too early
    #[error("Unexpected {} at column {column} in path \"{path}\"", found_text(.found))]
    Syntax {
        found: Option<char>,
        column: usize,
        path: String,
    },
    #[error("Array index too large at column {column} in path \"{path}\"")]
    IndexOverflow { column: usize, path: String },
}

fn found_text(found: &Option<char>) -> String {
    match found {
        Some(c) => format!("'{}'", c),
        None => "end of path".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    InWord,
    PostDot,
    StartBracket,
    InBracketNumber,
    PostBracket,
    StartQuoted,
    InQuoted,
    PostQuotedBracket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Digit,
    Word,
    Dot,
    Open,
    Close,
    Quote,
    Escape,
    Other,
}

fn classify(c: char) -> CharClass {
    match c {
        '0'..='9' => CharClass::Digit,
        'a'..='z' | 'A'..='Z' | '_' | '*' => CharClass::Word,
        '.' => CharClass::Dot,
        '[' => CharClass::Open,
        ']' => CharClass::Close,
        '\'' => CharClass::Quote,
        '\\' => CharClass::Escape,
        _ => CharClass::Other,
    }
}

fn is_bare_word(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| matches!(classify(c), CharClass::Digit | CharClass::Word))
}

/// An attribute path: an ordered list of key and index parts
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    parts: Vec<PathPart>,
}

impl Path {
    /// The empty path, addressing the root of an object
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<PathPart>) -> Self {
        Self { parts }
    }

    /// Single-key path, taken verbatim (no parsing)
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            parts: vec![PathPart::Key(name.into())],
        }
    }

    /// Parse the display form (`a.b[2]['c.d']`)
    pub fn parse(text: &str) -> Result<Self, PathError> {
        if text.starts_with('#') {
            return Ok(Self::key(text));
        }

        let err = |found: Option<char>, column: usize| PathError::Syntax {
            found,
            column,
            path: text.to_string(),
        };

        let mut parts = Vec::new();
        let mut buf = String::new();
        let mut state = State::Start;
        let mut escaped = false;
        let mut column = 0;

        for (i, c) in text.chars().enumerate() {
            column = i + 1;
            let class = classify(c);

            state = match state {
                State::Start => match class {
                    CharClass::Digit | CharClass::Word => {
                        buf.push(c);
                        State::InWord
                    }
                    CharClass::Open => State::StartBracket,
                    _ => return Err(err(Some(c), column)),
                },
                State::InWord | State::PostDot => match class {
                    CharClass::Digit | CharClass::Word => {
                        buf.push(c);
                        State::InWord
                    }
                    CharClass::Dot if state == State::InWord => {
                        parts.push(PathPart::Key(std::mem::take(&mut buf)));
                        State::PostDot
                    }
                    CharClass::Open if state == State::InWord => {
                        parts.push(PathPart::Key(std::mem::take(&mut buf)));
                        State::StartBracket
                    }
                    _ => return Err(err(Some(c), column)),
                },
                State::StartBracket => match class {
                    CharClass::Digit => {
                        buf.push(c);
                        State::InBracketNumber
                    }
                    CharClass::Quote => State::StartQuoted,
                    _ => return Err(err(Some(c), column)),
                },
                State::InBracketNumber => match class {
                    CharClass::Digit => {
                        buf.push(c);
                        State::InBracketNumber
                    }
                    CharClass::Close => {
                        let index = buf
                            .parse::<usize>()
                            .map_err(|_| PathError::IndexOverflow {
                                column,
                                path: text.to_string(),
                            })?;
                        buf.clear();
                        parts.push(PathPart::Index(index));
                        State::PostBracket
                    }
                    _ => return Err(err(Some(c), column)),
                },
                State::PostBracket => match class {
                    CharClass::Dot => State::PostDot,
                    CharClass::Open => State::StartBracket,
                    _ => return Err(err(Some(c), column)),
                },
                State::StartQuoted | State::InQuoted => {
                    if escaped {
                        escaped = false;
                        buf.push(c);
                        State::InQuoted
                    } else {
                        match class {
                            CharClass::Escape => {
                                escaped = true;
                                State::InQuoted
                            }
                            CharClass::Quote => {
                                parts.push(PathPart::Key(std::mem::take(&mut buf)));
                                State::PostQuotedBracket
                            }
                            _ => {
                                buf.push(c);
                                State::InQuoted
                            }
                        }
                    }
                }
                State::PostQuotedBracket => match class {
                    CharClass::Close => State::PostBracket,
                    _ => return Err(err(Some(c), column)),
                },
            };
        }

        match state {
            State::Start | State::PostBracket => {}
            State::InWord => parts.push(PathPart::Key(buf)),
            _ => return Err(err(None, column + 1)),
        }

        Ok(Self { parts })
    }

    /// Rebuild a path from its storage rendering. Storage strings are only
    /// ever produced by [`Path::to_storage`], so this never fails.
    pub fn from_storage(text: &str) -> Self {
        let mut parts = Vec::new();
        let mut buf = String::new();
        let mut indexed = false;
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            match c {
                ESCAPE => {
                    if let Some(next) = chars.next() {
                        buf.push(next);
                    }
                }
                INDEX_MARKER if buf.is_empty() && !indexed => indexed = true,
                STORAGE_DELIM => {
                    parts.push(Self::storage_part(std::mem::take(&mut buf), indexed));
                    indexed = false;
                }
                _ => buf.push(c),
            }
        }
        if !buf.is_empty() || indexed {
            parts.push(Self::storage_part(buf, indexed));
        }

        Self { parts }
    }

    fn storage_part(text: String, indexed: bool) -> PathPart {
        if !indexed {
            return PathPart::Key(text);
        }
        match text.parse::<usize>() {
            Ok(i) => PathPart::Index(i),
            Err(_) => PathPart::Key(format!("{}{}", INDEX_MARKER, text)),
        }
    }

    fn escape_key(text: &str, out: &mut String) {
        for (i, c) in text.chars().enumerate() {
            if c == ESCAPE || c == STORAGE_DELIM || (i == 0 && c == INDEX_MARKER) {
                out.push(ESCAPE);
            }
            out.push(c);
        }
    }

    /// Flat rendering used as the attribute-name column: every part followed
    /// by a delimiter, indices marked with `#`
    pub fn to_storage(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                PathPart::Key(k) => Self::escape_key(k, &mut out),
                PathPart::Index(i) => {
                    out.push(INDEX_MARKER);
                    out.push_str(&i.to_string());
                }
            }
            out.push(STORAGE_DELIM);
        }
        out
    }

    /// Shape of the path: keys joined by the delimiter, each index reduced
    /// to a bare marker so `a[0].b` and `a[7].b` compare equal
    pub fn to_abstract(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                PathPart::Key(k) => {
                    if !out.is_empty() {
                        out.push(STORAGE_DELIM);
                    }
                    Self::escape_key(k, &mut out);
                }
                PathPart::Index(_) => out.push(INDEX_MARKER),
            }
        }
        out
    }

    pub fn parts(&self) -> &[PathPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn first(&self) -> Option<&PathPart> {
        self.parts.first()
    }

    pub fn last(&self) -> Option<&PathPart> {
        self.parts.last()
    }

    /// Everything after the first part
    pub fn rest(&self) -> Self {
        Self {
            parts: self.parts.iter().skip(1).cloned().collect(),
        }
    }

    /// Everything except the last part
    pub fn parent(&self) -> Self {
        let n = self.parts.len().saturating_sub(1);
        Self {
            parts: self.parts[..n].to_vec(),
        }
    }

    pub fn append(&self, other: &Path) -> Self {
        let mut parts = self.parts.clone();
        parts.extend(other.parts.iter().cloned());
        Self { parts }
    }

    pub fn with_prop(&self, name: impl Into<String>) -> Self {
        let mut parts = self.parts.clone();
        parts.push(PathPart::Key(name.into()));
        Self { parts }
    }

    pub fn with_index(&self, index: usize) -> Self {
        let mut parts = self.parts.clone();
        parts.push(PathPart::Index(index));
        Self { parts }
    }

    pub fn has_prefix(&self, prefix: &Path) -> bool {
        self.parts.starts_with(&prefix.parts)
    }

    /// Name of the first part when it is a key
    pub fn top(&self) -> Option<&str> {
        self.first().and_then(PathPart::key)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [PathPart::Key(k)] = self.parts.as_slice() {
            if k.starts_with('#') {
                return f.write_str(k);
            }
        }

        for (i, part) in self.parts.iter().enumerate() {
            match part {
                PathPart::Key(k) if is_bare_word(k) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(k)?;
                }
                PathPart::Key(k) => {
                    f.write_str("['")?;
                    for c in k.chars() {
                        if c == '\'' || c == ESCAPE {
                            write!(f, "{}", ESCAPE)?;
                        }
                        write!(f, "{}", c)?;
                    }
                    f.write_str("']")?;
                }
                PathPart::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PathPart {
        PathPart::Key(s.to_string())
    }

    #[test]
    fn test_parse_simple() {
        let path = Path::parse("labels.stage").unwrap();
        assert_eq!(path.parts(), &[key("labels"), key("stage")]);
        assert!(Path::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_digit_key_after_dot() {
        let path = Path::parse("a1['a2'].3").unwrap();
        assert_eq!(path.parts(), &[key("a1"), key("a2"), key("3")]);
    }

    #[test]
    fn test_parse_indices_and_quotes() {
        let path = Path::parse("a[2][0]['x.y-z'].b").unwrap();
        assert_eq!(
            path.parts(),
            &[
                key("a"),
                PathPart::Index(2),
                PathPart::Index(0),
                key("x.y-z"),
                key("b")
            ]
        );

        let path = Path::parse(r"['it\'s']").unwrap();
        assert_eq!(path.parts(), &[key("it's")]);
    }

    #[test]
    fn test_parse_opaque_hash() {
        let path = Path::parse("#next.version[id]").unwrap();
        assert_eq!(path.parts(), &[key("#next.version[id]")]);
        assert_eq!(path.to_string(), "#next.version[id]");
    }

    #[test]
    fn test_parse_wildcard_word() {
        let path = Path::parse("labels.*").unwrap();
        assert_eq!(path.parts(), &[key("labels"), key("*")]);
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("a.", None, 3),
            ("a..b", Some('.'), 3),
            ("a.[1]", Some('['), 3),
            ("a[1", None, 4),
            ("a['b", None, 5),
            ("a['b'", None, 6),
            ("a[x]", Some('x'), 3),
            ("a]", Some(']'), 2),
            ("a[1]b", Some('b'), 5),
            ("'a'", Some('\''), 1),
            ("a-b", Some('-'), 2),
            (".a", Some('.'), 1),
        ];
        for (input, found, column) in cases {
            match Path::parse(input) {
                Err(PathError::Syntax {
                    found: f,
                    column: c,
                    ..
                }) => {
                    assert_eq!((f, c), (found, column), "input {:?}", input);
                }
                other => panic!("expected syntax error for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_error_message_names_column() {
        let err = Path::parse("ab.c]").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected ']' at column 5 in path \"ab.c]\""
        );

        let err = Path::parse("a[1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected end of path at column 4 in path \"a[1\""
        );
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_display_round_trip() {
        for input in [
            "a",
            "a.b.c",
            "a[0]",
            "a[10].b[2][3]",
            "['a.b']",
            "x['a-b'].c",
            "labels.*",
            "#opaque",
            "[0].a",
            "a1.a2.3",
        ] {
            let path = Path::parse(input).unwrap();
            assert_eq!(path.to_string(), input);
        }
    }

    #[test]
    fn test_storage_rendering() {
        let path = Path::parse("a[2].b").unwrap();
        assert_eq!(path.to_storage(), "a,#2,b,");
        assert_eq!(path.to_abstract(), "a#,b");
        assert_eq!(Path::parse("a[7].b").unwrap().to_abstract(), "a#,b");
    }

    #[test]
    fn test_storage_round_trip() {
        let paths = vec![
            Path::root(),
            Path::parse("a.b[3]['c,d'].e").unwrap(),
            Path::key("#nextversionid"),
            Path::key("#12"),
            Path::from_parts(vec![key("back\\slash"), PathPart::Index(0), key("")]),
            Path::from_parts(vec![PathPart::Index(4), key("12")]),
        ];
        for path in paths {
            let stored = path.to_storage();
            assert_eq!(Path::from_storage(&stored), path, "storage {:?}", stored);
        }
    }

    #[test]
    fn test_integer_key_is_not_an_index() {
        let path = Path::parse("a.3").unwrap();
        let back = Path::from_storage(&path.to_storage());
        assert_eq!(back.parts()[1], key("3"));
    }

    #[test]
    fn test_builders_and_prefix() {
        let base = Path::parse("a.b").unwrap();
        let full = base.with_index(1).with_prop("c");
        assert_eq!(full.to_string(), "a.b[1].c");
        assert!(full.has_prefix(&base));
        assert!(!base.has_prefix(&full));
        assert_eq!(base.append(&Path::parse("x[0]").unwrap()).to_string(), "a.b.x[0]");
        assert_eq!(full.rest().to_string(), "b[1].c");
        assert_eq!(full.parent().to_string(), "a.b[1]");
        assert_eq!(full.top(), Some("a"));
    }
}
