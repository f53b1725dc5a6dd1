//! Route pattern compilation
//!
//! Patterns are written as paths with a handful of special characters:
//!
//! | Syntax      | Meaning                                                                 |
//! |-------------|-------------------------------------------------------------------------|
//! | `:name`     | Matches one path segment and binds it to `name`                         |
//! | `*`         | Matches one or more characters (slashes included), appended to `splat`  |
//! | `*name`     | Like `*`, but binds the match to `name`                                 |
//! | `?`         | Makes the preceding element (character, parameter or group) optional    |
//! | `( ... )`   | Groups elements, usually to make them optional together                 |
//! | `\c`        | Matches `c` literally                                                   |
//!
//! Everything else matches literally. Characters outside of the unreserved URI set also match
//! their percent-encoded form.
//!
//! A pattern can also be an arbitrary [`Regex`].
//! It is matched against the whole path, and its capture groups are collected under
//! [`CAPTURES`] (named groups are bound to their names as well).
use crate::error::{Error, PatternSyntax};
use crate::params::{Params, CAPTURES, SPLAT};
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

// Matches a single path segment
const SEGMENT: &str = "([^/?#]+)";
// Matches at least one character, across segments
const WILDCARD: &str = "(.+)";

/// A compiled route pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
    slots: Vec<Slot>,
}

// What each capture group of the compiled regex feeds into
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Named(String),
    Splat,
    Capture,
    NamedCapture(String),
}

#[derive(Debug)]
enum Token {
    Literal(char),
    Param(String),
    Splat(Option<String>),
    Group(Vec<Token>),
    Optional(Box<Token>),
}

impl Pattern {
    /// Compiles a pattern written in the path syntax described in the [module docs](self)
    pub fn new(source: &str) -> Result<Self, Error> {
        let tokens = Parser::new(source)
            .parse(None)
            .map_err(|reason| Error::Pattern {
                pattern: source.to_string(),
                reason,
            })?;

        let mut body = String::from("^");
        let mut slots = Vec::new();
        emit(&tokens, &mut body, &mut slots);
        body.push('$');

        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(&body)?,
            slots,
        })
    }

    /// Wraps a regular expression so that it has to match the whole path
    pub fn from_regex(regex: &Regex) -> Result<Self, Error> {
        let anchored = Regex::new(&format!("^(?:{})$", regex.as_str()))?;

        let slots = anchored
            .capture_names()
            .skip(1)
            .map(|name| match name {
                Some(name) => Slot::NamedCapture(name.to_string()),
                None => Slot::Capture,
            })
            .collect();

        Ok(Self {
            source: regex.as_str().to_string(),
            regex: anchored,
            slots,
        })
    }

    /// The text this pattern was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Matches `path` against the pattern, returning the extracted parameters on success
    pub fn matches(&self, path: &str) -> Option<Params> {
        let captures = self.regex.captures(path)?;
        let mut params = Params::new();

        for (slot, group) in self.slots.iter().zip(captures.iter().skip(1)) {
            let value = group.map(|m| decode(m.as_str()));
            match (slot, value) {
                (Slot::Named(name), Some(value)) => params.insert(name.as_str(), value),
                (Slot::Splat, Some(value)) => params.append(SPLAT, value),
                (Slot::Capture, value) => params.append(CAPTURES, value.unwrap_or_default()),
                (Slot::NamedCapture(name), Some(value)) => {
                    params.append(CAPTURES, value.clone());
                    params.insert(name.as_str(), value);
                }
                (Slot::NamedCapture(_), None) => params.append(CAPTURES, String::new()),
                (Slot::Named(_) | Slot::Splat, None) => {}
            }
        }

        Some(params)
    }

    /// Lays the result of [`Pattern::matches`] over `params`.
    ///
    /// Every parameter the pattern declares is replaced, so an optional parameter that matched
    /// nothing hides a query or form value of the same name.
    pub(crate) fn overlay(&self, matched: Params, params: &mut Params) {
        for slot in &self.slots {
            let key = match slot {
                Slot::Named(name) | Slot::NamedCapture(name) => name.as_str(),
                Slot::Splat => SPLAT,
                Slot::Capture => CAPTURES,
            };
            params.remove(key);
        }
        params.merge(matched);
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Conversion into a compiled [`Pattern`]
///
/// Implemented for strings (path syntax), [`Regex`] and [`Pattern`] itself.
pub trait IntoPattern {
    fn into_pattern(self) -> Result<Pattern, Error>;
}

impl IntoPattern for Pattern {
    fn into_pattern(self) -> Result<Pattern, Error> {
        Ok(self)
    }
}

impl IntoPattern for &str {
    fn into_pattern(self) -> Result<Pattern, Error> {
        Pattern::new(self)
    }
}

impl IntoPattern for String {
    fn into_pattern(self) -> Result<Pattern, Error> {
        Pattern::new(&self)
    }
}

impl IntoPattern for &String {
    fn into_pattern(self) -> Result<Pattern, Error> {
        Pattern::new(self)
    }
}

impl IntoPattern for Regex {
    fn into_pattern(self) -> Result<Pattern, Error> {
        Pattern::from_regex(&self)
    }
}

impl IntoPattern for &Regex {
    fn into_pattern(self) -> Result<Pattern, Error> {
        Pattern::from_regex(self)
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

struct Parser<'a> {
    chars: Peekable<CharIndices<'a>>,
    names: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            names: Vec::new(),
        }
    }

    // Parses tokens until the end of input, or until the `)` closing the group opened at
    // `opened_at`.
    fn parse(&mut self, opened_at: Option<usize>) -> Result<Vec<Token>, PatternSyntax> {
        let mut tokens = Vec::new();

        while let Some((pos, c)) = self.chars.next() {
            let token = match c {
                ':' => match self.identifier()? {
                    Some(name) => Token::Param(name),
                    None => return Err(PatternSyntax::EmptyName(pos)),
                },
                '*' => Token::Splat(self.identifier()?),
                '(' => Token::Group(self.parse(Some(pos))?),
                ')' if opened_at.is_some() => return Ok(tokens),
                ')' => return Err(PatternSyntax::UnexpectedClose(pos)),
                '?' => match tokens.pop() {
                    None | Some(Token::Optional(_)) => {
                        return Err(PatternSyntax::DanglingOptional(pos))
                    }
                    Some(previous) => Token::Optional(Box::new(previous)),
                },
                '\\' => match self.chars.next() {
                    Some((_, escaped)) => Token::Literal(escaped),
                    None => return Err(PatternSyntax::TrailingEscape),
                },
                c => Token::Literal(c),
            };
            tokens.push(token);
        }

        match opened_at {
            Some(pos) => Err(PatternSyntax::UnclosedGroup(pos)),
            None => Ok(tokens),
        }
    }

    fn identifier(&mut self) -> Result<Option<String>, PatternSyntax> {
        let mut name = String::new();

        while let Some(&(_, c)) = self.chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            self.chars.next();
        }

        if name.is_empty() {
            return Ok(None);
        }

        if self.names.contains(&name) {
            return Err(PatternSyntax::DuplicateName(name));
        }

        self.names.push(name.clone());
        Ok(Some(name))
    }
}

fn emit(tokens: &[Token], out: &mut String, slots: &mut Vec<Slot>) {
    for token in tokens {
        match token {
            Token::Literal(c) => push_literal(*c, out),
            Token::Param(name) => {
                out.push_str(SEGMENT);
                slots.push(Slot::Named(name.clone()));
            }
            Token::Splat(name) => {
                out.push_str(WILDCARD);
                slots.push(match name {
                    Some(name) => Slot::Named(name.clone()),
                    None => Slot::Splat,
                });
            }
            Token::Group(inner) => {
                out.push_str("(?:");
                emit(inner, out, slots);
                out.push(')');
            }
            Token::Optional(inner) => {
                out.push_str("(?:");
                emit(std::slice::from_ref(inner.as_ref()), out, slots);
                out.push_str(")?");
            }
        }
    }
}

fn push_literal(c: char, out: &mut String) {
    let mut buf = [0u8; 4];
    let encoded = c.encode_utf8(&mut buf);

    if c.is_ascii_alphanumeric() || "-._~/".contains(c) {
        out.push_str(&regex::escape(encoded));
        return;
    }

    out.push_str("(?:");
    out.push_str(&regex::escape(encoded));
    out.push_str("|(?i:");
    for byte in encoded.bytes() {
        out.push_str(&format!("%{byte:02X}"));
    }
    out.push_str("))");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[track_caller]
    fn compile(source: &str) -> Pattern {
        Pattern::new(source).unwrap()
    }

    #[track_caller]
    fn syntax_error(source: &str) -> PatternSyntax {
        match Pattern::new(source) {
            Err(Error::Pattern { reason, .. }) => reason,
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn literal_paths() {
        let pattern = compile("/about");
        assert!(pattern.is_match("/about"));
        assert!(!pattern.is_match("/about/"));
        assert!(!pattern.is_match("/abou"));
        assert!(!pattern.is_match("/about/us"));
    }

    #[test]
    fn trailing_slash_is_significant() {
        let pattern = compile("/foo/");
        assert!(pattern.is_match("/foo/"));
        assert!(!pattern.is_match("/foo"));
    }

    #[test]
    fn named_parameters() {
        let pattern = compile("/hello/:name");

        let params = pattern.matches("/hello/foo").unwrap();
        assert_eq!(params.get("name"), Some("foo"));

        assert!(pattern.matches("/hello/foo/bar").is_none());
        assert!(pattern.matches("/hello/").is_none());
    }

    #[test]
    fn parameters_are_percent_decoded() {
        let params = compile("/hello/:name").matches("/hello/j%C3%B6rg%20k").unwrap();
        assert_eq!(params.get("name"), Some("jörg k"));
    }

    #[test]
    fn parameters_next_to_literals() {
        let params = compile("/:file.:ext").matches("/report.tar.gz").unwrap();
        assert_eq!(params.get("file"), Some("report.tar"));
        assert_eq!(params.get("ext"), Some("gz"));
    }

    #[test]
    fn optional_parameters() {
        let pattern = compile("/posts/:format?");

        let params = pattern.matches("/posts/").unwrap();
        assert_eq!(params.get("format"), None);

        let params = pattern.matches("/posts/json").unwrap();
        assert_eq!(params.get("format"), Some("json"));

        assert!(pattern.matches("/posts").is_none());
    }

    #[test]
    fn optional_literal() {
        let pattern = compile("/foo/?");
        assert!(pattern.is_match("/foo"));
        assert!(pattern.is_match("/foo/"));
        assert!(!pattern.is_match("/foo//"));
    }

    #[test]
    fn optional_group() {
        let pattern = compile("/page(/:number)?");
        assert_eq!(pattern.matches("/page").unwrap().get("number"), None);
        assert_eq!(pattern.matches("/page/3").unwrap().get("number"), Some("3"));
    }

    #[test]
    fn multiple_splats_are_ordered() {
        let params = compile("/say/*/to/*").matches("/say/hello/to/world").unwrap();
        assert_eq!(params.splat(), ["hello", "world"]);
    }

    #[test]
    fn splats_cross_segments() {
        let params = compile("/download/*.*").matches("/download/path/to/file.xml").unwrap();
        assert_eq!(params.splat(), ["path/to/file", "xml"]);
    }

    #[test]
    fn splat_needs_at_least_one_character() {
        let pattern = compile("/files/*");
        assert!(pattern.is_match("/files/a"));
        assert!(!pattern.is_match("/files/"));
    }

    #[test]
    fn named_splats() {
        let params = compile("/assets/*rest").matches("/assets/css/site.css").unwrap();
        assert_eq!(params.get("rest"), Some("css/site.css"));
        assert!(params.splat().is_empty());
    }

    #[test]
    fn escaped_characters() {
        let pattern = compile(r"/what\?/:id");
        assert_eq!(pattern.matches("/what?/7").unwrap().get("id"), Some("7"));
        assert!(!pattern.is_match("/wha/7"));
    }

    #[test]
    fn reserved_literals_match_encoded_form() {
        let pattern = compile("/hello world");
        assert!(pattern.is_match("/hello world"));
        assert!(pattern.is_match("/hello%20world"));
    }

    #[test]
    fn regex_patterns() {
        let regex = Regex::new(r"/hello/([\w]+)").unwrap();
        let pattern = regex.into_pattern().unwrap();

        let params = pattern.matches("/hello/world").unwrap();
        assert_eq!(params.captures(), ["world"]);

        // Regexes are anchored on both ends
        assert!(pattern.matches("/prefix/hello/world").is_none());
        assert!(pattern.matches("/hello/world/suffix").is_none());
    }

    #[test]
    fn regex_named_groups() {
        let regex = Regex::new(r"/(?P<year>\d{4})/(\d{2})(/draft)?").unwrap();
        let params = Pattern::from_regex(&regex)
            .unwrap()
            .matches("/2024/05")
            .unwrap();

        assert_eq!(params.get("year"), Some("2024"));
        assert_eq!(params.captures(), ["2024", "05", ""]);
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(syntax_error("/hello/:"), PatternSyntax::EmptyName(7));
        assert_eq!(
            syntax_error("/:id/:id"),
            PatternSyntax::DuplicateName("id".into())
        );
        assert_eq!(syntax_error("?/foo"), PatternSyntax::DanglingOptional(0));
        assert_eq!(syntax_error("/foo??"), PatternSyntax::DanglingOptional(5));
        assert_eq!(syntax_error("/(?foo)"), PatternSyntax::DanglingOptional(2));
        assert_eq!(syntax_error("/(foo"), PatternSyntax::UnclosedGroup(1));
        assert_eq!(syntax_error("/foo)"), PatternSyntax::UnexpectedClose(4));
        assert_eq!(syntax_error("/foo\\"), PatternSyntax::TrailingEscape);
    }

    #[test]
    fn string_conversion_reports_syntax_errors() {
        assert_matches!("/(".into_pattern(), Err(Error::Pattern { .. }));
        assert_matches!(String::from("/:a/:b").into_pattern(), Ok(_));
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = compile("/a/:b/*");
        let b = compile("/a/:b/*");
        assert_eq!(a.regex.as_str(), b.regex.as_str());
        assert_eq!(a.slots, b.slots);
    }

    #[test]
    fn overlay_replaces_declared_keys() {
        let pattern = compile("/posts/:format?/*");
        let mut params = Params::parse("format=evil&page=2&splat=x");

        let matched = pattern.matches("/posts//b").unwrap();
        pattern.overlay(matched, &mut params);

        assert_eq!(params.get("format"), None);
        assert_eq!(params.splat(), ["b"]);
        assert_eq!(params.get("page"), Some("2"));
    }
}
