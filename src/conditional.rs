//! The `If:` header.
//!
//! ```text
//! if-header      := (resource-tag? "(" condition-list ")")+
//! resource-tag   := "<" URI ">"
//! condition      := "Not"? (resource-tag | "[" etag "]")
//! condition-list := condition+
//! etag           := "W/" quoted-text | quoted-text
//! ```
//!
//! A list without a resource tag applies to the request URI. Lists tagged
//! with the same URI are merged into one. The header holds if any list
//! holds, and a list holds if all of its conditions hold.
use std::fmt;

use regex::Regex;

use crate::backend::{DavBackend, DavLock};
use crate::davpath::DavPath;
use crate::ls::LockManager;

lazy_static! {
    static ref RE_OPAQUELOCKTOKEN: Regex = Regex::new(
        "^opaquelocktoken:[[:xdigit:]]{8}-[[:xdigit:]]{4}-[[:xdigit:]]{4}-[[:xdigit:]]{4}-[[:xdigit:]]{12}$"
    )
    .unwrap();
}

const OPAQUELOCKTOKEN: &str = "opaquelocktoken:";

/// What a single condition tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKind {
    /// `<token>`
    LockToken(String),
    /// `["etag"]`
    ETagStrong(String),
    /// `[W/"etag"]`
    ETagWeak(String),
}

/// A condition, possibly negated with `Not`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub not: bool,
    pub kind: ConditionKind,
}

/// Parse error. The whole header is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfParseError(&'static str);

impl fmt::Display for IfParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "If: header: {}", self.0)
    }
}

impl std::error::Error for IfParseError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Uri(&'a str),
    ETagWeak(&'a str),
    ETagStrong(&'a str),
    Not,
    Char(char),
}

struct Lexer<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(s: &'a str) -> Lexer<'a> {
        Lexer { s, pos: 0 }
    }

    // text up to the next `end`, moving past it.
    fn until(&mut self, end: char, what: &'static str) -> Result<&'a str, IfParseError> {
        let rest = &self.s[self.pos..];
        let idx = rest.find(end).ok_or(IfParseError(what))?;
        self.pos += idx + end.len_utf8();
        Ok(&rest[..idx])
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, IfParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.s[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
        let c = trimmed.chars().next()?;
        self.pos += c.len_utf8();

        let token = match c {
            '<' => self.until('>', "unterminated URI").map(Token::Uri),
            '[' => {
                let weak = self.s[self.pos..].starts_with("W/");
                if weak {
                    self.pos += 2;
                }
                self.until(']', "unterminated entity tag").map(|etag| {
                    if weak {
                        Token::ETagWeak(unquote(etag))
                    } else {
                        Token::ETagStrong(unquote(etag))
                    }
                })
            }
            'N' | 'n' => {
                let rest = &self.s[self.pos..];
                if rest.len() >= 2 && rest[..2].eq_ignore_ascii_case("ot") {
                    self.pos += 2;
                    Ok(Token::Not)
                } else {
                    Err(IfParseError("unexpected character"))
                }
            }
            c => Ok(Token::Char(c)),
        };
        Some(token)
    }
}

/// The parsed `If:` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionSet {
    groups: Vec<(String, Vec<Condition>)>,
}

impl ConditionSet {
    /// Parse an `If:` header value.
    pub fn parse(s: &str) -> Result<ConditionSet, IfParseError> {
        let mut lexer = Lexer::new(s);
        let mut set = ConditionSet::default();

        while let Some(token) = lexer.next() {
            let mut token = token?;

            let uri = match token {
                Token::Uri(uri) => {
                    token = lexer.next().ok_or(IfParseError("missing list"))??;
                    uri
                }
                _ => "",
            };
            if token != Token::Char('(') {
                return Err(IfParseError("expected '('"));
            }

            let mut list = Vec::new();
            let mut level = 1;
            let mut not = false;
            while level > 0 {
                let token = lexer.next().ok_or(IfParseError("unbalanced parentheses"))??;
                let kind = match token {
                    Token::Not if !not => {
                        not = true;
                        continue;
                    }
                    Token::Char('(') if !not => {
                        level += 1;
                        continue;
                    }
                    Token::Char(')') if !not => {
                        level -= 1;
                        continue;
                    }
                    Token::Uri(t) => ConditionKind::LockToken(t.to_string()),
                    Token::ETagStrong(e) => ConditionKind::ETagStrong(e.to_string()),
                    Token::ETagWeak(e) => ConditionKind::ETagWeak(e.to_string()),
                    _ => return Err(IfParseError("unexpected token")),
                };
                list.push(Condition { not, kind });
                not = false;
            }
            if list.is_empty() {
                return Err(IfParseError("empty list"));
            }
            set.add(uri, list);
        }

        if set.groups.is_empty() {
            return Err(IfParseError("empty header"));
        }
        Ok(set)
    }

    fn add(&mut self, uri: &str, mut list: Vec<Condition>) {
        match self.groups.iter_mut().find(|(u, _)| u == uri) {
            Some((_, conditions)) => conditions.append(&mut list),
            None => self.groups.push((uri.to_string(), list)),
        }
    }

    /// The lists, keyed by resource URI (`""` is the request URI).
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[Condition])> {
        self.groups.iter().map(|(u, c)| (u.as_str(), c.as_slice()))
    }

    /// All lock tokens that were submitted (not negated).
    pub fn lock_tokens(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|(_, c)| c.iter())
            .filter(|c| !c.not)
            .filter_map(|c| match &c.kind {
                ConditionKind::LockToken(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Lock tokens may be free form, but `opaquelocktoken:` ones must
    /// look like a UUID.
    pub fn has_malformed_token(&self) -> bool {
        self.groups
            .iter()
            .flat_map(|(_, c)| c.iter())
            .any(|c| match &c.kind {
                ConditionKind::LockToken(t) => {
                    t.starts_with(OPAQUELOCKTOKEN) && !RE_OPAQUELOCKTOKEN.is_match(t)
                }
                _ => false,
            })
    }
}

/// Evaluate the set for a request to `request_uri`.
///
/// Lock tokens are compared with the locks the lock manager reports for
/// the resource. Entity tags are checked by the backend.
pub(crate) async fn if_header_holds(
    set: &ConditionSet,
    request_uri: &str,
    request_path: &DavPath,
    lm: &LockManager<'_>,
    backend: &dyn DavBackend,
) -> bool {
    if set.has_malformed_token() {
        debug!("If: malformed opaquelocktoken");
        return false;
    }
    for (uri, conditions) in set.groups() {
        let (uri, path) = if uri.is_empty() {
            (request_uri, Some(request_path.clone()))
        } else {
            let path = DavPath::from_href(request_uri, uri, request_path.prefix())
                .ok()
                .flatten();
            (uri, path)
        };
        // fetched on the first lock token of the list.
        let mut locks: Option<Vec<DavLock>> = None;
        let mut holds = true;
        for cond in conditions {
            let res = match &cond.kind {
                ConditionKind::LockToken(token) => {
                    if locks.is_none() {
                        locks = Some(match &path {
                            Some(path) => lm.query_locks(path).await.unwrap_or_else(|e| {
                                debug!("If: query_locks on {path} failed: {e:?}");
                                Vec::new()
                            }),
                            None => Vec::new(),
                        });
                    }
                    locks.iter().flatten().any(|l| &l.token == token)
                }
                kind => match backend.check_condition(uri, kind).await {
                    Ok(res) => res,
                    Err(e) => {
                        debug!("If: check_condition on {uri} failed: {e}");
                        false
                    }
                },
            };
            if res == cond.not {
                holds = false;
                break;
            }
        }
        if holds {
            return true;
        }
    }
    false
}
