//! Compilation of validated path patterns into RE2 expressions and Lua patterns.

use super::{validate, PathError, MATCH_ANY, MATCH_ONE};
use std::collections::BTreeSet;

/// One path pattern with its method set, compiled for matching.
///
/// `regex` is an anchored RE2-compatible expression; `lua_pattern` is the
/// equivalent anchored Lua pattern used by the login filter script.
/// An empty method set matches every method.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub path: String,
    pub regex: String,
    pub lua_pattern: String,
    pub methods: BTreeSet<String>,
    matcher: regex::Regex,
}

impl CompiledRule {
    /// Validate and compile `path`.
    pub fn compile<S: AsRef<str>>(path: &str, methods: &[S]) -> Result<Self, PathError> {
        validate(path)?;
        let regex = compile_to_regex(path);
        let matcher = regex::Regex::new(&regex).map_err(|e| PathError::Uncompilable {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_string(),
            regex,
            lua_pattern: compile_to_lua_pattern(path),
            methods: methods.iter().map(|m| m.as_ref().to_string()).collect(),
            matcher,
        })
    }

    /// Whether a request path and method fall under this rule.
    #[must_use]
    pub fn is_match(&self, path: &str, method: &str) -> bool {
        let method_ok = self.methods.is_empty() || self.methods.contains(method);
        method_ok && self.matcher.is_match(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Literal(&'a str),
    MatchOne,
    MatchAny,
}

/// Split a path into literal runs and wildcard operators.
/// A legacy trailing `*` is treated as a tail wildcard.
fn tokenize(path: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < path.len() {
        let rest = &path[i..];
        let (token, width) = if rest.starts_with(MATCH_ANY) {
            (Some(Token::MatchAny), MATCH_ANY.len())
        } else if rest.starts_with(MATCH_ONE) {
            (Some(Token::MatchOne), MATCH_ONE.len())
        } else if rest.starts_with('*') {
            (Some(Token::MatchAny), 1)
        } else {
            (None, rest.chars().next().map_or(1, char::len_utf8))
        };

        if let Some(token) = token {
            if literal_start < i {
                tokens.push(Token::Literal(&path[literal_start..i]));
            }
            tokens.push(token);
            literal_start = i + width;
        }
        i += width;
    }
    if literal_start < path.len() {
        tokens.push(Token::Literal(&path[literal_start..]));
    }
    tokens
}

/// Compile a validated path into an anchored RE2 expression.
///
/// `{*}` becomes `[^/]+`, `{**}` and a legacy trailing `*` become `.*`.
#[must_use]
pub fn compile_to_regex(path: &str) -> String {
    let mut out = String::from("^");
    for token in tokenize(path) {
        match token {
            Token::Literal(literal) => out.push_str(&regex::escape(literal)),
            Token::MatchOne => out.push_str("[^/]+"),
            Token::MatchAny => out.push_str(".*"),
        }
    }
    out.push('$');
    out
}

/// Compile a validated path into an anchored Lua pattern.
#[must_use]
pub fn compile_to_lua_pattern(path: &str) -> String {
    let mut out = String::from("^");
    for token in tokenize(path) {
        match token {
            Token::Literal(literal) => {
                for c in literal.chars() {
                    if "^$()%.[]*+-?".contains(c) {
                        out.push('%');
                    }
                    out.push(c);
                }
            }
            Token::MatchOne => out.push_str("[^/]+"),
            Token::MatchAny => out.push_str(".*"),
        }
    }
    out.push('$');
    out
}

/// Rewrite a validated path into the syntax accepted by authorization policies.
///
/// A trailing `{**}` glued to a literal (`/api{**}`) becomes the legacy prefix
/// form `/api*`. Standalone `{**}` segments and paths with other operators are
/// returned unchanged.
#[must_use]
pub fn rewrite_for_downstream(path: &str) -> String {
    let Some(prefix) = path.strip_suffix(MATCH_ANY) else {
        return path.to_string();
    };
    if prefix.ends_with('/') || prefix.contains(MATCH_ONE) || prefix.contains(MATCH_ANY) {
        return path.to_string();
    }
    format!("{prefix}*")
}
