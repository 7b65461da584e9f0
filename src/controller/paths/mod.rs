//! # Path Templates
//!
//! Classification and validation of request path patterns.
//!
//! Three syntaxes are accepted:
//!
//! - **plain** paths such as `/api/v1/users`
//! - **template** paths using `{*}` (one segment) and `{**}` (any trailing segments),
//!   e.g. `/api/{*}/items/{**}` or `/static{**}`
//! - **legacy-star** paths with a single trailing `*`, e.g. `/api/*`
//!
//! Literal segments must satisfy the RFC 3986 `pchar` grammar. Validation and
//! compilation (see [`compile`]) agree on what is well-formed: every path that
//! passes [`validate`] compiles to a valid RE2 expression and Lua pattern.

mod compile;

pub use compile::{compile_to_lua_pattern, compile_to_regex, rewrite_for_downstream, CompiledRule};

use thiserror::Error;

/// Single-segment template operator
pub const MATCH_ONE: &str = "{*}";
/// Multi-segment tail template operator
pub const MATCH_ANY: &str = "{**}";

/// Syntax family of a path pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Plain,
    Template,
    LegacyStar,
}

/// User-facing path validation failure. Not retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path {0}: must start with '/'")]
    InvalidPrefix(String),
    #[error("invalid or unsupported path {path}. {reason}")]
    InvalidWildcardPlacement { path: String, reason: &'static str },
    #[error("invalid or unsupported path {0}. Contains '{{' or '}}' beyond a supported path template")]
    InvalidTemplateOperator(String),
    #[error("invalid or unsupported path {path}. Contains segment {segment} with invalid string literal")]
    InvalidLiteral { path: String, segment: String },
    #[error("path {path} compiled to an unsupported expression: {message}")]
    Uncompilable { path: String, message: String },
}

const MATCH_ANY_NOT_LAST: &str = "{**} is not the last operator";
const STAR_NOT_ONCE: &str = "'*' must appear only once";
const STAR_NOT_AT_END: &str = "'*' must be at the end of the path";

/// Classify a path pattern by its wildcard syntax.
///
/// Fails when legacy `*` syntax is mixed with brackets, or when a legacy `*`
/// appears more than once or anywhere but the final position.
pub fn classify(path: &str) -> Result<PathKind, PathError> {
    let has_brackets = path.contains(['{', '}']);

    if has_star_outside_brackets(path) {
        if has_brackets {
            return Err(PathError::InvalidTemplateOperator(path.to_string()));
        }
        if path.matches('*').count() > 1 {
            return Err(PathError::InvalidWildcardPlacement {
                path: path.to_string(),
                reason: STAR_NOT_ONCE,
            });
        }
        if path != "*" && !path.ends_with('*') {
            return Err(PathError::InvalidWildcardPlacement {
                path: path.to_string(),
                reason: STAR_NOT_AT_END,
            });
        }
        return Ok(PathKind::LegacyStar);
    }

    if has_brackets {
        Ok(PathKind::Template)
    } else {
        Ok(PathKind::Plain)
    }
}

/// Validate a single path pattern, returning its kind.
pub fn validate(path: &str) -> Result<PathKind, PathError> {
    if !path.starts_with('/') {
        return Err(PathError::InvalidPrefix(path.to_string()));
    }

    let kind = classify(path)?;
    match kind {
        PathKind::Plain => validate_plain_literals(path, path)?,
        PathKind::LegacyStar => validate_plain_literals(path, path.trim_end_matches('*'))?,
        PathKind::Template => validate_template(path)?,
    }
    Ok(kind)
}

/// Validate every path, stopping at the first failure.
pub fn validate_all<'a, I>(paths: I) -> Result<(), PathError>
where
    I: IntoIterator<Item = &'a str>,
{
    for path in paths {
        validate(path)?;
    }
    Ok(())
}

/// RFC 3986 `pchar` minus `*`, which is reserved for wildcards.
pub(crate) fn is_pchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~%!$&'()+,;:@=".contains(c)
}

fn is_valid_literal(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(is_pchar)
}

fn segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn has_star_outside_brackets(path: &str) -> bool {
    let mut depth = 0usize;
    for c in path.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '*' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

fn validate_plain_literals(path: &str, literal_part: &str) -> Result<(), PathError> {
    for segment in segments(literal_part) {
        if segment.is_empty() {
            continue;
        }
        if !is_valid_literal(segment) {
            return Err(PathError::InvalidLiteral {
                path: path.to_string(),
                segment: segment.to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct TemplateState {
    seen_match_one: bool,
    seen_match_any: bool,
}

fn validate_template(path: &str) -> Result<(), PathError> {
    let segments = segments(path);
    let mut state = TemplateState::default();
    let last = segments.len().saturating_sub(1);

    for (index, segment) in segments.iter().enumerate() {
        validate_template_segment(path, segment, index == last, &mut state)?;
    }
    Ok(())
}

fn validate_template_segment(
    path: &str,
    segment: &str,
    is_last: bool,
    state: &mut TemplateState,
) -> Result<(), PathError> {
    let not_last = || PathError::InvalidWildcardPlacement {
        path: path.to_string(),
        reason: MATCH_ANY_NOT_LAST,
    };

    if segment == MATCH_ONE {
        if state.seen_match_any {
            return Err(not_last());
        }
        state.seen_match_one = true;
    } else if segment == MATCH_ANY {
        if state.seen_match_any {
            return Err(not_last());
        }
        state.seen_match_any = true;
    } else if let Some(prefix) = segment.strip_suffix(MATCH_ANY) {
        // `prefix{**}` collapses into the preceding literal and must close the path
        if prefix.contains(['{', '}']) {
            return Err(PathError::InvalidTemplateOperator(path.to_string()));
        }
        if !is_valid_literal(prefix) {
            return Err(PathError::InvalidLiteral {
                path: path.to_string(),
                segment: segment.to_string(),
            });
        }
        if !is_last || state.seen_match_any || state.seen_match_one {
            return Err(not_last());
        }
        state.seen_match_any = true;
    } else if segment.contains(['{', '}']) {
        return Err(PathError::InvalidTemplateOperator(path.to_string()));
    } else if !is_valid_literal(segment) {
        return Err(PathError::InvalidLiteral {
            path: path.to_string(),
            segment: segment.to_string(),
        });
    }
    Ok(())
}
