//! Tolerant decoding of the stored department policy expression.
//!
//! A department's default-app column is free-form text with years of
//! accumulated shapes behind it: a JSON array of numeric ids
//! (`[1,2,3]`), a JSON array of code strings (`["APP_A","APP_B"]`), or a
//! comma-separated list of either (`APP_A, APP_B` or `1, 2, 3`), sometimes
//! with stray brackets or quotes. That ambiguity is an external
//! compatibility contract, not an accident to fix: existing rows must keep
//! parsing, so decoding degrades instead of failing.
//!
//! Decoding happens in two stages, decided once at the boundary:
//!
//! 1. [`decode_expression`] turns the raw text into a [`PolicySource`], an
//!    explicit ids-or-codes classification. It never fails; malformed text
//!    degrades to an empty or partial source.
//! 2. [`resolve_source`] resolves the source against the application
//!    [`Directory`] into a [`DepartmentPolicy`] carrying both
//!    representations in deterministic order. Entries the directory does
//!    not know are dropped with a `debug!` log.
//!
//! The classification is a heuristic, not a schema guarantee: an array is
//! "ids" only when every element is numeric-looking. A mixed array is
//! treated as codes, and its numeric-looking entries then fail to resolve
//! and drop out.

use serde_json::Value;
use tracing::debug;

use crate::directory::{AppEntry, AppId, Directory, DirectoryError};

/// Upper bound on tokens considered per expression. Tokens beyond the cap
/// are dropped, keeping a corrupt row from ballooning a parse.
pub const MAX_POLICY_TOKENS: usize = 1024;

/// The explicit ids-or-codes classification of a raw policy expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// Blank or absent expression.
    Empty,
    /// Every token is numeric-looking: interpreted as application ids.
    Ids(Vec<i64>),
    /// At least one token is non-numeric: interpreted as application codes.
    Codes(Vec<String>),
}

impl PolicySource {
    /// Whether the source carries no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Ids(values) => values.is_empty(),
            Self::Codes(values) => values.is_empty(),
        }
    }
}

/// The parsed department policy: the same set in both representations.
///
/// `ids` is ascending, `codes` is lexicographic. The two orderings are
/// independent; pairwise positions do not correspond.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentPolicy {
    /// Application ids, ascending.
    pub ids: Vec<AppId>,
    /// Canonical application codes, lexicographic.
    pub codes: Vec<String>,
}

impl DepartmentPolicy {
    /// Whether the policy grants nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of applications in the policy.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the policy contains the given id.
    #[must_use]
    pub fn contains(&self, id: AppId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Serializes the id set in the canonical stored form, a JSON array of
    /// numbers. Decoding this form always round-trips to the same ids.
    #[must_use]
    pub fn serialize_ids(&self) -> String {
        serialize_ids(&self.ids)
    }
}

/// Canonical stored form for a set of ids: a JSON array of numbers.
#[must_use]
pub fn serialize_ids(ids: &[AppId]) -> String {
    let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}

/// Decodes a raw policy expression into its ids-or-codes classification.
///
/// Never fails: malformed input degrades to whatever tokens survive, or
/// [`PolicySource::Empty`].
#[must_use]
pub fn decode_expression(raw: Option<&str>) -> PolicySource {
    let Some(text) = raw else {
        return PolicySource::Empty;
    };
    let text = text.trim();
    if text.is_empty() {
        return PolicySource::Empty;
    }

    let tokens = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items.iter().filter_map(value_token).collect(),
        // A bare scalar is wrapped as a single-element array.
        Ok(other) => value_token(&other).into_iter().collect(),
        // Not JSON at all: comma-separated fallback, scrubbing stray
        // bracket and quote characters from each token.
        Err(_) => text
            .split(',')
            .map(scrub_token)
            .filter(|token| !token.is_empty())
            .collect::<Vec<String>>(),
    };

    classify_tokens(tokens)
}

/// Extracts the token text of one JSON element. Nulls and nested
/// containers carry no usable token and are dropped.
fn value_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let token = s.trim();
            if token.is_empty() {
                None
            } else {
                Some(token.to_string())
            }
        },
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn scrub_token(token: &str) -> String {
    token
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '[' | ']' | '"' | '\''))
        .to_string()
}

fn classify_tokens(mut tokens: Vec<String>) -> PolicySource {
    if tokens.len() > MAX_POLICY_TOKENS {
        debug!(
            "policy expression exceeds {MAX_POLICY_TOKENS} tokens, dropping {}",
            tokens.len() - MAX_POLICY_TOKENS
        );
        tokens.truncate(MAX_POLICY_TOKENS);
    }
    if tokens.is_empty() {
        return PolicySource::Empty;
    }

    let ids: Vec<i64> = tokens
        .iter()
        .filter_map(|token| token.parse::<i64>().ok())
        .collect();
    if ids.len() == tokens.len() {
        PolicySource::Ids(ids)
    } else {
        PolicySource::Codes(tokens)
    }
}

/// Resolves a decoded source against the directory.
///
/// Entries with no directory match are dropped with a `debug!` log. The
/// result is deduplicated, ids ascending and codes lexicographic.
///
/// # Errors
///
/// Only when the directory itself is unreachable.
pub fn resolve_source(
    source: &PolicySource,
    directory: &dyn Directory,
) -> Result<DepartmentPolicy, DirectoryError> {
    let entries = match source {
        PolicySource::Empty => Vec::new(),
        PolicySource::Ids(values) => {
            let ids: Vec<AppId> = values.iter().copied().map(AppId).collect();
            let entries = directory.lookup_codes_by_ids(&ids)?;
            log_dropped_ids(&ids, &entries);
            entries
        },
        PolicySource::Codes(values) => {
            let entries = directory.lookup_ids_by_codes(values)?;
            log_dropped_codes(values, &entries);
            entries
        },
    };

    let mut ids: Vec<AppId> = entries.iter().map(|entry| entry.id).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut codes: Vec<String> = entries.into_iter().map(|entry| entry.code).collect();
    codes.sort_unstable();
    codes.dedup();

    Ok(DepartmentPolicy { ids, codes })
}

/// Decodes and resolves a raw expression in one call.
///
/// # Errors
///
/// Only when the directory is unreachable; malformed expressions degrade
/// to an empty or partial policy.
pub fn parse_expression(
    raw: Option<&str>,
    directory: &dyn Directory,
) -> Result<DepartmentPolicy, DirectoryError> {
    resolve_source(&decode_expression(raw), directory)
}

fn log_dropped_ids(requested: &[AppId], found: &[AppEntry]) {
    let dropped: Vec<AppId> = requested
        .iter()
        .filter(|id| !found.iter().any(|entry| entry.id == **id))
        .copied()
        .collect();
    if !dropped.is_empty() {
        debug!("policy references unknown application ids, dropping: {dropped:?}");
    }
}

fn log_dropped_codes(requested: &[String], found: &[AppEntry]) {
    let dropped: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|code| {
            let canonical = code.trim().to_uppercase();
            !found.iter().any(|entry| entry.code == canonical)
        })
        .collect();
    if !dropped.is_empty() {
        debug!("policy references unknown application codes, dropping: {dropped:?}");
    }
}
