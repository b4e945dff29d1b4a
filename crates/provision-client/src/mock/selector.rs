//! Label selector matching
//!
//! Supports the set-based grammar the API server accepts: `k=v`, `k==v`,
//! `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k` and `!k`.

use crate::error::ClientError;
use std::collections::BTreeMap;

#[derive(Debug, PartialEq, Eq)]
pub(super) enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

/// Splits on commas outside parentheses
fn split_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(selector[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(selector[start..].trim());
    terms.into_iter().filter(|t| !t.is_empty()).collect()
}

fn parse_values(list: &str) -> Result<Vec<String>, ClientError> {
    let inner = list
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| ClientError::InvalidObject(format!("invalid selector value list: {}", list)))?;
    Ok(inner.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect())
}

pub(super) fn parse(selector: &str) -> Result<Vec<Requirement>, ClientError> {
    split_terms(selector)
        .into_iter()
        .map(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                return Ok(Requirement::NotEquals(k.trim().to_string(), v.trim().to_string()));
            }
            if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                return Ok(Requirement::Equals(k.trim().to_string(), v.trim().to_string()));
            }
            if let Some((k, values)) = term.split_once(" notin ") {
                return Ok(Requirement::NotIn(k.trim().to_string(), parse_values(values)?));
            }
            if let Some((k, values)) = term.split_once(" in ") {
                return Ok(Requirement::In(k.trim().to_string(), parse_values(values)?));
            }
            if let Some(k) = term.strip_prefix('!') {
                return Ok(Requirement::DoesNotExist(k.trim().to_string()));
            }
            Ok(Requirement::Exists(term.to_string()))
        })
        .collect()
}

pub(super) fn matches(requirements: &[Requirement], labels: &BTreeMap<String, String>) -> bool {
    requirements.iter().all(|req| match req {
        Requirement::Equals(k, v) => labels.get(k) == Some(v),
        Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
        Requirement::In(k, values) => labels.get(k).is_some_and(|l| values.contains(l)),
        Requirement::NotIn(k, values) => labels.get(k).is_none_or(|l| !values.contains(l)),
        Requirement::Exists(k) => labels.contains_key(k),
        Requirement::DoesNotExist(k) => !labels.contains_key(k),
    })
}
