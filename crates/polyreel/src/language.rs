//! Language code normalization.
//!
//! Codes are compared in their normalized form everywhere: trimmed and
//! lowercased, e.g. `" PT-BR "` becomes `"pt-br"`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

// Primary subtag plus optional region/script/variant subtags.
static RE_LANGUAGE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[a-z0-9]{2,8})*$").unwrap());

/// Trims and lowercases a code without validating it.
pub fn normalize(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Normalizes and validates a single code.
pub fn parse_code(code: &str) -> Result<String, ValidationError> {
    let normalized = normalize(code);
    if RE_LANGUAGE_CODE.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(ValidationError::InvalidLanguageCode(code.to_string()))
    }
}

/// Normalizes a project's language list.
///
/// Order is preserved (the first entry is the primary language) and later
/// duplicates are dropped. An empty list is rejected.
pub fn parse_language_set<S: AsRef<str>>(codes: &[S]) -> Result<Vec<String>, ValidationError> {
    let mut seen = HashSet::new();
    let mut languages = Vec::with_capacity(codes.len());
    for code in codes {
        let code = parse_code(code.as_ref())?;
        if seen.insert(code.clone()) {
            languages.push(code);
        }
    }
    if languages.is_empty() {
        return Err(ValidationError::EmptyLanguageSet);
    }
    Ok(languages)
}
