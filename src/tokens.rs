//! `${NAME}` placeholder extraction and per-session substitution.
//!
//! Recorded URLs and outgoing frames carry uppercase placeholders that are
//! resolved against a per-session dictionary (worker id, session token,
//! upload job, ...). Substitution fails loudly on names outside the allowed
//! set or absent from the dictionary, so a bad recording dies at the first
//! event that references it instead of sending garbage to the server.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::TokenError;

/// Collect every `${NAME}` placeholder in `input` where `NAME` is one or
/// more characters of `[A-Z_]`.
pub fn extract_tokens(input: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        if let Some(end) = after.find('}') {
            let name = &after[..end];
            if is_token_name(name) {
                names.insert(name.to_owned());
                rest = &after[end + 1..];
                continue;
            }
        }
        rest = after;
    }

    names
}

/// Replace every placeholder in `input` with its dictionary value.
///
/// # Errors
///
/// Returns a [`TokenError`] naming the offending placeholders when any is
/// outside `allowed` or has no entry in `dictionary`.
pub fn substitute(
    input: &str,
    allowed: &BTreeSet<String>,
    dictionary: &BTreeMap<String, String>,
) -> Result<String, TokenError> {
    let tokens = extract_tokens(input);

    let disallowed: Vec<&str> = tokens
        .iter()
        .filter(|name| !allowed.contains(*name))
        .map(String::as_str)
        .collect();
    if !disallowed.is_empty() {
        return Err(TokenError::Disallowed {
            input: input.to_owned(),
            names: disallowed.join(", "),
        });
    }

    let missing: Vec<&str> = tokens
        .iter()
        .filter(|name| !dictionary.contains_key(*name))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(TokenError::Missing {
            input: input.to_owned(),
            names: missing.join(", "),
        });
    }

    let mut output = input.to_owned();
    for name in &tokens {
        if let Some(value) = dictionary.get(name) {
            output = output.replace(&format!("${{{}}}", name), value);
        }
    }
    Ok(output)
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_uppercase() || byte == b'_')
}
