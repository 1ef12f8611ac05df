//! Environment-variable references in configuration strings.
//!
//! A string resolves from the environment only when the whole value is a
//! single reference: `$NAME` or `${NAME}`, where `NAME` is made of
//! uppercase letters, digits and underscores. Anything else, including
//! strings that merely contain a `$`, stays literal. This keeps API keys
//! with embedded dollar signs intact.

use std::borrow::Cow;

/// Error raised when a referenced environment variable is not set.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// The named variable was referenced but is absent from the environment.
    #[error("environment variable `{name}` is referenced in the configuration but not set")]
    Undefined {
        /// The variable name as written in the reference.
        name: String,
    },
}

/// Resolve a configuration string against the environment.
///
/// Returns the value of `NAME` for an exact `$NAME` / `${NAME}` match,
/// the input unchanged otherwise, and an error when the match names an
/// unset variable.
pub fn resolve_env(input: &str) -> Result<Cow<'_, str>, EnvError> {
    let Some(name) = reference_name(input) else {
        return Ok(Cow::Borrowed(input));
    };

    match std::env::var(name) {
        Ok(value) => Ok(Cow::Owned(value)),
        Err(_) => Err(EnvError::Undefined { name: name.to_string() }),
    }
}

/// Extract the variable name if the whole string is one reference.
fn reference_name(input: &str) -> Option<&str> {
    let rest = input.strip_prefix('$')?;

    let name = match rest.strip_prefix('{') {
        Some(braced) => braced.strip_suffix('}')?,
        None => rest,
    };

    if name.is_empty() {
        return None;
    }

    name.bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
        .then_some(name)
}
