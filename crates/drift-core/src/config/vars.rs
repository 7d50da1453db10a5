//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` and `${VAR}` substitute the value and fail when it is unset
//! - `${VAR:-fallback}` uses `fallback` when VAR is unset or empty
//! - `${VAR-fallback}` uses `fallback` only when VAR is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:(?P<op>:?-)(?P<fallback>[^}]*))?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable pattern is valid")
});

/// Outcome of interpolating a document.
#[derive(Debug)]
pub struct InterpolationResult {
    /// Text with every resolvable reference substituted.
    pub text: String,
    /// One message per reference that could not be resolved.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// True when every reference resolved.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute environment variable references in `input`.
///
/// Unresolved references are left in place and reported in `errors`.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();
    let text = VARIABLE
        .replace_all(input, |caps: &Captures| resolve(caps, &mut errors))
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures, errors: &mut Vec<String>) -> String {
    let whole = &caps[0];
    if caps.name("escape").is_some() {
        return "$".to_string();
    }

    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return whole.to_string();
    };
    let name = name.as_str();
    let empty_uses_fallback = caps.name("op").is_some_and(|op| op.as_str() == ":-");
    let fallback = caps.name("fallback").map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            whole.to_string()
        }
        Ok(value) if value.is_empty() && empty_uses_fallback => {
            fallback.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match fallback {
            Some(fallback) => fallback.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                whole.to_string()
            }
        },
    }
}
