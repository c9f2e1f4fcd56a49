//! Environment variable substitution for configuration values
//!
//! Values may reference environment variables as `${VAR_NAME}`, or as
//! `${VAR_NAME:-fallback}` to use `fallback` when the variable is unset.

use once_cell::sync::Lazy;
use regex::Regex;
use std::env;

use crate::config::ConfigError;

/// Matches `${VAR_NAME}` and `${VAR_NAME:-fallback}`
static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("environment variable pattern is valid")
});

/// Substitute environment variable references in a string.
///
/// Returns an error listing all missing variables (those unset and without a
/// fallback) if there are any.
///
/// # Examples
///
/// ```ignore
/// use ticketing_bridge::env::substitute_env_vars;
///
/// std::env::set_var("NSP_PASSWORD", "secret_value");
/// let result = substitute_env_vars("${NSP_PASSWORD}").unwrap();
/// assert_eq!(result, "secret_value");
/// ```
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing_vars: Vec<String> = Vec::new();
    let mut result = String::with_capacity(input.len());
    let mut last = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        result.push_str(&input[last..whole.start()]);
        last = whole.end();

        match (env::var(name.as_str()), caps.get(2)) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(fallback)) => result.push_str(fallback.as_str()),
            (Err(_), None) => {
                if !missing_vars.iter().any(|v| v == name.as_str()) {
                    missing_vars.push(name.as_str().to_string());
                }
            }
        }
    }
    result.push_str(&input[last..]);

    if !missing_vars.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}
