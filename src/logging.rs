//! ## Logging Configuration
//!
//! Logging is set up at program startup using the `ctor` crate and is controlled by the
//! `DEBUG_INSIDER_PREPROCESSING` environment variable:
//!
//! - **Disabled** (default): unset, empty, `"0"` or `"false"`.
//! - **Enabled**: any other value installs a `tracing_subscriber` formatter at `DEBUG` level.
//!
//! Warnings raised while transforming (schema drift, unseen categories, degenerate columns)
//! go through `tracing::warn!`, so an application that installs its own subscriber sees them
//! regardless of this variable.
//!
//! ```sh
//! export DEBUG_INSIDER_PREPROCESSING=true
//! ```

use ctor::ctor;
use tracing::Level;

/// Name of the environment variable that turns on debug logging.
pub const DEBUG_ENV_VAR: &str = "DEBUG_INSIDER_PREPROCESSING";

/// Returns true if the value of [`DEBUG_ENV_VAR`] asks for logging.
pub fn debug_requested(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false")),
    }
}

#[ctor]
fn set_debug_level() {
    let value = std::env::var(DEBUG_ENV_VAR).ok();
    if debug_requested(value.as_deref()) {
        // A host application may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_requested() {
        assert!(!debug_requested(None));
        assert!(!debug_requested(Some("")));
        assert!(!debug_requested(Some("0")));
        assert!(!debug_requested(Some("FALSE")));
        assert!(debug_requested(Some("1")));
        assert!(debug_requested(Some("true")));
    }
}
