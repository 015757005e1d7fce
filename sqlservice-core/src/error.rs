//! Structured error types for configuration resolution.

use thiserror::Error;

/// Errors raised while resolving database settings from the environment.
///
/// `HostNotSet`, `NameNotSet` and `InvalidPort` are per-provider failures:
/// the resolver logs them and moves on to the next provider in the chain.
/// `NotFound` means the whole chain was exhausted and is fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{scheme}: database host variable was not found in .env file or environment")]
    HostNotSet { scheme: &'static str },

    #[error("{scheme}: database name variable was not found in .env file or environment")]
    NameNotSet { scheme: &'static str },

    #[error("{scheme}: database port variable is not a valid port number")]
    InvalidPort { scheme: &'static str },

    #[error("valid database configuration was not found")]
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConfigError::HostNotSet { scheme: "postgres" };
        assert_eq!(
            err.to_string(),
            "postgres: database host variable was not found in .env file or environment"
        );

        let err = ConfigError::NotFound;
        assert_eq!(err.to_string(), "valid database configuration was not found");
    }
}
