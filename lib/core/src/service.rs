//! External services a user can authorize.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A third-party service reachable through OAuth.
///
/// Credentials are keyed by (user, service); every trigger and action kind
/// names the service it talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Google (Gmail).
    Google,
    /// Microsoft (Outlook through Microsoft Graph).
    Microsoft,
}

impl ServiceKind {
    /// Returns the persisted name of the service.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown service name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseServiceError {
    /// The rejected value.
    pub value: String,
}

impl fmt::Display for ParseServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown service '{}'", self.value)
    }
}

impl std::error::Error for ParseServiceError {}

impl FromStr for ServiceKind {
    type Err = ParseServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            other => Err(ParseServiceError {
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_persisted_names() {
        assert_eq!("google".parse::<ServiceKind>(), Ok(ServiceKind::Google));
        assert_eq!(
            ServiceKind::Microsoft.as_str().parse::<ServiceKind>(),
            Ok(ServiceKind::Microsoft)
        );
    }

    #[test]
    fn rejects_unknown_service() {
        let err = "yahoo".parse::<ServiceKind>().unwrap_err();
        assert!(err.to_string().contains("yahoo"));
    }
}
