//! Status taxonomy reported by the sync cycles.
//!
//! - `ConnectionError`: a whole request failed; classified from the HTTP status.
//! - `SyncStatus::Point`: one point carries an error code in its own value.
//!
//! Parse errors never surface here; they are logged where they happen and the
//! affected point falls back to defaults.

use core::fmt;
use http::StatusCode;
use std::fmt::{Display, Formatter};

/// Classified failure of a bulk request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// 407, the gateway rejected the login itself.
    AuthenticationIssue,
    /// 401
    Unauthorized,
    /// 403
    Forbidden,
    /// Anything else, including transport failures that never produced a status.
    Unreachable,
}

impl ConnectionError {
    /// `None` when the status is 200; every other status is a failure.
    pub fn from_status(status: u16) -> Option<Self> {
        match StatusCode::from_u16(status) {
            Ok(StatusCode::OK) => None,
            Ok(StatusCode::PROXY_AUTHENTICATION_REQUIRED) => Some(ConnectionError::AuthenticationIssue),
            Ok(StatusCode::UNAUTHORIZED) => Some(ConnectionError::Unauthorized),
            Ok(StatusCode::FORBIDDEN) => Some(ConnectionError::Forbidden),
            _ => Some(ConnectionError::Unreachable),
        }
    }

    /// Stable status code string, as reported to observers.
    pub fn code(self) -> &'static str {
        match self {
            ConnectionError::AuthenticationIssue => "Authentication issue",
            ConnectionError::Unauthorized => "Unauthorized",
            ConnectionError::Forbidden => "ForbiddenCall",
            ConnectionError::Unreachable => "HttpHostConnectException",
        }
    }

    fn message(self) -> &'static str {
        match self {
            ConnectionError::AuthenticationIssue => "authentication with the server failed",
            ConnectionError::Unauthorized => "user name or password rejected",
            ConnectionError::Forbidden => "request forbidden by the server",
            ConnectionError::Unreachable => "unable to reach the server",
        }
    }
}

impl Display for ConnectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ConnectionError {}

/// Aggregate status of one load, read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Ok,
    Connection(ConnectionError),
    /// Raw point-level error code, e.g. `QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE`.
    Point(String),
}

impl SyncStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SyncStatus::Ok)
    }

    /// Text suitable for showing to a person.
    pub fn describe(&self) -> String {
        match self {
            SyncStatus::Ok => "OK".to_string(),
            SyncStatus::Connection(e) => e.to_string(),
            SyncStatus::Point(code) => translate_error(code).to_string(),
        }
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Ok => write!(f, "OK"),
            SyncStatus::Connection(e) => write!(f, "{}", e.code()),
            SyncStatus::Point(code) => write!(f, "{}", code),
        }
    }
}

/// Translate a point-level error code into readable text. Unknown codes pass through.
pub fn translate_error(code: &str) -> &str {
    match code {
        "QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE" => "Device Offline",
        "QERR_CLASS_COMMUNICATION::QERR_CODE_ABORT_TSM_TIMEOUT" => "Device Offline",
        "QERR_CLASS_OBJECT::QERR_CODE_UNKNOWN_OBJECT" => "Unknown Object",
        "QERR_Node Not Found" => "Unknown Object",
        "QERR_CLASS_SECURITY::QERR_CODE_ACCESS_DENIED" => "Invalid permissions, cannot read or write object",
        "QERR_CLASS_SECURITY::QERR_CODE_WRITE_ACCESS_DENIED" => "Invalid permissions, cannot write to object",
        "QERR_CLASS_SECURITY::QERR_CODE_READ_ACCESS_DENIED" => "Invalid permissions, cannot read from object",
        "QERR_CLASS_PROPERTY::QERR_CODE_VALUE_OUT_OF_RANGE" => "Value out of range",
        "QERR_CLASS_STATUS::QERR_CODE_IN_PROGRESS" => "Incorrect stat setup; duplicate object references used",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_families() {
        assert_eq!(ConnectionError::from_status(200), None);
        assert_eq!(ConnectionError::from_status(407), Some(ConnectionError::AuthenticationIssue));
        assert_eq!(ConnectionError::from_status(401), Some(ConnectionError::Unauthorized));
        assert_eq!(ConnectionError::from_status(403), Some(ConnectionError::Forbidden));
        assert_eq!(ConnectionError::from_status(500), Some(ConnectionError::Unreachable));
        assert_eq!(ConnectionError::from_status(204), Some(ConnectionError::Unreachable));
        assert_eq!(ConnectionError::from_status(0), Some(ConnectionError::Unreachable));
    }

    #[test]
    fn translates_known_point_errors() {
        assert_eq!(translate_error("QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE"), "Device Offline");
        assert_eq!(
            translate_error("QERR_CLASS_PROPERTY::QERR_CODE_VALUE_OUT_OF_RANGE"),
            "Value out of range"
        );
        assert_eq!(translate_error("QERR_CLASS_FOO::QERR_CODE_BAR"), "QERR_CLASS_FOO::QERR_CODE_BAR");
    }

    #[test]
    fn status_display_and_description() {
        let status = SyncStatus::Point("QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE".to_string());
        assert_eq!(status.to_string(), "QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE");
        assert_eq!(status.describe(), "Device Offline");
        assert_eq!(SyncStatus::Connection(ConnectionError::Forbidden).to_string(), "ForbiddenCall");
        assert!(SyncStatus::Ok.is_ok());
    }
}
