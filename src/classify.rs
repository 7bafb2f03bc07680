//! Classification of API failures into authentication and authorization errors

use crate::transport::{GraphQLErrorEntry, GraphQLResponse};
use crate::TransportError;

/// What kind of failure an error represents for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credential missing, invalid or expired; the session is over
    Authentication,
    /// Credential fine but lacking privilege
    Authorization,
    Other,
}

const AUTHENTICATION_CODES: &[&str] = &["UNAUTHENTICATED", "TOKEN_EXPIRED", "INVALID_TOKEN"];

const AUTHORIZATION_CODES: &[&str] = &["FORBIDDEN"];

// Matched against the lowercased message
const AUTHENTICATION_PATTERNS: &[&str] = &[
    "unauthenticated",
    "not authenticated",
    "authentication required",
    "invalid token",
    "invalid access token",
    "token expired",
    "expired token",
    "jwt expired",
    "jwt malformed",
    "session expired",
];

const AUTHORIZATION_PATTERNS: &[&str] = &[
    "forbidden",
    "not authorized",
    "access denied",
    "permission denied",
    "insufficient permission",
    "insufficient privilege",
];

impl ErrorClass {
    /// Classify a single GraphQL error
    pub fn of_entry(entry: &GraphQLErrorEntry) -> Self {
        if let Some(code) = entry.code() {
            let code = code.to_ascii_uppercase();
            if AUTHENTICATION_CODES.contains(&code.as_str()) {
                return Self::Authentication;
            }
            if AUTHORIZATION_CODES.contains(&code.as_str()) {
                return Self::Authorization;
            }
        }

        Self::of_message(&entry.message)
    }

    /// Classify by message text alone
    pub fn of_message(message: &str) -> Self {
        let message = message.to_lowercase();
        if AUTHENTICATION_PATTERNS.iter().any(|p| message.contains(p)) {
            Self::Authentication
        } else if AUTHORIZATION_PATTERNS.iter().any(|p| message.contains(p)) {
            Self::Authorization
        } else {
            Self::Other
        }
    }

    /// Most severe class among the response's errors
    pub fn of_response(response: &GraphQLResponse) -> Self {
        response
            .errors
            .iter()
            .map(Self::of_entry)
            .fold(Self::Other, Self::most_severe)
    }

    /// Classify a transport failure by its HTTP status
    pub fn of_transport(error: &TransportError) -> Self {
        match error.status() {
            Some(401) => Self::Authentication,
            Some(403) => Self::Authorization,
            _ => Self::Other,
        }
    }

    pub fn is_authentication(self) -> bool {
        self == Self::Authentication
    }

    fn most_severe(self, other: Self) -> Self {
        match (self, other) {
            (Self::Authentication, _) | (_, Self::Authentication) => Self::Authentication,
            (Self::Authorization, _) | (_, Self::Authorization) => Self::Authorization,
            _ => Self::Other,
        }
    }
}
