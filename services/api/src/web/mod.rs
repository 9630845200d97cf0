pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod telegram;
pub mod user;

pub use middleware::require_auth;
pub use rest::ApiDoc;

use axum::http::StatusCode;
use chatlink_core::ports::PortError;

/// Maps a port error to the response status and the short, safe message the
/// client sees. Internal detail (upstream bodies, stack context) stays in
/// the logs.
pub fn port_error_response(e: &PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found".to_string()),
        PortError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        PortError::TokenNotFound => (
            StatusCode::NOT_FOUND,
            "Invalid or expired token".to_string(),
        ),
        PortError::Upstream { status, .. } => (
            StatusCode::BAD_GATEWAY,
            format!("The AI service returned an error ({status})"),
        ),
        PortError::Configuration(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "The service is not configured".to_string(),
        ),
        PortError::Transport(_) => (
            StatusCode::BAD_GATEWAY,
            "Message delivery failed".to_string(),
        ),
        PortError::Unexpected(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "An internal error occurred".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_detail_is_not_leaked_to_clients() {
        let (status, message) = port_error_response(&PortError::Upstream {
            status: 500,
            body: "secret internal trace".to_string(),
        });
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!message.contains("secret"));
    }

    #[test]
    fn ownership_failures_look_like_absence() {
        let (status, message) =
            port_error_response(&PortError::NotFound("Conversation x".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        // The message must not echo which entity was probed.
        assert_eq!(message, "Not found");
    }
}
