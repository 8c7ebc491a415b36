use thiserror::Error;

/// Main error type for the supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Prometheus query {expression:?} failed with HTTP {status}")]
    QueryFailed { expression: String, status: u16 },

    #[error("Unexpected Prometheus response for {expression:?}: {reason}")]
    UnexpectedResponse { expression: String, reason: String },

    // Log stream errors
    #[error("Log stream for unit {unit} failed: {reason}")]
    LogStream { unit: String, reason: String },

    // Persistence errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("State store error: {0}")]
    Store(String),

    // Action errors
    #[error("Action {action} failed: {reason}")]
    ActionFailed { action: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for SupervisorError
pub type Result<T> = std::result::Result<T, SupervisorError>;

impl SupervisorError {
    pub fn unexpected_response(expression: &str, reason: impl Into<String>) -> Self {
        SupervisorError::UnexpectedResponse {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    pub fn log_stream(unit: &str, reason: impl Into<String>) -> Self {
        SupervisorError::LogStream {
            unit: unit.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_response_message_names_expression() {
        let err = SupervisorError::unexpected_response("bitcoin_ibd", "got 2 results");
        let msg = err.to_string();
        assert!(msg.contains("\"bitcoin_ibd\""), "got: {msg}");
        assert!(msg.contains("got 2 results"), "got: {msg}");
    }
}
