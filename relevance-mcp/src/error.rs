//! Engine-error to envelope-error mapping.

use relevance_core::Error;

use crate::protocol::ToolError;

/// Map an engine error onto the envelope's typed error payload.
#[must_use]
pub fn to_tool_error(error: &Error) -> ToolError {
    let (kind, retry_after_secs) = match error {
        Error::Validation(_) => ("validation", None),
        Error::Auth => ("auth", None),
        Error::Capacity { retry_after_secs } => ("capacity", Some(*retry_after_secs)),
        Error::Storage(_) | Error::VectorIndex(_) | Error::Backend(_) => ("dependency", None),
        Error::Unhealthy(_) => ("unhealthy", None),
        Error::Integrity(_) => ("integrity", None),
        Error::Semantic(_) => ("semantic", None),
        Error::NotFound(_) => ("not_found", None),
        Error::Timeout(_) | Error::CircuitBreakerOpen => ("timeout", None),
        Error::Serialization(_) | Error::Io(_) => ("dependency", None),
    };
    ToolError {
        kind: kind.to_string(),
        message: error.to_string(),
        retry_after_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_do_not_leak_detail() {
        let payload = to_tool_error(&Error::Auth);
        assert_eq!(payload.kind, "auth");
        assert_eq!(payload.message, "Auth error");
    }

    #[test]
    fn capacity_carries_retry_hint() {
        let payload = to_tool_error(&Error::Capacity { retry_after_secs: 30 });
        assert_eq!(payload.kind, "capacity");
        assert_eq!(payload.retry_after_secs, Some(30));
    }
}
