//! Constructor methods and convenience functions for MeshworkError

use std::time::Duration;

use super::types::MeshworkError;

impl MeshworkError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use meshwork_core::error::MeshworkError;
    ///
    /// let err = MeshworkError::configuration("discovery.seeds", "seed address must be host:port");
    /// assert!(err.to_string().contains("discovery.seeds"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        MeshworkError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn codec(context: impl Into<String>, message: impl Into<String>) -> Self {
        MeshworkError::Codec {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn invalid_version_vector(message: impl Into<String>) -> Self {
        MeshworkError::InvalidVersionVector {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        MeshworkError::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        MeshworkError::Transport {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn unexpected_response(operation: impl Into<String>, message: impl Into<String>) -> Self {
        MeshworkError::UnexpectedResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        MeshworkError::Internal {
            message: message.into(),
        }
    }

    pub fn join_not_allowed(reason: impl Into<String>) -> Self {
        MeshworkError::JoinNotAllowed {
            reason: reason.into(),
        }
    }

    pub fn admin_auth_failed(operation: impl Into<String>) -> Self {
        MeshworkError::AdminAuthFailed {
            operation: operation.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MeshworkError::Timeout { .. }
                | MeshworkError::Transport { .. }
                | MeshworkError::ActorNotFound { .. }
                | MeshworkError::JoinRateLimited { .. }
                | MeshworkError::NotInQuorum { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = MeshworkError::configuration("failure.timeout", "must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error in failure.timeout: must be positive"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(MeshworkError::timeout("join", Duration::from_secs(5)).is_transient());
        assert!(MeshworkError::NotInQuorum { healthy: 1, required: 2 }.is_transient());
        assert!(!MeshworkError::JoinAuthFailed { node_id: "n1".into() }.is_transient());
        assert!(!MeshworkError::ClusterDisabled.is_transient());
    }
}
