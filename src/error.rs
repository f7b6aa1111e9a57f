use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Virtualization error: {0}")]
    VirtualizationError(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Secret store error: {0}")]
    SecretError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Activity {activity} panicked: {message}")]
    ActivityPanic { activity: String, message: String },

    #[error("Activity {activity} failed: {source}")]
    ActivityFailed {
        activity: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Workflow {workflow} failed: {message}")]
    WorkflowFailed { workflow: String, message: String },

    #[error("{}", join_messages(.0))]
    Multiple(Vec<AppError>),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

fn join_messages(errors: &[AppError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    /// Folds the errors of a fan-out into one. Every error is kept so a
    /// partial failure reports each failing item, not just the first.
    pub fn combine(mut errors: Vec<AppError>) -> Option<AppError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(AppError::Multiple(errors)),
        }
    }

    /// True when the error (or the error wrapped by an activity failure)
    /// reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::NotFound { .. } => true,
            AppError::ActivityFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            AppError::ValidationError(_) => true,
            AppError::ActivityFailed { source, .. } => source.is_validation(),
            _ => false,
        }
    }

    /// Whether an activity attempt failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::DatabaseError(_)
            | AppError::VirtualizationError(_)
            | AppError::KubernetesError(_)
            | AppError::SecretError(_)
            | AppError::ExternalServiceError(_)
            | AppError::Timeout(_) => true,
            AppError::Multiple(errors) => errors.iter().all(AppError::is_retryable),
            _ => false,
        }
    }

    /// The message of the underlying failure, without activity wrappers.
    pub fn root_message(&self) -> String {
        match self {
            AppError::ActivityFailed { source, .. } => source.root_message(),
            AppError::WorkflowFailed { message, .. } => message.clone(),
            AppError::Multiple(errors) => errors
                .iter()
                .map(AppError::root_message)
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::ValidationError(format!("YAML error: {}", err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for AppError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        AppError::SerializationError(format!("BSON error: {}", err))
    }
}

impl From<kube::Error> for AppError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                AppError::not_found("Kubernetes object", response.message)
            }
            other => AppError::KubernetesError(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::VirtualizationError(_)
            | AppError::KubernetesError(_)
            | AppError::SecretError(_)
            | AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_keeps_every_error() {
        assert!(AppError::combine(Vec::new()).is_none());

        let single = AppError::combine(vec![AppError::Timeout("a".into())]).unwrap();
        assert!(matches!(single, AppError::Timeout(_)));

        let combined = AppError::combine(vec![
            AppError::VirtualizationError("clone of c-workers-01 failed".into()),
            AppError::VirtualizationError("clone of c-workers-02 failed".into()),
        ])
        .unwrap();
        let message = combined.to_string();
        assert!(message.contains("c-workers-01"));
        assert!(message.contains("c-workers-02"));
        assert!(message.contains("; "));
    }

    #[test]
    fn test_not_found_is_a_capability_not_a_string() {
        let err = AppError::not_found("cluster", "42");
        assert!(err.is_not_found());

        // A message that merely mentions "not found" is not a not-found error.
        let err = AppError::DatabaseError("index not found".into());
        assert!(!err.is_not_found());

        let wrapped = AppError::ActivityFailed {
            activity: "delete-node".into(),
            source: Box::new(AppError::not_found("virtual machine", "c-pool-01")),
        };
        assert!(wrapped.is_not_found());
    }

    #[test]
    fn test_retry_classification() {
        assert!(AppError::VirtualizationError("busy".into()).is_retryable());
        assert!(AppError::Timeout("slow".into()).is_retryable());
        assert!(!AppError::validation("bad").is_retryable());
        assert!(!AppError::not_found("node", "n").is_retryable());
        assert!(!AppError::ActivityPanic {
            activity: "create-node".into(),
            message: "boom".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_root_message_unwraps_activity_failures() {
        let err = AppError::ActivityFailed {
            activity: "create-node".into(),
            source: Box::new(AppError::VirtualizationError("no capacity".into())),
        };
        assert_eq!(err.root_message(), "Virtualization error: no capacity");
    }
}
