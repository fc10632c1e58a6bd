use crate::clients::{HttpStatusCode, StatusCode};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// The `Result` type returned by `clients`.
pub type Result<T> = std::result::Result<T, Error>;

/// How the tester should react to a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The resource does not exist.
    NotFound,
    /// The call may succeed if it is repeated.
    Transient,
    Other,
}

serde_plain::derive_display_from_serialize!(ErrorKind);

/// The public error type returned by `clients`.
#[derive(Debug, Snafu)]
pub struct Error(InnerError);

/// The private error type returned by `clients`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub(crate) enum InnerError {
    #[snafu(display("Error initializing the Kubernetes client: {}", source))]
    Initialization { source: kube::Error },

    #[snafu(display("Unable to read kubeconfig: {}", source))]
    ConfigRead {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to create client config from kubeconfig: {}", source))]
    ClientCreateKubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to discover the API for '{}': {}", what, source))]
    Discovery { what: String, source: kube::Error },

    #[snafu(display("Error serializing object '{}': {}", what, source))]
    Serde {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to {} {}: {}", method, what, source))]
    KubeApiCall {
        method: String,
        what: String,
        source: kube::Error,
    },

    /// Raised by clients that do not talk to a real API server.
    #[snafu(display("Unable to {} {} ({}): {}", method, what, kind, message))]
    Reported {
        method: String,
        what: String,
        kind: ErrorKind,
        message: String,
    },
}

impl Error {
    /// Classifies the error. Unknown resources are `NotFound`; throttling, conflicts, server-side
    /// failures and transport errors are `Transient`. A kind the API server does not serve is
    /// `Other`, not `NotFound`.
    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            InnerError::Reported { kind, .. } => *kind,
            InnerError::KubeApiCall { source, .. } => classify(source),
            InnerError::Discovery { source, .. } => match classify(source) {
                ErrorKind::Transient => ErrorKind::Transient,
                ErrorKind::NotFound | ErrorKind::Other => ErrorKind::Other,
            },
            InnerError::Initialization { .. }
            | InnerError::ConfigRead { .. }
            | InnerError::ClientCreateKubeconfig { .. }
            | InnerError::Serde { .. } => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// An error for a resource that does not exist.
    pub fn not_found<S1, S2>(method: S1, what: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::reported(method, what, ErrorKind::NotFound, "not found")
    }

    /// An error that is worth retrying.
    pub fn transient<S1, S2, S3>(method: S1, what: S2, message: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::reported(method, what, ErrorKind::Transient, message)
    }

    pub fn other<S1, S2, S3>(method: S1, what: S2, message: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::reported(method, what, ErrorKind::Other, message)
    }

    fn reported<S1, S2, S3>(method: S1, what: S2, kind: ErrorKind, message: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Error(InnerError::Reported {
            method: method.into(),
            what: what.into(),
            kind,
            message: message.into(),
        })
    }
}

fn classify(error: &kube::Error) -> ErrorKind {
    match error.status_code() {
        Some(StatusCode::NOT_FOUND) => ErrorKind::NotFound,
        Some(
            StatusCode::REQUEST_TIMEOUT
            | StatusCode::CONFLICT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT,
        ) => ErrorKind::Transient,
        Some(_) => ErrorKind::Other,
        None => match error {
            kube::Error::HyperError(_) | kube::Error::Service(_) => ErrorKind::Transient,
            _ => ErrorKind::Other,
        },
    }
}

impl HttpStatusCode for InnerError {
    fn status_code(&self) -> Option<StatusCode> {
        match self {
            InnerError::KubeApiCall { source, .. } | InnerError::Discovery { source, .. } => {
                source.status_code()
            }
            InnerError::Reported {
                kind: ErrorKind::NotFound,
                ..
            } => Some(StatusCode::NOT_FOUND),
            InnerError::Initialization { .. }
            | InnerError::ConfigRead { .. }
            | InnerError::ClientCreateKubeconfig { .. }
            | InnerError::Serde { .. }
            | InnerError::Reported { .. } => None,
        }
    }
}

impl HttpStatusCode for Error {
    fn status_code(&self) -> Option<StatusCode> {
        self.0.status_code()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: "Test".into(),
            code,
        })
    }

    #[test]
    fn classification() {
        assert_eq!(classify(&api_error(404)), ErrorKind::NotFound);
        for code in [409, 429, 500, 503] {
            assert_eq!(classify(&api_error(code)), ErrorKind::Transient, "{}", code);
        }
        assert_eq!(classify(&api_error(403)), ErrorKind::Other);
        assert_eq!(classify(&api_error(422)), ErrorKind::Other);
    }

    #[test]
    fn discovery_errors() {
        let discovery = |code| {
            Error(InnerError::Discovery {
                what: "example.org/v1 Bucket".to_string(),
                source: api_error(code),
            })
        };
        assert!(discovery(503).is_transient());
        assert!(discovery(429).is_transient());
        assert_eq!(discovery(404).kind(), ErrorKind::Other);
        assert_eq!(discovery(403).kind(), ErrorKind::Other);
    }

    #[test]
    fn reported_errors() {
        let gone = Error::not_found("get", "Bucket/b");
        assert!(gone.is_not_found());
        assert!(gone.is_status_code(StatusCode::NOT_FOUND));
        assert!(Error::transient("delete", "Bucket/b", "throttled").is_transient());
        let other = Error::other("apply", "Bucket/b", "forbidden");
        assert_eq!(other.kind(), ErrorKind::Other);
        assert_eq!(
            other.to_string(),
            "Unable to apply Bucket/b (other): forbidden"
        );
    }
}
