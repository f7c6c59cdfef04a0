use actix_web::http::StatusCode;
use actix_web::HttpResponse;

/// Error type covering every failure mode of the proxy.
///
/// Configuration and DNS seeding errors are fatal and surface from the
/// constructors; everything else is produced while serving a request and is
/// converted into an HTTP response through [`actix_web::ResponseError`].
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The configuration is invalid. `field` names the offending option.
    #[error("{field} is invalid: {message}")]
    Config {
        /// Configuration option that failed validation
        field: String,
        /// What was wrong with it
        message: String,
    },

    /// An upstream DNS resolution failed after all attempts.
    #[error("unable to lookup host `{host}': {message}")]
    DnsLookup {
        /// The name that could not be resolved
        host: String,
        /// Transport error or unexpected response code
        message: String,
    },

    /// The upstream HTTP request could not be completed.
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        ProxyError::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl actix_web::error::ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    // The error message is the plain-text response body.
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
