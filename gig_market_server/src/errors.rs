use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use gig_market_engine::MarketplaceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("Could not read query parameters: {0}")]
    InvalidQuery(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<MarketplaceError> for ServerError {
    fn from(e: MarketplaceError) -> Self {
        Self::BackendError(e.to_string())
    }
}
