use crate::chat::ChatError;
use crate::provider::ProviderError;
use crate::rag::RagError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors returned by HTTP handlers.
///
/// Rendered as `{"error": message, "kind": kind}` with a status derived from
/// the kind.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    EmptyInput(&'static str),

    #[error("{0}")]
    BadRequest(String),

    /// Every file of an upload failed; carries the first failure.
    #[error("No files could be ingested: {message}")]
    Ingest { message: String, kind: &'static str },

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Rag(#[from] RagError),

    #[error(transparent)]
    Upstream(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::EmptyInput(_) => "EmptyInput",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Ingest { kind, .. } => *kind,
            ApiError::Chat(e) => e.kind(),
            ApiError::Rag(e) => e.kind(),
            ApiError::Upstream(e) => e.kind(),
            ApiError::Io(_) => "Io",
        }
    }

    pub fn status(&self) -> StatusCode {
        status_for_kind(self.kind())
    }
}

pub(crate) fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "EmptyInput" | "UnsupportedFormat" | "InvalidEncoding" | "InvalidName" | "BadRequest" => {
            StatusCode::BAD_REQUEST
        }
        "NotFound" | "FileNotFound" | "NoKnowledgeBases" => StatusCode::NOT_FOUND,
        "DuplicateName" | "NoActiveKnowledgeBase" => StatusCode::CONFLICT,
        "UpstreamError" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::EmptyInput("empty").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(RagError::NotFound("kb".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RagError::DuplicateName("kb".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ChatError::from(RagError::NoActiveKnowledgeBase)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(RagError::from(ExtractError::UnsupportedFormat("md".into()))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RagError::from(ExtractError::InvalidEncoding("a.txt".into()))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ProviderError::Api("down".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Io(std::io::Error::other("disk")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
