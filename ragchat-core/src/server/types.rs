use crate::rag::KnowledgeBaseInfo;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(rename = "knowledgeBase", default)]
    pub knowledge_base: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Streaming response chunk sent to the client as one SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub chunk_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self {
            chunk_type: "chunk".to_string(),
            content: Some(content.into()),
            error: None,
        }
    }

    /// Final event carrying the full response.
    pub fn done(content: impl Into<String>) -> Self {
        Self {
            chunk_type: "done".to_string(),
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            chunk_type: "error".to_string(),
            content: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub value: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub ollama: bool,
    pub storage: String,
    pub available_knowledge_bases: usize,
    pub knowledge_bases: Vec<KnowledgeBaseInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBasesResponse {
    #[serde(rename = "knowledgeBases")]
    pub knowledge_bases: Vec<KnowledgeBaseInfo>,
}

/// Result for one uploaded file.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub message: String,
    pub files: Vec<UploadOutcome>,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStatus {
    pub name: String,
    pub chunk_count: usize,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_field_names() {
        let req: ChatRequest = serde_json::from_value(json!({
            "message": "hi",
            "knowledgeBase": "docs",
            "temperature": 0.3
        }))
        .unwrap();

        assert_eq!(req.knowledge_base, "docs");
        assert_eq!(req.temperature, Some(0.3));
        assert!(req.model.is_none());
        assert!(!req.stream);
    }

    #[test]
    fn test_chat_request_missing_fields_default() {
        let req: ChatRequest = serde_json::from_value(json!({"knowledgeBase": "docs"})).unwrap();
        assert!(req.message.is_empty());
        assert_eq!(req.knowledge_base, "docs");
    }

    #[test]
    fn test_stream_chunk_shapes() {
        assert_eq!(
            serde_json::to_value(StreamChunk::chunk("Hel")).unwrap(),
            json!({"type": "chunk", "content": "Hel"})
        );
        assert_eq!(
            serde_json::to_value(StreamChunk::done("Hello")).unwrap(),
            json!({"type": "done", "content": "Hello"})
        );
        assert_eq!(
            serde_json::to_value(StreamChunk::error("boom")).unwrap(),
            json!({"type": "error", "error": "boom"})
        );
    }
}
