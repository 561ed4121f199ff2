//! HTTP API under `/api`.

use super::error::ApiError;
use super::state::{AppState, SharedSession};
use super::types::*;
use super::uploads;
use crate::rag::{validate_name, BatchReport};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::{debug, info, warn};

pub type ChunkSender = mpsc::UnboundedSender<StreamChunk>;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        .route("/models", get(models))
        .route("/status", get(status))
        .route(
            "/knowledge-bases",
            get(list_knowledge_bases)
                .post(create_knowledge_base)
                .layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route(
            "/knowledge-bases/:name/files",
            post(add_files).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/knowledge-bases/:name", delete(delete_knowledge_base))
        .route("/knowledge-bases/:name/info", get(knowledge_base_info))
        .route("/chat", post(chat))
}

/// `llama3:latest` is shown as `llama3`.
fn display_name(model: &str) -> String {
    model.strip_suffix(":latest").unwrap_or(model).to_string()
}

async fn models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state
        .provider()
        .list_models()
        .await?
        .into_iter()
        .map(|m| ModelEntry {
            name: display_name(&m.name),
            value: m.name,
        })
        .collect();

    Ok(Json(ModelsResponse { models }))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let ollama = state.provider().list_models().await.is_ok();
    let knowledge_bases = state.manager().list_knowledge_bases().await?;

    Ok(Json(StatusResponse {
        status: "ready",
        ollama,
        storage: state.config().storage.storage_mode.to_string(),
        available_knowledge_bases: knowledge_bases.len(),
        knowledge_bases,
    }))
}

async fn list_knowledge_bases(
    State(state): State<AppState>,
) -> Result<Json<KnowledgeBasesResponse>, ApiError> {
    let knowledge_bases = state.manager().list_knowledge_bases().await?;
    Ok(Json(KnowledgeBasesResponse { knowledge_bases }))
}

/// Fields of an upload form.
#[derive(Default)]
struct UploadForm {
    name: Option<String>,
    description: Option<String>,
    /// `(client file name, contents)`
    files: Vec<(String, Vec<u8>)>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" | "description" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid field '{field_name}': {e}")))?;
                if field_name == "name" {
                    form.name = Some(value.trim().to_string());
                } else {
                    form.description = Some(value);
                }
            }
            "files" | "files[]" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read '{filename}': {e}")))?;
                form.files.push((filename, data.to_vec()));
            }
            other => debug!(field = other, "Ignoring form field"),
        }
    }

    Ok(form)
}

/// Outcome of storing and ingesting one upload batch.
struct UploadResult {
    files: Vec<UploadOutcome>,
    chunk_count: usize,
}

impl UploadResult {
    fn any_succeeded(&self) -> bool {
        self.files.iter().any(|f| f.error.is_none())
    }

    fn first_failure(&self) -> ApiError {
        let failed = self.files.iter().find(|f| f.error.is_some());
        ApiError::Ingest {
            message: failed
                .and_then(|f| f.error.clone())
                .unwrap_or_else(|| "no files".to_string()),
            kind: failed.and_then(|f| f.kind).unwrap_or("EmptyInput"),
        }
    }
}

fn rejected(file: impl Into<String>, error: String) -> UploadOutcome {
    UploadOutcome {
        file: file.into(),
        chunk_count: None,
        error: Some(error),
        kind: Some("UnsupportedFormat"),
    }
}

/// Stores the allowed files under the knowledge base's upload directory and
/// ingests them in order. Files that fail are deleted again.
async fn store_and_ingest(
    state: &AppState,
    name: &str,
    files: Vec<(String, Vec<u8>)>,
) -> Result<UploadResult, ApiError> {
    let upload_dir = &state.config().storage.upload_dir;
    let mut outcomes = Vec::with_capacity(files.len());
    let mut saved: Vec<(usize, PathBuf)> = Vec::new();

    for (original, data) in files {
        if !uploads::allowed_file(&original) {
            outcomes.push(rejected(original.clone(), format!("File type not allowed: {original}")));
            continue;
        }
        let filename = uploads::secure_filename(&original);
        if !uploads::allowed_file(&filename) {
            outcomes.push(rejected(original.clone(), format!("Invalid file name: {original}")));
            continue;
        }

        let path = uploads::save(upload_dir, name, &filename, &data).await?;
        saved.push((outcomes.len(), path));
        outcomes.push(UploadOutcome {
            file: filename,
            chunk_count: None,
            error: None,
            kind: None,
        });
    }

    let paths: Vec<PathBuf> = saved.iter().map(|(_, p)| p.clone()).collect();
    let report = if paths.is_empty() {
        BatchReport::default()
    } else {
        state.manager().ingest_batch(name, &paths).await?
    };

    for ((index, path), file) in saved.iter().zip(report.files) {
        let outcome = &mut outcomes[*index];
        outcome.chunk_count = file.chunks_added;
        outcome.error = file.error;
        outcome.kind = file.kind;

        if outcome.error.is_some() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(file = %path.display(), error = %e, "Failed to remove rejected upload");
            }
        }
    }

    Ok(UploadResult {
        files: outcomes,
        chunk_count: report.chunk_count,
    })
}

async fn create_knowledge_base(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let form = read_form(multipart).await?;

    let name = form
        .name
        .filter(|n| !n.is_empty())
        .ok_or(ApiError::EmptyInput("Knowledge base name is required"))?;
    validate_name(&name)?;
    if form.files.is_empty() {
        return Err(ApiError::EmptyInput("At least one file is required"));
    }

    let _guard = state.lock_knowledge_base(&name).await;
    if state.manager().exists(&name).await? {
        return Err(crate::rag::RagError::DuplicateName(name).into());
    }

    let result = store_and_ingest(&state, &name, form.files).await?;
    if !result.any_succeeded() {
        uploads::remove_all(&state.config().storage.upload_dir, &name).await?;
        return Err(result.first_failure());
    }

    info!(knowledge_base = %name, chunks = result.chunk_count, "Created knowledge base");
    Ok(Json(IngestResponse {
        message: format!("Knowledge base '{name}' created successfully"),
        files: result.files,
        chunk_count: result.chunk_count,
        description: form.description,
    }))
}

async fn add_files(
    State(state): State<AppState>,
    Path(name): Path<String>,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let form = read_form(multipart).await?;
    if form.files.is_empty() {
        return Err(ApiError::EmptyInput("At least one file is required"));
    }
    validate_name(&name)?;

    let _guard = state.lock_knowledge_base(&name).await;
    if !state.manager().exists(&name).await? {
        return Err(crate::rag::RagError::NotFound(name).into());
    }

    let result = store_and_ingest(&state, &name, form.files).await?;
    if !result.any_succeeded() {
        return Err(result.first_failure());
    }

    let added = result.files.iter().filter(|f| f.error.is_none()).count();
    info!(knowledge_base = %name, files = added, chunks = result.chunk_count, "Added files");
    Ok(Json(IngestResponse {
        message: format!("Added {added} file(s) to knowledge base '{name}'"),
        files: result.files,
        chunk_count: result.chunk_count,
        description: None,
    }))
}

async fn delete_knowledge_base(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_name(&name)?;
    let _guard = state.lock_knowledge_base(&name).await;
    state.manager().delete_knowledge_base(&name).await?;

    let evicted = state.sessions().evict_knowledge_base(&name);
    uploads::remove_all(&state.config().storage.upload_dir, &name).await?;
    info!(knowledge_base = %name, evicted, "Deleted knowledge base");

    Ok(Json(MessageResponse {
        message: format!("Knowledge base '{name}' deleted successfully"),
    }))
}

async fn knowledge_base_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<KnowledgeBaseStatus>, ApiError> {
    let info = state.manager().knowledge_base_info(&name).await?;

    Ok(Json(KnowledgeBaseStatus {
        status: if info.chunk_count > 0 { "available" } else { "empty" },
        name: info.name,
        chunk_count: info.chunk_count,
    }))
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.message.trim().is_empty() {
        return Err(ApiError::EmptyInput("Message is required"));
    }
    if req.knowledge_base.trim().is_empty() {
        return Err(ApiError::EmptyInput("Knowledge base is required"));
    }

    let config = state.config();
    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| config.llm.model.clone());
    // Cached sessions are shared, so every request sets its own temperature.
    let temperature = req.temperature.unwrap_or(config.llm.temperature);
    let top_k = config.rag.top_k;

    debug!(model = %model, knowledge_base = %req.knowledge_base, stream = req.stream, "Chat request");
    let session = state.session(&model, &req.knowledge_base).await?;

    if !req.stream {
        let mut session = session.lock().await;
        session.set_temperature(temperature);
        let response = session.query(&req.message, top_k).await?;
        return Ok(Json(ChatResponse { response }).into_response());
    }

    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(stream_query(session, req.message, temperature, top_k, sender));

    let events = UnboundedReceiverStream::new(receiver).map(|chunk| Event::default().json_data(chunk));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

/// Runs a streaming query and forwards it as chunk events, then one `done`
/// or `error` event. Stops the generation when the client goes away.
async fn stream_query(
    session: SharedSession,
    message: String,
    temperature: f64,
    top_k: usize,
    sender: ChunkSender,
) {
    let mut session = session.lock().await;
    session.set_temperature(temperature);

    let fragments = sender.clone();
    let query = session.query_stream(&message, top_k, move |fragment| {
        let _ = fragments.send(StreamChunk::chunk(fragment));
    });

    tokio::select! {
        result = query => match result {
            Ok(response) => {
                let _ = sender.send(StreamChunk::done(response));
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Streaming query failed");
                let _ = sender.send(StreamChunk::error(e.to_string()));
            }
        },
        _ = sender.closed() => {
            debug!("Client disconnected, query cancelled");
        }
    }
}
