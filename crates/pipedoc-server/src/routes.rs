//! HTTP handlers: upload, sessions, results, downloads, symbols, chat.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use pipedoc_core::{FileKind, SymbolEntry};
use pipedoc_vlm::TextChat;

use crate::{chat, worker, AppState};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_mb as usize * 1024 * 1024;
    Router::new()
        .route("/upload", post(upload))
        .route("/sessions", get(list_sessions))
        .route("/results/{session_id}", get(results))
        .route("/download/{session_id}", get(download_all))
        .route("/download/{session_id}/{filename}", get(download_file))
        .route("/symbols/{session_id}", get(symbols))
        .route("/chat", post(chat_endpoint))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    session_id: String,
    file_name: String,
    file_type: String,
    status: String,
    message: String,
}

/// `POST /upload`: store the file, create the session, start the worker.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut saved: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        saved = Some((file_name, bytes.to_vec()));
        break;
    }
    let Some((file_name, bytes)) = saved else {
        return Err((StatusCode::BAD_REQUEST, "no file in request".to_string()));
    };

    let Some(kind) = FileKind::detect(&file_name) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("unsupported file type: {file_name}"),
        ));
    };

    let session_id = Uuid::new_v4().to_string();
    let session_dir = state.config.session_upload_dir(&session_id);
    std::fs::create_dir_all(&session_dir).map_err(internal)?;
    let file_path = session_dir.join(&file_name);
    std::fs::write(&file_path, &bytes).map_err(internal)?;

    state
        .store
        .create_session(&session_id, kind, &file_name)
        .map_err(internal)?;

    info!(session_id, file_name, kind = %kind, "upload accepted");
    tokio::spawn(worker::process_file(
        state.clone(),
        session_id.clone(),
        file_path,
        kind,
    ));

    Ok(Json(UploadResponse {
        session_id,
        file_name,
        file_type: kind.to_string(),
        status: "processing".to_string(),
        message: format!("upload accepted; processing started ({kind})"),
    }))
}

/// `GET /sessions`: recent sessions, newest first.
async fn list_sessions(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.store.list_sessions().map_err(internal)?;
    let rows: Vec<Value> = sessions
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "created_at": s.created_at.to_rfc3339(),
                "file_type": s.kind.to_string(),
                "file_name": s.file_name,
                "status": s.status_label(),
            })
        })
        .collect();
    Ok(Json(rows))
}

/// `GET /results/{session_id}`: status, file manifest and data previews.
async fn results(
    State(state): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(session) = state.store.get_session(&session_id).map_err(internal)? else {
        return Err((StatusCode::NOT_FOUND, "session not found".to_string()));
    };

    let session_dir = state.config.session_output_dir(&session_id);
    let mut files = Vec::new();
    let mut images = Vec::new();
    let mut excel_files = Vec::new();
    let mut json_files = Vec::new();

    if session_dir.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&session_dir)
            .map_err(internal)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        for path in entries {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let size = path.metadata().map(|m| m.len()).unwrap_or(0);
            let entry = json!({"name": name, "size": size});
            match path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .as_deref()
            {
                Some("png" | "jpg" | "jpeg" | "svg") => images.push(entry.clone()),
                Some("xlsx" | "xls") => excel_files.push(entry.clone()),
                Some("json") => json_files.push(entry.clone()),
                _ => {}
            }
            files.push(entry);
        }
    }

    let mut preview = serde_json::Map::new();
    if let Some(valves) = read_json(&session_dir.join("valve_data.json")) {
        preview.insert("valves".to_string(), valve_preview(&valves));
    }
    if let Some(bom) = read_json(&session_dir.join("pipe_bom_data.json")) {
        preview.insert("pipe_bom".to_string(), bom_preview(&bom));
    }
    if let Some(stats) = read_json(&session_dir.join("vlm_extraction_stats.json")) {
        preview.insert("vlm_stats".to_string(), stats);
    }
    if let Some(symbols) = read_json(&session_dir.join("symbols_legend.json")) {
        preview.insert("symbols".to_string(), symbol_preview(&symbols));
    }
    if let Some(dimensions) = read_json(&session_dir.join("dimensions.json")) {
        preview.insert("dimensions".to_string(), dimensions);
    }

    Ok(Json(json!({
        "session_id": session_id,
        "status": session.status_label(),
        "file_type": session.kind.to_string(),
        "file_name": session.file_name,
        "files": files,
        "images": images,
        "excel_files": excel_files,
        "json_files": json_files,
        "preview": preview,
    })))
}

fn read_json(path: &std::path::Path) -> Option<Value> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Valve counts by type and size plus a small sample.
fn valve_preview(valves: &Value) -> Value {
    let Some(valves) = valves.as_array() else {
        return json!({});
    };
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_size: BTreeMap<String, u64> = BTreeMap::new();
    for v in valves {
        let vtype = v
            .get("valve_type")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        *by_type.entry(vtype).or_default() += 1;
        let size = v
            .get("size")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("?")
            .to_string();
        *by_size.entry(size).or_default() += 1;
    }
    json!({
        "total": valves.len(),
        "by_type": by_type,
        "by_size": by_size,
        "sample": valves.iter().take(5).collect::<Vec<_>>(),
    })
}

/// Symbol counts by category.
fn symbol_preview(symbols: &Value) -> Value {
    let Some(symbols) = symbols.as_array() else {
        return json!({});
    };
    let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
    for s in symbols {
        let category = s
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("OTHER")
            .to_string();
        *by_category.entry(category).or_default() += 1;
    }
    json!({"total": symbols.len(), "by_category": by_category})
}

/// Per-document BOM aggregates.
fn bom_preview(pages: &Value) -> Value {
    let Some(pages) = pages.as_array() else {
        return json!({});
    };
    let count = |key: &str| -> u64 {
        pages
            .iter()
            .map(|p| p.get(key).and_then(Value::as_array).map_or(0, Vec::len) as u64)
            .sum()
    };
    let total_welds: u64 = pages
        .iter()
        .map(|p| p.get("weld_count").and_then(Value::as_u64).unwrap_or(0))
        .sum();
    let content_pages = pages
        .iter()
        .filter(|p| {
            p.get("pipe_pieces")
                .and_then(Value::as_array)
                .is_some_and(|a| !a.is_empty())
        })
        .count();
    let loose_count = pages
        .iter()
        .filter(|p| p.get("has_loose").and_then(Value::as_bool).unwrap_or(false))
        .count();
    json!({
        "total_pages": pages.len(),
        "content_pages": content_pages,
        "total_pieces": count("pipe_pieces"),
        "total_welds": total_welds,
        "loose_count": loose_count,
    })
}

/// `GET /download/{session_id}`: all artifacts as one zip.
async fn download_all(
    State(state): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(session) = state.store.get_session(&session_id).map_err(internal)? else {
        return Err((StatusCode::NOT_FOUND, "session not found".to_string()));
    };
    let session_dir = state.config.session_output_dir(&session_id);
    if !session_dir.is_dir() {
        return Err((StatusCode::NOT_FOUND, "no results for session".to_string()));
    }

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let mut entries: Vec<PathBuf> = walk_files(&session_dir);
        entries.sort();
        for path in entries {
            let rel = path
                .strip_prefix(&session_dir)
                .map_err(internal)?
                .to_string_lossy()
                .replace('\\', "/");
            writer.start_file(rel, options).map_err(internal)?;
            let bytes = std::fs::read(&path).map_err(internal)?;
            writer.write_all(&bytes).map_err(internal)?;
        }
        writer.finish().map_err(internal)?;
    }

    let zip_name = format!("pipedoc_{}.zip", session.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={zip_name}"),
            ),
        ],
        buffer.into_inner(),
    ))
}

fn walk_files(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}

/// `GET /download/{session_id}/{filename}`: a single artifact.
async fn download_file(
    State(state): State<AppState>,
    AxumPath((session_id, filename)): AxumPath<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .store
        .get_session(&session_id)
        .map_err(internal)?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, "session not found".to_string()));
    }
    // Plain filenames only; nested symbol images use symbols/<name>.
    if filename.contains("..") {
        return Err((StatusCode::BAD_REQUEST, "invalid filename".to_string()));
    }
    let mut path = state.config.session_output_dir(&session_id).join(&filename);
    if !path.is_file() {
        path = state
            .config
            .session_output_dir(&session_id)
            .join("symbols")
            .join(&filename);
    }
    if !path.is_file() {
        return Err((StatusCode::NOT_FOUND, format!("file not found: {filename}")));
    }
    let bytes = std::fs::read(&path).map_err(internal)?;
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        bytes,
    ))
}

#[derive(Debug, Deserialize)]
struct SymbolsQuery {
    category: Option<String>,
    search: Option<String>,
}

/// `GET /symbols/{session_id}?category=&search=`: the session's symbol
/// library with filters.
async fn symbols(
    State(state): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<SymbolsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .store
        .get_session(&session_id)
        .map_err(internal)?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, "session not found".to_string()));
    }

    let json_path = state
        .config
        .session_output_dir(&session_id)
        .join("symbols_legend.json");
    let all_symbols: Vec<SymbolEntry> = read_json(&json_path)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let mut categories: BTreeMap<String, u64> = BTreeMap::new();
    for s in &all_symbols {
        *categories.entry(s.category.to_string()).or_default() += 1;
    }

    let filtered: Vec<&SymbolEntry> = all_symbols
        .iter()
        .filter(|s| {
            query
                .category
                .as_deref()
                .is_none_or(|c| s.category.to_string().eq_ignore_ascii_case(c))
        })
        .filter(|s| {
            query.search.as_deref().is_none_or(|q| {
                let q = q.to_lowercase();
                s.description.to_lowercase().contains(&q)
                    || s.symbol_name.to_lowercase().contains(&q)
            })
        })
        .collect();

    Ok(Json(json!({
        "session_id": session_id,
        "total": filtered.len(),
        "total_all": all_symbols.len(),
        "categories": categories,
        "symbols": filtered,
    })))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
}

/// `POST /chat`: NL→SQL over the read-only schema.
async fn chat_endpoint(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let llm = TextChat::from_env();
    let outcome = chat::chat(&state.store, &llm, &request.session_id, &request.message).await;
    Ok(Json(outcome))
}
