//! Per-session background processing.
//!
//! The worker owns every status mutation after upload. Order within a
//! session is strict: render → extract → vision analysis → reconcile →
//! report. Per-page failures stay on their pages; anything uncaught at
//! this level coerces into `error` status with a truncated detail string,
//! and a raised cancel flag lands the session in `cancelled`.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use pipedoc_bom::{analyze_pid_pages, compare_all_pages, compute_extraction_stats, run_bom_pipeline};
use pipedoc_core::{
    symbol_reference_text, CancelFlag, Error, FileKind, Result, SessionStatus,
};
use pipedoc_extract::{extract_pipe_bom, extract_valves, TextPageExtract};
use pipedoc_legend::extract_symbols_from_legend;
use pipedoc_pdf::PageRenderer;
use pipedoc_report::{generate_pipe_bom_report, generate_valve_report, generate_vlm_bom_report};
use pipedoc_vlm::{PacedVlm, VlmClient};

use crate::AppState;

/// Seam for the external DXF pipeline. The geometric renderer is a
/// separate system; this crate only carries its data contract (the
/// `dimensions` table and `dimensions.json`).
pub trait DxfPipeline: Send + Sync {
    /// Process a DXF upload, returning the `{views: {…}}` dimensions
    /// payload.
    ///
    /// # Errors
    ///
    /// Implementations fail when the renderer is unavailable or the file
    /// cannot be processed.
    fn process(&self, dxf_path: &Path, out_dir: &Path) -> Result<serde_json::Value>;
}

/// Bundled default: no renderer attached.
pub struct NoDxfPipeline;

impl DxfPipeline for NoDxfPipeline {
    fn process(&self, _dxf_path: &Path, _out_dir: &Path) -> Result<serde_json::Value> {
        Err(Error::PageRenderFailure(
            "no DXF renderer is attached to this deployment".to_string(),
        ))
    }
}

/// Run the full processing for one uploaded session. Always terminates the
/// session in `completed`, `error` or `cancelled`.
pub async fn process_file(state: AppState, session_id: String, file_path: PathBuf, kind: FileKind) {
    let cancel = state.register_cancel(&session_id);
    let outcome = run_session(&state, &session_id, &file_path, kind, &cancel).await;
    state.unregister_cancel(&session_id);

    let result = match outcome {
        Ok(()) => {
            info!(session_id, "session processing completed");
            state
                .store
                .update_session_status(&session_id, SessionStatus::Completed, None)
        }
        Err(Error::Cancelled) => {
            warn!(session_id, "session cancelled");
            state
                .store
                .update_session_status(&session_id, SessionStatus::Cancelled, None)
        }
        Err(e) => {
            error!(session_id, error = %e, "session processing failed");
            state
                .store
                .update_session_status(&session_id, SessionStatus::Error, Some(&e.to_string()))
        }
    };
    if let Err(e) = result {
        error!(session_id, error = %e, "failed to record final session status");
    }
}

async fn run_session(
    state: &AppState,
    session_id: &str,
    file_path: &Path,
    kind: FileKind,
    cancel: &CancelFlag,
) -> Result<()> {
    let out_dir = state.config.session_output_dir(session_id);
    std::fs::create_dir_all(&out_dir)?;

    match kind {
        FileKind::Dxf => process_dxf(state, session_id, file_path, &out_dir).await,
        FileKind::Pid => process_pid(state, session_id, file_path, &out_dir, cancel).await,
        FileKind::PipeBom => process_pipe_bom(state, session_id, file_path, &out_dir, cancel).await,
        FileKind::Pdf => process_unclassified(state, session_id, file_path, &out_dir, cancel).await,
    }
}

async fn process_dxf(
    state: &AppState,
    session_id: &str,
    file_path: &Path,
    out_dir: &Path,
) -> Result<()> {
    let pipeline = NoDxfPipeline;
    let dimensions = pipeline.process(file_path, out_dir)?;
    std::fs::write(
        out_dir.join("dimensions.json"),
        serde_json::to_string_pretty(&dimensions)?,
    )?;
    state.store.save_dimensions(session_id, &dimensions)?;
    Ok(())
}

async fn process_pid(
    state: &AppState,
    session_id: &str,
    file_path: &Path,
    out_dir: &Path,
    cancel: &CancelFlag,
) -> Result<()> {
    // Regex valve extraction plus page previews, no model needed.
    let regex_valves = {
        let renderer = PageRenderer::new()?;
        let valves = extract_valves(&renderer, file_path)?;
        render_pid_previews(&renderer, file_path, out_dir)?;
        valves
    };
    cancel.check()?;

    let Ok(client) = VlmClient::from_env() else {
        // Degraded text-only path: persist what the regex extractor found.
        warn!(session_id, "no vision model configured; storing regex valves only");
        state.store.save_valves(session_id, &regex_valves)?;
        write_json(out_dir.join("valve_data.json"), &regex_valves)?;
        generate_valve_report(&regex_valves, &out_dir.join("valve_list.xlsx"))?;
        return Ok(());
    };
    let vlm = PacedVlm::new(client);

    state
        .store
        .update_session_status(session_id, SessionStatus::VlmAnalyzing, None)?;

    // Legend harvest, then sheet analysis with the reference block.
    let symbols = extract_symbols_from_legend(&vlm, file_path, out_dir).await?;
    state.store.save_symbols(session_id, &symbols)?;
    cancel.check()?;

    let reference = symbol_reference_text(&symbols);
    let analysis = analyze_pid_pages(&vlm, file_path, out_dir, &reference, None, cancel).await?;
    write_json(out_dir.join("pid_analysis.json"), &analysis)?;

    let valves = pipedoc_bom::merge_regex_and_vlm(&regex_valves, &analysis);
    state.store.save_valves(session_id, &valves)?;
    write_json(out_dir.join("valve_data.json"), &valves)?;

    cancel.check()?;
    generate_valve_report(&valves, &out_dir.join("valve_list.xlsx"))?;
    Ok(())
}

async fn process_pipe_bom(
    state: &AppState,
    session_id: &str,
    file_path: &Path,
    out_dir: &Path,
    cancel: &CancelFlag,
) -> Result<()> {
    // Text extraction and previews first; these always succeed or fail the
    // session before any model spend.
    let text_pages = {
        let renderer = PageRenderer::new()?;
        let pages = extract_pipe_bom(&renderer, file_path)?;
        renderer.render_bom_pages(file_path, out_dir, None)?;
        pages
    };
    state.store.save_pipe_bom(session_id, &text_pages)?;
    write_json(out_dir.join("pipe_bom_data.json"), &text_pages)?;
    generate_pipe_bom_report(&text_pages, &out_dir.join("pipe_bom.xlsx"))?;
    cancel.check()?;

    let Ok(client) = VlmClient::from_env() else {
        warn!(session_id, "no vision model configured; text extraction only");
        return Ok(());
    };
    let vlm = PacedVlm::new(client);

    state
        .store
        .update_session_status(session_id, SessionStatus::VlmAnalyzing, None)?;

    // The legend reference comes from the store, not a process global.
    let symbols = state.store.latest_pid_symbols()?;
    let reference = if symbols.is_empty() {
        None
    } else {
        info!(
            session_id,
            symbols = symbols.len(),
            "using legend reference from the latest P&ID session"
        );
        Some(symbol_reference_text(&symbols))
    };

    let records = run_bom_pipeline(
        &vlm,
        file_path,
        out_dir,
        reference.as_deref(),
        Some(&text_pages),
        cancel,
    )
    .await?;

    let comparisons = compare_all_pages(&records);
    write_json(out_dir.join("bom_comparison.json"), &comparisons)?;

    cancel.check()?;
    state.store.save_vlm_bom(session_id, &records)?;
    let stats = compute_extraction_stats(&records);
    generate_vlm_bom_report(&records, &comparisons, &stats, &out_dir.join("vlm_bom.xlsx"))?;
    Ok(())
}

/// Unclassified PDFs try both extractors and keep whatever yields data.
async fn process_unclassified(
    state: &AppState,
    session_id: &str,
    file_path: &Path,
    out_dir: &Path,
    cancel: &CancelFlag,
) -> Result<()> {
    let (valves, pages): (_, Vec<TextPageExtract>) = {
        let renderer = PageRenderer::new()?;
        (
            extract_valves(&renderer, file_path)?,
            extract_pipe_bom(&renderer, file_path)?,
        )
    };
    cancel.check()?;

    if !valves.is_empty() {
        state.store.save_valves(session_id, &valves)?;
        write_json(out_dir.join("valve_data.json"), &valves)?;
        generate_valve_report(&valves, &out_dir.join("valve_list.xlsx"))?;
        let renderer = PageRenderer::new()?;
        render_pid_previews(&renderer, file_path, out_dir)?;
    }

    if pages.iter().any(|p| !p.pipe_pieces.is_empty()) {
        state.store.save_pipe_bom(session_id, &pages)?;
        write_json(out_dir.join("pipe_bom_data.json"), &pages)?;
        generate_pipe_bom_report(&pages, &out_dir.join("pipe_bom.xlsx"))?;
    }

    Ok(())
}

/// Preview renders of the first sheets, `pid_page{n}.png`.
fn render_pid_previews(renderer: &PageRenderer, pdf_path: &Path, out_dir: &Path) -> Result<()> {
    let pages = renderer.page_count(pdf_path)?.min(10);
    for page_no in 1..=pages as u32 {
        renderer.render_page_to_file(
            pdf_path,
            page_no,
            200,
            &out_dir.join(format!("pid_page{page_no}.png")),
        )?;
    }
    Ok(())
}

fn write_json<T: serde::Serialize>(path: PathBuf, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
