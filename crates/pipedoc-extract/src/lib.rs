//! # pipedoc-extract
//!
//! Regex-based text-layer extractors. These run before (and independently
//! of) any vision-model analysis and double as the cross-check source the
//! BOM pipeline merges against.
//!
//! - [`bom_text`] - pipe pieces, weld markers, dimension values, revision
//!   notes and cover-page detection for isometric BOM PDFs
//! - [`valves`] - valve tags with context-window classification for P&IDs
//! - [`line_spec`] - composite line-specification tag parsing

pub mod bom_text;
pub mod line_spec;
pub mod valves;

pub use bom_text::{extract_pipe_bom, extract_pipe_bom_from_texts, TextPageExtract};
pub use line_spec::{extract_line_specs_from_text, parse_line_spec, system_fluid};
pub use valves::extract_valves;
