//! # pipedoc-bom
//!
//! The vision-assisted BOM extraction pipeline and its downstream
//! consumers:
//!
//! - [`pipeline`] - two-pass per-page orchestration (full drawing view,
//!   then the cropped BOM table), merged against the regex text extraction
//! - [`postprocess`] - table-pass normalization: letter-code recovery,
//!   cut-length reclassification, numeric coercion
//! - [`merge`] - text/vision cross-checking per page
//! - [`compare`] - the BOM↔drawing reconciliation engine
//! - [`pid`] - P&ID sheet analysis with the legend reference block
//! - [`stats`] - aggregate extraction statistics
//!
//! Model output is treated as loosely typed throughout: values arrive as
//! strings or numbers interchangeably, keys go missing, arrays wrap in
//! dicts. The [`normalize`] helpers fold that into the typed records in one
//! step per schema.

pub mod compare;
pub mod merge;
pub mod normalize;
pub mod pid;
pub mod pipeline;
pub mod postprocess;
pub mod stats;

pub use compare::{compare_all_pages, compare_single_page};
pub use merge::merge_text_and_vlm;
pub use pid::{analyze_pid_pages, merge_regex_and_vlm, PidAnalysis};
pub use pipeline::run_bom_pipeline;
pub use stats::{compute_extraction_stats, ExtractionStats};
