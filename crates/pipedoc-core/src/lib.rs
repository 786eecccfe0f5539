//! # pipedoc-core
//!
//! Core data model for the pipedoc piping-document analysis suite.
//!
//! This crate defines the types shared by every pipeline stage:
//!
//! - [`Session`] - an uploaded document and its processing lifecycle
//! - [`SymbolEntry`] - one legend symbol harvested from a P&ID first page
//! - [`PageBomRecord`] - per-page extraction result for an isometric BOM PDF
//! - [`PageComparison`] / [`ComparisonItem`] - BOM-vs-drawing reconciliation
//! - [`ValveExtract`] / [`LineSpec`] - valves and line specifications from
//!   P&ID sheets
//! - [`Error`] - the error kinds surfaced across subsystem boundaries
//!
//! Records produced by vision-model analysis are deliberately loose: list
//! fields default to empty and unknown component subtypes stay free-form
//! strings. The reconciler maps them onto its closed taxonomy at comparison
//! time and degrades rows it cannot map.

pub mod bom;
pub mod cancel;
pub mod compare;
pub mod error;
pub mod session;
pub mod symbol;
pub mod valve;

pub use bom::{
    BomItem, BomTotals, Component, CutLength, DimensionMm, DrawingInfo, PageBomRecord, PipePiece,
    WeldKind, WeldPoint,
};
pub use cancel::CancelFlag;
pub use compare::{ComparisonItem, ComparisonSummary, MatchStatus, PageComparison};
pub use error::{Error, Result};
pub use session::{FileKind, Session, SessionStatus};
pub use symbol::{symbol_reference_text, SymbolCategory, SymbolEntry};
pub use valve::{LineSpec, Provenance, ValveExtract, ValveType};
