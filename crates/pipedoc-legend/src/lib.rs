//! # pipedoc-legend
//!
//! Harvests every symbol from a P&ID legend page into categorized entries
//! with per-symbol raster crops.
//!
//! The pipeline runs four phases:
//!
//! 1. **Render** - a 300 DPI master for cropping plus a reduced copy for
//!    the vision model
//! 2. **Analyze** - one vision call over the reduced copy returning
//!    `{category, symbol_name, description, bbox_pct}` rows
//! 3. **Validate** - garbage filtering, category normalization, dedup by
//!    case-folded description
//! 4. **Crop** - re-locate each description in the text layer, derive row
//!    and column bounds from neighbours, grid rules and headers, then cut
//!    and clean a raster per symbol
//!
//! When the vision phase fails the harvester degrades to a text-layout
//! extractor that segments the page by its printed section headers.

pub mod crop;
pub mod fallback;
pub mod harvester;
pub mod locate;
pub mod validate;

pub use harvester::{extract_symbols_from_legend, prepare_legend_page, LegendPageContext};
pub use validate::{validate_and_clean, RawSymbol};
