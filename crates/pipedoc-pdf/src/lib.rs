//! # pipedoc-pdf
//!
//! PDF page rendering and text-layer access for the pipedoc pipelines.
//!
//! [`PageRenderer`] rasterizes pages at adaptive resolutions bounded by a
//! maximum pixel extent; [`PageTextIndex`] exposes the text layer as
//! positioned spans with substring search, plus the page's long vertical
//! vector rules (used by the legend harvester to find column boundaries).
//!
//! The renderer loads the document per operation, so no pdfium handle is
//! ever held across an await point in the async pipelines.

pub mod geometry;
pub mod render;
pub mod text;

pub use geometry::Rect;
pub use render::{adaptive_dpi, bulk_render_dpi, LegendRenders, PageRenderer};
pub use text::{PageTextIndex, TextSpan};
