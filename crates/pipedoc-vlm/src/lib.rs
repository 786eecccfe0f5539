//! # pipedoc-vlm
//!
//! Single-call wrapper over a vision-capable chat API plus the recovery
//! parser that turns possibly-truncated model output back into JSON.
//!
//! - [`VlmClient`] - image+text chat against the Anthropic messages API
//! - [`PacedVlm`] - the same client behind a minimum inter-call gap
//! - [`TextChat`] - text-only chat with provider fallback (used by the
//!   NL-to-SQL surface)
//! - [`recovery`] - fence stripping, truncated-array repair, dict unwrap
//! - [`prompts`] - the extraction prompt templates

pub mod client;
pub mod prompts;
pub mod recovery;

pub use client::{PacedVlm, TextChat, VlmClient, VlmError};
pub use recovery::{recover_array, recover_object};
