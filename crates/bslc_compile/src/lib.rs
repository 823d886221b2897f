//! # bslc-compile
//!
//! The BSL source-to-source lowering pipeline.
//!
//! ## Architecture
//!
//! ```text
//! BSL Source
//!      │
//!      ▼
//! ┌─────────┐     ┌──────────────┐     ┌────────────────┐
//! │  Lexer  │ ──▶ │  Scope tree  │ ──▶ │ IntermediateForm│
//! └─────────┘     └──────────────┘     └──────┬─────────┘
//!                                             │ mutate / apply / reparse
//!      ┌──────────────────────────────────────┘
//!      ▼
//! ┌──────────────────────────────────────────────┐
//! │              Lowering passes                  │
//! │  cleanup → lint → templates → namespaces →   │
//! │  unions → enums → resources → methods →      │
//! │  strings → initializers → references → flow  │
//! └──────────────────┬───────────────────────────┘
//!                    ▼
//!      Shader source + metadata record
//! ```
//!
//! Each pass records mutations against the shared [`bslc_parser::IntermediateForm`]
//! and requests an apply-and-reparse; passes whose rewrites can nest loop
//! until no mutation is left to apply.
//!
//! ## Modules
//!
//! - [`processor`]: [`processor::SourceProcessor`] — the ordered pipeline
//! - [`metadata`]: extracted resource/interface/pipeline/symbol records
//! - [`passes`]: the individual lowering and lint passes

pub mod metadata;
pub mod passes;
pub mod processor;

pub use metadata::Source;
pub use processor::{Language, ProcessResult, SourceProcessor};
