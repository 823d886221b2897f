//! # bslc-base
//!
//! Pure structural atoms for the bslc toolchain.
//!
//! This crate provides the foundational types used throughout bslc:
//!
//! - [`Atom`]/[`AtomTable`] — 16-bit identifier interning for O(1) equality
//! - [`Span`] — byte ranges into source text
//! - [`Reporter`]/[`Diagnostic`] — error reporting through a caller-supplied
//!   callback
//!
//! # Design Principles
//!
//! This crate has **no knowledge of shading-language syntax or I/O**. It
//! provides only generic, reusable infrastructure that higher-level crates
//! build upon. Nothing here owns global mutable state: every table and
//! counter lives on a value the caller constructs.

pub mod atom;
pub mod report;
pub mod span;

pub use atom::{Atom, AtomTable};
pub use report::{Diagnostic, ReportFn, Reporter};
pub use span::Span;
