//! # bslc-preprocess
//!
//! A fast, deliberately incomplete C preprocessor plus the integer
//! constant-expression evaluator backing `#if`.
//!
//! Supported: `#define` (object- and function-like, `...`/`__VA_ARGS__`,
//! `##` token pasting), `#undef`, the whole conditional family, and macro
//! expansion with the usual re-entry block ("blue painting"). Unsupported
//! on purpose: `#` stringification (reported as an error) and `#include`
//! resolution (a driver concern).
//!
//! Input must already have its comments replaced by spaces; every erasure
//! substitutes an equal number of newlines so diagnostics keep pointing at
//! the original source.

pub mod expression;
pub mod preprocessor;

pub use expression::{evaluate, EvalError};
pub use preprocessor::{preprocess, Preprocessor};
