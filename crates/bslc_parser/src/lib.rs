//! # bslc-parser
//!
//! Very simple parsing for shader files that are a subset of C++. It allows
//! traversing the semantics using tokens and scopes instead of matching
//! string patterns over the whole input.
//!
//! The goal of this representation is to output code that doesn't modify the
//! style of the input string and keeps the same line numbers, so compilation
//! errors map back to the input source.
//!
//! [`IntermediateForm`] owns a copy of the input string and applies string
//! substitutions ([`mutation::Mutation`]) to it. It is usually faster to
//! record all of them while scanning the semantic representation, then apply
//! them at once. In the rare case where mutations need to overlap (recursive
//! processing), passes run until there is no mutation left to apply.
//!
//! [`Token`] and [`Scope`] are read-only views into the parsed data, stored
//! as structure-of-arrays for fast traversal. Token and scope types are
//! readable bytes, so sequences of them form searchable byte strings.
//!
//! The parsing phase does not expand the preprocessor: directives parse as
//! `Preprocessor` scopes and are otherwise left alone.

pub mod data;
pub mod intermediate;
pub mod line;
pub mod mutation;
pub mod scope;
pub mod token;

pub use data::{scope_kind, ParseData};
pub use intermediate::{IntermediateForm, ParseMode};
pub use mutation::Edits;
pub use scope::{DeclarationMatch, FunctionMatch, Scope, StructMatch};
pub use token::Token;
