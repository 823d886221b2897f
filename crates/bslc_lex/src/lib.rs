//! # bslc-lex
//!
//! Tokenization for the BSL transpiler.
//!
//! The lexer is deliberately simple: it only supports unextended-ASCII input
//! under 4GB (offsets are 32-bit) and identifies *runs* of characters that
//! share a [`class::CharClass`]. Everything smarter — keywords, literals,
//! whitespace attachment — happens in cheap linear passes over the token
//! arrays, never over the string itself.
//!
//! ## Stages
//!
//! 1. [`buffer::tokenize`] — character-class runs, SIMD accelerated where
//!    available, scalar fallback bit-identical.
//! 2. [`buffer::merge_punctuation`] — two-character operators (`==`, `->`,
//!    `\` + newline, ...) collapse into single tokens with dedicated types.
//! 3. [`buffer::merge_complex_literals`] — string and numeric literals.
//! 4. [`buffer::merge_whitespaces`] — optional; attaches trailing whitespace
//!    to the preceding token so patterns never see space tokens.
//! 5. [`stream::TokenStream::analyze`] — drives the above per [`stream::LexMode`],
//!    then promotes keywords and interns word atoms.

pub mod buffer;
pub mod class;
pub mod stream;

pub use class::TokenType;
pub use stream::{LexMode, TokenStream};
