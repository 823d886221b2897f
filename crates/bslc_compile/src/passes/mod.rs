//! The lowering and lint passes.
//!
//! Each pass is a free function over the shared intermediate form. Passes
//! record mutations while walking the scope tree, then apply them in one
//! round; passes whose rewrites can nest loop until a round commits
//! nothing.

pub mod attribute;
pub mod cleanup;
pub mod directives;
pub mod entry_points;
pub mod enums;
pub mod flow_control;
pub mod functions;
pub mod lint;
pub mod namespaces;
pub mod references;
pub mod resource_table;
pub mod shared;
pub mod strings;
pub mod structs;
pub mod templates;
pub mod unions;

use bslc_base::Reporter;
use bslc_parser::Token;

/// Reports a diagnostic anchored at a token.
pub(crate) fn report_tok(reporter: &Reporter, tok: Token<'_>, message: &str) {
    reporter.report(tok.line_number(), tok.char_number(), &tok.line_str(), message);
}
