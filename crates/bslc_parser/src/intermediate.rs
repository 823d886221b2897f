//! The mutable intermediate form: source + parse + pending edits.
//!
//! Lifecycle: constructed from input → one parse → any number of
//! (record mutations → apply → reparse) rounds → final string extraction.
//! Passes typically loop `while form.apply_mutations(reporter) { ... }`
//! when their rewrites can nest.

use bslc_base::{Reporter, Span};
use bslc_lex::LexMode;

use crate::data::{scope_kind, ParseData};
use crate::mutation::Edits;
use crate::scope::Scope;

/// How much analysis each parse round performs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParseMode {
    /// Keywords, merged whitespace, full scope tree. The transpiler mode.
    Full,
    /// Merged whitespace, no keywords, token-level only (single global
    /// scope). Used for macro expansion and lightweight rewrites.
    Expression,
    /// Raw whitespace kept, no keywords, token-level only. Used by the C
    /// preprocessor, which needs the physical line structure.
    Preprocessor,
}

/// Owns the source text, its parsed form, and the pending mutation list.
pub struct IntermediateForm {
    data: ParseData,
    edits: Edits,
    mode: ParseMode,
}

impl IntermediateForm {
    /// Copies `input` and parses it. The engine requires the source to end
    /// with a newline and appends one transparently if absent.
    pub fn new(input: &str, mode: ParseMode, reporter: &Reporter) -> Self {
        let mut src = input.to_string();
        if !src.is_empty() && !src.ends_with('\n') {
            src.push('\n');
        }
        let mut form = Self {
            data: ParseData {
                src,
                ..ParseData::default()
            },
            edits: Edits::default(),
            mode,
        };
        form.parse(reporter);
        form
    }

    fn parse(&mut self, reporter: &Reporter) {
        let lex_mode = match self.mode {
            ParseMode::Full => LexMode::Full,
            ParseMode::Expression => LexMode::Expression,
            ParseMode::Preprocessor => LexMode::Preprocessor,
        };
        self.data.lex(lex_mode);
        match self.mode {
            ParseMode::Full => self.data.parse_scopes(reporter),
            _ => self.build_flat_scope(),
        }
    }

    /// Token-level modes still expose a single global scope so the
    /// iteration helpers work unchanged.
    fn build_flat_scope(&mut self) {
        let count = self.data.token_count();
        self.data.scope_kinds.clear();
        self.data.scope_kinds.push(scope_kind::GLOBAL);
        self.data.scope_ranges.clear();
        self.data.scope_ranges.push(Span::new(0, count + 1));
        self.data.token_scope.clear();
        self.data.token_scope.resize(count + 1, 0);
    }

    pub fn data(&self) -> &ParseData {
        &self.data
    }

    /// Current source text. Pending mutations are not applied.
    pub fn str(&self) -> &str {
        &self.data.src
    }

    /// The root (global) scope; invalid after a structural parse error.
    pub fn root(&self) -> Scope<'_> {
        if self.data.scope_kinds.is_empty() {
            return Scope::invalid(&self.data);
        }
        Scope::global(&self.data)
    }

    pub fn edits(&mut self) -> &mut Edits {
        &mut self.edits
    }

    /// Reclassifies a scope in place. Used by passes that need to refine
    /// the builder's classification (loop and switch bodies).
    pub fn set_scope_kind(&mut self, scope_index: i64, kind: u8) {
        if scope_index >= 0 && (scope_index as usize) < self.data.scope_kinds.len() {
            self.data.scope_kinds[scope_index as usize] = kind;
        }
    }

    /// Simultaneous read view and edit queue, for passes that record
    /// mutations while walking the tree.
    pub fn parts(&mut self) -> (Scope<'_>, &mut Edits) {
        let Self { data, edits, .. } = self;
        (
            if data.scope_kinds.is_empty() {
                Scope::invalid(data)
            } else {
                Scope::global(data)
            },
            edits,
        )
    }

    /// Applies pending mutations without reparsing. Returns whether any
    /// mutation was committed.
    pub fn only_apply_mutations(&mut self) -> bool {
        match self.edits.apply_to(&self.data.src) {
            Some(new_src) => {
                self.data.src = new_src;
                true
            }
            None => false,
        }
    }

    /// Applies pending mutations and reparses the result. Returns whether
    /// any mutation was committed.
    pub fn apply_mutations(&mut self, reporter: &Reporter) -> bool {
        let applied = self.only_apply_mutations();
        if applied {
            self.parse(reporter);
        }
        applied
    }

    /// Applies any pending mutations and returns the resulting string.
    pub fn into_result(mut self) -> String {
        self.only_apply_mutations();
        self.data.src
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bslc_base::Reporter;

    #[test]
    fn apply_and_reparse_round_trip() {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new("int a = 1;\n", ParseMode::Full, &reporter);
        {
            let (root, edits) = form.parts();
            root.foreach_match("A=1;", |m| {
                edits.replace_token_keep_whitespace(m[2], "2");
            });
        }
        assert!(form.apply_mutations(&reporter));
        assert_eq!(form.str(), "int a = 2;\n");
        // Reparse happened: the new literal is found.
        let mut found = false;
        form.root().foreach_match("A=1;", |m| {
            found = m[2].str_view() == "2";
        });
        assert!(found);
    }

    #[test]
    fn apply_without_mutations_returns_false() {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new("int a;\n", ParseMode::Full, &reporter);
        assert!(!form.apply_mutations(&reporter));
        assert_eq!(form.str(), "int a;\n");
    }

    #[test]
    fn missing_trailing_newline_is_appended() {
        let reporter = Reporter::sink();
        let form = IntermediateForm::new("int a;", ParseMode::Full, &reporter);
        assert_eq!(form.str(), "int a;\n");
    }

    #[test]
    fn empty_input_stays_empty() {
        let reporter = Reporter::sink();
        let form = IntermediateForm::new("", ParseMode::Full, &reporter);
        assert_eq!(form.str(), "");
        assert_eq!(reporter.error_count(), 0);
    }

    #[test]
    fn expression_mode_has_flat_scope() {
        let reporter = Reporter::sink();
        let form = IntermediateForm::new("a + b { unbalanced\n", ParseMode::Expression, &reporter);
        // No scope errors in token-level mode.
        assert_eq!(reporter.error_count(), 0);
        assert!(form.root().is_valid());
        let mut words = 0;
        form.root().foreach_token(bslc_lex::TokenType::WORD.0, |_| words += 1);
        assert_eq!(words, 3);
    }

    #[test]
    fn insert_directive_restores_line_numbers() {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new("void fn()\n{\n  int a;\n}\n", ParseMode::Full, &reporter);
        {
            let (root, edits) = form.parts();
            let mut done = false;
            root.foreach_match("{", |m| {
                if !done {
                    edits.insert_directive(m[0], "#if GUARD");
                    done = true;
                }
            });
        }
        assert!(form.apply_mutations(&reporter));
        let out = form.str();
        assert!(out.contains("#if GUARD\n"), "directive inserted: {out:?}");
        assert!(out.contains("#line "), "line directive present: {out:?}");
    }
}
