//! Conditional compilation and macro expansion.
//!
//! The preprocessor keeps the physical line structure of its input: every
//! erased region is replaced by an equal number of newlines. Macro
//! definitions are not parsed eagerly — a `#define` only records the
//! directive; the replacement list is walked at each expansion site.
//!
//! Conditional handling works on directive indices. When a branch is taken
//! and an `#else`/`#elif` continuation follows, a jump target is pushed so
//! that reaching the continuation later erases everything up to the
//! matching `#endif`.

use std::cell::{Cell, RefCell};

use log::debug;
use rustc_hash::FxHashMap;

use bslc_base::{Atom, Reporter};
use bslc_lex::TokenType;
use bslc_parser::{line, IntermediateForm, ParseData, ParseMode, Token};

use crate::expression;

/// Expansion recursion limit. A malformed macro set could otherwise
/// recurse through argument pre-expansion indefinitely.
const MAX_EXPANSION_DEPTH: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DirectiveKind {
    Define,
    Undef,
    Line,
    If,
    Ifdef,
    Ifndef,
    Elif,
    Else,
    Endif,
    /// Any other directive (warnings, pragma, include, ...). Left alone.
    Other,
}

/// Fast, incomplete C preprocessor.
///
/// Input must have comments already replaced by spaces (newlines kept).
pub struct Preprocessor<'r, 'c> {
    form: IntermediateForm,
    /// Token index at which each line starts, plus a terminating entry.
    line_offsets: Vec<usize>,
    /// Line index of each preprocessor directive.
    directive_lines: Vec<usize>,
    /// Active macros: name atom to directive index.
    defines: FxHashMap<Atom, usize>,
    /// Conditional continuations that must erase to their `#endif`.
    jump_stack: Vec<usize>,
    /// Macros currently being expanded (blue-painting stack).
    visited: RefCell<Vec<usize>>,
    depth: Cell<usize>,
    reporter: &'r Reporter<'c>,

    /// Next directive to evaluate. Overwritten by conditional jumps.
    next_directive: usize,
    /// Line of the last evaluated directive end. Expansion resumes after.
    last_directive_end: usize,
}

impl<'r, 'c> Preprocessor<'r, 'c> {
    pub fn new(source: &str, reporter: &'r Reporter<'c>) -> Self {
        let form = IntermediateForm::new(source, ParseMode::Preprocessor, reporter);
        let (line_offsets, directive_lines) = build_line_structure(form.data());
        Self {
            form,
            line_offsets,
            directive_lines,
            defines: FxHashMap::default(),
            jump_stack: Vec::new(),
            visited: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            reporter,
            next_directive: 0,
            last_directive_end: 0,
        }
    }

    /// Runs every directive and expands macros in the live regions.
    pub fn run(&mut self) {
        if self.directive_lines.is_empty() {
            return;
        }

        self.last_directive_end = 0;
        self.next_directive = 0;

        // Expand until the first directive.
        let first_line = self.directive_start_line(0);
        if first_line != 0 {
            self.expand_macros_in_range(0, first_line - 1);
        }

        while !self.is_last_directive(self.next_directive) {
            let id = self.next_directive;
            // The next directive may be overwritten by conditional
            // evaluation. Increment before the call.
            self.next_directive = id + 1;
            self.evaluate_directive(id);

            let next_start = self.directive_start_line(self.next_directive);
            if next_start > 0 {
                self.expand_macros_in_range(self.last_directive_end + 1, next_start - 1);
            }
        }
        self.evaluate_directive(self.next_directive);

        if !self.is_last_line(self.last_directive_end) {
            let last_line = self.line_count() - 1;
            self.expand_macros_in_range(self.last_directive_end + 1, last_line);
        }
    }

    /// Applies the recorded rewrites and returns the preprocessed source.
    pub fn into_result(self) -> String {
        self.form.into_result()
    }

    /*
     * Line / directive bookkeeping.
     */

    fn line_count(&self) -> usize {
        self.line_offsets.len() - 1
    }

    fn is_last_line(&self, line: usize) -> bool {
        line + 1 >= self.line_count()
    }

    fn is_last_directive(&self, dir: usize) -> bool {
        dir + 1 >= self.directive_lines.len()
    }

    fn ttype(&self, tok: usize) -> u8 {
        self.form.data().token_type(tok as i64)
    }

    fn skip_space(&self, tok: usize) -> usize {
        if self.ttype(tok) == TokenType::SPACE.0 {
            tok + 1
        } else {
            tok
        }
    }

    /// Last token of the line before its newline, or the newline itself
    /// for empty lines.
    fn line_end_token(&self, line: usize) -> usize {
        let start = self.line_offsets[line];
        let next = self.line_offsets[line + 1];
        if next - start > 1 {
            next - 2
        } else {
            next - 1
        }
    }

    fn directive_start_line(&self, dir: usize) -> usize {
        self.directive_lines[dir.min(self.directive_lines.len() - 1)]
    }

    /// Last physical line of a directive, following `\` continuations.
    fn directive_end_line(&self, dir: usize) -> usize {
        let mut line = self.directive_start_line(dir);
        while line + 1 < self.line_count()
            && self.ttype(self.line_end_token(line)) == TokenType::BACKSLASH.0
        {
            line += 1;
        }
        line
    }

    /// Token holding the directive name (`define`, `if`, ...).
    fn directive_identifier(&self, dir: usize) -> Option<usize> {
        let line = self.directive_start_line(dir);
        let hash = self.skip_space(self.line_offsets[line]);
        if self.ttype(hash) != TokenType::HASH.0 {
            return None;
        }
        let identifier = self.skip_space(hash + 1);
        if self.ttype(identifier) == TokenType::WORD.0 {
            Some(identifier)
        } else {
            None
        }
    }

    fn directive_kind(&self, dir: usize) -> DirectiveKind {
        let Some(identifier) = self.directive_identifier(dir) else {
            return DirectiveKind::Other;
        };
        let data = self.form.data();
        match data.lex.spelling(&data.src, identifier) {
            "define" => DirectiveKind::Define,
            "undef" => DirectiveKind::Undef,
            "line" => DirectiveKind::Line,
            "if" => DirectiveKind::If,
            "ifdef" => DirectiveKind::Ifdef,
            "ifndef" => DirectiveKind::Ifndef,
            "elif" => DirectiveKind::Elif,
            "else" => DirectiveKind::Else,
            "endif" => DirectiveKind::Endif,
            _ => DirectiveKind::Other,
        }
    }

    fn report_at_token(&self, tok: usize, message: &str) {
        let data = self.form.data();
        let pos = data.token(tok as i64).str_index_start();
        self.reporter.report(
            line::line_number(&data.src, pos),
            line::char_number(&data.src, pos),
            &line::line_str(&data.src, pos),
            message,
        );
    }

    /*
     * Directive evaluation.
     */

    fn evaluate_directive(&mut self, dir: usize) {
        let kind = self.directive_kind(dir);
        debug!("directive {:?} at line {}", kind, self.directive_start_line(dir));

        // Note: overwritten by conditional processing.
        self.last_directive_end = self.directive_end_line(dir);

        let erase = match kind {
            DirectiveKind::Define => {
                self.define_macro(dir);
                true
            }
            DirectiveKind::Undef => {
                self.undefine_macro(dir);
                true
            }
            DirectiveKind::If
            | DirectiveKind::Ifdef
            | DirectiveKind::Ifndef
            | DirectiveKind::Elif
            | DirectiveKind::Else => {
                self.process_conditional(dir, kind);
                false /* Erases itself. */
            }
            DirectiveKind::Line | DirectiveKind::Endif => true,
            DirectiveKind::Other => false,
        };

        if erase {
            self.erase_lines(self.directive_start_line(dir), self.directive_end_line(dir));
        }
    }

    fn macro_name_token(&self, dir: usize) -> Option<usize> {
        let identifier = self.directive_identifier(dir)?;
        let name = self.skip_space(identifier + 1);
        if self.ttype(name) == TokenType::WORD.0 {
            Some(name)
        } else {
            None
        }
    }

    fn define_macro(&mut self, dir: usize) {
        let Some(name) = self.macro_name_token(dir) else {
            self.report_at_token(
                self.line_offsets[self.directive_start_line(dir)],
                "Malformed #define directive",
            );
            return;
        };
        // Store the directive; the definition body is parsed at each
        // expansion. Redefinition overwrites.
        let atom = self.form.data().lex.atoms[name];
        self.defines.insert(atom, dir);
    }

    fn undefine_macro(&mut self, dir: usize) {
        if let Some(name) = self.macro_name_token(dir) {
            let atom = self.form.data().lex.atoms[name];
            self.defines.remove(&atom);
        }
    }

    /*
     * Conditionals.
     */

    /// Advances to the next conditional directive, returning its kind.
    fn increment_to_next_conditional(&self, dir: &mut usize) -> Option<DirectiveKind> {
        *dir += 1;
        while *dir < self.directive_lines.len() {
            let kind = self.directive_kind(*dir);
            if matches!(
                kind,
                DirectiveKind::If
                    | DirectiveKind::Ifdef
                    | DirectiveKind::Ifndef
                    | DirectiveKind::Else
                    | DirectiveKind::Elif
                    | DirectiveKind::Endif
            ) {
                return Some(kind);
            }
            *dir += 1;
        }
        None
    }

    /// Finds the matching `#elif`/`#else`/`#endif` at the same nesting
    /// level. `None` on a missing `#endif`.
    fn find_next_matching_conditional(&self, mut dir: usize) -> Option<usize> {
        let mut stack = 1i32;
        loop {
            let kind = self.increment_to_next_conditional(&mut dir)?;
            match kind {
                DirectiveKind::If | DirectiveKind::Ifdef | DirectiveKind::Ifndef => stack += 1,
                DirectiveKind::Endif => stack -= 1,
                _ => {}
            }
            if stack == 0 {
                return Some(dir); /* Endif. */
            }
            if stack == 1 && matches!(kind, DirectiveKind::Else | DirectiveKind::Elif) {
                return Some(dir);
            }
        }
    }

    fn report_missing_endif(&mut self, dir: usize) {
        self.report_at_token(
            self.line_offsets[self.directive_start_line(dir)],
            "Missing matching #endif",
        );
        // Stop evaluating: jump to the last directive.
        self.next_directive = self.directive_lines.len() - 1;
        self.last_directive_end = self.line_count() - 1;
    }

    fn process_conditional(&mut self, dir: usize, kind: DirectiveKind) {
        // Part of an already taken branch: erase up to the #endif.
        if self.jump_stack.last() == Some(&dir) {
            self.jump_stack.pop();
            let Some(mut endif) = self.find_next_matching_conditional(dir) else {
                return self.report_missing_endif(dir);
            };
            while self.directive_kind(endif) != DirectiveKind::Endif {
                match self.find_next_matching_conditional(endif) {
                    Some(next) => endif = next,
                    None => return self.report_missing_endif(dir),
                }
            }
            if self.is_last_directive(endif) {
                // Erase everything up to the #endif; it erases itself.
                let last_before_endif = self.directive_start_line(endif) - 1;
                self.erase_lines(self.directive_start_line(dir), last_before_endif);
                self.next_directive = endif;
                self.last_directive_end = last_before_endif;
            } else {
                // Erase everything including the #endif.
                let endif_end = self.directive_end_line(endif);
                self.erase_lines(self.directive_start_line(dir), endif_end);
                self.next_directive = endif + 1;
                self.last_directive_end = endif_end;
            }
            return;
        }

        let dir_line_start = self.directive_start_line(dir);
        let dir_line_end = self.directive_end_line(dir);

        let condition = self.evaluate_condition(dir, kind);

        let Some(next_condition) = self.find_next_matching_conditional(dir) else {
            return self.report_missing_endif(dir);
        };

        if condition {
            let next_kind = self.directive_kind(next_condition);
            if matches!(next_kind, DirectiveKind::Elif | DirectiveKind::Else) {
                // Jump target: reaching the continuation later erases the
                // whole else-continuation to the #endif.
                self.jump_stack.push(next_condition);
            }
            // Erase the condition, keep the content; the #endif erases
            // itself later.
            self.erase_lines(dir_line_start, dir_line_end);
        } else {
            let last_before = self.directive_start_line(next_condition).saturating_sub(1);
            // Erase everything until the next condition, this directive
            // included, then jump there.
            self.erase_lines(dir_line_start, last_before);
            self.next_directive = next_condition;
            self.last_directive_end = last_before;
        }
    }

    fn evaluate_condition(&self, dir: usize, kind: DirectiveKind) -> bool {
        let Some(identifier) = self.directive_identifier(dir) else {
            return false;
        };
        let cond_start = self.skip_space(identifier + 1);
        match kind {
            DirectiveKind::Else => true,
            DirectiveKind::Ifdef | DirectiveKind::Ifndef => {
                let data = self.form.data();
                let defined = self.ttype(cond_start) == TokenType::WORD.0
                    && self.defines.contains_key(&data.lex.atoms[cond_start]);
                if kind == DirectiveKind::Ifdef {
                    defined
                } else {
                    !defined
                }
            }
            _ => {
                let cond_end = self.line_end_token(self.directive_end_line(dir));
                self.evaluate_expression(cond_start, cond_end)
            }
        }
    }

    fn evaluate_expression(&self, start: usize, end: usize) -> bool {
        let expanded = self.expand_expression(start, end);

        // Early out the simple cases.
        match expanded.trim() {
            "0" => return false,
            "1" => return true,
            _ => {}
        }

        match expression::evaluate(&expanded) {
            Ok(value) => value != 0,
            Err(error) => {
                self.report_at_token(start, &format!("Malformed #if expression: {error}"));
                false
            }
        }
    }

    /// Expands a token range for condition evaluation, substituting macros
    /// and `defined(X)` / `defined X` forms.
    fn expand_expression(&self, start: usize, end: usize) -> String {
        let data = self.form.data();
        let mut out = String::with_capacity(128);
        let mut tok = start;
        loop {
            let is_word = self.ttype(tok) == TokenType::WORD.0;
            let atom = if is_word {
                data.lex.atoms[tok]
            } else {
                Atom::INVALID
            };
            let macro_dir = self.defines.get(&atom).copied();

            if !is_word {
                out.push_str(data.token(tok as i64).str_view_with_whitespace());
            } else if let Some(macro_dir) = macro_dir {
                let (replacement, macro_end) = self.expand_macro(data.token(tok as i64), macro_dir);
                out.push_str(&replacement);
                tok = macro_end as usize;
            } else if data.lex.spelling(&data.src, tok) == "defined" {
                // Parenthesized or bare form.
                tok = self.skip_space(tok + 1);
                let is_function = self.ttype(tok) == b'(';
                if is_function {
                    tok = self.skip_space(tok + 1);
                }
                let defined = self.ttype(tok) == TokenType::WORD.0
                    && self.defines.contains_key(&data.lex.atoms[tok]);
                out.push_str(if defined { "1" } else { "0" });
                if is_function {
                    /* Closing parenthesis. */
                    tok = self.skip_space(tok + 1);
                }
            } else {
                /* Substitution failure. */
                out.push_str(data.token(tok as i64).str_view_with_whitespace());
            }

            if tok >= end {
                break;
            }
            tok = self.skip_directive_newlines(tok + 1);
        }
        out
    }

    fn skip_directive_newlines(&self, mut tok: usize) -> usize {
        while self.ttype(tok) == TokenType::BACKSLASH.0 && self.ttype(tok + 1) == b'\n' {
            tok += 2;
        }
        tok
    }

    /*
     * Macro expansion.
     */

    fn expand_macros_in_range(&mut self, start_line: usize, end_line: usize) {
        if start_line > end_line || start_line >= self.line_count() {
            return;
        }
        let start = self.line_offsets[start_line];
        let end = self.line_offsets[(end_line + 1).min(self.line_count())].saturating_sub(1);
        if start > end {
            return;
        }

        let mut pending: Vec<(usize, usize, String)> = Vec::new();
        {
            let data = self.form.data();
            let mut tok = start as i64;
            while tok < end as i64 {
                if data.token_type(tok) == TokenType::WORD.0 {
                    let atom = data.lex.atoms[tok as usize];
                    if let Some(&macro_dir) = self.defines.get(&atom) {
                        let token = data.token(tok);
                        let (replacement, expansion_end) = self.expand_macro(token, macro_dir);
                        let from = token.str_index_start();
                        let to = data.token(expansion_end).str_index_last();
                        pending.push((from, to, replacement));
                        tok = expansion_end;
                        if tok >= end as i64 {
                            break;
                        }
                    }
                }
                tok += 1;
            }
        }

        let edits = self.form.edits();
        for (from, to, replacement) in pending {
            edits.replace_range(from, to, replacement);
        }
    }

    /// Parses and expands `input` with the current macro set. Used for
    /// macro arguments and replacement lists (finite recursion through the
    /// blue-painting stack).
    fn parse_and_expand(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }
        if self.depth.get() > MAX_EXPANSION_DEPTH {
            self.reporter
                .report(0, 0, "", "Macro expansion recurses too deeply");
            return input.to_string();
        }
        self.depth.set(self.depth.get() + 1);

        let reporter = Reporter::sink();
        let mut parser = IntermediateForm::new(input, ParseMode::Expression, &reporter);

        let mut cursor: i64 = 0;
        loop {
            let pending = {
                let data = parser.data();
                if cursor >= data.lex.types.len() as i64 {
                    None
                } else if data.token_type(cursor) == TokenType::WORD.0 {
                    let token = data.token(cursor);
                    let atom = self
                        .form
                        .data()
                        .lex
                        .atom_table
                        .lookup(token.str_view());
                    self.defines.get(&atom).copied().map(|macro_dir| {
                        let (replacement, end) = self.expand_macro(token, macro_dir);
                        let from = token.str_index_start();
                        let to = data.token(end).str_index_last();
                        (from, to, replacement, end)
                    })
                } else {
                    None
                }
            };
            if cursor >= parser.data().lex.types.len() as i64 {
                break;
            }
            if let Some((from, to, replacement, end)) = pending {
                parser.edits().replace_range(from, to, replacement);
                cursor = end;
            }
            cursor += 1;
        }

        self.depth.set(self.depth.get() - 1);
        parser.into_result()
    }

    /// Expands one macro invocation.
    ///
    /// `invocation` may come from another (recursive) parser; the macro
    /// definition always lives in the main form. Returns the replacement
    /// text and the last invocation token consumed (the closing
    /// parenthesis for function-like macros).
    fn expand_macro(&self, invocation: Token<'_>, macro_dir: usize) -> (String, i64) {
        let data = self.form.data();

        let Some(identifier) = self.directive_identifier(macro_dir) else {
            return (invocation.str_view().to_string(), invocation.index);
        };
        let macro_name = self.skip_space(identifier + 1);
        let macro_parenthesis = macro_name + 1;
        let name_spelling = data.lex.spelling(&data.src, macro_name).to_string();

        let is_function = self.ttype(macro_parenthesis) == b'(';

        let mut end_of_expansion = invocation.index;

        let mut tok = self.skip_space(macro_parenthesis);

        // Empty definition.
        if self.ttype(tok) == b'\n' {
            return (String::new(), end_of_expansion);
        }

        if self.visited.borrow().contains(&macro_dir) {
            // Recursion. Do not expand, keep the original token.
            return (name_spelling, end_of_expansion);
        }

        // Argument name to invocation token range.
        let mut parameters: FxHashMap<String, (i64, i64)> = FxHashMap::default();
        if is_function {
            let mut param = skip_space_tokens(invocation.next());
            if param != b'(' {
                // Invoked without parentheses: do not expand.
                return (name_spelling, end_of_expansion);
            }

            while self.ttype(tok) != b')' {
                // Continue to the next parameter name.
                tok = self.skip_space(tok + 1);
                if self.ttype(tok) == b')' {
                    // Macro declared without parameters.
                    param = get_end_of_parameter(param, false);
                    if param.is_invalid() || param != b')' {
                        // Missing ')' or arguments given to a
                        // zero-parameter macro: cancel expansion.
                        return (name_spelling, invocation.index);
                    }
                    break;
                }

                let param_start = param;
                let mut param_end = get_end_of_parameter(param_start, false);

                let mut argument_name = data.lex.spelling(&data.src, tok).to_string();
                if argument_name == "..." {
                    param_end = get_end_of_parameter(param_start, true);
                    argument_name = "__VA_ARGS__".to_string();
                }
                if param_end.is_invalid() {
                    return (name_spelling, invocation.index);
                }

                if param_start.next() == param_end.prev() {
                    // Single-token argument.
                    parameters.insert(argument_name, (param_start.index + 1, param_start.index + 1));
                } else {
                    let arg_start = skip_space_tokens(param_start.next());
                    let arg_end = skip_space_tokens_backward(param_end.prev());
                    parameters.insert(argument_name, (arg_start.index, arg_end.index));
                }

                // Continue to the next separator.
                tok = self.skip_space(tok + 1);
                param = param_end;

                if self.ttype(tok) == 0 {
                    break;
                }
            }
            // Skip the closing parenthesis of the parameter list.
            tok = self.skip_space(tok + 1);
            // Replace the whole call.
            end_of_expansion = param.index;
        }

        let inv_data = invocation.data_ref();

        let mut expanded = String::with_capacity(256);

        while self.ttype(tok) != b'\n' && self.ttype(tok) != 0 {
            let curr_type = self.ttype(tok);
            let next_type = self.ttype(tok + 1);
            if curr_type == b'#' && next_type == b'#' {
                /* Token pasting: concatenate by skipping the operator. */
                tok += 2;
                continue;
            }
            if curr_type == b'\\' && next_type == b'\n' {
                /* Directive continuation. Keep tokens apart. */
                tok += 2;
                expanded.push(' ');
                continue;
            }

            if curr_type == b'#' {
                self.report_at_token(tok, "Stringify operator '#' is not supported");
                tok += 1;
                continue;
            }

            let next_type2 = self.ttype(tok + 2);
            let next_type3 = self.ttype(tok + 3);
            let prev_type = if tok > 0 { self.ttype(tok - 1) } else { 0 };
            let prev_type2 = if tok > 1 { self.ttype(tok - 2) } else { 0 };
            let prev_type3 = if tok > 2 { self.ttype(tok - 3) } else { 0 };

            // Token pasting may have spaces around the operator.
            let next_is_pasting = if next_type == b' ' {
                next_type2 == b'#' && next_type3 == b'#'
            } else {
                next_type == b'#' && next_type2 == b'#'
            };
            let prev_is_pasting = if prev_type == b' ' {
                prev_type2 == b'#' && prev_type3 == b'#'
            } else {
                prev_type == b'#' && prev_type2 == b'#'
            };

            if curr_type == b' ' && (next_is_pasting || prev_is_pasting) {
                /* Do not paste spaces around the pasting operator. */
            } else if curr_type == b' ' {
                /* Collapse space runs. */
                expanded.push(' ');
            } else if curr_type == TokenType::WORD.0 {
                let spelling = data.lex.spelling(&data.src, tok);
                let mut replaced = false;
                if is_function {
                    if let Some(&(arg_start, arg_end)) = parameters.get(spelling) {
                        let argument = token_range_str(inv_data, arg_start, arg_end);
                        if !next_is_pasting && !prev_is_pasting {
                            // Expand the argument. Can reach the same macro
                            // again (finite recursion).
                            expanded.push_str(&self.parse_and_expand(argument));
                        } else {
                            expanded.push_str(argument);
                        }
                        replaced = true;
                    }
                }
                if !replaced {
                    expanded.push_str(spelling);
                }
            } else {
                expanded.push_str(data.token(tok as i64).str_view_with_whitespace());
            }

            tok += 1;
        }

        // Blue-paint this macro during the replacement-list expansion.
        self.visited.borrow_mut().push(macro_dir);
        let expanded = self.parse_and_expand(&expanded);
        self.visited.borrow_mut().pop();

        (expanded, end_of_expansion)
    }

    /*
     * Erasure.
     */

    /// Replaces whole lines by newlines, keeping the physical line count.
    fn erase_lines(&mut self, start_line: usize, end_line: usize) {
        let (from, to, replacement) = {
            let data = self.form.data();
            let start_tok = self.line_offsets[start_line];
            let end_tok = self.line_end_token(end_line);
            let from = data.token(start_tok as i64).str_index_start();
            let to = data.token(end_tok as i64).str_index_last();
            let newlines = data.src[from..=to].matches('\n').count();
            (from, to, "\n".repeat(newlines))
        };
        self.form.edits().replace_range(from, to, replacement);
    }
}

/// Next `,` or `)` at parenthesis depth one, skipping nested parentheses.
/// With `skip_to_end`, only stops at the closing `)`.
fn get_end_of_parameter(tok: Token<'_>, skip_to_end: bool) -> Token<'_> {
    let mut depth = 1i32;
    let mut tok = tok.next();
    while tok.is_valid() {
        if tok == b'(' {
            depth += 1;
        } else if tok == b')' {
            depth -= 1;
        }
        if depth == 0 {
            return tok;
        }
        if depth == 1 && tok == b',' && !skip_to_end {
            return tok;
        }
        tok = tok.next();
    }
    tok
}

fn skip_space_tokens(mut tok: Token<'_>) -> Token<'_> {
    while tok == b' ' || tok == b'\n' {
        tok = tok.next();
    }
    tok
}

fn skip_space_tokens_backward(mut tok: Token<'_>) -> Token<'_> {
    while tok == b' ' || tok == b'\n' {
        tok = tok.prev();
    }
    tok
}

fn token_range_str(data: &ParseData, start: i64, end: i64) -> &str {
    let from = data.token(start).str_index_start();
    let to = data.token(end).str_index_last();
    if from > to {
        return "";
    }
    &data.src[from..=to]
}

fn build_line_structure(data: &ParseData) -> (Vec<usize>, Vec<usize>) {
    let token_count = data.token_count();
    let mut line_offsets = vec![0usize];
    let mut directive_lines = Vec::new();

    for tok_id in 0..token_count {
        match data.lex.types[tok_id] {
            b'\n' => line_offsets.push(tok_id + 1),
            b'#' => {
                let line_start = *line_offsets.last().unwrap();
                // A directive can only start with a hash (plus optional
                // leading space); a hash further in is not a directive.
                if tok_id - line_start <= 1 {
                    let line_index = line_offsets.len() - 1;
                    if directive_lines.last() != Some(&line_index) {
                        directive_lines.push(line_index);
                    }
                }
            }
            _ => {}
        }
    }
    // Finish the last line, but only if it contains at least one token.
    if *line_offsets.last().unwrap() != token_count {
        line_offsets.push(token_count);
    }

    (line_offsets, directive_lines)
}

/// Convenience entry point: preprocess `source` in one call.
pub fn preprocess(source: &str, reporter: &Reporter) -> String {
    let mut preprocessor = Preprocessor::new(source, reporter);
    preprocessor.run();
    preprocessor.into_result()
}
