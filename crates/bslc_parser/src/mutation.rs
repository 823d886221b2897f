//! Append-only mutation recording and one-pass application.
//!
//! Mutations are never applied in place: passes queue them while scanning
//! the scope tree, then [`Edits::apply_to`] splices them all in one
//! left-to-right pass. Two queued mutations must not overlap; recording
//! order is preserved for mutations starting at the same position, which
//! makes chained inserts deterministic.
//!
//! The `erase` helpers replace spans with whitespace of identical line
//! count, so line numbers survive every pass.

use bslc_base::Span;

use crate::line;
use crate::scope::Scope;
use crate::token::Token;

/// One recorded text replacement.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Byte range of the original string to replace.
    pub src_range: Span,
    /// The replacement string.
    pub replacement: String,
}

/// The pending mutation list.
#[derive(Default)]
pub struct Edits {
    mutations: Vec<Mutation>,
}

impl Edits {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn clear(&mut self) {
        self.mutations.clear();
    }

    /// Replaces the inclusive byte range `[from, to]`.
    pub fn replace_range(&mut self, from: usize, to: usize, replacement: impl Into<String>) {
        let range = Span::from_inclusive(from, to);
        debug_assert!(
            !self.mutations.iter().any(|m| m.src_range.overlaps(&range)),
            "overlapping mutation at {from}..{to}"
        );
        self.mutations.push(Mutation {
            src_range: range,
            replacement: replacement.into(),
        });
    }

    /// Like [`Self::replace_range`] but fails instead of asserting when the
    /// range collides with an already queued mutation. Lets iterative
    /// passes defer nested rewrites to the next round.
    pub fn replace_range_try(
        &mut self,
        from: usize,
        to: usize,
        replacement: impl Into<String>,
    ) -> bool {
        let range = Span::from_inclusive(from, to);
        if self.mutations.iter().any(|m| m.src_range.overlaps(&range)) {
            return false;
        }
        self.mutations.push(Mutation {
            src_range: range,
            replacement: replacement.into(),
        });
        true
    }

    /// Replaces from `from` to `to` (inclusive), trailing whitespace
    /// included.
    pub fn replace_tokens(&mut self, from: Token<'_>, to: Token<'_>, replacement: impl Into<String>) {
        self.replace_range(from.str_index_start(), to.str_index_last(), replacement);
    }

    /// Replaces a token span, keeping its trailing whitespace.
    pub fn replace_tokens_keep_whitespace(
        &mut self,
        from: Token<'_>,
        to: Token<'_>,
        replacement: impl Into<String>,
    ) {
        self.replace_range(
            from.str_index_start(),
            to.str_index_last_no_whitespace(),
            replacement,
        );
    }

    pub fn replace_token(&mut self, tok: Token<'_>, replacement: impl Into<String>) {
        self.replace_tokens(tok, tok, replacement);
    }

    pub fn replace_token_keep_whitespace(&mut self, tok: Token<'_>, replacement: impl Into<String>) {
        self.replace_tokens_keep_whitespace(tok, tok, replacement);
    }

    pub fn replace_scope(&mut self, scope: Scope<'_>, replacement: impl Into<String>) {
        self.replace_tokens(scope.front(), scope.back(), replacement);
    }

    pub fn try_replace_tokens(
        &mut self,
        from: Token<'_>,
        to: Token<'_>,
        replacement: impl Into<String>,
    ) -> bool {
        self.replace_range_try(from.str_index_start(), to.str_index_last(), replacement)
    }

    /// Replaces the inclusive range by whitespace without changing the line
    /// count, keeping the indentation of whatever follows.
    pub fn erase_range(&mut self, src: &str, from: usize, to: usize) {
        let content = &src[from..=to.min(src.len().saturating_sub(1))];
        let lines = content.matches('\n').count();
        let spaces = match content.rfind('\n') {
            Some(pos) => content.len() - (pos + 1),
            None => content.len(),
        };
        self.replace_range(from, to, "\n".repeat(lines) + &" ".repeat(spaces));
    }

    pub fn erase_tokens(&mut self, from: Token<'_>, to: Token<'_>) {
        if from.is_invalid() && to.is_invalid() {
            return;
        }
        debug_assert!(from.index <= to.index);
        let src = from.data.src.as_str();
        self.erase_range(src, from.str_index_start(), to.str_index_last());
    }

    pub fn erase_token(&mut self, tok: Token<'_>) {
        if tok.is_invalid() {
            return;
        }
        self.erase_tokens(tok, tok);
    }

    pub fn erase_scope(&mut self, scope: Scope<'_>) {
        self.erase_tokens(scope.front(), scope.back());
    }

    /// Inserts before byte `at`. With `prepend`, the mutation is queued
    /// first so it lands before other content inserted at that position.
    pub fn insert_before_pos(&mut self, at: usize, content: impl Into<String>, prepend: bool) {
        let mutation = Mutation {
            src_range: Span::new(at, 0),
            replacement: content.into(),
        };
        if prepend {
            self.mutations.insert(0, mutation);
        } else {
            self.mutations.push(mutation);
        }
    }

    pub fn insert_before(&mut self, at: Token<'_>, content: impl Into<String>) {
        self.insert_before_pos(at.str_index_start(), content, false);
    }

    pub fn insert_after_pos(&mut self, at: usize, content: impl Into<String>) {
        self.insert_before_pos(at + 1, content, false);
    }

    pub fn insert_after(&mut self, at: Token<'_>, content: impl Into<String>) {
        self.insert_after_pos(at.str_index_last(), content);
    }

    /// Inserts a `#line <n>` directive after the given byte.
    pub fn insert_line_number_pos(&mut self, at: usize, line: usize) {
        self.insert_after_pos(at, format!("#line {line}\n"));
    }

    pub fn insert_line_number(&mut self, at: Token<'_>, line: usize) {
        self.insert_line_number_pos(at.str_index_last(), line);
    }

    /// Inserts a preprocessor directive after the given token, followed by
    /// a `#line` restoring the numbering and the indentation of the
    /// interrupted line.
    pub fn insert_directive(&mut self, at: Token<'_>, directive: &str) {
        let src = at.data.src.as_str();
        self.insert_after(at, format!("\n{directive}\n"));
        let lines = at.str_view_with_whitespace().matches('\n').count();
        self.insert_line_number(at, at.line_number() + lines);
        let last = at.str_index_last();
        let search_end = (last + 2).min(src.len());
        let line_break = src[..search_end].rfind('\n').unwrap_or(0);
        self.insert_after(at, " ".repeat(last.saturating_sub(line_break)));
    }

    /// Sorts and applies every queued mutation to `src`, returning the new
    /// string, or `None` when nothing was queued. Ties on start position
    /// keep recording order.
    pub fn apply_to(&mut self, src: &str) -> Option<String> {
        if self.mutations.is_empty() {
            return None;
        }
        self.mutations.sort_by_key(|m| m.src_range.start);

        let added: usize = self.mutations.iter().map(|m| m.replacement.len()).sum();
        let mut out = String::with_capacity(src.len() + added);
        let mut cursor = 0usize;
        for mutation in &self.mutations {
            let start = mutation.src_range.start.min(src.len());
            let end = mutation.src_range.end().min(src.len());
            if start > cursor {
                out.push_str(&src[cursor..start]);
            }
            out.push_str(&mutation.replacement);
            cursor = cursor.max(end);
        }
        out.push_str(&src[cursor..]);

        self.mutations.clear();
        Some(out)
    }

    /// For testing: a readable dump of the queued mutations.
    pub fn serialize(&self, src: &str) -> String {
        let mut out = String::new();
        for mutation in &self.mutations {
            let start = mutation.src_range.start.min(src.len());
            let end = mutation.src_range.end().min(src.len());
            out.push_str(&format!(
                "Replace {} - {} \"{}\" by \"{}\"\n",
                mutation.src_range.start,
                mutation.src_range.len,
                &src[start..end],
                mutation.replacement
            ));
        }
        out
    }
}

/// Erase helper for positions that only have string context (no tokens):
/// keeps line count and trailing indentation, like [`Edits::erase_range`].
pub fn erased_filler(content: &str) -> String {
    let lines = content.matches('\n').count();
    let spaces = match content.rfind('\n') {
        Some(pos) => content.len() - (pos + 1),
        None => content.len(),
    };
    "\n".repeat(lines) + &" ".repeat(spaces)
}

/// Convenience: line number helper re-exported next to the mutation API.
pub fn line_of(src: &str, pos: usize) -> usize {
    line::line_number(src, pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mutation_list_yields_original() {
        let mut edits = Edits::default();
        assert!(edits.apply_to("abc").is_none());
    }

    #[test]
    fn replacements_apply_left_to_right() {
        let mut edits = Edits::default();
        edits.replace_range(4, 6, "xyz");
        edits.replace_range(0, 2, "AB");
        let out = edits.apply_to("abc def ghi").unwrap();
        assert_eq!(out, "AB xyz ghi");
        assert!(edits.is_empty());
    }

    #[test]
    fn insertions_at_same_position_keep_recording_order() {
        let mut edits = Edits::default();
        edits.insert_before_pos(3, "1", false);
        edits.insert_before_pos(3, "2", false);
        edits.insert_before_pos(3, "0", true);
        let out = edits.apply_to("abcdef").unwrap();
        assert_eq!(out, "abc012def");
    }

    #[test]
    fn erase_preserves_line_count_and_indent() {
        let src = "keep\nerase me\n  next";
        let mut edits = Edits::default();
        let from = src.find("erase").unwrap();
        let to = src.find("  next").unwrap() + 1;
        edits.erase_range(src, from, to);
        let out = edits.apply_to(src).unwrap();
        assert_eq!(out.matches('\n').count(), src.matches('\n').count());
        assert!(out.ends_with("  next"));
    }

    #[test]
    fn replace_try_detects_collision() {
        let mut edits = Edits::default();
        assert!(edits.replace_range_try(2, 5, "x"));
        assert!(!edits.replace_range_try(4, 8, "y"));
        assert!(edits.replace_range_try(6, 8, "z"));
    }

    #[test]
    fn insertions_never_collide() {
        let mut edits = Edits::default();
        assert!(edits.replace_range_try(2, 5, "x"));
        edits.insert_before_pos(3, "ignored-overlap-is-fine", false);
        assert_eq!(edits.len(), 2);
    }

    #[test]
    fn erased_filler_counts_lines() {
        assert_eq!(erased_filler("ab\ncd"), "\n  ");
        assert_eq!(erased_filler("abc"), "   ");
    }
}
