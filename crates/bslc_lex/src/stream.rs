//! Structure-of-arrays token stream.
//!
//! The stream owns parallel `u8`/`u32` arrays for cache-dense pattern scans:
//! the type array doubles as a searchable byte string of token types. Word
//! tokens additionally carry an interned [`Atom`] so identifier comparisons
//! never touch the source text.

use bslc_base::{Atom, AtomTable};

use crate::buffer;
use crate::class::{keyword_type, TokenType};

/// How much analysis a parse round performs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LexMode {
    /// Everything: operator pairs, literals, whitespace attachment,
    /// keywords. Used by the main transpiler pipeline.
    Full,
    /// Keeps every whitespace token and raw punctuation; merges literals
    /// only. Used by the C preprocessor, which needs line structure.
    Preprocessor,
    /// Like `Full` but without keyword promotion. Used for `#if` condition
    /// evaluation where words are plain identifiers.
    Expression,
}

/// Tokenized source, stored as parallel arrays.
///
/// Invariant: the arrays always end with an [`TokenType::END_OF_FILE`] entry
/// whose offset equals the source length.
#[derive(Default)]
pub struct TokenStream {
    /// Token type per token. A byte string of [`TokenType`] codes.
    pub types: Vec<u8>,
    /// Starting byte of each token.
    pub offsets: Vec<u32>,
    /// Pre-whitespace-merge end of the *previous* token, per entry.
    pub original_offsets: Vec<u32>,
    /// Interned identifier per token. Meaningful only for `Word` tokens.
    pub atoms: Vec<Atom>,
    /// The interner backing [`Self::atoms`].
    pub atom_table: AtomTable,
}

impl TokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenizes `src` and runs the merge/identification passes selected by
    /// `mode`. Replaces any previous content but keeps the atom table, so
    /// atoms stay stable across reparse rounds.
    pub fn analyze(&mut self, src: &str, mode: LexMode) {
        let bytes = src.as_bytes();
        buffer::tokenize(bytes, &mut self.types, &mut self.offsets);

        match mode {
            LexMode::Full | LexMode::Expression => {
                buffer::merge_punctuation(bytes, &mut self.types, &mut self.offsets);
                buffer::merge_complex_literals(bytes, &mut self.types, &mut self.offsets);
                buffer::merge_whitespaces(
                    bytes.len(),
                    &mut self.types,
                    &mut self.offsets,
                    &mut self.original_offsets,
                );
            }
            LexMode::Preprocessor => {
                buffer::merge_complex_literals(bytes, &mut self.types, &mut self.offsets);
                self.original_offsets.clear();
                self.original_offsets.extend_from_slice(&self.offsets);
            }
        }

        if mode == LexMode::Full {
            self.identify_keywords(src);
        }
        self.atomize(src);
    }

    /// Number of tokens, excluding the end-of-file sentinel.
    pub fn token_count(&self) -> usize {
        self.types.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.token_count() == 0
    }

    /// Byte range of token `index`, including attached whitespace.
    pub fn range_with_whitespace(&self, index: usize) -> (usize, usize) {
        let start = self.offsets[index] as usize;
        let end = if index + 1 < self.offsets.len() {
            self.offsets[index + 1] as usize
        } else {
            start
        };
        (start, end)
    }

    /// Byte range of token `index`, without attached whitespace.
    pub fn range(&self, index: usize) -> (usize, usize) {
        let start = self.offsets[index] as usize;
        let end = if index + 1 < self.original_offsets.len() {
            self.original_offsets[index + 1] as usize
        } else {
            start
        };
        (start.min(end), end.max(start))
    }

    /// Spelling of token `index` without attached whitespace.
    pub fn spelling<'a>(&self, src: &'a str, index: usize) -> &'a str {
        let (start, end) = self.range(index);
        &src[start..end]
    }

    fn identify_keywords(&mut self, src: &str) {
        for index in 0..self.token_count() {
            if self.types[index] != TokenType::WORD.0 {
                continue;
            }
            if let Some(keyword) = keyword_type(self.spelling(src, index)) {
                self.types[index] = keyword.0;
            }
        }
    }

    fn atomize(&mut self, src: &str) {
        self.atoms.clear();
        self.atoms.resize(self.types.len(), Atom::INVALID);
        for index in 0..self.token_count() {
            if self.types[index] != TokenType::WORD.0 {
                continue;
            }
            let (start, end) = self.range(index);
            self.atoms[index] = self.atom_table.intern(&src[start..end]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mode_promotes_keywords() {
        let src = "struct Foo { int a; };\n";
        let mut stream = TokenStream::new();
        stream.analyze(src, LexMode::Full);
        assert_eq!(stream.types[0], TokenType::STRUCT.0);
        assert!(stream.types.contains(&TokenType::WORD.0));
    }

    #[test]
    fn expression_mode_keeps_keywords_as_words() {
        let src = "if + else\n";
        let mut stream = TokenStream::new();
        stream.analyze(src, LexMode::Expression);
        assert!(!stream.types.contains(&TokenType::IF.0));
    }

    #[test]
    fn preprocessor_mode_keeps_whitespace_tokens() {
        let src = "#define A 1\n";
        let mut stream = TokenStream::new();
        stream.analyze(src, LexMode::Preprocessor);
        assert!(stream.types.contains(&TokenType::SPACE.0));
    }

    #[test]
    fn atoms_assigned_to_words_only() {
        let src = "float x = 1.0f;\n";
        let mut stream = TokenStream::new();
        stream.analyze(src, LexMode::Full);
        for index in 0..stream.token_count() {
            let is_word = stream.types[index] == TokenType::WORD.0;
            assert_eq!(stream.atoms[index].is_valid(), is_word, "token {index}");
        }
    }

    #[test]
    fn atoms_are_stable_across_reparses() {
        let mut stream = TokenStream::new();
        stream.analyze("foo bar\n", LexMode::Full);
        let foo_atom = stream.atoms[0];
        stream.analyze("bar foo\n", LexMode::Full);
        assert_eq!(stream.atoms[1], foo_atom);
    }

    #[test]
    fn sentinel_invariant_holds_in_all_modes() {
        for mode in [LexMode::Full, LexMode::Preprocessor, LexMode::Expression] {
            let src = "int a = 2;\n";
            let mut stream = TokenStream::new();
            stream.analyze(src, mode);
            assert_eq!(*stream.types.last().unwrap(), 0);
            assert_eq!(*stream.offsets.last().unwrap() as usize, src.len());
        }
    }

    #[test]
    fn spelling_excludes_attached_whitespace() {
        let src = "int   a;\n";
        let mut stream = TokenStream::new();
        stream.analyze(src, LexMode::Full);
        assert_eq!(stream.spelling(src, 0), "int");
        assert_eq!(stream.spelling(src, 1), "a");
    }

    #[test]
    fn empty_input_has_only_the_sentinel() {
        let mut stream = TokenStream::new();
        stream.analyze("", LexMode::Full);
        assert!(stream.is_empty());
        assert_eq!(stream.types, vec![0]);
    }
}
