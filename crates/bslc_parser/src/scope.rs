//! Read-only scope view and the pattern-matching DSL.
//!
//! A [`Scope`] is a contiguous token range with a kind. Iteration helpers
//! run callbacks over matches of compact token-type patterns; the pattern
//! alphabet is the token-type byte itself:
//!
//! - a punctuation character matches that exact token type,
//! - keyword letters (`s` struct, `f` for, `i` if, `c` const, ...) match
//!   that keyword,
//! - `A` matches a word, `1` a number, `"` a string literal,
//! - `?` makes the preceding pattern character optional,
//! - `..` consumes to the end of the scope opened by the previous match,
//! - brackets match themselves.
//!
//! Matches never overlap: scanning resumes after each complete match.

use bslc_lex::TokenType;

use crate::data::{scope_kind, ParseData};
use crate::token::Token;

#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub(crate) data: &'a ParseData,
    pub index: i64,
}

/// One function definition found by [`Scope::foreach_function`].
pub struct FunctionMatch<'a> {
    pub is_static: bool,
    pub return_type: Token<'a>,
    pub name: Token<'a>,
    pub args: Scope<'a>,
    pub is_const: bool,
    pub body: Scope<'a>,
}

/// One struct definition found by [`Scope::foreach_struct`].
pub struct StructMatch<'a> {
    pub struct_tok: Token<'a>,
    pub attributes: Scope<'a>,
    pub name: Token<'a>,
    pub body: Scope<'a>,
}

/// One member/variable declaration found by [`Scope::foreach_declaration`].
pub struct DeclarationMatch<'a> {
    pub attributes: Scope<'a>,
    pub const_tok: Token<'a>,
    pub var_type: Token<'a>,
    pub template_args: Scope<'a>,
    pub name: Token<'a>,
    pub array: Scope<'a>,
    pub decl_end: Token<'a>,
}

impl<'a> Scope<'a> {
    pub fn invalid(data: &'a ParseData) -> Self {
        Self { data, index: -1 }
    }

    pub fn from_position(data: &'a ParseData, index: i64) -> Self {
        if index < 0 || index >= data.scope_ranges.len() as i64 {
            return Self::invalid(data);
        }
        Self { data, index }
    }

    /// The parsed data this scope points into.
    pub fn data_ref(self) -> &'a ParseData {
        self.data
    }

    /// The root (global) scope, invalid when parsing produced nothing.
    pub fn global(data: &'a ParseData) -> Self {
        Self::from_position(data, 0)
    }

    pub fn is_valid(self) -> bool {
        self.index >= 0 && self.index < self.data.scope_ranges.len() as i64
    }

    pub fn is_invalid(self) -> bool {
        !self.is_valid()
    }

    pub fn kind(self) -> u8 {
        if self.is_invalid() {
            return scope_kind::INVALID;
        }
        self.data.scope_kinds[self.index as usize]
    }

    /// Token-index range of this scope.
    pub fn range(self) -> bslc_base::Span {
        if self.is_invalid() {
            return bslc_base::Span::new(0, 0);
        }
        self.data.scope_ranges[self.index as usize]
    }

    pub fn token_count(self) -> usize {
        self.range().len
    }

    /// Token at `offset` from the scope start.
    pub fn get(self, offset: i64) -> Token<'a> {
        if self.is_invalid() {
            return Token::invalid(self.data);
        }
        Token::from_position(self.data, self.range().start as i64 + offset)
    }

    pub fn front(self) -> Token<'a> {
        self.get(0)
    }

    pub fn back(self) -> Token<'a> {
        if self.is_invalid() {
            return Token::invalid(self.data);
        }
        Token::from_position(self.data, self.range().last() as i64)
    }

    /// The scope containing this scope.
    pub fn parent(self) -> Scope<'a> {
        if self.is_invalid() {
            return Scope::invalid(self.data);
        }
        let scope_start = self.front().str_index_start();
        let mut scope = self;
        loop {
            scope = scope.prev();
            if scope.is_invalid() {
                return scope;
            }
            if scope.back().str_index_last() > scope_start {
                return scope;
            }
        }
    }

    /// The previous scope: either the container or the previous sibling.
    pub fn prev(self) -> Scope<'a> {
        if self.is_invalid() {
            return Scope::invalid(self.data);
        }
        self.front().prev().scope()
    }

    /// The next scope: either the container or the next sibling.
    pub fn next(self) -> Scope<'a> {
        if self.is_invalid() {
            return Scope::invalid(self.data);
        }
        self.back().next().scope()
    }

    pub fn contains(self, sub: Scope<'a>) -> bool {
        let mut parent = sub.parent();
        while parent.is_valid() && parent.kind() != scope_kind::GLOBAL && parent != self {
            parent = parent.parent();
        }
        parent == self
    }

    pub fn str_with_whitespace(self) -> String {
        if self.is_invalid() {
            return String::new();
        }
        let start = self.front().str_index_start();
        let end = self.back().str_index_last();
        self.data.src[start..=end].to_string()
    }

    pub fn to_str(self) -> String {
        if self.is_invalid() {
            return String::new();
        }
        let start = self.front().str_index_start();
        let end = self.back().str_index_last_no_whitespace();
        self.data.src[start..=end].to_string()
    }

    /// Content without the first and last token.
    pub fn str_exclusive(self) -> String {
        if self.is_invalid() || self.token_count() <= 2 {
            return String::new();
        }
        let start = self.front().next().str_index_start();
        let end = self.back().prev().str_index_last_no_whitespace();
        if end < start {
            return String::new();
        }
        self.data.src[start..=end].to_string()
    }

    /// First occurrence of the token type inside this scope.
    pub fn find_token(self, ty: u8) -> Token<'a> {
        if self.is_invalid() {
            return Token::invalid(self.data);
        }
        let range = self.range();
        let end = range.end().min(self.data.lex.types.len());
        for index in range.start..end {
            if self.data.lex.types[index] == ty {
                return Token::from_position(self.data, index as i64);
            }
        }
        Token::invalid(self.data)
    }

    pub fn contains_token(self, ty: u8) -> bool {
        self.find_token(ty).is_valid()
    }

    /// True if any word token in this scope has the given spelling.
    pub fn contains_word(self, word: &str) -> bool {
        if self.is_invalid() {
            return false;
        }
        let range = self.range();
        let end = range.end().min(self.data.lex.types.len());
        for index in range.start..end {
            if self.data.lex.types[index] == TokenType::WORD.0
                && self.data.lex.spelling(&self.data.src, index) == word
            {
                return true;
            }
        }
        false
    }

    /// First container scope (including itself) of the given kind.
    pub fn first_scope_of_kind(self, kind: u8) -> Scope<'a> {
        let mut scope = self;
        while scope.is_valid() && scope.kind() != scope_kind::GLOBAL && scope.kind() != kind {
            scope = scope.parent();
        }
        if scope.kind() == kind {
            scope
        } else {
            Scope::invalid(self.data)
        }
    }

    /// Small pattern matching engine, see the module documentation for the
    /// pattern alphabet. The callback receives one token per pattern
    /// character; control characters and unmatched optionals are invalid.
    pub fn foreach_match(self, pattern: &str, mut callback: impl FnMut(&[Token<'a>])) {
        debug_assert!(!pattern.is_empty());
        if self.is_invalid() {
            return;
        }
        let data = self.data;
        let range = self.range();
        let pat = pattern.as_bytes();

        let control_tokens =
            pattern.matches('?').count() * 2 + pattern.matches("..").count() * 2;

        if (range.len as i64) < pat.len() as i64 - control_tokens as i64 {
            return;
        }
        let searchable = range.len as i64 - (pat.len() as i64 - 1 - control_tokens as i64);

        let mut matches: Vec<Token<'a>> = vec![Token::invalid(data); pat.len()];

        let mut pos: i64 = 0;
        while pos < searchable {
            let mut cursor = range.start as i64 + pos;
            let mut i = 0usize;
            while i < pat.len() {
                let is_last = i == pat.len() - 1;
                let token_type = data.token_type(cursor);
                let curr = pat[i];
                let next = if is_last { 0 } else { pat[i + 1] };

                // Scope skipping.
                if !is_last && curr == b'.' && next == b'.' {
                    cursor = matches[i - 1].scope().back().index;
                    i += 2;
                    continue;
                }

                if curr == token_type {
                    // Regular token.
                    matches[i] = Token::from_position(data, cursor);
                    cursor += 1;
                } else if curr == b'?' && next != b'?' {
                    // The optional token before this marker matched.
                    matches[i] = Token::invalid(data);
                } else if !is_last && curr != b'?' && next == b'?' {
                    // Unmatched optional token. Continue scanning.
                    matches[i] = Token::invalid(data);
                    i += 2;
                    continue;
                } else {
                    // Token mismatch. Test next position.
                    break;
                }

                if is_last {
                    callback(&matches);
                    // Matches never overlap: resume after this one.
                    pos = cursor - range.start as i64 - 1;
                }
                i += 1;
            }
            pos += 1;
        }
    }

    /// Iterates the direct child scopes of the given kind.
    pub fn foreach_scope(self, kind: u8, mut callback: impl FnMut(Scope<'a>)) {
        // Makes no sense on the top level kind.
        debug_assert!(kind != scope_kind::GLOBAL);
        if self.is_invalid() {
            return;
        }
        let data = self.data;
        let self_back = self.back().index;
        let mut pos = self.index.max(0) as usize;
        while let Some(found) = data.scope_kinds[pos..]
            .iter()
            .position(|&k| k == kind)
            .map(|p| p + pos)
        {
            let scope = Scope::from_position(data, found as i64);
            if scope.front().index > self_back {
                // Found scope starts after this scope. End iteration.
                break;
            }
            if scope.parent() == self {
                callback(scope);
            }
            pos = found + 1;
        }
    }

    /// Iterates the attributes of an `Attributes` scope as
    /// `(name, argument scope)` pairs; the argument scope is invalid for
    /// zero-argument attributes.
    pub fn foreach_attribute(self, mut callback: impl FnMut(Token<'a>, Scope<'a>)) {
        debug_assert!(self.kind() == scope_kind::ATTRIBUTES);
        self.foreach_scope(scope_kind::ATTRIBUTE, |attr| {
            let props = if attr.get(1) == b'(' {
                attr.get(1).scope()
            } else {
                Scope::invalid(self.data)
            };
            callback(attr.get(0), props);
        });
    }

    pub fn foreach_token(self, ty: u8, mut callback: impl FnMut(Token<'a>)) {
        let pattern = [ty];
        let pattern = std::str::from_utf8(&pattern).expect("token types are ASCII");
        self.foreach_match(pattern, |matches| callback(matches[0]));
    }

    /// Runs a callback for every function definition in this scope.
    pub fn foreach_function(self, mut callback: impl FnMut(FunctionMatch<'a>)) {
        self.foreach_match("m?AA(..)c?{..}", |m| {
            callback(FunctionMatch {
                is_static: m[0] == TokenType::STATIC,
                return_type: m[2],
                name: m[3],
                args: m[4].scope(),
                is_const: m[8] == TokenType::CONST,
                body: m[10].scope(),
            });
        });
        self.foreach_match("m?AA:A(..)c?{..}", |m| {
            callback(FunctionMatch {
                is_static: m[0] == TokenType::STATIC,
                return_type: m[2],
                name: m[5],
                args: m[6].scope(),
                is_const: m[10] == TokenType::CONST,
                body: m[12].scope(),
            });
        });
        self.foreach_match("m?AA<..>(..)c?{..}", |m| {
            callback(FunctionMatch {
                is_static: m[0] == TokenType::STATIC,
                return_type: m[2],
                name: m[3],
                args: m[8].scope(),
                is_const: m[12] == TokenType::CONST,
                body: m[14].scope(),
            });
        });
    }

    /// Runs a callback for every struct definition in this scope.
    pub fn foreach_struct(self, mut callback: impl FnMut(StructMatch<'a>)) {
        let invalid = Scope::invalid(self.data);
        self.foreach_match("sA{..}", |m| {
            callback(StructMatch {
                struct_tok: m[0],
                attributes: invalid,
                name: m[1],
                body: m[2].scope(),
            });
        });
        self.foreach_match("sA<..>{..}", |m| {
            callback(StructMatch {
                struct_tok: m[0],
                attributes: invalid,
                name: m[1],
                body: m[6].scope(),
            });
        });
        self.foreach_match("s[[..]]A{..}", |m| {
            callback(StructMatch {
                struct_tok: m[0],
                attributes: m[2].scope(),
                name: m[7],
                body: m[8].scope(),
            });
        });
        self.foreach_match("s[[..]]A<..>{..}", |m| {
            callback(StructMatch {
                struct_tok: m[0],
                attributes: m[2].scope(),
                name: m[7],
                body: m[12].scope(),
            });
        });
    }

    /// Runs a callback for every variable declaration (without assignment)
    /// directly inside this scope.
    pub fn foreach_declaration(self, mut callback: impl FnMut(DeclarationMatch<'a>)) {
        let data = self.data;

        let attrs_of = |m: &[Token<'a>]| {
            let first = if m[0].is_valid() { m[0] } else { m[2] };
            let attributes = first.prev().prev().scope();
            if attributes.kind() == scope_kind::ATTRIBUTES {
                attributes
            } else {
                Scope::invalid(data)
            }
        };

        let mut run = |attributes: Scope<'a>,
                       const_tok: Token<'a>,
                       var_type: Token<'a>,
                       template_args: Scope<'a>,
                       name: Token<'a>,
                       array: Scope<'a>,
                       decl_end: Token<'a>| {
            if var_type.scope() != self {
                return;
            }
            callback(DeclarationMatch {
                attributes,
                const_tok,
                var_type,
                template_args,
                name,
                array,
                decl_end,
            });
        };

        let invalid = Scope::invalid(data);
        self.foreach_match("c?AA;", |m| {
            run(attrs_of(m), m[0], m[2], invalid, m[3], invalid, m[4]);
        });
        self.foreach_match("c?AA[..];", |m| {
            run(attrs_of(m), m[0], m[2], invalid, m[3], m[4].scope(), m[8]);
        });
        self.foreach_match("c?A<..>A;", |m| {
            run(attrs_of(m), m[0], m[2], m[3].scope(), m[7], invalid, m[8]);
        });
        self.foreach_match("c?A<..>A[..];", |m| {
            run(attrs_of(m), m[0], m[2], m[3].scope(), m[7], m[8].scope(), m[12]);
        });
        self.foreach_match("c?A&A;", |m| {
            run(attrs_of(m), m[0], m[2], invalid, m[4], invalid, m[5]);
        });
        self.foreach_match("c?A(&A)[..];", |m| {
            run(attrs_of(m), m[0], m[2], invalid, m[5], m[7].scope(), m[11]);
        });
        self.foreach_match("c?A<..>&A;", |m| {
            run(attrs_of(m), m[0], m[2], m[3].scope(), m[8], invalid, m[9]);
        });
        self.foreach_match("c?A<..>(&A)[..];", |m| {
            run(attrs_of(m), m[0], m[2], m[3].scope(), m[9], m[11].scope(), m[15]);
        });
    }
}

impl PartialEq for Scope<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && std::ptr::eq(self.data, other.data)
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            return write!(f, "Scope(invalid)");
        }
        write!(f, "Scope({}, {:?})", self.index, self.kind() as char)
    }
}
