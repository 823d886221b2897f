//! Read-only token view.
//!
//! A [`Token`] is a `(data, index)` pair — cheap to copy, compare and move
//! around. Invalid tokens (index out of range) are used pervasively instead
//! of `Option` so chained navigation like `tok.prev().prev()` never panics;
//! every accessor degrades to a neutral value on an invalid token.

use bslc_base::Atom;
use bslc_lex::TokenType;

use crate::data::ParseData;
use crate::line;
use crate::scope::Scope;

#[derive(Clone, Copy)]
pub struct Token<'a> {
    pub(crate) data: &'a ParseData,
    pub index: i64,
}

impl<'a> Token<'a> {
    pub fn invalid(data: &'a ParseData) -> Self {
        Self { data, index: -1 }
    }

    pub fn from_position(data: &'a ParseData, index: i64) -> Self {
        if index < 0 || index >= data.lex.types.len() as i64 {
            return Self::invalid(data);
        }
        Self { data, index }
    }

    /// The parsed data this token points into.
    pub fn data_ref(self) -> &'a ParseData {
        self.data
    }

    pub fn is_valid(self) -> bool {
        self.index >= 0 && self.index < self.data.lex.types.len() as i64
    }

    pub fn is_invalid(self) -> bool {
        !self.is_valid()
    }

    pub fn token_type(self) -> TokenType {
        if self.is_invalid() {
            return TokenType::INVALID;
        }
        TokenType(self.data.lex.types[self.index as usize])
    }

    /// Interned identifier. Valid only for `Word` tokens.
    pub fn atom(self) -> Atom {
        if self.is_invalid() {
            return Atom::INVALID;
        }
        self.data.lex.atoms[self.index as usize]
    }

    pub fn prev(self) -> Self {
        Self::from_position(self.data, self.index - 1)
    }

    pub fn next(self) -> Self {
        Self::from_position(self.data, self.index + 1)
    }

    pub fn find_next(self, ty: u8) -> Self {
        let mut tok = self.next();
        while tok.is_valid() && tok != ty {
            tok = tok.next();
        }
        tok
    }

    /// Start of the namespace-qualified identifier this token ends, e.g.
    /// the `A` of `A::B::C` when called on `C`. `::` is a single token.
    pub fn namespace_start(self) -> Self {
        if self != TokenType::WORD.0 {
            return self;
        }
        let mut tok = self;
        while tok.is_valid() {
            let prev = tok.prev();
            if prev == b':' && prev.str_view() == "::" {
                tok = prev.prev();
            } else {
                return tok;
            }
        }
        tok
    }

    /// For a word, the full name including any namespace prefix.
    pub fn full_symbol_name(self) -> String {
        let start = self.namespace_start().str_index_start();
        let end = self.str_index_last_no_whitespace();
        self.data.src[start..=end].to_string()
    }

    pub fn next_not_whitespace(self) -> Self {
        let mut next = self.next();
        while next == b' ' || next == b'\n' {
            next = next.next();
        }
        next
    }

    /// The innermost scope containing this token.
    pub fn scope(self) -> Scope<'a> {
        if self.is_invalid() {
            return Scope::invalid(self.data);
        }
        let scope = self.data.token_scope[self.index as usize];
        Scope::from_position(self.data, scope as i64)
    }

    pub fn str_index_start(self) -> usize {
        if self.is_invalid() {
            return 0;
        }
        self.data.lex.range_with_whitespace(self.index as usize).0
    }

    /// Last byte covered by this token, trailing whitespace included.
    pub fn str_index_last(self) -> usize {
        if self.is_invalid() {
            return 0;
        }
        let (start, end) = self.data.lex.range_with_whitespace(self.index as usize);
        end.max(start + 1) - 1
    }

    pub fn str_index_last_no_whitespace(self) -> usize {
        let last = self.str_index_last();
        let bytes = self.data.src.as_bytes();
        let mut pos = last.min(bytes.len().saturating_sub(1));
        while pos > 0 && (bytes[pos] == b' ' || bytes[pos] == b'\n') {
            pos -= 1;
        }
        pos
    }

    /// Index of the first character of the line this token is on.
    pub fn line_start(self) -> usize {
        let start = self.str_index_start();
        self.data.src[..start].rfind('\n').map_or(0, |p| p + 1)
    }

    /// Index of the last character of the line this token is on, excluding
    /// the newline.
    pub fn line_end(self) -> usize {
        let start = self.str_index_start();
        match self.data.src[start..].find('\n') {
            Some(p) => (start + p).saturating_sub(1),
            None => self.data.src.len().saturating_sub(1),
        }
    }

    pub fn str_view_with_whitespace(self) -> &'a str {
        if self.is_invalid() {
            return "";
        }
        let (start, end) = self.data.lex.range_with_whitespace(self.index as usize);
        &self.data.src[start..end]
    }

    pub fn str_with_whitespace(self) -> String {
        self.str_view_with_whitespace().to_string()
    }

    /// Token text without trailing whitespace.
    pub fn str_view(self) -> &'a str {
        self.str_view_with_whitespace()
            .trim_end_matches([' ', '\n'])
    }

    pub fn to_str(self) -> String {
        self.str_view().to_string()
    }

    /// Content without the first and last characters (string literal body,
    /// for instance).
    pub fn str_view_exclusive(self) -> &'a str {
        let s = self.str_view();
        if s.len() < 2 {
            return "";
        }
        &s[1..s.len() - 1]
    }

    pub fn str_exclusive(self) -> String {
        self.str_view_exclusive().to_string()
    }

    /// 1-based line number of this token, honoring `#line` directives.
    /// With `at_end`, the line number right after this token.
    pub fn line_number_at(self, at_end: bool) -> usize {
        if self.is_invalid() {
            return 0;
        }
        let last = self.str_index_last();
        if at_end {
            let bump = usize::from(self.data.src.as_bytes().get(last) == Some(&b'\n'));
            line::line_number(&self.data.src, last) + bump
        } else {
            line::line_number(&self.data.src, self.str_index_start())
        }
    }

    pub fn line_number(self) -> usize {
        self.line_number_at(false)
    }

    /// 0-based column offset of this token into its line.
    pub fn char_number(self) -> usize {
        if self.is_invalid() {
            return 0;
        }
        line::char_number(&self.data.src, self.str_index_start())
    }

    /// Text of the line this token is on.
    pub fn line_str(self) -> String {
        line::line_str(&self.data.src, self.str_index_start())
    }

    /// The attribute list right before this token, if any.
    /// `[[...]]` parses as a `Subscript` wrapping an `Attributes` scope.
    pub fn attribute_before(self) -> Scope<'a> {
        if self.is_invalid() {
            return Scope::invalid(self.data);
        }
        let prev = self.prev();
        if prev == b']' && prev.prev() == b']' {
            return prev
                .prev()
                .prev()
                .scope()
                .first_scope_of_kind(crate::data::scope_kind::ATTRIBUTES);
        }
        Scope::invalid(self.data)
    }

    /// The attribute list right after this token, if any.
    pub fn attribute_after(self) -> Scope<'a> {
        if self.is_invalid() {
            return Scope::invalid(self.data);
        }
        let next = self.next();
        if next == b'[' && next.next() == b'[' {
            return next
                .next()
                .scope()
                .first_scope_of_kind(crate::data::scope_kind::ATTRIBUTES);
        }
        Scope::invalid(self.data)
    }
}

impl PartialEq<TokenType> for Token<'_> {
    fn eq(&self, other: &TokenType) -> bool {
        self.token_type() == *other
    }
}

impl PartialEq<u8> for Token<'_> {
    fn eq(&self, other: &u8) -> bool {
        self.token_type().0 == *other
    }
}

impl PartialEq for Token<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && std::ptr::eq(self.data, other.data)
    }
}

impl std::fmt::Debug for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            return write!(f, "Token(invalid)");
        }
        write!(
            f,
            "Token({}, {:?}, {:?})",
            self.index,
            self.token_type().0 as char,
            self.str_view()
        )
    }
}
