//! Parsed representation: token stream plus bracket-driven scope tree.
//!
//! Scopes are a flat arena: a byte string of kinds and a parallel array of
//! token ranges, plus a per-token back-pointer to its innermost scope. All
//! cross-references are integer indices, so nothing borrows into the token
//! arrays across a mutation round.

use bslc_base::{Reporter, Span};
use bslc_lex::{LexMode, TokenStream, TokenType};

use crate::line;
use crate::token::Token;

/// Scope kinds, stored as printable bytes (searchable like token types).
pub mod scope_kind {
    pub const INVALID: u8 = 0;
    pub const GLOBAL: u8 = b'G';
    pub const NAMESPACE: u8 = b'N';
    pub const STRUCT: u8 = b'S';
    pub const FUNCTION: u8 = b'F';
    pub const LOOP_ARGS: u8 = b'l';
    pub const LOOP_BODY: u8 = b'p';
    pub const SWITCH_ARG: u8 = b'w';
    pub const SWITCH_BODY: u8 = b'W';
    pub const FUNCTION_ARGS: u8 = b'f';
    pub const FUNCTION_CALL: u8 = b'c';
    pub const TEMPLATE: u8 = b'T';
    pub const TEMPLATE_ARG: u8 = b't';
    pub const SUBSCRIPT: u8 = b'A';
    pub const PREPROCESSOR: u8 = b'P';
    pub const ASSIGNMENT: u8 = b'a';
    pub const ATTRIBUTES: u8 = b'B';
    pub const ATTRIBUTE: u8 = b'b';
    /// Added scope inside a function body.
    pub const LOCAL: u8 = b'L';
    /// One element inside `FunctionArgs`.
    pub const FUNCTION_ARG: u8 = b'g';
    /// One element inside `FunctionCall`.
    pub const FUNCTION_PARAM: u8 = b'm';
    /// One element inside `LoopArgs`.
    pub const LOOP_ARG: u8 = b'r';
}

struct OpenScope {
    kind: u8,
    start: usize,
    index: usize,
}

/// Stack of open scopes plus the finished scope arrays being built.
#[derive(Default)]
struct ScopeStack {
    open: Vec<OpenScope>,
    kinds: Vec<u8>,
    ranges: Vec<Span>,
}

impl ScopeStack {
    fn enter(&mut self, kind: u8, start: usize) {
        let index = self.ranges.len();
        self.open.push(OpenScope { kind, start, index });
        self.ranges.push(Span::new(start, 1));
        self.kinds.push(kind);
    }

    fn exit(&mut self, end: usize) {
        if let Some(scope) = self.open.pop() {
            self.ranges[scope.index] = Span::from_inclusive(scope.start, end);
        }
    }

    fn top(&self) -> u8 {
        self.open.last().map_or(scope_kind::INVALID, |s| s.kind)
    }
}

/// The parsed form of one source string.
#[derive(Default)]
pub struct ParseData {
    /// The lexer's input string.
    pub src: String,
    /// Token arrays.
    pub lex: TokenStream,
    /// Kind per scope, a byte string of [`scope_kind`] codes.
    pub scope_kinds: Vec<u8>,
    /// Token-index range per scope.
    pub scope_ranges: Vec<Span>,
    /// Innermost scope index per token.
    pub token_scope: Vec<u32>,
}

impl ParseData {
    /// Tokenizes the owned source in the given mode.
    pub fn lex(&mut self, mode: LexMode) {
        let src = std::mem::take(&mut self.src);
        self.lex.analyze(&src, mode);
        self.src = src;
    }

    pub fn token_count(&self) -> usize {
        self.lex.token_count()
    }

    /// Type byte of token `index`, or 0 when out of range.
    pub fn token_type(&self, index: i64) -> u8 {
        if index < 0 {
            return 0;
        }
        self.lex.types.get(index as usize).copied().unwrap_or(0)
    }

    /// Empties every derived structure so downstream passes short-circuit.
    fn clear_after_error(&mut self) {
        self.src.clear();
        self.lex = TokenStream::new();
        self.lex.analyze("", LexMode::Full);
        self.scope_kinds.clear();
        self.scope_ranges.clear();
        self.token_scope.clear();
    }

    fn report_at(&self, reporter: &Reporter, tok_id: usize, message: &str) {
        let pos = self
            .lex
            .offsets
            .get(tok_id)
            .copied()
            .unwrap_or(self.src.len() as u32) as usize;
        reporter.report(
            line::line_number(&self.src, pos),
            line::char_number(&self.src, pos),
            &line::line_str(&self.src, pos),
            message,
        );
    }

    /// Classifies the `{` scope by scanning back over the declared name
    /// (possibly namespace qualified, attribute decorated, or carrying an
    /// enum base type) for the introducing keyword.
    fn brace_keyword(&self, tok_id: usize) -> u8 {
        let window = tok_id as i64 - 10;
        let mut back = tok_id as i64 - 1;
        while back >= 0 && back >= window {
            let ty = self.token_type(back);
            if ty == TokenType::STRUCT.0
                || ty == TokenType::CLASS.0
                || ty == TokenType::NAMESPACE.0
                || ty == TokenType::ENUM.0
            {
                // `enum class E` introduces an enum body, not a struct.
                if (ty == TokenType::CLASS.0 || ty == TokenType::STRUCT.0)
                    && self.token_type(back - 1) == TokenType::ENUM.0
                {
                    return TokenType::ENUM.0;
                }
                return ty;
            }
            if matches!(ty, b';' | b'{' | b'}') {
                return 0;
            }
            back -= 1;
        }
        0
    }

    /// Bracket-driven scope classification over the token stream.
    ///
    /// Single linear scan maintaining a stack of open scopes. On any
    /// structural mismatch the error is reported and every output structure
    /// is emptied so downstream passes see an empty stream.
    pub fn parse_scopes(&mut self, reporter: &Reporter) {
        use scope_kind::*;

        let token_count = self.token_count();
        let mut stack = ScopeStack::default();
        stack.enter(GLOBAL, 0);

        let mut in_template = 0i32;

        for tok_id in 0..token_count {
            let ty = self.lex.types[tok_id];

            if stack.top() == PREPROCESSOR {
                if ty == TokenType::NEW_LINE.0 {
                    stack.exit(tok_id);
                } else {
                    // Enclose all preprocessor line tokens together; they
                    // are transparent to every other rule.
                    continue;
                }
            }

            match ty {
                b'#' => stack.enter(PREPROCESSOR, tok_id),
                b'=' => {
                    if stack.top() == ASSIGNMENT {
                        // Chained assignments.
                        stack.exit(tok_id - 1);
                    }
                    stack.enter(ASSIGNMENT, tok_id);
                }
                b'{' => {
                    let keyword = self.brace_keyword(tok_id);
                    if keyword == TokenType::STRUCT.0 || keyword == TokenType::CLASS.0 {
                        stack.enter(STRUCT, tok_id);
                    } else if keyword == TokenType::ENUM.0 {
                        stack.enter(LOCAL, tok_id);
                    } else if keyword == TokenType::NAMESPACE.0 {
                        stack.enter(NAMESPACE, tok_id);
                    } else if matches!(stack.top(), GLOBAL | STRUCT | NAMESPACE) {
                        stack.enter(FUNCTION, tok_id);
                    } else {
                        stack.enter(LOCAL, tok_id);
                    }
                }
                b'(' => {
                    let prev = self.token_type(tok_id as i64 - 1);
                    if prev == TokenType::FOR.0 || prev == TokenType::WHILE.0 {
                        stack.enter(LOOP_ARGS, tok_id);
                    } else if prev == TokenType::SWITCH.0 {
                        stack.enter(SWITCH_ARG, tok_id);
                    } else if matches!(stack.top(), GLOBAL | STRUCT) {
                        stack.enter(FUNCTION_ARGS, tok_id);
                    } else if matches!(
                        stack.top(),
                        FUNCTION | LOCAL | ASSIGNMENT | FUNCTION_PARAM | SUBSCRIPT | ATTRIBUTE
                    ) && prev == TokenType::WORD.0
                    {
                        stack.enter(FUNCTION_CALL, tok_id);
                    } else {
                        stack.enter(LOCAL, tok_id);
                    }
                }
                b'[' => {
                    if self.token_type(tok_id as i64 - 1) == b'[' {
                        stack.enter(ATTRIBUTES, tok_id);
                    } else {
                        stack.enter(SUBSCRIPT, tok_id);
                    }
                }
                b'<' => {
                    if tok_id >= 1 {
                        let prev_range = self.lex.range_with_whitespace(tok_id - 1);
                        let prev_last = self.src.as_bytes()[prev_range.1 - 1];
                        // Rely on formatted input: templates have no space
                        // before '<' but comparisons do.
                        if (prev_last != b' ' && prev_last != b'\n' && prev_last != b'<')
                            || self.lex.types[tok_id - 1] == TokenType::TEMPLATE.0
                        {
                            stack.enter(TEMPLATE, tok_id);
                            in_template += 1;
                        }
                    }
                }
                b'>' => {
                    if in_template > 0 && stack.top() == ASSIGNMENT {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == TEMPLATE_ARG {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == TEMPLATE {
                        stack.exit(tok_id);
                        in_template -= 1;
                    }
                }
                b'}' => {
                    if stack.top() == ASSIGNMENT {
                        stack.exit(tok_id - 1);
                    }
                    if matches!(
                        stack.top(),
                        STRUCT | LOCAL | NAMESPACE | LOOP_BODY | SWITCH_BODY | FUNCTION
                    ) {
                        stack.exit(tok_id);
                    } else {
                        self.report_at(reporter, tok_id, "Unexpected '}' token");
                        self.clear_after_error();
                        return;
                    }
                }
                b')' => {
                    if stack.top() == ASSIGNMENT {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == FUNCTION_ARG {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == FUNCTION_PARAM {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == LOOP_ARG {
                        stack.exit(tok_id - 1);
                    }
                    if matches!(
                        stack.top(),
                        LOOP_ARGS | SWITCH_ARG | FUNCTION_ARGS | FUNCTION_CALL | LOCAL
                    ) {
                        stack.exit(tok_id);
                    } else {
                        self.report_at(reporter, tok_id, "Unexpected ')' token");
                        self.clear_after_error();
                        return;
                    }
                }
                b']' => {
                    if stack.top() == ATTRIBUTE {
                        stack.exit(tok_id - 1);
                    }
                    stack.exit(tok_id);
                }
                b';' => {
                    if stack.top() == ASSIGNMENT {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == FUNCTION_ARG {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == TEMPLATE_ARG {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == LOOP_ARG {
                        stack.exit(tok_id - 1);
                    }
                }
                b',' => {
                    if stack.top() == ASSIGNMENT {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == FUNCTION_ARG {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == FUNCTION_PARAM {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == TEMPLATE_ARG {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == ATTRIBUTES {
                        stack.exit(tok_id - 1);
                    }
                    if stack.top() == ATTRIBUTE {
                        stack.exit(tok_id - 1);
                    }
                }
                _ => match stack.top() {
                    ATTRIBUTES => stack.enter(ATTRIBUTE, tok_id),
                    FUNCTION_ARGS => stack.enter(FUNCTION_ARG, tok_id),
                    FUNCTION_CALL => stack.enter(FUNCTION_PARAM, tok_id),
                    LOOP_ARGS => stack.enter(LOOP_ARG, tok_id),
                    TEMPLATE => stack.enter(TEMPLATE_ARG, tok_id),
                    _ => {}
                },
            }
        }

        let last_tok = token_count.saturating_sub(1);

        if stack.open.is_empty() {
            self.report_at(reporter, last_tok, "Extraneous end of scope somewhere in that file");
            self.clear_after_error();
            return;
        }

        if stack.top() == PREPROCESSOR {
            stack.exit(last_tok);
        }

        if stack.top() != GLOBAL {
            let start = stack.open.last().map_or(0, |s| s.start);
            self.report_at(reporter, start, "Unterminated scope");
            self.clear_after_error();
            return;
        }

        // Close the global scope over everything, sentinel included.
        if let Some(scope) = stack.open.pop() {
            stack.ranges[scope.index] = Span::new(0, token_count + 1);
        }

        self.scope_kinds = stack.kinds;
        self.scope_ranges = stack.ranges;

        // Per-token innermost scope: later (inner) scopes overwrite.
        self.token_scope.clear();
        self.token_scope.resize(token_count + 1, 0);
        for (scope_id, range) in self.scope_ranges.iter().enumerate() {
            let end = range.end().min(token_count + 1);
            for slot in &mut self.token_scope[range.start..end] {
                *slot = scope_id as u32;
            }
        }
    }

    /// Token view at `index`.
    pub fn token(&self, index: i64) -> Token<'_> {
        Token::from_position(self, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate::{IntermediateForm, ParseMode};

    fn parse(src: &str) -> IntermediateForm {
        let reporter = Reporter::sink();
        IntermediateForm::new(src, ParseMode::Full, &reporter)
    }

    fn kinds(form: &IntermediateForm) -> String {
        form.data().scope_kinds.iter().map(|&k| k as char).collect()
    }

    #[test]
    fn global_scope_covers_everything() {
        let form = parse("int a;\n");
        let data = form.data();
        assert_eq!(data.scope_kinds[0], scope_kind::GLOBAL);
        assert_eq!(data.scope_ranges[0].start, 0);
        assert_eq!(data.scope_ranges[0].end(), data.token_count() + 1);
    }

    #[test]
    fn function_bodies_detected_at_global_scope() {
        let form = parse("void fn(int a)\n{\n  int b = a;\n}\n");
        let kinds = kinds(&form);
        assert!(kinds.contains('f'), "function args in {kinds:?}");
        assert!(kinds.contains('F'), "function body in {kinds:?}");
        assert!(kinds.contains('g'), "argument element in {kinds:?}");
        assert!(kinds.contains('a'), "assignment in {kinds:?}");
    }

    #[test]
    fn struct_scope_detected() {
        let form = parse("struct Foo {\n  int a;\n};\n");
        assert!(kinds(&form).contains('S'));
    }

    #[test]
    fn struct_with_attribute_detected() {
        let form = parse("struct [[host_shared]] Foo {\n  int a;\n};\n");
        assert!(kinds(&form).contains('S'));
    }

    #[test]
    fn namespace_qualified_struct_detected() {
        let form = parse("struct ns::Foo {\n  int a;\n};\n");
        assert!(kinds(&form).contains('S'));
    }

    #[test]
    fn enum_body_is_local() {
        let form = parse("enum class E : int {\n  A = 0,\n};\n");
        let kinds = kinds(&form);
        assert!(!kinds.contains('S'));
        assert!(kinds.contains('L'));
    }

    #[test]
    fn namespace_scope_detected() {
        let form = parse("namespace foo {\nint a;\n}\n");
        assert!(kinds(&form).contains('N'));
    }

    #[test]
    fn loop_scopes_detected() {
        let form = parse("void fn()\n{\n  for (int i = 0; i < 4; i++) {\n    x(i);\n  }\n}\n");
        let kinds = kinds(&form);
        assert!(kinds.contains('l'), "loop args in {kinds:?}");
        assert!(kinds.contains('r'), "loop arg element in {kinds:?}");
        assert!(kinds.contains('c'), "call in {kinds:?}");
    }

    #[test]
    fn switch_scope_detected() {
        let form = parse("void fn()\n{\n  switch (x) {\n    default:\n      break;\n  }\n}\n");
        assert!(kinds(&form).contains('w'));
    }

    #[test]
    fn template_detected_by_adjacency() {
        let form = parse("template<typename T> T fn(T a)\n{\n  return a;\n}\n");
        assert!(kinds(&form).contains('T'));
        assert!(kinds(&form).contains('t'));
    }

    #[test]
    fn comparison_is_not_a_template() {
        let form = parse("void fn()\n{\n  if (a < b) {\n    x();\n  }\n}\n");
        assert!(!kinds(&form).contains('T'));
    }

    #[test]
    fn attributes_and_subscript_forms() {
        let form =
            parse("void fn()\n{\n  [[unroll]] for (int i = 0; i < 2; i++) {\n  }\n  a[3] = 1;\n}\n");
        let kinds = kinds(&form);
        assert!(kinds.contains('B'), "attributes in {kinds:?}");
        assert!(kinds.contains('b'), "attribute in {kinds:?}");
        assert!(kinds.contains('A'), "subscript in {kinds:?}");
    }

    #[test]
    fn preprocessor_scope_detected_and_transparent() {
        let form = parse("#define FOO(a) (a { b\nint a;\n");
        let kinds = kinds(&form);
        assert!(kinds.contains('P'));
        // Unbalanced brackets inside the directive are ignored.
        assert!(!kinds.contains('F'));
    }

    #[test]
    fn unexpected_close_reports_and_empties() {
        let reporter = Reporter::sink();
        let form = IntermediateForm::new("void fn()\n{\n}\n}\n", ParseMode::Full, &reporter);
        assert_eq!(reporter.error_count(), 1);
        assert!(form.data().scope_kinds.is_empty());
        assert_eq!(form.data().token_count(), 0);
    }

    #[test]
    fn unterminated_scope_reports_and_empties() {
        let reporter = Reporter::sink();
        let form = IntermediateForm::new("void fn()\n{\nint a;\n", ParseMode::Full, &reporter);
        assert_eq!(reporter.error_count(), 1);
        assert!(form.data().scope_kinds.is_empty());
    }

    #[test]
    fn every_token_has_an_innermost_scope() {
        let form = parse("struct A {\n  void fn()\n  {\n    b = c[1];\n  }\n};\n");
        let data = form.data();
        assert_eq!(data.token_scope.len(), data.token_count() + 1);
        for (i, &scope) in data.token_scope.iter().enumerate() {
            let range = data.scope_ranges[scope as usize];
            assert!(range.contains(i), "token {i} outside its scope range");
        }
    }

    #[test]
    fn scopes_are_properly_nested() {
        let form =
            parse("void fn(int a)\n{\n  for (int i = 0; i < a; i++) {\n    b[i] = c(i);\n  }\n}\n");
        let data = form.data();
        for (i, a) in data.scope_ranges.iter().enumerate() {
            for b in data.scope_ranges.iter().skip(i + 1) {
                let disjoint = a.end() <= b.start || b.end() <= a.start;
                let nested = (a.start <= b.start && b.end() <= a.end())
                    || (b.start <= a.start && a.end() <= b.end());
                assert!(disjoint || nested, "ranges cross: {a:?} vs {b:?}");
            }
        }
    }
}
