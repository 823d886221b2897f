//! Style lints: valid syntax with invalid usage.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm};

use super::report_tok;

/// Type names reserved by the target shading language.
static RESERVED_SYMBOLS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "vec2", "vec3", "vec4", "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3", "mat3x4",
        "mat4x2", "mat4x3", "mat4x4", "mat2", "mat3", "mat4", "ivec2", "ivec3", "ivec4", "uvec2",
        "uvec3", "uvec4", "bvec2", "bvec3", "bvec4",
    ]
    .into_iter()
    .collect()
});

/// Makes sure `if`, `else`, `for`, `while` statements are followed by
/// braces.
pub fn lint_unbraced_statements(form: &IntermediateForm, reporter: &Reporter) {
    let root = form.root();

    let check = |end_tok: bslc_parser::Token<'_>| {
        let mut end_tok = end_tok;
        if end_tok.next() == TokenType::IF || end_tok.prev() == b'#' {
            return;
        }
        if end_tok.next() == b'[' && end_tok.next().next() == b'[' {
            end_tok = end_tok.next().scope().back();
        }
        if end_tok.next() != b'{' {
            report_tok(reporter, end_tok, "Missing curly braces after flow control statement.");
        }
    };

    root.foreach_match("i(..)", |m| check(m[4]));
    root.foreach_match("I", |m| check(m[0]));
    root.foreach_match("f(..)", |m| check(m[4]));
    root.foreach_match("F(..)", |m| check(m[4]));
}

/// Rejects identifiers that collide with reserved GLSL type names.
pub fn lint_reserved_tokens(form: &IntermediateForm, reporter: &Reporter) {
    form.root().foreach_token(TokenType::WORD.0, |tok| {
        if RESERVED_SYMBOLS.contains(tok.str_view()) {
            report_tok(reporter, tok, "Reserved GLSL token");
        }
    });
}

/// Rejects global scope constants: they get allocated per-thread in MSL.
pub fn lint_global_scope_constants(form: &IntermediateForm, reporter: &Reporter) {
    form.root().foreach_match("cAA=", |m| {
        if m[0].scope().kind() == scope_kind::GLOBAL {
            report_tok(
                reporter,
                m[2],
                "Global scope constant expression found. These get allocated per-thread in MSL. \
                 Use Macro's or uniforms instead.",
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bslc_parser::ParseMode;

    fn check(src: &str, lint: fn(&IntermediateForm, &Reporter)) -> usize {
        let reporter = Reporter::sink();
        let form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lint(&form, &reporter);
        reporter.error_count()
    }

    #[test]
    fn unbraced_if_is_reported() {
        assert_eq!(check("void fn()\n{\n  if (a)\n    b();\n}\n", lint_unbraced_statements), 1);
        assert_eq!(check("void fn()\n{\n  if (a) {\n    b();\n  }\n}\n", lint_unbraced_statements), 0);
    }

    #[test]
    fn else_if_is_allowed() {
        let src = "void fn()\n{\n  if (a) {\n  }\n  else if (b) {\n  }\n}\n";
        assert_eq!(check(src, lint_unbraced_statements), 0);
    }

    #[test]
    fn attribute_after_statement_is_allowed() {
        let src = "void fn()\n{\n  for (int i = 0; i < 2; i++) [[unroll]] {\n  }\n}\n";
        assert_eq!(check(src, lint_unbraced_statements), 0);
    }

    #[test]
    fn reserved_typename_is_reported() {
        assert_eq!(check("void fn()\n{\n  vec3 a;\n}\n", lint_reserved_tokens), 1);
        assert_eq!(check("void fn()\n{\n  float3 a;\n}\n", lint_reserved_tokens), 0);
    }

    #[test]
    fn global_constant_is_reported() {
        assert_eq!(check("const uint global_var = 1u;\n", lint_global_scope_constants), 1);
        assert_eq!(
            check("void fn()\n{\n  const uint local_var = 1u;\n}\n", lint_global_scope_constants),
            0
        );
    }
}
