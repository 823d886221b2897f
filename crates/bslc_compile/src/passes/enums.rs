//! Enum lowering to defines and constants.
//!
//! ```text
//! enum MyEnum : uint {          #define MyEnum uint
//!   ENUM_1 = 0u,          >     constant static constexpr uint ENUM_1 = 0u;
//!   ENUM_2 = 1u,                constant static constexpr uint ENUM_2 = 1u;
//! };                            MyEnum MyEnum_ctor_() { return MyEnum(0); }
//! ```
//!
//! Declarations are re-emitted above the erased enum so error lines keep
//! pointing at the original source. Enums need an explicit underlying
//! type to be usable in buffer interfaces.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm, Scope, Token};

use super::report_tok;
use crate::passes::shared::LINTED_STRUCT_SUFFIX;

const PLACEHOLDER_VALUE: &str = "=__auto__";

/// Autonumbers missing initializers, then rewrites each enum into a
/// `#define`, one constant per value, and a stub constructor.
pub fn lower_enums(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let root = form.root();
        let mut missing_underlying_type = |m: &[Token<'_>]| {
            report_tok(reporter, m[0], "enum declaration must explicitly use an underlying type");
        };
        root.foreach_match("MA{", |m| missing_underlying_type(m));
        root.foreach_match("MSA{", |m| missing_underlying_type(m));
    }

    // Mark values without initializer for autonumbering.
    {
        let (root, edits) = form.parts();
        let mut placeholder = |enum_scope: Scope<'_>| {
            let is_unsigned = enum_scope.front().prev().str_view().starts_with('u');
            let start = format!(" = 0{}", if is_unsigned { "u" } else { "" });

            let mut insert = |name: Token<'_>, replacement: &str| {
                if name.next() == b',' || name.next() == b'}' {
                    edits.insert_after(name, replacement);
                }
            };
            enum_scope.foreach_match("{A", |m| insert(m[1], &start));
            enum_scope.foreach_match(",A", |m| insert(m[1], PLACEHOLDER_VALUE));
        };

        root.foreach_match("MSA:A{", |m| placeholder(m[5].scope()));
        root.foreach_match("MA:A{", |m| placeholder(m[4].scope()));
        root.foreach_match("MS[[A]]A:A{", |m| placeholder(m[10].scope()));
        root.foreach_match("M[[A]]A:A{", |m| placeholder(m[9].scope()));
    }
    form.apply_mutations(reporter);

    {
        let (root, edits) = form.parts();
        let mut process_enum = |enum_tok: Token<'_>,
                                class_tok: Token<'_>,
                                enum_name: Token<'_>,
                                enum_type: Token<'_>,
                                enum_scope: Scope<'_>,
                                is_host_shared: bool| {
            let type_str = enum_type.to_str();
            let enum_name_str = enum_name.to_str();

            let mut previous_value = "error_invalid_first_value".to_string();
            enum_scope.foreach_scope(scope_kind::ASSIGNMENT, |scope| {
                let name_tok = scope.front().prev();
                let mut name = name_tok.to_str();
                let mut value = scope.to_str();
                if value == PLACEHOLDER_VALUE {
                    let suffix = if type_str.starts_with('u') { "u" } else { "" };
                    value = format!("= {previous_value} + 1{suffix}");
                }
                if class_tok.is_valid() {
                    name = format!("{enum_name_str}::{name}");
                }
                let decl = format!("constant static constexpr {type_str} {name} {value};\n");
                edits.insert_line_number(enum_tok.prev(), name_tok.line_number());
                edits.insert_after(enum_tok.prev(), decl);

                previous_value = name;
            });
            edits.insert_directive(
                enum_tok.prev(),
                &format!("#define {enum_name_str} {type_str}\n"),
            );
            if is_host_shared {
                if type_str != "uint32_t" && type_str != "int32_t" {
                    report_tok(
                        reporter,
                        enum_type,
                        "enum declaration must use uint32_t or int32_t underlying type for \
                         interface compatibility",
                    );
                    return;
                }
                let define =
                    format!("#define {enum_name_str}{LINTED_STRUCT_SUFFIX} {enum_name_str}\n");
                edits.insert_directive(enum_tok.prev(), &define);
            }
            let ctor = format!(
                "{enum_name_str} {enum_name_str}_ctor_() {{ return {enum_name_str}(0); }}"
            );
            edits.insert_directive(enum_tok.prev(), &ctor);
            edits.erase_tokens(enum_tok, enum_scope.back().next());
        };

        root.foreach_match("MSA:A{", |m| {
            process_enum(m[0], m[1], m[2], m[4], m[5].scope(), false);
        });
        root.foreach_match("MA:A{", |m| {
            process_enum(m[0], Token::invalid(m[0].data_ref()), m[1], m[3], m[4].scope(), false);
        });
        root.foreach_match("MS[[A]]A:A{", |m| {
            process_enum(m[0], m[1], m[7], m[9], m[10].scope(), true);
        });
        root.foreach_match("M[[A]]A:A{", |m| {
            process_enum(m[0], Token::invalid(m[0].data_ref()), m[6], m[8], m[9].scope(), true);
        });
    }
    form.apply_mutations(reporter);

    form.root().foreach_token(TokenType::ENUM.0, |tok| {
        report_tok(reporter, tok, "invalid enum declaration");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bslc_parser::ParseMode;

    fn run(src: &str) -> (String, usize) {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_enums(&mut form, &reporter);
        (form.str().to_string(), reporter.error_count())
    }

    #[test]
    fn enum_class_becomes_define_and_constants() {
        let (out, errors) = run("\nenum class MyEnum : uint {\n  A = 0u,\n  B = 1u,\n};\n");
        assert_eq!(errors, 0, "{out:?}");
        assert!(out.contains("#define MyEnum uint"), "{out:?}");
        assert!(out.contains("constant static constexpr uint MyEnum::A = 0u;"), "{out:?}");
        assert!(out.contains("constant static constexpr uint MyEnum::B = 1u;"), "{out:?}");
        assert!(out.contains("MyEnum MyEnum_ctor_() { return MyEnum(0); }"), "{out:?}");
        assert!(!out.contains("enum class"), "{out:?}");
    }

    #[test]
    fn plain_enum_constants_are_unqualified() {
        let (out, errors) = run("\nenum Kind : int {\n  FIRST = 0,\n};\n");
        assert_eq!(errors, 0, "{out:?}");
        assert!(out.contains("constant static constexpr int FIRST = 0;"), "{out:?}");
    }

    #[test]
    fn missing_initializers_autonumber() {
        let (out, errors) = run("\nenum E : uint {\n  A = 0u,\n  B,\n  C,\n};\n");
        assert_eq!(errors, 0, "{out:?}");
        assert!(out.contains("E::B = E::A + 1u;") || out.contains("B = A + 1u;"), "{out:?}");
        assert!(out.contains("C = B + 1u;"), "{out:?}");
    }

    #[test]
    fn missing_underlying_type_is_an_error() {
        let (_, errors) = run("\nenum Broken {\n  A = 0,\n};\n");
        assert!(errors > 0);
    }

    #[test]
    fn host_shared_enum_requires_32_bit_type() {
        let (_, errors) = run("\nenum class [[host_shared]] E : uint {\n  A = 0u,\n};\n");
        assert!(errors > 0);

        let (out, errors) = run("\nenum class [[host_shared]] E : uint32_t {\n  A = 0u,\n};\n");
        assert_eq!(errors, 0, "{out:?}");
        assert!(out.contains("#define E_host_shared_ E"), "{out:?}");
    }
}
