//! Reference lowering and the GLSL argument-qualifier compatibility
//! macros.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm, ParseMode, Token};

use super::report_tok;

/// Known resource accessors allowed inside reference definitions.
fn is_resource_accessor(name: &str) -> bool {
    matches!(
        name,
        "specialization_constant_get"
            | "push_constant_get"
            | "interface_get"
            | "attribute_get"
            | "buffer_get"
            | "srt_access"
            | "sampler_get"
            | "image_get"
    )
}

/// `T &x` becomes `inout T x`; `const T &x` becomes `T x`.
pub fn lower_reference_arguments(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        let mut add_mutation = |ty: Token<'_>, arg_name: Token<'_>, last_tok: Token<'_>| {
            if ty.prev() == TokenType::CONST {
                edits.replace_tokens(
                    ty.prev(),
                    last_tok,
                    format!("{} {}", ty.str_view(), arg_name.str_view()),
                );
            } else {
                edits.replace_tokens(
                    ty,
                    last_tok,
                    format!("inout {} {}", ty.str_view(), arg_name.str_view()),
                );
            }
        };

        root.foreach_scope(scope_kind::FUNCTION_ARGS, |scope| {
            scope.foreach_match("A(&A)", |m| add_mutation(m[0], m[3], m[4]));
            scope.foreach_match("A&A", |m| add_mutation(m[0], m[2], m[2]));
            scope.foreach_match("A&T", |m| add_mutation(m[0], m[2], m[2]));
        });
    }
    form.apply_mutations(reporter);
}

/// Erases local reference declarations, textually replacing each later
/// occurrence of the name by the definition expression. The expression
/// must be side-effect free: no calls other than the known resource
/// accessors, no increments, and only trivially-const subscripts.
pub fn lower_reference_variables(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_function(|f| {
            let fn_args = f.args;
            let fn_scope = f.body;
            fn_scope.foreach_match("c?A&A=", |m| {
                let name = m[4];
                let assignment = m[5].scope();

                let mut decl_start = if m[0].is_valid() { m[0] } else { m[2] };
                /* Take attributes into account. */
                if decl_start.prev() == b']' {
                    decl_start = decl_start.prev().scope().front();
                }
                /* Take the ending ';' into account. */
                let decl_end = assignment.back().next();

                /* The definition must not contain side effects. */
                assignment.foreach_token(TokenType::INCREMENT.0, |tok| {
                    report_tok(reporter, tok, "Reference definitions cannot have side effects.");
                });
                assignment.foreach_token(TokenType::DECREMENT.0, |tok| {
                    report_tok(reporter, tok, "Reference definitions cannot have side effects.");
                });
                assignment.foreach_token(b'(', |tok| {
                    if !is_resource_accessor(tok.prev().str_view()) {
                        report_tok(reporter, tok, "Reference definitions cannot contain function calls.");
                    }
                });
                assignment.foreach_scope(scope_kind::SUBSCRIPT, |subscript| {
                    if subscript.token_count() != 3 {
                        report_tok(
                            reporter,
                            subscript.front(),
                            "Array subscript inside reference declaration must be a single \
                             variable or a constant, not an expression.",
                        );
                        return;
                    }

                    let index_var = subscript.get(1);

                    if index_var == TokenType::NUMBER {
                        /* Literals are fine. */
                        return;
                    }

                    /* The index variable must be a const local. */
                    let mut is_const = false;
                    let mut is_ref = false;
                    let mut is_found = false;

                    let mut process_decl = |m: &[Token<'_>]| {
                        if m[5].str_index_start() < index_var.str_index_start()
                            && m[5].str_view() == index_var.str_view()
                        {
                            is_const = m[0].is_valid();
                            is_ref = m[3].is_valid();
                            is_found = true;
                        }
                    };
                    fn_args.foreach_match("c?A&?A", |d| process_decl(d));
                    fn_scope.foreach_match("c?A&?A", |d| process_decl(d));

                    if !is_found {
                        report_tok(
                            reporter,
                            index_var,
                            "Cannot locate array subscript variable declaration. If it is a \
                             global variable, assign it to a temporary const variable for \
                             indexing inside the reference.",
                        );
                    } else if !is_const {
                        report_tok(
                            reporter,
                            index_var,
                            "Array subscript variable must be declared as const qualified.",
                        );
                    } else if is_ref {
                        report_tok(
                            reporter,
                            index_var,
                            "Array subscript variable must not be declared as reference.",
                        );
                    }
                });

                let data = name.data_ref();
                let definition = data.src
                    [assignment.get(1).str_index_start()..=assignment.back().str_index_last()]
                    .to_string();
                let definition = definition.trim_end_matches([' ', '\n']).to_string();

                /* Erase the declaration. */
                edits.erase_tokens(decl_start, decl_end);
                /* Replace all following occurrences with the definition. */
                name.scope().foreach_token(TokenType::WORD.0, |token| {
                    /* Do not match member accesses or function calls. */
                    if token.prev() == b'.' || token.next() == b'(' {
                        return;
                    }
                    if token.str_index_start() > decl_end.str_index_last()
                        && token.str_view() == name.str_view()
                    {
                        edits.replace_token_keep_whitespace(token, definition.clone());
                    }
                });
            });
        });
    }
    form.apply_mutations(reporter);

    form.root().foreach_match("c?A&A=", |m| {
        report_tok(reporter, m[4], "Reference is defined inside a global or unterminated scope.");
    });
}

/// `inout T name` / `out T name` become `_ref(T, name)` macro calls on the
/// legacy path.
pub fn lower_argument_qualifiers(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("AAA", |m| {
            if m[0].scope().kind() == scope_kind::PREPROCESSOR {
                /* Don't mutate the actual implementation. */
                return;
            }
            if m[0].str_view() == "inout" || m[0].str_view() == "out" {
                edits.replace_token(m[0], "_ref(");
                edits.insert_after(m[1], ",");
                edits.insert_after(m[2], ")");
            }
        });
    }
    form.apply_mutations(reporter);
}

/// Legacy GLSL path: `out float foo` becomes
/// `out float _out_sta foo _out_end`.
pub fn argument_decorator_macro_injection(text: &str, reporter: &Reporter) -> String {
    let mut form = IntermediateForm::new(text, ParseMode::Expression, reporter);
    {
        let (root, edits) = form.parts();
        root.foreach_match("AAA", |m| {
            let qualifier = m[0].str_view();
            if matches!(qualifier, "out" | "inout" | "in" | "shared") {
                edits.insert_after(m[1], format!(" _{qualifier}_sta "));
                edits.insert_after(m[2], format!(" _{qualifier}_end "));
            }
        });
    }
    form.into_result()
}

/// Legacy GLSL path: `= float[2](...)` becomes `= ARRAY_T(float) ARRAY_V(...)`.
pub fn array_constructor_macro_injection(text: &str, reporter: &Reporter) -> String {
    let mut form = IntermediateForm::new(text, ParseMode::Expression, reporter);
    {
        let (root, edits) = form.parts();
        root.foreach_match("=A[", |m| {
            let array_len_start = m[2];
            let array_len_end = array_len_start.find_next(b']');
            if array_len_end.is_valid() {
                let ty = m[1];
                let array_start = array_len_end.next();
                if array_start == b'(' {
                    edits.insert_before(ty, " ARRAY_T(");
                    edits.replace_tokens(array_len_start, array_len_end, ") ");
                    edits.insert_before(array_start, "ARRAY_V");
                }
            }
        });
    }
    form.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(src: &str) -> IntermediateForm {
        let reporter = Reporter::sink();
        IntermediateForm::new(src, ParseMode::Full, &reporter)
    }

    #[test]
    fn reference_arguments_become_inout() {
        let reporter = Reporter::sink();
        let mut form = form("void fn(float &a, const float &b)\n{\n}\n");
        lower_reference_arguments(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("inout float a"), "{out:?}");
        assert!(out.contains("float b"), "{out:?}");
        assert!(!out.contains('&'), "{out:?}");
        assert!(!out.contains("const float b"), "{out:?}");
    }

    #[test]
    fn reference_variable_is_substituted() {
        // The call site `a(...)` keeps its name; the argument is replaced.
        let reporter = Reporter::sink();
        let mut form = form("void f()\n{\n  const int &a = b;\n  c = a(a);\n}\n");
        lower_reference_variables(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("c = a(b);"), "{out:?}");
        assert!(!out.contains("&"), "{out:?}");
    }

    #[test]
    fn reference_with_side_effect_is_reported() {
        let reporter = Reporter::sink();
        let mut form = form("void f()\n{\n  int &a = b[i++];\n  c = a;\n}\n");
        lower_reference_variables(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn reference_with_call_is_reported() {
        let reporter = Reporter::sink();
        let mut form = form("void f()\n{\n  int &a = get_thing(1);\n  c = a;\n}\n");
        lower_reference_variables(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn resource_accessor_calls_are_allowed() {
        let reporter = Reporter::sink();
        let mut form = form("void f()\n{\n  int &a = srt_access(Srt, member);\n  c = a;\n}\n");
        lower_reference_variables(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 0, "{:?}", form.str());
        assert!(form.str().contains("c = srt_access(Srt, member);"), "{:?}", form.str());
    }

    #[test]
    fn subscript_with_const_index_is_allowed() {
        let reporter = Reporter::sink();
        let src = "void f()\n{\n  const int i = 2;\n  float &a = data[i];\n  c = a;\n}\n";
        let mut form = form(src);
        lower_reference_variables(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 0, "{:?}", form.str());
        assert!(form.str().contains("c = data[i];"), "{:?}", form.str());
    }

    #[test]
    fn subscript_with_mutable_index_is_reported() {
        let reporter = Reporter::sink();
        let src = "void f()\n{\n  int i = 2;\n  float &a = data[i];\n  c = a;\n}\n";
        let mut form = form(src);
        lower_reference_variables(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn argument_qualifiers_become_ref_macros() {
        let reporter = Reporter::sink();
        let mut form = form("void fn(inout float var)\n{\n}\n");
        lower_argument_qualifiers(&mut form, &reporter);
        assert!(form.str().contains("_ref(float ,var)"), "{:?}", form.str());
    }

    #[test]
    fn decorator_macros_are_injected() {
        let reporter = Reporter::sink();
        let out = argument_decorator_macro_injection("void fn(out float var) {}\n", &reporter);
        assert!(out.contains("_out_sta") && out.contains("_out_end"), "{out:?}");
    }

    #[test]
    fn array_constructor_is_rewritten() {
        let reporter = Reporter::sink();
        let out =
            array_constructor_macro_injection("float a[2] = float[2](0.0, 1.0);\n", &reporter);
        assert!(out.contains("ARRAY_T(float) ARRAY_V(0.0, 1.0)"), "{out:?}");
    }
}
