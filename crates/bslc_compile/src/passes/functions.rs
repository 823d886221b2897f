//! Function-level lowering: default arguments, node-library prototypes,
//! and the initializer-list family.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm, Scope};

use super::cleanup::strip_whitespace;
use super::report_tok;
use crate::metadata::{self, ArgumentFormat, FunctionFormat, Source};

static AGGREGATE_BUILTIN_TYPES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "float2", "float3", "float4", "float2x2", "float2x3", "float2x4", "float3x2", "float3x3",
        "float3x4", "float4x2", "float4x3", "float4x4", "int2", "int3", "int4", "uint2", "uint3",
        "uint4", "bool2", "bool3", "bool4",
    ]
    .into_iter()
    .collect()
});

/// Parses a subscript scope holding a single integer literal. Returns the
/// fallback for any non-literal content.
pub fn static_array_size(array: Scope<'_>, fallback: i64, reporter: &Reporter) -> i64 {
    if array.token_count() == 3 && array.get(1) == TokenType::NUMBER {
        let literal = array.get(1).to_str();
        match literal.trim_end_matches(['u', 'U']).parse::<i64>() {
            Ok(value) => return value,
            Err(_) => {
                report_tok(reporter, array.front(), "Invalid array size, expecting integer literal")
            }
        }
    }
    fallback
}

/// Populates the node-library function formats for `[[node]]` functions.
pub fn parse_library_functions(form: &IntermediateForm, metadata: &mut Source, reporter: &Reporter) {
    form.root().foreach_function(|f| {
        let first_tok = if f.is_static { f.return_type.prev() } else { f.return_type };
        let attributes = first_tok.attribute_before();
        if !attributes.is_valid() || !attributes.contains_word("node") {
            return;
        }
        if f.return_type.str_view() != "void" {
            report_tok(reporter, f.return_type, "Expected void return type for node function");
            return;
        }
        if f.args.token_count() <= 3 {
            report_tok(reporter, f.return_type, "Expected at least one argument for node function");
            return;
        }

        let mut function = FunctionFormat {
            name: f.name.to_str(),
            arguments: Vec::new(),
        };

        f.args.foreach_scope(scope_kind::FUNCTION_ARG, |arg| {
            // Note: there is no array support.
            let name = arg.back();
            let ty = if name.prev() == b'&' { name.prev().prev() } else { name.prev() };
            let mut qualifier = ty.prev().to_str();
            if qualifier != "out" && qualifier != "inout" && qualifier != "in" {
                if name.prev() == b'&' {
                    qualifier = "out".to_string();
                } else if qualifier != "const" && qualifier != "(" && qualifier != "," {
                    report_tok(
                        reporter,
                        ty.prev(),
                        "Unrecognized qualifier, expecting 'const', 'in', 'out' or 'inout'.",
                    );
                    qualifier = "in".to_string();
                } else {
                    qualifier = "in".to_string();
                }
            }
            function.arguments.push(ArgumentFormat {
                qualifier: metadata::Qualifier(metadata::hash(&qualifier)),
                ty: metadata::Type(metadata::hash(&ty.to_str())),
            });
        });

        metadata.functions.push(function);
    });
}

/// Expands functions with default arguments into an overload cascade, one
/// overload per trailing default forwarding to the fully specified call.
///
/// Expects formatted input with function bodies followed by a newline.
pub fn lower_function_default_arguments(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_function(|f| {
            if !f.args.contains_token(b'=') {
                return;
            }

            let fn_type = f.return_type.to_str();
            let fn_name = f.name.to_str();
            let has_non_void_return_type = fn_type != "void";
            let data = f.return_type.data_ref();

            let mut args_decl = String::new();
            let mut args_names = String::new();
            let mut overloads: Vec<String> = Vec::new();

            f.args.foreach_scope(scope_kind::FUNCTION_ARG, |arg| {
                let equal = arg.find_token(b'=');
                let comma = if args_decl.is_empty() { "" } else { ", " };
                if equal.is_invalid() {
                    args_decl.push_str(comma);
                    args_decl.push_str(&arg.str_with_whitespace());
                    args_names.push_str(comma);
                    args_names.push_str(arg.back().str_view());
                } else {
                    let arg_name = equal.prev().to_str();
                    let value = &data.src
                        [equal.next().str_index_start()..=arg.back().str_index_last()];
                    let decl =
                        &data.src[arg.front().str_index_start()..=equal.prev().str_index_last()];

                    let mut call = format!("{fn_name}({args_names}{comma}{value});");
                    if has_non_void_return_type {
                        call = format!("return {call}");
                    }
                    let const_suffix = if f.is_const { " const" } else { "" };
                    let overload = format!(
                        "{fn_type} {fn_name}({args_decl}){const_suffix}\n{{\n#line {}\n  {call}\n}}\n",
                        f.return_type.line_number()
                    );
                    overloads.push(overload);

                    args_decl.push_str(comma);
                    args_decl.push_str(strip_whitespace(decl));
                    args_names.push_str(comma);
                    args_names.push_str(&arg_name);
                    // Erase the value assignment, keep the declaration.
                    edits.erase_scope(equal.scope());
                }
            });

            let end_of_fn = f.body.back().line_end() + 1;
            // Declaration order has to be reversed: each overload calls the
            // next more-specified one.
            for overload in overloads.iter().rev() {
                edits.insert_line_number_pos(end_of_fn, f.return_type.line_number());
                edits.insert_after_pos(end_of_fn, overload.clone());
            }
            edits.insert_line_number_pos(end_of_fn, f.body.back().line_number() + 1);
        });
    }
    form.apply_mutations(reporter);
}

/// `return {1, 2};` becomes an explicitly typed initializer.
pub fn lower_implicit_return_types(form: &mut IntermediateForm) {
    let (root, edits) = form.parts();
    root.foreach_function(|f| {
        let fn_type = f.return_type.to_str();
        f.body.foreach_match("rA?{..};", |m| {
            let list = m[3].scope();
            if list.front().next() == b'.' {
                // `return {.a = 1};` > `{T _tmp = T{.a = 1}; return _tmp;}`
                // This form supports designated initializers.
                edits.insert_before(m[0], format!("{{{fn_type} _tmp = {fn_type}{}; ", list.to_str()));
                edits.replace_scope(list, "_tmp;}");
            } else if m[1].is_invalid() {
                // Regular initializer list. Keep it simple.
                edits.insert_after(m[0], fn_type.clone());
            }
        });
    });
}

/// `int a{1};` becomes `int a = int{1};`.
pub fn lower_initializer_implicit_types(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        let mut process = |scope: Scope<'_>| {
            /* Auto insert equal. */
            scope.foreach_match("AA{..}", |m| {
                edits.insert_before(m[2], format!(" = {}", m[0].str_view()));
            });
            /* Auto insert type. */
            scope.foreach_match("AA={..}", |m| {
                edits.insert_before(m[3], m[0].to_str());
            });
        };
        root.foreach_scope(scope_kind::FUNCTION_ARG, &mut process);
        root.foreach_scope(scope_kind::FUNCTION, &mut process);
    }
    form.apply_mutations(reporter);
}

/// `T a = {.x = 1};` becomes `T a; a.x = 1;`.
pub fn lower_designated_initializers(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("A{.A=", |m| {
            if m[0].prev() != b'=' || m[0].prev().prev() != TokenType::WORD {
                report_tok(reporter, m[0], "Designated initializers are only supported in assignments");
                return;
            }
            // Lint for nested aggregates.
            let nested_end = m[0].scope().find_token(b'}');
            if nested_end.is_valid() && nested_end != m[3] {
                let nested_start = nested_end.scope().front();
                if nested_start.prev() != TokenType::WORD {
                    report_tok(reporter, nested_start, "Nested anonymous aggregate is not supported");
                    return;
                }
            }
            let assign_tok = m[0].prev();
            let var = m[0].prev().prev();
            let aggregate = m[2].scope();

            edits.insert_before(assign_tok, ";");
            edits.erase_tokens(assign_tok, m[1]);
            aggregate.foreach_match(".A=", |d| {
                if d[0].scope() != aggregate {
                    report_tok(reporter, d[0], "Nested initializer lists are not supported");
                    return;
                }
                edits.insert_before(d[0], var.str_view());
                let value_end = d[2].scope().back();
                edits.insert_after(value_end, ";");
                if value_end.next() == b',' {
                    edits.erase_token(value_end.next());
                }
            });
            edits.erase_tokens(aggregate.back(), aggregate.back().next());
        });
    }
    form.apply_mutations(reporter);
}

/// Full aggregate initializers become constructor calls for the target
/// language: `T{a, b}` becomes `T_ctor(a, b _rotc())`-style macro forms,
/// and empty braces call the generated default constructor.
pub fn lower_aggregate_initializers(form: &mut IntermediateForm, reporter: &Reporter) {
    loop {
        {
            let (root, edits) = form.parts();
            root.foreach_match("A{..}", |m| {
                if m[0].prev() == TokenType::STRUCT {
                    return;
                }
                if AGGREGATE_BUILTIN_TYPES.contains(m[0].str_view()) {
                    report_tok(
                        reporter,
                        m[0],
                        "Aggregate is error prone for built-in vector and matrix types, use \
                         constructors instead",
                    );
                }
                if m[1].scope().token_count() == 2 {
                    /* Call the generated default constructor. */
                    edits.insert_after(m[0], "_ctor_");
                    edits.replace_tokens(m[1], m[4], "()");
                    return;
                }
                // Lint for nested aggregates.
                let nested_end = m[1].scope().find_token(b'}');
                if nested_end.is_valid() && nested_end != m[4] {
                    let nested_start = nested_end.scope().front();
                    if nested_start.prev() != TokenType::WORD {
                        report_tok(reporter, nested_start, "Nested anonymous aggregate is not supported");
                    }
                }
                edits.insert_before(m[0], "_ctor(");
                edits.insert_before(m[1], ")");
                edits.erase_token(m[1]);
                if m[4].prev() == b',' {
                    edits.erase_token(m[4].prev());
                }
                edits.insert_before(m[4], " _rotc()");
                edits.erase_token(m[4]);
            });
        }
        if !form.apply_mutations(reporter) {
            break;
        }
    }
}

/// Auto detects array lengths and lowers initializer lists to the
/// compatibility macros: `T a[] = {x, y};` becomes
/// `T a[2] = ARRAY_T(T) ARRAY_V(x, y);`.
pub fn lower_array_initializations(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("AA[..]={..};", |m| {
            let type_tok = m[0];
            let name_tok = m[1];
            let array_scope = m[2].scope();
            let list_scope = m[7].scope();

            /* Auto array size. */
            let array_token_count = array_scope.token_count();
            if array_token_count == 2 {
                let mut comma_count = 0usize;
                list_scope.foreach_token(b',', |t| {
                    if t.scope() == list_scope {
                        comma_count += 1;
                    }
                });
                let list_len = if comma_count > 0 { comma_count + 1 } else { 0 };
                if list_len == 0 {
                    report_tok(reporter, name_tok, "Array size must be greater than zero.");
                }
                edits.insert_after(array_scope.get(0), list_len.to_string());
            } else if array_token_count == 3 && array_scope.get(1) == TokenType::NUMBER {
                if static_array_size(array_scope, 0, reporter) == 0 {
                    report_tok(reporter, name_tok, "Array size must be greater than zero.");
                }
            }

            /* Lint nested initializer lists. */
            list_scope.foreach_token(b'{', |tok| {
                if tok != list_scope.front() {
                    report_tok(reporter, name_tok, "Nested initializer list is not supported.");
                }
            });

            /* Mutation to compatible syntax. */
            edits.insert_before(
                list_scope.front(),
                format!("ARRAY_T({}) ARRAY_V(", type_tok.str_view()),
            );
            edits.insert_after(list_scope.back(), ")");
            edits.erase_token(list_scope.front());
            edits.erase_token(list_scope.back());
            if list_scope.back().prev() == b',' {
                edits.erase_token(list_scope.back().prev());
            }
        });
    }
    form.apply_mutations(reporter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bslc_parser::ParseMode;

    fn form(src: &str) -> IntermediateForm {
        let reporter = Reporter::sink();
        IntermediateForm::new(src, ParseMode::Full, &reporter)
    }

    #[test]
    fn default_arguments_expand_to_overloads() {
        let reporter = Reporter::sink();
        let mut form = form("float fn(float a, float b = 1.0f)\n{\n  return a + b;\n}\n");
        lower_function_default_arguments(&mut form, &reporter);
        let out = form.str();
        // The default value is erased from the original signature.
        let signature_end = out.find(')').unwrap();
        assert!(!out[..signature_end].contains("= 1.0f"), "{out:?}");
        // An overload forwarding the default exists.
        assert!(out.contains("float fn(float a)"), "{out:?}");
        assert!(out.contains("return fn(a, 1.0f);"), "{out:?}");
    }

    #[test]
    fn two_defaults_expand_to_two_overloads() {
        let reporter = Reporter::sink();
        let mut form = form("void fn(int a, int b = 1, int c = 2)\n{\n  use(a, b, c);\n}\n");
        lower_function_default_arguments(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("void fn(int a, int b)"), "{out:?}");
        assert!(out.contains("void fn(int a)"), "{out:?}");
        assert!(out.contains("fn(a, 1);"), "{out:?}");
        assert!(out.contains("fn(a, b, 2);"), "{out:?}");
    }

    #[test]
    fn node_function_format_is_recorded() {
        let reporter = Reporter::sink();
        let form = form(
            "[[node]] void node_mix(const float fac, float3 a, float3 &result)\n{\n  result = a;\n}\n",
        );
        let mut metadata = Source::default();
        parse_library_functions(&form, &mut metadata, &reporter);
        assert_eq!(metadata.functions.len(), 1);
        assert_eq!(metadata.functions[0].name, "node_mix");
        assert_eq!(metadata.functions[0].arguments.len(), 3);
        assert_eq!(
            metadata.functions[0].arguments[2].qualifier,
            metadata::Qualifier(metadata::hash("out"))
        );
    }

    #[test]
    fn implicit_return_type_is_added() {
        let mut form = form("Foo fn()\n{\n  return {1, 2};\n}\n");
        lower_implicit_return_types(&mut form);
        let reporter = Reporter::sink();
        form.apply_mutations(&reporter);
        assert!(form.str().contains("return Foo{1, 2};"), "{:?}", form.str());
    }

    #[test]
    fn initializer_gets_explicit_type() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  Foo a = {1};\n}\n");
        lower_initializer_implicit_types(&mut form, &reporter);
        assert!(form.str().contains("= Foo{1};"), "{:?}", form.str());
    }

    #[test]
    fn designated_initializer_expands_to_assignments() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  v = Foo{.a = 1, .b = 2};\n}\n");
        lower_designated_initializers(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("v.a = 1;"), "{out:?}");
        assert!(out.contains("v.b = 2;"), "{out:?}");
        assert_eq!(reporter.error_count(), 0, "{out:?}");
    }

    #[test]
    fn empty_aggregate_calls_default_ctor() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  a = Foo{};\n}\n");
        lower_aggregate_initializers(&mut form, &reporter);
        assert!(form.str().contains("Foo_ctor_()"), "{:?}", form.str());
    }

    #[test]
    fn builtin_aggregate_is_reported() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  a = float3{1, 2, 3};\n}\n");
        lower_aggregate_initializers(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn array_initialization_with_auto_length() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  float w[] = {1.0f, 2.0f};\n}\n");
        lower_array_initializations(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("float w[2]"), "{out:?}");
        assert!(out.contains("ARRAY_T(float) ARRAY_V("), "{out:?}");
        assert_eq!(reporter.error_count(), 0, "{out:?}");
    }

    #[test]
    fn static_array_size_parses_literal() {
        let reporter = Reporter::sink();
        let form = form("void fn()\n{\n  a[4] = 1;\n}\n");
        let mut size = 0;
        form.root().foreach_scope(scope_kind::FUNCTION, |f| {
            f.foreach_match("A[..]", |m| {
                size = static_array_size(m[1].scope(), -1, &reporter);
            });
        });
        assert_eq!(size, 4);
    }
}
