//! Struct and method lowering: classes, members, method definitions and
//! calls, plus the small keyword cleanups.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm, Token};

use super::report_tok;
use crate::passes::functions::static_array_size;

/// Prefix added to member functions so they cannot clash with locals.
pub const METHOD_CALL_PREFIX: &str = "_";
/// Namespace separators collapse to this (`__` upsets some compilers).
pub const NAMESPACE_SEPARATOR: &str = "_";

static BUILTIN_TYPES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "bool32_t",
        "float2",
        "packed_float2",
        "float3",
        "packed_float3",
        "float4",
        "packed_float4",
        "float2x2",
        "float2x3",
        "float2x4",
        "float3x2",
        "float3x3",
        "float3x4",
        "float4x2",
        "float4x3",
        "float4x4",
        "int2",
        "int3",
        "packed_int3",
        "int4",
        "uint2",
        "uint3",
        "packed_uint3",
        "uint4",
        "bool2",
        "bool3",
        "bool4",
    ]
    .into_iter()
    .collect()
});

/// `class` becomes `struct` (except in `enum class`).
pub fn lower_classes(form: &mut IntermediateForm) {
    let (root, edits) = form.parts();
    root.foreach_token(TokenType::CLASS.0, |tok| {
        if tok.prev() != TokenType::ENUM {
            edits.replace_token(tok, "struct ");
        }
    });
}

/// Removes keywords with no meaning for the target language: `inline`,
/// non-member `static`, and access specifiers.
pub fn lower_noop_keywords(form: &mut IntermediateForm, reporter: &Reporter) {
    let (root, edits) = form.parts();
    root.foreach_token(TokenType::INLINE.0, |tok| edits.erase_token(tok));
    root.foreach_token(TokenType::STATIC.0, |tok| {
        let kind = tok.scope().kind();
        if kind != scope_kind::STRUCT && kind != scope_kind::PREPROCESSOR {
            edits.erase_token(tok);
        }
    });

    let mut process_access = |tok: Token<'_>| {
        if tok.next() == b':' {
            edits.erase_tokens(tok, tok.next());
        } else {
            report_tok(reporter, tok, "Expecting colon ':' after access specifier");
        }
    };
    root.foreach_token(TokenType::PRIVATE.0, &mut process_access);
    root.foreach_token(TokenType::PUBLIC.0, &mut process_access);
}

/// `,}` becomes `}`.
pub fn lower_trailing_comma_in_list(form: &mut IntermediateForm) {
    let (root, edits) = form.parts();
    root.foreach_match(",}", |m| edits.erase_token(m[0]));
}

/// Expands comma separated member declarations:
/// `int a, b;` becomes `int a; int b;`.
pub fn lower_comma_separated_declarations(form: &mut IntermediateForm) {
    let (root, edits) = form.parts();

    let mut process = |m: &[Token<'_>]| {
        if m[0].scope().kind() != scope_kind::STRUCT {
            return;
        }
        let ty = m[0].to_str();
        let mut comma = m[2];
        while comma == b',' || comma == b'[' {
            if comma == b'[' {
                comma = comma.scope().back().next();
                continue;
            }
            edits.replace_token_keep_whitespace(comma, format!(";{ty}"));
            comma = comma.next().next();
        }
    };

    root.foreach_match("AA,", |m| process(m));
    root.foreach_match("AA[..],", |m| process(m));
}

/// Changes C++ swizzle accessor calls into plain swizzles, keeping the
/// character count: `.xyz()` becomes `.xyz  `.
pub fn lower_swizzle_methods(form: &mut IntermediateForm) {
    let (root, edits) = form.parts();
    root.foreach_match(".A()", |m| {
        let method = m[1].str_view();
        let is_swizzle = method.len() > 1
            && method.len() <= 4
            && (method.bytes().all(|b| b"xyzw".contains(&b))
                || method.bytes().all(|b| b"rgba".contains(&b)));
        if is_swizzle {
            edits.erase_tokens(m[2], m[3]);
        }
    });
}

/// Constructors are not supported inside structs.
pub fn lint_constructors(form: &IntermediateForm, reporter: &Reporter) {
    form.root().foreach_struct(|st| {
        let name = st.name.to_str();
        st.body.foreach_match("A(..)", |m| {
            if m[0].scope() != st.body {
                return;
            }
            if m[0].str_view() == name {
                report_tok(reporter, m[0], "Constructors are not supported.");
            }
        });
    });
}

/// Forward declarations make no sense without pointers.
pub fn lint_forward_declared_structs(form: &IntermediateForm, reporter: &Reporter) {
    form.root().foreach_match("sA;", |m| {
        if m[0].scope().kind() == scope_kind::GLOBAL {
            report_tok(reporter, m[0], "Forward declaration of types are not supported.");
        }
    });
}

fn default_value(ty: &str) -> String {
    match ty {
        "float" => "0.0f".to_string(),
        "uint" | "uchar" => "0u".to_string(),
        "int" | "char" => "0".to_string(),
        "bool" => "false".to_string(),
        _ if BUILTIN_TYPES.contains(ty) => format!("{ty}(0)"),
        _ => format!("{ty}{{}}"),
    }
}

/// Synthesizes a `ctor_()` zero-initializer for every non-host-shared
/// struct, using the per-type zero-literal table.
pub fn lower_default_constructors(form: &mut IntermediateForm, reporter: &Reporter) {
    let (root, edits) = form.parts();
    root.foreach_struct(|st| {
        // Host shared structures describe CPU-side layout; skip them.
        if st.attributes.is_valid() {
            return;
        }

        let mut decl_count = 0usize;
        let mut decl = String::new();
        st.body.foreach_declaration(|d| {
            let ty = d.var_type.to_str();
            let name = d.name.to_str();
            if d.array.is_valid() {
                let array_len = static_array_size(d.array, 0, reporter);
                if array_len == 0 {
                    decl.push_str(&format!(
                        "for(int i=0;i < {};i++){{r.{name}[i]={};}}",
                        d.array.str_exclusive(),
                        default_value(&ty)
                    ));
                } else {
                    for i in 0..array_len {
                        decl.push_str(&format!("r.{name}[{i}]={};", default_value(&ty)));
                    }
                }
            } else {
                // Assign members one by one, the declaration iterator can
                // visit them out of order.
                decl.push_str(&format!("r.{name}={};", default_value(&ty)));
            }
            decl_count += 1;
        });

        if decl_count == 0 {
            // Empty structs carry a padding int.
            decl.push_str("r._pad=0;");
        }

        let name = st.name.to_str();
        let ctor = format!("static {name} ctor_() {{{name} r;{decl}return r;}}");
        edits.insert_after_pos(st.body.front().str_index_last_no_whitespace(), ctor);
    });
}

/// Prefixes unqualified member and method references inside method bodies
/// with `this->`, checking for member shadowing.
pub fn lower_implicit_member(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            let mut member_names: Vec<String> = Vec::new();
            let mut method_names: Vec<String> = Vec::new();

            st.body.foreach_declaration(|d| {
                if d.name.scope() == st.body {
                    member_names.push(d.name.to_str());
                }
            });

            st.body.foreach_function(|f| {
                if f.is_static {
                    return;
                }
                let check_shadowing = |m: &[Token<'_>]| {
                    if member_names.iter().any(|n| n == m[1].str_view()) {
                        report_tok(reporter, m[1], "Class member shadowing.");
                    }
                };
                f.args.foreach_match("AA", |m| check_shadowing(m));
                f.args.foreach_match("&A", |m| check_shadowing(m));
                f.body.foreach_match("AA", |m| check_shadowing(m));
                f.body.foreach_match("&A", |m| check_shadowing(m));
                method_names.push(f.name.to_str());
            });

            st.body.foreach_function(|f| {
                if f.is_static {
                    return;
                }
                f.body.foreach_token(TokenType::WORD.0, |tok| {
                    // Reject dereferences, member accesses and namespace
                    // qualified symbols.
                    if tok.prev() == TokenType::DEREF
                        || tok.prev() == b'.'
                        || (tok.prev() == b':' && tok.prev().str_view() == "::")
                    {
                        return;
                    }
                    let known = if tok.next() == b'(' {
                        method_names.iter().any(|n| n == tok.str_view())
                    } else {
                        member_names.iter().any(|n| n == tok.str_view())
                    };
                    if known {
                        edits.insert_before(tok, "this->");
                    }
                });
            });
        });
    }
    form.apply_mutations(reporter);
}

/// Marks methods with a `this` parameter, renames them, and moves the
/// definitions out of the struct scope.
pub fn lower_method_definitions(form: &mut IntermediateForm, reporter: &Reporter) {
    // NOTE: avoid `a * this->b` being read as two dereferences.
    {
        let (root, edits) = form.parts();
        /* `(*this)` -> `(this_)` */
        root.foreach_match("*T)", |m| edits.replace_tokens(m[0], m[1], "this_"));
        /* `return *this;` -> `return this_;` */
        root.foreach_match("*T;", |m| edits.replace_tokens(m[0], m[1], "this_"));
        /* `this->` -> `this_.` */
        root.foreach_match("TR", |m| edits.replace_tokens(m[0], m[1], "this_."));
    }
    form.apply_mutations(reporter);

    {
        let root = form.root();
        root.foreach_match("sA:", |m| {
            if m[2].str_view() == ":" {
                report_tok(reporter, m[2], "class inheritance is not supported");
            }
        });
        root.foreach_match("cAA(..)c?{..}", |m| {
            if m[0].prev() == TokenType::CONST {
                report_tok(
                    reporter,
                    m[0],
                    "function return type is marked `const` but it makes no sense for values and \
                     returning reference is not supported",
                );
            }
        });
    }

    // Add the `this` parameter and fold static methods into plain
    // functions.
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            let attributes = st.struct_tok.prev().scope();
            let is_resource_table = attributes.kind() == scope_kind::SUBSCRIPT
                && attributes.to_str() == "[[resource_table]]";

            if is_resource_table {
                edits.replace_scope(attributes, "");
            }

            let struct_name = st.name.to_str();
            st.body.foreach_function(|f| {
                let static_tok = if f.is_static {
                    f.return_type.prev()
                } else {
                    Token::invalid(f.return_type.data_ref())
                };
                let const_tok = if f.is_const {
                    f.args.back().next()
                } else {
                    Token::invalid(f.return_type.data_ref())
                };

                let fn_name = f.name.to_str();
                if fn_name.starts_with('_') {
                    report_tok(reporter, f.name, "function name starting with an underscore are reserved");
                }

                if f.is_static {
                    edits.replace_token(f.name, format!("{struct_name}{NAMESPACE_SEPARATOR}{fn_name}"));
                    // The static keyword conflicts with the member access
                    // wrappers on some backends.
                    edits.erase_token(static_tok);
                } else {
                    let has_no_args = f.args.token_count() == 2;
                    let suffix = if has_no_args { "" } else { ", " };
                    let prefix = if is_resource_table { "[[resource_table]] " } else { "" };

                    edits.insert_before(f.name, METHOD_CALL_PREFIX);

                    edits.erase_token(const_tok);
                    if f.is_const && !is_resource_table {
                        edits.insert_after(
                            f.args.front(),
                            format!("{prefix}const {struct_name} this_{suffix}"),
                        );
                    } else {
                        edits.insert_after(
                            f.args.front(),
                            format!("{prefix}{struct_name} &this_{suffix}"),
                        );
                    }

                    let is_swizzle = fn_name.len() > 1
                        && (fn_name.bytes().all(|b| b"xyzw".contains(&b))
                            || fn_name.bytes().all(|b| b"rgba".contains(&b)));
                    if is_swizzle {
                        report_tok(reporter, f.name, "Method name matching swizzles accessor are forbidden.");
                    }
                }
            });
        });
    }
    form.apply_mutations(reporter);

    // Copy method functions outside of the struct scope.
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            let struct_end = st.body.back().next();

            let mut method_len = 0usize;
            st.body.foreach_function(|_| method_len += 1);
            if method_len == 0 {
                // Avoid unnecessary preprocessor directives.
                return;
            }

            // Prototypes allow arbitrary definition order inside a class.
            // Skipped when there is only one method.
            if method_len > 1 {
                edits.insert_after(struct_end, "\n#ifndef GPU_METAL\n");
                st.body.foreach_function(|f| {
                    let fn_start = if f.is_static { f.return_type.prev() } else { f.return_type };
                    let data = f.return_type.data_ref();
                    let proto = &data.src
                        [fn_start.str_index_start()..=f.args.back().str_index_last()];
                    let proto = format!("{};\n", super::cleanup::strip_whitespace(proto));
                    edits.insert_after(struct_end, proto);
                });
                edits.insert_after(struct_end, "#endif\n");
            }

            st.body.foreach_function(|f| {
                let fn_start = if f.is_static { f.return_type.prev() } else { f.return_type };
                let data = f.return_type.data_ref();
                let fn_str =
                    &data.src[fn_start.str_index_start()..=f.body.back().str_index_last()];
                let fn_str = format!("{}{}\n", " ".repeat(fn_start.char_number()), fn_str);

                edits.erase_tokens(fn_start, f.body.back());
                edits.insert_line_number(struct_end, fn_start.line_number());
                edits.insert_after(struct_end, fn_str);
            });

            edits.insert_line_number(struct_end, struct_end.line_number_at(true));
        });
    }
    form.apply_mutations(reporter);
}

/// Rewrites `a.fn(b)` into `_fn(a, b)`, walking back across member,
/// subscript and call chains to find the receiver root.
pub fn lower_method_calls(form: &mut IntermediateForm, reporter: &Reporter) {
    loop {
        {
            let (root, edits) = form.parts();
            root.foreach_scope(scope_kind::FUNCTION, |scope| {
                scope.foreach_match(".A(", |m| {
                    let dot = m[0];
                    let func = m[1];
                    let par_open = m[2];
                    let end_of_this = dot.prev();
                    let mut start_of_this = end_of_this;
                    loop {
                        if start_of_this == b')' {
                            // Function call. Take the argument scope and
                            // function name. No recursion.
                            start_of_this = start_of_this.scope().front().prev();
                            break;
                        }
                        if start_of_this == b']' {
                            // Array subscript. Take the scope and continue.
                            start_of_this = start_of_this.scope().front().prev();
                            continue;
                        }
                        if start_of_this == TokenType::WORD {
                            if start_of_this.prev() == b'.' {
                                // Member: continue to the chain root.
                                start_of_this = start_of_this.prev().prev();
                                continue;
                            }
                            break;
                        }
                        report_tok(reporter, start_of_this, "lower_method_call parsing error");
                        break;
                    }
                    let data = dot.data_ref();
                    let this_str = &data.src
                        [start_of_this.str_index_start()..=end_of_this.str_index_last()];
                    let func_str = format!("{METHOD_CALL_PREFIX}{}", func.str_view());
                    let has_no_arg = par_open.next() == b')';
                    /* `a.fn(b)` -> `_fn(a, b)` */
                    edits.replace_range_try(
                        start_of_this.str_index_start(),
                        par_open.str_index_last(),
                        format!("{func_str}({this_str}{}", if has_no_arg { "" } else { ", " }),
                    );
                });
            });
        }
        if !form.apply_mutations(reporter) {
            break;
        }
    }
}

/// Adds a padding member to empty structs (useful for templating).
pub fn lower_empty_struct(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("sA{};", |m| {
            edits.insert_after(m[2], "int _pad;");
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

    fn apply(form: &mut IntermediateForm) {
        let reporter = Reporter::sink();
        form.apply_mutations(&reporter);
    }

    #[test]
    fn class_becomes_struct() {
        let mut form = form("class Foo {\n  int a;\n};\n");
        lower_classes(&mut form);
        apply(&mut form);
        assert!(form.str().contains("struct "));
        assert!(!form.str().contains("class"));
    }

    #[test]
    fn enum_class_is_preserved() {
        let mut form = form("enum class E : int {\n  A = 0,\n};\n");
        lower_classes(&mut form);
        apply(&mut form);
        assert!(form.str().contains("enum class"));
    }

    #[test]
    fn noop_keywords_are_erased() {
        let reporter = Reporter::sink();
        let mut form = form("inline void fn()\n{\n  static int a = 0;\n}\n");
        lower_noop_keywords(&mut form, &reporter);
        apply(&mut form);
        assert!(!form.str().contains("inline"));
        assert!(!form.str().contains("static"));
    }

    #[test]
    fn struct_static_member_is_kept() {
        let reporter = Reporter::sink();
        let mut form = form("struct S {\n  static int fn()\n  {\n    return 0;\n  }\n};\n");
        lower_noop_keywords(&mut form, &reporter);
        apply(&mut form);
        assert!(form.str().contains("static"));
    }

    #[test]
    fn access_specifiers_are_erased() {
        let reporter = Reporter::sink();
        let mut form = form("struct S {\n public:\n  int a;\n private:\n  int b;\n};\n");
        lower_noop_keywords(&mut form, &reporter);
        apply(&mut form);
        assert!(!form.str().contains("public"));
        assert!(!form.str().contains("private"));
        assert_eq!(reporter.error_count(), 0);
    }

    #[test]
    fn trailing_comma_is_removed() {
        let mut form = form("int a[2] = {1, 2,};\n");
        lower_trailing_comma_in_list(&mut form);
        apply(&mut form);
        assert!(!form.str().contains(",}"), "{:?}", form.str());
    }

    #[test]
    fn comma_declarations_split() {
        let mut form = form("struct S {\n  int a, b;\n};\n");
        lower_comma_separated_declarations(&mut form);
        apply(&mut form);
        assert!(form.str().contains("int a;int b;"), "{:?}", form.str());
    }

    #[test]
    fn swizzle_methods_lose_parens() {
        let mut form = form("void fn()\n{\n  b = a.xyz();\n}\n");
        lower_swizzle_methods(&mut form);
        apply(&mut form);
        assert!(form.str().contains(".xyz  "), "{:?}", form.str());
        assert!(!form.str().contains(".xyz()"));
    }

    #[test]
    fn non_swizzle_methods_are_untouched() {
        let mut form = form("void fn()\n{\n  b = a.length();\n}\n");
        lower_swizzle_methods(&mut form);
        apply(&mut form);
        assert!(form.str().contains(".length()"));
    }

    #[test]
    fn constructor_definition_is_reported() {
        let reporter = Reporter::sink();
        let form = form("struct Foo {\n  Foo(int a)\n  {\n  }\n};\n");
        lint_constructors(&form, &reporter);
        assert_eq!(reporter.error_count(), 1);
    }

    #[test]
    fn forward_declaration_is_reported() {
        let reporter = Reporter::sink();
        let form = form("struct Foo;\n");
        lint_forward_declared_structs(&form, &reporter);
        assert_eq!(reporter.error_count(), 1);
    }

    #[test]
    fn default_constructor_is_synthesized() {
        let reporter = Reporter::sink();
        let mut form = form("struct Foo {\n  float a;\n  uint b;\n  Bar c;\n};\n");
        lower_default_constructors(&mut form, &reporter);
        form.apply_mutations(&reporter);
        let out = form.str();
        assert!(out.contains("static Foo ctor_()"), "{out:?}");
        assert!(out.contains("r.a=0.0f;"), "{out:?}");
        assert!(out.contains("r.b=0u;"), "{out:?}");
        assert!(out.contains("r.c=Bar{};"), "{out:?}");
    }

    #[test]
    fn host_shared_struct_gets_no_constructor() {
        let reporter = Reporter::sink();
        let mut form = form("struct [[host_shared]] Foo {\n  float a;\n};\n");
        lower_default_constructors(&mut form, &reporter);
        form.apply_mutations(&reporter);
        assert!(!form.str().contains("ctor_"));
    }

    #[test]
    fn implicit_members_get_this_prefix() {
        let reporter = Reporter::sink();
        let mut form = form(
            "struct Foo {\n  float a;\n  float get()\n  {\n    return a;\n  }\n};\n",
        );
        lower_implicit_member(&mut form, &reporter);
        assert!(form.str().contains("this->a"), "{:?}", form.str());
    }

    #[test]
    fn member_shadowing_is_reported() {
        let reporter = Reporter::sink();
        let mut form = form(
            "struct Foo {\n  float a;\n  void set(float a)\n  {\n  }\n};\n",
        );
        lower_implicit_member(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn methods_move_out_of_struct() {
        let reporter = Reporter::sink();
        let mut form = form(
            "struct Foo {\n  float a;\n  float get() const\n  {\n    return this_.a;\n  }\n};\n",
        );
        lower_method_definitions(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("float _get(const Foo this_)"), "{out:?}");
        // The body moved after the struct.
        let struct_close = out.find("};").unwrap();
        let method = out.find("_get").unwrap();
        assert!(method > struct_close, "{out:?}");
    }

    #[test]
    fn this_arrow_becomes_this_dot() {
        let reporter = Reporter::sink();
        let mut form = form("struct Foo {\n  float a;\n  float get()\n  {\n    return this->a;\n  }\n};\n");
        lower_method_definitions(&mut form, &reporter);
        assert!(form.str().contains("this_.a"), "{:?}", form.str());
    }

    #[test]
    fn method_calls_become_free_calls() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  a.update(b);\n}\n");
        lower_method_calls(&mut form, &reporter);
        assert!(form.str().contains("_update(a, b)"), "{:?}", form.str());
    }

    #[test]
    fn chained_receiver_is_preserved() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  x.items[3].update(b);\n}\n");
        lower_method_calls(&mut form, &reporter);
        assert!(form.str().contains("_update(x.items[3], b)"), "{:?}", form.str());
    }

    #[test]
    fn no_arg_method_call() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  a.reset();\n}\n");
        lower_method_calls(&mut form, &reporter);
        assert!(form.str().contains("_reset(a)"), "{:?}", form.str());
    }

    #[test]
    fn empty_struct_gets_padding() {
        let reporter = Reporter::sink();
        let mut form = form("struct Empty {};\n");
        lower_empty_struct(&mut form, &reporter);
        assert!(form.str().contains("int _pad;"), "{:?}", form.str());
    }
}
