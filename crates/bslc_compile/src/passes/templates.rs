//! Template lowering by textual instantiation.
//!
//! Template argument lists become mangled name suffixes
//! (`func<float, 1>` becomes `funcTfloatT1`), full specializations drop
//! their prefix, and each explicit instantiation clones the declaration
//! with parameter names substituted by the argument text.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm, ParseMode, Scope, Token};

use super::report_tok;

/// `<float, 1>` becomes `TfloatT1`.
pub fn template_arguments_mangle(template_args: Scope<'_>) -> String {
    let mut out = String::new();
    template_args.foreach_scope(scope_kind::TEMPLATE_ARG, |arg| {
        out.push('T');
        out.push_str(&arg.to_str());
    });
    out
}

/// Erases the `.template` / `->template` disambiguator, unnecessary with
/// the project code style: `x.template foo<int>()` becomes `x.foo<int>()`.
pub fn lower_template_dependent_names(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("tA<..>", |m| {
            if m[0].prev() == b'.' || m[0].prev() == TokenType::DEREF {
                edits.erase_token(m[0]);
            }
        });
    }
    form.apply_mutations(reporter);
}

struct TemplateParameters {
    names: Vec<String>,
    all_in_function_signature: bool,
}

fn parse_template_definition(
    arg: Scope<'_>,
    parameters: &mut TemplateParameters,
    fn_args: Scope<'_>,
    reporter: &Reporter,
) {
    let ty = arg.front();
    let name = if ty.str_view() == "enum" { ty.next().next() } else { ty.next() };
    let name_str = name.to_str();
    let type_str = ty.to_str();

    parameters.names.push(name_str.clone());

    if arg.contains_token(b'=') {
        report_tok(reporter, arg.front(), "Default arguments are not supported inside template declaration");
    }

    match type_str.as_str() {
        "typename" => {
            // The template argument deduces from the signature when its
            // type-name appears in the argument list.
            let mut found = false;
            fn_args.foreach_match("AA", |m| {
                if m[0].str_view() == name_str {
                    found = true;
                }
            });
            parameters.all_in_function_signature &= found;
        }
        "enum" | "bool" | "int" | "uint" | "char" | "uchar" | "short" | "ushort" => {
            /* Values cannot be resolved using type deduction. */
            parameters.all_in_function_signature = false;
        }
        _ => report_tok(reporter, ty, "Invalid template argument type"),
    }
}

#[allow(clippy::too_many_arguments)]
fn lower_template_instantiation(
    edits: &mut bslc_parser::Edits,
    m: &[Token<'_>],
    parent_scope: Scope<'_>,
    fn_start: Token<'_>,
    fn_name: Token<'_>,
    parameters: &TemplateParameters,
    fn_decl: &str,
    reporter: &Reporter,
) {
    if m[2].scope() != parent_scope
        || fn_name.str_view() != m[2].str_view()
        || m[2].str_index_start() < fn_name.str_index_start()
    {
        return;
    }

    let inst_args = m[3].scope();
    let inst_start = m[0];
    let inst_end = m[0].find_next(b';');

    /* Parse template values. */
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut count = 0usize;
    inst_args.foreach_scope(scope_kind::TEMPLATE_ARG, |arg| {
        if count < parameters.names.len() {
            pairs.push((parameters.names[count].clone(), arg.to_str()));
        }
        count += 1;
    });
    if count != parameters.names.len() {
        report_tok(reporter, m[3], "Invalid amount of argument in template instantiation.");
    }

    /* Specialize the template content in a throwaway form. */
    let reporter_sink = Reporter::sink();
    let mut instance = IntermediateForm::new(fn_decl, ParseMode::Full, &reporter_sink);
    {
        let (root, instance_edits) = instance.parts();
        root.foreach_token(TokenType::WORD.0, |word| {
            for (name, value) in &pairs {
                if word.str_view() == name {
                    instance_edits.replace_token_keep_whitespace(word, value.clone());
                }
            }
        });

        if !parameters.all_in_function_signature {
            // Append the mangled arguments after the function name:
            // `void func() {}` becomes `void funcTa(...)`.
            if let Some(pos) = fn_decl.find(&format!(" {}", fn_name.str_view())) {
                instance_edits.insert_after_pos(
                    pos + fn_name.str_view().len(),
                    template_arguments_mangle(inst_args),
                );
            }
        }
    }
    let instance = instance.into_result();

    /* Paste the template content in place of the instantiation. */
    edits.erase_tokens(inst_start, inst_end);
    edits.insert_line_number(inst_end, fn_start.line_number());
    edits.insert_after(inst_end, instance);
    edits.insert_line_number(inst_end, inst_end.line_number_at(true));
}

/// Lowers template definitions and instantiations by copy-pasting with
/// argument substitution.
pub fn lower_templates(form: &mut IntermediateForm, reporter: &Reporter) {
    /* Process templated function calls first to avoid matching them later. */
    {
        let (root, edits) = form.parts();
        root.foreach_match("A<..>(..)", |m| {
            let template_args = m[1].scope();
            template_args.foreach_match("A<..>", |inner| {
                edits.replace_scope(inner[1].scope(), template_arguments_mangle(inner[1].scope()));
            });
        });
    }
    form.apply_mutations(reporter);

    /* Then full specializations. */
    {
        let (root, edits) = form.parts();
        let mut process_specialization = |start: Token<'_>, template_args: Scope<'_>| {
            edits.erase_tokens(start, start.next().next());
            edits.replace_scope(template_args, template_arguments_mangle(template_args));
        };
        /* Replace full specializations by simple functions. */
        root.foreach_match("t<>AA<", |m| {
            process_specialization(m[0], m[5].scope());
        });
        /* Replace full specializations by simple structs. */
        root.foreach_match("t<>sA<..>", |m| {
            process_specialization(m[0], m[5].scope());
        });
    }
    form.apply_mutations(reporter);

    /* Templated structs. */
    {
        let (root, edits) = form.parts();
        let mut process_template_struct = |template_scope: Scope<'_>| {
            let struct_start = template_scope.back().next();
            if struct_start != TokenType::STRUCT {
                return;
            }
            let struct_name = struct_start.next();
            let struct_body = struct_name.next().scope();

            let struct_end = struct_body.back().next();
            let data = struct_start.data_ref();
            let struct_decl = data.src
                [struct_start.str_index_start()..=struct_end.str_index_last()]
                .to_string();

            let mut parameters = TemplateParameters {
                names: Vec::new(),
                all_in_function_signature: false,
            };
            template_scope.foreach_scope(scope_kind::TEMPLATE_ARG, |arg| {
                parse_template_definition(arg, &mut parameters, Scope::invalid(data), reporter);
            });
            parameters.all_in_function_signature = false;

            /* Remove the declaration. */
            let template_keyword = template_scope.front().prev();
            edits.erase_tokens(template_keyword, struct_end);

            /* Replace instantiations. */
            let parent_scope = template_scope.parent();
            parent_scope.foreach_match("tsA<", |m| {
                lower_template_instantiation(
                    edits,
                    &[m[0], m[1], m[2], m[3]],
                    parent_scope,
                    struct_start,
                    struct_name,
                    &parameters,
                    &struct_decl,
                    reporter,
                );
            });
        };

        root.foreach_scope(scope_kind::TEMPLATE, &mut process_template_struct);
        root.foreach_scope(scope_kind::NAMESPACE, |ns| {
            ns.foreach_scope(scope_kind::TEMPLATE, &mut process_template_struct);
        });
    }
    form.apply_mutations(reporter);

    /* Templated functions. */
    {
        let (root, edits) = form.parts();
        root.foreach_match("t<..>AA(..)c?{..}", |m| {
            let fn_start = m[5];
            let fn_name = m[6];
            let fn_args = m[7].scope();
            let template_scope = m[1].scope();
            let fn_end = m[16];

            let mut error = false;
            template_scope.foreach_match("=", |eq| {
                report_tok(reporter, eq[0], "Default arguments are not supported inside template declaration");
                error = true;
            });
            if error {
                return;
            }

            let mut parameters = TemplateParameters {
                names: Vec::new(),
                all_in_function_signature: true,
            };
            template_scope.foreach_scope(scope_kind::TEMPLATE_ARG, |arg| {
                parse_template_definition(arg, &mut parameters, fn_args, reporter);
            });

            let data = fn_start.data_ref();
            let fn_decl =
                data.src[fn_start.str_index_start()..=fn_end.str_index_last()].to_string();

            /* Remove the declaration. */
            let template_keyword = template_scope.front().prev();
            edits.erase_tokens(template_keyword, fn_end);

            /* Replace instantiations. */
            let parent_scope = template_scope.parent();
            parent_scope.foreach_match("tAA<", |inst| {
                lower_template_instantiation(
                    edits,
                    &[inst[0], inst[1], inst[2], inst[3]],
                    parent_scope,
                    fn_start,
                    fn_name,
                    &parameters,
                    &fn_decl,
                    reporter,
                );
            });
        });
    }
    form.apply_mutations(reporter);

    /* Report declarations and instantiations left unprocessed. */
    form.root().foreach_token(TokenType::TEMPLATE.0, |tok| {
        if tok.next() == b'<' {
            report_tok(reporter, tok, "Template declaration unsupported syntax");
        } else {
            report_tok(reporter, tok, "Template instantiation unsupported syntax");
        }
    });

    /* Process calls to templated types or functions. */
    {
        let (root, edits) = form.parts();
        root.foreach_match("A<..>", |m| {
            edits.replace_scope(m[1].scope(), template_arguments_mangle(m[1].scope()));
        });
    }
    form.apply_mutations(reporter);
}
