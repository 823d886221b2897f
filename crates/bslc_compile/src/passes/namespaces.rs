//! Namespace lowering: symbol harvesting, `using` directives, namespace
//! prefixing and `::` collapsing.

use rustc_hash::FxHashSet;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm, Scope, Token};

use super::report_tok;
use super::structs::NAMESPACE_SEPARATOR;
use crate::metadata::{Source, Symbol};
use crate::passes::templates::template_arguments_mangle;

fn process_symbol(
    metadata: &mut Source,
    ns_scope: Scope<'_>,
    name: Token<'_>,
    identifier: String,
    line: usize,
    is_method: bool,
) {
    if name.scope() != ns_scope {
        return;
    }
    let mut prefix = String::new();
    let mut scope = ns_scope;
    while scope.kind() == scope_kind::NAMESPACE || scope.kind() == scope_kind::STRUCT {
        prefix = format!("{}::{}", scope.front().prev().full_symbol_name(), prefix);
        scope = scope.parent();
    }
    metadata.symbol_table.push(Symbol {
        name_space: prefix,
        identifier,
        definition_line: line,
        is_method,
    });
}

fn process_template_instantiation(
    metadata: &mut Source,
    ns_scope: Scope<'_>,
    template_tok: Token<'_>,
    is_method: bool,
) {
    if template_tok.next() == b'<' {
        /* Template definition. */
        return;
    }
    // The instantiation should carry the definition line, but searching for
    // the definition here is impractical. Consider it declared at the top
    // of the file; name collisions with instantiated templates are
    // unlikely.
    let line = 0;
    if template_tok.next() == TokenType::STRUCT || template_tok.next() == TokenType::CLASS {
        /* Struct. */
        let name = template_tok.next().next();
        let template_args = name.next().scope();
        let resolved = format!("{}{}", name.str_view(), template_arguments_mangle(template_args));
        process_symbol(metadata, ns_scope, name, resolved, line, false);
    } else {
        /* Function. */
        let end = template_tok.find_next(b';');
        let template_args = end.prev().scope().front().prev().scope();
        let name = template_args.front().prev();
        let resolved = format!("{}{}", name.str_view(), template_arguments_mangle(template_args));
        process_symbol(metadata, ns_scope, name, resolved, line, is_method);
    }
}

fn parse_namespace_symbols(ns: Scope<'_>, metadata: &mut Source) {
    ns.foreach_scope(scope_kind::NAMESPACE, |nested| {
        parse_namespace_symbols(nested, metadata);
    });

    ns.foreach_struct(|st| {
        process_symbol(
            metadata,
            ns,
            st.name,
            st.name.to_str(),
            st.name.line_number(),
            false,
        );
        /* Methods declare at the top of the struct. */
        let struct_line = st.name.line_number();
        st.body.foreach_function(|f| {
            process_symbol(metadata, st.body, f.name, f.name.to_str(), struct_line, true);
        });
        ns.foreach_token(TokenType::TEMPLATE.0, |t| {
            process_template_instantiation(metadata, st.body, t, true);
        });
    });

    ns.foreach_function(|f| {
        process_symbol(metadata, ns, f.name, f.name.to_str(), f.name.line_number(), false);
    });
    ns.foreach_token(TokenType::TEMPLATE.0, |t| {
        process_template_instantiation(metadata, ns, t, false);
    });
}

/// Populates the symbol table by scanning all namespaces. Global symbols
/// are not parsed.
pub fn parse_local_symbols(form: &IntermediateForm, metadata: &mut Source) {
    form.root().foreach_scope(scope_kind::NAMESPACE, |ns| {
        parse_namespace_symbols(ns, metadata);
    });
}

/// Lowers `using A::B;` and `using B = A::T;` by locally rewriting the
/// following references inside the enclosing scope. Global scope `using`
/// and `using namespace` are rejected.
pub fn lower_using(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();

        root.foreach_match("un", |m| {
            report_tok(
                reporter,
                m[0],
                "Unsupported `using namespace`. Add individual `using` directives for each \
                 needed symbol.",
            );
        });

        let mut process_using = |using_tok: Token<'_>,
                                 from: Token<'_>,
                                 to_start: Token<'_>,
                                 to_end: Token<'_>,
                                 end_tok: Token<'_>| {
            let data = using_tok.data_ref();
            let to = data.src[to_start.str_index_start()..=to_end.str_index_last_no_whitespace()]
                .to_string();
            // Namespace part of the target: everything up to the last `::`.
            let prefix_end = to_end.prev().prev();
            let namespace_prefix = if prefix_end.is_valid()
                && prefix_end.str_index_start() >= to_start.str_index_start()
            {
                data.src[to_start.str_index_start()..=prefix_end.str_index_last_no_whitespace()]
                    .to_string()
            } else {
                String::new()
            };
            let scope = from.scope();

            if scope.kind() == scope_kind::GLOBAL {
                report_tok(reporter, using_tok, "The `using` keyword is not allowed in global scope.");
                return;
            }
            if scope.kind() == scope_kind::NAMESPACE {
                // Only allow bringing symbols from the same namespace,
                // otherwise shadowing can differ from the host compiler.
                let namespace_name = scope.front().prev().full_symbol_name();
                if namespace_name != namespace_prefix {
                    report_tok(
                        reporter,
                        using_tok,
                        "The `using` keyword is only allowed in namespace scope to make visible \
                         symbols from the same namespace declared in another scope, potentially \
                         from another file.",
                    );
                    return;
                }
            }

            // Assignments do not alias function symbols.
            let use_alias = from.str_view() != to_end.str_view();
            let replace_fn = !use_alias;

            // Replace all occurrences of the non-namespace-qualified
            // symbol. Eager, first match wins.
            scope.foreach_token(TokenType::WORD.0, |token| {
                if token.index <= to_end.index {
                    return;
                }
                if token.prev() == b':' {
                    return;
                }
                if !replace_fn && token.next() == b'(' {
                    return;
                }
                if token.str_view() != from.str_view() {
                    return;
                }
                edits.replace_token_keep_whitespace(token, to.clone());
            });

            edits.erase_tokens(using_tok, end_tok);
        };

        root.foreach_match("uA:A", |m| {
            let end = m[3].find_next(b';');
            process_using(m[0], end.prev(), m[1], end.prev(), end);
        });
        root.foreach_match("uA=A:A", |m| {
            let end = m[5].find_next(b';');
            process_using(m[0], m[1], m[3], end.prev(), end);
        });
    }
    form.apply_mutations(reporter);

    /* Verify all using were processed. */
    form.root().foreach_token(TokenType::USING.0, |token| {
        report_tok(reporter, token, "Unsupported `using` keyword usage.");
    });
}

fn lower_namespace(
    ns_prefix: &str,
    scope: Scope<'_>,
    edits: &mut bslc_parser::Edits,
    reporter: &Reporter,
    symbols: &[Symbol],
) {
    let ns_name = scope.front().prev().to_str();
    let ns_prefix = format!("{ns_prefix}{ns_name}::");

    let mut has_nested_scope = false;
    scope.foreach_scope(scope_kind::NAMESPACE, |nested| {
        lower_namespace(&ns_prefix, nested, edits, reporter, symbols);
        has_nested_scope = true;
    });

    if has_nested_scope {
        /* Process iteratively, deepest first. */
        return;
    }

    scope.foreach_token(TokenType::WORD.0, |token| {
        /* Reject member accesses. */
        if token.prev() == b'.' {
            return;
        }

        let is_fn = token.next() == b'(';
        /* Reject method definitions. */
        if is_fn && token.scope().kind() == scope_kind::STRUCT {
            return;
        }

        let mut struct_name = String::new();
        if is_fn {
            // A call inside a struct can reference a method; the struct
            // name participates in the qualified lookup.
            let struct_scope = token.scope().first_scope_of_kind(scope_kind::STRUCT);
            if struct_scope.is_valid() {
                struct_name = struct_scope.to_str();
            }
        }

        for symbol in symbols {
            if token.str_view() != symbol.identifier {
                continue;
            }
            /* Only expand symbols visible inside this namespace. */
            if !symbol.name_space.starts_with(&ns_prefix) {
                continue;
            }
            /* Reject symbols declared after the identifier. */
            if token.line_number() < symbol.definition_line {
                continue;
            }
            /* The symbol as it could be spelled from this namespace. */
            let symbol_visible =
                format!("{}{}", &symbol.name_space[ns_prefix.len()..], symbol.identifier);

            /* First try to match methods. */
            if symbol.is_method && !struct_name.is_empty() {
                if format!("{struct_name}{}", token.full_symbol_name()) == symbol_visible {
                    continue;
                }
                /* Do not append the namespace on method call matches. */
                break;
            }

            /* Other symbols. */
            if token.full_symbol_name() != symbol_visible {
                continue;
            }

            /* Append the current namespace. */
            edits.insert_before(token.namespace_start(), format!("{ns_name}::"));
            /* Only match a symbol once. */
            break;
        }
    });

    // Pipeline declarations are the only global-scope variables; handle
    // them by hand.
    scope.foreach_match("AA(A", |m| {
        if m[0].scope().kind() != scope_kind::NAMESPACE || !m[0].str_view().starts_with("Pipeline")
        {
            return;
        }
        edits.insert_before(m[1], format!("{ns_name}{NAMESPACE_SEPARATOR}"));
    });

    let namespace_tok = scope.front().prev().namespace_start().prev();
    if namespace_tok == TokenType::NAMESPACE {
        edits.erase_tokens(namespace_tok, scope.front());
        edits.erase_token(scope.back());
    } else {
        report_tok(reporter, namespace_tok, "Expected namespace token.");
    }
}

/// Lowers namespaces by prefixing every contained symbol definition and
/// reference, then erasing the namespace braces.
pub fn lower_namespaces(form: &mut IntermediateForm, metadata: &Source, reporter: &Reporter) {
    // Expand compound namespaces first:
    // `namespace A::B {}` becomes `namespace A { namespace B {} }`.
    {
        let (root, edits) = form.parts();
        root.foreach_token(TokenType::NAMESPACE.0, |t| {
            let mut nesting = 0usize;
            let mut name = t.next();
            while name.next() == b':' && name.next().str_view() == "::" {
                edits.replace_token(name.next(), " { namespace ");
                name = name.next().next();
                nesting += 1;
            }
            let scope = name.next().scope();
            for _ in 0..nesting {
                edits.insert_before(scope.back(), "}");
            }
        });
    }
    form.apply_mutations(reporter);

    // Deduplicate symbols, keeping first-declaration order, then order
    // them so the closest namespace resolves first.
    let mut symbols: Vec<Symbol> = Vec::new();
    {
        let mut unique: FxHashSet<String> = FxHashSet::default();
        for symbol in &metadata.symbol_table {
            if unique.insert(format!("{}{}", symbol.name_space, symbol.identifier)) {
                symbols.push(symbol.clone());
            }
        }
    }
    symbols.sort();

    loop {
        {
            let (root, edits) = form.parts();
            root.foreach_scope(scope_kind::NAMESPACE, |scope| {
                lower_namespace("", scope, edits, reporter, &symbols);
            });
        }
        if !form.apply_mutations(reporter) {
            break;
        }
    }
}

/// Collapses scope resolution operators: `A::B` becomes `A_B`, and global
/// qualifications `::B` lose the operator.
pub fn lower_scope_resolution_operators(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_token(b':', |tok| {
            if tok.str_view() != "::" {
                return;
            }
            if tok.scope().kind() == scope_kind::ATTRIBUTE {
                return;
            }
            if tok.prev() != TokenType::WORD {
                /* Global namespace reference. */
                edits.erase_token(tok);
            } else {
                /* Specific namespace reference. */
                edits.replace_token_keep_whitespace(tok, NAMESPACE_SEPARATOR);
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
    fn local_symbols_are_harvested() {
        let src = "namespace ns {\nstruct Foo {\n  void method()\n  {\n  }\n};\nvoid fn()\n{\n}\n}\n";
        let form = form(src);
        let mut metadata = Source::default();
        parse_local_symbols(&form, &mut metadata);
        let names: Vec<_> = metadata
            .symbol_table
            .iter()
            .map(|s| (s.identifier.clone(), s.is_method))
            .collect();
        assert!(names.contains(&("Foo".to_string(), false)), "{names:?}");
        assert!(names.contains(&("method".to_string(), true)), "{names:?}");
        assert!(names.contains(&("fn".to_string(), false)), "{names:?}");
        assert!(metadata.symbol_table.iter().all(|s| s.name_space.starts_with("ns::")));
    }

    #[test]
    fn using_rewrites_later_references() {
        let reporter = Reporter::sink();
        let src = "namespace a {\nvoid fn()\n{\n  using other::test;\n  test(1);\n}\n}\n";
        let mut form = form(src);
        lower_using(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("other::test(1);"), "{out:?}");
        assert!(!out.contains("using"), "{out:?}");
        assert_eq!(reporter.error_count(), 0, "{out:?}");
    }

    #[test]
    fn using_alias_rewrites_types_not_calls() {
        let reporter = Reporter::sink();
        let src = "void fn()\n{\n  using T = ns::Foo;\n  T a;\n  T(1);\n}\n";
        let mut form = form(src);
        lower_using(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("ns::Foo a;"), "{out:?}");
        // Alias form does not replace call sites.
        assert!(out.contains("T(1);"), "{out:?}");
    }

    #[test]
    fn global_using_is_rejected() {
        let reporter = Reporter::sink();
        let mut form = form("using ns::thing;\nint a;\n");
        lower_using(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn using_namespace_is_rejected() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  using namespace foo;\n}\n");
        lower_using(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn namespaces_prefix_symbols_and_vanish() {
        let reporter = Reporter::sink();
        let src = "namespace ns {\nvoid helper()\n{\n}\nvoid fn()\n{\n  helper();\n}\n}\n";
        let mut form = form(src);
        let mut metadata = Source::default();
        parse_local_symbols(&form, &mut metadata);
        lower_namespaces(&mut form, &metadata, &reporter);
        let out = form.str();
        assert!(!out.contains("namespace"), "{out:?}");
        assert!(out.contains("ns::helper()"), "{out:?}");
    }

    #[test]
    fn compound_namespaces_are_split() {
        let reporter = Reporter::sink();
        let src = "namespace a::b {\nvoid fn()\n{\n}\n}\n";
        let mut form = form(src);
        let mut metadata = Source::default();
        parse_local_symbols(&form, &mut metadata);
        lower_namespaces(&mut form, &metadata, &reporter);
        let out = form.str();
        assert!(!out.contains("namespace"), "{out:?}");
        assert_eq!(reporter.error_count(), 0, "{out:?}");
    }

    #[test]
    fn scope_resolution_collapses() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  a::b::c(1);\n  ::global(2);\n}\n");
        lower_scope_resolution_operators(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("a_b_c(1);"), "{out:?}");
        assert!(out.contains(" global(2);"), "{out:?}");
    }
}
