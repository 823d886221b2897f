//! Control flow lowering: loop unrolling and static branches.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, Edits, IntermediateForm, ParseMode, Scope, Token};

use super::report_tok;

struct ForArgs<'a> {
    init: Scope<'a>,
    condition: Scope<'a>,
    iteration: Scope<'a>,
}

fn parse_for_args<'a>(loop_args: Scope<'a>, reporter: &Reporter) -> ForArgs<'a> {
    let data = loop_args.data_ref();
    let mut out = ForArgs {
        init: Scope::invalid(data),
        condition: Scope::invalid(data),
        iteration: Scope::invalid(data),
    };
    loop_args.foreach_scope(scope_kind::LOOP_ARG, |arg| {
        let opens = arg.front().prev();
        let closes = arg.back().next();
        if opens == b'(' && closes == b';' {
            out.init = arg;
        } else if opens == b';' && closes == b';' {
            out.condition = arg;
        } else if opens == b';' && closes == b')' {
            out.iteration = arg;
        } else {
            report_tok(reporter, arg.front(), "Invalid loop declaration.");
        }
    });
    out
}

/// Substitutes the loop index by its literal value inside a body copy,
/// using a throwaway parse of the copied text.
fn replace_index(
    text: &str,
    iteration: Scope<'_>,
    iteration_is_trivial: bool,
    loop_index: i64,
    reporter: &Reporter,
) -> String {
    if iteration.is_invalid() || !iteration_is_trivial || text.is_empty() {
        return text.to_string();
    }
    let index_name = iteration.get(0).to_str();
    let sink = Reporter::sink();
    let mut parser = IntermediateForm::new(text, ParseMode::Full, &sink);
    if sink.had_errors() {
        // Body fragments can be unbalanced; leave them untouched.
        let _ = reporter;
        return text.to_string();
    }
    {
        let (root, edits) = parser.parts();
        root.foreach_token(TokenType::WORD.0, |tok| {
            if tok.str_view() == index_name {
                edits.replace_token_keep_whitespace(tok, loop_index.to_string());
            }
        });
    }
    parser.into_result()
}

#[allow(clippy::too_many_arguments)]
fn process_loop(
    edits: &mut Edits,
    reporter: &Reporter,
    loop_start: Token<'_>,
    iter_count: i64,
    iter_init: i64,
    iter_incr: i64,
    condition_is_trivial: bool,
    iteration_is_trivial: bool,
    args: &ForArgs<'_>,
    body: Scope<'_>,
) {
    /* Check for unsupported keywords in the loop body. */
    let mut error = false;
    /* A `continue` anywhere in the unrolled body is unsupported, even
     * inside a nested switch statement. */
    body.foreach_token(TokenType::CONTINUE.0, |token| {
        if token.scope().first_scope_of_kind(scope_kind::LOOP_BODY) == body {
            report_tok(reporter, token, "Unrolled loop cannot contain \"continue\" statement.");
            error = true;
        }
    });
    /* A `break` directly in the unrolled scope is unsupported; switch
     * statements keep theirs. */
    body.foreach_token(TokenType::BREAK.0, |token| {
        if token.scope().first_scope_of_kind(scope_kind::LOOP_BODY) == body {
            let switch_scope = token.scope().first_scope_of_kind(scope_kind::SWITCH_BODY);
            if switch_scope.is_invalid() || !body.contains(switch_scope) {
                report_tok(reporter, token, "Unrolled loop cannot contain \"break\" statement.");
                error = true;
            }
        }
    });
    if error {
        return;
    }

    if !edits.replace_range_try(
        loop_start.str_index_start(),
        body.back().str_index_last_no_whitespace(),
        "",
    ) {
        /* Nested loop: this one is processed on a later round. */
        return;
    }

    let indent_init = if args.init.is_valid() {
        " ".repeat(args.init.front().char_number().saturating_sub(1))
    } else {
        String::new()
    };
    let indent_cond = if args.condition.is_valid() {
        " ".repeat(args.condition.front().char_number().saturating_sub(3))
    } else {
        String::new()
    };
    let indent_iter = if args.iteration.is_valid() {
        " ".repeat(args.iteration.front().char_number())
    } else {
        String::new()
    };
    let indent_body = " ".repeat(body.front().char_number());
    let indent_end = " ".repeat(body.back().char_number());

    let insert = |edits: &mut Edits, content: String| {
        edits.insert_after(body.back(), content);
    };
    let insert_line = |edits: &mut Edits, line: usize| {
        edits.insert_line_number(body.back(), line);
    };

    insert(edits, "\n".to_string());
    if args.init.is_valid() && !iteration_is_trivial {
        insert_line(edits, args.init.front().line_number());
        insert(edits, format!("{indent_init}{{{};\n", args.init.str_with_whitespace()));
    } else {
        insert(edits, "{\n".to_string());
    }
    let mut value = iter_init;
    for _ in 0..iter_count {
        if args.condition.is_valid() && !condition_is_trivial {
            insert_line(edits, args.condition.front().line_number());
            insert(
                edits,
                format!("{indent_cond}if({})\n", args.condition.str_with_whitespace()),
            );
        }
        insert_line(edits, body.front().line_number());
        insert(
            edits,
            format!(
                "{indent_body}{}\n",
                replace_index(
                    &body.str_with_whitespace(),
                    args.iteration,
                    iteration_is_trivial,
                    value,
                    reporter
                )
            ),
        );
        if args.iteration.is_valid() && !iteration_is_trivial {
            insert_line(edits, args.iteration.front().line_number());
            insert(edits, format!("{indent_iter}{};\n", args.iteration.str_with_whitespace()));
        }
        value += iter_incr;
    }
    insert_line(edits, body.back().line_number());
    insert(edits, format!("{indent_end}{}", body.back().str_with_whitespace()));
}

/// Unrolls `[[unroll]]` / `[[unroll_n(k)]]` loops by duplicating the body,
/// substituting the index where the iteration is trivial. Nested unrolls
/// resolve over multiple rounds via `replace_try`; non-progress rounds
/// stop the loop.
pub fn lower_loop_unroll(form: &mut IntermediateForm, reporter: &Reporter) {
    loop {
        // Refine body scopes so break/continue linting can tell loop and
        // switch bodies apart.
        {
            let mut loop_bodies: Vec<i64> = Vec::new();
            let mut switch_bodies: Vec<i64> = Vec::new();
            {
                let root = form.root();
                root.foreach_match("f(..)[[..]]{..}", |m| {
                    loop_bodies.push(m[11].scope().index);
                });
                root.foreach_match("f(..){..}", |m| {
                    loop_bodies.push(m[5].scope().index);
                });
                root.foreach_match("F(..){..}", |m| {
                    loop_bodies.push(m[5].scope().index);
                });
                root.foreach_match("h(..){..}", |m| {
                    switch_bodies.push(m[5].scope().index);
                });
            }
            for index in loop_bodies {
                form.set_scope_kind(index, scope_kind::LOOP_BODY);
            }
            for index in switch_bodies {
                form.set_scope_kind(index, scope_kind::SWITCH_BODY);
            }
        }

        {
            let (root, edits) = form.parts();

            let mut process_unroll = |edits: &mut Edits,
                                      loop_start: Token<'_>,
                                      for_tok: Token<'_>,
                                      loop_args: Scope<'_>,
                                      loop_body: Scope<'_>| {

                let args = parse_for_args(loop_args, reporter);
                if args.init.is_invalid() || args.condition.is_invalid() || args.iteration.is_invalid()
                {
                    report_tok(reporter, for_tok, "Incompatible loop format for [[unroll]].");
                    return;
                }

                /* Init statement. */
                let var_type = args.init.get(0);
                let var_name = args.init.get(1);
                let var_init = args.init.get(2);
                if var_type.str_view() != "int" && var_type.str_view() != "uint" {
                    report_tok(reporter, var_init, "Can only unroll integer based loop.");
                    return;
                }
                if var_init != b'=' {
                    report_tok(reporter, var_init, "Expecting assignment here.");
                    return;
                }
                if args.init.get(3) != TokenType::NUMBER && args.init.get(3) != b'-' {
                    report_tok(reporter, args.init.get(3), "Expecting integer literal here.");
                    return;
                }

                /* Conditional statement. */
                let cond_var = args.condition.get(0);
                let cond_type = args.condition.get(1);
                let inclusive = cond_type == TokenType::LEQUAL || cond_type == TokenType::GEQUAL;
                let mut t = 2;
                let cond_sign = if args.condition.get(t) == b'+' || args.condition.get(t) == b'-' {
                    t += 1;
                    args.condition.get(t - 1)
                } else {
                    Token::invalid(for_tok.data_ref())
                };
                let cond_end = args.condition.get(t);
                if cond_var.str_view() != var_name.str_view() {
                    report_tok(reporter, cond_var, "Non matching loop counter variable.");
                    return;
                }
                if cond_end != TokenType::NUMBER {
                    report_tok(reporter, cond_end, "Expecting integer literal here.");
                    return;
                }

                /* Iteration statement. */
                let iter_var = args.iteration.get(0);
                let iter_type = args.iteration.get(1);
                let iter_incr;
                if iter_var.str_view() != var_name.str_view() {
                    report_tok(reporter, iter_var, "Non matching loop counter variable.");
                    return;
                }
                if iter_type == TokenType::INCREMENT {
                    iter_incr = 1;
                    if cond_type == b'>' || cond_type == TokenType::GEQUAL {
                        report_tok(reporter, for_tok, "Unsupported condition in unrolled loop.");
                        return;
                    }
                } else if iter_type == TokenType::DECREMENT {
                    iter_incr = -1;
                    if cond_type == b'<' || cond_type == TokenType::LEQUAL {
                        report_tok(reporter, for_tok, "Unsupported condition in unrolled loop.");
                        return;
                    }
                } else {
                    report_tok(reporter, iter_type, "Unsupported loop expression. Expecting ++ or --.");
                    return;
                }

                let data = for_tok.data_ref();
                let init_value: i64 = data.src
                    [var_init.next().str_index_start()..=var_init.scope().back().str_index_last()]
                    .trim()
                    .parse()
                    .unwrap_or(0);
                let end_start = if cond_sign.is_valid() { cond_sign } else { cond_end };
                let end_text = &data.src[end_start.str_index_start()..=cond_end.str_index_last()];
                let end_value: i64 = end_text.trim().trim_end_matches('u').parse().unwrap_or(0);

                let mut iter_count = (end_value - init_value).abs();
                if inclusive {
                    iter_count += 1;
                }

                let condition_is_trivial = cond_end == args.condition.back();
                let iteration_is_trivial = iter_type == args.iteration.back().token_type()
                    && args.iteration.token_count() == 2;

                process_loop(
                    edits,
                    reporter,
                    loop_start,
                    iter_count,
                    init_value,
                    iter_incr,
                    condition_is_trivial,
                    iteration_is_trivial,
                    &args,
                    loop_body,
                );
            };

            let mut process_unroll_n = |edits: &mut Edits,
                                        loop_start: Token<'_>,
                                        count_tok: Token<'_>,
                                        loop_args: Scope<'_>,
                                        loop_body: Scope<'_>| {
                let args = parse_for_args(loop_args, reporter);
                let iter_count: i64 = count_tok.to_str().trim_end_matches('u').parse().unwrap_or(0);
                process_loop(edits, reporter, loop_start, iter_count, 0, 0, false, false, &args, loop_body);
            };

            /* [[unroll]], attribute between the loop head and its body. */
            root.foreach_match("f(..)[[A]]{..}", |m| {
                if m[7].str_view() != "unroll" {
                    return;
                }
                process_unroll(edits, m[0], m[0], m[1].scope(), m[10].scope());
            });
            /* [[unroll]], attribute before the statement. */
            root.foreach_match("[[A]]f(..){..}", |m| {
                if m[2].str_view() != "unroll" {
                    return;
                }
                process_unroll(edits, m[0], m[5], m[6].scope(), m[10].scope());
            });
            /* [[unroll_n(n)]], attribute between the loop head and its body. */
            root.foreach_match("f(..)[[A(1)]]{..}", |m| {
                if m[7].str_view() != "unroll_n" {
                    return;
                }
                process_unroll_n(edits, m[0], m[9], m[1].scope(), m[13].scope());
            });
            /* [[unroll_n(n)]], attribute before the statement. */
            root.foreach_match("[[A(1)]]f(..){..}", |m| {
                if m[2].str_view() != "unroll_n" {
                    return;
                }
                process_unroll_n(edits, m[0], m[4], m[9].scope(), m[13].scope());
            });
        }

        if !form.apply_mutations(reporter) {
            break;
        }
    }

    /* Check for remaining attributes on incompatible loops. */
    form.root().foreach_match("[[A", |m| {
        if m[2].str_view().contains("unroll") {
            report_tok(reporter, m[0], "Incompatible loop format for [[unroll]].");
        }
    });
}

/// `if (srt.<cst>) [[static_branch]] { … }` becomes
/// `#if SRT_CONSTANT_<cst> … #endif`, cascading through `else if` chains.
pub fn lower_static_branch(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("i(..)[[A]]{..}", |m| {
            let if_tok = m[0];
            let condition = m[1].scope();
            let attribute = m[7];
            let mut body = m[10].scope();

            if attribute.str_view() != "static_branch" {
                return;
            }

            let condition_text = condition.to_str();
            if condition_text.contains("&&") || condition_text.contains("||") {
                report_tok(reporter, condition.get(0), "Expecting single condition.");
                return;
            }

            if condition.get(1).str_view() != "srt_access" {
                report_tok(reporter, if_tok, "Expecting compilation or specialization constant.");
                return;
            }

            let before_body = body.front().prev();

            let data = if_tok.data_ref();
            let mut test = format!("SRT_CONSTANT_{} ", condition.get(5).str_view());
            // Anything after the accessor call (e.g. `== 2`) is part of
            // the preprocessor test.
            let tail_start = condition.get(7).str_index_start();
            let tail_end = condition.back().prev().str_index_last();
            if condition.get(7) != condition.back().prev() && tail_start <= tail_end {
                test.push_str(&data.src[tail_start..=tail_end]);
            }
            let directive = if if_tok.prev() == TokenType::ELSE { "#elif " } else { "#if " };

            edits.insert_directive(before_body, &format!("{directive}{test}"));
            edits.erase_tokens(if_tok, before_body);

            if body.back().next() == TokenType::ELSE {
                let else_tok = body.back().next();
                edits.erase_token(else_tok);
                if else_tok.next() == TokenType::IF {
                    /* Processed on a later round. */
                    let next_if = else_tok.next();
                    /* The rest of the chain must also be static. */
                    let attributes = next_if.next().scope().back().next().scope();
                    if attributes.kind() != scope_kind::SUBSCRIPT
                        || attributes.front().next().scope().str_exclusive() != "static_branch"
                    {
                        report_tok(
                            reporter,
                            next_if,
                            "Expecting next if statement to also be a static branch.",
                        );
                    }
                    return;
                }
                body = else_tok.next().scope();

                edits.insert_directive(else_tok, "#else");
            }
            edits.insert_directive(body.back(), "#endif");
        });
    }
    form.apply_mutations(reporter);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> (String, usize) {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_loop_unroll(&mut form, &reporter);
        (form.str().to_string(), reporter.error_count())
    }

    #[test]
    fn simple_unroll_duplicates_body() {
        // Two copies with the index substituted by 2 then 3.
        let src = "void fn()\n{\n  [[unroll]] for (int i = 2; i < 4; i++) {\n    x += i;\n  }\n}\n";
        let (out, errors) = run(src);
        assert_eq!(errors, 0, "{out:?}");
        assert!(out.contains("x += 2;"), "{out:?}");
        assert!(out.contains("x += 3;"), "{out:?}");
        assert!(!out.contains("x += 4;"), "{out:?}");
        assert!(!out.contains("unroll"), "{out:?}");
        assert!(!out.contains("for "), "{out:?}");
    }

    #[test]
    fn inclusive_condition_adds_an_iteration() {
        let src = "void fn()\n{\n  [[unroll]] for (int i = 0; i <= 2; i++) {\n    x += i;\n  }\n}\n";
        let (out, errors) = run(src);
        assert_eq!(errors, 0, "{out:?}");
        assert!(out.contains("x += 0;"), "{out:?}");
        assert!(out.contains("x += 2;"), "{out:?}");
    }

    #[test]
    fn decrementing_unroll() {
        let src = "void fn()\n{\n  [[unroll]] for (int i = 3; i > 1; i--) {\n    x += i;\n  }\n}\n";
        let (out, errors) = run(src);
        assert_eq!(errors, 0, "{out:?}");
        assert!(out.contains("x += 3;"), "{out:?}");
        assert!(out.contains("x += 2;"), "{out:?}");
        assert!(!out.contains("x += 1;"), "{out:?}");
    }

    #[test]
    fn break_in_unrolled_loop_is_reported() {
        let src = "void fn()\n{\n  [[unroll]] for (int i = 0; i < 2; i++) {\n    break;\n  }\n}\n";
        let (_, errors) = run(src);
        assert!(errors > 0);
    }

    #[test]
    fn continue_in_unrolled_loop_is_reported() {
        let src = "void fn()\n{\n  [[unroll]] for (int i = 0; i < 2; i++) {\n    continue;\n  }\n}\n";
        let (_, errors) = run(src);
        assert!(errors > 0);
    }

    #[test]
    fn break_inside_contained_switch_is_allowed() {
        let src = "void fn()\n{\n  [[unroll]] for (int i = 0; i < 2; i++) {\n    switch (x) {\n      default:\n        break;\n    }\n  }\n}\n";
        let (out, errors) = run(src);
        assert_eq!(errors, 0, "{out:?}");
    }

    #[test]
    fn unroll_n_uses_given_count() {
        let src = "void fn()\n{\n  [[unroll_n(3)]] for (int i = 0; i < n; i++) {\n    step();\n  }\n}\n";
        let (out, errors) = run(src);
        assert_eq!(errors, 0, "{out:?}");
        assert_eq!(out.matches("step();").count(), 3, "{out:?}");
        // Non-trivial bounds keep the runtime condition.
        assert!(out.contains("if("), "{out:?}");
    }

    #[test]
    fn nested_unrolls_reach_fixpoint() {
        let src = "void fn()\n{\n  [[unroll]] for (int i = 0; i < 2; i++) {\n    [[unroll]] for (int j = 0; j < 2; j++) {\n      x += j;\n    }\n  }\n}\n";
        let (out, errors) = run(src);
        assert_eq!(errors, 0, "{out:?}");
        assert!(!out.contains("unroll"), "{out:?}");
        assert!(!out.contains("for "), "{out:?}");
        assert_eq!(out.matches("x += 0;").count(), 2, "{out:?}");
        assert_eq!(out.matches("x += 1;").count(), 2, "{out:?}");
    }

    #[test]
    fn static_branch_becomes_preprocessor_if() {
        let reporter = Reporter::sink();
        let src = "void fn()\n{\n  if (srt_access(Srt, use_fast)) [[static_branch]] {\n    fast();\n  }\n}\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_static_branch(&mut form, &reporter);
        let out = form.str();
        assert_eq!(reporter.error_count(), 0, "{out:?}");
        assert!(out.contains("#if SRT_CONSTANT_use_fast"), "{out:?}");
        assert!(out.contains("#endif"), "{out:?}");
        assert!(!out.contains("static_branch"), "{out:?}");
    }

    #[test]
    fn static_branch_with_else_gets_else_directive() {
        let reporter = Reporter::sink();
        let src = "void fn()\n{\n  if (srt_access(Srt, flag)) [[static_branch]] {\n    a();\n  }\n  else {\n    b();\n  }\n}\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_static_branch(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("#else"), "{out:?}");
        assert!(out.contains("#endif"), "{out:?}");
        assert!(out.contains("b();"), "{out:?}");
    }

    #[test]
    fn non_static_condition_is_reported() {
        let reporter = Reporter::sink();
        let src = "void fn()\n{\n  if (some_runtime_flag) [[static_branch]] {\n    a();\n  }\n}\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_static_branch(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }
}
