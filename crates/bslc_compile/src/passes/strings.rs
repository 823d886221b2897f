//! String literal, printf and assert lowering.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm};

use crate::metadata::{hash_string, PrintfFormat, Source};

/// Merges adjacent string literals: `"a" "b"` becomes `"ab"`.
pub fn lower_strings_sequences(form: &mut IntermediateForm, reporter: &Reporter) {
    loop {
        {
            let (root, edits) = form.parts();
            root.foreach_match("\"\"", |m| {
                let first = m[0].to_str();
                let second = m[1].to_str();
                let data = m[0].data_ref();
                let between =
                    &data.src[m[0].str_index_last_no_whitespace() + 1..m[1].str_index_start()];
                let trailing =
                    &data.src[m[1].str_index_last_no_whitespace() + 1..=m[1].str_index_last()];
                let merged = format!(
                    "{}{}{}{}",
                    &first[..first.len() - 1],
                    &second[1..],
                    between,
                    trailing
                );
                edits.try_replace_tokens(m[0], m[1], merged);
            });
        }
        if !form.apply_mutations(reporter) {
            break;
        }
    }
}

/// Replaces string literals by their 32-bit hash, keeping the original
/// text in the metadata record.
pub fn lower_strings(form: &mut IntermediateForm, metadata: &mut Source, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_token(TokenType::STRING.0, |token| {
            let literal = token.to_str();
            let hash = hash_string(&literal);
            metadata.printf_formats.push(PrintfFormat { hash, format: literal });
            edits.replace_token_keep_whitespace(token, format!("string_t({hash}u)"));
        });
    }
    form.apply_mutations(reporter);
}

/// Changes printf calls into chained calls to the implementation
/// functions, emulating variadic arguments:
/// `printf(a, b, c)` becomes `print_data(print_data(print_start(2), b), c)`.
pub fn lower_printf(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("A(..)", |m| {
            if m[0].str_view() != "printf" {
                return;
            }
            let call = m[1].scope();
            let mut arg_count = 0usize;
            call.foreach_scope(scope_kind::FUNCTION_PARAM, |_| arg_count += 1);

            let mut unrolled = format!("print_start({})", arg_count.saturating_sub(1));
            let mut first = true;
            call.foreach_scope(scope_kind::FUNCTION_PARAM, |param| {
                if first {
                    // The format string is registered through its hash; only
                    // data arguments are forwarded.
                    first = false;
                    return;
                }
                unrolled = format!("print_data({}, {})", unrolled, param.to_str());
            });

            edits.replace_tokens(m[0], m[4], unrolled);
        });
    }
    form.apply_mutations(reporter);
}

/// Turns `assert(cond)` into a conditional printf reporting the condition
/// text, file, line and thread index.
pub fn lower_assert(form: &mut IntermediateForm, filename: &str, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_match("A(..)", |m| {
            if m[0].str_view() != "assert" {
                return;
            }
            let condition = m[1].scope().to_str();
            let mut replacement = String::new();
            replacement.push_str(&format!("if (!{condition}) "));
            replacement.push('{');
            replacement.push_str(" printf(\"");
            replacement.push_str(&format!("Assertion failed: {condition}, "));
            replacement.push_str(&format!("file {filename}, "));
            replacement.push_str("line %d, ");
            replacement.push_str("thread (%u,%u,%u).\\n");
            replacement.push('"');
            replacement.push_str(", __LINE__, GPU_THREAD.x, GPU_THREAD.y, GPU_THREAD.z); ");
            replacement.push('}');
            edits.replace_tokens(m[0], m[4], replacement);
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
    fn adjacent_literals_merge() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  x = \"a\" \"b\";\n}\n");
        lower_strings_sequences(&mut form, &reporter);
        assert!(form.str().contains("\"ab\""), "{:?}", form.str());
    }

    #[test]
    fn three_literals_merge_to_fixpoint() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  x = \"a\" \"b\" \"c\";\n}\n");
        lower_strings_sequences(&mut form, &reporter);
        assert!(form.str().contains("\"abc\""), "{:?}", form.str());
    }

    #[test]
    fn string_literals_become_hashes() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let mut form = form("void fn()\n{\n  print(\"fmt %d\");\n}\n");
        lower_strings(&mut form, &mut metadata, &reporter);
        assert!(form.str().contains("string_t("), "{:?}", form.str());
        assert_eq!(metadata.printf_formats.len(), 1);
        assert_eq!(metadata.printf_formats[0].format, "\"fmt %d\"");
        let expected = hash_string("\"fmt %d\"");
        assert!(form.str().contains(&format!("string_t({expected}u)")));
    }

    #[test]
    fn printf_unrolls_into_print_data_chain() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  printf(fmt, b, c);\n}\n");
        lower_printf(&mut form, &reporter);
        assert!(
            form.str().contains("print_data(print_data(print_start(2), b), c);"),
            "{:?}",
            form.str()
        );
    }

    #[test]
    fn assert_becomes_guarded_printf() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  assert(i < 0);\n}\n");
        lower_assert(&mut form, "test_file.hh", &reporter);
        let out = form.str();
        assert!(out.contains("if (!(i < 0))"), "{out:?}");
        assert!(out.contains("Assertion failed: (i < 0), file test_file.hh"), "{out:?}");
        assert!(out.contains("__LINE__"), "{out:?}");
    }
}
