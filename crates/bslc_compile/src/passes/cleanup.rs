//! Comment stripping and output cleanup.

use bslc_base::Reporter;
use bslc_parser::{line, IntermediateForm, ParseMode};

/// Removes single and multi-line comments, replacing their contents with
/// spaces (newlines preserved) so offsets and line numbers never move.
pub fn remove_comments(text: &str, reporter: &Reporter) -> String {
    let mut out: Vec<u8> = text.as_bytes().to_vec();

    // Multi-line comments.
    let mut search = 0usize;
    while let Some(start) = find_from(&out, b"/*", search) {
        match find_from(&out, b"*/", start + 2) {
            Some(end) => {
                for byte in &mut out[start..end + 2] {
                    if *byte != b'\n' {
                        *byte = b' ';
                    }
                }
                search = end + 2;
            }
            None => {
                reporter.report(
                    line::line_number(text, start),
                    line::char_number(text, start),
                    &line::line_str(text, start),
                    "Malformed multi-line comment.",
                );
                return String::from_utf8(out).expect("comment stripping is byte-preserving");
            }
        }
    }

    // Single-line comments.
    let mut search = 0usize;
    while let Some(start) = find_from(&out, b"//", search) {
        let end = find_from(&out, b"\n", start + 2).unwrap_or(out.len());
        for byte in &mut out[start..end] {
            *byte = b' ';
        }
        search = end;
    }

    String::from_utf8(out).expect("comment stripping is byte-preserving")
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Removes trailing whitespace at end of lines.
pub fn cleanup_whitespace(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let text = form.str().to_string();
        let edits = form.edits();
        let mut search = 0usize;
        while let Some(ws_end) = text[search..].find(" \n").map(|p| p + search) {
            let line_content = &text[..ws_end];
            let first_ws = line_content
                .rfind(|c: char| c != ' ')
                .map_or(0, |p| p + 1);
            edits.replace_range(first_ws, ws_end, "");
            search = ws_end + 1;
        }
    }
    form.apply_mutations(reporter);
}

/// String-level variant for the pass-through language paths.
pub fn cleanup_whitespace_str(text: &str, reporter: &Reporter) -> String {
    let mut form = IntermediateForm::new(text, ParseMode::Expression, reporter);
    cleanup_whitespace(&mut form, reporter);
    form.into_result()
}

/// Collapses runs of three or more blank lines into a `#line` directive
/// restoring the numbering of the following line.
pub fn cleanup_empty_lines(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let text = form.str().to_string();
        let edits = form.edits();
        let mut search = 0usize;
        while let Some(start) = text[search..].find("\n\n\n").map(|p| p + search) {
            let end = match text[start..].find(|c: char| c != '\n') {
                Some(p) => start + p,
                None => break,
            };
            let line = line::line_number(&text, end);
            edits.replace_range(start + 2, end - 1, format!("#line {line}\n"));
            search = end;
        }
    }
    form.apply_mutations(reporter);

    // Blank lines before a #line directive are redundant with it.
    {
        let text = form.str().to_string();
        let edits = form.edits();
        let mut search = 0usize;
        while let Some(found) = text[search..].find("\n\n#line ").map(|p| p + search) {
            let seq_end = found + 1;
            let seq_start = text[..seq_end].rfind(|c: char| c != '\n').map_or(0, |p| p + 1);
            if seq_start < seq_end {
                edits.replace_range(seq_start, seq_end - 1, "");
            }
            search = found + 2;
        }
    }
    form.apply_mutations(reporter);
}

/// Successive mutations can introduce unneeded line directives: directives
/// immediately followed by another directive, and directives that are
/// no-ops, are removed.
pub fn cleanup_line_directives(form: &mut IntermediateForm, reporter: &Reporter) {
    for _ in 0..2 {
        {
            let (root, edits) = form.parts();
            root.foreach_match("#A1\n", |m| {
                if m[1].str_view() != "line" {
                    return;
                }
                // The matcher does not revisit overlapping matches; check
                // the following directive by hand.
                let next = m[3].next();
                if next == b'#'
                    && next.next().token_type() == bslc_lex::TokenType::WORD
                    && next.next().str_view() == "line"
                {
                    edits.replace_range(m[0].line_start(), m[0].line_end() + 1, "");
                }
            });
        }
        form.apply_mutations(reporter);
    }

    {
        let (root, edits) = form.parts();
        root.foreach_match("#A1\n", |m| {
            if m[1].str_view() != "line" {
                return;
            }
            // Directive is a no-op if it maps the following line to its
            // natural number.
            let stated: usize = m[2].str_view().parse().unwrap_or(0);
            if m[0].line_number() + 1 == stated {
                edits.replace_range(m[0].line_start(), m[0].line_end() + 1, "");
            }
        });
    }
    form.apply_mutations(reporter);
}

/// `#line 1 "<filename>"` prefix for the final output.
pub fn line_directive_prefix(filename: &str) -> String {
    format!("#line 1 \"{filename}\"\n")
}

/// Removes trailing whitespace from a string fragment.
pub fn strip_whitespace(text: &str) -> &str {
    text.trim_end_matches([' ', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_line_comments_become_spaces() {
        let reporter = Reporter::sink();
        let out = remove_comments("int a; /* comment\n spans */ int b;\n", &reporter);
        assert!(!out.contains("comment"));
        assert!(out.contains("int a;"));
        assert!(out.contains("int b;"));
        assert_eq!(out.matches('\n').count(), 2);
        assert_eq!(reporter.error_count(), 0);
    }

    #[test]
    fn single_line_comments_become_spaces() {
        let reporter = Reporter::sink();
        let out = remove_comments("int a; // trailing\nint b;\n", &reporter);
        assert!(!out.contains("trailing"));
        assert!(out.contains("int b;"));
    }

    #[test]
    fn unterminated_comment_is_reported() {
        let reporter = Reporter::sink();
        let _ = remove_comments("int a; /* never closed\n", &reporter);
        assert_eq!(reporter.error_count(), 1);
    }

    #[test]
    fn comment_length_is_preserved() {
        let reporter = Reporter::sink();
        let src = "a /* x */ b\n";
        let out = remove_comments(src, &reporter);
        assert_eq!(out.len(), src.len());
    }

    #[test]
    fn trailing_whitespace_is_removed() {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new("int a;   \nint b;\n", ParseMode::Full, &reporter);
        cleanup_whitespace(&mut form, &reporter);
        assert_eq!(form.str(), "int a;\nint b;\n");
    }

    #[test]
    fn blank_line_runs_collapse_to_line_directive() {
        let reporter = Reporter::sink();
        let src = "int a;\n\n\n\n\nint b;\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        cleanup_empty_lines(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("#line 6\n"), "{out:?}");
        assert!(!out.contains("\n\n\n"), "{out:?}");
    }

    #[test]
    fn redundant_line_directives_are_removed() {
        let reporter = Reporter::sink();
        let src = "int a;\n#line 5\n#line 9\nint b;\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        cleanup_line_directives(&mut form, &reporter);
        let out = form.str();
        assert!(!out.contains("#line 5"), "{out:?}");
        assert!(out.contains("#line 9"), "{out:?}");
    }

    #[test]
    fn noop_line_directive_is_removed() {
        let reporter = Reporter::sink();
        let src = "int a;\n#line 3\nint b;\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        cleanup_line_directives(&mut form, &reporter);
        assert!(!form.str().contains("#line"), "{:?}", form.str());
    }
}
