//! Attribute list normalization and validation.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::IntermediateForm;

use super::report_tok;

/// The recognized zero-argument attribute names.
static ZERO_ARG_ATTRIBUTES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "base_instance",
        "clip_distance",
        "compilation_constant",
        "compute",
        "early_fragment_tests",
        "flat",
        "frag_coord",
        "frag_stencil_ref",
        "fragment",
        "front_facing",
        "global_invocation_id",
        "in",
        "instance_id",
        "layer",
        "local_invocation_id",
        "local_invocation_index",
        "no_perspective",
        "num_work_groups",
        "out",
        "point_coord",
        "point_size",
        "position",
        "push_constant",
        "resource_table",
        "smooth",
        "specialization_constant",
        "vertex_id",
        "legacy_info",
        "vertex",
        "viewport_index",
        "work_group_id",
        "maybe_unused",
        "fallthrough",
        "nodiscard",
        "node",
    ]
    .into_iter()
    .collect()
});

/// The recognized one-argument attribute names.
static ONE_ARG_ATTRIBUTES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    ["attribute", "index", "frag_color", "frag_depth", "uniform", "condition", "sampler"]
        .into_iter()
        .collect()
});

/// Merge attribute scopes; they are equivalent in the C++ standard and a
/// single list simplifies later parsing: `[[a]] [[b]]` becomes `[[a, b]]`.
pub fn lower_attribute_sequences(form: &mut IntermediateForm, reporter: &Reporter) {
    loop {
        {
            let (root, edits) = form.parts();
            root.foreach_match("[[..]][[..]]", |m| {
                edits.insert_before(m[4], ",");
                edits.erase_tokens(m[4], m[7]);
            });
        }
        if !form.apply_mutations(reporter) {
            break;
        }
    }
}

/// Validates attribute names, arity, and placement against the closed
/// attribute alphabet. Invalid attribute lists are erased so they do not
/// spawn follow-up errors.
pub fn lint_attributes(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_token(b'[', |par_open| {
            if par_open.next() != b'[' {
                return;
            }
            let attributes = par_open.next().scope();
            let mut invalid = false;
            attributes.foreach_attribute(|attr, attr_scope| {
                let attr_str = attr.to_str();
                let attr_str = attr_str.as_str();
                if ZERO_ARG_ATTRIBUTES.contains(attr_str) {
                    if attr_scope.is_valid() {
                        report_tok(reporter, attr, "This attribute requires no argument");
                        invalid = true;
                    }
                } else if ONE_ARG_ATTRIBUTES.contains(attr_str) {
                    if attr_scope.is_invalid() {
                        report_tok(reporter, attr, "This attribute requires 1 argument");
                        invalid = true;
                    }
                } else if attr_str == "storage" {
                    if attr_scope.is_invalid() {
                        report_tok(reporter, attr, "This attribute requires 2 arguments");
                        invalid = true;
                    }
                } else if attr_str == "image" {
                    if attr_scope.is_invalid() {
                        report_tok(reporter, attr, "This attribute requires 3 arguments");
                        invalid = true;
                    }
                } else if attr_str == "local_size" {
                    if attr_scope.is_invalid() {
                        report_tok(reporter, attr, "This attribute requires at least 1 argument");
                        invalid = true;
                    }
                } else if attr_str == "host_shared" {
                    let before = attributes.front().prev().prev();
                    if before != TokenType::STRUCT && before != TokenType::ENUM {
                        report_tok(
                            reporter,
                            attr,
                            "host_shared attributes must be placed after a struct or an enum \
                             definition",
                        );
                        invalid = true;
                    }
                    /* Placement already checked. */
                    return;
                } else if attr_str == "unroll" || attr_str == "unroll_n" {
                    // Accepted between the loop head and its body, or
                    // right before the statement.
                    let after_head =
                        attributes.front().prev().prev().scope().front().prev() == TokenType::FOR;
                    let before_statement = attributes.parent().back().next() == TokenType::FOR;
                    if !after_head && !before_statement {
                        report_tok(
                            reporter,
                            attr,
                            "[[unroll]] attribute must be declared after a 'for' statement",
                        );
                        invalid = true;
                    }
                    /* Placement already checked. */
                    return;
                } else if attr_str == "static_branch" {
                    if attributes.front().prev().prev().scope().front().prev() != TokenType::IF {
                        report_tok(
                            reporter,
                            attr,
                            "[[static_branch]] attribute must be declared after a 'if' condition",
                        );
                        invalid = true;
                    }
                    /* Placement already checked. */
                    return;
                } else {
                    report_tok(reporter, attr, "Unrecognized attribute");
                    invalid = true;
                    /* Attribute already invalid, don't check placement. */
                    return;
                }

                if attr_str == "fallthrough" {
                    /* Placement too free-form to check here. */
                    return;
                }

                let prev_tok = attributes.front().prev().prev();
                let acceptable = prev_tok.is_invalid()
                    || matches!(
                        prev_tok.token_type().0,
                        b'(' | b'{' | b';' | b',' | b'}' | b')' | b'\n' | b' '
                    );
                if !acceptable {
                    report_tok(
                        reporter,
                        attr,
                        "attribute must be declared at a start of a declaration",
                    );
                    invalid = true;
                }
            });
            if invalid {
                /* Erase invalid attributes to avoid spawning more errors. */
                edits.erase_scope(attributes.parent());
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
    fn sequences_merge_to_single_list() {
        let reporter = Reporter::sink();
        let mut form = form("[[vertex]] [[node]] void fn()\n{\n}\n");
        lower_attribute_sequences(&mut form, &reporter);
        assert!(form.str().contains("[[vertex,"), "{:?}", form.str());
        assert!(!form.str().contains("]] [["), "{:?}", form.str());
    }

    #[test]
    fn three_sequences_merge_to_fixpoint() {
        let reporter = Reporter::sink();
        let mut form = form("[[a_attr]] [[b_attr]] [[c_attr]] void fn()\n{\n}\n");
        // Unknown names are fine here; linting is a separate pass.
        lower_attribute_sequences(&mut form, &reporter);
        let open_count = form.str().matches("[[").count();
        assert_eq!(open_count, 1, "{:?}", form.str());
    }

    #[test]
    fn unknown_attribute_is_reported_and_erased() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  [[made_up]] int a = 0;\n}\n");
        lint_attributes(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 1);
        assert!(!form.str().contains("made_up"));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  [[flat(1)]] int a = 0;\n}\n");
        lint_attributes(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 1);
    }

    #[test]
    fn correct_attribute_passes() {
        let reporter = Reporter::sink();
        let mut form = form("struct [[host_shared]] S {\n  int a;\n};\n");
        lint_attributes(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 0);
        assert!(form.str().contains("host_shared"));
    }

    #[test]
    fn unroll_placement_is_checked() {
        let reporter = Reporter::sink();
        let mut form = form("void fn()\n{\n  [[unroll]] int a = 0;\n}\n");
        lint_attributes(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 1);
    }
}
