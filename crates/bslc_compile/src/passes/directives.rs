//! Preprocessor-directive parsing: includes, defines, pragmas, and the
//! legacy create-info blocks.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, IntermediateForm, ParseMode};

use super::report_tok;
use crate::metadata::{Builtin, Source};

/// Records `#define`/`#undef` bodies so the create infos can re-emit
/// shared defines downstream.
pub fn parse_defines(form: &IntermediateForm, metadata: &mut Source) {
    form.root().foreach_match("#A", |m| {
        let directive = m[1].str_view();
        if directive == "define" || directive == "undef" {
            metadata
                .create_infos_defines
                .push(m[1].next().scope().str_with_whitespace());
        }
    });
}

/// Records `#include` dependencies, dropping the IDE-only compatibility
/// headers which exist purely for linting.
pub fn parse_includes(form: &mut IntermediateForm, metadata: &mut Source) {
    let (root, edits) = form.parts();
    root.foreach_match("#A\"", |m| {
        if m[1].str_view() != "include" {
            return;
        }
        let mut dependency = m[2].str_exclusive();

        if dependency.contains("defines.hh") {
            // Dependencies between create infos are not needed for
            // reflection, only the dependencies on the defines are.
            metadata.create_infos_dependencies.push(dependency.clone());
        }

        if dependency == "BLI_utildefines_variadic.h"
            || dependency == "gpu_shader_compat.hh"
            || dependency.contains("gpu_shader_create_info.hh")
        {
            // IDE-only stubs: skip.
            edits.erase_tokens(m[0], m[2]);
            return;
        }

        if let Some(stripped) = dependency.strip_prefix("infos/") {
            dependency = stripped.to_string();
        }

        metadata.dependencies.push(dependency);
    });
}

pub fn parse_pragma_runtime_generated(form: &IntermediateForm, metadata: &mut Source) {
    if form.str().contains("\n#pragma runtime_generated") {
        metadata.builtins.push(Builtin::RUNTIME_GENERATED);
    }
}

/// Header-like files must carry `#pragma once` for the include semantics.
pub fn lint_pragma_once(form: &IntermediateForm, filename: &str, reporter: &Reporter) {
    if !filename.contains("_lib.") && !filename.contains(".hh") {
        return;
    }
    if !form.str().contains("\n#pragma once") && !form.str().starts_with("#pragma once") {
        reporter.report(0, 0, "", "Header files must contain #pragma once directive.");
    }
}

/// Removes directives unsupported by the target shading languages
/// (`#include`, `#pragma once`, `#pragma runtime_generated`).
pub fn lower_preprocessor(form: &mut IntermediateForm) {
    let (root, edits) = form.parts();
    root.foreach_match("#A", |m| {
        if m[1].str_view() == "pragma" {
            let next = m[1].next();
            if next.str_view() == "once" || next.str_view() == "runtime_generated" {
                edits.erase_tokens(m[0], next);
            }
        } else if m[1].str_view() == "include" && m[1].next() == TokenType::STRING {
            edits.erase_tokens(m[0], m[1].next());
        }
    });
}

/// Placeholder for the GLSL declarations generated by the GPU backends.
pub fn get_create_info_placeholder(name: &str) -> String {
    let mut out = String::new();
    for section in ["RES_PASS", "RES_BATCH", "RES_GEOMETRY", "RES_SHARED_VARS"] {
        out.push_str(&format!("#ifdef CREATE_INFO_{section}_{name}\n"));
        out.push_str(&format!("CREATE_INFO_{section}_{name}\n"));
        out.push_str("#endif\n");
    }
    out
}

/// Captures legacy create-info blocks into the metadata record, replacing
/// them with placeholder guards.
pub fn parse_legacy_create_info(
    form: &mut IntermediateForm,
    metadata: &mut Source,
    reporter: &Reporter,
) {
    {
        let (root, edits) = form.parts();
        // Resource-table structs get their backend placeholder early so
        // generated declarations resolve.
        root.foreach_token(b'[', |open| {
            if open.next() != b'[' {
                return;
            }
            let attrs = open.next().scope();
            if attrs.kind() != scope_kind::ATTRIBUTES
                || attrs.str_with_whitespace() != "[resource_table]"
            {
                return;
            }
            let ty = attrs.parent().back().next();
            let struct_keyword = attrs.parent().front().prev();
            if ty != TokenType::WORD || struct_keyword != TokenType::STRUCT {
                return;
            }
            edits.insert_before(struct_keyword, get_create_info_placeholder(ty.str_view()));
            edits.insert_line_number_pos(
                struct_keyword.str_index_start().saturating_sub(1),
                struct_keyword.line_number(),
            );
        });

        root.foreach_match("A(..)", |m| {
            let name = m[0].str_view();
            let data = m[0].data_ref();
            match name {
                "CREATE_INFO_VARIANT" => {
                    let variant_name = m[1].scope().front().next().to_str();
                    metadata.create_infos.push(variant_name.clone());

                    let decl = data.src
                        [m[0].str_index_start()..=m[4].str_index_last()]
                        .to_string();
                    metadata.create_infos_declarations.push(decl);

                    edits.replace_tokens(m[0], m[4], get_create_info_placeholder(&variant_name));
                }
                "GPU_SHADER_CREATE_INFO" => {
                    let variant_name = m[1].scope().front().next().to_str();
                    metadata.create_infos.push(variant_name.clone());

                    let end_tok = "GPU_SHADER_CREATE_END()";
                    let search_from = m[4].str_index_last();
                    let Some(end_pos) = data.src[search_from..]
                        .find(end_tok)
                        .map(|p| p + search_from)
                    else {
                        report_tok(reporter, m[0], "Missing create info end.");
                        return;
                    };
                    let end = end_pos + end_tok.len();
                    metadata
                        .create_infos_declarations
                        .push(data.src[m[0].str_index_start()..end].to_string());
                    edits.replace_range(
                        m[0].str_index_start(),
                        end - 1,
                        get_create_info_placeholder(&variant_name),
                    );
                }
                "GPU_SHADER_NAMED_INTERFACE_INFO" => {
                    let end_str = "GPU_SHADER_NAMED_INTERFACE_END(";
                    let search_from = m[4].str_index_last();
                    let Some(end_pos) = data.src[search_from..]
                        .find(end_str)
                        .map(|p| p + search_from)
                    else {
                        report_tok(reporter, m[0], "Missing create info end.");
                        return;
                    };
                    let Some(close) = data.src[end_pos..].find(')').map(|p| p + end_pos) else {
                        report_tok(reporter, m[0], "Missing parenthesis at info end.");
                        return;
                    };
                    metadata
                        .create_infos_declarations
                        .push(data.src[m[0].str_index_start()..=close].to_string());
                    edits.erase_range(&data.src, m[0].str_index_start(), close);
                }
                "GPU_SHADER_INTERFACE_INFO" => {
                    let end_str = "GPU_SHADER_INTERFACE_END()";
                    let search_from = m[4].str_index_last();
                    let Some(end_pos) = data.src[search_from..]
                        .find(end_str)
                        .map(|p| p + search_from)
                    else {
                        report_tok(reporter, m[0], "Missing create info end.");
                        return;
                    };
                    let end = end_pos + end_str.len();
                    metadata
                        .create_infos_declarations
                        .push(data.src[m[0].str_index_start()..end].to_string());
                    edits.erase_range(&data.src, m[0].str_index_start(), end - 1);
                }
                _ => {}
            }
        });
    }
    form.apply_mutations(reporter);
}

/// Erases the code under `#ifndef GPU_SHADER` / `#if !defined(GPU_SHADER)`
/// / `#if 0` guards before real parsing, so host-only code never reaches
/// the transpiler.
pub fn disabled_code_mutation(text: &str, reporter: &Reporter) -> String {
    let mut form = IntermediateForm::new(text, ParseMode::Full, reporter);
    {
        let (root, edits) = form.parts();

        let process_disabled_scope = |edits: &mut bslc_parser::Edits, start_tok: bslc_parser::Token<'_>| {
            let data = start_tok.data_ref();
            // Search for the end of scope with the same indentation.
            // Assumes formatted input.
            let hash = start_tok.str_with_whitespace();
            let end_str = format!("{hash}endif");
            let from = start_tok.str_index_start();
            let Some(scope_end) = data.src[from..].find(&end_str).map(|p| p + from) else {
                report_tok(reporter, start_tok, "Couldn't find end of disabled scope.");
                return;
            };
            // An else/elif with the same indentation keeps its branch.
            let else_str = format!("{hash}el");
            let scope_else = data.src[from..].find(&else_str).map(|p| p + from);
            match scope_else {
                Some(else_pos) if else_pos < scope_end => {
                    // Only erase the content, keep the directives.
                    edits.erase_range(&data.src, start_tok.line_end() + 1, else_pos - 1);
                }
                _ => {
                    // Erase the content and the directives.
                    edits.erase_range(&data.src, from, scope_end + end_str.len() - 1);
                }
            }
        };

        root.foreach_match("#AA", |m| {
            if m[1].str_view() == "ifndef" && m[2].str_view() == "GPU_SHADER" {
                process_disabled_scope(edits, m[0]);
            }
        });
        root.foreach_match("#i!A(A)", |m| {
            if m[3].str_view() == "defined" && m[5].str_view() == "GPU_SHADER" {
                process_disabled_scope(edits, m[0]);
            }
        });
        root.foreach_match("#i1", |m| {
            if m[2].str_view() == "0" {
                process_disabled_scope(edits, m[0]);
            }
        });
    }
    form.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (IntermediateForm, Reporter<'static>) {
        let reporter = Reporter::sink();
        let form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        (form, reporter)
    }

    #[test]
    fn includes_are_recorded_and_erased_from_source() {
        let (mut form, reporter) = parse("#include \"common_lib.glsl\"\nint a;\n");
        let mut metadata = Source::default();
        parse_includes(&mut form, &mut metadata);
        assert_eq!(metadata.dependencies, vec!["common_lib.glsl"]);
        lower_preprocessor(&mut form);
        form.apply_mutations(&reporter);
        assert!(!form.str().contains("#include"));
    }

    #[test]
    fn ide_only_includes_are_filtered() {
        let (mut form, _reporter) = parse("#include \"gpu_shader_compat.hh\"\n");
        let mut metadata = Source::default();
        parse_includes(&mut form, &mut metadata);
        assert!(metadata.dependencies.is_empty());
    }

    #[test]
    fn infos_prefix_is_stripped() {
        let (mut form, _reporter) = parse("#include \"infos/my_shader_infos.hh\"\n");
        let mut metadata = Source::default();
        parse_includes(&mut form, &mut metadata);
        assert_eq!(metadata.dependencies, vec!["my_shader_infos.hh"]);
    }

    #[test]
    fn defines_are_recorded_for_create_infos() {
        let (form, _reporter) = parse("#define SIZE 4\nint a;\n");
        let mut metadata = Source::default();
        parse_defines(&form, &mut metadata);
        assert_eq!(metadata.create_infos_defines.len(), 1);
        assert!(metadata.create_infos_defines[0].contains("SIZE 4"));
    }

    #[test]
    fn runtime_generated_pragma_sets_builtin() {
        let (form, _reporter) = parse("int a;\n#pragma runtime_generated\n");
        let mut metadata = Source::default();
        parse_pragma_runtime_generated(&form, &mut metadata);
        assert_eq!(metadata.builtins, vec![Builtin::RUNTIME_GENERATED]);
    }

    #[test]
    fn pragma_once_lint_fires_for_headers() {
        let (form, reporter) = parse("int a;\n");
        lint_pragma_once(&form, "my_lib.hh", &reporter);
        assert_eq!(reporter.error_count(), 1);

        let (form, reporter) = parse("#pragma once\nint a;\n");
        lint_pragma_once(&form, "my_lib.hh", &reporter);
        assert_eq!(reporter.error_count(), 0);
    }

    #[test]
    fn disabled_if_zero_region_is_blanked() {
        let reporter = Reporter::sink();
        let src = "#if 0\nint host_only;\n#endif\nint gpu;\n";
        let out = disabled_code_mutation(src, &reporter);
        assert!(!out.contains("host_only"), "{out:?}");
        assert!(out.contains("int gpu;"));
        assert_eq!(out.matches('\n').count(), src.matches('\n').count());
    }

    #[test]
    fn disabled_region_with_else_keeps_directives() {
        let reporter = Reporter::sink();
        let src = "#ifndef GPU_SHADER\nint host_only;\n#else\nint gpu;\n#endif\n";
        let out = disabled_code_mutation(src, &reporter);
        assert!(!out.contains("host_only"), "{out:?}");
        assert!(out.contains("int gpu;"), "{out:?}");
        assert!(out.contains("#else"), "{out:?}");
    }

    #[test]
    fn legacy_create_info_block_is_captured() {
        let src = "GPU_SHADER_CREATE_INFO(my_info)\nDO_STATIC_COMPILATION()\nGPU_SHADER_CREATE_END()\nint a;\n";
        let (mut form, reporter) = parse(src);
        let mut metadata = Source::default();
        parse_legacy_create_info(&mut form, &mut metadata, &reporter);
        assert_eq!(metadata.create_infos, vec!["my_info"]);
        assert_eq!(metadata.create_infos_declarations.len(), 1);
        assert!(metadata.create_infos_declarations[0].contains("DO_STATIC_COMPILATION"));
        assert!(form.str().contains("#ifdef CREATE_INFO_RES_PASS_my_info"), "{:?}", form.str());
    }

    #[test]
    fn create_info_scenario_include_tracking() {
        // The include-tracking contract: disabled regions contribute no
        // dependencies.
        let reporter = Reporter::sink();
        let src = "#include \"a.hh\"\n#if 0\n#  include \"c.hh\"\n#else\n#  include \"d.hh\"\n#endif\n";
        let stripped = disabled_code_mutation(src, &reporter);
        let mut form = IntermediateForm::new(&stripped, ParseMode::Full, &reporter);
        let mut metadata = Source::default();
        parse_includes(&mut form, &mut metadata);
        assert_eq!(metadata.dependencies, vec!["a.hh", "d.hh"]);
    }
}
