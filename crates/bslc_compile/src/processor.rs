//! The ordered source-to-source pipeline.
//!
//! [`SourceProcessor`] mutates shader sources into cross-API intermediate
//! sources that the GPU backends can consume, collecting the metadata
//! record along the way. Incompatible syntax is either lowered or
//! reported.

use log::debug;

use bslc_base::Reporter;
use bslc_parser::{IntermediateForm, ParseMode};

use crate::metadata::{hash, Builtin, Source, Symbol};
use crate::passes::*;

/// Input dialect of one source file.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Language {
    Unknown,
    /// Shared C++ header; runs the full pipeline.
    Cpp,
    /// Metal shading language; include/pragma stripping only.
    Msl,
    /// Plain GLSL; lightweight processing.
    Glsl,
    /// BSL, the extended C++ dialect; runs the full pipeline.
    Bsl,
}

impl Language {
    pub fn from_filename(filename: &str) -> Language {
        if filename.ends_with(".msl") {
            Language::Msl
        } else if filename.ends_with(".bsl") || filename.ends_with(".bsl.hh") {
            Language::Bsl
        } else if filename.ends_with(".glsl") {
            Language::Glsl
        } else if filename.ends_with(".hh") {
            Language::Cpp
        } else {
            Language::Unknown
        }
    }
}

/// Transpilation output: the shader source and its metadata record.
pub struct ProcessResult {
    pub source: String,
    pub metadata: Source,
}

/// Shader source preprocessor converting one source file into the
/// intermediate language understood by every GPU backend.
pub struct SourceProcessor<'a, 'r, 'c> {
    source: &'a str,
    filepath: &'a str,
    language: Language,
    reporter: &'r Reporter<'c>,
}

impl<'a, 'r, 'c> SourceProcessor<'a, 'r, 'c> {
    pub fn new(
        source: &'a str,
        filepath: &'a str,
        language: Language,
        reporter: &'r Reporter<'c>,
    ) -> Self {
        Self {
            source,
            filepath,
            language,
            reporter,
        }
    }

    fn filename(&self) -> &'a str {
        match self.filepath.rfind('/') {
            Some(pos) => &self.filepath[pos + 1..],
            None => self.filepath,
        }
    }

    /// Converts the source to the intermediate language, collecting
    /// metadata. `external_symbols` is the namespace symbol set harvested
    /// from dependencies.
    pub fn convert(&self, external_symbols: Vec<Symbol>) -> ProcessResult {
        let reporter = self.reporter;
        let mut metadata = Source::default();

        if self.language == Language::Unknown {
            reporter.report(0, 0, "", "Unknown file type");
            return ProcessResult {
                source: String::new(),
                metadata,
            };
        }

        metadata.symbol_table.extend(external_symbols);

        let filename = self.filename();

        let mut text = cleanup::remove_comments(self.source, reporter);
        if matches!(self.language, Language::Bsl | Language::Cpp) {
            text = directives::disabled_code_mutation(&text, reporter);
        } else {
            // Trailing whitespace makes the later passes slower.
            text = cleanup::cleanup_whitespace_str(&text, reporter);
        }
        text = shared::threadgroup_variables_parse_and_remove(&text, &mut metadata, reporter);

        match self.language {
            Language::Bsl | Language::Cpp => {
                self.parse_builtins(&text, filename, false, &mut metadata);
                let mut form = IntermediateForm::new(&text, ParseMode::Full, reporter);

                /* Preprocessor directive parsing and linting. */
                if self.language == Language::Bsl {
                    directives::lint_pragma_once(&form, filename, reporter);
                }
                directives::parse_pragma_runtime_generated(&form, &mut metadata);
                directives::parse_includes(&mut form, &mut metadata);
                directives::parse_defines(&form, &mut metadata);
                directives::parse_legacy_create_info(&mut form, &mut metadata, reporter);
                functions::parse_library_functions(&form, &mut metadata, reporter);

                directives::lower_preprocessor(&mut form);

                form.apply_mutations(reporter);

                /* Early out for certain files. */
                if form.str().contains("\n#pragma no_processing") {
                    cleanup::cleanup_whitespace(&mut form, reporter);
                    return ProcessResult {
                        source: cleanup::line_directive_prefix(filename) + &form.into_result(),
                        metadata,
                    };
                }

                namespaces::parse_local_symbols(&form, &mut metadata);

                debug!("{filename}: structural lowering");
                // Lower high-level parsing complexity: merge combinable
                // tokens, remove unsupported or no-op tokens. These steps
                // are independent of each other.
                attribute::lower_attribute_sequences(&mut form, reporter);
                strings::lower_strings_sequences(&mut form, reporter);
                structs::lower_swizzle_methods(&mut form);
                structs::lower_classes(&mut form);
                structs::lower_noop_keywords(&mut form, reporter);
                structs::lower_trailing_comma_in_list(&mut form);
                structs::lower_comma_separated_declarations(&mut form);

                form.apply_mutations(reporter);

                debug!("{filename}: linting");
                /* Valid syntax with invalid usage. */
                lint::lint_unbraced_statements(&form, reporter);
                lint::lint_reserved_tokens(&form, reporter);
                attribute::lint_attributes(&mut form, reporter);
                lint::lint_global_scope_constants(&form, reporter);
                structs::lint_constructors(&form, reporter);
                structs::lint_forward_declared_structs(&form, reporter);

                /* Remove the C++ accessor templates before templates. */
                resource_table::lower_srt_accessor_templates(&mut form, reporter);
                unions::lower_union_accessor_templates(&mut form, reporter);

                debug!("{filename}: templates");
                templates::lower_template_dependent_names(&mut form, reporter);
                templates::lower_templates(&mut form, reporter);

                debug!("{filename}: namespaces");
                namespaces::lower_using(&mut form, reporter);
                namespaces::lower_namespaces(&mut form, &metadata, reporter);
                namespaces::lower_scope_resolution_operators(&mut form, reporter);

                debug!("{filename}: unions and shared structs");
                unions::lower_unions(&mut form, reporter);
                shared::lower_host_shared_structures(&mut form, reporter);

                enums::lower_enums(&mut form, reporter);

                debug!("{filename}: resources and entry points");
                entry_points::lower_entry_points(&mut form, &mut metadata, reporter);
                entry_points::lower_pipeline_definition(&mut form, filename, &mut metadata, reporter);
                resource_table::lower_resource_table(&mut form, &mut metadata, reporter);
                resource_table::lower_resource_access_functions(&mut form, reporter);

                debug!("{filename}: methods");
                structs::lower_default_constructors(&mut form, reporter);
                form.apply_mutations(reporter);
                functions::lower_function_default_arguments(&mut form, reporter);
                structs::lower_implicit_member(&mut form, reporter);
                structs::lower_method_definitions(&mut form, reporter);
                structs::lower_method_calls(&mut form, reporter);
                structs::lower_empty_struct(&mut form, reporter);

                resource_table::lower_srt_member_access(&mut form, reporter);
                resource_table::lower_srt_arguments(&mut form, reporter);
                entry_points::lower_entry_points_signature(&mut form, reporter);
                entry_points::lower_stage_function(&mut form, reporter);

                debug!("{filename}: strings");
                strings::lower_assert(&mut form, filename, reporter);
                strings::lower_strings(&mut form, &mut metadata, reporter);
                strings::lower_printf(&mut form, reporter);

                debug!("{filename}: initializers");
                functions::lower_implicit_return_types(&mut form);
                form.apply_mutations(reporter);
                functions::lower_initializer_implicit_types(&mut form, reporter);
                functions::lower_designated_initializers(&mut form, reporter);
                functions::lower_aggregate_initializers(&mut form, reporter);
                functions::lower_array_initializations(&mut form, reporter);
                namespaces::lower_scope_resolution_operators(&mut form, reporter);

                debug!("{filename}: references and control flow");
                references::lower_reference_arguments(&mut form, reporter);
                references::lower_reference_variables(&mut form, reporter);

                flow_control::lower_static_branch(&mut form, reporter);
                /* Unroll last to keep other passes off the copies. */
                flow_control::lower_loop_unroll(&mut form, reporter);

                /* GLSL syntax compatibility. */
                references::lower_argument_qualifiers(&mut form, reporter);

                /* Cleanup: smaller and more readable output. */
                cleanup::cleanup_whitespace(&mut form, reporter);
                cleanup::cleanup_empty_lines(&mut form, reporter);
                cleanup::cleanup_line_directives(&mut form, reporter);

                metadata.sort_symbols();

                ProcessResult {
                    source: cleanup::line_directive_prefix(filename) + &form.into_result(),
                    metadata,
                }
            }
            Language::Msl => {
                let mut form = IntermediateForm::new(&text, ParseMode::Full, reporter);
                directives::parse_pragma_runtime_generated(&form, &mut metadata);
                directives::parse_includes(&mut form, &mut metadata);
                directives::lower_preprocessor(&mut form);
                form.apply_mutations(reporter);
                let text = form.into_result();
                let text = references::argument_decorator_macro_injection(&text, reporter);
                let text = references::array_constructor_macro_injection(&text, reporter);
                ProcessResult {
                    source: cleanup::line_directive_prefix(filename) + &text,
                    metadata,
                }
            }
            Language::Glsl => {
                self.parse_builtins(&text, filename, true, &mut metadata);
                let text = references::argument_decorator_macro_injection(&text, reporter);
                let text = references::array_constructor_macro_injection(&text, reporter);
                ProcessResult {
                    source: cleanup::line_directive_prefix(filename) + &text,
                    metadata,
                }
            }
            Language::Unknown => unreachable!("checked above"),
        }
    }

    /// Lightweight parsing: only `dependencies` and `symbol_table` are
    /// populated. Used to harvest dependency symbol sets.
    pub fn parse_include_and_symbols(&self) -> Source {
        let reporter = self.reporter;
        let mut metadata = Source::default();

        let text = cleanup::remove_comments(self.source, reporter);
        let text = directives::disabled_code_mutation(&text, reporter);

        let mut form = IntermediateForm::new(&text, ParseMode::Full, reporter);
        directives::parse_pragma_runtime_generated(&form, &mut metadata);
        directives::parse_includes(&mut form, &mut metadata);

        form.apply_mutations(reporter);

        directives::lower_preprocessor(&mut form);

        form.apply_mutations(reporter);

        namespaces::parse_local_symbols(&form, &mut metadata);

        metadata
    }

    /// Returns the input with comments removed.
    pub fn remove_comments(&self) -> String {
        cleanup::remove_comments(self.source, self.reporter)
    }

    /// Populates `metadata.builtins` by scanning the source for builtin
    /// spellings. Can trigger false positives inside disabled regions;
    /// most builtins should come from BSL entry points instead.
    fn parse_builtins(&self, text: &str, filename: &str, pure_glsl: bool, metadata: &mut Source) {
        let mut tokens: Vec<&str> = vec![
            "gl_FragCoord",
            "gl_FragStencilRefARB",
            "gl_FrontFacing",
            "gl_GlobalInvocationID",
            "gpu_InstanceIndex",
            "gpu_BaseInstance",
            "gl_InstanceID",
            "gl_LocalInvocationID",
            "gl_LocalInvocationIndex",
            "gl_NumWorkGroup",
            "gl_PointCoord",
            "gl_PointSize",
            "gl_PrimitiveID",
            "gl_VertexID",
            "gl_WorkGroupID",
            "gl_WorkGroupSize",
        ];

        if pure_glsl {
            // Costly false positives: only scanned for plain GLSL input.
            tokens.push("gl_ClipDistance");
        } else {
            tokens.push("drw_debug_");
            tokens.push("printf");
            tokens.push("assert");
        }

        let _ = filename;
        for token in tokens {
            if text.contains(token) {
                metadata.builtins.push(Builtin(hash(token)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(src: &str, filename: &str) -> (ProcessResult, usize) {
        let reporter = Reporter::sink();
        let language = Language::from_filename(filename);
        let processor = SourceProcessor::new(src, filename, language, &reporter);
        let result = processor.convert(Vec::new());
        (result, reporter.error_count())
    }

    #[test]
    fn language_detection_from_filename() {
        assert_eq!(Language::from_filename("a.msl"), Language::Msl);
        assert_eq!(Language::from_filename("a.glsl"), Language::Glsl);
        assert_eq!(Language::from_filename("a.bsl"), Language::Bsl);
        assert_eq!(Language::from_filename("a.bsl.hh"), Language::Bsl);
        assert_eq!(Language::from_filename("a.hh"), Language::Cpp);
        assert_eq!(Language::from_filename("a.txt"), Language::Unknown);
    }

    #[test]
    fn unknown_language_is_an_error() {
        let (result, errors) = convert("int a;\n", "file.txt");
        assert!(result.source.is_empty());
        assert_eq!(errors, 1);
    }

    #[test]
    fn empty_input_produces_prefix_only() {
        let (result, errors) = convert("", "shader.bsl");
        assert_eq!(errors, 0);
        assert_eq!(result.source, "#line 1 \"shader.bsl\"\n");
        assert!(result.metadata.dependencies.is_empty());
    }

    #[test]
    fn output_starts_with_line_directive() {
        let (result, errors) = convert("void fn()\n{\n}\n", "shader.bsl");
        assert_eq!(errors, 0, "{}", result.source);
        assert!(result.source.starts_with("#line 1 \"shader.bsl\"\n"));
    }

    #[test]
    fn include_dependencies_are_tracked_through_conditions() {
        // Disabled include branches contribute nothing.
        let src = "#include \"a.hh\"\n#if 0\n#  include \"c.hh\"\n#else\n#  include \"d.hh\"\n#endif\nvoid fn()\n{\n}\n";
        let (result, errors) = convert(src, "shader.bsl");
        assert_eq!(errors, 0, "{}", result.source);
        assert_eq!(result.metadata.dependencies, vec!["a.hh", "d.hh"]);
    }

    #[test]
    fn builtin_scan_records_referenced_builtins() {
        let (result, _) = convert("void fn()\n{\n  v = gl_FragCoord;\n}\n", "shader.bsl");
        assert!(result.metadata.builtins.contains(&Builtin::FRAG_COORD));
    }

    #[test]
    fn msl_is_passed_through_with_include_stripping() {
        let src = "#include \"common.msl\"\nkernel void fn() {}\n";
        let (result, errors) = convert(src, "shader.msl");
        assert_eq!(errors, 0);
        assert!(!result.source.contains("#include"));
        assert!(result.source.contains("kernel void fn()"));
    }

    #[test]
    fn no_processing_pragma_short_circuits() {
        let src = "int a;\n#pragma no_processing\ntemplate<typename T> struct Keep {};\n";
        let (result, errors) = convert(src, "shader.bsl");
        assert_eq!(errors, 0, "{}", result.source);
        assert!(result.source.contains("template<typename T> struct Keep {};"));
    }

    #[test]
    fn full_pipeline_on_a_representative_shader() {
        let src = r#"#include "common_lib.hh"

struct Data {
  float weight;

  float scaled(const float factor) const
  {
    return weight * factor;
  }
};

void helper(float &value)
{
  value = 1.0f;
}

void accumulate()
{
  Data d = Data{};
  float result;
  helper(result);
  [[unroll]] for (int i = 0; i < 2; i++) {
    result += d.scaled(2.0f);
  }
}
"#;
        let (result, errors) = convert(src, "shader.bsl");
        let out = &result.source;
        assert_eq!(errors, 0, "{out}");
        // Includes stripped and tracked.
        assert!(!out.contains("#include"), "{out}");
        assert_eq!(result.metadata.dependencies, vec!["common_lib.hh"]);
        // Methods got this-parameters and moved out.
        assert!(out.contains("_scaled(const Data this_"), "{out}");
        assert!(out.contains("_scaled(d, 2.0f)"), "{out}");
        // References lowered, then folded into the `_ref` compatibility
        // macro by the legacy qualifier pass.
        assert!(out.contains("_ref(float ,value)"), "{out}");
        // Default constructor synthesized and called.
        assert!(out.contains("Data_ctor_()"), "{out}");
        // The loop got unrolled.
        assert!(!out.contains("[[unroll]]"), "{out}");
        assert!(!out.contains("for "), "{out}");
    }

    #[test]
    fn second_run_is_idempotent_on_plain_code() {
        let src = "void fn()\n{\n  int a = 1;\n}\n";
        let (first, errors) = convert(src, "shader.bsl");
        assert_eq!(errors, 0);
        // Strip the line prefix before re-feeding.
        let body = first.source.strip_prefix("#line 1 \"shader.bsl\"\n").unwrap();
        let (second, errors) = convert(body, "shader.bsl");
        assert_eq!(errors, 0);
        assert_eq!(first.source, second.source);
    }

    #[test]
    fn lightweight_scan_populates_symbols_and_includes() {
        let reporter = Reporter::sink();
        let src = "#include \"dep.hh\"\nnamespace ns {\nvoid fn()\n{\n}\n}\n";
        let processor = SourceProcessor::new(src, "lib.hh", Language::Cpp, &reporter);
        let metadata = processor.parse_include_and_symbols();
        assert_eq!(metadata.dependencies, vec!["dep.hh"]);
        assert_eq!(metadata.symbol_table.len(), 1);
        assert_eq!(metadata.symbol_table[0].identifier, "fn");
        assert_eq!(metadata.symbol_table[0].name_space, "ns::");
    }
}
