//! Shader resource table (SRT) and stage interface lowering.
//!
//! A struct whose members carry resource attributes is partitioned into a
//! resource bucket or one of the stage interface buckets. Each bucket
//! becomes a metadata record; the struct itself gets a synthetic `new_()`
//! constructor, `access_<struct>_<field>()` macros and a create-info
//! placeholder block.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{scope_kind, Edits, IntermediateForm, Scope, Token};

use super::directives::get_create_info_placeholder;
use super::report_tok;
use crate::metadata::{
    FragmentOutputs, ParsedAttribute, ParsedFragOutput, ParsedResource, ParsedVertInput,
    ResourceTable, Source, StageInterface, VertexInputs,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SrtKind {
    Undefined,
    None,
    ResourceTable,
    VertexInput,
    VertexOutput,
    FragmentOutput,
}

fn is_resource_table_attribute(name: &str) -> bool {
    matches!(
        name,
        "sampler"
            | "image"
            | "uniform"
            | "storage"
            | "push_constant"
            | "compilation_constant"
            | "specialization_constant"
            | "legacy_info"
            | "resource_table"
    )
}

fn is_vertex_input_attribute(name: &str) -> bool {
    name == "attribute"
}

fn is_vertex_output_attribute(name: &str) -> bool {
    matches!(name, "flat" | "smooth" | "no_perspective")
}

fn is_fragment_output_attribute(name: &str) -> bool {
    matches!(name, "frag_color" | "frag_depth" | "frag_stencil_ref")
}

/// Members declared with `[[resource_table]]` must wrap their type with
/// `srt_t<T>`; the wrapper is checked and removed. Runs before
/// [`lower_resource_table`].
pub fn lower_srt_accessor_templates(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            st.body.foreach_declaration(|d| {
                if d.attributes.is_invalid() || d.attributes.get(1).str_view() != "resource_table"
                {
                    if d.var_type.str_view() == "srt_t" {
                        report_tok(
                            reporter,
                            d.name,
                            "The srt_t<T> template is only to be used with members declared with \
                             the [[resource_table]] attribute.",
                        );
                    }
                    return;
                }

                if d.var_type.str_view() != "srt_t" {
                    report_tok(
                        reporter,
                        d.var_type,
                        "Members declared with the [[resource_table]] attribute must wrap their \
                         type with the srt_t<T> template.",
                    );
                }

                if d.array.is_valid() {
                    report_tok(reporter, d.name, "[[resource_table]] members cannot be arrays.");
                }

                /* Remove the template but not the wrapped type. */
                if d.var_type.str_view() == "srt_t" {
                    edits.erase_token(d.var_type);
                }
                if d.template_args.is_valid() {
                    edits.erase_token(d.template_args.front());
                    edits.erase_token(d.template_args.back());
                }
            });
        });
    }
    form.apply_mutations(reporter);
}

/// Wraps member accesses of SRT variables in `srt_access(Type, member)`,
/// so later reference lowering can substitute them. Runs before the local
/// reference mutations.
pub fn lower_srt_member_access(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();

        fn member_access_mutation(
            edits: &mut Edits,
            attribute: Scope<'_>,
            ty: Token<'_>,
            var: Token<'_>,
            body_scope: Scope<'_>,
        ) {
            if attribute.get(2).str_view() != "resource_table" {
                return;
            }

            let is_func_prototype_decl = body_scope.is_invalid();
            let attr_container = attribute.parent().kind();
            let is_local_reference = attr_container != scope_kind::FUNCTION_ARGS
                && attr_container != scope_kind::FUNCTION_ARG;

            if is_local_reference || is_func_prototype_decl {
                edits.replace_scope(attribute, "");
            }

            // Pass by copy while the placeholder `*_new_()` results exist;
            // they cannot bind to references.
            if !is_local_reference && var.prev() == b'&' {
                edits.erase_token(var.prev());
            }

            let srt_type = ty.to_str();
            let srt_var = var.to_str();

            body_scope.foreach_match("A.A", |m| {
                if m[0].str_view() != srt_var {
                    return;
                }
                edits.replace_tokens_keep_whitespace(
                    m[0],
                    m[2],
                    format!("srt_access({srt_type}, {})", m[2].str_view()),
                );
            });
        }

        root.foreach_scope(scope_kind::FUNCTION_ARGS, |fn_args| {
            /* Parse both functions and prototypes. */
            let next = fn_args.next();
            let fn_body = if next.kind() == scope_kind::FUNCTION {
                next
            } else {
                Scope::invalid(fn_args.data_ref())
            };
            /* Function arguments. */
            fn_args.foreach_match("[[A]]c?A&A", |m| {
                member_access_mutation(edits, m[0].scope(), m[7], m[9], fn_body);
            });
            fn_args.foreach_match("[[A]]c?AA", |m| {
                if m[2].str_view() == "resource_table" {
                    edits.erase_scope(m[0].scope());
                    report_tok(reporter, m[8], "Shader Resource Table arguments must be references.");
                }
            });
        });

        root.foreach_scope(scope_kind::FUNCTION, |fn_body| {
            /* Local references. */
            fn_body.foreach_match("[[A]]c?A&A", |m| {
                member_access_mutation(edits, m[0].scope(), m[7], m[9], m[9].scope());
            });
            /* Local variables. */
            fn_body.foreach_match("[[A]]c?AA", |m| {
                member_access_mutation(edits, m[0].scope(), m[7], m[8], m[8].scope());
            });
        });
    }
    form.apply_mutations(reporter);
}

/// Guards functions taking SRT arguments with
/// `#if defined(CREATE_INFO_<type>)`, erasing the attribute. Runs after
/// [`super::entry_points::lower_entry_points_signature`].
pub fn lower_srt_arguments(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_function(|f| {
            let mut condition = String::new();
            f.args.foreach_match("[[A]]c?A", |m| {
                if m[2].str_view() != "resource_table" {
                    return;
                }
                condition.push_str(&format!(" && defined(CREATE_INFO_{})", m[7].str_view()));
                edits.replace_scope(m[0].scope(), "");
            });

            if !condition.is_empty() {
                /* Take attributes into account. */
                let first_tok = if f.return_type.prev() == b']' {
                    f.return_type.prev().scope().front()
                } else {
                    f.return_type
                };
                edits.insert_directive(first_tok.prev(), &format!("#if {}", &condition[4..]));
                edits.insert_directive(f.body.back(), "#endif");
            }
        });
    }
    form.apply_mutations(reporter);
}

/// Guards scopes calling the legacy resource accessors with create-info
/// conditions, returning a zero value from non-void functions when the
/// resource is absent.
pub fn lower_resource_access_functions(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_function(|f| {
            f.body.foreach_match("A(A,", |m| {
                let func_name = m[0].str_view();
                if !matches!(
                    func_name,
                    "specialization_constant_get"
                        | "shared_variable_get"
                        | "push_constant_get"
                        | "interface_get"
                        | "attribute_get"
                        | "buffer_get"
                        | "sampler_get"
                        | "image_get"
                ) {
                    return;
                }
                let info_name = m[2].str_view();
                let mut scope = m[0].scope();
                // The call can sit in an expression scope; walk up to the
                // containing statement block.
                while scope.is_valid()
                    && scope.kind() != scope_kind::FUNCTION
                    && scope.kind() != scope_kind::LOCAL
                {
                    scope = scope.parent();
                }

                let condition = format!("defined(CREATE_INFO_{info_name})");

                if scope.kind() == scope_kind::FUNCTION {
                    super::entry_points::guarded_scope_mutation(
                        edits,
                        scope,
                        &condition,
                        Some(f.return_type),
                    );
                } else {
                    super::entry_points::guarded_scope_mutation(edits, scope, &condition, None);
                }
            });
        });
    }
    form.apply_mutations(reporter);
}

fn parse_resource(
    reporter: &Reporter,
    attributes: Scope<'_>,
    ty: Token<'_>,
    name: Token<'_>,
    array: Scope<'_>,
) -> ParsedResource {
    let mut resource = ParsedResource::new(
        ty.line_number(),
        ty.to_str(),
        name.to_str(),
        if array.is_valid() { array.str_with_whitespace() } else { String::new() },
    );
    attributes.foreach_scope(scope_kind::ATTRIBUTE, |attribute| {
        let kind = attribute.get(0).to_str();
        match kind.as_str() {
            "sampler" => {
                resource.res_type = kind.clone();
                resource.res_slot = attribute.get(2).to_str();
            }
            "image" => {
                resource.res_type = kind.clone();
                resource.res_slot = attribute.get(2).to_str();
                resource.res_qualifier = attribute.get(4).to_str();
                resource.res_format = attribute.get(6).to_str();
            }
            "uniform" => {
                resource.res_type = kind.clone();
                resource.res_slot = attribute.get(2).to_str();
            }
            "storage" => {
                resource.res_type = kind.clone();
                resource.res_slot = attribute.get(2).to_str();
                resource.res_qualifier = attribute.get(4).to_str();
            }
            "push_constant" | "compilation_constant" | "resource_table" | "legacy_info" => {
                resource.res_type = kind.clone();
            }
            "specialization_constant" => {
                resource.res_type = kind.clone();
                resource.res_value = attribute.get(2).to_str();
            }
            "condition" => {
                let args = attribute.get(1).scope();
                args.foreach_token(TokenType::WORD.0, |tok| {
                    resource.res_condition.push_str(&format!(
                        "int {} = ShaderCreateInfo::find_constant(constants, \"{}\"); ",
                        tok.str_view(),
                        tok.str_view()
                    ));
                });
                resource
                    .res_condition
                    .push_str(&format!("return {};", args.to_str()));
            }
            "frequency" => {
                resource.res_frequency = attribute.get(2).to_str();
            }
            _ => report_tok(reporter, attribute.get(0), "Invalid attribute in resource table"),
        }
    });
    resource
}

fn parse_vertex_input(
    reporter: &Reporter,
    attributes: Scope<'_>,
    ty: Token<'_>,
    name: Token<'_>,
    array: Scope<'_>,
) -> ParsedVertInput {
    if array.is_valid() {
        report_tok(reporter, array.front(), "Array are not supported as vertex attributes");
    }

    let mut input = ParsedVertInput {
        line: ty.line_number(),
        var_type: ty.to_str(),
        var_name: name.to_str(),
        slot: String::new(),
    };

    if matches!(input.var_type.as_str(), "float3x3" | "float2x2" | "float4x4" | "float3x4") {
        report_tok(reporter, name, "Matrices are not supported as vertex attributes");
    }

    attributes.foreach_scope(scope_kind::ATTRIBUTE, |attribute| {
        if attribute.get(0).str_view() == "attribute" {
            input.slot = attribute.get(2).to_str();
        } else {
            report_tok(reporter, attribute.get(0), "Invalid attribute in vertex input interface");
        }
    });
    input
}

fn parse_vertex_output(
    reporter: &Reporter,
    struct_name: Token<'_>,
    attributes: Scope<'_>,
    ty: Token<'_>,
    name: Token<'_>,
    array: Scope<'_>,
) -> ParsedAttribute {
    if array.is_valid() {
        report_tok(reporter, array.front(), "Array are not supported in stage interface");
    }

    let attr = ParsedAttribute {
        line: ty.line_number(),
        var_type: ty.to_str(),
        var_name: format!("{}_{}", struct_name.str_view(), name.str_view()),
        interpolation_mode: attributes.get(1).to_str(),
    };

    if matches!(attr.var_type.as_str(), "float3x3" | "float2x2" | "float4x4" | "float3x4") {
        report_tok(reporter, name, "Matrices are not supported in stage interface");
    }

    if !matches!(attr.interpolation_mode.as_str(), "smooth" | "flat" | "no_perspective") {
        report_tok(reporter, attributes.get(0), "Invalid attribute in shader stage interface");
    }
    attr
}

fn parse_fragment_output(
    reporter: &Reporter,
    struct_name: Token<'_>,
    attributes: Scope<'_>,
    ty: Token<'_>,
    name: Token<'_>,
) -> ParsedFragOutput {
    let mut output = ParsedFragOutput {
        line: ty.line_number(),
        var_type: ty.to_str(),
        var_name: format!("{}_{}", struct_name.str_view(), name.str_view()),
        slot: String::new(),
        dual_source: String::new(),
        raster_order_group: String::new(),
    };

    attributes.foreach_scope(scope_kind::ATTRIBUTE, |attribute| {
        match attribute.get(0).str_view() {
            "frag_color" => output.slot = attribute.get(2).to_str(),
            "raster_order_group" => output.raster_order_group = attribute.get(2).to_str(),
            "index" => output.dual_source = attribute.get(2).to_str(),
            _ => report_tok(reporter, attributes.get(0), "Invalid attribute in fragment output interface"),
        }
    });
    output
}

/// Partitions decorated struct members into resource or stage-interface
/// buckets, collects the metadata records, and synthesizes the `new_()`
/// constructor and access macros for resource tables.
pub fn lower_resource_table(form: &mut IntermediateForm, metadata: &mut Source, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            let mut srt_kind = SrtKind::Undefined;
            let mut has_srt_members = false;

            let struct_name = st.name.to_str();
            let mut srt = ResourceTable {
                name: struct_name.clone(),
                resources: Vec::new(),
            };
            let mut vertex_in = VertexInputs {
                name: struct_name.clone(),
                inputs: Vec::new(),
            };
            let mut vertex_out = StageInterface {
                name: struct_name.clone(),
                attributes: Vec::new(),
            };
            let mut fragment_out = FragmentOutputs {
                name: struct_name.clone(),
                outputs: Vec::new(),
            };

            st.body.foreach_declaration(|d| {
                let decl_kind = if d.attributes.is_invalid() {
                    SrtKind::None
                } else {
                    let first = d.attributes.get(1).to_str();
                    if is_resource_table_attribute(&first) {
                        SrtKind::ResourceTable
                    } else if is_vertex_input_attribute(&first) {
                        SrtKind::VertexInput
                    } else if is_vertex_output_attribute(&first) {
                        SrtKind::VertexOutput
                    } else if is_fragment_output_attribute(&first) {
                        SrtKind::FragmentOutput
                    } else {
                        return;
                    }
                };

                if srt_kind == SrtKind::Undefined {
                    srt_kind = decl_kind;
                } else if srt_kind != decl_kind {
                    let expected = match srt_kind {
                        SrtKind::ResourceTable => "Structure expected to contain resources...",
                        SrtKind::VertexInput => "Structure expected to contain vertex inputs...",
                        SrtKind::VertexOutput => "Structure expected to contain vertex outputs...",
                        SrtKind::FragmentOutput => "Structure expected to contain fragment inputs...",
                        SrtKind::None => "Structure expected to contain plain data...",
                        SrtKind::Undefined => "",
                    };
                    if !expected.is_empty() {
                        report_tok(reporter, st.name, expected);
                    }
                    let got = match decl_kind {
                        SrtKind::ResourceTable => "...but member declared as resource.",
                        SrtKind::VertexInput => "...but member declared as vertex input.",
                        SrtKind::VertexOutput => "...but member declared as vertex output.",
                        SrtKind::FragmentOutput => "...but member declared as fragment output.",
                        SrtKind::None => "...but member declared as plain data.",
                        SrtKind::Undefined => "",
                    };
                    if !got.is_empty() {
                        report_tok(reporter, d.name, got);
                    }
                }

                match decl_kind {
                    SrtKind::ResourceTable => {
                        srt.resources.push(parse_resource(
                            reporter,
                            d.attributes,
                            d.var_type,
                            d.name,
                            d.array,
                        ));
                        if d.attributes.get(1).str_view() == "resource_table" {
                            has_srt_members = true;
                            edits.erase_scope(d.attributes.parent());
                            edits.erase_token(d.const_tok);
                        } else {
                            let data = d.name.data_ref();
                            edits.erase_range(
                                &data.src,
                                d.attributes.front().line_start(),
                                d.decl_end.line_end(),
                            );
                        }
                    }
                    SrtKind::VertexInput => {
                        vertex_in.inputs.push(parse_vertex_input(
                            reporter,
                            d.attributes,
                            d.var_type,
                            d.name,
                            d.array,
                        ));
                        edits.erase_scope(d.attributes.parent());
                    }
                    SrtKind::VertexOutput => {
                        vertex_out.attributes.push(parse_vertex_output(
                            reporter,
                            st.name,
                            d.attributes,
                            d.var_type,
                            d.name,
                            d.array,
                        ));
                        edits.erase_scope(d.attributes.parent());
                    }
                    SrtKind::FragmentOutput => {
                        fragment_out.outputs.push(parse_fragment_output(
                            reporter,
                            st.name,
                            d.attributes,
                            d.var_type,
                            d.name,
                        ));
                        edits.erase_scope(d.attributes.parent());
                    }
                    SrtKind::Undefined | SrtKind::None => {}
                }
            });

            match srt_kind {
                SrtKind::ResourceTable => metadata.resource_tables.push(srt.clone()),
                SrtKind::VertexInput => metadata.vertex_inputs.push(vertex_in),
                SrtKind::VertexOutput => metadata.stage_interfaces.push(vertex_out),
                SrtKind::FragmentOutput => metadata.fragment_outputs.push(fragment_out),
                SrtKind::Undefined | SrtKind::None => {}
            }

            if srt_kind != SrtKind::ResourceTable {
                return;
            }

            let end_of_srt = st.body.back().prev();

            // Static constructor, avoiding warnings on strict backends.
            let mut ctor = String::new();
            ctor.push_str(&format!("\nstatic {} new_()\n{{\n", srt.name));
            ctor.push_str(&format!("  {} result;\n", srt.name));
            if !has_srt_members {
                ctor.push_str("  result._pad = 0;\n");
            }
            for member in &srt.resources {
                if member.res_type == "resource_table" {
                    ctor.push_str(&format!(
                        "  result.{} = {}::new_();\n",
                        member.var_name, member.var_type
                    ));
                }
            }
            ctor.push_str("  return result;\n");
            /* Keep the line count and let empty structs stay empty. */
            ctor.push_str(&format!("#line {}\n", end_of_srt.line_number()));
            ctor.push_str("}\n");
            edits.insert_after(end_of_srt, ctor);

            let mut access_macros = String::new();
            for member in &srt.resources {
                if member.res_type == "resource_table" {
                    access_macros.push_str(&format!(
                        "#define access_{}_{}() {}::new_()\n",
                        srt.name, member.var_name, member.var_type
                    ));
                } else {
                    access_macros.push_str(&format!(
                        "#define access_{}_{}() {}\n",
                        srt.name, member.var_name, member.var_name
                    ));
                }
            }
            edits.insert_before(st.struct_tok, access_macros);
            edits.insert_before(st.struct_tok, get_create_info_placeholder(&srt.name));

            edits.insert_before(st.struct_tok, "\n");
            edits.insert_line_number_pos(
                st.struct_tok.str_index_start().saturating_sub(1),
                st.struct_tok.line_number(),
            );

            // Tag the struct so method mutations know it is an SRT.
            edits.insert_before(st.struct_tok, "[[resource_table]] ");
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
    fn resource_struct_is_partitioned() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let src = "\nstruct DrawSrt {\n  [[sampler(0)]] FLOAT_2D color_tx;\n  [[storage(1, read)]] DrawData buf;\n};\n";
        let mut form = form(src);
        lower_resource_table(&mut form, &mut metadata, &reporter);
        assert_eq!(metadata.resource_tables.len(), 1, "{:?}", form.str());
        let srt = &metadata.resource_tables[0];
        assert_eq!(srt.name, "DrawSrt");
        assert_eq!(srt.resources.len(), 2);
        assert_eq!(srt.resources[0].res_type, "sampler");
        assert_eq!(srt.resources[0].res_slot, "0");
        assert_eq!(srt.resources[0].var_name, "color_tx");
        assert_eq!(srt.resources[1].res_type, "storage");
        assert_eq!(srt.resources[1].res_qualifier, "read");
    }

    #[test]
    fn resource_struct_gets_ctor_and_macros() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let src = "\nstruct DrawSrt {\n  [[sampler(0)]] FLOAT_2D color_tx;\n};\n";
        let mut form = form(src);
        lower_resource_table(&mut form, &mut metadata, &reporter);
        let out = form.str();
        assert!(out.contains("static DrawSrt new_()"), "{out:?}");
        assert!(out.contains("#define access_DrawSrt_color_tx() color_tx"), "{out:?}");
        assert!(out.contains("#ifdef CREATE_INFO_RES_PASS_DrawSrt"), "{out:?}");
        assert!(out.contains("[[resource_table]] struct DrawSrt"), "{out:?}");
    }

    #[test]
    fn stage_interface_is_collected() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let src = "\nstruct VertOut {\n  [[smooth]] float4 color;\n  [[flat]] int index;\n};\n";
        let mut form = form(src);
        lower_resource_table(&mut form, &mut metadata, &reporter);
        assert_eq!(metadata.stage_interfaces.len(), 1);
        let interface = &metadata.stage_interfaces[0];
        assert_eq!(interface.attributes.len(), 2);
        assert_eq!(interface.attributes[0].interpolation_mode, "smooth");
        assert_eq!(interface.attributes[0].var_name, "VertOut_color");
        assert_eq!(interface.attributes[1].interpolation_mode, "flat");
    }

    #[test]
    fn vertex_inputs_are_collected() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let src = "\nstruct VertIn {\n  [[attribute(0)]] float3 position;\n};\n";
        let mut form = form(src);
        lower_resource_table(&mut form, &mut metadata, &reporter);
        assert_eq!(metadata.vertex_inputs.len(), 1);
        assert_eq!(metadata.vertex_inputs[0].inputs[0].slot, "0");
        assert_eq!(metadata.vertex_inputs[0].inputs[0].var_name, "position");
    }

    #[test]
    fn fragment_outputs_are_collected() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let src = "\nstruct FragOut {\n  [[frag_color(0)]] float4 color;\n};\n";
        let mut form = form(src);
        lower_resource_table(&mut form, &mut metadata, &reporter);
        assert_eq!(metadata.fragment_outputs.len(), 1);
        assert_eq!(metadata.fragment_outputs[0].outputs[0].slot, "0");
    }

    #[test]
    fn mixed_buckets_are_reported() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let src = "\nstruct Bad {\n  [[sampler(0)]] FLOAT_2D tx;\n  [[flat]] int index;\n};\n";
        let mut form = form(src);
        lower_resource_table(&mut form, &mut metadata, &reporter);
        assert!(reporter.error_count() >= 2);
    }

    #[test]
    fn srt_accessor_template_is_stripped() {
        let reporter = Reporter::sink();
        let src = "struct Outer {\n  [[resource_table]] srt_t<Inner> inner;\n};\n";
        let mut form = form(src);
        lower_srt_accessor_templates(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 0);
        let out = form.str();
        assert!(!out.contains("srt_t"), "{out:?}");
        assert!(out.contains("Inner"), "{out:?}");
    }

    #[test]
    fn srt_member_access_is_wrapped() {
        let reporter = Reporter::sink();
        let src = "void fn([[resource_table]] DrawSrt &srt)\n{\n  x = srt.color_tx;\n}\n";
        let mut form = form(src);
        lower_srt_member_access(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("srt_access(DrawSrt, color_tx)"), "{out:?}");
        assert_eq!(reporter.error_count(), 0, "{out:?}");
    }

    #[test]
    fn srt_argument_by_value_is_reported() {
        let reporter = Reporter::sink();
        let src = "void fn([[resource_table]] DrawSrt srt)\n{\n}\n";
        let mut form = form(src);
        lower_srt_member_access(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn srt_arguments_get_create_info_guard() {
        let reporter = Reporter::sink();
        let src = "\nvoid fn([[resource_table]] DrawSrt srt)\n{\n  work();\n}\n";
        let mut form = form(src);
        lower_srt_arguments(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("#if  defined(CREATE_INFO_DrawSrt)") || out.contains("#if defined(CREATE_INFO_DrawSrt)"), "{out:?}");
        assert!(out.contains("#endif"), "{out:?}");
    }

    #[test]
    fn resource_access_guard_with_default_return() {
        let reporter = Reporter::sink();
        let src = "\nfloat4 fn()\n{\n  return interface_get(draw_resource_id_varying, v);\n}\n";
        let mut form = form(src);
        lower_resource_access_functions(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("#if defined(CREATE_INFO_draw_resource_id_varying)"), "{out:?}");
        assert!(out.contains("return float4(0);"), "{out:?}");
        assert!(out.contains("#endif"), "{out:?}");
    }
}
