//! Entry point lowering: per-argument builtin attributes, signature
//! erasure, stage guards, and pipeline declarations.

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{Edits, IntermediateForm, Scope, Token};

use super::report_tok;
use crate::metadata::{hash, Builtin, Source};

/// Entry-point argument validation: expected type spelling and constness.
struct BuiltinRule {
    glsl_name: &'static str,
    builtin_bit: Option<&'static str>,
    builtin_hash: Option<Builtin>,
}

/// Makes a scope only active under the given preprocessor condition.
/// Functions with a non-void trivial return type get an `#else` branch
/// returning zero so disabled code still compiles.
pub fn guarded_scope_mutation(
    edits: &mut Edits,
    scope: Scope<'_>,
    condition: &str,
    fn_type: Option<Token<'_>>,
) {
    let line_start = format!("#line {}\n", scope.front().next().line_number());

    let guard_start = format!("#if {condition}");
    let mut guard_else = String::new();
    if let Some(fn_type) = fn_type {
        if fn_type.is_valid() && fn_type.str_view() != "void" {
            let ty = fn_type.str_view();
            let is_trivial = matches!(
                ty,
                "float" | "float2" | "float3" | "float4" | "int" | "int2" | "int3" | "int4"
                    | "uint" | "uint2" | "uint3" | "uint4" | "float2x2" | "float2x3" | "float2x4"
                    | "float3x2" | "float3x3" | "float3x4" | "float4x2" | "float4x3" | "float4x4"
            );
            guard_else.push_str("#else\n");
            guard_else.push_str(&line_start);
            guard_else.push_str(&format!(
                "  return {ty}{};\n",
                if is_trivial { "(0)" } else { "{}" }
            ));
        }
    }
    let guard_end = format!("{guard_else}#endif");

    edits.insert_directive(scope.front(), &guard_start);
    edits.insert_directive(scope.back().prev(), &guard_end);
}

/// Parses entry point definitions, rewriting every parameter usage to the
/// corresponding global resource or `gl_*` builtin, and recording the
/// derived create-info declaration.
pub fn lower_entry_points(form: &mut IntermediateForm, metadata: &mut Source, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_function(|f| {
            let mut is_entry_point = false;
            let mut is_compute = false;
            let mut is_vertex = false;
            let mut is_fragment = false;
            let mut early_frag_test = false;
            let mut local_size = String::new();

            if f.return_type.prev() == b']' {
                let attributes = f.return_type.prev().prev().scope();
                if attributes.kind() == bslc_parser::scope_kind::ATTRIBUTES {
                    attributes.foreach_attribute(|attr, attr_scope| match attr.str_view() {
                        "vertex" => {
                            is_vertex = true;
                            is_entry_point = true;
                        }
                        "fragment" => {
                            is_fragment = true;
                            is_entry_point = true;
                        }
                        "compute" => {
                            is_compute = true;
                            is_entry_point = true;
                        }
                        "early_fragment_tests" => early_frag_test = true,
                        "local_size" => local_size = attr_scope.to_str(),
                        _ => {}
                    });
                }
            }

            if is_entry_point && f.return_type.str_view() != "void" {
                report_tok(reporter, f.return_type, "Entry point function must return void.");
                return;
            }

            let fn_body = f.body;
            let replace_word = |edits: &mut Edits, replaced: &str, replacement: &str| {
                fn_body.foreach_token(TokenType::WORD.0, |tok| {
                    if tok.str_view() == replaced {
                        edits.replace_token_keep_whitespace(tok, replacement);
                    }
                });
            };
            let replace_word_and_accessor = |edits: &mut Edits, replaced: &str, replacement: &str| {
                fn_body.foreach_token(TokenType::WORD.0, |tok| {
                    if tok.next() == b'.' && tok.str_view() == replaced {
                        edits.replace_tokens(tok, tok.next(), replacement);
                    }
                });
            };

            let mut create_info = format!("GPU_SHADER_CREATE_INFO({}_infos_)\n", f.name.str_view());

            if !local_size.is_empty() {
                if !is_compute {
                    report_tok(
                        reporter,
                        f.return_type,
                        "Only compute entry point function can use [[local_size(x,y,z)]].",
                    );
                } else {
                    create_info.push_str(&format!("LOCAL_GROUP_SIZE{local_size}\n"));
                }
            }

            if early_frag_test {
                if !is_fragment {
                    report_tok(
                        reporter,
                        f.return_type,
                        "Only fragment entry point function can use [[early_fragment_tests]].",
                    );
                } else {
                    create_info.push_str("EARLY_FRAGMENT_TEST(true)\n");
                }
            }

            let mut process_argument =
                |edits: &mut Edits, ty: Token<'_>, var: Token<'_>, attributes: Scope<'_>| {
                    let is_const = ty.prev() == TokenType::CONST;
                    let srt_type = ty.to_str();
                    let srt_var = var.to_str();
                    let srt_attr = attributes.get(1).to_str();

                    // (required constness, required type, stage check)
                    // per builtin; `true` entries mean const required.
                    let simple_builtin = |name: &str| -> Option<(BuiltinRule, bool, &'static str, Stage)> {
                        let rule = |glsl: &'static str, bit: Option<&'static str>| BuiltinRule {
                            glsl_name: glsl,
                            builtin_bit: bit,
                            builtin_hash: Some(Builtin(hash(glsl))),
                        };
                        Some(match name {
                            "vertex_id" => (rule("gl_VertexID", Some("VERTEX_ID")), true, "int", Stage::Vertex),
                            "instance_id" => (rule("gl_InstanceID", Some("INSTANCE_ID")), true, "int", Stage::Vertex),
                            "base_instance" => (rule("gl_BaseInstance", None), true, "int", Stage::Vertex),
                            "point_size" => (rule("gl_PointSize", Some("POINT_SIZE")), false, "float", Stage::Vertex),
                            "clip_distance" => (rule("gl_ClipDistance", Some("CLIP_DISTANCES")), false, "float", Stage::Vertex),
                            "position" => (rule("gl_Position", None), false, "float4", Stage::Vertex),
                            "frag_coord" => (rule("gl_FragCoord", Some("FRAG_COORD")), true, "float4", Stage::Fragment),
                            "point_coord" => (rule("gl_PointCoord", Some("POINT_COORD")), true, "float2", Stage::Fragment),
                            "front_facing" => (rule("gl_FrontFacing", Some("FRONT_FACING")), true, "bool", Stage::Fragment),
                            "global_invocation_id" => (rule("gl_GlobalInvocationID", Some("GLOBAL_INVOCATION_ID")), true, "uint3", Stage::Compute),
                            "local_invocation_id" => (rule("gl_LocalInvocationID", Some("LOCAL_INVOCATION_ID")), true, "uint3", Stage::Compute),
                            "local_invocation_index" => (rule("gl_LocalInvocationIndex", Some("LOCAL_INVOCATION_INDEX")), true, "uint", Stage::Compute),
                            "work_group_id" => (rule("gl_WorkGroupID", Some("WORK_GROUP_ID")), true, "uint3", Stage::Compute),
                            "num_work_groups" => (rule("gl_NumWorkGroups", Some("NUM_WORK_GROUP")), true, "uint3", Stage::Compute),
                            _ => return None,
                        })
                    };

                    #[derive(PartialEq)]
                    enum Stage {
                        Vertex,
                        Fragment,
                        Compute,
                    }

                    if let Some((rule, const_required, type_required, stage)) =
                        simple_builtin(&srt_attr)
                    {
                        if !is_entry_point {
                            return;
                        }
                        let stage_ok = match stage {
                            Stage::Vertex => is_vertex,
                            Stage::Fragment => is_fragment,
                            Stage::Compute => is_compute,
                        };
                        if !stage_ok {
                            report_tok(
                                reporter,
                                attributes.get(1),
                                &format!("[[{srt_attr}]] is not supported in this stage."),
                            );
                        } else if is_const != const_required || srt_type != type_required {
                            report_tok(
                                reporter,
                                ty,
                                &format!(
                                    "[[{srt_attr}]] must be declared as {}{type_required}.",
                                    if const_required { "const " } else { "non-const reference " }
                                ),
                            );
                        } else {
                            replace_word(edits, &srt_var, rule.glsl_name);
                            // Only the instancing builtins are reflected in
                            // the metadata record.
                            let reflected = matches!(
                                srt_attr.as_str(),
                                "vertex_id" | "instance_id" | "base_instance"
                            );
                            if reflected {
                                if let Some(builtin) = rule.builtin_hash {
                                    metadata.builtins.push(builtin);
                                }
                            }
                            if let Some(bit) = rule.builtin_bit {
                                create_info.push_str(&format!("BUILTINS(BuiltinBits::{bit})\n"));
                            }
                        }
                        return;
                    }

                    match srt_attr.as_str() {
                        "layer" | "viewport_index" => {
                            let glsl = if srt_attr == "layer" { "gl_Layer" } else { "gl_ViewportIndex" };
                            let bit = if srt_attr == "layer" { "LAYER" } else { "VIEWPORT_INDEX" };
                            if !is_entry_point {
                                return;
                            }
                            if is_compute {
                                report_tok(
                                    reporter,
                                    attributes.get(1),
                                    &format!("[[{srt_attr}]] is only supported in vertex and fragment functions."),
                                );
                            } else if (is_vertex && (is_const || srt_type != "int"))
                                || (is_fragment && (!is_const || srt_type != "int"))
                            {
                                report_tok(
                                    reporter,
                                    ty,
                                    &format!("[[{srt_attr}]] must be declared as an int reference."),
                                );
                            }
                            replace_word(edits, &srt_var, glsl);
                            create_info.push_str(&format!("BUILTINS(BuiltinBits::{bit})\n"));
                        }
                        "in" => {
                            if is_compute {
                                report_tok(
                                    reporter,
                                    attributes.get(1),
                                    "[[in]] is only supported in vertex and fragment functions.",
                                );
                            } else if !is_const {
                                report_tok(reporter, ty, "[[in]] must be declared as const reference.");
                            } else if is_vertex {
                                replace_word_and_accessor(edits, &srt_var, "");
                                create_info.push_str(&format!("ADDITIONAL_INFO({srt_type})\n"));
                            } else if is_fragment {
                                replace_word_and_accessor(edits, &srt_var, &format!("{srt_type}_"));
                            }
                        }
                        "out" => {
                            if is_compute {
                                report_tok(
                                    reporter,
                                    attributes.get(1),
                                    "[[out]] is only supported in vertex and fragment functions.",
                                );
                            } else if is_const {
                                report_tok(reporter, ty, "[[out]] must be declared as non-const reference.");
                            } else if is_vertex {
                                replace_word_and_accessor(edits, &srt_var, &format!("{srt_type}_"));
                                create_info.push_str(&format!("VERTEX_OUT({srt_type}_t)\n"));
                            } else if is_fragment {
                                replace_word_and_accessor(edits, &srt_var, &format!("{srt_type}_"));
                                create_info.push_str(&format!("ADDITIONAL_INFO({srt_type})\n"));
                            }
                        }
                        "resource_table" => {
                            if is_entry_point {
                                /* Dummy variable at the start of the body. */
                                edits.insert_after_pos(
                                    fn_body.front().str_index_start(),
                                    format!(" {srt_type} {srt_var}{{}};"),
                                );
                                create_info.push_str(&format!("ADDITIONAL_INFO({srt_type})\n"));
                            }
                        }
                        "frag_depth" => {
                            if srt_type != "float" {
                                report_tok(reporter, ty, "[[frag_depth]] needs to be declared as float");
                                return;
                            }
                            let mode = attributes.get(3).to_str();
                            if mode != "any" && mode != "greater" && mode != "less" {
                                report_tok(
                                    reporter,
                                    attributes.get(3),
                                    "unrecognized mode, expecting 'any', 'greater' or 'less'",
                                );
                            } else {
                                create_info.push_str(&format!("DEPTH_WRITE({})\n", mode.to_uppercase()));
                                replace_word(edits, &srt_var, "gl_FragDepth");
                            }
                        }
                        "frag_stencil_ref" => {
                            if srt_type != "int" {
                                report_tok(reporter, ty, "[[frag_stencil_ref]] needs to be declared as int");
                            } else {
                                create_info.push_str("BUILTINS(BuiltinBits::STENCIL_REF)\n");
                                replace_word(edits, &srt_var, "gl_FragStencilRefARB");
                            }
                        }
                        _ => report_tok(reporter, attributes.get(1), "Invalid attribute."),
                    }
                };

            f.args.foreach_match("[[..]]c?AA", |m| {
                process_argument(edits, m[8], m[9], m[1].scope());
            });
            f.args.foreach_match("[[..]]c?A&A", |m| {
                process_argument(edits, m[8], m[10], m[1].scope());
            });
            f.args.foreach_match("[[..]]c?A(&A)", |m| {
                process_argument(edits, m[8], m[11], m[1].scope());
            });

            create_info.push_str("GPU_SHADER_CREATE_END()\n");

            if is_entry_point {
                metadata.create_infos_declarations.push(create_info);
            }
        });
    }
    form.apply_mutations(reporter);
}

/// Erases entry point signature parameters (legacy compatibility) and
/// guards entry point bodies with `#if defined(ENTRY_POINT_<name>)`.
pub fn lower_entry_points_signature(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_function(|f| {
            let mut is_entry_point = false;

            if f.return_type.prev() == b']' {
                let attributes = f.return_type.prev().prev().scope();
                if attributes.kind() == bslc_parser::scope_kind::ATTRIBUTES {
                    attributes.foreach_attribute(|attr, _| {
                        if matches!(attr.str_view(), "vertex" | "fragment" | "compute") {
                            is_entry_point = true;
                        }
                    });
                }
            }

            if !is_entry_point {
                return;
            }

            if f.args.to_str() != "()" {
                edits.erase_tokens(f.args.front().next(), f.args.back().prev());
            }

            // Mute the entry point when not enabled; required by the
            // stage in/out parameter machinery.
            let first = f.return_type.prev().scope().front().prev();
            edits.insert_directive(first, &format!("#if defined(ENTRY_POINT_{})", f.name.str_view()));
            edits.insert_directive(f.body.back(), "#endif");
        });
    }
    form.apply_mutations(reporter);
}

/// Removes the stage attribute from entry point functions and guards
/// their bodies with the stage compilation condition.
pub fn lower_stage_function(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_function(|f| {
            let attr_tok = if f.is_static { f.return_type.prev().prev() } else { f.return_type.prev() };
            if attr_tok.is_invalid() || attr_tok != b']' || attr_tok.prev() != b']' {
                return;
            }
            let attributes = attr_tok.prev().scope();
            if attributes.kind() != bslc_parser::scope_kind::ATTRIBUTES {
                return;
            }

            edits.erase_scope(attributes.parent());

            let mut condition = String::new();
            attributes.foreach_attribute(|attr, _| match attr.str_view() {
                "vertex" => condition.push_str("GPU_VERTEX_SHADER"),
                "fragment" => condition.push_str("GPU_FRAGMENT_SHADER"),
                "compute" => condition.push_str("GPU_COMPUTE_SHADER"),
                _ => {}
            });
            if condition.is_empty() {
                return;
            }
            let condition = format!("defined({condition})");

            guarded_scope_mutation(edits, f.body, &condition, None);
        });
    }
    form.apply_mutations(reporter);
}

/// Parses `PipelineGraphic` / `PipelineCompute` declarations into create
/// infos and erases them.
pub fn lower_pipeline_definition(
    form: &mut IntermediateForm,
    filename: &str,
    metadata: &mut Source,
    reporter: &Reporter,
) {
    {
        let (root, edits) = form.parts();

        let compilation_constants = |start: Token<'_>| -> String {
            let mut out = String::new();
            let mut tok = start;
            while tok == b',' {
                let scope = tok.next().next().scope();
                let mut process_constant = |m: &[Token<'_>]| {
                    let value = m[3].to_str();
                    let ty = if m[3] == TokenType::NUMBER {
                        if value.ends_with('u') {
                            "uint"
                        } else {
                            "int"
                        }
                    } else {
                        "bool"
                    };
                    out.push_str(&format!(
                        "COMPILATION_CONSTANT({ty}, {}, {value})\n",
                        m[1].str_view()
                    ));
                };
                scope.foreach_match(".A=A", |m| process_constant(m));
                scope.foreach_match(".A=1", |m| process_constant(m));
                tok = scope.back().next();
            }
            out
        };

        root.foreach_match("AA(A", |m| {
            let parameters = m[2].scope();
            let pipeline_name = m[1].to_str();
            match m[0].str_view() {
                "PipelineGraphic" => {
                    let vertex_fn = parameters.get(1).to_str();
                    let fragment_fn = parameters.get(3).to_str();
                    let mut decl = String::new();
                    decl.push_str(&format!("GPU_SHADER_CREATE_INFO({pipeline_name})\n"));
                    decl.push_str(&format!("GRAPHIC_SOURCE(\"{filename}\")\n"));
                    decl.push_str(&format!("VERTEX_FUNCTION(\"{vertex_fn}\")\n"));
                    decl.push_str(&format!("FRAGMENT_FUNCTION(\"{fragment_fn}\")\n"));
                    decl.push_str(&format!("ADDITIONAL_INFO({vertex_fn}_infos_)\n"));
                    decl.push_str(&format!("ADDITIONAL_INFO({fragment_fn}_infos_)\n"));
                    decl.push_str(&compilation_constants(parameters.get(4)));
                    decl.push_str("DO_STATIC_COMPILATION()\n");
                    decl.push_str("GPU_SHADER_CREATE_END()\n");
                    metadata.create_infos_declarations.push(decl);
                    edits.erase_tokens(m[0], parameters.back().next());
                }
                "PipelineCompute" => {
                    let compute_fn = parameters.get(1).to_str();
                    let mut decl = String::new();
                    decl.push_str(&format!("GPU_SHADER_CREATE_INFO({pipeline_name})\n"));
                    decl.push_str(&format!("COMPUTE_SOURCE(\"{filename}\")\n"));
                    decl.push_str(&format!("COMPUTE_FUNCTION(\"{compute_fn}\")\n"));
                    decl.push_str(&format!("ADDITIONAL_INFO({compute_fn}_infos_)\n"));
                    decl.push_str(&compilation_constants(parameters.get(2)));
                    decl.push_str("DO_STATIC_COMPILATION()\n");
                    decl.push_str("GPU_SHADER_CREATE_END()\n");
                    metadata.create_infos_declarations.push(decl);
                    edits.erase_tokens(m[0], parameters.back().next());
                }
                _ => {}
            }
        });
    }
    form.apply_mutations(reporter);
}
