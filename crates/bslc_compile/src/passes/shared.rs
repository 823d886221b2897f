//! Host-shared structure layout validation and threadgroup variable
//! extraction.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{IntermediateForm, ParseMode};

use super::report_tok;
use crate::metadata::{SharedVariable, Source};
use crate::passes::functions::static_array_size;

/// Suffix of the alias generated for layout-checked types.
pub const LINTED_STRUCT_SUFFIX: &str = "_host_shared_";
/// Additional alias suffix for std140-compatible types.
pub const UNIFORM_STRUCT_SUFFIX: &str = "uniform_";

/// Size and alignment of every type allowed inside a host-shared struct.
static SIZEOF_TYPES: Lazy<FxHashMap<&'static str, (usize, usize)>> = Lazy::new(|| {
    [
        ("float", (4, 4)),
        ("float2", (8, 8)),
        ("float4", (16, 16)),
        ("float2x4", (32, 16)),
        ("float3x4", (48, 16)),
        ("float4x4", (64, 16)),
        ("bool32_t", (4, 4)),
        ("int", (4, 4)),
        ("int2", (8, 8)),
        ("int4", (16, 16)),
        ("uint", (4, 4)),
        ("uint2", (8, 8)),
        ("uint4", (16, 16)),
        ("string_t", (4, 4)),
        ("packed_float3", (12, 16)),
        ("packed_int3", (12, 16)),
        ("packed_uint3", (12, 16)),
    ]
    .into_iter()
    .collect()
});

/// Extracts `shared T name;` declarations into the metadata side table,
/// blanking them from the source (legacy threadgroup variable support).
pub fn threadgroup_variables_parse_and_remove(
    text: &str,
    metadata: &mut Source,
    reporter: &Reporter,
) -> String {
    let mut form = IntermediateForm::new(text, ParseMode::Full, reporter);
    {
        let (root, edits) = form.parts();
        let mut process = |m: &[bslc_parser::Token<'_>], decl_end: bslc_parser::Token<'_>| {
            if m[0].str_view() != "shared" {
                return;
            }
            let data = m[0].data_ref();
            let name =
                data.src[m[2].str_index_start()..=decl_end.prev().str_index_last()].to_string();
            metadata.shared_variables.push(SharedVariable {
                ty: m[1].to_str(),
                name,
            });
            edits.erase_tokens(m[0], decl_end);
        };
        root.foreach_match("AAA;", |m| process(m, m[3]));
        root.foreach_match("AAA[..];", |m| process(m, m[7]));
        root.foreach_match("AAA[..][..];", |m| process(m, m[11]));
        root.foreach_match("AAA[..][..][..];", |m| process(m, m[15]));
        /* Deeper array nesting would need a less naive approach. */
    }
    form.into_result()
}

/// Lints host-shared structures for padding and alignment per the fixed
/// size table, and emits the `_host_shared_` aliases. The `[[host_shared]]`
/// attribute is removed.
pub fn lower_host_shared_structures(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            if st.attributes.is_invalid() {
                return;
            }
            edits.erase_scope(st.attributes.parent());
            let mut is_shared = false;
            st.attributes.foreach_attribute(|attr, _| {
                if attr.str_view() == "host_shared" {
                    is_shared = true;
                }
            });
            if !is_shared {
                return;
            }

            let comma = st.body.find_token(b',');
            if comma.is_valid() && comma.scope() == st.body {
                report_tok(
                    reporter,
                    comma,
                    "comma declaration is not supported in shared struct, expand to multiple \
                     definition",
                );
                return;
            }

            let mut is_std140_compatible = true;
            let mut offset = 0usize;

            st.body.foreach_declaration(|d| {
                let type_str = d.var_type.to_str();
                let type_str = type_str.as_str();

                if type_str.contains("char") || type_str.contains("short") || type_str.contains("half")
                {
                    report_tok(reporter, d.var_type, "Small types are forbidden in shader interfaces.");
                } else if type_str == "float3" {
                    report_tok(reporter, d.var_type, "use packed_float3 instead of float3 in shared structure");
                } else if type_str == "uint3" {
                    report_tok(reporter, d.var_type, "use packed_uint3 instead of uint3 in shared structure");
                } else if type_str == "int3" {
                    report_tok(reporter, d.var_type, "use packed_int3 instead of int3 in shared structure");
                } else if type_str == "bool" {
                    report_tok(reporter, d.var_type, "bool is not allowed in shared structure, use bool32_t");
                } else if matches!(
                    type_str,
                    "float4x3" | "float3x3" | "float2x3" | "float4x2" | "float3x2" | "float2x2"
                ) {
                    report_tok(reporter, d.var_type, &format!("{type_str} is not allowed in shared structure"));
                }

                let (size, align) = match SIZEOF_TYPES.get(type_str) {
                    Some(&info) => info,
                    None if d.var_type.prev() == TokenType::ENUM => {
                        /* Only 4-byte enums are allowed. */
                        edits.erase_token(d.var_type.prev());
                        (4, 4)
                    }
                    None if d.var_type.prev() == TokenType::STRUCT => {
                        /* Erase the redundant struct keyword. */
                        edits.erase_token(d.var_type.prev());
                        (16, 16)
                    }
                    None => {
                        report_tok(
                            reporter,
                            d.var_type,
                            "Unknown type, add 'enum' or 'struct' keyword before the type name",
                        );
                        return;
                    }
                };

                let padding = align - (offset % align);
                if padding != align {
                    report_tok(
                        reporter,
                        d.var_type,
                        &format!("Misaligned member, missing {padding} padding bytes"),
                    );
                }

                let mut array_size = 1usize;
                if d.array.is_valid() {
                    if size < 16 {
                        /* Padded arrays of non-vec4 cannot be std140. */
                        is_std140_compatible = false;
                    }
                    /* Macros and expressions assume a multiple of 4. */
                    array_size = static_array_size(d.array, 4, reporter).max(0) as usize;
                }

                offset += size * array_size;
            });

            // Small structs only bind as push or uniform data; larger ones
            // are considered storage and must pad to 16 bytes.
            if offset < 32 {
                is_std140_compatible = offset % 16 == 0;
            } else if offset % 16 != 0 {
                report_tok(
                    reporter,
                    st.name,
                    &format!("Alignment issue, missing {} padding bytes", 16 - (offset % 16)),
                );
            }

            // Alias referenced by shaders that enforce linted types.
            let name = st.name.to_str();
            let mut directive = format!("#define {name}{LINTED_STRUCT_SUFFIX} {name}\n");
            if is_std140_compatible {
                directive.push_str(&format!(
                    "#define {name}{LINTED_STRUCT_SUFFIX}{UNIFORM_STRUCT_SUFFIX} {name}\n"
                ));
            }
            edits.insert_directive(st.struct_tok.prev(), &directive);
        });
    }
    form.apply_mutations(reporter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_variables_are_extracted() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let out = threadgroup_variables_parse_and_remove(
            "shared float cache_data[64];\nvoid fn()\n{\n}\n",
            &mut metadata,
            &reporter,
        );
        assert!(!out.contains("shared"), "{out:?}");
        assert_eq!(metadata.shared_variables.len(), 1);
        assert_eq!(metadata.shared_variables[0].ty, "float");
        assert_eq!(metadata.shared_variables[0].name, "cache_data[64]");
    }

    #[test]
    fn non_shared_declarations_are_untouched() {
        let reporter = Reporter::sink();
        let mut metadata = Source::default();
        let out = threadgroup_variables_parse_and_remove(
            "uniform float value;\n",
            &mut metadata,
            &reporter,
        );
        assert!(out.contains("uniform float value;"));
        assert!(metadata.shared_variables.is_empty());
    }

    fn lint(src: &str) -> usize {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_host_shared_structures(&mut form, &reporter);
        reporter.error_count()
    }

    #[test]
    fn aligned_struct_passes() {
        assert_eq!(lint("\nstruct [[host_shared]] Data {\n  float4 a;\n  float4 b;\n};\n"), 0);
    }

    #[test]
    fn misaligned_packed_member_is_reported() {
        // float at offset 0, then packed_float3 requiring 16-byte
        // alignment: 12 missing padding bytes.
        let reporter = Reporter::sink();
        let seen = std::cell::RefCell::new(Vec::new());
        let collecting = Reporter::new(Box::new(|d: &bslc_base::Diagnostic| {
            seen.borrow_mut().push(d.message.clone());
        }));
        let mut form = IntermediateForm::new(
            "\nstruct [[host_shared]] Data {\n  float x;\n  packed_float3 y;\n};\n",
            ParseMode::Full,
            &reporter,
        );
        lower_host_shared_structures(&mut form, &collecting);
        drop(collecting);
        let messages = seen.into_inner();
        assert!(
            messages.iter().any(|m| m.contains("missing 12 padding bytes")),
            "{messages:?}"
        );
    }

    #[test]
    fn forbidden_vec3_is_reported() {
        assert!(lint("\nstruct [[host_shared]] Data {\n  float3 a;\n  float b;\n};\n") > 0);
    }

    #[test]
    fn bool_member_is_reported() {
        assert!(lint("\nstruct [[host_shared]] Data {\n  bool a;\n};\n") > 0);
    }

    #[test]
    fn alias_defines_are_emitted() {
        let reporter = Reporter::sink();
        let mut form = IntermediateForm::new(
            "\nstruct [[host_shared]] Data {\n  float4 a;\n};\n",
            ParseMode::Full,
            &reporter,
        );
        lower_host_shared_structures(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("#define Data_host_shared_ Data"), "{out:?}");
        assert!(out.contains("#define Data_host_shared_uniform_ Data"), "{out:?}");
        assert!(!out.contains("host_shared]]"), "{out:?}");
    }
}
