//! Metadata extracted from one shader source file.
//!
//! These records feed two outputs: a JSON sidecar for tooling, and the
//! create-info macro text consumed by the GPU backend (`serialize_infos`).
//! The order of every list is the order of discovery in the source.

use serde::Serialize;

/// Compile-time string hash (64-bit FNV-1a fold, 32-bit constants).
pub const fn hash(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash: u64 = 2166136261;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_mul(16777619);
        hash ^= bytes[i] as u64;
        i += 1;
    }
    hash
}

/// String hashes embedded in shader code need to fit 32 bits.
pub fn hash_string(name: &str) -> u32 {
    let hash = hash(name);
    (hash ^ (hash >> 32)) as u32
}

/// A referenced GPU builtin, identified by the hash of its GLSL spelling.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct Builtin(pub u64);

impl Builtin {
    pub const CLIP_DISTANCE: Builtin = Builtin(hash("gl_ClipDistance"));
    pub const FRAG_COORD: Builtin = Builtin(hash("gl_FragCoord"));
    pub const FRAG_STENCIL_REF: Builtin = Builtin(hash("gl_FragStencilRefARB"));
    pub const FRONT_FACING: Builtin = Builtin(hash("gl_FrontFacing"));
    pub const GLOBAL_INVOCATION_ID: Builtin = Builtin(hash("gl_GlobalInvocationID"));
    pub const INSTANCE_INDEX: Builtin = Builtin(hash("gpu_InstanceIndex"));
    pub const BASE_INSTANCE: Builtin = Builtin(hash("gpu_BaseInstance"));
    pub const INSTANCE_ID: Builtin = Builtin(hash("gl_InstanceID"));
    pub const LOCAL_INVOCATION_ID: Builtin = Builtin(hash("gl_LocalInvocationID"));
    pub const LOCAL_INVOCATION_INDEX: Builtin = Builtin(hash("gl_LocalInvocationIndex"));
    pub const NUM_WORK_GROUP: Builtin = Builtin(hash("gl_NumWorkGroup"));
    pub const POINT_COORD: Builtin = Builtin(hash("gl_PointCoord"));
    pub const POINT_SIZE: Builtin = Builtin(hash("gl_PointSize"));
    pub const PRIMITIVE_ID: Builtin = Builtin(hash("gl_PrimitiveID"));
    pub const VERTEX_ID: Builtin = Builtin(hash("gl_VertexID"));
    pub const WORK_GROUP_ID: Builtin = Builtin(hash("gl_WorkGroupID"));
    pub const WORK_GROUP_SIZE: Builtin = Builtin(hash("gl_WorkGroupSize"));
    pub const DEBUG_DRAW: Builtin = Builtin(hash("drw_debug_"));
    pub const PRINTF: Builtin = Builtin(hash("printf"));
    pub const ASSERT: Builtin = Builtin(hash("assert"));
    pub const RUNTIME_GENERATED: Builtin = Builtin(hash("runtime_generated"));
}

/// Argument qualifier for node-library functions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct Qualifier(pub u64);

/// Argument type for node-library functions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct Type(pub u64);

#[derive(Clone, Debug, Serialize)]
pub struct ArgumentFormat {
    pub qualifier: Qualifier,
    pub ty: Type,
}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionFormat {
    pub name: String,
    pub arguments: Vec<ArgumentFormat>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PrintfFormat {
    pub hash: u32,
    pub format: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SharedVariable {
    pub ty: String,
    pub name: String,
}

/// One resource slot inside a shader resource table.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ParsedResource {
    /// Line this resource was defined at.
    pub line: usize,

    pub var_type: String,
    pub var_name: String,
    pub var_array: String,

    pub res_type: String,
    /// For images, storage, uniforms and samplers.
    pub res_frequency: String,
    /// For images, storage, uniforms and samplers.
    pub res_slot: String,
    /// For images and storage.
    pub res_qualifier: String,
    /// For specialization and compilation constants.
    pub res_value: String,
    /// For images.
    pub res_format: String,
    /// Optional condition to enable this resource.
    pub res_condition: String,
}

impl ParsedResource {
    pub fn new(line: usize, var_type: String, var_name: String, var_array: String) -> Self {
        Self {
            line,
            var_type,
            var_name,
            var_array,
            res_frequency: "PASS".to_string(),
            ..Self::default()
        }
    }

    pub fn serialize(&self) -> String {
        let condition_lambda = if self.res_condition.is_empty() {
            String::new()
        } else {
            format!(
                ", [](blender::Span<CompilationConstant> constants) {{ {}}}",
                self.res_condition
            )
        };

        match self.res_type.as_str() {
            "legacy_info" => format!("ADDITIONAL_INFO({})", self.var_name),
            "resource_table" => {
                if self.res_condition.is_empty() {
                    format!(".additional_info(\"{}\")", self.var_type)
                } else {
                    format!(
                        ".additional_info_with_condition(\"{}\"{})",
                        self.var_type, condition_lambda
                    )
                }
            }
            "sampler" => format!(
                ".sampler({}, ImageType::{}, \"{}\", Frequency::{}, \
                 GPUSamplerState::internal_sampler(){})",
                self.res_slot, self.var_type, self.var_name, self.res_frequency, condition_lambda
            ),
            "image" => format!(
                ".image({}, blender::gpu::TextureFormat::{}, Qualifier::{}, \
                 ImageReadWriteType::{}, \"{}\", Frequency::{}{})",
                self.res_slot,
                self.res_format,
                self.res_qualifier,
                self.var_type,
                self.var_name,
                self.res_frequency,
                condition_lambda
            ),
            "uniform" => format!(
                ".uniform_buf({}, \"{}\", \"{}{}\", Frequency::{}{})",
                self.res_slot,
                self.var_type,
                self.var_name,
                self.var_array,
                self.res_frequency,
                condition_lambda
            ),
            "storage" => format!(
                ".storage_buf({}, Qualifier::{}, \"{}\", \"{}{}\", Frequency::{}{})",
                self.res_slot,
                self.res_qualifier,
                self.var_type,
                self.var_name,
                self.var_array,
                self.res_frequency,
                condition_lambda
            ),
            "push_constant" => {
                if self.var_array.is_empty() {
                    format!("PUSH_CONSTANT({}, {})", self.var_type, self.var_name)
                } else {
                    let len = &self.var_array[1..self.var_array.len() - 1];
                    format!(
                        "PUSH_CONSTANT_ARRAY({}, {}, {})",
                        self.var_type, self.var_name, len
                    )
                }
            }
            // Compilation constants are defined on the shader declaration.
            "compilation_constant" => String::new(),
            "specialization_constant" => format!(
                "SPECIALIZATION_CONSTANT({}, {}, {})",
                self.var_type, self.var_name, self.res_value
            ),
            _ => String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ResourceTable {
    pub name: String,
    pub resources: Vec<ParsedResource>,
}

/// One interpolated attribute of a stage interface.
#[derive(Clone, Debug, Serialize)]
pub struct ParsedAttribute {
    pub line: usize,
    pub var_type: String,
    pub var_name: String,
    pub interpolation_mode: String,
}

impl ParsedAttribute {
    pub fn serialize(&self) -> String {
        match self.interpolation_mode.as_str() {
            "flat" => format!("FLAT({}, {})", self.var_type, self.var_name),
            "smooth" => format!("SMOOTH({}, {})", self.var_type, self.var_name),
            "no_perspective" => format!("NO_PERSPECTIVE({}, {})", self.var_type, self.var_name),
            _ => String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StageInterface {
    pub name: String,
    pub attributes: Vec<ParsedAttribute>,
}

impl StageInterface {
    pub fn serialize(&self) -> String {
        let mut out = format!("GPU_SHADER_INTERFACE_INFO({}_t)\n", self.name);
        for attribute in &self.attributes {
            out.push_str(&attribute.serialize());
            out.push('\n');
        }
        out.push_str("GPU_SHADER_INTERFACE_END()\n");
        out
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ParsedFragOutput {
    pub line: usize,
    pub var_type: String,
    pub var_name: String,
    pub slot: String,
    pub dual_source: String,
    pub raster_order_group: String,
}

impl ParsedFragOutput {
    pub fn serialize(&self) -> String {
        if !self.dual_source.is_empty() {
            format!(
                "FRAGMENT_OUT_DUAL({}, {}, {}, {})",
                self.slot, self.var_type, self.var_name, self.dual_source
            )
        } else if !self.raster_order_group.is_empty() {
            format!(
                "FRAGMENT_OUT_ROG({}, {}, {}, {})",
                self.slot, self.var_type, self.var_name, self.raster_order_group
            )
        } else {
            format!("FRAGMENT_OUT({}, {}, {})", self.slot, self.var_type, self.var_name)
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FragmentOutputs {
    pub name: String,
    pub outputs: Vec<ParsedFragOutput>,
}

impl FragmentOutputs {
    pub fn serialize(&self) -> String {
        let mut out = format!("GPU_SHADER_CREATE_INFO({})\n", self.name);
        for output in &self.outputs {
            out.push_str(&output.serialize());
            out.push('\n');
        }
        out.push_str("GPU_SHADER_CREATE_END()\n");
        out
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ParsedVertInput {
    pub line: usize,
    pub var_type: String,
    pub var_name: String,
    pub slot: String,
}

impl ParsedVertInput {
    pub fn serialize(&self) -> String {
        format!("VERTEX_IN({}, {}, {})", self.slot, self.var_type, self.var_name)
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VertexInputs {
    pub name: String,
    pub inputs: Vec<ParsedVertInput>,
}

impl VertexInputs {
    pub fn serialize(&self) -> String {
        let mut out = format!("GPU_SHADER_CREATE_INFO({})\n", self.name);
        for input in &self.inputs {
            out.push_str(&input.serialize());
            out.push('\n');
        }
        out.push_str("GPU_SHADER_CREATE_END()\n");
        out
    }
}

/// One symbol visible to dependent files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub identifier: String,
    pub name_space: String,
    pub definition_line: usize,
    pub is_method: bool,
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Methods have more precedence: they sort before anything else.
        // Namespaces sort descending so deeper namespaces resolve first.
        other
            .is_method
            .cmp(&self.is_method)
            .then_with(|| other.name_space.cmp(&self.name_space))
            .then_with(|| self.definition_line.cmp(&other.definition_line))
            .then_with(|| self.identifier.cmp(&other.identifier))
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Everything extracted from one source file.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Source {
    pub builtins: Vec<Builtin>,
    /// Note: could be a set, but the order matters downstream.
    pub dependencies: Vec<String>,
    pub shared_variables: Vec<SharedVariable>,
    pub printf_formats: Vec<PrintfFormat>,
    pub functions: Vec<FunctionFormat>,
    pub create_infos: Vec<String>,
    pub create_infos_declarations: Vec<String>,
    pub create_infos_dependencies: Vec<String>,
    pub create_infos_defines: Vec<String>,
    pub resource_tables: Vec<ResourceTable>,
    pub stage_interfaces: Vec<StageInterface>,
    pub fragment_outputs: Vec<FragmentOutputs>,
    pub vertex_inputs: Vec<VertexInputs>,
    pub symbol_table: Vec<Symbol>,
}

impl Source {
    /// Serializes the metadata as the registration function consumed by
    /// the downstream backend.
    pub fn serialize(&self, function_name: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "static void {function_name}(GPUSource &source, GPUFunctionDictionary *g_functions, \
             GPUPrintFormatMap *g_formats) {{\n"
        ));
        for function in &self.functions {
            out.push_str("  {\n");
            out.push_str("    Vector<metadata::ArgumentFormat> args = {\n");
            for arg in &function.arguments {
                out.push_str(&format!(
                    "      metadata::ArgumentFormat{{metadata::Qualifier({}LLU), \
                     metadata::Type({}LLU)}},\n",
                    arg.qualifier.0, arg.ty.0
                ));
            }
            out.push_str("    };\n");
            out.push_str(&format!(
                "    source.add_function(\"{}\", args, g_functions);\n",
                function.name
            ));
            out.push_str("  }\n");
        }
        for builtin in &self.builtins {
            out.push_str(&format!(
                "  source.add_builtin(metadata::Builtin({}LLU));\n",
                builtin.0
            ));
        }
        for dependency in &self.dependencies {
            out.push_str(&format!("  source.add_dependency(\"{dependency}\");\n"));
        }
        for var in &self.shared_variables {
            out.push_str(&format!(
                "  source.add_shared_variable(Type::{}_t, \"{}\");\n",
                var.ty, var.name
            ));
        }
        for format in &self.printf_formats {
            out.push_str(&format!(
                "  source.add_printf_format(uint32_t({}), {}, g_formats);\n",
                format.hash, format.format
            ));
        }
        // Avoid warnings.
        out.push_str("  UNUSED_VARS(source, g_functions, g_formats);\n");
        out.push_str("}\n");
        out
    }

    /// Serializes the create-info declarations for this source file.
    pub fn serialize_infos(&self) -> String {
        let mut out = String::new();
        out.push_str("#pragma once\n\n");
        for dependency in &self.create_infos_dependencies {
            out.push_str(&format!("#include \"{dependency}\"\n"));
        }
        out.push('\n');
        for define in &self.create_infos_defines {
            out.push_str(define);
        }
        out.push('\n');
        for inputs in &self.vertex_inputs {
            out.push_str(&inputs.serialize());
            out.push('\n');
        }
        out.push('\n');
        for outputs in &self.fragment_outputs {
            out.push_str(&outputs.serialize());
            out.push('\n');
        }
        out.push('\n');
        for interface in &self.stage_interfaces {
            out.push_str(&interface.serialize());
            out.push('\n');
        }
        out.push('\n');
        for table in &self.resource_tables {
            out.push_str(&format!("GPU_SHADER_CREATE_INFO({})\n", table.name));
            for resource in &table.resources {
                out.push_str(&resource.serialize());
                out.push('\n');
            }
            out.push_str("GPU_SHADER_CREATE_END()\n");
        }
        out.push('\n');
        for declaration in &self.create_infos_declarations {
            out.push_str(declaration);
            out.push('\n');
        }
        out
    }

    /// Sorts and deduplicates the symbol table: methods first, namespaces
    /// descending, then definition line and identifier.
    pub fn sort_symbols(&mut self) {
        self.symbol_table.sort();
        self.symbol_table
            .dedup_by(|a, b| a.name_space == b.name_space && a.identifier == b.identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_distinct() {
        assert_eq!(hash("gl_FragCoord"), hash("gl_FragCoord"));
        assert_ne!(hash("gl_FragCoord"), hash("gl_FrontFacing"));
        assert_eq!(Builtin::PRINTF, Builtin(hash("printf")));
    }

    #[test]
    fn hash_string_folds_to_32_bits() {
        let h = hash_string("\"some format %d\"");
        let again = hash_string("\"some format %d\"");
        assert_eq!(h, again);
    }

    #[test]
    fn sampler_resource_serialization() {
        let mut res = ParsedResource::new(
            4,
            "FLOAT_2D".to_string(),
            "color_tx".to_string(),
            String::new(),
        );
        res.res_type = "sampler".to_string();
        res.res_slot = "0".to_string();
        assert_eq!(
            res.serialize(),
            ".sampler(0, ImageType::FLOAT_2D, \"color_tx\", Frequency::PASS, \
             GPUSamplerState::internal_sampler())"
        );
    }

    #[test]
    fn push_constant_array_strips_brackets() {
        let mut res = ParsedResource::new(
            1,
            "float4".to_string(),
            "colors".to_string(),
            "[4]".to_string(),
        );
        res.res_type = "push_constant".to_string();
        assert_eq!(res.serialize(), "PUSH_CONSTANT_ARRAY(float4, colors, 4)");
    }

    #[test]
    fn stage_interface_serialization() {
        let interface = StageInterface {
            name: "VertOut".to_string(),
            attributes: vec![ParsedAttribute {
                line: 1,
                var_type: "float4".to_string(),
                var_name: "VertOut_color".to_string(),
                interpolation_mode: "smooth".to_string(),
            }],
        };
        let out = interface.serialize();
        assert!(out.starts_with("GPU_SHADER_INTERFACE_INFO(VertOut_t)\n"));
        assert!(out.contains("SMOOTH(float4, VertOut_color)\n"));
        assert!(out.ends_with("GPU_SHADER_INTERFACE_END()\n"));
    }

    #[test]
    fn symbol_ordering_puts_methods_first() {
        let method = Symbol {
            identifier: "method".to_string(),
            name_space: "A::".to_string(),
            definition_line: 10,
            is_method: true,
        };
        let function = Symbol {
            identifier: "fn".to_string(),
            name_space: "A::B::".to_string(),
            definition_line: 1,
            is_method: false,
        };
        let mut table = vec![function.clone(), method.clone()];
        table.sort();
        assert_eq!(table[0], method);
        // Deeper namespace sorts before shallower for non-methods.
        let shallow = Symbol {
            identifier: "fn".to_string(),
            name_space: "A::".to_string(),
            definition_line: 1,
            is_method: false,
        };
        let mut table = vec![shallow.clone(), function.clone()];
        table.sort();
        assert_eq!(table[0], function);
    }

    #[test]
    fn record_serializes_to_json() {
        let mut source = Source::default();
        source.dependencies.push("a.hh".to_string());
        source.printf_formats.push(PrintfFormat {
            hash: 7,
            format: "\"%d\"".to_string(),
        });
        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains("\"dependencies\":[\"a.hh\"]"), "{json}");
        assert!(json.contains("\"hash\":7"), "{json}");
    }

    #[test]
    fn serialize_emits_builtins_and_dependencies() {
        let mut source = Source::default();
        source.builtins.push(Builtin::FRAG_COORD);
        source.dependencies.push("common_lib.glsl".to_string());
        let out = source.serialize("register_fn");
        assert!(out.contains("static void register_fn("));
        assert!(out.contains(&format!("add_builtin(metadata::Builtin({}LLU))", Builtin::FRAG_COORD.0)));
        assert!(out.contains("add_dependency(\"common_lib.glsl\")"));
    }
}
