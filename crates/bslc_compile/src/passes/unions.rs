//! Limited union support.
//!
//! Anonymous unions inside structs are unwrapped into a separate raw-data
//! struct sized from the largest member, with getters and setters
//! synthesized for each member. Union members must be declared through the
//! `union_t<T>` wrapper, which forces accessor syntax that this pass can
//! rewrite.

use rustc_hash::FxHashMap;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{IntermediateForm, Token};

use super::report_tok;
use crate::passes::functions::static_array_size;

#[derive(Clone, Debug)]
struct Member {
    ty: String,
    name: String,
    offset: usize,
    size: usize,
    is_enum: bool,
}

impl Member {
    /// True for builtin trivial types (e.g. uint, float3).
    fn is_trivial(&self) -> bool {
        self.ty.is_empty()
    }

    fn trivial(offset: usize, size: usize) -> Member {
        Member {
            ty: String::new(),
            name: String::new(),
            offset,
            size,
            is_enum: false,
        }
    }
}

fn builtin_struct_members() -> FxHashMap<String, Vec<Member>> {
    let scalar = |size| vec![Member::trivial(0, size)];
    let mut map: FxHashMap<String, Vec<Member>> = FxHashMap::default();
    for (name, size) in [
        ("float", 4),
        ("float2", 8),
        ("float4", 16),
        ("bool32_t", 4),
        ("int", 4),
        ("int2", 8),
        ("int4", 16),
        ("uint", 4),
        ("uint2", 8),
        ("uint4", 16),
        ("string_t", 4),
        ("packed_float3", 12),
        ("packed_int3", 12),
        ("packed_uint3", 12),
    ] {
        map.insert(name.to_string(), scalar(size));
    }
    for (name, rows) in [("float2x4", 2), ("float3x4", 3), ("float4x4", 4)] {
        let members = (0..rows)
            .map(|i| Member {
                ty: "float4".to_string(),
                name: format!("[{i}]"),
                offset: i * 16,
                size: 16,
                is_enum: false,
            })
            .collect();
        map.insert(name.to_string(), members);
    }
    map
}

fn type_size(struct_members: &FxHashMap<String, Vec<Member>>, ty: &str) -> usize {
    struct_members
        .get(ty)
        .map(|members| members.iter().map(|m| m.size).sum())
        .unwrap_or(0)
}

fn member_from_float(union_member: &Member, struct_member: &Member, access: &str) -> String {
    let ty = if struct_member.is_trivial() { &union_member.ty } else { &struct_member.ty };
    let is_enum = if struct_member.is_trivial() { union_member.is_enum } else { struct_member.is_enum };

    if is_enum {
        return format!("{}(floatBitsToUint({access}))", struct_member.ty);
    }
    if ty.starts_with("uint") {
        return format!("floatBitsToUint({access})");
    }
    if ty.starts_with("int") {
        return format!("floatBitsToInt({access})");
    }
    if ty == "bool" {
        return format!("floatBitsToInt({access}) != 0");
    }
    access.to_string()
}

fn member_to_float(union_member: &Member, struct_member: &Member, access: &str) -> String {
    let ty = if struct_member.is_trivial() { &union_member.ty } else { &struct_member.ty };
    let is_enum = if struct_member.is_trivial() { union_member.is_enum } else { struct_member.is_enum };

    if is_enum {
        return format!("uintBitsToFloat(uint({access}))");
    }
    if ty.starts_with("uint") {
        return format!("uintBitsToFloat({access})");
    }
    if ty.starts_with("int") {
        return format!("intBitsToFloat({access})");
    }
    if ty == "bool" {
        return format!("intBitsToFloat(int({access}))");
    }
    access.to_string()
}

/// Access into the raw `dataN` slots for a member at a given offset.
fn union_data_access(struct_member: &Member, union_size: usize) -> String {
    let offset = struct_member.offset;
    let mut access = format!(".data{}", offset / 16);

    match struct_member.size {
        12 => access.push_str(".xyz"),
        8 => access.push_str(if offset % 16 == 0 { ".xy" } else { ".zw" }),
        4 => match offset % 16 {
            0 => {
                /* Special case when the last slot is a scalar. */
                if union_size - offset != 4 {
                    access.push_str(".x");
                }
            }
            4 => access.push_str(".y"),
            8 => access.push_str(".z"),
            12 => access.push_str(".w"),
            _ => {}
        },
        _ => {}
    }
    access
}

fn member_data_access(struct_member: &Member) -> &str {
    if struct_member.is_trivial() { "" } else { &struct_member.name }
}

/// Union members must wrap their type with `union_t<T>`; the wrapper is
/// checked and removed here. Runs before [`lower_unions`].
pub fn lower_union_accessor_templates(form: &mut IntermediateForm, reporter: &Reporter) {
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            st.body.foreach_match("o{..};", |m| {
                m[1].scope().foreach_declaration(|d| {
                    if d.var_type.str_view() != "union_t" {
                        report_tok(
                            reporter,
                            d.name,
                            "All union members must have their type wrapped using the union_t<T> \
                             template.",
                        );
                        edits.erase_tokens(d.var_type, d.var_type.find_next(b';'));
                        return;
                    }
                    /* Remove the template but not the wrapped type. */
                    edits.erase_token(d.var_type);
                    if d.template_args.is_valid() {
                        edits.erase_token(d.template_args.front());
                        edits.erase_token(d.template_args.back());
                    }
                });
            });
        });
    }
    form.apply_mutations(reporter);
}

/// Unwraps anonymous unions into raw-data structs with synthesized
/// accessors.
pub fn lower_unions(form: &mut IntermediateForm, reporter: &Reporter) {
    /* Description of each union type. */
    let mut union_members: FxHashMap<String, Vec<Member>> = FxHashMap::default();

    /* First, lower anonymous unions into separate structs. */
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            let mut union_index = 0usize;
            let struct_name = st.name.to_str();
            st.body.foreach_match("o{..};", |m| {
                let union_body = m[1].scope();

                let union_name = format!("union{union_index}");
                let union_type = format!("{struct_name}_{union_name}");

                /* Parse the members of the union for later use. */
                let mut members: Vec<Member> = Vec::new();
                union_body.foreach_declaration(|d| {
                    if d.array.is_valid() {
                        report_tok(reporter, d.name, "Arrays are not supported inside unions.");
                    }
                    members.push(Member {
                        ty: d.var_type.to_str(),
                        name: d.name.to_str(),
                        offset: 0,
                        size: 0,
                        is_enum: d.var_type.prev() == TokenType::ENUM,
                    });
                });

                if members.is_empty() {
                    report_tok(reporter, m[0], "Empty union");
                    return;
                }

                let first_member = members.first().cloned();
                union_members.insert(union_type.clone(), members);

                let mut union_member = format!("{union_type} {union_name};");
                if st.attributes.is_valid() && st.attributes.contains_word("host_shared") {
                    union_member = format!("struct {union_member}");
                }
                edits.insert_before(m[0], union_member);
                edits.erase_tokens(m[0], m[4]);

                // Temporary storage using the first member; every member
                // has the same size so this stays layout-valid until the
                // real slots are computed below.
                let first = first_member.expect("checked non-empty");
                let type_decl = format!(
                    "struct [[host_shared]] {union_type} {{\n  {} {};\n}};\n",
                    first.ty, first.name
                );

                edits.insert_line_number_pos(
                    st.struct_tok.str_index_start().saturating_sub(1),
                    m[0].line_number(),
                );
                edits.insert_before(st.struct_tok, type_decl);
                edits.insert_line_number_pos(
                    st.struct_tok.str_index_start().saturating_sub(1),
                    st.struct_tok.line_number(),
                );

                union_index += 1;
            });
        });
    }
    form.apply_mutations(reporter);

    /* Map structure names to structure members. */
    let mut struct_members = builtin_struct_members();

    {
        let root = form.root();
        root.foreach_struct(|st| {
            let mut is_shared = false;
            if st.attributes.is_valid() {
                st.attributes.foreach_attribute(|attr, _| {
                    if attr.str_view() == "host_shared" {
                        is_shared = true;
                    }
                });
            }
            if !is_shared {
                return;
            }
            let mut members: Vec<Member> = Vec::new();
            let mut offset = 0usize;
            st.body.foreach_declaration(|d| {
                let array_size = if d.array.is_valid() {
                    /* Zero by default, creating a size error later on. */
                    static_array_size(d.array, 0, reporter).max(0) as usize
                } else {
                    1
                };

                for i in 0..array_size {
                    let mut name = d.name.to_str();
                    if d.array.is_valid() {
                        name = format!("{name}[{i}]");
                    }
                    let mut size = 4;
                    if d.var_type.prev() != TokenType::ENUM {
                        size = type_size(&struct_members, d.var_type.str_view());
                        if size != 0 {
                            members.push(Member {
                                ty: d.var_type.to_str(),
                                name: format!(".{name}"),
                                offset,
                                size,
                                is_enum: false,
                            });
                        }
                    } else {
                        members.push(Member {
                            ty: d.var_type.to_str(),
                            name: format!(".{name}"),
                            offset,
                            size,
                            is_enum: true,
                        });
                    }
                    offset += size;
                }
            });

            struct_members.insert(st.name.to_str(), members);
        });
    }

    /* Synthesize the accessors and the raw storage. */
    {
        let (root, edits) = form.parts();
        root.foreach_struct(|st| {
            if union_members.contains_key(st.name.str_view()) {
                /* Replace the placeholder member with raw float slots. */
                let body = st.body;
                let size = type_size(&struct_members, body.front().next().str_view());
                if size == 0 {
                    report_tok(
                        reporter,
                        body.front().next(),
                        "Can't infer size of member. Type must be defined in this file and have \
                         the [[host_shared]] attribute.",
                    );
                }
                let mut slot = 0usize;
                let mut filled = 0usize;
                while filled < size {
                    let member_size = size - filled;
                    let data_type = match member_size {
                        4 => "float",
                        8 => "float2",
                        12 => "float3",
                        _ => "float4",
                    };
                    edits.insert_after_pos(
                        body.front().str_index_last_no_whitespace(),
                        format!("\n  {data_type} data{slot};"),
                    );
                    slot += 1;
                    filled += 16;
                }
                edits.erase_tokens(body.front().next(), body.back().prev());
                return;
            }

            st.body.foreach_declaration(|d| {
                let Some(members) = union_members.get(d.var_type.str_view()) else {
                    return;
                };

                for member in members {
                    let Some(structure) = struct_members.get(member.ty.as_str()) else {
                        report_tok(
                            reporter,
                            d.var_type,
                            "Unknown union member type. Type must be defined in this file and \
                             decorated with [[host_shared]] attribute.",
                        );
                        return;
                    };
                    /* Flatten references to other structures, recursively. */
                    let mut structure = structure.clone();
                    while flatten_members(&struct_members, d.var_type, &mut structure, reporter) {}

                    edits.insert_after(
                        st.body.back().prev(),
                        create_getter(&struct_members, d.var_type, d.name, member, &structure, reporter),
                    );
                    edits.insert_after(
                        st.body.back().prev(),
                        create_setter(&struct_members, d.var_type, d.name, member, &structure, reporter),
                    );
                }
            });
        });

        // Assignment through an accessor becomes a setter call:
        // `a.b() = c;` becomes `a.b_set_(c);`.
        root.foreach_match("A()=", |m| {
            edits.insert_before(m[1], "_set_");
            edits.erase_tokens(m[2], m[3]);
            edits.insert_after(m[3].scope().back(), ")");
        });
    }
    form.apply_mutations(reporter);
}

fn flatten_members(
    struct_members: &FxHashMap<String, Vec<Member>>,
    type_tok: Token<'_>,
    members: &mut Vec<Member>,
    reporter: &Reporter,
) -> bool {
    let mut dst: Vec<Member> = Vec::with_capacity(members.len());
    let mut expanded = false;
    for member in members.iter() {
        if member.is_trivial() || member.is_enum {
            dst.push(member.clone());
            continue;
        }
        let Some(nested_structure) = struct_members.get(member.ty.as_str()) else {
            report_tok(
                reporter,
                type_tok,
                "Unknown type encountered while unwrapping union. Contained types must be \
                 defined in this file and decorated with [[host_shared]] attribute.",
            );
            continue;
        };
        for nested in nested_structure {
            if nested.is_trivial() || nested.is_enum {
                dst.push(member.clone());
            } else {
                expanded = true;
                let mut nested = nested.clone();
                nested.name = format!("{}{}", member.name, nested.name);
                nested.offset += member.offset;
                dst.push(nested);
            }
        }
    }
    *members = dst;
    expanded
}

fn create_getter(
    struct_members: &FxHashMap<String, Vec<Member>>,
    union_type_tok: Token<'_>,
    union_var_tok: Token<'_>,
    union_member: &Member,
    structure: &[Member],
    reporter: &Reporter,
) -> String {
    let union_size = type_size(struct_members, union_type_tok.str_view());
    if union_size == 0 {
        report_tok(
            reporter,
            union_type_tok,
            "Can't infer size of member. Type must be defined in this file and have the \
             [[host_shared]] attribute.",
        );
        return String::new();
    }
    if let Some(last) = structure.last() {
        if last.offset + last.size != union_size {
            report_tok(reporter, union_type_tok, "union has members of different sizes");
            return String::new();
        }
    }

    let mut body = String::from("{\n");
    body.push_str(&format!("  {} val;\n", union_member.ty));
    for member in structure {
        let to_var = format!("val{}", member_data_access(member));
        let access = format!("{}{}", union_var_tok.str_view(), union_data_access(member, union_size));
        body.push_str(&format!(
            "  {to_var} = {};\n",
            member_from_float(union_member, member, &access)
        ));
    }
    body.push_str("  return val;\n}\n");

    format!("\n{} {}() const {body}", union_member.ty, union_member.name)
}

fn create_setter(
    struct_members: &FxHashMap<String, Vec<Member>>,
    union_type_tok: Token<'_>,
    union_var_tok: Token<'_>,
    union_member: &Member,
    structure: &[Member],
    reporter: &Reporter,
) -> String {
    let union_size = type_size(struct_members, union_type_tok.str_view());
    if union_size == 0 {
        report_tok(
            reporter,
            union_type_tok,
            "Can't infer size of member. Type must be defined in this file and have the \
             [[host_shared]] attribute.",
        );
        return String::new();
    }
    if let Some(last) = structure.last() {
        if last.offset + last.size != union_size {
            report_tok(reporter, union_type_tok, "union has members of different sizes");
            return String::new();
        }
    }

    let mut body = String::from("{\n");
    for member in structure {
        let to_var = format!(
            "this->{}{}",
            union_var_tok.str_view(),
            union_data_access(member, union_size)
        );
        let access = format!("value{}", member_data_access(member));
        body.push_str(&format!(
            "  {to_var} = {};\n",
            member_to_float(union_member, member, &access)
        ));
    }
    body.push_str("}\n");

    format!("\nvoid {}_set_({} value) {body}", union_member.name, union_member.ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bslc_parser::ParseMode;

    #[test]
    fn union_accessor_template_is_required() {
        let reporter = Reporter::sink();
        let src = "struct S {\n  union {\n    float a;\n  };\n};\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_union_accessor_templates(&mut form, &reporter);
        assert!(reporter.error_count() > 0);
    }

    #[test]
    fn union_accessor_template_is_stripped() {
        let reporter = Reporter::sink();
        let src = "struct S {\n  union {\n    union_t<float> a;\n    union_t<uint> b;\n  };\n};\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_union_accessor_templates(&mut form, &reporter);
        assert_eq!(reporter.error_count(), 0);
        let out = form.str();
        assert!(!out.contains("union_t"), "{out:?}");
        assert!(out.contains("float") && out.contains("uint"), "{out:?}");
    }

    #[test]
    fn anonymous_union_is_unwrapped_with_accessors() {
        let reporter = Reporter::sink();
        let src = "\nstruct [[host_shared]] S {\n  union {\n    union_t<float> a;\n    union_t<uint> b;\n  };\n};\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_union_accessor_templates(&mut form, &reporter);
        lower_unions(&mut form, &reporter);
        let out = form.str();
        // The union is replaced by a raw-data struct member.
        assert!(out.contains("struct S_union0 union0;"), "{out:?}");
        assert!(out.contains("struct [[host_shared]] S_union0"), "{out:?}");
        assert!(out.contains("float data0;"), "{out:?}");
        // Accessors exist for both members.
        assert!(out.contains("float a() const"), "{out:?}");
        assert!(out.contains("void a_set_(float value)"), "{out:?}");
        assert!(out.contains("uint b() const"), "{out:?}");
        assert!(out.contains("floatBitsToUint"), "{out:?}");
        assert_eq!(reporter.error_count(), 0, "{out:?}");
    }

    #[test]
    fn accessor_assignment_becomes_setter_call() {
        let reporter = Reporter::sink();
        let src = "void fn()\n{\n  s.b() = c;\n}\n";
        let mut form = IntermediateForm::new(src, ParseMode::Full, &reporter);
        lower_unions(&mut form, &reporter);
        let out = form.str();
        assert!(out.contains("b_set_("), "{out:?}");
        assert!(out.contains("c)"), "{out:?}");
    }
}
