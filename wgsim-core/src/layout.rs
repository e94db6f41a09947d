//! Memory layout of WGSL types.
//!
//! Computes alignment, size, member offsets and array strides following the
//! WGSL host-shareable layout rules. Every type node is laid out once; the
//! resulting `TypeInfo` is shared through an `Rc`, so two lookups for the same
//! node (or the same struct name) return the same object.

use crate::ast::{find_attribute, Attribute, Declaration, Expression, NodeId, Program, StructDecl, Type, TypeKind};
use crate::constant_folding::ConstantFolder;
use log::{debug, warn};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// `round_up(k, n) = ceil(n / k) * k`.
pub fn round_up(k: u32, n: u32) -> u32 {
    checked_round_up(k, n).unwrap_or(u32::MAX)
}

/// `round_up` that reports overflow instead of saturating.
pub fn checked_round_up(k: u32, n: u32) -> Option<u32> {
    if k == 0 {
        Some(n)
    } else {
        n.div_ceil(k).checked_mul(k)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I32,
    U32,
    F32,
    F16,
}

impl ScalarKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ScalarKind::Bool),
            "i32" => Some(ScalarKind::I32),
            "u32" => Some(ScalarKind::U32),
            "f32" => Some(ScalarKind::F32),
            "f16" => Some(ScalarKind::F16),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I32 => "i32",
            ScalarKind::U32 => "u32",
            ScalarKind::F32 => "f32",
            ScalarKind::F16 => "f16",
        }
    }

    pub fn size(self) -> u32 {
        match self {
            ScalarKind::F16 => 2,
            _ => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F16)
    }
}

#[derive(Debug)]
pub struct TypeInfo {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub size: u32,
    pub align: u32,
    pub kind: TypeInfoKind,
}

#[derive(Debug)]
pub enum TypeInfoKind {
    Scalar(ScalarKind),
    /// Samplers, textures without layout, pointers and unknown names.
    Opaque,
    Array(ArrayInfo),
    Struct(StructInfo),
    Template(TemplateInfo),
}

#[derive(Debug)]
pub struct ArrayInfo {
    pub format: Rc<TypeInfo>,
    /// `None` for runtime-sized arrays.
    pub count: Option<u32>,
    pub stride: u32,
}

#[derive(Debug)]
pub struct StructInfo {
    pub members: Vec<MemberInfo>,
    pub start_line: usize,
    pub end_line: usize,
    pub in_use: Cell<bool>,
}

#[derive(Debug)]
pub struct MemberInfo {
    pub name: String,
    pub ty: Rc<TypeInfo>,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

#[derive(Debug)]
pub struct TemplateInfo {
    /// Generator name: `vec3`, `mat4x4`, `atomic`, `ptr`, `texture_2d`, ...
    pub base: String,
    pub format: Option<Rc<TypeInfo>>,
    pub access: Option<String>,
    /// Pointer address space or storage-texture texel format.
    pub space: Option<String>,
}

impl TypeInfo {
    fn new(name: impl Into<String>, size: u32, align: u32, kind: TypeInfoKind) -> Self {
        TypeInfo {
            name: name.into(),
            attributes: Vec::new(),
            size,
            align,
            kind,
        }
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        TypeInfo::new(name, 0, 1, TypeInfoKind::Opaque)
    }

    pub fn scalar(kind: ScalarKind) -> Self {
        TypeInfo::new(kind.name(), kind.size(), kind.size(), TypeInfoKind::Scalar(kind))
    }

    pub fn as_struct(&self) -> Option<&StructInfo> {
        match &self.kind {
            TypeInfoKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayInfo> {
        match &self.kind {
            TypeInfoKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_template(&self) -> Option<&TemplateInfo> {
        match &self.kind {
            TypeInfoKind::Template(t) => Some(t),
            _ => None,
        }
    }

    /// Element type of an array or parameter of a template.
    pub fn format(&self) -> Option<&Rc<TypeInfo>> {
        match &self.kind {
            TypeInfoKind::Array(a) => Some(&a.format),
            TypeInfoKind::Template(t) => t.format.as_ref(),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        self.as_struct()?.members.iter().find(|m| m.name == name)
    }

    /// Scalar kind of a scalar, or the component kind of a vector, matrix
    /// or atomic.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match &self.kind {
            TypeInfoKind::Scalar(kind) => Some(*kind),
            TypeInfoKind::Template(t) if self.vector_len().is_some() || self.matrix_shape().is_some() || t.base == "atomic" => {
                t.format.as_ref().and_then(|f| f.scalar_kind()).or(Some(ScalarKind::F32))
            }
            _ => None,
        }
    }

    pub fn vector_len(&self) -> Option<usize> {
        match self.as_template()?.base.as_str() {
            "vec2" => Some(2),
            "vec3" => Some(3),
            "vec4" => Some(4),
            _ => None,
        }
    }

    /// `(columns, rows)` of a matrix type.
    pub fn matrix_shape(&self) -> Option<(usize, usize)> {
        matrix_shape(&self.as_template()?.base)
    }

    pub fn is_atomic(&self) -> bool {
        self.as_template().is_some_and(|t| t.base == "atomic")
    }

    pub fn is_texture(&self) -> bool {
        self.name.starts_with("texture_")
    }

    pub fn is_runtime_array(&self) -> bool {
        self.as_array().is_some_and(|a| a.count.is_none())
    }

    /// Mark this type and every struct reachable from it as live.
    pub fn mark_in_use(&self) {
        match &self.kind {
            TypeInfoKind::Struct(s) => {
                if s.in_use.replace(true) {
                    return;
                }
                for member in &s.members {
                    member.ty.mark_in_use();
                }
            }
            TypeInfoKind::Array(a) => a.format.mark_in_use(),
            TypeInfoKind::Template(t) => {
                if let Some(format) = &t.format {
                    format.mark_in_use();
                }
            }
            TypeInfoKind::Scalar(_) | TypeInfoKind::Opaque => {}
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn matrix_shape(base: &str) -> Option<(usize, usize)> {
    let dims = base.strip_prefix("mat")?;
    let (cols, rows) = dims.split_once('x')?;
    let cols = cols.parse::<usize>().ok()?;
    let rows = rows.parse::<usize>().ok()?;
    ((2..=4).contains(&cols) && (2..=4).contains(&rows)).then_some((cols, rows))
}

/// Computes and memoizes `TypeInfo`s for one program.
#[derive(Debug, Default)]
pub struct TypeCache {
    structs: HashMap<String, StructDecl>,
    aliases: HashMap<String, Type>,
    constants: HashMap<String, Expression>,
    by_node: HashMap<NodeId, Rc<TypeInfo>>,
    by_struct: HashMap<String, Rc<TypeInfo>>,
    by_name: HashMap<String, Rc<TypeInfo>>,
    in_progress: HashSet<String>,
    errors: Vec<String>,
}

impl TypeCache {
    pub fn new(program: &Program) -> Self {
        let mut cache = TypeCache::default();
        for decl in &program.declarations {
            match decl {
                Declaration::Struct(s) => {
                    cache.structs.insert(s.name.clone(), s.clone());
                }
                Declaration::Alias(a) => {
                    cache.aliases.insert(a.name.clone(), a.ty.clone());
                }
                Declaration::Const(v) | Declaration::Override(v) => {
                    if let Some(value) = &v.value {
                        cache.constants.insert(v.name.clone(), value.clone());
                    }
                }
                _ => {}
            }
        }
        cache
    }

    /// Types whose size or offsets do not fit in 32 bits. Such a type keeps
    /// a saturated size of `u32::MAX`.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn overflow(&mut self, name: &str) -> u32 {
        let message = format!("layout of '{}' exceeds 32-bit sizes", name);
        warn!("{}", message);
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
        u32::MAX
    }

    pub fn constants(&self) -> &HashMap<String, Expression> {
        &self.constants
    }

    pub fn is_struct(&self, name: &str) -> bool {
        self.structs.contains_key(name)
    }

    pub fn struct_names(&self) -> impl Iterator<Item = &String> {
        self.structs.keys()
    }

    /// Layout of a type node, computed on first request.
    pub fn type_info(&mut self, ty: &Type) -> Rc<TypeInfo> {
        if let Some(info) = self.by_node.get(&ty.id) {
            return Rc::clone(info);
        }
        let info = self.compute(ty);
        self.by_node.insert(ty.id, Rc::clone(&info));
        info
    }

    /// Layout of a struct by name; shared by every type node naming it.
    pub fn struct_info(&mut self, name: &str) -> Option<Rc<TypeInfo>> {
        if let Some(info) = self.by_struct.get(name) {
            return Some(Rc::clone(info));
        }
        let decl = self.structs.get(name)?.clone();
        if !self.in_progress.insert(name.to_string()) {
            debug!("recursive struct '{}' laid out as opaque", name);
            return Some(Rc::new(TypeInfo::opaque(name)));
        }
        let info = Rc::new(self.layout_struct(&decl));
        self.in_progress.remove(name);
        self.by_struct.insert(name.to_string(), Rc::clone(&info));
        Some(info)
    }

    /// Layout of a type spelled by name only (scalars, structs, aliases,
    /// opaque names).
    pub fn named(&mut self, name: &str) -> Rc<TypeInfo> {
        if let Some(info) = self.struct_info(name) {
            return info;
        }
        if let Some(target) = self.aliases.get(name).cloned() {
            return self.type_info(&target);
        }
        if let Some(info) = self.by_name.get(name) {
            return Rc::clone(info);
        }
        let info = Rc::new(match ScalarKind::from_name(name) {
            Some(kind) => TypeInfo::scalar(kind),
            None => TypeInfo::opaque(name),
        });
        self.by_name.insert(name.to_string(), Rc::clone(&info));
        info
    }

    pub fn scalar(&mut self, kind: ScalarKind) -> Rc<TypeInfo> {
        self.named(kind.name())
    }

    /// `vecN<kind>` without a type node behind it.
    pub fn vector(&mut self, kind: ScalarKind, len: usize) -> Rc<TypeInfo> {
        let name = format!("vec{}<{}>", len, kind.name());
        if let Some(info) = self.by_name.get(&name) {
            return Rc::clone(info);
        }
        let elem = self.scalar(kind);
        let info = Rc::new(vector_layout(&format!("vec{}", len), len, elem));
        self.by_name.insert(name, Rc::clone(&info));
        info
    }

    fn attribute_u32(&self, attributes: &[Attribute], name: &str) -> Option<u32> {
        let arg = find_attribute(attributes, name)?.args.first()?;
        ConstantFolder::new(&self.constants).fold_u32(arg)
    }

    fn compute(&mut self, ty: &Type) -> Rc<TypeInfo> {
        let mut info = match &ty.kind {
            TypeKind::Named(name) => {
                let shared = self.named(name);
                if ty.attributes.is_empty() {
                    return shared;
                }
                return Rc::new(TypeInfo {
                    name: shared.name.clone(),
                    attributes: ty.attributes.clone(),
                    size: shared.size,
                    align: shared.align,
                    kind: clone_kind_shallow(&shared),
                });
            }
            TypeKind::Array { format, count, .. } => {
                let elem = match format {
                    Some(format) => self.type_info(format),
                    None => self.scalar(ScalarKind::F32),
                };
                let stride = match self.attribute_u32(&ty.attributes, "stride") {
                    Some(stride) => stride,
                    None => match checked_round_up(elem.align, elem.size) {
                        Some(stride) => stride,
                        None => self.overflow(&ty.to_string()),
                    },
                };
                let size = match count.map_or(Some(0), |n| n.checked_mul(stride)) {
                    Some(size) => size,
                    None => self.overflow(&ty.to_string()),
                };
                TypeInfo::new(
                    ty.to_string(),
                    size,
                    elem.align,
                    TypeInfoKind::Array(ArrayInfo {
                        format: elem,
                        count: *count,
                        stride,
                    }),
                )
            }
            TypeKind::Template {
                name,
                format,
                access,
                space,
            } => {
                let format_info = format.as_ref().map(|f| self.type_info(f));
                self.layout_template(ty, name, format_info, access.clone(), space.clone())
            }
        };
        info.attributes = ty.attributes.clone();
        Rc::new(info)
    }

    fn layout_template(
        &mut self,
        ty: &Type,
        base: &str,
        format: Option<Rc<TypeInfo>>,
        access: Option<String>,
        space: Option<String>,
    ) -> TypeInfo {
        if let Some(len) = match base {
            "vec2" => Some(2),
            "vec3" => Some(3),
            "vec4" => Some(4),
            _ => None,
        } {
            let elem = format.unwrap_or_else(|| self.scalar(ScalarKind::F32));
            let mut info = vector_layout(base, len, elem);
            info.name = ty.to_string();
            return info;
        }

        if let Some((cols, rows)) = matrix_shape(base) {
            let elem = format.unwrap_or_else(|| self.scalar(ScalarKind::F32));
            let column = vector_layout(&format!("vec{}", rows), rows, Rc::clone(&elem));
            let column_stride = round_up(column.align, column.size);
            return TypeInfo::new(
                ty.to_string(),
                cols as u32 * column_stride,
                column.align,
                TypeInfoKind::Template(TemplateInfo {
                    base: base.to_string(),
                    format: Some(elem),
                    access,
                    space,
                }),
            );
        }

        let (size, align) = match (base, &format) {
            ("atomic", Some(inner)) => (inner.size, inner.align),
            _ => (0, 1),
        };
        TypeInfo::new(
            ty.to_string(),
            size,
            align,
            TypeInfoKind::Template(TemplateInfo {
                base: base.to_string(),
                format,
                access,
                space,
            }),
        )
    }

    fn layout_struct(&mut self, decl: &StructDecl) -> TypeInfo {
        let mut members = Vec::with_capacity(decl.members.len());
        let mut end = 0;
        let mut struct_align = 0;
        let mut overflowed = false;

        for member in &decl.members {
            let ty = self.type_info(&member.ty);
            let align = match self.attribute_u32(&member.attributes, "align") {
                Some(explicit) => explicit.max(ty.align),
                None => ty.align,
            };
            let size = match self.attribute_u32(&member.attributes, "size") {
                Some(explicit) => explicit.max(ty.size),
                None => ty.size,
            };
            let Some(offset) = checked_round_up(align, end).filter(|_| !overflowed) else {
                overflowed = true;
                members.push(MemberInfo {
                    name: member.name.clone(),
                    ty,
                    offset: u32::MAX,
                    size,
                    align,
                });
                continue;
            };
            end = match offset.checked_add(size) {
                Some(end) => end,
                None => {
                    overflowed = true;
                    u32::MAX
                }
            };
            struct_align = struct_align.max(align);
            members.push(MemberInfo {
                name: member.name.clone(),
                ty,
                offset,
                size,
                align,
            });
        }

        let struct_align = struct_align.max(1);
        let size = match checked_round_up(struct_align, end).filter(|_| !overflowed) {
            Some(size) => size,
            None => self.overflow(&decl.name),
        };
        let mut info = TypeInfo::new(
            decl.name.clone(),
            size,
            struct_align,
            TypeInfoKind::Struct(StructInfo {
                members,
                start_line: decl.start_line,
                end_line: decl.end_line,
                in_use: Cell::new(false),
            }),
        );
        info.attributes = decl.attributes.clone();
        info
    }
}

fn vector_layout(base: &str, len: usize, elem: Rc<TypeInfo>) -> TypeInfo {
    let elem_size = elem.size;
    let align = if len == 2 { 2 * elem_size } else { 4 * elem_size };
    TypeInfo::new(
        format!("{}<{}>", base, elem.name),
        len as u32 * elem_size,
        align,
        TypeInfoKind::Template(TemplateInfo {
            base: base.to_string(),
            format: Some(elem),
            access: None,
            space: None,
        }),
    )
}

/// A struct or alias named with extra attributes gets its own `TypeInfo`
/// that shares the underlying pieces.
fn clone_kind_shallow(info: &TypeInfo) -> TypeInfoKind {
    match &info.kind {
        TypeInfoKind::Scalar(kind) => TypeInfoKind::Scalar(*kind),
        TypeInfoKind::Opaque => TypeInfoKind::Opaque,
        TypeInfoKind::Array(a) => TypeInfoKind::Array(ArrayInfo {
            format: Rc::clone(&a.format),
            count: a.count,
            stride: a.stride,
        }),
        TypeInfoKind::Struct(s) => TypeInfoKind::Struct(StructInfo {
            members: s
                .members
                .iter()
                .map(|m| MemberInfo {
                    name: m.name.clone(),
                    ty: Rc::clone(&m.ty),
                    offset: m.offset,
                    size: m.size,
                    align: m.align,
                })
                .collect(),
            start_line: s.start_line,
            end_line: s.end_line,
            in_use: Cell::new(s.in_use.get()),
        }),
        TypeInfoKind::Template(t) => TypeInfoKind::Template(TemplateInfo {
            base: t.base.clone(),
            format: t.format.clone(),
            access: t.access.clone(),
            space: t.space.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn struct_layout(source: &str, name: &str) -> Rc<TypeInfo> {
        let program = parse_source(source).unwrap();
        let mut cache = TypeCache::new(&program);
        cache.struct_info(name).expect("struct not found")
    }

    const FIXTURE: &str = r#"
        struct A {
            u: f32,
            v: f32,
            w: vec2<f32>,
            @size(16) x: f32,
        }

        struct B {
            a: vec2<f32>,
            b: vec3<f32>,
            c: f32,
            d: f32,
            @align(16) e: A,
            f: vec3<f32>,
            g: @stride(32) array<A, 3>,
            h: i32,
        }
    "#;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(16, 0), 0);
        assert_eq!(round_up(16, 1), 16);
        assert_eq!(round_up(8, 16), 16);
        assert_eq!(round_up(4, 13), 16);
        assert_eq!(round_up(0, 7), 7);
        assert_eq!(checked_round_up(16, u32::MAX), None);
    }

    #[test]
    fn test_oversized_struct_records_error() {
        let program = parse_source("struct S { a: array<vec4<f32>, 1073741824>, b: f32 }").unwrap();
        let mut cache = TypeCache::new(&program);
        let s = cache.struct_info("S").unwrap();
        assert_eq!(s.size, u32::MAX);
        assert!(cache.errors().iter().any(|e| e.contains("'S'")), "{:?}", cache.errors());
    }

    #[test]
    fn test_small_struct_layout() {
        let a = struct_layout(FIXTURE, "A");
        assert_eq!(a.align, 8);
        assert_eq!(a.size, 32);
        let offsets: Vec<_> = a.as_struct().unwrap().members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 16]);
        assert_eq!(a.member("x").unwrap().size, 16);
    }

    #[test]
    fn test_nested_struct_layout() {
        let b = struct_layout(FIXTURE, "B");
        assert_eq!(b.align, 16);
        assert_eq!(b.size, 208);

        let offsets: Vec<_> = b
            .as_struct()
            .unwrap()
            .members
            .iter()
            .map(|m| (m.name.as_str(), m.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![("a", 0), ("b", 16), ("c", 28), ("d", 32), ("e", 48), ("f", 80), ("g", 96), ("h", 192)]
        );

        let g = &b.member("g").unwrap().ty;
        assert_eq!(g.as_array().unwrap().stride, 32);
        assert_eq!(g.size, 96);
    }

    #[test]
    fn test_vector_and_matrix_layout() {
        let program = parse_source(
            "struct S {
                a: vec3<f32>,
                b: vec2<f16>,
                c: mat3x3<f32>,
                d: mat2x2f,
                e: atomic<u32>,
             }",
        )
        .unwrap();
        let mut cache = TypeCache::new(&program);
        let s = cache.struct_info("S").unwrap();

        let a = &s.member("a").unwrap().ty;
        assert_eq!((a.align, a.size), (16, 12));
        let b = &s.member("b").unwrap().ty;
        assert_eq!((b.align, b.size), (4, 4));
        let c = &s.member("c").unwrap().ty;
        assert_eq!((c.align, c.size), (16, 48));
        assert_eq!(c.matrix_shape(), Some((3, 3)));
        let d = &s.member("d").unwrap().ty;
        assert_eq!((d.align, d.size), (8, 16));
        let e = &s.member("e").unwrap().ty;
        assert!(e.is_atomic());
        assert_eq!((e.align, e.size), (4, 4));
        assert_eq!(e.scalar_kind(), Some(ScalarKind::U32));
    }

    #[test]
    fn test_runtime_array_has_zero_size() {
        let program = parse_source("@group(0) @binding(0) var<storage> data: array<vec4<f32>>;").unwrap();
        let Some(Declaration::Var(var)) = program.declarations.first() else {
            panic!("expected a global var");
        };
        let mut cache = TypeCache::new(&program);
        let info = cache.type_info(var.ty.as_ref().unwrap());
        assert!(info.is_runtime_array());
        assert_eq!(info.size, 0);
        assert_eq!(info.as_array().unwrap().stride, 16);
    }

    #[test]
    fn test_cache_identity() {
        let program = parse_source("struct P { x: f32 } alias Q = P; var<private> p: P; var<private> q: Q;").unwrap();
        let mut cache = TypeCache::new(&program);
        let types: Vec<_> = program
            .declarations
            .iter()
            .filter_map(|d| match d {
                Declaration::Var(v) => v.ty.clone(),
                _ => None,
            })
            .collect();

        let first = cache.type_info(&types[0]);
        assert!(Rc::ptr_eq(&first, &cache.type_info(&types[0])));
        assert!(Rc::ptr_eq(&first, &cache.type_info(&types[1])));
        assert!(Rc::ptr_eq(&first, &cache.struct_info("P").unwrap()));
    }

    #[test]
    fn test_attribute_arguments_fold_constants() {
        let b = struct_layout("const PAD = 32; struct S { @size(PAD) a: f32, b: f32 }", "S");
        assert_eq!(b.member("b").unwrap().offset, 32);
        assert_eq!(b.size, 36);
    }
}
