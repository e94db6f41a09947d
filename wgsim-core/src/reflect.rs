//! Static reflection over a parsed program.
//!
//! Classifies module-scope variables into resource categories, lays out every
//! type they reach, extracts entry-point signatures and call graphs, and marks
//! which functions and structs are live.

use crate::ast::*;
use crate::builtin_registry::BuiltinRegistry;
use crate::constant_folding::ConstantFolder;
use crate::layout::{TypeCache, TypeInfo};
use crate::reachability::{call_graph, reachable_functions, transitive_callees};
use crate::visitor::{walk_block, walk_expr_list, walk_statement, Visitor};
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::ControlFlow;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Uniform,
    Storage,
    Texture,
    StorageTexture,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationType {
    Builtin,
    Location,
}

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub ty: Rc<TypeInfo>,
    pub group: u32,
    pub binding: u32,
    pub resource: ResourceKind,
    pub access: Option<String>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct OverrideInfo {
    pub name: String,
    pub ty: Option<Rc<TypeInfo>>,
    pub id: Option<u32>,
    pub has_default: bool,
}

#[derive(Debug, Clone)]
pub struct AliasInfo {
    pub name: String,
    pub ty: Rc<TypeInfo>,
}

#[derive(Debug, Clone)]
pub struct ArgumentInfo {
    pub name: String,
    pub ty: Rc<TypeInfo>,
}

/// One entry-point input or output: a `@builtin(...)` or `@location(n)`.
#[derive(Debug, Clone)]
pub struct InputInfo {
    pub name: String,
    pub ty: Rc<TypeInfo>,
    pub location_type: LocationType,
    /// Builtin name or location number.
    pub location: String,
}

pub type OutputInfo = InputInfo;

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub stage: Option<Stage>,
    pub args: Vec<ArgumentInfo>,
    pub return_type: Option<Rc<TypeInfo>>,
    pub inputs: Vec<InputInfo>,
    pub outputs: Vec<OutputInfo>,
    /// Resource variables touched by this function or anything it calls.
    pub resources: Vec<String>,
    /// Direct calls to user functions.
    pub calls: Vec<String>,
    pub overrides: Vec<String>,
    pub workgroup_size: Option<[u32; 3]>,
    pub in_use: bool,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EntryPoints {
    pub vertex: Vec<String>,
    pub fragment: Vec<String>,
    pub compute: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Reflection {
    pub structs: Vec<Rc<TypeInfo>>,
    pub aliases: Vec<AliasInfo>,
    pub uniforms: Vec<VariableInfo>,
    pub storage: Vec<VariableInfo>,
    pub textures: Vec<VariableInfo>,
    pub samplers: Vec<VariableInfo>,
    pub overrides: Vec<OverrideInfo>,
    pub entry: EntryPoints,
    pub functions: Vec<FunctionInfo>,
    /// Types too large to lay out in 32 bits.
    pub layout_errors: Vec<String>,
}

impl Reflection {
    /// All resource variables, uniforms first.
    pub fn resources(&self) -> impl Iterator<Item = &VariableInfo> {
        self.uniforms
            .iter()
            .chain(&self.storage)
            .chain(&self.textures)
            .chain(&self.samplers)
    }

    /// Resources grouped by `@group`, each group sorted by `@binding`.
    pub fn bind_groups(&self) -> BTreeMap<u32, Vec<&VariableInfo>> {
        let mut groups: BTreeMap<u32, Vec<&VariableInfo>> = BTreeMap::new();
        for var in self.resources() {
            groups.entry(var.group).or_default().push(var);
        }
        for bindings in groups.values_mut() {
            bindings.sort_by_key(|v| v.binding);
        }
        groups
    }

    pub fn find_resource(&self, group: u32, binding: u32) -> Option<&VariableInfo> {
        self.resources().find(|v| v.group == group && v.binding == binding)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn struct_info(&self, name: &str) -> Option<&Rc<TypeInfo>> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn entry_point(&self, name: &str) -> Option<&FunctionInfo> {
        self.function(name).filter(|f| f.stage.is_some())
    }

    pub fn function_resources(&self, name: &str) -> Vec<&VariableInfo> {
        let Some(f) = self.function(name) else {
            return Vec::new();
        };
        f.resources
            .iter()
            .filter_map(|r| self.resources().find(|v| &v.name == r))
            .collect()
    }
}

/// Reflects one program. Keeps its layout cache between calls, so repeated
/// `reflect()` calls hand out the same `TypeInfo` objects.
pub struct Reflector {
    program: Rc<Program>,
    types: TypeCache,
    builtins: BuiltinRegistry,
}

impl Reflector {
    pub fn new(program: &Program) -> Self {
        Self::with_program(Rc::new(program.clone()))
    }

    pub fn with_program(program: Rc<Program>) -> Self {
        let types = TypeCache::new(&program);
        Reflector {
            program,
            types,
            builtins: BuiltinRegistry::new(),
        }
    }

    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    pub fn types(&mut self) -> &mut TypeCache {
        &mut self.types
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    pub fn reflect(&mut self) -> Reflection {
        let program = Rc::clone(&self.program);
        let mut reflection = Reflection::default();

        for s in program.structs() {
            if let Some(info) = self.types.struct_info(&s.name) {
                if let Some(si) = info.as_struct() {
                    si.in_use.set(false);
                }
                reflection.structs.push(info);
            }
        }

        for alias in program.aliases() {
            reflection.aliases.push(AliasInfo {
                name: alias.name.clone(),
                ty: self.types.type_info(&alias.ty),
            });
        }

        for decl in &program.declarations {
            match decl {
                Declaration::Var(var) => self.reflect_global(var, &mut reflection),
                Declaration::Override(var) => {
                    let id = find_attribute(&var.attributes, "id").and_then(|a| self.fold_u32(a.args.first()?));
                    reflection.overrides.push(OverrideInfo {
                        name: var.name.clone(),
                        ty: var.ty.as_ref().map(|t| self.types.type_info(t)),
                        id,
                        has_default: var.value.is_some(),
                    });
                }
                _ => {}
            }
        }

        self.reflect_functions(&program, &mut reflection);
        reflection.layout_errors = self.types.errors().to_vec();

        debug!(
            "reflected {} functions, {} resources, {} structs",
            reflection.functions.len(),
            reflection.resources().count(),
            reflection.structs.len()
        );
        reflection
    }

    fn fold_u32(&self, expr: &Expression) -> Option<u32> {
        ConstantFolder::new(self.types.constants()).fold_u32(expr)
    }

    fn attribute_u32(&self, attributes: &[Attribute], name: &str) -> Option<u32> {
        self.fold_u32(find_attribute(attributes, name)?.args.first()?)
    }

    fn reflect_global(&mut self, var: &VarDecl, reflection: &mut Reflection) {
        let Some(ty) = &var.ty else {
            return;
        };
        let info = self.types.type_info(ty);

        let resource = match var.storage.as_deref() {
            Some("uniform") => ResourceKind::Uniform,
            Some("storage") => ResourceKind::Storage,
            Some(_) => return,
            None if info.name.starts_with("texture_storage") => ResourceKind::StorageTexture,
            None if info.is_texture() => ResourceKind::Texture,
            None if info.name.starts_with("sampler") => ResourceKind::Sampler,
            None => return,
        };

        let access = match resource {
            ResourceKind::Storage => Some(var.access.clone().unwrap_or_else(|| "read".to_string())),
            ResourceKind::StorageTexture => info.as_template().and_then(|t| t.access.clone()),
            _ => var.access.clone(),
        };

        let entry = VariableInfo {
            name: var.name.clone(),
            ty: info,
            group: self.attribute_u32(&var.attributes, "group").unwrap_or(0),
            binding: self.attribute_u32(&var.attributes, "binding").unwrap_or(0),
            resource,
            access,
            attributes: var.attributes.clone(),
        };

        match resource {
            ResourceKind::Uniform => reflection.uniforms.push(entry),
            ResourceKind::Storage => reflection.storage.push(entry),
            ResourceKind::Texture | ResourceKind::StorageTexture => reflection.textures.push(entry),
            ResourceKind::Sampler => reflection.samplers.push(entry),
        }
    }

    fn reflect_functions(&mut self, program: &Program, reflection: &mut Reflection) {
        let calls = call_graph(program);
        let resource_names: HashSet<String> = reflection.resources().map(|v| v.name.clone()).collect();
        let override_names: HashSet<String> = reflection.overrides.iter().map(|o| o.name.clone()).collect();
        let struct_names: HashSet<String> = self.types.struct_names().cloned().collect();

        let mut direct: HashMap<String, BodyScan> = HashMap::new();
        for f in program.functions() {
            let scan = BodyScan::run(f, &resource_names, &override_names, &struct_names);
            direct.insert(f.name.clone(), scan);
        }

        let live = reachable_functions(program, &calls);

        for f in program.functions() {
            let mut resources = Vec::new();
            let mut overrides = Vec::new();
            let mut structs = Vec::new();
            // Callers before callees, so a function's own names come first.
            for callee in transitive_callees(&f.name, &calls).iter().rev() {
                if let Some(scan) = direct.get(callee) {
                    extend_unique(&mut resources, &scan.resources);
                    extend_unique(&mut overrides, &scan.overrides);
                    extend_unique(&mut structs, &scan.structs);
                }
            }

            let stage = if f.attribute("compute").is_some() {
                Some(Stage::Compute)
            } else if f.attribute("vertex").is_some() {
                Some(Stage::Vertex)
            } else if f.attribute("fragment").is_some() {
                Some(Stage::Fragment)
            } else {
                None
            };

            let args: Vec<ArgumentInfo> = f
                .args
                .iter()
                .map(|a| ArgumentInfo {
                    name: a.name.clone(),
                    ty: self.types.type_info(&a.ty),
                })
                .collect();
            let return_type = f.return_type.as_ref().map(|t| self.types.type_info(t));

            let mut inputs = Vec::new();
            let mut outputs = Vec::new();
            if stage.is_some() {
                for arg in &f.args {
                    self.collect_io(&arg.name, &arg.attributes, &arg.ty, &mut inputs);
                }
                if let Some(ty) = &f.return_type {
                    self.collect_io("return", &f.return_attributes, ty, &mut outputs);
                }
            }

            let workgroup_size = f.attribute("workgroup_size").and_then(|attr| self.workgroup_size(attr));

            let in_use = live.contains(&f.name);
            if in_use {
                for arg in &args {
                    arg.ty.mark_in_use();
                }
                if let Some(ty) = &return_type {
                    ty.mark_in_use();
                }
                for name in &structs {
                    if let Some(info) = self.types.struct_info(name) {
                        info.mark_in_use();
                    }
                }
                for name in &resources {
                    if let Some(var) = reflection.resources().find(|v| &v.name == name) {
                        var.ty.mark_in_use();
                    }
                }
            }

            match stage {
                Some(Stage::Vertex) => reflection.entry.vertex.push(f.name.clone()),
                Some(Stage::Fragment) => reflection.entry.fragment.push(f.name.clone()),
                Some(Stage::Compute) => reflection.entry.compute.push(f.name.clone()),
                None => {}
            }

            reflection.functions.push(FunctionInfo {
                name: f.name.clone(),
                stage,
                args,
                return_type,
                inputs,
                outputs,
                resources,
                calls: calls.get(&f.name).cloned().unwrap_or_default(),
                overrides,
                workgroup_size,
                in_use,
                start_line: f.start_line,
                end_line: f.end_line,
            });
        }
    }

    fn workgroup_size(&self, attr: &Attribute) -> Option<[u32; 3]> {
        let mut size = [1u32; 3];
        for (slot, arg) in size.iter_mut().zip(&attr.args) {
            *slot = self.fold_u32(arg)?;
        }
        Some(size)
    }

    fn collect_io(&mut self, name: &str, attributes: &[Attribute], ty: &Type, out: &mut Vec<InputInfo>) {
        let info = self.types.type_info(ty);

        if let Some(attr) = find_attribute(attributes, "builtin") {
            out.push(InputInfo {
                name: name.to_string(),
                ty: info,
                location_type: LocationType::Builtin,
                location: attr.first_arg_text().unwrap_or_default(),
            });
            return;
        }
        if let Some(attr) = find_attribute(attributes, "location") {
            let location = attr
                .args
                .first()
                .and_then(|a| self.fold_u32(a))
                .map(|n| n.to_string())
                .or_else(|| attr.first_arg_text())
                .unwrap_or_default();
            out.push(InputInfo {
                name: name.to_string(),
                ty: info,
                location_type: LocationType::Location,
                location,
            });
            return;
        }

        let program = Rc::clone(&self.program);
        if let Some(decl) = program.structs().find(|s| s.name == ty.name()) {
            for member in &decl.members {
                self.collect_io(&member.name, &member.attributes, &member.ty, out);
            }
        };
    }
}

fn extend_unique(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

/// Names a function body refers to directly: resources and overrides not
/// shadowed by locals, and struct types it mentions.
#[derive(Debug, Default)]
struct BodyScan {
    resources: Vec<String>,
    overrides: Vec<String>,
    structs: Vec<String>,
}

struct BodyScanner<'a> {
    resource_names: &'a HashSet<String>,
    override_names: &'a HashSet<String>,
    struct_names: &'a HashSet<String>,
    locals: Vec<HashSet<String>>,
    scan: BodyScan,
}

impl BodyScan {
    fn run(
        f: &Function,
        resource_names: &HashSet<String>,
        override_names: &HashSet<String>,
        struct_names: &HashSet<String>,
    ) -> BodyScan {
        let mut scanner = BodyScanner {
            resource_names,
            override_names,
            struct_names,
            locals: vec![f.args.iter().map(|a| a.name.clone()).collect()],
            scan: BodyScan::default(),
        };
        let _ = scanner.visit_function(f);
        scanner.scan
    }
}

impl BodyScanner<'_> {
    fn is_shadowed(&self, name: &str) -> bool {
        self.locals.iter().any(|scope| scope.contains(name))
    }

    fn note_struct(&mut self, name: &str) {
        if self.struct_names.contains(name) && !self.scan.structs.iter().any(|s| s == name) {
            self.scan.structs.push(name.to_string());
        }
    }
}

impl Visitor for BodyScanner<'_> {
    type Break = ();

    fn visit_block(&mut self, block: &[Statement]) -> ControlFlow<()> {
        self.locals.push(HashSet::new());
        let result = walk_block(self, block);
        self.locals.pop();
        result
    }

    fn visit_statement(&mut self, s: &Statement) -> ControlFlow<()> {
        if let StmtKind::For { .. } = s.kind {
            // The loop variable lives in the loop's own scope.
            self.locals.push(HashSet::new());
            let result = walk_statement(self, s);
            self.locals.pop();
            return result;
        }
        walk_statement(self, s)
    }

    fn visit_local_decl(&mut self, decl: &VarDecl) -> ControlFlow<()> {
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(decl.name.clone());
        }
        ControlFlow::Continue(())
    }

    fn visit_type(&mut self, ty: &Type) -> ControlFlow<()> {
        self.note_struct(ty.name());
        if let Some(format) = ty.format() {
            self.visit_type(format)?;
        }
        ControlFlow::Continue(())
    }

    fn visit_expr_variable(&mut self, name: &str, _e: &Expression) -> ControlFlow<()> {
        if self.is_shadowed(name) {
            return ControlFlow::Continue(());
        }
        if self.resource_names.contains(name) && !self.scan.resources.iter().any(|r| r == name) {
            self.scan.resources.push(name.to_string());
        }
        if self.override_names.contains(name) && !self.scan.overrides.iter().any(|r| r == name) {
            self.scan.overrides.push(name.to_string());
        }
        ControlFlow::Continue(())
    }

    fn visit_expr_call(&mut self, name: &str, args: &[Expression], _e: &Expression) -> ControlFlow<()> {
        self.note_struct(name);
        walk_expr_list(self, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    const SHADER: &str = r#"
        struct Params { scale: f32, count: u32 }
        struct Light { color: vec3<f32>, intensity: f32 }
        struct Unused { x: f32 }
        struct VertexOut {
            @builtin(position) pos: vec4<f32>,
            @location(0) uv: vec2<f32>,
        }

        override BLOCK: u32 = 64;

        @group(0) @binding(0) var<uniform> params: Params;
        @group(0) @binding(1) var<storage, read_write> data: array<f32>;
        @group(1) @binding(0) var tex: texture_2d<f32>;
        @group(1) @binding(1) var samp: sampler;
        @binding(2) var<storage> lights: array<Light>;

        fn scale(x: f32) -> f32 {
            return x * params.scale;
        }

        fn shadowed() -> f32 {
            let data = 3.0;
            return data;
        }

        @compute @workgroup_size(BLOCK, 1)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = scale(data[id.x]) + shadowed();
        }

        @vertex
        fn vs(@location(0) p: vec2<f32>, @builtin(vertex_index) vi: u32) -> VertexOut {
            var out: VertexOut;
            out.pos = vec4<f32>(p, 0.0, 1.0);
            let l = lights[0];
            return out;
        }

        @fragment
        fn fs(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
            return textureLoad(tex, vec2<i32>(0, 0), 0);
        }
    "#;

    fn reflect(source: &str) -> Reflection {
        let program = parse_source(source).unwrap();
        Reflector::new(&program).reflect()
    }

    #[test]
    fn test_resource_classification() {
        let r = reflect(SHADER);
        assert_eq!(r.uniforms.len(), 1);
        assert_eq!(r.storage.len(), 2);
        assert_eq!(r.textures.len(), 1);
        assert_eq!(r.samplers.len(), 1);

        let data = r.find_resource(0, 1).unwrap();
        assert_eq!(data.name, "data");
        assert_eq!(data.resource, ResourceKind::Storage);
        assert_eq!(data.access.as_deref(), Some("read_write"));

        let lights = r.storage.iter().find(|v| v.name == "lights").unwrap();
        assert_eq!((lights.group, lights.binding), (0, 2));
        assert_eq!(lights.access.as_deref(), Some("read"));

        let groups = r.bind_groups();
        assert_eq!(groups[&0].iter().map(|v| v.binding).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(groups[&1].len(), 2);
    }

    #[test]
    fn test_transitive_resources_and_shadowing() {
        let r = reflect(SHADER);
        let main = r.function("main").unwrap();
        assert_eq!(main.resources, vec!["data".to_string(), "params".to_string()]);
        assert_eq!(main.calls, vec!["scale".to_string(), "shadowed".to_string()]);
        assert!(r.function("shadowed").unwrap().resources.is_empty());
        assert_eq!(main.overrides, Vec::<String>::new());
    }

    #[test]
    fn test_entry_points_and_signatures() {
        let r = reflect(SHADER);
        assert_eq!(r.entry.compute, vec!["main".to_string()]);
        assert_eq!(r.entry.vertex, vec!["vs".to_string()]);
        assert_eq!(r.entry.fragment, vec!["fs".to_string()]);

        let main = r.entry_point("main").unwrap();
        assert_eq!(main.workgroup_size, Some([64, 1, 1]));
        assert_eq!(main.inputs[0].location_type, LocationType::Builtin);
        assert_eq!(main.inputs[0].location, "global_invocation_id");

        let vs = r.entry_point("vs").unwrap();
        assert_eq!(vs.inputs.len(), 2);
        assert_eq!(vs.inputs[0].location, "0");
        let outputs: Vec<_> = vs.outputs.iter().map(|o| (o.name.as_str(), o.location.as_str())).collect();
        assert_eq!(outputs, vec![("pos", "position"), ("uv", "0")]);

        let fs = r.entry_point("fs").unwrap();
        assert_eq!(fs.outputs.len(), 1);
        assert_eq!(fs.outputs[0].location_type, LocationType::Location);
        assert_eq!(fs.resources, vec!["tex".to_string()]);
    }

    #[test]
    fn test_liveness() {
        let r = reflect(
            r#"
            struct Inner { v: f32 }
            struct Outer { inner: Inner }
            struct Dead { x: f32 }
            @group(0) @binding(0) var<storage, read_write> out: array<Outer>;
            fn helper() {}
            fn never_called() { let d = Dead(1.0); }
            @compute @workgroup_size(1) fn main() { helper(); out[0].inner.v = 1.0; }
            "#,
        );
        assert!(r.function("main").unwrap().in_use);
        assert!(r.function("helper").unwrap().in_use);
        assert!(!r.function("never_called").unwrap().in_use);

        let live = |name: &str| r.struct_info(name).unwrap().as_struct().unwrap().in_use.get();
        assert!(live("Outer"));
        assert!(live("Inner"));
        assert!(!live("Dead"));
    }

    #[test]
    fn test_reflection_is_idempotent() {
        let program = parse_source(SHADER).unwrap();
        let mut reflector = Reflector::new(&program);
        let first = reflector.reflect();
        let second = reflector.reflect();

        for (a, b) in first.structs.iter().zip(&second.structs) {
            assert!(Rc::ptr_eq(a, b));
        }
        for (a, b) in first.resources().zip(second.resources()) {
            assert!(Rc::ptr_eq(&a.ty, &b.ty));
        }
        assert!(second.struct_info("Params").unwrap().as_struct().unwrap().in_use.get());
    }

    #[test]
    fn test_overrides() {
        let r = reflect("@id(3) override gain: f32 = 1.5; override width: u32;");
        assert_eq!(r.overrides.len(), 2);
        assert_eq!(r.overrides[0].id, Some(3));
        assert!(r.overrides[0].has_default);
        assert!(!r.overrides[1].has_default);
        assert_eq!(r.overrides[1].ty.as_ref().unwrap().name, "u32");
    }
}
