//! Tree-walking executor.
//!
//! Runs a parsed program on the CPU. Top-level declarations execute once in
//! the root scope; `dispatch_workgroups` then walks every workgroup and every
//! invocation in turn, running the entry point's body with the dispatch
//! builtins bound. Semantic errors are reported and execution resumes at the
//! next statement.

pub mod builtins;
pub mod memory;
pub mod ops;
pub mod texture;
pub mod value;

use crate::ast::{
    find_attribute, BinaryOp, Declaration, ExprKind, Expression, Function, IncrementOp, Literal, NodeId, Program,
    Statement, StmtKind, Type, UnaryOp, VarDecl,
};
use crate::bail_exec;
use crate::builtin_registry::BuiltinRegistry;
use crate::error::{ExecError, ExecResult, Result, ShaderError};
use crate::layout::{ScalarKind, TypeInfo, TypeInfoKind};
use crate::reflect::{Reflection, Reflector, ResourceKind};
use crate::scope::{ScopeArena, ScopeId};
use log::{debug, trace, warn};
use memory::{f16_to_f32, BufferView, Memory, ViewAccess};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use texture::{TexelFormat, TextureData};
use value::{Access, Place, PlaceRoot, Slot, TextureId, Value};

/// Upper bound on iterations of a single loop before it is abandoned.
pub const MAX_LOOP_ITERATIONS: usize = 1 << 20;
const MAX_CALL_DEPTH: usize = 64;

/// Names of the dispatch builtins inside the invocation scope. The `@`
/// prefix keeps them apart from user identifiers.
pub const WORKGROUP_ID: &str = "@workgroup_id";
pub const LOCAL_INVOCATION_ID: &str = "@local_invocation_id";
pub const GLOBAL_INVOCATION_ID: &str = "@global_invocation_id";
pub const LOCAL_INVOCATION_INDEX: &str = "@local_invocation_index";
pub const NUM_WORKGROUPS: &str = "@num_workgroups";

/// Values for `override` declarations, keyed by name or by `@id` number.
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    pub constants: HashMap<String, f64>,
}

impl ExecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: f64) -> Self {
        self.constants.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindingResource {
    Uniform(Vec<u8>),
    Storage(Vec<u8>),
    Texture {
        data: Vec<u8>,
        size: [u32; 3],
        format: TexelFormat,
    },
    Sampler,
}

impl BindingResource {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            BindingResource::Uniform(bytes) | BindingResource::Storage(bytes) => Some(bytes),
            BindingResource::Texture { data, .. } => Some(data),
            BindingResource::Sampler => None,
        }
    }
}

/// Host-side resources keyed by `(group, binding)`.
#[derive(Debug, Clone, Default)]
pub struct BindGroups {
    entries: BTreeMap<(u32, u32), BindingResource>,
}

impl BindGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: u32, binding: u32, resource: BindingResource) {
        self.entries.insert((group, binding), resource);
    }

    pub fn get(&self, group: u32, binding: u32) -> Option<&BindingResource> {
        self.entries.get(&(group, binding))
    }

    pub fn take(&mut self, group: u32, binding: u32) -> Option<BindingResource> {
        self.entries.remove(&(group, binding))
    }

    /// A buffer's contents reinterpreted as `T`s.
    pub fn read<T: bytemuck::Pod>(&self, group: u32, binding: u32) -> Option<Vec<T>> {
        self.get(group, binding)
            .and_then(BindingResource::bytes)
            .map(bytemuck::pod_collect_to_vec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u32, u32), &BindingResource)> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<Value>),
    /// Ends the current invocation.
    Discard,
}

/// A dispatch after its entry point and workgroup size are resolved.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub entry: Rc<Function>,
    pub workgroups: [u32; 3],
    pub workgroup_size: [u32; 3],
}

impl DispatchPlan {
    pub fn invocations_per_workgroup(&self) -> usize {
        self.workgroup_size.iter().map(|&n| n as usize).product()
    }

    pub fn invocation_count(&self) -> usize {
        self.workgroups.iter().map(|&n| n as usize).product::<usize>() * self.invocations_per_workgroup()
    }
}

/// Where a bound resource came from, so it can be handed back.
#[derive(Debug)]
enum Bound {
    Buffer { group: u32, binding: u32, id: memory::BufferId, uniform: bool },
    Texture { group: u32, binding: u32, id: TextureId },
    Sampler { group: u32, binding: u32 },
}

pub struct Executor {
    program: Rc<Program>,
    reflector: Reflector,
    reflection: Reflection,
    scopes: ScopeArena<Slot>,
    memory: Memory,
    functions: HashMap<String, Rc<Function>>,
    diagnostics: Vec<ExecError>,
    /// Results of calls already stepped through by the debugger, consumed
    /// in place of calling the function again.
    pub(crate) call_results: HashMap<NodeId, Value>,
    module_vars: Vec<VarDecl>,
    bound: Vec<Bound>,
    call_depth: usize,
    /// Set when a called function discards, so the invocation ends at the
    /// statement that made the call.
    discarded: bool,
}

impl Executor {
    pub fn new(program: &Program) -> Self {
        let program = Rc::new(program.clone());
        let mut reflector = Reflector::with_program(Rc::clone(&program));
        let reflection = reflector.reflect();
        let functions = program
            .functions()
            .map(|f| (f.name.clone(), Rc::new(f.clone())))
            .collect();
        Executor {
            program,
            reflector,
            reflection,
            scopes: ScopeArena::new(),
            memory: Memory::new(),
            functions,
            diagnostics: Vec::new(),
            call_results: HashMap::new(),
            module_vars: Vec::new(),
            bound: Vec::new(),
            call_depth: 0,
            discarded: false,
        }
    }

    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    pub fn reflection(&self) -> &Reflection {
        &self.reflection
    }

    /// Errors reported since the last `execute`.
    pub fn diagnostics(&self) -> &[ExecError] {
        &self.diagnostics
    }

    pub fn scopes(&self) -> &ScopeArena<Slot> {
        &self.scopes
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        self.reflector.builtins()
    }

    pub(crate) fn function(&self, name: &str) -> Option<Rc<Function>> {
        self.functions.get(name).cloned()
    }

    pub(crate) fn type_info(&mut self, ty: &Type) -> Rc<TypeInfo> {
        self.reflector.types().type_info(ty)
    }

    pub(crate) fn report(&mut self, error: ExecError) {
        warn!("{}", error);
        self.diagnostics.push(error);
    }

    /// Clear all runtime state, leaving an empty root scope.
    pub(crate) fn reset(&mut self) {
        self.scopes = ScopeArena::new();
        self.diagnostics.clear();
        self.call_results.clear();
        self.module_vars.clear();
        self.call_depth = 0;
        self.discarded = false;
    }

    /// Run the top-level declarations once in the root scope.
    pub fn execute(&mut self, config: &ExecConfig) {
        self.reset();
        let program = Rc::clone(&self.program);
        for decl in &program.declarations {
            self.exec_global(decl, config);
        }
    }

    pub(crate) fn exec_global(&mut self, decl: &Declaration, config: &ExecConfig) {
        let root = self.scopes.root();
        let result = match decl {
            Declaration::Const(v) => self.declare(v, root),
            Declaration::Override(v) => self.declare_override(v, config),
            Declaration::Var(v) => {
                if self.reflection.resources().any(|r| r.name == v.name) {
                    Ok(())
                } else {
                    self.module_vars.push(v.clone());
                    self.declare(v, root)
                }
            }
            Declaration::ConstAssert(e) => self.const_assert(e, root),
            Declaration::Struct(_)
            | Declaration::Alias(_)
            | Declaration::Function(_)
            | Declaration::Enable(_)
            | Declaration::Requires(_)
            | Declaration::Diagnostic { .. } => Ok(()),
        };
        if let Err(e) = result {
            let line = global_line(decl);
            self.report(e.at(line));
        }
    }

    fn declare_override(&mut self, v: &VarDecl, config: &ExecConfig) -> ExecResult<()> {
        let id = find_attribute(&v.attributes, "id").and_then(|a| a.first_arg_text());
        let configured = config
            .constants
            .get(&v.name)
            .or_else(|| id.as_ref().and_then(|id| config.constants.get(id)));
        let root = self.scopes.root();
        let value = match (configured, &v.value) {
            (Some(&number), _) => {
                // Straight to the declared kind, so large integers keep every bit.
                let kind = match (&v.ty, &v.value) {
                    (Some(ty), _) => self.type_info(ty).scalar_kind(),
                    (None, Some(default)) => self.eval(default, root)?.scalar_kind(),
                    (None, None) => None,
                };
                Value::from_f64(number, kind.unwrap_or(ScalarKind::F32))
            }
            (None, Some(default)) => self.eval(default, root)?,
            (None, None) => match &v.ty {
                Some(ty) => Value::zero_of(&self.type_info(ty)),
                None => Value::F32(0.0),
            },
        };
        let value = match &v.ty {
            Some(ty) => value.coerce_to(&self.type_info(ty))?,
            None => value,
        };
        debug!("override {} = {}", v.name, value);
        self.scopes.insert(root, v.name.clone(), Slot::Value(value));
        Ok(())
    }

    fn const_assert(&mut self, e: &Expression, scope: ScopeId) -> ExecResult<()> {
        if self.eval(e, scope)?.as_bool()? {
            Ok(())
        } else {
            Err(ExecError::other("const_assert failed").at(e.line))
        }
    }

    /// Declare a `var`, `let` or `const` in `scope`. A failed initializer
    /// still declares the name so later statements can refer to it.
    fn declare(&mut self, v: &VarDecl, scope: ScopeId) -> ExecResult<()> {
        let value = self.initial_value(v, scope);
        let (slot, result) = match value {
            Ok(value) => (value, Ok(())),
            Err(e) => (Value::Void, Err(e)),
        };
        self.scopes.insert(scope, v.name.clone(), Slot::Value(slot));
        result
    }

    fn initial_value(&mut self, v: &VarDecl, scope: ScopeId) -> ExecResult<Value> {
        let ty = v.ty.as_ref().map(|ty| self.type_info(ty));
        match (&v.value, ty) {
            (Some(init), Some(ty)) => self.eval(init, scope)?.coerce_to(&ty),
            (Some(init), None) => self.eval(init, scope),
            (None, Some(ty)) => Ok(Value::zero_of(&ty)),
            (None, None) => Err(ExecError::other(format!("'{}' has neither type nor initializer", v.name))),
        }
    }

    /// Run `entry` over a `[x, y, z]` grid of workgroups. Bound buffers are
    /// moved in for the duration and handed back, modified, at the end.
    pub fn dispatch_workgroups(
        &mut self,
        entry: &str,
        workgroups: [u32; 3],
        bind_groups: &mut BindGroups,
        config: &ExecConfig,
    ) -> Result<()> {
        let plan = self.prepare_dispatch(entry, workgroups, bind_groups, config)?;
        debug!(
            "dispatching {} over {:?} workgroups of {:?}",
            entry, plan.workgroups, plan.workgroup_size
        );
        for index in 0..plan.invocation_count() {
            let scope = self.begin_invocation(&plan, index);
            let flow = self.exec_statements(&plan.entry.body, scope);
            trace!("invocation {} finished with {:?}", index, flow);
            self.end_invocation(scope);
        }
        self.finish(bind_groups);
        Ok(())
    }

    pub(crate) fn prepare_dispatch(
        &mut self,
        entry: &str,
        workgroups: [u32; 3],
        bind_groups: &mut BindGroups,
        config: &ExecConfig,
    ) -> Result<DispatchPlan> {
        if let Some(message) = self.reflection.layout_errors.first() {
            return Err(ShaderError::Layout(message.clone()));
        }
        self.execute(config);
        let Some(function) = self.function(entry) else {
            bail_exec!("entry point '{}' not found", entry);
        };
        let workgroup_size = self.workgroup_size(&function)?;
        if workgroup_size.contains(&0) {
            bail_exec!("workgroup size of '{}' has a zero dimension", entry);
        }
        self.bind_resources(bind_groups);
        Ok(DispatchPlan {
            entry: function,
            workgroups,
            workgroup_size,
        })
    }

    /// `@workgroup_size` evaluated now, so override values apply. Missing
    /// components default to 1.
    fn workgroup_size(&mut self, function: &Function) -> Result<[u32; 3]> {
        let Some(attribute) = function.attribute("workgroup_size") else {
            bail_exec!("'{}' has no @workgroup_size", function.name);
        };
        let root = self.scopes.root();
        let mut size = [1u32; 3];
        for (slot, arg) in size.iter_mut().zip(&attribute.args) {
            *slot = self
                .eval(arg, root)
                .and_then(|v| v.as_u32())
                .map_err(|e| ShaderError::Exec(format!("bad @workgroup_size: {}", e)))?;
        }
        Ok(size)
    }

    fn bind_resources(&mut self, bind_groups: &mut BindGroups) {
        let root = self.scopes.root();
        let resources: Vec<_> = self.reflection.resources().cloned().collect();
        for var in resources {
            let (group, binding) = (var.group, var.binding);
            let slot = match (var.resource, bind_groups.take(group, binding)) {
                (ResourceKind::Uniform | ResourceKind::Storage, Some(resource)) => {
                    let uniform = matches!(resource, BindingResource::Uniform(_));
                    let bytes = match resource {
                        BindingResource::Uniform(bytes) | BindingResource::Storage(bytes) => bytes,
                        other => {
                            warn!("binding {}:{} for '{}' is not a buffer", group, binding, var.name);
                            bind_groups.insert(group, binding, other);
                            continue;
                        }
                    };
                    let id = self.memory.add_buffer(bytes);
                    self.bound.push(Bound::Buffer {
                        group,
                        binding,
                        id,
                        uniform,
                    });
                    Slot::View(BufferView::new(id, Rc::clone(&var.ty)))
                }
                (ResourceKind::Texture | ResourceKind::StorageTexture, Some(resource)) => {
                    let BindingResource::Texture { data, size, format } = resource else {
                        warn!("binding {}:{} for '{}' is not a texture", group, binding, var.name);
                        bind_groups.insert(group, binding, resource);
                        continue;
                    };
                    let texture = TextureData::new(data, size, format).with_view(&var.ty.name);
                    let id = self.memory.add_texture(texture);
                    self.bound.push(Bound::Texture { group, binding, id });
                    Slot::Value(Value::Texture(id))
                }
                (ResourceKind::Sampler, resource) => {
                    if resource.is_some() {
                        self.bound.push(Bound::Sampler { group, binding });
                    }
                    Slot::Value(Value::Sampler)
                }
                (_, None) => {
                    debug!("no resource at {}:{} for '{}'", group, binding, var.name);
                    continue;
                }
            };
            self.scopes.insert(root, var.name.clone(), slot);
        }
    }

    /// Move bound resources back into `bind_groups`.
    pub(crate) fn finish(&mut self, bind_groups: &mut BindGroups) {
        for bound in std::mem::take(&mut self.bound) {
            match bound {
                Bound::Buffer {
                    group,
                    binding,
                    id,
                    uniform,
                } => {
                    let bytes = self.memory.take_buffer(id);
                    let resource = if uniform {
                        BindingResource::Uniform(bytes)
                    } else {
                        BindingResource::Storage(bytes)
                    };
                    bind_groups.insert(group, binding, resource);
                }
                Bound::Texture { group, binding, id } => {
                    if let Some(texture) = self.memory.take_texture(id) {
                        bind_groups.insert(
                            group,
                            binding,
                            BindingResource::Texture {
                                data: texture.data,
                                size: texture.size,
                                format: texture.format,
                            },
                        );
                    }
                }
                Bound::Sampler { group, binding } => bind_groups.insert(group, binding, BindingResource::Sampler),
            }
        }
        self.memory = Memory::new();
    }

    /// Set up invocation `index` of the dispatch and return the scope its
    /// entry body runs in.
    pub(crate) fn begin_invocation(&mut self, plan: &DispatchPlan, index: usize) -> ScopeId {
        let per_group = plan.invocations_per_workgroup();
        let (group, local) = (index / per_group, index % per_group);
        let [gx, gy, _] = plan.workgroups.map(|n| n as usize);
        let [sx, sy, _] = plan.workgroup_size.map(|n| n as usize);
        let workgroup_id = [group % gx, (group / gx) % gy, group / (gx * gy)];
        let local_id = [local % sx, (local / sx) % sy, local / (sx * sy)];
        let global_id: Vec<usize> = (0..3)
            .map(|axis| workgroup_id[axis] * plan.workgroup_size[axis] as usize + local_id[axis])
            .collect();

        self.reset_module_vars(local == 0);
        self.discarded = false;

        let root = self.scopes.root();
        let scope = self.scopes.push_scope(root);
        let uvec = |v: &[usize]| Value::Vector(v.iter().map(|&c| Value::U32(c as u32)).collect());
        let builtins = [
            (WORKGROUP_ID, uvec(&workgroup_id[..])),
            (LOCAL_INVOCATION_ID, uvec(&local_id[..])),
            (GLOBAL_INVOCATION_ID, uvec(&global_id[..])),
            (LOCAL_INVOCATION_INDEX, Value::U32(local as u32)),
            (NUM_WORKGROUPS, uvec(&plan.workgroups.map(|n| n as usize)[..])),
        ];
        for (name, value) in builtins {
            self.scopes.insert(scope, name, Slot::Value(value));
        }

        for arg in &plan.entry.args {
            let value = match self.builtin_argument(&arg.attributes, &arg.ty, scope) {
                Ok(value) => value,
                Err(e) => {
                    self.report(e.at(plan.entry.start_line));
                    Value::Void
                }
            };
            self.scopes.insert(scope, arg.name.clone(), Slot::Value(value));
        }
        scope
    }

    pub(crate) fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push_scope(parent)
    }

    pub(crate) fn pop_scope(&mut self, scope: ScopeId) {
        self.scopes.pop_scope(scope);
    }

    pub(crate) fn end_invocation(&mut self, scope: ScopeId) {
        self.scopes.pop_scope(scope);
        self.call_results.clear();
    }

    /// `var<private>` restarts every invocation, `var<workgroup>` every
    /// workgroup.
    fn reset_module_vars(&mut self, new_workgroup: bool) {
        let root = self.scopes.root();
        let vars: Vec<VarDecl> = self
            .module_vars
            .iter()
            .filter(|v| new_workgroup || v.storage.as_deref() != Some("workgroup"))
            .cloned()
            .collect();
        for v in vars {
            if let Err(e) = self.declare(&v, root) {
                self.report(e.at(v.line));
            }
        }
    }

    fn builtin_argument(
        &mut self,
        attributes: &[crate::ast::Attribute],
        ty: &Type,
        scope: ScopeId,
    ) -> ExecResult<Value> {
        let info = self.type_info(ty);
        if let Some(name) = find_attribute(attributes, "builtin").and_then(|a| a.first_arg_text()) {
            return self.builtin_value(&name, scope)?.coerce_to(&info);
        }
        let program = Rc::clone(&self.program);
        if let Some(decl) = program.structs().find(|s| s.name == info.name) {
            let fields = decl
                .members
                .iter()
                .map(|m| Ok((m.name.clone(), self.builtin_argument(&m.attributes, &m.ty, scope)?)))
                .collect::<ExecResult<Vec<_>>>()?;
            return Ok(Value::Struct {
                name: info.name.clone(),
                fields,
            });
        }
        Ok(Value::zero_of(&info))
    }

    fn builtin_value(&self, name: &str, scope: ScopeId) -> ExecResult<Value> {
        let key = format!("@{}", name);
        match self.scopes.get_in(scope, &key) {
            Some(Slot::Value(value)) => Ok(value.clone()),
            _ => Err(ExecError::Unsupported {
                name: format!("@builtin({})", name),
                line: 0,
            }),
        }
    }

    // Statements

    pub(crate) fn exec_block(&mut self, body: &[Statement], parent: ScopeId) -> Flow {
        let scope = self.scopes.push_scope(parent);
        let flow = self.exec_statements(body, scope);
        self.scopes.pop_scope(scope);
        flow
    }

    pub(crate) fn discarded(&self) -> bool {
        self.discarded
    }

    pub(crate) fn exec_statements(&mut self, body: &[Statement], scope: ScopeId) -> Flow {
        for stmt in body {
            let flow = self.exec_statement(stmt, scope);
            if flow != Flow::Normal {
                return flow;
            }
        }
        Flow::Normal
    }

    /// Execute one statement, reporting any error and carrying on.
    pub(crate) fn exec_statement(&mut self, stmt: &Statement, scope: ScopeId) -> Flow {
        let flow = match self.try_statement(stmt, scope) {
            Ok(flow) => flow,
            Err(_) if self.discarded => Flow::Discard,
            Err(e) => {
                self.report(e.at(stmt.line));
                Flow::Normal
            }
        };
        if self.discarded {
            return Flow::Discard;
        }
        flow
    }

    fn try_statement(&mut self, stmt: &Statement, scope: ScopeId) -> ExecResult<Flow> {
        trace!("line {}: {:?}", stmt.line, std::mem::discriminant(&stmt.kind));
        match &stmt.kind {
            StmtKind::Var(v) | StmtKind::Let(v) | StmtKind::Const(v) => self.declare(v, scope)?,
            StmtKind::Assign { op, target, value } => {
                let Some(target) = target else {
                    self.eval(value, scope)?;
                    return Ok(Flow::Normal);
                };
                let place = self.eval_place(target, scope)?;
                let rhs = self.eval(value, scope)?;
                let new = match op.binary() {
                    Some(op) => ops::binary(op, &self.read_place(&place)?, &rhs)?,
                    None => rhs,
                };
                self.write_place(&place, new)?;
            }
            StmtKind::Increment { op, target } => {
                let place = self.eval_place(target, scope)?;
                let op = match op {
                    IncrementOp::Increment => BinaryOp::Add,
                    IncrementOp::Decrement => BinaryOp::Subtract,
                };
                let new = ops::binary(op, &self.read_place(&place)?, &Value::I32(1))?;
                self.write_place(&place, new)?;
            }
            StmtKind::Call(e) => {
                self.eval(e, scope)?;
            }
            StmtKind::If {
                condition,
                body,
                else_ifs,
                else_body,
            } => {
                if self.eval(condition, scope)?.as_bool()? {
                    return Ok(self.exec_block(body, scope));
                }
                for else_if in else_ifs {
                    if self.eval(&else_if.condition, scope)?.as_bool()? {
                        return Ok(self.exec_block(&else_if.body, scope));
                    }
                }
                if let Some(else_body) = else_body {
                    return Ok(self.exec_block(else_body, scope));
                }
            }
            StmtKind::For {
                init,
                condition,
                increment,
                body,
            } => {
                let for_scope = self.scopes.push_scope(scope);
                let flow = self.exec_for(init.as_deref(), condition.as_ref(), increment.as_deref(), body, for_scope);
                self.scopes.pop_scope(for_scope);
                return flow;
            }
            StmtKind::While { condition, body } => {
                let mut iterations = 0;
                while self.eval(condition, scope)?.as_bool()? {
                    match self.exec_block(body, scope) {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                    guard_iterations(&mut iterations)?;
                }
            }
            StmtKind::Loop { body, continuing } => return self.exec_loop(body, continuing.as_deref(), scope),
            StmtKind::Switch { selector, cases } => {
                let selector = self.eval(selector, scope)?;
                let mut chosen = None;
                'cases: for case in cases {
                    for s in &case.selectors {
                        let value = self.eval(s, scope)?;
                        if ops::binary(BinaryOp::Equal, &selector, &value)?.as_bool()? {
                            chosen = Some(case);
                            break 'cases;
                        }
                    }
                }
                let chosen = chosen.or_else(|| cases.iter().find(|c| c.is_default));
                if let Some(case) = chosen {
                    return Ok(match self.exec_block(&case.body, scope) {
                        Flow::Break => Flow::Normal,
                        flow => flow,
                    });
                }
            }
            StmtKind::Block(body) => return Ok(self.exec_block(body, scope)),
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|v| self.eval(v, scope)).transpose()?;
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::BreakIf(condition) => {
                if self.eval(condition, scope)?.as_bool()? {
                    return Ok(Flow::Break);
                }
            }
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Discard => return Ok(Flow::Discard),
            StmtKind::ConstAssert(e) => self.const_assert(e, scope)?,
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        init: Option<&Statement>,
        condition: Option<&Expression>,
        increment: Option<&Statement>,
        body: &[Statement],
        scope: ScopeId,
    ) -> ExecResult<Flow> {
        if let Some(init) = init {
            self.exec_statement(init, scope);
        }
        let mut iterations = 0;
        loop {
            if let Some(condition) = condition {
                if !self.eval(condition, scope)?.as_bool()? {
                    break;
                }
            }
            match self.exec_block(body, scope) {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
                flow => return Ok(flow),
            }
            if let Some(increment) = increment {
                self.exec_statement(increment, scope);
            }
            guard_iterations(&mut iterations)?;
        }
        Ok(Flow::Normal)
    }

    /// `loop` with an optional `continuing` block, which sees the body's
    /// declarations and may end the loop with `break if`.
    fn exec_loop(&mut self, body: &[Statement], continuing: Option<&[Statement]>, scope: ScopeId) -> ExecResult<Flow> {
        let mut iterations = 0;
        loop {
            let body_scope = self.scopes.push_scope(scope);
            let mut flow = self.exec_statements(body, body_scope);
            if matches!(flow, Flow::Normal | Flow::Continue) {
                flow = match continuing {
                    Some(continuing) => self.exec_statements(continuing, body_scope),
                    None => Flow::Normal,
                };
            }
            self.scopes.pop_scope(body_scope);
            match flow {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Normal | Flow::Continue => {}
                flow => return Ok(flow),
            }
            guard_iterations(&mut iterations)?;
        }
    }

    // Expressions

    pub(crate) fn eval(&mut self, expr: &Expression, scope: ScopeId) -> ExecResult<Value> {
        self.eval_inner(expr, scope).map_err(|e| e.at(expr.line))
    }

    fn eval_inner(&mut self, expr: &Expression, scope: ScopeId) -> ExecResult<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal(*lit)),
            ExprKind::Variable(name) => match self.scopes.lookup(scope, name) {
                Some((_, Slot::Value(value))) => Ok(value.clone()),
                Some((_, Slot::View(view))) => self.memory.load(view),
                None => Err(ExecError::UnknownIdentifier {
                    name: name.clone(),
                    line: expr.line,
                }),
            },
            ExprKind::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                match (op, &left) {
                    (BinaryOp::LogicalAnd, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::LogicalOr, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let right = self.eval(right, scope)?;
                ops::binary(*op, &left, &right)
            }
            ExprKind::Unary(UnaryOp::AddressOf, operand) => Ok(Value::Pointer(self.eval_place(operand, scope)?)),
            ExprKind::Unary(UnaryOp::Deref, operand) => match self.eval(operand, scope)? {
                Value::Pointer(place) => self.read_place(&place),
                other => Err(ExecError::mismatch(format!("cannot dereference {}", other.type_name()))),
            },
            ExprKind::Unary(op, operand) => ops::unary(*op, &self.eval(operand, scope)?),
            ExprKind::Call { name, args } => {
                if let Some(value) = self.call_results.get(&expr.id) {
                    return Ok(value.clone());
                }
                let values = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<ExecResult<Vec<_>>>()?;
                if self.functions.contains_key(name) {
                    return self.call_function(name, values);
                }
                if let Some(info) = self.reflector.types().struct_info(name) {
                    return construct(&info, false, values);
                }
                builtins::call(self, name, values)
            }
            ExprKind::Construct { ty, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<ExecResult<Vec<_>>>()?;
                let info = self.type_info(ty);
                construct(&info, ty.format().is_none(), values)
            }
            ExprKind::Bitcast { ty, value } => {
                let kind = self
                    .type_info(ty)
                    .scalar_kind()
                    .ok_or_else(|| ExecError::mismatch(format!("cannot bitcast to {}", ty)))?;
                bitcast(&self.eval(value, scope)?, kind)
            }
            ExprKind::Index(base, index) => {
                if is_place(base) {
                    let place = self.eval_place(expr, scope)?;
                    return self.read_place(&place);
                }
                let base = self.eval(base, scope)?;
                let index = self.eval(index, scope)?.as_i64()?;
                base.access(&Access::Index(index))
            }
            ExprKind::Member(base, member) => {
                if is_place(base) {
                    let place = self.eval_place(expr, scope)?;
                    return self.read_place(&place);
                }
                self.eval(base, scope)?.access(&Access::Member(member.clone()))
            }
            ExprKind::Group(inner) => self.eval(inner, scope),
        }
    }

    /// The location an lvalue expression names. Pointer variables are
    /// followed to what they point at.
    pub(crate) fn eval_place(&mut self, expr: &Expression, scope: ScopeId) -> ExecResult<Place> {
        match &expr.kind {
            ExprKind::Variable(name) => match self.scopes.lookup(scope, name) {
                Some((_, Slot::View(view))) => Ok(Place::buffer(view.clone())),
                Some((_, Slot::Value(Value::Pointer(place)))) => Ok(place.clone()),
                Some((owner, Slot::Value(_))) => Ok(Place::local(owner, name.clone())),
                None => Err(ExecError::UnknownIdentifier {
                    name: name.clone(),
                    line: expr.line,
                }),
            },
            ExprKind::Index(base, index) => {
                let place = self.eval_place(base, scope)?;
                let index = self.eval(index, scope)?.as_i64()?;
                Ok(place.with(Access::Index(index)))
            }
            ExprKind::Member(base, member) => Ok(self.eval_place(base, scope)?.with(Access::Member(member.clone()))),
            ExprKind::Group(inner) => self.eval_place(inner, scope),
            ExprKind::Unary(UnaryOp::Deref, operand) => match self.eval(operand, scope)? {
                Value::Pointer(place) => Ok(place),
                other => Err(ExecError::mismatch(format!("cannot dereference {}", other.type_name()))),
            },
            _ => Err(ExecError::mismatch("expression is not assignable")),
        }
    }

    pub(crate) fn read_place(&self, place: &Place) -> ExecResult<Value> {
        match &place.root {
            PlaceRoot::Local { scope, name } => match self.scopes.get_in(*scope, name) {
                Some(Slot::Value(value)) => value.get_path(&place.path),
                Some(Slot::View(view)) => self.read_view(view, &place.path),
                None => Err(ExecError::UnknownIdentifier {
                    name: name.clone(),
                    line: 0,
                }),
            },
            PlaceRoot::Buffer(view) => self.read_view(view, &place.path),
        }
    }

    pub(crate) fn write_place(&mut self, place: &Place, value: Value) -> ExecResult<()> {
        match &place.root {
            PlaceRoot::Local { scope, name } => match self.scopes.get_in_mut(*scope, name) {
                Some(Slot::Value(target)) => target.set_path(&place.path, value),
                Some(Slot::View(view)) => {
                    let view = view.clone();
                    self.write_view(&view, &place.path, value)
                }
                None => Err(ExecError::UnknownIdentifier {
                    name: name.clone(),
                    line: 0,
                }),
            },
            PlaceRoot::Buffer(view) => self.write_view(view, &place.path, value),
        }
    }

    /// Follow `path` from `view` until a swizzle, returning the final view
    /// and the swizzle with whatever accesses remain after it.
    fn resolve_view<'p>(
        &self,
        view: &BufferView,
        path: &'p [Access],
    ) -> ExecResult<(BufferView, Option<(Vec<usize>, &'p [Access])>)> {
        let mut current = view.clone();
        for (i, access) in path.iter().enumerate() {
            current = match access {
                Access::Index(index) => self.memory.element(&current, *index)?,
                Access::Member(member) => match current.member(member)? {
                    ViewAccess::View(next) => next,
                    ViewAccess::Swizzle(vector, indices) => return Ok((vector, Some((indices, &path[i + 1..])))),
                },
            };
        }
        Ok((current, None))
    }

    fn read_view(&self, view: &BufferView, path: &[Access]) -> ExecResult<Value> {
        let (view, swizzle) = self.resolve_view(view, path)?;
        let value = self.memory.load(&view)?;
        match swizzle {
            None => Ok(value),
            Some((indices, rest)) => {
                let items = value.components();
                let picked = indices
                    .iter()
                    .map(|&i| items.get(i).cloned().ok_or_else(|| ExecError::mismatch("swizzle out of range")))
                    .collect::<ExecResult<Vec<_>>>()?;
                Value::Vector(picked).get_path(rest)
            }
        }
    }

    fn write_view(&mut self, view: &BufferView, path: &[Access], value: Value) -> ExecResult<()> {
        let (view, swizzle) = self.resolve_view(view, path)?;
        match swizzle {
            None => self.memory.store(&view, &value),
            Some((indices, [])) => {
                let mut vector = self.memory.load(&view)?;
                let letters: String = indices.iter().map(|&i| ['x', 'y', 'z', 'w'][i.min(3)]).collect();
                vector.set_path(&[Access::Member(letters)], value)?;
                self.memory.store(&view, &vector)
            }
            Some(_) => Err(ExecError::mismatch("cannot assign through a swizzle")),
        }
    }

    /// Element count of the array a pointer refers to.
    pub(crate) fn runtime_array_len(&self, place: &Place) -> ExecResult<usize> {
        let (view, path) = match &place.root {
            PlaceRoot::Buffer(view) => (view, place.path.as_slice()),
            PlaceRoot::Local { scope, name } => match self.scopes.get_in(*scope, name) {
                Some(Slot::View(view)) => (view, place.path.as_slice()),
                Some(Slot::Value(_)) => {
                    return match self.read_place(place)? {
                        Value::Array(items) => Ok(items.len()),
                        other => Err(ExecError::mismatch(format!("arrayLength of {}", other.type_name()))),
                    }
                }
                None => {
                    return Err(ExecError::UnknownIdentifier {
                        name: name.clone(),
                        line: 0,
                    })
                }
            },
        };
        match self.resolve_view(view, path)? {
            (view, None) if view.ty.as_array().is_some() => Ok(self.memory.runtime_len(&view)),
            (view, _) => Err(ExecError::mismatch(format!("arrayLength of {}", view.ty.name))),
        }
    }

    // Calls

    pub(crate) fn call_function(&mut self, name: &str, args: Vec<Value>) -> ExecResult<Value> {
        let function = self.function(name).ok_or_else(|| ExecError::UnknownFunction {
            name: name.to_string(),
            line: 0,
        })?;
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(ExecError::other(format!("call depth limit reached calling '{}'", name)));
        }
        let scope = self.bind_call(&function, args)?;
        self.call_depth += 1;
        let flow = self.exec_statements(&function.body, scope);
        self.call_depth -= 1;
        self.scopes.pop_scope(scope);
        match flow {
            Flow::Return(Some(value)) => self.return_value(&function, value),
            Flow::Discard => {
                self.discarded = true;
                Ok(Value::Void)
            }
            _ => Ok(Value::Void),
        }
    }

    /// A fresh scope below the root holding the call's parameters.
    pub(crate) fn bind_call(&mut self, function: &Function, args: Vec<Value>) -> ExecResult<ScopeId> {
        if args.len() != function.args.len() {
            return Err(ExecError::Arity {
                name: function.name.clone(),
                expected: function.args.len(),
                found: args.len(),
                line: 0,
            });
        }
        let mut bound = Vec::with_capacity(args.len());
        for (param, value) in function.args.iter().zip(args) {
            let ty = self.type_info(&param.ty);
            bound.push((param.name.clone(), value.coerce_to(&ty)?));
        }
        let root = self.scopes.root();
        let scope = self.scopes.push_scope(root);
        for (name, value) in bound {
            self.scopes.insert(scope, name, Slot::Value(value));
        }
        Ok(scope)
    }

    pub(crate) fn return_value(&mut self, function: &Function, value: Value) -> ExecResult<Value> {
        match &function.return_type {
            Some(ty) => value.coerce_to(&self.type_info(ty)),
            None => Ok(value),
        }
    }

    pub(crate) fn slot_value(&self, slot: &Slot) -> ExecResult<Value> {
        match slot {
            Slot::Value(value) => Ok(value.clone()),
            Slot::View(view) => self.memory.load(view),
        }
    }
}

fn guard_iterations(iterations: &mut usize) -> ExecResult<()> {
    *iterations += 1;
    if *iterations > MAX_LOOP_ITERATIONS {
        return Err(ExecError::other(format!(
            "loop abandoned after {} iterations",
            MAX_LOOP_ITERATIONS
        )));
    }
    Ok(())
}

pub(crate) fn global_line(decl: &Declaration) -> usize {
    match decl {
        Declaration::Var(v) | Declaration::Override(v) | Declaration::Const(v) => v.line,
        Declaration::ConstAssert(e) => e.line,
        Declaration::Function(f) => f.start_line,
        Declaration::Struct(s) => s.start_line,
        Declaration::Alias(a) => a.line,
        Declaration::Enable(_) | Declaration::Requires(_) | Declaration::Diagnostic { .. } => 0,
    }
}

fn literal(lit: Literal) -> Value {
    match lit {
        Literal::Bool(b) => Value::Bool(b),
        Literal::Int { value, suffix: Some('u') } => Value::U32(value as u32),
        Literal::Int { value, suffix: None } if value > i32::MAX as i64 => Value::U32(value as u32),
        Literal::Int { value, .. } => Value::I32(value as i32),
        Literal::Float { value, .. } => Value::F32(value as f32),
    }
}

/// Whether an expression names storage that can be read in place.
fn is_place(expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::Variable(_) | ExprKind::Unary(UnaryOp::Deref, _) => true,
        ExprKind::Index(base, _) | ExprKind::Member(base, _) | ExprKind::Group(base) => is_place(base),
        _ => false,
    }
}

fn bitcast(value: &Value, kind: ScalarKind) -> ExecResult<Value> {
    value.map(|v| {
        let bits = match v {
            Value::I32(x) => *x as u32,
            Value::U32(x) => *x,
            Value::F32(x) => x.to_bits(),
            other => return Err(ExecError::mismatch(format!("cannot bitcast {}", other.type_name()))),
        };
        Ok(match kind {
            ScalarKind::I32 => Value::I32(bits as i32),
            ScalarKind::U32 => Value::U32(bits),
            ScalarKind::F32 => Value::F32(f32::from_bits(bits)),
            ScalarKind::F16 => Value::F32(f16_to_f32(bits as u16)),
            ScalarKind::Bool => return Err(ExecError::mismatch("cannot bitcast to bool")),
        })
    })
}

/// Typed constructor or conversion. `inferred` is set when the written type
/// left its component type out (`vec3(1.0, 2.0, 3.0)`).
fn construct(info: &TypeInfo, inferred: bool, args: Vec<Value>) -> ExecResult<Value> {
    if args.is_empty() {
        return Ok(Value::zero_of(info));
    }
    if let Some((cols, rows)) = info.matrix_shape() {
        let floats = args
            .iter()
            .flat_map(Value::components)
            .map(|c| c.as_f32())
            .collect::<ExecResult<Vec<_>>>()?;
        if floats.len() != cols * rows {
            return Err(ExecError::VectorLength {
                left: cols * rows,
                right: floats.len(),
                line: 0,
            });
        }
        return Ok(Value::Matrix(floats.chunks(rows).map(<[f32]>::to_vec).collect()));
    }
    if let Some(len) = info.vector_len() {
        let kind = if inferred {
            args[0].scalar_kind()
        } else {
            info.scalar_kind()
        }
        .unwrap_or(ScalarKind::F32);
        let mut parts: Vec<Value> = args.iter().flat_map(Value::components).collect();
        if parts.len() == 1 {
            parts = vec![parts[0].clone(); len];
        }
        if parts.len() != len {
            return Err(ExecError::VectorLength {
                left: len,
                right: parts.len(),
                line: 0,
            });
        }
        let items = parts.iter().map(|p| p.convert(kind)).collect::<ExecResult<_>>()?;
        return Ok(Value::Vector(items));
    }
    match &info.kind {
        TypeInfoKind::Scalar(kind) => match &args[..] {
            [arg] if arg.is_scalar() => arg.convert(*kind),
            [arg] => Err(ExecError::mismatch(format!("cannot convert {} to {}", arg.type_name(), info.name))),
            _ => Err(ExecError::Arity {
                name: info.name.clone(),
                expected: 1,
                found: args.len(),
                line: 0,
            }),
        },
        TypeInfoKind::Array(array) => {
            if inferred {
                return Ok(Value::Array(args));
            }
            let items = args
                .into_iter()
                .map(|a| a.coerce_to(&array.format))
                .collect::<ExecResult<_>>()?;
            Ok(Value::Array(items))
        }
        TypeInfoKind::Struct(s) => {
            if args.len() != s.members.len() {
                return Err(ExecError::Arity {
                    name: info.name.clone(),
                    expected: s.members.len(),
                    found: args.len(),
                    line: 0,
                });
            }
            let fields = s
                .members
                .iter()
                .zip(args)
                .map(|(m, a)| Ok((m.name.clone(), a.coerce_to(&m.ty)?)))
                .collect::<ExecResult<_>>()?;
            Ok(Value::Struct {
                name: info.name.clone(),
                fields,
            })
        }
        _ => Err(ExecError::mismatch(format!("cannot construct {}", info.name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn run_main(source: &str) -> Executor {
        let program = parse_source(source).unwrap();
        let mut exec = Executor::new(&program);
        exec.execute(&ExecConfig::new());
        let main = exec.function("main").unwrap();
        let root = exec.scopes.root();
        let scope = exec.scopes.push_scope(root);
        exec.exec_statements(&main.body, scope);
        exec
    }

    fn global(exec: &Executor, name: &str) -> Value {
        let root = exec.scopes.root();
        match exec.scopes.get_in(root, name) {
            Some(Slot::Value(v)) => v.clone(),
            other => panic!("no value for {}: {:?}", name, other),
        }
    }

    #[test]
    fn test_control_flow() {
        let exec = run_main(
            "var<private> total: i32;
             fn main() {
                 for (var i = 0; i < 10; i++) {
                     if (i == 3) { continue; }
                     if (i == 6) { break; }
                     total += i;
                 }
                 var n = 0;
                 loop {
                     n += 1;
                     continuing { break if n >= 4; }
                 }
                 total = total * 100 + n;
                 switch (n) {
                     case 1, 2: { total = -1; }
                     case 4: { total += 1000000; }
                     default: { total = -2; }
                 }
             }",
        );
        assert_eq!(global(&exec, "total"), Value::I32(1001204));
        assert!(exec.diagnostics().is_empty());
    }

    #[test]
    fn test_user_calls_and_pointers() {
        let exec = run_main(
            "var<private> out: vec2<f32>;
             fn bump(p: ptr<function, f32>, by: f32) { *p = *p + by; }
             fn square(x: f32) -> f32 { return x * x; }
             fn main() {
                 var v = vec2<f32>(1.0, 2.0);
                 bump(&v.y, square(3.0));
                 out = v.yx;
             }",
        );
        assert_eq!(global(&exec, "out"), Value::Vector(vec![Value::F32(11.0), Value::F32(1.0)]));
    }

    #[test]
    fn test_compound_xor_and_constructors() {
        let exec = run_main(
            "struct P { a: u32, b: vec2<f32> }
             var<private> x: u32 = 12u;
             var<private> p: P;
             var<private> m: mat2x2<f32>;
             fn main() {
                 x ^= 10u;
                 p = P(x, vec2(0.5));
                 m = mat2x2<f32>(vec2<f32>(1.0, 2.0), vec2<f32>(3.0, 4.0));
             }",
        );
        assert_eq!(global(&exec, "x"), Value::U32(6));
        assert_eq!(
            global(&exec, "p"),
            Value::Struct {
                name: "P".to_string(),
                fields: vec![
                    ("a".to_string(), Value::U32(6)),
                    ("b".to_string(), Value::Vector(vec![Value::F32(0.5), Value::F32(0.5)])),
                ],
            }
        );
        assert_eq!(global(&exec, "m"), Value::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]));
    }

    #[test]
    fn test_errors_are_reported_and_execution_continues() {
        let exec = run_main(
            "var<private> after: i32;
             fn main() {
                 let v = vec4<f32>(1.0, 2.0, 3.0, 4.0);
                 let bad = v.xq;
                 let missing = nowhere + 1;
                 after = 7;
             }",
        );
        assert_eq!(global(&exec, "after"), Value::I32(7));
        let diagnostics = exec.diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(diagnostics[0], ExecError::InvalidSwizzle { line: 4, .. }));
        assert!(matches!(diagnostics[1], ExecError::UnknownIdentifier { line: 5, .. }));
    }

    #[test]
    fn test_overrides_from_config() {
        let program = parse_source(
            "@id(7) override scale: f32 = 2.0;
             override count: u32 = 4u;
             override fallback: i32 = 9;",
        )
        .unwrap();
        let mut exec = Executor::new(&program);
        exec.execute(&ExecConfig::new().with_constant("7", 0.5).with_constant("count", 16.0));
        assert_eq!(global(&exec, "scale"), Value::F32(0.5));
        assert_eq!(global(&exec, "count"), Value::U32(16));
        assert_eq!(global(&exec, "fallback"), Value::I32(9));
    }

    #[test]
    fn test_large_integer_overrides_keep_precision() {
        let program = parse_source("override big: u32; override wide = 0i;").unwrap();
        let mut exec = Executor::new(&program);
        let config = ExecConfig::new()
            .with_constant("big", 16777217.0)
            .with_constant("wide", -16777219.0);
        exec.execute(&config);
        assert!(exec.diagnostics().is_empty(), "{:?}", exec.diagnostics());
        assert_eq!(global(&exec, "big"), Value::U32(16777217));
        assert_eq!(global(&exec, "wide"), Value::I32(-16777219));
    }

    #[test]
    fn test_discard_in_callee_ends_the_caller() {
        let exec = run_main(
            "var<private> reached: i32;
             fn kill(x: f32) -> f32 { if (x > 0.0) { discard; } return x; }
             fn main() {
                 reached = 1;
                 let y = kill(1.0) + 2.0;
                 reached = 2;
             }",
        );
        assert_eq!(global(&exec, "reached"), Value::I32(1));
        assert!(exec.diagnostics().is_empty(), "{:?}", exec.diagnostics());
    }

    #[test]
    fn test_const_assert_failure_is_reported() {
        let program = parse_source("const N = 3; const_assert N > 4;").unwrap();
        let mut exec = Executor::new(&program);
        exec.execute(&ExecConfig::new());
        assert_eq!(exec.diagnostics().len(), 1);
    }

    #[test]
    fn test_missing_entry_point_is_fatal() {
        let program = parse_source("fn helper() {}").unwrap();
        let mut exec = Executor::new(&program);
        let result = exec.dispatch_workgroups("main", [1, 1, 1], &mut BindGroups::new(), &ExecConfig::new());
        assert!(matches!(result, Err(ShaderError::Exec(_))));
    }
}
