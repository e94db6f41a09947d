//! Single-step debugger.
//!
//! Function bodies are flattened into command lists: simple statements stay
//! as they are, `if` chains become conditional jumps, loops become loop
//! frames with a continue target, and nested blocks become child frames.
//! Each call to [`Debugger::step_next`] runs pseudo commands silently until
//! one source-visible command has executed.
//!
//! When stepping into calls, a statement that contains user function calls
//! first runs each call in its own frame; the returned value is cached under
//! the call's node id and used when the statement itself executes.

use crate::ast::{BinaryOp, Declaration, ExprKind, Expression, Function, NodeId, Statement, StmtKind};
use crate::bail_exec;
use crate::diags::AstFormatter;
use crate::error::{ExecError, ExecResult, Result};
use crate::exec::ops;
use crate::exec::value::Value;
use crate::exec::{global_line, BindGroups, DispatchPlan, ExecConfig, Executor, Flow};
use crate::scope::ScopeId;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Pseudo commands a single step may run before it gives up.
const MAX_SILENT_COMMANDS: usize = 1 << 16;

#[derive(Debug, Clone)]
enum Command {
    Stmt(Statement),
    /// Runs the commands in a child frame and scope.
    Block(Rc<Vec<Command>>),
    Goto(usize),
    GotoIf {
        condition: Expression,
        target: usize,
        jump_when: bool,
        line: usize,
    },
    Loop {
        commands: Rc<Vec<Command>>,
        continue_target: usize,
    },
    Switch {
        selector: Expression,
        cases: Rc<Vec<CaseCommands>>,
        line: usize,
    },
    Return {
        value: Option<Expression>,
        line: usize,
    },
    Break {
        line: usize,
    },
    /// Leaves the loop when the condition is true, or when it is false if
    /// `negate` is set (loop conditions).
    BreakIf {
        condition: Expression,
        negate: bool,
        line: usize,
    },
    Continue {
        line: usize,
    },
    Global(Declaration),
}

#[derive(Debug)]
struct CaseCommands {
    selectors: Vec<Expression>,
    is_default: bool,
    commands: Rc<Vec<Command>>,
}

impl Command {
    fn line(&self) -> usize {
        match self {
            Command::Stmt(stmt) => stmt.line,
            Command::GotoIf { line, .. }
            | Command::Switch { line, .. }
            | Command::Return { line, .. }
            | Command::Break { line }
            | Command::BreakIf { line, .. }
            | Command::Continue { line } => *line,
            Command::Global(decl) => global_line(decl),
            Command::Block(_) | Command::Goto(_) | Command::Loop { .. } => 0,
        }
    }

    /// Expressions evaluated when the command runs, in source order.
    fn expressions(&self) -> Vec<&Expression> {
        match self {
            Command::Stmt(stmt) => match &stmt.kind {
                StmtKind::Var(v) | StmtKind::Let(v) | StmtKind::Const(v) => v.value.iter().collect(),
                StmtKind::Assign { target, value, .. } => target.iter().chain(std::iter::once(value)).collect(),
                StmtKind::Increment { target, .. } => vec![target],
                StmtKind::Call(e) | StmtKind::ConstAssert(e) => vec![e],
                _ => Vec::new(),
            },
            Command::GotoIf { condition, .. } | Command::BreakIf { condition, .. } => vec![condition],
            Command::Switch { selector, .. } => vec![selector],
            Command::Return { value, .. } => value.iter().collect(),
            _ => Vec::new(),
        }
    }
}

fn flatten(body: &[Statement]) -> Vec<Command> {
    let mut out = Vec::new();
    for stmt in body {
        flatten_statement(stmt, &mut out);
    }
    out
}

fn flatten_statement(stmt: &Statement, out: &mut Vec<Command>) {
    let line = stmt.line;
    match &stmt.kind {
        StmtKind::If {
            condition,
            body,
            else_ifs,
            else_body,
        } => {
            let branches = std::iter::once((condition, body, line))
                .chain(else_ifs.iter().map(|e| (&e.condition, &e.body, e.line)));
            let mut exits = Vec::new();
            for (condition, body, line) in branches {
                let test = out.len();
                out.push(Command::GotoIf {
                    condition: condition.clone(),
                    target: 0,
                    jump_when: false,
                    line,
                });
                out.push(Command::Block(Rc::new(flatten(body))));
                exits.push(out.len());
                out.push(Command::Goto(0));
                let next = out.len();
                if let Command::GotoIf { target, .. } = &mut out[test] {
                    *target = next;
                }
            }
            if let Some(else_body) = else_body {
                out.push(Command::Block(Rc::new(flatten(else_body))));
            }
            let end = out.len();
            for exit in exits {
                out[exit] = Command::Goto(end);
            }
        }
        StmtKind::For {
            init,
            condition,
            increment,
            body,
        } => {
            let mut commands = Vec::new();
            if let Some(condition) = condition {
                commands.push(Command::BreakIf {
                    condition: condition.clone(),
                    negate: true,
                    line,
                });
            }
            commands.push(Command::Block(Rc::new(flatten(body))));
            let continue_target = commands.len();
            if let Some(increment) = increment {
                flatten_statement(increment, &mut commands);
            }
            let mut outer = Vec::new();
            if let Some(init) = init {
                flatten_statement(init, &mut outer);
            }
            outer.push(Command::Loop {
                commands: Rc::new(commands),
                continue_target,
            });
            out.push(Command::Block(Rc::new(outer)));
        }
        StmtKind::While { condition, body } => {
            let commands = vec![
                Command::BreakIf {
                    condition: condition.clone(),
                    negate: true,
                    line,
                },
                Command::Block(Rc::new(flatten(body))),
            ];
            out.push(Command::Loop {
                commands: Rc::new(commands),
                continue_target: 0,
            });
        }
        StmtKind::Loop { body, continuing } => {
            let mut commands = flatten(body);
            let continue_target = commands.len();
            if let Some(continuing) = continuing {
                commands.extend(flatten(continuing));
            }
            out.push(Command::Loop {
                commands: Rc::new(commands),
                continue_target,
            });
        }
        StmtKind::Switch { selector, cases } => {
            let cases = cases
                .iter()
                .map(|case| CaseCommands {
                    selectors: case.selectors.clone(),
                    is_default: case.is_default,
                    commands: Rc::new(flatten(&case.body)),
                })
                .collect();
            out.push(Command::Switch {
                selector: selector.clone(),
                cases: Rc::new(cases),
                line,
            });
        }
        StmtKind::Block(body) => out.push(Command::Block(Rc::new(flatten(body)))),
        StmtKind::Return(value) => out.push(Command::Return {
            value: value.clone(),
            line,
        }),
        StmtKind::Break => out.push(Command::Break { line }),
        StmtKind::BreakIf(condition) => out.push(Command::BreakIf {
            condition: condition.clone(),
            negate: false,
            line,
        }),
        StmtKind::Continue => out.push(Command::Continue { line }),
        _ => out.push(Command::Stmt(stmt.clone())),
    }
}

/// Source position and text of the next command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub line: usize,
    pub text: String,
}

/// Variables visible in one function activation, outermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub name: String,
    pub line: usize,
    pub variables: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop { continue_target: usize },
    Switch,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    name: String,
    function: Option<Rc<Function>>,
    commands: Rc<Vec<Command>>,
    cursor: usize,
    scope: ScopeId,
    /// The call this function frame computes, for frames entered by
    /// stepping into a call.
    call: Option<NodeId>,
    /// Results of calls already stepped through for the command at the
    /// cursor.
    results: HashMap<NodeId, Value>,
    line: usize,
}

/// What a visible command asks the frame stack to do next.
enum Action {
    Next,
    Jump(usize),
    Break,
    Continue,
    Return(Option<Value>),
    Enter(Rc<Vec<Command>>),
    EndInvocation,
}

pub struct Debugger {
    exec: Executor,
    frames: Vec<Frame>,
    plan: Option<DispatchPlan>,
    next_invocation: usize,
    invocation_scope: Option<ScopeId>,
    bind_groups: BindGroups,
    config: ExecConfig,
    bodies: HashMap<String, Rc<Vec<Command>>>,
}

impl Debugger {
    pub fn new(exec: Executor) -> Self {
        Debugger {
            exec,
            frames: Vec::new(),
            plan: None,
            next_invocation: 0,
            invocation_scope: None,
            bind_groups: BindGroups::new(),
            config: ExecConfig::new(),
            bodies: HashMap::new(),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    /// Prepare a stepped dispatch of `entry`. The first step runs the first
    /// statement of invocation 0.
    pub fn init_debug(
        &mut self,
        entry: &str,
        workgroups: [u32; 3],
        bind_groups: BindGroups,
        config: &ExecConfig,
    ) -> Result<()> {
        self.frames.clear();
        self.bind_groups = bind_groups;
        self.config = config.clone();
        let plan = self
            .exec
            .prepare_dispatch(entry, workgroups, &mut self.bind_groups, config)?;
        debug!("debugging {} over {} invocations", entry, plan.invocation_count());
        self.plan = Some(plan);
        self.next_invocation = 0;
        self.start_invocation();
        Ok(())
    }

    /// Step through the top-level declarations only.
    pub fn init_program(&mut self, config: &ExecConfig) {
        self.exec.reset();
        self.config = config.clone();
        self.plan = None;
        self.frames.clear();
        let commands: Vec<Command> = self
            .exec
            .program()
            .declarations
            .iter()
            .filter(|d| {
                matches!(
                    d,
                    Declaration::Var(_) | Declaration::Const(_) | Declaration::Override(_) | Declaration::ConstAssert(_)
                )
            })
            .cloned()
            .map(Command::Global)
            .collect();
        let root = self.exec.scopes().root();
        self.frames.push(Frame {
            kind: FrameKind::Function,
            name: "<module>".to_string(),
            function: None,
            commands: Rc::new(commands),
            cursor: 0,
            scope: root,
            call: None,
            results: HashMap::new(),
            line: 0,
        });
    }

    fn start_invocation(&mut self) -> bool {
        let Some(plan) = self.plan.clone() else {
            return false;
        };
        if self.next_invocation >= plan.invocation_count() {
            return false;
        }
        trace!("starting invocation {}", self.next_invocation);
        let scope = self.exec.begin_invocation(&plan, self.next_invocation);
        self.next_invocation += 1;
        self.invocation_scope = Some(scope);
        let commands = self.body(&plan.entry);
        self.frames.push(Frame {
            kind: FrameKind::Function,
            name: plan.entry.name.clone(),
            function: Some(Rc::clone(&plan.entry)),
            commands,
            cursor: 0,
            scope,
            call: None,
            results: HashMap::new(),
            line: plan.entry.start_line,
        });
        true
    }

    fn body(&mut self, function: &Function) -> Rc<Vec<Command>> {
        if let Some(commands) = self.bodies.get(&function.name) {
            return Rc::clone(commands);
        }
        let commands = Rc::new(flatten(&function.body));
        self.bodies.insert(function.name.clone(), Rc::clone(&commands));
        commands
    }

    /// Run until one source-visible command has executed. Returns `false`
    /// once every invocation has finished.
    pub fn step_next(&mut self, enter_calls: bool) -> Result<bool> {
        for _ in 0..MAX_SILENT_COMMANDS {
            let Some(frame) = self.frames.last_mut() else {
                if self.start_invocation() {
                    continue;
                }
                return Ok(false);
            };
            let Some(command) = frame.commands.get(frame.cursor).cloned() else {
                self.end_frame();
                continue;
            };
            match command {
                Command::Goto(target) => frame.cursor = target,
                Command::Block(commands) => {
                    frame.cursor += 1;
                    self.push_frame(FrameKind::Block, commands);
                }
                Command::Loop {
                    commands,
                    continue_target,
                } => {
                    frame.cursor += 1;
                    self.push_frame(FrameKind::Loop { continue_target }, commands);
                }
                visible => {
                    if enter_calls && self.enter_call(&visible) {
                        return Ok(true);
                    }
                    self.run_visible(visible);
                    return Ok(true);
                }
            }
        }
        bail_exec!("no statement reached after {} commands", MAX_SILENT_COMMANDS)
    }

    fn push_frame(&mut self, kind: FrameKind, commands: Rc<Vec<Command>>) {
        let Some(parent) = self.frames.last() else {
            return;
        };
        let (name, function, line) = (parent.name.clone(), parent.function.clone(), parent.line);
        let scope = self.exec.push_scope(parent.scope);
        self.frames.push(Frame {
            kind,
            name,
            function,
            commands,
            cursor: 0,
            scope,
            call: None,
            results: HashMap::new(),
            line,
        });
    }

    /// The cursor ran off the end of the top frame.
    fn end_frame(&mut self) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        match frame.kind {
            FrameKind::Loop { .. } => frame.cursor = 0,
            FrameKind::Function => self.finish_call(None),
            FrameKind::Block | FrameKind::Switch => {
                if let Some(frame) = self.frames.pop() {
                    self.exec.pop_scope(frame.scope);
                }
            }
        }
    }

    /// Pop frames up to and including the innermost function frame, handing
    /// its result to the caller.
    fn finish_call(&mut self, value: Option<Value>) {
        while let Some(frame) = self.frames.pop() {
            if frame.kind != FrameKind::Function {
                self.exec.pop_scope(frame.scope);
                continue;
            }
            let value = match (value, &frame.function) {
                (Some(value), Some(function)) => self.exec.return_value(function, value).unwrap_or_else(|e| {
                    self.exec.report(e.at(frame.line));
                    Value::Void
                }),
                (value, _) => value.unwrap_or(Value::Void),
            };
            if self.frames.is_empty() {
                self.end_invocation();
            } else {
                self.exec.pop_scope(frame.scope);
                if let (Some(call), Some(caller)) = (frame.call, self.frames.last_mut()) {
                    caller.results.insert(call, value);
                }
            }
            return;
        }
    }

    fn end_invocation(&mut self) {
        for frame in std::mem::take(&mut self.frames).into_iter().rev() {
            self.exec.pop_scope(frame.scope);
        }
        if let Some(scope) = self.invocation_scope.take() {
            self.exec.end_invocation(scope);
        }
    }

    /// Push a frame for the first call in `command` that has not run yet.
    fn enter_call(&mut self, command: &Command) -> bool {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        let Some(call) = command
            .expressions()
            .into_iter()
            .find_map(|e| pending_call(e, &frame.results, &self.exec))
        else {
            return false;
        };
        let ExprKind::Call { name, args } = &call.kind else {
            return false;
        };
        let Some(function) = self.exec.function(name) else {
            return false;
        };
        let scope = frame.scope;
        self.exec.call_results = std::mem::take(&mut frame.results);
        let values = args
            .iter()
            .map(|a| self.exec.eval(a, scope))
            .collect::<ExecResult<Vec<_>>>()
            .and_then(|values| self.exec.bind_call(&function, values));
        let results = std::mem::take(&mut self.exec.call_results);
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        frame.results = results;
        let callee_scope = match values {
            Ok(scope) => scope,
            Err(e) => {
                // Run the statement with a void result rather than retrying.
                frame.results.insert(call.id, Value::Void);
                self.exec.report(e.at(call.line));
                return false;
            }
        };
        trace!("stepping into {}", name);
        let commands = self.body(&function);
        self.frames.push(Frame {
            kind: FrameKind::Function,
            name: function.name.clone(),
            function: Some(Rc::clone(&function)),
            commands,
            cursor: 0,
            scope: callee_scope,
            call: Some(call.id),
            results: HashMap::new(),
            line: function.start_line,
        });
        true
    }

    fn run_visible(&mut self, command: Command) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let scope = frame.scope;
        let line = command.line();
        frame.cursor += 1;
        frame.line = line;
        self.exec.call_results = std::mem::take(&mut frame.results);
        let action = self.run_command(command, scope);
        self.exec.call_results.clear();
        let action = if self.exec.discarded() { Ok(Action::EndInvocation) } else { action };
        match action {
            Ok(action) => self.apply(action, line),
            Err(e) => self.exec.report(e.at(line)),
        }
    }

    fn run_command(&mut self, command: Command, scope: ScopeId) -> ExecResult<Action> {
        Ok(match command {
            Command::Stmt(stmt) => match self.exec.exec_statement(&stmt, scope) {
                Flow::Discard => Action::EndInvocation,
                _ => Action::Next,
            },
            Command::GotoIf {
                condition,
                target,
                jump_when,
                ..
            } => {
                if self.condition(&condition, scope) == jump_when {
                    Action::Jump(target)
                } else {
                    Action::Next
                }
            }
            Command::BreakIf { condition, negate, .. } => {
                if self.condition(&condition, scope) != negate {
                    Action::Break
                } else {
                    Action::Next
                }
            }
            Command::Break { .. } => Action::Break,
            Command::Continue { .. } => Action::Continue,
            Command::Return { value, .. } => {
                let value = match value {
                    Some(e) => Some(self.exec.eval(&e, scope)?),
                    None => None,
                };
                Action::Return(value)
            }
            Command::Switch { selector, cases, .. } => {
                let selector = self.exec.eval(&selector, scope)?;
                let mut chosen = None;
                'cases: for case in cases.iter() {
                    for s in &case.selectors {
                        let value = self.exec.eval(s, scope)?;
                        if ops::binary(BinaryOp::Equal, &selector, &value)?.as_bool()? {
                            chosen = Some(Rc::clone(&case.commands));
                            break 'cases;
                        }
                    }
                }
                let chosen = chosen.or_else(|| cases.iter().find(|c| c.is_default).map(|c| Rc::clone(&c.commands)));
                match chosen {
                    Some(commands) => Action::Enter(commands),
                    None => Action::Next,
                }
            }
            Command::Global(decl) => {
                let config = self.config.clone();
                self.exec.exec_global(&decl, &config);
                Action::Next
            }
            Command::Block(_) | Command::Goto(_) | Command::Loop { .. } => Action::Next,
        })
    }

    /// A branch or loop condition. A condition that fails to evaluate is
    /// reported and counts as false.
    fn condition(&mut self, condition: &Expression, scope: ScopeId) -> bool {
        match self.exec.eval(condition, scope).and_then(|v| v.as_bool()) {
            Ok(b) => b,
            Err(_) if self.exec.discarded() => false,
            Err(e) => {
                self.exec.report(e.at(condition.line));
                false
            }
        }
    }

    fn apply(&mut self, action: Action, line: usize) {
        match action {
            Action::Next => {}
            Action::Jump(target) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.cursor = target;
                }
            }
            Action::Break => {
                while let Some(frame) = self.frames.last() {
                    if frame.kind == FrameKind::Function {
                        self.exec.report(ExecError::other("break outside of a loop or switch").at(line));
                        return;
                    }
                    let done = matches!(frame.kind, FrameKind::Loop { .. } | FrameKind::Switch);
                    if let Some(frame) = self.frames.pop() {
                        self.exec.pop_scope(frame.scope);
                    }
                    if done {
                        return;
                    }
                }
            }
            Action::Continue => {
                while let Some(frame) = self.frames.last_mut() {
                    match frame.kind {
                        FrameKind::Loop { continue_target } => {
                            frame.cursor = continue_target;
                            return;
                        }
                        FrameKind::Function => {
                            self.exec.report(ExecError::other("continue outside of a loop").at(line));
                            return;
                        }
                        FrameKind::Block | FrameKind::Switch => {
                            if let Some(frame) = self.frames.pop() {
                                self.exec.pop_scope(frame.scope);
                            }
                        }
                    }
                }
            }
            Action::Return(value) => self.finish_call(value),
            Action::Enter(commands) => self.push_frame(FrameKind::Switch, commands),
            Action::EndInvocation => self.end_invocation(),
        }
    }

    /// The next source-visible command, looking past the ends of frames
    /// and into the next invocation.
    pub fn current_command(&self) -> Option<CommandInfo> {
        for frame in self.frames.iter().rev() {
            if frame.cursor < frame.commands.len() {
                if let Some(info) = describe_from(&frame.commands, frame.cursor) {
                    return Some(info);
                }
            } else if let FrameKind::Loop { .. } = frame.kind {
                return describe_from(&frame.commands, 0);
            }
        }
        let plan = self.plan.as_ref()?;
        if self.next_invocation < plan.invocation_count() {
            return describe_from(&flatten(&plan.entry.body), 0);
        }
        None
    }

    /// Variables of every active function, innermost call first.
    pub fn current_state(&self) -> Vec<FrameState> {
        let mut states = Vec::new();
        let mut end = self.frames.len();
        while end > 0 {
            let Some(start) = self.frames[..end].iter().rposition(|f| f.kind == FrameKind::Function) else {
                break;
            };
            let innermost = &self.frames[end - 1];
            let line = innermost
                .commands
                .get(innermost.cursor)
                .map(Command::line)
                .filter(|&l| l > 0)
                .unwrap_or(innermost.line);
            states.push(FrameState {
                name: self.frames[start].name.clone(),
                line,
                variables: self.variables(innermost.scope, self.frames[start].scope),
            });
            end = start;
        }
        states
    }

    /// Bindings from `inner` out to `outer` inclusive; inner names shadow
    /// outer ones.
    fn variables(&self, inner: ScopeId, outer: ScopeId) -> Vec<(String, Value)> {
        let scopes = self.exec.scopes();
        let mut chain = Vec::new();
        let mut current = Some(inner);
        while let Some(id) = current {
            chain.push(id);
            if id == outer || id == scopes.root() {
                break;
            }
            current = scopes.parent(id);
        }
        let mut seen = HashSet::new();
        let mut variables = Vec::new();
        for id in chain {
            let Some(scope) = scopes.scope(id) else {
                continue;
            };
            let mut local: Vec<(String, Value)> = scope
                .iter()
                .filter(|(name, _)| seen.insert(name.to_string()))
                .map(|(name, slot)| (name.clone(), self.exec.slot_value(slot).unwrap_or(Value::Void)))
                .collect();
            local.append(&mut variables);
            variables = local;
        }
        variables
    }

    /// End the session and hand back the bound resources.
    pub fn finish(mut self) -> BindGroups {
        self.end_invocation();
        self.exec.finish(&mut self.bind_groups);
        self.bind_groups
    }
}

/// First user-function call in `expr`, in evaluation order, whose result is
/// not cached yet.
fn pending_call<'e>(expr: &'e Expression, cached: &HashMap<NodeId, Value>, exec: &Executor) -> Option<&'e Expression> {
    match &expr.kind {
        ExprKind::Call { name, args } => {
            if cached.contains_key(&expr.id) {
                return None;
            }
            args.iter()
                .find_map(|a| pending_call(a, cached, exec))
                .or_else(|| exec.function(name).map(|_| expr))
        }
        // The right side of `&&`/`||` may never run, so its calls are left to
        // the executor's short-circuit evaluation.
        ExprKind::Binary(BinaryOp::LogicalAnd | BinaryOp::LogicalOr, left, _) => pending_call(left, cached, exec),
        ExprKind::Binary(_, left, right) | ExprKind::Index(left, right) => {
            pending_call(left, cached, exec).or_else(|| pending_call(right, cached, exec))
        }
        ExprKind::Unary(_, inner) | ExprKind::Member(inner, _) | ExprKind::Group(inner) => {
            pending_call(inner, cached, exec)
        }
        ExprKind::Bitcast { value, .. } => pending_call(value, cached, exec),
        ExprKind::Construct { args, .. } => args.iter().find_map(|a| pending_call(a, cached, exec)),
        ExprKind::Literal(_) | ExprKind::Variable(_) => None,
    }
}

fn describe_from(commands: &[Command], start: usize) -> Option<CommandInfo> {
    let mut index = start;
    let mut hops = 0;
    while let Some(command) = commands.get(index) {
        hops += 1;
        if hops > commands.len() + 1 {
            return None;
        }
        match command {
            Command::Goto(target) => {
                index = *target;
                continue;
            }
            Command::Block(inner) | Command::Loop { commands: inner, .. } => {
                if let Some(info) = describe_from(inner, 0) {
                    return Some(info);
                }
            }
            other => return Some(describe(other)),
        }
        index += 1;
    }
    None
}

fn describe(command: &Command) -> CommandInfo {
    let text = match command {
        Command::Stmt(stmt) => AstFormatter::format_statement(stmt),
        Command::GotoIf { condition, .. } => format!("if {}", AstFormatter::format_condition(condition)),
        Command::BreakIf {
            condition,
            negate: true,
            ..
        } => format!("while {}", AstFormatter::format_condition(condition)),
        Command::BreakIf { condition, .. } => format!("break if {}", AstFormatter::format_expression(condition)),
        Command::Switch { selector, .. } => format!("switch {}", AstFormatter::format_condition(selector)),
        Command::Return { value: Some(e), .. } => format!("return {}", AstFormatter::format_expression(e)),
        Command::Return { value: None, .. } => "return".to_string(),
        Command::Break { .. } => "break".to_string(),
        Command::Continue { .. } => "continue".to_string(),
        Command::Global(decl) => AstFormatter::format_declaration(decl),
        Command::Block(_) | Command::Goto(_) | Command::Loop { .. } => String::new(),
    };
    CommandInfo {
        line: command.line(),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn debugger(source: &str) -> Debugger {
        let program = parse_source(source).unwrap();
        let mut debugger = Debugger::new(Executor::new(&program));
        debugger
            .init_debug("main", [1, 1, 1], BindGroups::new(), &ExecConfig::new())
            .unwrap();
        debugger
    }

    fn lines_until_done(debugger: &mut Debugger, enter_calls: bool) -> Vec<usize> {
        let mut lines = Vec::new();
        loop {
            let next = debugger.current_command().map(|c| c.line);
            if !debugger.step_next(enter_calls).unwrap() {
                return lines;
            }
            lines.push(next.unwrap_or(0));
        }
    }

    #[test]
    fn test_loops_step_through_conditions() {
        let mut debugger = debugger(
            "@compute @workgroup_size(1) fn main() {
                 var sum = 0;
                 for (var i = 0; i < 3; i++) {
                     if (i == 1) { continue; }
                     sum += i;
                 }
             }",
        );
        let lines = lines_until_done(&mut debugger, false);
        assert_eq!(lines, vec![2, 3, 3, 4, 5, 3, 3, 4, 4, 3, 3, 4, 5, 3, 3]);
        assert!(debugger.executor().diagnostics().is_empty());
    }

    #[test]
    fn test_step_into_call_caches_result() {
        let mut debugger = debugger(
            "var<private> out: i32;
             fn twice(x: i32) -> i32 {
                 let y = x * 2;
                 return y;
             }
             @compute @workgroup_size(1) fn main() {
                 var a = 3;
                 out = twice(a) + 1;
             }",
        );
        assert!(debugger.step_next(true).unwrap());
        assert_eq!(debugger.current_command().map(|c| c.line), Some(8));

        // Entering the call stops before the callee's first statement.
        assert!(debugger.step_next(true).unwrap());
        assert_eq!(
            debugger.current_command(),
            Some(CommandInfo {
                line: 3,
                text: "let y = x * 2".to_string()
            })
        );
        let state = debugger.current_state();
        assert_eq!(state[0].name, "twice");
        assert_eq!(state[0].line, 3);
        assert_eq!(state[0].variables, vec![("x".to_string(), Value::I32(3))]);

        assert!(debugger.step_next(true).unwrap());
        let state = debugger.current_state();
        assert_eq!(state[0].name, "twice");
        assert_eq!(state[0].line, 4);
        assert_eq!(
            state[0].variables,
            vec![("x".to_string(), Value::I32(3)), ("y".to_string(), Value::I32(6))]
        );
        assert_eq!(state[1].name, "main");
        assert!(state[1].variables.contains(&("a".to_string(), Value::I32(3))));
        assert!(state[1]
            .variables
            .iter()
            .any(|(name, _)| name == "@global_invocation_id"));

        assert!(debugger.step_next(true).unwrap());
        assert_eq!(
            debugger.current_command(),
            Some(CommandInfo {
                line: 8,
                text: "out = twice(a) + 1".to_string()
            })
        );
        assert!(debugger.step_next(true).unwrap());
        assert!(!debugger.step_next(true).unwrap());

        let root = debugger.executor().scopes().root();
        let out = debugger.executor().scopes().get_in(root, "out").cloned();
        assert!(matches!(out, Some(crate::exec::value::Slot::Value(Value::I32(7)))));
    }

    #[test]
    fn test_short_circuit_right_side_is_not_entered() {
        let mut debugger = debugger(
            "var<private> calls: i32;
             fn bump() -> bool { calls += 1; return true; }
             @compute @workgroup_size(1) fn main() {
                 var ok = false;
                 if (ok && bump()) { calls += 10; }
             }",
        );
        let lines = lines_until_done(&mut debugger, true);
        assert_eq!(lines, vec![4, 5]);
        assert!(debugger.executor().diagnostics().is_empty());
        let root = debugger.executor().scopes().root();
        let calls = debugger.executor().scopes().get_in(root, "calls").cloned();
        assert!(matches!(calls, Some(crate::exec::value::Slot::Value(Value::I32(0)))));
    }

    #[test]
    fn test_discard_in_stepped_over_call_ends_invocation() {
        let mut debugger = debugger(
            "var<private> reached: i32;
             fn kill() { discard; }
             @compute @workgroup_size(1) fn main() {
                 kill();
                 reached = 1;
             }",
        );
        let lines = lines_until_done(&mut debugger, false);
        assert_eq!(lines, vec![4]);
        assert!(debugger.executor().diagnostics().is_empty());
        let root = debugger.executor().scopes().root();
        let reached = debugger.executor().scopes().get_in(root, "reached").cloned();
        assert!(matches!(reached, Some(crate::exec::value::Slot::Value(Value::I32(0)))));
    }

    #[test]
    fn test_switch_and_loop_break() {
        let mut debugger = debugger(
            "var<private> hits: i32;
             @compute @workgroup_size(1) fn main() {
                 var n = 0;
                 loop {
                     n++;
                     switch (n) {
                         case 2: { hits += 10; }
                         default: { hits += 1; }
                     }
                     if (n >= 3) { break; }
                 }
             }",
        );
        while debugger.step_next(false).unwrap() {}
        let root = debugger.executor().scopes().root();
        let hits = debugger.executor().scopes().get_in(root, "hits").cloned();
        assert!(matches!(hits, Some(crate::exec::value::Slot::Value(Value::I32(12)))));
    }

    #[test]
    fn test_module_stepping() {
        let program = parse_source("const A = 2;\nconst B = A * 4;\noverride C: f32 = 1.0;").unwrap();
        let mut debugger = Debugger::new(Executor::new(&program));
        debugger.init_program(&ExecConfig::new().with_constant("C", 3.0));
        let mut lines = Vec::new();
        while let Some(info) = debugger.current_command() {
            lines.push(info.line);
            assert!(debugger.step_next(false).unwrap());
        }
        assert_eq!(lines, vec![1, 2, 3]);
        let state = debugger.current_state();
        assert_eq!(state[0].name, "<module>");
        assert_eq!(
            state[0].variables,
            vec![
                ("A".to_string(), Value::I32(2)),
                ("B".to_string(), Value::I32(8)),
                ("C".to_string(), Value::F32(3.0)),
            ]
        );
        assert!(!debugger.step_next(false).unwrap());
    }
}
