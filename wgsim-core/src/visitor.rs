//! AST visitor for traversing WGSL function bodies.
//!
//! Passes (resource collection, call-graph building, the debugger's call
//! scheduling) implement the `Visitor` trait and override only the hooks they
//! need, while the `walk_*` functions handle the actual tree traversal.

use crate::ast::*;
use std::ops::ControlFlow;

pub trait Visitor: Sized {
    type Break;

    fn visit_function(&mut self, f: &Function) -> ControlFlow<Self::Break> {
        walk_function(self, f)
    }

    /// Called for every `{ ... }` body, including function bodies, loop
    /// bodies and switch cases.
    fn visit_block(&mut self, block: &[Statement]) -> ControlFlow<Self::Break> {
        walk_block(self, block)
    }

    fn visit_statement(&mut self, s: &Statement) -> ControlFlow<Self::Break> {
        walk_statement(self, s)
    }

    /// A local `var`/`let`/`const` declaration, after its initializer has
    /// been visited.
    fn visit_local_decl(&mut self, _decl: &VarDecl) -> ControlFlow<Self::Break> {
        ControlFlow::Continue(())
    }

    fn visit_type(&mut self, _ty: &Type) -> ControlFlow<Self::Break> {
        ControlFlow::Continue(())
    }

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<Self::Break> {
        walk_expression(self, e)
    }

    fn visit_expr_variable(&mut self, _name: &str, _e: &Expression) -> ControlFlow<Self::Break> {
        ControlFlow::Continue(())
    }

    fn visit_expr_call(&mut self, _name: &str, args: &[Expression], _e: &Expression) -> ControlFlow<Self::Break> {
        walk_expr_list(self, args)
    }
}

pub fn walk_function<V: Visitor>(v: &mut V, f: &Function) -> ControlFlow<V::Break> {
    for arg in &f.args {
        v.visit_type(&arg.ty)?;
    }
    if let Some(ty) = &f.return_type {
        v.visit_type(ty)?;
    }
    v.visit_block(&f.body)
}

pub fn walk_block<V: Visitor>(v: &mut V, block: &[Statement]) -> ControlFlow<V::Break> {
    for stmt in block {
        v.visit_statement(stmt)?;
    }
    ControlFlow::Continue(())
}

fn walk_local<V: Visitor>(v: &mut V, decl: &VarDecl) -> ControlFlow<V::Break> {
    if let Some(value) = &decl.value {
        v.visit_expression(value)?;
    }
    if let Some(ty) = &decl.ty {
        v.visit_type(ty)?;
    }
    v.visit_local_decl(decl)
}

pub fn walk_statement<V: Visitor>(v: &mut V, s: &Statement) -> ControlFlow<V::Break> {
    match &s.kind {
        StmtKind::Var(decl) | StmtKind::Let(decl) | StmtKind::Const(decl) => walk_local(v, decl),
        StmtKind::Assign { target, value, .. } => {
            if let Some(target) = target {
                v.visit_expression(target)?;
            }
            v.visit_expression(value)
        }
        StmtKind::Increment { target, .. } => v.visit_expression(target),
        StmtKind::Call(e) | StmtKind::BreakIf(e) | StmtKind::ConstAssert(e) => v.visit_expression(e),
        StmtKind::Return(value) => match value {
            Some(e) => v.visit_expression(e),
            None => ControlFlow::Continue(()),
        },
        StmtKind::If {
            condition,
            body,
            else_ifs,
            else_body,
        } => {
            v.visit_expression(condition)?;
            v.visit_block(body)?;
            for else_if in else_ifs {
                v.visit_expression(&else_if.condition)?;
                v.visit_block(&else_if.body)?;
            }
            match else_body {
                Some(block) => v.visit_block(block),
                None => ControlFlow::Continue(()),
            }
        }
        StmtKind::For {
            init,
            condition,
            increment,
            body,
        } => {
            if let Some(init) = init {
                v.visit_statement(init)?;
            }
            if let Some(condition) = condition {
                v.visit_expression(condition)?;
            }
            if let Some(increment) = increment {
                v.visit_statement(increment)?;
            }
            v.visit_block(body)
        }
        StmtKind::While { condition, body } => {
            v.visit_expression(condition)?;
            v.visit_block(body)
        }
        StmtKind::Loop { body, continuing } => {
            v.visit_block(body)?;
            match continuing {
                Some(block) => v.visit_block(block),
                None => ControlFlow::Continue(()),
            }
        }
        StmtKind::Switch { selector, cases } => {
            v.visit_expression(selector)?;
            for case in cases {
                walk_expr_list(v, &case.selectors)?;
                v.visit_block(&case.body)?;
            }
            ControlFlow::Continue(())
        }
        StmtKind::Block(body) => v.visit_block(body),
        StmtKind::Break | StmtKind::Continue | StmtKind::Discard => ControlFlow::Continue(()),
    }
}

pub fn walk_expr_list<V: Visitor>(v: &mut V, exprs: &[Expression]) -> ControlFlow<V::Break> {
    for e in exprs {
        v.visit_expression(e)?;
    }
    ControlFlow::Continue(())
}

pub fn walk_expression<V: Visitor>(v: &mut V, e: &Expression) -> ControlFlow<V::Break> {
    match &e.kind {
        ExprKind::Literal(_) => ControlFlow::Continue(()),
        ExprKind::Variable(name) => v.visit_expr_variable(name, e),
        ExprKind::Binary(_, left, right) => {
            v.visit_expression(left)?;
            v.visit_expression(right)
        }
        ExprKind::Unary(_, operand) | ExprKind::Group(operand) | ExprKind::Member(operand, _) => {
            v.visit_expression(operand)
        }
        ExprKind::Call { name, args } => v.visit_expr_call(name, args, e),
        ExprKind::Construct { ty, args } => {
            v.visit_type(ty)?;
            walk_expr_list(v, args)
        }
        ExprKind::Bitcast { ty, value } => {
            v.visit_type(ty)?;
            v.visit_expression(value)
        }
        ExprKind::Index(base, index) => {
            v.visit_expression(base)?;
            v.visit_expression(index)
        }
    }
}
