//! Diagnostic utilities for AST formatting and display.
//!
//! Prints AST nodes back as compact WGSL-like text: whole programs for
//! `wgsim check --ast`, single statements and expressions for the debugger's
//! current-command display.

use crate::ast::*;
use std::fmt::Write;

/// Formatter for AST nodes that produces readable output, optionally with
/// node ids.
pub struct AstFormatter {
    output: String,
    indent: usize,
    show_node_ids: bool,
}

impl AstFormatter {
    pub fn new() -> Self {
        AstFormatter {
            output: String::new(),
            indent: 0,
            show_node_ids: false,
        }
    }

    pub fn with_node_ids() -> Self {
        AstFormatter {
            output: String::new(),
            indent: 0,
            show_node_ids: true,
        }
    }

    /// Format an expression and return the formatted string.
    pub fn format_expression(expr: &Expression) -> String {
        AstFormatter::new().expr(expr)
    }

    /// A branch, loop or switch condition wrapped in exactly one pair of
    /// parentheses.
    pub fn format_condition(expr: &Expression) -> String {
        AstFormatter::new().condition(expr)
    }

    /// One-line text of a statement. Compound statements are shown by their
    /// header only: `if (x < 4)`, `for (var i = 0; i < n; i++)`.
    pub fn format_statement(stmt: &Statement) -> String {
        AstFormatter::new().statement_header(stmt).trim_end().to_string()
    }

    /// One-line text of a top-level declaration; functions and structs are
    /// printed whole.
    pub fn format_declaration(decl: &Declaration) -> String {
        let mut formatter = AstFormatter::new();
        formatter.write_declaration(decl);
        formatter.output.trim_end().trim_end_matches(';').to_string()
    }

    /// Format a program and return the formatted string.
    pub fn format_program(program: &Program) -> String {
        let mut formatter = AstFormatter::new();
        for decl in &program.declarations {
            formatter.write_declaration(decl);
        }
        formatter.output
    }

    /// Format a program with node IDs and return the formatted string.
    pub fn format_program_with_ids(program: &Program) -> String {
        let mut formatter = AstFormatter::with_node_ids();
        for decl in &program.declarations {
            formatter.write_declaration(decl);
        }
        formatter.output
    }

    fn write_line(&mut self, content: &str) {
        let indent = "  ".repeat(self.indent);
        let _ = writeln!(self.output, "{}{}", indent, content);
    }

    fn write_declaration(&mut self, decl: &Declaration) {
        match decl {
            Declaration::Struct(s) => {
                self.write_line(&format!("struct {} {{", s.name));
                self.indent += 1;
                for member in &s.members {
                    let line = format!("{}{}: {},", attributes(&member.attributes), member.name, member.ty);
                    self.write_line(&line);
                }
                self.indent -= 1;
                self.write_line("}");
            }
            Declaration::Alias(a) => self.write_line(&format!("alias {} = {};", a.name, a.ty)),
            Declaration::Var(v) => {
                let line = self.var_decl("var", v);
                self.write_line(&format!("{};", line));
            }
            Declaration::Override(v) => {
                let line = self.var_decl("override", v);
                self.write_line(&format!("{};", line));
            }
            Declaration::Const(v) => {
                let line = self.var_decl("const", v);
                self.write_line(&format!("{};", line));
            }
            Declaration::Function(f) => self.write_function(f),
            Declaration::ConstAssert(e) => {
                let line = format!("const_assert {};", self.expr(e));
                self.write_line(&line);
            }
            Declaration::Enable(names) => self.write_line(&format!("enable {};", names.join(", "))),
            Declaration::Requires(names) => self.write_line(&format!("requires {};", names.join(", "))),
            Declaration::Diagnostic { severity, rule } => {
                self.write_line(&format!("diagnostic({}, {});", severity, rule))
            }
        }
    }

    fn write_function(&mut self, f: &Function) {
        let args: Vec<String> = f
            .args
            .iter()
            .map(|a| format!("{}{}: {}", attributes(&a.attributes), a.name, a.ty))
            .collect();
        let mut header = format!("{}fn {}({})", attributes(&f.attributes), f.name, args.join(", "));
        if let Some(ty) = &f.return_type {
            let _ = write!(header, " -> {}{}", attributes(&f.return_attributes), ty);
        }
        self.write_line(&format!("{} {{", header));
        self.write_block(&f.body);
        self.write_line("}");
    }

    fn write_block(&mut self, body: &[Statement]) {
        self.indent += 1;
        for stmt in body {
            self.write_statement(stmt);
        }
        self.indent -= 1;
    }

    fn write_statement(&mut self, stmt: &Statement) {
        let header = self.statement_header(stmt);
        match &stmt.kind {
            StmtKind::If {
                body,
                else_ifs,
                else_body,
                ..
            } => {
                self.write_line(&format!("{} {{", header));
                self.write_block(body);
                for else_if in else_ifs {
                    let line = format!("}} else if ({}) {{", self.expr(&else_if.condition));
                    self.write_line(&line);
                    self.write_block(&else_if.body);
                }
                if let Some(else_body) = else_body {
                    self.write_line("} else {");
                    self.write_block(else_body);
                }
                self.write_line("}");
            }
            StmtKind::For { body, .. } | StmtKind::While { body, .. } | StmtKind::Block(body) => {
                self.write_line(&format!("{}{{", header));
                self.write_block(body);
                self.write_line("}");
            }
            StmtKind::Loop { body, continuing } => {
                self.write_line("loop {");
                self.write_block(body);
                if let Some(continuing) = continuing {
                    self.indent += 1;
                    self.write_line("continuing {");
                    self.write_block(continuing);
                    self.write_line("}");
                    self.indent -= 1;
                }
                self.write_line("}");
            }
            StmtKind::Switch { cases, .. } => {
                self.write_line(&format!("{} {{", header));
                self.indent += 1;
                for case in cases {
                    let mut labels: Vec<String> = case.selectors.iter().map(|s| self.expr(s)).collect();
                    if case.is_default {
                        labels.push("default".to_string());
                    }
                    self.write_line(&format!("case {}: {{", labels.join(", ")));
                    self.write_block(&case.body);
                    self.write_line("}");
                }
                self.indent -= 1;
                self.write_line("}");
            }
            _ => self.write_line(&format!("{};", header)),
        }
    }

    fn statement_header(&self, stmt: &Statement) -> String {
        match &stmt.kind {
            StmtKind::Var(v) => self.var_decl("var", v),
            StmtKind::Let(v) => self.var_decl("let", v),
            StmtKind::Const(v) => self.var_decl("const", v),
            StmtKind::Assign { op, target, value } => {
                let target = target.as_ref().map_or_else(|| "_".to_string(), |t| self.expr(t));
                format!("{} {} {}", target, op.symbol(), self.expr(value))
            }
            StmtKind::Increment { op, target } => {
                let symbol = match op {
                    IncrementOp::Increment => "++",
                    IncrementOp::Decrement => "--",
                };
                format!("{}{}", self.expr(target), symbol)
            }
            StmtKind::Call(e) => self.expr(e),
            StmtKind::If { condition, .. } => format!("if {}", self.condition(condition)),
            StmtKind::For {
                init,
                condition,
                increment,
                ..
            } => {
                let init = init.as_ref().map_or_else(String::new, |s| self.statement_header(s));
                let condition = condition.as_ref().map_or_else(String::new, |c| self.expr(c));
                let increment = increment.as_ref().map_or_else(String::new, |s| self.statement_header(s));
                format!("for ({}; {}; {}) ", init, condition, increment)
            }
            StmtKind::While { condition, .. } => format!("while {} ", self.condition(condition)),
            StmtKind::Loop { .. } => "loop".to_string(),
            StmtKind::Switch { selector, .. } => format!("switch {}", self.condition(selector)),
            StmtKind::Block(_) => String::new(),
            StmtKind::Return(Some(e)) => format!("return {}", self.expr(e)),
            StmtKind::Return(None) => "return".to_string(),
            StmtKind::Break => "break".to_string(),
            StmtKind::BreakIf(e) => format!("break if {}", self.expr(e)),
            StmtKind::Continue => "continue".to_string(),
            StmtKind::Discard => "discard".to_string(),
            StmtKind::ConstAssert(e) => format!("const_assert {}", self.expr(e)),
        }
    }

    fn var_decl(&self, keyword: &str, v: &VarDecl) -> String {
        let mut text = attributes(&v.attributes);
        text.push_str(keyword);
        match (&v.storage, &v.access) {
            (Some(storage), Some(access)) => {
                let _ = write!(text, "<{}, {}>", storage, access);
            }
            (Some(storage), None) => {
                let _ = write!(text, "<{}>", storage);
            }
            _ => {}
        }
        let _ = write!(text, " {}", v.name);
        if let Some(ty) = &v.ty {
            let _ = write!(text, ": {}", ty);
        }
        if let Some(value) = &v.value {
            let _ = write!(text, " = {}", self.expr(value));
        }
        text
    }

    fn condition(&self, expr: &Expression) -> String {
        match expr.kind {
            ExprKind::Group(_) => self.expr(expr),
            _ => format!("({})", self.expr(expr)),
        }
    }

    fn expr(&self, expr: &Expression) -> String {
        let text = match &expr.kind {
            ExprKind::Literal(lit) => lit.to_string(),
            ExprKind::Variable(name) => name.clone(),
            ExprKind::Binary(op, lhs, rhs) => format!("{} {} {}", self.expr(lhs), op.symbol(), self.expr(rhs)),
            ExprKind::Unary(op, operand) => format!("{}{}", op.symbol(), self.expr(operand)),
            ExprKind::Call { name, args } => format!("{}({})", name, self.list(args)),
            ExprKind::Construct { ty, args } => format!("{}({})", ty, self.list(args)),
            ExprKind::Bitcast { ty, value } => format!("bitcast<{}>({})", ty, self.expr(value)),
            ExprKind::Index(base, index) => format!("{}[{}]", self.expr(base), self.expr(index)),
            ExprKind::Member(base, member) => format!("{}.{}", self.expr(base), member),
            ExprKind::Group(inner) => format!("({})", self.expr(inner)),
        };
        if self.show_node_ids {
            format!("{}#{}", text, expr.id.0)
        } else {
            text
        }
    }

    fn list(&self, items: &[Expression]) -> String {
        items.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ")
    }
}

impl Default for AstFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn attributes(attrs: &[Attribute]) -> String {
    let mut text = String::new();
    for attr in attrs {
        if attr.args.is_empty() {
            let _ = write!(text, "@{} ", attr.name);
        } else {
            let args: Vec<String> = attr.args.iter().map(AstFormatter::format_expression).collect();
            let _ = write!(text, "@{}({}) ", attr.name, args.join(", "));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    #[test]
    fn test_statement_headers() {
        let program = parse_source(
            "fn main() {
                 var x: i32 = 1 + 2 * 3;
                 x += max(x, 4);
                 for (var i = 0; i < 4; i++) { x++; }
                 let v = vec3<f32>(1.0).zyx;
             }",
        )
        .unwrap();
        let body = &program.function("main").unwrap().body;
        let lines: Vec<String> = body.iter().map(AstFormatter::format_statement).collect();
        assert_eq!(lines[0], "var x: i32 = 1 + 2 * 3");
        assert_eq!(lines[1], "x += max(x, 4)");
        assert_eq!(lines[2], "for (var i = 0; i < 4; i++)");
        assert_eq!(lines[3], "let v = vec3<f32>(1.0).zyx");
    }

    #[test]
    fn test_program_outline() {
        let program = parse_source(
            "struct S { a: f32 }
             @group(0) @binding(1) var<storage, read_write> data: array<S>;
             @compute @workgroup_size(8) fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                 if (id.x < 4u) { return; }
             }",
        )
        .unwrap();
        let text = AstFormatter::format_program(&program);
        assert!(text.contains("struct S {\n  a: f32,\n}"));
        assert!(text.contains("@group(0) @binding(1) var<storage, read_write> data: array<S>;"));
        assert!(text.contains("@compute @workgroup_size(8) fn main(@builtin(global_invocation_id) id: vec3<u32>) {"));
        assert!(text.contains("  if (id.x < 4u) {\n    return;\n  }"));
    }

    #[test]
    fn test_conditions_have_one_pair_of_parentheses() {
        let program = parse_source(
            "fn main() {
                 var i = 0;
                 while (i < 3) { i++; }
                 if i > 1 { i = 0; }
                 switch (i) { default: {} }
                 if ((i == 0)) { i = 1; }
             }",
        )
        .unwrap();
        let body = &program.function("main").unwrap().body;
        let lines: Vec<String> = body.iter().map(AstFormatter::format_statement).collect();
        assert_eq!(lines[1], "while (i < 3)");
        assert_eq!(lines[2], "if (i > 1)");
        assert_eq!(lines[3], "switch (i)");
        assert_eq!(lines[4], "if ((i == 0))");
    }
}
