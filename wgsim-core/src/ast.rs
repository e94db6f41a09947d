use std::fmt;

/// Unique identifier for AST nodes (expressions and types).
/// Layouts are cached under the id of the type node they were computed for,
/// and the debugger caches stepped call results under the call's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

/// Counter for generating unique node IDs within one parse.
#[derive(Debug, Clone, Default)]
pub struct NodeCounter {
    next_id: u32,
}

impl NodeCounter {
    pub fn new() -> Self {
        NodeCounter { next_id: 0 }
    }

    pub fn next(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        NodeId(id)
    }

    pub fn mk_expr(&mut self, line: usize, kind: ExprKind) -> Expression {
        Expression {
            id: self.next(),
            line,
            kind,
        }
    }

    pub fn mk_type(&mut self, kind: TypeKind) -> Type {
        Type {
            id: self.next(),
            kind,
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

impl Program {
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions().find(|f| f.name == name)
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &AliasDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Alias(a) => Some(a),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Struct(StructDecl),
    Alias(AliasDecl),
    Var(VarDecl),
    Override(VarDecl),
    Const(VarDecl),
    Function(Function),
    ConstAssert(Expression),
    Enable(Vec<String>),
    Requires(Vec<String>),
    Diagnostic { severity: String, rule: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<Expression>,
    pub line: usize,
}

impl Attribute {
    /// The first argument if it is a plain identifier or literal, as text.
    pub fn first_arg_text(&self) -> Option<String> {
        self.args.first().and_then(|arg| match &arg.kind {
            ExprKind::Variable(name) => Some(name.clone()),
            ExprKind::Literal(lit) => Some(lit.to_string()),
            _ => None,
        })
    }
}

pub fn find_attribute<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.name == name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<Member>,
    pub attributes: Vec<Attribute>,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub ty: Type,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasDecl {
    pub name: String,
    pub ty: Type,
    pub line: usize,
}

/// `var`, `let`, `const` and `override` declarations share one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Option<Type>,
    pub storage: Option<String>,
    pub access: Option<String>,
    pub value: Option<Expression>,
    pub attributes: Vec<Attribute>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub args: Vec<Argument>,
    pub return_type: Option<Type>,
    pub return_attributes: Vec<Attribute>,
    pub attributes: Vec<Attribute>,
    pub body: Vec<Statement>,
    pub start_line: usize,
    pub end_line: usize,
}

impl Function {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        find_attribute(&self.attributes, name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub ty: Type,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Var(VarDecl),
    Let(VarDecl),
    Const(VarDecl),
    /// `target` is `None` for the phony assignment `_ = value`.
    Assign {
        op: AssignOp,
        target: Option<Expression>,
        value: Expression,
    },
    Increment {
        op: IncrementOp,
        target: Expression,
    },
    Call(Expression),
    If {
        condition: Expression,
        body: Vec<Statement>,
        else_ifs: Vec<ElseIf>,
        else_body: Option<Vec<Statement>>,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        increment: Option<Box<Statement>>,
        body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    Loop {
        body: Vec<Statement>,
        continuing: Option<Vec<Statement>>,
    },
    Switch {
        selector: Expression,
        cases: Vec<SwitchCase>,
    },
    Block(Vec<Statement>),
    Return(Option<Expression>),
    Break,
    BreakIf(Expression),
    Continue,
    Discard,
    ConstAssert(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Empty selectors with `is_default` set is a plain `default:` clause.
    pub selectors: Vec<Expression>,
    pub is_default: bool,
    pub body: Vec<Statement>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
}

impl AssignOp {
    /// The binary operator a compound assignment applies.
    pub fn binary(self) -> Option<BinaryOp> {
        let op = match self {
            AssignOp::Assign => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Subtract => BinaryOp::Subtract,
            AssignOp::Multiply => BinaryOp::Multiply,
            AssignOp::Divide => BinaryOp::Divide,
            AssignOp::Modulo => BinaryOp::Modulo,
            AssignOp::And => BinaryOp::BitAnd,
            AssignOp::Or => BinaryOp::BitOr,
            AssignOp::Xor => BinaryOp::BitXor,
            AssignOp::ShiftLeft => BinaryOp::ShiftLeft,
            AssignOp::ShiftRight => BinaryOp::ShiftRight,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Subtract => "-=",
            AssignOp::Multiply => "*=",
            AssignOp::Divide => "/=",
            AssignOp::Modulo => "%=",
            AssignOp::And => "&=",
            AssignOp::Or => "|=",
            AssignOp::Xor => "^=",
            AssignOp::ShiftLeft => "<<=",
            AssignOp::ShiftRight => ">>=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub id: NodeId,
    pub line: usize,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Variable(String),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    Unary(UnaryOp, Box<Expression>),
    /// A call to a user function or built-in. Struct constructors whose
    /// struct was declared after the call site also parse as calls.
    Call {
        name: String,
        args: Vec<Expression>,
    },
    /// Typed value constructor or conversion: `vec3<f32>(...)`, `f32(x)`,
    /// `array<i32, 2>(...)`, `S(...)`.
    Construct {
        ty: Type,
        args: Vec<Expression>,
    },
    Bitcast {
        ty: Type,
        value: Box<Expression>,
    },
    Index(Box<Expression>, Box<Expression>),
    Member(Box<Expression>, String),
    Group(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int { value: i64, suffix: Option<char> },
    Float { value: f64, suffix: Option<char> },
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int { value, suffix } => match suffix {
                Some(s) => write!(f, "{}{}", value, s),
                None => write!(f, "{}", value),
            },
            Literal::Float { value, suffix } => {
                let text = if value.fract() == 0.0 && value.is_finite() {
                    format!("{:.1}", value)
                } else {
                    format!("{}", value)
                };
                match suffix {
                    Some(s) => write!(f, "{}{}", text, s),
                    None => write!(f, "{}", text),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    Complement,
    AddressOf,
    Deref,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
            UnaryOp::Complement => "~",
            UnaryOp::AddressOf => "&",
            UnaryOp::Deref => "*",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub id: NodeId,
    pub kind: TypeKind,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Scalars, struct names, alias names, samplers and other plain names.
    Named(String),
    /// Parameterized types: `vec3<f32>`, `mat4x4<f32>`, `atomic<u32>`,
    /// `ptr<function, f32>`, `texture_2d<f32>`,
    /// `texture_storage_2d<rgba8unorm, write>`.
    Template {
        name: String,
        format: Option<Box<Type>>,
        access: Option<String>,
        /// Address space of `ptr`, texel format of storage textures.
        space: Option<String>,
    },
    /// `count` stays `None` for runtime-sized arrays and for counts that
    /// could not be folded. `count_expr` keeps the written expression.
    Array {
        format: Option<Box<Type>>,
        count: Option<u32>,
        count_expr: Option<Box<Expression>>,
    },
}

impl Type {
    pub fn name(&self) -> &str {
        match &self.kind {
            TypeKind::Named(name) => name,
            TypeKind::Template { name, .. } => name,
            TypeKind::Array { .. } => "array",
        }
    }

    pub fn format(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Template { format, .. } | TypeKind::Array { format, .. } => format.as_deref(),
            TypeKind::Named(_) => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        find_attribute(&self.attributes, name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Named(name) => write!(f, "{}", name),
            TypeKind::Template {
                name,
                format,
                access,
                space,
            } => {
                let mut params = Vec::new();
                if let Some(space) = space {
                    params.push(space.clone());
                }
                if let Some(format) = format {
                    params.push(format.to_string());
                }
                if let Some(access) = access {
                    params.push(access.clone());
                }
                if params.is_empty() {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}<{}>", name, params.join(", "))
                }
            }
            TypeKind::Array { format, count, .. } => match (format, count) {
                (Some(format), Some(count)) => write!(f, "array<{}, {}>", format, count),
                (Some(format), None) => write!(f, "array<{}>", format),
                (None, _) => write!(f, "array"),
            },
        }
    }
}

/// Mutable walk over every type node reachable from the program, including
/// types nested in expressions (constructors, bitcasts) and statements.
pub fn for_each_type_mut(program: &mut Program, f: &mut dyn FnMut(&mut Type)) {
    for decl in &mut program.declarations {
        match decl {
            Declaration::Struct(s) => {
                for member in &mut s.members {
                    walk_type_mut(&mut member.ty, f);
                }
            }
            Declaration::Alias(a) => walk_type_mut(&mut a.ty, f),
            Declaration::Var(v) | Declaration::Override(v) | Declaration::Const(v) => walk_var_mut(v, f),
            Declaration::Function(func) => {
                for arg in &mut func.args {
                    walk_type_mut(&mut arg.ty, f);
                }
                if let Some(ty) = &mut func.return_type {
                    walk_type_mut(ty, f);
                }
                walk_block_mut(&mut func.body, f);
            }
            Declaration::ConstAssert(e) => walk_expr_types_mut(e, f),
            Declaration::Enable(_) | Declaration::Requires(_) | Declaration::Diagnostic { .. } => {}
        }
    }
}

fn walk_type_mut(ty: &mut Type, f: &mut dyn FnMut(&mut Type)) {
    f(ty);
    match &mut ty.kind {
        TypeKind::Template { format: Some(inner), .. } | TypeKind::Array { format: Some(inner), .. } => {
            walk_type_mut(inner, f)
        }
        _ => {}
    }
}

fn walk_var_mut(v: &mut VarDecl, f: &mut dyn FnMut(&mut Type)) {
    if let Some(ty) = &mut v.ty {
        walk_type_mut(ty, f);
    }
    if let Some(value) = &mut v.value {
        walk_expr_types_mut(value, f);
    }
}

fn walk_block_mut(block: &mut [Statement], f: &mut dyn FnMut(&mut Type)) {
    for stmt in block {
        walk_stmt_mut(stmt, f);
    }
}

fn walk_stmt_mut(stmt: &mut Statement, f: &mut dyn FnMut(&mut Type)) {
    match &mut stmt.kind {
        StmtKind::Var(v) | StmtKind::Let(v) | StmtKind::Const(v) => walk_var_mut(v, f),
        StmtKind::Assign { target, value, .. } => {
            if let Some(target) = target {
                walk_expr_types_mut(target, f);
            }
            walk_expr_types_mut(value, f);
        }
        StmtKind::Increment { target, .. } => walk_expr_types_mut(target, f),
        StmtKind::Call(e) | StmtKind::BreakIf(e) | StmtKind::ConstAssert(e) => walk_expr_types_mut(e, f),
        StmtKind::Return(Some(e)) => walk_expr_types_mut(e, f),
        StmtKind::If {
            condition,
            body,
            else_ifs,
            else_body,
        } => {
            walk_expr_types_mut(condition, f);
            walk_block_mut(body, f);
            for else_if in else_ifs {
                walk_expr_types_mut(&mut else_if.condition, f);
                walk_block_mut(&mut else_if.body, f);
            }
            if let Some(else_body) = else_body {
                walk_block_mut(else_body, f);
            }
        }
        StmtKind::For {
            init,
            condition,
            increment,
            body,
        } => {
            if let Some(init) = init {
                walk_stmt_mut(init, f);
            }
            if let Some(condition) = condition {
                walk_expr_types_mut(condition, f);
            }
            if let Some(increment) = increment {
                walk_stmt_mut(increment, f);
            }
            walk_block_mut(body, f);
        }
        StmtKind::While { condition, body } => {
            walk_expr_types_mut(condition, f);
            walk_block_mut(body, f);
        }
        StmtKind::Loop { body, continuing } => {
            walk_block_mut(body, f);
            if let Some(continuing) = continuing {
                walk_block_mut(continuing, f);
            }
        }
        StmtKind::Switch { selector, cases } => {
            walk_expr_types_mut(selector, f);
            for case in cases {
                walk_block_mut(&mut case.body, f);
            }
        }
        StmtKind::Block(body) => walk_block_mut(body, f),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Discard => {}
    }
}

fn walk_expr_types_mut(expr: &mut Expression, f: &mut dyn FnMut(&mut Type)) {
    match &mut expr.kind {
        ExprKind::Construct { ty, args } => {
            walk_type_mut(ty, f);
            for arg in args {
                walk_expr_types_mut(arg, f);
            }
        }
        ExprKind::Bitcast { ty, value } => {
            walk_type_mut(ty, f);
            walk_expr_types_mut(value, f);
        }
        ExprKind::Binary(_, l, r) | ExprKind::Index(l, r) => {
            walk_expr_types_mut(l, f);
            walk_expr_types_mut(r, f);
        }
        ExprKind::Unary(_, e) | ExprKind::Member(e, _) | ExprKind::Group(e) => walk_expr_types_mut(e, f),
        ExprKind::Call { args, .. } => {
            for arg in args {
                walk_expr_types_mut(arg, f);
            }
        }
        ExprKind::Literal(_) | ExprKind::Variable(_) => {}
    }
}
