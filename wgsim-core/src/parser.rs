use crate::ast::*;
use crate::bail_parse_at;
use crate::constant_folding::ConstantFolder;
use crate::error::{Result, ShaderError};
use crate::lexer::{Token, TokenKind};
use log::{debug, trace};
use std::collections::HashMap;

mod expression;
mod types;

#[cfg(test)]
mod tests;

/// Symbol tables filled in while parsing, so later declarations can refer to
/// earlier ones. Array counts that reference constants declared further down
/// are parked in `deferred` and folded once the whole stream is consumed.
#[derive(Debug, Default)]
pub struct ParseContext {
    pub constants: HashMap<String, Expression>,
    pub aliases: HashMap<String, Type>,
    pub structs: HashMap<String, StructDecl>,
    deferred: Vec<(NodeId, Expression)>,
}

impl ParseContext {
    pub fn is_type_name(&self, name: &str) -> bool {
        self.structs.contains_key(name) || self.aliases.contains_key(name)
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    node_counter: NodeCounter,
    context: ParseContext,
}

/// Tokenize and parse in one go.
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = crate::lexer::tokenize(source)?;
    Parser::new(tokens).parse()
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map_or(true, |t| t.kind != TokenKind::Eof) {
            let line = tokens.last().map_or(1, |t| t.line);
            tokens.push(Token::new(TokenKind::Eof, "", line));
        }
        Parser {
            tokens,
            current: 0,
            node_counter: NodeCounter::new(),
            context: ParseContext::default(),
        }
    }

    pub fn context(&self) -> &ParseContext {
        &self.context
    }

    pub fn into_context(self) -> ParseContext {
        self.context
    }

    pub fn parse(&mut self) -> Result<Program> {
        let mut declarations = Vec::new();

        while !self.is_at_end() {
            if let Some(decl) = self.parse_global_declaration()? {
                declarations.push(decl);
            }
        }

        let mut program = Program { declarations };
        self.resolve_deferred_counts(&mut program);
        Ok(program)
    }

    /// Parse a single expression followed by end of input.
    pub fn parse_standalone_expression(&mut self) -> Result<Expression> {
        let expr = self.parse_expression()?;
        if !self.is_at_end() {
            bail_parse_at!(self.peek(), "Unexpected token after expression");
        }
        Ok(expr)
    }

    fn resolve_deferred_counts(&mut self, program: &mut Program) {
        if self.context.deferred.is_empty() {
            return;
        }

        let mut resolved = HashMap::new();
        let mut folder = ConstantFolder::new(&self.context.constants);
        for (id, expr) in &self.context.deferred {
            match folder.fold_u32(expr) {
                Some(count) => {
                    resolved.insert(*id, count);
                }
                None => debug!("array count at line {} left unresolved", expr.line),
            }
        }

        for_each_type_mut(program, &mut |ty| {
            let id = ty.id;
            if let TypeKind::Array { count, .. } = &mut ty.kind {
                if let Some(n) = resolved.get(&id) {
                    *count = Some(*n);
                }
            }
        });
    }

    fn parse_global_declaration(&mut self) -> Result<Option<Declaration>> {
        trace!("parse_global_declaration: next token = {:?}", self.peek());

        if self.match_token(TokenKind::Semicolon) {
            return Ok(None);
        }
        if self.check(TokenKind::Enable) || self.check(TokenKind::Requires) {
            return self.parse_directive().map(Some);
        }
        if self.check(TokenKind::Diagnostic) {
            self.advance();
            let (severity, rule) = self.parse_diagnostic_control()?;
            self.expect(TokenKind::Semicolon, "after diagnostic directive")?;
            return Ok(Some(Declaration::Diagnostic { severity, rule }));
        }

        let attributes = self.parse_attributes()?;

        let decl = match self.peek().kind {
            TokenKind::Var => {
                let decl = self.parse_var_decl(attributes)?;
                self.expect(TokenKind::Semicolon, "after global variable")?;
                Declaration::Var(decl)
            }
            TokenKind::Override => {
                let decl = self.parse_override_decl(attributes)?;
                self.expect(TokenKind::Semicolon, "after override declaration")?;
                if let Some(value) = &decl.value {
                    self.context.constants.insert(decl.name.clone(), value.clone());
                }
                Declaration::Override(decl)
            }
            TokenKind::Const | TokenKind::Let => {
                let decl = self.parse_let_or_const_decl(attributes)?;
                self.expect(TokenKind::Semicolon, "after constant")?;
                if let Some(value) = &decl.value {
                    self.context.constants.insert(decl.name.clone(), value.clone());
                }
                Declaration::Const(decl)
            }
            TokenKind::Alias => {
                let line = self.advance().line;
                let name = self.expect_identifier()?;
                self.expect(TokenKind::Equal, "in alias declaration")?;
                let ty = self.parse_type()?;
                self.expect(TokenKind::Semicolon, "after alias")?;
                self.context.aliases.insert(name.clone(), ty.clone());
                Declaration::Alias(AliasDecl { name, ty, line })
            }
            TokenKind::Struct => {
                let decl = self.parse_struct_decl(attributes)?;
                self.context.structs.insert(decl.name.clone(), decl.clone());
                Declaration::Struct(decl)
            }
            TokenKind::Fn => Declaration::Function(self.parse_function_decl(attributes)?),
            TokenKind::ConstAssert => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "after const_assert")?;
                Declaration::ConstAssert(expr)
            }
            _ => bail_parse_at!(self.peek(), "Expected a global declaration"),
        };

        Ok(Some(decl))
    }

    fn parse_directive(&mut self) -> Result<Declaration> {
        let keyword = self.advance();
        let mut names = vec![self.expect_identifier()?];
        while self.match_token(TokenKind::Comma) {
            if self.check(TokenKind::Semicolon) {
                break;
            }
            names.push(self.expect_identifier()?);
        }
        self.expect(TokenKind::Semicolon, "after directive")?;
        Ok(match keyword.kind {
            TokenKind::Enable => Declaration::Enable(names),
            _ => Declaration::Requires(names),
        })
    }

    /// `(severity, rule)` of a `diagnostic(...)` directive or attribute.
    fn parse_diagnostic_control(&mut self) -> Result<(String, String)> {
        self.expect(TokenKind::ParenLeft, "after diagnostic")?;
        let severity = self.expect_identifier()?;
        self.expect(TokenKind::Comma, "in diagnostic control")?;
        let mut rule = self.expect_identifier()?;
        if self.match_token(TokenKind::Period) {
            rule = format!("{}.{}", rule, self.expect_identifier()?);
        }
        self.match_token(TokenKind::Comma);
        self.expect(TokenKind::ParenRight, "to close diagnostic control")?;
        Ok((severity, rule))
    }

    fn parse_var_decl(&mut self, attributes: Vec<Attribute>) -> Result<VarDecl> {
        trace!("parse_var_decl: next token = {:?}", self.peek());
        let line = self.expect(TokenKind::Var, "to start variable")?.line;

        let mut storage = None;
        let mut access = None;
        if self.match_token(TokenKind::LessThan) {
            storage = Some(self.expect_identifier()?);
            if self.match_token(TokenKind::Comma) {
                access = Some(self.expect_identifier()?);
            }
            self.expect(TokenKind::GreaterThan, "to close address space")?;
        }

        let name = self.expect_identifier()?;
        let ty = if self.match_token(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let value = if self.match_token(TokenKind::Equal) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(VarDecl {
            name,
            ty,
            storage,
            access,
            value,
            attributes,
            line,
        })
    }

    fn parse_override_decl(&mut self, attributes: Vec<Attribute>) -> Result<VarDecl> {
        trace!("parse_override_decl: next token = {:?}", self.peek());
        let line = self.expect(TokenKind::Override, "to start override")?.line;
        let name = self.expect_identifier()?;
        let ty = if self.match_token(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let value = if self.match_token(TokenKind::Equal) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(VarDecl {
            name,
            ty,
            storage: None,
            access: None,
            value,
            attributes,
            line,
        })
    }

    fn parse_let_or_const_decl(&mut self, attributes: Vec<Attribute>) -> Result<VarDecl> {
        trace!("parse_let_or_const_decl: next token = {:?}", self.peek());
        let line = self.advance().line;
        let name = self.expect_identifier()?;
        let ty = if self.match_token(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokenKind::Equal, "in declaration")?;
        let value = Some(self.parse_expression()?);
        Ok(VarDecl {
            name,
            ty,
            storage: None,
            access: None,
            value,
            attributes,
            line,
        })
    }

    fn parse_struct_decl(&mut self, attributes: Vec<Attribute>) -> Result<StructDecl> {
        trace!("parse_struct_decl: next token = {:?}", self.peek());
        let start_line = self.expect(TokenKind::Struct, "to start struct")?.line;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::BraceLeft, "to open struct body")?;

        let mut members = Vec::new();
        while !self.check(TokenKind::BraceRight) && !self.is_at_end() {
            let member_attributes = self.parse_attributes()?;
            let member_name = self.expect_identifier()?;
            self.expect(TokenKind::Colon, "after struct member name")?;
            let ty = self.parse_type()?;
            members.push(Member {
                name: member_name,
                ty,
                attributes: member_attributes,
            });

            if !self.match_token(TokenKind::Comma) && !self.match_token(TokenKind::Semicolon) {
                break;
            }
        }

        let end_line = self.expect(TokenKind::BraceRight, "to close struct body")?.line;
        self.match_token(TokenKind::Semicolon);

        Ok(StructDecl {
            name,
            members,
            attributes,
            start_line,
            end_line,
        })
    }

    fn parse_function_decl(&mut self, attributes: Vec<Attribute>) -> Result<Function> {
        trace!("parse_function_decl: next token = {:?}", self.peek());
        let start_line = self.expect(TokenKind::Fn, "to start function")?.line;
        let name = self.expect_identifier()?;

        self.expect(TokenKind::ParenLeft, "to open argument list")?;
        let mut args = Vec::new();
        while !self.check(TokenKind::ParenRight) {
            let arg_attributes = self.parse_attributes()?;
            let arg_name = self.expect_identifier()?;
            self.expect(TokenKind::Colon, "after argument name")?;
            let ty = self.parse_type()?;
            args.push(Argument {
                name: arg_name,
                ty,
                attributes: arg_attributes,
            });
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::ParenRight, "to close argument list")?;

        let mut return_attributes = Vec::new();
        let mut return_type = None;
        if self.match_token(TokenKind::Arrow) {
            return_attributes = self.parse_attributes()?;
            return_type = Some(self.parse_type()?);
        }

        let (body, end_line) = self.parse_compound_statement()?;

        Ok(Function {
            name,
            args,
            return_type,
            return_attributes,
            attributes,
            body,
            start_line,
            end_line,
        })
    }

    pub(crate) fn parse_attributes(&mut self) -> Result<Vec<Attribute>> {
        let mut attributes = Vec::new();

        while self.check(TokenKind::At) {
            let line = self.advance().line;
            // `@const` and `@diagnostic` reuse keyword tokens as names.
            let name_token = self.advance();
            let name = match name_token.kind {
                TokenKind::Identifier | TokenKind::Const | TokenKind::Diagnostic => name_token.lexeme,
                _ => bail_parse_at!(name_token, "Expected attribute name"),
            };

            let mut args = Vec::new();
            if self.match_token(TokenKind::ParenLeft) {
                while !self.check(TokenKind::ParenRight) {
                    args.push(self.parse_expression()?);
                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::ParenRight, "to close attribute arguments")?;
            }

            attributes.push(Attribute { name, args, line });
        }

        Ok(attributes)
    }

    // ---- statements ----

    /// `{ statements }`, returning the statements and the closing line.
    fn parse_compound_statement(&mut self) -> Result<(Vec<Statement>, usize)> {
        trace!("parse_compound_statement: next token = {:?}", self.peek());
        self.expect(TokenKind::BraceLeft, "to open block")?;
        // Constants declared inside the block go out of scope at its end.
        let outer_constants = self.context.constants.clone();
        let mut statements = Vec::new();
        while !self.check(TokenKind::BraceRight) && !self.is_at_end() {
            if let Some(stmt) = self.parse_statement()? {
                statements.push(stmt);
            }
        }
        let end_line = self.expect(TokenKind::BraceRight, "to close block")?.line;
        self.context.constants = outer_constants;
        Ok((statements, end_line))
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>> {
        Ok(self.parse_compound_statement()?.0)
    }

    fn parse_statement(&mut self) -> Result<Option<Statement>> {
        trace!("parse_statement: next token = {:?}", self.peek());

        // Statement attributes (`@diagnostic(...)`, `@unroll`) carry no
        // meaning for the simulation.
        self.parse_attributes()?;

        let line = self.peek().line;
        let kind = match self.peek().kind {
            TokenKind::Semicolon => {
                self.advance();
                return Ok(None);
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon, "after return")?;
                StmtKind::Return(value)
            }
            TokenKind::If => self.parse_if_statement()?,
            TokenKind::Switch => self.parse_switch_statement()?,
            TokenKind::Loop => self.parse_loop_statement()?,
            TokenKind::For => self.parse_for_statement()?,
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                StmtKind::While { condition, body }
            }
            TokenKind::Break => {
                self.advance();
                let kind = if self.match_token(TokenKind::If) {
                    StmtKind::BreakIf(self.parse_expression()?)
                } else {
                    StmtKind::Break
                };
                self.expect(TokenKind::Semicolon, "after break")?;
                kind
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(TokenKind::Semicolon, "after continue")?;
                StmtKind::Continue
            }
            TokenKind::Discard => {
                self.advance();
                self.expect(TokenKind::Semicolon, "after discard")?;
                StmtKind::Discard
            }
            TokenKind::ConstAssert => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "after const_assert")?;
                StmtKind::ConstAssert(expr)
            }
            TokenKind::BraceLeft => StmtKind::Block(self.parse_block()?),
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.expect(TokenKind::Semicolon, "after statement")?;
                return Ok(Some(stmt));
            }
        };

        Ok(Some(Statement { line, kind }))
    }

    /// Declarations, assignments, increments and call statements: the
    /// statement forms allowed in a `for` header.
    fn parse_simple_statement(&mut self) -> Result<Statement> {
        trace!("parse_simple_statement: next token = {:?}", self.peek());
        let line = self.peek().line;

        let kind = match self.peek().kind {
            TokenKind::Var => StmtKind::Var(self.parse_var_decl(Vec::new())?),
            TokenKind::Let => StmtKind::Let(self.parse_let_or_const_decl(Vec::new())?),
            TokenKind::Const => {
                let decl = self.parse_let_or_const_decl(Vec::new())?;
                if let Some(value) = &decl.value {
                    self.context.constants.insert(decl.name.clone(), value.clone());
                }
                StmtKind::Const(decl)
            }
            TokenKind::Underscore => {
                self.advance();
                self.expect(TokenKind::Equal, "after '_'")?;
                let value = self.parse_expression()?;
                StmtKind::Assign {
                    op: AssignOp::Assign,
                    target: None,
                    value,
                }
            }
            _ => {
                let target = self.parse_unary_expression()?;
                match self.peek().kind {
                    TokenKind::PlusPlus => {
                        self.advance();
                        StmtKind::Increment {
                            op: IncrementOp::Increment,
                            target,
                        }
                    }
                    TokenKind::MinusMinus => {
                        self.advance();
                        StmtKind::Increment {
                            op: IncrementOp::Decrement,
                            target,
                        }
                    }
                    kind if kind.is_assignment() => {
                        self.advance();
                        let op = assign_op(kind);
                        let value = self.parse_expression()?;
                        StmtKind::Assign {
                            op,
                            target: Some(target),
                            value,
                        }
                    }
                    _ if matches!(target.kind, ExprKind::Call { .. } | ExprKind::Construct { .. }) => {
                        StmtKind::Call(target)
                    }
                    _ => bail_parse_at!(self.peek(), "Expected assignment, increment or call statement"),
                }
            }
        };

        Ok(Statement { line, kind })
    }

    fn parse_if_statement(&mut self) -> Result<StmtKind> {
        trace!("parse_if_statement: next token = {:?}", self.peek());
        self.expect(TokenKind::If, "to start if")?;
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;

        let mut else_ifs = Vec::new();
        let mut else_body = None;
        while self.match_token(TokenKind::Else) {
            if self.check(TokenKind::If) {
                let line = self.advance().line;
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                else_ifs.push(ElseIf { condition, body, line });
            } else {
                else_body = Some(self.parse_block()?);
                break;
            }
        }

        Ok(StmtKind::If {
            condition,
            body,
            else_ifs,
            else_body,
        })
    }

    fn parse_switch_statement(&mut self) -> Result<StmtKind> {
        trace!("parse_switch_statement: next token = {:?}", self.peek());
        self.expect(TokenKind::Switch, "to start switch")?;
        let selector = self.parse_expression()?;
        self.parse_attributes()?;
        self.expect(TokenKind::BraceLeft, "to open switch body")?;

        let mut cases = Vec::new();
        while !self.check(TokenKind::BraceRight) && !self.is_at_end() {
            let line = self.peek().line;
            let mut selectors = Vec::new();
            let mut is_default = false;

            if self.match_token(TokenKind::Default) {
                is_default = true;
            } else {
                self.expect(TokenKind::Case, "to start switch clause")?;
                loop {
                    if self.match_token(TokenKind::Default) {
                        is_default = true;
                    } else {
                        selectors.push(self.parse_expression()?);
                    }
                    if !self.match_token(TokenKind::Comma) || self.check(TokenKind::Colon) || self.check(TokenKind::BraceLeft) {
                        break;
                    }
                }
            }

            self.match_token(TokenKind::Colon);
            let body = self.parse_block()?;
            cases.push(SwitchCase {
                selectors,
                is_default,
                body,
                line,
            });
        }

        self.expect(TokenKind::BraceRight, "to close switch body")?;
        Ok(StmtKind::Switch { selector, cases })
    }

    fn parse_loop_statement(&mut self) -> Result<StmtKind> {
        trace!("parse_loop_statement: next token = {:?}", self.peek());
        self.expect(TokenKind::Loop, "to start loop")?;
        self.parse_attributes()?;
        self.expect(TokenKind::BraceLeft, "to open loop body")?;

        let mut body = Vec::new();
        let mut continuing = None;
        while !self.check(TokenKind::BraceRight) && !self.is_at_end() {
            if self.match_token(TokenKind::Continuing) {
                continuing = Some(self.parse_block()?);
                break;
            }
            if let Some(stmt) = self.parse_statement()? {
                body.push(stmt);
            }
        }

        self.expect(TokenKind::BraceRight, "to close loop body")?;
        Ok(StmtKind::Loop { body, continuing })
    }

    fn parse_for_statement(&mut self) -> Result<StmtKind> {
        trace!("parse_for_statement: next token = {:?}", self.peek());
        self.expect(TokenKind::For, "to start for")?;
        self.expect(TokenKind::ParenLeft, "after for")?;

        let init = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement()?))
        };
        self.expect(TokenKind::Semicolon, "after for initializer")?;

        let condition = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "after for condition")?;

        let increment = if self.check(TokenKind::ParenRight) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement()?))
        };
        self.expect(TokenKind::ParenRight, "to close for header")?;

        let body = self.parse_block()?;
        Ok(StmtKind::For {
            init,
            condition,
            increment,
            body,
        })
    }

    // ---- token helpers ----

    fn peek(&self) -> &Token {
        let index = self.current.min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn peek_next(&self) -> &Token {
        let index = (self.current + 1).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(ShaderError::Parse {
                message: format!("Expected {:?} {}, got {:?}", kind, context, token.kind),
                line: token.line,
                lexeme: token.lexeme.clone(),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance().lexeme)
        } else {
            bail_parse_at!(self.peek(), "Expected identifier")
        }
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }
}

fn assign_op(kind: TokenKind) -> AssignOp {
    match kind {
        TokenKind::PlusEqual => AssignOp::Add,
        TokenKind::MinusEqual => AssignOp::Subtract,
        TokenKind::TimesEqual => AssignOp::Multiply,
        TokenKind::DivisionEqual => AssignOp::Divide,
        TokenKind::ModuloEqual => AssignOp::Modulo,
        TokenKind::AndEqual => AssignOp::And,
        TokenKind::OrEqual => AssignOp::Or,
        TokenKind::XorEqual => AssignOp::Xor,
        TokenKind::ShiftLeftEqual => AssignOp::ShiftLeft,
        TokenKind::ShiftRightEqual => AssignOp::ShiftRight,
        _ => AssignOp::Assign,
    }
}
