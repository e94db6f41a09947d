use super::Parser;
use crate::ast::*;
use crate::bail_parse_at;
use crate::constant_folding::ConstantFolder;
use crate::error::Result;
use crate::lexer::{is_template_name, TokenKind};
use log::trace;

/// Predeclared aliases such as `vec3f` or `mat4x4h`, split into the
/// generator name and its scalar.
pub fn split_shorthand(name: &str) -> Option<(&str, &str)> {
    let (base, suffix) = name.split_at(name.len().checked_sub(1)?);
    let scalar = match suffix {
        "f" => "f32",
        "h" => "f16",
        "i" => "i32",
        "u" => "u32",
        _ => return None,
    };
    let is_vec = matches!(base, "vec2" | "vec3" | "vec4");
    let is_mat = base.len() == 6
        && base.starts_with("mat")
        && matches!(&base[3..], "2x2" | "2x3" | "2x4" | "3x2" | "3x3" | "3x4" | "4x2" | "4x3" | "4x4");
    if is_vec || (is_mat && matches!(suffix, "f" | "h")) {
        Some((base, scalar))
    } else {
        None
    }
}

pub fn is_scalar_type_name(name: &str) -> bool {
    matches!(name, "bool" | "i32" | "u32" | "f32" | "f16")
}

/// Names that start a type wherever an expression may appear.
pub fn is_builtin_type_name(name: &str) -> bool {
    is_scalar_type_name(name) || is_template_name(name) || split_shorthand(name).is_some()
}

impl Parser {
    pub(crate) fn parse_type(&mut self) -> Result<Type> {
        trace!("parse_type: next token = {:?}", self.peek());
        let attributes = self.parse_attributes()?;

        let token = self.advance();
        if token.kind != TokenKind::Identifier {
            bail_parse_at!(token, "Expected type name");
        }
        let name = token.lexeme;

        let kind = if name == "array" || name == "binding_array" {
            self.parse_array_type()?
        } else if let Some((base, scalar)) = split_shorthand(&name) {
            let format = self.node_counter.mk_type(TypeKind::Named(scalar.to_string()));
            TypeKind::Template {
                name: base.to_string(),
                format: Some(Box::new(format)),
                access: None,
                space: None,
            }
        } else if is_template_name(&name) {
            self.parse_template_type(name)?
        } else {
            TypeKind::Named(name)
        };

        let mut ty = self.node_counter.mk_type(kind);
        ty.attributes = attributes;

        if let TypeKind::Array {
            count: None,
            count_expr: Some(expr),
            ..
        } = &ty.kind
        {
            trace!("deferring array count at line {}", expr.line);
            self.context.deferred.push((ty.id, (**expr).clone()));
        }

        Ok(ty)
    }

    fn parse_array_type(&mut self) -> Result<TypeKind> {
        if !self.match_token(TokenKind::LessThan) {
            return Ok(TypeKind::Array {
                format: None,
                count: None,
                count_expr: None,
            });
        }

        let format = self.parse_type()?;
        let mut count = None;
        let mut count_expr = None;
        if self.match_token(TokenKind::Comma) && !self.check(TokenKind::GreaterThan) {
            let expr = self.parse_shift_expression()?;
            count = ConstantFolder::new(&self.context.constants).fold_u32(&expr);
            count_expr = Some(Box::new(expr));
        }
        self.expect(TokenKind::GreaterThan, "to close array type")?;

        Ok(TypeKind::Array {
            format: Some(Box::new(format)),
            count,
            count_expr,
        })
    }

    fn parse_template_type(&mut self, name: String) -> Result<TypeKind> {
        if !self.match_token(TokenKind::LessThan) {
            return Ok(TypeKind::Template {
                name,
                format: None,
                access: None,
                space: None,
            });
        }

        let mut format = None;
        let mut space = None;
        if name == "ptr" {
            space = Some(self.expect_identifier()?);
            self.expect(TokenKind::Comma, "after pointer address space")?;
            format = Some(Box::new(self.parse_type()?));
        } else if name.starts_with("texture_storage") {
            space = Some(self.expect_identifier()?);
        } else {
            format = Some(Box::new(self.parse_type()?));
        }

        let access = if self.match_token(TokenKind::Comma) && !self.check(TokenKind::GreaterThan) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.expect(TokenKind::GreaterThan, "to close template parameters")?;

        Ok(TypeKind::Template {
            name,
            format,
            access,
            space,
        })
    }
}
