use std::collections::HashMap;

use unitscript_common::CompileError;
use unitscript_parser::ast::{BinOp, Expr};

use crate::environment::Environment;
use crate::schema::{TypeSchema, TypeTag};

/// Name resolution, scope tracking, and best-effort type inference, shared
/// between a standalone validation pass and the compiler's own code
/// generation walk (the compiler calls straight into this rather than
/// re-deriving scope and type information on its own).
pub struct Resolver<'a> {
    env: &'a Environment,
    schema: &'a TypeSchema,
    scopes: Vec<HashMap<String, TypeTag>>,
    loop_depth: u32,
}

impl<'a> Resolver<'a> {
    pub fn new(env: &'a Environment, schema: &'a TypeSchema) -> Self {
        Self {
            env,
            schema,
            scopes: vec![HashMap::new()],
            loop_depth: 0,
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn define(&mut self, name: &str, tag: TypeTag) {
        self.scopes
            .last_mut()
            .expect("at least one scope always present")
            .insert(name.to_string(), tag);
    }

    /// Look up `name`'s type tag, checking local scopes innermost-first and
    /// then the injected environment.
    pub fn lookup(&self, name: &str) -> Option<TypeTag> {
        for scope in self.scopes.iter().rev() {
            if let Some(tag) = scope.get(name) {
                return Some(tag.clone());
            }
        }
        self.env.get(name).cloned()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Resolve a `NAME` reference, producing a `NameError` diagnostic when
    /// it's bound nowhere in scope or the environment.
    pub fn check_name(&self, name: &str, line: u32) -> Result<TypeTag, CompileError> {
        self.lookup(name)
            .ok_or_else(|| CompileError::name(name, line))
    }

    pub fn enter_loop(&mut self) {
        self.loop_depth += 1;
    }

    pub fn exit_loop(&mut self) {
        self.loop_depth -= 1;
    }

    pub fn check_loop_context(&self, keyword: &str, line: u32) -> Result<(), CompileError> {
        if self.loop_depth == 0 {
            Err(CompileError::syntax(
                format!("'{keyword}' outside loop"),
                line,
                0,
            ))
        } else {
            Ok(())
        }
    }

    /// Best-effort static type of an expression — falls back to `Any` when
    /// the shape isn't one the schema tracks, per the "type propagation"
    /// rule: unknowns don't block compilation, they just stop further
    /// attribute checks on that chain.
    pub fn infer_expr_type(&self, expr: &Expr) -> TypeTag {
        match expr {
            Expr::Number(_, _) => TypeTag::Number,
            Expr::UnaryNeg(_, _) => TypeTag::Number,
            Expr::BinaryOp(_, op, _, _) => match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::FloorDiv
                | BinOp::Mod | BinOp::Pow => TypeTag::Number,
            },
            Expr::Name(name, _) => self.lookup(name).unwrap_or(TypeTag::Any),
            Expr::Index(container, _, _) => self.infer_expr_type(container).element_type(),
            Expr::List(_, _) => TypeTag::list_any(),
            Expr::Attr(obj, name, _) => {
                let obj_tag = self.infer_expr_type(obj);
                self.schema
                    .lookup(&obj_tag, name)
                    .map(|attr| attr.result.clone())
                    .unwrap_or(TypeTag::Any)
            }
            Expr::Call(callee, _, _) => self.infer_expr_type(callee),
            Expr::Str(_, _)
            | Expr::Bool(_, _)
            | Expr::None(_)
            | Expr::Compare(_, _, _, _)
            | Expr::Logical(_, _, _, _)
            | Expr::Not(_, _) => TypeTag::Any,
        }
    }

    /// Check `obj.name`, returning the attribute's result type. Only runs
    /// the check when `obj`'s static type is schema-typed; untyped objects
    /// (`any`, `number`) are never checked, per the attribute-checking rule.
    pub fn check_attr(
        &self,
        obj: &Expr,
        name: &str,
        line: u32,
    ) -> Result<TypeTag, CompileError> {
        let obj_tag = self.infer_expr_type(obj);
        if !self.schema.is_typed(&obj_tag) {
            return Ok(TypeTag::Any);
        }
        match self.schema.lookup(&obj_tag, name) {
            Some(attr) => Ok(attr.result.clone()),
            None => {
                let suggestion = self.schema.suggest(&obj_tag, name);
                Err(CompileError::attribute(
                    obj_tag.display_name(),
                    name,
                    line,
                    suggestion,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitscript_common::CompileErrorKind;

    fn env() -> Environment {
        Environment::standard(TypeTag::Bot, &HashMap::new())
    }

    #[test]
    fn test_undefined_name_is_name_error() {
        let env = env();
        let schema = TypeSchema::standard();
        let resolver = Resolver::new(&env, &schema);
        let err = resolver.check_name("nope", 1).unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::Name(n) if n == "nope"));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let env = env();
        let schema = TypeSchema::standard();
        let resolver = Resolver::new(&env, &schema);
        assert!(resolver.check_loop_context("break", 1).is_err());
    }

    #[test]
    fn test_break_inside_loop_ok() {
        let env = env();
        let schema = TypeSchema::standard();
        let mut resolver = Resolver::new(&env, &schema);
        resolver.enter_loop();
        assert!(resolver.check_loop_context("break", 1).is_ok());
    }

    #[test]
    fn test_attribute_miss_produces_did_you_mean() {
        let env = env();
        let schema = TypeSchema::standard();
        let resolver = Resolver::new(&env, &schema);
        let self_expr = Expr::Name("self".to_string(), unitscript_common::Span::new(1, 1));
        let err = resolver.check_attr(&self_expr, "forw", 1).unwrap_err();
        match err.kind {
            CompileErrorKind::Attribute { ty, name, suggestion } => {
                assert_eq!(ty, "Bot");
                assert_eq!(name, "forw");
                assert!(suggestion.contains("forward"));
            }
            other => panic!("expected Attribute error, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_result_feeds_enemy_attribute_checks() {
        let env = env();
        let schema = TypeSchema::standard();
        let mut resolver = Resolver::new(&env, &schema);
        let self_span = unitscript_common::Span::new(1, 1);
        let scan_call = Expr::Call(
            Box::new(Expr::Attr(
                Box::new(Expr::Name("self".to_string(), self_span)),
                "scan".to_string(),
                self_span,
            )),
            vec![],
            self_span,
        );
        resolver.define("enemies", resolver.infer_expr_type(&scan_call));
        let enemies_expr = Expr::Name("enemies".to_string(), self_span);
        let idx_expr = Expr::Index(
            Box::new(enemies_expr),
            Box::new(Expr::Number(0.0, self_span)),
            self_span,
        );
        assert_eq!(resolver.check_attr(&idx_expr, "hp", 1), Ok(TypeTag::Number));
    }
}
