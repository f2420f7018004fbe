use std::collections::HashMap;

use unitscript_common::CompileError;
use unitscript_ir::{Arg, Constant, Function, Instruction, OpCode, Program, ProgramBuilder};
use unitscript_parser::ast::{BinOp, CompareOp, Expr, LogicalOp, Module, Stmt};
use unitscript_sema::{Environment, Resolver, TypeSchema, TypeTag};

/// Discard register for expression-statement results and short-circuit
/// operands. The opcode table has no standalone `POP`; `STORE_VAR` into this
/// name is the only stack-discarding instruction available, so it doubles
/// as one. `$` never starts a lexer identifier (`lex_identifier` only
/// accepts `_`/alphabetic as a leading byte), so no user source can ever
/// name a variable this, unlike a bare `_` which is a legal identifier.
const DISCARD: &str = "$discard";

struct LoopFrame {
    start: usize,
    break_patches: Vec<usize>,
}

/// Lowers a parsed `Module` to bytecode, interleaving static name and
/// attribute checks (via `Resolver`) with code emission in a single walk.
struct Compiler<'a> {
    builder: ProgramBuilder,
    resolver: Resolver<'a>,
    loop_stack: Vec<LoopFrame>,
}

impl<'a> Compiler<'a> {
    fn new(env: &'a Environment, schema: &'a TypeSchema) -> Self {
        Self {
            builder: ProgramBuilder::new(),
            resolver: Resolver::new(env, schema),
            loop_stack: Vec::new(),
        }
    }

    fn compile_module(&mut self, module: &Module) -> Result<Vec<Instruction>, CompileError> {
        let mut code = Vec::new();
        for stmt in &module.statements {
            self.compile_stmt(&mut code, stmt)?;
        }
        let last_line = code.last().map(|i| i.line).unwrap_or(1);
        code.push(Instruction::bare(OpCode::Halt, last_line));
        Ok(code)
    }

    fn compile_block(&mut self, code: &mut Vec<Instruction>, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.compile_stmt(code, stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, code: &mut Vec<Instruction>, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Assign { name, value, span } => {
                self.compile_expr(code, value)?;
                code.push(Instruction::name(OpCode::StoreVar, name.clone(), span.line));
                let tag = self.resolver.infer_expr_type(value);
                self.resolver.define(name, tag);
                Ok(())
            }
            Stmt::AugAssign { name, op, value, span } => {
                self.resolver.check_name(name, span.line)?;
                code.push(Instruction::name(OpCode::LoadVar, name.clone(), span.line));
                self.compile_expr(code, value)?;
                code.push(Instruction::bare(binop_opcode(*op), span.line));
                code.push(Instruction::name(OpCode::StoreVar, name.clone(), span.line));
                Ok(())
            }
            Stmt::Expr { expr, span } => {
                self.compile_expr(code, expr)?;
                code.push(Instruction::name(OpCode::StoreVar, DISCARD, span.line));
                Ok(())
            }
            Stmt::If { branches, else_body, span } => {
                self.compile_if(code, branches, else_body, span.line)
            }
            Stmt::While { condition, body, span } => {
                self.compile_while(code, condition, body, span.line)
            }
            Stmt::For { var, iterable, body, span } => {
                self.compile_for(code, var, iterable, body, span.line)
            }
            Stmt::FunctionDef { name, params, body, span } => {
                self.compile_function_def(code, name, params, body, span.line)
            }
            Stmt::Return { value, span } => {
                match value {
                    Some(e) => self.compile_expr(code, e)?,
                    None => {
                        let idx = self.builder.add_constant(Constant::None);
                        code.push(Instruction::const_ref(idx, span.line));
                    }
                }
                code.push(Instruction::bare(OpCode::ReturnValue, span.line));
                Ok(())
            }
            Stmt::Break { span } => {
                self.resolver.check_loop_context("break", span.line)?;
                let idx = code.len();
                code.push(Instruction::jump(OpCode::Jump, 0, span.line));
                self.loop_stack
                    .last_mut()
                    .expect("checked loop context above")
                    .break_patches
                    .push(idx);
                Ok(())
            }
            Stmt::Continue { span } => {
                self.resolver.check_loop_context("continue", span.line)?;
                let start = self
                    .loop_stack
                    .last()
                    .expect("checked loop context above")
                    .start;
                code.push(Instruction::jump(OpCode::Jump, start, span.line));
                Ok(())
            }
        }
    }

    fn compile_if(
        &mut self,
        code: &mut Vec<Instruction>,
        branches: &[(Expr, Vec<Stmt>)],
        else_body: &Option<Vec<Stmt>>,
        line: u32,
    ) -> Result<(), CompileError> {
        let mut end_jumps = Vec::new();
        for (i, (cond, body)) in branches.iter().enumerate() {
            self.compile_expr(code, cond)?;
            let jump_false_idx = code.len();
            code.push(Instruction::jump(OpCode::PopJumpIfFalse, 0, cond.span().line));
            self.compile_block(code, body)?;

            let is_last = i == branches.len() - 1 && else_body.is_none();
            if !is_last {
                let jmp_idx = code.len();
                code.push(Instruction::jump(OpCode::Jump, 0, line));
                end_jumps.push(jmp_idx);
            }
            let next_branch = code.len();
            code[jump_false_idx].set_target(next_branch);
        }
        if let Some(body) = else_body {
            self.compile_block(code, body)?;
        }
        let end = code.len();
        for idx in end_jumps {
            code[idx].set_target(end);
        }
        Ok(())
    }

    fn compile_while(
        &mut self,
        code: &mut Vec<Instruction>,
        condition: &Expr,
        body: &[Stmt],
        line: u32,
    ) -> Result<(), CompileError> {
        let loop_start = code.len();
        self.compile_expr(code, condition)?;
        let exit_idx = code.len();
        code.push(Instruction::jump(OpCode::PopJumpIfFalse, 0, line));

        self.loop_stack.push(LoopFrame {
            start: loop_start,
            break_patches: Vec::new(),
        });
        self.resolver.enter_loop();
        self.compile_block(code, body)?;
        self.resolver.exit_loop();

        code.push(Instruction::jump(OpCode::Jump, loop_start, line));
        let end = code.len();
        code[exit_idx].set_target(end);

        let frame = self.loop_stack.pop().expect("pushed above");
        for idx in frame.break_patches {
            code[idx].set_target(end);
        }
        Ok(())
    }

    fn compile_for(
        &mut self,
        code: &mut Vec<Instruction>,
        var: &str,
        iterable: &Expr,
        body: &[Stmt],
        line: u32,
    ) -> Result<(), CompileError> {
        let elem_tag = self.resolver.infer_expr_type(iterable).element_type();
        self.compile_expr(code, iterable)?;
        code.push(Instruction::bare(OpCode::GetIter, line));

        let loop_start = code.len();
        let for_iter_idx = code.len();
        code.push(Instruction::jump(OpCode::ForIter, 0, line));
        code.push(Instruction::name(OpCode::StoreVar, var.to_string(), line));
        self.resolver.define(var, elem_tag);

        self.loop_stack.push(LoopFrame {
            start: loop_start,
            break_patches: Vec::new(),
        });
        self.resolver.enter_loop();
        self.compile_block(code, body)?;
        self.resolver.exit_loop();

        code.push(Instruction::jump(OpCode::Jump, loop_start, line));
        let end = code.len();
        code[for_iter_idx].set_target(end);

        let frame = self.loop_stack.pop().expect("pushed above");
        for idx in frame.break_patches {
            code[idx].set_target(end);
        }
        Ok(())
    }

    fn compile_function_def(
        &mut self,
        code: &mut Vec<Instruction>,
        name: &str,
        params: &[String],
        body: &[Stmt],
        line: u32,
    ) -> Result<(), CompileError> {
        self.resolver.define(name, TypeTag::Any);

        let mut fn_code = Vec::new();
        self.resolver.push_scope();
        self.resolver.define(name, TypeTag::Any);
        for param in params {
            self.resolver.define(param, TypeTag::Any);
        }
        let body_result = self.compile_block(&mut fn_code, body);
        self.resolver.pop_scope();
        body_result?;

        let none_idx = self.builder.add_constant(Constant::None);
        fn_code.push(Instruction::const_ref(none_idx, line));
        fn_code.push(Instruction::bare(OpCode::ReturnValue, line));

        let func_idx = self.builder.add_function(Function {
            name: name.to_string(),
            params: params.to_vec(),
            code: fn_code,
        });
        code.push(Instruction::new(OpCode::MakeFunction, Arg::FunctionIndex(func_idx), line));
        code.push(Instruction::name(OpCode::StoreVar, name.to_string(), line));
        Ok(())
    }

    fn compile_expr(&mut self, code: &mut Vec<Instruction>, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Number(n, span) => {
                let idx = self.builder.add_constant(Constant::Num(*n));
                code.push(Instruction::const_ref(idx, span.line));
            }
            Expr::Str(s, span) => {
                let idx = self.builder.add_constant(Constant::Str(s.clone()));
                code.push(Instruction::const_ref(idx, span.line));
            }
            Expr::Bool(b, span) => {
                let idx = self.builder.add_constant(Constant::Bool(*b));
                code.push(Instruction::const_ref(idx, span.line));
            }
            Expr::None(span) => {
                let idx = self.builder.add_constant(Constant::None);
                code.push(Instruction::const_ref(idx, span.line));
            }
            Expr::Name(name, span) => {
                self.resolver.check_name(name, span.line)?;
                code.push(Instruction::name(OpCode::LoadVar, name.clone(), span.line));
            }
            Expr::BinaryOp(lhs, op, rhs, span) => {
                self.compile_expr(code, lhs)?;
                self.compile_expr(code, rhs)?;
                code.push(Instruction::bare(binop_opcode(*op), span.line));
            }
            Expr::UnaryNeg(inner, span) => {
                self.compile_expr(code, inner)?;
                code.push(Instruction::bare(OpCode::UnaryNeg, span.line));
            }
            Expr::Compare(lhs, op, rhs, span) => {
                self.compile_expr(code, lhs)?;
                self.compile_expr(code, rhs)?;
                code.push(Instruction::bare(compareop_opcode(*op), span.line));
            }
            Expr::Logical(lhs, op, rhs, span) => {
                self.compile_expr(code, lhs)?;
                let short_circuit_op = match op {
                    LogicalOp::And => OpCode::JumpIfFalse,
                    LogicalOp::Or => OpCode::JumpIfTrue,
                };
                let jump_idx = code.len();
                code.push(Instruction::jump(short_circuit_op, 0, span.line));
                code.push(Instruction::name(OpCode::StoreVar, DISCARD, span.line));
                self.compile_expr(code, rhs)?;
                let end = code.len();
                code[jump_idx].set_target(end);
            }
            Expr::Not(inner, span) => {
                self.compile_expr(code, inner)?;
                code.push(Instruction::bare(OpCode::UnaryNot, span.line));
            }
            Expr::Call(callee, args, span) => {
                self.compile_expr(code, callee)?;
                for arg in args {
                    self.compile_expr(code, arg)?;
                }
                code.push(Instruction::count(OpCode::Call, args.len(), span.line));
            }
            Expr::Attr(obj, name, span) => {
                self.resolver.check_attr(obj, name, span.line)?;
                self.compile_expr(code, obj)?;
                code.push(Instruction::name(OpCode::LoadAttr, name.clone(), span.line));
            }
            Expr::Index(container, key, span) => {
                self.compile_expr(code, container)?;
                self.compile_expr(code, key)?;
                code.push(Instruction::bare(OpCode::GetIndex, span.line));
            }
            Expr::List(items, span) => {
                for item in items {
                    self.compile_expr(code, item)?;
                }
                code.push(Instruction::count(OpCode::BuildList, items.len(), span.line));
            }
        }
        Ok(())
    }
}

fn binop_opcode(op: BinOp) -> OpCode {
    match op {
        BinOp::Add => OpCode::BinaryAdd,
        BinOp::Sub => OpCode::BinarySub,
        BinOp::Mul => OpCode::BinaryMul,
        BinOp::Div => OpCode::BinaryDiv,
        BinOp::FloorDiv => OpCode::BinaryFloorDiv,
        BinOp::Mod => OpCode::BinaryMod,
        BinOp::Pow => OpCode::BinaryPow,
    }
}

fn compareop_opcode(op: CompareOp) -> OpCode {
    match op {
        CompareOp::Eq => OpCode::CompareEq,
        CompareOp::Ne => OpCode::CompareNe,
        CompareOp::Lt => OpCode::CompareLt,
        CompareOp::Gt => OpCode::CompareGt,
        CompareOp::Le => OpCode::CompareLe,
        CompareOp::Ge => OpCode::CompareGe,
    }
}

/// Compile `source` to a `Program`. Diagnostics are populated on failure,
/// in which case `code` and `functions` are left empty — there is no
/// partial-success bytecode.
pub fn compile(source: &str, self_type: TypeTag, env_types: HashMap<String, TypeTag>) -> Program {
    let env = Environment::standard(self_type, &env_types);
    let schema = TypeSchema::standard();

    let module = match unitscript_parser::parse(source) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "compile failed during parse");
            let mut program = Program::new();
            program.diagnostics.push(e);
            return program;
        }
    };

    let mut compiler = Compiler::new(&env, &schema);
    let code_result = compiler.compile_module(&module);
    let mut program = compiler.builder.build();
    match code_result {
        Ok(code) => program.set_code(code),
        Err(e) => {
            tracing::debug!(error = %e, "compile failed during codegen");
            program.diagnostics.push(e);
        }
    }
    if !program.diagnostics.is_empty() {
        program.code.clear();
        program.functions.clear();
    }
    tracing::trace!(
        instructions = program.code.len(),
        constants = program.constants.len(),
        functions = program.functions.len(),
        "compiled program"
    );
    program
}

/// Convenience for source with no unit-typed `self` binding in play.
pub fn compile_default(source: &str) -> Program {
    compile(source, TypeTag::Any, HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitscript_ir::OpCode;

    #[test]
    fn test_halt_is_always_last() {
        let program = compile_default("x = 1\n");
        assert_eq!(program.code.last().unwrap().op, OpCode::Halt);
    }

    #[test]
    fn test_assign_then_load() {
        let program = compile_default("x = 1\ny = x + 1\n");
        assert!(program.is_ok());
        assert!(program.code.iter().any(|i| i.op == OpCode::LoadVar));
        assert!(program.code.iter().any(|i| i.op == OpCode::BinaryAdd));
    }

    #[test]
    fn test_undefined_name_is_fatal_and_clears_code() {
        let program = compile_default("y = x + 1\n");
        assert!(!program.is_ok());
        assert!(program.code.is_empty());
    }

    #[test]
    fn test_break_outside_loop_is_fatal() {
        let program = compile_default("break\n");
        assert!(!program.is_ok());
    }

    #[test]
    fn test_while_loop_jump_targets_in_range() {
        let program = compile_default("x = 0\nwhile x < 5:\n    x = x + 1\n");
        assert!(program.is_ok());
        for inst in &program.code {
            if matches!(
                inst.op,
                OpCode::Jump | OpCode::PopJumpIfFalse | OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::ForIter
            ) {
                assert!(inst.target() <= program.code.len());
            }
        }
    }

    #[test]
    fn test_attribute_miss_on_typed_self_reports_suggestion() {
        let program = compile("self.forw()\n", TypeTag::Bot, HashMap::new());
        assert!(!program.is_ok());
        let message = program.diagnostics[0].to_string();
        assert!(message.contains("did you mean 'forward'"));
    }

    #[test]
    fn test_function_def_emits_make_function_and_nested_code() {
        let program = compile_default("def double(n):\n    return n * 2\nx = double(21)\n");
        assert!(program.is_ok());
        assert_eq!(program.functions.len(), 1);
        assert!(program.code.iter().any(|i| i.op == OpCode::MakeFunction));
        assert!(program.functions[0].code.iter().any(|i| i.op == OpCode::ReturnValue));
    }
}
