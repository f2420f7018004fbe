use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use unitscript_common::{RuntimeError, RuntimeErrorKind};
use unitscript_ir::{Arg, Constant, Function as IrFunction, OpCode, Program};

use crate::host::{CallOutcome, HostInterface, NoHost};
use crate::value::Value;

/// Mirrors `unitscript_codegen::compiler::DISCARD`. Kept as a separate
/// constant rather than a cross-crate dependency since the two crates
/// otherwise have no reason to share a type; the two must be kept in sync
/// by hand.
const INTERNAL_DISCARD: &str = "$discard";

/// Activation record for a user function call (§3, §9).
///
/// `saved_vars` is a snapshot of the global `vars` table taken at call
/// time. On return it is used to implement the documented single-scope
/// limitation: a name that already existed in the snapshot keeps whatever
/// value the function body left it at (mutating a pre-existing global is
/// visible to the caller); a name that only came into being inside the
/// function (parameters, new locals) is dropped rather than leaking into
/// the caller's scope.
struct CallFrame {
    return_ip: usize,
    saved_vars: HashMap<String, Value>,
    function: Rc<IrFunction>,
}

/// A read-only snapshot of VM state for debuggers and telemetry.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub ip: usize,
    pub stack_depth: usize,
    pub vars: HashMap<String, Value>,
    pub running: bool,
    pub paused: bool,
    pub halted: bool,
    pub error: Option<RuntimeError>,
}

/// Stack-based bytecode interpreter (§4.4).
///
/// Single-threaded and cooperatively stepwise: execution only ever
/// suspends at the boundary of a `run(budget)` call, never mid-instruction.
pub struct VM {
    program: Program,
    functions: Vec<Rc<IrFunction>>,
    ip: usize,
    stack: Vec<Value>,
    vars: HashMap<String, Value>,
    call_frames: Vec<CallFrame>,
    running: bool,
    paused: bool,
    halted: bool,
    error: Option<RuntimeError>,
    host: Box<dyn HostInterface>,
}

impl VM {
    pub fn new() -> Self {
        Self {
            program: Program::new(),
            functions: Vec::new(),
            ip: 0,
            stack: Vec::new(),
            vars: HashMap::new(),
            call_frames: Vec::new(),
            running: false,
            paused: false,
            halted: true,
            error: None,
            host: Box::new(NoHost),
        }
    }

    pub fn with_host(mut self, host: Box<dyn HostInterface>) -> Self {
        self.host = host;
        self
    }

    /// Load a compiled `Program`, resetting all execution state. A program
    /// with no code (a failed compile) loads as immediately halted.
    pub fn load(&mut self, program: Program) {
        self.functions = program.functions.iter().cloned().map(Rc::new).collect();
        self.halted = program.code.is_empty();
        self.program = program;
        self.start();
    }

    /// Install the host-provided name→value environment (§6). Call before
    /// the first `run`/`step`.
    pub fn set_environment(&mut self, env: HashMap<String, Value>) {
        self.vars.extend(env);
    }

    /// Reset `ip` to the top and clear the operand stack, leaving `vars`
    /// and the loaded program untouched. Used both by `load` and to
    /// re-run an already-compiled program from scratch.
    pub fn start(&mut self) {
        self.ip = 0;
        self.stack.clear();
        self.call_frames.clear();
        self.running = !self.halted;
        self.paused = false;
        self.error = None;
    }

    pub fn get_state(&self) -> StateSnapshot {
        StateSnapshot {
            ip: self.ip,
            stack_depth: self.stack.len(),
            vars: self.visible_vars(),
            running: self.running,
            paused: self.paused,
            halted: self.halted,
            error: self.error.clone(),
        }
    }

    /// The global bindings a host should see. Excludes the compiler's
    /// internal discard register (`STORE_VAR "$discard"`, used in place of
    /// a `POP` opcode) — that name is never producible by user source, but
    /// it still lands in `vars` like any other store, so it's filtered out
    /// of every host-facing view of the scope.
    fn visible_vars(&self) -> HashMap<String, Value> {
        self.vars
            .iter()
            .filter(|(k, _)| k.as_str() != INTERNAL_DISCARD)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn vars(&self) -> HashMap<String, Value> {
        self.visible_vars()
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.halted = true;
    }

    fn current_code(&self) -> &[unitscript_ir::Instruction] {
        match self.call_frames.last() {
            Some(frame) => &frame.function.code,
            None => &self.program.code,
        }
    }

    fn fail(&mut self, kind: RuntimeErrorKind) {
        let line = self.current_code().get(self.ip).map(|i| i.line).unwrap_or(0);
        tracing::debug!(error = %kind, line, "vm halted on runtime error");
        self.error = Some(RuntimeError::new(kind, line));
        self.running = false;
        self.halted = true;
    }

    /// Execute exactly one instruction. Returns `true` iff the VM is still
    /// running afterward. A no-op on a halted or paused VM.
    pub fn step(&mut self) -> bool {
        if self.paused || self.halted || !self.running {
            return self.running;
        }

        let code = self.current_code();
        let Some(inst) = code.get(self.ip).cloned() else {
            // Fell off the end of a function body without RETURN_VALUE:
            // treat as an implicit return of None.
            self.synthetic_return();
            return self.running;
        };

        tracing::trace!(ip = self.ip, op = %inst.op, line = inst.line, "dispatch");

        let mut advance = true;

        match inst.op {
            OpCode::Nop => {}
            OpCode::Halt => {
                self.running = false;
                self.halted = true;
            }

            OpCode::LoadConst => {
                let Arg::Const(idx) = inst.arg else { unreachable!("LoadConst always carries Const") };
                let value = self.load_constant(idx);
                self.stack.push(value);
            }
            OpCode::LoadVar => {
                let name = arg_name(&inst.arg);
                match self.vars.get(name).cloned() {
                    Some(v) => self.stack.push(v),
                    None => {
                        self.fail(RuntimeErrorKind::Name(name.to_string()));
                        return self.running;
                    }
                }
            }
            OpCode::StoreVar => {
                let name = arg_name(&inst.arg).to_string();
                let value = self.pop();
                self.vars.insert(name, value);
            }
            OpCode::LoadAttr => {
                let name = arg_name(&inst.arg).to_string();
                let obj = self.pop();
                match &obj {
                    Value::HostObject(_) => match self.host.host_getattr(&obj, &name) {
                        Ok(v) => self.stack.push(v),
                        Err(_) => {
                            self.fail(RuntimeErrorKind::Attribute {
                                ty: obj.type_name().to_string(),
                                name,
                            });
                            return self.running;
                        }
                    },
                    _ => {
                        self.fail(RuntimeErrorKind::Attribute {
                            ty: obj.type_name().to_string(),
                            name,
                        });
                        return self.running;
                    }
                }
            }

            OpCode::BuildList => {
                let Arg::Count(n) = inst.arg else { unreachable!("BuildList always carries Count") };
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.pop());
                }
                items.reverse();
                self.stack.push(Value::List(Rc::new(items)));
            }
            OpCode::GetIndex => {
                let key = self.pop();
                let container = self.pop();
                match (&container, &key) {
                    (Value::List(items), Value::Num(n)) => {
                        let i = *n as i64;
                        let item = (i >= 0 && (i as usize) < items.len())
                            .then(|| items[i as usize].clone());
                        match item {
                            Some(v) => self.stack.push(v),
                            None => {
                                self.fail(RuntimeErrorKind::Index);
                                return self.running;
                            }
                        }
                    }
                    _ => {
                        self.fail(RuntimeErrorKind::Type(format!(
                            "cannot index {} with {}",
                            container.type_name(),
                            key.type_name()
                        )));
                        return self.running;
                    }
                }
            }

            OpCode::BinaryAdd
            | OpCode::BinarySub
            | OpCode::BinaryMul
            | OpCode::BinaryDiv
            | OpCode::BinaryFloorDiv
            | OpCode::BinaryMod
            | OpCode::BinaryPow => {
                let rhs = self.pop();
                let lhs = self.pop();
                match (lhs.as_num(), rhs.as_num()) {
                    (Some(a), Some(b)) => {
                        let result = match inst.op {
                            OpCode::BinaryAdd => a + b,
                            OpCode::BinarySub => a - b,
                            OpCode::BinaryMul => a * b,
                            OpCode::BinaryDiv => a / b,
                            OpCode::BinaryFloorDiv => (a / b).floor(),
                            OpCode::BinaryMod => a % b,
                            OpCode::BinaryPow => a.powf(b),
                            _ => unreachable!(),
                        };
                        self.stack.push(Value::Num(result));
                    }
                    _ => {
                        self.fail(RuntimeErrorKind::Type(format!(
                            "arithmetic requires numbers, got {} and {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )));
                        return self.running;
                    }
                }
            }

            OpCode::CompareEq => {
                let rhs = self.pop();
                let lhs = self.pop();
                self.stack.push(Value::Bool(lhs == rhs));
            }
            OpCode::CompareNe => {
                let rhs = self.pop();
                let lhs = self.pop();
                self.stack.push(Value::Bool(lhs != rhs));
            }
            OpCode::CompareLt | OpCode::CompareGt | OpCode::CompareLe | OpCode::CompareGe => {
                let rhs = self.pop();
                let lhs = self.pop();
                match (lhs.as_num(), rhs.as_num()) {
                    (Some(a), Some(b)) => {
                        let result = match inst.op {
                            OpCode::CompareLt => a < b,
                            OpCode::CompareGt => a > b,
                            OpCode::CompareLe => a <= b,
                            OpCode::CompareGe => a >= b,
                            _ => unreachable!(),
                        };
                        self.stack.push(Value::Bool(result));
                    }
                    _ => {
                        self.fail(RuntimeErrorKind::Type(format!(
                            "comparison requires numbers, got {} and {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )));
                        return self.running;
                    }
                }
            }

            OpCode::UnaryNeg => {
                let v = self.pop();
                match v.as_num() {
                    Some(n) => self.stack.push(Value::Num(-n)),
                    None => {
                        self.fail(RuntimeErrorKind::Type(format!(
                            "unary '-' requires a number, got {}",
                            v.type_name()
                        )));
                        return self.running;
                    }
                }
            }
            OpCode::UnaryNot => {
                let v = self.pop();
                self.stack.push(Value::Bool(!v.is_truthy()));
            }

            OpCode::Jump => {
                self.ip = inst.target();
                advance = false;
            }
            OpCode::PopJumpIfFalse => {
                let v = self.pop();
                if !v.is_truthy() {
                    self.ip = inst.target();
                    advance = false;
                }
            }
            OpCode::JumpIfFalse => {
                if !self.stack.last().expect("non-empty for short-circuit").is_truthy() {
                    self.ip = inst.target();
                    advance = false;
                }
            }
            OpCode::JumpIfTrue => {
                if self.stack.last().expect("non-empty for short-circuit").is_truthy() {
                    self.ip = inst.target();
                    advance = false;
                }
            }

            OpCode::GetIter => {
                let v = self.pop();
                match v {
                    Value::List(items) => {
                        self.stack
                            .push(Value::Iterator(Rc::new(RefCell::new((items, 0)))));
                    }
                    _ => {
                        self.fail(RuntimeErrorKind::Type(format!(
                            "cannot iterate over {}",
                            v.type_name()
                        )));
                        return self.running;
                    }
                }
            }
            OpCode::ForIter => {
                // Clone (an Rc bump, not a deep copy) so this doesn't hold
                // a borrow of `self.stack` across the `self.stack.push`
                // below in the non-exhausted case.
                let top = self.stack.last().cloned();
                match top {
                    Some(Value::Iterator(state)) => {
                        let mut st = state.borrow_mut();
                        if st.1 < st.0.len() {
                            let item = st.0[st.1].clone();
                            st.1 += 1;
                            drop(st);
                            self.stack.push(item);
                        } else {
                            drop(st);
                            self.pop();
                            self.ip = inst.target();
                            advance = false;
                        }
                    }
                    other => {
                        self.fail(RuntimeErrorKind::Type(format!(
                            "FOR_ITER on non-iterator: {}",
                            other.map(|v| v.type_name().to_string()).unwrap_or_else(|| "<empty stack>".to_string())
                        )));
                        return self.running;
                    }
                }
            }

            OpCode::Call => {
                let Arg::Count(arity) = inst.arg else { unreachable!("Call always carries Count") };
                let mut args = Vec::with_capacity(arity);
                for _ in 0..arity {
                    args.push(self.pop());
                }
                args.reverse();
                let callee = self.pop();

                match callee {
                    Value::Function(func) => {
                        if args.len() != func.params.len() {
                            self.fail(RuntimeErrorKind::Type(format!(
                                "{} takes {} argument(s), got {}",
                                func.name,
                                func.params.len(),
                                args.len()
                            )));
                            return self.running;
                        }
                        let saved_vars = self.vars.clone();
                        for (param, value) in func.params.iter().zip(args.into_iter()) {
                            self.vars.insert(param.clone(), value);
                        }
                        self.call_frames.push(CallFrame {
                            return_ip: self.ip + 1,
                            saved_vars,
                            function: func,
                        });
                        self.ip = 0;
                        advance = false;
                    }
                    Value::HostObject(_) => match self.host.host_call(&callee, &args) {
                        Ok(CallOutcome::Return(v)) => self.stack.push(v),
                        Ok(CallOutcome::Yielded) => {
                            // Restore the stack exactly as it was before this
                            // CALL so the next `run` reattempts it unchanged.
                            self.stack.push(callee);
                            for arg in args {
                                self.stack.push(arg);
                            }
                            advance = false;
                        }
                        Err(_) => {
                            self.fail(RuntimeErrorKind::Type(format!(
                                "{} is not callable",
                                callee.type_name()
                            )));
                            return self.running;
                        }
                    },
                    other => {
                        self.fail(RuntimeErrorKind::Type(format!("{} is not callable", other.type_name())));
                        return self.running;
                    }
                }
            }
            OpCode::MakeFunction => {
                let Arg::FunctionIndex(idx) = inst.arg else {
                    unreachable!("MakeFunction always carries FunctionIndex")
                };
                let func = self.functions[idx].clone();
                self.stack.push(Value::Function(func));
            }
            OpCode::ReturnValue => {
                let value = self.pop();
                match self.pop_frame() {
                    Some(return_ip) => {
                        self.ip = return_ip;
                        self.stack.push(value);
                        advance = false;
                    }
                    None => {
                        // RETURN_VALUE at the top level: treat like HALT.
                        self.running = false;
                        self.halted = true;
                    }
                }
            }
        }

        if advance && self.running {
            self.ip += 1;
        }
        self.running
    }

    /// Implicit `return None` for a function whose body ran off the end
    /// without an explicit RETURN_VALUE. The compiler always appends one,
    /// so in practice this only guards against malformed programs built
    /// by hand (e.g. in tests).
    fn synthetic_return(&mut self) {
        self.stack.push(Value::None);
        match self.pop_frame() {
            Some(return_ip) => self.ip = return_ip,
            None => {
                self.running = false;
                self.halted = true;
            }
        }
    }

    /// Pop the innermost call frame and restore `vars` per the
    /// single-scope-limitation rule documented on `CallFrame`. Returns the
    /// `ip` execution should resume at, or `None` if there was no frame
    /// (a bare top-level return).
    fn pop_frame(&mut self) -> Option<usize> {
        let frame = self.call_frames.pop()?;
        let mut restored = frame.saved_vars;
        for (k, v) in self.vars.drain() {
            if restored.contains_key(&k) {
                restored.insert(k, v);
            }
        }
        self.vars = restored;
        Some(frame.return_ip)
    }

    /// Execute up to `budget` instructions, short-circuiting on halt/error.
    pub fn run(&mut self, budget: u32) -> bool {
        let mut executed = 0u32;
        for _ in 0..budget {
            if !self.step() {
                break;
            }
            executed += 1;
        }
        tracing::debug!(budget, executed, still_running = self.running, "run budget exhausted");
        self.running
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("compiler maintains stack discipline")
    }

    fn load_constant(&self, idx: usize) -> Value {
        match self.program.get_constant(idx) {
            Some(Constant::None) | None => Value::None,
            Some(Constant::Bool(b)) => Value::Bool(*b),
            Some(Constant::Num(n)) => Value::Num(*n),
            Some(Constant::Str(s)) => Value::from_str(s),
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

fn arg_name(arg: &Arg) -> &str {
    match arg {
        Arg::Name(n) => n,
        _ => unreachable!("expected a Name arg"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::ScriptedHost;
    use unitscript_codegen::compile_default;

    fn run_to_halt(source: &str) -> VM {
        let program = compile_default(source);
        assert!(program.is_ok(), "unexpected compile errors: {:?}", program.diagnostics);
        let mut vm = VM::new();
        vm.load(program);
        vm.run(10_000);
        vm
    }

    #[test]
    fn test_arithmetic_expression() {
        let vm = run_to_halt("x = (2 + 3) * 4 - 6 / 2\n");
        assert_eq!(vm.vars().get("x"), Some(&Value::Num(17.0)));
    }

    #[test]
    fn test_fibonacci_while_loop() {
        let src = "a = 0\nb = 1\ncount = 0\nwhile count < 10:\n    temp = a\n    a = b\n    b = temp + b\n    count = count + 1\n";
        let vm = run_to_halt(src);
        assert_eq!(vm.vars().get("a"), Some(&Value::Num(55.0)));
    }

    #[test]
    fn test_for_loop_sum_of_squares() {
        let src = "total = 0\nfor i in [1, 2, 3, 4, 5]:\n    total = total + i * i\n";
        let vm = run_to_halt(src);
        assert_eq!(vm.vars().get("total"), Some(&Value::Num(55.0)));
    }

    #[test]
    fn test_recursive_factorial() {
        let src = "def factorial(n):\n    if n <= 1:\n        return 1\n    return n * factorial(n - 1)\nx = factorial(5)\n";
        let vm = run_to_halt(src);
        assert_eq!(vm.vars().get("x"), Some(&Value::Num(120.0)));
    }

    #[test]
    fn test_continue_skips_one_iteration() {
        let src = "x = 0\nhits = []\nwhile x < 5:\n    x = x + 1\n    if x == 3:\n        continue\n";
        let vm = run_to_halt(src);
        assert_eq!(vm.vars().get("x"), Some(&Value::Num(5.0)));
    }

    #[test]
    fn test_host_function_called_exactly_once() {
        use unitscript_sema::TypeTag;
        let program = unitscript_codegen::compile(
            "x = myFunc(21)\n",
            TypeTag::Any,
            HashMap::from([("myFunc".to_string(), TypeTag::Any)]),
        );
        assert!(program.is_ok(), "unexpected compile errors: {:?}", program.diagnostics);

        let mut host = ScriptedHost::new();
        let handle = host.install(|args| Value::Num(args[0].as_num().unwrap() * 2.0));
        let call_counts = host.call_counts();

        let mut vm = VM::new().with_host(Box::new(host));
        vm.load(program);
        vm.set_environment(HashMap::from([("myFunc".to_string(), handle.clone())]));
        vm.run(10_000);
        assert_eq!(vm.vars().get("x"), Some(&Value::Num(42.0)));
        assert_eq!(call_counts.get(&handle), 1);
    }

    #[test]
    fn test_budgeted_run_completes_within_ceiling() {
        let src = "total = 0\ni = 0\nwhile i < 100:\n    total = total + i\n    i = i + 1\n";
        let program = compile_default(src);
        let mut vm = VM::new();
        vm.load(program.clone());
        let total_instructions = program.code.len();
        let budget = 50u32;
        let max_calls = (total_instructions as u32).div_ceil(budget);
        let mut calls = 0;
        loop {
            let still_running = vm.run(budget);
            calls += 1;
            if !still_running {
                break;
            }
            assert!(calls <= max_calls, "exceeded expected call ceiling");
        }
        assert!(vm.get_state().halted);
    }

    #[test]
    fn test_restart_resets_ip_and_stack() {
        let program = compile_default("x = 1\n");
        let mut vm = VM::new();
        vm.load(program);
        vm.run(1);
        assert_ne!(vm.get_state().ip, 0);
        vm.start();
        assert_eq!(vm.get_state().ip, 0);
        assert_eq!(vm.get_state().stack_depth, 0);
    }

    #[test]
    fn test_division_by_zero_produces_infinity_not_error() {
        let vm = run_to_halt("x = 1 / 0\n");
        match vm.vars().get("x") {
            Some(Value::Num(n)) => assert!(n.is_infinite()),
            other => panic!("expected infinity, got {:?}", other),
        }
    }

    #[test]
    fn test_index_out_of_range_sets_error_and_halts() {
        let program = compile_default("xs = [1, 2]\ny = xs[5]\n");
        let mut vm = VM::new();
        vm.load(program);
        vm.run(10_000);
        let state = vm.get_state();
        assert!(state.halted);
        assert!(!state.running);
        assert!(matches!(
            state.error.unwrap().kind,
            RuntimeErrorKind::Index
        ));
    }
}
