use serde::{Deserialize, Serialize};

use crate::opcode::OpCode;

/// The operand an instruction carries. Which variant is valid for a given
/// `OpCode` is fixed by the opcode table; the compiler is responsible for
/// only ever constructing the matching pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    /// No operand (e.g. `GET_INDEX`, `HALT`).
    None,
    /// Index into the program's constant pool.
    Const(usize),
    /// A variable or attribute name (`LOAD_VAR`, `STORE_VAR`, `LOAD_ATTR`).
    Name(String),
    /// An absolute instruction index, not a relative offset.
    Target(usize),
    /// An element count (`BUILD_LIST`) or argument arity (`CALL`).
    Count(usize),
    /// Index into the program's nested-function pool (`MAKE_FUNCTION`).
    FunctionIndex(usize),
}

/// A single bytecode instruction: {op, arg, line}.
///
/// `line` is the 1-based source line the instruction was compiled from,
/// carried through for diagnostics and debuggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    pub arg: Arg,
    pub line: u32,
}

impl Instruction {
    pub fn new(op: OpCode, arg: Arg, line: u32) -> Self {
        Self { op, arg, line }
    }

    pub fn bare(op: OpCode, line: u32) -> Self {
        Self::new(op, Arg::None, line)
    }

    pub fn const_ref(idx: usize, line: u32) -> Self {
        Self::new(OpCode::LoadConst, Arg::Const(idx), line)
    }

    pub fn name(op: OpCode, name: impl Into<String>, line: u32) -> Self {
        Self::new(op, Arg::Name(name.into()), line)
    }

    pub fn jump(op: OpCode, target: usize, line: u32) -> Self {
        Self::new(op, Arg::Target(target), line)
    }

    pub fn count(op: OpCode, n: usize, line: u32) -> Self {
        Self::new(op, Arg::Count(n), line)
    }

    /// Read the target out of a jump-family instruction; panics on any
    /// other opcode, since only the compiler's backpatcher should call this.
    pub fn target(&self) -> usize {
        match self.arg {
            Arg::Target(t) => t,
            _ => panic!("{} instruction has no jump target", self.op),
        }
    }

    /// Overwrite a jump-family instruction's target in place. Used by the
    /// compiler's backpatcher once the real jump destination is known.
    pub fn set_target(&mut self, target: usize) {
        self.arg = Arg::Target(target);
    }
}

/// Debugger textual form per the external-interfaces contract: `<line>:
/// <op> <arg?>`, the arg omitted entirely when the opcode carries none.
impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.arg {
            Arg::None => write!(f, "{}: {}", self.line, self.op),
            Arg::Const(i) => write!(f, "{}: {} {}", self.line, self.op, i),
            Arg::Name(n) => write!(f, "{}: {} {}", self.line, self.op, n),
            Arg::Target(t) => write!(f, "{}: {} {}", self.line, self.op, t),
            Arg::Count(n) => write!(f, "{}: {} {}", self.line, self.op, n),
            Arg::FunctionIndex(i) => write!(f, "{}: {} {}", self.line, self.op, i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_instruction() {
        let inst = Instruction::bare(OpCode::Halt, 1);
        assert_eq!(inst.op, OpCode::Halt);
        assert_eq!(inst.arg, Arg::None);
    }

    #[test]
    fn test_jump_target_mutation_for_backpatching() {
        let mut inst = Instruction::jump(OpCode::Jump, 0, 3);
        assert_eq!(inst.target(), 0);
        inst.set_target(42);
        assert_eq!(inst.target(), 42);
    }

    #[test]
    fn test_const_ref_carries_index() {
        let inst = Instruction::const_ref(7, 5);
        assert_eq!(inst.arg, Arg::Const(7));
    }
}
