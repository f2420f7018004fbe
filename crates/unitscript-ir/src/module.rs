use serde::{Deserialize, Serialize};
use unitscript_common::CompileError;

use crate::instruction::Instruction;

/// A literal value in the constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Num(f64),
    Str(String),
}

/// A compiled function body.
///
/// The data model describes a function as a nested `Program` record; in
/// practice a function shares its enclosing program's constant pool rather
/// than carrying a duplicate one, so this only holds what's specific to the
/// function: its name, parameter list, and code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub code: Vec<Instruction>,
}

/// The output of compilation and the input to the VM.
///
/// `code` always ends with `HALT`. `functions` is indexed by
/// `Arg::FunctionIndex` operands on `MAKE_FUNCTION` instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub functions: Vec<Function>,
    pub diagnostics: Vec<CompileError>,
}

impl Program {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn get_constant(&self, idx: usize) -> Option<&Constant> {
        self.constants.get(idx)
    }

    pub fn get_function(&self, idx: usize) -> Option<&Function> {
        self.functions.get(idx)
    }

    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder used by the compiler to construct a `Program` incrementally,
/// deduplicating constants as they're added.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            program: Program::new(),
        }
    }

    /// Add a constant, returning its index. Identical constants are
    /// deduplicated so repeated literals share one pool slot.
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        if let Some(idx) = self
            .program
            .constants
            .iter()
            .position(|existing| *existing == constant)
        {
            return idx;
        }
        let idx = self.program.constants.len();
        self.program.constants.push(constant);
        idx
    }

    pub fn add_function(&mut self, function: Function) -> usize {
        let idx = self.program.functions.len();
        self.program.functions.push(function);
        idx
    }

    pub fn push_diagnostic(&mut self, error: CompileError) {
        self.program.diagnostics.push(error);
    }

    pub fn set_code(&mut self, code: Vec<Instruction>) {
        self.program.code = code;
    }

    pub fn build(self) -> Program {
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_dedup() {
        let mut builder = ProgramBuilder::new();
        let idx1 = builder.add_constant(Constant::Str("hello".into()));
        let idx2 = builder.add_constant(Constant::Str("hello".into()));
        assert_eq!(idx1, idx2);
        assert_eq!(builder.program.constants.len(), 1);
    }

    #[test]
    fn test_distinct_constants_get_distinct_slots() {
        let mut builder = ProgramBuilder::new();
        let a = builder.add_constant(Constant::Num(1.0));
        let b = builder.add_constant(Constant::Num(2.0));
        assert_ne!(a, b);
    }
}
