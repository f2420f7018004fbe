pub mod instruction;
pub mod module;
pub mod opcode;

pub use instruction::{Arg, Instruction};
pub use module::{Constant, Function, Program, ProgramBuilder};
pub use opcode::OpCode;
