pub mod compiler;

pub use compiler::{compile, compile_default};
