pub mod errors;
pub mod span;

pub use errors::{CompileError, CompileErrorKind, RuntimeError, RuntimeErrorKind};
pub use span::Span;
