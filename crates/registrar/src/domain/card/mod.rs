pub mod assembler;
pub mod renderer;

pub use assembler::{assemble_document, AssembleError};
pub use renderer::{CardRenderer, CardTheme, RenderError};
