//! Expression tree and machine-block representation.
//!
//! This module defines the input language of the compiler (literals, symbols,
//! calls, and the structural control-flow forms) together with the forms only
//! the compiler emits (`Pause`, `Goto`, `MBlock`). The compiler rewrites the
//! former into flat sequences of the latter.

mod types;
pub use types::*;
