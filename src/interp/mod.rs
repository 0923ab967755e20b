//! file: src/interp/mod.rs
//! description: interpreter public surface.

pub mod err;
pub mod exec;
pub mod frame;
pub mod runtime;
pub mod value;

pub use err::InterpError;
pub use exec::{Interpreter, Unwind};
pub use frame::FrameId;
pub use runtime::{intern, CoreRuntime, Runtime};
pub use value::RtValue;
