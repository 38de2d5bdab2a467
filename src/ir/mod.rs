//! The compiler's intermediate representation of an XRF program.
//!
//! XRF source is a sequence of whitespace-separated chunks, each exactly
//! [`COMMANDS_PER_CHUNK`] hex digits. The parser produces one [`Chunk`] per
//! group; the optimizer may rewrite a chunk's commands into shorter synthetic
//! sequences and record a statically known successor.

pub mod chunk;
pub mod command;

pub use self::chunk::{Chunk, COMMANDS_PER_CHUNK};
pub use self::command::Command;
