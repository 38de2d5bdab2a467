//! xrfc - Ahead-of-time compiler for the XRF esoteric language.
//!
//! XRF programs are whitespace-separated groups of five hex digits; each
//! group is a chunk of stack commands, and control flow is an implicit jump
//! to the chunk whose index sits on top of the stack. This crate translates
//! XRF source into LLVM IR implementing exactly those semantics.
//!
//! # Pipeline
//!
//! ```ignore
//! use inkwell::context::Context;
//! use xrfc::{codegen, opt, parser};
//!
//! let chunks = parser::parse_source(source)?;
//! let chunks = opt::optimize_program(&opt::optimize_chunks(&chunks));
//!
//! let context = Context::create();
//! let module = codegen::generate(&context, &chunks)?;
//! module.print_to_file("out.ll")?;
//! ```
//!
//! # Architecture
//!
//! - [`parser`] - groups hex digits into fixed-size chunks with positional
//!   error accumulation
//! - [`opt`] - per-chunk abstract stack interpretation and program-level
//!   chunk fusion
//! - [`codegen`] - lowers the chunk list to an LLVM module with a single
//!   dispatcher block realizing the computed jump

pub mod codegen;
pub mod error;
pub mod ir;
pub mod opt;
pub mod parser;
pub mod reader;

pub use codegen::generate;
pub use error::{CodegenError, CodegenResult};
pub use ir::{Chunk, Command, COMMANDS_PER_CHUNK};
pub use opt::{optimize_chunks, optimize_program};
pub use parser::{parse_source, ParseError, ParseErrorKind};
