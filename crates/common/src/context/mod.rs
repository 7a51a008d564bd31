//! Context assembly
//!
//! Turns ranked candidates into the reference block sent to the model,
//! bounded by a token budget, and records a citation for every passage used.

mod packer;

pub use packer::{format_entry, Citation, ContextPacker, PackedContext, UnmeasuredPolicy};
