//! # class-organizer
//!
//! Infers the coarsest legal package partition of compiled Java classes from
//! the cross-class references baked into their bytecode.
//!
//! ## Architecture
//!
//! - **scan**: Class-file discovery under directories and inside jars
//! - **reader**: Bounds-checked byte cursor over raw class-file data
//! - **pool**: Constant pool parsing and typed entry access
//! - **decode**: Class-file decoding into the structured class model
//! - **model**: Flat read-only view of one decoded class
//! - **extract**: Exhaustive symbolic-reference extraction per class
//! - **access**: Member-visibility index and per-class access info
//! - **partition**: Disjoint class groups with merge, compaction, folding
//! - **organize**: Visibility-driven resolution of references into merges
//! - **cli**: Command-line interface definition

pub mod access;
pub mod cli;
pub mod decode;
pub mod extract;
pub mod model;
pub mod organize;
pub mod partition;
pub mod pool;
pub mod reader;
pub mod scan;
