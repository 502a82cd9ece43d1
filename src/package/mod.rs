//! Assembly and disassembly of the outer package container: the full
//! package builder, the incremental package builder, and the parser both
//! consume.

pub mod builder;
pub mod incremental;
pub mod parser;

pub use builder::{build_package, BuildOptions};
pub use incremental::{build_incremental_package, IncrementalOptions};
pub use parser::{parse_package, read_package, ParsedPackage};
