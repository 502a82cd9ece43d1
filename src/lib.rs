pub mod chunker;
pub mod codec;
pub mod compression;
pub mod config;
pub mod diff;
pub mod error;
pub mod package;

pub use compression::{Compressor, Lz4Compressor};
pub use config::{BoardDefinition, Descriptor, DescriptorRuntime, PackageConfig, PackageIdentity};
pub use diff::{BsdiffDiffer, Differ};
pub use error::{OtaError, Result};
pub use package::{
    build_incremental_package, build_package, parse_package, read_package, BuildOptions,
    IncrementalOptions, ParsedPackage,
};
