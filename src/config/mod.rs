use std::path::PathBuf;

use serde::Serialize;

use crate::chunker::ChunkManifest;

/// Outer package header magic, "OTA".
pub const HEADER_MAGIC: [u8; 3] = *b"OTA";
pub const HEADER_VERSION: u8 = 1;
/// Fixed width of the outer package header, in bytes.
pub const HEADER_SIZE: usize = 28;
/// Fixed width of one on-disk component descriptor, in bytes.
pub const DESCRIPTOR_SIZE: usize = 16;

/// Chunk header magic, "C!K$".
pub const CHUNK_HEADER_MAGIC: [u8; 4] = *b"C!K$";
pub const CHUNK_HEADER_VERSION: u8 = 1;
/// Fixed width of one chunk header, in bytes.
pub const CHUNK_HEADER_SIZE: usize = 32;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// A chunk id is a 16-bit signed integer on the wire; packages
/// that would need more chunks than this are rejected before encoding.
pub const MAX_CHUNK_COUNT: usize = i16::MAX as usize;

/// Per-chunk representation selected to minimize output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ChunkType {
    Keep = 1,
    Compressed = 2,
    CompressedPatch = 3,
}

impl ChunkType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Keep),
            2 => Some(Self::Compressed),
            3 => Some(Self::CompressedPatch),
            _ => None,
        }
    }
}

/// Runtime data computed while building a package, attached to a
/// [`Descriptor`] once its payload has been produced.
///
/// Replaces the source's untyped `{"length": ..., "ratio": ...}` dict
/// entries with a sum type tagged by which
/// package mode produced it.
#[derive(Debug, Clone)]
pub enum DescriptorRuntime {
    /// Raw, uncompressed payload.
    Raw { length: u32 },
    /// Entropy-compressed payload (full package, `compression = true`).
    Compressed {
        length: u32,
        length_compressed: u32,
        ratio: f64,
    },
    /// Diff-stream payload (incremental package), carrying the chunked
    /// encoder's manifest for this component.
    Incremental { patch: ChunkManifest },
}

/// A logical firmware image participating in a package.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// 3-byte ASCII tag identifying the image class, e.g. `b"ARC"`.
    pub magic: [u8; 3],
    /// Small integer echoing the tag for the bootloader.
    pub type_: u8,
    /// Where to read the raw image (or, in incremental mode, where the
    /// diff stream for this component will be written/read).
    pub source_path: PathBuf,
    /// Always 0 in this revision, retained in the on-disk layout.
    pub version: u32,
    /// Filled in once the descriptor's payload has been produced.
    pub runtime: Option<DescriptorRuntime>,
}

impl Descriptor {
    pub fn new(magic: [u8; 3], type_: u8, source_path: impl Into<PathBuf>) -> Self {
        Self {
            magic,
            type_,
            source_path: source_path.into(),
            version: 0,
            runtime: None,
        }
    }
}

/// Package-level metadata mirrored into the description JSON.
#[derive(Debug, Clone, Default)]
pub struct PackageIdentity {
    pub project: Option<String>,
    pub board: Option<String>,
    pub chip: String,
}

/// Configuration shared by the full package builder (E) and incremental
/// package builder (G).
#[derive(Debug, Clone)]
pub struct PackageConfig {
    pub platform: u16,
    pub version: u32,
    pub min_version: u32,
    pub app_min_version: u32,
    pub output_directory: PathBuf,
    pub input_directory: PathBuf,
    pub identity: PackageIdentity,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            platform: 0,
            version: 0,
            min_version: 0,
            app_min_version: 0,
            output_directory: PathBuf::from("."),
            input_directory: PathBuf::from("."),
            identity: PackageIdentity::default(),
        }
    }
}

/// A named, ordered list of [`Descriptor`] prototypes for one chip/board.
///
/// Stands in for chip-/board-/project-level configuration that lives
/// outside this crate in a real deployment; only the CLI demo binary
/// constructs one of these, never the library core.
pub struct BoardDefinition {
    pub name: &'static str,
    pub components: Vec<(&'static str, u8, &'static str)>,
}

/// Board definitions bundled for the CLI demo, mirroring
/// `OtaCuriePackage`/`OtaCuriePackageIncremental` from the original Curie
/// build scripts.
pub fn curie_board() -> BoardDefinition {
    BoardDefinition {
        name: "curie",
        components: vec![
            ("ARC", 0, "arc.bin"),
            ("QRK", 1, "quark.signed.bin"),
            ("BLE", 2, "ble_core/image.bin"),
        ],
    }
}
