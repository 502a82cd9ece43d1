//! Chunked differential encoder: splits a pair of decompressed images
//! into fixed-size chunks, computes a binary patch for each mismatched
//! chunk, and picks per-chunk among three representations (KEEP,
//! COMPRESSED, COMPRESSED_PATCH) so total output is minimized.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::codec::{crc32, parse_chunk_header, serialize_chunk_header, ChunkHeaderRecord};
use crate::compression::Compressor;
use crate::config::{ChunkType, CHUNK_HEADER_SIZE, DEFAULT_CHUNK_SIZE, MAX_CHUNK_COUNT};
use crate::diff::Differ;
use crate::error::{OtaError, Result};

/// Configuration for one [`diff_files`] invocation.
#[derive(Debug, Clone)]
pub struct DiffConfig {
    pub chunk_size: usize,
    pub temp_directory: PathBuf,
    /// `None` uses rayon's default (CPU count) thread pool.
    pub threads: Option<usize>,
    pub verbose: bool,
    /// Whether to remove per-chunk temp files on success. Not required by
    /// the source behavior; off by default.
    pub cleanup: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            temp_directory: PathBuf::from("./tmp"),
            threads: None,
            verbose: false,
            cleanup: false,
        }
    }
}

/// One chunk's entry in the JSON manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRecord {
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(rename = "_type")]
    pub type_: u8,
    #[serde(rename = "_name")]
    pub name: String,
    pub crc_from: String,
    pub crc_to: String,
    pub crc_header: String,
    pub chunk_header: String,
    pub size_output: u64,
    pub size_input: u64,
    pub ratio: String,
    pub delta: i64,
}

/// Manifest emitted alongside a diff stream.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkManifest {
    pub chunk_size: usize,
    #[serde(rename = "_name")]
    pub name: String,
    pub size: u64,
    pub size_patch: u64,
    pub size_compressed: u64,
    pub size_original: u64,
    pub crc: String,
    pub gain_vs_original: i64,
    pub gain_vs_compressed: i64,
    pub ratio_vs_original: String,
    pub ratio_vs_compressed: String,
    pub chunks: BTreeMap<String, ChunkRecord>,
}

fn hex0x(v: u32) -> String {
    format!("0x{:x}", v)
}

fn ratio5(num: u64, den: u64) -> String {
    if den == 0 {
        return "0.00000".to_string();
    }
    format!("{:.5}", num as f64 / den as f64)
}

struct ChunkJob {
    id: i64,
    header_bytes: Vec<u8>,
    payload: Vec<u8>,
    type_: ChunkType,
    to_len: usize,
    temp_path: PathBuf,
}

fn chunk_slice(data: &[u8], chunk_size: usize, index: usize) -> &[u8] {
    let start = index * chunk_size;
    if start >= data.len() {
        return &[];
    }
    let end = (start + chunk_size).min(data.len());
    &data[start..end]
}

fn process_chunk(
    id: i64,
    o: &[u8],
    t: &[u8],
    temp_directory: &Path,
    compressor: &dyn Compressor,
    differ: &dyn Differ,
) -> Result<ChunkJob> {
    let from_crc = crc32(o) as i32;
    let to_crc = crc32(t) as i32;

    let (type_, payload) = if o == t {
        (ChunkType::Keep, Vec::new())
    } else {
        let patch = differ.diff(o, t)?;
        if patch.is_empty() {
            return Err(OtaError::ExternalFailure {
                adapter: "bsdiff",
                diagnostic: "patch was empty for distinct chunks".to_string(),
            });
        }
        let compressed_to = compressor.compress(t)?;
        let compressed_patch = compressor.compress(&patch)?;
        if compressed_to.len() <= compressed_patch.len() {
            (ChunkType::Compressed, compressed_to)
        } else {
            (ChunkType::CompressedPatch, compressed_patch)
        }
    };

    let size = if type_ == ChunkType::Keep {
        0
    } else {
        payload.len() as i32
    };

    let header = ChunkHeaderRecord {
        type_,
        id: id as i16,
        size,
        crc: 0,
        from_len: o.len() as i32,
        from_crc,
        to_len: t.len() as i32,
        to_crc,
    };
    let header_bytes = serialize_chunk_header(&header);

    let temp_path = temp_directory.join(format!("{}.{:05}", uuid::Uuid::new_v4(), id));
    let mut file = File::create(&temp_path).map_err(|e| OtaError::io(&temp_path, e))?;
    use std::io::Write;
    file.write_all(&header_bytes)
        .map_err(|e| OtaError::io(&temp_path, e))?;
    if type_ != ChunkType::Keep {
        file.write_all(&payload).map_err(|e| OtaError::io(&temp_path, e))?;
    }

    Ok(ChunkJob {
        id,
        header_bytes,
        payload,
        type_,
        to_len: t.len(),
        temp_path,
    })
}

/// Split `from` and `to` into fixed-size chunks, diff each mismatched
/// chunk, and write the concatenated chunk stream to `out_file` with a
/// parallel JSON manifest at `manifest_file`.
///
/// Returns `(use_patch, manifest)`: `use_patch` is `false` when whole-file
/// compression of `to` would have been smaller than the diff stream; the
/// diff stream file is written regardless.
pub fn diff_files(
    from: &Path,
    to: &Path,
    out_file: &Path,
    manifest_file: &Path,
    cfg: &DiffConfig,
    compressor: &dyn Compressor,
    differ: &dyn Differ,
) -> Result<(bool, ChunkManifest)> {
    if cfg.chunk_size == 0 {
        return Err(OtaError::InvalidConfig("chunk_size must be > 0".to_string()));
    }

    fs::create_dir_all(&cfg.temp_directory).map_err(|e| OtaError::io(&cfg.temp_directory, e))?;

    let from_file = File::open(from).map_err(|e| OtaError::io(from, e))?;
    let to_file = File::open(to).map_err(|e| OtaError::io(to, e))?;
    let from_mmap = unsafe { Mmap::map(&from_file).map_err(|e| OtaError::io(from, e))? };
    let to_mmap = unsafe { Mmap::map(&to_file).map_err(|e| OtaError::io(to, e))? };

    if from_mmap.is_empty() || to_mmap.is_empty() {
        return Err(OtaError::InvalidConfig(
            "diff inputs must both be non-empty".to_string(),
        ));
    }

    let from_hash = Sha256::digest(&from_mmap[..]);
    let to_hash = Sha256::digest(&to_mmap[..]);
    if from_hash == to_hash {
        return Err(OtaError::IdenticalInputs);
    }

    let chunk_size = cfg.chunk_size;
    let n = to_mmap.len().div_ceil(chunk_size);
    if n > MAX_CHUNK_COUNT {
        return Err(OtaError::InvalidConfig(format!(
            "{} chunks exceeds the 16-bit signed chunk id limit ({})",
            n, MAX_CHUNK_COUNT
        )));
    }

    info!("chunking {} into {} chunks of {} bytes", to.display(), n, chunk_size);
    let progress = if cfg.verbose {
        let bar = ProgressBar::new(n as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks ({eta})")
                .unwrap()
                .progress_chars("##-"),
        );
        Some(bar)
    } else {
        None
    };

    let run = |indices: std::ops::Range<usize>| -> Result<Vec<ChunkJob>> {
        indices
            .into_par_iter()
            .map(|x| {
                let o = chunk_slice(&from_mmap, chunk_size, x);
                let t = chunk_slice(&to_mmap, chunk_size, x);
                let result = process_chunk(x as i64, o, t, &cfg.temp_directory, compressor, differ);
                if let Some(bar) = &progress {
                    bar.inc(1);
                }
                result
            })
            .collect()
    };

    let jobs = if let Some(threads) = cfg.threads {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| OtaError::InvalidConfig(e.to_string()))?;
        pool.install(|| run(0..n))?
    } else {
        run(0..n)?
    };

    if let Some(bar) = &progress {
        bar.finish_with_message("chunking complete");
    }

    // Sequential assembly pass, strictly ascending id: `jobs` is already index-ordered because `into_par_iter().collect()`
    // preserves source order regardless of completion order.
    let mut out = File::create(out_file).map_err(|e| OtaError::io(out_file, e))?;
    use std::io::Write;
    let mut total_bytes: u64 = 0;
    let mut chunks = BTreeMap::new();

    for job in &jobs {
        let chunk_header_crc = crc32(&job.header_bytes);
        out.write_all(&job.header_bytes)
            .map_err(|e| OtaError::io(out_file, e))?;
        if job.type_ != ChunkType::Keep {
            out.write_all(&job.payload).map_err(|e| OtaError::io(out_file, e))?;
        }

        let header = parse_chunk_header(&job.header_bytes)?;
        let size_output = (CHUNK_HEADER_SIZE + job.payload.len()) as u64;
        total_bytes += size_output;

        let file_crc = {
            let mut buf = job.header_bytes.clone();
            buf.extend_from_slice(&job.payload);
            crc32(&buf)
        };

        chunks.insert(
            job.id.to_string(),
            ChunkRecord {
                id: job.id,
                type_: job.type_ as u8,
                name: job
                    .temp_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                crc_from: hex0x(header.from_crc as u32),
                crc_to: hex0x(header.to_crc as u32),
                crc_header: hex0x(chunk_header_crc),
                chunk_header: hex0x(file_crc),
                size_output,
                size_input: job.to_len as u64,
                ratio: ratio5(size_output, job.to_len as u64),
                delta: size_output as i64 - job.to_len as i64,
            },
        );
    }

    if cfg.cleanup {
        for job in &jobs {
            let _ = fs::remove_file(&job.temp_path);
        }
    }

    let to_bytes = &to_mmap[..];
    let to_len = to_bytes.len() as u64;
    let to_crc = crc32(to_bytes);
    let to_compressed = compressor.compress(to_bytes)?;
    let to_compressed_len = to_compressed.len() as u64;

    let use_patch = to_compressed_len > total_bytes;

    let (name, size, gain_vs_original, gain_vs_compressed, ratio_vs_original, ratio_vs_compressed) =
        if use_patch {
            (
                out_file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                total_bytes,
                to_len as i64 - total_bytes as i64,
                to_compressed_len as i64 - total_bytes as i64,
                ratio5(total_bytes, to_len),
                ratio5(total_bytes, to_compressed_len),
            )
        } else {
            (
                to.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                to_compressed_len,
                to_len as i64 - to_compressed_len as i64,
                0,
                ratio5(to_compressed_len, to_len),
                "1.00000".to_string(),
            )
        };

    let manifest = ChunkManifest {
        chunk_size,
        name,
        size,
        size_patch: total_bytes,
        size_compressed: to_compressed_len,
        size_original: to_len,
        crc: hex0x(to_crc),
        gain_vs_original,
        gain_vs_compressed,
        ratio_vs_original,
        ratio_vs_compressed,
        chunks,
    };

    let value = serde_json::to_value(&manifest)
        .map_err(|e| OtaError::InvalidConfig(format!("manifest serialization failed: {e}")))?;
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| OtaError::InvalidConfig(format!("manifest serialization failed: {e}")))?;
    fs::write(manifest_file, text).map_err(|e| OtaError::io(manifest_file, e))?;

    Ok((use_patch, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Lz4Compressor;
    use crate::diff::BsdiffDiffer;
    use std::io::Write as _;

    fn write_tmp(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn test_identical_inputs_rejected() {
        let dir = std::env::temp_dir().join(format!("ota_chunker_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let data = vec![0x42u8; 8192];
        let from = write_tmp(&dir, "from.bin", &data);
        let to = write_tmp(&dir, "to.bin", &data);

        let cfg = DiffConfig {
            temp_directory: dir.join("tmp"),
            ..Default::default()
        };
        let result = diff_files(
            &from,
            &to,
            &dir.join("out.bin"),
            &dir.join("out.json"),
            &cfg,
            &Lz4Compressor,
            &BsdiffDiffer,
        );
        assert!(matches!(result, Err(OtaError::IdenticalInputs)));
        assert!(!dir.join("out.bin").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_keep_and_patch_chunks() {
        let dir = std::env::temp_dir().join(format!("ota_chunker_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let from_data = vec![0x00u8; 8192];
        let mut to_data = vec![0x00u8; 4096];
        to_data.extend(vec![0x11u8; 4096]);

        let from = write_tmp(&dir, "from.bin", &from_data);
        let to = write_tmp(&dir, "to.bin", &to_data);

        let cfg = DiffConfig {
            chunk_size: 4096,
            temp_directory: dir.join("tmp"),
            ..Default::default()
        };

        let (_, manifest) = diff_files(
            &from,
            &to,
            &dir.join("out.bin"),
            &dir.join("out.json"),
            &cfg,
            &Lz4Compressor,
            &BsdiffDiffer,
        )
        .unwrap();

        assert_eq!(manifest.chunks.len(), 2);
        assert_eq!(manifest.chunks["0"].type_, ChunkType::Keep as u8);
        assert_ne!(manifest.chunks["1"].type_, ChunkType::Keep as u8);
        assert_eq!(manifest.chunks["0"].size_output, CHUNK_HEADER_SIZE as u64);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_diff_stream_headers_parse_back() {
        let dir = std::env::temp_dir().join(format!("ota_chunker_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let from_data: Vec<u8> = (0..8192).map(|i| (i % 251) as u8).collect();
        let mut to_data = from_data.clone();
        for b in to_data.iter_mut().skip(5000).take(500) {
            *b ^= 0xFF;
        }

        let from = write_tmp(&dir, "from.bin", &from_data);
        let to = write_tmp(&dir, "to.bin", &to_data);

        let cfg = DiffConfig {
            chunk_size: 4096,
            temp_directory: dir.join("tmp"),
            ..Default::default()
        };

        let (_, manifest) = diff_files(
            &from,
            &to,
            &dir.join("out.bin"),
            &dir.join("out.json"),
            &cfg,
            &Lz4Compressor,
            &BsdiffDiffer,
        )
        .unwrap();

        let stream = fs::read(dir.join("out.bin")).unwrap();
        let mut offset = 0;
        let mut seen = 0;
        while offset < stream.len() {
            let header = parse_chunk_header(&stream[offset..offset + CHUNK_HEADER_SIZE]).unwrap();
            let record = &manifest.chunks[&header.id.to_string()];
            assert_eq!(hex0x(header.from_crc as u32), record.crc_from);
            assert_eq!(hex0x(header.to_crc as u32), record.crc_to);
            offset += CHUNK_HEADER_SIZE + header.size.max(0) as usize;
            seen += 1;
        }
        assert_eq!(seen, manifest.chunks.len());

        fs::remove_dir_all(&dir).ok();
    }
}
