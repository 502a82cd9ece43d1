//! Full package builder: assembles an outer header,
//! descriptor table, and (optionally compressed) component payloads into
//! one container.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::codec::{serialize_descriptor, serialize_outer_header, DescriptorRecord, OuterHeader};
use crate::chunker::ChunkManifest;
use crate::compression::Compressor;
use crate::config::{
    Descriptor, DescriptorRuntime, PackageConfig, DESCRIPTOR_SIZE, HEADER_SIZE, HEADER_VERSION,
};
use crate::error::{OtaError, Result};

/// Options controlling how a full package is assembled.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Entropy-compress each raw component before writing it. Ignored
    /// when `incremental` is set (incremental payloads are already
    /// diff-stream bytes, never independently compressed here).
    pub compression: bool,
    /// Payloads are pre-produced diff streams written by the incremental
    /// builder, read verbatim from `Descriptor::source_path`.
    pub incremental: bool,
    /// If set, write a sibling JSON description document.
    pub description_file: Option<PathBuf>,
}

fn ratio5(num: u64, den: u64) -> String {
    if den == 0 {
        return "0.00000".to_string();
    }
    format!("{:.5}", num as f64 / den as f64)
}

#[derive(Debug, Clone, Serialize)]
struct HeaderDescription {
    header_version: u8,
    header_length: u16,
    platform: u16,
    crc: u32,
    payload_length: u32,
    payload_original_length: u64,
    ratio: String,
    version: u32,
    min_version: u32,
    app_min_version: u32,
}

#[derive(Debug, Clone, Serialize)]
struct BinaryDescription {
    magic: String,
    #[serde(rename = "type")]
    type_: u8,
    version: u32,
    offset: u32,
    length: u64,
    length_compressed: u64,
    ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    patch: Option<ChunkManifest>,
}

#[derive(Debug, Clone, Serialize)]
struct MetricsDescription {
    size: u64,
    size_compressed: u64,
    size_original: u64,
    gain_vs_compressed: i64,
    gain_vs_original: i64,
}

#[derive(Debug, Clone, Serialize)]
struct PackageDescriptionInner {
    project: String,
    board: String,
    chip: String,
    incremental: bool,
    header: HeaderDescription,
    binaries: Vec<BinaryDescription>,
    metrics: MetricsDescription,
}

#[derive(Debug, Clone, Serialize)]
struct PackageDescription {
    package: PackageDescriptionInner,
}

/// Assemble a full package from `descriptors` into
/// `cfg.output_directory/out_file`.
///
/// Each descriptor's `runtime` field is populated as a side effect, so
/// callers can inspect per-component size/ratio metrics after the call
/// returns.
pub fn build_package(
    descriptors: &mut [Descriptor],
    cfg: &PackageConfig,
    opts: &BuildOptions,
    out_file: &str,
    compressor: &dyn Compressor,
) -> Result<()> {
    let header_length = (HEADER_SIZE + DESCRIPTOR_SIZE * descriptors.len()) as u16;
    let out_path = cfg.output_directory.join(out_file);

    info!("writing package to {}", out_path.display());
    let mut out = File::create(&out_path).map_err(|e| OtaError::io(&out_path, e))?;
    out.seek(SeekFrom::Start(header_length as u64))
        .map_err(|e| OtaError::io(&out_path, e))?;

    let mut records = Vec::with_capacity(descriptors.len());
    let mut payload_length: u64 = 0;
    let mut payload_original_length: u64 = 0;
    let mut offset: u64 = 0;

    for desc in descriptors.iter_mut() {
        let payload = read_payload(desc, opts, compressor)?;
        let length = payload.len() as u64;

        let (runtime, original_length) = if opts.incremental {
            let patch = match &desc.runtime {
                Some(DescriptorRuntime::Incremental { patch }) => patch.clone(),
                _ => {
                    return Err(OtaError::InvalidConfig(format!(
                        "component {:?} has no diff manifest attached before incremental build",
                        desc.magic
                    )))
                }
            };
            let original = patch.size_original;
            (DescriptorRuntime::Incremental { patch }, original)
        } else if opts.compression {
            (
                DescriptorRuntime::Compressed {
                    length: 0,
                    length_compressed: length as u32,
                    ratio: 0.0,
                },
                0,
            )
        } else {
            (DescriptorRuntime::Raw { length: length as u32 }, length)
        };

        records.push((desc.magic, desc.type_, desc.version, offset as u32, length as u32));
        out.write_all(&payload).map_err(|e| OtaError::io(&out_path, e))?;

        offset += length;
        payload_length += length;

        desc.runtime = Some(runtime);
        payload_original_length += original_length;
    }

    // Fix up `Compressed` runtimes now that the true raw length is known
    // (read_payload already knows it; recompute here to keep a single
    // read-time borrow of `desc`).
    if opts.compression && !opts.incremental {
        for desc in descriptors.iter_mut() {
            if let Some(DescriptorRuntime::Compressed {
                length,
                length_compressed,
                ratio,
            }) = &desc.runtime
            {
                if *length == 0 {
                    let raw_len = fs::metadata(&desc.source_path)
                        .map_err(|e| OtaError::io(&desc.source_path, e))?
                        .len();
                    let new_ratio = *length_compressed as f64 / raw_len.max(1) as f64;
                    desc.runtime = Some(DescriptorRuntime::Compressed {
                        length: raw_len as u32,
                        length_compressed: *length_compressed,
                        ratio: new_ratio,
                    });
                }
            }
        }
        // payload_original_length must reflect the true raw lengths too.
        payload_original_length = descriptors
            .iter()
            .map(|d| match &d.runtime {
                Some(DescriptorRuntime::Compressed { length, .. }) => *length as u64,
                _ => 0,
            })
            .sum();
    }

    let header = OuterHeader {
        header_version: HEADER_VERSION,
        header_length,
        platform: 0,
        crc: 0,
        payload_length: payload_length as u32,
        version: 0,
        min_version: 0,
        app_min_version: 0,
    };

    out.seek(SeekFrom::Start(0)).map_err(|e| OtaError::io(&out_path, e))?;
    out.write_all(&serialize_outer_header(&header))
        .map_err(|e| OtaError::io(&out_path, e))?;
    for (magic, type_, version, rec_offset, length) in &records {
        let record = DescriptorRecord {
            magic: *magic,
            type_: *type_,
            version: *version,
            offset: *rec_offset,
            length: *length,
        };
        out.write_all(&serialize_descriptor(&record))
            .map_err(|e| OtaError::io(&out_path, e))?;
    }
    drop(out);

    if let Some(description_file) = &opts.description_file {
        write_description(
            descriptors,
            cfg,
            opts,
            &header,
            payload_original_length,
            description_file,
        )?;
    }

    let on_disk = fs::metadata(&out_path).map_err(|e| OtaError::io(&out_path, e))?.len();
    let expected = header_length as u64 + payload_length;
    debug!("check_package: {} == {}", on_disk, expected);
    if on_disk != expected {
        return Err(OtaError::InvalidConfig(format!(
            "package size mismatch: on-disk {on_disk} bytes, expected header_length + payload_length = {expected}"
        )));
    }

    Ok(())
}

fn read_payload(
    desc: &Descriptor,
    opts: &BuildOptions,
    compressor: &dyn Compressor,
) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    File::open(&desc.source_path)
        .and_then(|mut f| f.read_to_end(&mut raw))
        .map_err(|e| OtaError::io(&desc.source_path, e))?;

    if opts.incremental {
        Ok(raw)
    } else if opts.compression {
        compressor.compress(&raw)
    } else {
        Ok(raw)
    }
}

fn write_description(
    descriptors: &[Descriptor],
    cfg: &PackageConfig,
    opts: &BuildOptions,
    header: &OuterHeader,
    payload_original_length: u64,
    description_file: &Path,
) -> Result<()> {
    let mut binaries = Vec::with_capacity(descriptors.len());
    let mut total_size: u64 = 0;
    let mut total_size_compressed: u64 = 0;
    let mut total_size_original: u64 = 0;
    let mut total_gain_vs_compressed: i64 = 0;
    let mut total_gain_vs_original: i64 = 0;

    for (i, desc) in descriptors.iter().enumerate() {
        let offset = (0..i)
            .map(|j| match &descriptors[j].runtime {
                Some(DescriptorRuntime::Raw { length }) => *length as u64,
                Some(DescriptorRuntime::Compressed { length_compressed, .. }) => {
                    *length_compressed as u64
                }
                Some(DescriptorRuntime::Incremental { patch }) => {
                    // wire length equals the actual diff-stream bytes written,
                    // which may differ from the manifest's `size` when
                    // whole-file compression was recommended.
                    patch.size_patch
                }
                None => 0,
            })
            .sum::<u64>();

        let (length, length_compressed, ratio, patch) = match &desc.runtime {
            Some(DescriptorRuntime::Raw { length }) => (*length as u64, 0, "0.00000".to_string(), None),
            Some(DescriptorRuntime::Compressed {
                length,
                length_compressed,
                ratio,
            }) => (
                *length as u64,
                *length_compressed as u64,
                format!("{:.5}", ratio),
                None,
            ),
            Some(DescriptorRuntime::Incremental { patch }) => (
                patch.size_original,
                patch.size,
                "0.00000".to_string(),
                Some(patch.clone()),
            ),
            None => (0, 0, "0.00000".to_string(), None),
        };

        total_size_original += length;
        match &desc.runtime {
            Some(DescriptorRuntime::Incremental { patch }) => {
                total_size += patch.size;
                total_size_compressed += patch.size_compressed;
                total_gain_vs_compressed += patch.gain_vs_compressed;
                total_gain_vs_original += patch.gain_vs_original;
            }
            Some(DescriptorRuntime::Compressed { length_compressed, .. }) => {
                total_size += *length_compressed as u64;
                total_size_compressed += *length_compressed as u64;
            }
            Some(DescriptorRuntime::Raw { length }) => {
                total_size += *length as u64;
                total_size_compressed += *length as u64;
            }
            None => {}
        }

        binaries.push(BinaryDescription {
            magic: String::from_utf8_lossy(&desc.magic).to_string(),
            type_: desc.type_,
            version: desc.version,
            offset: offset as u32,
            length,
            length_compressed,
            ratio,
            patch,
        });
    }

    if !opts.incremental {
        total_gain_vs_original = payload_original_length as i64 - header.payload_length as i64;
        total_gain_vs_compressed = 0;
    }

    let identity = &cfg.identity;
    let board = identity
        .board
        .clone()
        .unwrap_or_else(|| format!("{}-all-boards", identity.chip));
    let project = identity
        .project
        .clone()
        .unwrap_or_else(|| format!("{}-all-projects", board));

    let description = PackageDescription {
        package: PackageDescriptionInner {
            project,
            board,
            chip: identity.chip.clone(),
            incremental: opts.incremental,
            header: HeaderDescription {
                header_version: header.header_version,
                header_length: header.header_length,
                platform: header.platform,
                crc: header.crc,
                payload_length: header.payload_length,
                payload_original_length,
                ratio: ratio5(header.payload_length as u64, payload_original_length),
                version: header.version,
                min_version: header.min_version,
                app_min_version: header.app_min_version,
            },
            binaries,
            metrics: MetricsDescription {
                size: total_size,
                size_compressed: total_size_compressed,
                size_original: total_size_original,
                gain_vs_compressed: total_gain_vs_compressed,
                gain_vs_original: total_gain_vs_original,
            },
        },
    };

    let value = serde_json::to_value(&description)
        .map_err(|e| OtaError::InvalidConfig(format!("description serialization failed: {e}")))?;
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| OtaError::InvalidConfig(format!("description serialization failed: {e}")))?;
    let path = cfg.output_directory.join(description_file);
    fs::write(&path, text).map_err(|e| OtaError::io(&path, e))?;
    Ok(())
}
