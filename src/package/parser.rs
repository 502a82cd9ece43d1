//! Package parser: validates an assembled package's header and descriptor
//! table and hands back byte slices for each component's payload.
//!
//! Mirrors the bootloader's own parse path closely enough that anything
//! this module accepts, the bootloader accepts too.

use std::fs;
use std::path::Path;

use crate::codec::{parse_descriptor, parse_outer_header, DescriptorRecord, OuterHeader};
use crate::config::{DESCRIPTOR_SIZE, HEADER_SIZE};
use crate::error::{OtaError, Result};

/// A fully validated package: header plus an ordered descriptor table.
/// Does not itself own the payload bytes; callers slice them out of the
/// buffer they parsed from via [`ParsedPackage::component`].
#[derive(Debug, Clone)]
pub struct ParsedPackage {
    pub header: OuterHeader,
    pub entries: Vec<DescriptorRecord>,
}

impl ParsedPackage {
    /// Find the descriptor tagged with `magic`, if present.
    pub fn find(&self, magic: [u8; 3]) -> Option<&DescriptorRecord> {
        self.entries.iter().find(|e| e.magic == magic)
    }

    /// Slice out one component's payload from the buffer this package was
    /// parsed from. `data` must be the exact bytes passed to
    /// [`parse_package`].
    pub fn component<'a>(&self, data: &'a [u8], magic: [u8; 3]) -> Result<&'a [u8]> {
        let entry = self.find(magic).ok_or(OtaError::MissingComponent {
            magic,
            which: "package",
        })?;
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        data.get(start..end).ok_or(OtaError::Truncated {
            need: end,
            have: data.len(),
        })
    }
}

/// Parse a package already held in memory.
///
/// Validates the outer header, confirms `header_length` implies a whole
/// number of descriptor records, and range-checks every descriptor's
/// `offset + length` against the buffer. Does not validate payload
/// content (compression framing, diff-stream structure); callers that
/// need that hand the sliced payload to [`crate::compression`] or
/// [`crate::chunker`].
pub fn parse_package(data: &[u8]) -> Result<ParsedPackage> {
    let header = parse_outer_header(data)?;

    if (header.header_length as usize) < HEADER_SIZE {
        return Err(OtaError::InconsistentHeader {
            header_length: header.header_length,
            remainder: 0,
        });
    }
    let table_bytes = header.header_length as usize - HEADER_SIZE;
    if table_bytes % DESCRIPTOR_SIZE != 0 {
        return Err(OtaError::InconsistentHeader {
            header_length: header.header_length,
            remainder: table_bytes % DESCRIPTOR_SIZE,
        });
    }
    let count = table_bytes / DESCRIPTOR_SIZE;

    if data.len() < header.header_length as usize {
        return Err(OtaError::Truncated {
            need: header.header_length as usize,
            have: data.len(),
        });
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let start = HEADER_SIZE + i * DESCRIPTOR_SIZE;
        let end = start + DESCRIPTOR_SIZE;
        let entry = parse_descriptor(&data[start..end])?;

        let payload_end = entry.offset as usize + entry.length as usize;
        if payload_end > data.len() {
            return Err(OtaError::Truncated {
                need: payload_end,
                have: data.len(),
            });
        }
        entries.push(entry);
    }

    let expected_payload_end = header.header_length as usize + header.payload_length as usize;
    if data.len() < expected_payload_end {
        return Err(OtaError::Truncated {
            need: expected_payload_end,
            have: data.len(),
        });
    }

    Ok(ParsedPackage { header, entries })
}

/// Read a package from disk and parse it, returning the parsed structure
/// alongside the raw bytes it references.
pub fn read_package(path: &Path) -> Result<(ParsedPackage, Vec<u8>)> {
    let data = fs::read(path).map_err(|e| OtaError::io(path, e))?;
    let parsed = parse_package(&data)?;
    Ok((parsed, data))
}
