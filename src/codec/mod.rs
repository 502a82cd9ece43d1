//! Byte-exact codec for the outer package header, component descriptors, and
//! chunk headers. Serialization is little-endian, unpadded, and must match
//! bit-for-bit what the bootloader parses.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::config::{
    CHUNK_HEADER_MAGIC, CHUNK_HEADER_SIZE, CHUNK_HEADER_VERSION, ChunkType, DESCRIPTOR_SIZE,
    HEADER_MAGIC, HEADER_SIZE, HEADER_VERSION,
};
use crate::error::{OtaError, Result};

/// CRC-32/ISO-HDLC (the "standard" IEEE polynomial; identical bit pattern to
/// Python's `binascii.crc32`). Used for both chunk CRCs and header CRCs.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Parsed outer package header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeader {
    pub header_version: u8,
    pub header_length: u16,
    pub platform: u16,
    pub crc: u32,
    pub payload_length: u32,
    pub version: u32,
    pub min_version: u32,
    pub app_min_version: u32,
}

const OFF_MAGIC: usize = 0;
const OFF_HEADER_VERSION: usize = 3;
const OFF_HEADER_LENGTH: usize = 4;
const OFF_PLATFORM: usize = 6;
const OFF_CRC: usize = 8;
const OFF_PAYLOAD_LENGTH: usize = 12;
const OFF_VERSION: usize = 16;
const OFF_MIN_VERSION: usize = 20;
const OFF_APP_MIN_VERSION: usize = 24;

pub fn serialize_outer_header(header: &OuterHeader) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE];
    buf[OFF_MAGIC..OFF_MAGIC + 3].copy_from_slice(&HEADER_MAGIC);
    buf[OFF_HEADER_VERSION] = header.header_version;
    LittleEndian::write_u16(&mut buf[OFF_HEADER_LENGTH..], header.header_length);
    LittleEndian::write_u16(&mut buf[OFF_PLATFORM..], header.platform);
    LittleEndian::write_u32(&mut buf[OFF_CRC..], header.crc);
    LittleEndian::write_u32(&mut buf[OFF_PAYLOAD_LENGTH..], header.payload_length);
    LittleEndian::write_u32(&mut buf[OFF_VERSION..], header.version);
    LittleEndian::write_u32(&mut buf[OFF_MIN_VERSION..], header.min_version);
    LittleEndian::write_u32(&mut buf[OFF_APP_MIN_VERSION..], header.app_min_version);
    buf
}

pub fn parse_outer_header(data: &[u8]) -> Result<OuterHeader> {
    if data.len() < HEADER_SIZE {
        return Err(OtaError::Truncated {
            need: HEADER_SIZE,
            have: data.len(),
        });
    }

    if &data[OFF_MAGIC..OFF_MAGIC + 3] != HEADER_MAGIC {
        return Err(OtaError::BadMagic {
            expected: HEADER_MAGIC.to_vec(),
            got: data[OFF_MAGIC..OFF_MAGIC + 3].to_vec(),
        });
    }

    let header_version = data[OFF_HEADER_VERSION];
    if header_version != HEADER_VERSION {
        return Err(OtaError::UnsupportedVersion(header_version));
    }

    Ok(OuterHeader {
        header_version,
        header_length: LittleEndian::read_u16(&data[OFF_HEADER_LENGTH..]),
        platform: LittleEndian::read_u16(&data[OFF_PLATFORM..]),
        crc: LittleEndian::read_u32(&data[OFF_CRC..]),
        payload_length: LittleEndian::read_u32(&data[OFF_PAYLOAD_LENGTH..]),
        version: LittleEndian::read_u32(&data[OFF_VERSION..]),
        min_version: LittleEndian::read_u32(&data[OFF_MIN_VERSION..]),
        app_min_version: LittleEndian::read_u32(&data[OFF_APP_MIN_VERSION..]),
    })
}

/// Parsed on-disk component descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRecord {
    pub magic: [u8; 3],
    pub type_: u8,
    pub version: u32,
    pub offset: u32,
    pub length: u32,
}

const DOFF_MAGIC: usize = 0;
const DOFF_TYPE: usize = 3;
const DOFF_VERSION: usize = 4;
const DOFF_OFFSET: usize = 8;
const DOFF_LENGTH: usize = 12;

pub fn serialize_descriptor(desc: &DescriptorRecord) -> Vec<u8> {
    let mut buf = vec![0u8; DESCRIPTOR_SIZE];
    buf[DOFF_MAGIC..DOFF_MAGIC + 3].copy_from_slice(&desc.magic);
    buf[DOFF_TYPE] = desc.type_;
    LittleEndian::write_u32(&mut buf[DOFF_VERSION..], desc.version);
    LittleEndian::write_u32(&mut buf[DOFF_OFFSET..], desc.offset);
    LittleEndian::write_u32(&mut buf[DOFF_LENGTH..], desc.length);
    buf
}

pub fn parse_descriptor(data: &[u8]) -> Result<DescriptorRecord> {
    if data.len() < DESCRIPTOR_SIZE {
        return Err(OtaError::Truncated {
            need: DESCRIPTOR_SIZE,
            have: data.len(),
        });
    }

    let mut magic = [0u8; 3];
    magic.copy_from_slice(&data[DOFF_MAGIC..DOFF_MAGIC + 3]);

    Ok(DescriptorRecord {
        magic,
        type_: data[DOFF_TYPE],
        version: LittleEndian::read_u32(&data[DOFF_VERSION..]),
        offset: LittleEndian::read_u32(&data[DOFF_OFFSET..]),
        length: LittleEndian::read_u32(&data[DOFF_LENGTH..]),
    })
}

/// Parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeaderRecord {
    pub type_: ChunkType,
    pub id: i16,
    pub size: i32,
    pub crc: i32,
    pub from_len: i32,
    pub from_crc: i32,
    pub to_len: i32,
    pub to_crc: i32,
}

const COFF_MAGIC: usize = 0;
const COFF_VERSION: usize = 4;
const COFF_TYPE: usize = 5;
const COFF_ID: usize = 6;
const COFF_SIZE: usize = 8;
const COFF_CRC: usize = 12;
const COFF_FROM_LEN: usize = 16;
const COFF_FROM_CRC: usize = 20;
const COFF_TO_LEN: usize = 24;
const COFF_TO_CRC: usize = 28;

/// Serialize a chunk header, computing `crc` over the header bytes with the
/// `crc` field itself zeroed.
pub fn serialize_chunk_header(header: &ChunkHeaderRecord) -> Vec<u8> {
    let mut buf = vec![0u8; CHUNK_HEADER_SIZE];
    buf[COFF_MAGIC..COFF_MAGIC + 4].copy_from_slice(&CHUNK_HEADER_MAGIC);
    buf[COFF_VERSION] = CHUNK_HEADER_VERSION;
    buf[COFF_TYPE] = header.type_ as u8;
    LittleEndian::write_i16(&mut buf[COFF_ID..], header.id);
    LittleEndian::write_i32(&mut buf[COFF_SIZE..], header.size);
    // crc field left zeroed for the checksum pass below
    LittleEndian::write_i32(&mut buf[COFF_FROM_LEN..], header.from_len);
    LittleEndian::write_i32(&mut buf[COFF_FROM_CRC..], header.from_crc);
    LittleEndian::write_i32(&mut buf[COFF_TO_LEN..], header.to_len);
    LittleEndian::write_i32(&mut buf[COFF_TO_CRC..], header.to_crc);

    let header_crc = crc32(&buf) as i32;
    LittleEndian::write_i32(&mut buf[COFF_CRC..], header_crc);
    buf
}

pub fn parse_chunk_header(data: &[u8]) -> Result<ChunkHeaderRecord> {
    if data.len() < CHUNK_HEADER_SIZE {
        return Err(OtaError::Truncated {
            need: CHUNK_HEADER_SIZE,
            have: data.len(),
        });
    }

    if &data[COFF_MAGIC..COFF_MAGIC + 4] != CHUNK_HEADER_MAGIC {
        return Err(OtaError::BadMagic {
            expected: CHUNK_HEADER_MAGIC.to_vec(),
            got: data[COFF_MAGIC..COFF_MAGIC + 4].to_vec(),
        });
    }

    let version = data[COFF_VERSION];
    if version != CHUNK_HEADER_VERSION {
        return Err(OtaError::UnsupportedVersion(version));
    }

    let type_ = ChunkType::from_u8(data[COFF_TYPE])
        .ok_or_else(|| OtaError::InvalidConfig(format!("unknown chunk type {}", data[COFF_TYPE])))?;

    let crc_field = LittleEndian::read_i32(&data[COFF_CRC..]);
    let mut zeroed = data[..CHUNK_HEADER_SIZE].to_vec();
    LittleEndian::write_i32(&mut zeroed[COFF_CRC..], 0);
    let computed = crc32(&zeroed) as i32;
    if computed != crc_field {
        return Err(OtaError::InvalidConfig(format!(
            "chunk header crc mismatch: expected 0x{:x}, got 0x{:x}",
            crc_field as u32, computed as u32
        )));
    }

    Ok(ChunkHeaderRecord {
        type_,
        id: LittleEndian::read_i16(&data[COFF_ID..]),
        size: LittleEndian::read_i32(&data[COFF_SIZE..]),
        crc: crc_field,
        from_len: LittleEndian::read_i32(&data[COFF_FROM_LEN..]),
        from_crc: LittleEndian::read_i32(&data[COFF_FROM_CRC..]),
        to_len: LittleEndian::read_i32(&data[COFF_TO_LEN..]),
        to_crc: LittleEndian::read_i32(&data[COFF_TO_CRC..]),
    })
}
