//! Snapshot file format used by [`FileBackend`](crate::FileBackend)
//!
//! # Format
//!
//! ```text
//! +------------------+
//! | Magic: "KOYA"    | 4 bytes
//! | Format Version   | 4 bytes (u32 LE)
//! | Generation       | 8 bytes (u64 LE)
//! | Entry Count      | 4 bytes (u32 LE)
//! | Entries          | variable
//! |   Key Length     |   4 bytes (u32 LE)
//! |   Key            |   variable (UTF-8)
//! |   Value Length   |   4 bytes (u32 LE)
//! |   Value          |   variable
//! | CRC32            | 4 bytes
//! +------------------+
//! ```
//!
//! The generation increases on every commit that wrote something; handles
//! compare it to decide whether their cached copy is stale.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use koya_core::{KoyaError, KoyaResult};

/// Magic bytes: "KOYA"
pub const FILE_MAGIC: [u8; 4] = *b"KOYA";

/// Current file format version
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Bytes before the first entry
pub const HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// Serialize a full snapshot
pub fn encode(generation: u64, data: &BTreeMap<String, Vec<u8>>) -> KoyaResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + 4);
    bytes.extend_from_slice(&FILE_MAGIC);
    bytes.write_u32::<LittleEndian>(FILE_FORMAT_VERSION)?;
    bytes.write_u64::<LittleEndian>(generation)?;
    bytes.write_u32::<LittleEndian>(data.len() as u32)?;
    for (key, value) in data {
        bytes.write_u32::<LittleEndian>(key.len() as u32)?;
        bytes.extend_from_slice(key.as_bytes());
        bytes.write_u32::<LittleEndian>(value.len() as u32)?;
        bytes.extend_from_slice(value);
    }
    let crc = crc32fast::hash(&bytes);
    bytes.write_u32::<LittleEndian>(crc)?;
    Ok(bytes)
}

fn check_header(bytes: &[u8]) -> KoyaResult<u64> {
    if bytes.len() < HEADER_LEN {
        return Err(KoyaError::corruption("snapshot file too short"));
    }
    if bytes[0..4] != FILE_MAGIC {
        return Err(KoyaError::corruption("invalid snapshot magic"));
    }
    let mut reader = Cursor::new(&bytes[4..]);
    let version = reader.read_u32::<LittleEndian>()?;
    if version != FILE_FORMAT_VERSION {
        return Err(KoyaError::corruption(format!(
            "unsupported snapshot format {}",
            version
        )));
    }
    Ok(reader.read_u64::<LittleEndian>()?)
}

/// Read only the generation from a file prefix
pub fn peek_generation(header: &[u8]) -> KoyaResult<u64> {
    check_header(header)
}

/// Deserialize a full snapshot, verifying its checksum
pub fn decode(bytes: &[u8]) -> KoyaResult<(u64, BTreeMap<String, Vec<u8>>)> {
    let generation = check_header(bytes)?;
    if bytes.len() < HEADER_LEN + 4 {
        return Err(KoyaError::corruption("snapshot file truncated"));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let stored_crc = Cursor::new(trailer).read_u32::<LittleEndian>()?;
    let computed_crc = crc32fast::hash(body);
    if stored_crc != computed_crc {
        return Err(KoyaError::corruption(format!(
            "checksum mismatch: expected {:08x}, computed {:08x}",
            stored_crc, computed_crc
        )));
    }

    let mut reader = Cursor::new(&body[HEADER_LEN - 4..]);
    let count = reader.read_u32::<LittleEndian>()?;
    let mut data = BTreeMap::new();
    for _ in 0..count {
        let key = read_chunk(&mut reader)?;
        let key = String::from_utf8(key)
            .map_err(|_| KoyaError::corruption("snapshot key is not UTF-8"))?;
        let value = read_chunk(&mut reader)?;
        data.insert(key, value);
    }
    Ok((generation, data))
}

fn read_chunk(reader: &mut Cursor<&[u8]>) -> KoyaResult<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let remaining = reader.get_ref().len() - reader.position() as usize;
    if len > remaining {
        return Err(KoyaError::corruption("snapshot entry overruns file"));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTreeMap<String, Vec<u8>> {
        let mut data = BTreeMap::new();
        data.insert("koya_id".to_string(), b"3".to_vec());
        data.insert("m.1".to_string(), b"root".to_vec());
        data.insert("p.1@name".to_string(), vec![0, 255, 7]);
        data
    }

    #[test]
    fn test_magic() {
        assert_eq!(FILE_MAGIC, *b"KOYA");
    }

    #[test]
    fn test_encode_decode() {
        let bytes = encode(42, &sample()).unwrap();
        let (generation, data) = decode(&bytes).unwrap();
        assert_eq!(generation, 42);
        assert_eq!(data, sample());
        assert_eq!(peek_generation(&bytes[..HEADER_LEN]).unwrap(), 42);
    }

    #[test]
    fn test_empty_snapshot() {
        let bytes = encode(0, &BTreeMap::new()).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        assert!(decode(&bytes).unwrap().1.is_empty());
    }

    #[test]
    fn test_flipped_byte_detected() {
        let mut bytes = encode(1, &sample()).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(KoyaError::Corruption(_))));
    }

    #[test]
    fn test_bad_magic_detected() {
        let mut bytes = encode(1, &sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(KoyaError::Corruption(_))));
    }

    #[test]
    fn test_truncated_detected() {
        let bytes = encode(1, &sample()).unwrap();
        assert!(decode(&bytes[..10]).is_err());
        assert!(decode(&bytes[..bytes.len() - 6]).is_err());
    }
}
