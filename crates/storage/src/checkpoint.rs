//! Checkpoint file format
//!
//! A checkpoint is a single file holding a MessagePack-encoded body behind a
//! small fixed header.
//!
//! # File Structure
//!
//! ```text
//! +------------------+ 0
//! | Magic "LNKD"     | 4 bytes
//! +------------------+ 4
//! | Format version   | u32 LE
//! +------------------+ 8
//! | Body length      | u64 LE
//! +------------------+ 16
//! | Body CRC32       | u32 LE
//! +------------------+ 20
//! | Body             | rmp-serde
//! +------------------+
//! ```
//!
//! Files are written to a temporary sibling, fsynced, then renamed over the
//! target, so a crash mid-write leaves the previous checkpoint intact.

use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use linkdb_core::{Error, Result};

/// Magic bytes: "LNKD"
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"LNKD";

/// Checkpoint format version
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Header size in bytes
pub const CHECKPOINT_HEADER_SIZE: usize = 20;

/// Encode `body` into checkpoint bytes
pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(body)?;
    let mut out = Vec::with_capacity(CHECKPOINT_HEADER_SIZE + payload.len());
    out.extend_from_slice(&CHECKPOINT_MAGIC);
    out.write_u32::<LittleEndian>(CHECKPOINT_FORMAT_VERSION)?;
    out.write_u64::<LittleEndian>(payload.len() as u64)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode checkpoint bytes, verifying magic, version, length and CRC
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < CHECKPOINT_HEADER_SIZE {
        return Err(Error::Corruption("checkpoint shorter than header".to_string()));
    }
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if magic != CHECKPOINT_MAGIC {
        return Err(Error::Corruption("bad checkpoint magic".to_string()));
    }
    let format = cursor.read_u32::<LittleEndian>()?;
    if format != CHECKPOINT_FORMAT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported checkpoint format version {}",
            format
        )));
    }
    let len = cursor.read_u64::<LittleEndian>()? as usize;
    let crc = cursor.read_u32::<LittleEndian>()?;
    let payload = &bytes[CHECKPOINT_HEADER_SIZE..];
    if payload.len() != len {
        return Err(Error::Corruption(format!(
            "checkpoint body is {} bytes, header says {}",
            payload.len(),
            len
        )));
    }
    if crc32fast::hash(payload) != crc {
        return Err(Error::Corruption("checkpoint CRC mismatch".to_string()));
    }
    Ok(rmp_serde::from_slice(payload)?)
}

/// Write a checkpoint file atomically
pub fn write_file<T: Serialize>(path: &Path, body: &T) -> Result<()> {
    let bytes = encode(body)?;
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), bytes = bytes.len(), "checkpoint written");
    Ok(())
}

/// Read a checkpoint file; `Ok(None)` if it does not exist
pub fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    decode(&bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Body {
        version: u64,
        names: Vec<String>,
    }

    fn body() -> Body {
        Body {
            version: 9,
            names: vec!["carts".into(), "products".into()],
        }
    }

    #[test]
    fn test_encode_decode() {
        let bytes = encode(&body()).unwrap();
        assert_eq!(&bytes[..4], b"LNKD");
        let decoded: Body = decode(&bytes).unwrap();
        assert_eq!(decoded, body());
    }

    #[test]
    fn test_flipped_bit_is_corruption() {
        let mut bytes = encode(&body()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = decode::<Body>(&bytes).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_truncated_is_corruption() {
        let bytes = encode(&body()).unwrap();
        assert!(matches!(decode::<Body>(&bytes[..10]), Err(Error::Corruption(_))));
        assert!(matches!(
            decode::<Body>(&bytes[..bytes.len() - 2]),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("linkdb.ckpt");
        assert!(read_file::<Body>(&path).unwrap().is_none());

        write_file(&path, &body()).unwrap();
        assert_eq!(read_file::<Body>(&path).unwrap(), Some(body()));
        assert!(!path.with_extension("tmp").exists());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        const HEADER_LEN: usize = 20;

        fn any_body() -> impl Strategy<Value = Body> {
            (any::<u64>(), prop::collection::vec("[a-z_]{1,12}", 0..8))
                .prop_map(|(version, names)| Body { version, names })
        }

        proptest! {
            #[test]
            fn prop_encode_decode_preserves_body(b in any_body()) {
                let decoded: Body = decode(&encode(&b).unwrap()).unwrap();
                prop_assert_eq!(decoded, b);
            }

            #[test]
            fn prop_changed_body_byte_is_corruption(
                b in any_body(),
                pos in any::<prop::sample::Index>(),
                mask in 1u8..=255,
            ) {
                let mut bytes = encode(&b).unwrap();
                let at = HEADER_LEN + pos.index(bytes.len() - HEADER_LEN);
                bytes[at] ^= mask;
                prop_assert!(matches!(decode::<Body>(&bytes), Err(Error::Corruption(_))));
            }
        }
    }
}
