//! Snapshot (RDB) files.
//!
//! The decoder turns a snapshot into `(key, value, expiry)` triples that seed
//! the store at startup. The encoder produces the payload a leader ships
//! after `+FULLRESYNC`. Only string values are supported.

use crate::error::SnapshotError;
use crate::storage::Store;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::Path;
use tracing::{debug, info};

const MAGIC: &[u8] = b"REDIS";
const VERSION: &[u8] = b"0011";

const OP_METADATA: u8 = 0xFA;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_EXPIRE_SECS: u8 = 0xFD;
const OP_SELECTDB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;

const TYPE_STRING: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
    /// Absolute unix milliseconds.
    pub expires_at: Option<u64>,
}

enum Length {
    Plain(usize),
    /// Low six bits of a `0b11......` length byte.
    Encoded(u8),
}

fn need(buf: &impl Buf, n: usize) -> Result<(), SnapshotError> {
    if buf.remaining() < n {
        return Err(SnapshotError::UnexpectedEof);
    }
    Ok(())
}

fn read_u8(buf: &mut impl Buf) -> Result<u8, SnapshotError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_length(buf: &mut impl Buf) -> Result<Length, SnapshotError> {
    let first = read_u8(buf)?;
    match first >> 6 {
        0b00 => Ok(Length::Plain((first & 0x3F) as usize)),
        0b01 => {
            let second = read_u8(buf)?;
            Ok(Length::Plain((((first & 0x3F) as usize) << 8) | second as usize))
        }
        0b10 if first == 0x81 => {
            need(buf, 8)?;
            Ok(Length::Plain(buf.get_u64() as usize))
        }
        0b10 => {
            need(buf, 4)?;
            Ok(Length::Plain(buf.get_u32() as usize))
        }
        _ => Ok(Length::Encoded(first & 0x3F)),
    }
}

fn read_size(buf: &mut impl Buf) -> Result<usize, SnapshotError> {
    match read_length(buf)? {
        Length::Plain(n) => Ok(n),
        Length::Encoded(enc) => Err(SnapshotError::UnknownEncoding(enc)),
    }
}

fn read_string(buf: &mut impl Buf) -> Result<String, SnapshotError> {
    match read_length(buf)? {
        Length::Plain(n) => {
            need(buf, n)?;
            let mut raw = vec![0u8; n];
            buf.copy_to_slice(&mut raw);
            Ok(String::from_utf8_lossy(&raw).into_owned())
        }
        Length::Encoded(0) => {
            need(buf, 1)?;
            Ok(buf.get_i8().to_string())
        }
        Length::Encoded(1) => {
            need(buf, 2)?;
            Ok(buf.get_i16_le().to_string())
        }
        Length::Encoded(2) => {
            need(buf, 4)?;
            Ok(buf.get_i32_le().to_string())
        }
        Length::Encoded(3) => Err(SnapshotError::CompressedString),
        Length::Encoded(enc) => Err(SnapshotError::UnknownEncoding(enc)),
    }
}

fn read_pair(
    buf: &mut impl Buf,
    value_type: u8,
    expires_at: Option<u64>,
) -> Result<SnapshotEntry, SnapshotError> {
    if value_type != TYPE_STRING {
        return Err(SnapshotError::UnsupportedValueType(value_type));
    }
    let key = read_string(buf)?;
    let value = read_string(buf)?;
    Ok(SnapshotEntry {
        key,
        value,
        expires_at,
    })
}

/// Decode a snapshot into its entries, in file order.
pub fn decode(data: &[u8]) -> Result<Vec<SnapshotEntry>, SnapshotError> {
    let mut buf = data;

    need(&buf, MAGIC.len() + VERSION.len())?;
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = String::from_utf8_lossy(&buf[MAGIC.len()..MAGIC.len() + VERSION.len()]);
    debug!(%version, "Snapshot header");
    buf.advance(MAGIC.len() + VERSION.len());

    let mut entries = Vec::new();
    while buf.has_remaining() {
        match buf.get_u8() {
            OP_METADATA => {
                let name = read_string(&mut buf)?;
                let value = read_string(&mut buf)?;
                debug!(%name, %value, "Snapshot metadata");
            }
            OP_SELECTDB => {
                let db = read_size(&mut buf)?;
                debug!(db, "Snapshot database");
            }
            OP_RESIZEDB => {
                let keys = read_size(&mut buf)?;
                let expires = read_size(&mut buf)?;
                debug!(keys, expires, "Snapshot table sizes");
            }
            OP_EXPIRE_SECS => {
                need(&buf, 4)?;
                let at = buf.get_u32_le() as u64 * 1000;
                let value_type = read_u8(&mut buf)?;
                entries.push(read_pair(&mut buf, value_type, Some(at))?);
            }
            OP_EXPIRE_MS => {
                need(&buf, 8)?;
                let at = buf.get_u64_le();
                let value_type = read_u8(&mut buf)?;
                entries.push(read_pair(&mut buf, value_type, Some(at))?);
            }
            // the 8-byte checksum that may follow is not verified
            OP_EOF => break,
            value_type => entries.push(read_pair(&mut buf, value_type, None)?),
        }
    }

    Ok(entries)
}

fn put_length(out: &mut BytesMut, len: usize) {
    if len < 1 << 6 {
        out.put_u8(len as u8);
    } else if len < 1 << 14 {
        out.put_u8(0x40 | (len >> 8) as u8);
        out.put_u8(len as u8);
    } else if let Ok(len) = u32::try_from(len) {
        out.put_u8(0x80);
        out.put_u32(len);
    } else {
        out.put_u8(0x81);
        out.put_u64(len as u64);
    }
}

fn put_string(out: &mut BytesMut, s: &str) {
    put_length(out, s.len());
    out.put_slice(s.as_bytes());
}

/// Encode string entries as a single-database snapshot.
pub fn encode(entries: &[(String, String, Option<u64>)]) -> Bytes {
    let mut out = BytesMut::with_capacity(64);
    out.put_slice(MAGIC);
    out.put_slice(VERSION);

    out.put_u8(OP_METADATA);
    put_string(&mut out, "redis-ver");
    put_string(&mut out, "7.2.0");

    out.put_u8(OP_SELECTDB);
    put_length(&mut out, 0);
    out.put_u8(OP_RESIZEDB);
    put_length(&mut out, entries.len());
    put_length(&mut out, entries.iter().filter(|e| e.2.is_some()).count());

    for (key, value, expires_at) in entries {
        if let Some(at) = expires_at {
            out.put_u8(OP_EXPIRE_MS);
            out.put_u64_le(*at);
        }
        out.put_u8(TYPE_STRING);
        put_string(&mut out, key);
        put_string(&mut out, value);
    }

    out.put_u8(OP_EOF);
    out.put_u64(0);
    out.freeze()
}

/// Seed `store` from `dir/dbfilename`. A missing file loads nothing.
pub fn load_into(store: &Store, dir: &str, dbfilename: &str) -> Result<usize, SnapshotError> {
    let path = Path::new(dir).join(dbfilename);
    if !path.exists() {
        info!(path = %path.display(), "No snapshot file, starting empty");
        return Ok(0);
    }

    let data = std::fs::read(&path)?;
    let entries = decode(&data)?;
    let count = entries.len();
    for entry in entries {
        store.set_string(&entry.key, entry.value, entry.expires_at);
    }

    info!(path = %path.display(), keys = count, "Snapshot loaded");
    Ok(count)
}
