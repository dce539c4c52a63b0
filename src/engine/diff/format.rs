//! Delta container
//!
//! ```text
//! magic     8 bytes  "BPDELTA1"
//! old_hash  32 bytes SHA256 of the base the delta applies to
//! new_hash  32 bytes SHA256 of the reconstructed output
//! ctrl_len  u64 LE   compressed control block length
//! diff_len  u64 LE   compressed difference block length
//! new_size  u64 LE   reconstructed output length
//! ctrl      zlib     (i64 add, i64 copy, i64 seek) LE triples
//! diff      zlib     difference bytes
//! extra     zlib     extra bytes, to the end of the delta
//! ```

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{self, Write};

use super::bsdiff::{Control, RawDelta};
use super::DiffError;

pub const MAGIC: &[u8; 8] = b"BPDELTA1";
pub const HASH_LEN: usize = 32;
pub const HEADER_LEN: usize = 8 + 2 * HASH_LEN + 24;
pub const CONTROL_LEN: usize = 24;

pub type Hash = [u8; HASH_LEN];

pub fn hash(data: &[u8]) -> Hash {
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaHeader {
    pub old_hash: Hash,
    pub new_hash: Hash,
    pub ctrl_len: u64,
    pub diff_len: u64,
    pub new_size: u64,
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

impl DeltaHeader {
    pub fn parse(delta: &[u8]) -> Result<Self, DiffError> {
        if delta.len() < HEADER_LEN {
            return Err(DiffError::Corrupt(format!(
                "delta is {} bytes, header needs {}",
                delta.len(),
                HEADER_LEN
            )));
        }
        if &delta[..8] != MAGIC {
            return Err(DiffError::Corrupt("bad magic".to_string()));
        }
        let mut old_hash = [0u8; HASH_LEN];
        let mut new_hash = [0u8; HASH_LEN];
        old_hash.copy_from_slice(&delta[8..8 + HASH_LEN]);
        new_hash.copy_from_slice(&delta[8 + HASH_LEN..8 + 2 * HASH_LEN]);
        let lengths = &delta[8 + 2 * HASH_LEN..];
        let header = Self {
            old_hash,
            new_hash,
            ctrl_len: read_u64(lengths),
            diff_len: read_u64(&lengths[8..]),
            new_size: read_u64(&lengths[16..]),
        };

        let body = (delta.len() - HEADER_LEN) as u64;
        let blocks = header.ctrl_len.checked_add(header.diff_len);
        if blocks.map_or(true, |total| total > body) {
            return Err(DiffError::Corrupt(format!(
                "block lengths {} + {} exceed delta body of {} bytes",
                header.ctrl_len, header.diff_len, body
            )));
        }
        Ok(header)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.old_hash);
        out.extend_from_slice(&self.new_hash);
        out.extend_from_slice(&self.ctrl_len.to_le_bytes());
        out.extend_from_slice(&self.diff_len.to_le_bytes());
        out.extend_from_slice(&self.new_size.to_le_bytes());
    }
}

/// The three compressed blocks of a parsed delta
pub struct DeltaBlocks<'a> {
    pub header: DeltaHeader,
    pub ctrl: ZlibDecoder<&'a [u8]>,
    pub diff: ZlibDecoder<&'a [u8]>,
    pub extra: ZlibDecoder<&'a [u8]>,
}

impl<'a> DeltaBlocks<'a> {
    pub fn open(delta: &'a [u8]) -> Result<Self, DiffError> {
        let header = DeltaHeader::parse(delta)?;
        let ctrl_end = HEADER_LEN + header.ctrl_len as usize;
        let diff_end = ctrl_end + header.diff_len as usize;
        Ok(Self {
            header,
            ctrl: ZlibDecoder::new(&delta[HEADER_LEN..ctrl_end]),
            diff: ZlibDecoder::new(&delta[ctrl_end..diff_end]),
            extra: ZlibDecoder::new(&delta[diff_end..]),
        })
    }
}

fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Serialize `raw`, the delta from `old` to `new`
pub fn encode(raw: &RawDelta, old: &[u8], new: &[u8]) -> Result<Vec<u8>, DiffError> {
    let mut ctrl = Vec::with_capacity(raw.controls.len() * CONTROL_LEN);
    for Control { add, copy, seek } in &raw.controls {
        ctrl.extend_from_slice(&add.to_le_bytes());
        ctrl.extend_from_slice(&copy.to_le_bytes());
        ctrl.extend_from_slice(&seek.to_le_bytes());
    }

    let ctrl = compress(&ctrl)?;
    let diff = compress(&raw.diff)?;
    let extra = compress(&raw.extra)?;

    let header = DeltaHeader {
        old_hash: hash(old),
        new_hash: hash(new),
        ctrl_len: ctrl.len() as u64,
        diff_len: diff.len() as u64,
        new_size: new.len() as u64,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + ctrl.len() + diff.len() + extra.len());
    header.write_to(&mut out);
    out.extend_from_slice(&ctrl);
    out.extend_from_slice(&diff);
    out.extend_from_slice(&extra);
    Ok(out)
}
