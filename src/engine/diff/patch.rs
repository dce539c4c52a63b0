//! Delta application
//!
//! Every length in the delta is untrusted. The output never grows past the
//! declared size, and decompression never reads more than that size allows.
//! The base must hash to the recorded `old_hash` before anything is decoded,
//! and the result must hash to `new_hash` before it is returned.

use std::io::Read;

use super::format::{hash, DeltaBlocks, CONTROL_LEN};
use super::DiffError;

/// Largest output `apply` will build unless told otherwise
pub const DEFAULT_MAX_OUTPUT: u64 = 1 << 30;

const INITIAL_CAPACITY: u64 = 16 << 20;

fn read_i64(reader: &mut impl Read, what: &str) -> Result<i64, DiffError> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|e| DiffError::Corrupt(format!("{} stream: {}", what, e)))?;
    Ok(i64::from_le_bytes(buf))
}

fn read_into(reader: &mut impl Read, out: &mut Vec<u8>, len: usize, what: &str) -> Result<(), DiffError> {
    let start = out.len();
    out.resize(start + len, 0);
    reader
        .read_exact(&mut out[start..])
        .map_err(|e| DiffError::Corrupt(format!("{} stream: {}", what, e)))
}

pub fn apply(old: &[u8], delta: &[u8]) -> Result<Vec<u8>, DiffError> {
    apply_with_limit(old, delta, DEFAULT_MAX_OUTPUT)
}

pub fn apply_with_limit(old: &[u8], delta: &[u8], max_output: u64) -> Result<Vec<u8>, DiffError> {
    let DeltaBlocks {
        header,
        mut ctrl,
        mut diff,
        mut extra,
    } = DeltaBlocks::open(delta)?;

    let base = hash(old);
    if base != header.old_hash {
        return Err(DiffError::WrongBase {
            expected: hex::encode(header.old_hash),
            actual: hex::encode(base),
        });
    }
    if header.new_size > max_output {
        return Err(DiffError::TooLarge {
            size: header.new_size,
            limit: max_output,
        });
    }
    let new_size = header.new_size as i64;
    // each control advances the output, except possibly a final zero-length one
    let max_controls = header.new_size + 1;

    let mut out = Vec::with_capacity(header.new_size.min(INITIAL_CAPACITY) as usize);
    let mut old_pos: i64 = 0;
    let mut new_pos: i64 = 0;
    let mut controls: u64 = 0;

    while new_pos < new_size {
        controls += 1;
        if controls > max_controls {
            return Err(DiffError::Corrupt(format!(
                "more than {} control entries ({} bytes of control data)",
                max_controls,
                max_controls * CONTROL_LEN as u64
            )));
        }

        let add = read_i64(&mut ctrl, "control")?;
        let copy = read_i64(&mut ctrl, "control")?;
        let seek = read_i64(&mut ctrl, "control")?;

        if add < 0 || copy < 0 {
            return Err(DiffError::Corrupt(format!(
                "negative length in control (add {}, copy {})",
                add, copy
            )));
        }
        if add > new_size - new_pos {
            return Err(DiffError::Corrupt(format!(
                "add of {} bytes at {} overruns output of {}",
                add, new_pos, new_size
            )));
        }

        let start = out.len();
        read_into(&mut diff, &mut out, add as usize, "difference")?;
        for (i, byte) in out[start..].iter_mut().enumerate() {
            let o = old_pos + i as i64;
            if o >= 0 && (o as u64) < old.len() as u64 {
                *byte = byte.wrapping_add(old[o as usize]);
            }
        }
        new_pos += add;
        old_pos = old_pos
            .checked_add(add)
            .ok_or_else(|| DiffError::Corrupt("old cursor overflow".to_string()))?;

        if copy > new_size - new_pos {
            return Err(DiffError::Corrupt(format!(
                "copy of {} bytes at {} overruns output of {}",
                copy, new_pos, new_size
            )));
        }
        read_into(&mut extra, &mut out, copy as usize, "extra")?;
        new_pos += copy;
        old_pos = old_pos
            .checked_add(seek)
            .ok_or_else(|| DiffError::Corrupt("old cursor overflow".to_string()))?;
    }

    if out.len() as u64 != header.new_size {
        return Err(DiffError::Corrupt(format!(
            "reconstructed {} bytes, expected {}",
            out.len(),
            header.new_size
        )));
    }
    if hash(&out) != header.new_hash {
        return Err(DiffError::Corrupt(
            "reconstructed bytes do not match the recorded sha256".to_string(),
        ));
    }
    Ok(out)
}
