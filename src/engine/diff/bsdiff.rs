//! Delta computation
//!
//! Finds approximate matches of `new` in `old` through the suffix array and
//! emits one control triple per match. Bytes covered by a match are stored
//! as wrapping differences against `old`; bytes between matches are stored
//! verbatim.

use super::suffix::{longest_match, suffix_array};

/// One step of reconstruction: add `add` bytes from the difference stream,
/// copy `copy` bytes from the extra stream, then move the old cursor by `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub add: i64,
    pub copy: i64,
    pub seek: i64,
}

/// Uncompressed delta streams
#[derive(Debug, Default)]
pub struct RawDelta {
    pub controls: Vec<Control>,
    pub diff: Vec<u8>,
    pub extra: Vec<u8>,
}

/// Minimum advantage, in bytes, a fresh match needs over continuing the current one
const MATCH_SLACK: isize = 8;

pub fn compute(old: &[u8], new: &[u8]) -> RawDelta {
    let sa = suffix_array(old);
    let old_len = old.len() as isize;
    let new_len = new.len() as isize;
    let at_old = |i: isize| old[i as usize];
    let at_new = |i: isize| new[i as usize];

    let mut delta = RawDelta::default();

    let mut scan: isize = 0;
    let mut len: isize = 0;
    let mut pos: isize = 0;
    let mut last_scan: isize = 0;
    let mut last_pos: isize = 0;
    let mut last_offset: isize = 0;

    while scan < new_len {
        let mut old_score: isize = 0;
        scan += len;
        let mut scsc = scan;

        while scan < new_len {
            let (p, l) = longest_match(&sa, old, &new[scan as usize..]);
            pos = p as isize;
            len = l as isize;

            while scsc < scan + len {
                if scsc + last_offset < old_len && at_old(scsc + last_offset) == at_new(scsc) {
                    old_score += 1;
                }
                scsc += 1;
            }

            if (len == old_score && len != 0) || len > old_score + MATCH_SLACK {
                break;
            }

            if scan + last_offset < old_len && at_old(scan + last_offset) == at_new(scan) {
                old_score -= 1;
            }
            scan += 1;
        }

        if len == old_score && scan != new_len {
            continue;
        }

        // extend the previous match forwards
        let mut lenf: isize = 0;
        {
            let (mut s, mut best) = (0isize, 0isize);
            let mut i: isize = 0;
            while last_scan + i < scan && last_pos + i < old_len {
                if at_old(last_pos + i) == at_new(last_scan + i) {
                    s += 1;
                }
                i += 1;
                if s * 2 - i > best * 2 - lenf {
                    best = s;
                    lenf = i;
                }
            }
        }

        // and the new match backwards
        let mut lenb: isize = 0;
        if scan < new_len {
            let (mut s, mut best) = (0isize, 0isize);
            let mut i: isize = 1;
            while scan >= last_scan + i && pos >= i {
                if at_old(pos - i) == at_new(scan - i) {
                    s += 1;
                }
                if s * 2 - i > best * 2 - lenb {
                    best = s;
                    lenb = i;
                }
                i += 1;
            }
        }

        if last_scan + lenf > scan - lenb {
            let overlap = (last_scan + lenf) - (scan - lenb);
            let (mut s, mut best, mut lens) = (0isize, 0isize, 0isize);
            for i in 0..overlap {
                if at_new(last_scan + lenf - overlap + i) == at_old(last_pos + lenf - overlap + i) {
                    s += 1;
                }
                if at_new(scan - lenb + i) == at_old(pos - lenb + i) {
                    s -= 1;
                }
                if s > best {
                    best = s;
                    lens = i + 1;
                }
            }
            lenf += lens - overlap;
            lenb -= lens;
        }

        for i in 0..lenf {
            delta
                .diff
                .push(at_new(last_scan + i).wrapping_sub(at_old(last_pos + i)));
        }
        let extra_len = (scan - lenb) - (last_scan + lenf);
        let extra_start = (last_scan + lenf) as usize;
        delta
            .extra
            .extend_from_slice(&new[extra_start..extra_start + extra_len as usize]);

        delta.controls.push(Control {
            add: lenf as i64,
            copy: extra_len as i64,
            seek: ((pos - lenb) - (last_pos + lenf)) as i64,
        });

        last_scan = scan - lenb;
        last_pos = pos - lenb;
        last_offset = pos - scan;
    }

    delta
}
