//! Suffix sorting (Larsson-Sadakane qsufsort) and longest-match search

use std::cmp::Ordering;

/// Pending work for the ternary-split loop. `Mark` runs after the
/// lower partition is done so group numbers change in the same order
/// a recursive split would change them.
enum Task {
    Split { start: usize, len: usize },
    Mark { jj: usize, kk: usize },
}

/// Suffix array of `old` with the empty suffix included.
///
/// The result has `old.len() + 1` entries; entry 0 is always `old.len()`.
pub fn suffix_array(old: &[u8]) -> Vec<isize> {
    let n = old.len();
    let mut sa = vec![0isize; n + 1];
    let mut rank = vec![0isize; n + 1];

    let mut buckets = [0isize; 256];
    for &b in old {
        buckets[b as usize] += 1;
    }
    for i in 1..256 {
        buckets[i] += buckets[i - 1];
    }
    for i in (1..256).rev() {
        buckets[i] = buckets[i - 1];
    }
    buckets[0] = 0;

    for (i, &b) in old.iter().enumerate() {
        buckets[b as usize] += 1;
        sa[buckets[b as usize] as usize] = i as isize;
    }
    sa[0] = n as isize;
    for (i, &b) in old.iter().enumerate() {
        rank[i] = buckets[b as usize];
    }
    rank[n] = 0;
    for i in 1..256 {
        if buckets[i] == buckets[i - 1] + 1 {
            sa[buckets[i] as usize] = -1;
        }
    }
    sa[0] = -1;

    let mut h = 1usize;
    while sa[0] != -(n as isize + 1) {
        let mut len: isize = 0;
        let mut i = 0usize;
        while i < n + 1 {
            if sa[i] < 0 {
                len -= sa[i];
                i = (i as isize - sa[i]) as usize;
            } else {
                if len != 0 {
                    sa[i - len as usize] = -len;
                }
                let group_len = (rank[sa[i] as usize] + 1) as usize - i;
                split(&mut sa, &mut rank, i, group_len, h);
                i += group_len;
                len = 0;
            }
        }
        if len != 0 {
            sa[i - len as usize] = -len;
        }
        h += h;
    }

    for i in 0..n + 1 {
        sa[rank[i] as usize] = i as isize;
    }
    sa
}

/// Group number of the suffix `h` bytes past the one at `sa[i]`
fn key(sa: &[isize], rank: &[isize], i: usize, h: usize) -> isize {
    rank[sa[i] as usize + h]
}

fn split(sa: &mut [isize], rank: &mut [isize], start: usize, len: usize, h: usize) {
    let mut tasks = vec![Task::Split { start, len }];
    while let Some(task) = tasks.pop() {
        match task {
            Task::Mark { jj, kk } => {
                for i in jj..kk {
                    rank[sa[i] as usize] = kk as isize - 1;
                }
                if jj == kk - 1 {
                    sa[jj] = -1;
                }
            }
            Task::Split { start, len } if len < 16 => {
                let end = start + len;
                let mut k = start;
                while k < end {
                    let mut j = 1;
                    let mut x = key(sa, rank, k, h);
                    let mut i = 1;
                    while k + i < end {
                        let v = key(sa, rank, k + i, h);
                        if v < x {
                            x = v;
                            j = 0;
                        }
                        if v == x {
                            sa.swap(k + j, k + i);
                            j += 1;
                        }
                        i += 1;
                    }
                    for i in 0..j {
                        rank[sa[k + i] as usize] = (k + j - 1) as isize;
                    }
                    if j == 1 {
                        sa[k] = -1;
                    }
                    k += j;
                }
            }
            Task::Split { start, len } => {
                let end = start + len;
                let x = key(sa, rank, start + len / 2, h);

                let mut less = 0;
                let mut equal = 0;
                for i in start..end {
                    match key(sa, rank, i, h).cmp(&x) {
                        Ordering::Less => less += 1,
                        Ordering::Equal => equal += 1,
                        Ordering::Greater => {}
                    }
                }
                let jj = start + less;
                let kk = jj + equal;

                let (mut i, mut j, mut k) = (start, 0, 0);
                while i < jj {
                    match key(sa, rank, i, h).cmp(&x) {
                        Ordering::Less => i += 1,
                        Ordering::Equal => {
                            sa.swap(i, jj + j);
                            j += 1;
                        }
                        Ordering::Greater => {
                            sa.swap(i, kk + k);
                            k += 1;
                        }
                    }
                }
                while jj + j < kk {
                    if key(sa, rank, jj + j, h) == x {
                        j += 1;
                    } else {
                        sa.swap(jj + j, kk + k);
                        k += 1;
                    }
                }

                if end > kk {
                    tasks.push(Task::Split {
                        start: kk,
                        len: end - kk,
                    });
                }
                tasks.push(Task::Mark { jj, kk });
                if jj > start {
                    tasks.push(Task::Split {
                        start,
                        len: jj - start,
                    });
                }
            }
        }
    }
}

fn match_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Longest prefix of `target` occurring in `old`, as `(position, length)`
pub fn longest_match(sa: &[isize], old: &[u8], target: &[u8]) -> (usize, usize) {
    let mut st = 0usize;
    let mut en = old.len();
    while en - st >= 2 {
        let mid = st + (en - st) / 2;
        let suffix = &old[sa[mid] as usize..];
        let n = suffix.len().min(target.len());
        if suffix[..n] < target[..n] {
            st = mid;
        } else {
            en = mid;
        }
    }

    let pos_st = sa[st] as usize;
    let pos_en = sa[en] as usize;
    let len_st = match_len(&old[pos_st..], target);
    let len_en = match_len(&old[pos_en..], target);
    if len_st > len_en {
        (pos_st, len_st)
    } else {
        (pos_en, len_en)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_suffix_array(data: &[u8]) -> Vec<isize> {
        let mut sa: Vec<usize> = (0..=data.len()).collect();
        sa.sort_by(|&a, &b| data[a..].cmp(&data[b..]));
        sa.into_iter().map(|i| i as isize).collect()
    }

    #[test]
    fn test_small_inputs() {
        assert_eq!(suffix_array(b""), vec![0]);
        assert_eq!(suffix_array(b"a"), vec![1, 0]);
        assert_eq!(suffix_array(b"banana"), naive_suffix_array(b"banana"));
    }

    #[test]
    fn test_matches_naive_sort() {
        let inputs: Vec<Vec<u8>> = vec![
            b"mississippi".to_vec(),
            vec![0u8; 100],
            (0..=255u8).cycle().take(1000).collect(),
            b"abracadabra abracadabra abracadabra".to_vec(),
            (0..500u32).map(|i| ((i * 7919) % 13) as u8).collect(),
        ];
        for input in inputs {
            assert_eq!(suffix_array(&input), naive_suffix_array(&input));
        }
    }

    #[test]
    fn test_longest_match() {
        let old = b"the quick brown fox jumps over the lazy dog";
        let sa = suffix_array(old);

        let (pos, len) = longest_match(&sa, old, b"brown fox!");
        assert_eq!(len, 9);
        assert_eq!(&old[pos..pos + len], b"brown fox");

        let (_, len) = longest_match(&sa, old, b"###");
        assert_eq!(len, 0);
    }

    #[test]
    fn test_longest_match_empty_old() {
        let sa = suffix_array(b"");
        assert_eq!(longest_match(&sa, b"", b"abc"), (0, 0));
    }
}
