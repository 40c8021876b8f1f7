//! Uniform randomness helpers backed by the operating-system RNG.

use rand::{rngs::OsRng, RngCore};

const TWO_POW_53: f64 = 9_007_199_254_740_992.0;

fn random_byte() -> u8 {
    let mut buf = [0u8; 1];
    OsRng.fill_bytes(&mut buf);
    buf[0]
}

/// Returns a uniform integer in `[0, max)`.
///
/// Small ranges draw a single byte: a bit mask when `max` is a power of
/// two, rejection against the largest multiple of `max` below 256 when
/// the rejection rate stays under 5%. Everything else scales a 53-bit
/// float, rejecting the boundary value.
pub(crate) fn random_range(max: usize) -> usize {
    if max <= 1 {
        return 0;
    }
    if max <= 256 {
        if max.is_power_of_two() {
            return usize::from(random_byte()) & (max - 1);
        }
        let remainder = 256 % max;
        if remainder * 20 <= 256 {
            let limit = 256 - remainder;
            loop {
                let byte = usize::from(random_byte());
                if byte < limit {
                    return byte % max;
                }
            }
        }
    }
    loop {
        let unit = (OsRng.next_u64() >> 11) as f64 / TWO_POW_53;
        let scaled = (unit * max as f64) as usize;
        if scaled < max {
            return scaled;
        }
    }
}

/// Returns a uniform random permutation of `[0, n)`.
pub(crate) fn random_shuffle(n: usize) -> Vec<usize> {
    match n {
        0 => Vec::new(),
        1 => vec![0],
        2 => {
            if random_byte() & 1 == 0 {
                vec![0, 1]
            } else {
                vec![1, 0]
            }
        }
        _ if n < 16 => {
            // Inside-out Fisher-Yates, no initial identity pass.
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                let j = random_range(i + 1);
                if j == i {
                    out.push(i);
                } else {
                    let moved = out[j];
                    out.push(moved);
                    out[j] = i;
                }
            }
            out
        }
        _ => {
            let mut out: Vec<usize> = (0..n).collect();
            for i in (1..n).rev() {
                out.swap(i, random_range(i + 1));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{random_range, random_shuffle};
    use std::collections::HashSet;

    #[test]
    fn range_stays_in_bounds() {
        for max in [1usize, 2, 3, 7, 8, 16, 100, 200, 255, 256, 1000, 1 << 20] {
            for _ in 0..200 {
                assert!(random_range(max) < max, "out of range for max={max}");
            }
        }
    }

    #[test]
    fn range_of_one_is_zero() {
        assert_eq!(random_range(1), 0);
        assert_eq!(random_range(0), 0);
    }

    #[test]
    fn range_visits_every_value_for_small_max() {
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            seen.insert(random_range(5));
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        for n in 0..24 {
            let shuffled = random_shuffle(n);
            assert_eq!(shuffled.len(), n);
            let distinct: HashSet<_> = shuffled.iter().copied().collect();
            assert_eq!(distinct.len(), n);
            assert!(shuffled.iter().all(|&i| i < n));
        }
    }

    #[test]
    fn shuffle_reaches_every_ordering_of_three() {
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            seen.insert(random_shuffle(3));
        }
        assert_eq!(seen.len(), 6);
    }
}
