use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::{Rng, SeedableRng};

const WORD_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

/// Single source of non-determinism for the whole search.
///
/// Every sampling and mutation decision draws from here, so a fixed seed
/// reproduces a run exactly.
pub struct Randomness {
    rng: StdRng,
}

impl Randomness {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// True with probability `p`; values outside [0,1] are clamped
    pub fn next_bool(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.rng.gen::<f64>() < p
    }

    pub fn next_double(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform integer in `[min, max]`, both inclusive
    pub fn next_int(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// Uniform index in `[min, max]`, both inclusive
    pub fn next_usize(&mut self, min: usize, max: usize) -> usize {
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    pub fn next_double_range(&mut self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..max)
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    pub fn choose_iter<I: IntoIterator>(&mut self, items: I) -> Option<I::Item> {
        items.into_iter().choose(&mut self.rng)
    }

    /// Pick `n` distinct elements (or all of them if fewer are available)
    pub fn choose_n<T: Clone>(&mut self, items: &[T], n: usize) -> Vec<T> {
        items
            .choose_multiple(&mut self.rng, n.min(items.len()))
            .cloned()
            .collect()
    }

    /// Weighted pick, weights need not be normalized
    pub fn choose_weighted<'a, T>(&mut self, items: &'a [(T, f64)]) -> Option<&'a T> {
        let total: f64 = items.iter().map(|(_, w)| w.max(0.0)).sum();
        if items.is_empty() {
            return None;
        }
        if total <= 0.0 {
            return self.choose(items).map(|(t, _)| t);
        }
        let mut spin = self.rng.gen::<f64>() * total;
        for (item, weight) in items {
            spin -= weight.max(0.0);
            if spin <= 0.0 {
                return Some(item);
            }
        }
        items.last().map(|(t, _)| t)
    }

    pub fn next_word(&mut self, min_len: usize, max_len: usize) -> String {
        let len = self.next_usize(min_len, max_len);
        (0..len)
            .map(|_| WORD_CHARS[self.rng.gen_range(0..WORD_CHARS.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = Randomness::new(Some(7));
        let mut b = Randomness::new(Some(7));
        let xs: Vec<i64> = (0..20).map(|_| a.next_int(0, 1000)).collect();
        let ys: Vec<i64> = (0..20).map(|_| b.next_int(0, 1000)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_choose_n_is_distinct_and_bounded() {
        let mut r = Randomness::new(Some(1));
        let items = vec![1, 2, 3, 4];
        let picked = r.choose_n(&items, 10);
        assert_eq!(picked.len(), 4);
        let picked = r.choose_n(&items, 2);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1]);
    }

    #[test]
    fn test_weighted_choice_ignores_zero_weight() {
        let mut r = Randomness::new(Some(3));
        let items = vec![("a", 0.0), ("b", 1.0)];
        for _ in 0..50 {
            assert_eq!(*r.choose_weighted(&items).unwrap(), "b");
        }
    }
}
