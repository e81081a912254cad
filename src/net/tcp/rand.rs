/// Seedable pseudo random source for initial sequence numbers and resend jitter.
#[derive(Debug)]
pub(super) struct Rand {
    state: u64,
}

impl Rand {
    pub(super) const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(super) fn rand_u32(&mut self) -> u32 {
        // sPCG32 from https://www.pcg-random.org/paper.html
        const M: u64 = 0xbb2efcec3c39611d;
        const A: u64 = 0x7590ef39;

        let s = self.state.wrapping_mul(M).wrapping_add(A);
        self.state = s;

        let shift = 29 - (s >> 61);
        (s >> shift) as u32
    }

    /// Returns a value in `0..span`, or 0 when `span` is 0.
    pub(super) fn below(&mut self, span: u32) -> u32 {
        if span == 0 {
            return 0;
        }
        self.rand_u32() % span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = Rand::new(42);
        let mut b = Rand::new(42);
        for _ in 0..16 {
            assert_eq!(a.rand_u32(), b.rand_u32());
        }
    }

    #[test]
    fn test_below() {
        let mut rand = Rand::new(7);
        for _ in 0..1000 {
            assert!(rand.below(20) < 20);
        }
        assert_eq!(rand.below(0), 0);
    }
}
