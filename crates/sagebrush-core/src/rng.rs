/// Deterministic PRNG with 256-bit state, so seeded sessions replay identically.
///
/// This is `xoshiro256**` seeded via SplitMix64.
#[derive(Clone, Copy, Debug)]
pub struct GameRng {
    state: [u64; 4],
}

impl GameRng {
    pub fn seed_from_u64(seed: u64) -> Self {
        let mut sm = SplitMix64 { state: seed };
        Self {
            state: [sm.next(), sm.next(), sm.next(), sm.next()],
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        // xoshiro256**
        let result = self.state[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);

        let t = self.state[1] << 17;

        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];

        self.state[2] ^= t;

        self.state[3] = self.state[3].rotate_left(45);

        result
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform roll in `1..=sides`. A zero-sided die always rolls 0.
    pub fn roll(&mut self, sides: u32) -> u32 {
        if sides == 0 {
            return 0;
        }
        // Rejection sampling keeps every face equally likely.
        let threshold = u32::MAX - (u32::MAX % sides);
        loop {
            let x = self.next_u32();
            if x < threshold {
                return 1 + x % sides;
            }
        }
    }
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        let mut z = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        self.state = z;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_rolls() {
        let mut a = GameRng::seed_from_u64(99);
        let mut b = GameRng::seed_from_u64(99);
        let xs: Vec<u32> = (0..32).map(|_| a.roll(6)).collect();
        let ys: Vec<u32> = (0..32).map(|_| b.roll(6)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn rolls_stay_on_the_die() {
        let mut rng = GameRng::seed_from_u64(7);
        let mut seen = [false; 6];
        for _ in 0..1_000 {
            let r = rng.roll(6);
            assert!((1..=6).contains(&r));
            seen[(r - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(rng.roll(0), 0);
    }
}
