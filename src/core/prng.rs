// Deterministic random draws for wiring.
//
// Not cryptographically secure. Two flavours:
// - `Prng`: a sequential xorshift64* stream for construction-time wiring.
// - `counter_uniform`: a stateless mix of counters, so a draw depends only on
//   *what* is being decided and never on evaluation order or thread count.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { GOLDEN_GAMMA } else { seed };
        Self { state: seed }
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform draw in [0,1) with 53 bits of precision.
    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        unit_interval(self.next_u64())
    }

    /// True with probability `p` (clamped to [0,1]).
    #[inline]
    pub fn chance(&mut self, p: f64) -> bool {
        if p >= 1.0 {
            return true;
        }
        if p <= 0.0 {
            return false;
        }
        self.next_f64_01() < p
    }
}

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[inline]
fn unit_interval(x: u64) -> f64 {
    (x >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Counter-based uniform draw in [0,1).
///
/// Each counter is folded in through a SplitMix64 round, so neighbouring
/// counters give unrelated values.
pub fn counter_uniform(seed: u64, step: u64, draw_kind: u64, layer: u64, unit: u64, draw: u64) -> f64 {
    let mut h = splitmix64(seed);
    for c in [step, draw_kind, layer, unit, draw] {
        h = splitmix64(h ^ c);
    }
    unit_interval(h)
}
