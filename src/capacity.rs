//! Capacity planning for fixed-size tables.
//!
//! Capacities are rounded up to a value of the form `mantissa << shift` with a
//! 4-bit mantissa, giving 16 steps per octave instead of the power-of-two
//! steps most open-addressing tables use. Range reduction of a hash onto
//! `[0, capacity)` then needs a mask, a multiply and a shift, never a
//! division.

/// Smallest number of slots a table is planned with.
pub const MIN_CAPACITY: u64 = 8;

/// Upper clamp for the raw capacity. Anything this large fails allocation
/// long before the encoding could overflow.
const MAX_CAPACITY: u64 = 1 << 56;

/// Smallest per-put step budget, for tiny tables whose probe period is short.
const MIN_PROBE_BUDGET: u64 = 64;

/// Encoded capacity of a table, plus the live count at which inserts stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPlan {
    /// Leading zeros of the raw (pre-rounding) capacity.
    clz: u8,
    /// Most significant four bits of the capacity, rounded up. Always in
    /// `8..=16`.
    mantissa: u8,
    high_water_mark: u64,
}

impl CapacityPlan {
    /// Plans a table able to hold `expected` elements at `load_factor`.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not inside the open interval `(0.0, 1.0)`.
    pub fn new(expected: u64, load_factor: f64) -> Self {
        assert!(
            load_factor > 0.0 && load_factor < 1.0,
            "load factor {load_factor} must lie within the open interval (0.0, 1.0)"
        );

        let raw = ((expected as f64 / load_factor) as u64).clamp(MIN_CAPACITY, MAX_CAPACITY);
        let clz = raw.leading_zeros();
        let shift = 64 - clz - 4;
        let mantissa = raw.div_ceil(1 << shift);
        debug_assert!((8..=16).contains(&mantissa));

        let capacity = mantissa << shift;
        let high_water_mark = (capacity as f64 * load_factor) as u64;

        Self {
            clz: clz as u8,
            mantissa: mantissa as u8,
            high_water_mark,
        }
    }

    #[inline(always)]
    fn msb(self) -> u32 {
        64 - u32::from(self.clz)
    }

    /// Leading-zero count of the planned capacity.
    pub fn leading_zeros(self) -> u8 {
        self.clz
    }

    /// Fast-reduction multiplier.
    pub fn mantissa(self) -> u8 {
        self.mantissa
    }

    /// Number of slots the table holds.
    pub fn slots(self) -> u64 {
        u64::from(self.mantissa) << (self.msb() - 4)
    }

    /// Live count at which new keys are refused.
    pub fn high_water_mark(self) -> u64 {
        self.high_water_mark
    }

    /// Maps any 64-bit value onto `[0, slots)`.
    #[inline(always)]
    pub fn reduce(self, x: u64) -> u64 {
        let mask = (1u64 << self.msb()) - 1;
        ((x & mask) * u64::from(self.mantissa)) >> 4
    }

    /// Number of steps after which the quadratic sequence `2 * i^2` repeats
    /// inside the masked hash space.
    pub fn probe_period(self) -> u64 {
        1 << (self.msb() - 1)
    }

    /// Steps a single put may take before it gives up.
    pub(crate) fn probe_budget(self) -> u32 {
        self.probe_period()
            .saturating_mul(4)
            .clamp(MIN_PROBE_BUDGET, u64::from(u32::MAX)) as u32
    }
}
