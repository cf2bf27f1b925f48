//! Paired-double register type with explicit rounding direction.
//!
//! Float registers are pairs of IEEE-754 binary64 lanes. Instead of
//! switching the hardware rounding control register, every operation
//! takes the rounding direction as a parameter: the round-to-nearest
//! result is computed first and then corrected by one ulp where the
//! exactly-computed residual shows the directed result differs. This
//! keeps execution bit-identical across platforms without `unsafe`.

use std::cmp::Ordering;

/// Per-lane mask clearing the sign bit.
const ABS_MASK: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Per-lane mask inverting the sign and flipping the exponent MSB.
const SCALE_MASK: u64 = 0x81F0_0000_0000_0000;

/// Smallest positive normal double (DBL_MIN).
pub const DBL_MIN: f64 = f64::MIN_POSITIVE;

/// IEEE-754 rounding direction installed by the CFROUND instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RoundMode {
    /// Round to nearest, ties to even.
    #[default]
    Nearest = 0,
    /// Round toward negative infinity.
    Down = 1,
    /// Round toward positive infinity.
    Up = 2,
    /// Round toward zero.
    Zero = 3,
}

impl RoundMode {
    /// Decodes the two low bits of a register value.
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        match bits & 3 {
            0 => RoundMode::Nearest,
            1 => RoundMode::Down,
            2 => RoundMode::Up,
            _ => RoundMode::Zero,
        }
    }
}

/// Next representable double toward positive infinity.
#[inline]
fn next_up(x: f64) -> f64 {
    let bits = x.to_bits();
    if x.is_nan() || bits == f64::INFINITY.to_bits() {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    if bits >> 63 == 0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Next representable double toward negative infinity.
#[inline]
fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Directed-rounding result of an overflowed operation.
///
/// Round-to-nearest overflows to infinity; the directed modes saturate
/// at the largest finite value on the side they cannot cross.
#[inline]
fn saturate_overflow(inf: f64, mode: RoundMode) -> f64 {
    match mode {
        RoundMode::Nearest => inf,
        RoundMode::Up => {
            if inf > 0.0 { inf } else { -f64::MAX }
        }
        RoundMode::Down => {
            if inf < 0.0 { inf } else { f64::MAX }
        }
        RoundMode::Zero => {
            if inf > 0.0 { f64::MAX } else { -f64::MAX }
        }
    }
}

/// Corrects the round-to-nearest result `s` to the requested direction.
///
/// `exact` orders the infinitely precise result against `s`.
#[inline]
fn direct(s: f64, exact: Ordering, mode: RoundMode) -> f64 {
    match mode {
        RoundMode::Nearest => s,
        RoundMode::Down => {
            if exact == Ordering::Less { next_down(s) } else { s }
        }
        RoundMode::Up => {
            if exact == Ordering::Greater { next_up(s) } else { s }
        }
        RoundMode::Zero => {
            if s > 0.0 && exact == Ordering::Less {
                next_down(s)
            } else if s < 0.0 && exact == Ordering::Greater {
                next_up(s)
            } else {
                s
            }
        }
    }
}

/// Orders a residual sign against zero.
#[inline]
fn residual_ordering(residual: f64) -> Ordering {
    if residual > 0.0 {
        Ordering::Greater
    } else if residual < 0.0 {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Rounded addition of two doubles.
fn add_rounded(a: f64, b: f64, mode: RoundMode) -> f64 {
    let s = a + b;
    if mode == RoundMode::Nearest || s.is_nan() {
        return s;
    }
    if s.is_infinite() {
        if a.is_finite() && b.is_finite() {
            return saturate_overflow(s, mode);
        }
        return s;
    }
    // Two-sum: residual = (a + b) - s, exact under round-to-nearest.
    let bv = s - a;
    let residual = (a - (s - bv)) + (b - bv);
    direct(s, residual_ordering(residual), mode)
}

/// Rounded multiplication of two doubles.
fn mul_rounded(a: f64, b: f64, mode: RoundMode) -> f64 {
    let p = a * b;
    if mode == RoundMode::Nearest || p.is_nan() {
        return p;
    }
    if p.is_infinite() {
        if a.is_finite() && b.is_finite() {
            return saturate_overflow(p, mode);
        }
        return p;
    }
    let residual = a.mul_add(b, -p);
    direct(p, residual_ordering(residual), mode)
}

/// Rounded division of two doubles.
fn div_rounded(a: f64, b: f64, mode: RoundMode) -> f64 {
    let q = a / b;
    if mode == RoundMode::Nearest || q.is_nan() {
        return q;
    }
    if q.is_infinite() {
        // Division by zero is exact in every direction; a finite
        // quotient that overflowed saturates.
        if b != 0.0 && a.is_finite() {
            return saturate_overflow(q, mode);
        }
        return q;
    }
    if b.is_infinite() {
        return q;
    }
    // residual = a - q*b; sign(exact - q) = sign(residual) * sign(b).
    let residual = q.mul_add(-b, a);
    let exact = if residual == 0.0 {
        Ordering::Equal
    } else if (residual > 0.0) == (b > 0.0) {
        Ordering::Greater
    } else {
        Ordering::Less
    };
    direct(q, exact, mode)
}

/// Rounded square root of a non-negative double.
fn sqrt_rounded(a: f64, mode: RoundMode) -> f64 {
    let s = a.sqrt();
    if mode == RoundMode::Nearest || s.is_nan() || s.is_infinite() {
        return s;
    }
    let residual = s.mul_add(-s, a);
    direct(s, residual_ordering(residual), mode)
}

/// A 128-bit float register: two packed binary64 lanes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FloatPair {
    pub lo: f64,
    pub hi: f64,
}

impl FloatPair {
    pub const ZERO: FloatPair = FloatPair { lo: 0.0, hi: 0.0 };

    /// Reassembles a register from raw lane bits.
    #[inline]
    pub fn from_bits(lo: u64, hi: u64) -> Self {
        Self {
            lo: f64::from_bits(lo),
            hi: f64::from_bits(hi),
        }
    }

    /// Raw lane bits, low lane first.
    #[inline]
    pub fn to_bits(self) -> (u64, u64) {
        (self.lo.to_bits(), self.hi.to_bits())
    }

    /// Converts a packed pair of little-endian i32 values, each exactly
    /// representable as binary64.
    #[inline]
    pub fn from_packed_i32(packed: u64) -> Self {
        Self {
            lo: packed as u32 as i32 as f64,
            hi: (packed >> 32) as u32 as i32 as f64,
        }
    }

    /// Clears the sign bit of both lanes.
    #[inline]
    pub fn abs(self) -> Self {
        let (lo, hi) = self.to_bits();
        Self::from_bits(lo & ABS_MASK, hi & ABS_MASK)
    }

    /// Inverts the sign and flips the exponent MSB of both lanes.
    #[inline]
    pub fn scale(self) -> Self {
        let (lo, hi) = self.to_bits();
        Self::from_bits(lo ^ SCALE_MASK, hi ^ SCALE_MASK)
    }

    /// Swaps the two lanes.
    #[inline]
    pub fn swap(self) -> Self {
        Self {
            lo: self.hi,
            hi: self.lo,
        }
    }

    /// Lane-wise maximum; NaN lanes resolve to `other`.
    #[inline]
    pub fn max(self, other: f64) -> Self {
        Self {
            lo: self.lo.max(other),
            hi: self.hi.max(other),
        }
    }

    #[inline]
    pub fn add(self, rhs: FloatPair, mode: RoundMode) -> Self {
        Self {
            lo: add_rounded(self.lo, rhs.lo, mode),
            hi: add_rounded(self.hi, rhs.hi, mode),
        }
    }

    #[inline]
    pub fn sub(self, rhs: FloatPair, mode: RoundMode) -> Self {
        Self {
            lo: add_rounded(self.lo, -rhs.lo, mode),
            hi: add_rounded(self.hi, -rhs.hi, mode),
        }
    }

    #[inline]
    pub fn mul(self, rhs: FloatPair, mode: RoundMode) -> Self {
        Self {
            lo: mul_rounded(self.lo, rhs.lo, mode),
            hi: mul_rounded(self.hi, rhs.hi, mode),
        }
    }

    #[inline]
    pub fn div(self, rhs: FloatPair, mode: RoundMode) -> Self {
        Self {
            lo: div_rounded(self.lo, rhs.lo, mode),
            hi: div_rounded(self.hi, rhs.hi, mode),
        }
    }

    #[inline]
    pub fn sqrt(self, mode: RoundMode) -> Self {
        Self {
            lo: sqrt_rounded(self.lo, mode),
            hi: sqrt_rounded(self.hi, mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_mode_decoding() {
        assert_eq!(RoundMode::from_bits(0), RoundMode::Nearest);
        assert_eq!(RoundMode::from_bits(1), RoundMode::Down);
        assert_eq!(RoundMode::from_bits(2), RoundMode::Up);
        assert_eq!(RoundMode::from_bits(3), RoundMode::Zero);
        assert_eq!(RoundMode::from_bits(7), RoundMode::Zero);
    }

    #[test]
    fn exact_results_ignore_direction() {
        for mode in [
            RoundMode::Nearest,
            RoundMode::Down,
            RoundMode::Up,
            RoundMode::Zero,
        ] {
            assert_eq!(add_rounded(2.0, 3.0, mode), 5.0);
            assert_eq!(mul_rounded(2.0, 4.0, mode), 8.0);
            assert_eq!(div_rounded(1.0, 2.0, mode), 0.5);
            assert_eq!(sqrt_rounded(9.0, mode), 3.0);
        }
    }

    #[test]
    fn directed_add_brackets_nearest() {
        // 1 + 2^-60 is inexact: Down/Zero truncate to 1, Up steps past it.
        let tiny = 2f64.powi(-60);
        assert_eq!(add_rounded(1.0, tiny, RoundMode::Nearest), 1.0);
        assert_eq!(add_rounded(1.0, tiny, RoundMode::Down), 1.0);
        assert_eq!(add_rounded(1.0, tiny, RoundMode::Zero), 1.0);
        assert_eq!(add_rounded(1.0, tiny, RoundMode::Up), next_up(1.0));

        assert_eq!(add_rounded(-1.0, -tiny, RoundMode::Up), -1.0);
        assert_eq!(add_rounded(-1.0, -tiny, RoundMode::Zero), -1.0);
        assert_eq!(add_rounded(-1.0, -tiny, RoundMode::Down), next_down(-1.0));
    }

    #[test]
    fn directed_div_brackets_nearest() {
        // 1/3 rounds down in magnitude under Zero and Down.
        let nearest = div_rounded(1.0, 3.0, RoundMode::Nearest);
        let down = div_rounded(1.0, 3.0, RoundMode::Down);
        let up = div_rounded(1.0, 3.0, RoundMode::Up);
        assert!(down <= nearest && nearest <= up);
        assert_eq!(next_up(down), up);
        assert_eq!(div_rounded(1.0, 3.0, RoundMode::Zero), down);

        // Negative quotient: Zero truncates toward zero, i.e. upward.
        let ndown = div_rounded(-1.0, 3.0, RoundMode::Down);
        let nup = div_rounded(-1.0, 3.0, RoundMode::Up);
        assert_eq!(div_rounded(-1.0, 3.0, RoundMode::Zero), nup);
        assert_eq!(next_up(ndown), nup);
    }

    #[test]
    fn directed_sqrt_brackets_nearest() {
        let nearest = sqrt_rounded(2.0, RoundMode::Nearest);
        let down = sqrt_rounded(2.0, RoundMode::Down);
        let up = sqrt_rounded(2.0, RoundMode::Up);
        assert!(down < up);
        assert_eq!(next_up(down), up);
        assert!(nearest == down || nearest == up);
        // sqrt(2) down squared stays below 2
        assert!(down * down < 2.0);
    }

    #[test]
    fn division_by_zero_is_infinite_in_all_modes() {
        for mode in [
            RoundMode::Nearest,
            RoundMode::Down,
            RoundMode::Up,
            RoundMode::Zero,
        ] {
            assert_eq!(div_rounded(1.0, 0.0, mode), f64::INFINITY);
            assert_eq!(div_rounded(-1.0, 0.0, mode), f64::NEG_INFINITY);
        }
    }

    #[test]
    fn overflow_saturates_in_directed_modes() {
        let big = f64::MAX;
        assert_eq!(mul_rounded(big, 2.0, RoundMode::Nearest), f64::INFINITY);
        assert_eq!(mul_rounded(big, 2.0, RoundMode::Zero), f64::MAX);
        assert_eq!(mul_rounded(big, 2.0, RoundMode::Down), f64::MAX);
        assert_eq!(mul_rounded(big, 2.0, RoundMode::Up), f64::INFINITY);
        assert_eq!(mul_rounded(-big, 2.0, RoundMode::Up), -f64::MAX);
        assert_eq!(mul_rounded(-big, 2.0, RoundMode::Down), f64::NEG_INFINITY);
    }

    #[test]
    fn packed_i32_conversion_is_exact() {
        let packed = (u32::MAX as u64) << 32 | 0x8000_0000;
        let pair = FloatPair::from_packed_i32(packed);
        assert_eq!(pair.lo, i32::MIN as f64);
        assert_eq!(pair.hi, -1.0);
    }

    #[test]
    fn abs_clears_sign_bits() {
        let pair = FloatPair { lo: -2.5, hi: -0.0 }.abs();
        assert_eq!(pair.lo, 2.5);
        assert_eq!(pair.hi.to_bits(), 0);
    }

    #[test]
    fn scale_flips_sign_and_exponent_msb() {
        let pair = FloatPair { lo: 1.0, hi: -1.0 }.scale();
        let (lo, hi) = pair.to_bits();
        assert_eq!(lo, 1.0f64.to_bits() ^ SCALE_MASK);
        assert_eq!(hi, (-1.0f64).to_bits() ^ SCALE_MASK);
        // applying it twice restores the value
        assert_eq!(pair.scale(), FloatPair { lo: 1.0, hi: -1.0 });
    }

    #[test]
    fn max_resolves_nan_to_clamp() {
        let pair = FloatPair {
            lo: f64::NAN,
            hi: 3.0,
        }
        .max(DBL_MIN);
        assert_eq!(pair.lo, DBL_MIN);
        assert_eq!(pair.hi, 3.0);
    }

    #[test]
    fn swap_exchanges_lanes() {
        let pair = FloatPair { lo: 1.0, hi: 2.0 }.swap();
        assert_eq!(pair, FloatPair { lo: 2.0, hi: 1.0 });
    }
}
