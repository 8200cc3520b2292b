//! Exact fraction arithmetic
//!
//! Every rate, machine count and effect multiplier in the planner is a
//! [`Rational`], so long dependency chains never accumulate floating point
//! drift. Values are always kept in lowest terms with a positive denominator.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};
use std::str::FromStr;
use std::sync::LazyLock;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Largest denominator produced when approximating a float.
pub const MAX_DENOMINATOR: i64 = 100_000;

/// Relative distance under which a float is considered equal to a convergent.
const FLOAT_NOISE: f64 = 1e-9;

/// Terminating decimals longer than this are printed as fractions.
const MAX_DECIMAL_DIGITS: u32 = 6;

static MIXED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])?(\d+)\s+(\d+)\s*/\s*(\d+)$").expect("mixed fraction pattern is valid")
});
static FRACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?\d+)\s*/\s*([+-]?\d+)$").expect("fraction pattern is valid")
});
static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])?(\d*)(?:\.(\d*))?$").expect("decimal pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RationalError {
    #[error("division by zero")]
    DivideByZero,
    #[error("cannot convert non-finite number {0} to a rational")]
    NotFinite(String),
    #[error("invalid rational '{0}'")]
    Parse(String),
}

/// An exact fraction `p / q` with `gcd(|p|, q) = 1` and `q > 0`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Rational {
    p: BigInt,
    q: BigInt,
}

impl Rational {
    /// Build `p / q` in lowest terms.
    pub fn new(p: impl Into<BigInt>, q: impl Into<BigInt>) -> Result<Self, RationalError> {
        let q = q.into();
        if q.is_zero() {
            return Err(RationalError::DivideByZero);
        }
        Ok(Self::reduce(p.into(), q))
    }

    /// Build `p / q` from machine integers.
    ///
    /// # Panics
    ///
    /// Panics if `q` is zero, like integer division does.
    pub fn fraction(p: i64, q: i64) -> Self {
        assert!(q != 0, "rational denominator must be non-zero");
        Self::reduce(BigInt::from(p), BigInt::from(q))
    }

    pub fn zero() -> Self {
        Self { p: BigInt::zero(), q: BigInt::one() }
    }

    pub fn one() -> Self {
        Self { p: BigInt::one(), q: BigInt::one() }
    }

    fn reduce(p: BigInt, q: BigInt) -> Self {
        let g = p.gcd(&q);
        let (mut p, mut q) = if g.is_one() || g.is_zero() { (p, q) } else { (p / &g, q / &g) };
        if q.is_negative() {
            p = -p;
            q = -q;
        }
        if p.is_zero() {
            q = BigInt::one();
        }
        Self { p, q }
    }

    pub fn numerator(&self) -> &BigInt {
        &self.p
    }

    pub fn denominator(&self) -> &BigInt {
        &self.q
    }

    pub fn is_zero(&self) -> bool {
        self.p.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.p.is_positive()
    }

    pub fn is_negative(&self) -> bool {
        self.p.is_negative()
    }

    pub fn is_integer(&self) -> bool {
        self.q.is_one()
    }

    pub fn abs(&self) -> Self {
        Self { p: self.p.abs(), q: self.q.clone() }
    }

    pub fn floor(&self) -> Self {
        Self { p: self.p.div_floor(&self.q), q: BigInt::one() }
    }

    pub fn ceil(&self) -> Self {
        let neg_floor = (-&self.p).div_floor(&self.q);
        Self { p: -neg_floor, q: BigInt::one() }
    }

    pub fn reciprocal(&self) -> Result<Self, RationalError> {
        Self::new(self.q.clone(), self.p.clone())
    }

    pub fn checked_div(&self, rhs: &Rational) -> Result<Self, RationalError> {
        if rhs.is_zero() {
            return Err(RationalError::DivideByZero);
        }
        Ok(Self::reduce(&self.p * &rhs.q, &self.q * &rhs.p))
    }

    /// Round to `digits` decimal places, halves away from zero.
    pub fn to_precision(&self, digits: u32) -> Self {
        let scale = BigInt::from(10u32).pow(digits);
        let scaled = self.p.abs() * &scale;
        let two = BigInt::from(2u32);
        let mut rounded = (scaled * &two + &self.q).div_floor(&(&self.q * &two));
        if self.p.is_negative() {
            rounded = -rounded;
        }
        Self::reduce(rounded, scale)
    }

    pub fn to_f64(&self) -> f64 {
        match (self.p.to_f64(), self.q.to_f64()) {
            (Some(p), Some(q)) if p.is_finite() && q.is_finite() => p / q,
            // Huge operands: shift both down before dividing
            _ => {
                let bits = self.p.bits().max(self.q.bits()).saturating_sub(1000);
                let p = (&self.p >> bits).to_f64().unwrap_or(f64::NAN);
                let q = (&self.q >> bits).to_f64().unwrap_or(f64::NAN);
                p / q
            }
        }
    }

    /// Convert a float, exactly for integers and through a bounded
    /// continued fraction otherwise.
    pub fn from_f64(value: f64) -> Result<Self, RationalError> {
        Self::approximate(value, MAX_DENOMINATOR)
    }

    /// Best rational approximation of `value` with denominator at most
    /// `max_denominator`. Stops early once a convergent is within float noise.
    pub fn approximate(value: f64, max_denominator: i64) -> Result<Self, RationalError> {
        if !value.is_finite() {
            return Err(RationalError::NotFinite(value.to_string()));
        }
        if value.fract() == 0.0 {
            let p = BigInt::from_f64(value).ok_or_else(|| RationalError::NotFinite(value.to_string()))?;
            return Ok(Self { p, q: BigInt::one() });
        }

        let target = value.abs();
        let max_den = i128::from(max_denominator.max(1));
        let (mut p0, mut q0, mut p1, mut q1) = (0i128, 1i128, 1i128, 0i128);
        let mut rem = target;
        loop {
            let a = rem.floor();
            let a_int = a as i128;
            let p2 = a_int * p1 + p0;
            let q2 = a_int * q1 + q0;
            if q2 > max_den {
                // Best semiconvergent that still fits the bound
                let k = (max_den - q0) / q1;
                if k > 0 {
                    let (ps, qs) = (k * p1 + p0, k * q1 + q0);
                    let err_semi = (ps as f64 / qs as f64 - target).abs();
                    let err_conv = (p1 as f64 / q1 as f64 - target).abs();
                    if err_semi < err_conv {
                        p1 = ps;
                        q1 = qs;
                    }
                }
                break;
            }
            (p0, q0, p1, q1) = (p1, q1, p2, q2);

            let approx = p1 as f64 / q1 as f64;
            let frac = rem - a;
            if (approx - target).abs() <= FLOAT_NOISE * target || frac <= f64::EPSILON {
                break;
            }
            rem = 1.0 / frac;
        }

        let p = if value < 0.0 { -p1 } else { p1 };
        Self::new(BigInt::from(p), BigInt::from(q1))
    }

    /// Exact decimal form when the value terminates within `max_digits`.
    pub fn to_decimal_string(&self, max_digits: u32) -> Option<String> {
        let mut rest = self.q.clone();
        let (two, five) = (BigInt::from(2u32), BigInt::from(5u32));
        let (mut twos, mut fives) = (0u32, 0u32);
        while (&rest % &two).is_zero() {
            rest /= &two;
            twos += 1;
        }
        while (&rest % &five).is_zero() {
            rest /= &five;
            fives += 1;
        }
        if !rest.is_one() {
            return None;
        }
        let digits = twos.max(fives);
        if digits > max_digits {
            return None;
        }
        let scaled = self.p.abs() * BigInt::from(10u32).pow(digits) / &self.q;
        let sign = if self.p.is_negative() { "-" } else { "" };
        if digits == 0 {
            return Some(format!("{sign}{scaled}"));
        }
        let divisor = BigInt::from(10u32).pow(digits);
        let (int_part, frac_part) = scaled.div_rem(&divisor);
        let frac_part = frac_part.to_string();
        Some(format!("{sign}{int_part}.{frac_part:0>width$}", width = digits as usize))
    }

    /// Fraction form, optionally as a mixed number (`"3 1/2"`).
    pub fn to_fraction(&self, mixed: bool) -> String {
        if self.is_integer() {
            return self.p.to_string();
        }
        if mixed && self.p.abs() > self.q {
            let sign = if self.p.is_negative() { "-" } else { "" };
            let (whole, part) = self.p.abs().div_rem(&self.q);
            return format!("{sign}{whole} {part}/{}", self.q);
        }
        format!("{}/{}", self.p, self.q)
    }

    fn parse_decimal(sign: Option<&str>, int_part: &str, frac_part: &str) -> Option<Self> {
        let digits = format!("{int_part}{frac_part}");
        let mut p: BigInt = digits.parse().ok()?;
        if sign == Some("-") {
            p = -p;
        }
        let q = BigInt::from(10u32).pow(frac_part.len() as u32);
        Some(Self::reduce(p, q))
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::zero()
    }
}

macro_rules! from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Rational {
                fn from(value: $t) -> Self {
                    Self { p: BigInt::from(value), q: BigInt::one() }
                }
            }
        )*
    };
}

from_integer!(i32, i64, u32, u64, usize);

impl From<BigInt> for Rational {
    fn from(value: BigInt) -> Self {
        Self { p: value, q: BigInt::one() }
    }
}

impl FromStr for Rational {
    type Err = RationalError;

    /// Accepts integers, decimals, `p/q` and mixed `n p/q` forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || RationalError::Parse(s.to_string());

        if let Some(cap) = MIXED_RE.captures(s) {
            let whole: BigInt = cap[2].parse().map_err(|_| invalid())?;
            let p: BigInt = cap[3].parse().map_err(|_| invalid())?;
            let q: BigInt = cap[4].parse().map_err(|_| invalid())?;
            if q.is_zero() {
                return Err(RationalError::DivideByZero);
            }
            let value = Self::reduce(whole * &q + p, q);
            return Ok(if cap.get(1).map(|m| m.as_str()) == Some("-") { -value } else { value });
        }

        if let Some(cap) = FRACTION_RE.captures(s) {
            let p: BigInt = cap[1].trim_start_matches('+').parse().map_err(|_| invalid())?;
            let q: BigInt = cap[2].trim_start_matches('+').parse().map_err(|_| invalid())?;
            return Self::new(p, q);
        }

        if let Some(cap) = DECIMAL_RE.captures(s) {
            let int_part = cap.get(2).map_or("", |m| m.as_str());
            let frac_part = cap.get(3).map_or("", |m| m.as_str());
            if !int_part.is_empty() || !frac_part.is_empty() {
                return Self::parse_decimal(cap.get(1).map(|m| m.as_str()), int_part, frac_part)
                    .ok_or_else(invalid);
            }
        }

        // Scientific notation and friends
        match s.parse::<f64>() {
            Ok(value) if value.is_finite() => Self::from_f64(value),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Rational {
    /// Integers print plainly, short terminating decimals as decimals and
    /// everything else as `p/q`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integer() {
            return write!(f, "{}", self.p);
        }
        match self.to_decimal_string(MAX_DECIMAL_DIGITS) {
            Some(decimal) => f.write_str(&decimal),
            None => write!(f, "{}/{}", self.p, self.q),
        }
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.p, self.q)
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.p * &other.q).cmp(&(&other.p * &self.q))
    }
}

fn add_impl(a: &Rational, b: &Rational) -> Rational {
    if a.q == b.q {
        return Rational::reduce(&a.p + &b.p, a.q.clone());
    }
    Rational::reduce(&a.p * &b.q + &b.p * &a.q, &a.q * &b.q)
}

fn sub_impl(a: &Rational, b: &Rational) -> Rational {
    if a.q == b.q {
        return Rational::reduce(&a.p - &b.p, a.q.clone());
    }
    Rational::reduce(&a.p * &b.q - &b.p * &a.q, &a.q * &b.q)
}

fn mul_impl(a: &Rational, b: &Rational) -> Rational {
    Rational::reduce(&a.p * &b.p, &a.q * &b.q)
}

fn div_impl(a: &Rational, b: &Rational) -> Rational {
    match a.checked_div(b) {
        Ok(value) => value,
        Err(_) => panic!("attempt to divide a rational by zero"),
    }
}

macro_rules! forward_binop {
    ($imp:ident, $method:ident, $func:ident) => {
        impl $imp<Rational> for Rational {
            type Output = Rational;
            fn $method(self, rhs: Rational) -> Rational {
                $func(&self, &rhs)
            }
        }

        impl $imp<&Rational> for Rational {
            type Output = Rational;
            fn $method(self, rhs: &Rational) -> Rational {
                $func(&self, rhs)
            }
        }

        impl $imp<Rational> for &Rational {
            type Output = Rational;
            fn $method(self, rhs: Rational) -> Rational {
                $func(self, &rhs)
            }
        }

        impl $imp<&Rational> for &Rational {
            type Output = Rational;
            fn $method(self, rhs: &Rational) -> Rational {
                $func(self, rhs)
            }
        }
    };
}

forward_binop!(Add, add, add_impl);
forward_binop!(Sub, sub, sub_impl);
forward_binop!(Mul, mul, mul_impl);
// Panics on a zero divisor; use `checked_div` for untrusted values.
forward_binop!(Div, div, div_impl);

impl AddAssign<&Rational> for Rational {
    fn add_assign(&mut self, rhs: &Rational) {
        *self = add_impl(self, rhs);
    }
}

impl AddAssign<Rational> for Rational {
    fn add_assign(&mut self, rhs: Rational) {
        *self = add_impl(self, &rhs);
    }
}

impl SubAssign<&Rational> for Rational {
    fn sub_assign(&mut self, rhs: &Rational) {
        *self = sub_impl(self, rhs);
    }
}

impl SubAssign<Rational> for Rational {
    fn sub_assign(&mut self, rhs: Rational) {
        *self = sub_impl(self, &rhs);
    }
}

impl MulAssign<&Rational> for Rational {
    fn mul_assign(&mut self, rhs: &Rational) {
        *self = mul_impl(self, rhs);
    }
}

impl Neg for Rational {
    type Output = Rational;
    fn neg(self) -> Rational {
        Rational { p: -self.p, q: self.q }
    }
}

impl Neg for &Rational {
    type Output = Rational;
    fn neg(self) -> Rational {
        Rational { p: -&self.p, q: self.q.clone() }
    }
}

impl Sum for Rational {
    fn sum<I: Iterator<Item = Rational>>(iter: I) -> Self {
        iter.fold(Rational::zero(), |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Rational> for Rational {
    fn sum<I: Iterator<Item = &'a Rational>>(iter: I) -> Self {
        iter.fold(Rational::zero(), |acc, x| acc + x)
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct RationalVisitor;

impl Visitor<'_> for RationalVisitor {
    type Value = Rational;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or a rational string such as \"3/2\"")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Rational, E> {
        Ok(Rational::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Rational, E> {
        Ok(Rational::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Rational, E> {
        // Go through the shortest decimal text so 0.1 stays 1/10
        v.to_string().parse().map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Rational, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Rational {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RationalVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn r(s: &str) -> Rational {
        s.parse().unwrap()
    }

    fn random_rational(rng: &mut StdRng) -> Rational {
        let p: i64 = rng.gen_range(-10_000..10_000);
        let q: i64 = rng.gen_range(1..5_000);
        Rational::fraction(p, q)
    }

    #[test]
    fn new_reduces_to_lowest_terms() {
        let x = Rational::new(6, -8).unwrap();
        assert_eq!(x.numerator(), &BigInt::from(-3));
        assert_eq!(x.denominator(), &BigInt::from(4));

        let zero = Rational::new(0, -7).unwrap();
        assert_eq!(zero, Rational::zero());
        assert_eq!(zero.denominator(), &BigInt::one());
    }

    #[test]
    fn zero_denominator_is_rejected() {
        assert_eq!(Rational::new(1, 0), Err(RationalError::DivideByZero));
        assert_eq!(Rational::one().checked_div(&Rational::zero()), Err(RationalError::DivideByZero));
        assert_eq!(Rational::zero().reciprocal(), Err(RationalError::DivideByZero));
        assert_eq!("3/0".parse::<Rational>(), Err(RationalError::DivideByZero));
    }

    #[test]
    #[should_panic(expected = "divide a rational by zero")]
    fn div_operator_panics_on_zero() {
        let _ = Rational::one() / Rational::zero();
    }

    #[test]
    fn randomized_inverse_operations() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let x = random_rational(&mut rng);
            let y = random_rational(&mut rng);
            assert_eq!(&(&x + &y) - &y, x);
            if !y.is_zero() {
                assert_eq!(&(&x * &y) / &y, x);
            }
            let g = x.numerator().gcd(x.denominator());
            assert!(g.is_one() || x.is_zero());
            assert!(x.denominator().is_positive());
        }
    }

    #[test]
    fn randomized_string_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let x = random_rational(&mut rng);
            assert_eq!(r(&x.to_string()), x);
            assert_eq!(r(&x.to_fraction(true)), x);
            assert_eq!(r(&x.to_fraction(false)), x);
        }
    }

    #[test]
    fn parses_every_supported_form() {
        assert_eq!(r("3"), Rational::from(3));
        assert_eq!(r("-3/6"), Rational::fraction(-1, 2));
        assert_eq!(r("1 1/2"), Rational::fraction(3, 2));
        assert_eq!(r("-2 1/4"), Rational::fraction(-9, 4));
        assert_eq!(r("0.125"), Rational::fraction(1, 8));
        assert_eq!(r(".5"), Rational::fraction(1, 2));
        assert_eq!(r("-1.50"), Rational::fraction(-3, 2));
        assert_eq!(r("1e-3"), Rational::fraction(1, 1000));
        assert!(matches!("abc".parse::<Rational>(), Err(RationalError::Parse(_))));
        assert!(matches!("".parse::<Rational>(), Err(RationalError::Parse(_))));
    }

    #[test]
    fn display_prefers_short_decimals() {
        assert_eq!(Rational::from(42).to_string(), "42");
        assert_eq!(Rational::fraction(32, 5).to_string(), "6.4");
        assert_eq!(Rational::fraction(-1, 8).to_string(), "-0.125");
        assert_eq!(Rational::fraction(1, 3).to_string(), "1/3");
        assert_eq!(Rational::fraction(1, 1024).to_string(), "1/1024");
        assert_eq!(Rational::fraction(7, 2).to_fraction(true), "3 1/2");
        assert_eq!(Rational::fraction(-7, 2).to_fraction(true), "-3 1/2");
    }

    #[test]
    fn rounding_helpers() {
        let x = Rational::fraction(-7, 2);
        assert_eq!(x.floor(), Rational::from(-4));
        assert_eq!(x.ceil(), Rational::from(-3));
        assert_eq!(x.abs(), Rational::fraction(7, 2));
        assert_eq!(x.reciprocal().unwrap(), Rational::fraction(-2, 7));
        assert_eq!(Rational::fraction(2, 3).to_precision(2), Rational::fraction(67, 100));
        assert_eq!(Rational::fraction(-1, 8).to_precision(2), Rational::fraction(-13, 100));
        assert_eq!(Rational::fraction(1, 3).to_precision(0), Rational::zero());
    }

    #[test]
    fn from_f64_recovers_small_fractions() {
        assert_eq!(Rational::from_f64(4.0).unwrap(), Rational::from(4));
        assert_eq!(Rational::from_f64(0.1).unwrap(), Rational::fraction(1, 10));
        assert_eq!(Rational::from_f64(6.4000000000000004).unwrap(), Rational::fraction(32, 5));
        assert_eq!(Rational::from_f64(1.0 / 3.0).unwrap(), Rational::fraction(1, 3));
        assert_eq!(Rational::from_f64(-2.0 / 7.0 + 1e-12).unwrap(), Rational::fraction(-2, 7));
        // 1/49995 is within 1e-9 of this but far off relative to its size
        assert_eq!(Rational::from_f64(2.0 / 99_991.0).unwrap(), Rational::fraction(2, 99_991));
        assert!(Rational::from_f64(f64::NAN).is_err());

        let pi = Rational::from_f64(std::f64::consts::PI).unwrap();
        assert!(pi.denominator() <= &BigInt::from(MAX_DENOMINATOR));
        assert!((pi.to_f64() - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn ordering_and_sum() {
        let values = [Rational::fraction(1, 2), Rational::fraction(1, 3), Rational::fraction(1, 6)];
        assert_eq!(values.iter().sum::<Rational>(), Rational::one());
        assert!(Rational::fraction(1, 3) < Rational::fraction(1, 2));
        assert!(Rational::fraction(-1, 2) < Rational::zero());
        assert_eq!(Rational::fraction(1, 5).max(Rational::fraction(1, 10)), Rational::fraction(1, 5));
    }

    #[test]
    fn serde_accepts_numbers_and_strings() {
        let values: Vec<Rational> = serde_json::from_str(r#"[3, 3.2, "1/3", "1 1/2"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Rational::from(3),
                Rational::fraction(16, 5),
                Rational::fraction(1, 3),
                Rational::fraction(3, 2)
            ]
        );
        assert_eq!(serde_json::to_string(&Rational::fraction(1, 3)).unwrap(), "\"1/3\"");
    }
}
