use rug::Integer;
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Either `∞`, `-∞`, or an arbitrary precision integer
#[derive(Clone, Eq, PartialEq)]
pub enum Bound {
    INF,          // Positive infinity
    Int(Integer), // Arbitrary precision integer
    NINF,         // Negative infinity
}

use Bound::*;

impl Bound {
    pub fn is_finite(&self) -> bool {
        matches!(self, Int(_))
    }

    pub fn number(&self) -> Option<&Integer> {
        match self {
            Int(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Debug for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            INF => String::from("∞"),
            NINF => String::from("-∞"),
            Int(n) => n.to_string(),
        };
        write!(f, "{}", value)
    }
}

impl Ord for Bound {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            Ordering::Equal
        } else {
            match (self, other) {
                (INF, _) | (_, NINF) => Ordering::Greater,
                (NINF, _) | (_, INF) => Ordering::Less,
                (Int(a), Int(b)) => a.cmp(b),
            }
        }
    }
}

impl PartialOrd for Bound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Integer> for Bound {
    fn from(n: Integer) -> Self {
        Bound::Int(n)
    }
}

impl From<i64> for Bound {
    fn from(n: i64) -> Self {
        Bound::Int(Integer::from(n))
    }
}

impl Add for Bound {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        match (self, other) {
            (INF, _) | (_, INF) => Self::INF,
            (NINF, _) | (_, NINF) => Self::NINF,
            (Int(a), Int(b)) => Self::Int(a + b),
        }
    }
}

impl Sub for Bound {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        match (self, other) {
            (INF, _) | (_, NINF) => Self::INF,
            (NINF, _) | (_, INF) => Self::NINF,
            (Int(a), Int(b)) => Self::Int(a - b),
        }
    }
}

impl Neg for Bound {
    type Output = Self;

    fn neg(self) -> Self {
        match self {
            INF => NINF,
            NINF => INF,
            Int(n) => Int(-n),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Sign {
    Positive,
    Negative,
    Zero,
}

fn sign_of(b: &Bound) -> Sign {
    match b {
        INF => Sign::Positive,
        NINF => Sign::Negative,
        Int(n) if *n > 0 => Sign::Positive,
        Int(n) if *n < 0 => Sign::Negative,
        Int(_) => Sign::Zero,
    }
}

impl Mul for Bound {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let sign = match (sign_of(&self), sign_of(&rhs)) {
            (Sign::Zero, _) | (_, Sign::Zero) => Sign::Zero,
            (Sign::Positive, Sign::Positive) | (Sign::Negative, Sign::Negative) => Sign::Positive,
            _ => Sign::Negative,
        };
        match (self, rhs) {
            (Int(a), Int(b)) => Self::Int(a * b),
            _ => match sign {
                Sign::Positive => INF,
                Sign::Negative => NINF,
                Sign::Zero => Int(Integer::from(0)),
            },
        }
    }
}

impl Div for Bound {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let sign = match (sign_of(&self), sign_of(&rhs)) {
            (Sign::Zero, _) => Sign::Zero,
            (_, Sign::Zero) => panic!("Division by zero"),
            (Sign::Positive, Sign::Positive) | (Sign::Negative, Sign::Negative) => Sign::Positive,
            _ => Sign::Negative,
        };
        match (self, rhs) {
            (Int(a), Int(b)) => Self::Int(a / b),
            (_, INF) | (_, NINF) => Int(Integer::from(0)),
            (INF, _) | (NINF, _) => match sign {
                Sign::Positive => INF,
                Sign::Negative => NINF,
                Sign::Zero => Int(Integer::from(0)),
            },
        }
    }
}

/// Abstract value that represents an interval
/// When `low` <= `high`, it is a normal interval `[low, high]`
/// When `low` == `NINF` && `high` == `INF`, it is `[-∞, ∞]`
/// When `high` < `low`, it is `⊥`
#[derive(Clone, PartialEq)]
pub struct Interval {
    pub low: Bound,
    pub high: Bound,
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bottom() {
            write!(f, "⊥")
        } else {
            write!(f, "[{:?}, {:?}]", self.low, self.high)
        }
    }
}

impl Interval {
    pub fn new(low: Bound, high: Bound) -> Self {
        Interval { low, high }
    }

    pub fn top() -> Self {
        Interval {
            low: NINF,
            high: INF,
        }
    }

    pub fn bottom() -> Self {
        Interval {
            low: INF,
            high: NINF,
        }
    }

    pub fn singleton_of(n: Integer) -> Self {
        Interval {
            low: Int(n.clone()),
            high: Int(n),
        }
    }

    pub fn is_top(&self) -> bool {
        self.low == NINF && self.high == INF
    }

    pub fn is_bottom(&self) -> bool {
        self.high < self.low
    }

    pub fn lb(&self) -> &Bound {
        &self.low
    }

    pub fn ub(&self) -> &Bound {
        &self.high
    }

    /// The unique inhabitant, if the interval has exactly one
    pub fn singleton(&self) -> Option<Integer> {
        match (&self.low, &self.high) {
            (Int(a), Int(b)) if a == b => Some(a.clone()),
            _ => None,
        }
    }

    pub fn leq(&self, other: &Interval) -> bool {
        if self.is_bottom() {
            true
        } else if other.is_bottom() {
            false
        } else {
            other.low <= self.low && self.high <= other.high
        }
    }

    pub fn join(&self, other: &Interval) -> Interval {
        if self.is_bottom() {
            other.clone()
        } else if other.is_bottom() {
            self.clone()
        } else {
            Interval::new(
                self.low.clone().min(other.low.clone()),
                self.high.clone().max(other.high.clone()),
            )
        }
    }

    pub fn meet(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            Interval::bottom()
        } else {
            Interval::new(
                self.low.clone().max(other.low.clone()),
                self.high.clone().min(other.high.clone()),
            )
        }
    }

    pub fn widening_with(&self, other: &Interval) -> Interval {
        if self.is_bottom() {
            other.clone()
        } else if other.is_bottom() {
            self.clone()
        } else {
            let low = if other.low < self.low { NINF } else { self.low.clone() };
            let high = if other.high > self.high { INF } else { self.high.clone() };
            Interval::new(low, high)
        }
    }

    /// Remove `k` from the interval when `k` is one of its endpoints; an
    /// interior hole cannot be represented and leaves the interval unchanged
    pub fn trim(&self, k: &Integer) -> Interval {
        if self.is_bottom() {
            return self.clone();
        }
        if let Some(n) = self.singleton() {
            if n == *k {
                return Interval::bottom();
            }
            return self.clone();
        }
        if self.low == Int(k.clone()) {
            return Interval::new(Int(Integer::from(k + 1i32)), self.high.clone());
        }
        if self.high == Int(k.clone()) {
            return Interval::new(self.low.clone(), Int(Integer::from(k - 1i32)));
        }
        self.clone()
    }

    pub fn less_than(&self, other: &Interval) -> Option<bool> {
        if self.is_bottom() || other.is_bottom() {
            None
        } else if self.high < other.low {
            Some(true)
        } else if other.high <= self.low {
            Some(false)
        } else {
            None
        }
    }

    pub fn less_equal(&self, other: &Interval) -> Option<bool> {
        if self.is_bottom() || other.is_bottom() {
            None
        } else if self.high <= other.low {
            Some(true)
        } else if other.high < self.low {
            Some(false)
        } else {
            None
        }
    }

    pub fn equal_to(&self, other: &Interval) -> Option<bool> {
        match (self.singleton(), other.singleton()) {
            (Some(a), Some(b)) => Some(a == b),
            _ => {
                if self.meet(other).is_bottom() {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    fn is_zero(&self) -> bool {
        self.singleton().map_or(false, |n| n == 0)
    }

    fn all_ones(&self) -> bool {
        self.singleton().map_or(false, |n| n == -1)
    }

    fn binop_if_singletons<F>(&self, rhs: &Interval, f: F) -> Interval
    where
        F: FnOnce(Integer, Integer) -> Option<Integer>,
    {
        if let (Some(a), Some(b)) = (self.singleton(), rhs.singleton()) {
            if let Some(r) = f(a, b) {
                return Interval::singleton_of(r);
            }
        }
        Interval::top()
    }

    /// Unsigned division; both operands are reinterpreted only when they are
    /// known non-negative, otherwise the result is top
    pub fn udiv(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        if self.low >= Bound::from(0) && rhs.low > Bound::from(0) {
            return self.clone() / rhs.clone();
        }
        self.binop_if_singletons(rhs, |a, b| {
            if a >= 0 && b > 0 {
                Some(a / b)
            } else {
                None
            }
        })
    }

    /// Signed remainder; precise on singletons, `[-(|b|-1), |b|-1]` shrunk by
    /// the dividend's sign otherwise
    pub fn srem(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        if let (Some(a), Some(b)) = (self.singleton(), rhs.singleton()) {
            if b != 0 {
                return Interval::singleton_of(a % b);
            }
            return Interval::bottom();
        }
        match rhs.high.clone() {
            Int(b) if b != 0 => {
                let m = Integer::from(b.abs_ref()) - 1i32;
                if self.low >= Bound::from(0) {
                    Interval::new(Int(Integer::from(0)), Int(m))
                } else {
                    Interval::new(Int(-m.clone()), Int(m))
                }
            }
            _ => Interval::top(),
        }
    }

    pub fn urem(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        if let (Some(a), Some(b)) = (self.singleton(), rhs.singleton()) {
            if a >= 0 && b > 0 {
                return Interval::singleton_of(a % b);
            }
        }
        match rhs.high.clone() {
            Int(b) if b > 0 && self.low >= Bound::from(0) => {
                Interval::new(Int(Integer::from(0)), Int(b - 1i32))
            }
            _ => Interval::top(),
        }
    }

    pub fn and(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            Interval::bottom()
        } else if self.is_zero() || rhs.is_zero() {
            Interval::singleton_of(Integer::from(0))
        } else if self.all_ones() {
            rhs.clone()
        } else if rhs.all_ones() {
            self.clone()
        } else {
            self.binop_if_singletons(rhs, |a, b| Some(a & b))
        }
    }

    pub fn or(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            Interval::bottom()
        } else if self.all_ones() || rhs.all_ones() {
            Interval::singleton_of(Integer::from(-1))
        } else if self.is_zero() {
            rhs.clone()
        } else if rhs.is_zero() {
            self.clone()
        } else {
            self.binop_if_singletons(rhs, |a, b| Some(a | b))
        }
    }

    pub fn xor(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            Interval::bottom()
        } else if self.is_zero() {
            rhs.clone()
        } else if rhs.is_zero() {
            self.clone()
        } else {
            self.binop_if_singletons(rhs, |a, b| Some(a ^ b))
        }
    }

    pub fn shl(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        self.binop_if_singletons(rhs, |a, b| b.to_u32().map(|s| a << s))
    }

    /// Logical shift right: only defined on non-negative dividends, where it
    /// coincides with the arithmetic shift
    pub fn lshr(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        self.binop_if_singletons(rhs, |a, b| {
            if a >= 0 {
                b.to_u32().map(|s| a >> s)
            } else {
                None
            }
        })
    }

    pub fn ashr(&self, rhs: &Interval) -> Interval {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        self.binop_if_singletons(rhs, |a, b| b.to_u32().map(|s| a >> s))
    }
}

impl TryFrom<&Interval> for Integer {
    type Error = &'static str;
    fn try_from(value: &Interval) -> Result<Self, Self::Error> {
        value.singleton().ok_or("interval is not a constant")
    }
}

impl From<Integer> for Interval {
    fn from(n: Integer) -> Self {
        Interval::singleton_of(n)
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, other: Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Interval::bottom();
        }
        Interval::new(self.low + other.low, self.high + other.high)
    }
}

impl Sub for Interval {
    type Output = Interval;

    fn sub(self, other: Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Interval::bottom();
        }
        Interval::new(self.low - other.high, self.high - other.low)
    }
}

impl Mul for Interval {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        let a = self.low.clone() * rhs.low.clone();
        let b = self.low.clone() * rhs.high.clone();
        let c = self.high.clone() * rhs.low.clone();
        let d = self.high * rhs.high;
        let all = [a, b, c, d];
        let low = all.iter().min().unwrap().clone();
        let high = all.iter().max().unwrap().clone();
        Interval::new(low, high)
    }
}

impl Div for Interval {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        if self.is_bottom() || rhs.is_bottom() {
            return Interval::bottom();
        }
        // A divisor interval straddling zero gives no useful bound
        if rhs.low <= Bound::from(0) && Bound::from(0) <= rhs.high {
            if rhs.singleton().map_or(false, |n| n == 0) {
                return Interval::bottom();
            }
            return Interval::top();
        }
        let a = self.low.clone() / rhs.low.clone();
        let b = self.low.clone() / rhs.high.clone();
        let c = self.high.clone() / rhs.low.clone();
        let d = self.high / rhs.high;
        let all = [a, b, c, d];
        let low = all.iter().min().unwrap().clone();
        let high = all.iter().max().unwrap().clone();
        Interval::new(low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_cmp() {
        let ninf = Bound::NINF;
        let a = Bound::from(-1);
        let b = Bound::from(0);
        let c = Bound::from(1);
        let inf = Bound::INF;
        assert!(ninf < a && a < b && b < c && c < inf);
    }

    #[test]
    fn test_arith() {
        let x = Interval::new(Bound::from(1), Bound::from(3));
        let y = Interval::new(Bound::from(-2), Bound::from(2));
        assert_eq!(
            x.clone() + y.clone(),
            Interval::new(Bound::from(-1), Bound::from(5))
        );
        assert_eq!(
            x.clone() - y.clone(),
            Interval::new(Bound::from(-1), Bound::from(5))
        );
        assert_eq!(x * y, Interval::new(Bound::from(-6), Bound::from(6)));
    }

    #[test]
    fn test_div_straddling_zero() {
        let x = Interval::new(Bound::from(10), Bound::from(20));
        let y = Interval::new(Bound::from(-1), Bound::from(1));
        assert!((x.clone() / y).is_top());
        let z = Interval::singleton_of(Integer::from(0));
        assert!((x / z).is_bottom());
    }

    #[test]
    fn test_lattice() {
        let x = Interval::new(Bound::from(0), Bound::from(5));
        let y = Interval::new(Bound::from(3), Bound::from(9));
        assert_eq!(x.join(&y), Interval::new(Bound::from(0), Bound::from(9)));
        assert_eq!(x.meet(&y), Interval::new(Bound::from(3), Bound::from(5)));
        assert!(x.meet(&y).leq(&x));
        assert!(x.leq(&x.join(&y)));
        assert!(Interval::bottom().leq(&x));
        assert!(x.leq(&Interval::top()));
    }

    #[test]
    fn test_widening() {
        let x = Interval::new(Bound::from(0), Bound::from(1));
        let y = Interval::new(Bound::from(0), Bound::from(2));
        let w = x.widening_with(&y);
        assert_eq!(w, Interval::new(Bound::from(0), Bound::INF));
        // stable on the second step
        assert_eq!(w.widening_with(&y), w);
    }

    #[test]
    fn test_trim() {
        let x = Interval::new(Bound::from(0), Bound::from(9));
        assert_eq!(
            x.trim(&Integer::from(9)),
            Interval::new(Bound::from(0), Bound::from(8))
        );
        assert_eq!(
            x.trim(&Integer::from(0)),
            Interval::new(Bound::from(1), Bound::from(9))
        );
        // interior holes are not representable
        assert_eq!(x.trim(&Integer::from(4)), x);
        assert!(Interval::singleton_of(Integer::from(7))
            .trim(&Integer::from(7))
            .is_bottom());
    }

    #[test]
    fn test_bitwise() {
        let a = Interval::singleton_of(Integer::from(0b1100));
        let b = Interval::singleton_of(Integer::from(0b1010));
        assert_eq!(a.and(&b), Interval::singleton_of(Integer::from(0b1000)));
        assert_eq!(a.or(&b), Interval::singleton_of(Integer::from(0b1110)));
        assert_eq!(a.xor(&b), Interval::singleton_of(Integer::from(0b0110)));
        let any = Interval::new(Bound::from(0), Bound::from(100));
        assert!(any.and(&b).is_top());
        assert_eq!(
            any.and(&Interval::singleton_of(Integer::from(0))),
            Interval::singleton_of(Integer::from(0))
        );
    }
}
