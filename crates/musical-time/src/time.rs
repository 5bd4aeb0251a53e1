use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Rem, Sub};

use crate::gcd;

/// An exact rational number, always stored with a positive, reduced
/// denominator. Shared arithmetic core for [`MusicalTime`] and
/// [`MusicalDuration`] — they differ only in what operations make sense on
/// them, not in how the fraction itself behaves.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Fraction {
    num: i64,
    den: i64,
}

impl Fraction {
    fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "musical time with a zero denominator");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num, den);
        Fraction {
            num: num / g,
            den: den / g,
        }
    }

    fn zero() -> Self {
        Fraction { num: 0, den: 1 }
    }

    fn cmp_to(self, other: Fraction) -> Ordering {
        // a/b vs c/d, both b,d > 0 => compare a*d vs c*b
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }

    fn add(self, other: Fraction) -> Fraction {
        Fraction::new(
            self.num * other.den + other.num * self.den,
            self.den * other.den,
        )
    }

    fn sub(self, other: Fraction) -> Fraction {
        Fraction::new(
            self.num * other.den - other.num * self.den,
            self.den * other.den,
        )
    }

    fn mul(self, other: Fraction) -> Fraction {
        Fraction::new(self.num * other.num, self.den * other.den)
    }

    fn div(self, other: Fraction) -> Fraction {
        assert!(other.num != 0, "division of musical time by zero");
        Fraction::new(self.num * other.den, self.den * other.num)
    }

    /// Positive remainder of `self` modulo `other`, matching the original
    /// engine's `Fraction::mod` (always returns a value in `[0, other)`).
    fn rem(self, other: Fraction) -> Fraction {
        assert!(other.num != 0, "modulo of musical time by zero");
        let den = self.den * other.den;
        let a = other.num * self.den;
        let rem = ((self.num * other.den) % a + a) % a;
        Fraction::new(rem, den)
    }

    fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

macro_rules! musical_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Fraction);

        impl $name {
            pub fn new(numerator: i64, denominator: i64) -> Self {
                $name(Fraction::new(numerator, denominator))
            }

            pub fn zero() -> Self {
                $name(Fraction::zero())
            }

            pub fn numerator(self) -> i64 {
                self.0.num
            }

            pub fn denominator(self) -> i64 {
                self.0.den
            }

            pub fn to_f64(self) -> f64 {
                self.0.to_f64()
            }

            pub fn to_f32(self) -> f32 {
                self.0.to_f64() as f32
            }

            pub fn is_negative(self) -> bool {
                self.0.num < 0
            }
        }

        impl From<i64> for $name {
            fn from(n: i64) -> Self {
                $name(Fraction::new(n, 1))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::zero()
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0.cmp_to(other.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "({}/{})"),
                    self.0.num, self.0.den
                )
            }
        }
    };
}

musical_newtype!(MusicalDuration);
musical_newtype!(MusicalTime);

impl Mul<MusicalDuration> for MusicalDuration {
    type Output = MusicalDuration;
    fn mul(self, rhs: MusicalDuration) -> MusicalDuration {
        MusicalDuration(self.0.mul(rhs.0))
    }
}

impl Div<MusicalDuration> for MusicalDuration {
    type Output = MusicalDuration;
    fn div(self, rhs: MusicalDuration) -> MusicalDuration {
        MusicalDuration(self.0.div(rhs.0))
    }
}

impl Add<MusicalDuration> for MusicalDuration {
    type Output = MusicalDuration;
    fn add(self, rhs: MusicalDuration) -> MusicalDuration {
        MusicalDuration(self.0.add(rhs.0))
    }
}

impl Sub<MusicalDuration> for MusicalDuration {
    type Output = MusicalDuration;
    fn sub(self, rhs: MusicalDuration) -> MusicalDuration {
        MusicalDuration(self.0.sub(rhs.0))
    }
}

impl Rem<MusicalDuration> for MusicalDuration {
    type Output = MusicalDuration;
    fn rem(self, rhs: MusicalDuration) -> MusicalDuration {
        MusicalDuration(self.0.rem(rhs.0))
    }
}

impl Add<MusicalDuration> for MusicalTime {
    type Output = MusicalTime;
    fn add(self, rhs: MusicalDuration) -> MusicalTime {
        MusicalTime(self.0.add(rhs.0))
    }
}

impl Sub<MusicalDuration> for MusicalTime {
    type Output = MusicalTime;
    fn sub(self, rhs: MusicalDuration) -> MusicalTime {
        MusicalTime(self.0.sub(rhs.0))
    }
}

/// The distance between two points in musical time.
impl Sub<MusicalTime> for MusicalTime {
    type Output = MusicalDuration;
    fn sub(self, rhs: MusicalTime) -> MusicalDuration {
        MusicalDuration(self.0.sub(rhs.0))
    }
}

impl Mul<MusicalDuration> for MusicalTime {
    type Output = MusicalTime;
    fn mul(self, rhs: MusicalDuration) -> MusicalTime {
        MusicalTime(self.0.mul(rhs.0))
    }
}

impl Div<MusicalDuration> for MusicalTime {
    type Output = MusicalTime;
    fn div(self, rhs: MusicalDuration) -> MusicalTime {
        MusicalTime(self.0.div(rhs.0))
    }
}

impl Rem<MusicalDuration> for MusicalTime {
    type Output = MusicalTime;
    fn rem(self, rhs: MusicalDuration) -> MusicalTime {
        MusicalTime(self.0.rem(rhs.0))
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::{MusicalDuration, MusicalTime};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Wire {
        numerator: i64,
        denominator: i64,
    }

    macro_rules! impl_serde {
        ($name:ident) => {
            impl Serialize for $name {
                fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                    Wire {
                        numerator: self.numerator(),
                        denominator: self.denominator(),
                    }
                    .serialize(s)
                }
            }

            impl<'de> Deserialize<'de> for $name {
                fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                    let wire = Wire::deserialize(d)?;
                    Ok($name::new(wire.numerator, wire.denominator))
                }
            }
        };
    }

    impl_serde!(MusicalDuration);
    impl_serde!(MusicalTime);
}
