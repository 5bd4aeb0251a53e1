//! Exact rational musical time and its mapping onto sample indices.
//!
//! Musical position is kept as an exact `numerator/denominator` fraction
//! rather than a float so that repeated block-boundary arithmetic never
//! accumulates rounding error. Only the sample<->musical mapping, which is
//! inherently lossy in one direction, is allowed to truncate.

mod mapper;
mod time;

pub use mapper::{SampleTime, TimeMapper, TimeMapperIter};
pub use time::{MusicalDuration, MusicalTime};

pub(crate) fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    if a == 0 {
        1
    } else {
        a
    }
}
