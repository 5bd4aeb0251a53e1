use crate::{MusicalDuration, MusicalTime};

/// `{start_time, end_time}` pair for one audio sample within a block.
///
/// `start_time.numerator() < 0` is the sentinel for "transport stopped at
/// this sample" (see [`SampleTime::is_stopped`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleTime {
    pub start_time: MusicalTime,
    pub end_time: MusicalTime,
}

impl SampleTime {
    pub fn stopped() -> Self {
        SampleTime {
            start_time: MusicalTime::new(-1, 1),
            end_time: MusicalTime::zero(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.start_time.numerator() < 0
    }
}

impl Default for SampleTime {
    fn default() -> Self {
        SampleTime::stopped()
    }
}

/// Pure mapping between sample index and musical time at a fixed tempo and
/// sample rate: `musical = bpm * sample / (4 * 60 * sample_rate)`.
///
/// Cheap to copy; a [`TimeMapperIter`] embeds one by value so that callers
/// (e.g. the Player) can tell whether a cached iterator still belongs to the
/// mapper that produced it without any pointer bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimeMapper {
    bpm: u32,
    sample_rate: u32,
    duration: MusicalDuration,
}

impl TimeMapper {
    pub fn new(sample_rate: u32) -> Self {
        TimeMapper {
            bpm: 120,
            sample_rate,
            duration: MusicalDuration::new(4, 1),
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: u32) {
        self.bpm = bpm;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> MusicalDuration {
        self.duration
    }

    pub fn set_duration(&mut self, duration: MusicalDuration) {
        self.duration = duration;
    }

    pub fn end_time(&self) -> MusicalTime {
        MusicalTime::zero() + self.duration
    }

    pub fn num_samples(&self) -> u64 {
        self.musical_to_sample_time(self.end_time())
    }

    pub fn sample_to_musical_time(&self, sample: u64) -> MusicalTime {
        MusicalTime::new(self.bpm as i64 * sample as i64, 4 * 60 * self.sample_rate as i64)
    }

    /// Lossy in the forward direction: rounds toward zero. Monotonic
    /// in `sample` but not guaranteed to invert `sample_to_musical_time`
    /// exactly.
    pub fn musical_to_sample_time(&self, musical_time: MusicalTime) -> u64 {
        let num = 4i128 * 60 * self.sample_rate as i128 * musical_time.numerator() as i128;
        let den = self.bpm as i128 * musical_time.denominator() as i128;
        if den == 0 {
            return 0;
        }
        (num / den).max(0) as u64
    }

    /// Forward iterator starting at sample `0`.
    pub fn iter(&self) -> TimeMapperIter {
        TimeMapperIter {
            mapper: *self,
            sample: 0,
        }
    }

    /// Iterator seeked to the sample closest to (rounding toward zero)
    /// `time`.
    pub fn find(&self, time: MusicalTime) -> TimeMapperIter {
        TimeMapperIter {
            mapper: *self,
            sample: self.musical_to_sample_time(time),
        }
    }
}

/// An iterator over musical-time boundaries, one per sample. Carries its
/// own copy of the [`TimeMapper`] it was built from so callers can detect a
/// stale iterator after a Program swap changed `bpm`/`duration`.
#[derive(Clone, Copy)]
pub struct TimeMapperIter {
    mapper: TimeMapper,
    sample: u64,
}

impl TimeMapperIter {
    pub fn belongs_to(&self, mapper: &TimeMapper) -> bool {
        self.mapper == *mapper
    }
}

impl Iterator for TimeMapperIter {
    type Item = MusicalTime;

    fn next(&mut self) -> Option<MusicalTime> {
        self.sample += 1;
        Some(self.mapper.sample_to_musical_time(self.sample))
    }
}
