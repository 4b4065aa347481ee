use std::{
    fmt,
    time::{Duration, SystemTime},
};

/// A spacecraft time value: whole seconds plus a 32-bit binary fraction of a second.
///
/// Sub-second fields narrower than 32 bits (e.g. the 16-bit field of a 6-byte CCSDS
/// time code) are normalised into the upper bits of `subseconds`, so two times always
/// compare and subtract the same way regardless of how they were encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MissionTime {
    /// Whole seconds.
    pub seconds: u32,
    /// Fraction of a second in units of 2^-32 s.
    pub subseconds: u32,
}

impl MissionTime {
    /// Creates a new time value.
    pub const fn new(seconds: u32, subseconds: u32) -> Self {
        Self { seconds, subseconds }
    }

    /// The current wall-clock time since the UNIX epoch.
    pub fn now() -> Self {
        Self::from(SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default())
    }
}

impl From<Duration> for MissionTime {
    fn from(d: Duration) -> Self {
        // (nanos * 2^32) / 1e9 fits comfortably in a u64.
        let subseconds = ((u64::from(d.subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds: d.as_secs() as u32, subseconds }
    }
}

impl From<MissionTime> for Duration {
    fn from(t: MissionTime) -> Self {
        let nanos = (u64::from(t.subseconds) * 1_000_000_000) >> 32;
        Self::new(u64::from(t.seconds), nanos as u32)
    }
}

impl fmt::Display for MissionTime {
    /// Formats as `seconds.micros`, e.g. `1024.500000`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = (u64::from(self.subseconds) * 1_000_000) >> 32;
        write!(f, "{}.{:06}", self.seconds, micros)
    }
}
