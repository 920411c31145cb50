use core::fmt;

/// Sequence number space used by a connection. Selects both the wraparound
/// point of N(S)/N(R) and the width of the I and S frame control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Modulo {
    /// Modulo 8, one-octet control field (AX.25 v2.0, SABM).
    #[default]
    Eight,
    /// Modulo 128, two-octet control field (AX.25 v2.2, SABME).
    OneTwentyEight,
}

impl Modulo {
    /// The number of distinct sequence numbers.
    pub fn value(self) -> u8 {
        match self {
            Modulo::Eight => 8,
            Modulo::OneTwentyEight => 128,
        }
    }

    /// The largest window size that can be used without ambiguity.
    pub fn max_window(self) -> u8 {
        self.value() - 1
    }

    /// Number of control octets carried by I and S frames. U frames always use one.
    pub fn control_octets(self) -> usize {
        match self {
            Modulo::Eight => 1,
            Modulo::OneTwentyEight => 2,
        }
    }

    /// The sequence number following `n`.
    pub fn next(self, n: u8) -> u8 {
        ((n as u16 + 1) % self.value() as u16) as u8
    }

    /// Whether `n` is a legal sequence number in this space.
    pub fn contains(self, n: u8) -> bool {
        n < self.value()
    }
}

impl fmt::Display for Modulo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "modulo {}", self.value())
    }
}

/// The forward gap from `follower` up to `leader`, wrapping at `modulus`.
///
/// `distance(1, 6, 8)` is 3: counting 6, 7, 0, 1.
pub fn distance(leader: u8, follower: u8, modulus: u8) -> u8 {
    if leader >= follower {
        leader - follower
    } else {
        // Widen to avoid overflow when modulus is 128 and leader is large
        ((leader as u16 + modulus as u16) - follower as u16) as u8
    }
}
