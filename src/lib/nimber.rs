use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A Sprague-Grundy value. XOR-composable; zero iff losing under normal play.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nimber(u8);

impl Nimber {
    pub const fn new(value: u8) -> Self {
        Nimber(value)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_loss(self) -> bool {
        self.0 == 0
    }

    pub fn is_win(self) -> bool {
        self.0 != 0
    }

    pub fn merge(x: Nimber, y: Nimber) -> Nimber {
        Nimber(x.0 ^ y.0)
    }

    /// The next nimber to try when this one turned out winning for a land.
    pub fn succ(self) -> Nimber {
        Nimber(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Nimber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Nimber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        s.trim()
            .parse::<u8>()
            .map(Nimber)
            .map_err(|_| Error::InvalidNimber(s.to_owned()))
    }
}
