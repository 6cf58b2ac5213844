//! Millisatoshi and satoshi amount newtypes.
//!
//! We don't impl `From<u64>` for satoshis implicitly converting to msat
//! because overflow must be handled explicitly by callers — see the
//! "Overflow note" in `spec.md` §4.2.

use std::fmt::{self, Display};
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// An amount denominated in satoshis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Sats(pub u64);

/// An amount denominated in millisatoshis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Msat(pub u64);

impl Sats {
    /// Convert to millisatoshis, returning `None` on overflow instead of
    /// panicking. Callers at the channel-record layer are expected to log a
    /// broken-invariant message and substitute 0 per `spec.md` §4.2.
    pub fn checked_to_msat(self) -> Option<Msat> {
        self.0.checked_mul(1000).map(Msat)
    }
}

impl Msat {
    pub const ZERO: Msat = Msat(0);

    /// Saturating subtraction, used to compute spendable balance
    /// (`our_balance - counterparty_reserve`, floored at 0).
    pub fn saturating_sub(self, other: Msat) -> Msat {
        Msat(self.0.saturating_sub(other.0))
    }
}

impl Add for Msat {
    type Output = Msat;
    fn add(self, rhs: Msat) -> Msat {
        Msat(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Msat {
    type Output = Msat;
    fn sub(self, rhs: Msat) -> Msat {
        Msat(self.0.saturating_sub(rhs.0))
    }
}

impl Display for Sats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sats", self.0)
    }
}

impl Display for Msat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} msat", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sats_to_msat_overflow_is_none() {
        assert_eq!(Sats(0).checked_to_msat(), Some(Msat(0)));
        assert_eq!(Sats(1).checked_to_msat(), Some(Msat(1000)));
        assert_eq!(Sats(u64::MAX).checked_to_msat(), None);
    }

    #[test]
    fn spendable_floors_at_zero() {
        let balance = Msat(500);
        let reserve = Msat(1_000);
        assert_eq!(balance.saturating_sub(reserve), Msat::ZERO);
    }
}
