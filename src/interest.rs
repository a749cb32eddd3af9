use std::{fmt, ops};

/// A set of interests a registration wants to be notified about.
///
/// The empty set has a special meaning: it marks a record as a
/// deregistration candidate (see [`Registry::set_interest`]).
///
/// [`Registry::set_interest`]: crate::registry::Registry::set_interest
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interest(u8);

const READ: u8 = 0b001;
const WRITE: u8 = 0b010;
const EXCEPT: u8 = 0b100;
const ALL: u8 = READ | WRITE | EXCEPT;

impl Interest {
    #[inline]
    pub fn empty() -> Interest {
        Interest(0)
    }

    #[inline]
    pub fn readable() -> Interest {
        Interest(READ)
    }

    #[inline]
    pub fn writable() -> Interest {
        Interest(WRITE)
    }

    #[inline]
    pub fn except() -> Interest {
        Interest(EXCEPT)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(Interest::readable())
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(Interest::writable())
    }

    #[inline]
    pub fn is_except(self) -> bool {
        self.contains(Interest::except())
    }

    #[inline]
    pub fn contains(self, other: Interest) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Interest) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Interest) {
        self.0 &= !other.0;
    }

    /// Build an `Interest` from the wire-level bitmask used by the public
    /// API (`READ = 1, WRITE = 2, EXCEPT = 4`).
    pub fn from_bits(bits: u8) -> Interest {
        Interest(bits & ALL)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;

    #[inline]
    fn bitor(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Interest) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Interest {
    type Output = Interest;

    #[inline]
    fn bitand(self, other: Interest) -> Interest {
        Interest(self.0 & other.0)
    }
}

impl ops::Sub for Interest {
    type Output = Interest;

    #[inline]
    fn sub(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        let mut flag = |interest: Interest, name: &str| -> fmt::Result {
            if self.contains(interest) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", name)?;
                one = true;
            }
            Ok(())
        };

        flag(Interest::readable(), "READ")?;
        flag(Interest::writable(), "WRITE")?;
        flag(Interest::except(), "EXCEPT")?;

        if !one {
            write!(fmt, "(empty)")?;
        }

        Ok(())
    }
}
