use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of readiness conditions.
///
/// Used both as the interest mask handed to
/// [`Registry::register`](super::Registry::register) and as the set of
/// satisfied conditions passed to a callback.
///
/// ```rust,ignore
/// let interest = Interest::WRITABLE | Interest::ERROR;
/// assert!(interest.is_writable());
/// assert!(!interest.is_readable());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

const READABLE: u8 = 0b001;
const WRITABLE: u8 = 0b010;
const ERROR: u8 = 0b100;

impl Interest {
    /// The descriptor can be read without blocking (or is at end of stream).
    pub const READABLE: Interest = Interest(READABLE);

    /// The descriptor can be written without blocking.
    pub const WRITABLE: Interest = Interest(WRITABLE);

    /// The descriptor is in an error state.
    pub const ERROR: Interest = Interest(ERROR);

    /// The empty set.
    pub const fn empty() -> Self {
        Interest(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    pub const fn is_error(self) -> bool {
        self.0 & ERROR != 0
    }

    /// Returns `true` if every condition in `other` is also in `self`.
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both sets.
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    /// Returns the conditions in `self` that are not in `other`.
    pub const fn remove(self, other: Interest) -> Self {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        self.add(other)
    }
}

impl BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        *self = self.add(other);
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Interest::READABLE, "READABLE"),
            (Interest::WRITABLE, "WRITABLE"),
            (Interest::ERROR, "ERROR"),
        ];

        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("(empty)")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let interest = Interest::READABLE | Interest::ERROR;

        assert!(interest.is_readable());
        assert!(interest.is_error());
        assert!(!interest.is_writable());
        assert!(interest.contains(Interest::ERROR));
        assert!(!interest.contains(Interest::READABLE | Interest::WRITABLE));
    }

    #[test]
    fn remove_clears_only_the_given_flags() {
        let interest = (Interest::WRITABLE | Interest::ERROR).remove(Interest::WRITABLE);
        assert_eq!(interest, Interest::ERROR);
        assert!(Interest::empty().is_empty());
    }

    #[test]
    fn debug_lists_flags() {
        let mut interest = Interest::empty();
        assert_eq!(format!("{interest:?}"), "(empty)");

        interest |= Interest::WRITABLE;
        interest |= Interest::ERROR;
        assert_eq!(format!("{interest:?}"), "WRITABLE | ERROR");
    }
}
