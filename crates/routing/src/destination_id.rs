//! Destination identifier type
//!
//! Filter tables intern destination names into `DestinationId`s so the hot
//! path hands out small `Copy` values instead of strings.

use std::fmt;

/// Interned destination handle, unique within one filter table
///
/// # Example
///
/// ```
/// use feedline_routing::DestinationId;
///
/// let dest = DestinationId::new(0);
/// let copy = dest;
/// assert_eq!(dest, copy);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationId(u16);

impl DestinationId {
    /// Maximum number of destinations one table can intern
    pub const MAX: u16 = u16::MAX;

    /// Create a destination ID from its interning index
    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Get the interning index
    #[inline]
    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }

    /// Get the index as usize (for slice indexing)
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dest:{}", self.0)
    }
}

impl From<u16> for DestinationId {
    #[inline]
    fn from(index: u16) -> Self {
        Self::new(index)
    }
}
