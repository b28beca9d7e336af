//! Pipe sets and device targets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DevId;

/// Largest number of pipes a device may have.
pub const MAX_PIPES: u8 = 32;

/// Set of physical pipes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipeBitmap(u32);

impl PipeBitmap {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Pipes `0..count`.
    #[must_use]
    pub const fn first(count: u8) -> Self {
        if count >= MAX_PIPES {
            Self(u32::MAX)
        } else {
            Self((1u32 << count) - 1)
        }
    }

    #[must_use]
    pub const fn single(pipe: u8) -> Self {
        Self(1u32 << pipe)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, pipe: u8) -> bool {
        pipe < MAX_PIPES && self.0 & (1u32 << pipe) != 0
    }

    pub const fn insert(&mut self, pipe: u8) {
        self.0 |= 1u32 << pipe;
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest pipe in the set.
    #[must_use]
    pub const fn lowest(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Pipes in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..MAX_PIPES).filter(move |&p| self.contains(p))
    }
}

impl FromIterator<u8> for PipeBitmap {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut bmp = Self::EMPTY;
        for pipe in iter {
            bmp.insert(pipe);
        }
        bmp
    }
}

impl fmt::Debug for PipeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Pipe selector of an operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeTarget {
    /// Every pipe of the table.
    #[default]
    All,
    /// One pipe; for asymmetric tables this names the scope whose lowest
    /// pipe it is.
    Pipe(u8),
}

/// Device and pipe an operation is aimed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevTarget {
    pub dev: DevId,
    #[serde(default)]
    pub pipe: PipeTarget,
}

impl DevTarget {
    #[must_use]
    pub const fn all(dev: DevId) -> Self {
        Self {
            dev,
            pipe: PipeTarget::All,
        }
    }

    #[must_use]
    pub const fn pipe(dev: DevId, pipe: u8) -> Self {
        Self {
            dev,
            pipe: PipeTarget::Pipe(pipe),
        }
    }
}
