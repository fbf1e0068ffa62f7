use serde::{Deserialize, Serialize};

/// A set of colors stored as a bitset, bit `i` is set if color `i` is part of the set.
///
/// This is the key of the dynamic programming tables of the exact solver, so its width is the
/// hard upper bound on the number of colors that can be solved exactly.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct ColorSet(u64);

impl ColorSet {
    /// The maximal number of distinct colors a set can hold.
    pub const CAPACITY: usize = u64::BITS as usize;

    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The set with exactly the given bits
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// All colors below `count`, capped at [`Self::CAPACITY`]
    pub const fn first(count: usize) -> Self {
        if count >= Self::CAPACITY {
            Self(u64::MAX)
        } else {
            Self((1 << count) - 1)
        }
    }

    /// A set containing only the given color.
    /// # Panics
    /// If the color does not fit in the set, see [`Self::CAPACITY`].
    pub const fn single(color: usize) -> Self {
        assert!(color < Self::CAPACITY);
        Self(1 << color)
    }

    /// The set for an optional color, the root of a graph has no color and results in the empty set.
    pub const fn from_color(color: Option<usize>) -> Self {
        match color {
            Some(c) => Self::single(c),
            None => Self::empty(),
        }
    }

    /// The raw bits
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Check if the given color is part of this set.
    pub const fn contains(self, color: usize) -> bool {
        color < Self::CAPACITY && (self.0 >> color) & 1 == 1
    }

    /// Add a color to this set.
    /// # Panics
    /// If the color does not fit in the set, see [`Self::CAPACITY`].
    pub const fn insert(&mut self, color: usize) {
        self.0 |= Self::single(color).0;
    }

    /// All colors in either set
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// All colors in both sets
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// All colors in this set but not in the other
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Check if the sets do not share any color
    pub const fn is_disjoint(self, other: Self) -> bool {
        self.0 & other.0 == 0
    }

    /// The number of colors in this set
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Check if this set has no colors
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the colors in increasing order
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                None
            } else {
                let color = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(color)
            }
        })
    }

    /// Iterate over all subsets of this set, starting with the empty set and in increasing order
    pub fn subsets(self) -> impl Iterator<Item = Self> {
        let mask = self.0;
        let mut next = Some(0_u64);
        std::iter::from_fn(move || {
            let current = next?;
            next = (current != mask).then(|| current.wrapping_sub(mask) & mask);
            Some(Self(current))
        })
    }
}

impl FromIterator<usize> for ColorSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut set = Self::empty();
        for color in iter {
            set.insert(color);
        }
        set
    }
}

impl std::fmt::Display for ColorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (index, color) in self.iter().enumerate() {
            if index != 0 {
                write!(f, ",")?;
            }
            write!(f, "{color}")?;
        }
        write!(f, "}}")
    }
}
