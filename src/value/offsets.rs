use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Ordered set of bytecode offsets, used for producers, return addresses and trace tags.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct InstructionOffsets(BTreeSet<u32>);

impl InstructionOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(offset: u32) -> Self {
        Self(BTreeSet::from([offset]))
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.0.contains(&offset)
    }

    /// Returns `true` when the offset was not yet present.
    pub fn insert(&mut self, offset: u32) -> bool {
        self.0.insert(offset)
    }

    /// Add every offset of `other`, returning whether anything changed.
    pub fn merge(&mut self, other: &InstructionOffsets) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().copied());
        self.0.len() != before
    }

    pub fn union(&self, other: &InstructionOffsets) -> InstructionOffsets {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<u32> {
        self.0.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u32> for InstructionOffsets {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for InstructionOffsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, offset) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{offset}")?;
        }
        write!(f, "}}")
    }
}
