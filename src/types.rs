//! Core types used throughout repath.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Number of parallel paths between the two endpoints.
pub const PATH_NB: usize = 4;

/// Validated path identifier in `[1, PATH_NB]`.
///
/// Path `n` is carried on destination UDP port `base_port - 1 + n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PathId(u8);

impl PathId {
    /// The lowest path identifier; the default best path before any measurement.
    pub const FIRST: Self = Self(1);

    /// Create a path id, rejecting values outside `[1, PATH_NB]`.
    pub fn new(id: u8) -> Result<Self, ProtocolError> {
        if id == 0 || usize::from(id) > PATH_NB {
            return Err(ProtocolError::InvalidPath(u16::from(id)));
        }
        Ok(Self(id))
    }

    /// Recover the path id from a destination UDP port.
    pub fn from_port(port: u16, base_port: u16) -> Result<Self, ProtocolError> {
        port.checked_sub(base_port)
            .and_then(|offset| offset.checked_add(1))
            .and_then(|id| u8::try_from(id).ok())
            .and_then(|id| Self::new(id).ok())
            .ok_or(ProtocolError::InvalidPath(port))
    }

    /// Destination UDP port that carries this path.
    pub fn port(self, base_port: u16) -> u16 {
        base_port - 1 + u16::from(self.0)
    }

    /// Raw identifier.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based table index.
    pub fn index(self) -> usize {
        usize::from(self.0) - 1
    }

    /// All path ids in ascending order.
    pub fn all() -> impl Iterator<Item = PathId> {
        (1..=PATH_NB as u8).map(PathId)
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path-{}", self.0)
    }
}

impl TryFrom<u8> for PathId {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<PathId> for u8 {
    fn from(id: PathId) -> Self {
        id.0
    }
}

/// Fixed-capacity table with one slot per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTable<T> {
    slots: [T; PATH_NB],
}

impl<T: Copy> PathTable<T> {
    /// Create a table with every slot set to `value`.
    pub fn filled(value: T) -> Self {
        Self {
            slots: [value; PATH_NB],
        }
    }
}

impl<T> PathTable<T> {
    /// Iterate `(path, value)` pairs in ascending path order.
    pub fn iter(&self) -> impl Iterator<Item = (PathId, &T)> {
        PathId::all().zip(self.slots.iter())
    }
}

impl<T> Index<PathId> for PathTable<T> {
    type Output = T;

    fn index(&self, path: PathId) -> &T {
        &self.slots[path.index()]
    }
}

impl<T> IndexMut<PathId> for PathTable<T> {
    fn index_mut(&mut self, path: PathId) -> &mut T {
        &mut self.slots[path.index()]
    }
}

/// Which side of the pair this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Role {
    /// Emits probes on every path and answers repath proposals.
    Sender,
    /// Measures path delays and initiates repath negotiations.
    #[default]
    Receiver,
}

impl Role {
    /// Whether this role runs the probe-emission loop.
    pub fn emits_probes(self) -> bool {
        matches!(self, Self::Sender)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_id_range() {
        assert!(PathId::new(0).is_err());
        assert!(PathId::new(1).is_ok());
        assert!(PathId::new(PATH_NB as u8).is_ok());
        assert_eq!(
            PathId::new(PATH_NB as u8 + 1),
            Err(ProtocolError::InvalidPath(PATH_NB as u16 + 1))
        );
    }

    #[test]
    fn test_path_port_mapping() {
        let base = 5678;
        for path in PathId::all() {
            let port = path.port(base);
            assert_eq!(port, base - 1 + u16::from(path.get()));
            assert_eq!(PathId::from_port(port, base).unwrap(), path);
        }

        assert!(PathId::from_port(base - 1, base).is_err());
        assert!(PathId::from_port(base + PATH_NB as u16, base).is_err());
        assert!(PathId::from_port(0, base).is_err());
    }

    #[test]
    fn test_path_table_indexing() {
        let mut table = PathTable::filled(u64::MAX);
        table[PathId::new(3).unwrap()] = 42;

        let values: Vec<_> = table.iter().map(|(p, v)| (p.get(), *v)).collect();
        assert_eq!(
            values,
            vec![(1, u64::MAX), (2, u64::MAX), (3, 42), (4, u64::MAX)]
        );
    }

    #[test]
    fn test_role() {
        assert!(Role::Sender.emits_probes());
        assert!(!Role::Receiver.emits_probes());
        assert_eq!(Role::default(), Role::Receiver);
        assert_eq!(Role::Sender.to_string(), "sender");
    }
}
