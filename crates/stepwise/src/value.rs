use crate::heap::HeapId;

/// A runtime value: an immediate or a handle into the heap arena.
///
/// Values are `Copy`; ownership of heap objects is decided by reachability, not by
/// who holds a handle, so copying a `Ref` never needs bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) enum Value {
    #[default]
    None,
    /// Sentinel returned by operator slots to request the next trial.
    NotImplemented,
    Bool(bool),
    Int(i64),
    Ref(HeapId),
}

impl Value {
    #[inline]
    #[must_use]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// Integer view of the value; booleans count as 0 and 1.
    #[inline]
    #[must_use]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i),
            Self::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    /// Identity comparison, the `is` relation.
    #[inline]
    #[must_use]
    pub fn is(self, other: Self) -> bool {
        self == other
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<HeapId> for Value {
    fn from(id: HeapId) -> Self {
        Self::Ref(id)
    }
}
