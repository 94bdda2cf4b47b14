use indexmap::IndexMap;

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    value::Value,
};

/// Insertion-ordered mapping used for dicts, globals and keyword arguments.
pub(crate) type Dict = IndexMap<DictKey, Value, ahash::RandomState>;

/// Name-keyed mapping used for locals, class namespaces and instance attributes.
pub(crate) type Attrs = IndexMap<String, Value, ahash::RandomState>;

/// Hashable projection of a value used as a dict key.
///
/// Strings compare by content; every other heap object compares by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    NotImplemented,
    Bool(bool),
    Int(i64),
    Str(String),
    Ref(HeapId),
}

impl DictKey {
    pub fn from_value(value: Value, heap: &Heap<impl ResourceTracker>) -> RunResult<Self> {
        Ok(match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(i) => Self::Int(i),
            Value::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => Self::Str(s.clone()),
                HeapData::List(_) | HeapData::Dict(_) => {
                    return Err(ExcType::type_error(format!("unhashable type: '{}'", heap.type_name(value))));
                }
                _ => Self::Ref(id),
            },
            Value::NotImplemented => Self::NotImplemented,
        })
    }

    /// Converts the key back into a value, allocating a fresh string for string keys.
    pub fn to_value(&self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
        Ok(match self {
            Self::None => Value::None,
            Self::NotImplemented => Value::NotImplemented,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => Value::Ref(heap.allocate(HeapData::Str(s.clone()))?),
            Self::Ref(id) => Value::Ref(*id),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn collect_ref(&self, work_list: &mut Vec<HeapId>) {
        if let Self::Ref(id) = self {
            work_list.push(*id);
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}
