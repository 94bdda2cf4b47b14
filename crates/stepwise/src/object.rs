use std::fmt;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    exception::{ExcType, Exception},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::{DictKey, class::is_subclass},
    value::Value,
};

/// A value copied out of the interpreter's heap for the embedding caller.
///
/// Containers are converted recursively. Objects without a plain-data counterpart
/// (functions, classes, instances, generators) are reported by their repr. A container
/// that contains itself is cut off with a `Repr("...")` at the point of recursion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Object {
    None,
    NotImplemented,
    Bool(bool),
    Int(i64),
    String(String),
    Tuple(Vec<Self>),
    List(Vec<Self>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(Self, Self)>),
    /// An instance of an exception class.
    Exception(Exception),
    /// Anything else, described by its repr.
    Repr(String),
}

impl Object {
    pub(crate) fn from_value(heap: &Heap<impl ResourceTracker>, value: Value) -> Self {
        let mut seen = AHashSet::new();
        Self::convert(heap, value, &mut seen)
    }

    fn convert(heap: &Heap<impl ResourceTracker>, value: Value, seen: &mut AHashSet<HeapId>) -> Self {
        let id = match value {
            Value::None => return Self::None,
            Value::NotImplemented => return Self::NotImplemented,
            Value::Bool(b) => return Self::Bool(b),
            Value::Int(i) => return Self::Int(i),
            Value::Ref(id) => id,
        };
        if !seen.insert(id) {
            return Self::Repr("...".to_owned());
        }
        let object = match heap.get(id) {
            HeapData::Str(s) => Self::String(s.clone()),
            HeapData::Tuple(items) => Self::Tuple(items.iter().map(|v| Self::convert(heap, *v, seen)).collect()),
            HeapData::List(items) => Self::List(items.iter().map(|v| Self::convert(heap, *v, seen)).collect()),
            HeapData::Dict(dict) => Self::Dict(
                dict.iter()
                    .map(|(k, v)| (Self::from_key(heap, k, seen), Self::convert(heap, *v, seen)))
                    .collect(),
            ),
            HeapData::Instance(inst)
                if is_subclass(heap, inst.class, heap.exception_class(ExcType::BaseException)) =>
            {
                Self::Exception(heap.exception_info(value))
            }
            _ => Self::Repr(heap.repr(value)),
        };
        seen.remove(&id);
        object
    }

    fn from_key(heap: &Heap<impl ResourceTracker>, key: &DictKey, seen: &mut AHashSet<HeapId>) -> Self {
        match key {
            DictKey::None => Self::None,
            DictKey::NotImplemented => Self::NotImplemented,
            DictKey::Bool(b) => Self::Bool(*b),
            DictKey::Int(i) => Self::Int(*i),
            DictKey::Str(s) => Self::String(s.clone()),
            DictKey::Ref(id) => Self::convert(heap, Value::Ref(*id), seen),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::NotImplemented => f.write_str("NotImplemented"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::Tuple(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::List(items) => {
                f.write_str("[")?;
                write_items(f, items)?;
                f.write_str("]")
            }
            Self::Dict(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Exception(exc) => write!(f, "{exc}"),
            Self::Repr(s) => f.write_str(s),
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Object]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{builtins::bootstrap, resource::NoLimitTracker};

    #[test]
    fn self_containing_list_is_cut_off() {
        let mut heap = Heap::new(NoLimitTracker);
        bootstrap(&mut heap).unwrap();
        let list = heap.alloc_list(vec![Value::Int(1)]).unwrap();
        if let HeapData::List(items) = heap.get_mut(list.ref_id().unwrap()) {
            items.push(list);
        }
        assert_eq!(
            Object::from_value(&heap, list),
            Object::List(vec![Object::Int(1), Object::Repr("...".to_owned())])
        );
    }

    #[test]
    fn exception_instances_become_exceptions() {
        let mut heap = Heap::new(NoLimitTracker);
        bootstrap(&mut heap).unwrap();
        let msg = heap.alloc_str("boom").unwrap();
        let exc = heap.new_exception(ExcType::ValueError, vec![msg]).unwrap();
        assert_eq!(
            Object::from_value(&heap, exc),
            Object::Exception(Exception::new("ValueError", "boom"))
        );
    }

    #[test]
    fn display_matches_repr_conventions() {
        let tuple = Object::Tuple(vec![Object::Int(1)]);
        assert_eq!(tuple.to_string(), "(1,)");
        let dict = Object::Dict(vec![(Object::String("a".to_owned()), Object::Bool(true))]);
        assert_eq!(dict.to_string(), "{'a': True}");
    }
}
