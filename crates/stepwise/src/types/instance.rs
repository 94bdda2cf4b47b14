use crate::{heap::HeapId, types::Attrs};

/// An instance of a user-defined class, or of a builtin exception class.
#[derive(Debug)]
pub(crate) struct Instance {
    pub class: HeapId,
    pub attrs: Attrs,
}

impl Instance {
    #[must_use]
    pub fn new(class: HeapId) -> Self {
        Self {
            class,
            attrs: Attrs::default(),
        }
    }
}

/// Iterator over a builtin sequence: the object behind `list.__iter__` and friends.
#[derive(Debug)]
pub(crate) struct SeqIterator {
    pub source: HeapId,
    pub index: usize,
}
