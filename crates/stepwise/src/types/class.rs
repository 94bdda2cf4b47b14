use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::Attrs,
    value::Value,
};

/// Maximum length of any class's method resolution order.
pub(crate) const MAX_MRO_LENGTH: usize = 2600;

/// A class object.
///
/// The method resolution order is computed once, when the class is created, and never
/// changes afterwards; attribute lookups are a linear scan over it.
#[derive(Debug)]
pub(crate) struct ClassObject {
    name: String,
    bases: Vec<HeapId>,
    /// Linearization starting with the class itself, most-derived first.
    mro: Vec<HeapId>,
    namespace: Attrs,
    /// Builtin classes with a native data layout (int, str, list, ...) cannot be
    /// instantiated with NEW_INSTANCE, nor can their subclasses.
    native: bool,
}

impl ClassObject {
    #[must_use]
    pub fn new(name: String, bases: Vec<HeapId>, namespace: Attrs, native: bool) -> Self {
        Self {
            name,
            bases,
            mro: Vec::new(),
            namespace,
            native,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bases(&self) -> &[HeapId] {
        &self.bases
    }

    #[must_use]
    pub fn mro(&self) -> &[HeapId] {
        &self.mro
    }

    pub fn set_mro(&mut self, mro: Vec<HeapId>) {
        self.mro = mro;
    }

    #[must_use]
    pub fn namespace(&self) -> &Attrs {
        &self.namespace
    }

    pub fn namespace_mut(&mut self) -> &mut Attrs {
        &mut self.namespace
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        self.native
    }

    pub(crate) fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        work_list.extend(self.bases.iter().copied());
        work_list.extend(self.mro.iter().copied());
        work_list.extend(self.namespace.values().filter_map(|v| v.ref_id()));
    }
}

/// Computes the C3 linearization for a class with the given bases.
///
/// The result starts with `self_id` and ends with `object`. An empty `bases` slice
/// means the implicit `(object,)`.
///
/// # Errors
/// TypeError when a base is not a class, when the class would inherit from itself, or
/// when no consistent order exists.
pub(crate) fn compute_c3_mro(
    self_id: HeapId,
    bases: &[HeapId],
    heap: &Heap<impl ResourceTracker>,
) -> RunResult<Vec<HeapId>> {
    if bases.is_empty() {
        return Ok(vec![self_id, heap.builtin_class(crate::types::Type::Object)]);
    }
    if bases.contains(&self_id) {
        return Err(ExcType::type_error("a class cannot inherit from itself"));
    }
    for (i, base) in bases.iter().enumerate() {
        if bases[..i].contains(base) {
            return Err(ExcType::type_error(format!(
                "duplicate base class {}",
                class_name(*base, heap)
            )));
        }
    }

    let mut linearizations: Vec<Vec<HeapId>> = Vec::with_capacity(bases.len() + 1);
    for &base_id in bases {
        match heap.get(base_id) {
            HeapData::Class(cls) => linearizations.push(cls.mro().to_vec()),
            _ => return Err(ExcType::type_error("bases must be classes")),
        }
    }
    linearizations.push(bases.to_vec());

    let mut result = vec![self_id];
    loop {
        linearizations.retain(|l| !l.is_empty());
        if linearizations.is_empty() {
            break;
        }

        // a good head appears in no list's tail
        let found = linearizations
            .iter()
            .map(|lin| lin[0])
            .find(|candidate| !linearizations.iter().any(|other| other[1..].contains(candidate)));

        let Some(next) = found else {
            let names: Vec<&str> = bases.iter().map(|&id| class_name(id, heap)).collect();
            return Err(ExcType::type_error(format!(
                "Cannot create a consistent method resolution order (MRO) for bases {}",
                names.join(", ")
            )));
        };
        result.push(next);
        if result.len() > MAX_MRO_LENGTH {
            return Err(ExcType::type_error("method resolution order too long"));
        }
        for lin in &mut linearizations {
            if lin.first() == Some(&next) {
                lin.remove(0);
            }
        }
    }
    Ok(result)
}

fn class_name(id: HeapId, heap: &Heap<impl ResourceTracker>) -> &str {
    match heap.get(id) {
        HeapData::Class(cls) => cls.name(),
        _ => "?",
    }
}

/// Finds the first class in `class_id`'s MRO whose own namespace defines `name`.
///
/// This is the pure `resolve(class, name)` table lookup underneath every attribute and
/// slot access; it never runs descriptors.
pub(crate) fn resolve(heap: &Heap<impl ResourceTracker>, class_id: HeapId, name: &str) -> Option<Value> {
    let HeapData::Class(cls) = heap.get(class_id) else {
        return None;
    };
    cls.mro().iter().find_map(|&id| match heap.get(id) {
        HeapData::Class(c) => c.namespace().get(name).copied(),
        _ => None,
    })
}

/// Whether `class_id` is `base_id` or has it anywhere in its MRO.
pub(crate) fn is_subclass(heap: &Heap<impl ResourceTracker>, class_id: HeapId, base_id: HeapId) -> bool {
    match heap.get(class_id) {
        HeapData::Class(cls) => cls.mro().contains(&base_id),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{builtins::bootstrap, resource::NoLimitTracker};

    fn new_class(heap: &mut Heap<NoLimitTracker>, name: &str, bases: &[HeapId]) -> RunResult<HeapId> {
        let id = heap.allocate(HeapData::Class(ClassObject::new(
            name.to_owned(),
            bases.to_vec(),
            Attrs::default(),
            false,
        )))?;
        let mro = compute_c3_mro(id, bases, heap)?;
        if let HeapData::Class(cls) = heap.get_mut(id) {
            cls.set_mro(mro);
        }
        Ok(id)
    }

    fn mro_names(heap: &Heap<NoLimitTracker>, id: HeapId) -> Vec<String> {
        let HeapData::Class(cls) = heap.get(id) else { panic!("not a class") };
        cls.mro().iter().map(|&c| class_name(c, heap).to_owned()).collect()
    }

    #[test]
    fn diamond_linearizes_depth_first_left_to_right() {
        let mut heap = Heap::new(NoLimitTracker);
        bootstrap(&mut heap).unwrap();
        let a = new_class(&mut heap, "A", &[]).unwrap();
        let b = new_class(&mut heap, "B", &[a]).unwrap();
        let c = new_class(&mut heap, "C", &[a]).unwrap();
        let d = new_class(&mut heap, "D", &[b, c]).unwrap();
        assert_eq!(mro_names(&heap, d), vec!["D", "B", "C", "A", "object"]);
    }

    #[test]
    fn inconsistent_order_is_rejected() {
        let mut heap = Heap::new(NoLimitTracker);
        bootstrap(&mut heap).unwrap();
        let a = new_class(&mut heap, "A", &[]).unwrap();
        let b = new_class(&mut heap, "B", &[a]).unwrap();
        assert!(new_class(&mut heap, "C", &[a, b]).is_err());
    }

    #[test]
    fn resolve_prefers_most_derived() {
        let mut heap = Heap::new(NoLimitTracker);
        bootstrap(&mut heap).unwrap();
        let a = new_class(&mut heap, "A", &[]).unwrap();
        let b = new_class(&mut heap, "B", &[a]).unwrap();
        if let HeapData::Class(cls) = heap.get_mut(a) {
            cls.namespace_mut().insert("x".to_owned(), Value::Int(1));
            cls.namespace_mut().insert("y".to_owned(), Value::Int(2));
        }
        if let HeapData::Class(cls) = heap.get_mut(b) {
            cls.namespace_mut().insert("x".to_owned(), Value::Int(10));
        }
        assert_eq!(resolve(&heap, b, "x"), Some(Value::Int(10)));
        assert_eq!(resolve(&heap, b, "y"), Some(Value::Int(2)));
        assert_eq!(resolve(&heap, b, "z"), None);
        assert!(is_subclass(&heap, b, a));
        assert!(!is_subclass(&heap, a, b));
    }
}
