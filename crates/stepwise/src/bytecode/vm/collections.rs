//! Call-argument assembly helpers.
//!
//! `f(a, *b, c, x=1, **y)` is translated into a list that collects positionals, a
//! tuple made from it, and a dict that collects keywords; duplicate keywords fail here,
//! before the call protocol ever sees the arguments.

use super::Vm;
use crate::{
    exception::{ExcType, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Dict, DictKey},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<'_, T, P, Tr> {
    /// LIST_APPEND: `list value → list`.
    pub(super) fn list_append(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let list = self.peek()?;
        match list.ref_id().map(|id| self.heap.get_mut(id)) {
            Some(HeapData::List(items)) => {
                items.push(value);
                Ok(())
            }
            _ => Err(RunError::internal("LIST_APPEND target is not a list")),
        }
    }

    /// LIST_EXTEND: `list iterable → list` for tuple, list and str sources.
    pub(super) fn list_extend(&mut self) -> RunResult<()> {
        let source = self.pop()?;
        let list = self.peek()?;
        let chars: Vec<char> = match source.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(items) | HeapData::List(items)) => {
                let items = items.clone();
                return self.extend_list(list, items);
            }
            Some(HeapData::Str(s)) => s.chars().collect(),
            _ => {
                return Err(ExcType::type_error(format!(
                    "Value after * must be an iterable, not {}",
                    self.heap.type_name(source)
                )));
            }
        };
        let mut items = Vec::with_capacity(chars.len());
        for c in chars {
            items.push(self.heap.alloc_str(c.to_string())?);
        }
        self.extend_list(list, items)
    }

    fn extend_list(&mut self, list: Value, items: Vec<Value>) -> RunResult<()> {
        match list.ref_id().map(|id| self.heap.get_mut(id)) {
            Some(HeapData::List(target)) => {
                target.extend(items);
                Ok(())
            }
            _ => Err(RunError::internal("LIST_EXTEND target is not a list")),
        }
    }

    /// LIST_TO_TUPLE: `list → tuple`.
    pub(super) fn list_to_tuple(&mut self) -> RunResult<()> {
        let list = self.pop()?;
        let items = match list.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::List(items)) => items.clone(),
            _ => return Err(RunError::internal("LIST_TO_TUPLE operand is not a list")),
        };
        let tuple = self.heap.alloc_tuple(items)?;
        self.push(tuple);
        Ok(())
    }

    /// DICT_INSERT_NO_DUPLICATE: `dict key value → dict`.
    pub(super) fn dict_insert_no_duplicate(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let key = self.pop()?;
        let dict = self.peek()?;
        let key = DictKey::from_value(key, self.heap)?;
        let target = dict_id(self.heap, dict).ok_or_else(|| RunError::internal("DICT_INSERT_NO_DUPLICATE target is not a dict"))?;
        insert_unique(self.heap, target, key, value)
    }

    /// DICT_MERGE_NO_DUPLICATE: `dict mapping → dict`.
    pub(super) fn dict_merge_no_duplicate(&mut self) -> RunResult<()> {
        let mapping = self.pop()?;
        let dict = self.peek()?;
        let source = self.mapping_entries(mapping)?;
        let target = dict_id(self.heap, dict).ok_or_else(|| RunError::internal("DICT_MERGE_NO_DUPLICATE target is not a dict"))?;
        for (key, value) in source {
            insert_unique(self.heap, target, key, value)?;
        }
        Ok(())
    }

    /// MAPPING_TO_DICT: `mapping → dict`, always a fresh copy.
    pub(super) fn mapping_to_dict(&mut self) -> RunResult<()> {
        let mapping = self.pop()?;
        let entries = self.mapping_entries(mapping)?;
        let id = self.heap.allocate(HeapData::Dict(entries))?;
        self.push(Value::Ref(id));
        Ok(())
    }

    fn mapping_entries(&self, mapping: Value) -> RunResult<Dict> {
        match mapping.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Dict(dict)) => Ok(dict.clone()),
            _ => Err(ExcType::type_error(format!(
                "argument after ** must be a mapping, not {}",
                self.heap.type_name(mapping)
            ))),
        }
    }
}

fn dict_id(heap: &Heap<impl ResourceTracker>, value: Value) -> Option<HeapId> {
    let id = value.ref_id()?;
    matches!(heap.get(id), HeapData::Dict(_)).then_some(id)
}

fn insert_unique(heap: &mut Heap<impl ResourceTracker>, target: HeapId, key: DictKey, value: Value) -> RunResult<()> {
    let HeapData::Dict(dict) = heap.get_mut(target) else {
        return Err(RunError::internal("keyword target is not a dict"));
    };
    if dict.contains_key(&key) {
        let name = match &key {
            DictKey::Str(s) => s.clone(),
            other => format!("{other:?}"),
        };
        return Err(ExcType::type_error(format!(
            "got multiple values for keyword argument '{name}'"
        )));
    }
    dict.insert(key, value);
    Ok(())
}
