//! Attribute and descriptor resolution, plus the class-creation opcodes.

use super::{CallResult, Continuation, Vm};
use crate::{
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        Attrs, ClassObject, Dict, DictKey, Instance,
        class::{compute_c3_mro, resolve},
    },
    value::Value,
};

/// A name resolved on an object's class.
#[derive(Debug, Clone, Copy)]
pub(super) enum Special {
    /// Final value: either not a descriptor or bound by a builtin `__get__`.
    Ready(Value),
    /// The found value's type defines a user `__get__`, which still has to be called
    /// with `(found, instance, owner)`.
    Descriptor {
        getter: Value,
        found: Value,
        instance: Value,
        owner: Value,
    },
}

/// Outcome of an engine slot lookup.
#[derive(Debug, Clone, Copy)]
pub(super) enum Slot {
    Missing,
    Bound(Value),
    /// A user `__get__` frame was pushed; its return value is the slot. `mark` is the
    /// length of the asking frame's continuation stack before the lookup.
    Binding { mark: usize },
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<'_, T, P, Tr> {
    /// `load_special`: resolves `name` along the MRO of `obj`'s class and applies the
    /// get-slot of the found value's type.
    pub(super) fn find_special(&mut self, obj: Value, name: &str) -> RunResult<Option<Special>> {
        let class = self.heap.type_of(obj);
        match resolve(self.heap, class, name) {
            Some(found) => self.bind_found(found, obj, Value::Ref(class)).map(Some),
            None => Ok(None),
        }
    }

    fn bind_found(&mut self, found: Value, instance: Value, owner: Value) -> RunResult<Special> {
        let found_class = self.heap.type_of(found);
        let Some(getter) = resolve(self.heap, found_class, "__get__") else {
            return Ok(Special::Ready(found));
        };
        if let Value::Ref(id) = getter
            && let HeapData::MethodDescriptor(builtin) = self.heap.get(id)
        {
            let builtin = *builtin;
            let bound = builtin.call(self.heap, vec![found, instance, owner], self.print)?;
            return Ok(Special::Ready(bound));
        }
        Ok(Special::Descriptor {
            getter,
            found,
            instance,
            owner,
        })
    }

    /// Slot lookup used by the engine's own protocols (call, operators, truth).
    ///
    /// A user `__get__` goes through the call protocol with at most `budget` rewrites. When
    /// it lands in a user function the slot is still [`Slot::Binding`]; the caller then
    /// parks a continuation that receives the bound value.
    pub(super) fn slot(&mut self, obj: Value, name: &str, budget: usize) -> RunResult<Slot> {
        let mark = self.thread.top().pending.len();
        let (getter, found, instance, owner) = match self.find_special(obj, name)? {
            None => return Ok(Slot::Missing),
            Some(Special::Ready(value)) => return Ok(Slot::Bound(value)),
            Some(Special::Descriptor {
                getter,
                found,
                instance,
                owner,
            }) => (getter, found, instance, owner),
        };
        match self.call_bounded(getter, vec![found, instance, owner], Dict::default(), budget)? {
            CallResult::Push(value) => Ok(Slot::Bound(value)),
            CallResult::FramePushed => Ok(Slot::Binding { mark }),
        }
    }

    /// Queues `then` on the calling frame below whatever the callee's own call queued
    /// since `mark`.
    pub(super) fn defer(&mut self, mark: usize, then: Continuation) -> RunResult<()> {
        self.caller_mut()?.pending.insert(mark, then);
        Ok(())
    }

    fn push_special(&mut self, special: Special) -> RunResult<()> {
        match special {
            Special::Ready(value) => {
                self.push(value);
                Ok(())
            }
            Special::Descriptor {
                getter,
                found,
                instance,
                owner,
            } => {
                let result = self.call_value(getter, vec![found, instance, owner], Dict::default())?;
                self.push_result(result);
                Ok(())
            }
        }
    }

    /// LOAD_SPECIAL: `obj → value`.
    pub(super) fn load_special(&mut self, name: &str) -> RunResult<()> {
        let obj = self.pop()?;
        match self.find_special(obj, name)? {
            Some(special) => self.push_special(special),
            None => Err(self.attribute_error(obj, name)),
        }
    }

    /// LOAD_ATTR: `obj → value`.
    ///
    /// Instance attributes win, then a class object's own MRO (bound against no
    /// instance), then `load_special`.
    pub(super) fn load_attr(&mut self, name: &str) -> RunResult<()> {
        let obj = self.pop()?;
        if let Value::Ref(id) = obj {
            match self.heap.get(id) {
                HeapData::Instance(inst) => {
                    if let Some(value) = inst.attrs.get(name).copied() {
                        self.push(value);
                        return Ok(());
                    }
                }
                HeapData::Class(_) => {
                    if let Some(found) = resolve(self.heap, id, name) {
                        let special = self.bind_found(found, Value::None, obj)?;
                        return self.push_special(special);
                    }
                }
                _ => {}
            }
        }
        match self.find_special(obj, name)? {
            Some(special) => self.push_special(special),
            None => Err(self.attribute_error(obj, name)),
        }
    }

    /// STORE_ATTR: `obj value →`.
    pub(super) fn store_attr(&mut self, name: &str) -> RunResult<()> {
        let value = self.pop()?;
        let obj = self.pop()?;
        let class = self.heap.type_of(obj);
        if let Some(found) = resolve(self.heap, class, name)
            && let Some(setter) = resolve(self.heap, self.heap.type_of(found), "__set__")
        {
            // a set-slot is a plain call whose result is dropped
            self.call_then(setter, vec![found, obj, value], Continuation::Discard)?;
            return Ok(());
        }
        if let Value::Ref(id) = obj {
            match self.heap.get_mut(id) {
                HeapData::Instance(inst) => {
                    inst.attrs.insert(name.to_owned(), value);
                    return Ok(());
                }
                HeapData::Class(cls) => {
                    cls.namespace_mut().insert(name.to_owned(), value);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(self.attribute_error(obj, name))
    }

    fn attribute_error(&self, obj: Value, name: &str) -> RunError {
        if let Value::Ref(id) = obj
            && let HeapData::Class(cls) = self.heap.get(id)
        {
            return SimpleException::new_msg(
                ExcType::AttributeError,
                format!("type object '{}' has no attribute '{name}'", cls.name()),
            )
            .into();
        }
        ExcType::attribute_error(self.heap.type_name(obj), name)
    }

    /// BUILD_CLASS: `bases namespace → class`.
    pub(super) fn build_class(&mut self, name: &str) -> RunResult<()> {
        let namespace = self.pop()?;
        let bases = self.pop()?;
        let base_values = match bases {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Tuple(items) => items.clone(),
                _ => return Err(RunError::internal("BUILD_CLASS bases must be a tuple")),
            },
            _ => return Err(RunError::internal("BUILD_CLASS bases must be a tuple")),
        };
        let mut base_ids: Vec<HeapId> = Vec::with_capacity(base_values.len());
        let mut native = false;
        for base in base_values {
            let class = match base {
                Value::Ref(id) => match self.heap.get(id) {
                    HeapData::Class(cls) => Some((id, cls.is_native())),
                    _ => None,
                },
                _ => None,
            };
            let Some((id, is_native)) = class else {
                return Err(ExcType::type_error(format!(
                    "bases must be classes, not '{}'",
                    self.heap.type_name(base)
                )));
            };
            native |= is_native;
            base_ids.push(id);
        }
        let attrs = self.namespace_attrs(namespace)?;
        let id = self
            .heap
            .allocate(HeapData::Class(ClassObject::new(name.to_owned(), base_ids.clone(), attrs, native)))?;
        let mro = compute_c3_mro(id, &base_ids, self.heap)?;
        if let HeapData::Class(cls) = self.heap.get_mut(id) {
            cls.set_mro(mro);
        }
        self.push(Value::Ref(id));
        Ok(())
    }

    fn namespace_attrs(&self, namespace: Value) -> RunResult<Attrs> {
        let Value::Ref(id) = namespace else {
            return Err(RunError::internal("BUILD_CLASS namespace must be a dict"));
        };
        let HeapData::Dict(dict) = self.heap.get(id) else {
            return Err(RunError::internal("BUILD_CLASS namespace must be a dict"));
        };
        let mut attrs = Attrs::default();
        for (key, value) in dict {
            let DictKey::Str(key) = key else {
                return Err(ExcType::type_error("class namespace keys must be strings"));
            };
            attrs.insert(key.clone(), *value);
        }
        Ok(attrs)
    }

    /// NEW_INSTANCE: `class → instance`, a bare allocation without `__init__`.
    pub(super) fn new_instance(&mut self) -> RunResult<()> {
        let class = self.pop()?;
        let class_id = match class {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Class(cls) if cls.is_native() => {
                    return Err(ExcType::type_error(format!("cannot create '{}' instances", cls.name())));
                }
                HeapData::Class(_) => id,
                _ => return Err(ExcType::type_error("NEW_INSTANCE expects a class")),
            },
            _ => return Err(ExcType::type_error("NEW_INSTANCE expects a class")),
        };
        let id = self.heap.allocate(HeapData::Instance(Instance::new(class_id)))?;
        self.push(Value::Ref(id));
        Ok(())
    }
}
