use std::fmt::Write as _;

use ahash::{AHashMap, AHashSet};

use crate::{
    builtins::Builtins,
    bytecode::vm::Frame,
    exception::{ExcType, Exception, SimpleException},
    resource::{ResourceError, ResourceTracker},
    types::{BoundMethod, ClassObject, Dict, Function, Generator, Instance, SeqIterator, Type},
    value::Value,
};

/// Maximum nesting followed when rendering a value as text.
const MAX_REPR_DEPTH: usize = 64;

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct HeapId(usize);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Every kind of object that lives in the heap.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Dict),
    Function(Function),
    /// A foreign function reachable from the builtins mapping.
    Builtin(Builtins),
    /// A foreign function stored in a class namespace; binds like a method.
    MethodDescriptor(Builtins),
    BoundMethod(BoundMethod),
    Class(ClassObject),
    Instance(Instance),
    Generator(Generator),
    /// A frame built by MAKE_FRAME and not yet entered; `None` once ENTER_FRAME took it.
    Frame(Option<Box<Frame>>),
    SeqIterator(SeqIterator),
}

impl HeapData {
    /// Builtin class of this object, `None` for instances whose class is user data.
    fn builtin_type(&self) -> Option<Type> {
        Some(match self {
            Self::Str(_) => Type::Str,
            Self::Tuple(_) => Type::Tuple,
            Self::List(_) => Type::List,
            Self::Dict(_) => Type::Dict,
            Self::Function(_) => Type::Function,
            Self::Builtin(_) => Type::BuiltinFunction,
            Self::MethodDescriptor(_) => Type::MethodDescriptor,
            Self::BoundMethod(_) => Type::Method,
            Self::Class(_) => Type::Type,
            Self::Generator(_) => Type::Generator,
            Self::Frame(_) => Type::Frame,
            Self::SeqIterator(_) => Type::SequenceIterator,
            Self::Instance(_) => return None,
        })
    }
}

/// Arena of runtime objects addressed by [`HeapId`].
///
/// Objects are never freed individually: a mark-sweep collection from the interpreter's
/// roots reclaims whatever became unreachable, and freed slots are reused.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapData>>,
    /// IDs of freed slots available for reuse. Populated by GC, consumed by `allocate`.
    free_list: Vec<HeapId>,
    tracker: T,
    allocations_since_gc: usize,
    builtin_classes: AHashMap<Type, HeapId>,
    exception_classes: AHashMap<ExcType, HeapId>,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
            allocations_since_gc: 0,
            builtin_classes: AHashMap::new(),
            exception_classes: AHashMap::new(),
        }
    }

    /// Allocates a new heap entry, reusing a freed slot when one exists.
    ///
    /// Returns `Err(ResourceError)` if allocation would exceed configured limits.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate()?;
        self.allocations_since_gc += 1;
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(data);
            Ok(id)
        } else {
            self.entries.push(Some(data));
            Ok(HeapId(self.entries.len() - 1))
        }
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Whether `id` still names a live object.
    #[cfg(test)]
    pub fn is_live(&self, id: HeapId) -> bool {
        matches!(self.entries.get(id.index()), Some(Some(_)))
    }

    pub fn should_gc(&self) -> bool {
        self.tracker.should_gc(self.allocations_since_gc)
    }

    /// Runs mark-sweep garbage collection from `roots`.
    ///
    /// Must only run between instruction steps: values held in Rust locals during a step
    /// are not roots.
    pub fn collect_garbage(&mut self, roots: Vec<HeapId>) {
        let mut reachable: Vec<bool> = vec![false; self.entries.len()];
        let mut work_list = roots;
        work_list.extend(self.builtin_classes.values().copied());
        work_list.extend(self.exception_classes.values().copied());

        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(data)) = self.entries.get(idx) {
                collect_child_ids(data, &mut work_list);
            }
        }

        for (id, entry) in self.entries.iter_mut().enumerate() {
            if !reachable[id] && entry.take().is_some() {
                self.tracker.on_free();
                self.free_list.push(HeapId(id));
            }
        }
        self.allocations_since_gc = 0;
    }

    pub fn register_builtin_class(&mut self, t: Type, id: HeapId) {
        self.builtin_classes.insert(t, id);
    }

    pub fn register_exception_class(&mut self, t: ExcType, id: HeapId) {
        self.exception_classes.insert(t, id);
    }

    pub fn builtin_class(&self, t: Type) -> HeapId {
        *self
            .builtin_classes
            .get(&t)
            .expect("Heap::builtin_class: builtins not bootstrapped")
    }

    pub fn exception_class(&self, t: ExcType) -> HeapId {
        *self
            .exception_classes
            .get(&t)
            .expect("Heap::exception_class: builtins not bootstrapped")
    }

    /// Class of any value.
    pub fn type_of(&self, value: Value) -> HeapId {
        let t = match value {
            Value::None => Type::NoneType,
            Value::NotImplemented => Type::NotImplementedType,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Ref(id) => match self.get(id) {
                HeapData::Instance(inst) => return inst.class,
                data => data.builtin_type().unwrap_or(Type::Object),
            },
        };
        self.builtin_class(t)
    }

    /// Name of the value's class.
    pub fn type_name(&self, value: Value) -> &str {
        self.class_name(self.type_of(value))
    }

    pub fn class_name(&self, class_id: HeapId) -> &str {
        match self.get(class_id) {
            HeapData::Class(cls) => cls.name(),
            _ => "?",
        }
    }

    pub fn as_str(&self, value: Value) -> Option<&str> {
        match value {
            Value::Ref(id) => match self.get(id) {
                HeapData::Str(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn alloc_str(&mut self, s: impl Into<String>) -> Result<Value, ResourceError> {
        Ok(Value::Ref(self.allocate(HeapData::Str(s.into()))?))
    }

    pub fn alloc_tuple(&mut self, items: Vec<Value>) -> Result<Value, ResourceError> {
        Ok(Value::Ref(self.allocate(HeapData::Tuple(items))?))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> Result<Value, ResourceError> {
        Ok(Value::Ref(self.allocate(HeapData::List(items))?))
    }

    /// Whether the value is an instance of `class_id` or one of its subclasses.
    pub fn is_instance(&self, value: Value, class_id: HeapId) -> bool {
        crate::types::class::is_subclass(self, self.type_of(value), class_id)
    }

    /// Creates an exception instance of a builtin exception class.
    pub fn new_exception(&mut self, exc_type: ExcType, args: Vec<Value>) -> Result<Value, ResourceError> {
        let class = self.exception_class(exc_type);
        let args = self.alloc_tuple(args)?;
        let mut inst = Instance::new(class);
        inst.attrs.insert("args".to_owned(), args);
        Ok(Value::Ref(self.allocate(HeapData::Instance(inst))?))
    }

    /// Turns an engine-raised exception into a heap exception instance.
    pub fn materialize(&mut self, exc: &SimpleException) -> Result<Value, ResourceError> {
        let args = match exc.arg() {
            Some(msg) => vec![self.alloc_str(msg)?],
            None => Vec::new(),
        };
        self.new_exception(exc.exc_type(), args)
    }

    /// Describes an exception value for the embedding caller.
    ///
    /// Instances report their class name and `args[0]`; any other raised value reports its
    /// type name and its repr.
    pub fn exception_info(&self, value: Value) -> Exception {
        let type_name = self.type_name(value).to_owned();
        if let Value::Ref(id) = value
            && let HeapData::Instance(inst) = self.get(id)
        {
            let message = match inst.attrs.get("args").copied() {
                Some(Value::Ref(args_id)) => match self.get(args_id) {
                    HeapData::Tuple(items) => match items.first() {
                        Some(&first) => self.as_str(first).map_or_else(|| self.repr(first), str::to_owned),
                        None => String::new(),
                    },
                    _ => String::new(),
                },
                _ => String::new(),
            };
            return Exception::new(type_name, message);
        }
        Exception::new(type_name, self.repr(value))
    }

    /// Renders a value the way the `repr` builtin does.
    pub fn repr(&self, value: Value) -> String {
        let mut out = String::new();
        let mut seen = AHashSet::new();
        self.repr_into(value, &mut out, &mut seen, 0);
        out
    }

    /// Renders a value the way `print` does: strings bare, everything else as repr.
    pub fn display(&self, value: Value) -> String {
        match self.as_str(value) {
            Some(s) => s.to_owned(),
            None => self.repr(value),
        }
    }

    fn repr_into(&self, value: Value, out: &mut String, seen: &mut AHashSet<HeapId>, depth: usize) {
        let id = match value {
            Value::None => return out.push_str("None"),
            Value::NotImplemented => return out.push_str("NotImplemented"),
            Value::Bool(true) => return out.push_str("True"),
            Value::Bool(false) => return out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
                return;
            }
            Value::Ref(id) => id,
        };
        if depth > MAX_REPR_DEPTH || !seen.insert(id) {
            out.push_str("...");
            return;
        }
        match self.get(id) {
            HeapData::Str(s) => {
                let _ = write!(out, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"));
            }
            HeapData::Tuple(items) => {
                out.push('(');
                self.repr_items(items, out, seen, depth);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            HeapData::List(items) => {
                out.push('[');
                self.repr_items(items, out, seen, depth);
                out.push(']');
            }
            HeapData::Dict(dict) => {
                out.push('{');
                for (i, (key, v)) in dict.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match key.as_str() {
                        Some(s) => {
                            let _ = write!(out, "'{s}'");
                        }
                        None => self.repr_key(key, out),
                    }
                    out.push_str(": ");
                    self.repr_into(*v, out, seen, depth + 1);
                }
                out.push('}');
            }
            HeapData::Function(f) => {
                let _ = write!(out, "<function {}>", f.name());
            }
            HeapData::Builtin(b) => {
                let _ = write!(out, "<built-in function {}>", b.method_name());
            }
            HeapData::MethodDescriptor(b) => {
                let _ = write!(out, "<method '{}' of '{}' objects>", b.method_name(), b.owner_name());
            }
            HeapData::BoundMethod(m) => {
                out.push_str("<bound method ");
                self.repr_into(m.func, out, seen, depth + 1);
                out.push_str(" of ");
                self.repr_into(m.receiver, out, seen, depth + 1);
                out.push('>');
            }
            HeapData::Class(cls) => {
                let _ = write!(out, "<class '{}'>", cls.name());
            }
            HeapData::Instance(inst) => {
                let exc_base = self.exception_class(ExcType::BaseException);
                let name = self.class_name(inst.class);
                if crate::types::class::is_subclass(self, inst.class, exc_base) {
                    out.push_str(name);
                    match inst.attrs.get("args").copied() {
                        Some(Value::Ref(args)) if matches!(self.get(args), HeapData::Tuple(items) if items.len() == 1) => {
                            out.push('(');
                            if let HeapData::Tuple(items) = self.get(args) {
                                self.repr_into(items[0], out, seen, depth + 1);
                            }
                            out.push(')');
                        }
                        Some(args @ Value::Ref(_)) => self.repr_into(args, out, seen, depth + 1),
                        _ => out.push_str("()"),
                    }
                } else {
                    let _ = write!(out, "<{name} object>");
                }
            }
            HeapData::Generator(g) => {
                let _ = write!(out, "<generator object {}>", g.name());
            }
            HeapData::Frame(_) => out.push_str("<frame>"),
            HeapData::SeqIterator(_) => out.push_str("<sequence_iterator object>"),
        }
        seen.remove(&id);
    }

    fn repr_items(&self, items: &[Value], out: &mut String, seen: &mut AHashSet<HeapId>, depth: usize) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.repr_into(*item, out, seen, depth + 1);
        }
    }

    fn repr_key(&self, key: &crate::types::DictKey, out: &mut String) {
        use crate::types::DictKey;
        match key {
            DictKey::None => out.push_str("None"),
            DictKey::NotImplemented => out.push_str("NotImplemented"),
            DictKey::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
            DictKey::Int(i) => {
                let _ = write!(out, "{i}");
            }
            DictKey::Str(s) => {
                let _ = write!(out, "'{s}'");
            }
            DictKey::Ref(id) => out.push_str(&self.repr(Value::Ref(*id))),
        }
    }
}

/// Collects child HeapIds from a HeapData value for GC traversal.
fn collect_child_ids(data: &HeapData, work_list: &mut Vec<HeapId>) {
    match data {
        HeapData::Str(_) | HeapData::Builtin(_) | HeapData::MethodDescriptor(_) => {}
        HeapData::Tuple(items) | HeapData::List(items) => {
            work_list.extend(items.iter().filter_map(|v| v.ref_id()));
        }
        HeapData::Dict(dict) => {
            for (key, value) in dict {
                key.collect_ref(work_list);
                work_list.extend(value.ref_id());
            }
        }
        HeapData::Function(f) => f.collect_refs(work_list),
        HeapData::BoundMethod(m) => {
            work_list.extend(m.receiver.ref_id());
            work_list.extend(m.func.ref_id());
        }
        HeapData::Class(cls) => cls.collect_refs(work_list),
        HeapData::Instance(inst) => {
            work_list.push(inst.class);
            work_list.extend(inst.attrs.values().filter_map(|v| v.ref_id()));
        }
        HeapData::Generator(g) => g.collect_refs(work_list),
        HeapData::Frame(Some(frame)) => frame.collect_refs(work_list),
        HeapData::Frame(None) => {}
        HeapData::SeqIterator(it) => work_list.push(it.source),
    }
}
