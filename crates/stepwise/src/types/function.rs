use std::sync::Arc;

use crate::{bytecode::Code, heap::HeapId, value::Value};

/// A plain function: a code object closed over the globals and builtins of the frame
/// that executed MAKE_FUNCTION.
#[derive(Debug)]
pub(crate) struct Function {
    pub code: Arc<Code>,
    pub globals: Option<HeapId>,
    pub builtins: Option<HeapId>,
    /// Materialized default per parameter, parallel to `code.arg_spec.params`.
    pub defaults: Vec<Option<Value>>,
}

impl Function {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.code.name
    }

    pub(crate) fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        work_list.extend(self.globals);
        work_list.extend(self.builtins);
        work_list.extend(self.defaults.iter().flatten().filter_map(|v| v.ref_id()));
    }
}

/// A callable paired with the receiver it was looked up on.
///
/// Calling it prepends `receiver` to the positional arguments and calls `func`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundMethod {
    pub receiver: Value,
    pub func: Value,
}
