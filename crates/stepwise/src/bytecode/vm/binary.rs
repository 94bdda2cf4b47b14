//! Operator dispatch through forward, reflected and in-place slots, and TO_BOOL.

use smallvec::SmallVec;

use super::{CallResult, Continuation, Vm, attr::Slot, call::MAX_CALL_INDIRECTION};
use crate::{
    exception::{ExcType, RunError, RunResult},
    heap::HeapId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Dict, class::is_subclass},
    value::Value,
};

/// One attempt of an operator: call `receiver.slot(other)`.
#[derive(Debug, Clone)]
struct Trial {
    receiver: Value,
    slot: String,
    other: Value,
}

/// The trials of one operator that have not run yet.
#[derive(Debug)]
pub(crate) struct BinaryTrials {
    /// Remaining trials, the next one last.
    remaining: SmallVec<[Trial; 3]>,
    forward: String,
    inplace: Option<String>,
    left: Value,
    right: Value,
}

impl BinaryTrials {
    pub(crate) fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        work_list.extend(self.left.ref_id());
        work_list.extend(self.right.ref_id());
        for trial in &self.remaining {
            work_list.extend(trial.receiver.ref_id());
            work_list.extend(trial.other.ref_id());
        }
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<'_, T, P, Tr> {
    /// BINARY_OP and INPLACE_OP: `left right → result`.
    ///
    /// A right operand whose class strictly derives from the left operand's class gets its
    /// reflected slot tried first. The in-place slot, when given, always goes first.
    pub(super) fn binary_op(&mut self, inplace: Option<&String>, forward: &str, reflected: &str) -> RunResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let left_class = self.heap.type_of(left);
        let right_class = self.heap.type_of(right);

        let forward_trial = Trial {
            receiver: left,
            slot: forward.to_owned(),
            other: right,
        };
        let reflected_trial = Trial {
            receiver: right,
            slot: reflected.to_owned(),
            other: left,
        };
        let mut order: SmallVec<[Trial; 3]> = SmallVec::new();
        if let Some(slot) = inplace {
            order.push(Trial {
                receiver: left,
                slot: slot.clone(),
                other: right,
            });
        }
        if right_class != left_class && is_subclass(self.heap, right_class, left_class) {
            order.push(reflected_trial);
            order.push(forward_trial);
        } else {
            order.push(forward_trial);
            order.push(reflected_trial);
        }
        order.reverse();

        self.run_trials(BinaryTrials {
            remaining: order,
            forward: forward.to_owned(),
            inplace: inplace.cloned(),
            left,
            right,
        })
    }

    /// Runs trials until one produces something other than the not-implemented sentinel.
    ///
    /// A trial that lands in a user function parks the rest on the calling frame; the
    /// callee's return resumes here through [`Vm::deliver`].
    pub(super) fn run_trials(&mut self, mut trials: BinaryTrials) -> RunResult<()> {
        while let Some(trial) = trials.remaining.pop() {
            let method = match self.slot(trial.receiver, &trial.slot, MAX_CALL_INDIRECTION)? {
                Slot::Missing => continue,
                Slot::Bound(method) => method,
                Slot::Binding { mark } => {
                    let other = trial.other;
                    return self.defer(mark, Continuation::OperatorSlot { other, trials });
                }
            };
            match self.attempt(method, trial.other, trials)? {
                Some(declined) => trials = declined,
                None => return Ok(()),
            }
        }
        // equality falls back to identity when neither side knows the other
        match trials.forward.as_str() {
            "__eq__" => {
                self.push(Value::Bool(trials.left.is(trials.right)));
                Ok(())
            }
            "__ne__" => {
                self.push(Value::Bool(!trials.left.is(trials.right)));
                Ok(())
            }
            _ => Err(self.unsupported(&trials)),
        }
    }

    /// Calls a slot bound by a user `__get__` and carries on with the remaining trials.
    pub(super) fn call_trial(&mut self, method: Value, other: Value, trials: BinaryTrials) -> RunResult<()> {
        match self.attempt(method, other, trials)? {
            Some(declined) => self.run_trials(declined),
            None => Ok(()),
        }
    }

    /// Calls one operator slot; the trials come back if it returned the not-implemented
    /// sentinel.
    fn attempt(&mut self, method: Value, other: Value, trials: BinaryTrials) -> RunResult<Option<BinaryTrials>> {
        let mark = self.thread.top().pending.len();
        match self.call_value(method, vec![other], Dict::default())? {
            CallResult::Push(Value::NotImplemented) => Ok(Some(trials)),
            CallResult::Push(value) => {
                self.push(value);
                Ok(None)
            }
            CallResult::FramePushed => {
                self.defer(mark, Continuation::BinaryOp(trials))?;
                Ok(None)
            }
        }
    }

    fn unsupported(&self, trials: &BinaryTrials) -> RunError {
        let left = self.heap.type_name(trials.left);
        let right = self.heap.type_name(trials.right);
        let symbol = trials
            .inplace
            .as_deref()
            .and_then(operator_symbol)
            .or_else(|| operator_symbol(&trials.forward));
        match symbol {
            Some(symbol) if is_comparison(&trials.forward) => ExcType::type_error(format!(
                "'{symbol}' not supported between instances of '{left}' and '{right}'"
            )),
            Some(symbol) => ExcType::unsupported_operands(&symbol, left, right),
            None => ExcType::unsupported_operands(&trials.forward, left, right),
        }
    }

    /// TO_BOOL: `value → bool` through `__bool__`; true when the slot is absent.
    pub(super) fn to_bool(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        if let Value::Bool(_) = value {
            self.push(value);
            return Ok(());
        }
        match self.slot(value, "__bool__", MAX_CALL_INDIRECTION)? {
            Slot::Missing => {
                self.push(Value::Bool(true));
                Ok(())
            }
            Slot::Bound(method) => self.call_bool_slot(method),
            Slot::Binding { mark } => self.defer(mark, Continuation::BoolSlot),
        }
    }

    /// Calls a bound `__bool__` and pushes its checked result.
    pub(super) fn call_bool_slot(&mut self, method: Value) -> RunResult<()> {
        if let Some(result) = self.call_then(method, Vec::new(), Continuation::ToBool)? {
            let result = self.expect_bool(result)?;
            self.push(result);
        }
        Ok(())
    }

    /// Checks the result of a `__bool__` call.
    pub(super) fn expect_bool(&self, result: Value) -> RunResult<Value> {
        match result {
            Value::Bool(_) => Ok(result),
            other => Err(ExcType::type_error(format!(
                "__bool__ should return bool, returned {}",
                self.heap.type_name(other)
            ))),
        }
    }
}

fn is_comparison(slot: &str) -> bool {
    matches!(slot, "__lt__" | "__le__" | "__gt__" | "__ge__")
}

/// Source-level spelling of an operator slot, `+=` for in-place slots.
fn operator_symbol(slot: &str) -> Option<String> {
    let stem = slot.strip_prefix("__")?.strip_suffix("__")?;
    let (stem, suffix) = match stem.strip_prefix('i') {
        Some(rest) if base_symbol(rest).is_some() => (rest, "="),
        _ => (stem, ""),
    };
    base_symbol(stem).map(|symbol| format!("{symbol}{suffix}"))
}

fn base_symbol(stem: &str) -> Option<&'static str> {
    Some(match stem {
        "add" => "+",
        "sub" => "-",
        "mul" => "*",
        "matmul" => "@",
        "truediv" => "/",
        "floordiv" => "//",
        "mod" => "%",
        "pow" => "**",
        "lshift" => "<<",
        "rshift" => ">>",
        "and" => "&",
        "or" => "|",
        "xor" => "^",
        "lt" => "<",
        "le" => "<=",
        "gt" => ">",
        "ge" => ">=",
        "eq" => "==",
        "ne" => "!=",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn symbols_for_forward_and_inplace_slots() {
        assert_eq!(operator_symbol("__add__").as_deref(), Some("+"));
        assert_eq!(operator_symbol("__iadd__").as_deref(), Some("+="));
        assert_eq!(operator_symbol("__floordiv__").as_deref(), Some("//"));
        assert_eq!(operator_symbol("__lt__").as_deref(), Some("<"));
        assert_eq!(operator_symbol("__frobnicate__"), None);
        assert_eq!(operator_symbol("add"), None);
    }
}
