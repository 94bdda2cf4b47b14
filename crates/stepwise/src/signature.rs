//! Argument binding: turns a positional tuple and a keyword mapping into frame locals.

use crate::{
    bytecode::{ArgSpec, ParamKind},
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    types::{Attrs, Dict, DictKey},
    value::Value,
};

/// Binds call arguments against `spec`.
///
/// Checks run in a fixed order so the first failure reported is deterministic:
/// surplus positionals, then each keyword in mapping order (non-string key, unknown
/// name, already bound, positional-only), then missing parameters after defaults.
///
/// `defaults` is parallel to `spec.params`.
pub(crate) fn bind(
    heap: &mut Heap<impl ResourceTracker>,
    name: &str,
    spec: &ArgSpec,
    defaults: &[Option<Value>],
    args: Vec<Value>,
    kwargs: Dict,
) -> RunResult<Attrs> {
    let positional = spec.positional_count();
    if args.len() > positional && spec.var_args.is_none() {
        let plural = if positional == 1 { "" } else { "s" };
        let verb = if args.len() == 1 { "was" } else { "were" };
        return Err(ExcType::type_error(format!(
            "{name}() takes {positional} positional argument{plural} but {} {verb} given",
            args.len()
        )));
    }

    let mut slots: Vec<Option<Value>> = vec![None; spec.params.len()];
    let mut args = args.into_iter();
    for slot in slots.iter_mut().take(positional) {
        match args.next() {
            Some(value) => *slot = Some(value),
            None => break,
        }
    }
    let surplus: Vec<Value> = args.collect();

    let mut collected = Dict::default();
    for (key, value) in kwargs {
        let DictKey::Str(key_name) = key else {
            return Err(ExcType::type_error(format!("{name}() keywords must be strings")));
        };
        let Some(index) = spec.params.iter().position(|p| p.name == key_name) else {
            if spec.var_kwargs.is_some() {
                collected.insert(DictKey::Str(key_name), value);
                continue;
            }
            return Err(ExcType::type_error(format!(
                "{name}() got an unexpected keyword argument '{key_name}'"
            )));
        };
        let param = &spec.params[index];
        if param.kind == ParamKind::PositionalOnly && spec.var_kwargs.is_some() {
            collected.insert(DictKey::Str(key_name), value);
            continue;
        }
        if slots[index].is_some() {
            return Err(ExcType::type_error(format!(
                "{name}() got multiple values for argument '{key_name}'"
            )));
        }
        if param.kind == ParamKind::PositionalOnly {
            return Err(ExcType::type_error(format!(
                "{name}() got some positional-only arguments passed as keyword arguments: '{key_name}'"
            )));
        }
        slots[index] = Some(value);
    }

    let mut missing_positional: Vec<&str> = Vec::new();
    let mut missing_keyword: Vec<&str> = Vec::new();
    for (index, param) in spec.params.iter().enumerate() {
        if slots[index].is_none() {
            slots[index] = defaults.get(index).copied().flatten();
        }
        if slots[index].is_none() {
            if param.kind == ParamKind::KeywordOnly {
                missing_keyword.push(&param.name);
            } else {
                missing_positional.push(&param.name);
            }
        }
    }
    if !missing_positional.is_empty() {
        return Err(missing_error(name, "positional", &missing_positional));
    }
    if !missing_keyword.is_empty() {
        return Err(missing_error(name, "keyword-only", &missing_keyword));
    }

    let mut locals = Attrs::default();
    for (param, slot) in spec.params.iter().zip(slots) {
        locals.insert(param.name.clone(), slot.unwrap_or_default());
    }
    if let Some(var_args) = &spec.var_args {
        locals.insert(var_args.clone(), heap.alloc_tuple(surplus)?);
    }
    if let Some(var_kwargs) = &spec.var_kwargs {
        let dict = heap.allocate(HeapData::Dict(collected))?;
        locals.insert(var_kwargs.clone(), Value::Ref(dict));
    }
    Ok(locals)
}

fn missing_error(name: &str, kind: &str, names: &[&str]) -> crate::exception::RunError {
    let plural = if names.len() == 1 { "" } else { "s" };
    ExcType::type_error(format!(
        "{name}() missing {} required {kind} argument{plural}: {}",
        names.len(),
        join_names(names)
    ))
}

/// Formats `'a'`, `'a' and 'b'`, `'a', 'b' and 'c'`.
fn join_names(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {last}", rest.join(", ")),
        Some((last, _)) => last.clone(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::{Constant, Param},
        exception::RunError,
        resource::NoLimitTracker,
    };

    fn message(result: RunResult<Attrs>) -> String {
        match result {
            Err(RunError::Exc(exc)) => exc.arg().unwrap_or_default().to_owned(),
            other => panic!("expected a TypeError, got {other:?}"),
        }
    }

    fn kwargs(pairs: &[(&str, i64)]) -> Dict {
        pairs.iter().map(|&(k, v)| (DictKey::from(k), Value::Int(v))).collect()
    }

    #[test]
    fn surplus_positionals_fail_without_collector() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![Param::positional("a")]);
        let err = bind(&mut heap, "f", &spec, &[None], vec![Value::Int(1), Value::Int(2)], Dict::default());
        assert_eq!(message(err), "f() takes 1 positional argument but 2 were given");
    }

    #[test]
    fn defaults_fill_unassigned_parameters() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![
            Param::positional("a"),
            Param::positional("b").with_default(Constant::Int(7)),
        ]);
        let locals = bind(&mut heap, "f", &spec, &[None, Some(Value::Int(7))], vec![Value::Int(1)], Dict::default()).unwrap();
        assert_eq!(locals.get("a"), Some(&Value::Int(1)));
        assert_eq!(locals.get("b"), Some(&Value::Int(7)));
    }

    #[test]
    fn keyword_for_bound_parameter_is_a_duplicate() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![Param::positional("a")]);
        let err = bind(&mut heap, "f", &spec, &[None], vec![Value::Int(1)], kwargs(&[("a", 2)]));
        assert_eq!(message(err), "f() got multiple values for argument 'a'");
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![Param::positional("a")]);
        let err = bind(&mut heap, "f", &spec, &[None], Vec::new(), kwargs(&[("zz", 2)]));
        assert_eq!(message(err), "f() got an unexpected keyword argument 'zz'");
    }

    #[test]
    fn positional_only_rejects_keyword() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![Param::positional_only("a")]);
        let err = bind(&mut heap, "f", &spec, &[None], Vec::new(), kwargs(&[("a", 2)]));
        assert_eq!(
            message(err),
            "f() got some positional-only arguments passed as keyword arguments: 'a'"
        );
    }

    #[test]
    fn non_string_keyword_is_rejected() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![Param::positional("a")]);
        let mut kw = Dict::default();
        kw.insert(DictKey::Int(1), Value::Int(2));
        let err = bind(&mut heap, "f", &spec, &[None], Vec::new(), kw);
        assert_eq!(message(err), "f() keywords must be strings");
    }

    #[test]
    fn missing_arguments_are_listed() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![Param::positional("a"), Param::positional("b"), Param::keyword_only("k")]);
        let err = bind(&mut heap, "f", &spec, &[None, None, None], Vec::new(), Dict::default());
        assert_eq!(message(err), "f() missing 2 required positional arguments: 'a' and 'b'");
        let err = bind(&mut heap, "f", &spec, &[None, None, None], vec![Value::Int(1), Value::Int(2)], Dict::default());
        assert_eq!(message(err), "f() missing 1 required keyword-only argument: 'k'");
    }

    #[test]
    fn collectors_gather_extras() {
        let mut heap = Heap::new(NoLimitTracker);
        let spec = ArgSpec::new(vec![Param::positional("a")]).var_args("rest").var_kwargs("extra");
        let locals = bind(
            &mut heap,
            "f",
            &spec,
            &[None],
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            kwargs(&[("w", 5)]),
        )
        .unwrap();
        let keys: Vec<&str> = locals.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "rest", "extra"]);
        assert_eq!(heap.repr(locals["rest"]), "(2, 3)");
        assert_eq!(heap.repr(locals["extra"]), "{'w': 5}");
    }
}
