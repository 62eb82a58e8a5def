//! Expression evaluation: `Expr → (Value, Capability)` (spec.md §4.2).

use crate::capability::{Capability, SourceId};
use crate::env::Environment;
use crate::error::{CamelError, CamelResult};
use crate::interpreter::builtins;
use crate::ir::{BinOpKind, BoolOpKind, CompareOp, ComprehensionClause, Expr, UnaryOpKind};
use crate::value::{Dict, Value};

pub type Evaluated = (Value, Capability);

pub fn eval_expr(env: &mut Environment, expr: &Expr) -> CamelResult<Evaluated> {
    match expr {
        Expr::Literal(value) => Ok((value.clone(), Capability::trusted_literal())),
        Expr::Var(name) => {
            let (value, cap) = env.get(name)?;
            Ok((value.clone(), cap.clone()))
        }
        Expr::Attr { base, path } => {
            let (mut current, cap) = eval_expr(env, base)?;
            for segment in path {
                current = walk_attr(&current, segment)?;
            }
            Ok((current, cap))
        }
        Expr::Index { base, index } => {
            let (base_val, base_cap) = eval_expr(env, base)?;
            let (index_val, index_cap) = eval_expr(env, index)?;
            let result = index_value(&base_val, &index_val)?;
            Ok((result, Capability::merge(&base_cap, &index_cap)))
        }
        Expr::Slice { base, start, stop, step } => {
            let (base_val, mut cap) = eval_expr(env, base)?;
            let mut resolve = |e: &Option<Box<Expr>>, env: &mut Environment| -> CamelResult<Option<i64>> {
                match e {
                    None => Ok(None),
                    Some(inner) => {
                        let (v, c) = eval_expr(env, inner)?;
                        cap = Capability::merge(&cap, &c);
                        match v {
                            Value::Int(i) => Ok(Some(i)),
                            other => Err(CamelError::runtime_trusted(format!(
                                "slice indices must be integers, got '{}'",
                                other.type_name()
                            ))),
                        }
                    }
                }
            };
            let start_i = resolve(start, env)?;
            let stop_i = resolve(stop, env)?;
            let step_i = resolve(step, env)?;
            let sliced = slice_value(&base_val, start_i, stop_i, step_i)?;
            Ok((sliced, cap))
        }
        Expr::BinOp { op, left, right } => {
            let (l, lc) = eval_expr(env, left)?;
            let (r, rc) = eval_expr(env, right)?;
            let result = apply_binop(*op, &l, &r)?;
            Ok((result, Capability::merge(&lc, &rc)))
        }
        Expr::UnaryOp { op, operand } => {
            let (value, cap) = eval_expr(env, operand)?;
            let result = match op {
                UnaryOpKind::Neg => value.neg()?,
                UnaryOpKind::Pos => value,
                UnaryOpKind::Not => Value::Bool(!value.truthy()),
            };
            Ok((result, cap))
        }
        Expr::Compare { first, rest } => eval_compare_chain(env, first, rest),
        Expr::BoolOp { op, operands } => eval_bool_op(env, *op, operands),
        Expr::In { left, right, negate } => {
            let (l, lc) = eval_expr(env, left)?;
            let (r, rc) = eval_expr(env, right)?;
            let found = membership(&l, &r)?;
            Ok((Value::Bool(found != *negate), Capability::merge(&lc, &rc)))
        }
        Expr::Is { left, right, negate } => {
            let (l, lc) = eval_expr(env, left)?;
            let (r, rc) = eval_expr(env, right)?;
            let same = l.py_eq(&r);
            Ok((Value::Bool(same != *negate), Capability::merge(&lc, &rc)))
        }
        Expr::Call { func, args, kwargs } => {
            let mut evaluated_args = Vec::with_capacity(args.len());
            let mut cap = Capability::trusted_literal();
            for a in args {
                let (v, c) = eval_expr(env, a)?;
                cap = Capability::merge(&cap, &c);
                evaluated_args.push(v);
            }
            let mut evaluated_kwargs = Vec::with_capacity(kwargs.len());
            for (k, v) in kwargs {
                let (val, c) = eval_expr(env, v)?;
                cap = Capability::merge(&cap, &c);
                evaluated_kwargs.push((k.clone(), val));
            }
            let result = builtins::call_builtin(func, &evaluated_args, &evaluated_kwargs)?;
            Ok((result, cap))
        }
        Expr::MethodCall { receiver, method, args } => {
            let (recv, mut cap) = eval_expr(env, receiver)?;
            let mut evaluated_args = Vec::with_capacity(args.len());
            for a in args {
                let (v, c) = eval_expr(env, a)?;
                cap = Capability::merge(&cap, &c);
                evaluated_args.push(v);
            }
            let result = builtins::call_method(&recv, method, &evaluated_args)?;
            Ok((result, cap))
        }
        Expr::ListLit(items) => {
            let (values, cap) = eval_all(env, items)?;
            Ok((Value::List(values), cap))
        }
        Expr::TupleLit(items) => {
            let (values, cap) = eval_all(env, items)?;
            Ok((Value::Tuple(values), cap))
        }
        Expr::SetLit(items) => {
            let (values, cap) = eval_all(env, items)?;
            Ok((dedup_values(values), cap))
        }
        Expr::DictLit(pairs) => {
            let mut dict = Dict::new();
            let mut cap = Capability::trusted_literal();
            for (k, v) in pairs {
                let (kv, kc) = eval_expr(env, k)?;
                let (vv, vc) = eval_expr(env, v)?;
                cap = Capability::merge(&Capability::merge(&cap, &kc), &vc);
                dict.insert(kv.display_text(), vv);
            }
            Ok((Value::Dict(dict), cap))
        }
        Expr::ListComp { elt, clauses } => {
            let (values, cap) = eval_comprehension(env, elt, clauses)?;
            Ok((Value::List(values), cap))
        }
        Expr::SetComp { elt, clauses } => {
            let (values, cap) = eval_comprehension(env, elt, clauses)?;
            Ok((dedup_values(values), cap))
        }
        Expr::DictComp { key, value, clauses } => {
            let mut cap_acc = Capability::trusted_literal();
            let mut dict = Dict::new();
            run_clauses(env, clauses, &mut cap_acc, &mut |env, cap_acc| {
                let (kv, kc) = eval_expr(env, key)?;
                let (vv, vc) = eval_expr(env, value)?;
                *cap_acc = Capability::merge(&Capability::merge(cap_acc, &kc), &vc);
                dict.insert(kv.display_text(), vv);
                Ok(())
            })?;
            Ok((Value::Dict(dict), cap_acc))
        }
    }
}

fn eval_all(env: &mut Environment, items: &[Expr]) -> CamelResult<(Vec<Value>, Capability)> {
    let mut values = Vec::with_capacity(items.len());
    let mut cap = Capability::trusted_literal();
    for item in items {
        let (v, c) = eval_expr(env, item)?;
        cap = Capability::merge(&cap, &c);
        values.push(v);
    }
    Ok((values, cap))
}

fn dedup_values(values: Vec<Value>) -> Value {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !out.iter().any(|existing| existing.py_eq(&v)) {
            out.push(v);
        }
    }
    Value::List(out)
}

fn eval_compare_chain(
    env: &mut Environment,
    first: &Expr,
    rest: &[(CompareOp, Expr)],
) -> CamelResult<Evaluated> {
    let (mut left, mut cap) = eval_expr(env, first)?;
    for (op, rhs_expr) in rest {
        let (right, rc) = eval_expr(env, rhs_expr)?;
        cap = Capability::merge(&cap, &rc);
        let holds = match op {
            CompareOp::Eq => left.py_eq(&right),
            CompareOp::NotEq => !left.py_eq(&right),
            CompareOp::Lt => left.compare(&right)? == std::cmp::Ordering::Less,
            CompareOp::LtEq => left.compare(&right)? != std::cmp::Ordering::Greater,
            CompareOp::Gt => left.compare(&right)? == std::cmp::Ordering::Greater,
            CompareOp::GtEq => left.compare(&right)? != std::cmp::Ordering::Less,
        };
        if !holds {
            return Ok((Value::Bool(false), cap));
        }
        left = right;
    }
    Ok((Value::Bool(true), cap))
}

/// `and`/`or` return the deciding operand's value (not a coerced bool) but
/// merge only the capabilities of operands actually evaluated (spec.md §9
/// "merge only the capabilities of evaluated operands").
fn eval_bool_op(env: &mut Environment, op: BoolOpKind, operands: &[Expr]) -> CamelResult<Evaluated> {
    let mut cap = Capability::trusted_literal();
    let mut last = Value::Null;
    for (i, operand) in operands.iter().enumerate() {
        let (value, c) = eval_expr(env, operand)?;
        cap = Capability::merge(&cap, &c);
        let stop = match op {
            BoolOpKind::And => !value.truthy(),
            BoolOpKind::Or => value.truthy(),
        };
        last = value;
        if stop || i == operands.len() - 1 {
            return Ok((last, cap));
        }
    }
    Ok((last, cap))
}

fn membership(needle: &Value, haystack: &Value) -> CamelResult<bool> {
    match haystack {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(needle))),
        Value::Str(s) => match needle {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            other => Err(CamelError::runtime_trusted(format!(
                "'in <string>' requires string as left operand, not '{}'",
                other.type_name()
            ))),
        },
        Value::Dict(d) => match needle {
            Value::Str(key) => Ok(d.contains_key(key)),
            other => Err(CamelError::runtime_trusted(format!(
                "'in <dict>' requires string keys, got '{}'",
                other.type_name()
            ))),
        },
        other => Err(CamelError::runtime_trusted(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn walk_attr(value: &Value, segment: &str) -> CamelResult<Value> {
    match value {
        Value::Dict(d) => d
            .get(segment)
            .cloned()
            .ok_or_else(|| CamelError::runtime_trusted(format!("key '{segment}' not found"))),
        Value::List(items) | Value::Tuple(items) => {
            let idx: usize = segment
                .parse()
                .map_err(|_| CamelError::runtime_trusted(format!("invalid attribute '{segment}' on a list")))?;
            items
                .get(idx)
                .cloned()
                .ok_or_else(|| CamelError::runtime_trusted(format!("index {idx} out of range")))
        }
        other => Err(CamelError::runtime_trusted(format!(
            "'{}' object has no attribute '{segment}'",
            other.type_name()
        ))),
    }
}

fn index_value(base: &Value, index: &Value) -> CamelResult<Value> {
    match (base, index) {
        (Value::List(items), Value::Int(i)) | (Value::Tuple(items), Value::Int(i)) => {
            resolve_index(items.len(), *i)
                .and_then(|idx| items.get(idx).cloned().ok_or_else(out_of_range))
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = resolve_index(chars.len(), *i)?;
            chars
                .get(idx)
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(out_of_range)
        }
        (Value::Dict(d), Value::Str(key)) => d
            .get(key)
            .cloned()
            .ok_or_else(|| CamelError::runtime_trusted(format!("key '{key}' not found"))),
        (base, index) => Err(CamelError::runtime_trusted(format!(
            "'{}' cannot be indexed by '{}'",
            base.type_name(),
            index.type_name()
        ))),
    }
}

fn out_of_range() -> CamelError {
    CamelError::runtime_trusted("index out of range")
}

fn resolve_index(len: usize, i: i64) -> CamelResult<usize> {
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize >= len {
        Err(out_of_range())
    } else {
        Ok(resolved as usize)
    }
}

fn slice_value(
    base: &Value,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> CamelResult<Value> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(CamelError::runtime_trusted("slice step cannot be zero"));
    }
    match base {
        Value::List(items) => Ok(Value::List(slice_indices(items.len(), start, stop, step)
            .into_iter()
            .map(|i| items[i].clone())
            .collect())),
        Value::Tuple(items) => Ok(Value::Tuple(slice_indices(items.len(), start, stop, step)
            .into_iter()
            .map(|i| items[i].clone())
            .collect())),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let sliced: String = slice_indices(chars.len(), start, stop, step)
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::Str(sliced))
        }
        other => Err(CamelError::runtime_trusted(format!(
            "'{}' is not sliceable",
            other.type_name()
        ))),
    }
}

/// Python-like slice index resolution, supporting negative indices and
/// negative (reverse) steps.
fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len_i = len as i64;
    let clamp = |v: i64| -> i64 { v.max(0).min(len_i) };
    let normalize = |v: i64| -> i64 { if v < 0 { (v + len_i).max(0) } else { v } };

    let mut indices = Vec::new();
    if step > 0 {
        let s = start.map(normalize).unwrap_or(0).clamp(0, len_i);
        let e = clamp(stop.map(normalize).unwrap_or(len_i));
        let mut i = s;
        while i < e {
            indices.push(i as usize);
            i += step;
        }
    } else {
        let default_start = len_i - 1;
        let s = start
            .map(|v| if v < 0 { v + len_i } else { v })
            .unwrap_or(default_start)
            .clamp(-1, len_i - 1);
        let e = match stop {
            Some(v) => {
                let normalized = if v < 0 { v + len_i } else { v };
                normalized.clamp(-1, len_i - 1)
            }
            None => -1,
        };
        let mut i = s;
        while i > e {
            if i >= 0 && (i as usize) < len {
                indices.push(i as usize);
            }
            i += step;
        }
    }
    indices
}

fn apply_binop(op: BinOpKind, left: &Value, right: &Value) -> CamelResult<Value> {
    match op {
        BinOpKind::Add => left.add(right),
        BinOpKind::Sub => left.sub(right),
        BinOpKind::Mul => left.mul(right),
        BinOpKind::Div => left.div(right),
        BinOpKind::Mod => left.rem(right),
    }
}

/// Materializes an iterable `Value` as a vector of `(Value, Capability)` for
/// `for`/comprehension clauses. The capability of each produced element is
/// the iterable's own capability (no per-element granularity exists in the
/// value model).
pub fn iterate(value: &Value, cap: &Capability) -> CamelResult<Vec<Evaluated>> {
    let items: Vec<Value> = match value {
        Value::List(items) | Value::Tuple(items) => items.clone(),
        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
        Value::Dict(d) => d.keys().map(|k| Value::Str(k.clone())).collect(),
        other => {
            return Err(CamelError::runtime_trusted(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    };
    Ok(items.into_iter().map(|v| (v, cap.clone())).collect())
}

/// Binds comprehension/for-loop targets, supporting single and tuple
/// unpacking the same way `Step::Unpack` does.
pub fn bind_targets(env: &mut Environment, targets: &[String], value: &Value, cap: &Capability) {
    if targets.len() == 1 {
        env.set(targets[0].clone(), value.clone(), cap.clone());
        return;
    }
    if let Value::List(items) | Value::Tuple(items) = value {
        for (name, item) in targets.iter().zip(items.iter()) {
            env.set(name.clone(), item.clone(), cap.clone());
        }
    }
}

fn run_clauses(
    env: &mut Environment,
    clauses: &[ComprehensionClause],
    cap_acc: &mut Capability,
    body: &mut dyn FnMut(&mut Environment, &mut Capability) -> CamelResult<()>,
) -> CamelResult<()> {
    run_clauses_rec(env, clauses, cap_acc, body)
}

fn run_clauses_rec(
    env: &mut Environment,
    clauses: &[ComprehensionClause],
    cap_acc: &mut Capability,
    body: &mut dyn FnMut(&mut Environment, &mut Capability) -> CamelResult<()>,
) -> CamelResult<()> {
    match clauses.split_first() {
        None => body(env, cap_acc),
        Some((clause, rest)) => {
            let (iterable, iter_cap) = eval_expr(env, &clause.iterable)?;
            *cap_acc = Capability::merge(cap_acc, &iter_cap);
            let items = iterate(&iterable, &iter_cap)?;
            let snapshots: Vec<_> = clause.targets.iter().map(|t| env.snapshot(t)).collect();
            for (value, item_cap) in items {
                bind_targets(env, &clause.targets, &value, &item_cap);
                let mut include = true;
                for guard in &clause.ifs {
                    let (guard_val, guard_cap) = eval_expr(env, guard)?;
                    *cap_acc = Capability::merge(cap_acc, &guard_cap);
                    if !guard_val.truthy() {
                        include = false;
                        break;
                    }
                }
                if include {
                    run_clauses_rec(env, rest, cap_acc, body)?;
                }
            }
            for (target, snapshot) in clause.targets.iter().zip(snapshots) {
                env.restore(target, snapshot);
            }
            Ok(())
        }
    }
}

fn eval_comprehension(
    env: &mut Environment,
    elt: &Expr,
    clauses: &[ComprehensionClause],
) -> CamelResult<(Vec<Value>, Capability)> {
    let mut cap_acc = Capability::trusted_literal();
    let mut out = Vec::new();
    run_clauses(env, clauses, &mut cap_acc, &mut |env, cap_acc| {
        let (v, c) = eval_expr(env, elt)?;
        *cap_acc = Capability::merge(cap_acc, &c);
        out.push(v);
        Ok(())
    })?;
    Ok((out, cap_acc))
}

/// Tags a tool-call output with its source per spec.md §4.2 "Tool output
/// provenance": `merge(inputs) ⊕ source_tag(toolName)`.
pub fn tag_tool_output(inputs_cap: Capability, tool_name: &str) -> Capability {
    inputs_cap.with_source(SourceId::tool(tool_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Expr as E;

    #[test]
    fn and_or_merge_only_evaluated_operand_capabilities() {
        let mut env = Environment::new();
        env.set("t", Value::Bool(false), Capability::trusted_literal());
        env.set(
            "u",
            Value::Bool(true),
            Capability::untrusted(SourceId::qllm("r")),
        );
        // `t and u`: short-circuits on `t`, must not taint with `u`'s capability.
        let expr = E::BoolOp {
            op: BoolOpKind::And,
            operands: vec![E::Var("t".into()), E::Var("u".into())],
        };
        let (value, cap) = eval_expr(&mut env, &expr).unwrap();
        assert_eq!(value, Value::Bool(false));
        assert!(cap.trusted);
    }

    #[test]
    fn slice_with_negative_step_reverses() {
        let mut env = Environment::new();
        let expr = E::Slice {
            base: Box::new(E::Literal(Value::List(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
            ]))),
            start: None,
            stop: None,
            step: Some(Box::new(E::Literal(Value::Int(-1)))),
        };
        let (value, _) = eval_expr(&mut env, &expr).unwrap();
        assert_eq!(value, Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)]));
    }

    #[test]
    fn slice_step_zero_errors() {
        let mut env = Environment::new();
        let expr = E::Slice {
            base: Box::new(E::Literal(Value::List(vec![Value::Int(1)]))),
            start: None,
            stop: None,
            step: Some(Box::new(E::Literal(Value::Int(0)))),
        };
        assert!(eval_expr(&mut env, &expr).is_err());
    }

    #[test]
    fn list_comprehension_with_guard_merges_guard_capability() {
        let mut env = Environment::new();
        env.set(
            "items",
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            Capability::untrusted(SourceId::tool("fetch")),
        );
        let expr = E::ListComp {
            elt: Box::new(E::Var("x".into())),
            clauses: vec![ComprehensionClause {
                targets: vec!["x".into()],
                iterable: E::Var("items".into()),
                ifs: vec![E::Compare {
                    first: Box::new(E::Var("x".into())),
                    rest: vec![(CompareOp::Gt, E::Literal(Value::Int(1)))],
                }],
            }],
        };
        let (value, cap) = eval_expr(&mut env, &expr).unwrap();
        assert_eq!(value, Value::List(vec![Value::Int(2), Value::Int(3)]));
        assert!(!cap.trusted);
    }

    #[test]
    fn comprehension_target_does_not_leak_outside_scope() {
        let mut env = Environment::new();
        env.set("items", Value::List(vec![Value::Int(1)]), Capability::trusted_literal());
        let expr = E::ListComp {
            elt: Box::new(E::Var("x".into())),
            clauses: vec![ComprehensionClause {
                targets: vec!["x".into()],
                iterable: E::Var("items".into()),
                ifs: vec![],
            }],
        };
        eval_expr(&mut env, &expr).unwrap();
        assert!(env.get("x").is_err());
    }

    #[test]
    fn dict_attr_and_list_index_access() {
        let mut env = Environment::new();
        let mut dict = Dict::new();
        dict.insert("name".to_string(), Value::Str("Alice".to_string()));
        env.set("r", Value::Dict(dict), Capability::untrusted(SourceId::qllm("r")));
        let expr = E::Attr {
            base: Box::new(E::Var("r".into())),
            path: vec!["name".into()],
        };
        let (value, cap) = eval_expr(&mut env, &expr).unwrap();
        assert_eq!(value, Value::Str("Alice".to_string()));
        assert!(!cap.trusted);
    }
}
