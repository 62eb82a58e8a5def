//! Builtin function and method whitelist dispatch (spec.md §4.2).

use crate::error::{CamelError, CamelResult};
use crate::value::{Dict, Value};
use crate::whitelist;
use std::cmp::Ordering;

pub fn call_builtin(name: &str, args: &[Value], _kwargs: &[(String, Value)]) -> CamelResult<Value> {
    if !whitelist::is_builtin_function(name) {
        return Err(CamelError::runtime_trusted(format!("'{name}' is not a recognized builtin")));
    }
    match name {
        "len" => Ok(Value::Int(one_arg(args, name)?.length()? as i64)),
        "str" => Ok(Value::Str(one_arg(args, name)?.display_text())),
        "repr" => Ok(Value::Str(one_arg(args, name)?.repr_text())),
        "bool" => Ok(Value::Bool(one_arg(args, name)?.truthy())),
        "int" => to_int(one_arg(args, name)?),
        "float" => to_float(one_arg(args, name)?),
        "type" => Ok(Value::Str(one_arg(args, name)?.type_name().to_string())),
        "list" => Ok(Value::List(into_iterable(one_arg(args, name)?)?)),
        "tuple" => Ok(Value::Tuple(into_iterable(one_arg(args, name)?)?)),
        "set" => {
            let mut out: Vec<Value> = Vec::new();
            for v in into_iterable(one_arg(args, name)?)? {
                if !out.iter().any(|e| e.py_eq(&v)) {
                    out.push(v);
                }
            }
            Ok(Value::List(out))
        }
        "dict" => to_dict(args),
        "range" => build_range(args),
        "enumerate" => {
            let items = into_iterable(one_arg(args, name)?)?;
            Ok(Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::Tuple(vec![Value::Int(i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let lists: Vec<Vec<Value>> = args
                .iter()
                .map(|a| into_iterable(a.clone()))
                .collect::<CamelResult<_>>()?;
            let min_len = lists.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(min_len);
            for i in 0..min_len {
                out.push(Value::Tuple(lists.iter().map(|l| l[i].clone()).collect()));
            }
            Ok(Value::List(out))
        }
        "reversed" => {
            let mut items = into_iterable(one_arg(args, name)?)?;
            items.reverse();
            Ok(Value::List(items))
        }
        "sorted" => {
            let mut items = into_iterable(one_arg(args, name)?)?;
            sort_values(&mut items)?;
            Ok(Value::List(items))
        }
        "sum" => {
            let items = into_iterable(one_arg(args, name)?)?;
            let mut total = Value::Int(0);
            for item in items {
                total = total.add(&item)?;
            }
            Ok(total)
        }
        "min" => reduce_extreme(args, name, Ordering::Less),
        "max" => reduce_extreme(args, name, Ordering::Greater),
        "abs" => match one_arg(args, name)? {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            other => Err(bad_arg_type("abs", &other)),
        },
        "divmod" => {
            if args.len() != 2 {
                return Err(arity_error("divmod", 2, args.len()));
            }
            let q = args[0].div(&args[1])?;
            let r = args[0].rem(&args[1])?;
            let q_int = match q {
                Value::Float(f) => Value::Int(f.floor() as i64),
                other => other,
            };
            Ok(Value::Tuple(vec![q_int, r]))
        }
        "any" => {
            let items = into_iterable(one_arg(args, name)?)?;
            Ok(Value::Bool(items.iter().any(Value::truthy)))
        }
        "all" => {
            let items = into_iterable(one_arg(args, name)?)?;
            Ok(Value::Bool(items.iter().all(Value::truthy)))
        }
        "hash" => Ok(Value::Int(fnv1a_hash(&one_arg(args, name)?.repr_text()) as i64)),
        "dir" => {
            let target = one_arg(args, name)?;
            let methods = match target {
                Value::Str(_) => whitelist::STRING_METHODS,
                Value::List(_) | Value::Tuple(_) => whitelist::LIST_METHODS,
                Value::Dict(_) => whitelist::DICT_METHODS,
                _ => &[],
            };
            Ok(Value::List(methods.iter().map(|m| Value::Str(m.to_string())).collect()))
        }
        other => Err(CamelError::runtime_trusted(format!("builtin '{other}' not implemented"))),
    }
}

pub fn call_method(receiver: &Value, method: &str, args: &[Value]) -> CamelResult<Value> {
    match receiver {
        Value::Str(s) => string_method(s, method, args),
        Value::List(items) | Value::Tuple(items) => list_method(items, method, args),
        Value::Dict(d) => dict_method(d, method, args),
        other => Err(CamelError::runtime_trusted(format!(
            "'{}' object has no method '{method}'",
            other.type_name()
        ))),
    }
}

fn one_arg<'a>(args: &'a [Value], name: &str) -> CamelResult<Value> {
    if args.len() != 1 {
        return Err(arity_error(name, 1, args.len()));
    }
    Ok(args[0].clone())
}

fn arity_error(name: &str, expected: usize, got: usize) -> CamelError {
    CamelError::runtime_trusted(format!("'{name}' expected {expected} argument(s), got {got}"))
}

fn bad_arg_type(name: &str, value: &Value) -> CamelError {
    CamelError::runtime_trusted(format!("'{name}' does not support type '{}'", value.type_name()))
}

fn to_int(value: Value) -> CamelResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Float(f) => Ok(Value::Int(f as i64)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| CamelError::runtime_trusted(format!("invalid literal for int(): '{s}'"))),
        other => Err(bad_arg_type("int", &other)),
    }
}

fn to_float(value: Value) -> CamelResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| CamelError::runtime_trusted(format!("invalid literal for float(): '{s}'"))),
        other => Err(bad_arg_type("float", &other)),
    }
}

fn into_iterable(value: Value) -> CamelResult<Vec<Value>> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Dict(d) => Ok(d.keys().map(|k| Value::Str(k.clone())).collect()),
        other => Err(CamelError::runtime_trusted(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn to_dict(args: &[Value]) -> CamelResult<Value> {
    if args.is_empty() {
        return Ok(Value::Dict(Dict::new()));
    }
    let pairs = into_iterable(args[0].clone())?;
    let mut dict = Dict::new();
    for pair in pairs {
        match pair {
            Value::Tuple(kv) | Value::List(kv) if kv.len() == 2 => {
                dict.insert(kv[0].display_text(), kv[1].clone());
            }
            other => {
                return Err(CamelError::runtime_trusted(format!(
                    "cannot build dict from element of type '{}'",
                    other.type_name()
                )))
            }
        }
    }
    Ok(Value::Dict(dict))
}

fn build_range(args: &[Value]) -> CamelResult<Value> {
    let as_int = |v: &Value| -> CamelResult<i64> {
        match v {
            Value::Int(i) => Ok(*i),
            other => Err(bad_arg_type("range", other)),
        }
    };
    let (start, stop, step) = match args.len() {
        1 => (0, as_int(&args[0])?, 1),
        2 => (as_int(&args[0])?, as_int(&args[1])?, 1),
        3 => (as_int(&args[0])?, as_int(&args[1])?, as_int(&args[2])?),
        n => return Err(arity_error("range", 3, n)),
    };
    if step == 0 {
        return Err(CamelError::runtime_trusted("range() step cannot be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop {
            out.push(Value::Int(i));
            i += step;
        }
    } else {
        while i > stop {
            out.push(Value::Int(i));
            i += step;
        }
    }
    Ok(Value::List(out))
}

fn sort_values(items: &mut [Value]) -> CamelResult<()> {
    let mut err = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(ord) => ord,
        Err(e) => {
            err = Some(e);
            Ordering::Equal
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn reduce_extreme(args: &[Value], name: &str, want: Ordering) -> CamelResult<Value> {
    let items = if args.len() == 1 {
        into_iterable(args[0].clone())?
    } else {
        args.to_vec()
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| CamelError::runtime_trusted(format!("{name}() arg is an empty sequence")))?;
    for item in iter {
        if item.compare(&best)? == want {
            best = item;
        }
    }
    Ok(best)
}

/// FNV-1a over the value's `repr()` text; deterministic within (and across)
/// runs, matching spec.md §4.2's `hash` requirement.
fn fnv1a_hash(text: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn string_method(s: &str, method: &str, args: &[Value]) -> CamelResult<Value> {
    if !whitelist::STRING_METHODS.contains(&method) {
        return Err(unknown_method("str", method));
    }
    let arg_str = |i: usize| -> CamelResult<String> {
        match args.get(i) {
            Some(Value::Str(v)) => Ok(v.clone()),
            _ => Err(CamelError::runtime_trusted(format!("'{method}' expected a string argument"))),
        }
    };
    Ok(match method {
        "lower" => Value::Str(s.to_lowercase()),
        "upper" => Value::Str(s.to_uppercase()),
        "strip" => Value::Str(s.trim().to_string()),
        "lstrip" => Value::Str(s.trim_start().to_string()),
        "rstrip" => Value::Str(s.trim_end().to_string()),
        "split" => {
            let parts: Vec<Value> = if let Ok(sep) = arg_str(0) {
                s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect()
            } else {
                s.split_whitespace().map(|p| Value::Str(p.to_string())).collect()
            };
            Value::List(parts)
        }
        "rsplit" => {
            let parts: Vec<Value> = if let Ok(sep) = arg_str(0) {
                s.rsplit(sep.as_str()).map(|p| Value::Str(p.to_string())).collect()
            } else {
                s.split_whitespace().map(|p| Value::Str(p.to_string())).collect()
            };
            Value::List(parts)
        }
        "splitlines" => Value::List(s.lines().map(|l| Value::Str(l.to_string())).collect()),
        "replace" => {
            let from = arg_str(0)?;
            let to = arg_str(1)?;
            Value::Str(s.replace(from.as_str(), to.as_str()))
        }
        "format" => {
            let mut out = s.to_string();
            for (i, arg) in args.iter().enumerate() {
                out = out.replace(&format!("{{{i}}}"), &arg.display_text());
            }
            Value::Str(out)
        }
        "startswith" => Value::Bool(s.starts_with(arg_str(0)?.as_str())),
        "endswith" => Value::Bool(s.ends_with(arg_str(0)?.as_str())),
        "find" => Value::Int(s.find(arg_str(0)?.as_str()).map(|i| i as i64).unwrap_or(-1)),
        "rfind" => Value::Int(s.rfind(arg_str(0)?.as_str()).map(|i| i as i64).unwrap_or(-1)),
        "index" => s
            .find(arg_str(0)?.as_str())
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| CamelError::runtime_trusted("substring not found"))?,
        "rindex" => s
            .rfind(arg_str(0)?.as_str())
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| CamelError::runtime_trusted("substring not found"))?,
        "count" => Value::Int(s.matches(arg_str(0)?.as_str()).count() as i64),
        "partition" => {
            let sep = arg_str(0)?;
            match s.find(sep.as_str()) {
                Some(i) => Value::Tuple(vec![
                    Value::Str(s[..i].to_string()),
                    Value::Str(sep.clone()),
                    Value::Str(s[i + sep.len()..].to_string()),
                ]),
                None => Value::Tuple(vec![Value::Str(s.to_string()), Value::Str(String::new()), Value::Str(String::new())]),
            }
        }
        "rpartition" => {
            let sep = arg_str(0)?;
            match s.rfind(sep.as_str()) {
                Some(i) => Value::Tuple(vec![
                    Value::Str(s[..i].to_string()),
                    Value::Str(sep.clone()),
                    Value::Str(s[i + sep.len()..].to_string()),
                ]),
                None => Value::Tuple(vec![Value::Str(String::new()), Value::Str(String::new()), Value::Str(s.to_string())]),
            }
        }
        "join" => {
            let items = match args.first() {
                Some(v) => into_iterable(v.clone())?,
                None => return Err(arity_error("join", 1, 0)),
            };
            Value::Str(
                items
                    .iter()
                    .map(Value::display_text)
                    .collect::<Vec<_>>()
                    .join(s),
            )
        }
        "capitalize" => {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => Value::Str(format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase())),
                None => Value::Str(String::new()),
            }
        }
        "title" => Value::Str(
            s.split(' ')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase()),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "islower" => Value::Bool(s.chars().any(|c| c.is_alphabetic()) && s.chars().all(|c| !c.is_alphabetic() || c.is_lowercase())),
        "isupper" => Value::Bool(s.chars().any(|c| c.is_alphabetic()) && s.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())),
        "istitle" => Value::Bool(s == titlecase(s) && s.chars().any(|c| c.is_alphabetic())),
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_alphabetic())),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_alphanumeric())),
        "isspace" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_whitespace())),
        "removeprefix" => {
            let prefix = arg_str(0)?;
            Value::Str(s.strip_prefix(prefix.as_str()).unwrap_or(s).to_string())
        }
        "removesuffix" => {
            let suffix = arg_str(0)?;
            Value::Str(s.strip_suffix(suffix.as_str()).unwrap_or(s).to_string())
        }
        other => return Err(unknown_method("str", other)),
    })
}

fn titlecase(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase()),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn list_method(items: &[Value], method: &str, args: &[Value]) -> CamelResult<Value> {
    if !whitelist::LIST_METHODS.contains(&method) {
        return Err(unknown_method("list", method));
    }
    let needle = args
        .first()
        .ok_or_else(|| arity_error(method, 1, 0))?;
    match method {
        "index" => items
            .iter()
            .position(|v| v.py_eq(needle))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| CamelError::runtime_trusted(format!("{} is not in list", needle.repr_text()))),
        "count" => Ok(Value::Int(items.iter().filter(|v| v.py_eq(needle)).count() as i64)),
        other => Err(unknown_method("list", other)),
    }
}

fn dict_method(dict: &Dict, method: &str, args: &[Value]) -> CamelResult<Value> {
    if !whitelist::DICT_METHODS.contains(&method) {
        return Err(unknown_method("dict", method));
    }
    match method {
        "get" => {
            let key = match args.first() {
                Some(Value::Str(k)) => k.clone(),
                _ => return Err(CamelError::runtime_trusted("dict.get() requires a string key")),
            };
            Ok(dict.get(&key).cloned().unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        "keys" => Ok(Value::List(dict.keys().map(|k| Value::Str(k.clone())).collect())),
        "values" => Ok(Value::List(dict.values().cloned().collect())),
        "items" => Ok(Value::List(
            dict.iter()
                .map(|(k, v)| Value::Tuple(vec![Value::Str(k.clone()), v.clone()]))
                .collect(),
        )),
        other => Err(unknown_method("dict", other)),
    }
}

fn unknown_method(type_name: &str, method: &str) -> CamelError {
    CamelError::runtime_trusted(format!("'{type_name}' object has no method '{method}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_for_same_repr() {
        let a = call_builtin("hash", &[Value::Str("abc".to_string())], &[]).unwrap();
        let b = call_builtin("hash", &[Value::Str("abc".to_string())], &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn len_on_list_and_str() {
        assert_eq!(
            call_builtin("len", &[Value::Str("abc".to_string())], &[]).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            call_builtin("len", &[Value::List(vec![Value::Int(1), Value::Int(2)])], &[]).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn sorted_orders_numeric_list() {
        let result = call_builtin(
            "sorted",
            &[Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(2)])],
            &[],
        )
        .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn string_split_and_join_roundtrip() {
        let split = string_method("a,b,c", "split", &[Value::Str(",".to_string())]).unwrap();
        assert_eq!(
            split,
            Value::List(vec![
                Value::Str("a".to_string()),
                Value::Str("b".to_string()),
                Value::Str("c".to_string())
            ])
        );
        let joined = string_method("-", "join", &[split]).unwrap();
        assert_eq!(joined, Value::Str("a-b-c".to_string()));
    }

    #[test]
    fn dict_get_falls_back_to_default() {
        let mut dict = Dict::new();
        dict.insert("a".to_string(), Value::Int(1));
        let result = dict_method(&dict, "get", &[Value::Str("missing".to_string()), Value::Int(42)]).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn range_with_negative_step_counts_down() {
        let result = build_range(&[Value::Int(5), Value::Int(0), Value::Int(-1)]).unwrap();
        assert_eq!(
            result,
            Value::List(vec![
                Value::Int(5),
                Value::Int(4),
                Value::Int(3),
                Value::Int(2),
                Value::Int(1)
            ])
        );
    }

    #[test]
    fn unknown_method_is_a_trusted_error() {
        let err = string_method("x", "nonexistent", &[]).unwrap_err();
        assert!(err.trusted());
    }
}
