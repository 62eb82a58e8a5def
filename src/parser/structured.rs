//! Structured JSON front-end: accepts a plan expressed as a step array
//! instead of code (spec.md §4.1 "Structured front-end"). Used as the
//! S1 fallback when the code front-end's input is not source at all but a
//! bare JSON array of step objects.

use crate::error::{CamelError, CamelResult};
use crate::ir::{
    BinOpKind, BoolOpKind, CompareOp, ComprehensionClause, Expr, FieldSpec, FieldType, Program,
    Schema, Step, UnaryOpKind,
};
use serde_json::Value as Json;

pub fn parse(source: &str) -> CamelResult<Program> {
    let root: Json = serde_json::from_str(source)
        .map_err(|e| CamelError::parse(format!("invalid JSON: {e}"), None))?;
    let steps_json = match &root {
        Json::Array(items) => items.clone(),
        Json::Object(obj) => match obj.get("steps") {
            Some(Json::Array(items)) => items.clone(),
            _ => return Err(CamelError::parse("expected a top-level 'steps' array", None)),
        },
        _ => return Err(CamelError::parse("expected a JSON array of steps", None)),
    };
    let steps = parse_steps(&steps_json, "steps")?;
    Ok(Program { steps })
}

fn path_err(path: &str, message: impl Into<String>) -> CamelError {
    CamelError::parse(format!("{path}: {}", message.into()), None)
}

fn parse_steps(items: &[Json], path: &str) -> CamelResult<Vec<Step>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_step(item, &format!("{path}[{i}]")))
        .collect()
}

fn obj<'a>(value: &'a Json, path: &str) -> CamelResult<&'a serde_json::Map<String, Json>> {
    value
        .as_object()
        .ok_or_else(|| path_err(path, "expected a JSON object"))
}

fn field<'a>(o: &'a serde_json::Map<String, Json>, path: &str, key: &str) -> CamelResult<&'a Json> {
    o.get(key)
        .ok_or_else(|| path_err(path, format!("missing required field '{key}'")))
}

fn str_field(o: &serde_json::Map<String, Json>, path: &str, key: &str) -> CamelResult<String> {
    field(o, path, key)?
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| path_err(&format!("{path}.{key}"), "expected a string"))
}

fn opt_str_field(o: &serde_json::Map<String, Json>, key: &str) -> Option<String> {
    o.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn array_field<'a>(
    o: &'a serde_json::Map<String, Json>,
    path: &str,
    key: &str,
) -> CamelResult<&'a Vec<Json>> {
    field(o, path, key)?
        .as_array()
        .ok_or_else(|| path_err(&format!("{path}.{key}"), "expected an array"))
}

fn parse_step(value: &Json, path: &str) -> CamelResult<Step> {
    let o = obj(value, path)?;
    let kind = str_field(o, path, "type")?;
    match kind.as_str() {
        "assign" => Ok(Step::Assign {
            target: str_field(o, path, "target")?,
            expr: parse_expr(field(o, path, "expr")?, &format!("{path}.expr"))?,
        }),
        "unpack" => {
            let targets = array_field(o, path, "targets")?
                .iter()
                .map(|t| {
                    t.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| path_err(&format!("{path}.targets"), "expected strings"))
                })
                .collect::<CamelResult<Vec<_>>>()?;
            Ok(Step::Unpack {
                targets,
                expr: parse_expr(field(o, path, "expr")?, &format!("{path}.expr"))?,
            })
        }
        "tool" => {
            let name = str_field(o, path, "tool")?;
            let args_path = format!("{path}.args");
            let args = match o.get("args") {
                Some(Json::Object(map)) => map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), parse_expr(v, &args_path)?)))
                    .collect::<CamelResult<Vec<_>>>()?,
                None => Vec::new(),
                _ => return Err(path_err(&args_path, "expected an object")),
            };
            Ok(Step::Tool {
                name,
                args,
                save_as: opt_str_field(o, "saveAs"),
                source_loc: None,
            })
        }
        "qllm" | "query_ai_assistant" => Ok(Step::Qllm {
            save_as: str_field(o, path, "saveAs")?,
            instruction: str_field(o, path, "instruction")?,
            input: parse_expr(field(o, path, "input")?, &format!("{path}.input"))?,
            schema: parse_schema(field(o, path, "schema")?, &format!("{path}.schema"))?,
        }),
        "if" => {
            let cond = parse_expr(field(o, path, "cond")?, &format!("{path}.cond"))?;
            // Both `then`/`else` (legacy) and `thenBranch`/`elseBranch`
            // (canonical) keys are accepted on input; diagnostics only ever
            // name `thenBranch`/`elseBranch`.
            let then_key = if o.contains_key("thenBranch") {
                "thenBranch"
            } else {
                "then"
            };
            let then_branch = parse_steps(
                array_field(o, path, then_key)?,
                &format!("{path}.thenBranch"),
            )?;
            let else_branch = if o.contains_key("elseBranch") {
                parse_steps(
                    array_field(o, path, "elseBranch")?,
                    &format!("{path}.elseBranch"),
                )?
            } else if o.contains_key("else") {
                parse_steps(array_field(o, path, "else")?, &format!("{path}.elseBranch"))?
            } else {
                Vec::new()
            };
            Ok(Step::If {
                cond,
                then_branch,
                else_branch,
            })
        }
        "for" => {
            let targets = array_field(o, path, "targets")?
                .iter()
                .map(|t| {
                    t.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| path_err(&format!("{path}.targets"), "expected strings"))
                })
                .collect::<CamelResult<Vec<_>>>()?;
            let iterable = parse_expr(field(o, path, "iterable")?, &format!("{path}.iterable"))?;
            let body = parse_steps(array_field(o, path, "body")?, &format!("{path}.body"))?;
            Ok(Step::For {
                targets,
                iterable,
                body,
            })
        }
        "raise" => Ok(Step::Raise {
            error: parse_expr(field(o, path, "error")?, &format!("{path}.error"))?,
        }),
        "final" => Ok(Step::Final {
            template: str_field(o, path, "template")?,
        }),
        other => Err(path_err(path, format!("unknown step type '{other}'"))),
    }
}

fn parse_expr(value: &Json, path: &str) -> CamelResult<Expr> {
    // Plain JSON scalars/arrays/objects that aren't tagged IR nodes are
    // treated as literals, matching how a planner emits concrete data.
    let o = match value.as_object() {
        Some(o) if o.contains_key("exprType") => o,
        _ => return Ok(Expr::Literal(crate::value::Value::from_json(value))),
    };
    let kind = str_field(o, path, "exprType")?;
    match kind.as_str() {
        "var" => Ok(Expr::Var(str_field(o, path, "name")?)),
        "attr" => Ok(Expr::Attr {
            base: Box::new(parse_expr(field(o, path, "base")?, path)?),
            path: array_field(o, path, "path")?
                .iter()
                .map(|p| {
                    p.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| path_err(path, "attr path must be strings"))
                })
                .collect::<CamelResult<Vec<_>>>()?,
        }),
        "index" => Ok(Expr::Index {
            base: Box::new(parse_expr(field(o, path, "base")?, path)?),
            index: Box::new(parse_expr(field(o, path, "index")?, path)?),
        }),
        "slice" => Ok(Expr::Slice {
            base: Box::new(parse_expr(field(o, path, "base")?, path)?),
            start: opt_expr(o, "start", path)?,
            stop: opt_expr(o, "stop", path)?,
            step: opt_expr(o, "step", path)?,
        }),
        "binop" => Ok(Expr::BinOp {
            op: parse_binop(&str_field(o, path, "op")?, path)?,
            left: Box::new(parse_expr(field(o, path, "left")?, path)?),
            right: Box::new(parse_expr(field(o, path, "right")?, path)?),
        }),
        "unaryop" => Ok(Expr::UnaryOp {
            op: parse_unaryop(&str_field(o, path, "op")?, path)?,
            operand: Box::new(parse_expr(field(o, path, "operand")?, path)?),
        }),
        "compare" => {
            let first = Box::new(parse_expr(field(o, path, "first")?, path)?);
            let rest = array_field(o, path, "rest")?
                .iter()
                .map(|pair_json| {
                    let pair = pair_json
                        .as_object()
                        .ok_or_else(|| path_err(path, "compare 'rest' entries must be objects"))?;
                    let op = parse_compareop(&str_field(pair, path, "op")?, path)?;
                    let rhs = parse_expr(field(pair, path, "expr")?, path)?;
                    Ok((op, rhs))
                })
                .collect::<CamelResult<Vec<_>>>()?;
            Ok(Expr::Compare { first, rest })
        }
        "boolop" => Ok(Expr::BoolOp {
            op: match str_field(o, path, "op")?.as_str() {
                "and" => BoolOpKind::And,
                "or" => BoolOpKind::Or,
                other => return Err(path_err(path, format!("unknown bool op '{other}'"))),
            },
            operands: array_field(o, path, "operands")?
                .iter()
                .map(|e| parse_expr(e, path))
                .collect::<CamelResult<Vec<_>>>()?,
        }),
        "in" => Ok(Expr::In {
            left: Box::new(parse_expr(field(o, path, "left")?, path)?),
            right: Box::new(parse_expr(field(o, path, "right")?, path)?),
            negate: o.get("negate").and_then(Json::as_bool).unwrap_or(false),
        }),
        "is" => Ok(Expr::Is {
            left: Box::new(parse_expr(field(o, path, "left")?, path)?),
            right: Box::new(parse_expr(field(o, path, "right")?, path)?),
            negate: o.get("negate").and_then(Json::as_bool).unwrap_or(false),
        }),
        "call" => {
            let args = match o.get("args") {
                Some(Json::Array(items)) => items
                    .iter()
                    .map(|e| parse_expr(e, path))
                    .collect::<CamelResult<Vec<_>>>()?,
                _ => Vec::new(),
            };
            let kwargs = match o.get("kwargs") {
                Some(Json::Object(map)) => map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), parse_expr(v, path)?)))
                    .collect::<CamelResult<Vec<_>>>()?,
                _ => Vec::new(),
            };
            Ok(Expr::Call {
                func: str_field(o, path, "func")?,
                args,
                kwargs,
            })
        }
        "methodCall" => Ok(Expr::MethodCall {
            receiver: Box::new(parse_expr(field(o, path, "receiver")?, path)?),
            method: str_field(o, path, "method")?,
            args: array_field(o, path, "args")?
                .iter()
                .map(|e| parse_expr(e, path))
                .collect::<CamelResult<Vec<_>>>()?,
        }),
        "list" => Ok(Expr::ListLit(parse_expr_array(o, path, "items")?)),
        "tuple" => Ok(Expr::TupleLit(parse_expr_array(o, path, "items")?)),
        "set" => Ok(Expr::SetLit(parse_expr_array(o, path, "items")?)),
        "dict" => {
            let entries = array_field(o, path, "entries")?
                .iter()
                .map(|pair_json| {
                    let pair = pair_json
                        .as_object()
                        .ok_or_else(|| path_err(path, "dict entries must be objects"))?;
                    let k = parse_expr(field(pair, path, "key")?, path)?;
                    let v = parse_expr(field(pair, path, "value")?, path)?;
                    Ok((k, v))
                })
                .collect::<CamelResult<Vec<_>>>()?;
            Ok(Expr::DictLit(entries))
        }
        "listComp" | "setComp" => {
            let elt = Box::new(parse_expr(field(o, path, "elt")?, path)?);
            let clauses = parse_clauses(o, path)?;
            if kind == "listComp" {
                Ok(Expr::ListComp { elt, clauses })
            } else {
                Ok(Expr::SetComp { elt, clauses })
            }
        }
        "dictComp" => Ok(Expr::DictComp {
            key: Box::new(parse_expr(field(o, path, "key")?, path)?),
            value: Box::new(parse_expr(field(o, path, "value")?, path)?),
            clauses: parse_clauses(o, path)?,
        }),
        other => Err(path_err(path, format!("unknown expression type '{other}'"))),
    }
}

fn parse_expr_array(
    o: &serde_json::Map<String, Json>,
    path: &str,
    key: &str,
) -> CamelResult<Vec<Expr>> {
    array_field(o, path, key)?
        .iter()
        .map(|e| parse_expr(e, path))
        .collect()
}

fn opt_expr(
    o: &serde_json::Map<String, Json>,
    key: &str,
    path: &str,
) -> CamelResult<Option<Box<Expr>>> {
    match o.get(key) {
        Some(Json::Null) | None => Ok(None),
        Some(v) => Ok(Some(Box::new(parse_expr(v, path)?))),
    }
}

fn parse_clauses(
    o: &serde_json::Map<String, Json>,
    path: &str,
) -> CamelResult<Vec<ComprehensionClause>> {
    array_field(o, path, "clauses")?
        .iter()
        .map(|c| {
            let co = c
                .as_object()
                .ok_or_else(|| path_err(path, "comprehension clause must be an object"))?;
            let targets = array_field(co, path, "targets")?
                .iter()
                .map(|t| {
                    t.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| path_err(path, "clause targets must be strings"))
                })
                .collect::<CamelResult<Vec<_>>>()?;
            let iterable = parse_expr(field(co, path, "iterable")?, path)?;
            let ifs = match co.get("ifs") {
                Some(Json::Array(items)) => items
                    .iter()
                    .map(|e| parse_expr(e, path))
                    .collect::<CamelResult<Vec<_>>>()?,
                _ => Vec::new(),
            };
            Ok(ComprehensionClause {
                targets,
                iterable,
                ifs,
            })
        })
        .collect()
}

fn parse_binop(op: &str, path: &str) -> CamelResult<BinOpKind> {
    Ok(match op {
        "+" | "add" => BinOpKind::Add,
        "-" | "sub" => BinOpKind::Sub,
        "*" | "mul" => BinOpKind::Mul,
        "/" | "div" => BinOpKind::Div,
        "%" | "mod" => BinOpKind::Mod,
        other => return Err(path_err(path, format!("unknown binary op '{other}'"))),
    })
}

fn parse_unaryop(op: &str, path: &str) -> CamelResult<UnaryOpKind> {
    Ok(match op {
        "-" | "neg" => UnaryOpKind::Neg,
        "+" | "pos" => UnaryOpKind::Pos,
        "not" => UnaryOpKind::Not,
        other => return Err(path_err(path, format!("unknown unary op '{other}'"))),
    })
}

fn parse_compareop(op: &str, path: &str) -> CamelResult<CompareOp> {
    Ok(match op {
        "==" | "eq" => CompareOp::Eq,
        "!=" | "ne" => CompareOp::NotEq,
        "<" | "lt" => CompareOp::Lt,
        "<=" | "le" => CompareOp::LtEq,
        ">" | "gt" => CompareOp::Gt,
        ">=" | "ge" => CompareOp::GtEq,
        other => return Err(path_err(path, format!("unknown comparison op '{other}'"))),
    })
}

fn parse_schema(value: &Json, path: &str) -> CamelResult<Schema> {
    let o = obj(value, path)?;
    let description = opt_str_field(o, "description");
    let mut fields = std::collections::BTreeMap::new();
    if let Some(Json::Object(field_map)) = o.get("fields") {
        for (name, spec) in field_map {
            fields.insert(
                name.clone(),
                parse_field_spec(spec, &format!("{path}.fields.{name}"))?,
            );
        }
    }
    Ok(Schema { description, fields })
}

fn parse_field_spec(value: &Json, path: &str) -> CamelResult<FieldSpec> {
    let o = obj(value, path)?;
    let field_type = match str_field(o, path, "type")?.as_str() {
        "string" => FieldType::String,
        "number" => FieldType::Number,
        "integer" => FieldType::Integer,
        "boolean" => FieldType::Boolean,
        "email" => FieldType::Email,
        "datetime" => FieldType::Datetime,
        "array" => FieldType::Array,
        "object" => FieldType::Object,
        other => return Err(path_err(path, format!("unknown field type '{other}'"))),
    };
    let required = o.get("required").and_then(Json::as_bool).unwrap_or(false);
    let description = opt_str_field(o, "description");
    let items = match o.get("items") {
        Some(v) if !v.is_null() => Some(Box::new(parse_field_spec(v, &format!("{path}.items"))?)),
        _ => None,
    };
    let properties = match o.get("properties") {
        Some(Json::Object(map)) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), parse_field_spec(v, &format!("{path}.properties.{k}"))?);
            }
            Some(out)
        }
        _ => None,
    };
    Ok(FieldSpec {
        field_type,
        required,
        description,
        items,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_assign_and_final() {
        let json = r#"[
            {"type": "assign", "target": "x", "expr": 1},
            {"type": "final", "template": "done: {x}"}
        ]"#;
        let program = parse(json).unwrap();
        assert_eq!(program.steps.len(), 2);
        assert!(matches!(program.steps[0], Step::Assign { .. }));
    }

    #[test]
    fn accepts_legacy_then_key_for_if_steps() {
        let json = r#"[
            {"type": "if", "cond": true, "then": [{"type": "final", "template": "ok"}]}
        ]"#;
        let program = parse(json).unwrap();
        match &program.steps[0] {
            Step::If { then_branch, .. } => assert_eq!(then_branch.len(), 1),
            other => panic!("expected If step, got {other:?}"),
        }
    }

    #[test]
    fn unknown_step_type_produces_path_diagnostic() {
        let json = r#"[{"type": "bogus"}]"#;
        let err = parse(json).unwrap_err();
        assert!(err.to_string().contains("unknown step type") || matches!(err, CamelError::Parse { .. }));
    }

    #[test]
    fn tool_step_parses_kwargs_from_object() {
        let json = r#"[
            {"type": "tool", "tool": "send_message", "args": {"to": "x", "body": "hi"}}
        ]"#;
        let program = parse(json).unwrap();
        match &program.steps[0] {
            Step::Tool { name, args, .. } => {
                assert_eq!(name, "send_message");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected Tool step, got {other:?}"),
        }
    }
}
