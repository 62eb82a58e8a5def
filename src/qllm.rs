//! The quarantined extraction primitive, `query_ai_assistant` (spec.md
//! §4.3): the single chokepoint where model-generated content enters the
//! typed value model.

use crate::error::{CamelError, CamelResult};
use crate::ir::{FieldSpec, FieldType, Schema};
use crate::model::{ChatMessage, ModelClient, Usage};
use crate::tooling::AbortSignal;
use crate::value::{Dict, Value};
use regex::Regex;
use serde_json::Value as Json;
use std::sync::OnceLock;

pub const MAX_ATTEMPTS: u32 = 10;
const EXTRACTION_MAX_OUTPUT_TOKENS: u32 = 1_200;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

/// Runs the extraction call loop: builds the prompt once, retries on
/// insufficiency or coercion failure up to [`MAX_ATTEMPTS`] total attempts,
/// and returns the coerced dict plus the summed usage of every attempt.
pub async fn query_ai_assistant(
    model: &dyn ModelClient,
    instruction: &str,
    input: &Value,
    schema: &Schema,
    abort: &AbortSignal,
) -> CamelResult<(Dict, Usage)> {
    let system = build_system_prompt(schema);
    let user = build_user_message(instruction, input, schema);
    let messages = [ChatMessage::user(user)];

    let mut total_usage = Usage::default();
    let mut last_error: Option<CamelError> = None;

    for _attempt in 0..MAX_ATTEMPTS {
        abort.check()?;
        let response = model
            .call(&system, &messages, EXTRACTION_MAX_OUTPUT_TOKENS)
            .await
            .map_err(|e| CamelError::runtime_trusted(format!("extraction model call failed: {e}")))?;
        total_usage += response.usage;

        match parse_and_coerce(&response.text, schema) {
            Ok(Some(dict)) => return Ok((dict, total_usage)),
            Ok(None) => {
                last_error = Some(CamelError::InsufficientInformation);
            }
            Err(e) => {
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(CamelError::InsufficientInformation))
}

fn build_system_prompt(schema: &Schema) -> String {
    let schema_json = schema_to_json(schema);
    format!(
        "You extract structured data from untrusted text. Respond with strict JSON only, \
         no prose, no markdown fences. The JSON object MUST contain \"have_enough_information\" \
         (boolean) plus one key per field of this schema:\n{}",
        serde_json::to_string_pretty(&schema_json).unwrap_or_default()
    )
}

fn build_user_message(instruction: &str, input: &Value, schema: &Schema) -> String {
    let mut message = format!("Instruction: {instruction}\n\nInput:\n{}\n", input.display_text());
    if let Some(description) = &schema.description {
        message.push_str(&format!("\nSchema description: {description}\n"));
    }
    message
}

fn schema_to_json(schema: &Schema) -> Json {
    serde_json::to_value(schema).unwrap_or(Json::Null)
}

/// Returns `Ok(None)` for an explicit insufficiency signal, `Ok(Some(_))`
/// on a successful coercion, `Err` on any JSON/coercion failure (both of
/// which the caller retries).
fn parse_and_coerce(text: &str, schema: &Schema) -> CamelResult<Option<Dict>> {
    let json: Json = serde_json::from_str(text.trim())
        .map_err(|e| CamelError::SchemaCoercion { message: format!("response was not valid JSON: {e}") })?;
    let obj = json
        .as_object()
        .ok_or_else(|| CamelError::SchemaCoercion { message: "response was not a JSON object".to_string() })?;

    let have_enough = obj
        .get("have_enough_information")
        .and_then(Json::as_bool)
        .ok_or_else(|| CamelError::SchemaCoercion {
            message: "response is missing boolean 'have_enough_information'".to_string(),
        })?;
    if !have_enough {
        return Ok(None);
    }

    let mut out = Dict::new();
    for (name, spec) in &schema.fields {
        let raw = obj.get(name);
        match raw {
            None if spec.required => {
                return Err(CamelError::SchemaCoercion {
                    message: format!("missing required field '{name}'"),
                })
            }
            None => continue,
            Some(value) => {
                let coerced = coerce_field(value, spec, name)?;
                out.insert(name.clone(), coerced);
            }
        }
    }
    Ok(Some(out))
}

fn coerce_field(value: &Json, spec: &FieldSpec, path: &str) -> CamelResult<Value> {
    if value.is_null() {
        if spec.required {
            return Err(CamelError::SchemaCoercion {
                message: format!("field '{path}' is required but was null"),
            });
        }
        return Ok(Value::Null);
    }
    match spec.field_type {
        FieldType::String => Ok(Value::Str(Value::from_json(value).display_text())),
        FieldType::Email => {
            let s = Value::from_json(value).display_text();
            let trimmed = s.trim().to_string();
            if email_regex().is_match(&trimmed) {
                Ok(Value::Str(trimmed))
            } else {
                Err(CamelError::SchemaCoercion {
                    message: format!("field '{path}' is not a valid email address"),
                })
            }
        }
        FieldType::Datetime => {
            let s = Value::from_json(value).display_text();
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .map(|_| Value::Str(s.trim().to_string()))
                .or_else(|_| {
                    chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map(|_| Value::Str(s.trim().to_string()))
                })
                .map_err(|_| CamelError::SchemaCoercion {
                    message: format!("field '{path}' is not a parseable date"),
                })
        }
        FieldType::Number => match value {
            Json::Number(n) => Ok(Value::Float(n.as_f64().unwrap_or(0.0))),
            Json::String(s) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| CamelError::SchemaCoercion {
                    message: format!("field '{path}' is not numeric"),
                }),
            _ => Err(CamelError::SchemaCoercion {
                message: format!("field '{path}' is not numeric"),
            }),
        },
        FieldType::Integer => {
            let n = match value {
                Json::Number(n) => n.as_f64().unwrap_or(f64::NAN),
                Json::String(s) => s.parse::<f64>().unwrap_or(f64::NAN),
                _ => f64::NAN,
            };
            if n.is_nan() || n.fract() != 0.0 {
                return Err(CamelError::SchemaCoercion {
                    message: format!("field '{path}' is not an integer"),
                });
            }
            Ok(Value::Int(n as i64))
        }
        FieldType::Boolean => match value {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Json::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Json::String(s) => match s.to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(CamelError::SchemaCoercion {
                    message: format!("field '{path}' is not a valid boolean"),
                }),
            },
            _ => Err(CamelError::SchemaCoercion {
                message: format!("field '{path}' is not a valid boolean"),
            }),
        },
        FieldType::Array => {
            let items = value.as_array().ok_or_else(|| CamelError::SchemaCoercion {
                message: format!("field '{path}' is not an array"),
            })?;
            let default_items_spec = FieldSpec {
                field_type: FieldType::String,
                required: false,
                description: None,
                items: None,
                properties: None,
            };
            let item_spec = spec.items.as_deref().unwrap_or(&default_items_spec);
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(coerce_field(item, item_spec, &format!("{path}[{i}]"))?);
            }
            Ok(Value::List(out))
        }
        FieldType::Object => {
            let obj = value.as_object().ok_or_else(|| CamelError::SchemaCoercion {
                message: format!("field '{path}' is not an object"),
            })?;
            let properties = spec.properties.as_ref();
            let mut dict = Dict::new();
            if let Some(properties) = properties {
                for (child_name, child_spec) in properties {
                    match obj.get(child_name) {
                        Some(child_value) => {
                            let coerced =
                                coerce_field(child_value, child_spec, &format!("{path}.{child_name}"))?;
                            dict.insert(child_name.clone(), coerced);
                        }
                        None if child_spec.required => {
                            return Err(CamelError::SchemaCoercion {
                                message: format!("missing required field '{path}.{child_name}'"),
                            })
                        }
                        None => {}
                    }
                }
            } else {
                for (k, v) in obj {
                    dict.insert(k.clone(), Value::from_json(v));
                }
            }
            Ok(Value::Dict(dict))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModelClient;
    use std::collections::BTreeMap;

    fn string_field(required: bool) -> FieldSpec {
        FieldSpec {
            field_type: FieldType::String,
            required,
            description: None,
            items: None,
            properties: None,
        }
    }

    #[tokio::test]
    async fn successful_extraction_coerces_required_string_field() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), string_field(true));
        let schema = Schema { description: None, fields };
        let model = ScriptedModelClient::new([r#"{"have_enough_information": true, "name": "Alice"}"#]);
        let input = Value::Str("name is Alice".to_string());
        let (dict, _usage) = query_ai_assistant(&model, "extract name", &input, &schema, &AbortSignal::new())
            .await
            .unwrap();
        assert_eq!(dict.get("name"), Some(&Value::Str("Alice".to_string())));
    }

    #[tokio::test]
    async fn insufficient_information_is_retried_then_succeeds() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), string_field(true));
        let schema = Schema { description: None, fields };
        let model = ScriptedModelClient::new([
            r#"{"have_enough_information": false}"#,
            r#"{"have_enough_information": true, "name": "Bob"}"#,
        ]);
        let input = Value::Str("unclear text".to_string());
        let (dict, _usage) = query_ai_assistant(&model, "extract name", &input, &schema, &AbortSignal::new())
            .await
            .unwrap();
        assert_eq!(dict.get("name"), Some(&Value::Str("Bob".to_string())));
    }

    #[tokio::test]
    async fn exhausting_all_attempts_surfaces_trusted_error() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), string_field(true));
        let schema = Schema { description: None, fields };
        let responses: Vec<&str> = vec![r#"{"have_enough_information": false}"#; MAX_ATTEMPTS as usize];
        let model = ScriptedModelClient::new(responses);
        let input = Value::Str("x".to_string());
        let err = query_ai_assistant(&model, "extract name", &input, &schema, &AbortSignal::new())
            .await
            .unwrap_err();
        assert!(err.trusted());
    }

    #[tokio::test]
    async fn aborted_signal_is_observed_before_the_first_retry() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), string_field(true));
        let schema = Schema { description: None, fields };
        let model = ScriptedModelClient::new([r#"{"have_enough_information": false}"#; 10]);
        let input = Value::Str("x".to_string());
        let abort = AbortSignal::new();
        abort.abort();
        let err = query_ai_assistant(&model, "extract name", &input, &schema, &abort)
            .await
            .unwrap_err();
        assert!(matches!(err, CamelError::Cancelled));
    }

    #[test]
    fn email_field_rejects_malformed_address() {
        let spec = FieldSpec {
            field_type: FieldType::Email,
            required: true,
            description: None,
            items: None,
            properties: None,
        };
        let err = coerce_field(&Json::String("not-an-email".to_string()), &spec, "email").unwrap_err();
        assert!(matches!(err, CamelError::SchemaCoercion { .. }));
    }

    #[test]
    fn integer_field_rejects_fractional_number() {
        let spec = FieldSpec {
            field_type: FieldType::Integer,
            required: true,
            description: None,
            items: None,
            properties: None,
        };
        assert!(coerce_field(&serde_json::json!(3.5), &spec, "n").is_err());
        assert_eq!(
            coerce_field(&serde_json::json!(3.0), &spec, "n").unwrap(),
            Value::Int(3)
        );
    }
}
