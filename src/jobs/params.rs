use serde_json::Value;

use crate::app::error::GatewayError;

/// Tool arguments in flag style: each body pair becomes `--key value`,
/// in the order the keys appeared in the request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagParams {
    pairs: Vec<(String, String)>,
}

impl FlagParams {
    pub fn from_json(body: Value) -> Result<Self, GatewayError> {
        let map = match body {
            Value::Object(map) => map,
            Value::Array(_) => {
                return Err(GatewayError::ClientInput(
                    "positional parameter lists are not supported; send an object of flag/value pairs"
                        .into(),
                ))
            }
            _ => {
                return Err(GatewayError::ClientInput(
                    "parameters must be a JSON object of flag/value pairs".into(),
                ))
            }
        };

        let mut pairs = Vec::with_capacity(map.len());
        for (key, value) in map {
            validate_key(&key)?;
            let rendered = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                Value::Null => {
                    return Err(GatewayError::ClientInput(format!(
                        "parameter {key:?} has no value"
                    )))
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(GatewayError::ClientInput(format!(
                        "parameter {key:?} must be a string, number or boolean"
                    )))
                }
            };
            pairs.push((key, rendered));
        }
        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_args(&self) -> Vec<String> {
        self.pairs
            .iter()
            .flat_map(|(key, value)| [format!("--{key}"), value.clone()])
            .collect()
    }
}

fn validate_key(key: &str) -> Result<(), GatewayError> {
    let valid = !key.is_empty()
        && !key.starts_with('-')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(GatewayError::ClientInput(format!(
            "invalid parameter name {key:?}"
        )))
    }
}
