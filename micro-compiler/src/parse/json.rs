//! Serde view of the JSON model description.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ir::ArgValue;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDescription {
    pub name: String,
    /// Raw weights file, relative to the description.
    #[serde(default)]
    pub weights: Option<String>,
    pub tensors: Vec<TensorDesc>,
    pub ops: Vec<OpDesc>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TensorDesc {
    pub name: String,
    pub shape: Vec<usize>,
    #[serde(default)]
    pub dtype: Option<String>,
    #[serde(default)]
    pub role: Role,
    /// Byte offset into the weights payload (constants only).
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub len: Option<usize>,
    #[serde(default)]
    pub quant: Option<QuantDesc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Input,
    Output,
    Constant,
    #[default]
    Intermediate,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuantDesc {
    pub scale: f32,
    #[serde(default)]
    pub zero_point: i32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

/// Convert a JSON argument map, keeping name order.
pub fn convert_args(owner: &str, args: &BTreeMap<String, Value>) -> Result<BTreeMap<String, ArgValue>> {
    args.iter()
        .map(|(name, value)| {
            convert_arg(value)
                .map(|v| (name.clone(), v))
                .ok_or_else(|| {
                    Error::malformed(
                        format!("{owner} argument '{name}'"),
                        format!("unsupported value {value}"),
                    )
                })
        })
        .collect()
}

fn convert_arg(value: &Value) -> Option<ArgValue> {
    match value {
        Value::Bool(b) => Some(ArgValue::Int(i64::from(*b))),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => ArgValue::Int(i),
            None => ArgValue::Float(n.as_f64()? as f32),
        }),
        Value::String(s) => Some(ArgValue::Str(s.clone())),
        Value::Array(items) => convert_list(items),
        Value::Null | Value::Object(_) => None,
    }
}

fn convert_list(items: &[Value]) -> Option<ArgValue> {
    if items.iter().all(|v| v.as_i64().is_some()) {
        return items.iter().map(Value::as_i64).collect::<Option<Vec<_>>>().map(ArgValue::Ints);
    }
    if items.iter().all(Value::is_number) {
        return items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<_>>>()
            .map(ArgValue::Floats);
    }
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .map(ArgValue::Strs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn json_values_map_to_arg_values() {
        let converted = convert_args(
            "op",
            &args(json!({
                "padding": 1,
                "alpha": 0.5,
                "mode": "same",
                "fused": true,
                "strides": [1, 2],
                "scales": [0.5, 1],
                "names": ["a", "b"],
                "empty": []
            })),
        )
        .unwrap();

        assert_eq!(converted["padding"], ArgValue::Int(1));
        assert_eq!(converted["alpha"], ArgValue::Float(0.5));
        assert_eq!(converted["mode"], ArgValue::Str("same".into()));
        assert_eq!(converted["fused"], ArgValue::Int(1));
        assert_eq!(converted["strides"], ArgValue::Ints(vec![1, 2]));
        assert_eq!(converted["scales"], ArgValue::Floats(vec![0.5, 1.0]));
        assert_eq!(converted["names"], ArgValue::Strs(vec!["a".into(), "b".into()]));
        assert_eq!(converted["empty"], ArgValue::Ints(vec![]));
        // BTreeMap keeps arguments sorted by name
        let keys: Vec<_> = converted.keys().map(String::as_str).collect();
        assert_eq!(keys, ["alpha", "empty", "fused", "mode", "names", "padding", "scales", "strides"]);
    }

    #[test]
    fn nested_values_are_rejected() {
        for bad in [json!({"x": {"y": 1}}), json!({"x": null}), json!({"x": [1, "a"]})] {
            match convert_args("op 'conv'", &args(bad)) {
                Err(Error::MalformedGraph { entity, .. }) => {
                    assert_eq!(entity, "op 'conv' argument 'x'")
                }
                other => panic!("expected MalformedGraph, got {other:?}"),
            }
        }
    }

    #[test]
    fn role_defaults_to_intermediate() {
        let t: TensorDesc = serde_json::from_value(json!({"name": "t", "shape": [2]})).unwrap();
        assert_eq!(t.role, Role::Intermediate);
        assert!(serde_json::from_value::<TensorDesc>(json!({"name": "t", "shape": [2], "bogus": 1})).is_err());
    }
}
