//! 工具参数 JSON Schema 生成（schemars）
//!
//! 参数类型的 schema 在注册时生成一次；`#/definitions/*` 引用被内联，导出给 LLM 的 properties 不含 title。

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

const DEFINITIONS_PREFIX: &str = "#/definitions/";
const MAX_INLINE_DEPTH: usize = 16;

/// 生成参数类型的 schema，并内联所有 definitions 引用
pub fn params_schema<P: JsonSchema>() -> Value {
    let schema = serde_json::to_value(schema_for!(P)).unwrap_or_else(|_| Value::Object(Map::new()));
    inline_refs(schema)
}

/// 将 `{"$ref": "#/definitions/X"}` 替换为 definitions 中的定义，并移除 definitions
///
/// 递归类型在超过深度上限后保留原引用。
pub fn inline_refs(mut schema: Value) -> Value {
    let definitions = schema
        .as_object_mut()
        .and_then(|o| o.remove("definitions"))
        .and_then(|d| match d {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();
    if definitions.is_empty() {
        return schema;
    }
    resolve(schema, &definitions, 0)
}

fn resolve(value: Value, definitions: &Map<String, Value>, depth: usize) -> Value {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix(DEFINITIONS_PREFIX))
                .and_then(|name| definitions.get(name));
            if let Some(def) = target {
                if depth < MAX_INLINE_DEPTH {
                    return resolve(def.clone(), definitions, depth + 1);
                }
                return Value::Object(map);
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, resolve(v, definitions, depth)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve(v, definitions, depth))
                .collect(),
        ),
        other => other,
    }
}

/// schema 的 properties，每个属性去掉 title
pub fn parameter_properties(schema: &Value) -> Map<String, Value> {
    let mut properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for details in properties.values_mut() {
        if let Some(obj) = details.as_object_mut() {
            obj.remove("title");
        }
    }
    properties
}

/// 根 schema 的 description（来自参数类型的文档注释）
pub fn schema_description(schema: &Value) -> Option<String> {
    schema
        .get("description")
        .and_then(Value::as_str)
        .map(String::from)
}
