//! 工具参数 JSON Schema 生成（schemars）

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 由参数结构体生成 parameters schema，供 Tool::parameters_schema 返回
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct LookupArgs {
        /// 商品名
        item: String,
    }

    #[test]
    fn test_schema_lists_properties() {
        let schema = parameters_schema_for::<LookupArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["item"].is_object());
        assert_eq!(schema["required"][0], "item");
    }
}
