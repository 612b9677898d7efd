pub mod element;
pub mod overlay;
pub mod runtime;
pub mod wait;

use serde_json::Value;

/// Wraps a JS function constant into an immediately invoked expression.
pub fn build_js_call(func: &str, args: &[Value]) -> String {
    let args_str = args.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({})({})", func.trim(), args_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_js_call_serializes_arguments() {
        let call = build_js_call("(id, sel) => id", &[json!(7), json!("a[href=\"x\"]"), Value::Null]);
        assert_eq!(call, r#"((id, sel) => id)(7, "a[href=\"x\"]", null)"#);
    }

    #[test]
    fn test_build_js_call_trims_multiline_constants() {
        assert_eq!(build_js_call("\n() => true\n", &[]), "(() => true)()");
    }

    #[test]
    fn test_element_call_shape() {
        let call = build_js_call(element::TEXT, &[json!(1)]);
        assert!(call.starts_with("((id) =>"));
        assert!(call.ends_with(")(1)"));
    }
}
