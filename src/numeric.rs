//! JSON-safety boundary layer. `serde_json` cannot represent `NaN` or
//! `Infinity` (encoding them would produce invalid JSON), and several stages
//! compute statistics — z-scores over constant data, log of zero energy —
//! that can legitimately produce one. Rather than thread that edge case
//! through every call site, every result is sanitized once, here, right
//! before it crosses the wire.

use serde_json::Value;

/// Recursively replaces any non-finite `f64` (`NaN`, `+Infinity`,
/// `-Infinity`) reachable from `value` with `0.0`, leaving everything else
/// unchanged.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if !f.is_finite() => Value::from(0.0),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, sanitize(v))).collect()),
        other => other,
    }
}

/// Serializes `value` to `serde_json::Value` and sanitizes the result in one
/// step. The common call site: any `T: Serialize` result about to be
/// returned from the public API.
pub fn sanitize_serializable<T: serde::Serialize>(value: &T) -> serde_json::Result<Value> {
    serde_json::to_value(value).map(sanitize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_nan_and_infinity_in_nested_structures() {
        let input = json!({
            "a": f64::NAN,
            "b": [1.0, f64::INFINITY, f64::NEG_INFINITY],
            "c": { "d": 2.5 },
        });
        let sanitized = sanitize(input);
        assert_eq!(sanitized["a"], json!(0.0));
        assert_eq!(sanitized["b"], json!([1.0, 0.0, 0.0]));
        assert_eq!(sanitized["c"]["d"], json!(2.5));
    }

    #[test]
    fn leaves_finite_values_and_strings_untouched() {
        let input = json!({ "name": "ok", "score": 0.73, "count": 4 });
        let sanitized = sanitize(input.clone());
        assert_eq!(sanitized, input);
    }

    #[test]
    fn sanitize_serializable_round_trips_a_struct() {
        #[derive(serde::Serialize)]
        struct Stats {
            mean: f64,
            std: f64,
        }
        let value = sanitize_serializable(&Stats {
            mean: f64::NAN,
            std: 1.0,
        })
        .unwrap();
        assert_eq!(value["mean"], json!(0.0));
        assert_eq!(value["std"], json!(1.0));
    }
}
