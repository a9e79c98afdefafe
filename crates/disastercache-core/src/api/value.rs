//! Conversion between plain JSON and Firestore's typed value encoding.

use serde_json::{json, Map, Value};

/// Encode a JSON value as a Firestore `Value`.
pub(crate) fn encode(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore carries int64 as a decimal string
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode(v)))
        .collect()
}

/// Decode a Firestore `Value` into plain JSON. Unknown encodings become null.
pub(crate) fn decode(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.as_bool().map(Value::Bool).unwrap_or(Value::Null),
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            Value::Number(n) => Value::Number(n.clone()),
            _ => Value::Null,
        },
        "doubleValue" => match inner {
            Value::Number(n) => Value::Number(n.clone()),
            // NaN and infinities arrive as strings and have no JSON form
            _ => Value::Null,
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        }),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => decode_fields(inner.get("fields")),
        _ => Value::Null,
    }
}

/// Decode a Firestore `fields` object (as found on documents and map values).
pub(crate) fn decode_fields(fields: Option<&Value>) -> Value {
    let decoded = fields
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| (k.clone(), decode(v)))
                .collect::<Map<String, Value>>()
        })
        .unwrap_or_default();
    Value::Object(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_document_fields() {
        let fields = json!({
            "locationName": { "stringValue": "Malibu" },
            "lat": { "doubleValue": 34.03 },
            "latestSkeetsAmount": { "integerValue": "12" },
            "missing": { "nullValue": null },
            "latestDisasterCount": { "mapValue": { "fields": {
                "fireCount": { "integerValue": "9" }
            }}},
            "classification": { "arrayValue": { "values": [
                { "doubleValue": 0.5 }, { "integerValue": "0" }
            ]}},
            "emptyList": { "arrayValue": {} },
            "lastSkeetTimestamp": { "timestampValue": "2025-01-09T12:00:00Z" }
        });

        let decoded = decode_fields(Some(&fields));
        assert_eq!(decoded["locationName"], json!("Malibu"));
        assert_eq!(decoded["lat"], json!(34.03));
        assert_eq!(decoded["latestSkeetsAmount"], json!(12));
        assert_eq!(decoded["missing"], Value::Null);
        assert_eq!(decoded["latestDisasterCount"]["fireCount"], json!(9));
        assert_eq!(decoded["classification"], json!([0.5, 0]));
        assert_eq!(decoded["emptyList"], json!([]));
        assert_eq!(decoded["lastSkeetTimestamp"], json!("2025-01-09T12:00:00Z"));
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&json!("")), json!({ "stringValue": "" }));
        assert_eq!(encode(&json!(5)), json!({ "integerValue": "5" }));
        assert_eq!(encode(&json!(-66.0)), json!({ "doubleValue": -66.0 }));
        assert_eq!(encode(&json!(true)), json!({ "booleanValue": true }));
    }

    #[test]
    fn test_encode_decode_nested() {
        let original = json!({ "a": [1, "two", { "b": false }] });
        assert_eq!(decode(&encode(&original)), original);
    }
}
