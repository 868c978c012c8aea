use serde_json as json;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;

use crate::datatype::Error;

/// Converts a `serde_json::Value` into its canonical form: object keys
/// sorted lexicographically, no insignificant whitespace, and numbers
/// rendered without a trailing `.0`. Signatures are always computed over
/// this form so the signer and verifier agree byte-for-byte.
pub struct CanonicalJson;

impl CanonicalJson {
    pub fn convert(value: &json::Value) -> Result<String, Error> {
        let mut out = String::new();
        write_value(value, &mut out)?;
        Ok(out)
    }
}

fn write_value(value: &json::Value, out: &mut String) -> Result<(), Error> {
    match value {
        json::Value::Null => out.push_str("null"),
        json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        json::Value::Number(n) => write_number(n, out)?,
        json::Value::String(s) => write_string(s, out),
        json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        json::Value::Object(map) => {
            let sorted: BTreeMap<&String, &json::Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(val, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(n: &json::Number, out: &mut String) -> Result<(), Error> {
    if let Some(i) = n.as_i64() {
        write!(out, "{}", i).map_err(|e| Error::Canonical(e.to_string()))?;
    } else if let Some(u) = n.as_u64() {
        write!(out, "{}", u).map_err(|e| Error::Canonical(e.to_string()))?;
    } else {
        return Err(Error::Canonical(format!("non-integer number not allowed: {}", n)));
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    // Round-trip through serde_json's string encoder: it already produces
    // the minimal, correctly escaped quoted form.
    let encoded = json::to_string(s).expect("string always serializes");
    out.push_str(&encoded);
}
