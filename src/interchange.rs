//! Canonical JSON serialization.
//!
//! Every signature in this protocol is calculated over the canonical JSON
//! rendering of a document's `signed` subtree: object keys sorted
//! lexicographically, integers in their shortest decimal form, strings with
//! only `"` and `\` escaped, and no insignificant whitespace. Verification
//! canonicalizes the subtree exactly as it appeared on the wire, so a
//! re-serialized parsed struct is never what gets hashed.

use serde_json::Value;

use crate::error::Error;
use crate::Result;

/// Render a parsed JSON value in canonical form.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Number(number) => {
            // Canonical JSON is defined over integers only.
            if let Some(n) = number.as_u64() {
                itoa::write(&mut *buf, n)?;
            } else if let Some(n) = number.as_i64() {
                itoa::write(&mut *buf, n)?;
            } else {
                return Err(Error::Encoding(format!(
                    "Non-integer number cannot be canonicalized: {}",
                    number
                )));
            }
        }
        Value::String(string) => write_string(buf, string),
        Value::Array(array) => {
            buf.push(b'[');
            let mut first = true;
            for element in array {
                if !first {
                    buf.push(b',');
                }
                first = false;
                write_value(buf, element)?;
            }
            buf.push(b']');
        }
        Value::Object(object) => {
            let mut keys = object.keys().collect::<Vec<_>>();
            keys.sort();

            buf.push(b'{');
            let mut first = true;
            for key in keys {
                if !first {
                    buf.push(b',');
                }
                first = false;
                write_string(buf, key);
                buf.push(b':');
                // The key came out of the object's key set.
                if let Some(element) = object.get(key) {
                    write_value(buf, element)?;
                }
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, string: &str) {
    buf.push(b'"');
    for c in string.chars() {
        match c {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            c => {
                let mut encoded = [0; 4];
                buf.extend_from_slice(c.encode_utf8(&mut encoded).as_bytes());
            }
        }
    }
    buf.push(b'"');
}
