//! Pull structured JSON out of free-form backend replies.
//!
//! Replies often wrap the JSON document in prose or code fences, and
//! sometimes contain several documents (a draft and a correction). Every
//! top-level object is located; callers usually want the last one that
//! matches their shape.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Every top-level JSON object embedded in `text`, in order of appearance.
///
/// Objects nested inside another object are not returned separately.
#[must_use]
pub fn json_objects(text: &str) -> Vec<Value> {
    let mut found = Vec::new();
    let mut offset = 0;

    while let Some(start) = text[offset..].find('{').map(|pos| offset + pos) {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => {
                offset = start + stream.byte_offset();
                found.push(value);
            }
            _ => offset = start + 1,
        }
    }
    found
}

/// Decode the last embedded object that deserializes into `T`.
#[must_use]
pub fn parse_last<T: DeserializeOwned>(text: &str) -> Option<T> {
    json_objects(text)
        .into_iter()
        .rev()
        .find_map(|value| serde_json::from_value(value).ok())
}
