//! Line codec for text input and output.
//!
//! Records are written as `key<TAB>value`. Reading a line without a tab
//! yields the whole line as key and an empty text value.

use crate::{Key, KeyValue, Value};

pub const SEPARATOR: char = '\t';

pub fn encode_line(kv: &KeyValue) -> String {
    format!("{}{SEPARATOR}{}", kv.key, kv.value)
}

pub fn decode_line(line: &str) -> KeyValue {
    let line = line.strip_suffix('\r').unwrap_or(line);
    match line.split_once(SEPARATOR) {
        Some((key, value)) => KeyValue::new(Key::from(key), Value::from(value)),
        None => KeyValue::new(Key::from(line), Value::from("")),
    }
}
