//! Decoder for the legacy serialized-array storage form (`a:2:{...}`),
//! kept for rows written before the JSON encoding became the default.
//! Decode-only: re-encoding always goes through JSON.

use serde_json::{Map, Number, Value};

use crate::errors::OrmError;

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn fail(&self, what: &str) -> OrmError {
        OrmError::InvalidRequest {
            message: format!("malformed legacy value at byte {}: expected {what}", self.pos),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), OrmError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.fail(&format!("`{}`", byte as char)))
        }
    }

    fn read_until(&mut self, stop: u8) -> Result<&'a str, OrmError> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte == stop {
                let slice = &self.bytes[start..self.pos];
                self.pos += 1;
                return std::str::from_utf8(slice).map_err(|_| self.fail("utf-8 segment"));
            }
            self.pos += 1;
        }
        Err(self.fail(&format!("terminator `{}`", stop as char)))
    }

    fn read_len(&mut self) -> Result<usize, OrmError> {
        let digits = self.read_until(b':')?;
        digits.parse().map_err(|_| self.fail("length"))
    }

    fn value(&mut self) -> Result<Value, OrmError> {
        match self.peek() {
            Some(b'N') => {
                self.pos += 1;
                self.expect(b';')?;
                Ok(Value::Null)
            }
            Some(b'b') => {
                self.pos += 1;
                self.expect(b':')?;
                let flag = self.read_until(b';')?;
                Ok(Value::Bool(flag == "1"))
            }
            Some(b'i') => {
                self.pos += 1;
                self.expect(b':')?;
                let digits = self.read_until(b';')?;
                let parsed: i64 = digits.parse().map_err(|_| self.fail("integer"))?;
                Ok(Value::Number(parsed.into()))
            }
            Some(b'd') => {
                self.pos += 1;
                self.expect(b':')?;
                let digits = self.read_until(b';')?;
                let parsed: f64 = digits.parse().map_err(|_| self.fail("float"))?;
                Ok(Number::from_f64(parsed)
                    .map(Value::Number)
                    .unwrap_or(Value::Null))
            }
            Some(b's') => {
                self.pos += 1;
                self.expect(b':')?;
                let len = self.read_len()?;
                self.expect(b'"')?;
                // The declared length comes straight from the stored text;
                // an absurd value must fail like any other malformed input.
                let end = self
                    .pos
                    .checked_add(len)
                    .filter(|end| *end <= self.bytes.len())
                    .ok_or_else(|| self.fail("string body"))?;
                let body = std::str::from_utf8(&self.bytes[self.pos..end])
                    .map_err(|_| self.fail("utf-8 string"))?;
                self.pos = end;
                self.expect(b'"')?;
                self.expect(b';')?;
                Ok(Value::String(body.to_string()))
            }
            Some(b'a') => {
                self.pos += 1;
                self.expect(b':')?;
                let len = self.read_len()?;
                self.expect(b'{')?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let key = self.value()?;
                    let value = self.value()?;
                    entries.push((key, value));
                }
                self.expect(b'}')?;
                Ok(assemble(entries))
            }
            _ => Err(self.fail("type tag")),
        }
    }
}

/// Sequential zero-based integer keys come back as a JSON array; anything
/// else becomes an object with stringified keys.
fn assemble(entries: Vec<(Value, Value)>) -> Value {
    let sequential = entries
        .iter()
        .enumerate()
        .all(|(index, (key, _))| key.as_i64() == Some(index as i64));
    if sequential {
        Value::Array(entries.into_iter().map(|(_, value)| value).collect())
    } else {
        let mut map = Map::new();
        for (key, value) in entries {
            let key = match key {
                Value::String(text) => text,
                other => other.to_string(),
            };
            map.insert(key, value);
        }
        Value::Object(map)
    }
}

/// Decodes a legacy-serialized value. The input must consume fully; trailing
/// bytes are rejected so truncated rows fail loudly instead of half-parsing.
pub fn decode(input: &str) -> Result<Value, OrmError> {
    let mut cursor = Cursor::new(input);
    let value = cursor.value()?;
    if cursor.pos != cursor.bytes.len() {
        return Err(cursor.fail("end of input"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_sequential_array() {
        let decoded = decode("a:2:{i:0;s:3:\"abc\";i:1;i:42;}").unwrap();
        assert_eq!(decoded, json!(["abc", 42]));
    }

    #[test]
    fn decodes_string_keyed_map() {
        let decoded = decode("a:2:{s:4:\"name\";s:3:\"Ann\";s:3:\"age\";i:30;}").unwrap();
        assert_eq!(decoded, json!({"name": "Ann", "age": 30}));
    }

    #[test]
    fn decodes_nested_arrays() {
        let decoded = decode("a:1:{i:0;a:2:{i:0;b:1;i:1;N;}}").unwrap();
        assert_eq!(decoded, json!([[true, null]]));
    }

    #[test]
    fn decodes_floats() {
        let decoded = decode("a:1:{i:0;d:1.5;}").unwrap();
        assert_eq!(decoded, json!([1.5]));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(decode("i:1;extra").is_err());
    }

    #[test]
    fn rejects_truncated_string() {
        assert!(decode("s:10:\"abc\";").is_err());
    }

    #[test]
    fn rejects_overflowing_string_length() {
        assert!(decode("a:1:{i:0;s:18446744073709551615:\"x\";}").is_err());
    }
}
