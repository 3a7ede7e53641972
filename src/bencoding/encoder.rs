use std::io::{Result, Write};

use crate::bencoding::value::Value;

impl Value {
    pub fn encode(&self, dest: &mut impl Write) -> Result<()> {
        match self {
            Self::String(string) => encode_string(string, dest),
            Self::Integer(integer) => write!(dest, "i{}e", integer),
            Self::List(values) => {
                write!(dest, "l")?;
                for value in values {
                    value.encode(dest)?;
                }
                write!(dest, "e")
            }
            Self::Dictionary(entries) => {
                // BTreeMap iterates keys in raw byte order
                write!(dest, "d")?;
                for (key, value) in entries {
                    encode_string(key, dest)?;
                    value.encode(dest)?;
                }
                write!(dest, "e")
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)
            .expect("writing to a vec never fails");
        buffer
    }
}

fn encode_string(string: &[u8], dest: &mut impl Write) -> Result<()> {
    write!(dest, "{}:", string.len())?;
    dest.write_all(string)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn integer() {
        assert_eq!(Value::Integer(42).to_bytes(), b"i42e");
        assert_eq!(Value::Integer(-42).to_bytes(), b"i-42e");
        assert_eq!(Value::Integer(0).to_bytes(), b"i0e");
    }

    #[test]
    fn string() {
        assert_eq!(Value::string("foo").to_bytes(), b"3:foo");
        assert_eq!(Value::string("").to_bytes(), b"0:");
    }

    #[test]
    fn list() {
        let value = Value::list()
            .with_value(Value::string("foo"))
            .with_value(Value::string("bar"));

        assert_eq!(value.to_bytes(), b"l3:foo3:bare");
    }

    #[test]
    fn dictionary() {
        let value = Value::dictionary()
            .with_entry("foo", Value::Integer(1))
            .with_entry("bar", Value::Integer(2));

        // Dictionary keys are sorted
        assert_eq!(value.to_bytes(), b"d3:bari2e3:fooi1ee");
    }

    #[test]
    fn dictionary_keys_sorted_by_raw_bytes() {
        let mut entries = BTreeMap::new();
        entries.insert(vec![0xff], Value::Integer(1));
        entries.insert(b"Z".to_vec(), Value::Integer(2));
        entries.insert(b"a".to_vec(), Value::Integer(3));
        entries.insert(b"ab".to_vec(), Value::Integer(4));

        assert_eq!(
            Value::Dictionary(entries).to_bytes(),
            b"d1:Zi2e1:ai3e2:abi4e1:\xffi1ee"
        );
    }

    #[test]
    fn canonical_input_round_trips_byte_for_byte() {
        let input: &[u8] = b"d8:announce9:http://x/4:infod6:lengthi5e4:name1:a12:piece lengthi5e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
        let value = Value::decode(input).expect("valid bencode");

        assert_eq!(value.to_bytes(), input);
    }

    #[test]
    fn decode_then_encode_normalizes_key_order() {
        let value = Value::decode(b"d1:bi1e1:ai2ee").expect("valid bencode");

        assert_eq!(value.to_bytes(), b"d1:ai2e1:bi1ee");
    }

    #[test]
    fn round_trip() {
        let value = Value::dictionary()
            .with_entry("int", Value::Integer(-7))
            .with_entry("bytes", Value::String(vec![0, 1, 2, 255]))
            .with_entry(
                "list",
                Value::list()
                    .with_value(Value::list())
                    .with_value(Value::dictionary().with_entry("", Value::string(""))),
            );

        assert_eq!(Value::decode(&value.to_bytes()), Ok(value));
    }
}
