use super::BencodeValue;

/// Encode a value in canonical form (dictionary keys sorted).
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &BencodeValue, out: &mut Vec<u8>) {
    match value {
        BencodeValue::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        BencodeValue::Bytes(b) => put_string(b, out),
        BencodeValue::List(list) => {
            out.push(b'l');
            for item in list {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        BencodeValue::Dict(dict) => {
            out.push(b'd');
            // BTreeMap iteration yields the keys already sorted.
            for (key, value) in dict {
                put_string(key, out);
                encode_into(value, out);
            }
            out.push(b'e');
        }
    }
}

fn put_string(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}
