// Canonical JSON used as hash input. serde_json's default `Map` is a BTreeMap, so converting
// through `Value` yields recursively key-sorted objects regardless of struct field order.
use crate::error::Result;
use serde::Serialize;

/// Serialize `data` as compact JSON with object keys sorted at every depth
pub fn canonical_json<T: Serialize>(data: &T) -> Result<String> {
    let value = serde_json::to_value(data)?;
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Unordered {
        zeta: u32,
        alpha: &'static str,
        nested: Inner,
    }

    #[derive(Serialize)]
    struct Inner {
        y: bool,
        b: Vec<u8>,
    }

    #[test]
    fn test_keys_are_sorted_recursively() {
        let data = Unordered {
            zeta: 1,
            alpha: "a",
            nested: Inner {
                y: true,
                b: vec![1, 2],
            },
        };

        let json = canonical_json(&data).unwrap();
        assert_eq!(json, r#"{"alpha":"a","nested":{"b":[1,2],"y":true},"zeta":1}"#);
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let data = Inner {
            y: false,
            b: vec![],
        };
        assert_eq!(canonical_json(&data).unwrap(), canonical_json(&data).unwrap());
    }
}
