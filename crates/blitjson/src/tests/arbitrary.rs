use quickcheck::{Arbitrary, Gen};

use crate::{Array, Map, UsageMode, Value};

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct JsonNumber(f64);

impl Arbitrary for JsonNumber {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut value = f64::arbitrary(g);
        while !value.is_finite() {
            value = f64::arbitrary(g);
        }

        Self(value)
    }
}

impl Arbitrary for Value {
    fn arbitrary(g: &mut Gen) -> Self {
        fn gen_scalar(g: &mut Gen) -> Value {
            match usize::arbitrary(g) % 5 {
                0 => Value::Null,
                1 => Value::Boolean(bool::arbitrary(g)),
                2 => Value::Integer(i64::arbitrary(g)),
                3 => Value::Float(JsonNumber::arbitrary(g).0),
                _ => Value::String(String::arbitrary(g)),
            }
        }

        fn gen_val(g: &mut Gen, depth: usize) -> Value {
            if depth == 0 {
                return gen_scalar(g);
            }
            match usize::arbitrary(g) % 7 {
                0..=4 => gen_scalar(g),
                5 => {
                    let len = usize::arbitrary(g) % 4;
                    let mut vec = Array::new();
                    for _ in 0..len {
                        vec.push(gen_val(g, depth - 1));
                    }
                    Value::Array(vec)
                }
                _ => {
                    let len = usize::arbitrary(g) % 4;
                    let mut map = Map::new();
                    for _ in 0..len {
                        let key = String::arbitrary(g);
                        let val = gen_val(g, depth - 1);
                        map.insert(key, val);
                    }
                    Value::Object(map)
                }
            }
        }

        let depth = usize::arbitrary(g) % 3;
        gen_val(g, depth)
    }
}

impl Arbitrary for UsageMode {
    fn arbitrary(g: &mut Gen) -> Self {
        UsageMode::from_bits_truncate(u8::arbitrary(g))
    }
}
