use crate::register_map::{CustomType, TypeKind};
use crate::schema::{ResolvedSchema, scale_by_decimals};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datatype `{datatype}` spanning {points} registers is not supported")]
    UnsupportedDatatype { datatype: String, points: u16 },
    #[error("expected at least {expected} registers, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("value {value} is not listed in custom type `{custom_type}`")]
    UnknownListValue { value: u16, custom_type: String },
    #[error("bit {bit} of custom type `{custom_type}` does not fit in a register")]
    BitOutOfRange { bit: u16, custom_type: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Signed(i32),
    Unsigned(u32),
    /// This data type contains a value multiplied by 10^`decimals`.
    Scaled { raw: i64, decimals: i32 },
    Text(String),
    /// Least significant bit of the first register first.
    Bits(Vec<bool>),
    /// Date and time registers, one hexadecimal string per register.
    Hex(Vec<String>),
    /// `label: bit` pairs of a bit map custom type.
    Bitfield(String),
    /// `value: label` of a list custom type.
    Label(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Signed(n) => Some(n.into()),
            Value::Unsigned(n) => Some(n.into()),
            Value::Scaled { raw, decimals } => Some(scale_by_decimals(raw as f64, decimals)),
            _ => None,
        }
    }

    fn scaled(self, decimals: i32) -> Self {
        match self {
            Value::Signed(n) => Value::Scaled { raw: n.into(), decimals },
            Value::Unsigned(n) => Value::Scaled { raw: n.into(), decimals },
            other => other,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Signed(n) => f.write_fmt(format_args!("{}", n)),
            Value::Unsigned(n) => f.write_fmt(format_args!("{}", n)),
            Value::Scaled { decimals, .. } => {
                let value = self.as_f64().unwrap_or_default();
                let precision = usize::try_from(*decimals).unwrap_or(0);
                f.write_fmt(format_args!("{:.*}", precision, value))
            }
            Value::Text(s) | Value::Bitfield(s) | Value::Label(s) => f.write_str(s),
            Value::Bits(bits) => {
                for bit in bits {
                    f.write_str(if *bit { "1" } else { "0" })?;
                }
                Ok(())
            }
            Value::Hex(words) => f.write_str(&words.join(" ")),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Signed(n) => serializer.serialize_i32(*n),
            Value::Unsigned(n) => serializer.serialize_u32(*n),
            Value::Scaled { .. } => serializer.serialize_f64(self.as_f64().unwrap_or_default()),
            Value::Text(s) | Value::Bitfield(s) | Value::Label(s) => serializer.serialize_str(s),
            Value::Bits(bits) => serializer.collect_seq(bits),
            Value::Hex(words) => serializer.collect_seq(words),
        }
    }
}

/// Outcome of checking a decoded value against the declared bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    NotApplicable,
    Pass,
    Fail,
}

impl std::fmt::Display for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Validation::NotApplicable => "n/a",
            Validation::Pass => "ok",
            Validation::Fail => "out of range",
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Decoded {
    pub value: Value,
    pub validation: Validation,
}

/// Decode the registers read for `schema`, first register being the most significant.
pub fn decode(schema: &ResolvedSchema, words: &[u16]) -> Result<Decoded, DecodeError> {
    let value = match &schema.custom_type {
        Some(custom_type) => decode_custom(schema, custom_type, words)?,
        None => decode_plain(schema, words)?,
    };
    let value = match schema.decimals {
        Some(decimals) => value.scaled(decimals),
        None => value,
    };
    let validation = validate(schema, &value);
    Ok(Decoded { value, validation })
}

fn unsupported(schema: &ResolvedSchema) -> DecodeError {
    DecodeError::UnsupportedDatatype { datatype: schema.datatype.clone(), points: schema.points }
}

fn take<const N: usize>(words: &[u16]) -> Result<[u16; N], DecodeError> {
    words.first_chunk::<N>().copied().ok_or(DecodeError::ShortRead { expected: N, got: words.len() })
}

fn text(words: &[u16], bytes: usize) -> String {
    let bytes = words.iter().flat_map(|w| w.to_be_bytes()).take(bytes).collect::<Vec<u8>>();
    String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string()
}

fn decode_plain(schema: &ResolvedSchema, words: &[u16]) -> Result<Value, DecodeError> {
    Ok(match (schema.datatype.as_str(), schema.points) {
        ("integer", 1 | 2) => {
            let [word] = take(words)?;
            Value::Signed((word as i16).into())
        }
        ("integer", 4) => {
            let [high, low] = take(words)?;
            Value::Signed(((u32::from(high) << 16) | u32::from(low)) as i32)
        }
        ("unsigned", 1 | 2) => {
            let [word] = take(words)?;
            Value::Unsigned(word.into())
        }
        ("unsigned", 4) => {
            let [high, low] = take(words)?;
            Value::Unsigned((u32::from(high) << 16) | u32::from(low))
        }
        ("string0", points) => {
            let points = usize::from(points);
            if words.len() < points {
                return Err(DecodeError::ShortRead { expected: points, got: words.len() });
            }
            Value::Text(text(words, 2 * points))
        }
        ("char", _) => Value::Text(text(words, 8)),
        ("binary", _) => Value::Bits(
            words.iter().flat_map(|&w| (0..u16::BITS).map(move |bit| (w >> bit) & 1 == 1)).collect(),
        ),
        ("time" | "date", _) => Value::Hex(words.iter().map(|w| format!("{w:06x}")).collect()),
        _ => return Err(unsupported(schema)),
    })
}

fn decode_custom(
    schema: &ResolvedSchema,
    custom_type: &CustomType,
    words: &[u16],
) -> Result<Value, DecodeError> {
    let [word] = take(words)?;
    match custom_type.kind() {
        TypeKind::Bits => {
            let mut fields = Vec::with_capacity(custom_type.values.len());
            for (&bit, label) in &custom_type.values {
                if u32::from(bit) >= u16::BITS {
                    return Err(DecodeError::BitOutOfRange {
                        bit,
                        custom_type: custom_type.name.clone(),
                    });
                }
                fields.push(format!("{label}: {}", (word >> bit) & 1));
            }
            Ok(Value::Bitfield(fields.join(", ")))
        }
        TypeKind::List => match custom_type.values.get(&word) {
            Some(label) => Ok(Value::Label(format!("{word}: {label}"))),
            None => Err(DecodeError::UnknownListValue {
                value: word,
                custom_type: custom_type.name.clone(),
            }),
        },
        TypeKind::Other => Err(unsupported(schema)),
    }
}

fn validate(schema: &ResolvedSchema, value: &Value) -> Validation {
    if schema.is_list() {
        return Validation::NotApplicable;
    }
    let Some(value) = value.as_f64() else {
        return Validation::NotApplicable;
    };
    let below = schema.min_scaled().is_some_and(|min| value < min);
    let above = schema.max_scaled().is_some_and(|max| value > max);
    if below || above { Validation::Fail } else { Validation::Pass }
}
