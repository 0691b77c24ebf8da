use std::fmt;

use serde::{Deserialize, Serialize};

/// One coerced configuration value. Sequences exist only for repeated-key
/// (`name[]`) accumulation and never nest; absent keys have no value at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    /// Coerces a raw scalar: numeric forms become `Int` or `Float`,
    /// `true`/`false` in any case become `Bool`, everything else stays a string
    pub fn coerce(raw: &str) -> Self {
        if let Some(numeric) = parse_numeric(raw) {
            return numeric;
        }
        if raw.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        Self::Str(raw.to_owned())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
            Self::List(items) => {
                let mut first = true;
                for item in items {
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

fn parse_numeric(raw: &str) -> Option<ConfigValue> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(ConfigValue::Int(value));
    }

    // f64 parsing also accepts inf/nan spellings; the dialect only knows
    // digit-led decimal and exponent forms.
    let leading = raw.bytes().next()?;
    if !(leading.is_ascii_digit() || matches!(leading, b'+' | b'-' | b'.')) {
        return None;
    }
    let value = raw.parse::<f64>().ok()?;
    value.is_finite().then(|| ConfigValue::Float(value))
}
