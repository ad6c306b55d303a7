use super::value::Value;
use crate::core::{DbError, Result};
use crate::dialect::Dialect;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-([0-1]?\d)-([0-3]?\d)$").expect("date pattern"));

static TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-1]?\d|2[0-3]):([0-5]\d):([0-5]\d)$").expect("time pattern")
});

static DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-([0-1]?\d)-([0-3]?\d) ([0-1]?\d|2[0-3]):([0-5]\d):([0-5]\d)$")
        .expect("datetime pattern")
});

/// Placeholder type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int,
    Float,
    String,
    Text,
    ArrayInt,
    ArrayString,
    Date,
    Time,
    Datetime,
    Inet,
    ArrayInet,
    Uuid,
    Identifier,
    Raw,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::Text => "text",
            TypeTag::ArrayInt => "array_int",
            TypeTag::ArrayString => "array_string",
            TypeTag::Date => "date",
            TypeTag::Time => "time",
            TypeTag::Datetime => "datetime",
            TypeTag::Inet => "inet",
            TypeTag::ArrayInet => "array_inet",
            TypeTag::Uuid => "uuid",
            TypeTag::Identifier => "identifier",
            TypeTag::Raw => "raw",
        }
    }
}

impl FromStr for TypeTag {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "int" => TypeTag::Int,
            "float" => TypeTag::Float,
            "string" => TypeTag::String,
            "text" => TypeTag::Text,
            "array_int" => TypeTag::ArrayInt,
            "array_string" => TypeTag::ArrayString,
            "date" => TypeTag::Date,
            "time" => TypeTag::Time,
            "datetime" => TypeTag::Datetime,
            "inet" => TypeTag::Inet,
            "array_inet" => TypeTag::ArrayInet,
            "uuid" => TypeTag::Uuid,
            "identifier" => TypeTag::Identifier,
            "raw" => TypeTag::Raw,
            other => {
                return Err(DbError::validation(
                    other,
                    "",
                    "Undefined type used in the database query",
                ))
            }
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates `value` against `tag` and renders it as a SQL fragment.
pub fn encode(dialect: &dyn Dialect, tag: TypeTag, name: &str, value: &Value) -> Result<String> {
    let fail = |message: &str| DbError::validation(tag.as_str(), name, message);

    match tag {
        TypeTag::Int => int_value(value)
            .map(|i| i.to_string())
            .ok_or_else(|| fail("Integer expected")),
        TypeTag::Float => float_value(value)
            .map(|f| f.to_string())
            .ok_or_else(|| fail("Floating point number expected")),
        TypeTag::String | TypeTag::Text => match value {
            Value::Null => Ok("NULL".to_string()),
            other => other
                .scalar_text()
                .map(|s| dialect.quote_string(&s))
                .ok_or_else(|| fail("String expected")),
        },
        TypeTag::ArrayInt => {
            let items = non_empty_list(value).ok_or_else(|| fail("Array of integers expected"))?;
            items
                .iter()
                .map(|item| int_value(item).map(|i| i.to_string()))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join(", "))
                .ok_or_else(|| fail("Array of integers expected"))
        }
        TypeTag::ArrayString => {
            let items = non_empty_list(value).ok_or_else(|| fail("Array of strings expected"))?;
            items
                .iter()
                .map(|item| item.scalar_text().map(|s| dialect.quote_string(&s)))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join(", "))
                .ok_or_else(|| fail("Array of strings expected"))
        }
        TypeTag::Date => text_value(value)
            .and_then(|s| parse_date(&s))
            .map(|d| dialect.date_literal(&d))
            .ok_or_else(|| fail("Date expected")),
        TypeTag::Time => text_value(value)
            .and_then(|s| parse_time(&s))
            .map(|t| dialect.time_literal(&t))
            .ok_or_else(|| fail("Time expected")),
        TypeTag::Datetime => text_value(value)
            .and_then(|s| parse_datetime(&s))
            .map(|dt| dialect.datetime_literal(&dt))
            .ok_or_else(|| fail("Datetime expected")),
        TypeTag::Inet => inet_literal(dialect, value).ok_or_else(|| fail("IPv4 or IPv6 expected")),
        TypeTag::ArrayInet => {
            let items = non_empty_list(value).ok_or_else(|| fail("Array of IPs expected"))?;
            items
                .iter()
                .map(|item| inet_literal(dialect, item))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join(", "))
                .ok_or_else(|| fail("Array of IPs expected"))
        }
        TypeTag::Uuid => parse_uuid(value)
            .map(|u| dialect.uuid_literal(&u))
            .ok_or_else(|| fail("UUID expected")),
        TypeTag::Identifier => match value {
            Value::Text(s) if !s.trim().is_empty() => Ok(dialect.quote_identifier(s)),
            _ => Err(fail("Identifier expected")),
        },
        TypeTag::Raw => value.scalar_text().ok_or_else(|| fail("Raw SQL text expected")),
    }
}

/// An integer, or text that round-trips through integer parsing unchanged.
fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e18 => Some(*f as i64),
        Value::Text(s) => s.parse::<i64>().ok().filter(|i| i.to_string() == *s),
        _ => None,
    }
}

fn float_value(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        Value::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn non_empty_list(value: &Value) -> Option<&[Value]> {
    match value {
        Value::List(items) if !items.is_empty() => Some(items),
        _ => None,
    }
}

fn captured(caps: &regex::Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let caps = DATE.captures(s)?;
    NaiveDate::from_ymd_opt(captured(&caps, 1)? as i32, captured(&caps, 2)?, captured(&caps, 3)?)
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let caps = TIME.captures(s)?;
    NaiveTime::from_hms_opt(captured(&caps, 1)?, captured(&caps, 2)?, captured(&caps, 3)?)
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let caps = DATETIME.captures(s)?;
    let date =
        NaiveDate::from_ymd_opt(captured(&caps, 1)? as i32, captured(&caps, 2)?, captured(&caps, 3)?)?;
    let time = NaiveTime::from_hms_opt(captured(&caps, 4)?, captured(&caps, 5)?, captured(&caps, 6)?)?;
    Some(date.and_time(time))
}

/// `null` for empty or null input, the dialect's address literal otherwise.
fn inet_literal(dialect: &dyn Dialect, value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Text(s) if s.is_empty() || s == "null" => Some("null".to_string()),
        Value::Text(s) => IpAddr::from_str(s.trim())
            .ok()
            .map(|addr| dialect.inet_literal(&addr)),
        _ => None,
    }
}

/// Canonical, 22 character base64url, or 16 raw bytes.
fn parse_uuid(value: &Value) -> Option<Uuid> {
    match value {
        Value::Uuid(u) => Some(*u),
        Value::Bytes(b) => Uuid::from_slice(b).ok(),
        Value::Text(s) if s.len() == 22 => {
            let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
            Uuid::from_slice(&bytes).ok()
        }
        Value::Text(s) => Uuid::parse_str(s.trim()).ok(),
        _ => None,
    }
}
