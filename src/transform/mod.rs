//! Transform groups: named tables of value conversions keyed by destination type.
//!
//! A [`TransformGroup`] answers "how do I turn this source value into a value
//! of destination type T". Entries may be specific to a source type or accept
//! any source; specific entries win. The built-in groups are `default`, which
//! carries the loose parsers from [`parsers`], and `none`, which converts
//! nothing so values pass through untouched.
//!
//! Groups live in an explicit [`TransformRegistry`] handed to whoever needs
//! one, so tests and callers can build isolated groups of their own.

pub mod parsers;

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::NaiveTime;
use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};
use uuid::Uuid;

use crate::{
    data::{Value, parse_naive_datetime, parse_naive_time},
    error::TransformError,
    schema::{ColumnType, TypeKind},
};

use self::parsers::{
    fit_decimal, parse_bool_loose, parse_date_loose, parse_decimal_loose, parse_float_loose,
    parse_int_loose, parse_mmddyyyy,
};

pub const DEFAULT_GROUP: &str = "default";
pub const NONE_GROUP: &str = "none";

type ConvertFn = dyn Fn(&Value, &ColumnType) -> Result<Value, TransformError> + Send + Sync;

/// One conversion rule. Cheap to clone.
#[derive(Clone)]
pub struct TransformEntry {
    source: Option<TypeKind>,
    destination: TypeKind,
    may_fail: bool,
    convert: Arc<ConvertFn>,
}

impl TransformEntry {
    pub fn new<F>(
        source: Option<TypeKind>,
        destination: TypeKind,
        may_fail: bool,
        convert: F,
    ) -> Self
    where
        F: Fn(&Value, &ColumnType) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Self {
            source,
            destination,
            may_fail,
            convert: Arc::new(convert),
        }
    }

    pub fn source(&self) -> Option<TypeKind> {
        self.source
    }

    pub fn destination(&self) -> TypeKind {
        self.destination
    }

    pub fn may_fail(&self) -> bool {
        self.may_fail
    }

    /// Converts `value` to `target`, whose payload (decimal precision, enum
    /// variants) parameterises the conversion.
    pub fn convert(&self, value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
        (self.convert)(value, target)
    }
}

impl fmt::Debug for TransformEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEntry")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("may_fail", &self.may_fail)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TransformGroup {
    name: String,
    entries: HashMap<TypeKind, Vec<TransformEntry>>,
}

impl TransformGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(&mut self, entry: TransformEntry) -> &mut Self {
        self.entries.entry(entry.destination).or_default().push(entry);
        self
    }

    pub fn with(mut self, entry: TransformEntry) -> Self {
        self.register(entry);
        self
    }

    /// Finds the conversion to `target`, preferring an entry registered for
    /// `source` over one that accepts any source.
    pub fn converter(
        &self,
        target: &ColumnType,
        source: Option<&ColumnType>,
    ) -> Option<TransformEntry> {
        let candidates = self.entries.get(&target.kind())?;
        let source_kind = source.map(ColumnType::kind);
        candidates
            .iter()
            .rev()
            .find(|entry| entry.source.is_some() && entry.source == source_kind)
            .or_else(|| candidates.iter().rev().find(|entry| entry.source.is_none()))
            .cloned()
    }

    /// Group that converts nothing.
    pub fn none() -> Self {
        TransformGroup::new(NONE_GROUP)
    }

    /// Group carrying the built-in loose conversions.
    pub fn standard() -> Self {
        TransformGroup::new(DEFAULT_GROUP)
            .with(TransformEntry::new(None, TypeKind::String, false, to_string))
            .with(TransformEntry::new(None, TypeKind::Integer, true, to_integer))
            .with(TransformEntry::new(None, TypeKind::Float, true, to_float))
            .with(TransformEntry::new(None, TypeKind::Decimal, true, to_decimal))
            .with(TransformEntry::new(None, TypeKind::Boolean, true, to_boolean))
            .with(TransformEntry::new(None, TypeKind::Date, true, to_date))
            .with(TransformEntry::new(
                Some(TypeKind::Integer),
                TypeKind::Date,
                true,
                integer_to_date,
            ))
            .with(TransformEntry::new(None, TypeKind::DateTime, true, to_datetime))
            .with(TransformEntry::new(None, TypeKind::Time, true, to_time))
            .with(TransformEntry::new(None, TypeKind::Guid, true, to_guid))
            .with(TransformEntry::new(None, TypeKind::Enum, true, to_enum))
    }
}

/// The set of transform groups available to a pipeline, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    groups: Vec<TransformGroup>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `default` and `none` groups.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(TransformGroup::standard());
        registry.register(TransformGroup::none());
        registry
    }

    /// Adds a group, replacing any existing group with the same name.
    pub fn register(&mut self, group: TransformGroup) {
        self.groups
            .retain(|existing| !existing.name.eq_ignore_ascii_case(&group.name));
        self.groups.push(group);
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&TransformGroup> {
        self.groups
            .iter()
            .find(|group| group.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.groups.iter().map(|group| group.name()).collect()
    }
}

fn unsupported(value: &Value, target: &ColumnType) -> TransformError {
    TransformError::Unsupported {
        from: value
            .column_type()
            .map(|ty| ty.to_string())
            .unwrap_or_else(|| "null".to_string()),
        target: target.to_string(),
    }
}

/// Text form of a value, or `None` when it is null or blank.
fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn to_string(value: &Value, _target: &ColumnType) -> Result<Value, TransformError> {
    Ok(match value {
        Value::Null => Value::Null,
        Value::String(_) => value.clone(),
        other => Value::String(other.as_display()),
    })
}

fn to_integer(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let raw = value.as_display();
    let parsed = match value {
        Value::Integer(i) => *i,
        Value::Boolean(b) => i64::from(*b),
        Value::Float(f) if f.fract() == 0.0 => {
            if *f < i64::MIN as f64 || *f >= i64::MAX as f64 {
                return Err(TransformError::overflow(raw, target.to_string()));
            }
            *f as i64
        }
        Value::Decimal(d) if d.fract().is_zero() => d
            .to_i64()
            .ok_or_else(|| TransformError::overflow(&raw, target.to_string()))?,
        Value::Float(_) | Value::Decimal(_) => {
            return Err(TransformError::format(raw, target.to_string()));
        }
        _ => match text_of(value) {
            Some(text) => parse_int_loose(text)?,
            None => return Err(unsupported(value, target)),
        },
    };
    Ok(Value::Integer(parsed))
}

fn to_float(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let parsed = match value {
        Value::Float(f) => *f,
        Value::Integer(i) => *i as f64,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Decimal(d) => d
            .to_f64()
            .ok_or_else(|| TransformError::overflow(value.as_display(), target.to_string()))?,
        _ => match text_of(value) {
            Some(text) => parse_float_loose(text)?,
            None => return Err(unsupported(value, target)),
        },
    };
    Ok(Value::Float(parsed))
}

fn to_decimal(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let raw = value.as_display();
    let parsed = match value {
        Value::Decimal(d) => *d,
        Value::Integer(i) => Decimal::from(*i),
        Value::Boolean(b) => Decimal::from(u8::from(*b)),
        Value::Float(f) => Decimal::from_f64(*f)
            .ok_or_else(|| TransformError::overflow(&raw, target.to_string()))?,
        _ => match text_of(value) {
            Some(text) => parse_decimal_loose(text)?,
            None => return Err(unsupported(value, target)),
        },
    };
    let fitted = match target {
        ColumnType::Decimal(Some(spec)) => fit_decimal(parsed, spec, &raw)?,
        _ => parsed,
    };
    Ok(Value::Decimal(fitted))
}

fn to_boolean(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    let parsed = match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Decimal(d) => !d.is_zero(),
        Value::String(s) => parse_bool_loose(s)?,
        _ => return Err(unsupported(value, target)),
    };
    Ok(Value::Boolean(parsed))
}

fn to_date(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let parsed = match value {
        Value::Date(d) => *d,
        Value::DateTime(dt) => dt.date(),
        _ => match text_of(value) {
            Some(text) => parse_date_loose(text)?,
            None => return Err(unsupported(value, target)),
        },
    };
    Ok(Value::Date(parsed))
}

/// Integers are dates whose leading zero was lost, e.g. `8012035`.
fn integer_to_date(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    match value {
        Value::Integer(i) => Ok(Value::Date(parse_mmddyyyy(&i.to_string())?)),
        _ => to_date(value, target),
    }
}

fn to_datetime(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let parsed = match value {
        Value::DateTime(dt) => *dt,
        Value::Date(d) => d.and_time(NaiveTime::MIN),
        _ => match text_of(value) {
            Some(text) => parse_naive_datetime(text.trim())
                .or_else(|_| {
                    parse_date_loose(text)
                        .map(|d| d.and_time(NaiveTime::MIN))
                        .map_err(anyhow::Error::from)
                })
                .map_err(|_| TransformError::format(text, target.to_string()))?,
            None => return Err(unsupported(value, target)),
        },
    };
    Ok(Value::DateTime(parsed))
}

fn to_time(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let parsed = match value {
        Value::Time(t) => *t,
        Value::DateTime(dt) => dt.time(),
        _ => match text_of(value) {
            Some(text) => parse_naive_time(text.trim())
                .map_err(|_| TransformError::format(text, target.to_string()))?,
            None => return Err(unsupported(value, target)),
        },
    };
    Ok(Value::Time(parsed))
}

fn to_guid(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let parsed = match value {
        Value::Guid(g) => *g,
        _ => match text_of(value) {
            Some(text) => {
                let trimmed = text.trim().trim_matches(|c| matches!(c, '{' | '}'));
                Uuid::parse_str(trimmed)
                    .map_err(|_| TransformError::format(text, target.to_string()))?
            }
            None => return Err(unsupported(value, target)),
        },
    };
    Ok(Value::Guid(parsed))
}

/// Maps names (any case) or ordinals onto the canonical variant name.
fn to_enum(value: &Value, target: &ColumnType) -> Result<Value, TransformError> {
    let ColumnType::Enum(variants) = target else {
        return Err(unsupported(value, target));
    };
    if is_blank(value) {
        return Ok(Value::Null);
    }
    let found = match value {
        Value::Integer(i) => usize::try_from(*i).ok().and_then(|idx| variants.get(idx)),
        _ => match text_of(value) {
            Some(text) => {
                let trimmed = text.trim();
                variants
                    .iter()
                    .find(|variant| variant.eq_ignore_ascii_case(trimmed))
                    .or_else(|| {
                        trimmed
                            .parse::<usize>()
                            .ok()
                            .and_then(|idx| variants.get(idx))
                    })
            }
            None => return Err(unsupported(value, target)),
        },
    };
    found
        .map(|variant| Value::String(variant.clone()))
        .ok_or_else(|| TransformError::format(value.as_display(), target.to_string()))
}
