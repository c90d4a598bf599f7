//! Column types, column descriptors, and YAML destination schemas.
//!
//! [`ColumnType`] is the declared type of a column on either side of a
//! mapping. [`ColumnDescriptor`] is the immutable description of one column
//! a cursor exposes. [`Schema`] is the on-disk YAML form of a destination
//! column list and implements [`SchemaProvider`], the narrow contract the
//! mapping cursor uses to obtain a destination schema.

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

const DECIMAL_MAX_PRECISION: u32 = 28;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecimalSpec {
    pub precision: u32,
    pub scale: u32,
}

impl DecimalSpec {
    pub fn new(precision: u32, scale: u32) -> Result<Self> {
        let spec = Self { precision, scale };
        spec.ensure_valid()?;
        Ok(spec)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(self.precision > 0, "Decimal precision must be positive");
        ensure!(
            self.precision <= DECIMAL_MAX_PRECISION,
            "Decimal precision must be <= {}",
            DECIMAL_MAX_PRECISION
        );
        ensure!(
            self.scale <= self.precision,
            "Decimal scale ({}) cannot exceed precision ({})",
            self.scale,
            self.precision
        );
        Ok(())
    }

    pub fn signature(&self) -> String {
        format!("decimal({},{})", self.precision, self.scale)
    }

    /// Number of digits allowed before the decimal point.
    pub fn integral_digits(&self) -> u32 {
        self.precision - self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Decimal(Option<DecimalSpec>),
    Boolean,
    Date,
    DateTime,
    Time,
    Guid,
    Enum(Vec<String>),
}

/// Payload-free discriminant of [`ColumnType`], used as a transform lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    String,
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Guid,
    Enum,
}

impl ColumnType {
    pub fn kind(&self) -> TypeKind {
        match self {
            ColumnType::String => TypeKind::String,
            ColumnType::Integer => TypeKind::Integer,
            ColumnType::Float => TypeKind::Float,
            ColumnType::Decimal(_) => TypeKind::Decimal,
            ColumnType::Boolean => TypeKind::Boolean,
            ColumnType::Date => TypeKind::Date,
            ColumnType::DateTime => TypeKind::DateTime,
            ColumnType::Time => TypeKind::Time,
            ColumnType::Guid => TypeKind::Guid,
            ColumnType::Enum(_) => TypeKind::Enum,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ColumnType::String)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Decimal(_) => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Time => "time",
            ColumnType::Guid => "guid",
            ColumnType::Enum(_) => "enum",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "string",
            "integer",
            "float",
            "decimal",
            "decimal(precision,scale)",
            "boolean",
            "date",
            "datetime",
            "time",
            "guid",
            "enum(a|b|c)",
        ]
    }

    pub fn signature_token(&self) -> String {
        match self {
            ColumnType::Decimal(Some(spec)) => spec.signature(),
            ColumnType::Enum(names) => format!("enum({})", names.join("|")),
            _ => self.as_str().to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature_token())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "text" => Ok(ColumnType::String),
            "integer" | "int" => Ok(ColumnType::Integer),
            "float" | "double" => Ok(ColumnType::Float),
            "decimal" => Ok(ColumnType::Decimal(None)),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" | "date-time" | "timestamp" => Ok(ColumnType::DateTime),
            "time" => Ok(ColumnType::Time),
            "guid" | "uuid" => Ok(ColumnType::Guid),
            other if other.starts_with("decimal(") => parse_decimal_type(value),
            other if other.starts_with("enum(") => parse_enum_type(value),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.signature_token())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

fn parenthesised_body(value: &str) -> Result<&str> {
    let trimmed = value.trim();
    let start = trimmed
        .find('(')
        .ok_or_else(|| anyhow!("Type '{trimmed}' must list its arguments in parentheses"))?;
    ensure!(
        trimmed.ends_with(')'),
        "Type '{trimmed}' must close with ')'"
    );
    Ok(&trimmed[start + 1..trimmed.len() - 1])
}

fn parse_decimal_type(value: &str) -> Result<ColumnType> {
    let inner = parenthesised_body(value)?;
    let parts = inner
        .split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    ensure!(
        parts.len() == 2,
        "Decimal type must specify precision and scale, e.g. decimal(18,4)"
    );
    let precision: u32 = parts[0]
        .parse()
        .with_context(|| format!("Invalid decimal precision '{}'", parts[0]))?;
    let scale: u32 = parts[1]
        .parse()
        .with_context(|| format!("Invalid decimal scale '{}'", parts[1]))?;
    Ok(ColumnType::Decimal(Some(DecimalSpec::new(precision, scale)?)))
}

fn parse_enum_type(value: &str) -> Result<ColumnType> {
    let inner = parenthesised_body(value)?;
    let names = inner
        .split(['|', ','])
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    ensure!(!names.is_empty(), "Enum type must list at least one variant");
    Ok(ColumnType::Enum(names))
}

/// One column exposed by a cursor. Immutable once the cursor is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(skip)]
    pub ordinal: usize,
    pub datatype: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, ordinal: usize, datatype: ColumnType) -> Self {
        Self {
            name: name.into(),
            ordinal,
            datatype,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// The name used when writing this column out.
    pub fn output_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.name)
    }
}

/// Builds descriptors with sequential ordinals from `(name, type)` pairs.
pub fn describe_columns<I, S>(columns: I) -> Vec<ColumnDescriptor>
where
    I: IntoIterator<Item = (S, ColumnType)>,
    S: Into<String>,
{
    columns
        .into_iter()
        .enumerate()
        .map(|(ordinal, (name, datatype))| ColumnDescriptor::new(name, ordinal, datatype))
        .collect()
}

/// Source of destination column lists.
pub trait SchemaProvider {
    fn columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
}

impl Schema {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let mut schema: Schema = serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        schema.renumber();
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut schema: Schema = serde_yaml::from_str(text).context("Parsing schema YAML")?;
        schema.renumber();
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.columns.is_empty(), "Schema must define at least one column");
        for column in &self.columns {
            ensure!(
                !column.name.trim().is_empty(),
                "Schema column at position {} has an empty name",
                column.ordinal + 1
            );
            if let ColumnType::Decimal(Some(spec)) = &column.datatype {
                spec.ensure_valid()
                    .with_context(|| format!("Column '{}'", column.name))?;
            }
        }
        Ok(())
    }

    fn renumber(&mut self) {
        for (ordinal, column) in self.columns.iter_mut().enumerate() {
            column.ordinal = ordinal;
        }
    }
}

impl SchemaProvider for Schema {
    fn columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        if let Some(own) = self.table.as_deref()
            && !own.eq_ignore_ascii_case(table)
        {
            return Err(anyhow!(
                "Schema describes table '{own}' but '{table}' was requested"
            ));
        }
        Ok(self.columns.clone())
    }
}
