//! `evalexpr` expressions evaluated against the current row of a cursor.
//!
//! Columns are bound twice: under their normalised name (`Order Date` becomes
//! `order_date`) and positionally as `c0`, `c1`, ... Filter predicates also see
//! `row_number`, the 1-based number of the row being tested.

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, DefaultNumericTypes, EvalexprError,
    Function, HashMapContext, Value as EvalValue, eval_with_context,
};

use crate::{
    cursor::RowCursor,
    data::{
        Value, normalize_column_name, parse_naive_date, parse_naive_datetime, value_from_evalexpr,
        value_to_evalexpr,
    },
    decorators::RowPredicate,
    projection::ComputedColumn,
    schema::ColumnType,
};

fn register_functions(context: &mut HashMapContext) -> Result<()> {
    let functions: [(&str, EvalFunction); 7] = [
        ("date_add", Function::new(date_add)),
        ("date_diff_days", Function::new(date_diff_days)),
        ("date_format", Function::new(date_format)),
        ("lowercase", string_function("lowercase", str::to_lowercase)),
        ("uppercase", string_function("uppercase", str::to_uppercase)),
        ("trim", string_function("trim", |s| s.trim().to_string())),
        ("is_null", Function::new(is_null)),
    ];
    for (name, function) in functions {
        context
            .set_function(name.to_string(), function)
            .with_context(|| format!("Registering function '{name}'"))?;
    }
    Ok(())
}

type EvalResult = Result<EvalValue, EvalexprError>;
type EvalFunction = Function<DefaultNumericTypes>;

fn date_add(arguments: &EvalValue) -> EvalResult {
    let args = expect_args(arguments, 2, "date_add")?;
    let date = parse_date_arg(&args[0])?;
    let days = parse_i64_arg(&args[1], "days")?;
    date.checked_add_signed(Duration::days(days))
        .map(|shifted| EvalValue::String(shifted.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| eval_error("date_add overflow"))
}

fn date_diff_days(arguments: &EvalValue) -> EvalResult {
    let args = expect_args(arguments, 2, "date_diff_days")?;
    let end = parse_date_arg(&args[0])?;
    let start = parse_date_arg(&args[1])?;
    Ok(EvalValue::Int((end - start).num_days()))
}

fn date_format(arguments: &EvalValue) -> EvalResult {
    let args = expect_args(arguments, 2, "date_format")?;
    let date = parse_date_arg(&args[0])?;
    let pattern = expect_string(&args[1], "format")?;
    Ok(EvalValue::String(date.format(pattern).to_string()))
}

fn is_null(arguments: &EvalValue) -> EvalResult {
    Ok(EvalValue::Boolean(matches!(arguments, EvalValue::Empty)))
}

/// One-argument string function.
fn string_function(name: &'static str, apply: fn(&str) -> String) -> EvalFunction {
    Function::new(move |arguments| {
        let args = expect_args(arguments, 1, name)?;
        Ok(EvalValue::String(apply(expect_string(&args[0], "value")?)))
    })
}

fn expect_args(
    arguments: &EvalValue,
    expected: usize,
    name: &str,
) -> Result<Vec<EvalValue>, EvalexprError> {
    match arguments {
        value if expected == 1 && !matches!(value, EvalValue::Tuple(_)) => Ok(vec![value.clone()]),
        EvalValue::Tuple(values) => {
            if values.len() != expected {
                return Err(EvalexprError::wrong_function_argument_amount(
                    values.len(),
                    expected,
                ));
            }
            Ok(values.clone())
        }
        _ => Err(eval_error(&format!(
            "{name} expects {expected} arguments provided as a tuple"
        ))),
    }
}

fn eval_error(message: &str) -> EvalexprError {
    EvalexprError::CustomMessage(message.to_string())
}

/// Accepts plain dates and datetimes, whose date part is used.
fn parse_date_arg(value: &EvalValue) -> Result<NaiveDate, EvalexprError> {
    let raw = expect_string(value, "date")?;
    parse_naive_date(raw)
        .or_else(|_| parse_naive_datetime(raw).map(|dt| dt.date()))
        .map_err(|err| eval_error(&err.to_string()))
}

fn parse_i64_arg(value: &EvalValue, name: &str) -> Result<i64, EvalexprError> {
    match value {
        EvalValue::Int(i) => Ok(*i),
        EvalValue::Float(f) => Ok(*f as i64),
        other => Err(eval_error(&format!(
            "Expected integer for {name}, got {other:?}",
        ))),
    }
}

fn expect_string<'a>(value: &'a EvalValue, name: &str) -> Result<&'a str, EvalexprError> {
    if let EvalValue::String(s) = value {
        Ok(s)
    } else {
        Err(eval_error(&format!("Expected string for {name}")))
    }
}

/// Binds every column of the cursor's current row into a fresh context.
pub fn row_context(cursor: &dyn RowCursor, row_number: Option<u64>) -> Result<HashMapContext> {
    let mut context: HashMapContext = HashMapContext::new();
    register_functions(&mut context)?;
    for idx in 0..cursor.field_count() {
        let name = cursor.name(idx)?;
        let value = value_to_evalexpr(&cursor.value(idx)?);
        context
            .set_value(normalize_column_name(name), value.clone())
            .with_context(|| format!("Binding column '{name}'"))?;
        context
            .set_value(format!("c{idx}"), value)
            .with_context(|| format!("Binding column index {idx}"))?;
    }
    if let Some(number) = row_number {
        context
            .set_value("row_number".to_string(), EvalValue::Int(number as i64))
            .context("Binding row_number")?;
    }
    Ok(context)
}

pub fn evaluate_expression_to_bool(expr: &str, context: &HashMapContext) -> Result<bool> {
    let result = eval_with_context(expr, context)
        .with_context(|| format!("Evaluating expression '{expr}'"))?;
    Ok(eval_value_truthy(result))
}

pub fn eval_value_truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(eval_value_truthy),
        EvalValue::Empty => false,
    }
}

/// A row predicate evaluating `expression`; `row_number` counts the rows tested.
pub fn expression_predicate<'a>(expression: impl Into<String>) -> RowPredicate<'a> {
    let expression = expression.into();
    let mut tested = 0u64;
    Box::new(move |row: &dyn RowCursor| {
        tested += 1;
        let context = row_context(row, Some(tested))?;
        Ok(evaluate_expression_to_bool(&expression, &context)?)
    })
}

/// `name=expression` column computed from the current row.
#[derive(Debug, Clone)]
pub struct DerivedColumn {
    pub name: String,
    pub expression: String,
}

impl DerivedColumn {
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, expression) = spec
            .split_once('=')
            .map(|(name, expression)| (name.trim(), expression.trim()))
            .unwrap_or((spec.trim(), ""));
        if name.is_empty() {
            return Err(anyhow!("Derived column is missing a name"));
        }
        if expression.is_empty() {
            return Err(anyhow!("Derived column '{name}' is missing an expression"));
        }
        Ok(DerivedColumn {
            name: name.to_string(),
            expression: expression.to_string(),
        })
    }

    pub fn evaluate(&self, row: &dyn RowCursor) -> Result<Value> {
        let context = row_context(row, None)?;
        let result = eval_with_context(&self.expression, &context)
            .with_context(|| format!("Evaluating expression for column '{}'", self.name))?;
        Ok(value_from_evalexpr(result))
    }

    /// Wraps the expression as a lazily evaluated string column.
    pub fn into_computed<'a>(self) -> ComputedColumn<'a> {
        let name = self.name.clone();
        ComputedColumn::new(name, move |row: &dyn RowCursor| {
            let value = self.evaluate(row)?;
            Ok(match value {
                Value::Null => Value::Null,
                other => Value::String(other.as_display()),
            })
        })
        .with_type(ColumnType::String)
    }
}

pub fn parse_derived_columns(specs: &[String]) -> Result<Vec<DerivedColumn>> {
    specs
        .iter()
        .map(|spec| DerivedColumn::parse(spec))
        .collect()
}
