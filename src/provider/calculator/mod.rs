//! The `calculator` provider.
//!
//! Tools:
//!
//! - `calculate`: evaluates an arithmetic expression (see [`expression`]).
//! - `solve_quadratic`: solves `ax² + bx + c = 0`, including the degenerate cases.
//! - `unit_converter`: length, weight, temperature, area and volume conversions.
//! - `statistics_calculator`: descriptive statistics over a list of numbers.

pub mod expression;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_options, Provider};
use crate::capability::{
    handler_fn, Arguments, CapabilityDescriptor, InvocationResult, Output, ParamSpec, ParamType,
};
use expression::format_general;

/// Provider id used in the configuration document.
pub const PROVIDER_ID: &str = "calculator";

/// Options accepted under `providers.calculator.config`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculatorOptions {
    /// Significant digits in formatted float results.
    #[serde(default = "default_precision")]
    pub precision: usize,
}

impl Default for CalculatorOptions {
    fn default() -> Self {
        Self {
            precision: default_precision(),
        }
    }
}

const fn default_precision() -> usize {
    10
}

/// Arithmetic, algebra, unit and statistics tools.
#[derive(Debug, Clone, Default)]
pub struct CalculatorProvider {
    options: CalculatorOptions,
}

impl CalculatorProvider {
    /// Creates the provider from its option map.
    ///
    /// # Errors
    ///
    /// Returns a message if the options do not deserialise or `precision` is
    /// out of range.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self, String> {
        let options: CalculatorOptions = parse_options(options)?;
        if !(1..=17).contains(&options.precision) {
            return Err(format!(
                "precision must be between 1 and 17, got {}",
                options.precision
            ));
        }
        Ok(Self { options })
    }
}

impl Provider for CalculatorProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, String> {
        let precision = self.options.precision;

        Ok(vec![
            CapabilityDescriptor::tool(
                "calculate",
                handler_fn(move |args: Arguments| async move {
                    InvocationResult::from(calculate(&args, precision))
                }),
            )
            .with_title("Calculator")
            .with_category("calculator")
            .with_description(
                "Evaluate a mathematical expression. Supports + - * / // % **, parentheses, \
                 functions (sqrt, sin, cos, tan, log, exp, factorial, ...) and constants (pi, e, tau).",
            )
            .with_param(
                ParamSpec::required("expression", ParamType::String)
                    .describe("Mathematical expression to evaluate, e.g. \"sqrt(16) + 2 * 3\""),
            ),
            CapabilityDescriptor::tool(
                "solve_quadratic",
                handler_fn(|args: Arguments| async move { InvocationResult::from(solve_quadratic(&args)) }),
            )
            .with_title("Quadratic Solver")
            .with_category("calculator")
            .with_description("Solve the quadratic equation ax² + bx + c = 0.")
            .with_param(ParamSpec::required("a", ParamType::Number).describe("Coefficient of x²"))
            .with_param(ParamSpec::required("b", ParamType::Number).describe("Coefficient of x"))
            .with_param(ParamSpec::required("c", ParamType::Number).describe("Constant term")),
            CapabilityDescriptor::tool(
                "unit_converter",
                handler_fn(|args: Arguments| async move { InvocationResult::from(convert_units(&args)) }),
            )
            .with_title("Unit Converter")
            .with_category("calculator")
            .with_description(
                "Convert a value between units of length, weight, temperature, area or volume.",
            )
            .with_param(ParamSpec::required("value", ParamType::Number).describe("Value to convert"))
            .with_param(ParamSpec::required("from_unit", ParamType::String).describe("Source unit"))
            .with_param(ParamSpec::required("to_unit", ParamType::String).describe("Target unit"))
            .with_param(
                ParamSpec::optional("unit_type", ParamType::String)
                    .with_default(json!("length"))
                    .describe("length, weight, temperature, area or volume"),
            ),
            CapabilityDescriptor::tool(
                "statistics_calculator",
                handler_fn(|args: Arguments| async move { InvocationResult::from(statistics(&args)) }),
            )
            .with_title("Statistics Calculator")
            .with_category("calculator")
            .with_description("Calculate descriptive statistics for a list of numbers.")
            .with_param(
                ParamSpec::required("numbers", ParamType::array_of(ParamType::Number))
                    .describe("List of numbers"),
            )
            .with_param(
                ParamSpec::optional("operation", ParamType::String)
                    .with_default(json!("all"))
                    .describe("all, mean, median, mode, std, var, min, max or range"),
            ),
        ])
    }
}

fn calculate(args: &Arguments, precision: usize) -> Result<Output, String> {
    let expr = args.require_str("expression")?.trim().to_string();
    let value = expression::evaluate(&expr)?;

    let (result, result_type, formatted) = match value {
        expression::Value::Int(i) => (json!(i), "integer", i.to_string()),
        expression::Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18 => {
            let i = f as i64;
            (json!(i), "integer", i.to_string())
        }
        expression::Value::Float(f) => {
            let formatted = format_general(f, precision);
            let result = if f.is_finite() { json!(f) } else { json!(formatted) };
            (result, "float", formatted)
        }
        list @ expression::Value::List(_) => {
            let formatted = list.to_string();
            (list_to_json(&list), "list", formatted)
        }
    };

    tracing::debug!(expression = %expr, result = %formatted, "Calculated");
    Ok(Output::Json(json!({
        "expression": expr,
        "result": result,
        "result_type": result_type,
        "formatted_result": formatted,
    })))
}

fn list_to_json(value: &expression::Value) -> Value {
    match value {
        expression::Value::Int(i) => json!(i),
        expression::Value::Float(f) if f.is_finite() => json!(f),
        expression::Value::Float(f) => json!(format_general(*f, 10)),
        expression::Value::List(items) => Value::Array(items.iter().map(list_to_json).collect()),
    }
}

fn solve_quadratic(args: &Arguments) -> Result<Output, String> {
    let a = args.require_f64("a")?;
    let b = args.require_f64("b")?;
    let c = args.require_f64("c")?;
    let equation = format!("{a:?}x² + {b:?}x + {c:?} = 0");

    let result = if a == 0.0 {
        if b == 0.0 {
            if c == 0.0 {
                json!({
                    "equation": equation,
                    "type": "identity",
                    "solutions": "All real numbers",
                    "message": "Every number is a solution",
                })
            } else {
                json!({
                    "equation": equation,
                    "type": "contradiction",
                    "solutions": "No solution",
                    "message": "No real solutions exist",
                })
            }
        } else {
            let x = -c / b;
            json!({
                "equation": equation,
                "type": "linear",
                "solutions": [x],
                "message": format!("Linear equation with solution x = {}", format_general(x, 6)),
            })
        }
    } else {
        let discriminant = b.mul_add(b, -4.0 * a * c);
        if discriminant > 0.0 {
            let root = discriminant.sqrt();
            let x1 = (-b + root) / (2.0 * a);
            let x2 = (-b - root) / (2.0 * a);
            json!({
                "equation": equation,
                "type": "two_real_solutions",
                "discriminant": discriminant,
                "solutions": [x1, x2],
                "message": format!(
                    "Two real solutions: x₁ = {}, x₂ = {}",
                    format_general(x1, 6),
                    format_general(x2, 6)
                ),
            })
        } else if discriminant == 0.0 {
            let x = -b / (2.0 * a);
            json!({
                "equation": equation,
                "type": "one_real_solution",
                "discriminant": discriminant,
                "solutions": [x],
                "message": format!("One real solution (repeated root): x = {}", format_general(x, 6)),
            })
        } else {
            let re = -b / (2.0 * a);
            let im = discriminant.abs().sqrt() / (2.0 * a);
            let x1 = complex(re, im);
            let x2 = complex(re, -im);
            json!({
                "equation": equation,
                "type": "complex_solutions",
                "discriminant": discriminant,
                "solutions": [x1, x2],
                "message": format!("Complex solutions: x₁ = {x1}, x₂ = {x2}"),
            })
        }
    };

    Ok(Output::Json(result))
}

fn complex(re: f64, im: f64) -> String {
    let sign = if im.is_sign_negative() { '-' } else { '+' };
    format!(
        "({}{sign}{}j)",
        format_general(re + 0.0, 6),
        format_general(im.abs(), 6)
    )
}

/// Conversion factors to the base unit of each linear unit type.
fn linear_factors(unit_type: &str) -> Option<&'static [(&'static str, f64)]> {
    const LENGTH: &[(&str, f64)] = &[
        ("mm", 0.001),
        ("cm", 0.01),
        ("m", 1.0),
        ("km", 1000.0),
        ("in", 0.0254),
        ("ft", 0.3048),
        ("yd", 0.9144),
        ("mile", 1609.344),
    ];
    const WEIGHT: &[(&str, f64)] = &[("g", 0.001), ("kg", 1.0), ("lb", 0.453_592), ("oz", 0.028_349_5)];
    const AREA: &[(&str, f64)] = &[
        ("m2", 1.0),
        ("cm2", 0.0001),
        ("ft2", 0.092_903),
        ("in2", 0.000_645_16),
    ];
    const VOLUME: &[(&str, f64)] = &[
        ("ml", 0.001),
        ("l", 1.0),
        ("cup", 0.236_588),
        ("pint", 0.473_176),
        ("quart", 0.946_353),
        ("gallon", 3.785_41),
    ];

    match unit_type {
        "length" => Some(LENGTH),
        "weight" => Some(WEIGHT),
        "area" => Some(AREA),
        "volume" => Some(VOLUME),
        _ => None,
    }
}

fn to_celsius(value: f64, unit: &str) -> Option<f64> {
    match unit.to_ascii_lowercase().as_str() {
        "celsius" | "c" => Some(value),
        "fahrenheit" | "f" => Some((value - 32.0) * 5.0 / 9.0),
        "kelvin" | "k" => Some(value - 273.15),
        _ => None,
    }
}

fn from_celsius(celsius: f64, unit: &str) -> Option<f64> {
    match unit.to_ascii_lowercase().as_str() {
        "celsius" | "c" => Some(celsius),
        "fahrenheit" | "f" => Some(celsius * 9.0 / 5.0 + 32.0),
        "kelvin" | "k" => Some(celsius + 273.15),
        _ => None,
    }
}

fn convert_units(args: &Arguments) -> Result<Output, String> {
    let value = args.require_f64("value")?;
    let from = args.require_str("from_unit")?;
    let to = args.require_str("to_unit")?;
    let unit_type = args.str("unit_type").unwrap_or("length");

    let converted = if unit_type == "temperature" {
        let celsius = to_celsius(value, from)
            .ok_or_else(|| format!("Error converting units: Unknown temperature unit: {from}"))?;
        from_celsius(celsius, to)
            .ok_or_else(|| format!("Error converting units: Unknown temperature unit: {to}"))?
    } else {
        let factors = linear_factors(unit_type)
            .ok_or_else(|| format!("Error converting units: Unknown unit type: {unit_type}"))?;
        let factor = |unit: &str| {
            factors
                .iter()
                .find(|(name, _)| *name == unit)
                .map(|(_, f)| *f)
                .ok_or_else(|| format!("Error converting units: Unknown {unit_type} unit: {unit}"))
        };
        value * factor(from)? / factor(to)?
    };

    Ok(Output::Json(json!({
        "original_value": value,
        "original_unit": from,
        "converted_value": converted,
        "converted_unit": to,
        "unit_type": unit_type,
        "formatted_result": format!("{value} {from} = {} {to}", format_general(converted, 6)),
    })))
}

const STAT_OPERATIONS: [&str; 9] = ["all", "mean", "median", "mode", "std", "var", "min", "max", "range"];

fn statistics(args: &Arguments) -> Result<Output, String> {
    let numbers: Vec<f64> = args
        .array("numbers")
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    let operation = args.str("operation").unwrap_or("all");

    if !STAT_OPERATIONS.contains(&operation) {
        return Err(format!(
            "Error calculating statistics: Unknown operation '{operation}'. Must be one of: {}",
            STAT_OPERATIONS.join(", ")
        ));
    }
    if numbers.is_empty() {
        return Err("Error calculating statistics: Empty list of numbers".to_string());
    }

    let n = numbers.len();
    let mut sorted = numbers.clone();
    sorted.sort_by(f64::total_cmp);
    let sum: f64 = numbers.iter().sum();
    let mean = sum / n as f64;
    let wants = |op: &str| operation == "all" || operation == op;

    let mut stats = Map::new();
    if wants("mean") {
        stats.insert("mean".into(), json!(mean));
    }
    if wants("median") {
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        stats.insert("median".into(), json!(median));
    }
    if wants("mode") {
        let mut counts: Vec<(f64, usize)> = Vec::new();
        for &x in &numbers {
            match counts.iter_mut().find(|(v, _)| *v == x) {
                Some((_, count)) => *count += 1,
                None => counts.push((x, 1)),
            }
        }
        let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
        let modes: Vec<f64> = counts
            .iter()
            .filter(|(_, c)| *c == max_count)
            .map(|(v, _)| *v)
            .collect();
        let mode = if modes.len() == 1 { json!(modes[0]) } else { json!(modes) };
        stats.insert("mode".into(), mode);
        stats.insert("mode_frequency".into(), json!(max_count));
    }
    let min = sorted[0];
    let max = sorted[n - 1];
    if wants("min") {
        stats.insert("min".into(), json!(min));
    }
    if wants("max") {
        stats.insert("max".into(), json!(max));
    }
    if wants("range") {
        stats.insert("range".into(), json!(max - min));
    }
    if wants("std") || operation == "var" {
        let squares: f64 = numbers.iter().map(|x| (x - mean).powi(2)).sum();
        let variance = squares / n as f64;
        stats.insert("variance".into(), json!(variance));
        stats.insert("standard_deviation".into(), json!(variance.sqrt()));
        if n > 1 {
            let sample = squares / (n - 1) as f64;
            stats.insert("sample_variance".into(), json!(sample));
            stats.insert("sample_standard_deviation".into(), json!(sample.sqrt()));
        }
    }
    stats.insert("count".into(), json!(n));
    stats.insert("sum".into(), json!(sum));

    Ok(Output::Json(json!({
        "numbers": numbers,
        "operation": operation,
        "statistics": stats,
        "sorted_numbers": sorted,
    })))
}
