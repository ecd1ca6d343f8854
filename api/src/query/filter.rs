use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex { pattern: String, flags: String },
    /// Kept so the store can reject it instead of silently widening the result.
    Unsupported(String),
}

/// Field path to the conditions it must satisfy; every condition must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: BTreeMap<String, Vec<Condition>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().with("_id", Condition::Eq(Value::String(id.to_string())))
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.push(field, condition);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, condition: Condition) {
        self.clauses.entry(field.into()).or_default().push(condition);
    }

    pub fn clauses(&self) -> &BTreeMap<String, Vec<Condition>> {
        &self.clauses
    }

    pub fn conditions(&self, field: &str) -> &[Condition] {
        self.clauses.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The id when this filter is exactly `_id == <string>`.
    pub fn id_lookup(&self) -> Option<&str> {
        if self.clauses.len() != 1 {
            return None;
        }
        match self.conditions("_id") {
            [Condition::Eq(Value::String(id))] => Some(id),
            _ => None,
        }
    }

    pub fn compile(&self) -> Result<Matcher<'_>, String> {
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for (field, conditions) in &self.clauses {
            let mut tests = Vec::with_capacity(conditions.len());
            for condition in conditions {
                let test = match condition {
                    Condition::Regex { pattern, flags } => {
                        Test::Regex(build_regex(pattern, flags).map_err(|e| {
                            format!("Invalid regular expression for `{}`: {}", field, e)
                        })?)
                    }
                    Condition::Unsupported(what) => {
                        return Err(format!("Unsupported filter on `{}`: {}", field, what))
                    }
                    other => Test::Plain(other),
                };
                tests.push(test);
            }
            clauses.push((field.as_str(), tests));
        }
        Ok(Matcher { clauses })
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
}

enum Test<'a> {
    Plain(&'a Condition),
    Regex(Regex),
}

/// A filter with its regular expressions compiled, ready to run over documents.
pub struct Matcher<'a> {
    clauses: Vec<(&'a str, Vec<Test<'a>>)>,
}

impl Matcher<'_> {
    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        self.clauses.iter().all(|(field, tests)| {
            let value = lookup(doc, field);
            tests.iter().all(|test| test.passes(value))
        })
    }
}

impl Test<'_> {
    fn passes(&self, value: Option<&Value>) -> bool {
        match self {
            Test::Regex(re) => any_element(value, |v| v.as_str().is_some_and(|s| re.is_match(s))),
            Test::Plain(condition) => match condition {
                Condition::Eq(expected) => equals(value, expected),
                Condition::Ne(expected) => !equals(value, expected),
                Condition::Gt(bound) => ordered(value, bound, |o| o == Ordering::Greater),
                Condition::Gte(bound) => ordered(value, bound, |o| o != Ordering::Less),
                Condition::Lt(bound) => ordered(value, bound, |o| o == Ordering::Less),
                Condition::Lte(bound) => ordered(value, bound, |o| o != Ordering::Greater),
                Condition::In(options) => options.iter().any(|o| equals(value, o)),
                Condition::Nin(options) => !options.iter().any(|o| equals(value, o)),
                Condition::Exists(expected) => value.is_some() == *expected,
                Condition::Regex { .. } | Condition::Unsupported(_) => false,
            },
        }
    }
}

/// Resolves a dotted path through nested objects.
pub fn lookup<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn any_element(value: Option<&Value>, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
        None => false,
    }
}

fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match (value, expected) {
        (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
        (Some(Value::Array(items)), _) if !expected.is_array() => {
            items.iter().any(|item| scalar_eq(item, expected))
        }
        (Some(v), _) => scalar_eq(v, expected),
        (None, _) => false,
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn ordered(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    any_element(value, |v| compare_same_type(v, bound).is_some_and(&accept))
}

fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting: missing/null, numbers, strings, objects, arrays, booleans.
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }

    match (a, b) {
        (Some(x), Some(y)) => compare_same_type(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Coerces a query-string literal: booleans, null, numbers and `string(...)`.
pub fn cast_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Some(inner) = raw.strip_prefix("string(").and_then(|r| r.strip_suffix(')')) {
        return Value::String(inner.to_string());
    }
    if is_number_literal(raw) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::from(n);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

fn is_number_literal(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let (int, frac) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}

/// Splits `/pattern/flags` into its parts.
pub fn regex_literal(raw: &str) -> Option<(String, String)> {
    let body = raw.strip_prefix('/')?;
    let (pattern, flags) = body.rsplit_once('/')?;
    if pattern.is_empty() || !flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'g')) {
        return None;
    }
    Some((pattern.to_string(), flags.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn casting_recognises_scalars() {
        assert_eq!(cast_value("true"), json!(true));
        assert_eq!(cast_value("null"), Value::Null);
        assert_eq!(cast_value("42"), json!(42));
        assert_eq!(cast_value("-1.5"), json!(-1.5));
        assert_eq!(cast_value("string(42)"), json!("42"));
        assert_eq!(cast_value("1e5"), json!("1e5"));
        assert_eq!(cast_value("Toulouse"), json!("Toulouse"));
    }

    #[test]
    fn regex_literals_are_detected() {
        assert_eq!(
            regex_literal("/^jo/i"),
            Some(("^jo".to_string(), "i".to_string()))
        );
        assert_eq!(regex_literal("/plain"), None);
        assert_eq!(regex_literal("plain"), None);
    }

    #[test]
    fn comparisons_only_apply_to_matching_types() {
        let filter = Filter::new()
            .with("age", Condition::Gte(json!(18)))
            .with("age", Condition::Lt(json!(30)));
        let matcher = filter.compile().unwrap();
        assert!(matcher.matches(&doc(json!({"age": 18}))));
        assert!(!matcher.matches(&doc(json!({"age": 30}))));
        assert!(!matcher.matches(&doc(json!({"age": "20"}))));
        assert!(!matcher.matches(&doc(json!({}))));
    }

    #[test]
    fn equality_reaches_into_arrays_and_nested_objects() {
        let filter = Filter::new()
            .with("steps", Condition::Eq(json!("warm up")))
            .with("address.city", Condition::Eq(json!("Toulouse")));
        let matcher = filter.compile().unwrap();
        assert!(matcher.matches(&doc(json!({
            "steps": ["warm up", "run"],
            "address": {"city": "Toulouse"}
        }))));
        assert!(!matcher.matches(&doc(json!({
            "steps": ["run"],
            "address": {"city": "Toulouse"}
        }))));
    }

    #[test]
    fn membership_and_existence() {
        let filter = Filter::new()
            .with("status", Condition::In(vec![json!("ACTIVE"), json!("PENDING")]))
            .with("phone", Condition::Exists(false));
        let matcher = filter.compile().unwrap();
        assert!(matcher.matches(&doc(json!({"status": "PENDING"}))));
        assert!(!matcher.matches(&doc(json!({"status": "DISABLED"}))));
        assert!(!matcher.matches(&doc(json!({"status": "ACTIVE", "phone": "06"}))));
    }

    #[test]
    fn regex_honours_case_flag() {
        let filter = Filter::new().with(
            "name",
            Condition::Regex {
                pattern: "^squat".to_string(),
                flags: "i".to_string(),
            },
        );
        let matcher = filter.compile().unwrap();
        assert!(matcher.matches(&doc(json!({"name": "Squats"}))));
        assert!(!matcher.matches(&doc(json!({"name": "Lunges"}))));
    }

    #[test]
    fn bad_regex_and_unsupported_operators_fail_to_compile() {
        let bad = Filter::new().with(
            "name",
            Condition::Regex {
                pattern: "(".to_string(),
                flags: String::new(),
            },
        );
        assert!(bad.compile().is_err());

        let unsupported = Filter::new().with("$or", Condition::Unsupported("$or".to_string()));
        assert!(unsupported.compile().is_err());
    }

    #[test]
    fn id_lookup_only_for_plain_id_filters() {
        assert_eq!(Filter::by_id("abc").id_lookup(), Some("abc"));
        let wider = Filter::by_id("abc").with("name", Condition::Exists(true));
        assert_eq!(wider.id_lookup(), None);
    }

    #[test]
    fn sort_order_puts_missing_first() {
        assert_eq!(sort_cmp(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(sort_cmp(Some(&json!(1)), Some(&json!("a"))), Ordering::Less);
    }
}
