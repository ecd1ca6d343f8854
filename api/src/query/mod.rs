//! Turns a raw query string into the descriptor handed to the store.
//!
//! Conventions:
//! - `skip`, `limit`: non-negative integers (`limit=0` or no limit means unbounded)
//! - `sort=-name,age`: comma list, `-` for descending
//! - `fields=a,-b` (or `projection=`): inclusion list, `-` for exclusion
//! - `populate=customer,sessions.exercises.exercise`: relation paths to expand
//! - `filter={"age":{"$gte":18}}`: JSON clauses merged into the filter
//! - anything else is a filter clause: `k=v`, `k=a,b`, `k!=v`, `k>=v`, `k<=v`, `k>v`,
//!   `k<v`, `k` (exists), `!k` (missing), `k=/re/i`

pub mod filter;

use serde_json::{Map, Value};

pub use filter::{Condition, Filter};

use filter::{cast_value, regex_literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Ordered `(field, include)` pairs. Empty means "return everything".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection(pub Vec<(String, bool)>);

impl Projection {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn includes(&self, field: &str) -> bool {
        self.0.iter().any(|(f, include)| f == field && *include)
    }

    pub fn excludes(&self, field: &str) -> bool {
        self.0.iter().any(|(f, include)| f == field && !*include)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDescriptor {
    pub filter: Filter,
    pub skip: u64,
    pub limit: Option<u64>,
    pub sort: Vec<(String, SortDirection)>,
    pub projection: Projection,
    pub population: Vec<String>,
}

impl QueryDescriptor {
    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

pub fn translate(raw: &str) -> QueryDescriptor {
    let mut descriptor = QueryDescriptor::default();

    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (decode(k), Some(decode(v))),
            None => (decode(pair), None),
        };
        let value = value.filter(|v| !v.is_empty());

        match key.as_str() {
            "skip" => {
                if let Some(n) = value.as_deref().and_then(parse_count) {
                    descriptor.skip = n;
                }
            }
            "limit" => {
                if let Some(n) = value.as_deref().and_then(parse_count) {
                    descriptor.limit = (n > 0).then_some(n);
                }
            }
            "sort" => descriptor.sort = parse_sort(value.as_deref().unwrap_or_default()),
            "fields" | "projection" => {
                descriptor.projection = parse_projection(value.as_deref().unwrap_or_default())
            }
            "populate" => {
                for path in split_list(value.as_deref().unwrap_or_default()) {
                    if !descriptor.population.iter().any(|p| p == path) {
                        descriptor.population.push(path.to_string());
                    }
                }
            }
            "filter" => merge_json_filter(&mut descriptor.filter, value.as_deref()),
            _ => add_clause(&mut descriptor.filter, &key, value.as_deref()),
        }
    }

    descriptor
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

fn parse_count(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_sort(raw: &str) -> Vec<(String, SortDirection)> {
    split_list(raw)
        .filter_map(|item| {
            let (field, direction) = match item.strip_prefix('-') {
                Some(field) => (field, SortDirection::Desc),
                None => (item.trim_start_matches('+'), SortDirection::Asc),
            };
            (!field.is_empty()).then(|| (field.to_string(), direction))
        })
        .collect()
}

fn parse_projection(raw: &str) -> Projection {
    Projection(
        split_list(raw)
            .filter_map(|item| {
                let (field, include) = match item.strip_prefix('-') {
                    Some(field) => (field, false),
                    None => (item, true),
                };
                (!field.is_empty()).then(|| (field.to_string(), include))
            })
            .collect(),
    )
}

fn cast_list(raw: &str) -> Vec<Value> {
    raw.split(',').map(|item| cast_value(item.trim())).collect()
}

fn add_clause(filter: &mut Filter, key: &str, value: Option<&str>) {
    if key.is_empty() {
        return;
    }

    if let Some(field) = key.strip_suffix('!') {
        let raw = value.unwrap_or_default();
        let condition = if raw.contains(',') {
            Condition::Nin(cast_list(raw))
        } else {
            Condition::Ne(cast_value(raw))
        };
        filter.push(field, condition);
        return;
    }
    if let Some(field) = key.strip_suffix('>') {
        filter.push(field, Condition::Gte(cast_value(value.unwrap_or_default())));
        return;
    }
    if let Some(field) = key.strip_suffix('<') {
        filter.push(field, Condition::Lte(cast_value(value.unwrap_or_default())));
        return;
    }

    let Some(raw) = value else {
        // `a>5` and `a<5` arrive without `=`, so the operator sits inside the key
        if let Some((field, bound)) = key.split_once('>') {
            filter.push(field, Condition::Gt(cast_value(bound)));
        } else if let Some((field, bound)) = key.split_once('<') {
            filter.push(field, Condition::Lt(cast_value(bound)));
        } else if let Some(field) = key.strip_prefix('!') {
            filter.push(field, Condition::Exists(false));
        } else {
            filter.push(key, Condition::Exists(true));
        }
        return;
    };

    let condition = if let Some((pattern, flags)) = regex_literal(raw) {
        Condition::Regex { pattern, flags }
    } else if raw.starts_with("string(") {
        Condition::Eq(cast_value(raw))
    } else if raw.contains(',') {
        Condition::In(cast_list(raw))
    } else {
        Condition::Eq(cast_value(raw))
    };
    filter.push(key, condition);
}

fn merge_json_filter(filter: &mut Filter, raw: Option<&str>) {
    let parsed = raw.and_then(|r| serde_json::from_str::<Value>(r).ok());
    let Some(Value::Object(clauses)) = parsed else {
        filter.push(
            "filter",
            Condition::Unsupported("filter must be a JSON object".to_string()),
        );
        return;
    };

    for (field, operand) in clauses {
        if field.starts_with('$') {
            filter.push(field.clone(), Condition::Unsupported(field));
            continue;
        }
        match operand {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
                for condition in operator_conditions(&ops) {
                    filter.push(field.clone(), condition);
                }
            }
            other => filter.push(field, Condition::Eq(other)),
        }
    }
}

fn operator_conditions(ops: &Map<String, Value>) -> Vec<Condition> {
    let mut conditions = Vec::new();
    for (op, operand) in ops {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" | "$nin" => match operand.as_array() {
                Some(items) if op == "$in" => Condition::In(items.clone()),
                Some(items) => Condition::Nin(items.clone()),
                None => Condition::Unsupported(format!("{} expects an array", op)),
            },
            "$exists" => Condition::Exists(operand.as_bool().unwrap_or(true)),
            "$regex" => match operand.as_str() {
                Some(pattern) => Condition::Regex {
                    pattern: pattern.to_string(),
                    flags: ops
                        .get("$options")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                },
                None => Condition::Unsupported("$regex expects a string".to_string()),
            },
            "$options" => continue,
            other => Condition::Unsupported(other.to_string()),
        };
        conditions.push(condition);
    }
    conditions
}
