//! Query descriptors
//!
//! Structured representation of a database query (ordering + range filters
//! + limit) and its translation into backend REST parameters. Parsing and
//! validation happen here, before any backend call; the listener and the
//! one-shot read paths both consume the rendered parameter list.

use crate::error::DatabaseError;
use serde_json::Value;

/// Ordering clause of a query
#[derive(Debug, Clone, PartialEq)]
pub enum OrderBy {
    /// Order children by key
    Key,
    /// Order children by value
    Value,
    /// Order children by priority
    Priority,
    /// Order children by the value of a named child
    Child(String),
}

impl OrderBy {
    /// Parse the wire shape `{key}|{value}|{priority}|{child: "name"}`
    ///
    /// Presence of the marker field selects the ordering; `child` must
    /// carry the child path as a string.
    pub fn from_value(raw: &Value) -> Result<Self, DatabaseError> {
        let Some(object) = raw.as_object() else {
            return Err(DatabaseError::InvalidQuery("order is invalid".to_string()));
        };

        if object.contains_key("key") {
            Ok(OrderBy::Key)
        } else if object.contains_key("value") {
            Ok(OrderBy::Value)
        } else if object.contains_key("priority") {
            Ok(OrderBy::Priority)
        } else if let Some(child) = object.get("child").and_then(Value::as_str) {
            Ok(OrderBy::Child(child.to_string()))
        } else {
            Err(DatabaseError::InvalidQuery("order is invalid".to_string()))
        }
    }

    /// Render the `orderBy` REST parameter value
    pub fn to_param(&self) -> String {
        match self {
            OrderBy::Key => "\"$key\"".to_string(),
            OrderBy::Value => "\"$value\"".to_string(),
            OrderBy::Priority => "\"$priority\"".to_string(),
            OrderBy::Child(name) => Value::String(name.clone()).to_string(),
        }
    }

    /// Sort key of one child under this ordering
    pub(crate) fn sort_key(&self, key: &str, value: &Value) -> ChildSortKey {
        match self {
            OrderBy::Key => ChildSortKey::of_key(key),
            OrderBy::Value => ChildSortKey::of_value(value),
            OrderBy::Priority => {
                let priority = value.get(".priority").cloned().unwrap_or(Value::Null);
                ChildSortKey::of_value(&priority)
            }
            OrderBy::Child(name) => {
                let child = value.get(name).cloned().unwrap_or(Value::Null);
                ChildSortKey::of_value(&child)
            }
        }
    }
}

/// Range filter bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Include children at or after the value
    StartAt,
    /// Include children at or before the value
    EndAt,
    /// Include children equal to the value
    EqualTo,
}

impl Bound {
    /// REST parameter name for this bound
    pub fn param_name(&self) -> &'static str {
        match self {
            Bound::StartAt => "startAt",
            Bound::EndAt => "endAt",
            Bound::EqualTo => "equalTo",
        }
    }
}

/// Comparison value of a range filter
///
/// The backend call is chosen by the runtime type of the supplied value;
/// anything that is not a number or boolean compares as a string.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Numeric comparison
    Number(f64),
    /// Boolean comparison
    Bool(bool),
    /// String comparison
    Text(String),
}

impl FilterValue {
    fn from_value(raw: &Value) -> Self {
        match raw {
            Value::Number(n) => FilterValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::Bool(b) => FilterValue::Bool(*b),
            Value::String(s) => FilterValue::Text(s.clone()),
            other => FilterValue::Text(other.to_string()),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FilterValue::Number(n) => serde_json::json!(n),
            FilterValue::Bool(b) => Value::Bool(*b),
            FilterValue::Text(s) => Value::String(s.clone()),
        }
    }
}

/// One range filter: a bound, a typed value, an optional child-key
/// qualifier for breaking ties
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    /// Which bound this filter constrains
    pub bound: Bound,
    /// Comparison value
    pub value: FilterValue,
    /// Child key breaking ties among equal values
    pub key: Option<String>,
}

impl RangeFilter {
    /// Parse the wire shape `{startAt|endAt|equalTo: value, key?: "name"}`
    ///
    /// Exactly one bound must be present; an empty key qualifier counts as
    /// absent.
    pub fn from_value(raw: &Value) -> Result<Self, DatabaseError> {
        let Some(object) = raw.as_object() else {
            return Err(DatabaseError::InvalidQuery("includes are invalid".to_string()));
        };

        let key = object
            .get("key")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .map(str::to_string);

        for (bound, field) in [
            (Bound::StartAt, "startAt"),
            (Bound::EndAt, "endAt"),
            (Bound::EqualTo, "equalTo"),
        ] {
            if let Some(value) = object.get(field).filter(|v| !v.is_null()) {
                return Ok(RangeFilter {
                    bound,
                    value: FilterValue::from_value(value),
                    key,
                });
            }
        }

        Err(DatabaseError::InvalidQuery("includes are invalid".to_string()))
    }

    /// Render the REST parameter value
    ///
    /// A bare value without a qualifier; with one, the cursor encoding
    /// `[value, key]` of the realtime protocol.
    pub fn to_param(&self) -> (String, String) {
        let value = match &self.key {
            None => self.value.to_json().to_string(),
            Some(key) => Value::Array(vec![self.value.to_json(), Value::String(key.clone())])
                .to_string(),
        };
        (self.bound.param_name().to_string(), value)
    }
}

/// Limit clause of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Keep the first n children under the active ordering
    First(u32),
    /// Keep the last n children under the active ordering
    Last(u32),
}

impl Limit {
    /// Parse the wire shape `{first: n}` or `{last: n}`
    ///
    /// An object carrying neither marker means no limit.
    pub fn from_value(raw: &Value) -> Result<Option<Self>, DatabaseError> {
        let Some(object) = raw.as_object() else {
            return Err(DatabaseError::InvalidQuery("limit is invalid".to_string()));
        };

        for (field, build) in [
            ("first", Limit::First as fn(u32) -> Limit),
            ("last", Limit::Last as fn(u32) -> Limit),
        ] {
            if let Some(value) = object.get(field) {
                let n = value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| DatabaseError::InvalidQuery("limit is invalid".to_string()))?;
                return Ok(Some(build(n)));
            }
        }

        Ok(None)
    }

    /// Render the REST parameter
    pub fn to_param(&self) -> (String, String) {
        match self {
            Limit::First(n) => ("limitToFirst".to_string(), n.to_string()),
            Limit::Last(n) => ("limitToLast".to_string(), n.to_string()),
        }
    }
}

/// Full query descriptor: ordering, range filters in caller order, limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    /// Ordering clause, applied first
    pub order_by: Option<OrderBy>,
    /// Range filters, applied in caller-supplied order
    pub filters: Vec<RangeFilter>,
    /// Limit clause, applied last
    pub limit: Option<Limit>,
}

impl QuerySpec {
    /// Parse a descriptor from its wire parts
    ///
    /// `order_by` and `limit` are optional; `includes` is the (possibly
    /// empty) filter list. Structural problems surface here; the
    /// ordering-before-filters invariant surfaces in [`validate`](Self::validate).
    pub fn from_parts(
        order_by: Option<&Value>,
        includes: &[Value],
        limit: Option<&Value>,
    ) -> Result<Self, DatabaseError> {
        let order_by = match order_by.filter(|v| !v.is_null()) {
            None => None,
            Some(raw) => Some(OrderBy::from_value(raw)?),
        };

        let filters = includes
            .iter()
            .map(RangeFilter::from_value)
            .collect::<Result<Vec<_>, _>>()?;

        let limit = match limit.filter(|v| !v.is_null()) {
            None => None,
            Some(raw) => Limit::from_value(raw)?,
        };

        let spec = QuerySpec {
            order_by,
            filters,
            limit,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the ordering invariant
    ///
    /// Range filters and limits only have meaning under an ordering; a
    /// descriptor carrying either without one is a caller error.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.order_by.is_none() && (!self.filters.is_empty() || self.limit.is_some()) {
            return Err(DatabaseError::InvalidQuery(
                "ordering must be specified before filters or limits".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the backend REST parameters: ordering, then each filter in
    /// order, then the limit
    pub fn to_params(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        self.validate()?;

        let mut params = Vec::new();
        if let Some(order_by) = &self.order_by {
            params.push(("orderBy".to_string(), order_by.to_param()));
        }
        for filter in &self.filters {
            params.push(filter.to_param());
        }
        if let Some(limit) = &self.limit {
            params.push(limit.to_param());
        }
        Ok(params)
    }
}

/// Sort key of a child under an active ordering
///
/// Value classes compare as null < false < true < numbers < strings <
/// objects; ties break on the child key, with integer-like keys first.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChildSortKey {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Object,
}

impl ChildSortKey {
    fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => ChildSortKey::Null,
            Value::Bool(b) => ChildSortKey::Bool(*b),
            Value::Number(n) => ChildSortKey::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => ChildSortKey::Text(s.clone()),
            _ => ChildSortKey::Object,
        }
    }

    fn of_key(key: &str) -> Self {
        match key.parse::<i64>() {
            Ok(n) => ChildSortKey::Number(n as f64),
            Err(_) => ChildSortKey::Text(key.to_string()),
        }
    }

    fn class(&self) -> u8 {
        match self {
            ChildSortKey::Null => 0,
            ChildSortKey::Bool(false) => 1,
            ChildSortKey::Bool(true) => 2,
            ChildSortKey::Number(_) => 3,
            ChildSortKey::Text(_) => 4,
            ChildSortKey::Object => 5,
        }
    }

    fn compare(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (ChildSortKey::Number(a), ChildSortKey::Number(b)) => a.total_cmp(b),
            (ChildSortKey::Text(a), ChildSortKey::Text(b)) => a.cmp(b),
            (a, b) => a.class().cmp(&b.class()),
        }
    }
}

/// Keys of a children map in query order
///
/// Without an ordering, children order by key the way the backend orders
/// them: integer-like keys numerically first, then the rest
/// lexicographically.
pub(crate) fn order_children(
    order_by: Option<&OrderBy>,
    children: &serde_json::Map<String, Value>,
) -> Vec<String> {
    let order = order_by.unwrap_or(&OrderBy::Key);
    let mut keys: Vec<&String> = children.keys().collect();
    keys.sort_by(|a, b| {
        let ka = order.sort_key(a, &children[a.as_str()]);
        let kb = order.sort_key(b, &children[b.as_str()]);
        ka.compare(&kb)
            .then_with(|| ChildSortKey::of_key(a).compare(&ChildSortKey::of_key(b)))
            .then_with(|| a.cmp(b))
    });
    keys.into_iter().cloned().collect()
}
