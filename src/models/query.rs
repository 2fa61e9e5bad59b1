//! Query descriptors: selection filters and sort specifications.
//!
//! Descriptors are plain data. Translating them into a concrete query is the
//! job of each backend; the orchestrator passes them through untouched.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::RecordId;

/// Comparison operator of a filter constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// `field == value`.
    Equal,
    /// `field != value`.
    NotEqual,
    /// `field > value`.
    GreaterThan,
    /// `field < value`.
    LessThan,
    /// `field >= value`.
    GreaterThanOrEqual,
    /// `field <= value`.
    LessThanOrEqual,
}

impl FilterType {
    /// Returns the SQL operator for this filter type.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
        }
    }

    /// Returns true if `field.cmp(value)` satisfies this operator.
    #[must_use]
    pub const fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => matches!(ordering, Ordering::Equal),
            Self::NotEqual => !matches!(ordering, Ordering::Equal),
            Self::GreaterThan => matches!(ordering, Ordering::Greater),
            Self::LessThan => matches!(ordering, Ordering::Less),
            Self::GreaterThanOrEqual => !matches!(ordering, Ordering::Less),
            Self::LessThanOrEqual => !matches!(ordering, Ordering::Greater),
        }
    }
}

/// A single `(operator, value)` constraint on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// The comparison operator.
    pub filter_type: FilterType,
    /// The value compared against.
    pub value: Value,
}

impl Condition {
    /// Returns true if `field` satisfies this condition.
    ///
    /// Follows SQL null rules, with a missing field read as `null`:
    /// `Equal null` matches only null, `NotEqual null` matches any present
    /// non-null value, and every other comparison involving `null` fails.
    #[must_use]
    pub fn matches(&self, field: Option<&Value>) -> bool {
        let actual = field.unwrap_or(&Value::Null);
        match (&self.value, self.filter_type) {
            (Value::Null, FilterType::Equal) => actual.is_null(),
            (Value::Null, FilterType::NotEqual) => !actual.is_null(),
            (Value::Null, _) => false,
            _ if actual.is_null() => false,
            _ => compare_values(actual, &self.value)
                .is_some_and(|ordering| self.filter_type.accepts(ordering)),
        }
    }
}

/// Orders two JSON values of the same kind.
///
/// Numbers compare numerically, strings lexically, booleans with
/// `false < true`. Values of different kinds are unordered.
#[must_use]
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Selection predicate: AND-combined constraints keyed by field name.
///
/// At most one constraint is kept per field. Adding a second constraint on
/// the same field replaces the first, including through [`Filter::and_each`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    conditions: BTreeMap<String, Condition>,
}

impl Filter {
    /// Creates an empty filter (matches all).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            conditions: BTreeMap::new(),
        }
    }

    /// Creates a filter with one equality constraint.
    #[must_use]
    pub fn equal(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().and_eq(key, value)
    }

    /// Creates a filter with one constraint.
    #[must_use]
    pub fn with(key: impl Into<String>, filter_type: FilterType, value: impl Into<Value>) -> Self {
        Self::new().and(key, filter_type, value)
    }

    /// Creates a filter matching a single record id.
    #[must_use]
    pub fn by_id(id: RecordId) -> Self {
        Self::equal("id", id)
    }

    /// Adds an equality constraint.
    #[must_use]
    pub fn and_eq(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(key, FilterType::Equal, value)
    }

    /// Adds a constraint, replacing any previous constraint on `key`.
    #[must_use]
    pub fn and(
        mut self,
        key: impl Into<String>,
        filter_type: FilterType,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.insert(
            key.into(),
            Condition {
                filter_type,
                value: value.into(),
            },
        );
        self
    }

    /// Adds one constraint per value on the same key.
    ///
    /// Only the last value survives.
    #[must_use]
    pub fn and_each<V, I>(self, key: impl Into<String>, filter_type: FilterType, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let key = key.into();
        values
            .into_iter()
            .fold(self, |filter, value| filter.and(key.clone(), filter_type, value))
    }

    /// Returns the constraint on `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Condition> {
        self.conditions.get(key)
    }

    /// Iterates over constraints in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(k, c)| (k.as_str(), c))
    }

    /// Returns the number of constrained fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Returns true if the filter is empty (matches all).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Direction of a sort rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortType {
    /// Returns the SQL keyword for this direction.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    /// Applies this direction to an ascending ordering.
    #[must_use]
    pub const fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

/// Ordered list of `(field, direction)` sort rules.
///
/// Rules apply in insertion order; later rules break ties of earlier ones.
/// An empty list means unordered. The default sorts by ascending `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortingMode {
    entries: Vec<(String, SortType)>,
}

impl Default for SortingMode {
    fn default() -> Self {
        Self::with("id", SortType::Ascending)
    }
}

impl SortingMode {
    /// Creates an empty sort specification.
    #[must_use]
    pub const fn unordered() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates a sort specification with a single rule.
    #[must_use]
    pub fn with(key: impl Into<String>, sort_type: SortType) -> Self {
        Self::unordered().and(key, sort_type)
    }

    /// Creates one rule per key, all with the same direction.
    #[must_use]
    pub fn from_keys<K, I>(keys: I, sort_type: SortType) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        keys.into_iter()
            .fold(Self::unordered(), |mode, key| mode.and(key, sort_type))
    }

    /// Pairs keys with directions by position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the slices have different lengths.
    pub fn zip<K: AsRef<str>>(keys: &[K], sort_types: &[SortType]) -> Result<Self> {
        if keys.len() != sort_types.len() {
            return Err(Error::InvalidInput(format!(
                "sort keys ({}) and sort types ({}) must have the same length",
                keys.len(),
                sort_types.len()
            )));
        }
        Ok(keys
            .iter()
            .zip(sort_types)
            .fold(Self::unordered(), |mode, (key, sort_type)| {
                mode.and(key.as_ref(), *sort_type)
            }))
    }

    /// Appends a rule applied after the existing ones.
    #[must_use]
    pub fn and(mut self, key: impl Into<String>, sort_type: SortType) -> Self {
        self.entries.push((key.into(), sort_type));
        self
    }

    /// Returns the sort rules in order.
    #[must_use]
    pub fn entries(&self) -> &[(String, SortType)] {
        &self.entries
    }

    /// Returns true if no rule is set.
    #[must_use]
    pub fn is_unordered(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_filter_last_write_wins() {
        let filter = Filter::equal("name", "a").and("name", FilterType::NotEqual, "b");
        assert_eq!(filter.len(), 1);
        let condition = filter.get("name");
        assert_eq!(
            condition.map(|c| c.filter_type),
            Some(FilterType::NotEqual)
        );
        assert_eq!(condition.map(|c| c.value.clone()), Some(json!("b")));
    }

    #[test]
    fn test_filter_and_each_keeps_last_value() {
        let filter = Filter::new().and_each("score", FilterType::GreaterThan, [1, 5, 3]);
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get("score").map(|c| c.value.clone()), Some(json!(3)));
    }

    #[test]
    fn test_filter_empty() {
        assert!(Filter::new().is_empty());
        assert!(!Filter::by_id(7).is_empty());
        assert_eq!(Filter::default(), Filter::new());
    }

    #[test_case(FilterType::Equal, json!(5), true ; "equal")]
    #[test_case(FilterType::NotEqual, json!(5), false ; "not equal")]
    #[test_case(FilterType::GreaterThan, json!(4), true ; "greater than")]
    #[test_case(FilterType::LessThan, json!(4), false ; "less than")]
    #[test_case(FilterType::GreaterThanOrEqual, json!(5), true ; "greater or equal")]
    #[test_case(FilterType::LessThanOrEqual, json!(4.5), false ; "less or equal float")]
    fn test_condition_matches(filter_type: FilterType, value: Value, expected: bool) {
        let condition = Condition { filter_type, value };
        assert_eq!(condition.matches(Some(&json!(5))), expected);
    }

    #[test]
    fn test_condition_missing_field_never_matches_a_value() {
        let condition = Condition {
            filter_type: FilterType::NotEqual,
            value: json!(1),
        };
        assert!(!condition.matches(None));
        assert!(!condition.matches(Some(&Value::Null)));
    }

    #[test_case(FilterType::Equal, None, true ; "equal null matches missing")]
    #[test_case(FilterType::Equal, Some(Value::Null), true ; "equal null matches null")]
    #[test_case(FilterType::Equal, Some(json!(5)), false ; "equal null skips value")]
    #[test_case(FilterType::NotEqual, None, false ; "not equal null skips missing")]
    #[test_case(FilterType::NotEqual, Some(Value::Null), false ; "not equal null skips null")]
    #[test_case(FilterType::NotEqual, Some(json!(5)), true ; "not equal null matches value")]
    #[test_case(FilterType::GreaterThan, Some(Value::Null), false ; "ordering null never matches")]
    fn test_condition_null_value(filter_type: FilterType, field: Option<Value>, expected: bool) {
        let condition = Condition {
            filter_type,
            value: Value::Null,
        };
        assert_eq!(condition.matches(field.as_ref()), expected);
    }

    #[test]
    fn test_compare_values_mixed_kinds_unordered() {
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
        assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(true), &json!(false)), Some(Ordering::Greater));
    }

    #[test]
    fn test_sorting_mode_default_is_id_ascending() {
        let mode = SortingMode::default();
        assert_eq!(mode.entries(), &[("id".to_string(), SortType::Ascending)]);
        assert!(SortingMode::unordered().is_unordered());
    }

    #[test]
    fn test_sorting_mode_zip_length_mismatch() {
        let result = SortingMode::zip(&["a", "b"], &[SortType::Ascending]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let mode = SortingMode::zip(&["a", "b"], &[SortType::Descending, SortType::Ascending]);
        assert_eq!(
            mode.ok().map(|m| m.entries().len()),
            Some(2)
        );
    }

    #[test]
    fn test_sorting_mode_from_keys() {
        let mode = SortingMode::from_keys(["name", "id"], SortType::Descending);
        assert_eq!(
            mode.entries(),
            &[
                ("name".to_string(), SortType::Descending),
                ("id".to_string(), SortType::Descending)
            ]
        );
    }

    #[test]
    fn test_sort_type_apply() {
        assert_eq!(SortType::Descending.apply(Ordering::Less), Ordering::Greater);
        assert_eq!(SortType::Ascending.apply(Ordering::Less), Ordering::Less);
    }
}
