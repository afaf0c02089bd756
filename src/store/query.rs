//! Query description shared by every store
//!
//! A [`Query`] is plain data: the HTTP store renders it as PostgREST
//! parameters, the memory store evaluates it directly.

use serde_json::Value;
use std::cmp::Ordering;

/// Operator for filter expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Neq,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
    /// Like (case sensitive)
    Like,
    /// Like (case insensitive)
    ILike,
    /// Is (null checks)
    Is,
    /// In a list of values
    In,
}

impl FilterOperator {
    /// Convert the operator to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Like => "like",
            FilterOperator::ILike => "ilike",
            FilterOperator::Is => "is",
            FilterOperator::In => "in",
        }
    }
}

/// Right-hand side of a filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Single(String),
    List(Vec<String>),
    Null,
}

/// One `column op value` condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl Filter {
    /// PostgREST rendering, e.g. `eq.pending` or `in.(1,2)`
    pub fn to_param(&self) -> String {
        let value = match &self.value {
            FilterValue::Single(value) => value.clone(),
            FilterValue::List(values) => format!("({})", values.join(",")),
            FilterValue::Null => "null".to_string(),
        };
        format!("{}.{}", self.operator.as_str(), value)
    }

    /// Evaluate the filter against a JSON row
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(&self.column).unwrap_or(&Value::Null);
        match (&self.operator, &self.value) {
            (FilterOperator::Is, FilterValue::Null) => field.is_null(),
            (FilterOperator::Neq, FilterValue::Null) => !field.is_null(),
            (FilterOperator::In, FilterValue::List(values)) => values
                .iter()
                .any(|value| compare(field, value) == Some(Ordering::Equal)),
            (FilterOperator::Like, FilterValue::Single(pattern)) => field
                .as_str()
                .map(|text| like(text, pattern))
                .unwrap_or(false),
            (FilterOperator::ILike, FilterValue::Single(pattern)) => field
                .as_str()
                .map(|text| like(&text.to_lowercase(), &pattern.to_lowercase()))
                .unwrap_or(false),
            (operator, FilterValue::Single(value)) => {
                let ordering = compare(field, value);
                match operator {
                    FilterOperator::Eq => ordering == Some(Ordering::Equal),
                    FilterOperator::Neq => ordering != Some(Ordering::Equal),
                    FilterOperator::Gt => ordering == Some(Ordering::Greater),
                    FilterOperator::Gte => {
                        matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
                    }
                    FilterOperator::Lt => ordering == Some(Ordering::Less),
                    FilterOperator::Lte => {
                        matches!(ordering, Some(Ordering::Less | Ordering::Equal))
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

/// Compare a JSON field with a filter literal the way the database would.
pub(crate) fn compare(field: &Value, literal: &str) -> Option<Ordering> {
    match field {
        Value::Number(number) => {
            let left = number.as_f64()?;
            let right: f64 = literal.parse().ok()?;
            left.partial_cmp(&right)
        }
        Value::String(text) => Some(text.as_str().cmp(literal)),
        Value::Bool(flag) => {
            let right: bool = literal.parse().ok()?;
            Some(flag.cmp(&right))
        }
        _ => None,
    }
}

/// Order two JSON fields; nulls sort last.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// SQL `LIKE` with `%` (any run) and `_` (any single char); `*` is accepted
/// for `%` as PostgREST does in URLs.
fn like(text: &str, pattern: &str) -> bool {
    fn go(text: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((&c, rest)) => match c {
                '%' | '*' => (0..=text.len()).any(|skip| go(&text[skip..], rest)),
                '_' => !text.is_empty() && go(&text[1..], rest),
                c => text.first() == Some(&c) && go(&text[1..], rest),
            },
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    go(&text, &pattern)
}

/// One ordering key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Embedded relation in a projection, e.g. `pets(name, species)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub table: String,
    pub columns: Vec<String>,
}

/// Parsed `select` expression
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Projection {
    /// Plain columns; `*` stands for all of them
    pub columns: Vec<String>,
    pub embeds: Vec<Embed>,
}

impl Projection {
    pub fn parse(select: &str) -> Self {
        let mut projection = Projection::default();
        for item in split_top_level(select) {
            match item.find('(') {
                Some(open) if item.ends_with(')') => projection.embeds.push(Embed {
                    table: item[..open].trim().to_string(),
                    columns: split_top_level(&item[open + 1..item.len() - 1]),
                }),
                _ => projection.columns.push(item),
            }
        }
        projection
    }

    pub fn selects_all(&self) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == "*")
    }
}

fn split_top_level(input: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in input.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => items.push(std::mem::take(&mut current)),
            c if c.is_whitespace() => {}
            c => current.push(c),
        }
    }
    items.push(current);
    items.into_iter().filter(|item| !item.is_empty()).collect()
}

/// Select / update / delete conditions on one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    columns: String,
    filters: Vec<Filter>,
    order: Vec<Order>,
    limit: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    /// Select all columns, no conditions
    pub fn new() -> Self {
        Self {
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Select specific columns (PostgREST syntax, embeds allowed)
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    fn filter(mut self, column: &str, operator: FilterOperator, value: FilterValue) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            operator,
            value,
        });
        self
    }

    /// Filter rows where column equals a value
    pub fn eq<T: ToString>(self, column: &str, value: T) -> Self {
        self.filter(column, FilterOperator::Eq, FilterValue::Single(value.to_string()))
    }

    /// Filter rows where column does not equal a value
    pub fn neq<T: ToString>(self, column: &str, value: T) -> Self {
        self.filter(column, FilterOperator::Neq, FilterValue::Single(value.to_string()))
    }

    /// Filter rows where column is greater than a value
    pub fn gt<T: ToString>(self, column: &str, value: T) -> Self {
        self.filter(column, FilterOperator::Gt, FilterValue::Single(value.to_string()))
    }

    /// Filter rows where column is greater than or equal to a value
    pub fn gte<T: ToString>(self, column: &str, value: T) -> Self {
        self.filter(column, FilterOperator::Gte, FilterValue::Single(value.to_string()))
    }

    /// Filter rows where column is less than a value
    pub fn lt<T: ToString>(self, column: &str, value: T) -> Self {
        self.filter(column, FilterOperator::Lt, FilterValue::Single(value.to_string()))
    }

    /// Filter rows where column is less than or equal to a value
    pub fn lte<T: ToString>(self, column: &str, value: T) -> Self {
        self.filter(column, FilterOperator::Lte, FilterValue::Single(value.to_string()))
    }

    /// Filter rows where column matches a pattern (case sensitive)
    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.filter(column, FilterOperator::Like, FilterValue::Single(pattern.to_string()))
    }

    /// Filter rows where column matches a pattern (case insensitive)
    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.filter(column, FilterOperator::ILike, FilterValue::Single(pattern.to_string()))
    }

    /// Filter rows where column is in a list of values
    pub fn in_list<T: ToString>(self, column: &str, values: &[T]) -> Self {
        let values = values.iter().map(ToString::to_string).collect();
        self.filter(column, FilterOperator::In, FilterValue::List(values))
    }

    /// Filter rows where column is null
    pub fn is_null(self, column: &str) -> Self {
        self.filter(column, FilterOperator::Is, FilterValue::Null)
    }

    /// Order the results by a column; later calls break ties
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    /// Limit the number of rows returned
    pub fn limit(mut self, count: usize) -> Self {
        self.limit = Some(count);
        self
    }

    pub fn columns(&self) -> &str {
        &self.columns
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[Order] {
        &self.order
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn projection(&self) -> Projection {
        Projection::parse(&self.columns)
    }

    /// Whether a row satisfies every filter
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(row))
    }

    /// Filter, order and limit parameters in PostgREST form, in order.
    pub fn filter_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|filter| (filter.column.clone(), filter.to_param()))
            .collect();

        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect();
            params.push(("order".to_string(), order.join(",")));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }

    /// Full parameter list for a GET, `select` first.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let columns: String = self.columns.chars().filter(|c| !c.is_whitespace()).collect();
        let mut params = vec![("select".to_string(), columns)];
        params.extend(self.filter_params());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_postgrest_params() {
        let query = Query::new()
            .select("*,\n pets(name, species),\n users(name, email)")
            .eq("status", "pending")
            .in_list("pet_id", &[1, 2])
            .order("date", true)
            .order("time", true)
            .limit(10);

        assert_eq!(
            query.to_params(),
            vec![
                ("select".to_string(), "*,pets(name,species),users(name,email)".to_string()),
                ("status".to_string(), "eq.pending".to_string()),
                ("pet_id".to_string(), "in.(1,2)".to_string()),
                ("order".to_string(), "date.asc,time.asc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn parses_projection() {
        let projection = Projection::parse("*, pets(name, species), users(name,email)");
        assert!(projection.selects_all());
        assert_eq!(projection.embeds.len(), 2);
        assert_eq!(projection.embeds[0].table, "pets");
        assert_eq!(projection.embeds[0].columns, vec!["name", "species"]);

        let projection = Projection::parse("id, name, email, phone, role_id");
        assert!(!projection.selects_all());
        assert_eq!(projection.columns.len(), 5);
    }

    #[test]
    fn evaluates_filters() {
        let row = json!({ "id": 7, "status": "pending", "name": "Luna", "notes": null });

        assert!(Query::new().eq("id", 7).matches(&row));
        assert!(Query::new().gt("id", 6).lte("id", 7).matches(&row));
        assert!(!Query::new().neq("status", "pending").matches(&row));
        assert!(Query::new().in_list("status", &["pending", "confirmed"]).matches(&row));
        assert!(Query::new().is_null("notes").matches(&row));
        assert!(Query::new().ilike("name", "lu%").matches(&row));
        assert!(!Query::new().like("name", "lu%").matches(&row));
        assert!(Query::new().like("name", "L_na").matches(&row));
        assert!(!Query::new().eq("missing", "x").matches(&row));
    }

    #[test]
    fn nulls_sort_last() {
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Greater);
        assert_eq!(compare_values(&json!("a"), &json!("b")), Ordering::Less);
    }
}
