//! Immutable read descriptors.

use std::cmp::Ordering;

use serde_json::Value;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `column = value`
    Eq,
    /// `column > value`
    Gt,
    /// `column >= value`
    Gte,
    /// `column < value`
    Lt,
    /// `column <= value`
    Lte,
}

impl FilterOp {
    /// SQL operator.
    pub fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }

    /// Whether `stored.cmp(filter_value)` satisfies the operator.
    pub fn accepts(self, ord: Ordering) -> bool {
        match self {
            FilterOp::Eq => ord == Ordering::Equal,
            FilterOp::Gt => ord == Ordering::Greater,
            FilterOp::Gte => ord != Ordering::Less,
            FilterOp::Lt => ord == Ordering::Less,
            FilterOp::Lte => ord != Ordering::Greater,
        }
    }
}

/// `column op value`. Comparisons against `null` never match.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Column name.
    pub column: String,
    /// Operator.
    pub op: FilterOp,
    /// Right-hand side.
    pub value: Value,
}

impl Filter {
    /// Generic constructor.
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    /// `column >= value`
    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Gte, value)
    }

    /// `column <= value`
    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Lte, value)
    }

    /// Evaluates the filter against a stored value.
    pub fn matches(&self, stored: Option<&Value>) -> bool {
        stored
            .and_then(|v| compare_values(v, &self.value))
            .is_some_and(|ord| self.op.accepts(ord))
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column name.
    pub column: String,
    /// Descending when `true`.
    pub descending: bool,
}

/// A complete read: table, projection, filters, order and paging.
///
/// Built once through [`Query::select`] and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    columns: Vec<String>,
    filters: Vec<Filter>,
    order: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Query {
    /// Starts describing a read of `table`.
    pub fn select(table: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            query: Query {
                table: table.into(),
                columns: Vec::new(),
                filters: Vec::new(),
                order: Vec::new(),
                limit: None,
                offset: None,
            },
        }
    }

    /// Target table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Projected columns; empty means all columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Conjunction of filters.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Sort keys, most significant first.
    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }

    /// Maximum number of rows.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Rows skipped before the first returned row.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }
}

/// Builder for [`Query`]. Each call consumes and returns the builder.
#[derive(Debug, Clone)]
#[must_use = "call build() to obtain the query"]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Restricts the projection.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.query.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Adds an arbitrary filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }

    /// Adds `column = value`.
    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Eq, value))
    }

    /// Adds `column > value`.
    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Gt, value))
    }

    /// Adds `column >= value`.
    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Gte, value))
    }

    /// Adds `column < value`.
    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Lt, value))
    }

    /// Adds `column <= value`.
    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Lte, value))
    }

    /// Appends an ascending sort key.
    pub fn order_asc(mut self, column: &str) -> Self {
        self.query.order.push(OrderBy {
            column: column.to_string(),
            descending: false,
        });
        self
    }

    /// Appends a descending sort key.
    pub fn order_desc(mut self, column: &str) -> Self {
        self.query.order.push(OrderBy {
            column: column.to_string(),
            descending: true,
        });
        self
    }

    /// Caps the number of rows.
    pub fn limit(mut self, n: usize) -> Self {
        self.query.limit = Some(n);
        self
    }

    /// Skips `n` rows.
    pub fn offset(mut self, n: usize) -> Self {
        self.query.offset = Some(n);
        self
    }

    /// Finishes the description.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Orders two JSON scalars the way SQLite orders stored values of the
/// same storage class. Mixed or non-scalar pairs are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
