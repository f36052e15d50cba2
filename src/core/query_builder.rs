//! Parameterized SQL statement builders
//!
//! Builders render generic `?` placeholders and collect their arguments in
//! order. A [`StatementBuilder`] root carries the placeholder format of the
//! connection it came from, so statements it creates render in that format.

use super::dialect::PlaceholderFormat;
use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;

/// A statement that renders to SQL text plus positional arguments
pub trait Statement: Send + Sync {
    /// Render the statement, validating it first
    fn to_sql(&self) -> Result<(String, Vec<DatabaseValue>)>;

    /// Placeholder format `to_sql` renders in
    fn rendered_format(&self) -> PlaceholderFormat;
}

/// SQL comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    column: String,
    operator: Operator,
    value: Option<DatabaseValue>,
}

/// AND-joined WHERE conditions shared by select, update and delete
#[derive(Debug, Clone, Default)]
struct WhereClause {
    conditions: Vec<Condition>,
}

impl WhereClause {
    fn push(&mut self, column: &str, operator: Operator, value: Option<DatabaseValue>) {
        self.conditions.push(Condition {
            column: column.to_string(),
            operator,
            value,
        });
    }

    fn render(&self, sql: &mut String) {
        if self.conditions.is_empty() {
            return;
        }
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|cond| match cond.value {
                Some(_) => format!("{} {} ?", cond.column, cond.operator.as_sql()),
                None => format!("{} {}", cond.column, cond.operator.as_sql()),
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&parts.join(" AND "));
    }

    fn params(&self) -> impl Iterator<Item = DatabaseValue> + '_ {
        self.conditions.iter().filter_map(|cond| cond.value.clone())
    }
}

/// ORDER BY direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Root for building statements with a fixed placeholder format
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementBuilder {
    format: PlaceholderFormat,
}

impl StatementBuilder {
    pub fn new(format: PlaceholderFormat) -> Self {
        Self { format }
    }

    pub fn placeholder_format(&self) -> PlaceholderFormat {
        self.format
    }

    pub fn select(&self, table: impl Into<String>) -> SelectBuilder {
        SelectBuilder::new(table).placeholder_format(self.format)
    }

    pub fn insert(&self, table: impl Into<String>) -> InsertBuilder {
        InsertBuilder::new(table).placeholder_format(self.format)
    }

    pub fn update(&self, table: impl Into<String>) -> UpdateBuilder {
        UpdateBuilder::new(table).placeholder_format(self.format)
    }

    pub fn delete(&self, table: impl Into<String>) -> DeleteBuilder {
        DeleteBuilder::new(table).placeholder_format(self.format)
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    joins: Vec<(String, String)>,
    filter: WhereClause,
    order_by: Vec<(String, OrderDirection)>,
    limit: Option<usize>,
    offset: Option<usize>,
    format: PlaceholderFormat,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    ///
    /// # Example
    ///
    /// ```
    /// use rust_dbutil::core::query_builder::SelectBuilder;
    ///
    /// let query = SelectBuilder::new("stops")
    ///     .columns(&["id", "stop_name"])
    ///     .build();
    /// assert_eq!(query, "SELECT id, stop_name FROM stops");
    /// ```
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            joins: Vec::new(),
            filter: WhereClause::default(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            format: PlaceholderFormat::Question,
        }
    }

    #[must_use]
    pub fn placeholder_format(mut self, format: PlaceholderFormat) -> Self {
        self.format = format;
        self
    }

    /// Select specific columns
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn where_eq(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Eq, Some(value.into()));
        self
    }

    #[must_use]
    pub fn where_ne(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Ne, Some(value.into()));
        self
    }

    #[must_use]
    pub fn where_gt(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Gt, Some(value.into()));
        self
    }

    #[must_use]
    pub fn where_ge(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Ge, Some(value.into()));
        self
    }

    #[must_use]
    pub fn where_lt(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Lt, Some(value.into()));
        self
    }

    #[must_use]
    pub fn where_le(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Le, Some(value.into()));
        self
    }

    #[must_use]
    pub fn where_like(mut self, column: &str, pattern: &str) -> Self {
        self.filter.push(column, Operator::Like, Some(pattern.into()));
        self
    }

    #[must_use]
    pub fn where_null(mut self, column: &str) -> Self {
        self.filter.push(column, Operator::IsNull, None);
        self
    }

    #[must_use]
    pub fn where_not_null(mut self, column: &str) -> Self {
        self.filter.push(column, Operator::IsNotNull, None);
        self
    }

    /// Add an INNER JOIN
    #[must_use]
    pub fn join(mut self, table: &str, on_condition: &str) -> Self {
        self.joins.push((table.to_string(), on_condition.to_string()));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);

        for (table, on) in &self.joins {
            sql.push_str(&format!(" INNER JOIN {} ON {}", table, on));
        }

        self.filter.render(&mut sql);

        if !self.order_by.is_empty() {
            let clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|(col, dir)| format!("{} {}", col, dir.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        number_placeholders(self.format, sql)
    }

    /// Get the parameter values for parameterized queries
    pub fn params(&self) -> Vec<DatabaseValue> {
        self.filter.params().collect()
    }
}

impl Statement for SelectBuilder {
    fn rendered_format(&self) -> PlaceholderFormat {
        self.format
    }

    fn to_sql(&self) -> Result<(String, Vec<DatabaseValue>)> {
        if self.columns.is_empty() {
            return Err(DatabaseError::other("select statements must have at least one column"));
        }
        Ok((self.build(), self.params()))
    }
}

/// INSERT query builder; one or more rows of the same columns
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<DatabaseValue>>,
    returning: Option<String>,
    format: PlaceholderFormat,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            returning: None,
            format: PlaceholderFormat::Question,
        }
    }

    #[must_use]
    pub fn placeholder_format(mut self, format: PlaceholderFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the column list
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Append one row of values, aligned with the column list
    #[must_use]
    pub fn values(mut self, row: Vec<DatabaseValue>) -> Self {
        self.rows.push(row);
        self
    }

    /// Add a column-value pair to a single-row insert
    #[must_use]
    pub fn value(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.columns.push(column.to_string());
        match self.rows.first_mut() {
            Some(row) => row.push(value.into()),
            None => self.rows.push(vec![value.into()]),
        }
        self
    }

    /// Ask the store to return `column` for every inserted row
    #[must_use]
    pub fn returning(mut self, column: &str) -> Self {
        self.returning = Some(column.to_string());
        self
    }

    pub fn has_returning(&self) -> bool {
        self.returning.is_some()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let tuple = format!("({})", vec!["?"; self.columns.len()].join(", "));
        let tuples = vec![tuple.as_str(); self.rows.len()].join(", ");
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            tuples
        );
        if let Some(column) = &self.returning {
            sql.push_str(&format!(" RETURNING \"{}\"", column));
        }
        number_placeholders(self.format, sql)
    }

    /// Get the parameter values, row by row
    pub fn params(&self) -> Vec<DatabaseValue> {
        self.rows.iter().flatten().cloned().collect()
    }
}

impl Statement for InsertBuilder {
    fn rendered_format(&self) -> PlaceholderFormat {
        self.format
    }

    fn to_sql(&self) -> Result<(String, Vec<DatabaseValue>)> {
        if self.columns.is_empty() {
            return Err(DatabaseError::other("insert statements must have at least one column"));
        }
        if self.rows.is_empty() {
            return Err(DatabaseError::other("insert statements must have at least one set of values"));
        }
        if let Some(row) = self.rows.iter().find(|r| r.len() != self.columns.len()) {
            return Err(DatabaseError::other(format!(
                "insert row has {} values for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        Ok((self.build(), self.params()))
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set_columns: Vec<String>,
    set_values: Vec<DatabaseValue>,
    filter: WhereClause,
    format: PlaceholderFormat,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_columns: Vec::new(),
            set_values: Vec::new(),
            filter: WhereClause::default(),
            format: PlaceholderFormat::Question,
        }
    }

    #[must_use]
    pub fn placeholder_format(mut self, format: PlaceholderFormat) -> Self {
        self.format = format;
        self
    }

    /// Set a column value
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.set_columns.push(column.to_string());
        self.set_values.push(value.into());
        self
    }

    /// Set several column values, keeping their iteration order
    #[must_use]
    pub fn set_map<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, DatabaseValue)>,
        S: Into<String>,
    {
        for (column, value) in pairs {
            self.set_columns.push(column.into());
            self.set_values.push(value);
        }
        self
    }

    #[must_use]
    pub fn where_eq(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Eq, Some(value.into()));
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let set_clauses: Vec<String> = self
            .set_columns
            .iter()
            .map(|col| format!("{} = ?", col))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.table, set_clauses.join(", "));
        self.filter.render(&mut sql);
        number_placeholders(self.format, sql)
    }

    /// Get the parameter values (SET values followed by WHERE values)
    pub fn params(&self) -> Vec<DatabaseValue> {
        let mut params = self.set_values.clone();
        params.extend(self.filter.params());
        params
    }
}

impl Statement for UpdateBuilder {
    fn rendered_format(&self) -> PlaceholderFormat {
        self.format
    }

    fn to_sql(&self) -> Result<(String, Vec<DatabaseValue>)> {
        if self.set_columns.is_empty() {
            return Err(DatabaseError::other("update statements must have at least one Set clause"));
        }
        Ok((self.build(), self.params()))
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    filter: WhereClause,
    format: PlaceholderFormat,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: WhereClause::default(),
            format: PlaceholderFormat::Question,
        }
    }

    #[must_use]
    pub fn placeholder_format(mut self, format: PlaceholderFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn where_eq(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.filter.push(column, Operator::Eq, Some(value.into()));
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let mut sql = format!("DELETE FROM {}", self.table);
        self.filter.render(&mut sql);
        number_placeholders(self.format, sql)
    }

    pub fn params(&self) -> Vec<DatabaseValue> {
        self.filter.params().collect()
    }
}

impl Statement for DeleteBuilder {
    fn rendered_format(&self) -> PlaceholderFormat {
        self.format
    }

    fn to_sql(&self) -> Result<(String, Vec<DatabaseValue>)> {
        Ok((self.build(), self.params()))
    }
}

/// Generic `?` text is kept for rebinding where it runs; numbered formats
/// are rendered here.
fn number_placeholders(format: PlaceholderFormat, sql: String) -> String {
    match format {
        PlaceholderFormat::Question => sql,
        PlaceholderFormat::Dollar => format.rebind(&sql),
    }
}

/// `COPY ... FROM STDIN` for a bulk load. Identifiers are written exactly as
/// the INSERT builder writes them.
pub fn copy_statement(table: &str, columns: &[String]) -> String {
    format!("COPY {} ({}) FROM STDIN", table, columns.join(", "))
}
