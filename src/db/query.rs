//! Typed query builder
//!
//! Every value travels as a bound parameter. Only identifiers (tables,
//! columns, aliases) are spliced into the SQL text, and those are checked
//! against a conservative character set first.

use super::error::{DbError, DbResult};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use std::fmt::Write as _;

/// A value bound into a statement or read back from a row
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Bool(bool),
    Text(String),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Comparison operators for [`Condition::Compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Ge,
    Ne,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Ge => ">=",
            Self::Ne => "<>",
        }
    }
}

/// WHERE predicate; a query's conditions are joined with AND
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(String, SqlValue),
    In(String, Vec<SqlValue>),
    Compare(String, CompareOp, SqlValue),
    IsNull(String),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::Equals(column.into(), value.into())
    }

    pub fn is_in<V: Into<SqlValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<SqlValue>) -> Self {
        Self::Compare(column.into(), op, value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    fn render(&self, sql: &mut String, params: &mut Vec<SqlValue>) -> DbResult<()> {
        match self {
            // `col = NULL` never matches in SQL
            Self::Equals(column, SqlValue::Null) | Self::IsNull(column) => {
                let _ = write!(sql, "{} IS NULL", ident(column)?);
            }
            Self::Equals(column, value) => {
                let _ = write!(sql, "{} = ?", ident(column)?);
                params.push(value.clone());
            }
            Self::In(column, values) if values.is_empty() => {
                ident(column)?;
                sql.push_str("0 = 1");
            }
            Self::In(column, values) => {
                let marks = vec!["?"; values.len()].join(", ");
                let _ = write!(sql, "{} IN ({marks})", ident(column)?);
                params.extend(values.iter().cloned());
            }
            Self::Compare(column, op, value) => {
                let _ = write!(sql, "{} {} ?", ident(column)?, op.as_sql());
                params.push(value.clone());
            }
        }
        Ok(())
    }
}

/// Inner join with a list of column-equality predicates
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    table: String,
    on: Vec<(String, String)>,
}

impl Join {
    pub fn inner(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            on: Vec::new(),
        }
    }

    pub fn on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.on.push((left.into(), right.into()));
        self
    }

    fn render(&self, sql: &mut String) -> DbResult<()> {
        if self.on.is_empty() {
            return Err(DbError::invalid_data(format!(
                "join on {} has no predicate",
                self.table
            )));
        }
        let _ = write!(sql, " INNER JOIN {} ON ", ident(&self.table)?);
        for (i, (left, right)) in self.on.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            let _ = write!(sql, "{} = {}", ident(left)?, ident(right)?);
        }
        Ok(())
    }
}

/// Selected column, optionally renamed in the result row
#[derive(Debug, Clone, PartialEq)]
struct Field {
    column: String,
    alias: Option<String>,
}

impl Field {
    fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

/// SQL text plus its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    fields: Vec<Field>,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    order_by: Vec<String>,
    limit: Option<u32>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn field(mut self, column: impl Into<String>) -> Self {
        self.fields.push(Field {
            column: column.into(),
            alias: None,
        });
        self
    }

    pub fn fields<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        columns.into_iter().fold(self, |query, column| query.field(column))
    }

    pub fn field_as(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.fields.push(Field {
            column: column.into(),
            alias: Some(alias.into()),
        });
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Names of the columns in each result row, in select order
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn build(&self) -> DbResult<Statement> {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        if self.fields.is_empty() {
            sql.push('1');
        }
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(ident(&field.column)?);
            if let Some(alias) = &field.alias {
                let _ = write!(sql, " AS {}", ident(alias)?);
            }
        }

        let _ = write!(sql, " FROM {}", ident(&self.table)?);
        for join in &self.joins {
            join.render(&mut sql)?;
        }
        render_where(&self.conditions, &mut sql, &mut params)?;

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            for (i, column) in self.order_by.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(ident(column)?);
            }
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        Ok(Statement { sql, params })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    values: Vec<(String, SqlValue)>,
    returning: Vec<String>,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
            returning: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning.push(column.into());
        self
    }

    pub fn returning_columns(&self) -> &[String] {
        &self.returning
    }

    pub fn build(&self) -> DbResult<Statement> {
        let mut sql = format!("INSERT INTO {}", ident(&self.table)?);
        let mut params = Vec::with_capacity(self.values.len());

        if self.values.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let columns = self
                .values
                .iter()
                .map(|(column, _)| ident(column))
                .collect::<DbResult<Vec<_>>>()?;
            let marks = vec!["?"; columns.len()].join(", ");
            let _ = write!(sql, " ({}) VALUES ({marks})", columns.join(", "));
            params.extend(self.values.iter().map(|(_, value)| value.clone()));
        }

        if !self.returning.is_empty() {
            let columns = self
                .returning
                .iter()
                .map(|c| ident(c))
                .collect::<DbResult<Vec<_>>>()?;
            let _ = write!(sql, " RETURNING {}", columns.join(", "));
        }

        Ok(Statement { sql, params })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    set: Vec<(String, SqlValue)>,
    conditions: Vec<Condition>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Unconditional updates are refused: every ledger write targets specific rows.
    pub fn build(&self) -> DbResult<Statement> {
        if self.set.is_empty() {
            return Err(DbError::invalid_data(format!(
                "update of {} sets no columns",
                self.table
            )));
        }
        if self.conditions.is_empty() {
            return Err(DbError::invalid_data(format!(
                "update of {} has no condition",
                self.table
            )));
        }

        let mut sql = format!("UPDATE {} SET ", ident(&self.table)?);
        let mut params = Vec::new();
        for (i, (column, value)) in self.set.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            let _ = write!(sql, "{} = ?", ident(column)?);
            params.push(value.clone());
        }
        render_where(&self.conditions, &mut sql, &mut params)?;

        Ok(Statement { sql, params })
    }
}

fn render_where(
    conditions: &[Condition],
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> DbResult<()> {
    for (i, condition) in conditions.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        condition.render(sql, params)?;
    }
    Ok(())
}

fn ident(name: &str) -> DbResult<&str> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(name)
    } else {
        Err(DbError::invalid_data(format!("invalid identifier: {name:?}")))
    }
}
