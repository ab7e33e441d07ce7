//! Result rows keyed by column name

use super::error::{DbError, DbResult};
use super::query::SqlValue;
use rusqlite::types::{Type, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub(super) fn read(row: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let value = match row.get::<_, Value>(i)? {
                Value::Null => SqlValue::Null,
                Value::Integer(v) => SqlValue::Integer(v),
                Value::Real(v) => SqlValue::Text(v.to_string()),
                Value::Text(v) => SqlValue::Text(v),
                Value::Blob(_) => {
                    return Err(rusqlite::Error::InvalidColumnType(i, name.clone(), Type::Blob))
                }
            };
            columns.push((name.clone(), value));
        }
        Ok(Self { columns })
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn int(&self, name: &str) -> DbResult<i64> {
        self.opt_int(name)?
            .ok_or_else(|| DbError::internal(format!("column {name} is null")))
    }

    pub fn opt_int(&self, name: &str) -> DbResult<Option<i64>> {
        match self.column(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(v) => Ok(Some(*v)),
            SqlValue::Bool(b) => Ok(Some(i64::from(*b))),
            SqlValue::Text(_) => Err(mismatch(name, "integer")),
        }
    }

    pub fn text(&self, name: &str) -> DbResult<String> {
        self.opt_text(name)?
            .ok_or_else(|| DbError::internal(format!("column {name} is null")))
    }

    pub fn opt_text(&self, name: &str) -> DbResult<Option<String>> {
        match self.column(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(v) => Ok(Some(v.clone())),
            SqlValue::Integer(_) | SqlValue::Bool(_) => Err(mismatch(name, "text")),
        }
    }

    pub fn flag(&self, name: &str) -> DbResult<bool> {
        match self.column(name)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Integer(v) => Ok(*v != 0),
            SqlValue::Null | SqlValue::Text(_) => Err(mismatch(name, "boolean")),
        }
    }

    fn column(&self, name: &str) -> DbResult<&SqlValue> {
        self.get(name)
            .ok_or_else(|| DbError::internal(format!("column {name} missing from result")))
    }
}

fn mismatch(name: &str, expected: &str) -> DbError {
    DbError::internal(format!("column {name} is not {expected}"))
}

#[cfg(test)]
impl Row {
    pub fn from_pairs(pairs: Vec<(&str, SqlValue)>) -> Self {
        Self {
            columns: pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}
