use anyhow::Result;

use self::schema::Schema;
use self::value::Value;
use crate::common::RecordId;
use crate::error::DbError;

pub mod schema;
pub mod value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tuple {
    values: Vec<Value>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            record_id: None,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Where the tuple is stored. None if it was never placed on a page.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    pub fn as_str(&self, i: usize) -> &str {
        self.values[i].as_str()
    }

    pub fn as_i32(&self, i: usize) -> i32 {
        self.values[i].as_i32()
    }

    /// Checks that every value fits into the corresponding column.
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        let columns = schema.columns();
        if columns.len() != self.values.len() {
            return Err(DbError::SchemaMismatch(format!(
                "expected {} values, got {}",
                columns.len(),
                self.values.len()
            ))
            .into());
        }
        for (pos, (value, column)) in self.values.iter().zip(columns).enumerate() {
            if !value.fits(column.type_id()) {
                return Err(DbError::SchemaMismatch(format!(
                    "value {value} at position {pos} does not fit column of type {}",
                    column.type_id()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Serializes the values in schema order into `buffer`.
    pub fn serialize(&self, buffer: &mut [u8]) {
        let mut offset = 0;
        for value in &self.values {
            value.serialize_value(&mut buffer[offset..]);
            offset += value.type_id().size();
        }
    }

    pub fn parse(bytes: &[u8], schema: &Schema) -> Self {
        let mut offset = 0;
        let mut values = Vec::with_capacity(schema.columns().len());
        for column in schema.columns() {
            values.push(Value::parse_value(&bytes[offset..], column.type_id()));
            offset += column.type_id().size();
        }
        Self::new(values)
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self
            .values
            .iter()
            .map(|val| val.to_string())
            .collect::<Vec<_>>();
        write!(f, "{}", values.join("\t"))
    }
}
