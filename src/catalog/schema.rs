use anyhow::{Context, Error, Result};

use crate::tuple::schema::{ColumnDefinition, Schema, TypeId};

/// A table as declared in a schema file.
#[derive(Debug, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub schema: Schema,
    /// name of the primary key column, empty if there is none
    pub primary_key: String,
}

/// Parses a line of the form `name (column type [pk], column type, ...)`.
/// Supported types are `int` and `string`.
pub fn parse_table_definition(line: &str) -> Result<TableDefinition> {
    let (open, close) = match (line.find('('), line.rfind(')')) {
        (Some(open), Some(close)) if open < close => (open, close),
        _ => return Err(Error::msg(format!("Invalid catalog entry: {line}"))),
    };

    let name = line[..open].trim();
    if name.is_empty() {
        return Err(Error::msg(format!("Missing table name: {line}")));
    }

    let mut columns = vec![];
    let mut primary_key = String::new();
    for column in line[open + 1..close].split(',') {
        let parts = column.split_whitespace().collect::<Vec<_>>();
        match parts.as_slice() {
            [column_name, type_name] | [column_name, type_name, _] => {
                let type_id = type_name
                    .parse::<TypeId>()
                    .with_context(|| format!("Unknown type in catalog entry: {line}"))?;
                if let Some(annotation) = parts.get(2) {
                    if *annotation != "pk" {
                        return Err(Error::msg(format!(
                            "Unknown annotation {annotation} in catalog entry: {line}"
                        )));
                    }
                    primary_key = column_name.to_string();
                }
                columns.push(ColumnDefinition::new(type_id, *column_name));
            }
            _ => {
                return Err(Error::msg(format!(
                    "Invalid column definition '{}' in catalog entry: {line}",
                    column.trim()
                )))
            }
        }
    }

    Ok(TableDefinition {
        name: name.to_owned(),
        schema: Schema::new(columns),
        primary_key,
    })
}
