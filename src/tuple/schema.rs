use std::fmt::Display;
use std::str::FromStr;

use anyhow::Error;

use super::value::STRING_LEN;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeId {
    Integer,
    Text,
}

impl TypeId {
    /// Number of bytes a value of this type occupies on a page.
    pub fn size(&self) -> usize {
        match self {
            TypeId::Integer => std::mem::size_of::<i32>(),
            TypeId::Text => std::mem::size_of::<u32>() + STRING_LEN,
        }
    }
}

impl FromStr for TypeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Ok(TypeId::Integer),
            "string" | "text" => Ok(TypeId::Text),
            s => Err(Error::msg(format!("Invalid TypeId {}", s))),
        }
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDefinition {
    type_id: TypeId,
    column_name: Option<String>,
}

impl ColumnDefinition {
    pub fn new(type_id: TypeId, column_name: impl Into<String>) -> Self {
        Self {
            type_id,
            column_name: Some(column_name.into()),
        }
    }

    /// creates an anonymous column where only the type is known
    pub fn with_type_id(type_id: TypeId) -> Self {
        Self {
            type_id,
            column_name: None,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn column_name(&self) -> Option<&str> {
        self.column_name.as_deref()
    }
}

/// Ordered list of typed columns. All tuples of a schema have the same width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnDefinition>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDefinition>) -> Self {
        Self { columns }
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.column_name() == Some(name))
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Size in bytes of a serialized tuple of this schema.
    pub fn tuple_size(&self) -> usize {
        self.columns.iter().map(|col| col.type_id().size()).sum()
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let columns = self
            .columns
            .iter()
            .map(|col| format!("{}({})", col.type_id(), col.column_name().unwrap_or("")))
            .collect::<Vec<_>>();
        write!(f, "{}", columns.join(", "))
    }
}
