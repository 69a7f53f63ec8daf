use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Error, Result};
use dashmap::DashMap;
use log::info;

use self::schema::parse_table_definition;
use crate::common::TableId;
use crate::error::DbError;
use crate::storage::heap::file::HeapFile;
use crate::storage::DbFile;
use crate::tuple::schema::Schema;

pub mod schema;

const FIRST_TABLE_ID: TableId = 1;

struct CatalogEntry {
    file: Arc<DbFile>,
    name: String,
    primary_key: String,
}

/// The Catalog keeps track of all tables, the files storing them and their schemas.
/// Table ids are handed out per distinct data file: registering the same file again reuses its id.
pub struct Catalog {
    page_size: usize,
    next_table_id: AtomicU32,
    tables: DashMap<TableId, CatalogEntry>,
    table_name_to_id: DashMap<String, TableId>,
    path_to_table_id: DashMap<PathBuf, TableId>,
}

impl Catalog {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            next_table_id: AtomicU32::new(FIRST_TABLE_ID),
            tables: DashMap::new(),
            table_name_to_id: DashMap::new(),
            path_to_table_id: DashMap::new(),
        }
    }

    /// Adds a table stored in the heap file at `path`. An existing table with the same name
    /// or the same file is replaced.
    pub fn add_table(
        &self,
        table_name: &str,
        path: impl AsRef<Path>,
        schema: Schema,
        primary_key: &str,
    ) -> Result<TableId> {
        let path = std::path::absolute(path.as_ref()).with_context(|| {
            format!("Could not resolve data file {}", path.as_ref().display())
        })?;
        let table_id = *self
            .path_to_table_id
            .entry(path.clone())
            .or_insert_with(|| self.next_table_id.fetch_add(1, Ordering::Relaxed));

        let file = HeapFile::open(table_id, path, schema, self.page_size)?;

        if let Some((_, previous_id)) = self.table_name_to_id.remove(table_name) {
            if previous_id != table_id {
                self.tables.remove(&previous_id);
            }
        }
        if let Some((_, previous)) = self.tables.remove(&table_id) {
            self.table_name_to_id.remove(&previous.name);
        }

        self.tables.insert(
            table_id,
            CatalogEntry {
                file: Arc::new(DbFile::Heap(file)),
                name: table_name.to_owned(),
                primary_key: primary_key.to_owned(),
            },
        );
        self.table_name_to_id.insert(table_name.to_owned(), table_id);

        Ok(table_id)
    }

    pub fn get_table_id(&self, table_name: &str) -> Option<TableId> {
        self.table_name_to_id.get(table_name).map(|kv| *kv.value())
    }

    /// Returns the file storing the table.
    pub fn get_file(&self, table_id: TableId) -> Result<Arc<DbFile>> {
        self.tables
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or_else(|| DbError::UnknownTable(table_id).into())
    }

    pub fn get_schema(&self, table_id: TableId) -> Result<Schema> {
        Ok(self.get_file(table_id)?.schema().clone())
    }

    pub fn get_primary_key(&self, table_id: TableId) -> Result<String> {
        self.tables
            .get(&table_id)
            .map(|entry| entry.primary_key.clone())
            .ok_or_else(|| DbError::UnknownTable(table_id).into())
    }

    pub fn get_table_name(&self, table_id: TableId) -> Result<String> {
        self.tables
            .get(&table_id)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| DbError::UnknownTable(table_id).into())
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut tables = self
            .table_name_to_id
            .iter()
            .map(|s| s.key().to_owned())
            .collect::<Vec<_>>();
        tables.sort();
        tables
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids = self.tables.iter().map(|e| *e.key()).collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.tables.clear();
        self.table_name_to_id.clear();
    }

    /// Reads table definitions from a schema file, one table per line.
    /// The data of table `name` is stored in `name.dat` next to the schema file.
    pub fn load_schema(&self, catalog_file: impl AsRef<Path>) -> Result<Vec<TableId>> {
        let catalog_file = catalog_file.as_ref();
        let content = fs::read_to_string(catalog_file)
            .with_context(|| format!("Could not read schema file {}", catalog_file.display()))?;
        let base_dir = catalog_file
            .parent()
            .ok_or_else(|| Error::msg(format!("{} has no parent", catalog_file.display())))?;

        let mut table_ids = vec![];
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            let definition = parse_table_definition(line)?;
            let path = base_dir.join(format!("{}.dat", definition.name));
            info!(
                "Added table {} with schema {}",
                definition.name, definition.schema
            );
            let table_id = self.add_table(
                &definition.name,
                path,
                definition.schema,
                &definition.primary_key,
            )?;
            table_ids.push(table_id);
        }
        Ok(table_ids)
    }
}

#[cfg(test)]
mod tests {

    use std::fs;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::Catalog;
    use crate::common::DEFAULT_PAGE_SIZE;
    use crate::error::DbError;
    use crate::tuple::schema::{ColumnDefinition, Schema, TypeId};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDefinition::new(TypeId::Integer, "id"),
            ColumnDefinition::new(TypeId::Text, "name"),
        ])
    }

    #[test]
    fn can_add_and_resolve_tables() -> Result<()> {
        let data_dir = tempdir()?;
        let catalog = Catalog::new(DEFAULT_PAGE_SIZE);

        let accounts = catalog.add_table("accounts", data_dir.path().join("a.dat"), schema(), "id")?;
        let orders = catalog.add_table("orders", data_dir.path().join("o.dat"), schema(), "")?;
        assert_ne!(accounts, orders);

        assert_eq!(catalog.get_table_id("accounts"), Some(accounts));
        assert_eq!(catalog.get_schema(orders)?, schema());
        assert_eq!(catalog.get_primary_key(accounts)?, "id");
        assert_eq!(catalog.get_table_name(orders)?, "orders");
        assert_eq!(catalog.list_tables(), vec!["accounts", "orders"]);
        assert_eq!(catalog.get_file(accounts)?.table_id(), accounts);

        let err = catalog.get_file(4242).unwrap_err();
        assert!(matches!(
            DbError::from_anyhow(&err),
            Some(DbError::UnknownTable(4242))
        ));
        Ok(())
    }

    #[test]
    fn same_file_keeps_its_table_id() -> Result<()> {
        let data_dir = tempdir()?;
        let catalog = Catalog::new(DEFAULT_PAGE_SIZE);
        let path = data_dir.path().join("a.dat");

        let first = catalog.add_table("accounts", &path, schema(), "id")?;
        let second = catalog.add_table("renamed", &path, schema(), "id")?;
        assert_eq!(first, second);
        assert_eq!(catalog.list_tables(), vec!["renamed"]);

        catalog.clear();
        assert!(catalog.list_tables().is_empty());
        assert_eq!(catalog.add_table("accounts", &path, schema(), "id")?, first);
        Ok(())
    }

    #[test]
    fn can_load_schema_file() -> Result<()> {
        let data_dir = tempdir()?;
        let schema_file = data_dir.path().join("catalog.txt");
        fs::write(
            &schema_file,
            "accounts (id int pk, name string)\n\norders (id int, account int)\n",
        )?;

        let catalog = Catalog::new(DEFAULT_PAGE_SIZE);
        let table_ids = catalog.load_schema(&schema_file)?;
        assert_eq!(table_ids.len(), 2);
        assert_eq!(catalog.list_tables(), vec!["accounts", "orders"]);
        assert_eq!(catalog.get_schema(table_ids[0])?, schema());
        assert!(data_dir.path().join("orders.dat").is_file());
        Ok(())
    }
}
