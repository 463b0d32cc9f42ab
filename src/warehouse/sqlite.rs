use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::StoreError;
use crate::config::is_identifier;
use crate::release::{ReleaseKind, ReleaseRecord};

/// Local stand-in for the warehouse: one SQLite file, a `datasets`
/// registry for namespaces, tables named `<dataset>__<table>`.
pub struct SqliteStore {
    conn: Connection,
    dataset: String,
    table: String,
    location: String,
}

impl SqliteStore {
    pub fn open(path: &Path, dataset: &str, table: &str, location: &str) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn, dataset, table, location)
    }

    #[cfg(test)]
    pub fn open_in_memory(dataset: &str, table: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, dataset, table, "local")
    }

    fn with_connection(
        conn: Connection,
        dataset: &str,
        table: &str,
        location: &str,
    ) -> Result<Self, StoreError> {
        for name in [dataset, table] {
            if !is_identifier(name) {
                return Err(StoreError::InvalidName(name.to_string()));
            }
        }
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS datasets (
                name       TEXT PRIMARY KEY,
                location   TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(Self {
            conn,
            dataset: dataset.to_string(),
            table: table.to_string(),
            location: location.to_string(),
        })
    }

    pub fn describe(&self) -> String {
        format!("sqlite:{}.{}", self.dataset, self.table)
    }

    fn table_name(&self) -> String {
        format!("{}__{}", self.dataset, self.table)
    }

    /// Register the dataset namespace. Returns true when it was created.
    pub fn ensure_dataset(&self) -> Result<bool, StoreError> {
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO datasets (name, location) VALUES (?1, ?2)",
            rusqlite::params![self.dataset, self.location],
        )?;
        Ok(created == 1)
    }

    /// Replace the table with `records`: load a staging table, then drop the
    /// old table and rename the staging one, all in one immediate transaction.
    pub fn replace_table(&self, records: &[ReleaseRecord]) -> Result<usize, StoreError> {
        let target = self.table_name();
        let staging = format!("{}__staging", target);

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!(
            "
            DROP TABLE IF EXISTS \"{staging}\";
            CREATE TABLE \"{staging}\" (
                date         TEXT NOT NULL,
                release_type TEXT NOT NULL
                    CHECK(release_type IN ('Fix','Issue','Change','Feature','Announcement')),
                description  TEXT NOT NULL,
                product      TEXT NOT NULL
            );
            "
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{staging}\" (date, release_type, description, product)
                 VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for r in records {
                stmt.execute(rusqlite::params![
                    r.date.to_string(),
                    r.release_kind.as_str(),
                    r.description,
                    r.product,
                ])?;
            }
        }
        tx.execute_batch(&format!(
            "
            DROP TABLE IF EXISTS \"{target}\";
            ALTER TABLE \"{staging}\" RENAME TO \"{target}\";
            "
        ))?;
        tx.commit()?;
        Ok(records.len())
    }

    /// Read the table back, newest first.
    pub fn load(&self) -> Result<Vec<ReleaseRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT date, release_type, description, product
             FROM \"{}\"
             ORDER BY date DESC, rowid",
            self.table_name()
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, kind, description, product)| {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| StoreError::Decode(format!("date '{}': {}", date, e)))?;
                let release_kind = kind.parse::<ReleaseKind>().map_err(StoreError::Decode)?;
                Ok(ReleaseRecord {
                    date,
                    release_kind,
                    description,
                    product,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(product: &str, date: &str, kind: ReleaseKind) -> ReleaseRecord {
        ReleaseRecord {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            release_kind: kind,
            description: format!("{product} on {date}"),
            product: product.into(),
        }
    }

    #[test]
    fn dataset_created_once() {
        let store = SqliteStore::open_in_memory("RELEASE_NOTES", "BQ_Release_Notes").unwrap();
        assert!(store.ensure_dataset().unwrap());
        assert!(!store.ensure_dataset().unwrap());
    }

    #[test]
    fn replace_discards_previous_contents() {
        let store = SqliteStore::open_in_memory("RELEASE_NOTES", "BQ_Release_Notes").unwrap();
        store.ensure_dataset().unwrap();
        store
            .replace_table(&[
                rec("bq", "2023-01-05", ReleaseKind::Fix),
                rec("bq", "2022-01-05", ReleaseKind::Issue),
            ])
            .unwrap();
        store
            .replace_table(&[rec("bqml", "2023-03-01", ReleaseKind::Feature)])
            .unwrap();

        let rows = store.load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product, "bqml");
        assert_eq!(rows[0].release_kind, ReleaseKind::Feature);
    }

    #[test]
    fn load_is_date_descending() {
        let store = SqliteStore::open_in_memory("D", "T").unwrap();
        store.ensure_dataset().unwrap();
        store
            .replace_table(&[
                rec("a", "2021-06-01", ReleaseKind::Change),
                rec("b", "2023-06-01", ReleaseKind::Announcement),
                rec("c", "2022-06-01", ReleaseKind::Fix),
            ])
            .unwrap();
        let products: Vec<String> = store.load().unwrap().into_iter().map(|r| r.product).collect();
        assert_eq!(products, ["b", "c", "a"]);
    }

    #[test]
    fn empty_dataset_replaces_to_empty_table() {
        let store = SqliteStore::open_in_memory("D", "T").unwrap();
        store.ensure_dataset().unwrap();
        store.replace_table(&[rec("a", "2021-06-01", ReleaseKind::Fix)]).unwrap();
        store.replace_table(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn rejects_unsafe_names() {
        assert!(matches!(
            SqliteStore::open_in_memory("x\"; DROP", "T"),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.sqlite");
        {
            let store = SqliteStore::open(&path, "D", "T", "us-central1").unwrap();
            store.ensure_dataset().unwrap();
            store.replace_table(&[rec("bq", "2023-01-05", ReleaseKind::Fix)]).unwrap();
        }
        let reopened = SqliteStore::open(&path, "D", "T", "us-central1").unwrap();
        assert!(!reopened.ensure_dataset().unwrap());
        assert_eq!(reopened.load().unwrap().len(), 1);
    }
}
