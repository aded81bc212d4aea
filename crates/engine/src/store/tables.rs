//! Monitored-table CRUD and enrollment.

use super::{db_err, format_ts, parse_ts, Store};
use aegis_core::{AegisError, CheckType, MonitoredTable, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeSet;

const COLS: &str =
    "id, connection_id, schema_name, table_name, check_types, freshness_sla_minutes, created_at";

type TableRow = (i64, i64, String, String, String, Option<i64>, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<TableRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_table(
    (id, connection_id, schema_name, table_name, checks_raw, sla, created_at): TableRow,
) -> Result<MonitoredTable> {
    let names: Vec<String> = serde_json::from_str(&checks_raw)
        .map_err(|e| AegisError::Storage(format!("bad check_types {checks_raw:?}: {e}")))?;
    let check_types = names
        .iter()
        .filter_map(|s| CheckType::parse(s))
        .collect::<Vec<_>>();
    Ok(MonitoredTable {
        id,
        connection_id,
        schema_name,
        table_name,
        check_types,
        freshness_sla_minutes: sla,
        created_at: parse_ts(&created_at)?,
    })
}

fn checks_json(checks: &[CheckType]) -> String {
    let names: Vec<&str> = checks.iter().map(|c| c.as_str()).collect();
    serde_json::to_string(&names).expect("string vec serializes")
}

impl Store {
    /// Direct registration. A duplicate `(connection, schema, table)` is a
    /// caller error.
    pub fn insert_table(
        &self,
        connection_id: i64,
        schema_name: &str,
        table_name: &str,
        check_types: &[CheckType],
        freshness_sla_minutes: Option<i64>,
    ) -> Result<MonitoredTable> {
        let now = Utc::now();
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO monitored_tables
                 (connection_id, schema_name, table_name, check_types,
                  freshness_sla_minutes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                connection_id,
                schema_name,
                table_name,
                checks_json(check_types),
                freshness_sla_minutes,
                format_ts(now)
            ],
        );
        match inserted {
            Ok(_) => Ok(MonitoredTable {
                id: conn.last_insert_rowid(),
                connection_id,
                schema_name: schema_name.to_string(),
                table_name: table_name.to_string(),
                check_types: check_types.to_vec(),
                freshness_sla_minutes,
                created_at: now,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AegisError::DuplicateEnrollment(format!(
                    "{schema_name}.{table_name}"
                )))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    /// Idempotent enrollment used by discovery confirmation: duplicates are
    /// skipped silently. Returns `None` when the table was already enrolled.
    pub fn enroll_if_absent(
        &self,
        connection_id: i64,
        schema_name: &str,
        table_name: &str,
        check_types: &[CheckType],
        freshness_sla_minutes: Option<i64>,
    ) -> Result<Option<MonitoredTable>> {
        match self.insert_table(
            connection_id,
            schema_name,
            table_name,
            check_types,
            freshness_sla_minutes,
        ) {
            Ok(table) => Ok(Some(table)),
            Err(AegisError::DuplicateEnrollment(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_table(&self, id: i64) -> Result<Option<MonitoredTable>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {COLS} FROM monitored_tables WHERE id = ?1"),
            params![id],
            read_row,
        )
        .optional()
        .map_err(db_err)?
        .map(into_table)
        .transpose()
    }

    pub fn list_tables(
        &self,
        connection_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MonitoredTable>> {
        let conn = self.lock();
        let rows = match connection_id {
            Some(cid) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLS} FROM monitored_tables
                         WHERE connection_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3"
                    ))
                    .map_err(db_err)?;
                let result = stmt
                    .query_map(params![cid, limit as i64, offset as i64], read_row)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                result
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLS} FROM monitored_tables ORDER BY id LIMIT ?1 OFFSET ?2"
                    ))
                    .map_err(db_err)?;
                let result = stmt
                    .query_map(params![limit as i64, offset as i64], read_row)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                result
            }
        };
        rows.into_iter().map(into_table).collect()
    }

    pub fn tables_for_connection(&self, connection_id: i64) -> Result<Vec<MonitoredTable>> {
        self.list_tables(Some(connection_id), usize::MAX >> 1, 0)
    }

    /// Fully-qualified names of every table monitored on a connection.
    pub fn monitored_fqns(&self, connection_id: i64) -> Result<BTreeSet<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT schema_name, table_name FROM monitored_tables WHERE connection_id = ?1",
            )
            .map_err(db_err)?;
        let names = stmt
            .query_map(params![connection_id], |row| {
                Ok(format!(
                    "{}.{}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<BTreeSet<_>>>()
            .map_err(db_err)?;
        Ok(names)
    }

    pub fn update_table(
        &self,
        id: i64,
        check_types: Option<&[CheckType]>,
        freshness_sla_minutes: Option<Option<i64>>,
    ) -> Result<MonitoredTable> {
        {
            let conn = self.lock();
            if let Some(checks) = check_types {
                conn.execute(
                    "UPDATE monitored_tables SET check_types = ?2 WHERE id = ?1",
                    params![id, checks_json(checks)],
                )
                .map_err(db_err)?;
            }
            if let Some(sla) = freshness_sla_minutes {
                conn.execute(
                    "UPDATE monitored_tables SET freshness_sla_minutes = ?2 WHERE id = ?1",
                    params![id, sla],
                )
                .map_err(db_err)?;
            }
        }
        self.get_table(id)?
            .ok_or_else(|| AegisError::NotFound(format!("table {id}")))
    }

    pub fn delete_table(&self, id: i64) -> Result<bool> {
        let conn = self.lock();
        let affected = conn
            .execute("DELETE FROM monitored_tables WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    /// Resolve a table by its lineage key.
    pub fn table_by_fqn(&self, fqn: &str) -> Result<Option<MonitoredTable>> {
        let (schema, table) = match fqn.split_once('.') {
            Some(pair) => pair,
            None => return Ok(None),
        };
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {COLS} FROM monitored_tables
                 WHERE schema_name = ?1 AND table_name = ?2"
            ),
            params![schema, table],
            read_row,
        )
        .optional()
        .map_err(db_err)?
        .map(into_table)
        .transpose()
    }

    pub fn count_tables(&self) -> Result<i64> {
        let conn = self.lock();
        conn.query_row("SELECT COUNT(*) FROM monitored_tables", [], |row| row.get(0))
            .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::Dialect;

    #[test]
    fn duplicate_direct_insert_is_an_error_but_enroll_is_silent() {
        let store = Store::open_in_memory().unwrap();
        let conn = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();

        store
            .insert_table(conn.id, "public", "users", &[CheckType::Schema], None)
            .unwrap();

        let dup = store.insert_table(conn.id, "public", "users", &[CheckType::Schema], None);
        assert!(matches!(dup, Err(AegisError::DuplicateEnrollment(_))));

        let skipped = store
            .enroll_if_absent(conn.id, "public", "users", &[CheckType::Schema], None)
            .unwrap();
        assert!(skipped.is_none());
    }

    #[test]
    fn monitored_fqns_are_sorted_and_unique() {
        let store = Store::open_in_memory().unwrap();
        let conn = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        store
            .insert_table(conn.id, "public", "b", &[CheckType::Schema], None)
            .unwrap();
        store
            .insert_table(conn.id, "public", "a", &[CheckType::Schema], None)
            .unwrap();

        let fqns: Vec<String> = store.monitored_fqns(conn.id).unwrap().into_iter().collect();
        assert_eq!(fqns, vec!["public.a".to_string(), "public.b".to_string()]);
    }
}
