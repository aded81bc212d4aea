//! Connection CRUD.

use super::{db_err, format_ts, parse_ts, Store};
use aegis_core::{AegisError, Connection, Dialect, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

const COLS: &str = "id, name, dialect, uri, is_active, created_at";

type ConnRow = (i64, String, String, String, i64, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<ConnRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_connection((id, name, dialect, uri, is_active, created_at): ConnRow) -> Result<Connection> {
    Ok(Connection {
        id,
        name,
        dialect: Dialect::parse(&dialect)
            .ok_or_else(|| AegisError::Storage(format!("unknown dialect {dialect:?}")))?,
        uri,
        is_active: is_active != 0,
        created_at: parse_ts(&created_at)?,
    })
}

impl Store {
    pub fn insert_connection(
        &self,
        name: &str,
        dialect: Dialect,
        uri_ciphertext: &str,
        is_active: bool,
    ) -> Result<Connection> {
        let now = Utc::now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO connections (name, dialect, uri, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                dialect.as_str(),
                uri_ciphertext,
                is_active as i64,
                format_ts(now)
            ],
        )
        .map_err(db_err)?;
        Ok(Connection {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            dialect,
            uri: uri_ciphertext.to_string(),
            is_active,
            created_at: now,
        })
    }

    pub fn get_connection(&self, id: i64) -> Result<Option<Connection>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {COLS} FROM connections WHERE id = ?1"),
            params![id],
            read_row,
        )
        .optional()
        .map_err(db_err)?
        .map(into_connection)
        .transpose()
    }

    pub fn list_connections(&self) -> Result<Vec<Connection>> {
        self.query_connections(&format!("SELECT {COLS} FROM connections ORDER BY id"))
    }

    pub fn active_connections(&self) -> Result<Vec<Connection>> {
        self.query_connections(&format!(
            "SELECT {COLS} FROM connections WHERE is_active = 1 ORDER BY id"
        ))
    }

    fn query_connections(&self, sql: &str) -> Result<Vec<Connection>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(into_connection).collect()
    }

    pub fn update_connection(
        &self,
        id: i64,
        name: Option<&str>,
        uri_ciphertext: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Connection> {
        {
            let conn = self.lock();
            if let Some(name) = name {
                conn.execute(
                    "UPDATE connections SET name = ?2 WHERE id = ?1",
                    params![id, name],
                )
                .map_err(db_err)?;
            }
            if let Some(uri) = uri_ciphertext {
                conn.execute(
                    "UPDATE connections SET uri = ?2 WHERE id = ?1",
                    params![id, uri],
                )
                .map_err(db_err)?;
            }
            if let Some(active) = is_active {
                conn.execute(
                    "UPDATE connections SET is_active = ?2 WHERE id = ?1",
                    params![id, active as i64],
                )
                .map_err(db_err)?;
            }
        }
        self.get_connection(id)?
            .ok_or_else(|| AegisError::NotFound(format!("connection {id}")))
    }

    pub fn delete_connection(&self, id: i64) -> Result<bool> {
        let conn = self.lock();
        let affected = conn
            .execute("DELETE FROM connections WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(affected > 0)
    }
}
