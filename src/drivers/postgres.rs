use super::{returns_rows, runtime};
use crate::config::DbConfig;
use crate::core::db::connection::Driver;
use crate::core::db::query::{QueryResult, Row, RowSink};
use crate::core::{DbError, Result};
use futures::StreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, Postgres};
use sqlx::{Column, Connection, Decode, Executor, Row as _, ValueRef};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// A PostgreSQL connection. Generated ids are read back through
/// `RETURNING` or `CURRVAL`, so the driver never reports one itself.
pub struct PostgresDriver {
    runtime: Runtime,
    conn: PgConnection,
}

impl PostgresDriver {
    pub fn connect(config: &DbConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port_or_default())
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .options([("search_path", config.postgres.schema.as_str())]);

        let runtime = runtime()?;
        let conn = runtime
            .block_on(PgConnection::connect_with(&options))
            .map_err(|e| DbError::Connection(format!("{}:{}: {}", config.host, config.port_or_default(), e)))?;
        info!(host = %config.host, database = %config.database, "connected to PostgreSQL");

        Ok(PostgresDriver { runtime, conn })
    }
}

impl Driver for PostgresDriver {
    fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        if returns_rows(sql) {
            let rows = self.runtime.block_on(self.conn.fetch_all(sql))?;
            let columns = rows.first().map(column_names).unwrap_or_default();
            let values = rows.iter().map(row_values).collect::<Result<Vec<_>>>()?;
            return Ok(QueryResult::new(columns, values));
        }
        let done = self.runtime.block_on(self.conn.execute(sql))?;
        Ok(QueryResult::affected(done.rows_affected()))
    }

    fn stream(&mut self, sql: &str, on_row: &mut RowSink<'_>) -> Result<u64> {
        if !returns_rows(sql) {
            self.execute(sql)?;
            return Ok(0);
        }
        debug!("streaming rows");
        let conn = &mut self.conn;
        self.runtime.block_on(async {
            let mut rows = conn.fetch(sql);
            let mut columns: Option<Vec<String>> = None;
            let mut count = 0;
            while let Some(row) = rows.next().await {
                let row = row?;
                let names = columns.get_or_insert_with(|| column_names(&row));
                let values = row_values(&row)?;
                on_row(Row::new(names, &values))?;
                count += 1;
            }
            Ok::<_, DbError>(count)
        })
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>> {
        Ok(None)
    }
}

fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn row_values(row: &PgRow) -> Result<Vec<Option<String>>> {
    let mut cells = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            cells.push(None);
            continue;
        }
        let text = <String as Decode<Postgres>>::decode(raw)
            .map_err(|e| DbError::Driver(format!("column {}: {}", i, e)))?;
        cells.push(Some(text));
    }
    Ok(cells)
}
