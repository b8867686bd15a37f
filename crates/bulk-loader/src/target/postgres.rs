//! PostgreSQL destination.
//!
//! Each session gets its own `tokio_postgres::Client`; the connection task is
//! spawned onto the runtime and ends when the client is dropped.
//!
//! - Row paths use a prepared single-row INSERT, with `RETURNING` when the
//!   destination generates identity and `OVERRIDING SYSTEM VALUE` when the
//!   supplied identity is kept.
//! - Native bulk-copy streams a hand-encoded `FORMAT BINARY` COPY per
//!   transport chunk.
//! - The bulk helper path hands rows to `BinaryCopyInWriter`.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config as PgConfig, NoTls, Statement};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, info};

use super::tls::{SslMode, TlsBuilder};
use super::{BulkInsertOptions, ConnectionFactory, TargetConnection};
use crate::config::TargetConfig;
use crate::core::identifier::{column_list_pg, qualify_pg, quote_pg};
use crate::core::mapping::WriteShape;
use crate::core::schema::{PrimitiveType, TableName, TableSchema};
use crate::core::typemap::postgres_type;
use crate::core::value::SqlValue;
use crate::error::{LoadError, Result};
use crate::loader::transport::TransportChunk;

/// Factory for PostgreSQL sessions.
pub struct PgTarget {
    pg_config: PgConfig,
    tls: Option<MakeRustlsConnect>,
    description: String,
}

impl PgTarget {
    /// Build from configuration. No connection is opened here.
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("bulk-loader");
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        let tls = TlsBuilder::new(SslMode::parse(&config.ssl_mode)?).build()?;

        Ok(Self {
            pg_config,
            tls,
            description: format!(
                "postgres://{}@{}:{}/{}",
                config.user, config.host, config.port, config.database
            ),
        })
    }
}

#[async_trait]
impl ConnectionFactory for PgTarget {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection> {
        let client = match &self.tls {
            Some(tls) => {
                let (client, connection) = self
                    .pg_config
                    .connect(tls.clone())
                    .await
                    .map_err(|e| LoadError::connectivity("connecting to PostgreSQL target", e))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                client
            }
            None => {
                let (client, connection) = self
                    .pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| LoadError::connectivity("connecting to PostgreSQL target", e))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                client
            }
        };

        debug!("Connected to {}", self.description);
        Ok(PgConnection {
            client,
            in_transaction: false,
            statements: HashMap::new(),
        })
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// One PostgreSQL session.
pub struct PgConnection {
    client: Client,
    in_transaction: bool,
    statements: HashMap<String, Statement>,
}

impl PgConnection {
    /// Prepare `sql` once per session.
    async fn prepared(&mut self, table: &str, sql: String) -> Result<Statement> {
        if let Some(stmt) = self.statements.get(&sql) {
            return Ok(stmt.clone());
        }
        let stmt = self
            .client
            .prepare(&sql)
            .await
            .map_err(|e| LoadError::from_pg(table, "preparing insert", e))?;
        self.statements.insert(sql, stmt.clone());
        Ok(stmt)
    }

    async fn simple(&mut self, sql: &str, context: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| LoadError::from_pg("transaction", context, e))
    }

    fn copy_sql(shape: &WriteShape) -> Result<String> {
        Ok(format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT BINARY)",
            qualify_pg(&shape.table)?,
            column_list_pg(shape.column_names())?
        ))
    }
}

/// Single-row INSERT for a write shape.
fn insert_sql(shape: &WriteShape) -> Result<String> {
    let placeholders: Vec<String> = (1..=shape.columns.len()).map(|i| format!("${}", i)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({})",
        qualify_pg(&shape.table)?,
        column_list_pg(shape.column_names())?
    );
    if shape.kept_identity_index().is_some() {
        sql.push_str(" OVERRIDING SYSTEM VALUE");
    }
    sql.push_str(&format!(" VALUES ({})", placeholders.join(", ")));
    if let Some(identity) = &shape.generated_identity {
        sql.push_str(&format!(" RETURNING {}", quote_pg(&identity.name)?));
    }
    Ok(sql)
}

/// Encode one transport chunk as a complete PGCOPY binary stream.
fn encode_copy_chunk(chunk: &TransportChunk<'_>) -> BytesMut {
    let mut buf = BytesMut::with_capacity(chunk.len() * 64 + 21);

    // Header: signature, flags, extension area length
    buf.put_slice(b"PGCOPY\n\xff\r\n\0");
    buf.put_i32(0);
    buf.put_i32(0);

    for i in 0..chunk.len() {
        buf.put_i16(chunk.column_count() as i16);
        for value in chunk.row(i) {
            write_binary_value(&mut buf, value);
        }
    }

    // Trailer
    buf.put_i16(-1);
    buf
}

/// Microseconds since the PostgreSQL epoch, 2000-01-01 00:00:00.
fn pg_epoch_micros(ts: chrono::NaiveDateTime) -> i64 {
    const PG_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;
    ts.and_utc().timestamp_micros() - PG_EPOCH_UNIX_MICROS
}

/// Write a SqlValue in PostgreSQL binary COPY format.
fn write_binary_value(buf: &mut BytesMut, value: &SqlValue<'_>) {
    match value {
        SqlValue::Null(_) => {
            buf.put_i32(-1);
        }
        SqlValue::Bool(b) => {
            buf.put_i32(1);
            buf.put_u8(u8::from(*b));
        }
        SqlValue::I16(i) => {
            buf.put_i32(2);
            buf.put_i16(*i);
        }
        SqlValue::I32(i) => {
            buf.put_i32(4);
            buf.put_i32(*i);
        }
        SqlValue::I64(i) => {
            buf.put_i32(8);
            buf.put_i64(*i);
        }
        SqlValue::F64(f) => {
            buf.put_i32(8);
            buf.put_f64(*f);
        }
        SqlValue::Text(s) => {
            let bytes = s.as_bytes();
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
        }
        SqlValue::DateTime(dt) => {
            buf.put_i32(8);
            buf.put_i64(pg_epoch_micros(*dt));
        }
        SqlValue::DateTimeOffset(dto) => {
            buf.put_i32(8);
            buf.put_i64(pg_epoch_micros(dto.naive_utc()));
        }
    }
}

fn pg_type(primitive: PrimitiveType) -> Type {
    match primitive {
        PrimitiveType::Bool => Type::BOOL,
        PrimitiveType::Int16 => Type::INT2,
        PrimitiveType::Int32 => Type::INT4,
        PrimitiveType::Int64 => Type::INT8,
        PrimitiveType::Float64 => Type::FLOAT8,
        PrimitiveType::Text => Type::TEXT,
        PrimitiveType::Timestamp => Type::TIMESTAMP,
        PrimitiveType::TimestampTz => Type::TIMESTAMPTZ,
    }
}

impl ToSql for SqlValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            SqlValue::Null(_) => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql_checked(ty, out),
            SqlValue::I16(v) => v.to_sql_checked(ty, out),
            SqlValue::I32(v) => v.to_sql_checked(ty, out),
            SqlValue::I64(v) => v.to_sql_checked(ty, out),
            SqlValue::F64(v) => v.to_sql_checked(ty, out),
            SqlValue::Text(v) => {
                let s: &str = v;
                s.to_sql_checked(ty, out)
            }
            SqlValue::DateTime(v) => v.to_sql_checked(ty, out),
            SqlValue::DateTimeOffset(v) => v.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn as_params<'v>(row: &'v [SqlValue<'_>]) -> Vec<&'v (dyn ToSql + Sync)> {
    row.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl TargetConnection for PgConnection {
    async fn begin(&mut self) -> Result<()> {
        self.simple("BEGIN", "beginning transaction").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        // The transaction is over whether or not COMMIT succeeds.
        self.in_transaction = false;
        self.simple("COMMIT", "committing transaction").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.simple("ROLLBACK", "rolling back transaction").await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn insert_row(&mut self, shape: &WriteShape, row: &[SqlValue<'_>]) -> Result<Option<i64>> {
        let table = shape.full_name();
        let stmt = self.prepared(&table, insert_sql(shape)?).await?;
        let params = as_params(row);

        match &shape.generated_identity {
            Some(identity) => {
                let returned = self
                    .client
                    .query_one(&stmt, &params)
                    .await
                    .map_err(|e| LoadError::from_pg(&table, "inserting row", e))?;
                let id = match identity.primitive {
                    PrimitiveType::Int16 => returned.try_get::<_, i16>(0).map(i64::from),
                    PrimitiveType::Int32 => returned.try_get::<_, i32>(0).map(i64::from),
                    _ => returned.try_get::<_, i64>(0),
                }
                .map_err(|e| LoadError::from_pg(&table, "reading generated identity", e))?;
                Ok(Some(id))
            }
            None => {
                self.client
                    .execute(&stmt, &params)
                    .await
                    .map_err(|e| LoadError::from_pg(&table, "inserting row", e))?;
                Ok(None)
            }
        }
    }

    async fn copy_rows(&mut self, shape: &WriteShape, chunk: TransportChunk<'_>) -> Result<u64> {
        if chunk.is_empty() {
            return Ok(0);
        }
        let table = shape.full_name();
        let copy_sql = Self::copy_sql(shape)?;

        let sink = self
            .client
            .copy_in(&copy_sql)
            .await
            .map_err(|e| LoadError::from_pg(&table, "starting COPY", e))?;

        let data = encode_copy_chunk(&chunk).freeze();
        tokio::pin!(sink);
        sink.send(data)
            .await
            .map_err(|e| LoadError::from_pg(&table, "sending COPY data", e))?;
        let written = sink
            .finish()
            .await
            .map_err(|e| LoadError::from_pg(&table, "finishing COPY", e))?;

        debug!(
            "COPY {} rows into {} (offset {})",
            written,
            table,
            chunk.offset()
        );
        Ok(written)
    }

    async fn bulk_insert(
        &mut self,
        shape: &WriteShape,
        rows: &[Vec<SqlValue<'_>>],
        options: BulkInsertOptions,
    ) -> Result<u64> {
        options.check_shape(shape)?;
        if rows.is_empty() {
            return Ok(0);
        }
        if !options.check_constraints {
            debug!("PostgreSQL COPY always checks constraints; check_constraints=false has no effect");
        }
        let table = shape.full_name();
        let types: Vec<Type> = shape.columns.iter().map(|c| pg_type(c.primitive)).collect();
        let defaults: Vec<SqlValue<'static>> = shape
            .columns
            .iter()
            .map(|c| SqlValue::default_for(c.primitive))
            .collect();

        let sink = self
            .client
            .copy_in(&Self::copy_sql(shape)?)
            .await
            .map_err(|e| LoadError::from_pg(&table, "starting bulk insert", e))?;
        let writer = BinaryCopyInWriter::new(sink, &types);
        tokio::pin!(writer);

        for row in rows {
            let params: Vec<&(dyn ToSql + Sync)> = row
                .iter()
                .zip(&defaults)
                .map(|(value, default)| {
                    if value.is_null() && !options.keep_nulls {
                        default as &(dyn ToSql + Sync)
                    } else {
                        value as &(dyn ToSql + Sync)
                    }
                })
                .collect();
            writer
                .as_mut()
                .write(&params)
                .await
                .map_err(|e| LoadError::from_pg(&table, "writing bulk insert row", e))?;
        }

        let written = writer
            .finish()
            .await
            .map_err(|e| LoadError::from_pg(&table, "finishing bulk insert", e))?;
        debug!("Bulk helper wrote {} rows into {}", written, table);
        Ok(written)
    }

    async fn ensure_table(&mut self, schema: &TableSchema) -> Result<()> {
        let table = schema.full_name();
        let mut columns = Vec::with_capacity(schema.columns.len());
        for col in &schema.columns {
            let mut def = format!("{} {}", quote_pg(&col.name)?, postgres_type(col));
            if col.is_identity {
                def.push_str(" GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY");
            } else if !col.is_nullable {
                def.push_str(" NOT NULL");
            }
            columns.push(def);
        }
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {};\nCREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_pg(&schema.table.schema)?,
            qualify_pg(&schema.table)?,
            columns.join(",\n    ")
        );
        self.client
            .batch_execute(&sql)
            .await
            .map_err(|e| LoadError::from_pg(&table, "creating table", e))?;
        info!("Ensured table {}", table);
        Ok(())
    }

    async fn truncate(&mut self, table: &TableName) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {} RESTART IDENTITY", qualify_pg(table)?);
        self.client
            .batch_execute(&sql)
            .await
            .map_err(|e| LoadError::from_pg(&table.to_string(), "truncating table", e))?;
        debug!("Truncated {}", table);
        Ok(())
    }

    async fn row_count(&mut self, table: &TableName) -> Result<i64> {
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", qualify_pg(table)?);
        let row = self
            .client
            .query_one(&sql, &[])
            .await
            .map_err(|e| LoadError::from_pg(&table.to_string(), "counting rows", e))?;
        Ok(row.get::<_, i64>(0))
    }

    async fn reset_identity(&mut self, schema: &TableSchema) -> Result<()> {
        let Some((_, identity)) = schema.identity_column() else {
            return Ok(());
        };
        let table = schema.full_name();
        let qualified = qualify_pg(&schema.table)?;
        let column = quote_pg(&identity.name)?;

        let sql = format!(
            "SELECT setval(seq::regclass, COALESCE((SELECT MAX({column}) FROM {qualified}), 0) + 1, false) \
             FROM pg_get_serial_sequence($1, $2) AS seq WHERE seq IS NOT NULL"
        );
        let rows = self
            .client
            .query(&sql, &[&qualified, &identity.name])
            .await
            .map_err(|e| LoadError::from_pg(&table, "resetting identity sequence", e))?;
        if !rows.is_empty() {
            debug!("Reset identity sequence for {}", table);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client ends the connection task; an open transaction
        // is rolled back by the server.
        self.in_transaction = false;
        self.statements.clear();
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mapping::RowMapper;
    use crate::core::record::Example;
    use crate::core::schema::SchemaRegistry;
    use crate::loader::transport::TransportBuffer;
    use chrono::NaiveDate;

    fn schema() -> TableSchema {
        SchemaRegistry::new()
            .map::<Example>("dbo", "Example")
            .resolve::<Example>()
            .unwrap()
    }

    #[test]
    fn test_insert_sql_returns_generated_identity() {
        let shape = WriteShape::new(&schema(), false);
        assert_eq!(
            insert_sql(&shape).unwrap(),
            "INSERT INTO \"dbo\".\"Example\" (\"Description\", \"LastModified\") \
             VALUES ($1, $2) RETURNING \"Id\""
        );
    }

    #[test]
    fn test_insert_sql_overrides_kept_identity() {
        let shape = WriteShape::new(&schema(), true);
        assert_eq!(
            insert_sql(&shape).unwrap(),
            "INSERT INTO \"dbo\".\"Example\" (\"Id\", \"Description\", \"LastModified\") \
             OVERRIDING SYSTEM VALUE VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn test_pg_epoch_micros() {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(pg_epoch_micros(epoch), 0);
        let next_day = NaiveDate::from_ymd_opt(2000, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(pg_epoch_micros(next_day), 86_400_000_000);
    }

    #[test]
    fn test_encode_copy_chunk_layout() {
        let schema = schema();
        let mapper = RowMapper::<Example>::build(&schema, true).unwrap();
        let stamp = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        let records = vec![Example::new(7, None, stamp)];
        let buffer = TransportBuffer::materialize(&mapper, &records, 2500).unwrap();
        let chunk = buffer.chunks().next().unwrap();

        let buf = encode_copy_chunk(&chunk);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"PGCOPY\n\xff\r\n\0");
        expected.extend_from_slice(&0i32.to_be_bytes());
        expected.extend_from_slice(&0i32.to_be_bytes());
        expected.extend_from_slice(&3i16.to_be_bytes());
        expected.extend_from_slice(&4i32.to_be_bytes());
        expected.extend_from_slice(&7i32.to_be_bytes());
        expected.extend_from_slice(&(-1i32).to_be_bytes());
        expected.extend_from_slice(&8i32.to_be_bytes());
        expected.extend_from_slice(&1_000_000i64.to_be_bytes());
        expected.extend_from_slice(&(-1i16).to_be_bytes());
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn test_sql_value_to_sql_writes_null() {
        let mut out = BytesMut::new();
        let null = SqlValue::Null(PrimitiveType::Text);
        assert!(matches!(null.to_sql(&Type::TEXT, &mut out), Ok(IsNull::Yes)));
        assert!(out.is_empty());

        let text = SqlValue::text_borrowed("abc");
        assert!(matches!(text.to_sql(&Type::VARCHAR, &mut out), Ok(IsNull::No)));
        assert_eq!(&out[..], b"abc");
    }

    #[test]
    fn test_sql_value_rejects_mismatched_type() {
        let mut out = BytesMut::new();
        assert!(SqlValue::I32(1).to_sql(&Type::TEXT, &mut out).is_err());
    }
}
