//! mysql_async sessions tunnelled through the API server

use async_trait::async_trait;
use kube::Client;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params, Row as DriverRow, Value};
use tracing::{debug, instrument};

use super::{MYSQL_PORT, PodTunnel, Records, SessionProvider, SqlError, SqlSession};
use crate::config::RetrySecs;
use crate::wait::retry_fixed;

/// Default schema selected on connect
const DEFAULT_SCHEMA: &str = "mysql";

pub struct MysqlSessionProvider {
    client: Client,
    retry: RetrySecs,
}

impl MysqlSessionProvider {
    pub fn new(client: Client, retry: RetrySecs) -> Self {
        Self { client, retry }
    }

    async fn connect_once(
        &self,
        namespace: &str,
        pod: &str,
        user: &str,
        password: &str,
    ) -> Result<MysqlSession, SqlError> {
        let tunnel = PodTunnel::open(self.client.clone(), namespace, pod, MYSQL_PORT).await?;
        let opts = OptsBuilder::default()
            .ip_or_hostname("127.0.0.1")
            .tcp_port(tunnel.local_port())
            .prefer_socket(false)
            .user(Some(user))
            .pass(Some(password))
            .db_name(Some(DEFAULT_SCHEMA));
        let conn = Conn::new(opts).await?;
        Ok(MysqlSession { conn, tunnel })
    }
}

#[async_trait]
impl SessionProvider for MysqlSessionProvider {
    #[instrument(skip(self, password))]
    async fn open(
        &self,
        namespace: &str,
        pod: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn SqlSession>, SqlError> {
        let what = format!("session to {namespace}/{pod}");
        let session = retry_fixed(&what, self.retry.attempts, self.retry.backoff(), |_| {
            self.connect_once(namespace, pod, user, password)
        })
        .await
        .map_err(|e| SqlError::Connect {
            target: format!("{namespace}/{pod}"),
            attempts: self.retry.attempts,
            message: e.to_string(),
        })?;
        debug!("Session opened");
        Ok(Box::new(session))
    }
}

pub struct MysqlSession {
    conn: Conn,
    tunnel: PodTunnel,
}

fn positional(params: &[&str]) -> Params {
    Params::Positional(
        params
            .iter()
            .map(|p| Value::Bytes(p.as_bytes().to_vec()))
            .collect(),
    )
}

/// Textual form of a driver value, `None` for NULL.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        Value::Date(y, mo, d, h, mi, s, us) => Some(format!(
            "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{us:06}"
        )),
        Value::Time(neg, d, h, mi, s, us) => {
            let sign = if *neg { "-" } else { "" };
            let hours = u32::from(*h) + *d * 24;
            Some(format!("{sign}{hours:02}:{mi:02}:{s:02}.{us:06}"))
        }
    }
}

fn to_records(rows: Vec<DriverRow>) -> Records {
    let columns = rows
        .first()
        .map(|row| {
            row.columns_ref()
                .iter()
                .map(|c| c.name_str().into_owned())
                .collect()
        })
        .unwrap_or_default();
    let rows = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| row.as_ref(i).and_then(value_to_string))
                .collect()
        })
        .collect();
    Records::new(columns, rows)
}

#[async_trait]
impl SqlSession for MysqlSession {
    async fn exec(&mut self, statement: &str, params: &[&str]) -> Result<u64, SqlError> {
        if params.is_empty() {
            self.conn.query_drop(statement).await?;
        } else {
            self.conn.exec_drop(statement, positional(params)).await?;
        }
        Ok(self.conn.affected_rows())
    }

    async fn fetch_all(&mut self, query: &str, params: &[&str]) -> Result<Records, SqlError> {
        let rows: Vec<DriverRow> = if params.is_empty() {
            self.conn.query(query).await?
        } else {
            self.conn.exec(query, positional(params)).await?
        };
        Ok(to_records(rows))
    }

    async fn close(self: Box<Self>) -> Result<(), SqlError> {
        let MysqlSession { conn, mut tunnel } = *self;
        let result = conn.disconnect().await;
        tunnel.close();
        Ok(result?)
    }
}
