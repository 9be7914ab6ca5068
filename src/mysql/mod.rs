//! Database sessions against individual instance pods
//!
//! A session is opened per pod, used for a handful of queries and closed
//! explicitly by the caller. Result sets are materialised as [`Records`] of
//! nullable strings since every check compares textual values.

pub mod port_forward;
pub mod session;

use async_trait::async_trait;
use thiserror::Error;

pub use port_forward::{PodTunnel, PortForwardError};
pub use session::{MysqlSession, MysqlSessionProvider};

/// Port the server container listens on
pub const MYSQL_PORT: u16 = 3306;

#[derive(Error, Debug)]
pub enum SqlError {
    #[error("MySQL error: {0}")]
    Driver(#[from] mysql_async::Error),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] PortForwardError),

    #[error("Failed to connect to {target} after {attempts} attempts: {message}")]
    Connect {
        target: String,
        attempts: u32,
        message: String,
    },

    #[error("Query returned no rows: {0}")]
    NoRows(String),

    #[error("Unexpected result: {0}")]
    Unexpected(String),
}

impl SqlError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SqlError::Driver(mysql_async::Error::Io(_)) => true,
            SqlError::Driver(_) => false,
            SqlError::Tunnel(_) | SqlError::Connect { .. } => true,
            SqlError::NoRows(_) | SqlError::Unexpected(_) => false,
        }
    }
}

pub type Row = Vec<Option<String>>;

/// A materialised result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Records {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Records {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build from borrowed cells, mostly for scripted sessions.
    pub fn from_cells(columns: &[&str], rows: &[&[Option<&str>]]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    /// Non-null values of one column, in row order.
    pub fn column_values(&self, column: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).cloned().flatten())
            .collect()
    }
}

#[async_trait]
pub trait SqlSession: Send {
    /// Run a statement, returning the affected row count.
    async fn exec(&mut self, statement: &str, params: &[&str]) -> Result<u64, SqlError>;

    async fn fetch_all(&mut self, query: &str, params: &[&str]) -> Result<Records, SqlError>;

    async fn close(self: Box<Self>) -> Result<(), SqlError>;

    async fn fetch_one(&mut self, query: &str, params: &[&str]) -> Result<Option<Row>, SqlError> {
        Ok(self.fetch_all(query, params).await?.rows.into_iter().next())
    }

    /// First column of the first row, `None` when there is no row or it is NULL.
    async fn fetch_value(
        &mut self,
        query: &str,
        params: &[&str],
    ) -> Result<Option<String>, SqlError> {
        Ok(self
            .fetch_one(query, params)
            .await?
            .and_then(|row| row.into_iter().next().flatten()))
    }
}

/// Opens sessions to instance pods.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(
        &self,
        namespace: &str,
        pod: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn SqlSession>, SqlError>;
}

/// Close a session after use, logging instead of failing.
pub async fn close_session(session: Box<dyn SqlSession>) {
    if let Err(e) = session.close().await {
        tracing::debug!(error = %e, "Session close failed");
    }
}

/// Credentials used for instance sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}
