//! GTID synchronisation and data consistency across instances

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument};

use super::pod::pod_index;
use crate::error::{Error, Result};
use crate::mysql::{Credentials, SessionProvider, SqlSession, close_session};

/// System schemas excluded from data comparison
pub const IGNORED_SCHEMAS: [&str; 4] = ["mysql", "information_schema", "performance_schema", "sys"];

pub const GTID_EXECUTED_QUERY: &str = "SELECT @@GLOBAL.gtid_executed";
pub const WAIT_FOR_GTID_QUERY: &str = "SELECT WAIT_FOR_EXECUTED_GTID_SET(?, ?)";
/// Transactions of the given set that the session's server has not executed
pub const GTID_SUBTRACT_QUERY: &str = "SELECT GTID_SUBTRACT(?, @@GLOBAL.gtid_executed)";
pub const SHOW_SCHEMAS_QUERY: &str = "SHOW SCHEMAS";

/// Quote an identifier with backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub async fn executed_gtid_set(session: &mut dyn SqlSession) -> Result<String> {
    Ok(session
        .fetch_value(GTID_EXECUTED_QUERY, &[])
        .await?
        .unwrap_or_default())
}

/// Block until `gtid_set` is applied on the session's server or `timeout_secs` passes.
pub async fn wait_for_gtid_set(
    session: &mut dyn SqlSession,
    gtid_set: &str,
    timeout_secs: u64,
    pod: &str,
) -> Result<()> {
    let timeout = timeout_secs.to_string();
    let result = session
        .fetch_value(WAIT_FOR_GTID_QUERY, &[gtid_set, &timeout])
        .await?
        .unwrap_or_default();
    if result != "0" {
        return Err(Error::verification(format!(
            "{pod} did not apply GTID set {gtid_set} within {timeout_secs}s (result {result})"
        )));
    }
    Ok(())
}

async fn gtid_subtract(session: &mut dyn SqlSession, gtid_set: &str) -> Result<String> {
    Ok(session
        .fetch_value(GTID_SUBTRACT_QUERY, &[gtid_set])
        .await?
        .unwrap_or_default())
}

async fn open_all(
    sessions: &dyn SessionProvider,
    namespace: &str,
    pods: &[String],
    credentials: &Credentials,
) -> Result<Vec<(String, Box<dyn SqlSession>)>> {
    let mut opened = Vec::with_capacity(pods.len());
    for pod in pods {
        match sessions
            .open(namespace, pod, &credentials.user, &credentials.password)
            .await
        {
            Ok(session) => opened.push((pod.clone(), session)),
            Err(e) => {
                close_all(opened).await;
                return Err(e.into());
            }
        }
    }
    Ok(opened)
}

async fn close_all(opened: Vec<(String, Box<dyn SqlSession>)>) {
    for (_, session) in opened {
        close_session(session).await;
    }
}

async fn sync_sessions(opened: &mut [(String, Box<dyn SqlSession>)], timeout_secs: u64) -> Result<()> {
    let Some(((seed_name, seed), others)) = opened.split_first_mut() else {
        return Ok(());
    };

    for (name, session) in others.iter_mut() {
        let gtid_set = executed_gtid_set(session.as_mut()).await?;
        debug!(from = %name, to = %seed_name, "Syncing GTID set");
        wait_for_gtid_set(seed.as_mut(), &gtid_set, timeout_secs, seed_name).await?;
    }

    let seed_set = executed_gtid_set(seed.as_mut()).await?;
    for (name, session) in others.iter_mut() {
        wait_for_gtid_set(session.as_mut(), &seed_set, timeout_secs, name).await?;
    }
    Ok(())
}

/// Make every listed instance catch up with the union of all their
/// transactions: the first pod waits for each other pod's executed set,
/// then every other pod waits for the first pod's resulting set.
#[instrument(skip(sessions, credentials))]
pub async fn cross_sync_gtids(
    sessions: &dyn SessionProvider,
    namespace: &str,
    pods: &[String],
    credentials: &Credentials,
    timeout_secs: u64,
) -> Result<()> {
    let mut opened = open_all(sessions, namespace, pods, credentials).await?;
    let result = sync_sessions(&mut opened, timeout_secs).await;
    close_all(opened).await;
    if result.is_ok() {
        info!(pods = pods.len(), "GTID sets synchronised");
    }
    result
}

/// Row count and checksum of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub rows: String,
    pub checksum: Option<String>,
}

pub type SchemaReport = BTreeMap<String, TableInfo>;

pub async fn list_schemas(session: &mut dyn SqlSession) -> Result<BTreeSet<String>> {
    Ok(session
        .fetch_all(SHOW_SCHEMAS_QUERY, &[])
        .await?
        .column_values(0)
        .into_iter()
        .filter(|schema| !IGNORED_SCHEMAS.contains(&schema.as_str()))
        .collect())
}

pub async fn schema_report(session: &mut dyn SqlSession, schema: &str) -> Result<SchemaReport> {
    let schema_id = quote_identifier(schema);
    let tables = session
        .fetch_all(&format!("SHOW TABLES FROM {schema_id}"), &[])
        .await?
        .column_values(0);

    let mut report = SchemaReport::new();
    for table in tables {
        let qualified = format!("{schema_id}.{}", quote_identifier(&table));
        let rows = session
            .fetch_value(&format!("SELECT COUNT(*) FROM {qualified}"), &[])
            .await?
            .unwrap_or_default();
        let checksum = session
            .fetch_one(&format!("CHECKSUM TABLE {qualified}"), &[])
            .await?
            .and_then(|row| row.get(1).cloned().flatten());
        report.insert(table, TableInfo { rows, checksum });
    }
    Ok(report)
}

/// Executed transactions and user data of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSnapshot {
    pub gtid_executed: String,
    pub schemas: BTreeMap<String, SchemaReport>,
}

impl DataSnapshot {
    pub async fn collect(session: &mut dyn SqlSession) -> Result<Self> {
        let gtid_executed = executed_gtid_set(session).await?;
        let mut schemas = BTreeMap::new();
        for schema in list_schemas(session).await? {
            let report = schema_report(session, &schema).await?;
            schemas.insert(schema, report);
        }
        Ok(Self {
            gtid_executed,
            schemas,
        })
    }
}

/// Schema lists and per-table reports of a replica against the primary.
pub fn compare_snapshots(primary: &DataSnapshot, replica: &DataSnapshot, pod: &str) -> Result<()> {
    let primary_schemas: Vec<&String> = primary.schemas.keys().collect();
    let replica_schemas: Vec<&String> = replica.schemas.keys().collect();
    if primary_schemas != replica_schemas {
        return Err(Error::mismatch(
            format!("schemas on {pod}"),
            format!("{primary_schemas:?}"),
            format!("{replica_schemas:?}"),
        ));
    }
    for (schema, expected) in &primary.schemas {
        let actual = &replica.schemas[schema];
        if expected != actual {
            return Err(Error::mismatch(
                format!("table report of schema {schema} on {pod}"),
                format!("{expected:?}"),
                format!("{actual:?}"),
            ));
        }
    }
    Ok(())
}

async fn compare_replica(
    primary: &mut dyn SqlSession,
    primary_data: &DataSnapshot,
    replica: &mut dyn SqlSession,
    pod: &str,
    timeout_secs: u64,
) -> Result<()> {
    wait_for_gtid_set(replica, &primary_data.gtid_executed, timeout_secs, pod).await?;

    let missing = gtid_subtract(replica, &primary_data.gtid_executed).await?;
    if !missing.is_empty() {
        return Err(Error::verification(format!(
            "{pod} is missing transactions {missing}"
        )));
    }

    let replica_data = DataSnapshot::collect(replica).await?;
    let errant = gtid_subtract(primary, &replica_data.gtid_executed).await?;
    if !errant.is_empty() {
        return Err(Error::verification(format!(
            "{pod} has errant transactions {errant}"
        )));
    }

    compare_snapshots(primary_data, &replica_data, pod)
}

async fn check_replicas(
    sessions: &dyn SessionProvider,
    namespace: &str,
    pods: &[String],
    primary: usize,
    primary_session: &mut dyn SqlSession,
    credentials: &Credentials,
    timeout_secs: u64,
) -> Result<()> {
    let primary_data = DataSnapshot::collect(primary_session).await?;
    for (index, pod) in pods.iter().enumerate() {
        if index == primary {
            continue;
        }
        let mut session = sessions
            .open(namespace, pod, &credentials.user, &credentials.password)
            .await?;
        let result =
            compare_replica(primary_session, &primary_data, session.as_mut(), pod, timeout_secs).await;
        close_session(session).await;
        result?;
        debug!(pod = %pod, "Replica consistent with primary");
    }
    Ok(())
}

/// Check that every replica has applied exactly the primary's transactions
/// and holds identical user data.
#[instrument(skip(sessions, credentials))]
pub async fn check_data(
    sessions: &dyn SessionProvider,
    namespace: &str,
    pods: &[String],
    primary: usize,
    credentials: &Credentials,
    timeout_secs: u64,
) -> Result<()> {
    let primary_pod = pods.get(primary).ok_or_else(|| {
        Error::verification(format!("primary index {primary} out of range for {} pods", pods.len()))
    })?;
    if pod_index(primary_pod) != Some(primary) {
        return Err(Error::mismatch("primary pod ordinal", primary, primary_pod));
    }

    let mut session = sessions
        .open(namespace, primary_pod, &credentials.user, &credentials.password)
        .await?;
    let result = check_replicas(
        sessions,
        namespace,
        pods,
        primary,
        session.as_mut(),
        credentials,
        timeout_secs,
    )
    .await;
    close_session(session).await;
    result?;
    info!(primary = %primary_pod, "Data consistent across instances");
    Ok(())
}

/// Values of one result column as a set.
pub async fn query_set(
    sessions: &dyn SessionProvider,
    namespace: &str,
    pod: &str,
    credentials: &Credentials,
    query: &str,
    column: usize,
) -> Result<BTreeSet<String>> {
    let mut session = sessions
        .open(namespace, pod, &credentials.user, &credentials.password)
        .await?;
    let records = session.fetch_all(query, &[]).await;
    close_session(session).await;
    Ok(records?.column_values(column).into_iter().collect())
}
