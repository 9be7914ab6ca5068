//! Fault injection into running clusters
//!
//! Helpers the crash and corruption scenarios use to disturb a cluster:
//! signalling processes inside containers and building patches for the
//! cluster resource.

use serde_json::Value;
use tracing::{info, instrument};

use crate::config::RetrySecs;
use crate::error::{Error, Result};
use crate::store::{ContainerId, JsonPatchOp, ObjectPatch, ObjectStore};
use crate::wait::retry_fixed;

/// Shell used to run commands inside containers
const SHELL: &str = "/bin/sh";

/// Send `signal` to `pid` inside a container, retrying failed execs.
#[instrument(skip(store, retry))]
pub async fn kill_process(
    store: &dyn ObjectStore,
    retry: RetrySecs,
    namespace: &str,
    pod: &str,
    container: ContainerId,
    signal: i32,
    pid: u32,
) -> Result<()> {
    let command = format!("kill -{signal} {pid}");
    let command = command.as_str();
    let what = format!("kill {container} on {namespace}/{pod}");
    retry_fixed(&what, retry.attempts, retry.backoff(), |_| async move {
        store
            .exec(
                namespace,
                pod,
                container.as_str(),
                vec![SHELL.to_string(), "-c".to_string(), command.to_string()],
            )
            .await
    })
    .await?;
    info!("Signal delivered");
    Ok(())
}

/// Contents of a file inside a container.
pub async fn read_file(
    store: &dyn ObjectStore,
    namespace: &str,
    pod: &str,
    container: ContainerId,
    path: &str,
) -> Result<String> {
    Ok(store
        .exec(
            namespace,
            pod,
            container.as_str(),
            vec!["cat".to_string(), path.to_string()],
        )
        .await?)
}

/// Single-operation JSON patch replacing the value at `path`.
pub fn replace_patch(path: &str, value: impl Into<Value>) -> ObjectPatch {
    ObjectPatch::Json(vec![JsonPatchOp::replace(path, value)])
}

pub fn remove_patch(path: &str) -> ObjectPatch {
    ObjectPatch::Json(vec![JsonPatchOp::remove(path)])
}

/// Merge patch from a YAML document.
pub fn merge_patch_from_yaml(yaml: &str) -> Result<ObjectPatch> {
    let value: Value = serde_yaml::from_str(yaml)
        .map_err(|e| Error::verification(format!("invalid merge patch: {e}")))?;
    if !value.is_object() {
        return Err(Error::verification("merge patch must be a mapping"));
    }
    Ok(ObjectPatch::Merge(value))
}
