//! [`ObjectStore`] backed by a live API server

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, Namespace, Pod};
use kube::api::{
    Api, ApiResource, AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams,
    LogParams, Patch, PatchParams, PostParams, WatchEvent, WatchParams,
};
use kube::core::ObjectMeta;
use kube::Client;
use tracing::{debug, instrument};

use super::{EventStream, ObjectEvent, ObjectPatch, ObjectStore, ResourceKind, SinceVersion, StoreError};

/// Field manager recorded on server-side applies
pub const FIELD_MANAGER: &str = "mysql-operator-e2e";

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the ambient kubeconfig or in-cluster credentials.
    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        if kind.info().namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

pub fn api_resource(kind: ResourceKind) -> ApiResource {
    let info = kind.info();
    let gvk = GroupVersionKind::gvk(info.group, info.version, info.kind);
    ApiResource::from_gvk_with_plural(&gvk, info.plural)
}

fn convert_event(event: Result<WatchEvent<DynamicObject>, kube::Error>) -> Result<ObjectEvent, StoreError> {
    match event? {
        WatchEvent::Added(obj) => Ok(ObjectEvent::Added(obj)),
        WatchEvent::Modified(obj) => Ok(ObjectEvent::Modified(obj)),
        WatchEvent::Deleted(obj) => Ok(ObjectEvent::Deleted(obj)),
        WatchEvent::Bookmark(mark) => Ok(ObjectEvent::Bookmark(mark.metadata.resource_version)),
        WatchEvent::Error(e) => Err(StoreError::Watch(format!("{} ({})", e.message, e.code))),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.api(kind, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        Ok(self
            .api(kind, namespace)
            .list(&ListParams::default())
            .await?
            .items)
    }

    #[instrument(skip(self))]
    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        since: &SinceVersion,
    ) -> Result<EventStream, StoreError> {
        let stream = self
            .api(kind, namespace)
            .watch(&WatchParams::default(), since.as_watch_param())
            .await?;
        debug!("Watch opened");
        Ok(stream.map(convert_event).boxed())
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<(), StoreError> {
        let api = self.api(kind, namespace);
        let params = PatchParams::default();
        match patch {
            ObjectPatch::Json(ops) => {
                let patch: json_patch::Patch = serde_json::from_value(serde_json::to_value(ops)?)?;
                api.patch(name, &params, &Patch::Json::<()>(patch)).await?;
            }
            ObjectPatch::Merge(value) => {
                api.patch(name, &params, &Patch::Merge(value)).await?;
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        self.api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::NotFound(format!("name of {kind} manifest")))?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(self
            .api(kind, namespace)
            .patch(name, &params, &Patch::Apply(obj))
            .await?)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list_events(
        &self,
        namespace: &str,
        field_selector: &str,
    ) -> Result<Vec<Event>, StoreError> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .list(&ListParams::default().fields(field_selector))
            .await?
            .items)
    }

    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, StoreError> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        Ok(self.pods(namespace).logs(pod, &params).await?)
    }

    #[instrument(skip(self))]
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String, StoreError> {
        let exec_error = |message: String| StoreError::Exec {
            pod: pod.to_string(),
            container: container.to_string(),
            message,
        };
        let attach_params = AttachParams {
            container: Some(container.to_string()),
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        let mut attached = self.pods(namespace).exec(pod, command, &attach_params).await?;

        let stdout = attached
            .stdout()
            .ok_or_else(|| exec_error("no stdout stream".to_string()))?;
        let stderr = attached
            .stderr()
            .ok_or_else(|| exec_error("no stderr stream".to_string()))?;
        let stdout_output = read_stream(stdout).await?;
        let stderr_output = read_stream(stderr).await?;

        let status = attached
            .take_status()
            .ok_or_else(|| exec_error("no status channel".to_string()))?;

        if let Some(status) = status.await
            && status.status.as_deref() != Some("Success")
        {
            let message = if stderr_output.is_empty() {
                format!("command failed with status: {:?}", status.message)
            } else {
                stderr_output
            };
            return Err(exec_error(message));
        }

        Ok(stdout_output)
    }
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Result<String, StoreError> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}
