use super::error::{self, Result};
use super::ClusterClient;
use crate::constants::FIELD_MANAGER;
use crate::resource::ResourceIdentity;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::{Api, Client, Config};
use log::trace;
use serde_json::Value;
use snafu::ResultExt;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;

/// A `ClusterClient` for any kind the API server knows about. Kinds are resolved through API
/// discovery the first time they are used.
pub struct KubeClusterClient {
    client: Client,
    /// Discovered kinds, keyed by `(apiVersion, kind)`.
    kinds: Mutex<HashMap<(String, String), (ApiResource, ApiCapabilities)>>,
}

impl KubeClusterClient {
    /// Create a client from the default kubeconfig or the in-cluster environment.
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context(error::InitializationSnafu)?;
        Ok(Self::new_from_k8s_client(client))
    }

    /// Create a client from the kubeconfig at `kubeconfig_path`.
    pub async fn new_from_kubeconfig_path(kubeconfig_path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path).context(error::ConfigReadSnafu)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(error::ClientCreateKubeconfigSnafu)?;
        let client = Client::try_from(config).context(error::InitializationSnafu)?;
        Ok(Self::new_from_k8s_client(client))
    }

    pub fn new_from_k8s_client(client: Client) -> Self {
        Self {
            client,
            kinds: Mutex::new(HashMap::new()),
        }
    }

    async fn api(&self, identity: &ResourceIdentity) -> Result<Api<DynamicObject>> {
        let key = (identity.api_version.clone(), identity.kind.clone());
        let mut kinds = self.kinds.lock().await;
        let (resource, capabilities) = match kinds.get(&key) {
            Some(found) => found.clone(),
            None => {
                trace!("discovering API for '{}'", identity.api_version);
                let gvk =
                    GroupVersionKind::gvk(identity.group(), identity.version(), &identity.kind);
                let found = discovery::pinned_kind(&self.client, &gvk)
                    .await
                    .context(error::DiscoverySnafu {
                        what: format!("{} {}", identity.api_version, identity.kind),
                    })?;
                kinds.insert(key, found.clone());
                found
            }
        };
        drop(kinds);

        let client = self.client.clone();
        Ok(match (&capabilities.scope, &identity.namespace) {
            (Scope::Namespaced, Some(namespace)) => {
                Api::namespaced_with(client, namespace, &resource)
            }
            (Scope::Namespaced, None) => Api::default_namespaced_with(client, &resource),
            (Scope::Cluster, _) => Api::all_with(client, &resource),
        })
    }

    async fn server_side_apply(
        &self,
        method: &str,
        identity: &ResourceIdentity,
        body: &Value,
    ) -> Result<()> {
        let api = self.api(identity).await?;
        trace!("{} '{}'", method, identity);
        api.patch(
            &identity.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(body),
        )
        .await
        .context(error::KubeApiCallSnafu {
            method,
            what: identity.to_string(),
        })?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, identity: &ResourceIdentity, body: &Value) -> Result<()> {
        self.server_side_apply("apply", identity, body).await
    }

    async fn get(&self, identity: &ResourceIdentity) -> Result<Value> {
        let api = self.api(identity).await?;
        let object = api
            .get(&identity.name)
            .await
            .context(error::KubeApiCallSnafu {
                method: "get",
                what: identity.to_string(),
            })?;
        Ok(serde_json::to_value(&object).context(error::SerdeSnafu {
            what: identity.to_string(),
        })?)
    }

    async fn update(&self, identity: &ResourceIdentity, body: &Value) -> Result<()> {
        self.server_side_apply("update", identity, body).await
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        let api = self.api(identity).await?;
        trace!("delete '{}'", identity);
        api.delete(&identity.name, &DeleteParams::default())
            .await
            .context(error::KubeApiCallSnafu {
                method: "delete",
                what: identity.to_string(),
            })?;
        Ok(())
    }
}
