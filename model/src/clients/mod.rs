mod error;
mod http_status_code;
mod kube_client;

pub use error::{Error, ErrorKind, Result};
pub use http_status_code::{HttpStatusCode, StatusCode};
pub use kube_client::KubeClusterClient;

use crate::resource::ResourceIdentity;
use serde_json::Value;

/// The calls the tester makes against the control plane. Every error can be classified with
/// `Error::kind` so the tester can tell a missing resource and a transient failure apart from
/// anything else.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// Creates the resource, or brings it in line with `body` if it already exists.
    async fn apply(&self, identity: &ResourceIdentity, body: &Value) -> Result<()>;

    /// The live state of the resource.
    async fn get(&self, identity: &ResourceIdentity) -> Result<Value>;

    /// Submits the update manifest for an existing resource.
    async fn update(&self, identity: &ResourceIdentity, body: &Value) -> Result<()>;

    /// Requests deletion. The resource may still exist for a while after this returns.
    async fn delete(&self, identity: &ResourceIdentity) -> Result<()>;
}
