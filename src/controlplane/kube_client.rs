//! Kubernetes Control Plane Client
//!
//! [`ControlPlaneClient`] over the cluster API: annotations live on Nodes,
//! Pods and PersistentVolumeClaims. Hosts resolve to the Node carrying the
//! matching `kubernetes.io/hostname` label.

use crate::domain::model::{
    parse_capacity, AccessibilityRequirement, AnnotationSubject, ClaimKey, PoolId, VolumeId,
    ANNOTATION_REQUESTED_TOPOLOGY, ANNOTATION_SELECTED_POOL,
};
use crate::domain::ports::{ClaimSpec, ControlPlaneClient, PlacedClaim};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Control plane backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Node name backing a host
    async fn node_for_host(&self, host: &str) -> Result<Option<String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let selector = format!("{}={}", HOSTNAME_LABEL, host);
        let list = nodes.list(&ListParams::default().labels(&selector)).await?;
        Ok(list.items.first().map(|n| n.name_any()))
    }

    async fn annotations_of(
        &self,
        subject: &AnnotationSubject,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let annotations = match subject {
            AnnotationSubject::Node { name } => {
                let api: Api<Node> = Api::all(self.client.clone());
                api.get_opt(name).await?.map(|n| n.annotations().clone())
            }
            AnnotationSubject::Host { name } => match self.node_for_host(name).await? {
                Some(node) => {
                    let api: Api<Node> = Api::all(self.client.clone());
                    api.get_opt(&node).await?.map(|n| n.annotations().clone())
                }
                None => None,
            },
            AnnotationSubject::Pod { namespace, name } => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name).await?.map(|p| p.annotations().clone())
            }
            AnnotationSubject::Claim { namespace, name } => {
                let api: Api<PersistentVolumeClaim> =
                    Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name).await?.map(|c| c.annotations().clone())
            }
        };
        Ok(annotations)
    }

    /// Volume handle of the PV bound to a claim, plus the PV name
    async fn bound_volume(&self, namespace: &str, claim: &str) -> Result<Option<(String, Option<String>)>> {
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let volume_name = match claims
            .get_opt(claim)
            .await?
            .and_then(|c| c.spec.and_then(|s| s.volume_name))
        {
            Some(name) => name,
            None => return Ok(None),
        };

        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        let handle = volumes
            .get_opt(&volume_name)
            .await?
            .and_then(|pv| pv.spec)
            .and_then(|s| s.csi)
            .map(|csi| csi.volume_handle);
        Ok(Some((volume_name, handle)))
    }
}

fn not_found(subject: &AnnotationSubject) -> Error {
    let kind = match subject {
        AnnotationSubject::Node { .. } | AnnotationSubject::Host { .. } => "Node",
        AnnotationSubject::Pod { .. } => "Pod",
        AnnotationSubject::Claim { .. } => "PersistentVolumeClaim",
    };
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: subject.to_string(),
    }
}

/// Claim spec from a PersistentVolumeClaim object
pub fn claim_spec_from(key: &ClaimKey, pvc: &PersistentVolumeClaim) -> Result<ClaimSpec> {
    let spec = pvc.spec.clone().unwrap_or_default();

    let requested_bytes = match spec
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
    {
        Some(quantity) => parse_capacity(&quantity.0)?,
        None => {
            return Err(Error::ApiValidation(format!(
                "claim {} does not request any storage",
                key
            )))
        }
    };

    let requested_topology = match pvc.annotations().get(ANNOTATION_REQUESTED_TOPOLOGY) {
        Some(raw) => Some(serde_json::from_str::<AccessibilityRequirement>(raw).map_err(|e| {
            Error::ApiValidation(format!(
                "claim {} has malformed {} annotation: {}",
                key, ANNOTATION_REQUESTED_TOPOLOGY, e
            ))
        })?),
        None => None,
    };

    Ok(ClaimSpec {
        claim: key.clone(),
        storage_class: spec.storage_class_name,
        requested_bytes,
        volume_name: spec.volume_name,
        requested_topology,
    })
}

#[async_trait]
impl ControlPlaneClient for KubeControlPlane {
    async fn get_annotation(
        &self,
        subject: &AnnotationSubject,
        key: &str,
    ) -> Result<Option<String>> {
        let annotations = self
            .annotations_of(subject)
            .await?
            .ok_or_else(|| not_found(subject))?;
        Ok(annotations.get(key).cloned())
    }

    async fn set_annotation(
        &self,
        subject: &AnnotationSubject,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(key.to_string(), json!(value));
        let patch = json!({ "metadata": { "annotations": annotations } });
        let params = PatchParams::default();

        match subject {
            AnnotationSubject::Node { name } => {
                let api: Api<Node> = Api::all(self.client.clone());
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
            AnnotationSubject::Host { name } => {
                let node = self
                    .node_for_host(name)
                    .await?
                    .ok_or_else(|| not_found(subject))?;
                let api: Api<Node> = Api::all(self.client.clone());
                api.patch(&node, &params, &Patch::Merge(&patch)).await?;
            }
            AnnotationSubject::Pod { namespace, name } => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
            AnnotationSubject::Claim { namespace, name } => {
                let api: Api<PersistentVolumeClaim> =
                    Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
        }

        debug!("Annotated {} with {}={}", subject, key, value);
        Ok(())
    }

    async fn get_claim(&self, claim: &ClaimKey) -> Result<ClaimSpec> {
        let api: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &claim.namespace);
        let pvc = api
            .get_opt(&claim.name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolumeClaim".to_string(),
                name: claim.to_string(),
            })?;
        claim_spec_from(claim, &pvc)
    }

    async fn list_placed_claims(&self) -> Result<Vec<PlacedClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;

        let mut placed = Vec::new();
        for pvc in list.items {
            let pool = match pvc.annotations().get(ANNOTATION_SELECTED_POOL) {
                Some(pool) => PoolId::new(pool.clone()),
                None => continue,
            };
            let key = ClaimKey::new(pvc.namespace().unwrap_or_default(), pvc.name_any());
            match claim_spec_from(&key, &pvc) {
                Ok(spec) => placed.push(PlacedClaim { spec, pool }),
                Err(e) => warn!("Ignoring placed claim {}: {}", key, e),
            }
        }
        placed.sort_by(|a, b| a.spec.claim.cmp(&b.spec.claim));
        Ok(placed)
    }

    async fn find_pod_for_volume(
        &self,
        volume_id: &VolumeId,
        node_name: &str,
    ) -> Result<Option<AnnotationSubject>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let selector = format!("spec.nodeName={}", node_name);
        let list = pods.list(&ListParams::default().fields(&selector)).await?;

        for pod in list.items {
            let namespace = match pod.namespace() {
                Some(ns) => ns,
                None => continue,
            };
            let claims: Vec<String> = pod
                .spec
                .as_ref()
                .and_then(|s| s.volumes.as_ref())
                .map(|vols| {
                    vols.iter()
                        .filter_map(|v| v.persistent_volume_claim.as_ref())
                        .map(|c| c.claim_name.clone())
                        .collect()
                })
                .unwrap_or_default();

            for claim in claims {
                match self.bound_volume(&namespace, &claim).await {
                    Ok(Some((pv_name, handle))) => {
                        if pv_name == volume_id.as_str()
                            || handle.as_deref() == Some(volume_id.as_str())
                        {
                            return Ok(Some(AnnotationSubject::Pod {
                                namespace,
                                name: pod.name_any(),
                            }));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(
                        "Failed to resolve claim {}/{} on node {}: {}",
                        namespace, claim, node_name, e
                    ),
                }
            }
        }

        Ok(None)
    }
}
