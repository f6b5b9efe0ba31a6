//! In-Memory Control Plane
//!
//! A [`ControlPlaneClient`] backed by concurrent maps. Used for standalone
//! runs without a cluster and throughout the test suite.

use crate::domain::model::{AnnotationSubject, ClaimKey, PoolId, VolumeId, ANNOTATION_SELECTED_POOL};
use crate::domain::ports::{ClaimSpec, ControlPlaneClient, PlacedClaim};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Control plane held entirely in memory
#[derive(Default)]
pub struct InMemoryControlPlane {
    annotations: DashMap<(AnnotationSubject, String), String>,
    claims: DashMap<ClaimKey, ClaimSpec>,
    /// (volume, node) -> pod mounting it
    pods: DashMap<(VolumeId, String), AnnotationSubject>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicU64,
}

impl InMemoryControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store an annotation as if another agent had written it
    pub fn put_annotation(&self, subject: AnnotationSubject, key: &str, value: &str) {
        self.annotations
            .insert((subject, key.to_string()), value.to_string());
    }

    pub fn annotation(&self, subject: &AnnotationSubject, key: &str) -> Option<String> {
        self.annotations
            .get(&(subject.clone(), key.to_string()))
            .map(|v| v.clone())
    }

    pub fn put_claim(&self, spec: ClaimSpec) {
        self.claims.insert(spec.claim.clone(), spec);
    }

    /// Drop a claim and its annotations
    pub fn delete_claim(&self, claim: &ClaimKey) {
        self.claims.remove(claim);
        let subject = AnnotationSubject::claim(claim);
        self.annotations.retain(|(s, _), _| s != &subject);
    }

    pub fn put_pod(&self, volume: VolumeId, node: &str, pod: AnnotationSubject) {
        self.pods.insert((volume, node.to_string()), pod);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of annotation reads served so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlaneClient for InMemoryControlPlane {
    async fn get_annotation(
        &self,
        subject: &AnnotationSubject,
        key: &str,
    ) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::transport("get annotation", "control plane unavailable"));
        }
        Ok(self.annotation(subject, key))
    }

    async fn set_annotation(
        &self,
        subject: &AnnotationSubject,
        key: &str,
        value: &str,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::transport("set annotation", "control plane unavailable"));
        }
        self.put_annotation(subject.clone(), key, value);
        Ok(())
    }

    async fn get_claim(&self, claim: &ClaimKey) -> Result<ClaimSpec> {
        self.claims
            .get(claim)
            .map(|c| c.clone())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolumeClaim".to_string(),
                name: claim.to_string(),
            })
    }

    async fn list_placed_claims(&self) -> Result<Vec<PlacedClaim>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::transport("list claims", "control plane unavailable"));
        }
        let mut placed: Vec<PlacedClaim> = self
            .claims
            .iter()
            .filter_map(|c| {
                let subject = AnnotationSubject::claim(c.key());
                self.annotation(&subject, ANNOTATION_SELECTED_POOL)
                    .map(|pool| PlacedClaim {
                        spec: c.value().clone(),
                        pool: PoolId::new(pool),
                    })
            })
            .collect();
        placed.sort_by(|a, b| a.spec.claim.cmp(&b.spec.claim));
        Ok(placed)
    }

    async fn find_pod_for_volume(
        &self,
        volume_id: &VolumeId,
        node_name: &str,
    ) -> Result<Option<AnnotationSubject>> {
        Ok(self
            .pods
            .get(&(volume_id.clone(), node_name.to_string()))
            .map(|p| p.clone()))
    }
}
