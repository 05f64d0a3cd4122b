// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Kubernetes API client
//!
//! A small REST client covering exactly the objects the migration touches:
//! PersistentVolumes, PersistentVolumeClaims and StatefulSets. Only the
//! fields the job reads are modelled; StatefulSets are kept as raw JSON so
//! an update writes back everything the server sent.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::KubeConfig;
use crate::store::{
    Claim, ClaimPhase, ClusterStore, HOSTNAME_LABEL, NewClaim, ObjectRef, StoreError, Volume,
    Workload,
};

const CLAIM_KIND: &str = "persistentvolumeclaim";
const WORKLOAD_KIND: &str = "statefulset";

/// Kubernetes REST client implementing [`ClusterStore`]
pub struct KubeClient {
    client: Client,
    base_url: String,
}

impl KubeClient {
    /// Create a client from connection settings
    pub fn new(config: &KubeConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| StoreError::Decode(format!("invalid bearer token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pv-migrate/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn claims_url(&self, namespace: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/persistentvolumeclaims",
            self.base_url, namespace
        )
    }

    fn workloads_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/statefulsets",
            self.base_url, namespace
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        kind: &'static str,
        object: Option<&ObjectRef>,
    ) -> Result<T, StoreError> {
        let response = self.request(Method::GET, url).send().await?;
        let response = check_status(response, kind, object, false).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("{}: {}", kind, e)))
    }
}

/// Map a non-success response to a [`StoreError`]
///
/// A 409 means "already exists" on create and "stale version" on update;
/// `creating` picks between the two.
async fn check_status(
    response: Response,
    kind: &'static str,
    object: Option<&ObjectRef>,
    creating: bool,
) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match (status, object) {
        (StatusCode::NOT_FOUND, Some(obj)) => Err(StoreError::NotFound {
            kind,
            object: obj.clone(),
        }),
        (StatusCode::CONFLICT, Some(obj)) if creating => Err(StoreError::AlreadyExists {
            kind,
            object: obj.clone(),
        }),
        (StatusCode::CONFLICT, Some(obj)) => Err(StoreError::Conflict {
            kind,
            object: obj.clone(),
        }),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiStatus>(&body)
                .map(|s| s.message)
                .unwrap_or(body);
            Err(StoreError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ClusterStore for KubeClient {
    async fn list_volumes(&self) -> Result<Vec<Volume>, StoreError> {
        let url = format!("{}/api/v1/persistentvolumes", self.base_url);
        let list: ObjectList<PvObject> = self.get_json(&url, "persistentvolume", None).await?;
        Ok(list.items.into_iter().map(Volume::from).collect())
    }

    async fn get_claim(&self, claim: &ObjectRef) -> Result<Claim, StoreError> {
        let url = format!("{}/{}", self.claims_url(&claim.namespace), claim.name);
        let pvc: PvcObject = self.get_json(&url, CLAIM_KIND, Some(claim)).await?;
        Ok(pvc.into())
    }

    async fn create_claim(&self, claim: &NewClaim) -> Result<(), StoreError> {
        let object = ObjectRef::new(&claim.namespace, &claim.name);
        let response = self
            .request(Method::POST, &self.claims_url(&claim.namespace))
            .json(&pvc_manifest(claim))
            .send()
            .await?;
        check_status(response, CLAIM_KIND, Some(&object), true).await?;
        Ok(())
    }

    async fn delete_claim(&self, claim: &ObjectRef) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.claims_url(&claim.namespace), claim.name);
        let response = self.request(Method::DELETE, &url).send().await?;
        check_status(response, CLAIM_KIND, Some(claim), false).await?;
        Ok(())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, StoreError> {
        let list: ObjectList<Value> = self
            .get_json(&self.workloads_url(namespace), WORKLOAD_KIND, None)
            .await?;
        list.items.into_iter().map(workload_from_value).collect()
    }

    async fn get_workload(&self, workload: &ObjectRef) -> Result<Workload, StoreError> {
        let url = format!("{}/{}", self.workloads_url(&workload.namespace), workload.name);
        let value: Value = self.get_json(&url, WORKLOAD_KIND, Some(workload)).await?;
        workload_from_value(value)
    }

    async fn update_workload(&self, workload: &Workload) -> Result<(), StoreError> {
        let object = workload.object_ref();
        let url = format!("{}/{}", self.workloads_url(&workload.namespace), workload.name);

        let mut body = workload.object.clone();
        match body.get_mut("spec").and_then(Value::as_object_mut) {
            Some(spec) => {
                spec.insert("replicas".to_string(), json!(workload.replicas));
            }
            None => {
                return Err(StoreError::Decode(format!(
                    "{} {} has no spec",
                    WORKLOAD_KIND, object
                )));
            }
        }

        let response = self.request(Method::PUT, &url).json(&body).send().await?;
        check_status(response, WORKLOAD_KIND, Some(&object), false).await?;
        Ok(())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// `metav1.Status`, returned as the body of failed requests
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PvObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PvSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PvSpec {
    claim_ref: Option<PvClaimRef>,
    node_affinity: Option<PvNodeAffinity>,
}

#[derive(Debug, Deserialize)]
struct PvClaimRef {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PvNodeAffinity {
    required: Option<NodeSelector>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeSelector {
    #[serde(default)]
    node_selector_terms: Vec<NodeSelectorTerm>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeSelectorTerm {
    #[serde(default)]
    match_expressions: Vec<NodeSelectorRequirement>,
}

#[derive(Debug, Deserialize)]
struct NodeSelectorRequirement {
    key: String,
    operator: String,
    #[serde(default)]
    values: Vec<String>,
}

impl From<PvObject> for Volume {
    fn from(pv: PvObject) -> Self {
        let node_hostnames = pv
            .spec
            .node_affinity
            .and_then(|a| a.required)
            .map(|sel| {
                sel.node_selector_terms
                    .into_iter()
                    .flat_map(|t| t.match_expressions)
                    .filter(|r| r.key == HOSTNAME_LABEL && r.operator == "In")
                    .flat_map(|r| r.values)
                    .collect()
            })
            .unwrap_or_default();

        Volume {
            name: pv.metadata.name,
            claim_ref: pv
                .spec
                .claim_ref
                .map(|c| ObjectRef::new(c.namespace, c.name)),
            node_hostnames,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PvcObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PvcSpec,
    #[serde(default)]
    status: PvcStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PvcSpec {
    #[serde(default)]
    access_modes: Vec<String>,
    #[serde(default)]
    resources: PvcResources,
    storage_class_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PvcResources {
    #[serde(default)]
    requests: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PvcStatus {
    #[serde(default)]
    phase: String,
}

impl From<PvcObject> for Claim {
    fn from(pvc: PvcObject) -> Self {
        Claim {
            namespace: pvc.metadata.namespace,
            name: pvc.metadata.name,
            access_modes: pvc.spec.access_modes,
            storage_request: pvc.spec.resources.requests.get("storage").cloned(),
            storage_class: pvc.spec.storage_class_name,
            phase: ClaimPhase::parse(&pvc.status.phase),
        }
    }
}

fn pvc_manifest(claim: &NewClaim) -> Value {
    let mut spec = json!({ "accessModes": claim.access_modes });
    if let Some(size) = &claim.storage_request {
        spec["resources"] = json!({ "requests": { "storage": size } });
    }
    if let Some(class) = &claim.storage_class {
        spec["storageClassName"] = json!(class);
    }

    let metadata = ObjectMeta {
        name: claim.name.clone(),
        namespace: claim.namespace.clone(),
        labels: claim.labels.clone(),
    };

    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": metadata,
        "spec": spec,
    })
}

fn workload_from_value(value: Value) -> Result<Workload, StoreError> {
    let meta: ObjectMeta = value
        .get("metadata")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Decode(format!("{} metadata: {}", WORKLOAD_KIND, e)))?
        .ok_or_else(|| StoreError::Decode(format!("{} without metadata", WORKLOAD_KIND)))?;

    // The API server defaults an omitted replica count to 1
    let replicas = value
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let replicas = i32::try_from(replicas)
        .map_err(|_| StoreError::Decode(format!("{} replicas out of range", meta.name)))?;

    Ok(Workload {
        namespace: meta.namespace,
        name: meta.name,
        replicas,
        object: value,
    })
}
