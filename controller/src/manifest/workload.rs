//! Service, Deployment and PersistentVolumeClaim synthesis

use std::collections::BTreeMap;

use crate::manifest::naming::slugify;
use crate::manifest::objects::{
    Affinity, Container, ContainerPort, Deployment, DeploymentSpec, EnvVarSource, LabelSelector,
    Labels, LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, ObjectMeta, PersistentVolumeClaim, PersistentVolumeClaimSource,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateMeta, PodTemplateSpec, Probe,
    ResourceRequirements, Service, ServicePort, ServiceSpec, TcpSocketAction, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use crate::models::{EnvVar, PersistentVolume};

pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Everything the Service and Deployment depend on
#[derive(Debug, Clone)]
pub struct WorkloadParams<'a> {
    pub deployment_name: &'a str,
    pub version: &'a str,
    pub namespace: &'a str,
    pub labels: &'a Labels,
    pub image: &'a str,
    pub port: u16,
    pub replicas: u32,
    pub resources: ResourceRequirements,
    pub env_vars: &'a [EnvVar],
    pub pull_secret: &'a str,
    pub volumes: &'a [PersistentVolume],
}

fn version_selector(version: &str) -> Labels {
    Labels::from([("app".to_string(), version.to_string())])
}

pub fn build_service(params: &WorkloadParams<'_>) -> Service {
    Service {
        api_version: "v1".to_string(),
        kind: "Service".to_string(),
        metadata: ObjectMeta::named(params.deployment_name, Some(params.namespace), params.labels),
        spec: ServiceSpec {
            service_type: "ClusterIP".to_string(),
            selector: version_selector(params.version),
            ports: vec![ServicePort {
                name: "http".to_string(),
                protocol: "TCP".to_string(),
                port: params.port,
                target_port: params.port,
            }],
        },
    }
}

fn readiness_probe(port: u16) -> Probe {
    Probe {
        tcp_socket: TcpSocketAction { port },
        initial_delay_seconds: 0,
        period_seconds: 5,
        timeout_seconds: 1,
        failure_threshold: 2,
    }
}

fn liveness_probe(port: u16) -> Probe {
    Probe {
        tcp_socket: TcpSocketAction { port },
        initial_delay_seconds: 30,
        period_seconds: 10,
        timeout_seconds: 1,
        failure_threshold: 10,
    }
}

/// Claim name of a volume, scoped to the deployment
pub fn claim_name(deployment_name: &str, volume: &PersistentVolume) -> String {
    format!("{}-{}", deployment_name, slugify(&volume.name))
}

/// Required affinity to the nodes hosting the volumes
fn node_affinity(volumes: &[PersistentVolume]) -> Option<Affinity> {
    let mut nodes: Vec<String> = volumes.iter().map(|v| v.node.clone()).collect();
    nodes.sort();
    nodes.dedup();
    if nodes.is_empty() {
        return None;
    }

    Some(Affinity {
        node_affinity: NodeAffinity {
            required: NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: nodes,
                    }],
                }],
            },
        },
    })
}

pub fn build_deployment(params: &WorkloadParams<'_>) -> Deployment {
    let selector = version_selector(params.version);

    let volumes: Vec<Volume> = params
        .volumes
        .iter()
        .map(|volume| Volume {
            name: slugify(&volume.name),
            persistent_volume_claim: PersistentVolumeClaimSource {
                claim_name: claim_name(params.deployment_name, volume),
            },
        })
        .collect();

    let volume_mounts: Vec<VolumeMount> = params
        .volumes
        .iter()
        .map(|volume| VolumeMount {
            name: slugify(&volume.name),
            mount_path: volume.mount_path.clone(),
        })
        .collect();

    let container = Container {
        name: params.deployment_name.to_string(),
        image: params.image.to_string(),
        ports: vec![ContainerPort {
            container_port: params.port,
        }],
        env: params
            .env_vars
            .iter()
            .map(|var| EnvVarSource {
                name: var.name.clone(),
                value: var.value.clone(),
            })
            .collect(),
        resources: params.resources.clone(),
        readiness_probe: readiness_probe(params.port),
        liveness_probe: liveness_probe(params.port),
        volume_mounts,
    };

    Deployment {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        metadata: ObjectMeta::named(params.version, Some(params.namespace), params.labels),
        spec: DeploymentSpec {
            replicas: params.replicas,
            selector: LabelSelector {
                match_labels: selector,
            },
            template: PodTemplateSpec {
                metadata: PodTemplateMeta {
                    labels: params.labels.clone(),
                },
                spec: PodSpec {
                    containers: vec![container],
                    image_pull_secrets: vec![LocalObjectReference {
                        name: params.pull_secret.to_string(),
                    }],
                    volumes,
                    affinity: node_affinity(params.volumes),
                },
            },
        },
    }
}

pub fn build_claims(params: &WorkloadParams<'_>) -> Vec<PersistentVolumeClaim> {
    params
        .volumes
        .iter()
        .map(|volume| PersistentVolumeClaim {
            api_version: "v1".to_string(),
            kind: "PersistentVolumeClaim".to_string(),
            metadata: ObjectMeta::named(
                &claim_name(params.deployment_name, volume),
                Some(params.namespace),
                params.labels,
            ),
            spec: PersistentVolumeClaimSpec {
                access_modes: vec!["ReadWriteOnce".to_string()],
                storage_class_name: volume.storage_class.clone(),
                resources: VolumeResourceRequirements {
                    requests: BTreeMap::from([("storage".to_string(), volume.size.clone())]),
                },
            },
        })
        .collect()
}
