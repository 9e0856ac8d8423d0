use std::{collections::BTreeSet, str::FromStr};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::{
    cloud::BackendServer,
    consts,
    error::SlbError,
    label_filter::LabelFilter,
};

/// Provider identity of a node, `<region>.<instance-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub region: String,
    pub instance_id: String,
}

impl FromStr for NodeIdentity {
    type Err = SlbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [region, instance_id] if !region.is_empty() && !instance_id.is_empty() => Ok(Self {
                region: (*region).to_string(),
                instance_id: (*instance_id).to_string(),
            }),
            _ => Err(SlbError::InvalidValue(s.to_string())),
        }
    }
}

/// Provider identity of a node, if it has a valid one.
#[must_use]
pub fn identity(node: &Node) -> Option<NodeIdentity> {
    let provider_id = node.spec.as_ref()?.provider_id.as_deref()?;
    match NodeIdentity::from_str(provider_id) {
        Ok(identity) => Some(identity),
        Err(_) => {
            tracing::warn!(
                "Node {} has malformed provider id {:?}, expected <region>.<instance-id>. Skipping...",
                node.name_any(),
                provider_id
            );
            None
        }
    }
}

/// Pick backend servers out of cluster nodes.
///
/// Nodes excluded from load balancers, nodes not matching the
/// `backend-label` filter and nodes without a valid provider id are
/// skipped. A malformed filter selects every node. The result is sorted
/// and free of duplicates.
#[must_use]
pub fn backend_servers(nodes: &[Node], backend_label: Option<&str>) -> Vec<BackendServer> {
    let filter = match backend_label.map(LabelFilter::from_str).transpose() {
        Ok(filter) => filter.unwrap_or_default(),
        Err(err) => {
            tracing::warn!("Ignoring backend label: {}", err);
            LabelFilter::default()
        }
    };
    let instances = nodes
        .iter()
        .filter(|node| {
            if node.labels().contains_key(consts::EXCLUDE_FROM_LB_LABEL) {
                tracing::debug!("Node {} is excluded from load balancers", node.name_any());
                return false;
            }
            filter.check(node.labels())
        })
        .filter_map(identity)
        .map(|identity| identity.instance_id)
        .collect::<BTreeSet<_>>();
    instances.into_iter().map(BackendServer::new).collect()
}

#[cfg(test)]
pub(crate) fn test_node(name: &str, provider_id: &str, pod_cidr: Option<&str>) -> Node {
    use k8s_openapi::api::core::v1::NodeSpec;
    use kube::api::ObjectMeta;

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: Some(provider_id.to_string()),
            pod_cidr: pod_cidr.map(str::to_string),
            ..Default::default()
        }),
        status: None,
    }
}
