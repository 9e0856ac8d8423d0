use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Node, NodeCondition},
    apimachinery::pkg::apis::meta::v1::Time,
    chrono::Utc,
    serde_json::json,
};
use kube::{
    api::{Patch, PatchParams},
    Api, Client,
};

use crate::{consts, error::SlbResult};

/// Sink for the network readiness of nodes.
///
/// Nodes are kept unschedulable by the kubelet until the
/// `NetworkUnavailable` condition is cleared, so pods only land on
/// nodes whose pod CIDR is routed.
#[async_trait]
pub trait NodeConditionUpdater: Send + Sync {
    async fn set_network_unavailable(&self, node_name: &str, unavailable: bool) -> SlbResult<()>;
}

/// Writes node conditions through the Kubernetes API.
#[derive(Clone)]
pub struct KubeNodeConditions {
    client: Client,
}

impl KubeNodeConditions {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[must_use]
pub fn network_condition(unavailable: bool) -> NodeCondition {
    let now = Time(Utc::now());
    let (status, reason, message) = if unavailable {
        ("True", "NoRouteCreated", "Failed to create a route for the pod CIDR")
    } else {
        ("False", "RouteCreated", "Route for the pod CIDR is created")
    };
    NodeCondition {
        type_: consts::NETWORK_UNAVAILABLE_CONDITION.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(now.clone()),
        last_heartbeat_time: Some(now),
    }
}

#[async_trait]
impl NodeConditionUpdater for KubeNodeConditions {
    async fn set_network_unavailable(&self, node_name: &str, unavailable: bool) -> SlbResult<()> {
        let api = Api::<Node>::all(self.client.clone());
        // Conditions are merged by type, other conditions stay untouched.
        let patch = json!({
            "status": {
                "conditions": [network_condition(unavailable)]
            }
        });
        api.patch_status(node_name, &PatchParams::default(), &Patch::Strategic(patch))
            .await?;
        Ok(())
    }
}
