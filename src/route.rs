//! Pod CIDR routes in VPC route tables.
//!
//! Every node with a pod CIDR gets a custom route entry pointing the CIDR at
//! its instance. Only entries inside the cluster CIDR are considered ours,
//! everything else in the table is left alone.

use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::{
    cidr,
    cloud::{RouteEntry, RouteTableApi},
    config::ControllerConfig,
    consts,
    error::{ApiError, SlbError, SlbResult},
    node,
    node_status::NodeConditionUpdater,
    retry::{retry_until, BackoffPolicy},
    Context,
};

/// A node as far as routing is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteNode {
    pub name: String,
    pub instance_id: Option<String>,
    pub pod_cidr: Option<Ipv4Network>,
}

impl RouteNode {
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        let name = node.name_any();
        let pod_cidr = node
            .spec
            .as_ref()
            .and_then(|spec| spec.pod_cidr.as_deref())
            .and_then(|raw| match cidr::parse(raw) {
                Ok(net) => Some(net),
                Err(err) => {
                    tracing::warn!("Node {} has invalid pod CIDR: {}", name, err);
                    None
                }
            });
        Self {
            instance_id: node::identity(node).map(|identity| identity.instance_id),
            pod_cidr,
            name,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteSyncReport {
    /// Destination CIDRs of deleted entries.
    pub deleted: Vec<String>,
    /// Names of nodes that got a new route.
    pub created: Vec<String>,
}

/// Entries the controller may manage: custom, non-default routes to instances.
fn is_candidate(entry: &RouteEntry) -> bool {
    entry.entry_type != consts::ROUTE_ENTRY_TYPE_SYSTEM
        && entry.destination_cidr != consts::DEFAULT_ROUTE_CIDR
        && entry.next_hop_type == consts::ROUTE_NEXT_HOP_INSTANCE
}

/// Why `entry` has to be removed, if it has to.
fn deletion_reason(
    entry: &RouteEntry,
    destination: &Ipv4Network,
    nodes: &[RouteNode],
) -> Option<&'static str> {
    if entry.next_hop_id.is_empty() {
        return Some("blackhole");
    }
    for node in nodes {
        let Some(pod_cidr) = &node.pod_cidr else {
            continue;
        };
        if pod_cidr == destination {
            // Without an identity there is nothing to compare the next hop with.
            match node.instance_id.as_deref() {
                Some(target) if target != entry.next_hop_id => {
                    return Some("CIDR belongs to another node");
                }
                _ => continue,
            }
        }
        if cidr::really_contains(destination, pod_cidr)
            || cidr::really_contains(pod_cidr, destination)
        {
            return Some("overlaps a node CIDR");
        }
    }
    None
}

/// Route entries inside the cluster CIDR that have to be deleted.
#[must_use]
pub fn plan_deletions<'e>(
    entries: &'e [RouteEntry],
    nodes: &[RouteNode],
    cluster_cidr: &Ipv4Network,
) -> Vec<(&'e RouteEntry, &'static str)> {
    entries
        .iter()
        .filter(|entry| is_candidate(entry))
        .filter_map(|entry| {
            let destination = cidr::parse(&entry.destination_cidr).ok()?;
            if !cidr::contains(cluster_cidr, &destination) {
                return None;
            }
            deletion_reason(entry, &destination, nodes).map(|reason| (entry, reason))
        })
        .collect()
}

fn routes_to(entries: &[RouteEntry], instance_id: &str, pod_cidr: &Ipv4Network) -> bool {
    entries.iter().any(|entry| {
        entry.next_hop_id == instance_id
            && cidr::parse(&entry.destination_cidr).is_ok_and(|dst| dst == *pod_cidr)
    })
}

pub struct RouteReconciler<'a> {
    api: &'a dyn RouteTableApi,
    conditions: &'a dyn NodeConditionUpdater,
    config: &'a ControllerConfig,
    cluster_cidr: Option<Ipv4Network>,
    backoff: BackoffPolicy,
}

impl<'a> RouteReconciler<'a> {
    pub fn new(
        api: &'a dyn RouteTableApi,
        conditions: &'a dyn NodeConditionUpdater,
        config: &'a ControllerConfig,
    ) -> SlbResult<Self> {
        let cluster_cidr = config.cluster_cidr.as_deref().map(cidr::parse).transpose()?;
        if cluster_cidr.is_none() {
            tracing::warn!("Cluster CIDR is not configured, stale routes will not be removed");
        }
        Ok(Self {
            api,
            conditions,
            config,
            cluster_cidr,
            backoff: config.route_create_backoff(),
        })
    }

    /// Reconcile pod CIDR routes of all nodes in every route table.
    pub async fn reconcile(&self, nodes: &[Node]) -> SlbResult<RouteSyncReport> {
        let nodes = nodes.iter().map(RouteNode::from_node).collect::<Vec<_>>();
        let mut report = RouteSyncReport::default();
        for route_table_id in self.route_tables().await? {
            let table_report = self.reconcile_table(&route_table_id, &nodes).await?;
            report.deleted.extend(table_report.deleted);
            report.created.extend(table_report.created);
        }
        Ok(report)
    }

    async fn route_tables(&self) -> SlbResult<Vec<String>> {
        if !self.config.route_table_ids.is_empty() {
            return Ok(self.config.route_table_ids.clone());
        }
        let vpc_id = self
            .config
            .vpc_id
            .as_deref()
            .ok_or(SlbError::MissingConfig("VPC id or route table ids"))?;
        let vpc = self.api.describe_vpc(vpc_id).await?;
        let tables = self.api.describe_route_tables(&vpc.router_id).await?;
        if tables.is_empty() {
            return Err(SlbError::NoRouteTables(vpc_id.to_string()));
        }
        Ok(tables)
    }

    #[tracing::instrument(skip(self, nodes))]
    pub async fn reconcile_table(
        &self,
        route_table_id: &str,
        nodes: &[RouteNode],
    ) -> SlbResult<RouteSyncReport> {
        let mut entries = self.api.describe_route_entries(route_table_id).await?;
        let mut report = RouteSyncReport::default();

        if let Some(cluster_cidr) = &self.cluster_cidr {
            let stale = plan_deletions(&entries, nodes, cluster_cidr)
                .into_iter()
                .map(|(entry, reason)| (entry.clone(), reason))
                .collect::<Vec<_>>();
            for (entry, reason) in stale {
                tracing::info!(
                    "Deleting route {} -> {}: {}",
                    entry.destination_cidr,
                    entry.next_hop_id,
                    reason
                );
                self.api
                    .delete_route_entry(route_table_id, &entry.destination_cidr, &entry.next_hop_id)
                    .await?;
                entries.retain(|existing| *existing != entry);
                report.deleted.push(entry.destination_cidr);
            }
        }

        let mut failed = Vec::new();
        for node in nodes {
            let (Some(instance_id), Some(pod_cidr)) = (&node.instance_id, &node.pod_cidr) else {
                tracing::debug!("Node {} has no instance id or pod CIDR yet", node.name);
                continue;
            };
            let unavailable = if routes_to(&entries, instance_id, pod_cidr) {
                false
            } else {
                match self.create_route(route_table_id, instance_id, pod_cidr).await {
                    Ok(created) => {
                        if created {
                            report.created.push(node.name.clone());
                        }
                        false
                    }
                    Err(err) => {
                        tracing::error!(
                            "Failed to create route {} -> {} for node {}: {}",
                            pod_cidr,
                            instance_id,
                            node.name,
                            err
                        );
                        failed.push(node.name.clone());
                        true
                    }
                }
            };
            if let Err(err) = self
                .conditions
                .set_network_unavailable(&node.name, unavailable)
                .await
            {
                tracing::warn!("Cannot update network condition of node {}: {}", node.name, err);
            }
        }

        if !failed.is_empty() {
            return Err(SlbError::RouteSync(failed));
        }
        Ok(report)
    }

    /// Returns false if the instance is gone and no route was created.
    async fn create_route(
        &self,
        route_table_id: &str,
        instance_id: &str,
        pod_cidr: &Ipv4Network,
    ) -> Result<bool, ApiError> {
        let destination = pod_cidr.to_string();
        let destination = destination.as_str();
        let api = self.api;
        let created = retry_until(
            &self.backoff,
            "create_route_entry",
            || async move {
                match api
                    .create_route_entry(route_table_id, destination, instance_id)
                    .await
                {
                    Ok(()) => Ok(true),
                    Err(err) if err.is_target_not_found() => {
                        tracing::warn!(
                            "Instance {} is gone, skipping route {}",
                            instance_id,
                            destination
                        );
                        Ok(false)
                    }
                    Err(err) => Err(err),
                }
            },
            |_| true,
        )
        .await?;
        if created {
            tracing::info!("Created route {} -> {}", destination, instance_id);
            api.wait_route_entry(route_table_id, destination).await?;
        }
        Ok(created)
    }
}

/// Reconcile pod CIDR routes of the cluster, unless route management
/// is turned off.
pub async fn reconcile_routes(ctx: &Context, nodes: &[Node]) -> SlbResult<RouteSyncReport> {
    if !ctx.config.configure_routes {
        tracing::debug!("Route management is disabled. Skipping...");
        return Ok(RouteSyncReport::default());
    }
    RouteReconciler::new(
        ctx.route_api.as_ref(),
        ctx.node_conditions.as_ref(),
        &ctx.config,
    )?
    .reconcile(nodes)
    .await
}
