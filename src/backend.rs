//! Backend membership of a load balancer.
//!
//! Flat mode keeps one backend list on the load balancer itself.
//! Grouped mode keeps one vserver group per node port, named after the
//! [`NamedKey`] of the port.

use std::collections::{BTreeSet, HashMap};

use crate::{
    cloud::{BackendServer, LoadBalancerApi},
    consts,
    error::SlbResult,
    named_key::NamedKey,
};

/// Members to remove and to add, by server id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackendDiff {
    pub remove: Vec<BackendServer>,
    pub add: Vec<BackendServer>,
    /// `(live, desired)` pairs of members whose weight changed.
    pub reweight: Vec<(BackendServer, BackendServer)>,
}

impl BackendDiff {
    #[must_use]
    pub fn new(live: &[BackendServer], desired: &[BackendServer]) -> Self {
        let find = |servers: &[BackendServer], id: &str| {
            servers.iter().find(|s| s.server_id == id).cloned()
        };
        let mut diff = Self::default();
        for server in live {
            match find(desired, &server.server_id) {
                None => diff.remove.push(server.clone()),
                Some(wanted) if wanted.weight != server.weight => {
                    diff.reweight.push((server.clone(), wanted));
                }
                Some(_) => {}
            }
        }
        diff.add = desired
            .iter()
            .filter(|s| find(live, &s.server_id).is_none())
            .cloned()
            .collect();
        diff
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty() && self.reweight.is_empty()
    }
}

/// Sync the flat backend list of a load balancer.
///
/// Removals go first. Each call carries at most
/// [`consts::MAX_BACKEND_BATCH`] servers.
#[tracing::instrument(skip(api, live, desired))]
pub async fn sync_flat(
    api: &dyn LoadBalancerApi,
    lb_id: &str,
    live: &[BackendServer],
    desired: &[BackendServer],
) -> SlbResult<()> {
    let diff = BackendDiff::new(live, desired);
    for chunk in diff.remove.chunks(consts::MAX_BACKEND_BATCH) {
        tracing::info!("Removing {} backend servers", chunk.len());
        api.remove_backend_servers(lb_id, chunk).await?;
    }
    for chunk in diff.add.chunks(consts::MAX_BACKEND_BATCH) {
        tracing::info!("Adding {} backend servers", chunk.len());
        api.add_backend_servers(lb_id, chunk).await?;
    }
    Ok(())
}

/// Backend group of one node port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VGroup {
    pub named_key: NamedKey,
    /// Empty until the group is created.
    pub group_id: Option<String>,
    pub backends: Vec<BackendServer>,
}

impl VGroup {
    #[must_use]
    pub const fn new(
        named_key: NamedKey,
        group_id: Option<String>,
        backends: Vec<BackendServer>,
    ) -> Self {
        Self {
            named_key,
            group_id,
            backends,
        }
    }

    /// Create the group if needed and bring its members in line.
    /// Returns the group id.
    pub async fn ensure(&mut self, api: &dyn LoadBalancerApi, lb_id: &str) -> SlbResult<String> {
        let Some(group_id) = self.group_id.clone() else {
            return self.create(api, lb_id).await;
        };
        let live = api.describe_vserver_group_backends(&group_id).await?;
        let diff = BackendDiff::new(&live, &self.backends);
        if diff.is_empty() {
            return Ok(group_id);
        }
        tracing::info!(
            "Updating vserver group {}: -{} +{} ~{}",
            self.named_key,
            diff.remove.len(),
            diff.add.len(),
            diff.reweight.len()
        );
        for chunk in diff.remove.chunks(consts::MAX_BACKEND_BATCH) {
            api.remove_vserver_group_backends(&group_id, chunk).await?;
        }
        for chunk in diff.add.chunks(consts::MAX_BACKEND_BATCH) {
            api.add_vserver_group_backends(&group_id, chunk).await?;
        }
        for chunk in diff.reweight.chunks(consts::MAX_BACKEND_BATCH) {
            let (old, new): (Vec<_>, Vec<_>) = chunk.iter().cloned().unzip();
            api.modify_vserver_group_backends(&group_id, &old, &new)
                .await?;
        }
        Ok(group_id)
    }

    async fn create(&mut self, api: &dyn LoadBalancerApi, lb_id: &str) -> SlbResult<String> {
        let mut chunks = self.backends.chunks(consts::MAX_BACKEND_BATCH);
        let first = chunks.next().unwrap_or_default();
        tracing::info!("Creating vserver group {}", self.named_key);
        let group_id = api
            .create_vserver_group(lb_id, &self.named_key.to_string(), first)
            .await?;
        self.group_id = Some(group_id.clone());
        for chunk in chunks {
            api.add_vserver_group_backends(&group_id, chunk).await?;
        }
        Ok(group_id)
    }
}

/// Ensure a vserver group for every node port of a service.
/// Returns node port to group id.
#[tracing::instrument(skip(api, service_key, backends))]
pub async fn sync_groups(
    api: &dyn LoadBalancerApi,
    lb_id: &str,
    service_key: &NamedKey,
    node_ports: &BTreeSet<i32>,
    backends: &[BackendServer],
) -> SlbResult<HashMap<i32, String>> {
    let existing = api
        .describe_vserver_groups(lb_id)
        .await?
        .into_iter()
        .filter_map(|group| Some((group.name.parse::<NamedKey>().ok()?, group.id)))
        .collect::<HashMap<_, _>>();

    let mut group_ids = HashMap::new();
    for node_port in node_ports {
        let named_key = service_key.with_port(*node_port);
        let group_id = existing.get(&named_key).cloned();
        let mut group = VGroup::new(named_key, group_id, backends.to_vec());
        group_ids.insert(*node_port, group.ensure(api, lb_id).await?);
    }
    Ok(group_ids)
}

/// Delete groups of this service whose node port is gone.
///
/// Listeners still referencing a group block its deletion,
/// so this runs after listeners are reconciled.
pub async fn delete_orphan_groups(
    api: &dyn LoadBalancerApi,
    lb_id: &str,
    service_key: &NamedKey,
    keep: &BTreeSet<i32>,
) -> SlbResult<()> {
    for group in api.describe_vserver_groups(lb_id).await? {
        let Ok(key) = group.name.parse::<NamedKey>() else {
            continue;
        };
        if key.same_owner(service_key) && !keep.contains(&key.port) {
            tracing::info!("Deleting orphan vserver group {}", group.name);
            match api.delete_vserver_group(&group.id).await {
                Err(err) if err.is_not_found() => {
                    tracing::debug!("Vserver group {} is already gone", group.id);
                }
                result => result?,
            }
        }
    }
    Ok(())
}
