//! In-memory provider used by tests.
//!
//! Keeps just enough state to behave like the real API and records
//! every call in order, so tests can assert exact call sequences.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ApiResult, BackendServer, CreateLoadBalancerRequest, Listener, ListenerStatus,
    ListenerSummary, LoadBalancerApi, LoadBalancerQuery, Protocol, RemoteLoadBalancer, RouteEntry,
    RouteTableApi, Tag, VServerGroupSummary, Vpc,
};
use crate::{
    consts,
    error::{ApiError, SlbResult},
    node_status::NodeConditionUpdater,
};

#[derive(Debug, Default)]
struct FakeLoadBalancer {
    attributes: RemoteLoadBalancer,
    tags: Vec<Tag>,
    listeners: BTreeMap<i32, Listener>,
}

#[derive(Debug)]
struct FakeGroup {
    lb_id: String,
    name: String,
    backends: Vec<BackendServer>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    lbs: BTreeMap<String, FakeLoadBalancer>,
    groups: BTreeMap<String, FakeGroup>,
    vpcs: HashMap<String, Vpc>,
    route_tables: HashMap<String, Vec<String>>,
    routes: Vec<RouteEntry>,
    missing_instances: HashSet<String>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
    calls: Vec<String>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Record the call and return the injected failure, if any.
    fn call(&mut self, method: &'static str, args: String) -> ApiResult<()> {
        self.calls.push(format!("{method} {args}").trim_end().to_string());
        match self.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn lb(&mut self, lb_id: &str) -> ApiResult<&mut FakeLoadBalancer> {
        self.lbs
            .get_mut(lb_id)
            .ok_or_else(|| ApiError::new("InvalidLoadBalancerId.NotFound", lb_id))
    }

    fn group(&mut self, group_id: &str) -> ApiResult<&mut FakeGroup> {
        self.groups
            .get_mut(group_id)
            .ok_or_else(|| ApiError::new("VServerGroup.NotFound", group_id))
    }

    fn describe(&self, lb: &FakeLoadBalancer) -> RemoteLoadBalancer {
        let mut attributes = lb.attributes.clone();
        attributes.listeners = lb
            .listeners
            .values()
            .map(|listener| ListenerSummary {
                port: listener.port,
                protocol: listener.protocol().to_string(),
                description: listener.description.clone(),
            })
            .collect();
        attributes
    }
}

fn ids(servers: &[BackendServer]) -> String {
    servers
        .iter()
        .map(|s| s.server_id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `method` with `error`.
    pub fn fail(&self, method: &'static str, error: ApiError) {
        self.state
            .lock()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls that change remote state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.starts_with("describe") && !call.starts_with("wait"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn add_load_balancer(&self, attributes: RemoteLoadBalancer, tags: Vec<Tag>) {
        self.state.lock().lbs.insert(
            attributes.id.clone(),
            FakeLoadBalancer {
                attributes,
                tags,
                listeners: BTreeMap::new(),
            },
        );
    }

    pub fn add_listener(&self, lb_id: &str, listener: Listener) {
        let mut state = self.state.lock();
        if let Some(lb) = state.lbs.get_mut(lb_id) {
            lb.listeners.insert(listener.port, listener);
        }
    }

    pub fn add_group(&self, lb_id: &str, name: &str, backends: Vec<BackendServer>) -> String {
        let mut state = self.state.lock();
        let id = state.id("rsp");
        state.groups.insert(
            id.clone(),
            FakeGroup {
                lb_id: lb_id.to_string(),
                name: name.to_string(),
                backends,
            },
        );
        id
    }

    pub fn add_vpc(&self, vpc: Vpc, route_tables: Vec<String>) {
        let mut state = self.state.lock();
        state.route_tables.insert(vpc.router_id.clone(), route_tables);
        state.vpcs.insert(vpc.id.clone(), vpc);
    }

    pub fn add_route(&self, entry: RouteEntry) {
        self.state.lock().routes.push(entry);
    }

    /// Route creation towards this instance fails with "not found".
    pub fn remove_instance(&self, instance_id: &str) {
        self.state
            .lock()
            .missing_instances
            .insert(instance_id.to_string());
    }

    pub fn load_balancer(&self, lb_id: &str) -> Option<RemoteLoadBalancer> {
        let state = self.state.lock();
        state.lbs.get(lb_id).map(|lb| state.describe(lb))
    }

    pub fn load_balancer_ids(&self) -> Vec<String> {
        self.state.lock().lbs.keys().cloned().collect()
    }

    pub fn tags(&self, lb_id: &str) -> Vec<Tag> {
        self.state
            .lock()
            .lbs
            .get(lb_id)
            .map(|lb| lb.tags.clone())
            .unwrap_or_default()
    }

    pub fn listener(&self, lb_id: &str, port: i32) -> Option<Listener> {
        self.state
            .lock()
            .lbs
            .get(lb_id)
            .and_then(|lb| lb.listeners.get(&port).cloned())
    }

    /// Group names with their member ids.
    pub fn groups(&self, lb_id: &str) -> BTreeMap<String, Vec<String>> {
        self.state
            .lock()
            .groups
            .values()
            .filter(|group| group.lb_id == lb_id)
            .map(|group| {
                let mut members = group
                    .backends
                    .iter()
                    .map(|s| s.server_id.clone())
                    .collect::<Vec<_>>();
                members.sort();
                (group.name.clone(), members)
            })
            .collect()
    }

    pub fn routes(&self, route_table_id: &str) -> Vec<RouteEntry> {
        self.state
            .lock()
            .routes
            .iter()
            .filter(|entry| entry.route_table_id == route_table_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LoadBalancerApi for FakeCloud {
    async fn describe_load_balancers(
        &self,
        query: &LoadBalancerQuery,
    ) -> ApiResult<Vec<RemoteLoadBalancer>> {
        let mut state = self.state.lock();
        state.call("describe_load_balancers", format!("{query:?}"))?;
        Ok(state
            .lbs
            .values()
            .filter(|lb| query.id.as_ref().map_or(true, |id| *id == lb.attributes.id))
            .filter(|lb| {
                query
                    .name
                    .as_ref()
                    .map_or(true, |name| *name == lb.attributes.name)
            })
            .filter(|lb| query.tag.as_ref().map_or(true, |tag| lb.tags.contains(tag)))
            .map(|lb| state.describe(lb))
            .collect())
    }

    async fn describe_load_balancer_attribute(
        &self,
        lb_id: &str,
    ) -> ApiResult<RemoteLoadBalancer> {
        let mut state = self.state.lock();
        state.call("describe_load_balancer_attribute", lb_id.to_string())?;
        let lb = state
            .lbs
            .get(lb_id)
            .ok_or_else(|| ApiError::new("InvalidLoadBalancerId.NotFound", lb_id))?;
        Ok(state.describe(lb))
    }

    async fn create_load_balancer(
        &self,
        request: &CreateLoadBalancerRequest,
    ) -> ApiResult<String> {
        let mut state = self.state.lock();
        state.call("create_load_balancer", request.name.clone())?;
        let id = state.id("lb");
        let attributes = RemoteLoadBalancer {
            id: id.clone(),
            name: request.name.clone(),
            address: format!("47.0.0.{}", state.next_id),
            address_type: request.address_type.clone(),
            network_type: request.network_type.clone(),
            charge_type: request.charge_type.clone(),
            bandwidth: request.bandwidth,
            spec: request.spec.clone(),
            master_zone_id: request
                .master_zone_id
                .clone()
                .unwrap_or_else(|| "zone-a".to_string()),
            slave_zone_id: request
                .slave_zone_id
                .clone()
                .unwrap_or_else(|| "zone-b".to_string()),
            listeners: Vec::new(),
            backend_servers: Vec::new(),
        };
        state.lbs.insert(
            id.clone(),
            FakeLoadBalancer {
                attributes,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn delete_load_balancer(&self, lb_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("delete_load_balancer", lb_id.to_string())?;
        state.lb(lb_id)?;
        state.lbs.remove(lb_id);
        state.groups.retain(|_, group| group.lb_id != lb_id);
        Ok(())
    }

    async fn modify_internet_spec(
        &self,
        lb_id: &str,
        charge_type: &str,
        bandwidth: i32,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "modify_internet_spec",
            format!("{lb_id} {charge_type} {bandwidth}"),
        )?;
        let lb = state.lb(lb_id)?;
        lb.attributes.charge_type = charge_type.to_string();
        lb.attributes.bandwidth = bandwidth;
        Ok(())
    }

    async fn modify_instance_spec(&self, lb_id: &str, spec: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("modify_instance_spec", format!("{lb_id} {spec}"))?;
        state.lb(lb_id)?.attributes.spec = spec.to_string();
        Ok(())
    }

    async fn describe_tags(&self, lb_id: &str) -> ApiResult<Vec<Tag>> {
        let mut state = self.state.lock();
        state.call("describe_tags", lb_id.to_string())?;
        Ok(state.lb(lb_id)?.tags.clone())
    }

    async fn add_tags(&self, lb_id: &str, tags: &[Tag]) -> ApiResult<()> {
        let mut state = self.state.lock();
        let rendered = tags
            .iter()
            .map(|tag| format!("{}={}", tag.key, tag.value))
            .collect::<Vec<_>>()
            .join(",");
        state.call("add_tags", format!("{lb_id} {rendered}"))?;
        let lb = state.lb(lb_id)?;
        for tag in tags {
            lb.tags.retain(|existing| existing.key != tag.key);
            lb.tags.push(tag.clone());
        }
        Ok(())
    }

    async fn describe_listener(
        &self,
        lb_id: &str,
        port: i32,
        protocol: Protocol,
    ) -> ApiResult<Listener> {
        let mut state = self.state.lock();
        state.call("describe_listener", format!("{lb_id} {port} {protocol}"))?;
        state
            .lb(lb_id)?
            .listeners
            .get(&port)
            .filter(|listener| listener.protocol() == protocol)
            .cloned()
            .ok_or_else(|| ApiError::new("Listener.NotExist", format!("{lb_id}:{port}")))
    }

    async fn create_listener(&self, lb_id: &str, listener: &Listener) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "create_listener",
            format!("{lb_id} {} {}", listener.port, listener.protocol()),
        )?;
        let lb = state.lb(lb_id)?;
        if lb.listeners.contains_key(&listener.port) {
            return Err(ApiError::new(
                "Listener.PortOccupied",
                format!("{lb_id}:{}", listener.port),
            ));
        }
        let mut created = listener.clone();
        created.status = ListenerStatus::Stopped;
        lb.listeners.insert(listener.port, created);
        Ok(())
    }

    async fn modify_listener(&self, lb_id: &str, listener: &Listener) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "modify_listener",
            format!("{lb_id} {} {}", listener.port, listener.protocol()),
        )?;
        let live = state
            .lb(lb_id)?
            .listeners
            .get_mut(&listener.port)
            .ok_or_else(|| ApiError::new("Listener.NotExist", lb_id))?;
        let status = live.status;
        *live = listener.clone();
        live.status = status;
        Ok(())
    }

    async fn delete_listener(&self, lb_id: &str, port: i32, protocol: Protocol) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("delete_listener", format!("{lb_id} {port} {protocol}"))?;
        state
            .lb(lb_id)?
            .listeners
            .remove(&port)
            .map(|_| ())
            .ok_or_else(|| ApiError::new("Listener.NotExist", format!("{lb_id}:{port}")))
    }

    async fn start_listener(&self, lb_id: &str, port: i32) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("start_listener", format!("{lb_id} {port}"))?;
        let listener = state
            .lb(lb_id)?
            .listeners
            .get_mut(&port)
            .ok_or_else(|| ApiError::new("Listener.NotExist", format!("{lb_id}:{port}")))?;
        listener.status = ListenerStatus::Running;
        Ok(())
    }

    async fn stop_listener(&self, lb_id: &str, port: i32) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("stop_listener", format!("{lb_id} {port}"))?;
        let listener = state
            .lb(lb_id)?
            .listeners
            .get_mut(&port)
            .ok_or_else(|| ApiError::new("Listener.NotExist", format!("{lb_id}:{port}")))?;
        if listener.status == ListenerStatus::Stopped {
            return Err(ApiError::new(consts::LISTENER_ALREADY_STOPPED_CODE, "stopped"));
        }
        listener.status = ListenerStatus::Stopped;
        Ok(())
    }

    async fn add_backend_servers(&self, lb_id: &str, servers: &[BackendServer]) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("add_backend_servers", format!("{lb_id} {}", ids(servers)))?;
        let lb = state.lb(lb_id)?;
        for server in servers {
            if !lb
                .attributes
                .backend_servers
                .iter()
                .any(|s| s.server_id == server.server_id)
            {
                lb.attributes.backend_servers.push(server.clone());
            }
        }
        Ok(())
    }

    async fn remove_backend_servers(
        &self,
        lb_id: &str,
        servers: &[BackendServer],
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("remove_backend_servers", format!("{lb_id} {}", ids(servers)))?;
        state
            .lb(lb_id)?
            .attributes
            .backend_servers
            .retain(|s| !servers.iter().any(|r| r.server_id == s.server_id));
        Ok(())
    }

    async fn describe_vserver_groups(&self, lb_id: &str) -> ApiResult<Vec<VServerGroupSummary>> {
        let mut state = self.state.lock();
        state.call("describe_vserver_groups", lb_id.to_string())?;
        state.lb(lb_id)?;
        Ok(state
            .groups
            .iter()
            .filter(|(_, group)| group.lb_id == lb_id)
            .map(|(id, group)| VServerGroupSummary {
                id: id.clone(),
                name: group.name.clone(),
            })
            .collect())
    }

    async fn describe_vserver_group_backends(
        &self,
        group_id: &str,
    ) -> ApiResult<Vec<BackendServer>> {
        let mut state = self.state.lock();
        state.call("describe_vserver_group_backends", group_id.to_string())?;
        Ok(state.group(group_id)?.backends.clone())
    }

    async fn create_vserver_group(
        &self,
        lb_id: &str,
        name: &str,
        servers: &[BackendServer],
    ) -> ApiResult<String> {
        let mut state = self.state.lock();
        state.call(
            "create_vserver_group",
            format!("{lb_id} {name} {}", ids(servers)),
        )?;
        state.lb(lb_id)?;
        let id = state.id("rsp");
        state.groups.insert(
            id.clone(),
            FakeGroup {
                lb_id: lb_id.to_string(),
                name: name.to_string(),
                backends: servers.to_vec(),
            },
        );
        Ok(id)
    }

    async fn delete_vserver_group(&self, group_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call("delete_vserver_group", group_id.to_string())?;
        let lb_id = state.group(group_id)?.lb_id.clone();
        let in_use = state.lb(&lb_id)?.listeners.values().any(|listener| {
            listener.vserver_group_id.as_deref() == Some(group_id)
        });
        if in_use {
            return Err(ApiError::new("ResourceInUse", group_id));
        }
        state.groups.remove(group_id);
        Ok(())
    }

    async fn add_vserver_group_backends(
        &self,
        group_id: &str,
        servers: &[BackendServer],
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "add_vserver_group_backends",
            format!("{group_id} {}", ids(servers)),
        )?;
        state.group(group_id)?.backends.extend_from_slice(servers);
        Ok(())
    }

    async fn remove_vserver_group_backends(
        &self,
        group_id: &str,
        servers: &[BackendServer],
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "remove_vserver_group_backends",
            format!("{group_id} {}", ids(servers)),
        )?;
        state
            .group(group_id)?
            .backends
            .retain(|s| !servers.iter().any(|r| r.server_id == s.server_id));
        Ok(())
    }

    async fn modify_vserver_group_backends(
        &self,
        group_id: &str,
        old: &[BackendServer],
        new: &[BackendServer],
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "modify_vserver_group_backends",
            format!("{group_id} {}", ids(new)),
        )?;
        let group = state.group(group_id)?;
        group
            .backends
            .retain(|s| !old.iter().any(|r| r.server_id == s.server_id));
        group.backends.extend_from_slice(new);
        Ok(())
    }
}

#[async_trait]
impl RouteTableApi for FakeCloud {
    async fn describe_vpc(&self, vpc_id: &str) -> ApiResult<Vpc> {
        let mut state = self.state.lock();
        state.call("describe_vpc", vpc_id.to_string())?;
        state
            .vpcs
            .get(vpc_id)
            .cloned()
            .ok_or_else(|| ApiError::new("InvalidVpcId.NotFound", vpc_id))
    }

    async fn describe_route_tables(&self, router_id: &str) -> ApiResult<Vec<String>> {
        let mut state = self.state.lock();
        state.call("describe_route_tables", router_id.to_string())?;
        Ok(state
            .route_tables
            .get(router_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn describe_route_entries(&self, route_table_id: &str) -> ApiResult<Vec<RouteEntry>> {
        let mut state = self.state.lock();
        state.call("describe_route_entries", route_table_id.to_string())?;
        Ok(state
            .routes
            .iter()
            .filter(|entry| entry.route_table_id == route_table_id)
            .cloned()
            .collect())
    }

    async fn create_route_entry(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "create_route_entry",
            format!("{route_table_id} {destination_cidr} {instance_id}"),
        )?;
        if state.missing_instances.contains(instance_id) {
            return Err(ApiError::new("InvalidInstanceId.NotFound", instance_id));
        }
        if state.routes.iter().any(|entry| {
            entry.route_table_id == route_table_id && entry.destination_cidr == destination_cidr
        }) {
            return Err(ApiError::new("InvalidCIDRBlock.Duplicate", destination_cidr));
        }
        state.routes.push(RouteEntry {
            route_table_id: route_table_id.to_string(),
            destination_cidr: destination_cidr.to_string(),
            next_hop_type: consts::ROUTE_NEXT_HOP_INSTANCE.to_string(),
            next_hop_id: instance_id.to_string(),
            entry_type: "Custom".to_string(),
            status: "Available".to_string(),
        });
        Ok(())
    }

    async fn delete_route_entry(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "delete_route_entry",
            format!("{route_table_id} {destination_cidr} {instance_id}"),
        )?;
        state.routes.retain(|entry| {
            !(entry.route_table_id == route_table_id
                && entry.destination_cidr == destination_cidr
                && entry.next_hop_id == instance_id)
        });
        Ok(())
    }

    async fn wait_route_entry(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.call(
            "wait_route_entry",
            format!("{route_table_id} {destination_cidr}"),
        )
    }
}

/// Records node condition updates.
#[derive(Debug, Default)]
pub struct FakeNodeConditions {
    updates: Mutex<Vec<(String, bool)>>,
}

impl FakeNodeConditions {
    /// `(node, network unavailable)` in update order.
    pub fn updates(&self) -> Vec<(String, bool)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl NodeConditionUpdater for FakeNodeConditions {
    async fn set_network_unavailable(&self, node_name: &str, unavailable: bool) -> SlbResult<()> {
        self.updates
            .lock()
            .push((node_name.to_string(), unavailable));
        Ok(())
    }
}
