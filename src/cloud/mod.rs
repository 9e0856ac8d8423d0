//! Call contract of the cloud provider API.
//!
//! The wire-level client lives outside of this crate. Reconcilers only
//! talk to the provider through the traits below, every call is an
//! await point and nothing else is.

use std::{fmt, str::FromStr};

use async_trait::async_trait;

use crate::{
    consts,
    error::{ApiError, SlbError},
    listener::ListenerSettings,
};

#[cfg(test)]
pub mod fake;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
    Https,
}

impl Protocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = SlbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            _ => Err(SlbError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Filter for describing load balancers. Unset fields don't filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerQuery {
    pub id: Option<String>,
    pub name: Option<String>,
    pub tag: Option<Tag>,
}

impl LoadBalancerQuery {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn by_tag(tag: Tag) -> Self {
        Self {
            tag: Some(tag),
            ..Default::default()
        }
    }
}

/// Port and protocol of a listener as listed in the load balancer
/// attributes. The protocol is kept as the provider reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSummary {
    pub port: i32,
    pub protocol: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendServer {
    pub server_id: String,
    pub weight: i32,
    pub server_type: String,
}

impl BackendServer {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            weight: consts::DEFAULT_BACKEND_WEIGHT,
            server_type: consts::BACKEND_SERVER_TYPE.to_string(),
        }
    }
}

/// Load balancer as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteLoadBalancer {
    pub id: String,
    pub name: String,
    pub address: String,
    pub address_type: String,
    pub network_type: String,
    pub charge_type: String,
    pub bandwidth: i32,
    pub spec: String,
    pub master_zone_id: String,
    pub slave_zone_id: String,
    pub listeners: Vec<ListenerSummary>,
    pub backend_servers: Vec<BackendServer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub region_id: String,
    pub address_type: String,
    pub network_type: String,
    pub charge_type: String,
    pub bandwidth: i32,
    pub spec: String,
    pub master_zone_id: Option<String>,
    pub slave_zone_id: Option<String>,
    pub vswitch_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Running,
    Stopped,
}

/// Full listener attributes, the body of create, modify and
/// describe calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub port: i32,
    pub backend_port: i32,
    pub description: String,
    pub status: ListenerStatus,
    pub vserver_group_id: Option<String>,
    pub settings: ListenerSettings,
}

impl Listener {
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.settings.protocol()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VServerGroupSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub route_table_id: String,
    pub destination_cidr: String,
    pub next_hop_type: String,
    pub next_hop_id: String,
    pub entry_type: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub id: String,
    pub router_id: String,
    pub cidr_block: String,
}

#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn describe_load_balancers(
        &self,
        query: &LoadBalancerQuery,
    ) -> ApiResult<Vec<RemoteLoadBalancer>>;
    async fn describe_load_balancer_attribute(&self, lb_id: &str)
        -> ApiResult<RemoteLoadBalancer>;
    /// Returns the id of the new load balancer.
    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest)
        -> ApiResult<String>;
    async fn delete_load_balancer(&self, lb_id: &str) -> ApiResult<()>;
    async fn modify_internet_spec(
        &self,
        lb_id: &str,
        charge_type: &str,
        bandwidth: i32,
    ) -> ApiResult<()>;
    async fn modify_instance_spec(&self, lb_id: &str, spec: &str) -> ApiResult<()>;

    async fn describe_tags(&self, lb_id: &str) -> ApiResult<Vec<Tag>>;
    async fn add_tags(&self, lb_id: &str, tags: &[Tag]) -> ApiResult<()>;

    async fn describe_listener(
        &self,
        lb_id: &str,
        port: i32,
        protocol: Protocol,
    ) -> ApiResult<Listener>;
    /// Listeners are created stopped.
    async fn create_listener(&self, lb_id: &str, listener: &Listener) -> ApiResult<()>;
    async fn modify_listener(&self, lb_id: &str, listener: &Listener) -> ApiResult<()>;
    async fn delete_listener(&self, lb_id: &str, port: i32, protocol: Protocol) -> ApiResult<()>;
    async fn start_listener(&self, lb_id: &str, port: i32) -> ApiResult<()>;
    async fn stop_listener(&self, lb_id: &str, port: i32) -> ApiResult<()>;

    async fn add_backend_servers(&self, lb_id: &str, servers: &[BackendServer]) -> ApiResult<()>;
    async fn remove_backend_servers(&self, lb_id: &str, servers: &[BackendServer])
        -> ApiResult<()>;

    async fn describe_vserver_groups(&self, lb_id: &str) -> ApiResult<Vec<VServerGroupSummary>>;
    async fn describe_vserver_group_backends(&self, group_id: &str)
        -> ApiResult<Vec<BackendServer>>;
    /// Returns the id of the new group.
    async fn create_vserver_group(
        &self,
        lb_id: &str,
        name: &str,
        servers: &[BackendServer],
    ) -> ApiResult<String>;
    async fn delete_vserver_group(&self, group_id: &str) -> ApiResult<()>;
    async fn add_vserver_group_backends(
        &self,
        group_id: &str,
        servers: &[BackendServer],
    ) -> ApiResult<()>;
    async fn remove_vserver_group_backends(
        &self,
        group_id: &str,
        servers: &[BackendServer],
    ) -> ApiResult<()>;
    /// Replace `old` members with `new` ones, pairwise.
    async fn modify_vserver_group_backends(
        &self,
        group_id: &str,
        old: &[BackendServer],
        new: &[BackendServer],
    ) -> ApiResult<()>;
}

#[async_trait]
pub trait RouteTableApi: Send + Sync {
    async fn describe_vpc(&self, vpc_id: &str) -> ApiResult<Vpc>;
    /// Ids of the route tables of a router.
    async fn describe_route_tables(&self, router_id: &str) -> ApiResult<Vec<String>>;
    async fn describe_route_entries(&self, route_table_id: &str) -> ApiResult<Vec<RouteEntry>>;
    async fn create_route_entry(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ApiResult<()>;
    async fn delete_route_entry(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        instance_id: &str,
    ) -> ApiResult<()>;
    /// Block until the entry is propagated.
    async fn wait_route_entry(&self, route_table_id: &str, destination_cidr: &str)
        -> ApiResult<()>;
}
