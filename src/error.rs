use thiserror::Error;

use crate::consts;

pub type SlbResult<T> = Result<T, SlbError>;

#[derive(Debug, Error)]
pub enum SlbError {
    #[error("Cannot parse node filter: {0}")]
    InvalidNodeFilter(String),
    #[error("Service has no {0}")]
    MissingServiceField(&'static str),
    #[error("Invalid named key {0:?}: expected `k8s/<port>/<service>/<namespace>/<cluster>`")]
    InvalidNamedKey(String),
    #[error("Invalid value {0:?}")]
    InvalidValue(String),
    #[error("Unsupported listener protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("Cannot parse CIDR {0:?}")]
    InvalidCidr(String),
    #[error("Load balancer {0} was not found")]
    LoadBalancerNotFound(String),
    #[error("Found more than one load balancer matching {0}")]
    AmbiguousLoadBalancer(String),
    #[error(
        "{attribute} of load balancer {lb_id} cannot be changed from {current:?} to {requested:?}. \
         Delete the service and create it again to apply the change"
    )]
    ImmutableAttribute {
        lb_id: String,
        attribute: &'static str,
        current: String,
        requested: String,
    },
    #[error(
        "Port {port} of load balancer {lb_id} is used by listener {owner:?} of another service. \
         Set the force-override-listeners annotation to take it over"
    )]
    ListenerConflict {
        lb_id: String,
        port: i32,
        owner: String,
    },
    #[error("Load balancer requested for deleted service {0}")]
    ServiceDeleted(String),
    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),
    #[error("No route tables found for VPC {0}")]
    NoRouteTables(String),
    #[error("Failed to create routes for nodes: {0:?}")]
    RouteSync(Vec<String>),
    #[error("Provider error: {0}")]
    Provider(#[from] ApiError),
    #[error("Kube error: {0}")]
    KubeError(#[from] kube::Error),
}

/// Error returned by the provider API client.
///
/// The code is the provider's machine readable error code,
/// it's used to tell benign failures from real ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code.ends_with(".NotFound") || self.code.ends_with(".NotExist")
    }

    /// Route creation failed because the next hop is gone.
    #[must_use]
    pub fn is_target_not_found(&self) -> bool {
        consts::ROUTE_TARGET_NOT_FOUND_CODES.contains(&self.code.as_str())
    }

    #[must_use]
    pub fn is_already_stopped(&self) -> bool {
        self.code == consts::LISTENER_ALREADY_STOPPED_CODE
    }
}
