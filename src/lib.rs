#![warn(
    // Base lints.
    clippy::all,
    // Some pedantic lints.
    clippy::pedantic,
    // New lints which are cool.
    clippy::nursery,
)]
#![allow(
    clippy::module_name_repetitions,
    // Signatures say it all.
    clippy::missing_errors_doc
)]

//! Reconciliation core of a cloud load balancer controller.
//!
//! Converges a provider's load balancers, listeners, backend pools and
//! VPC route entries towards what services and nodes of a cluster ask
//! for. The watch layer deciding when to reconcile and the wire client
//! of the provider API plug in from outside, see [`cloud`] and
//! [`node_status`].

use std::sync::Arc;

use cloud::{LoadBalancerApi, RouteTableApi};
use config::ControllerConfig;
use node_status::{KubeNodeConditions, NodeConditionUpdater};
use registry::DeletedServices;

pub mod annotations;
pub mod backend;
pub mod cidr;
pub mod cloud;
pub mod config;
pub mod consts;
pub mod error;
pub mod label_filter;
pub mod listener;
pub mod loadbalancer;
pub mod named_key;
pub mod node;
pub mod node_status;
pub mod registry;
pub mod retry;
pub mod route;
pub mod service;

pub use error::{SlbError, SlbResult};
pub use route::reconcile_routes;
pub use service::{
    ensure_load_balancer, ensure_load_balancer_deleted, get_load_balancer, update_load_balancer,
};

/// Everything a reconcile needs, built once at startup and shared
/// between reconciles.
#[derive(Clone)]
pub struct Context {
    pub config: ControllerConfig,
    pub lb_api: Arc<dyn LoadBalancerApi>,
    pub route_api: Arc<dyn RouteTableApi>,
    pub node_conditions: Arc<dyn NodeConditionUpdater>,
    pub deleted_services: Arc<DeletedServices>,
}

impl Context {
    #[must_use]
    pub fn new(
        config: ControllerConfig,
        lb_api: Arc<dyn LoadBalancerApi>,
        route_api: Arc<dyn RouteTableApi>,
        node_conditions: Arc<dyn NodeConditionUpdater>,
        deleted_services: Arc<DeletedServices>,
    ) -> Self {
        Self {
            config,
            lb_api,
            route_api,
            node_conditions,
            deleted_services,
        }
    }

    /// Startup of a controller process: config from `.env`, arguments
    /// and environment, logging, and a kube client for node conditions.
    /// Provider clients come from the caller.
    pub async fn bootstrap(
        lb_api: Arc<dyn LoadBalancerApi>,
        route_api: Arc<dyn RouteTableApi>,
    ) -> SlbResult<Self> {
        let config = ControllerConfig::from_env();
        config.init_tracing();
        tracing::info!("Starting slb-controller v{}", env!("CARGO_PKG_VERSION"));
        let client = kube::Client::try_default().await?;
        tracing::info!("Kube client is connected");
        Ok(Self::new(
            config,
            lb_api,
            route_api,
            Arc::new(KubeNodeConditions::new(client)),
            Arc::new(DeletedServices::new()),
        ))
    }
}
