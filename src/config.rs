use std::{ffi::OsString, time::Duration};

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::retry::BackoffPolicy;

/// How backend members are attached to a load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendMode {
    /// One backend list shared by all listeners.
    Flat,
    /// One vserver group per listener.
    Grouped,
}

#[derive(Debug, Clone, Parser)]
pub struct ControllerConfig {
    /// Identifier of the cluster. It's encoded into listener and
    /// vserver group descriptions to tell our resources apart from
    /// the resources of other clusters sharing a load balancer.
    #[arg(long, env = "SLB_CLUSTER_ID", default_value = "kubernetes")]
    pub cluster_id: String,

    /// Region of the cluster.
    #[arg(long, env = "SLB_REGION_ID", default_value = "cn-hangzhou")]
    pub region_id: String,

    /// VPC the cluster runs in. Required for route reconciliation
    /// when route tables are not listed explicitly.
    #[arg(long, env = "SLB_VPC_ID")]
    pub vpc_id: Option<String>,

    /// VSwitch for intranet load balancers.
    #[arg(long, env = "SLB_VSWITCH_ID")]
    pub vswitch_id: Option<String>,

    /// CIDR block the pod CIDRs of all nodes are allocated from.
    /// Route entries outside of this block are never touched.
    #[arg(long, env = "SLB_CLUSTER_CIDR")]
    pub cluster_cidr: Option<String>,

    /// Route tables to reconcile. If empty, all route tables
    /// of the VPC router are used.
    #[arg(long, env = "SLB_ROUTE_TABLE_IDS", value_delimiter = ',')]
    pub route_table_ids: Vec<String>,

    /// Whether the controller manages pod CIDR routes.
    #[arg(long, env = "SLB_CONFIGURE_ROUTES", default_value = "true")]
    pub configure_routes: bool,

    /// Backend attachment mode.
    #[arg(long, env = "SLB_BACKEND_MODE", value_enum, default_value = "grouped")]
    pub backend_mode: BackendMode,

    /// Maximum number of route creation attempts per node.
    #[arg(long, env = "SLB_ROUTE_CREATE_ATTEMPTS", default_value = "4")]
    pub route_create_attempts: u32,

    /// Delay before the first route creation retry, in milliseconds.
    #[arg(long, env = "SLB_ROUTE_CREATE_INITIAL_DELAY_MS", default_value = "1000")]
    pub route_create_initial_delay_ms: u64,

    /// Upper bound of a single route creation retry delay, in milliseconds.
    #[arg(long, env = "SLB_ROUTE_CREATE_MAX_DELAY_MS", default_value = "10000")]
    pub route_create_max_delay_ms: u64,

    #[arg(long, env = "SLB_ROUTE_CREATE_BACKOFF_FACTOR", default_value = "2.0")]
    pub route_create_backoff_factor: f64,

    /// Random extra delay as a fraction of the current delay.
    #[arg(long, env = "SLB_ROUTE_CREATE_JITTER", default_value = "0.5")]
    pub route_create_jitter: f64,

    // Log level of the controller.
    #[arg(long, env = "SLB_LOG_LEVEL", default_value = "INFO")]
    pub log_level: LevelFilter,
}

impl ControllerConfig {
    /// Parse the config from command line arguments and environment.
    /// Variables from a `.env` file are loaded first, if it exists.
    #[must_use]
    pub fn from_env() -> Self {
        Self::load(std::env::args_os())
    }

    /// Same as [`Self::from_env`] with explicit arguments.
    #[must_use]
    pub fn load<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        dotenvy::dotenv().ok();
        Self::parse_from(args)
    }

    pub fn init_tracing(&self) {
        tracing_subscriber::fmt()
            .with_max_level(self.log_level)
            .init();
    }

    /// Backoff of route creation. Factor and jitter are clamped to
    /// `1..=10` and `0..=1`, non-finite values fall back to no growth
    /// and no jitter.
    #[must_use]
    pub fn route_create_backoff(&self) -> BackoffPolicy {
        let clamp = |value: f64, min: f64, max: f64| {
            if value.is_finite() {
                value.clamp(min, max)
            } else {
                min
            }
        };
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.route_create_initial_delay_ms),
            factor: clamp(self.route_create_backoff_factor, 1.0, 10.0),
            max_attempts: self.route_create_attempts,
            max_delay: Duration::from_millis(self.route_create_max_delay_ms),
            jitter: clamp(self.route_create_jitter, 0.0, 1.0),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ControllerConfig {
    ControllerConfig::parse_from([
        "slb-controller",
        "--cluster-id",
        "c1",
        "--cluster-cidr",
        "172.16.0.0/16",
        "--route-table-ids",
        "vtb-1",
        "--route-create-initial-delay-ms",
        "0",
        "--route-create-max-delay-ms",
        "0",
        "--route-create-jitter",
        "0",
    ])
}
