pub const ANNOTATION_PREFIX: &str = "service.beta.kubernetes.io/alibaba-cloud-loadbalancer-";
pub const LEGACY_ANNOTATION_PREFIX: &str = "service.beta.kubernetes.io/alicloud-loadbalancer-";

// Canonical annotation names, without the prefix.
pub const ADDRESS_TYPE_ANN_NAME: &str = "address-type";
pub const NETWORK_TYPE_ANN_NAME: &str = "slb-network-type";
pub const CHARGE_TYPE_ANN_NAME: &str = "charge-type";
pub const LOAD_BALANCER_ID_ANN_NAME: &str = "id";
pub const BACKEND_LABEL_ANN_NAME: &str = "backend-label";
pub const MASTER_ZONE_ANN_NAME: &str = "master-zoneid";
pub const SLAVE_ZONE_ANN_NAME: &str = "slave-zoneid";
pub const BANDWIDTH_ANN_NAME: &str = "bandwidth";
pub const CERT_ID_ANN_NAME: &str = "cert-id";
pub const SPEC_ANN_NAME: &str = "spec";
pub const OVERRIDE_LISTENERS_ANN_NAME: &str = "force-override-listeners";
pub const PROTOCOL_PORT_ANN_NAME: &str = "protocol-port";
pub const PERSISTENCE_TIMEOUT_ANN_NAME: &str = "persistence-timeout";

// Health check
pub const HEALTH_CHECK_FLAG_ANN_NAME: &str = "health-check-flag";
pub const HEALTH_CHECK_TYPE_ANN_NAME: &str = "health-check-type";
pub const HEALTH_CHECK_URI_ANN_NAME: &str = "health-check-uri";
pub const HEALTH_CHECK_CONNECT_PORT_ANN_NAME: &str = "health-check-connect-port";
pub const HEALTHY_THRESHOLD_ANN_NAME: &str = "health-check-healthy-threshold";
pub const UNHEALTHY_THRESHOLD_ANN_NAME: &str = "health-check-unhealthy-threshold";
pub const HEALTH_CHECK_INTERVAL_ANN_NAME: &str = "health-check-interval";
pub const HEALTH_CHECK_CONNECT_TIMEOUT_ANN_NAME: &str = "health-check-connect-timeout";
pub const HEALTH_CHECK_TIMEOUT_ANN_NAME: &str = "health-check-timeout";
pub const HEALTH_CHECK_DOMAIN_ANN_NAME: &str = "health-check-domain";
pub const HEALTH_CHECK_HTTP_CODE_ANN_NAME: &str = "health-check-httpcode";

// Session stickiness
pub const STICKY_SESSION_ANN_NAME: &str = "sticky-session";
pub const STICKY_SESSION_TYPE_ANN_NAME: &str = "sticky-session-type";
pub const COOKIE_ANN_NAME: &str = "cookie";
pub const COOKIE_TIMEOUT_ANN_NAME: &str = "cookie-timeout";

/// Normalised spellings that split into different words than the
/// canonical name.
pub const ANNOTATION_ALIASES: &[(&str, &str)] = &[
    ("master-zone-id", MASTER_ZONE_ANN_NAME),
    ("slave-zone-id", SLAVE_ZONE_ANN_NAME),
    ("health-check-http-code", HEALTH_CHECK_HTTP_CODE_ANN_NAME),
    ("healthy-threshold", HEALTHY_THRESHOLD_ANN_NAME),
    ("unhealthy-threshold", UNHEALTHY_THRESHOLD_ANN_NAME),
    ("loadbalancer-id", LOAD_BALANCER_ID_ANN_NAME),
    ("certificate-id", CERT_ID_ANN_NAME),
];

pub const DEFAULT_BANDWIDTH: i32 = 50;
pub const DEFAULT_LB_SPEC: &str = "slb.s1.small";

pub const DEFAULT_HEALTHY_THRESHOLD: i32 = 3;
pub const DEFAULT_UNHEALTHY_THRESHOLD: i32 = 3;
pub const DEFAULT_HEALTH_CHECK_INTERVAL: i32 = 2;
pub const DEFAULT_HEALTH_CHECK_CONNECT_TIMEOUT: i32 = 5;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: i32 = 5;
pub const DEFAULT_HEALTH_CHECK_HTTP_CODE: &str = "http_2xx";
pub const DEFAULT_COOKIE_TIMEOUT: i32 = 1800;
pub const DEFAULT_PERSISTENCE_TIMEOUT: i32 = 0;

/// Tag attached to every load balancer created by the controller.
/// The value is the load balancer name.
pub const LB_TAG_KEY: &str = "kubernetes.do.not.delete";
pub const LB_NAME_MAX_LEN: usize = 32;

pub const NAMED_KEY_PREFIX: &str = "k8s";

/// Provider limit for backend servers in a single call.
pub const MAX_BACKEND_BATCH: usize = 20;
pub const DEFAULT_BACKEND_WEIGHT: i32 = 100;
pub const BACKEND_SERVER_TYPE: &str = "ecs";

pub const EXCLUDE_FROM_LB_LABEL: &str = "node.kubernetes.io/exclude-from-external-load-balancers";

pub const ROUTE_NEXT_HOP_INSTANCE: &str = "Instance";
pub const ROUTE_ENTRY_TYPE_SYSTEM: &str = "System";
pub const DEFAULT_ROUTE_CIDR: &str = "0.0.0.0/0";

pub const ROUTE_TARGET_NOT_FOUND_CODES: &[&str] =
    &["InvalidInstanceId.NotFound", "InvalidNextHopId.NotFound"];
pub const LISTENER_ALREADY_STOPPED_CODE: &str = "Listener.AlreadyStopped";

pub const NETWORK_UNAVAILABLE_CONDITION: &str = "NetworkUnavailable";
