//! Service annotations to load balancer configuration.
//!
//! Every reconcile builds two snapshots from the same annotations:
//! [`DesiredConfig`] has every field filled, falling back to defaults,
//! while [`RequestedConfig`] only has the fields the user actually set.
//! Updates of existing resources only ever apply requested fields.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use crate::{cloud::Protocol, consts, error::SlbError};

mod camel;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl FromStr for $name {
            type Err = SlbError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(SlbError::InvalidValue(s.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(AddressType {
    Internet => "internet",
    Intranet => "intranet",
});

string_enum!(NetworkType {
    Classic => "classic",
    Vpc => "vpc",
});

string_enum!(ChargeType {
    PayByTraffic => "paybytraffic",
    PayByBandwidth => "paybybandwidth",
});

string_enum!(
    /// On/off switch used by the provider for optional listener features.
    Flag {
        On => "on",
        Off => "off",
    }
);

string_enum!(HealthCheckType {
    Tcp => "tcp",
    Http => "http",
});

string_enum!(StickySessionType {
    Insert => "insert",
    Server => "server",
});

/// Load balancer configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredConfig {
    pub address_type: AddressType,
    pub network_type: NetworkType,
    pub charge_type: ChargeType,
    pub bandwidth: i32,
    pub master_zone_id: Option<String>,
    pub slave_zone_id: Option<String>,
    pub spec: String,
    pub cert_id: Option<String>,

    pub health_check: Flag,
    pub health_check_type: HealthCheckType,
    pub health_check_uri: String,
    pub health_check_connect_port: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
    pub health_check_interval: i32,
    pub health_check_connect_timeout: i32,
    pub health_check_timeout: i32,
    pub health_check_domain: String,
    pub health_check_http_code: String,

    pub sticky_session: Flag,
    pub sticky_session_type: StickySessionType,
    pub cookie: String,
    pub cookie_timeout: i32,
    pub persistence_timeout: i32,

    pub override_listeners: bool,
    pub load_balancer_id: Option<String>,
    pub backend_label: Option<String>,
    pub protocol_port: HashMap<i32, Protocol>,
}

/// Fields the user explicitly set through annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedConfig {
    pub address_type: Option<AddressType>,
    pub network_type: Option<NetworkType>,
    pub charge_type: Option<ChargeType>,
    pub bandwidth: Option<i32>,
    pub master_zone_id: Option<String>,
    pub slave_zone_id: Option<String>,
    pub spec: Option<String>,
    pub cert_id: Option<String>,

    pub health_check: Option<Flag>,
    pub health_check_type: Option<HealthCheckType>,
    pub health_check_uri: Option<String>,
    pub health_check_connect_port: Option<i32>,
    pub healthy_threshold: Option<i32>,
    pub unhealthy_threshold: Option<i32>,
    pub health_check_interval: Option<i32>,
    pub health_check_connect_timeout: Option<i32>,
    pub health_check_timeout: Option<i32>,
    pub health_check_domain: Option<String>,
    pub health_check_http_code: Option<String>,

    pub sticky_session: Option<Flag>,
    pub sticky_session_type: Option<StickySessionType>,
    pub cookie: Option<String>,
    pub cookie_timeout: Option<i32>,
    pub persistence_timeout: Option<i32>,

    pub override_listeners: Option<bool>,
    pub load_balancer_id: Option<String>,
    pub backend_label: Option<String>,
    pub protocol_port: Option<HashMap<i32, Protocol>>,
}

/// Result of resolving the annotations of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub desired: DesiredConfig,
    pub requested: RequestedConfig,
}

/// Canonical name of an annotation key, without the prefix.
/// Returns `None` for keys that don't belong to us.
#[must_use]
pub fn canonical_name(key: &str) -> Option<String> {
    let suffix = key
        .strip_prefix(consts::ANNOTATION_PREFIX)
        .or_else(|| key.strip_prefix(consts::LEGACY_ANNOTATION_PREFIX))?;
    let normalized = camel::normalize(suffix);
    if normalized.is_empty() {
        return None;
    }
    let canonical = consts::ANNOTATION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map_or(normalized, |(_, canonical)| (*canonical).to_string());
    Some(canonical)
}

/// Parse `proto:port` pairs separated by commas.
/// Malformed pairs are skipped.
#[must_use]
pub fn parse_protocol_port(raw: &str) -> HashMap<i32, Protocol> {
    let mut result = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let parsed = pair.split_once(':').and_then(|(proto, port)| {
            Some((
                port.trim().parse::<i32>().ok()?,
                proto.parse::<Protocol>().ok()?,
            ))
        });
        match parsed {
            Some((port, protocol)) => {
                result.insert(port, protocol);
            }
            None => tracing::warn!("Ignoring malformed protocol-port entry {:?}", pair),
        }
    }
    result
}

/// Annotations of a service, keyed by canonical name.
struct Annotations {
    values: HashMap<String, String>,
}

impl Annotations {
    fn new(raw: &BTreeMap<String, String>) -> Self {
        let mut values = HashMap::new();
        // Current prefix takes precedence over the legacy one.
        let (current, legacy): (Vec<_>, Vec<_>) = raw
            .iter()
            .partition(|(key, _)| key.starts_with(consts::ANNOTATION_PREFIX));
        for (key, value) in legacy.into_iter().chain(current) {
            if let Some(name) = canonical_name(key) {
                values.insert(name, value.trim().to_string());
            }
        }
        Self { values }
    }

    fn get(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .filter(|value| !value.is_empty())
            .cloned()
    }

    /// Parse an annotation. Unparsable values are reported and ignored.
    fn parse<T>(&self, name: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.get(name)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    "Cannot parse annotation {}={:?}: {}. Using default value",
                    name,
                    raw,
                    err
                );
                None
            }
        }
    }
}

impl RequestedConfig {
    #[must_use]
    pub fn from_annotations(raw: &BTreeMap<String, String>) -> Self {
        let ann = Annotations::new(raw);
        Self {
            address_type: ann.parse(consts::ADDRESS_TYPE_ANN_NAME),
            network_type: ann.parse(consts::NETWORK_TYPE_ANN_NAME),
            charge_type: ann.parse(consts::CHARGE_TYPE_ANN_NAME),
            bandwidth: ann.parse(consts::BANDWIDTH_ANN_NAME),
            master_zone_id: ann.get(consts::MASTER_ZONE_ANN_NAME),
            slave_zone_id: ann.get(consts::SLAVE_ZONE_ANN_NAME),
            spec: ann.get(consts::SPEC_ANN_NAME),
            cert_id: ann.get(consts::CERT_ID_ANN_NAME),

            health_check: ann.parse(consts::HEALTH_CHECK_FLAG_ANN_NAME),
            health_check_type: ann.parse(consts::HEALTH_CHECK_TYPE_ANN_NAME),
            health_check_uri: ann.get(consts::HEALTH_CHECK_URI_ANN_NAME),
            health_check_connect_port: ann.parse(consts::HEALTH_CHECK_CONNECT_PORT_ANN_NAME),
            healthy_threshold: ann.parse(consts::HEALTHY_THRESHOLD_ANN_NAME),
            unhealthy_threshold: ann.parse(consts::UNHEALTHY_THRESHOLD_ANN_NAME),
            health_check_interval: ann.parse(consts::HEALTH_CHECK_INTERVAL_ANN_NAME),
            health_check_connect_timeout: ann
                .parse(consts::HEALTH_CHECK_CONNECT_TIMEOUT_ANN_NAME),
            health_check_timeout: ann.parse(consts::HEALTH_CHECK_TIMEOUT_ANN_NAME),
            health_check_domain: ann.get(consts::HEALTH_CHECK_DOMAIN_ANN_NAME),
            health_check_http_code: ann.get(consts::HEALTH_CHECK_HTTP_CODE_ANN_NAME),

            sticky_session: ann.parse(consts::STICKY_SESSION_ANN_NAME),
            sticky_session_type: ann.parse(consts::STICKY_SESSION_TYPE_ANN_NAME),
            cookie: ann.get(consts::COOKIE_ANN_NAME),
            cookie_timeout: ann.parse(consts::COOKIE_TIMEOUT_ANN_NAME),
            persistence_timeout: ann.parse(consts::PERSISTENCE_TIMEOUT_ANN_NAME),

            override_listeners: ann.parse(consts::OVERRIDE_LISTENERS_ANN_NAME),
            load_balancer_id: ann.get(consts::LOAD_BALANCER_ID_ANN_NAME),
            backend_label: ann.get(consts::BACKEND_LABEL_ANN_NAME),
            protocol_port: ann
                .get(consts::PROTOCOL_PORT_ANN_NAME)
                .map(|raw| parse_protocol_port(&raw)),
        }
    }
}

impl From<&RequestedConfig> for DesiredConfig {
    fn from(req: &RequestedConfig) -> Self {
        Self {
            address_type: req.address_type.unwrap_or(AddressType::Internet),
            network_type: req.network_type.unwrap_or(NetworkType::Classic),
            charge_type: req.charge_type.unwrap_or(ChargeType::PayByTraffic),
            bandwidth: req.bandwidth.unwrap_or(consts::DEFAULT_BANDWIDTH),
            master_zone_id: req.master_zone_id.clone(),
            slave_zone_id: req.slave_zone_id.clone(),
            spec: req
                .spec
                .clone()
                .unwrap_or_else(|| consts::DEFAULT_LB_SPEC.to_string()),
            cert_id: req.cert_id.clone(),

            health_check: req.health_check.unwrap_or(Flag::Off),
            health_check_type: req.health_check_type.unwrap_or(HealthCheckType::Tcp),
            health_check_uri: req.health_check_uri.clone().unwrap_or_default(),
            health_check_connect_port: req.health_check_connect_port.unwrap_or_default(),
            healthy_threshold: req
                .healthy_threshold
                .unwrap_or(consts::DEFAULT_HEALTHY_THRESHOLD),
            unhealthy_threshold: req
                .unhealthy_threshold
                .unwrap_or(consts::DEFAULT_UNHEALTHY_THRESHOLD),
            health_check_interval: req
                .health_check_interval
                .unwrap_or(consts::DEFAULT_HEALTH_CHECK_INTERVAL),
            health_check_connect_timeout: req
                .health_check_connect_timeout
                .unwrap_or(consts::DEFAULT_HEALTH_CHECK_CONNECT_TIMEOUT),
            health_check_timeout: req
                .health_check_timeout
                .unwrap_or(consts::DEFAULT_HEALTH_CHECK_TIMEOUT),
            health_check_domain: req.health_check_domain.clone().unwrap_or_default(),
            health_check_http_code: req
                .health_check_http_code
                .clone()
                .unwrap_or_else(|| consts::DEFAULT_HEALTH_CHECK_HTTP_CODE.to_string()),

            sticky_session: req.sticky_session.unwrap_or(Flag::Off),
            sticky_session_type: req
                .sticky_session_type
                .unwrap_or(StickySessionType::Insert),
            cookie: req.cookie.clone().unwrap_or_default(),
            cookie_timeout: req.cookie_timeout.unwrap_or(consts::DEFAULT_COOKIE_TIMEOUT),
            persistence_timeout: req
                .persistence_timeout
                .unwrap_or(consts::DEFAULT_PERSISTENCE_TIMEOUT),

            override_listeners: req.override_listeners.unwrap_or(false),
            load_balancer_id: req.load_balancer_id.clone(),
            backend_label: req.backend_label.clone(),
            protocol_port: req.protocol_port.clone().unwrap_or_default(),
        }
    }
}

/// Resolve service annotations into desired and requested configuration.
/// Never fails, bad values fall back to defaults.
#[must_use]
pub fn resolve(annotations: &BTreeMap<String, String>) -> ResolvedConfig {
    let requested = RequestedConfig::from_annotations(annotations);
    let desired = DesiredConfig::from(&requested);
    ResolvedConfig { desired, requested }
}
