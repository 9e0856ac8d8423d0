use crate::{
    annotations::{DesiredConfig, Flag, HealthCheckType, RequestedConfig, StickySessionType},
    cloud::Protocol,
};

/// Overwrite `field` if the user asked for a value.
fn apply<T: Clone>(field: &mut T, requested: Option<&T>) {
    if let Some(value) = requested {
        field.clone_from(value);
    }
}

/// Protocol specific listener attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerSettings {
    Tcp(TcpSettings),
    Udp(UdpSettings),
    Http(HttpSettings),
    Https(HttpsSettings),
}

impl ListenerSettings {
    /// Settings for a new listener of the given protocol.
    #[must_use]
    pub fn new(protocol: Protocol, config: &DesiredConfig) -> Self {
        match protocol {
            Protocol::Tcp => Self::Tcp(TcpSettings::new(config)),
            Protocol::Udp => Self::Udp(UdpSettings::new(config)),
            Protocol::Http => Self::Http(HttpSettings::new(config)),
            Protocol::Https => Self::Https(HttpsSettings::new(config)),
        }
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Tcp(_) => Protocol::Tcp,
            Self::Udp(_) => Protocol::Udp,
            Self::Http(_) => Protocol::Http,
            Self::Https(_) => Protocol::Https,
        }
    }

    /// Live settings with the requested fields applied on top.
    #[must_use]
    pub fn merge_requested(&self, requested: &RequestedConfig) -> Self {
        match self {
            Self::Tcp(live) => Self::Tcp(live.merge_requested(requested)),
            Self::Udp(live) => Self::Udp(live.merge_requested(requested)),
            Self::Http(live) => Self::Http(live.merge_requested(requested)),
            Self::Https(live) => Self::Https(live.merge_requested(requested)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSettings {
    pub persistence_timeout: i32,
    pub health_check_type: HealthCheckType,
    pub health_check_uri: String,
    pub health_check_domain: String,
    pub health_check_http_code: String,
    pub health_check_connect_port: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
    pub health_check_interval: i32,
    pub health_check_connect_timeout: i32,
}

impl TcpSettings {
    fn new(config: &DesiredConfig) -> Self {
        Self {
            persistence_timeout: config.persistence_timeout,
            health_check_type: config.health_check_type,
            health_check_uri: config.health_check_uri.clone(),
            health_check_domain: config.health_check_domain.clone(),
            health_check_http_code: config.health_check_http_code.clone(),
            health_check_connect_port: config.health_check_connect_port,
            healthy_threshold: config.healthy_threshold,
            unhealthy_threshold: config.unhealthy_threshold,
            health_check_interval: config.health_check_interval,
            health_check_connect_timeout: config.health_check_connect_timeout,
        }
    }

    fn merge_requested(&self, req: &RequestedConfig) -> Self {
        let mut merged = self.clone();
        apply(&mut merged.persistence_timeout, req.persistence_timeout.as_ref());
        apply(&mut merged.health_check_type, req.health_check_type.as_ref());
        apply(&mut merged.health_check_uri, req.health_check_uri.as_ref());
        apply(&mut merged.health_check_domain, req.health_check_domain.as_ref());
        apply(&mut merged.health_check_http_code, req.health_check_http_code.as_ref());
        apply(&mut merged.health_check_connect_port, req.health_check_connect_port.as_ref());
        apply(&mut merged.healthy_threshold, req.healthy_threshold.as_ref());
        apply(&mut merged.unhealthy_threshold, req.unhealthy_threshold.as_ref());
        apply(&mut merged.health_check_interval, req.health_check_interval.as_ref());
        apply(
            &mut merged.health_check_connect_timeout,
            req.health_check_connect_timeout.as_ref(),
        );
        merged
    }
}

/// UDP health checks are connect based only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpSettings {
    pub persistence_timeout: i32,
    pub health_check_connect_port: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
    pub health_check_interval: i32,
    pub health_check_connect_timeout: i32,
}

impl UdpSettings {
    const fn new(config: &DesiredConfig) -> Self {
        Self {
            persistence_timeout: config.persistence_timeout,
            health_check_connect_port: config.health_check_connect_port,
            healthy_threshold: config.healthy_threshold,
            unhealthy_threshold: config.unhealthy_threshold,
            health_check_interval: config.health_check_interval,
            health_check_connect_timeout: config.health_check_connect_timeout,
        }
    }

    fn merge_requested(&self, req: &RequestedConfig) -> Self {
        let mut merged = self.clone();
        apply(&mut merged.persistence_timeout, req.persistence_timeout.as_ref());
        apply(&mut merged.health_check_connect_port, req.health_check_connect_port.as_ref());
        apply(&mut merged.healthy_threshold, req.healthy_threshold.as_ref());
        apply(&mut merged.unhealthy_threshold, req.unhealthy_threshold.as_ref());
        apply(&mut merged.health_check_interval, req.health_check_interval.as_ref());
        apply(
            &mut merged.health_check_connect_timeout,
            req.health_check_connect_timeout.as_ref(),
        );
        merged
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub sticky_session: Flag,
    pub sticky_session_type: StickySessionType,
    pub cookie: String,
    pub cookie_timeout: i32,
    pub health_check: Flag,
    pub health_check_uri: String,
    pub health_check_domain: String,
    pub health_check_http_code: String,
    pub health_check_connect_port: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
    pub health_check_interval: i32,
    pub health_check_timeout: i32,
}

impl HttpSettings {
    fn new(config: &DesiredConfig) -> Self {
        Self {
            sticky_session: config.sticky_session,
            sticky_session_type: config.sticky_session_type,
            cookie: config.cookie.clone(),
            cookie_timeout: config.cookie_timeout,
            health_check: config.health_check,
            health_check_uri: config.health_check_uri.clone(),
            health_check_domain: config.health_check_domain.clone(),
            health_check_http_code: config.health_check_http_code.clone(),
            health_check_connect_port: config.health_check_connect_port,
            healthy_threshold: config.healthy_threshold,
            unhealthy_threshold: config.unhealthy_threshold,
            health_check_interval: config.health_check_interval,
            health_check_timeout: config.health_check_timeout,
        }
    }

    fn merge_requested(&self, req: &RequestedConfig) -> Self {
        let mut merged = self.clone();
        apply(&mut merged.sticky_session, req.sticky_session.as_ref());
        apply(&mut merged.sticky_session_type, req.sticky_session_type.as_ref());
        apply(&mut merged.cookie, req.cookie.as_ref());
        apply(&mut merged.cookie_timeout, req.cookie_timeout.as_ref());
        apply(&mut merged.health_check, req.health_check.as_ref());
        apply(&mut merged.health_check_uri, req.health_check_uri.as_ref());
        apply(&mut merged.health_check_domain, req.health_check_domain.as_ref());
        apply(&mut merged.health_check_http_code, req.health_check_http_code.as_ref());
        apply(&mut merged.health_check_connect_port, req.health_check_connect_port.as_ref());
        apply(&mut merged.healthy_threshold, req.healthy_threshold.as_ref());
        apply(&mut merged.unhealthy_threshold, req.unhealthy_threshold.as_ref());
        apply(&mut merged.health_check_interval, req.health_check_interval.as_ref());
        apply(&mut merged.health_check_timeout, req.health_check_timeout.as_ref());
        merged
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsSettings {
    pub certificate_id: String,
    pub http: HttpSettings,
}

impl HttpsSettings {
    fn new(config: &DesiredConfig) -> Self {
        Self {
            certificate_id: config.cert_id.clone().unwrap_or_default(),
            http: HttpSettings::new(config),
        }
    }

    fn merge_requested(&self, req: &RequestedConfig) -> Self {
        let mut merged = Self {
            certificate_id: self.certificate_id.clone(),
            http: self.http.merge_requested(req),
        };
        apply(&mut merged.certificate_id, req.cert_id.as_ref());
        merged
    }
}
