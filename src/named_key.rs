use std::{fmt, str::FromStr};

use crate::{
    consts,
    error::{SlbError, SlbResult},
};

/// Identity of a listener or a vserver group.
///
/// Remote listeners and groups have no metadata except a free-text
/// description, so the key is serialized into it as
/// `k8s/<port>/<service>/<namespace>/<cluster>` and parsed back on
/// every reconcile to find out who owns the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedKey {
    pub prefix: String,
    pub port: i32,
    pub service_name: String,
    pub namespace: String,
    pub cluster_id: String,
}

impl NamedKey {
    #[must_use]
    pub fn new(port: i32, service_name: &str, namespace: &str, cluster_id: &str) -> Self {
        Self {
            prefix: consts::NAMED_KEY_PREFIX.to_string(),
            port,
            service_name: service_name.to_string(),
            namespace: namespace.to_string(),
            cluster_id: cluster_id.to_string(),
        }
    }

    /// Both keys belong to the same service of the same cluster.
    #[must_use]
    pub fn same_owner(&self, other: &Self) -> bool {
        self.service_name == other.service_name
            && self.namespace == other.namespace
            && self.cluster_id == other.cluster_id
    }

    /// Same owner, different port.
    #[must_use]
    pub fn with_port(&self, port: i32) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for NamedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.prefix, self.port, self.service_name, self.namespace, self.cluster_id
        )
    }
}

impl FromStr for NamedKey {
    type Err = SlbError;

    fn from_str(s: &str) -> SlbResult<Self> {
        let invalid = || SlbError::InvalidNamedKey(s.to_string());
        let parts = s.split('/').collect::<Vec<_>>();
        let [prefix, port, service_name, namespace, cluster_id] = *parts.as_slice() else {
            return Err(invalid());
        };
        if prefix != consts::NAMED_KEY_PREFIX {
            return Err(invalid());
        }
        let port = port.parse::<i32>().map_err(|_| invalid())?;
        Ok(Self {
            prefix: prefix.to_string(),
            port,
            service_name: service_name.to_string(),
            namespace: namespace.to_string(),
            cluster_id: cluster_id.to_string(),
        })
    }
}
