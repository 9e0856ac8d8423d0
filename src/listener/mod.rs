//! Listener reconciliation.
//!
//! Listeners are diffed per port. Ownership of a remote listener is read
//! back from its description, see [`NamedKey`].

use std::collections::{BTreeSet, HashMap};

use crate::{
    annotations::ResolvedConfig,
    cloud::{Listener, ListenerStatus, LoadBalancerApi, Protocol, RemoteLoadBalancer},
    error::{SlbError, SlbResult},
    named_key::NamedKey,
};

pub mod protocol;

pub use protocol::ListenerSettings;

/// Exposed port of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub port: i32,
    pub node_port: i32,
    /// Protocol as written in the service, `TCP` or `UDP`.
    pub protocol: String,
}

/// Listener the service wants to have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalListener {
    pub port: i32,
    pub node_port: i32,
    pub protocol: Protocol,
    pub named_key: NamedKey,
}

/// Listener that exists on the load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteListener {
    pub port: i32,
    pub protocol: Protocol,
    pub description: String,
    /// `None` if the description is not a named key.
    pub named_key: Option<NamedKey>,
}

/// Who a remote listener belongs to, as seen by one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    Mine,
    /// Anonymous or created before named keys existed.
    Legacy,
    Foreign(NamedKey),
}

impl RemoteListener {
    #[must_use]
    pub fn ownership(&self, service_key: &NamedKey) -> Ownership {
        match &self.named_key {
            None => Ownership::Legacy,
            Some(key) if key.same_owner(service_key) => Ownership::Mine,
            Some(key) => Ownership::Foreign(key.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListenerAction {
    Delete,
    Add,
    Update,
}

/// One step of a listener reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOp {
    pub port: i32,
    pub node_port: i32,
    pub protocol: Protocol,
    pub named_key: NamedKey,
    pub action: ListenerAction,
}

/// Listeners for the ports of a service.
///
/// The `protocol-port` annotation overrides the protocol of a port.
/// Ports with a protocol the load balancer can't serve are skipped.
/// A load balancer port holds one listener, so only the first service
/// port using it is kept.
#[must_use]
pub fn local_listeners(
    ports: &[ServicePort],
    service_key: &NamedKey,
    protocol_port: &HashMap<i32, Protocol>,
) -> Vec<LocalListener> {
    let mut seen = BTreeSet::new();
    ports
        .iter()
        .filter_map(|port| {
            let protocol = match protocol_port.get(&port.port) {
                Some(protocol) => *protocol,
                None => match port.protocol.parse::<Protocol>() {
                    Ok(protocol) => protocol,
                    Err(err) => {
                        tracing::warn!("Skipping port {}: {}", port.port, err);
                        return None;
                    }
                },
            };
            if !seen.insert(port.port) {
                tracing::warn!(
                    "Port {} is used more than once, skipping its {} entry",
                    port.port,
                    port.protocol
                );
                return None;
            }
            Some(LocalListener {
                port: port.port,
                node_port: port.node_port,
                protocol,
                named_key: service_key.with_port(port.port),
            })
        })
        .collect()
}

/// Listeners of a load balancer with their owners parsed out of
/// the descriptions.
#[must_use]
pub fn remote_listeners(lb: &RemoteLoadBalancer) -> Vec<RemoteListener> {
    lb.listeners
        .iter()
        .filter_map(|summary| {
            let protocol = match summary.protocol.parse::<Protocol>() {
                Ok(protocol) => protocol,
                Err(err) => {
                    tracing::warn!(
                        "Listener {} of load balancer {} is ignored: {}",
                        summary.port,
                        lb.id,
                        err
                    );
                    return None;
                }
            };
            Some(RemoteListener {
                port: summary.port,
                protocol,
                description: summary.description.clone(),
                named_key: summary.description.parse::<NamedKey>().ok(),
            })
        })
        .collect()
}

/// Options that change how a plan is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Take over ports owned by other services.
    pub override_listeners: bool,
    /// The load balancer was given by the user. Anonymous listeners on
    /// it are not ours to remove.
    pub user_supplied: bool,
}

/// Compute listener operations, ordered deletes first, then adds,
/// then updates.
///
/// Fails without any operation if a port is taken by another
/// service and overriding is not allowed.
pub fn plan(
    lb_id: &str,
    local: &[LocalListener],
    remote: &[RemoteListener],
    service_key: &NamedKey,
    options: PlanOptions,
) -> SlbResult<Vec<ListenerOp>> {
    let mut ops = Vec::new();
    let delete = |remote: &RemoteListener, node_port: i32| ListenerOp {
        port: remote.port,
        node_port,
        protocol: remote.protocol,
        named_key: remote
            .named_key
            .clone()
            .unwrap_or_else(|| service_key.with_port(remote.port)),
        action: ListenerAction::Delete,
    };
    let op = |local: &LocalListener, action| ListenerOp {
        port: local.port,
        node_port: local.node_port,
        protocol: local.protocol,
        named_key: local.named_key.clone(),
        action,
    };

    for wanted in local {
        let Some(live) = remote.iter().find(|r| r.port == wanted.port) else {
            ops.push(op(wanted, ListenerAction::Add));
            continue;
        };
        match live.ownership(service_key) {
            Ownership::Foreign(owner) if !options.override_listeners => {
                return Err(SlbError::ListenerConflict {
                    lb_id: lb_id.to_string(),
                    port: wanted.port,
                    owner: owner.to_string(),
                });
            }
            Ownership::Foreign(owner) => {
                tracing::warn!("Overriding listener {} owned by {}", wanted.port, owner);
                ops.push(delete(live, wanted.node_port));
                ops.push(op(wanted, ListenerAction::Add));
            }
            Ownership::Mine | Ownership::Legacy => {
                if live.protocol == wanted.protocol {
                    ops.push(op(wanted, ListenerAction::Update));
                } else {
                    ops.push(delete(live, wanted.node_port));
                    ops.push(op(wanted, ListenerAction::Add));
                }
            }
        }
    }

    let wanted_ports = local.iter().map(|l| l.port).collect::<BTreeSet<_>>();
    for live in remote.iter().filter(|r| !wanted_ports.contains(&r.port)) {
        let stale = match live.ownership(service_key) {
            Ownership::Mine => true,
            Ownership::Legacy => !options.user_supplied,
            Ownership::Foreign(_) => false,
        };
        if stale {
            ops.push(delete(live, 0));
        }
    }

    ops.sort_by_key(|op| op.action);
    Ok(ops)
}

/// Applies listener operations to one load balancer.
pub struct ListenerReconciler<'a> {
    api: &'a dyn LoadBalancerApi,
    lb_id: &'a str,
    config: &'a ResolvedConfig,
    /// Node port to vserver group id. Empty in flat mode.
    groups: &'a HashMap<i32, String>,
}

impl<'a> ListenerReconciler<'a> {
    #[must_use]
    pub const fn new(
        api: &'a dyn LoadBalancerApi,
        lb_id: &'a str,
        config: &'a ResolvedConfig,
        groups: &'a HashMap<i32, String>,
    ) -> Self {
        Self {
            api,
            lb_id,
            config,
            groups,
        }
    }

    /// Plan and apply. Stops at the first failing operation.
    #[tracing::instrument(skip_all, fields(lb_id = self.lb_id))]
    pub async fn reconcile(
        &self,
        lb: &RemoteLoadBalancer,
        local: &[LocalListener],
        service_key: &NamedKey,
        user_supplied: bool,
    ) -> SlbResult<()> {
        let options = PlanOptions {
            override_listeners: self.config.desired.override_listeners,
            user_supplied,
        };
        let ops = plan(self.lb_id, local, &remote_listeners(lb), service_key, options)?;
        self.apply(&ops).await
    }

    pub async fn apply(&self, ops: &[ListenerOp]) -> SlbResult<()> {
        for op in ops {
            match op.action {
                ListenerAction::Delete => self.delete(op.port, op.protocol).await?,
                ListenerAction::Add => self.add(op).await?,
                ListenerAction::Update => self.update(op).await?,
            }
        }
        Ok(())
    }

    fn new_listener(&self, op: &ListenerOp) -> Listener {
        Listener {
            port: op.port,
            backend_port: op.node_port,
            description: op.named_key.to_string(),
            status: ListenerStatus::Stopped,
            vserver_group_id: self.groups.get(&op.node_port).cloned(),
            settings: ListenerSettings::new(op.protocol, &self.config.desired),
        }
    }

    async fn add(&self, op: &ListenerOp) -> SlbResult<()> {
        if op.protocol == Protocol::Https && self.config.desired.cert_id.is_none() {
            tracing::warn!(
                "HTTPS listener {} needs the cert-id annotation. Skipping...",
                op.port
            );
            return Ok(());
        }
        let listener = self.new_listener(op);
        tracing::info!(
            "Creating {} listener {} -> {}",
            op.protocol,
            op.port,
            op.node_port
        );
        self.api.create_listener(self.lb_id, &listener).await?;
        self.api.start_listener(self.lb_id, op.port).await?;
        Ok(())
    }

    async fn stop(&self, port: i32) -> SlbResult<()> {
        match self.api.stop_listener(self.lb_id, port).await {
            Err(err) if err.is_already_stopped() => Ok(()),
            result => Ok(result?),
        }
    }

    async fn delete(&self, port: i32, protocol: Protocol) -> SlbResult<()> {
        tracing::info!("Deleting {} listener {}", protocol, port);
        self.stop(port).await?;
        self.api.delete_listener(self.lb_id, port, protocol).await?;
        Ok(())
    }

    async fn update(&self, op: &ListenerOp) -> SlbResult<()> {
        let live = self
            .api
            .describe_listener(self.lb_id, op.port, op.protocol)
            .await?;

        if live.backend_port != op.node_port {
            // The backend port of a listener can't be modified.
            tracing::info!(
                "Backend port of listener {} changed from {} to {}, recreating",
                op.port,
                live.backend_port,
                op.node_port
            );
            self.delete(op.port, op.protocol).await?;
            let mut recreated = self.new_listener(op);
            recreated.settings = live.settings.merge_requested(&self.config.requested);
            self.api.create_listener(self.lb_id, &recreated).await?;
            self.api.start_listener(self.lb_id, op.port).await?;
            return Ok(());
        }

        let merged = Listener {
            description: op.named_key.to_string(),
            vserver_group_id: self
                .groups
                .get(&op.node_port)
                .cloned()
                .or_else(|| live.vserver_group_id.clone()),
            settings: live.settings.merge_requested(&self.config.requested),
            ..live.clone()
        };
        if merged != live {
            tracing::info!("Updating {} listener {}", op.protocol, op.port);
            self.api.modify_listener(self.lb_id, &merged).await?;
        }
        if live.status != ListenerStatus::Running {
            self.api.start_listener(self.lb_id, op.port).await?;
        }
        Ok(())
    }
}
