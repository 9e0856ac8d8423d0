//! Entry points for reconciling the load balancer of one service.
//!
//! Called by the watch layer for every change of a `LoadBalancer`
//! service and, for backends only, for changes of cluster nodes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node, Service};
use kube::ResourceExt;

use crate::{
    annotations::{self, ResolvedConfig},
    backend,
    cloud::RemoteLoadBalancer,
    config::BackendMode,
    error::{SlbError, SlbResult},
    listener::{self, ListenerReconciler, LocalListener, PlanOptions, ServicePort},
    loadbalancer::{load_balancer_name, LoadBalancerReconciler},
    named_key::NamedKey,
    node, Context,
};

/// The parts of a service the reconcilers look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub annotations: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

impl TryFrom<&Service> for ServiceRef {
    type Error = SlbError;

    fn try_from(svc: &Service) -> SlbResult<Self> {
        let name = svc
            .metadata
            .name
            .clone()
            .ok_or(SlbError::MissingServiceField("name"))?;
        let uid = svc.uid().ok_or(SlbError::MissingServiceField("uid"))?;
        let namespace = svc.namespace().unwrap_or_else(|| "default".to_string());

        let mut ports = Vec::new();
        for port in svc
            .spec
            .clone()
            .unwrap_or_default()
            .ports
            .unwrap_or_default()
        {
            let Some(node_port) = port.node_port else {
                tracing::warn!("Node port is not set for port {}. Skipping...", port.port);
                continue;
            };
            ports.push(ServicePort {
                port: port.port,
                node_port,
                protocol: port.protocol.unwrap_or_else(|| "TCP".to_string()),
            });
        }

        Ok(Self {
            namespace,
            name,
            uid,
            annotations: svc.annotations().clone(),
            ports,
        })
    }
}

impl ServiceRef {
    /// Key of the service, the port is filled in per listener or group.
    #[must_use]
    pub fn named_key(&self, cluster_id: &str) -> NamedKey {
        NamedKey::new(0, &self.name, &self.namespace, cluster_id)
    }

    fn local_listeners(&self, cluster_id: &str, config: &ResolvedConfig) -> Vec<LocalListener> {
        listener::local_listeners(
            &self.ports,
            &self.named_key(cluster_id),
            &config.desired.protocol_port,
        )
    }
}

fn node_ports(local: &[LocalListener]) -> BTreeSet<i32> {
    local.iter().map(|l| l.node_port).collect()
}

/// Ingress status for the service.
#[must_use]
pub fn load_balancer_status(lb: &RemoteLoadBalancer) -> LoadBalancerStatus {
    let ingress = (!lb.address.is_empty()).then(|| {
        vec![LoadBalancerIngress {
            ip: Some(lb.address.clone()),
            ip_mode: Some("VIP".to_string()),
            ..Default::default()
        }]
    });
    LoadBalancerStatus { ingress }
}

/// Create or update the load balancer of a service.
///
/// Order: the load balancer itself, then backend groups, listeners and
/// finally groups of removed ports. In flat mode backends are synced
/// after listeners. Returns the load balancer as read back at the end.
#[tracing::instrument(skip_all, fields(service = svc.name_any()))]
pub async fn ensure_load_balancer(
    ctx: &Context,
    svc: &Service,
    nodes: &[Node],
) -> SlbResult<RemoteLoadBalancer> {
    let service = ServiceRef::try_from(svc)?;
    let resolved = annotations::resolve(&service.annotations);
    let api = ctx.lb_api.as_ref();

    let service_key = service.named_key(&ctx.config.cluster_id);
    let local = service.local_listeners(&ctx.config.cluster_id, &resolved);
    let options = PlanOptions {
        override_listeners: resolved.desired.override_listeners,
        user_supplied: resolved.desired.load_balancer_id.is_some(),
    };
    let plan_for = |lb: &RemoteLoadBalancer| {
        listener::plan(
            &lb.id,
            &local,
            &listener::remote_listeners(lb),
            &service_key,
            options,
        )
    };

    let reconciler = LoadBalancerReconciler::new(api, &ctx.deleted_services, &ctx.config);
    let found = reconciler.find(&service.uid, &resolved.desired).await?;
    // Conflicts must surface before anything is touched.
    if let Some(lb) = &found {
        plan_for(lb)?;
    }
    let lb = reconciler
        .ensure_found(&service.uid, &resolved, found)
        .await?;
    let ops = plan_for(&lb)?;
    let backends = node::backend_servers(nodes, resolved.desired.backend_label.as_deref());

    match ctx.config.backend_mode {
        BackendMode::Grouped => {
            let ports = node_ports(&local);
            let groups =
                backend::sync_groups(api, &lb.id, &service_key, &ports, &backends).await?;
            ListenerReconciler::new(api, &lb.id, &resolved, &groups)
                .apply(&ops)
                .await?;
            backend::delete_orphan_groups(api, &lb.id, &service_key, &ports).await?;
        }
        BackendMode::Flat => {
            let groups = HashMap::new();
            ListenerReconciler::new(api, &lb.id, &resolved, &groups)
                .apply(&ops)
                .await?;
            backend::sync_flat(api, &lb.id, &lb.backend_servers, &backends).await?;
        }
    }

    tracing::info!("Load balancer {} of service {} is in sync", lb.id, service.name);
    Ok(api.describe_load_balancer_attribute(&lb.id).await?)
}

/// Sync backends after node changes. Listeners are left alone and a
/// missing load balancer is an error.
#[tracing::instrument(skip_all, fields(service = svc.name_any()))]
pub async fn update_load_balancer(ctx: &Context, svc: &Service, nodes: &[Node]) -> SlbResult<()> {
    let service = ServiceRef::try_from(svc)?;
    let resolved = annotations::resolve(&service.annotations);
    let api = ctx.lb_api.as_ref();

    let lb = LoadBalancerReconciler::new(api, &ctx.deleted_services, &ctx.config)
        .find(&service.uid, &resolved.desired)
        .await?
        .ok_or_else(|| SlbError::LoadBalancerNotFound(load_balancer_name(&service.uid)))?;
    let backends = node::backend_servers(nodes, resolved.desired.backend_label.as_deref());

    match ctx.config.backend_mode {
        BackendMode::Grouped => {
            let service_key = service.named_key(&ctx.config.cluster_id);
            let ports = node_ports(&service.local_listeners(&ctx.config.cluster_id, &resolved));
            backend::sync_groups(api, &lb.id, &service_key, &ports, &backends).await?;
        }
        BackendMode::Flat => {
            backend::sync_flat(api, &lb.id, &lb.backend_servers, &backends).await?;
        }
    }
    Ok(())
}

/// Remove what the service owns.
///
/// The service is marked deleted before anything else, so a late create
/// for it trips the registry. A load balancer given by id only loses the
/// listeners and groups of this service, any other one is deleted.
#[tracing::instrument(skip_all, fields(service = svc.name_any()))]
pub async fn ensure_load_balancer_deleted(ctx: &Context, svc: &Service) -> SlbResult<()> {
    let service = ServiceRef::try_from(svc)?;
    ctx.deleted_services.mark(&service.uid);
    let resolved = annotations::resolve(&service.annotations);
    let api = ctx.lb_api.as_ref();

    let Some(lb) = LoadBalancerReconciler::new(api, &ctx.deleted_services, &ctx.config)
        .find(&service.uid, &resolved.desired)
        .await?
    else {
        tracing::info!("Load balancer is already gone");
        return Ok(());
    };

    if resolved.desired.load_balancer_id.is_none() {
        tracing::info!("Deleting load balancer {}", lb.id);
        return match api.delete_load_balancer(&lb.id).await {
            Err(err) if err.is_not_found() => {
                tracing::info!("Load balancer {} is already gone", lb.id);
                Ok(())
            }
            result => Ok(result?),
        };
    }

    tracing::info!(
        "Load balancer {} was given by the user, removing only listeners of the service",
        lb.id
    );
    let service_key = service.named_key(&ctx.config.cluster_id);
    let ops = listener::plan(
        &lb.id,
        &[],
        &listener::remote_listeners(&lb),
        &service_key,
        PlanOptions {
            override_listeners: false,
            user_supplied: true,
        },
    )?;
    let groups = HashMap::new();
    ListenerReconciler::new(api, &lb.id, &resolved, &groups)
        .apply(&ops)
        .await?;
    backend::delete_orphan_groups(api, &lb.id, &service_key, &BTreeSet::new()).await
}

/// The load balancer of a service, if it exists.
pub async fn get_load_balancer(
    ctx: &Context,
    svc: &Service,
) -> SlbResult<Option<RemoteLoadBalancer>> {
    let service = ServiceRef::try_from(svc)?;
    let resolved = annotations::resolve(&service.annotations);
    LoadBalancerReconciler::new(ctx.lb_api.as_ref(), &ctx.deleted_services, &ctx.config)
        .find(&service.uid, &resolved.desired)
        .await
}
