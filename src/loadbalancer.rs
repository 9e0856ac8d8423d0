//! Load balancer lookup, creation and attribute reconciliation.

use crate::{
    annotations::{AddressType, ChargeType, DesiredConfig, RequestedConfig, ResolvedConfig},
    cloud::{CreateLoadBalancerRequest, LoadBalancerApi, LoadBalancerQuery, RemoteLoadBalancer, Tag},
    config::ControllerConfig,
    consts,
    error::{SlbError, SlbResult},
    registry::DeletedServices,
};

/// Name of the load balancer created for a service.
#[must_use]
pub fn load_balancer_name(service_uid: &str) -> String {
    let mut name = format!("a{}", service_uid.replace('-', ""));
    name.truncate(consts::LB_NAME_MAX_LEN);
    name
}

/// Tag that marks a load balancer as created for the service.
#[must_use]
pub fn ownership_tag(lb_name: &str) -> Tag {
    Tag::new(consts::LB_TAG_KEY, lb_name)
}

pub struct LoadBalancerReconciler<'a> {
    api: &'a dyn LoadBalancerApi,
    registry: &'a DeletedServices,
    config: &'a ControllerConfig,
}

impl<'a> LoadBalancerReconciler<'a> {
    #[must_use]
    pub const fn new(
        api: &'a dyn LoadBalancerApi,
        registry: &'a DeletedServices,
        config: &'a ControllerConfig,
    ) -> Self {
        Self {
            api,
            registry,
            config,
        }
    }

    async fn find_one(&self, query: &LoadBalancerQuery) -> SlbResult<Option<RemoteLoadBalancer>> {
        let mut found = self.api.describe_load_balancers(query).await?;
        if found.len() > 1 {
            let ids = found.iter().map(|lb| lb.id.as_str()).collect::<Vec<_>>();
            return Err(SlbError::AmbiguousLoadBalancer(format!(
                "{query:?}: {}",
                ids.join(", ")
            )));
        }
        match found.pop() {
            Some(lb) => Ok(Some(self.api.describe_load_balancer_attribute(&lb.id).await?)),
            None => Ok(None),
        }
    }

    /// Find the load balancer of a service without creating it.
    ///
    /// A load balancer given by id must exist. Otherwise it's looked up
    /// by the ownership tag and then by name, for load balancers created
    /// before tagging.
    pub async fn find(
        &self,
        service_uid: &str,
        desired: &DesiredConfig,
    ) -> SlbResult<Option<RemoteLoadBalancer>> {
        if let Some(lb_id) = &desired.load_balancer_id {
            return match self.find_one(&LoadBalancerQuery::by_id(lb_id)).await? {
                Some(lb) => Ok(Some(lb)),
                None => Err(SlbError::LoadBalancerNotFound(lb_id.clone())),
            };
        }
        let name = load_balancer_name(service_uid);
        if let Some(lb) = self
            .find_one(&LoadBalancerQuery::by_tag(ownership_tag(&name)))
            .await?
        {
            return Ok(Some(lb));
        }
        self.find_one(&LoadBalancerQuery::by_name(name)).await
    }

    /// Find or create the load balancer and bring its attributes in
    /// line. Returns the attributes as read back from the provider.
    pub async fn ensure(
        &self,
        service_uid: &str,
        config: &ResolvedConfig,
    ) -> SlbResult<RemoteLoadBalancer> {
        let found = self.find(service_uid, &config.desired).await?;
        self.ensure_found(service_uid, config, found).await
    }

    /// Same as [`Self::ensure`] with the result of [`Self::find`] already
    /// at hand, so callers can validate the live load balancer before
    /// anything is changed.
    #[tracing::instrument(skip(self, config, found))]
    pub async fn ensure_found(
        &self,
        service_uid: &str,
        config: &ResolvedConfig,
        found: Option<RemoteLoadBalancer>,
    ) -> SlbResult<RemoteLoadBalancer> {
        let lb_id = match found {
            None => self.create(service_uid, &config.desired).await?,
            Some(lb) => {
                tracing::debug!("Found load balancer {}", lb.id);
                check_immutable(&lb, &config.requested)?;
                self.update_attributes(&lb, &config.requested).await?;
                if config.desired.load_balancer_id.is_none() {
                    self.ensure_tag(&lb.id, &load_balancer_name(service_uid))
                        .await?;
                }
                lb.id
            }
        };
        Ok(self.api.describe_load_balancer_attribute(&lb_id).await?)
    }

    async fn create(&self, service_uid: &str, desired: &DesiredConfig) -> SlbResult<String> {
        self.registry.assert_not_deleted(service_uid)?;
        let name = load_balancer_name(service_uid);
        let request = CreateLoadBalancerRequest {
            name: name.clone(),
            region_id: self.config.region_id.clone(),
            address_type: desired.address_type.to_string(),
            network_type: desired.network_type.to_string(),
            charge_type: desired.charge_type.to_string(),
            bandwidth: desired.bandwidth,
            spec: desired.spec.clone(),
            master_zone_id: desired.master_zone_id.clone(),
            slave_zone_id: desired.slave_zone_id.clone(),
            vswitch_id: (desired.address_type == AddressType::Intranet)
                .then(|| self.config.vswitch_id.clone())
                .flatten(),
        };
        tracing::info!("Creating load balancer {}", name);
        let lb_id = self.api.create_load_balancer(&request).await?;
        self.api.add_tags(&lb_id, &[ownership_tag(&name)]).await?;
        Ok(lb_id)
    }

    async fn ensure_tag(&self, lb_id: &str, name: &str) -> SlbResult<()> {
        let tag = ownership_tag(name);
        if !self.api.describe_tags(lb_id).await?.contains(&tag) {
            tracing::info!("Tagging load balancer {}", lb_id);
            self.api.add_tags(lb_id, &[tag]).await?;
        }
        Ok(())
    }

    /// Apply requested changes of mutable attributes.
    async fn update_attributes(
        &self,
        lb: &RemoteLoadBalancer,
        requested: &RequestedConfig,
    ) -> SlbResult<()> {
        let charge_changed = requested
            .charge_type
            .is_some_and(|charge| !charge.as_str().eq_ignore_ascii_case(&lb.charge_type));
        let charge_type = requested
            .charge_type
            .map_or_else(|| lb.charge_type.clone(), |charge| charge.to_string());
        // Bandwidth only applies to bandwidth billing.
        let bandwidth_changed = charge_type.eq_ignore_ascii_case(ChargeType::PayByBandwidth.as_str())
            && requested
                .bandwidth
                .is_some_and(|bandwidth| bandwidth != lb.bandwidth);
        if charge_changed || bandwidth_changed {
            let bandwidth = requested.bandwidth.unwrap_or(lb.bandwidth);
            tracing::info!(
                "Changing internet spec of {}: {} {} -> {} {}",
                lb.id,
                lb.charge_type,
                lb.bandwidth,
                charge_type,
                bandwidth
            );
            self.api
                .modify_internet_spec(&lb.id, &charge_type, bandwidth)
                .await?;
        }

        if let Some(spec) = requested.spec.as_deref() {
            if !spec.eq_ignore_ascii_case(&lb.spec) {
                tracing::info!("Changing spec of {} from {} to {}", lb.id, lb.spec, spec);
                self.api.modify_instance_spec(&lb.id, spec).await?;
            }
        }
        Ok(())
    }
}

fn check_immutable(lb: &RemoteLoadBalancer, requested: &RequestedConfig) -> SlbResult<()> {
    let immutable = |attribute: &'static str, current: &str, wanted: Option<&str>| {
        match wanted {
            Some(wanted) if !wanted.eq_ignore_ascii_case(current) => {
                Err(SlbError::ImmutableAttribute {
                    lb_id: lb.id.clone(),
                    attribute,
                    current: current.to_string(),
                    requested: wanted.to_string(),
                })
            }
            _ => Ok(()),
        }
    };
    immutable(
        "address type",
        &lb.address_type,
        requested.address_type.map(AddressType::as_str),
    )?;
    immutable(
        "master zone",
        &lb.master_zone_id,
        requested.master_zone_id.as_deref(),
    )?;
    immutable(
        "slave zone",
        &lb.slave_zone_id,
        requested.slave_zone_id.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{annotations, cloud::fake::FakeCloud, config::test_config};

    const UID: &str = "5f1c9a3e-0b7d-4c55-9a1e-2f8d1c0b6a77";

    fn resolved(pairs: &[(&str, &str)]) -> ResolvedConfig {
        let raw = pairs
            .iter()
            .map(|(k, v)| (format!("{}{k}", consts::ANNOTATION_PREFIX), (*v).to_string()))
            .collect::<BTreeMap<_, _>>();
        annotations::resolve(&raw)
    }

    fn existing(cloud: &FakeCloud, id: &str, name: &str, tagged: bool) {
        let tags = if tagged {
            vec![ownership_tag(name)]
        } else {
            Vec::new()
        };
        cloud.add_load_balancer(
            RemoteLoadBalancer {
                id: id.to_string(),
                name: name.to_string(),
                address_type: "internet".to_string(),
                charge_type: "paybytraffic".to_string(),
                bandwidth: 50,
                spec: "slb.s1.small".to_string(),
                master_zone_id: "zone-a".to_string(),
                slave_zone_id: "zone-b".to_string(),
                ..Default::default()
            },
            tags,
        );
    }

    #[test]
    fn name_is_derived_from_uid() {
        let name = load_balancer_name(UID);
        assert_eq!(name, "a5f1c9a3e0b7d4c559a1e2f8d1c0b6a7");
        assert_eq!(name.len(), 32);
        assert_eq!(load_balancer_name("abc"), "aabc");
    }

    #[tokio::test]
    async fn creates_tags_and_rereads() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        let lb = LoadBalancerReconciler::new(&cloud, &registry, &config)
            .ensure(UID, &resolved(&[]))
            .await
            .unwrap();

        let name = load_balancer_name(UID);
        assert_eq!(lb.name, name);
        assert_eq!(lb.spec, "slb.s1.small");
        assert_eq!(
            cloud.mutations(),
            [
                format!("create_load_balancer {name}"),
                format!("add_tags {} kubernetes.do.not.delete={name}", lb.id),
            ]
        );
        assert_eq!(
            cloud.calls().last().map(String::as_str),
            Some(format!("describe_load_balancer_attribute {}", lb.id).as_str())
        );
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        let reconciler = LoadBalancerReconciler::new(&cloud, &registry, &config);
        let resolved = resolved(&[("charge-type", "paybybandwidth"), ("bandwidth", "20")]);
        let first = reconciler.ensure(UID, &resolved).await.unwrap();

        cloud.clear_calls();
        let second = reconciler.ensure(UID, &resolved).await.unwrap();
        assert_eq!(first, second);
        assert!(cloud.mutations().is_empty());
        assert_eq!(cloud.load_balancer_ids().len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_name_and_tags_the_load_balancer() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        let name = load_balancer_name(UID);
        existing(&cloud, "lb-old", &name, false);

        let lb = LoadBalancerReconciler::new(&cloud, &registry, &config)
            .ensure(UID, &resolved(&[]))
            .await
            .unwrap();
        assert_eq!(lb.id, "lb-old");
        assert_eq!(
            cloud.mutations(),
            [format!("add_tags lb-old kubernetes.do.not.delete={name}")]
        );
    }

    #[tokio::test]
    async fn missing_explicit_id_is_an_error() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        let result = LoadBalancerReconciler::new(&cloud, &registry, &config)
            .ensure(UID, &resolved(&[("id", "lb-missing")]))
            .await;
        assert!(matches!(result, Err(SlbError::LoadBalancerNotFound(id)) if id == "lb-missing"));
        assert!(cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn user_supplied_load_balancer_is_not_tagged() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        existing(&cloud, "lb-user", "shared", false);

        let lb = LoadBalancerReconciler::new(&cloud, &registry, &config)
            .ensure(UID, &resolved(&[("id", "lb-user")]))
            .await
            .unwrap();
        assert_eq!(lb.id, "lb-user");
        assert!(cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn immutable_attributes_are_refused() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        existing(&cloud, "lb-1", &load_balancer_name(UID), true);
        let reconciler = LoadBalancerReconciler::new(&cloud, &registry, &config);

        for pairs in [
            [("address-type", "intranet")],
            [("master-zoneid", "zone-c")],
            [("slave-zoneid", "zone-c")],
        ] {
            let result = reconciler.ensure(UID, &resolved(&pairs)).await;
            assert!(
                matches!(result, Err(SlbError::ImmutableAttribute { .. })),
                "{pairs:?}"
            );
        }
        assert!(cloud.mutations().is_empty());

        // Same values in a different case are not a change.
        reconciler
            .ensure(UID, &resolved(&[("address-type", "Internet")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn only_requested_attributes_are_modified() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        existing(&cloud, "lb-1", &load_balancer_name(UID), true);
        let reconciler = LoadBalancerReconciler::new(&cloud, &registry, &config);

        // Defaults differ from nothing, nothing is touched.
        reconciler.ensure(UID, &resolved(&[])).await.unwrap();
        // Bandwidth alone means nothing under traffic billing.
        reconciler
            .ensure(UID, &resolved(&[("bandwidth", "80")]))
            .await
            .unwrap();
        assert!(cloud.mutations().is_empty());

        reconciler
            .ensure(
                UID,
                &resolved(&[
                    ("charge-type", "paybybandwidth"),
                    ("bandwidth", "80"),
                    ("spec", "slb.s2.medium"),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(
            cloud.mutations(),
            [
                "modify_internet_spec lb-1 paybybandwidth 80",
                "modify_instance_spec lb-1 slb.s2.medium",
            ]
        );
    }

    #[tokio::test]
    async fn duplicates_are_ambiguous() {
        let cloud = FakeCloud::new();
        let registry = DeletedServices::new();
        let config = test_config();
        let name = load_balancer_name(UID);
        existing(&cloud, "lb-1", &name, true);
        existing(&cloud, "lb-2", &name, true);
        let result = LoadBalancerReconciler::new(&cloud, &registry, &config)
            .find(UID, &resolved(&[]).desired)
            .await;
        assert!(matches!(result, Err(SlbError::AmbiguousLoadBalancer(_))));
    }

    #[tokio::test]
    async fn create_for_deleted_service_terminates() {
        let cloud = FakeCloud::new();
        let terminated = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let registry = {
            let terminated = terminated.clone();
            DeletedServices::with_terminate(move |_| {
                terminated.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };
        let config = test_config();
        registry.mark(UID);
        let result = LoadBalancerReconciler::new(&cloud, &registry, &config)
            .ensure(UID, &resolved(&[]))
            .await;
        assert!(matches!(result, Err(SlbError::ServiceDeleted(_))));
        assert!(terminated.load(std::sync::atomic::Ordering::SeqCst));
        assert!(cloud.mutations().is_empty());
    }
}
