use std::collections::BTreeMap;

use k8s_openapi::{
    api::networking::v1::{
        NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec,
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{core::ObjectMeta, ResourceExt};

use crate::{
    dogu::{Dogu, DoguDescriptor},
    labels::{managed_labels_extend, selector_labels, DEPENDENCY_LABEL},
    resource::owner::OwnerAttacher,
    Result,
};

/// Dogu name of the ingress controller.
pub const INGRESS_CONTROLLER: &str = "nginx-ingress";
/// Label identifying component pods.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/name";

/// The kinds of network policies generated for a dogu.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyType {
    /// Baseline that denies all ingress into the dogu.
    DenyAll,
    /// Allow the dogu to reach a dogu it depends on.
    DoguDependency(String),
    /// Allow the dogu to reach a component it depends on.
    ComponentDependency(String),
    /// Allow the ingress controller to reach the dogu.
    Ingress,
}

impl PolicyType {
    /// Name of the policy generated for the dogu.
    pub fn policy_name(&self, dogu: &str) -> String {
        match self {
            PolicyType::DenyAll => format!("{dogu}-deny-all"),
            PolicyType::DoguDependency(dep) => format!("{dogu}-dependency-dogu-{dep}"),
            PolicyType::ComponentDependency(dep) => format!("{dogu}-dependency-component-{dep}"),
            PolicyType::Ingress => format!("{dogu}-ingress"),
        }
    }

    fn dependency<'a>(&'a self, dogu: &'a str) -> &'a str {
        match self {
            PolicyType::DenyAll => dogu,
            PolicyType::DoguDependency(dep) | PolicyType::ComponentDependency(dep) => dep,
            PolicyType::Ingress => INGRESS_CONTROLLER,
        }
    }

    /// Pods the policy applies to, and the pods ingress is allowed from.
    fn selectors(
        &self,
        dogu: &str,
    ) -> (BTreeMap<String, String>, Option<BTreeMap<String, String>>) {
        match self {
            PolicyType::DenyAll => (selector_labels(dogu), None),
            PolicyType::DoguDependency(dep) => (selector_labels(dep), Some(selector_labels(dogu))),
            PolicyType::ComponentDependency(dep) => (
                BTreeMap::from([(COMPONENT_LABEL.to_owned(), dep.clone())]),
                Some(selector_labels(dogu)),
            ),
            PolicyType::Ingress => (
                selector_labels(dogu),
                Some(selector_labels(INGRESS_CONTROLLER)),
            ),
        }
    }
}

/// Generate a network policy of the given type for the dogu.
pub fn network_policy(
    dogu: &Dogu,
    policy: &PolicyType,
    owner: &dyn OwnerAttacher,
) -> Result<NetworkPolicy> {
    let name = dogu.simple_name();
    let (pods, allowed) = policy.selectors(&name);
    let mut metadata = ObjectMeta {
        name: Some(policy.policy_name(&name)),
        namespace: dogu.namespace(),
        labels: Some(managed_labels_extend(
            &name,
            Some(BTreeMap::from([(
                DEPENDENCY_LABEL.to_owned(),
                policy.dependency(&name).to_owned(),
            )])),
        )),
        ..Default::default()
    };
    owner.attach(dogu, &mut metadata)?;
    Ok(NetworkPolicy {
        metadata,
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(pods),
                ..Default::default()
            },
            policy_types: Some(vec!["Ingress".to_owned()]),
            ingress: allowed.map(|allowed| {
                vec![NetworkPolicyIngressRule {
                    from: Some(vec![NetworkPolicyPeer {
                        pod_selector: Some(LabelSelector {
                            match_labels: Some(allowed),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Policy types of a dogu: deny all, one per dependency and the ingress policy when the dogu
/// publishes a webapp.
pub fn policy_types(descriptor: &DoguDescriptor, webapp: bool) -> Vec<PolicyType> {
    let mut types = vec![PolicyType::DenyAll];
    types.extend(
        descriptor
            .dogu_dependencies()
            .into_iter()
            .map(PolicyType::DoguDependency),
    );
    types.extend(
        descriptor
            .component_dependencies()
            .into_iter()
            .map(PolicyType::ComponentDependency),
    );
    if webapp {
        types.push(PolicyType::Ingress);
    }
    types
}

/// Generate every network policy of the dogu.
pub fn network_policies(
    dogu: &Dogu,
    descriptor: &DoguDescriptor,
    webapp: bool,
    owner: &dyn OwnerAttacher,
) -> Result<Vec<NetworkPolicy>> {
    policy_types(descriptor, webapp)
        .iter()
        .map(|policy| network_policy(dogu, policy, owner))
        .collect()
}
