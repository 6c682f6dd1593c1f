use k8s_openapi::api::core::v1::{
    Capabilities, PodSecurityContext, SELinuxOptions, SeccompProfile, SecurityContext,
};

use crate::dogu::{edit_capabilities, Capability, Dogu, DoguDescriptor};

const FS_GROUP_CHANGE_POLICY: &str = "OnRootMismatch";

/// Capabilities of the dogu container: the descriptor's effective capabilities edited by the
/// overrides of the dogu resource. Sorted by name.
pub fn capabilities(dogu: &Dogu, descriptor: &DoguDescriptor) -> Vec<String> {
    let overrides = &dogu.spec.security.capabilities;
    let mut names: Vec<String> = edit_capabilities(
        descriptor.effective_capabilities(),
        &overrides.add,
        &overrides.drop,
    )
    .iter()
    .map(Capability::name)
    .collect();
    names.sort();
    names
}

fn run_as_non_root(dogu: &Dogu, descriptor: &DoguDescriptor) -> bool {
    dogu.spec
        .security
        .run_as_non_root
        .unwrap_or(descriptor.security.run_as_non_root)
}

fn read_only_root_file_system(dogu: &Dogu, descriptor: &DoguDescriptor) -> bool {
    dogu.spec
        .security
        .read_only_root_file_system
        .unwrap_or(descriptor.security.read_only_root_file_system)
}

fn se_linux_options(dogu: &Dogu) -> Option<SELinuxOptions> {
    dogu.spec
        .security
        .se_linux_options
        .as_ref()
        .map(|options| SELinuxOptions {
            user: options.user.clone(),
            role: options.role.clone(),
            type_: options.type_.clone(),
            level: options.level.clone(),
        })
}

fn seccomp_profile(dogu: &Dogu) -> Option<SeccompProfile> {
    dogu.spec
        .security
        .seccomp_profile
        .as_ref()
        .map(|profile| SeccompProfile {
            type_: profile.type_.clone(),
            localhost_profile: profile.localhost_profile.clone(),
        })
}

/// Security context of the dogu pod.
///
/// The file system group is taken from the first declared volume, so mounted volumes are
/// accessible by the dogu's group.
pub fn pod_security_context(dogu: &Dogu, descriptor: &DoguDescriptor) -> PodSecurityContext {
    let fs_group = descriptor
        .volumes
        .first()
        .and_then(|volume| volume.group.parse::<i64>().ok());
    PodSecurityContext {
        run_as_non_root: Some(run_as_non_root(dogu, descriptor)),
        se_linux_options: se_linux_options(dogu),
        seccomp_profile: seccomp_profile(dogu),
        fs_group,
        fs_group_change_policy: fs_group.map(|_| FS_GROUP_CHANGE_POLICY.to_owned()),
        ..Default::default()
    }
}

/// Security context of the dogu container.
///
/// Every capability is dropped and only the effective ones are added back. Privileged mode and
/// privilege escalation are never allowed.
pub fn container_security_context(dogu: &Dogu, descriptor: &DoguDescriptor) -> SecurityContext {
    SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(capabilities(dogu, descriptor)),
            drop: Some(vec![Capability::All.name()]),
        }),
        privileged: Some(false),
        allow_privilege_escalation: Some(false),
        run_as_non_root: Some(run_as_non_root(dogu, descriptor)),
        read_only_root_filesystem: Some(read_only_root_file_system(dogu, descriptor)),
        se_linux_options: se_linux_options(dogu),
        seccomp_profile: seccomp_profile(dogu),
        ..Default::default()
    }
}
