//! Host configuration of created containers

use dockhand_client::types::{DeviceMapping, DeviceRequest, HostConfig, LogConfig, RestartPolicy};
use dockhand_core::allowlist::glob_match;
use dockhand_core::config::{DockerSettings, validate_isolation};

use crate::error::Result;

/// Per-container inputs of a build or predefined container
#[derive(Debug, Clone, Default)]
pub struct HostConfigOptions {
    pub network_mode: String,
    pub binds: Vec<String>,
    /// Service links in `id:alias` form
    pub links: Vec<String>,
    pub devices: Vec<DeviceMapping>,
    pub device_requests: Vec<DeviceRequest>,
    /// Whether the image may run privileged
    pub image_privileged: bool,
}

/// Whether an image matches the privileged allowlist; empty allows all
pub fn is_privileged_allowed(image: &str, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|pattern| glob_match(pattern, image))
}

/// json-file logging with the configured options
pub fn log_config(settings: &DockerSettings) -> LogConfig {
    LogConfig::json_file(settings.log_options.clone())
}

/// Host configuration of build and predefined containers
pub fn build_host_config(settings: &DockerSettings, options: HostConfigOptions) -> Result<HostConfig> {
    validate_isolation(&settings.isolation)?;

    let mut links = settings.links.clone();
    links.extend(options.links);

    Ok(HostConfig {
        binds: options.binds,
        network_mode: options.network_mode,
        links,
        dns: settings.dns.clone(),
        dns_search: settings.dns_search.clone(),
        extra_hosts: settings.extra_hosts.clone(),
        privileged: settings.privileged && options.image_privileged,
        cap_add: settings.cap_add.clone(),
        cap_drop: settings.cap_drop.clone(),
        security_opt: settings.security_opt.clone(),
        runtime: settings.runtime.clone(),
        isolation: settings.isolation.clone(),
        userns_mode: settings.userns_mode.clone(),
        ipc_mode: settings.ipc_mode.clone(),
        memory: settings.memory_bytes()?,
        memory_swap: settings.memory_swap_bytes()?,
        memory_reservation: settings.memory_reservation_bytes()?,
        nano_cpus: settings.nano_cpus()?,
        cpuset_cpus: settings.cpuset_cpus.clone(),
        cpu_shares: settings.cpu_shares,
        oom_kill_disable: settings.oom_kill_disable.then_some(true),
        oom_score_adj: settings.oom_score_adjust,
        shm_size: settings.shm_size,
        tmpfs: settings.tmpfs.clone(),
        sysctls: settings.sysctls.clone(),
        devices: options.devices,
        device_cgroup_rules: settings.device_cgroup_rules.clone(),
        device_requests: options.device_requests,
        volume_driver: settings.volume_driver.clone(),
        volumes_from: settings.volumes_from.clone(),
        restart_policy: RestartPolicy::never(),
        log_config: log_config(settings),
    })
}

/// Host configuration of service containers
pub fn service_host_config(
    settings: &DockerSettings,
    network_mode: &str,
    binds: Vec<String>,
    image_privileged: bool,
) -> HostConfig {
    HostConfig {
        binds,
        network_mode: network_mode.to_string(),
        dns: settings.dns.clone(),
        dns_search: settings.dns_search.clone(),
        extra_hosts: settings.extra_hosts.clone(),
        privileged: settings.services_privileged() && image_privileged,
        security_opt: settings.services_security_opt.clone(),
        runtime: settings.runtime.clone(),
        userns_mode: settings.userns_mode.clone(),
        shm_size: settings.shm_size,
        tmpfs: settings.services_tmpfs.clone(),
        restart_policy: RestartPolicy::never(),
        log_config: log_config(settings),
        ..Default::default()
    }
}

/// Host configuration of service health check containers
pub fn health_check_host_config(
    settings: &DockerSettings,
    network_mode: &str,
    extra_hosts: Vec<String>,
) -> HostConfig {
    HostConfig {
        network_mode: network_mode.to_string(),
        extra_hosts,
        restart_policy: RestartPolicy::never(),
        log_config: log_config(settings),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use std::collections::HashMap;

    #[test]
    fn test_build_host_config() {
        let settings = DockerSettings {
            privileged: true,
            memory: "1g".to_string(),
            cpus: "1.5".to_string(),
            links: vec!["db:postgres".to_string()],
            log_options: HashMap::from([("env".to_string(), "A".to_string())]),
            ..Default::default()
        };

        let config = build_host_config(
            &settings,
            HostConfigOptions {
                network_mode: "job-net".to_string(),
                binds: vec!["/cache".to_string()],
                links: vec!["abc:redis".to_string()],
                image_privileged: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.network_mode, "job-net");
        assert_eq!(config.memory, 1 << 30);
        assert_eq!(config.nano_cpus, 1_500_000_000);
        assert_eq!(config.links, vec!["db:postgres", "abc:redis"]);
        assert!(config.privileged);
        assert_eq!(config.restart_policy.name, "no");
        assert_eq!(config.log_config.kind, "json-file");
        assert_eq!(config.log_config.config["env"], "A");
    }

    #[test]
    fn test_privileged_requires_allowed_image() {
        let settings = DockerSettings {
            privileged: true,
            ..Default::default()
        };
        let config = build_host_config(
            &settings,
            HostConfigOptions {
                image_privileged: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!config.privileged);

        assert!(is_privileged_allowed("docker:dind", &[]));
        assert!(is_privileged_allowed("docker:dind", &["docker:*".to_string()]));
        assert!(!is_privileged_allowed("alpine", &["docker:*".to_string()]));
    }

    #[test]
    fn test_invalid_isolation() {
        let settings = DockerSettings {
            isolation: "full".to_string(),
            ..Default::default()
        };
        let err = build_host_config(&settings, HostConfigOptions::default()).unwrap_err();
        assert!(matches!(err, ExecutorError::Config(_)));
    }

    #[test]
    fn test_service_privileged_override() {
        let settings = DockerSettings {
            privileged: true,
            services_privileged: Some(false),
            ..Default::default()
        };
        assert!(!service_host_config(&settings, "", Vec::new(), true).privileged);
    }
}
