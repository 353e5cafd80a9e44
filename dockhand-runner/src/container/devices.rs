//! Host devices and GPU requests

use dockhand_client::types::{DeviceMapping, DeviceRequest};

use crate::error::{ExecutorError, Result};

const DEFAULT_CGROUP_PERMISSIONS: &str = "rwm";
const GPU_DRIVER: &str = "nvidia";

/// Parses `host[:container[:permissions]]`
///
/// The container path defaults to the host path and permissions default
/// to `rwm`, like `docker run --device`.
pub fn parse_device(device: &str) -> Result<DeviceMapping> {
    let parts: Vec<&str> = device.split(':').collect();
    if parts.len() > 3 {
        return Err(ExecutorError::ScriptFailure(format!(
            "failed to parse device string {:?}: too many colons",
            device
        )));
    }

    let path_on_host = parts[0].to_string();
    let path_in_container = parts
        .get(1)
        .map(|p| p.to_string())
        .unwrap_or_else(|| path_on_host.clone());
    let cgroup_permissions = parts
        .get(2)
        .map(|p| p.to_string())
        .unwrap_or_else(|| DEFAULT_CGROUP_PERMISSIONS.to_string());

    Ok(DeviceMapping {
        path_on_host,
        path_in_container,
        cgroup_permissions,
    })
}

pub fn bind_devices(devices: &[String]) -> Result<Vec<DeviceMapping>> {
    devices.iter().map(|d| parse_device(d)).collect()
}

/// Turns the `gpus` option into a device request
///
/// Accepts `all` or a number of GPUs; an empty value requests nothing.
pub fn gpu_requests(gpus: &str) -> Result<Vec<DeviceRequest>> {
    let gpus = gpus.trim();
    if gpus.is_empty() {
        return Ok(Vec::new());
    }

    let count = if gpus == "all" {
        -1
    } else {
        gpus.parse::<i64>().ok().filter(|n| *n > 0).ok_or_else(|| {
            ExecutorError::ScriptFailure(format!("parsing gpus string {:?}: invalid value", gpus))
        })?
    };

    Ok(vec![DeviceRequest {
        driver: GPU_DRIVER.to_string(),
        count,
        capabilities: vec![vec!["gpu".to_string()]],
        ..Default::default()
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_defaults() {
        let device = parse_device("/dev/kvm").unwrap();
        assert_eq!(device.path_on_host, "/dev/kvm");
        assert_eq!(device.path_in_container, "/dev/kvm");
        assert_eq!(device.cgroup_permissions, "rwm");
    }

    #[test]
    fn test_parse_device_full() {
        let device = parse_device("/dev/fuse:/dev/fuse0:r").unwrap();
        assert_eq!(device.path_in_container, "/dev/fuse0");
        assert_eq!(device.cgroup_permissions, "r");
    }

    #[test]
    fn test_parse_device_too_many_colons() {
        assert!(parse_device("/dev/a:/dev/b:rwm:extra").is_err());
        assert!(bind_devices(&["/dev/a".to_string(), "a:b:c:d".to_string()]).is_err());
    }

    #[test]
    fn test_gpu_requests() {
        assert!(gpu_requests("").unwrap().is_empty());

        let all = gpu_requests("all").unwrap();
        assert_eq!(all[0].count, -1);
        assert_eq!(all[0].driver, "nvidia");
        assert_eq!(all[0].capabilities, vec![vec!["gpu".to_string()]]);

        assert_eq!(gpu_requests("2").unwrap()[0].count, 2);
        assert!(gpu_requests("lots").is_err());
    }
}
