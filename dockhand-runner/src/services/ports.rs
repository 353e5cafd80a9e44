//! Ports probed by service health checks

use std::collections::BTreeSet;

use crate::error::{ExecutorError, Result};

/// Upper bound of ports checked per service
pub const MAX_PORTS_CHECKED: usize = 20;

/// Variable in the service's environment overriding port discovery
pub const HEALTHCHECK_PORT_VARIABLE: &str = "HEALTHCHECK_TCP_PORT";

/// Parses `80/tcp` or `1000-1100/tcp` into an inclusive TCP range
fn tcp_range(spec: &str) -> Option<(u16, u16)> {
    let (ports, proto) = spec.split_once('/').unwrap_or((spec, "tcp"));
    if proto != "tcp" {
        return None;
    }

    match ports.split_once('-') {
        Some((start, end)) => {
            let start = start.parse().ok()?;
            let end = end.parse().ok()?;
            (start <= end).then_some((start, end))
        }
        None => ports.parse().ok().map(|p| (p, p)),
    }
}

/// Ports a health check connects to
///
/// # Arguments
/// * `env` - Environment of the service container, `KEY=value` entries
/// * `exposed_ports` - Exposed port specifications of the service
///
/// # Returns
/// The single `HEALTHCHECK_TCP_PORT` when set, otherwise the lowest
/// exposed TCP ports in ascending order
pub fn health_check_ports(env: &[String], exposed_ports: &[String]) -> Result<Vec<u16>> {
    for entry in env {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if key.eq_ignore_ascii_case(HEALTHCHECK_PORT_VARIABLE) {
            let port = value.parse::<u16>().map_err(|_| {
                ExecutorError::ScriptFailure(format!("invalid health check tcp port: {}", value))
            })?;
            return Ok(vec![port]);
        }
    }

    let mut ports = BTreeSet::new();
    for (start, end) in exposed_ports.iter().filter_map(|spec| tcp_range(spec)) {
        ports.extend((start..=end).take(MAX_PORTS_CHECKED));
    }

    Ok(ports.into_iter().take(MAX_PORTS_CHECKED).collect())
}

/// Environment of a health check container
pub fn health_check_env(address: &str, ports: &[u16]) -> Vec<String> {
    let mut env = vec![format!("WAIT_FOR_SERVICE_TCP_ADDR={}", address)];
    env.extend(
        ports
            .iter()
            .map(|port| format!("WAIT_FOR_SERVICE_{}_TCP_PORT={}", port, port)),
    );
    env
}
