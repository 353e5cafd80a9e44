//! Docker executor flavors

use dockhand_core::job::DEFAULT_BUILDS_DIR;

use crate::helper_image::{PWSH_SHELL, powershell_cmd};

/// Finds the best shell of the build image and runs the script read from stdin
pub const DETECT_SHELL_SCRIPT: &str = r#"if [ -x /usr/local/bin/bash ]; then
	exec /usr/local/bin/bash
elif [ -x /usr/bin/bash ]; then
	exec /usr/bin/bash
elif [ -x /bin/bash ]; then
	exec /bin/bash
elif [ -x /usr/local/bin/sh ]; then
	exec /usr/local/bin/sh
elif [ -x /usr/bin/sh ]; then
	exec /usr/bin/sh
elif [ -x /bin/sh ]; then
	exec /bin/sh
elif [ -x /busybox/sh ]; then
	exec /busybox/sh
else
	echo shell not found
	exit 1
fi
"#;

pub const OS_TYPE_LINUX: &str = "linux";
pub const OS_TYPE_WINDOWS: &str = "windows";

/// What differs between the Linux and the Windows executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorVariant {
    /// Name the executor is registered under
    pub name: &'static str,
    /// OS type the engine must report
    pub os_type: &'static str,
    pub shell: &'static str,
}

impl ExecutorVariant {
    pub fn linux() -> Self {
        Self {
            name: "docker",
            os_type: OS_TYPE_LINUX,
            shell: "bash",
        }
    }

    pub fn windows() -> Self {
        Self {
            name: "docker-windows",
            os_type: OS_TYPE_WINDOWS,
            shell: PWSH_SHELL,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os_type == OS_TYPE_WINDOWS
    }

    /// Command of the build container
    pub fn docker_command(&self) -> Vec<String> {
        if self.is_windows() {
            return powershell_cmd(self.shell);
        }
        vec![
            "sh".to_string(),
            "-c".to_string(),
            DETECT_SHELL_SCRIPT.to_string(),
        ]
    }

    /// Builds directory used when the runner sets none
    pub fn default_builds_dir(&self) -> &'static str {
        if self.is_windows() { r"C:\builds" } else { DEFAULT_BUILDS_DIR }
    }
}
