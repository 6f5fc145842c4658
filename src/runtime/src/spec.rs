//! OCI runtime spec generation.
//!
//! Every container gets the same baseline: read-only root, minimal PATH,
//! no privilege escalation, the standard Linux mount set, all devices denied
//! and private pid/ipc/uts/mount/network namespaces.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// OCI runtime spec version emitted by the builder.
pub const OCI_RUNTIME_SPEC_VERSION: &str = "1.0.0-rc5";

/// Baseline PATH for container processes.
pub const DEFAULT_PATH_ENV: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// OCI Runtime Spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    pub oci_version: String,
    pub platform: SpecPlatform,
    pub root: SpecRoot,
    pub process: SpecProcess,
    pub hostname: String,
    pub mounts: Vec<SpecMount>,
    pub linux: SpecLinux,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecPlatform {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecRoot {
    pub path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecProcess {
    pub terminal: bool,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub no_new_privileges: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecMount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecLinux {
    pub resources: SpecResources,
    pub namespaces: Vec<SpecNamespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecResources {
    pub devices: Vec<SpecDeviceCgroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecDeviceCgroup {
    pub allow: bool,
    pub access: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
}

impl RuntimeSpec {
    /// Build the spec for container `id` running `args` on `rootfs`.
    pub fn build(id: &str, args: Vec<String>, rootfs: impl AsRef<Path>, tty: bool) -> Self {
        RuntimeSpec {
            oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
            platform: SpecPlatform {
                os: std::env::consts::OS.to_string(),
                arch: go_arch(std::env::consts::ARCH).to_string(),
            },
            root: SpecRoot {
                path: rootfs.as_ref().to_string_lossy().into_owned(),
                readonly: true,
            },
            process: SpecProcess {
                terminal: tty,
                args,
                env: vec![DEFAULT_PATH_ENV.to_string()],
                cwd: "/".to_string(),
                no_new_privileges: true,
            },
            hostname: id.to_string(),
            mounts: default_mounts(),
            linux: SpecLinux {
                resources: SpecResources {
                    devices: vec![SpecDeviceCgroup {
                        allow: false,
                        access: "rwm".to_string(),
                    }],
                },
                namespaces: ["pid", "ipc", "uts", "mount", "network"]
                    .iter()
                    .map(|ns| SpecNamespace {
                        ns_type: ns.to_string(),
                    })
                    .collect(),
            },
        }
    }
}

/// Process argv: the declared command followed by the declared args.
pub fn process_args(command: &[String], args: &[String]) -> Vec<String> {
    command.iter().chain(args.iter()).cloned().collect()
}

/// OCI platform names follow Go's GOARCH values.
fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

fn mount(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> SpecMount {
    SpecMount {
        destination: destination.to_string(),
        mount_type: mount_type.to_string(),
        source: source.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
    }
}

fn default_mounts() -> Vec<SpecMount> {
    vec![
        mount("/proc", "proc", "proc", &[]),
        mount(
            "/dev",
            "tmpfs",
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        ),
        mount(
            "/dev/pts",
            "devpts",
            "devpts",
            &[
                "nosuid",
                "noexec",
                "newinstance",
                "ptmxmode=0666",
                "mode=0620",
                "gid=5",
            ],
        ),
        mount(
            "/dev/shm",
            "tmpfs",
            "shm",
            &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
        ),
        mount(
            "/dev/mqueue",
            "mqueue",
            "mqueue",
            &["nosuid", "noexec", "nodev"],
        ),
        mount("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev"]),
        mount(
            "/run",
            "tmpfs",
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        ),
        mount(
            "/etc/resolv.conf",
            "bind",
            "/etc/resolv.conf",
            &["rbind", "ro"],
        ),
        mount("/etc/hosts", "bind", "/etc/hosts", &["rbind", "ro"]),
        mount("/etc/localtime", "bind", "/etc/localtime", &["rbind", "ro"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RuntimeSpec {
        RuntimeSpec::build(
            "k8s_redis_pod_0",
            vec!["redis-server".to_string(), "--bind".to_string()],
            "/var/lib/ctrshim/k8s_redis_pod_0/rootfs",
            false,
        )
    }

    #[test]
    fn test_root_is_readonly_rootfs() {
        let spec = sample();
        assert_eq!(spec.root.path, "/var/lib/ctrshim/k8s_redis_pod_0/rootfs");
        assert!(spec.root.readonly);
    }

    #[test]
    fn test_process_baseline() {
        let spec = sample();
        assert_eq!(spec.hostname, "k8s_redis_pod_0");
        assert_eq!(spec.process.args, vec!["redis-server", "--bind"]);
        assert_eq!(spec.process.env, vec![DEFAULT_PATH_ENV]);
        assert_eq!(spec.process.cwd, "/");
        assert!(spec.process.no_new_privileges);
        assert!(!spec.process.terminal);
    }

    #[test]
    fn test_terminal_flag() {
        let spec = RuntimeSpec::build("c1", vec![], "/r", true);
        assert!(spec.process.terminal);
    }

    #[test]
    fn test_standard_mounts() {
        let destinations: Vec<_> = sample()
            .mounts
            .iter()
            .map(|m| m.destination.clone())
            .collect();
        assert_eq!(
            destinations,
            vec![
                "/proc",
                "/dev",
                "/dev/pts",
                "/dev/shm",
                "/dev/mqueue",
                "/sys",
                "/run",
                "/etc/resolv.conf",
                "/etc/hosts",
                "/etc/localtime",
            ]
        );
        let hosts = sample()
            .mounts
            .into_iter()
            .find(|m| m.destination == "/etc/hosts")
            .unwrap();
        assert_eq!(hosts.mount_type, "bind");
        assert_eq!(hosts.options, vec!["rbind", "ro"]);
    }

    #[test]
    fn test_devices_denied_and_namespaces() {
        let spec = sample();
        assert_eq!(
            spec.linux.resources.devices,
            vec![SpecDeviceCgroup {
                allow: false,
                access: "rwm".to_string()
            }]
        );
        let ns: Vec<_> = spec
            .linux
            .namespaces
            .iter()
            .map(|n| n.ns_type.as_str())
            .collect();
        assert_eq!(ns, vec!["pid", "ipc", "uts", "mount", "network"]);
    }

    #[test]
    fn test_process_args_concatenation() {
        let command = vec!["redis-server".to_string()];
        let args = vec!["--bind".to_string(), "0.0.0.0".to_string()];
        assert_eq!(
            process_args(&command, &args),
            vec!["redis-server", "--bind", "0.0.0.0"]
        );
        assert_eq!(process_args(&[], &args), vec!["--bind", "0.0.0.0"]);
        assert!(process_args(&[], &[]).is_empty());
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["ociVersion"], OCI_RUNTIME_SPEC_VERSION);
        assert_eq!(json["process"]["noNewPrivileges"], true);
        assert_eq!(json["mounts"][0]["type"], "proc");
        assert_eq!(json["linux"]["namespaces"][0]["type"], "pid");
    }
}
