//! LinuxKit image definitions for the HyperKit VM.
//!
//! The VM boots a kernel and initrd built by the `linuxkit` tool from a YAML image definition.
//! This module renders that definition and drives the build.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    config::LinuxKitVmConfig,
    utils::{args, CommandRunner},
    FunserverError, FunserverResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The LinuxKit command line tool.
pub const LINUXKIT_EXE: &str = "linuxkit";

/// Steps shown when the `linuxkit` tool is missing.
pub const LINUXKIT_REMEDIATION: &str =
    "Install the LinuxKit tool with `brew install linuxkit/linuxkit/linuxkit`.";

const KERNEL_IMAGE: &str = "linuxkit/kernel:5.4.129";
const CONTAINERD_IMAGE: &str = "linuxkit/containerd:9cd43727ed66a7605f655ff95df83abaf5816f31";
const VSUDD_IMAGE: &str = "linuxkit/vsudd:v1.0.0";

const GUEST_ENGINE_CONFIG: &str = r#"[plugins.cri]
  sandbox_image = "k8s.gcr.io/pause:3.6"
[plugins.cri.containerd.runtimes.runc]
  runtime_type = "io.containerd.runc.v2"
[plugins.cri.cni]
  bin_dir = "/cni/bin"
  conf_dir = "/cni/conf"
[plugins.scheduler]
  pause_threshold = 0.02
  deletion_threshold = 0
  mutation_threshold = 100
  schedule_delay = "0s"
  startup_delay = "100ms"
"#;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A LinuxKit image definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxKitImage {
    /// The kernel.
    pub kernel: KernelSpec,

    /// Images unpacked into the root filesystem.
    pub init: Vec<String>,

    /// Containers run to completion at boot.
    pub onboot: Vec<ImageService>,

    /// Long-running containers.
    pub services: Vec<ImageService>,

    /// Files added to the root filesystem.
    pub files: Vec<ImageFile>,
}

/// The kernel section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Kernel image reference.
    pub image: String,

    /// Kernel command line.
    pub cmdline: String,
}

/// An `onboot` or `services` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageService {
    /// Service name.
    pub name: String,

    /// Container image reference.
    pub image: String,

    /// Command override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Environment, as `KEY=value`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Bind mounts, as `host:container`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
}

/// A file added to the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    /// Path inside the image.
    pub path: String,

    /// File contents.
    pub contents: String,
}

/// Kernel and initrd produced by a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    /// The kernel image.
    pub kernel: PathBuf,

    /// The initial ramdisk.
    pub initrd: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LinuxKitImage {
    /// The image the HyperKit backend boots: containerd plus a vsock relay exposing its socket
    /// on the configured port.
    pub fn for_vm(vm: &LinuxKitVmConfig) -> Self {
        Self {
            kernel: KernelSpec {
                image: KERNEL_IMAGE.to_string(),
                cmdline: "console=tty0 console=ttyS0 console=ttyAMA0".to_string(),
            },
            init: vec![
                "linuxkit/init:14df799bb3b9e0eb0491da9fda7f32a108a2e2a5".to_string(),
                "linuxkit/runc:4ca27ce9ac9db402c138f63d7b59f3533bd4d41c".to_string(),
                CONTAINERD_IMAGE.to_string(),
            ],
            onboot: vec![
                ImageService {
                    name: "sysctl".to_string(),
                    image: "linuxkit/sysctl:cf67133f5601826f5326d67d697111c880f9a57d".to_string(),
                    command: vec![],
                    env: vec![],
                    binds: vec![],
                },
                ImageService {
                    name: "dhcpcd".to_string(),
                    image: "linuxkit/dhcpcd:63f26d54f8bf33821403286a40b93593b3f7e788".to_string(),
                    command: args(["/sbin/dhcpcd", "--nobackground", "-f", "/dhcpcd.conf", "-1"]),
                    env: vec![],
                    binds: vec![],
                },
            ],
            services: vec![
                ImageService {
                    name: "rngd".to_string(),
                    image: "linuxkit/rngd:f66c0b06f7b543c9a779a8749dc477c7e1694f3a".to_string(),
                    command: vec![],
                    env: vec![],
                    binds: vec![],
                },
                ImageService {
                    name: "containerd".to_string(),
                    image: CONTAINERD_IMAGE.to_string(),
                    command: vec![],
                    env: vec!["CONTAINERD_CONFIG=/etc/containerd/config.toml".to_string()],
                    binds: args([
                        "/etc/containerd/config.toml:/etc/containerd/config.toml",
                        "/containers:/containers",
                        "/run:/run",
                        "/var:/var",
                        "/var/lib/containerd:/var/lib/containerd",
                        "/var/run:/var/run",
                        "/cni:/cni",
                    ]),
                },
                ImageService {
                    name: "vsudd".to_string(),
                    image: VSUDD_IMAGE.to_string(),
                    command: vec![
                        "/vsudd".to_string(),
                        "-inport".to_string(),
                        format!("{}:unix:/run/containerd/containerd.sock", vm.vsock_port),
                    ],
                    env: vec![],
                    binds: args(["/run:/run"]),
                },
            ],
            files: vec![ImageFile {
                path: "/etc/containerd/config.toml".to_string(),
                contents: GUEST_ENGINE_CONFIG.to_string(),
            }],
        }
    }

    /// Renders the definition as YAML.
    pub fn to_yaml(&self) -> FunserverResult<String> {
        serde_yaml::to_string(self).map_err(FunserverError::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Writes the image definition for `vm` to `path`, creating parent directories.
pub async fn generate_config(path: &Path, vm: &LinuxKitVmConfig) -> FunserverResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(path, LinuxKitImage::for_vm(vm).to_yaml()?).await?;
    tracing::info!("wrote LinuxKit image definition to {}", path.display());
    Ok(())
}

/// Builds a kernel and initrd from the definition at `config_path` into `out_dir`.
pub async fn build_image(
    runner: &dyn CommandRunner,
    config_path: &Path,
    out_dir: &Path,
) -> FunserverResult<BuiltImage> {
    let linuxkit = which::which(LINUXKIT_EXE).map_err(|e| FunserverError::Prerequisite {
        capability: "linuxkit".to_string(),
        reason: e.to_string(),
        remediation: LINUXKIT_REMEDIATION.to_string(),
    })?;

    fs::create_dir_all(out_dir).await?;
    runner
        .output(
            &linuxkit.display().to_string(),
            &args([
                "build".to_string(),
                "--format".to_string(),
                "kernel+initrd".to_string(),
                "--dir".to_string(),
                out_dir.display().to_string(),
                config_path.display().to_string(),
            ]),
        )
        .await?
        .check("linuxkit build")
        .map_err(|e| FunserverError::provisioning("LinuxKit image", e))?;

    let built = built_image_paths(config_path, out_dir);
    for artifact in [&built.kernel, &built.initrd] {
        if fs::metadata(artifact).await.is_err() {
            return Err(FunserverError::provisioning(
                "LinuxKit image",
                format!("build did not produce {}", artifact.display()),
            ));
        }
    }

    tracing::info!("built LinuxKit image into {}", out_dir.display());
    Ok(built)
}

/// Copies a built kernel and initrd to where the VM boots them from.
pub async fn install_image(built: &BuiltImage, vm: &LinuxKitVmConfig) -> FunserverResult<()> {
    for (source, dest) in [(&built.kernel, &vm.kernel_path), (&built.initrd, &vm.initrd_path)] {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(source, dest).await?;
        tracing::info!("installed {} to {}", source.display(), dest.display());
    }

    Ok(())
}

/// Where `linuxkit build` puts its outputs: `<dir>/<stem>-kernel` and `<dir>/<stem>-initrd.img`.
pub fn built_image_paths(config_path: &Path, out_dir: &Path) -> BuiltImage {
    let stem = config_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "linuxkit".to_string());

    BuiltImage {
        kernel: out_dir.join(format!("{stem}-kernel")),
        initrd: out_dir.join(format!("{stem}-initrd.img")),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
