use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use funserver_utils::{get_bundle_dir_path, get_cache_dir_path};
use getset::Getters;
use tokio::{fs, process::Command};

use crate::{platform::HostOs, FunserverError, FunserverResult};

use super::{Component, STANDARD_CNI_DIRS};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The per-user cache of extracted runtime binaries.
///
/// Constructed once and passed to everything that provisions or resolves binaries.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct BinaryCache {
    /// Where extracted binaries are kept.
    cache_dir: PathBuf,

    /// Root of the bundle shipped with the application.
    bundle_dir: PathBuf,

    /// The OS whose bundle subdirectory is used.
    os: HostOs,

    /// Search path used instead of `PATH` for fallback lookups.
    search_path: Option<OsString>,
}

/// What [`BinaryCache::ensure_extracted`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// The cached copy was already usable. Nothing was written.
    AlreadyPresent,

    /// The bundled source was copied into the cache.
    Extracted,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BinaryCache {
    /// Creates a cache that extracts from `bundle_dir` into `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>, bundle_dir: impl Into<PathBuf>, os: HostOs) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            bundle_dir: bundle_dir.into(),
            os,
            search_path: None,
        }
    }

    /// Creates the cache from the environment for the current host.
    pub fn from_env() -> Self {
        Self::new(get_cache_dir_path(), get_bundle_dir_path(), HostOs::current())
    }

    /// Uses `search_path` instead of the `PATH` environment variable for fallback lookups.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Where `component` lives once extracted.
    pub fn cached_path(&self, component: Component) -> PathBuf {
        self.cache_dir.join(component.file_name(self.os))
    }

    /// Where `component` is expected in the bundle.
    pub fn bundled_path(&self, component: Component) -> PathBuf {
        self.bundle_dir
            .join(component.bundled_relative_path(self.os))
    }

    /// Returns `true` if the bundle ships `component`.
    pub fn is_bundled(&self, component: Component) -> bool {
        let source = self.bundled_path(component);
        if component.is_directory() {
            is_non_empty_dir(&source)
        } else {
            source.is_file()
        }
    }

    /// Returns `true` if `path` points into the cache.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.cache_dir)
    }

    /// Copies `component` from the bundle into the cache unless a usable copy is already there.
    pub async fn ensure_extracted(&self, component: Component) -> FunserverResult<Extraction> {
        let dest = self.cached_path(component);
        self.ensure_extracted_to(component, &dest).await
    }

    /// Copies `component` from the bundle to `dest` unless a usable copy is already there.
    pub async fn ensure_extracted_to(
        &self,
        component: Component,
        dest: &Path,
    ) -> FunserverResult<Extraction> {
        if component.is_directory() {
            return self.ensure_dir_extracted(component, dest).await;
        }

        if is_usable(dest, component.is_executable()) {
            tracing::debug!("{} already present at {}", component, dest.display());
            return Ok(Extraction::AlreadyPresent);
        }

        let source = self.bundled_path(component);
        if !source.is_file() {
            return Err(FunserverError::ComponentNotFound {
                component,
                bundled: source,
            });
        }

        copy_atomically(&source, dest, component.is_executable())
            .await
            .map_err(|e| FunserverError::provisioning(component.to_string(), e))?;

        tracing::info!(
            "extracted {} from {} to {}",
            component,
            source.display(),
            dest.display()
        );

        Ok(Extraction::Extracted)
    }

    /// Extracts the engine, the runtime and the CNI plugins, plus the hypervisor on macOS.
    ///
    /// Every component is attempted. The first failure is returned afterwards.
    pub async fn ensure_all_extracted(&self) -> FunserverResult<()> {
        let mut components = vec![Component::Engine, Component::Runtime, Component::NetworkPlugins];
        if self.os == HostOs::MacOs {
            components.push(Component::Hypervisor);
        }

        let mut first_error = None;
        for component in components {
            if let Err(e) = self.ensure_extracted(component).await {
                tracing::warn!("failed to extract {}: {}", component, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolves a usable path for `component`: the cache first, then the `PATH`.
    ///
    /// CNI plugins are looked up in [`STANDARD_CNI_DIRS`] instead of the `PATH`.
    pub fn resolve(&self, component: Component) -> Option<PathBuf> {
        let cached = self.cached_path(component);
        if component.is_directory() {
            if is_non_empty_dir(&cached) {
                return Some(cached);
            }

            return STANDARD_CNI_DIRS
                .iter()
                .map(PathBuf::from)
                .find(|dir| is_non_empty_dir(dir));
        }

        if is_usable(&cached, component.is_executable()) {
            return Some(cached);
        }

        if !component.is_on_path() {
            return None;
        }

        let name = component.file_name(self.os);
        let found = match &self.search_path {
            Some(search_path) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(&name, Some(search_path), cwd)
            }
            None => which::which(&name),
        };

        found.ok()
    }

    /// Like [`resolve`](Self::resolve), but a missing component is an error.
    pub fn require(&self, component: Component) -> FunserverResult<PathBuf> {
        self.resolve(component)
            .ok_or_else(|| FunserverError::ComponentNotFound {
                component,
                bundled: self.bundled_path(component),
            })
    }

    /// Reports the version of the engine binary.
    pub async fn engine_version(&self) -> FunserverResult<String> {
        let engine = self.require(Component::Engine)?;
        let output = Command::new(&engine).arg("--version").output().await?;
        if !output.status.success() {
            return Err(FunserverError::process(
                engine.display().to_string(),
                format!(
                    "--version failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Removes every extracted binary.
    pub async fn clean(&self) -> FunserverResult<()> {
        match fs::remove_dir_all(&self.cache_dir).await {
            Ok(()) => {
                tracing::info!("removed binary cache at {}", self.cache_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_dir_extracted(
        &self,
        component: Component,
        dest: &Path,
    ) -> FunserverResult<Extraction> {
        if is_non_empty_dir(dest) {
            tracing::debug!("{} already present at {}", component, dest.display());
            return Ok(Extraction::AlreadyPresent);
        }

        let source = self.bundled_path(component);
        if !is_non_empty_dir(&source) {
            return Err(FunserverError::ComponentNotFound {
                component,
                bundled: source,
            });
        }

        let mut entries = fs::read_dir(&source).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            copy_atomically(&entry.path(), &dest.join(entry.file_name()), true)
                .await
                .map_err(|e| FunserverError::provisioning(component.to_string(), e))?;
        }

        tracing::info!(
            "extracted {} from {} to {}",
            component,
            source.display(),
            dest.display()
        );

        Ok(Extraction::Extracted)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Copies `source` to a temporary file next to `dest`, then renames it into place.
async fn copy_atomically(source: &Path, dest: &Path, executable: bool) -> std::io::Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let temp_path = tempfile::Builder::new()
        .prefix(".extract-")
        .tempfile_in(parent)?
        .into_temp_path();

    fs::copy(source, &temp_path).await?;

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o755)).await?;
    }

    #[cfg(not(unix))]
    let _ = executable;

    temp_path.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

fn is_usable(path: &Path, executable: bool) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };

    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        return metadata.permissions().mode() & 0o111 != 0;
    }

    #[cfg(not(unix))]
    let _ = executable;

    true
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
