//! Copying bundled libraries out to disk so the OS can load them.
//!
//! Two strategies are provided:
//!
//! - [`SharedExtractor`] puts every library in one process-wide working
//!   directory and reuses an identical file already extracted there.
//! - [`DomainExtractor`] gives its owner a private subdirectory, so two
//!   domains loading the same library get two distinct files. This is only
//!   safe for libraries without process-global state.
//!
//! Dependency libraries listed in an `AUTOEXTRACT.LIST` manifest always land
//! in the shared working directory, which is where the OS linker will look for
//! them.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{
    cleanup::{CleanupEntry, delete_on_exit, forget_on_exit},
    error::LoadError,
    platform::PlatformTag,
    resolver::{DEFAULT_SEARCH_ROOT, META_INF_LIB_ROOT},
    resource::ResourceSource,
};

/// Name of the manifest listing libraries to extract ahead of time.
pub const MANIFEST_NAME: &str = "AUTOEXTRACT.LIST";

const MAX_DOMAIN_DIR_ATTEMPTS: u32 = 64;

/// Copies library resources out of the bundle.
pub trait Extractor: fmt::Debug + Send + Sync {
    /// Extracts the library `logical_name` from the candidate directory
    /// `search_root` (for example `natives/linux_64/`) and returns the path
    /// of the file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::ResourceNotFound`] if no file for the library
    /// exists under `search_root`, or [`LoadError::ExtractionIo`] if copying
    /// it fails.
    fn extract(&self, search_root: &str, logical_name: &str) -> Result<PathBuf, LoadError>;

    /// Extracts every library listed in the bundle's `AUTOEXTRACT.LIST`
    /// manifests into [`Extractor::working_dir`].
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest is malformed, a listed library is
    /// missing, or copying fails.
    fn extract_registered(&self) -> Result<Vec<PathBuf>, LoadError>;

    /// Directory explicit extractions are written to.
    fn extraction_dir(&self) -> &Path;

    /// Process-wide directory holding shared dependencies. It has to be on
    /// the OS library search path for dependencies to resolve.
    fn working_dir(&self) -> &Path;
}

/// Which [`Extractor`] to build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// One directory for the whole process.
    #[default]
    Shared,
    /// A private directory named after the given domain.
    Domain(String),
}

/// Builds the extractor described by `kind`.
///
/// A domain extractor that cannot create its directory falls back to a
/// shared one.
///
/// # Errors
///
/// Returns [`LoadError::DirectoryCreationFailed`] if even the shared working
/// directory cannot be created.
pub fn build_extractor(
    kind: &ExtractorKind,
    source: Arc<dyn ResourceSource>,
    tag: PlatformTag,
    working_dir: &Path,
) -> Result<Arc<dyn Extractor>, LoadError> {
    match kind {
        ExtractorKind::Shared => Ok(Arc::new(SharedExtractor::new(source, tag, working_dir)?)),
        ExtractorKind::Domain(domain) => {
            match DomainExtractor::new(domain, Arc::clone(&source), tag, working_dir) {
                Ok(extractor) => Ok(Arc::new(extractor)),
                Err(err) => {
                    warn!(
                        domain = %domain,
                        error = %err,
                        "Falling back to shared extractor"
                    );
                    Ok(Arc::new(SharedExtractor::new(source, tag, working_dir)?))
                }
            }
        }
    }
}

/// Extracts into one process-wide directory.
#[derive(Debug)]
pub struct SharedExtractor {
    bundle: Bundle,
    working_dir: PathBuf,
}

impl SharedExtractor {
    /// Creates the extractor, creating `working_dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DirectoryCreationFailed`] if the directory
    /// cannot be created.
    pub fn new(
        source: Arc<dyn ResourceSource>,
        tag: PlatformTag,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self, LoadError> {
        let working_dir = working_dir.into();
        ensure_dir(&working_dir)?;
        delete_on_exit(CleanupEntry::EmptyDir(working_dir.clone()));
        Ok(Self {
            bundle: Bundle { source, tag },
            working_dir,
        })
    }
}

impl Extractor for SharedExtractor {
    fn extract(&self, search_root: &str, logical_name: &str) -> Result<PathBuf, LoadError> {
        self.bundle
            .extract_library(search_root, logical_name, &self.working_dir)
    }

    fn extract_registered(&self) -> Result<Vec<PathBuf>, LoadError> {
        self.bundle.extract_manifests(&self.working_dir)
    }

    fn extraction_dir(&self) -> &Path {
        &self.working_dir
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Extracts into a private subdirectory removed when the extractor is
/// dropped.
#[derive(Debug)]
pub struct DomainExtractor {
    bundle: Bundle,
    domain: String,
    working_dir: PathBuf,
    domain_dir: PathBuf,
}

impl DomainExtractor {
    /// Creates `{working_dir}/{domain}.{millis}.{attempt}`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DirectoryCreationFailed`] if `domain` is not a
    /// plain directory name, or if neither the working directory nor a fresh
    /// domain directory can be created.
    pub fn new(
        domain: &str,
        source: Arc<dyn ResourceSource>,
        tag: PlatformTag,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self, LoadError> {
        let working_dir = working_dir.into();
        if domain.is_empty() || domain.contains(['/', '\\']) || domain == "." || domain == ".." {
            return Err(LoadError::DirectoryCreationFailed {
                path: working_dir,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("domain `{domain}` must be a plain directory name"),
                ),
            });
        }
        ensure_dir(&working_dir)?;
        delete_on_exit(CleanupEntry::EmptyDir(working_dir.clone()));

        let domain_dir = create_domain_dir(&working_dir, domain)?;
        delete_on_exit(CleanupEntry::Tree(domain_dir.clone()));
        debug!(
            domain = %domain,
            path = %domain_dir.display(),
            "Created domain extraction directory"
        );

        Ok(Self {
            bundle: Bundle { source, tag },
            domain: domain.to_string(),
            working_dir,
            domain_dir,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Extractor for DomainExtractor {
    fn extract(&self, search_root: &str, logical_name: &str) -> Result<PathBuf, LoadError> {
        self.bundle
            .extract_library(search_root, logical_name, &self.domain_dir)
    }

    fn extract_registered(&self) -> Result<Vec<PathBuf>, LoadError> {
        self.bundle.extract_manifests(&self.working_dir)
    }

    fn extraction_dir(&self) -> &Path {
        &self.domain_dir
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

impl Drop for DomainExtractor {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.domain_dir) {
            Ok(()) => {
                forget_on_exit(&self.domain_dir);
            }
            Err(err) => {
                debug!(
                    path = %self.domain_dir.display(),
                    error = %err,
                    "Could not remove domain extraction directory"
                );
            }
        }
    }
}

fn create_domain_dir(working_dir: &Path, domain: &str) -> Result<PathBuf, LoadError> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());

    let mut last_err = None;
    for attempt in 0..MAX_DOMAIN_DIR_ATTEMPTS {
        let candidate = working_dir.join(format!("{domain}.{millis}.{attempt}"));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => last_err = Some(err),
            Err(err) => {
                return Err(LoadError::DirectoryCreationFailed {
                    path: candidate,
                    source: err,
                });
            }
        }
    }

    Err(LoadError::DirectoryCreationFailed {
        path: working_dir.join(format!("{domain}.{millis}")),
        source: last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AlreadyExists)),
    })
}

fn ensure_dir(path: &Path) -> Result<(), LoadError> {
    fs::create_dir_all(path).map_err(|source| LoadError::DirectoryCreationFailed {
        path: path.to_path_buf(),
        source,
    })?;
    if path.is_dir() {
        Ok(())
    } else {
        Err(LoadError::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
        })
    }
}

/// The resource bundle as seen for one platform.
#[derive(Debug, Clone)]
struct Bundle {
    source: Arc<dyn ResourceSource>,
    tag: PlatformTag,
}

impl Bundle {
    fn extract_library(
        &self,
        search_root: &str,
        logical_name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, LoadError> {
        let prefix = if search_root.is_empty() || search_root.ends_with('/') {
            search_root.to_string()
        } else {
            format!("{search_root}/")
        };

        let mut searched = Vec::new();
        for file_name in self.tag.file_names(logical_name) {
            let resource = format!("{prefix}{file_name}");
            if let Some(path) = self.copy_resource(&resource, dest_dir, &file_name)? {
                return Ok(path);
            }
            searched.push(resource);
        }

        Err(LoadError::ResourceNotFound {
            name: logical_name.to_string(),
            platform: self.tag,
            searched,
        })
    }

    fn extract_manifests(&self, dest_dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let mut extracted = Vec::new();
        for root in [DEFAULT_SEARCH_ROOT, META_INF_LIB_ROOT] {
            let root = root.trim_end_matches('/');
            let manifest_path = format!("{root}/{MANIFEST_NAME}");
            let Some(bytes) = self.read(&manifest_path, dest_dir)? else {
                continue;
            };
            let text = String::from_utf8(bytes).map_err(|err| LoadError::Manifest {
                path: manifest_path.clone(),
                message: err.to_string(),
            })?;

            for file_name in parse_manifest(&manifest_path, &text)? {
                let resource = format!("{root}/{}/{file_name}", self.tag);
                let path = self.copy_resource(&resource, dest_dir, file_name)?.ok_or_else(|| {
                    LoadError::ResourceNotFound {
                        name: file_name.to_string(),
                        platform: self.tag,
                        searched: vec![resource.clone()],
                    }
                })?;
                extracted.push(path);
            }
        }

        info!(
            count = extracted.len(),
            path = %dest_dir.display(),
            "Extracted registered libraries"
        );
        Ok(extracted)
    }

    fn read(&self, resource: &str, dest_dir: &Path) -> Result<Option<Vec<u8>>, LoadError> {
        self.source
            .read(resource)
            .map_err(|source| LoadError::ExtractionIo {
                resource: resource.to_string(),
                path: dest_dir.to_path_buf(),
                source,
            })
    }

    /// Copies `resource` to `dest_dir/file_name`; `None` if the bundle has no
    /// such resource.
    fn copy_resource(
        &self,
        resource: &str,
        dest_dir: &Path,
        file_name: &str,
    ) -> Result<Option<PathBuf>, LoadError> {
        let Some(bytes) = self.read(resource, dest_dir)? else {
            return Ok(None);
        };

        let dest = dest_dir.join(file_name);
        if fs::read(&dest).is_ok_and(|existing| existing == bytes) {
            debug!(resource = %resource, path = %dest.display(), "Reusing extracted library");
            delete_on_exit(CleanupEntry::File(dest.clone()));
            return Ok(Some(dest));
        }

        write_atomically(&dest, &bytes).map_err(|source| LoadError::ExtractionIo {
            resource: resource.to_string(),
            path: dest.clone(),
            source,
        })?;
        delete_on_exit(CleanupEntry::File(dest.clone()));

        info!(
            resource = %resource,
            path = %dest.display(),
            bytes = bytes.len(),
            "Extracted native library"
        );
        Ok(Some(dest))
    }
}

/// Writes `bytes` to a temporary file next to `dest` and renames it into
/// place, so `dest` is either absent or complete.
fn write_atomically(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = temp.as_file().metadata()?.permissions();
        permissions.set_mode(0o755);
        temp.as_file().set_permissions(permissions)?;
    }

    match temp.persist(dest) {
        Ok(_) => Ok(()),
        Err(err) => accept_existing(dest, bytes, err.error),
    }
}

/// Settles a failed rename onto `dest`: another writer may have won the race
/// with the same bytes, otherwise the rename error stands.
fn accept_existing(dest: &Path, bytes: &[u8], error: io::Error) -> io::Result<()> {
    match fs::read(dest) {
        Ok(existing) if existing == bytes => {
            debug!(path = %dest.display(), "Destination already holds identical bytes");
            Ok(())
        }
        _ => Err(error),
    }
}

/// Library file names listed in a manifest, skipping blanks and `#` lines.
fn parse_manifest<'a>(path: &str, text: &'a str) -> Result<Vec<&'a str>, LoadError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if line.contains(['/', '\\']) || line == "." || line == ".." {
                Err(LoadError::Manifest {
                    path: path.to_string(),
                    message: format!("entry `{line}` must be a bare file name"),
                })
            } else {
                Ok(line)
            }
        })
        .collect()
}
