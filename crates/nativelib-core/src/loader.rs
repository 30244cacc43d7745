//! Loading bundled native libraries by logical name.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    config::LoaderConfig,
    context::NativeContext,
    error::{LoadError, Outcome, StartupFailure},
    extractor::{Extractor, ExtractorKind, build_extractor},
    linker::{DynamicLinker, LibloadingLinker, LibraryOrigin, LinkError},
    platform::PlatformTag,
    resolver::{Candidate, Resolver},
    resource::{DirectorySource, ResourceSource, open_source},
    startup::Phase,
};

/// Finds, extracts and loads native libraries for one resource bundle.
///
/// Every public operation reads the startup flag of its [`NativeContext`]
/// first. While the application is starting, failures come back as
/// [`StartupFailure`]; afterwards they are logged and returned as
/// [`Outcome::Unavailable`].
///
/// # Example
///
/// ```no_run
/// use nativelib_core::NativeLoader;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let loader = NativeLoader::builder().with_source_path("lib/app.jar").build()?;
///
/// let origin = loader.load("foo", &[])?.into_result()?;
/// println!("loaded from {origin}");
///
/// loader.mark_startup_completed();
/// # Ok(())
/// # }
/// ```
pub struct NativeLoader {
    context: Arc<NativeContext>,
    extractor: RwLock<Arc<dyn Extractor>>,
    linker: Arc<dyn DynamicLinker>,
    try_system_first: bool,
    search_roots: Vec<String>,
}

impl fmt::Debug for NativeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLoader")
            .field("context", &self.context)
            .field("extractor", &self.extractor())
            .field("linker", &self.linker)
            .field("try_system_first", &self.try_system_first)
            .field("search_roots", &self.search_roots)
            .finish()
    }
}

impl NativeLoader {
    pub fn builder() -> NativeLoaderBuilder {
        NativeLoaderBuilder::new()
    }

    /// Makes the library `name` available to the process.
    ///
    /// Searches the OS library path first (unless disabled), then the bundle
    /// under `natives/`, the bundle root, `META-INF/lib`, the configured
    /// search roots and finally `extra_roots`. Loading a library that is
    /// already loaded returns at once.
    ///
    /// # Errors
    ///
    /// Returns [`StartupFailure`] if loading fails before
    /// [`NativeLoader::mark_startup_completed`] was called.
    #[instrument(skip(self, extra_roots), fields(name = %name))]
    pub fn load(
        &self,
        name: &str,
        extra_roots: &[&str],
    ) -> Result<Outcome<LibraryOrigin>, StartupFailure> {
        let phase = self.context.startup().phase();
        let result = self.load_library(phase, name, extra_roots);
        self.context
            .settle(phase, &format!("load({})", name.trim()), result)
    }

    /// Extracts the libraries listed in the bundle's `AUTOEXTRACT.LIST`
    /// manifests into the shared working directory.
    ///
    /// # Errors
    ///
    /// Returns [`StartupFailure`] if extraction fails during startup.
    #[instrument(skip(self))]
    pub fn extract_registered(&self) -> Result<Outcome<Vec<PathBuf>>, StartupFailure> {
        let phase = self.context.startup().phase();
        let result = if self.context.platform().is_known() {
            self.extractor().extract_registered()
        } else {
            Err(self.context.unsupported())
        };
        self.context.settle(phase, "extract_registered", result)
    }

    /// Ends the startup phase for every loader sharing this context.
    pub fn mark_startup_completed(&self) {
        self.context.mark_startup_completed();
    }

    pub fn is_library_loaded(&self, name: &str) -> bool {
        self.context.is_library_loaded(name.trim())
    }

    /// The extractor currently in use.
    pub fn extractor(&self) -> Arc<dyn Extractor> {
        Arc::clone(&self.extractor.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the extractor used by later loads.
    pub fn set_extractor(&self, extractor: Arc<dyn Extractor>) {
        info!(
            extraction_dir = %extractor.extraction_dir().display(),
            "Replacing native library extractor"
        );
        *self
            .extractor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = extractor;
    }

    pub fn context(&self) -> &Arc<NativeContext> {
        &self.context
    }

    /// Configured search roots, tried after the built-in ones.
    pub fn search_roots(&self) -> &[String] {
        &self.search_roots
    }

    /// Extracts `name` from the first candidate directory that has it,
    /// without loading it.
    ///
    /// Searches the same directories in the same order as
    /// [`NativeLoader::load`] but skips the OS library path and the load
    /// registry, and applies no startup policy.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the search, as [`NativeLoader::load`]
    /// would report it.
    pub fn extract_library(
        &self,
        name: &str,
        extra_roots: &[&str],
    ) -> Result<(Candidate, PathBuf), LoadError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LoadError::InvalidName);
        }
        let tag = self.context.platform();
        if !tag.is_known() {
            return Err(self.context.unsupported());
        }

        let phase = self.context.startup().phase();
        self.walk_candidates(phase, tag, name, extra_roots, |candidate, path| {
            Ok((candidate.clone(), path.to_path_buf()))
        })
    }

    fn load_library(
        &self,
        phase: Phase,
        name: &str,
        extra_roots: &[&str],
    ) -> Result<LibraryOrigin, LoadError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LoadError::InvalidName);
        }

        let registry = self.context.registry();
        if let Some(origin) = registry.origin(name) {
            return Ok(origin);
        }

        let tag = self.context.platform();
        if !tag.is_known() {
            return Err(self.context.unsupported());
        }

        let _guard = registry.lock();
        if let Some(origin) = registry.origin(name) {
            debug!(name = %name, "Library loaded by another thread");
            return Ok(origin);
        }

        if self.try_system_first
            && let Some(file_name) = tag.library_file_name(name)
        {
            match self.linker.load_system(&file_name) {
                Ok(library) => {
                    let origin = library.origin().clone();
                    registry.mark_loaded(name, library);
                    info!(name = %name, origin = %origin, "Loaded native library from system path");
                    return Ok(origin);
                }
                Err(err) => {
                    debug!(
                        name = %name,
                        file_name = %file_name,
                        error = %err,
                        "Not on system path"
                    );
                }
            }
        }

        self.walk_candidates(phase, tag, name, extra_roots, |_, path| {
            let library = self.linker.load_path(path)?;
            let origin = library.origin().clone();
            registry.mark_loaded(name, library);
            info!(name = %name, path = %path.display(), "Loaded native library");
            Ok(origin)
        })
    }

    /// Walks the candidate directories, extracting `name` from each until
    /// `accept` takes one of the extracted files.
    ///
    /// A candidate without the resource is skipped. After startup, a candidate
    /// whose copy fails is skipped as well; during startup that failure ends
    /// the walk. When every candidate fails, the last rejection wins over the
    /// last copy failure, which wins over "not found".
    fn walk_candidates<T>(
        &self,
        phase: Phase,
        tag: PlatformTag,
        name: &str,
        extra_roots: &[&str],
        mut accept: impl FnMut(&Candidate, &Path) -> Result<T, LinkError>,
    ) -> Result<T, LoadError> {
        let extractor = self.extractor();
        let roots: Vec<&str> = self
            .search_roots
            .iter()
            .map(String::as_str)
            .chain(extra_roots.iter().copied())
            .collect();

        let mut tried = Vec::new();
        let mut rejected = None;
        let mut copy_failure = None;
        for candidate in Resolver::new(tag).candidate_paths(&roots) {
            tried.push(candidate.directory().to_string());

            let path = match extractor.extract(candidate.directory(), name) {
                Ok(path) => path,
                Err(LoadError::ResourceNotFound { .. }) => {
                    debug!(name = %name, candidate = %candidate, "Not in candidate directory");
                    continue;
                }
                Err(err @ LoadError::ExtractionIo { .. }) if phase == Phase::Running => {
                    warn!(
                        name = %name,
                        candidate = %candidate,
                        error = %err,
                        "Could not extract from candidate directory"
                    );
                    copy_failure = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            match accept(&candidate, &path) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        name = %name,
                        path = %path.display(),
                        error = %err,
                        "OS loader rejected extracted library"
                    );
                    rejected = Some((path, err));
                }
            }
        }

        Err(match (rejected, copy_failure) {
            (Some((path, source)), _) => LoadError::OsLoadRejected {
                path,
                tried,
                source,
            },
            (None, Some(err)) => err,
            (None, None) => LoadError::ResourceNotFound {
                name: name.to_string(),
                platform: tag,
                searched: tried,
            },
        })
    }
}

/// Builder for [`NativeLoader`].
pub struct NativeLoaderBuilder {
    config: LoaderConfig,
    context: Option<Arc<NativeContext>>,
    source: Option<Arc<dyn ResourceSource>>,
    extractor: Option<Arc<dyn Extractor>>,
    linker: Arc<dyn DynamicLinker>,
}

impl fmt::Debug for NativeLoaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLoaderBuilder")
            .field("config", &self.config)
            .field("context", &self.context.is_some())
            .field("source", &self.source)
            .field("extractor", &self.extractor)
            .field("linker", &self.linker)
            .finish()
    }
}

impl Default for NativeLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeLoaderBuilder {
    /// Creates a builder with default configuration.
    ///
    /// # Default Values
    ///
    /// - Resources: the directory of the running executable
    /// - Working directory: `tmplib` under the system temp directory
    /// - Extractor: shared
    /// - Linker: [`LibloadingLinker`]
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
            context: None,
            source: None,
            extractor: None,
            linker: Arc::new(LibloadingLinker),
        }
    }

    /// Replaces every setting with `config`.
    #[must_use]
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares `context` (and with it the load registry) with other loaders.
    #[must_use]
    pub fn with_context(mut self, context: Arc<NativeContext>) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ResourceSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Reads resources from a directory or zip archive at `path`.
    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.resources = Some(path.into());
        self
    }

    /// Uses `extractor` as is; the extractor kind and working directory are
    /// then ignored.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    #[must_use]
    pub fn with_extractor_kind(mut self, kind: ExtractorKind) -> Self {
        self.config.extractor = kind;
        self
    }

    #[must_use]
    pub fn with_linker(mut self, linker: Arc<dyn DynamicLinker>) -> Self {
        self.linker = linker;
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn try_system_first(mut self, enabled: bool) -> Self {
        self.config.try_system_first = enabled;
        self
    }

    /// Adds a search root tried after the built-in ones.
    #[must_use]
    pub fn with_search_root(mut self, root: impl Into<String>) -> Self {
        self.config.search_roots.push(root.into());
        self
    }

    /// Builds the loader.
    ///
    /// Detects the platform and creates the working directory unless an
    /// extractor was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::SourceUnavailable`] if the resource bundle cannot
    /// be opened, or [`LoadError::DirectoryCreationFailed`] if the working
    /// directory cannot be created.
    pub fn build(self) -> Result<NativeLoader, LoadError> {
        let config = self.config;
        let context = self.context.unwrap_or_else(|| {
            Arc::new(NativeContext::with_probe_timeout(
                config.libc_probe_timeout(),
            ))
        });

        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => {
                let source = match self.source {
                    Some(source) => source,
                    None => default_source(&config)?,
                };
                build_extractor(
                    &config.extractor,
                    source,
                    context.platform(),
                    &config.working_dir(),
                )?
            }
        };

        debug!(
            platform = %context.platform(),
            extraction_dir = %extractor.extraction_dir().display(),
            "Built native loader"
        );

        Ok(NativeLoader {
            context,
            extractor: RwLock::new(extractor),
            linker: self.linker,
            try_system_first: config.try_system_first,
            search_roots: config.search_roots,
        })
    }
}

fn default_source(config: &LoaderConfig) -> Result<Arc<dyn ResourceSource>, LoadError> {
    if let Some(path) = &config.resources {
        let source = open_source(path).map_err(|source| LoadError::SourceUnavailable {
            path: path.clone(),
            source,
        })?;
        return Ok(Arc::from(source));
    }

    let exe = std::env::current_exe().map_err(|source| LoadError::SourceUnavailable {
        path: PathBuf::new(),
        source,
    })?;
    let dir = exe.parent().map(PathBuf::from).unwrap_or_default();
    Ok(Arc::new(DirectorySource::new(dir)))
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use tempfile::TempDir;

    use super::*;
    use crate::{
        extractor::DomainExtractor,
        linker::{LinkError, LinkedLibrary},
        platform::{PlatformIdentity, PlatformTag},
        resource::MemorySource,
    };

    /// Linker that "loads" any extracted file unless its contents are
    /// `reject`, and counts every call.
    #[derive(Debug, Default)]
    struct CountingLinker {
        system_libraries: Vec<String>,
        system_calls: AtomicUsize,
        path_calls: AtomicUsize,
        loaded_paths: Mutex<Vec<PathBuf>>,
    }

    impl CountingLinker {
        fn with_system(names: &[&str]) -> Self {
            Self {
                system_libraries: names.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }

        fn path_calls(&self) -> usize {
            self.path_calls.load(Ordering::SeqCst)
        }
    }

    impl DynamicLinker for CountingLinker {
        fn load_system(&self, file_name: &str) -> Result<LinkedLibrary, LinkError> {
            self.system_calls.fetch_add(1, Ordering::SeqCst);
            if self.system_libraries.iter().any(|lib| lib == file_name) {
                Ok(LinkedLibrary::detached(LibraryOrigin::System(
                    file_name.to_string(),
                )))
            } else {
                Err(LinkError::new(format!("{file_name}: cannot open shared object file")))
            }
        }

        fn load_path(&self, path: &Path) -> Result<LinkedLibrary, LinkError> {
            self.path_calls.fetch_add(1, Ordering::SeqCst);
            let contents = fs::read(path).map_err(|err| LinkError::new(err.to_string()))?;
            if contents == b"reject" {
                return Err(LinkError::new("invalid ELF header"));
            }
            self.loaded_paths.lock().unwrap().push(path.to_path_buf());
            Ok(LinkedLibrary::detached(LibraryOrigin::Extracted(
                path.to_path_buf(),
            )))
        }
    }

    /// Source that counts reads of library files.
    #[derive(Debug)]
    struct CountingSource {
        inner: MemorySource,
        reads: AtomicUsize,
    }

    impl ResourceSource for CountingSource {
        fn read(&self, path: &str) -> std::io::Result<Option<Vec<u8>>> {
            let found = self.inner.read(path)?;
            if found.is_some() {
                self.reads.fetch_add(1, Ordering::SeqCst);
            }
            Ok(found)
        }
    }

    /// Source whose entries under `natives/` cannot be read.
    #[derive(Debug)]
    struct CorruptNativesSource {
        inner: MemorySource,
    }

    impl ResourceSource for CorruptNativesSource {
        fn read(&self, path: &str) -> std::io::Result<Option<Vec<u8>>> {
            if path.starts_with("natives/") {
                return Err(std::io::Error::other("corrupt entry"));
            }
            self.inner.read(path)
        }
    }

    fn corrupt_natives_loader(
        temp: &TempDir,
        entries: &[(&str, &str)],
        linker: &Arc<CountingLinker>,
    ) -> NativeLoader {
        NativeLoader::builder()
            .with_context(linux_context())
            .with_source(Arc::new(CorruptNativesSource {
                inner: source(entries),
            }))
            .with_working_dir(temp.path())
            .with_linker(Arc::clone(linker) as Arc<dyn DynamicLinker>)
            .build()
            .unwrap()
    }

    fn source(entries: &[(&str, &str)]) -> MemorySource {
        let mut source = MemorySource::new();
        for (path, contents) in entries {
            source.insert(*path, contents.as_bytes().to_vec());
        }
        source
    }

    fn linux_context() -> Arc<NativeContext> {
        Arc::new(NativeContext::new(PlatformIdentity::fixed(PlatformTag::Linux64)))
    }

    fn loader(
        temp: &TempDir,
        entries: &[(&str, &str)],
        linker: &Arc<CountingLinker>,
    ) -> NativeLoader {
        NativeLoader::builder()
            .with_context(linux_context())
            .with_source(Arc::new(source(entries)))
            .with_working_dir(temp.path())
            .with_linker(Arc::clone(linker) as Arc<dyn DynamicLinker>)
            .build()
            .unwrap()
    }

    #[test]
    fn test_load_finds_library_under_meta_inf_lib() {
        // Arrange
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = loader(
            &temp,
            &[("META-INF/lib/linux_64/libfoo.so", "elf")],
            &linker,
        );

        // Act
        let outcome = loader.load("foo", &[]).unwrap();

        // Assert
        assert_eq!(
            outcome.ok(),
            Some(LibraryOrigin::Extracted(temp.path().join("libfoo.so")))
        );
        assert!(loader.is_library_loaded("foo"));
        assert_eq!(linker.system_calls.load(Ordering::SeqCst), 1);
        assert_eq!(linker.path_calls(), 1);
    }

    #[test]
    fn test_load_prefers_system_library() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::with_system(&["libfoo.so"]));
        let loader = loader(&temp, &[("natives/linux_64/libfoo.so", "elf")], &linker);

        let outcome = loader.load("foo", &[]).unwrap();

        assert_eq!(
            outcome.ok(),
            Some(LibraryOrigin::System("libfoo.so".to_string()))
        );
        assert_eq!(linker.path_calls(), 0);
        assert!(!temp.path().join("libfoo.so").exists());
    }

    #[test]
    fn test_load_skips_system_search_when_disabled() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::with_system(&["libfoo.so"]));
        let loader = NativeLoader::builder()
            .with_context(linux_context())
            .with_source(Arc::new(source(&[("natives/linux_64/libfoo.so", "elf")])))
            .with_working_dir(temp.path())
            .with_linker(Arc::clone(&linker) as Arc<dyn DynamicLinker>)
            .try_system_first(false)
            .build()
            .unwrap();

        let origin = loader.load("foo", &[]).unwrap().into_result().unwrap();

        assert!(matches!(origin, LibraryOrigin::Extracted(_)));
        assert_eq!(linker.system_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let counting = Arc::new(CountingSource {
            inner: source(&[("natives/linux_64/libfoo.so", "elf")]),
            reads: AtomicUsize::new(0),
        });
        let loader = NativeLoader::builder()
            .with_context(linux_context())
            .with_source(Arc::clone(&counting) as Arc<dyn ResourceSource>)
            .with_working_dir(temp.path())
            .with_linker(Arc::clone(&linker) as Arc<dyn DynamicLinker>)
            .build()
            .unwrap();

        let first = loader.load("foo", &[]).unwrap().ok();
        let second = loader.load(" foo ", &[]).unwrap().ok();

        assert_eq!(first, second);
        assert_eq!(counting.reads.load(Ordering::SeqCst), 1);
        assert_eq!(linker.path_calls(), 1);
    }

    #[test]
    fn test_concurrent_loads_extract_and_load_once() {
        // Arrange
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let counting = Arc::new(CountingSource {
            inner: source(&[("natives/linux_64/libfoo.so", "elf")]),
            reads: AtomicUsize::new(0),
        });
        let loader = NativeLoader::builder()
            .with_context(linux_context())
            .with_source(Arc::clone(&counting) as Arc<dyn ResourceSource>)
            .with_working_dir(temp.path())
            .with_linker(Arc::clone(&linker) as Arc<dyn DynamicLinker>)
            .build()
            .unwrap();

        // Act
        let outcomes: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| loader.load("foo", &[]).unwrap().is_available()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Assert
        assert!(outcomes.iter().all(|available| *available));
        assert_eq!(counting.reads.load(Ordering::SeqCst), 1);
        assert_eq!(linker.path_calls(), 1);
        assert_eq!(linker.system_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_fatal_during_startup_and_degrades_after() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = loader(&temp, &[], &linker);

        let failure = loader.load("missing", &[]).unwrap_err();
        assert!(matches!(
            failure.error(),
            LoadError::ResourceNotFound { searched, .. } if searched.len() == 3
        ));
        assert_eq!(failure.platform(), PlatformTag::Linux64);

        loader.mark_startup_completed();
        let outcome = loader.load("missing", &[]).unwrap();

        assert!(matches!(
            outcome,
            Outcome::Unavailable(LoadError::ResourceNotFound { .. })
        ));
        assert!(!loader.is_library_loaded("missing"));
    }

    #[test]
    fn test_rejected_candidate_falls_through_to_next() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = loader(
            &temp,
            &[
                ("natives/linux_64/libfoo.so", "reject"),
                ("META-INF/lib/linux_64/libfoo.so", "elf"),
            ],
            &linker,
        );

        let origin = loader.load("foo", &[]).unwrap().into_result().unwrap();

        assert_eq!(origin, LibraryOrigin::Extracted(temp.path().join("libfoo.so")));
        assert_eq!(linker.path_calls(), 2);
        assert_eq!(fs::read(temp.path().join("libfoo.so")).unwrap(), b"elf");
    }

    #[test]
    fn test_all_candidates_rejected_reports_os_load_rejected() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = loader(&temp, &[("linux_64/libfoo.so", "reject")], &linker);
        loader.mark_startup_completed();

        let outcome = loader.load("foo", &["vendor"]).unwrap();

        let Some(LoadError::OsLoadRejected { tried, .. }) = outcome.error() else {
            panic!("expected OsLoadRejected, got {outcome:?}");
        };
        assert_eq!(
            tried,
            &[
                "natives/linux_64/",
                "linux_64/",
                "META-INF/lib/linux_64/",
                "vendor/linux_64/",
            ]
        );
    }

    #[test]
    fn test_extraction_io_falls_through_to_next_candidate() {
        // Arrange
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = corrupt_natives_loader(
            &temp,
            &[("META-INF/lib/linux_64/libfoo.so", "elf")],
            &linker,
        );

        // Act
        let failure = loader.load("foo", &[]).unwrap_err();
        loader.mark_startup_completed();
        let outcome = loader.load("foo", &[]).unwrap();

        // Assert
        assert!(matches!(
            failure.error(),
            LoadError::ExtractionIo { resource, .. } if resource == "natives/linux_64/libfoo.so"
        ));
        assert_eq!(
            outcome.ok(),
            Some(LibraryOrigin::Extracted(temp.path().join("libfoo.so")))
        );
        assert_eq!(linker.path_calls(), 1);
        assert!(loader.is_library_loaded("foo"));
    }

    #[test]
    fn test_extraction_io_is_reported_when_no_candidate_succeeds() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = corrupt_natives_loader(&temp, &[], &linker);
        loader.mark_startup_completed();

        let outcome = loader.load("foo", &[]).unwrap();

        let Some(LoadError::ExtractionIo { resource, .. }) = outcome.error() else {
            panic!("expected ExtractionIo, got {outcome:?}");
        };
        assert_eq!(resource, "natives/linux_64/libfoo.so");
        assert_eq!(linker.path_calls(), 0);
    }

    #[test]
    fn test_rejection_outranks_extraction_io() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = corrupt_natives_loader(
            &temp,
            &[("META-INF/lib/linux_64/libfoo.so", "reject")],
            &linker,
        );
        loader.mark_startup_completed();

        let outcome = loader.load("foo", &[]).unwrap();

        assert!(matches!(
            outcome.error(),
            Some(LoadError::OsLoadRejected { .. })
        ));
    }

    #[test]
    fn test_extract_library_does_not_load() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::with_system(&["libfoo.so"]));
        let loader = loader(
            &temp,
            &[
                ("natives/linux_64/libfoo.so", "reject"),
                ("META-INF/lib/linux_64/libfoo.so", "elf"),
            ],
            &linker,
        );

        let (candidate, path) = loader.extract_library(" foo ", &[]).unwrap();

        assert_eq!(candidate.directory(), "natives/linux_64/");
        assert_eq!(path, temp.path().join("libfoo.so"));
        assert_eq!(fs::read(&path).unwrap(), b"reject");
        assert_eq!(linker.system_calls.load(Ordering::SeqCst), 0);
        assert_eq!(linker.path_calls(), 0);
        assert!(!loader.is_library_loaded("foo"));
    }

    #[test]
    fn test_extract_library_skips_corrupt_candidate_after_startup() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = corrupt_natives_loader(
            &temp,
            &[("META-INF/lib/linux_64/libfoo.so", "elf")],
            &linker,
        );

        let during_startup = loader.extract_library("foo", &[]);
        loader.mark_startup_completed();
        let (candidate, _) = loader.extract_library("foo", &[]).unwrap();

        assert!(matches!(
            during_startup,
            Err(LoadError::ExtractionIo { .. })
        ));
        assert_eq!(candidate.directory(), "META-INF/lib/linux_64/");
    }

    #[test]
    fn test_load_searches_extra_roots() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = NativeLoader::builder()
            .with_context(linux_context())
            .with_source(Arc::new(source(&[("extra/linux_64/libfoo.so", "elf")])))
            .with_working_dir(temp.path())
            .with_linker(Arc::clone(&linker) as Arc<dyn DynamicLinker>)
            .with_search_root("configured")
            .build()
            .unwrap();

        let origin = loader.load("foo", &["extra/"]).unwrap().into_result();

        assert!(origin.is_ok());
    }

    #[test]
    fn test_unknown_platform_is_unsupported() {
        let temp = TempDir::new().unwrap();
        let context = Arc::new(NativeContext::new(PlatformIdentity::new(
            "haiku",
            "riscv64",
            || -> std::io::Result<bool> { Ok(false) },
        )));
        let loader = NativeLoader::builder()
            .with_context(context)
            .with_source(Arc::new(MemorySource::new()))
            .with_working_dir(temp.path())
            .with_linker(Arc::new(CountingLinker::default()))
            .build()
            .unwrap();

        let failure = loader.load("foo", &[]).unwrap_err();
        assert!(matches!(
            failure.error(),
            LoadError::PlatformUnsupported { .. }
        ));

        loader.mark_startup_completed();
        assert!(!loader.extract_registered().unwrap().is_available());
    }

    #[test]
    fn test_empty_name_is_invalid() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = loader(&temp, &[], &linker);

        let failure = loader.load("   ", &[]).unwrap_err();

        assert!(matches!(failure.into_error(), LoadError::InvalidName));
        assert_eq!(linker.system_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_load_leaves_other_entries_loaded() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = loader(&temp, &[("natives/linux_64/libfoo.so", "elf")], &linker);
        loader.mark_startup_completed();

        assert!(loader.load("foo", &[]).unwrap().is_available());
        assert!(!loader.load("bar", &[]).unwrap().is_available());

        assert!(loader.is_library_loaded("foo"));
        assert_eq!(loader.context().registry().loaded_names(), ["foo"]);
    }

    #[test]
    fn test_domain_extractors_load_distinct_copies() {
        let temp = TempDir::new().unwrap();
        let bundle: Arc<dyn ResourceSource> =
            Arc::new(source(&[("natives/linux_64/libfoo.so", "elf")]));

        let mut loaders = Vec::new();
        let mut origins = Vec::new();
        for _ in 0..2 {
            let linker = Arc::new(CountingLinker::default());
            let loader = NativeLoader::builder()
                .with_context(linux_context())
                .with_source(Arc::clone(&bundle))
                .with_working_dir(temp.path())
                .with_extractor_kind(ExtractorKind::Domain("plugin".to_string()))
                .with_linker(Arc::clone(&linker) as Arc<dyn DynamicLinker>)
                .build()
                .unwrap();
            origins.push(loader.load("foo", &[]).unwrap().into_result().unwrap());
            assert_eq!(linker.path_calls(), 1);
            loaders.push(loader);
        }

        assert_ne!(origins[0], origins[1]);
    }

    #[test]
    fn test_set_extractor_redirects_later_loads() {
        let temp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let entries = [("natives/linux_64/libfoo.so", "elf")];
        let loader = loader(&temp, &entries, &linker);

        let replacement = DomainExtractor::new(
            "replacement",
            Arc::new(source(&entries)),
            PlatformTag::Linux64,
            other.path(),
        )
        .unwrap();
        loader.set_extractor(Arc::new(replacement));

        let origin = loader.load("foo", &[]).unwrap().into_result().unwrap();

        let LibraryOrigin::Extracted(path) = origin else {
            panic!("expected an extracted library");
        };
        assert!(path.starts_with(other.path()));
        assert!(loader.extractor().extraction_dir().starts_with(other.path()));
    }

    #[test]
    fn test_extract_registered_follows_failure_policy() {
        let temp = TempDir::new().unwrap();
        let linker = Arc::new(CountingLinker::default());
        let loader = loader(
            &temp,
            &[
                ("natives/AUTOEXTRACT.LIST", "libdep.so\nlibgone.so\n"),
                ("natives/linux_64/libdep.so", "dep"),
            ],
            &linker,
        );

        let failure = loader.extract_registered().unwrap_err();
        assert_eq!(failure.operation(), "extract_registered");

        loader.mark_startup_completed();
        assert!(!loader.extract_registered().unwrap().is_available());
    }

    #[test]
    fn test_build_reports_unopenable_source() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.jar");

        let err = NativeLoader::builder()
            .with_context(linux_context())
            .with_source_path(&missing)
            .with_working_dir(temp.path())
            .build()
            .unwrap_err();

        assert!(matches!(err, LoadError::SourceUnavailable { .. }));
    }
}
