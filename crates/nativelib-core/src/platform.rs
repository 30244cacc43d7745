//! Host platform detection.
//!
//! Every bundled binary lives under a directory named after the platform it
//! was built for, e.g. `natives/linux_64/libfoo.so`. This module classifies
//! the running process into one of those [`PlatformTag`]s and maps logical
//! library names to the file names the OS linker expects.
//!
//! Detection works from the OS and architecture strings the process was built
//! for, never from hardware probing. On Linux the C library flavor is sniffed
//! by running `ldd --version` through `sh`, which is slow enough that the
//! result is memoized by [`PlatformIdentity`].

use std::{
    fmt, io,
    process::{Command, Stdio},
    str::FromStr,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

/// Shell one-liner that exits with status 0 on a musl host.
const MUSL_PROBE_SCRIPT: &str = "case `ldd --version 2>&1` in *musl*) exit 0 ;; *) exit 1 ;; esac";

/// How often a running libc probe is polled for completion.
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default upper bound for the libc probe subprocess.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Linux,
    Windows,
    MacOs,
    Aix,
    Unknown,
}

impl OsFamily {
    /// Classifies an OS name such as `linux`, `Windows 10` or `macos`.
    pub fn classify(os_name: &str) -> Self {
        let name = os_name.to_lowercase();
        if name.contains("nix") || name.contains("nux") {
            Self::Linux
        } else if name.contains("aix") {
            Self::Aix
        } else if name.contains("mac") || name.contains("darwin") {
            // Checked before `win`, which `darwin` also contains.
            Self::MacOs
        } else if name.contains("win") {
            Self::Windows
        } else {
            Self::Unknown
        }
    }
}

/// CPU family and word size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Ppc,
    Ppc64,
    Unknown,
}

impl Processor {
    /// Classifies an architecture string such as `x86_64`, `amd64`, `aarch64`
    /// or `powerpc64`.
    pub fn classify(arch: &str) -> Self {
        let arch = arch.to_lowercase();
        let wide = arch.contains("64");
        if arch.contains("aarch64") || arch.contains("arm64") {
            Self::Aarch64
        } else if arch.contains("arm") {
            Self::Arm
        } else if arch.contains("ppc") || arch.contains("powerpc") {
            if wide { Self::Ppc64 } else { Self::Ppc }
        } else if arch.contains("86") || arch.contains("amd") {
            if wide { Self::X86_64 } else { Self::X86 }
        } else {
            Self::Unknown
        }
    }
}

/// C library flavor of a Linux host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LibcVariant {
    #[default]
    Glibc,
    Musl,
}

/// Canonical identifier of the platform a native binary was built for.
///
/// The string form (see [`PlatformTag::as_str`]) is the directory name used
/// inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformTag {
    Linux32,
    Linux64,
    LinuxMusl32,
    LinuxMusl64,
    LinuxArm,
    LinuxArm64,
    Windows32,
    Windows64,
    Osx32,
    Osx64,
    OsxPpc,
    Aix32,
    Aix64,
    Unknown,
}

impl PlatformTag {
    /// Every tag, `Unknown` last.
    pub const ALL: [Self; 14] = [
        Self::Linux32,
        Self::Linux64,
        Self::LinuxMusl32,
        Self::LinuxMusl64,
        Self::LinuxArm,
        Self::LinuxArm64,
        Self::Windows32,
        Self::Windows64,
        Self::Osx32,
        Self::Osx64,
        Self::OsxPpc,
        Self::Aix32,
        Self::Aix64,
        Self::Unknown,
    ];

    /// Combines the classified parts into a tag.
    ///
    /// Combinations without a packaging convention (for example musl on ARM,
    /// or ARM on Windows) map to [`PlatformTag::Unknown`].
    pub fn from_parts(os: OsFamily, processor: Processor, libc: LibcVariant) -> Self {
        match (os, processor, libc) {
            (OsFamily::Linux, Processor::X86, LibcVariant::Glibc) => Self::Linux32,
            (OsFamily::Linux, Processor::X86_64, LibcVariant::Glibc) => Self::Linux64,
            (OsFamily::Linux, Processor::X86, LibcVariant::Musl) => Self::LinuxMusl32,
            (OsFamily::Linux, Processor::X86_64, LibcVariant::Musl) => Self::LinuxMusl64,
            (OsFamily::Linux, Processor::Arm, LibcVariant::Glibc) => Self::LinuxArm,
            (OsFamily::Linux, Processor::Aarch64, LibcVariant::Glibc) => Self::LinuxArm64,
            (OsFamily::Aix, Processor::Ppc, _) => Self::Aix32,
            (OsFamily::Aix, Processor::Ppc64, _) => Self::Aix64,
            (OsFamily::Windows, Processor::X86, _) => Self::Windows32,
            (OsFamily::Windows, Processor::X86_64, _) => Self::Windows64,
            (OsFamily::MacOs, Processor::X86, _) => Self::Osx32,
            (OsFamily::MacOs, Processor::X86_64, _) => Self::Osx64,
            (OsFamily::MacOs, Processor::Ppc, _) => Self::OsxPpc,
            _ => Self::Unknown,
        }
    }

    /// Directory name of this platform inside the archive.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux32 => "linux_32",
            Self::Linux64 => "linux_64",
            Self::LinuxMusl32 => "linux_musl32",
            Self::LinuxMusl64 => "linux_musl64",
            Self::LinuxArm => "linux_arm",
            Self::LinuxArm64 => "linux_arm64",
            Self::Windows32 => "windows_32",
            Self::Windows64 => "windows_64",
            Self::Osx32 => "osx_32",
            Self::Osx64 => "osx_64",
            Self::OsxPpc => "osx_ppc",
            Self::Aix32 => "aix_32",
            Self::Aix64 => "aix_64",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `false` for [`PlatformTag::Unknown`], on which no native
    /// library can be loaded.
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Platform-specific file name of the library `logical_name`.
    ///
    /// `foo` becomes `libfoo.so` on Linux and AIX, `foo.dll` on Windows and
    /// `libfoo.dylib` on macOS. Returns `None` on an unknown platform.
    pub fn library_file_name(self, logical_name: &str) -> Option<String> {
        match self {
            Self::Linux32
            | Self::Linux64
            | Self::LinuxMusl32
            | Self::LinuxMusl64
            | Self::LinuxArm
            | Self::LinuxArm64
            | Self::Aix32
            | Self::Aix64 => Some(format!("lib{logical_name}.so")),
            Self::Windows32 | Self::Windows64 => Some(format!("{logical_name}.dll")),
            Self::Osx32 | Self::Osx64 | Self::OsxPpc => Some(format!("lib{logical_name}.dylib")),
            Self::Unknown => None,
        }
    }

    /// Legacy file name tried when the primary one is absent.
    ///
    /// Only macOS has one: older bundles shipped `libfoo.jnilib`.
    pub fn alternate_file_name(self, logical_name: &str) -> Option<String> {
        match self {
            Self::Osx32 | Self::Osx64 | Self::OsxPpc => Some(format!("lib{logical_name}.jnilib")),
            _ => None,
        }
    }

    /// Primary and alternate file names, in lookup order.
    pub fn file_names(self, logical_name: &str) -> Vec<String> {
        self.library_file_name(logical_name)
            .into_iter()
            .chain(self.alternate_file_name(logical_name))
            .collect()
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognized platform tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized platform tag: {0}")]
pub struct ParsePlatformTagError(String);

impl FromStr for PlatformTag {
    type Err = ParsePlatformTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == wanted)
            .ok_or_else(|| ParsePlatformTagError(s.to_string()))
    }
}

/// Appends an optional version suffix to a logical name.
///
/// `versioned_name("foo", "1.2")` is `foo-1.2`; an empty version leaves the
/// name untouched.
pub fn versioned_name(logical_name: &str, version: &str) -> String {
    let version = version.trim();
    if version.is_empty() {
        logical_name.to_string()
    } else {
        format!("{logical_name}-{version}")
    }
}

/// Decides whether the host runs on musl.
///
/// Any error is treated by [`PlatformIdentity`] as "not musl".
pub trait LibcProbe: Send + Sync {
    /// Returns `Ok(true)` on a musl host.
    ///
    /// # Errors
    ///
    /// Returns an error when the probe could not reach a verdict.
    fn is_musl(&self) -> io::Result<bool>;
}

impl<F> LibcProbe for F
where
    F: Fn() -> io::Result<bool> + Send + Sync,
{
    fn is_musl(&self) -> io::Result<bool> {
        self()
    }
}

/// Probes the C library by asking `ldd` for its version banner.
#[derive(Debug, Clone, Copy)]
pub struct ShellLibcProbe {
    timeout: Duration,
    program: &'static str,
    args: &'static [&'static str],
}

impl ShellLibcProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            program: "sh",
            args: &["-c", MUSL_PROBE_SCRIPT],
        }
    }

    /// Runs `program args` instead of the `ldd` script; exit status 0 means
    /// musl.
    #[cfg(test)]
    fn with_command(
        timeout: Duration,
        program: &'static str,
        args: &'static [&'static str],
    ) -> Self {
        Self {
            timeout,
            program,
            args,
        }
    }
}

impl Default for ShellLibcProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl LibcProbe for ShellLibcProbe {
    fn is_musl(&self) -> io::Result<bool> {
        let mut child = Command::new(self.program)
            .args(self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.success());
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("libc probe did not finish within {:?}", self.timeout),
                ));
            }
            thread::sleep(PROBE_POLL_INTERVAL);
        }
    }
}

fn assume_glibc() -> io::Result<bool> {
    Ok(false)
}

/// Memoized platform detection.
///
/// The tag is computed on the first call to [`PlatformIdentity::detect`] and
/// never again, even when several threads race on that first call.
pub struct PlatformIdentity {
    os_name: String,
    arch: String,
    probe: Box<dyn LibcProbe>,
    tag: OnceLock<PlatformTag>,
}

impl fmt::Debug for PlatformIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformIdentity")
            .field("os_name", &self.os_name)
            .field("arch", &self.arch)
            .field("tag", &self.tag.get())
            .finish_non_exhaustive()
    }
}

impl PlatformIdentity {
    /// Identity of the running process, probing libc with the given timeout.
    pub fn host(probe_timeout: Duration) -> Self {
        Self::new(
            std::env::consts::OS,
            std::env::consts::ARCH,
            ShellLibcProbe::new(probe_timeout),
        )
    }

    /// Identity built from explicit OS and architecture strings.
    pub fn new(
        os_name: impl Into<String>,
        arch: impl Into<String>,
        probe: impl LibcProbe + 'static,
    ) -> Self {
        Self {
            os_name: os_name.into(),
            arch: arch.into(),
            probe: Box::new(probe),
            tag: OnceLock::new(),
        }
    }

    /// Identity pinned to `tag`; no detection ever runs.
    pub fn fixed(tag: PlatformTag) -> Self {
        Self {
            os_name: tag.as_str().to_string(),
            arch: tag.as_str().to_string(),
            probe: Box::new(assume_glibc),
            tag: OnceLock::from(tag),
        }
    }

    /// OS name the identity classifies.
    pub fn os_name(&self) -> &str {
        &self.os_name
    }

    /// Architecture string the identity classifies.
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Returns the platform tag, computing it on first use.
    pub fn detect(&self) -> PlatformTag {
        *self.tag.get_or_init(|| self.compute())
    }

    fn compute(&self) -> PlatformTag {
        let processor = Processor::classify(&self.arch);
        let os = OsFamily::classify(&self.os_name);

        let libc = if os == OsFamily::Linux && processor != Processor::Unknown {
            match self.probe.is_musl() {
                Ok(true) => LibcVariant::Musl,
                Ok(false) => LibcVariant::Glibc,
                Err(err) => {
                    warn!(error = %err, "Problem detecting libc, assuming glibc");
                    LibcVariant::Glibc
                }
            }
        } else {
            LibcVariant::Glibc
        };

        let tag = PlatformTag::from_parts(os, processor, libc);
        debug!(
            os_name = %self.os_name,
            arch = %self.arch,
            ?os,
            ?processor,
            ?libc,
            platform = %tag,
            "Detected platform"
        );
        tag
    }
}
