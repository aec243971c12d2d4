use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use crate::checks::{CheckResult, Probe, ProbeReport, unavailable};

const MIN_CPU_CORES: usize = 2;
const MIN_AVAILABLE_MEMORY_MIB: u64 = 2048;
const MIN_FREE_DISK_MIB: u64 = 5 * 1024;
const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(3);

/// Host operating system and architecture.
pub struct OsProbe;

impl Probe for OsProbe {
    fn name(&self) -> &str {
        "Operating system"
    }

    fn run(&self) -> CheckResult<ProbeReport> {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let report = match os {
            "linux" | "macos" => ProbeReport::ok(format!("{os} ({arch})")),
            "windows" => ProbeReport::warning(format!("{os} ({arch})"))
                .suggest("builds are only exercised on Linux and macOS; consider WSL"),
            other => ProbeReport::warning(format!("{other} ({arch}) is not a known build host")),
        };
        Ok(report.detail(format!("family: {}", std::env::consts::FAMILY)))
    }
}

pub struct CpuProbe;

impl Probe for CpuProbe {
    fn name(&self) -> &str {
        "CPU cores"
    }

    fn run(&self) -> CheckResult<ProbeReport> {
        let cores = std::thread::available_parallelism()
            .map_err(|error| unavailable(format!("could not query parallelism: {error}")))?
            .get();

        if cores >= MIN_CPU_CORES {
            Ok(ProbeReport::ok(format!("{cores} cores available")))
        } else {
            Ok(ProbeReport::warning(format!("{cores} core available"))
                .suggest("builds will be slow; limit concurrent installs to 1"))
        }
    }
}

pub struct MemoryProbe;

impl Probe for MemoryProbe {
    fn name(&self) -> &str {
        "Memory"
    }

    fn run(&self) -> CheckResult<ProbeReport> {
        let meminfo = std::fs::read_to_string("/proc/meminfo")
            .map_err(|error| unavailable(format!("could not read /proc/meminfo: {error}")))?;
        let available_kib = parse_meminfo_available(&meminfo)
            .ok_or_else(|| unavailable("MemAvailable missing from /proc/meminfo"))?;
        let available_mib = available_kib / 1024;

        if available_mib >= MIN_AVAILABLE_MEMORY_MIB {
            Ok(ProbeReport::ok(format!("{available_mib} MiB available")))
        } else {
            Ok(ProbeReport::warning(format!("{available_mib} MiB available"))
                .detail(format!("recommended: {MIN_AVAILABLE_MEMORY_MIB} MiB"))
                .suggest("close memory-heavy programs before building"))
        }
    }
}

/// `MemAvailable` in KiB.
pub fn parse_meminfo_available(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Free space on the filesystem holding `path`.
pub struct DiskProbe {
    path: PathBuf,
}

impl DiskProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Probe for DiskProbe {
    fn name(&self) -> &str {
        "Disk space"
    }

    fn run(&self) -> CheckResult<ProbeReport> {
        let free_mib = free_space_bytes(&self.path)? / (1024 * 1024);
        let location = format!("checked at {}", self.path.display());

        if free_mib >= MIN_FREE_DISK_MIB {
            Ok(ProbeReport::ok(format!("{free_mib} MiB free")).detail(location))
        } else {
            Ok(ProbeReport::error(format!("{free_mib} MiB free"))
                .detail(location)
                .detail(format!("required: {MIN_FREE_DISK_MIB} MiB"))
                .suggest("free up disk space before installing"))
        }
    }
}

#[cfg(unix)]
fn free_space_bytes(path: &std::path::Path) -> CheckResult<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| unavailable(format!("path contains a NUL byte: {}", path.display())))?;
    let mut stats = std::mem::MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: c_path is NUL-terminated and stats points to writable memory of the right size.
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stats.as_mut_ptr()) };
    if result != 0 {
        return Err(unavailable(format!(
            "statvfs failed for {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }

    // SAFETY: statvfs returned 0, so the struct is initialised.
    let stats = unsafe { stats.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    let free = stats.f_bavail as u64 * stats.f_frsize as u64;
    Ok(free)
}

#[cfg(not(unix))]
fn free_space_bytes(_path: &std::path::Path) -> CheckResult<u64> {
    Err(unavailable("free space query is only supported on unix"))
}

/// TCP reachability of a host used for downloads.
pub struct NetworkProbe {
    address: String,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Probe for NetworkProbe {
    fn name(&self) -> &str {
        "Network"
    }

    fn run(&self) -> CheckResult<ProbeReport> {
        let addresses: Vec<SocketAddr> = match self.address.to_socket_addrs() {
            Ok(addresses) => addresses.collect(),
            Err(error) => {
                return Ok(ProbeReport::warning(format!(
                    "could not resolve {}",
                    self.address
                ))
                .detail(error.to_string())
                .suggest("check DNS settings or proxy configuration"));
            }
        };

        let mut last_error = None;
        for address in &addresses {
            match TcpStream::connect_timeout(address, self.timeout) {
                Ok(_) => return Ok(ProbeReport::ok(format!("{} reachable", self.address))),
                Err(error) => last_error = Some(error),
            }
        }

        let mut report = ProbeReport::warning(format!("{} unreachable", self.address))
            .suggest("downloads will fail without network access");
        if let Some(error) = last_error {
            report = report.detail(error.to_string());
        }
        Ok(report)
    }
}

/// Presence and version of an external command.
pub struct CommandProbe {
    name: String,
    program: String,
    args: Vec<String>,
    required: bool,
    suggestion: Option<String>,
}

impl CommandProbe {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: vec!["--version".to_string()],
            required: true,
            suggestion: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    fn missing(&self, message: String) -> ProbeReport {
        let report = if self.required {
            ProbeReport::error(message)
        } else {
            ProbeReport::warning(message)
        };
        match &self.suggestion {
            Some(suggestion) => report.suggest(suggestion.clone()),
            None => report,
        }
    }
}

impl Probe for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> CheckResult<ProbeReport> {
        let output = match Command::new(&self.program).args(&self.args).output() {
            Ok(output) => output,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(self.missing(format!("{} not found", self.program)));
            }
            Err(error) => {
                return Err(unavailable(format!(
                    "failed to run {}: {error}",
                    self.program
                )));
            }
        };

        if !output.status.success() {
            return Ok(self.missing(format!("{} exited with {}", self.program, output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let version = first_line(&stdout)
            .or_else(|| first_line(&stderr))
            .unwrap_or("version unknown");
        Ok(ProbeReport::ok(version.to_string()).detail(format!("program: {}", self.program)))
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

/// The standard host checks, in display order.
pub fn default_probes(network_host: &str, disk_path: impl Into<PathBuf>) -> Vec<Arc<dyn Probe>> {
    vec![
        Arc::new(OsProbe),
        Arc::new(CpuProbe),
        Arc::new(MemoryProbe),
        Arc::new(DiskProbe::new(disk_path)),
        Arc::new(NetworkProbe::new(network_host)),
        Arc::new(CommandProbe::new("Git", "git").suggest("install git from your package manager")),
        Arc::new(
            CommandProbe::new("C compiler", "cc")
                .suggest("install build-essential (Debian) or Xcode command line tools (macOS)"),
        ),
        Arc::new(CommandProbe::new("Make", "make").suggest("install GNU make")),
        Arc::new(
            CommandProbe::new("Cargo", "cargo")
                .optional()
                .suggest("install a Rust toolchain with rustup"),
        ),
    ]
}
