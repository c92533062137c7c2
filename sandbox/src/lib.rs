//! This crate implements a sandbox for the judge. The sandbox is responsible
//! for executing tasks in a safe and monitored environment.
//!
//! The sandbox implements:
//!
//! * Normal process operations: create, start, monitor and kill a process;
//!
//! * Resource limits: CPU time limits, real time limits and memory limits;
//!
//! * Redirections: redirects stdin, stdout and stderr of child processes to
//! specific file descriptors;
//!
//! * Process syscall filter: filter out unexpected syscalls by seccomp feature, selected by a
//! named policy rather than an ad-hoc blacklist built by the caller;
//!
//! * Privilege drop: set the effective uid/gid of the child process before `execve`.
//!
//! The grading core treats this crate as an already-designed, external primitive: see the
//! `Executor` trait at the bottom of this file. Callers build an `ExecutorInvocation` and read
//! back a `SandboxOutcome`; they never reach into `ProcessBuilder` directly.
//!

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate libc;
extern crate nix;
extern crate seccomp_sys;
extern crate procinfo;


mod daemon;
mod seccomp;
mod misc;
mod rlimits;
pub mod policy;

use std::cmp::Ordering;
use std::ffi::CString;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::IntoRawFd;

use nix::sys::signal::Signal;
use nix::unistd::{Uid, Gid, ForkResult};

use daemon::{ProcessDaemonContext, DaemonThreadJoinHandle};
use rlimits::Resource;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
        Nix(::nix::Error);
        Seccomp(seccomp::SeccompError);
    }

    errors {
        InvalidProcessArgument(arg: String) {
            description("invalid argv")
        }

        InvalidEnvironmentVariable(env: String) {
            description("invalid env")
        }

        UnknownSeccompPolicy(name: String) {
            description("unknown seccomp policy")
            display("unknown seccomp policy: \"{}\"", name)
        }

        DaemonJoinFailed {
            description("failed to join the daemon thread")
        }

        ChildStartupFailed {
            description("failed to launch child process")
        }
    }
}


/// Measurement of the size of a block of memory.
#[derive(Clone, Copy, Debug, Eq)]
pub enum MemorySize {
    /// Measurement in bytes.
    Bytes(usize),

    /// Measurement in kilobytes.
    KiloBytes(usize),

    /// Measurement in megabytes.
    MegaBytes(usize),

    /// Measurement in gigabytes.
    GigaBytes(usize),

    /// Measurement in terabytes.
    TeraBytes(usize)
}

impl MemorySize {
    /// Convert the current measurement to memory size in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            MemorySize::Bytes(s) => *s,
            MemorySize::KiloBytes(s) => s * 1024,
            MemorySize::MegaBytes(s) => s * 1024 * 1024,
            MemorySize::GigaBytes(s) => s * 1024 * 1024 * 1024,
            MemorySize::TeraBytes(s) => s * 1024 * 1024 * 1024 * 1024
        }
    }
}

impl PartialEq for MemorySize {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for MemorySize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemorySize {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes().cmp(&other.bytes())
    }
}

impl From<usize> for MemorySize {
    fn from(value: usize) -> MemorySize {
        MemorySize::Bytes(value)
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySize::Bytes(s) => f.write_fmt(format_args!("{} B", s)),
            MemorySize::KiloBytes(s) => f.write_fmt(format_args!("{} KB", s)),
            MemorySize::MegaBytes(s) => f.write_fmt(format_args!("{} MB", s)),
            MemorySize::GigaBytes(s) => f.write_fmt(format_args!("{} GB", s)),
            MemorySize::TeraBytes(s) => f.write_fmt(format_args!("{} TB", s))
        }
    }
}

/// Specify limits on time and memory resources.
#[derive(Clone, Copy)]
pub struct ProcessResourceLimits {
    /// Limit on CPU time available for the child process. `None` if no
    /// constraits are set.
    pub cpu_time_limit: Option<Duration>,

    /// Limit on real time available for the child process. `None` if no
    /// constraits are set.
    pub real_time_limit: Option<Duration>,

    /// Limit on memory available for the child process. `None` if no constraits
    /// are set.
    pub memory_limit: Option<MemorySize>,

    /// Limit on the number of bytes the child process may write to its redirected output. `None`
    /// if no constraint is set. The native `rlimit` mechanism has no per-file-descriptor size
    /// limit, so this is enforced by the daemon thread polling the redirected file's length.
    pub output_size_limit: Option<MemorySize>,

    /// Limit on the child process's stack size. `None` if no constraint is set.
    pub stack_limit: Option<MemorySize>,

    /// Limit on the number of processes (and threads) the child's real user ID may own. `None`
    /// means unlimited, so no `RLIMIT_NPROC` is applied at all.
    pub process_number_limit: Option<u64>,
}

impl ProcessResourceLimits {
    /// Create a new `ProcessResourceLimits` instance that contains no
    /// constraits.
    fn empty() -> ProcessResourceLimits {
        ProcessResourceLimits {
            cpu_time_limit: None,
            real_time_limit: None,
            memory_limit: None,
            output_size_limit: None,
            stack_limit: None,
            process_number_limit: None,
        }
    }
}

impl Default for ProcessResourceLimits {
    fn default() -> ProcessResourceLimits {
        ProcessResourceLimits::empty()
    }
}

/// Specify redirections of standard streams.
pub struct ProcessRedirection {
    /// Redirected `stdin`, or `None` if `stdin` does not need to be redirected.
    pub stdin: Option<File>,

    /// Redirected `stdout`, or `None` if `stdout` does not need to be
    /// redirected.
    pub stdout: Option<File>,

    /// Redirected `stderr`, or `None` if `stderr` does not need to be
    /// redirected.
    pub stderr: Option<File>
}

impl ProcessRedirection {
    /// Create a new `ProcessRedirection` instance representing that neither
    /// `stdin`, `stdout` nor `stderr` need to be redirected.
    fn empty() -> ProcessRedirection {
        ProcessRedirection {
            stdin: None,
            stdout: None,
            stderr: None
        }
    }
}

impl Default for ProcessRedirection {
    fn default() -> ProcessRedirection {
        ProcessRedirection::empty()
    }
}

/// Type for representing a user identification.
pub type UserId = u32;

/// Type for representing a group identification.
pub type GroupId = u32;

/// Type for process identifiers.
pub type Pid = i32;

/// The type of syscall identifiers.
pub type SyscallId = i32;

/// Provide mechanism to build a child process in sandboxed environment.
pub struct ProcessBuilder {
    /// Path to the executable file.
    file: PathBuf,

    /// Arguments passed to the child process.
    args: Vec<String>,

    /// Environment variables passed to the child process.
    envs: Vec<(String, String)>,

    /// Working directory of the child process.
    pub working_dir: Option<PathBuf>,

    /// Limits to be applied to the new child process.
    pub limits: ProcessResourceLimits,

    /// Whether to use native rlimit mechanism to limit the resource usage of
    /// the child process. If you choose to use native rlimit mechanism, then
    /// the sandbox cannot report `TimeLimitExceeded` and `MemoryLimitExceeded`
    /// error, and the real time limit will not be applied.
    pub use_native_rlimit: bool,

    /// Redirections to be applied to the new child process.
    pub redirections: ProcessRedirection,

    /// Effective user ID of the new child process.
    pub uid: Option<UserId>,

    /// Effective group ID of the new child process.
    pub gid: Option<GroupId>,

    /// Name of the seccomp policy to apply to the new child process, resolved through the
    /// `policy` module. `None` means no syscall filtering is installed (the compiler runs
    /// unfiltered; only the judgee is policy-restricted).
    pub seccomp_policy: Option<String>,

    /// Path of the file `stdout` is redirected to, kept around only so the daemon thread can
    /// poll its size against `limits.output_size_limit`. Not used for anything else.
    pub output_watch_path: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new `ProcessBuilder` instance, given the executable file's
    /// path.
    pub fn new(file: &Path) -> ProcessBuilder {
        ProcessBuilder {
            file: file.to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,

            limits: ProcessResourceLimits::empty(),
            use_native_rlimit: false,
            redirections: ProcessRedirection::empty(),
            uid: None,
            gid: None,

            seccomp_policy: None,
            output_watch_path: None,
        }
    }

    /// Add an argument to the child process. If the given argument is not a
    /// valid C-style string, then returns `Err(e)` where the error kind of `e`
    /// is `ErrorKind::InvalidProcessArgument`.
    pub fn add_arg(&mut self, arg: &str) -> Result<()> {
        if misc::is_valid_c_string(arg) {
            self.args.push(arg.to_owned());
            Ok(())
        } else {
            bail!(ErrorKind::InvalidProcessArgument(arg.to_owned()));
        }
    }

    /// Add an environment variable to the child process.
    pub fn add_env(&mut self, name: &str, value: &str) -> Result<()> {
        if !misc::is_valid_c_string(name) {
            bail!(ErrorKind::InvalidEnvironmentVariable(name.to_owned()));
        }
        if !misc::is_valid_c_string(value) {
            bail!(ErrorKind::InvalidEnvironmentVariable(value.to_owned()));
        }
        if name.as_bytes().contains(&b'=') {
            bail!(ErrorKind::InvalidEnvironmentVariable(name.to_owned()));
        }
        if value.as_bytes().contains(&b'=') {
            bail!(ErrorKind::InvalidEnvironmentVariable(value.to_owned()));
        }

        self.envs.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    /// Add all environment variables in the calling process to the environment
    /// variables of the child process.
    pub fn inherit_env(&mut self) {
        for (name, value) in std::env::vars() {
            self.add_env(&name, &value)
                .expect("invalid environment variable in current process.");
        }
    }

    /// Determine whether seccomp need to be enabled to filter syscall sequence.
    fn need_syscall_filter(&self) -> bool {
        self.seccomp_policy.is_some()
    }

    /// Apply working directory changes to the calling process.
    fn apply_working_directory(&self) -> Result<()> {
        if self.working_dir.is_some() {
            nix::unistd::chdir(self.working_dir.as_ref().unwrap().as_path())?;
        }

        Ok(())
    }

    /// Apply resource limits using native `rlimit` mechanism to the calling
    /// process.
    fn apply_native_rlimits(&self) -> Result<()> {
        if self.use_native_rlimit {
            if self.limits.cpu_time_limit.is_some() {
                rlimits::setrlimit_hard(Resource::CPUTime,
                    self.limits.cpu_time_limit.unwrap().as_secs())?;
            }
            if self.limits.memory_limit.is_some() {
                rlimits::setrlimit_hard(Resource::AddressSpace,
                    self.limits.memory_limit.unwrap().bytes() as u64)?;
            }
            if self.limits.stack_limit.is_some() {
                rlimits::setrlimit_hard(Resource::Stack,
                    self.limits.stack_limit.unwrap().bytes() as u64)?;
            }
            if self.limits.process_number_limit.is_some() {
                rlimits::setrlimit_hard(Resource::NumProcesses,
                    self.limits.process_number_limit.unwrap())?;
            }
            // The real time limit is ignored here.
        }

        Ok(())
    }

    /// Apply redirections specified in `self.redirections` to the calling
    /// process.
    fn apply_redirections(&mut self) -> Result<()> {
        if self.redirections.stdin.is_some() {
            nix::unistd::dup2(
                self.redirections.stdin.take().unwrap().into_raw_fd(),
                libc::STDIN_FILENO)?;
        }
        if self.redirections.stdout.is_some() {
            nix::unistd::dup2(
                self.redirections.stdout.take().unwrap().into_raw_fd(),
                libc::STDOUT_FILENO)?;
        }
        if self.redirections.stderr.is_some() {
            nix::unistd::dup2(
                self.redirections.stderr.take().unwrap().into_raw_fd(),
                libc::STDERR_FILENO)?;
        }

        Ok(())
    }

    /// Set the effective group ID and then the effective user ID of the calling process. Group
    /// must be dropped before user: once the uid is non-root, `setgid` would fail.
    fn apply_identity(&self) -> Result<()> {
        if self.gid.is_some() {
            nix::unistd::setgid(Gid::from_raw(self.gid.unwrap()))?;
        }
        if self.uid.is_some() {
            nix::unistd::setuid(Uid::from_raw(self.uid.unwrap()))?;
        }

        Ok(())
    }

    /// Apply seccomp to the calling process to filter syscall sequence, resolving
    /// `self.seccomp_policy` through the `policy` module.
    fn apply_seccomp(&self) -> Result<()> {
        if self.need_syscall_filter() {
            let name = self.seccomp_policy.as_ref().unwrap();
            let filters = policy::resolve(name)
                .ok_or_else(|| Error::from(ErrorKind::UnknownSeccompPolicy(name.clone())))?;
            // If the child process calls any syscall not covered by the policy, the kernel will
            // immediately kill the child process, as though it has been killed by the delivery
            // of a `SIGSYS` signal.
            seccomp::apply_syscall_filters(filters)?;
        }

        Ok(())
    }

    /// Start child process. This function will be called after `fork` in the
    /// child process. This function initializes necessary components in the
    /// child process (e.g. redirections, `setuid`, seccomp, etc.) and then
    /// calls `execve`.
    fn start_child(mut self) -> Result<()> {
        // TODO: Change the return type of this function to Result<!> after the
        // TODO: `!` type stablizes.

        // Build argv and envs into native format.
        let native_file = CString::new(
                Vec::from(self.file.as_os_str().as_bytes()))
            .unwrap();
        let native_argv = self.args.iter()
            .map(|arg| CString::new(arg.clone()).unwrap())
            .collect::<Vec<CString>>();
        let native_envs = self.envs.iter()
            .map(|env| format!("{}={}", env.0, env.1))
            .map(|env| CString::new(env).unwrap())
            .collect::<Vec<CString>>();

        // Apply redirections.
        self.apply_redirections()?;

        // Apply working directory changes.
        self.apply_working_directory()?;

        // Apply native resource limits.
        self.apply_native_rlimits()?;

        // Install the seccomp filter before dropping privileges: building the filter itself
        // needs no special capability, so the ordering relative to `apply_identity` does not
        // matter for correctness, but doing it first keeps the "drop privileges last" rule
        // uniform regardless of whether a policy is configured.
        self.apply_seccomp()?;

        // Drop to the target identity last, right before execve.
        self.apply_identity()?;

        // Finally, execve!
        nix::unistd::execve(
            &native_file, native_argv.as_ref(), native_envs.as_ref())?;

        unreachable!()
    }

    /// Initializes any necessary components in the parent process to monitor
    /// the states of the child process. This function should be called after
    /// `fork` in the parent process.
    fn start_parent(self, child_pid: Pid) -> Process {
        let daemon_limits = if self.use_native_rlimit {
            None
        } else {
            Some(self.limits)
        };

        Process::attach(child_pid, daemon_limits, self.output_watch_path)
    }

    /// Start the process in a sandboxed environment.
    pub fn start(self) -> Result<Process> {
        match nix::unistd::fork()? {
            ForkResult::Parent { child } =>
                Ok(self.start_parent(child.as_raw())),
            ForkResult::Child => {
                match self.start_child() {
                    Ok(..) => unreachable!(),
                    Err(e) => {
                        eprintln!("failed to start child process: {}", e);
                        // Send a `SIGUSR1` signal to self to terminate self
                        // and notify the daemon thread.
                        nix::sys::signal::kill(
                                nix::unistd::getpid(), Signal::SIGUSR1)
                            .expect("cannot kill self.");
                        // Sit in a tight loop, wait to be killed by the
                        // delivery of the `SIGUSR1` signal whose default
                        // handling behavior is killing the target process.
                        loop { }
                    }
                }
            }
        }
    }
}

/// Type for the exit codes of processes.
pub type ProcessExitCode = i32;

/// Exit status of a sandboxed process.
#[derive(Clone)]
pub enum ProcessExitStatus {
    /// The process has not exited yet.
    NotExited,

    /// The process exited normally.
    Normal(ProcessExitCode),

    /// The process was killed by the delivery of a signal.
    KilledBySignal(Signal),

    /// The process was killed by the daemon due to CPU time limit.
    CPUTimeLimitExceeded,

    /// The process was killed by the daemon due to real time limit.
    RealTimeLimitExceeded,

    /// The process was killed by the daemon due to memory limit.
    MemoryLimitExceeded,

    /// The process was killed by the daemon because it wrote more output than allowed.
    OutputLimitExceeded,

    /// The process was killed by the daemon due to its invocation to a banned
    /// system call.
    BannedSyscall,

    /// The process was killed by the daemon due to internal errors in the
    /// daemon.
    SandboxError { err_msg: String }
}

impl Default for ProcessExitStatus {
    fn default() -> ProcessExitStatus {
        ProcessExitStatus::NotExited
    }
}

impl ProcessExitStatus {
    /// Get the exit code of the process if it exited normally.
    pub fn exit_code(&self) -> Option<ProcessExitCode> {
        match self {
            ProcessExitStatus::Normal(code) => Some(*code),
            _ => None
        }
    }

    /// Get the signal that killed the process, if any.
    pub fn signal(&self) -> Option<Signal> {
        match self {
            ProcessExitStatus::KilledBySignal(sig) => Some(*sig),
            ProcessExitStatus::BannedSyscall => Some(Signal::SIGSYS),
            _ => None
        }
    }
}

/// High level classification of a sandboxed invocation's outcome. This is the taxonomy the
/// grading core's verdicts are built from: it collapses the finer-grained `ProcessExitStatus`
/// into the handful of buckets that matter to a caller comparing against a verdict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SandboxResultCode {
    /// The child process ran to completion within all configured limits.
    Success,

    /// The child process exceeded its CPU time limit.
    CpuTimeLimitExceeded,

    /// The child process exceeded its real (wall-clock) time limit.
    RealTimeLimitExceeded,

    /// The child process exceeded its memory limit.
    MemoryLimitExceeded,

    /// The child process exited with a non-zero status, was killed by a signal, wrote more
    /// output than allowed, or invoked a syscall outside its seccomp policy.
    RuntimeError,

    /// The sandbox itself failed to carry out the invocation.
    SystemError,
}

impl From<&ProcessExitStatus> for SandboxResultCode {
    fn from(status: &ProcessExitStatus) -> Self {
        use ProcessExitStatus::*;
        match status {
            Normal(0) => SandboxResultCode::Success,
            Normal(..) => SandboxResultCode::RuntimeError,
            KilledBySignal(..) => SandboxResultCode::RuntimeError,
            CPUTimeLimitExceeded => SandboxResultCode::CpuTimeLimitExceeded,
            RealTimeLimitExceeded => SandboxResultCode::RealTimeLimitExceeded,
            MemoryLimitExceeded => SandboxResultCode::MemoryLimitExceeded,
            OutputLimitExceeded => SandboxResultCode::RuntimeError,
            BannedSyscall => SandboxResultCode::RuntimeError,
            NotExited => SandboxResultCode::SystemError,
            SandboxError { .. } => SandboxResultCode::SystemError,
        }
    }
}

/// Resource usage statistics of a sandboxed process.
#[derive(Clone, Copy)]
pub struct ProcessResourceUsage {
    /// CPU time spent in user mode.
    pub user_cpu_time: Duration,

    /// CPU time spent in kernel mode.
    pub kernel_cpu_time: Duration,

    /// Virtual memory size.
    pub virtual_mem_size: MemorySize,

    /// Resident set size.
    pub resident_set_size: MemorySize
}

impl ProcessResourceUsage {
    /// Create an empty `ProcessResourceUsage` instance.
    pub fn empty() -> ProcessResourceUsage {
        ProcessResourceUsage {
            user_cpu_time: Duration::new(0, 0),
            kernel_cpu_time: Duration::new(0, 0),
            virtual_mem_size: MemorySize::Bytes(0),
            resident_set_size: MemorySize::Bytes(0)
        }
    }

    /// Get resource usage for the specified process.
    pub fn usage_of(pid: Pid) -> std::io::Result<ProcessResourceUsage> {
        Ok(ProcessResourceUsage::from(procinfo::pid::stat(pid)?))
    }

    /// Get the total CPU time consumed, a.k.a. the sum of the user CPU time and
    /// the kernel CPU time.
    pub fn cpu_time(&self) -> Duration {
        self.user_cpu_time + self.kernel_cpu_time
    }

    /// Update the usage statistics stored in this instance to the statistics
    /// stored in the given statistics.
    pub fn update(&mut self, other: &ProcessResourceUsage) {
        if other.user_cpu_time > self.user_cpu_time {
            self.user_cpu_time = other.user_cpu_time;
        }
        if other.kernel_cpu_time > self.kernel_cpu_time {
            self.kernel_cpu_time = other.kernel_cpu_time;
        }
        if other.virtual_mem_size > self.virtual_mem_size {
            self.virtual_mem_size = other.virtual_mem_size;
        }
        if other.resident_set_size > self.resident_set_size {
            self.resident_set_size = other.resident_set_size;
        }
    }
}

impl From<procinfo::pid::Stat> for ProcessResourceUsage {
    fn from(stat: procinfo::pid::Stat) -> ProcessResourceUsage {
        ProcessResourceUsage {
            user_cpu_time: misc::duration_from_clocks(stat.utime),
            kernel_cpu_time: misc::duration_from_clocks(stat.stime),
            virtual_mem_size: MemorySize::Bytes(stat.vsize),
            resident_set_size: MemorySize::Bytes(stat.rss)
        }
    }
}

impl Default for ProcessResourceUsage {
    fn default() -> ProcessResourceUsage {
        ProcessResourceUsage::empty()
    }
}

/// A handle to the sandboxed child process.
pub struct Process {
    /// Pid of the child process.
    pid: Pid,

    /// Daemon related context.
    context: Arc<Box<ProcessDaemonContext>>,

    /// Join handle of the daemon thread. `None` if the `Process` instance has
    /// been waited for.
    daemon: Option<DaemonThreadJoinHandle>
}

impl Process {
    /// Create a new `Process` instance attaching to the specific process.
    fn attach(pid: Pid, limits: Option<ProcessResourceLimits>,
        output_watch_path: Option<PathBuf>) -> Process {
        let mut handle = Process {
            pid,
            context: Arc::new(Box::new(
                ProcessDaemonContext::new(pid, limits, output_watch_path))),
            daemon: None
        };

        let daemon_handle = daemon::start(handle.context.clone());
        handle.daemon = Some(daemon_handle);

        handle
    }

    /// Get the exit status of the process.
    pub fn exit_status(&self) -> ProcessExitStatus {
        self.context.exit_status()
    }

    /// Get the resource usage statistics of the process.
    pub fn rusage(&self) -> ProcessResourceUsage {
        self.context.rusage()
            .unwrap_or_else(|| ProcessResourceUsage::empty())
    }

    /// Get the wall-clock time elapsed since the process was started.
    pub fn real_time(&self) -> Duration {
        self.context.real_time()
    }

    /// Wait for the child process to exit. Panics if this function has been
    /// called already on the same `Process` instance.
    pub fn wait_for_exit(&mut self) -> Result<()> {
        self.daemon.take().unwrap().join()
            .map_err(|_| Error::from(ErrorKind::DaemonJoinFailed))
    }
}

/// Statistics of one sandboxed invocation, collected for the caller's record keeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct SandboxStats {
    /// CPU time consumed, in milliseconds.
    pub cpu_time_ms: u64,

    /// Wall-clock time elapsed, in milliseconds.
    pub real_time_ms: u64,

    /// Peak memory used, in bytes.
    pub memory_bytes: u64,

    /// Exit code of the process, if it exited normally.
    pub exit_code: i32,

    /// Signal number that killed the process, if any.
    pub signal: i32,
}

/// The outcome of one `Executor::run` invocation.
#[derive(Clone, Debug)]
pub struct SandboxOutcome {
    /// High level classification of the outcome.
    pub code: SandboxResultCode,

    /// Statistics collected during the invocation.
    pub stats: SandboxStats,

    /// Human readable description of a `SandboxResultCode::SystemError` outcome. Empty
    /// otherwise.
    pub error: String,
}

/// A fully specified invocation of a program inside the sandbox. This is the narrow surface the
/// grading core talks to; nothing in this crate's internals (fork/exec, seccomp, rlimits) is
/// reachable through it.
pub struct ExecutorInvocation {
    /// Path to the executable.
    pub program: PathBuf,

    /// Command line arguments, not including argv[0].
    pub args: Vec<String>,

    /// Environment variables.
    pub envs: Vec<(String, String)>,

    /// Working directory the child is started in.
    pub working_dir: PathBuf,

    /// Path the child's stdin is redirected from, if any.
    pub stdin_path: Option<PathBuf>,

    /// Path the child's stdout is redirected to, if any.
    pub stdout_path: Option<PathBuf>,

    /// Path the child's stderr is redirected to, if any.
    pub stderr_path: Option<PathBuf>,

    /// Effective uid to run the child as.
    pub uid: Option<UserId>,

    /// Effective gid to run the child as.
    pub gid: Option<GroupId>,

    /// Named seccomp policy to install, if any.
    pub seccomp_policy: Option<String>,

    /// Resource limits.
    pub limits: ProcessResourceLimits,
}

impl ExecutorInvocation {
    /// Create a new invocation of `program` with no arguments, no extra environment, the current
    /// directory as working directory, no redirections, no privilege drop and no resource
    /// limits. Callers fill in what they need.
    pub fn new(program: PathBuf, working_dir: PathBuf) -> Self {
        ExecutorInvocation {
            program,
            args: Vec::new(),
            envs: Vec::new(),
            working_dir,
            stdin_path: None,
            stdout_path: None,
            stderr_path: None,
            uid: None,
            gid: None,
            seccomp_policy: None,
            limits: ProcessResourceLimits::empty(),
        }
    }
}

/// Abstraction over "run one process under sandboxed constraints and report what happened". The
/// grading core depends only on this trait, never on `ProcessBuilder` directly, so it can be
/// exercised in tests against a scripted double instead of forking real processes.
pub trait Executor: Sync + Send {
    /// Run the given invocation to completion and report its outcome. Never panics; any failure
    /// to even start the child is reported as `SandboxResultCode::SystemError`.
    fn run(&self, invocation: ExecutorInvocation) -> SandboxOutcome;
}

/// Production `Executor` backed by `ProcessBuilder`/`fork`/`execve`.
#[derive(Default)]
pub struct UnixExecutor;

impl UnixExecutor {
    pub fn new() -> Self {
        UnixExecutor
    }

    fn open_input(path: &Path) -> std::io::Result<File> {
        File::open(path)
    }

    fn open_output(path: &Path) -> std::io::Result<File> {
        std::fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
    }

    fn build(&self, invocation: &ExecutorInvocation) -> Result<ProcessBuilder> {
        let mut builder = ProcessBuilder::new(&invocation.program);
        for arg in &invocation.args {
            builder.add_arg(arg)?;
        }
        for (name, value) in &invocation.envs {
            builder.add_env(name, value)?;
        }
        builder.working_dir = Some(invocation.working_dir.clone());
        builder.uid = invocation.uid;
        builder.gid = invocation.gid;
        builder.seccomp_policy = invocation.seccomp_policy.clone();
        builder.limits = invocation.limits;

        if let Some(ref path) = invocation.stdin_path {
            builder.redirections.stdin = Some(Self::open_input(path)?);
        }
        if let Some(ref path) = invocation.stdout_path {
            let file = Self::open_output(path)?;
            if invocation.limits.output_size_limit.is_some() {
                builder.output_watch_path = Some(path.clone());
            }
            builder.redirections.stdout = Some(file);
        }
        if let Some(ref path) = invocation.stderr_path {
            // When stdout and stderr target the same path (merged output), share one file
            // description via `try_clone` instead of reopening the path: two independent `open`
            // calls would each start at offset 0 and overwrite each other's writes.
            if invocation.stdout_path.as_deref() == Some(path.as_path()) {
                let shared = builder.redirections.stdout.as_ref()
                    .expect("stdout redirection must already be set up")
                    .try_clone()?;
                builder.redirections.stderr = Some(shared);
            } else {
                builder.redirections.stderr = Some(Self::open_output(path)?);
            }
        }

        Ok(builder)
    }

    fn run_impl(&self, invocation: ExecutorInvocation) -> Result<SandboxOutcome> {
        let builder = self.build(&invocation)?;
        let mut process = builder.start()?;
        process.wait_for_exit()?;

        let status = process.exit_status();
        let rusage = process.rusage();
        let real_time = process.real_time();

        let stats = SandboxStats {
            cpu_time_ms: rusage.cpu_time().as_millis() as u64,
            real_time_ms: real_time.as_millis() as u64,
            memory_bytes: rusage.virtual_mem_size.bytes() as u64,
            exit_code: status.exit_code().unwrap_or_default(),
            signal: status.signal().map(|s| s as i32).unwrap_or_default(),
        };

        let error = match &status {
            ProcessExitStatus::SandboxError { err_msg } => err_msg.clone(),
            _ => String::new(),
        };

        Ok(SandboxOutcome {
            code: SandboxResultCode::from(&status),
            stats,
            error,
        })
    }
}

impl Executor for UnixExecutor {
    fn run(&self, invocation: ExecutorInvocation) -> SandboxOutcome {
        match self.run_impl(invocation) {
            Ok(outcome) => outcome,
            Err(e) => SandboxOutcome {
                code: SandboxResultCode::SystemError,
                stats: SandboxStats::default(),
                error: e.to_string(),
            }
        }
    }
}
