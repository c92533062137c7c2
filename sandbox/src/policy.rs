//! Named seccomp policies.
//!
//! `apply_syscall_filters` (see `seccomp.rs`) takes a list of `SyscallFilter`s and installs a
//! default-kill seccomp context with those filters as exceptions. This module is the layer above
//! it: callers refer to a judgee's allowed syscall surface by name (as stored alongside a language
//! in the Language Registry, or passed in directly by a caller that knows what it is running),
//! and this module resolves that name to the concrete filter list.
//!
//! The tables below are a minimal, conservative baseline, not an exhaustive survey of every
//! syscall a real toolchain needs. Extending a policy is a matter of adding syscalls to its table.

use libc::*;

use crate::seccomp::{Action, SyscallFilter};

/// Syscalls needed by essentially any dynamically linked, single-threaded native binary: memory
/// management, basic I/O on already-open descriptors, and process exit.
fn baseline_native() -> Vec<SyscallFilter> {
    let allow = [
        SYS_read,
        SYS_write,
        SYS_open,
        SYS_openat,
        SYS_close,
        SYS_fstat,
        SYS_stat,
        SYS_lstat,
        SYS_lseek,
        SYS_mmap,
        SYS_mprotect,
        SYS_munmap,
        SYS_brk,
        SYS_rt_sigaction,
        SYS_rt_sigprocmask,
        SYS_rt_sigreturn,
        SYS_ioctl,
        SYS_access,
        SYS_readlink,
        SYS_arch_prctl,
        SYS_exit,
        SYS_exit_group,
        SYS_getrlimit,
        SYS_getrandom,
        SYS_futex,
    ];
    allow.iter().map(|s| SyscallFilter::new(*s as i32, Action::Allow)).collect()
}

/// `standard`: compiled native programs (C, C++, Pascal, ...). The judgee is expected to only
/// read `stdin`, write `stdout`/`stderr` and allocate memory.
fn policy_standard() -> Vec<SyscallFilter> {
    baseline_native()
}

/// `interpreted`: managed runtimes (Python, Java, ...) that additionally need clock queries, the
/// ability to probe their own `/proc` entries, and extra memory-mapping syscalls used by their
/// garbage collectors and JIT compilers.
fn policy_interpreted() -> Vec<SyscallFilter> {
    let mut filters = baseline_native();
    let extra = [
        SYS_clock_gettime,
        SYS_gettimeofday,
        SYS_sched_yield,
        SYS_sched_getaffinity,
        SYS_madvise,
        SYS_rseq,
        SYS_set_robust_list,
        SYS_prlimit64,
        SYS_sigaltstack,
    ];
    filters.extend(extra.iter().map(|s| SyscallFilter::new(*s as i32, Action::Allow)));
    filters
}

/// `checker`: special judges and checkers. Like `standard`, but additionally allowed to open
/// extra files by path (the input/answer/output files passed to it as CLI arguments) and fork a
/// helper process for interactive problems.
fn policy_checker() -> Vec<SyscallFilter> {
    let mut filters = baseline_native();
    let extra = [
        SYS_dup,
        SYS_dup2,
        SYS_pipe,
        SYS_pipe2,
        SYS_fork,
        SYS_vfork,
        SYS_clone,
        SYS_execve,
        SYS_wait4,
        SYS_waitid,
    ];
    filters.extend(extra.iter().map(|s| SyscallFilter::new(*s as i32, Action::Allow)));
    filters
}

/// Resolve a named seccomp policy to its concrete filter list. Returns `None` if `name` does not
/// name a known policy.
pub fn resolve(name: &str) -> Option<Vec<SyscallFilter>> {
    match name {
        "standard" => Some(policy_standard()),
        "interpreted" => Some(policy_interpreted()),
        "checker" => Some(policy_checker()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_policies() {
        assert!(resolve("standard").is_some());
        assert!(resolve("interpreted").is_some());
        assert!(resolve("checker").is_some());
    }

    #[test]
    fn test_resolve_unknown_policy() {
        assert!(resolve("no-such-policy").is_none());
    }

    #[test]
    fn test_interpreted_is_superset_of_standard() {
        let standard = policy_standard();
        let interpreted = policy_interpreted();
        assert!(interpreted.len() > standard.len());
    }
}
