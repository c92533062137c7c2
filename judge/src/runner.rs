//! Runner Driver: formats the run command (including SPJ-specific argument substitution),
//! invokes the Sandbox Executor as the *user-code* or *SPJ* principal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::{Executor, ExecutorInvocation, MemorySize, ProcessResourceLimits, SandboxOutcome, SandboxResultCode};

use crate::model::RunSpec;
use crate::template;

/// Extra argv substitutions used when the command is invoking an SPJ checker rather than the
/// submitted program directly.
pub struct SpjArgs<'a> {
    pub in_file_path: &'a Path,
    pub user_out_file_path: &'a Path,
    pub answer_file_path: &'a Path,
}

/// Run `exe_name` (or the SPJ checker, when `spj_args` is set) inside `workdir`.
///
/// `in_name`/`out_name` are filenames relative to `workdir`; stdout and stderr are both
/// redirected to `out_name` (merged), matching the reference comparator's contract.
pub fn run(
    executor: &dyn Executor,
    workdir: &Path,
    exe_name: &str,
    in_name: &str,
    out_name: &str,
    spec: &RunSpec,
    max_cpu_time: Duration,
    max_memory_bytes: u64,
    uid: u32,
    gid: u32,
    spj_args: Option<SpjArgs>,
) -> SandboxOutcome {
    let exe_path = workdir.join(exe_name);
    let in_path = workdir.join(in_name);
    let out_path = workdir.join(out_name);

    if let Err(e) = crate::chown_workdir(workdir, uid, gid) {
        return system_error(format!("failed to chown workdir for run: {}", e));
    }

    let exe_path_str = exe_path.to_string_lossy().into_owned();
    let mut vars: Vec<(&str, String)> = vec![("exe_path", exe_path_str)];
    if let Some(args) = &spj_args {
        vars.push(("in_file_path", args.in_file_path.to_string_lossy().into_owned()));
        vars.push(("user_out_file_path", args.user_out_file_path.to_string_lossy().into_owned()));
        vars.push(("answer_file_path", args.answer_file_path.to_string_lossy().into_owned()));
    }
    let var_refs: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();

    let formatted = template::substitute(&spec.command_template, &var_refs);
    let mut argv = template::tokenize(&formatted);
    if argv.is_empty() {
        return system_error("empty run command template".to_owned());
    }
    let program = PathBuf::from(argv.remove(0));

    let mut envs = spec.env.clone();
    if let Ok(path) = std::env::var("PATH") {
        envs.push(("PATH".to_owned(), path));
    }

    let mut invocation = ExecutorInvocation::new(program, workdir.to_path_buf());
    invocation.args = argv;
    invocation.envs = envs;
    invocation.stdin_path = Some(in_path);
    invocation.stdout_path = Some(out_path.clone());
    invocation.stderr_path = Some(out_path);
    invocation.uid = Some(uid);
    invocation.gid = Some(gid);
    invocation.seccomp_policy = Some(spec.seccomp_rule.clone());
    invocation.limits = ProcessResourceLimits {
        cpu_time_limit: Some(max_cpu_time),
        real_time_limit: Some(max_cpu_time * 3),
        memory_limit: Some(MemorySize::Bytes(max_memory_bytes as usize)),
        output_size_limit: Some(MemorySize::MegaBytes(32)),
        stack_limit: Some(MemorySize::MegaBytes(128)),
        // Unlimited: no `RLIMIT_NPROC` is applied at all.
        process_number_limit: None,
    };

    executor.run(invocation)
}

fn system_error(message: String) -> SandboxOutcome {
    SandboxOutcome {
        code: SandboxResultCode::SystemError,
        stats: sandbox::SandboxStats::default(),
        error: message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeExecutor;

    fn standard_spec() -> RunSpec {
        RunSpec {
            command_template: "{exe_path}".to_owned(),
            seccomp_rule: "standard".to_owned(),
            env: Vec::new(),
        }
    }

    #[test]
    fn test_run_substitutes_exe_path_and_merges_stdout_stderr() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test1.in"), "3 4\n").unwrap();

        let executor = FakeExecutor::scripted(|invocation| {
            assert_eq!(invocation.stdout_path, invocation.stderr_path);
            sandbox::SandboxOutcome {
                code: SandboxResultCode::Success,
                stats: sandbox::SandboxStats { cpu_time_ms: 10, ..Default::default() },
                error: String::new(),
            }
        });

        let outcome = run(
            &executor, dir.path(), "main", "test1.in", "test1.out",
            &standard_spec(), Duration::from_secs(1), 1 << 27, 0, 0, None,
        );
        assert!(matches!(outcome.code, SandboxResultCode::Success));

        let invocations = executor.invocations();
        assert_eq!(1, invocations.len());
        assert_eq!(dir.path().join("main"), invocations[0].program);
    }

    #[test]
    fn test_run_real_time_limit_is_triple_cpu_time() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test1.in"), "").unwrap();

        let captured_invocation = std::sync::Mutex::new(None);
        let executor = FakeExecutor::scripted(|invocation| {
            sandbox::SandboxOutcome {
                code: SandboxResultCode::Success,
                stats: sandbox::SandboxStats::default(),
                error: format!("{:?}", invocation.limits.real_time_limit),
            }
        });

        let outcome = run(
            &executor, dir.path(), "main", "test1.in", "test1.out",
            &standard_spec(), Duration::from_millis(1000), 1 << 27, 0, 0, None,
        );
        let _ = captured_invocation;
        assert_eq!(format!("{:?}", Some(Duration::from_millis(3000))), outcome.error);
    }

    #[test]
    fn test_run_spj_substitutes_extra_args() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".spj.in"), "").unwrap();

        let spec = RunSpec {
            command_template: "{exe_path} {in_file_path} {user_out_file_path} {answer_file_path}".to_owned(),
            seccomp_rule: "checker".to_owned(),
            env: Vec::new(),
        };

        let executor = FakeExecutor::scripted(|_| sandbox::SandboxOutcome {
            code: SandboxResultCode::Success,
            stats: sandbox::SandboxStats::default(),
            error: String::new(),
        });

        run(
            &executor, dir.path(), "checker", ".spj.in", "test1.spj.out",
            &spec, Duration::from_secs(10), 1 << 30, 0, 0,
            Some(SpjArgs {
                in_file_path: &dir.path().join("test1.in"),
                user_out_file_path: &dir.path().join("test1.out"),
                answer_file_path: &dir.path().join("test1.ans"),
            }),
        );

        let invocations = executor.invocations();
        assert_eq!(3, invocations[0].args.len());
    }
}
