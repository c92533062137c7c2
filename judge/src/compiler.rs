//! Compiler Driver: formats the compile command, invokes the Sandbox Executor as the *compiler*
//! principal, and captures the compiler's combined stdout/stderr into a bounded file.

use std::path::{Path, PathBuf};

use sandbox::{Executor, ExecutorInvocation, MemorySize, ProcessResourceLimits, SandboxResultCode, SandboxStats};

use crate::model::CompileSpec;
use crate::template;

/// Combined sandbox outcome and captured compiler output of one `compile` call.
pub struct CompileOutcome {
    pub code: SandboxResultCode,
    pub stats: SandboxStats,
    pub log: String,
}

/// Run the compiler described by `spec` inside `workdir`, as `(compiler_uid, compiler_gid)`.
///
/// Callers only invoke this for languages that have a compile step at all (`LanguageSpec::compile
/// == Some(..)`); interpreted languages skip straight to the Runner Driver.
pub fn compile(
    executor: &dyn Executor,
    workdir: &Path,
    spec: &CompileSpec,
    compiler_uid: u32,
    compiler_gid: u32,
) -> CompileOutcome {
    let src_path = workdir.join(&spec.src_name);
    let exe_path = workdir.join(&spec.exe_name);
    let out_path = workdir.join("compiler.out");

    if let Err(e) = crate::chown_workdir(workdir, compiler_uid, compiler_gid) {
        return system_error(format!("failed to chown workdir for compile: {}", e));
    }

    let formatted = template::substitute(&spec.compile_command_template, &[
        ("src_path", src_path.to_string_lossy().as_ref()),
        ("exe_path", exe_path.to_string_lossy().as_ref()),
    ]);
    let mut argv = template::tokenize(&formatted);
    if argv.is_empty() {
        return system_error("empty compile command template".to_owned());
    }
    let program = PathBuf::from(argv.remove(0));

    let mut envs = spec.env.clone();
    if let Ok(path) = std::env::var("PATH") {
        envs.push(("PATH".to_owned(), path));
    }

    let mut invocation = ExecutorInvocation::new(program, workdir.to_path_buf());
    invocation.args = argv;
    invocation.envs = envs;
    // The input is redirected from the source file itself, not `/dev/null`: some kernels choke on
    // an `ioctl` compilers issue against a null stdin.
    invocation.stdin_path = Some(src_path);
    invocation.stdout_path = Some(out_path.clone());
    invocation.stderr_path = Some(out_path.clone());
    invocation.uid = Some(compiler_uid);
    invocation.gid = Some(compiler_gid);
    // The compiler must run unfiltered.
    invocation.seccomp_policy = None;
    invocation.limits = ProcessResourceLimits {
        cpu_time_limit: Some(spec.max_cpu_time),
        real_time_limit: Some(spec.max_real_time),
        memory_limit: Some(MemorySize::Bytes(spec.max_memory_bytes as usize)),
        output_size_limit: Some(MemorySize::MegaBytes(20)),
        stack_limit: Some(MemorySize::MegaBytes(128)),
        // Unlimited: no `RLIMIT_NPROC` is applied at all.
        process_number_limit: None,
    };

    let outcome = executor.run(invocation);
    let log = match std::fs::read(&out_path) {
        Ok(bytes) => {
            let _ = std::fs::remove_file(&out_path);
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Err(_) => format!(
            "{{\"code\":{:?},\"stats\":{:?},\"error\":{:?}}}",
            outcome.code, outcome.stats, outcome.error
        ),
    };

    CompileOutcome { code: outcome.code, stats: outcome.stats, log }
}

fn system_error(message: String) -> CompileOutcome {
    CompileOutcome {
        code: SandboxResultCode::SystemError,
        stats: SandboxStats::default(),
        log: message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeExecutor;
    use std::time::Duration;

    fn sample_spec() -> CompileSpec {
        CompileSpec {
            src_name: "main.c".to_owned(),
            exe_name: "main".to_owned(),
            max_cpu_time: Duration::from_secs(10),
            max_real_time: Duration::from_secs(20),
            max_memory_bytes: 256 * 1024 * 1024,
            compile_command_template: "/usr/bin/gcc -o {exe_path} {src_path}".to_owned(),
            env: Vec::new(),
        }
    }

    #[test]
    fn test_compile_captures_output_and_unlinks_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.c"), "int main(){return 0;}").unwrap();

        let executor = FakeExecutor::scripted(move |invocation| {
            if let Some(path) = &invocation.stdout_path {
                std::fs::write(path, "warning: unused variable\n").unwrap();
            }
            sandbox::SandboxOutcome {
                code: SandboxResultCode::Success,
                stats: SandboxStats { cpu_time_ms: 120, ..Default::default() },
                error: String::new(),
            }
        });

        let outcome = compile(&executor, dir.path(), &sample_spec(), 0, 0);
        assert!(matches!(outcome.code, SandboxResultCode::Success));
        assert_eq!("warning: unused variable\n", outcome.log);
        assert!(!dir.path().join("compiler.out").exists());
    }

    #[test]
    fn test_compile_without_captured_file_falls_back_to_result_description() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.c"), "int main(){return 0;}").unwrap();

        let executor = FakeExecutor::scripted(|_| sandbox::SandboxOutcome {
            code: SandboxResultCode::SystemError,
            stats: SandboxStats::default(),
            error: "fork failed".to_owned(),
        });

        let outcome = compile(&executor, dir.path(), &sample_spec(), 0, 0);
        assert!(outcome.log.contains("fork failed"));
    }
}
