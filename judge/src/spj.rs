//! SPJ Pipeline: prepares (and caches) the special-judge checker binary once per task, then runs
//! it per case in place of the default comparator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::{Executor, SandboxResultCode, SandboxStats};

use crate::comparator::ComparisonOutcome;
use crate::model::{RunSpec, Verdict};
use crate::runner::{self, SpjArgs};
use crate::{compiler, registry};

/// The SPJ checker could not be made ready; the Grader turns this into a final `COMPILE_ERROR`
/// report, mirroring what happens when the submitted program itself fails to compile.
pub struct SpjPrepFailure {
    pub log: String,
}

/// Prepare the checker executable for `spj_id` inside `workdir`: copy the cached binary if one
/// exists, otherwise compile `checker.cpp` and cache the result back to `spj_dir` atomically.
/// Also drops an empty `.spj.in` into the workdir, the checker's stdin for every case.
pub fn prepare(
    executor: &dyn Executor,
    workdir: &Path,
    spj_dir: &Path,
    spj_id: &str,
    spj_uid: u32,
    spj_gid: u32,
) -> Result<(), SpjPrepFailure> {
    let bundle_dir = spj_dir.join(spj_id);
    let checker_cpp = bundle_dir.join("checker.cpp");
    if !checker_cpp.is_file() {
        return Err(SpjPrepFailure { log: "SPJ source not found".to_owned() });
    }

    let cached_checker = bundle_dir.join("checker");
    let workdir_checker = workdir.join("checker");

    if cached_checker.is_file() {
        copy_executable(&cached_checker, &workdir_checker)
            .map_err(|e| SpjPrepFailure { log: format!("failed to stage cached SPJ checker: {}", e) })?;
    } else {
        std::fs::copy(&checker_cpp, workdir.join("checker.cpp"))
            .map_err(|e| SpjPrepFailure { log: format!("failed to stage SPJ source: {}", e) })?;
        let testlib = spj_dir.join("testlib.h");
        if testlib.is_file() {
            std::fs::copy(&testlib, workdir.join("testlib.h"))
                .map_err(|e| SpjPrepFailure { log: format!("failed to stage testlib.h: {}", e) })?;
        }

        let spec = registry::spj_checker_spec();
        let compile_spec = spec.compile.as_ref().expect("__spj_checker always has a compile step");
        let outcome = compiler::compile(executor, workdir, compile_spec, spj_uid, spj_gid);

        let artifact_exists = workdir_checker.is_file();
        if !matches!(outcome.code, SandboxResultCode::Success) && !artifact_exists {
            return Err(SpjPrepFailure { log: format!("SPJ compile error, info: {}", outcome.log) });
        }

        cache_checker(&workdir_checker, &cached_checker)
            .map_err(|e| SpjPrepFailure { log: format!("failed to cache SPJ checker: {}", e) })?;
    }

    std::fs::write(workdir.join(".spj.in"), b"")
        .map_err(|e| SpjPrepFailure { log: format!("failed to create SPJ stdin: {}", e) })?;

    Ok(())
}

fn copy_executable(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::copy(from, to)?;
    make_executable(to)
}

/// Cache the just-compiled checker back to `spj_dir` by writing to a sibling temp file and
/// renaming it into place, so a concurrent reader of `cached` never observes a partial write.
fn cache_checker(from: &Path, cached: &Path) -> std::io::Result<()> {
    let tmp: PathBuf = cached.with_extension("tmp");
    std::fs::copy(from, &tmp)?;
    make_executable(&tmp)?;
    std::fs::rename(&tmp, cached)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

/// Result of running the checker for one case.
pub struct SpjCaseOutcome {
    pub comparison: ComparisonOutcome,
    /// The checker's own sandbox stats. The Grader substitutes these for the judgee's stats only
    /// when the checker malfunctioned (`Verdict::SystemError`); otherwise the judgee's own stats
    /// are reported, per spec.
    pub checker_stats: SandboxStats,
}

/// Run the checker against one case's input/output/answer and interpret its exit code.
pub fn run_case(
    executor: &dyn Executor,
    workdir: &Path,
    case_name: &str,
    case_bundle_dir: &Path,
    run_spec: &RunSpec,
    max_cpu_time: Duration,
    max_memory_bytes: u64,
    spj_uid: u32,
    spj_gid: u32,
) -> SpjCaseOutcome {
    let ans_src = case_bundle_dir.join(format!("{}.ans", case_name));
    let ans_dst = workdir.join(format!("{}.ans", case_name));
    if let Err(e) = std::fs::copy(&ans_src, &ans_dst) {
        return SpjCaseOutcome {
            comparison: ComparisonOutcome {
                verdict: Verdict::SystemError,
                output: format!("failed to stage reference answer: {}", e).into_bytes(),
            },
            checker_stats: SandboxStats::default(),
        };
    }

    let in_path = workdir.join(format!("{}.in", case_name));
    let out_path = workdir.join(format!("{}.out", case_name));
    let spj_out_name = format!("{}.spj.out", case_name);

    let outcome = runner::run(
        executor, workdir, "checker", ".spj.in", &spj_out_name, run_spec,
        max_cpu_time, max_memory_bytes, spj_uid, spj_gid,
        Some(SpjArgs {
            in_file_path: &in_path,
            user_out_file_path: &out_path,
            answer_file_path: &ans_dst,
        }),
    );

    let comparison = if !matches!(outcome.code, SandboxResultCode::Success) {
        ComparisonOutcome {
            verdict: Verdict::SystemError,
            output: format!("SPJ error, info: {}", outcome.error).into_bytes(),
        }
    } else {
        match outcome.stats.exit_code {
            0 => ComparisonOutcome { verdict: Verdict::Accepted, output: Vec::new() },
            1 => ComparisonOutcome {
                verdict: Verdict::WrongAnswer,
                output: std::fs::read(&out_path).unwrap_or_default(),
            },
            _ => {
                let spj_out = workdir.join(&spj_out_name);
                let detail = std::fs::read_to_string(&spj_out).unwrap_or_default();
                ComparisonOutcome {
                    verdict: Verdict::SystemError,
                    output: format!("SPJ error, info: {}", detail).into_bytes(),
                }
            }
        }
    };

    SpjCaseOutcome { comparison, checker_stats: outcome.stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeExecutor;

    #[test]
    fn test_prepare_fails_when_checker_source_missing() {
        let workdir = tempfile::tempdir().unwrap();
        let spj_dir = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::scripted(|_| unreachable!("compiler must not be invoked"));

        let err = prepare(&executor, workdir.path(), spj_dir.path(), "spj1", 0, 0).unwrap_err();
        assert_eq!("SPJ source not found", err.log);
    }

    #[test]
    fn test_prepare_uses_cached_checker_without_compiling() {
        let workdir = tempfile::tempdir().unwrap();
        let spj_dir = tempfile::tempdir().unwrap();
        let bundle = spj_dir.path().join("spj1");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("checker.cpp"), "// checker").unwrap();
        std::fs::write(bundle.join("checker"), "#!/bin/sh\nexit 0\n").unwrap();

        let executor = FakeExecutor::scripted(|_| unreachable!("cached checker must skip compile"));
        prepare(&executor, workdir.path(), spj_dir.path(), "spj1", 0, 0).unwrap();

        assert!(workdir.path().join("checker").is_file());
        assert!(workdir.path().join(".spj.in").is_file());
    }

    #[test]
    fn test_prepare_compiles_and_caches_when_no_cached_binary() {
        let workdir = tempfile::tempdir().unwrap();
        let spj_dir = tempfile::tempdir().unwrap();
        let bundle = spj_dir.path().join("spj1");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("checker.cpp"), "// checker").unwrap();
        std::fs::write(spj_dir.path().join("testlib.h"), "// testlib").unwrap();

        let executor = FakeExecutor::scripted(|_| sandbox::SandboxOutcome {
            code: SandboxResultCode::Success,
            stats: SandboxStats::default(),
            error: String::new(),
        });

        // The fake compiler above does not actually create the binary; write it directly so the
        // "artifact exists" check in `prepare` observes a successful compile.
        let workdir_checker = workdir.path().join("checker");
        std::fs::write(&workdir_checker, "#!/bin/sh\nexit 0\n").unwrap();

        prepare(&executor, workdir.path(), spj_dir.path(), "spj1", 0, 0).unwrap();
        assert!(spj_dir.path().join("spj1").join("checker").is_file());
    }

    #[test]
    fn test_run_case_interprets_exit_codes() {
        let workdir = tempfile::tempdir().unwrap();
        let bundle = tempfile::tempdir().unwrap();
        std::fs::write(bundle.path().join("test1.ans"), "7\n").unwrap();
        std::fs::write(workdir.path().join("test1.in"), "3 4\n").unwrap();
        std::fs::write(workdir.path().join("test1.out"), "7\n").unwrap();
        std::fs::write(workdir.path().join(".spj.in"), b"").unwrap();

        let spec = RunSpec {
            command_template: "{exe_path} {in_file_path} {user_out_file_path} {answer_file_path}".to_owned(),
            seccomp_rule: "checker".to_owned(),
            env: Vec::new(),
        };

        let accept = FakeExecutor::scripted(|_| sandbox::SandboxOutcome {
            code: SandboxResultCode::Success,
            stats: SandboxStats { exit_code: 0, ..Default::default() },
            error: String::new(),
        });
        let outcome = run_case(&accept, workdir.path(), "test1", bundle.path(), &spec,
            Duration::from_secs(1), 1 << 27, 0, 0);
        assert!(matches!(outcome.comparison.verdict, Verdict::Accepted));

        let malfunction = FakeExecutor::scripted(|_| sandbox::SandboxOutcome {
            code: SandboxResultCode::Success,
            stats: SandboxStats { exit_code: 2, ..Default::default() },
            error: String::new(),
        });
        let outcome = run_case(&malfunction, workdir.path(), "test1", bundle.path(), &spec,
            Duration::from_secs(1), 1 << 27, 0, 0);
        assert!(matches!(outcome.comparison.verdict, Verdict::SystemError));
        assert!(String::from_utf8_lossy(&outcome.comparison.output).starts_with("SPJ error, info: "));
    }
}
