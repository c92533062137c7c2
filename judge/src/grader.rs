//! The Grader: orchestrates compile -> fan-out per-case runs via a fixed-size worker pool ->
//! per-case verdict classification -> subtask aggregation -> final report, streaming interim
//! events to a caller-supplied sink as it goes.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use sandbox::{Executor, SandboxResultCode, SandboxStats};

use crate::model::{
    CaseResult, CaseStats, Event, GradingConfig, LanguageSpec, Principals, RunSpec, Task,
    TaskStatistics, Verdict,
};
use crate::workdir::WorkDirScope;
use crate::{comparator, compiler, registry, runner, spj};

/// Orchestrates one `grade` call. Carries no per-task state itself -- the worker pool operates on
/// immutable `CaseJob` values built fresh for each task, so a single `Grader` can be reused (or
/// shared behind an `Arc`) across tasks run one after another.
pub struct Grader {
    pub config: GradingConfig,
    pub executor: Arc<dyn Executor>,
}

impl Grader {
    pub fn new(config: GradingConfig, executor: Arc<dyn Executor>) -> Self {
        Grader { config, executor }
    }

    /// Grade `task`, streaming events to `sink` as they occur. Exactly one `Event::Final` is
    /// emitted per call, strictly after every `Event::Part`, which are themselves strictly after
    /// `Event::Compile`.
    pub fn grade(&self, task: &Task, sink: &mut dyn FnMut(Event)) {
        let language_spec = match registry::lookup(&task.language_tag) {
            Some(spec) => spec,
            None => {
                return emit_infrastructure_failure(
                    sink, format!("unknown language: \"{}\"", task.language_tag));
            }
        };

        let bundle_dir = self.config.test_case_dir.join(&task.case_bundle_id);
        if !bundle_dir.is_dir() {
            return emit_infrastructure_failure(sink, "Test data not found!".to_owned());
        }

        let scope = match WorkDirScope::enter(
            &self.config.base_dir, &task.task_id, self.config.debug_retain_workdir) {
            Ok(scope) => scope,
            Err(e) => return emit_infrastructure_failure(sink, e.to_string()),
        };
        let workdir = scope.path().to_path_buf();

        if let Err(e) = std::fs::write(workdir.join(language_spec.source_file_name()), &task.source_code) {
            return emit_infrastructure_failure(sink, format!("failed to write source file: {}", e));
        }

        let principals = self.config.principals;

        let (compile_code, compile_stats, compile_log) = match &language_spec.compile {
            Some(compile_spec) => {
                let outcome = compiler::compile(
                    self.executor.as_ref(), &workdir, compile_spec,
                    principals.compiler_uid, principals.compiler_gid);
                (outcome.code, outcome.stats, outcome.log)
            }
            None => (SandboxResultCode::Success, SandboxStats::default(), String::new()),
        };

        let exe_path = workdir.join(&language_spec.exe_name);
        let artifact_exists = exe_path.is_file();
        if !matches!(compile_code, SandboxResultCode::Success) && !artifact_exists {
            return emit_final(sink, Verdict::CompileError, 0,
                TaskStatistics { max_time_ms: compile_stats.cpu_time_ms, max_memory_bytes: compile_stats.memory_bytes },
                compile_log, Vec::new());
        }
        if !matches!(compile_code, SandboxResultCode::Success) && artifact_exists {
            warn!(
                "task {}: compiler returned non-success result {:?} but produced {}; proceeding",
                task.task_id, compile_code, exe_path.display());
        }

        sink(Event::Compile { data: compile_log.clone() });

        let spj_job = match &task.spj_id {
            Some(spj_id) => {
                if let Err(failure) = spj::prepare(
                    self.executor.as_ref(), &workdir, &self.config.spj_dir, spj_id,
                    principals.spj_uid, principals.spj_gid,
                ) {
                    return emit_final(sink, Verdict::CompileError, 0,
                        TaskStatistics::default(), failure.log, Vec::new());
                }
                Some(SpjJob {
                    run_spec: registry::spj_checker_spec().run,
                    uid: principals.spj_uid,
                    gid: principals.spj_gid,
                })
            }
            None => None,
        };

        let results = self.run_cases(task, &workdir, &bundle_dir, &language_spec, &spj_job, principals, sink);

        let (verdict, score) = aggregate(task, &results);
        let max_time_ms = results.iter().map(|r| r.stats.cpu_time_ms).max().unwrap_or(0);
        let max_memory_bytes = results.iter().map(|r| r.stats.memory_bytes).max().unwrap_or(0);
        let detail = results.iter().map(crate::model::DetailEntry::from).collect();

        emit_final(sink, verdict, score,
            TaskStatistics { max_time_ms, max_memory_bytes }, compile_log, detail);
    }

    fn run_cases(
        &self,
        task: &Task,
        workdir: &Path,
        bundle_dir: &Path,
        language_spec: &LanguageSpec,
        spj_job: &Option<SpjJob>,
        principals: Principals,
        sink: &mut dyn FnMut(Event),
    ) -> Vec<CaseResult> {
        let total = task.cases.len();
        if total == 0 {
            return Vec::new();
        }

        let queue: VecDeque<CaseJob> = task.cases.iter().map(|case| CaseJob {
            case: case.clone(),
            workdir: workdir.to_path_buf(),
            bundle_dir: bundle_dir.to_path_buf(),
            language: language_spec.clone(),
            spj: spj_job.clone(),
            max_cpu_time: task.limits.max_cpu_time,
            max_memory_bytes: task.limits.max_memory_bytes,
            principals,
        }).collect();
        let queue = Arc::new(Mutex::new(queue));

        let (tx, rx) = mpsc::channel::<CaseResult>();
        let worker_count = self.config.parallel_tests.max(1).min(total);
        let mut handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let queue = queue.clone();
            let tx = tx.clone();
            let executor = self.executor.clone();
            handles.push(thread::spawn(move || loop {
                let job = match queue.lock().unwrap().pop_front() {
                    Some(job) => job,
                    None => break,
                };
                let result = evaluate_case(executor.as_ref(), &job);
                if tx.send(result).is_err() {
                    break;
                }
            }));
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        for result in rx {
            sink(Event::Part {
                test_case: result.case_name.clone(),
                output: result.output.clone(),
                status: result.verdict.code(),
            });
            results.push(result);
        }

        for handle in handles {
            let _ = handle.join();
        }

        results
    }
}

#[derive(Clone)]
struct SpjJob {
    run_spec: RunSpec,
    uid: u32,
    gid: u32,
}

/// An immutable unit of work for one case, built once per task and handed to a pool worker.
/// Deliberately owns everything it needs (no shared mutable state, no back-reference to the
/// `Grader`) so evaluating it needs no locking beyond popping it off the shared queue.
#[derive(Clone)]
struct CaseJob {
    case: crate::model::TestCaseSpec,
    workdir: PathBuf,
    bundle_dir: PathBuf,
    language: LanguageSpec,
    spj: Option<SpjJob>,
    max_cpu_time: std::time::Duration,
    max_memory_bytes: u64,
    principals: Principals,
}

/// Run and classify one test case against its reference or checker.
fn evaluate_case(executor: &dyn Executor, job: &CaseJob) -> CaseResult {
    let case_name = &job.case.name;
    let in_src = job.bundle_dir.join(format!("{}.in", case_name));
    if !in_src.is_file() {
        return CaseResult {
            case_name: case_name.clone(),
            verdict: Verdict::SystemError,
            output: base64::encode("Test input not found!"),
            stats: CaseStats::default(),
            subcheck_id: job.case.subcheck_id,
        };
    }

    let in_name = format!("{}.in", case_name);
    let in_dst = job.workdir.join(&in_name);
    if let Err(e) = std::fs::copy(&in_src, &in_dst) {
        return CaseResult {
            case_name: case_name.clone(),
            verdict: Verdict::SystemError,
            output: base64::encode(format!("failed to stage test input: {}", e)),
            stats: CaseStats::default(),
            subcheck_id: job.case.subcheck_id,
        };
    }

    let out_name = format!("{}.out", case_name);
    let outcome = runner::run(
        executor, &job.workdir, &job.language.exe_name, &in_name, &out_name, &job.language.run,
        job.max_cpu_time, job.max_memory_bytes, job.principals.code_uid, job.principals.code_gid, None,
    );
    let out_path = job.workdir.join(&out_name);

    let (verdict, payload, stats) = match outcome.code {
        SandboxResultCode::Success => {
            if !out_path.is_file() {
                (Verdict::WrongAnswer, Vec::new(), outcome.stats)
            } else if let Some(spj_job) = &job.spj {
                let spj_outcome = spj::run_case(
                    executor, &job.workdir, case_name, &job.bundle_dir, &spj_job.run_spec,
                    job.max_cpu_time, job.max_memory_bytes, spj_job.uid, spj_job.gid,
                );
                let stats = if matches!(spj_outcome.comparison.verdict, Verdict::SystemError) {
                    spj_outcome.checker_stats
                } else {
                    outcome.stats
                };
                (spj_outcome.comparison.verdict, spj_outcome.comparison.output, stats)
            } else {
                let md5_path = job.bundle_dir.join(format!("{}.md5", case_name));
                let cmp = comparator::compare_default(&out_path, &md5_path);
                (cmp.verdict, cmp.output, outcome.stats)
            }
        }
        other => {
            let verdict = match other {
                SandboxResultCode::CpuTimeLimitExceeded => Verdict::TimeLimitExceeded,
                SandboxResultCode::RealTimeLimitExceeded => Verdict::TimeLimitExceeded,
                SandboxResultCode::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
                SandboxResultCode::RuntimeError => Verdict::RuntimeError,
                SandboxResultCode::SystemError => Verdict::SystemError,
                SandboxResultCode::Success => unreachable!(),
            };
            let mut stats = outcome.stats;
            if matches!(other, SandboxResultCode::RealTimeLimitExceeded) {
                stats.cpu_time_ms = stats.real_time_ms;
            }
            let payload = std::fs::read(&out_path).unwrap_or_default();
            (verdict, payload, stats)
        }
    };

    CaseResult {
        case_name: case_name.clone(),
        verdict,
        output: base64::encode(&payload),
        stats: CaseStats {
            cpu_time_ms: stats.cpu_time_ms,
            memory_bytes: stats.memory_bytes,
            exit_code: stats.exit_code,
        },
        subcheck_id: job.case.subcheck_id,
    }
}

/// Subtask-aware score aggregation and aggregate verdict.
fn aggregate(task: &Task, results: &[CaseResult]) -> (Verdict, i32) {
    let verdict = results.iter()
        .map(|r| r.verdict)
        .filter(|v| !matches!(v, Verdict::Accepted))
        .max()
        .unwrap_or(Verdict::Accepted);

    if task.is_subtask_mode() {
        let mut subchecks = task.subchecks.clone();
        for result in results {
            if !matches!(result.verdict, Verdict::Accepted) {
                if let Some(id) = result.subcheck_id {
                    if let Some(entry) = subchecks.get_mut(&id) {
                        entry.score = 0;
                    }
                }
            }
        }
        let score = subchecks.values().map(|s| s.score).sum();
        (verdict, score)
    } else {
        let score_by_name: HashMap<&str, i32> =
            task.cases.iter().map(|c| (c.name.as_str(), c.score)).collect();
        let score = results.iter()
            .filter(|r| matches!(r.verdict, Verdict::Accepted))
            .map(|r| *score_by_name.get(r.case_name.as_str()).unwrap_or(&0))
            .sum();
        (verdict, score)
    }
}

fn emit_final(
    sink: &mut dyn FnMut(Event), verdict: Verdict, score: i32, statistics: TaskStatistics,
    log: String, detail: Vec<crate::model::DetailEntry>,
) {
    sink(Event::Final { status: verdict.code(), score, statistics, log, detail });
}

fn emit_infrastructure_failure(sink: &mut dyn FnMut(Event), message: String) {
    error!("grading aborted: {}", message);
    emit_final(sink, Verdict::SystemError, 0, TaskStatistics::default(), message, Vec::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SubcheckConfig, SubcheckScore, TaskLimits, TestCaseSpec};
    use crate::testutil::FakeExecutor;
    use std::time::Duration;

    fn principals() -> Principals {
        Principals {
            compiler_uid: 1001, compiler_gid: 1001,
            code_uid: 1002, code_gid: 1002,
            spj_uid: 1003, spj_gid: 1003,
        }
    }

    fn sample_config(base_dir: &Path, test_case_dir: &Path, spj_dir: &Path) -> GradingConfig {
        GradingConfig {
            base_dir: base_dir.to_path_buf(),
            test_case_dir: test_case_dir.to_path_buf(),
            spj_dir: spj_dir.to_path_buf(),
            parallel_tests: 4,
            principals: principals(),
            debug_retain_workdir: false,
        }
    }

    fn write_case(bundle_dir: &Path, name: &str, input: &str, answer: &str) {
        std::fs::write(bundle_dir.join(format!("{}.in", name)), input).unwrap();
        let digest = format!("{:x}", md5::compute(comparator::normalize(answer.as_bytes())));
        std::fs::write(bundle_dir.join(format!("{}.md5", name)), digest).unwrap();
    }

    /// An executor that treats the compiled "program" as a trivial echo: write `expected_out` for
    /// every run, regardless of input. Good enough to drive the Grader's control flow end to end
    /// without a real compiler toolchain.
    fn echo_executor(expected_out: &'static str) -> FakeExecutor {
        FakeExecutor::scripted(move |invocation| {
            if let Some(path) = &invocation.stdout_path {
                std::fs::write(path, expected_out).unwrap();
            }
            sandbox::SandboxOutcome {
                code: SandboxResultCode::Success,
                stats: SandboxStats { cpu_time_ms: 5, memory_bytes: 1 << 20, ..Default::default() },
                error: String::new(),
            }
        })
    }

    fn sample_task(case_bundle_id: &str, cases: Vec<TestCaseSpec>) -> Task {
        Task {
            task_id: "task-1".to_owned(),
            case_bundle_id: case_bundle_id.to_owned(),
            spj_id: None,
            cases,
            subchecks: SubcheckConfig::new(),
            source_code: "int main(){return 0;}".to_owned(),
            language_tag: "c".to_owned(),
            limits: TaskLimits { max_cpu_time: Duration::from_secs(2), max_memory_bytes: 1 << 27 },
        }
    }

    #[test]
    fn test_all_cases_accepted() {
        let base = tempfile::tempdir().unwrap();
        let test_cases = tempfile::tempdir().unwrap();
        let spj_dir = tempfile::tempdir().unwrap();
        let bundle = test_cases.path().join("bundle1");
        std::fs::create_dir_all(&bundle).unwrap();
        for i in 1..=10 {
            write_case(&bundle, &format!("test{}", i), "3 4\n", "7");
        }

        let cases = (1..=10).map(|i| TestCaseSpec {
            name: format!("test{}", i), score: 10, subcheck_id: None,
        }).collect();
        let task = sample_task("bundle1", cases);

        let executor: Arc<dyn Executor> = Arc::new(echo_executor("7"));
        let grader = Grader::new(sample_config(base.path(), test_cases.path(), spj_dir.path()), executor);

        let mut events = Vec::new();
        grader.grade(&task, &mut |event| events.push(event));

        let parts = events.iter().filter(|e| matches!(e, Event::Part { .. })).count();
        assert_eq!(10, parts);
        match events.last().unwrap() {
            Event::Final { status, score, .. } => {
                assert_eq!(Verdict::Accepted.code(), *status);
                assert_eq!(100, *score);
            }
            _ => panic!("expected a final event"),
        }
        assert!(!base.path().join("task-1").exists(), "workdir must be cleaned up");
    }

    #[test]
    fn test_compile_error_emits_no_part_events() {
        let base = tempfile::tempdir().unwrap();
        let test_cases = tempfile::tempdir().unwrap();
        let spj_dir = tempfile::tempdir().unwrap();
        let bundle = test_cases.path().join("bundle1");
        std::fs::create_dir_all(&bundle).unwrap();
        write_case(&bundle, "test1", "3 4\n", "7");

        let task = sample_task("bundle1", vec![TestCaseSpec {
            name: "test1".to_owned(), score: 100, subcheck_id: None,
        }]);

        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::scripted(|invocation| {
            if let Some(path) = &invocation.stdout_path {
                std::fs::write(path, "main.c:1:1: error: expected ';'\n").unwrap();
            }
            sandbox::SandboxOutcome {
                code: SandboxResultCode::RuntimeError,
                stats: SandboxStats::default(),
                error: String::new(),
            }
        }));
        let grader = Grader::new(sample_config(base.path(), test_cases.path(), spj_dir.path()), executor);

        let mut events = Vec::new();
        grader.grade(&task, &mut |event| events.push(event));

        assert_eq!(1, events.len());
        match &events[0] {
            Event::Final { status, score, log, .. } => {
                assert_eq!(Verdict::CompileError.code(), *status);
                assert_eq!(0, *score);
                assert!(!log.is_empty());
            }
            _ => panic!("expected a final event"),
        }
    }

    #[test]
    fn test_subtask_mode_zeroes_failing_group() {
        let base = tempfile::tempdir().unwrap();
        let test_cases = tempfile::tempdir().unwrap();
        let spj_dir = tempfile::tempdir().unwrap();
        let bundle = test_cases.path().join("bundle1");
        std::fs::create_dir_all(&bundle).unwrap();
        write_case(&bundle, "c1", "1\n", "7");
        write_case(&bundle, "c2", "2\n", "7");
        write_case(&bundle, "c3", "3\n", "7");

        let mut task = sample_task("bundle1", vec![
            TestCaseSpec { name: "c1".to_owned(), score: 0, subcheck_id: Some(1) },
            TestCaseSpec { name: "c2".to_owned(), score: 0, subcheck_id: Some(1) },
            TestCaseSpec { name: "c3".to_owned(), score: 0, subcheck_id: Some(2) },
        ]);
        task.subchecks = {
            let mut m = SubcheckConfig::new();
            m.insert(1, SubcheckScore { score: 50 });
            m.insert(2, SubcheckScore { score: 50 });
            m
        };

        // c1 and c3 match the reference "7"; c2 gets "8" instead, so it is the only WA.
        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::scripted(|invocation| {
            if let Some(path) = &invocation.stdout_path {
                let body = if path.ends_with("c2.out") { "8\n" } else { "7\n" };
                std::fs::write(path, body).unwrap();
            }
            sandbox::SandboxOutcome {
                code: SandboxResultCode::Success,
                stats: SandboxStats::default(),
                error: String::new(),
            }
        }));
        let grader = Grader::new(sample_config(base.path(), test_cases.path(), spj_dir.path()), executor);

        let mut events = Vec::new();
        grader.grade(&task, &mut |event| events.push(event));

        match events.last().unwrap() {
            Event::Final { status, score, .. } => {
                assert_eq!(50, *score);
                assert_eq!(Verdict::WrongAnswer.code(), *status);
            }
            _ => panic!("expected a final event"),
        }
    }

    #[test]
    fn test_spj_accepts_regardless_of_md5() {
        let base = tempfile::tempdir().unwrap();
        let test_cases = tempfile::tempdir().unwrap();
        let spj_dir = tempfile::tempdir().unwrap();
        let bundle = test_cases.path().join("bundle1");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("test1.in"), "anything\n").unwrap();
        std::fs::write(bundle.join("test1.md5"), "0".repeat(32)).unwrap();
        std::fs::write(bundle.join("test1.ans"), "reference\n").unwrap();

        let spj_bundle = spj_dir.path().join("spj1");
        std::fs::create_dir_all(&spj_bundle).unwrap();
        std::fs::write(spj_bundle.join("checker.cpp"), "// checker").unwrap();
        std::fs::write(spj_bundle.join("checker"), "#!/bin/sh\nexit 0\n").unwrap();

        let mut task = sample_task("bundle1", vec![TestCaseSpec {
            name: "test1".to_owned(), score: 100, subcheck_id: None,
        }]);
        task.spj_id = Some("spj1".to_owned());

        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::scripted(|invocation| {
            if let Some(path) = &invocation.stdout_path {
                // Both the judgee run and the checker run write to `*.out`-ish paths; the judgee
                // writes something that would fail a literal md5 comparison, and the checker
                // (invoked with argv containing the answer file) always exits 0.
                if invocation.args.len() >= 3 {
                    // This is the checker invocation: no output file needed, exit 0.
                } else {
                    std::fs::write(path, "totally different from reference\n").unwrap();
                }
            }
            sandbox::SandboxOutcome {
                code: SandboxResultCode::Success,
                stats: SandboxStats { exit_code: 0, ..Default::default() },
                error: String::new(),
            }
        }));
        let grader = Grader::new(sample_config(base.path(), test_cases.path(), spj_dir.path()), executor);

        let mut events = Vec::new();
        grader.grade(&task, &mut |event| events.push(event));

        match events.last().unwrap() {
            Event::Final { status, score, .. } => {
                assert_eq!(Verdict::Accepted.code(), *status);
                assert_eq!(100, *score);
            }
            _ => panic!("expected a final event"),
        }
    }
}
