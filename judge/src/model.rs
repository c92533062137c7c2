//! Data model shared by every component of the grading pipeline: the verdict taxonomy, the
//! language/task/test-case shapes, and the result types the Grader accumulates and reports.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-case or per-task terminal classification. Declared in increasing numeric order so the
/// derived `Ord` matches the signed ordering the aggregation rules rely on: "worse" always
/// compares greater, except that `CompileError` and `WrongAnswer` sit below `Accepted`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Verdict {
    CompileError = -2,
    WrongAnswer = -1,
    Accepted = 0,
    TimeLimitExceeded = 1,
    MemoryLimitExceeded = 2,
    RuntimeError = 3,
    SystemError = 4,
}

impl Verdict {
    /// The wire/report representation of this verdict.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<Verdict> for i32 {
    fn from(v: Verdict) -> i32 {
        v.code()
    }
}

#[cfg(feature = "serde")]
impl Serialize for Verdict {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where S: serde::Serializer {
        serializer.serialize_i32(self.code())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where D: serde::Deserializer<'de> {
        let code = i32::deserialize(deserializer)?;
        match code {
            -2 => Ok(Verdict::CompileError),
            -1 => Ok(Verdict::WrongAnswer),
            0 => Ok(Verdict::Accepted),
            1 => Ok(Verdict::TimeLimitExceeded),
            2 => Ok(Verdict::MemoryLimitExceeded),
            3 => Ok(Verdict::RuntimeError),
            4 => Ok(Verdict::SystemError),
            other => Err(serde::de::Error::custom(format!("unknown verdict code {}", other))),
        }
    }
}

/// Specification of how to invoke the compiler for a language, or `None` for languages with no
/// separate compile step (interpreted sources run directly).
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompileSpec {
    /// Filename the submitted source is written to inside the workdir (e.g. `"main.c"`).
    pub src_name: String,

    /// Filename the compiler is expected to produce inside the workdir (e.g. `"main"`).
    pub exe_name: String,

    /// CPU time cap for the compile step.
    pub max_cpu_time: Duration,

    /// Wall time cap for the compile step.
    pub max_real_time: Duration,

    /// Memory cap for the compile step.
    pub max_memory_bytes: u64,

    /// Compile command template. `{src_path}` and `{exe_path}` are substituted with the absolute
    /// paths of the source and the expected executable, both rooted at the task's workdir.
    /// Example: `"gcc -O2 -std=gnu11 -DONLINE_JUDGE -o {exe_path} {src_path}"`.
    pub compile_command_template: String,

    /// Extra environment variables added on top of the inherited `PATH`.
    pub env: Vec<(String, String)>,
}

/// Specification of how to invoke the produced executable (or the interpreter, for languages
/// with no compile step) for one run.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunSpec {
    /// Run command template. `{exe_path}` is always substituted; when invoked with SPJ-style
    /// extra arguments, `{in_file_path}`, `{user_out_file_path}` and `{answer_file_path}` are
    /// also substituted.
    pub command_template: String,

    /// Name of the seccomp policy (resolved by `sandbox::policy`) applied to the run.
    pub seccomp_rule: String,

    /// Extra environment variables added on top of the inherited `PATH`.
    pub env: Vec<(String, String)>,
}

/// The compile/run pair describing one entry of the Language Registry.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LanguageSpec {
    /// `None` for languages with no separate compile step.
    pub compile: Option<CompileSpec>,

    pub run: RunSpec,

    /// Filename substituted into `{exe_path}` at run time. Equals `compile.exe_name` (the
    /// produced binary) when there is a compile step; equals the submitted source's own filename
    /// for interpreted languages, since the interpreter is pointed directly at the source.
    pub exe_name: String,
}

impl LanguageSpec {
    /// Filename the submitted source is written to inside the workdir: `compile.src_name` when
    /// there is a compile step, `exe_name` otherwise (the interpreter runs the source in place).
    pub fn source_file_name(&self) -> &str {
        self.compile.as_ref().map(|c| c.src_name.as_str()).unwrap_or(&self.exe_name)
    }
}

/// One entry of a task's test case sequence.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TestCaseSpec {
    /// Case name; identifies `{name}.in`/`{name}.md5`/`{name}.ans` inside the test bundle.
    pub name: String,

    /// Score awarded for this case in non-subtask mode, ignored in subtask mode (the group score
    /// from `SubcheckConfig` applies instead).
    pub score: i32,

    /// Presence of this field puts the whole task in subtask mode.
    pub subcheck_id: Option<u32>,
}

/// Score configuration for one named subcheck (subtask) group.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubcheckScore {
    pub score: i32,
}

/// Mapping from subcheck id to its group score. Ordered by key so aggregation and reporting are
/// deterministic.
pub type SubcheckConfig = BTreeMap<u32, SubcheckScore>;

/// Resource limits supplied by the caller for one task; the Runner Driver derives the real-time
/// cap and the compiler's own limits come from the Language Registry instead.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TaskLimits {
    pub max_cpu_time: Duration,
    pub max_memory_bytes: u64,
}

/// One grading request. Lives for the duration of exactly one `grade` call.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Task {
    pub task_id: String,

    /// Name of the test bundle directory under `TEST_CASE_DIR`.
    pub case_bundle_id: String,

    /// Name of the SPJ bundle directory under `SPJ_DIR`, if this task uses a special judge.
    pub spj_id: Option<String>,

    pub cases: Vec<TestCaseSpec>,

    pub subchecks: SubcheckConfig,

    pub source_code: String,

    pub language_tag: String,

    pub limits: TaskLimits,
}

impl Task {
    /// A task is in subtask mode iff at least one case carries a `subcheck_id`.
    pub fn is_subtask_mode(&self) -> bool {
        self.cases.iter().any(|c| c.subcheck_id.is_some())
    }
}

/// Statistics reported for one case or one compile step.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CaseStats {
    #[cfg_attr(feature = "serde", serde(rename = "time"))]
    pub cpu_time_ms: u64,
    #[cfg_attr(feature = "serde", serde(rename = "memory"))]
    pub memory_bytes: u64,
    pub exit_code: i32,
}

/// Outcome of grading one test case.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CaseResult {
    pub case_name: String,
    pub verdict: Verdict,

    /// Base64-encoded payload: empty for `Accepted`, the (possibly truncated) program output
    /// otherwise.
    pub output: String,

    pub stats: CaseStats,

    pub subcheck_id: Option<u32>,
}

/// Per-task aggregate statistics.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TaskStatistics {
    #[cfg_attr(feature = "serde", serde(rename = "max_time"))]
    pub max_time_ms: u64,
    #[cfg_attr(feature = "serde", serde(rename = "max_memory"))]
    pub max_memory_bytes: u64,
}

/// The three uid/gid principals the Grader runs sandboxed code as. Resolved once at process
/// startup and passed in by the caller (never looked up per task).
#[derive(Clone, Copy, Debug)]
pub struct Principals {
    pub compiler_uid: u32,
    pub compiler_gid: u32,
    pub code_uid: u32,
    pub code_gid: u32,
    pub spj_uid: u32,
    pub spj_gid: u32,
}

/// Process-wide configuration consumed by the Grader, passed explicitly rather than read from a
/// global so the Grader stays testable.
#[derive(Clone, Debug)]
pub struct GradingConfig {
    pub base_dir: PathBuf,
    pub test_case_dir: PathBuf,
    pub spj_dir: PathBuf,
    pub parallel_tests: usize,
    pub principals: Principals,

    /// When set, task workdirs are kept around after grading instead of being removed by the
    /// Work-Dir Scope. Meant for local debugging; never enabled by the wire protocol.
    pub debug_retain_workdir: bool,
}

/// One event in the incremental report stream emitted by `Grader::grade`.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum Event {
    #[cfg_attr(feature = "serde", serde(rename = "compile"))]
    Compile { data: String },

    #[cfg_attr(feature = "serde", serde(rename = "part"))]
    Part { test_case: String, output: String, status: i32 },

    #[cfg_attr(feature = "serde", serde(rename = "final"))]
    Final {
        status: i32,
        score: i32,
        statistics: TaskStatistics,
        log: String,
        detail: Vec<DetailEntry>,
    },
}

/// One entry of the `final` event's `detail` array.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetailEntry {
    pub case_name: String,
    pub status: i32,
    pub statistics: CaseStats,
    pub subcheck: Option<u32>,
}

impl From<&CaseResult> for DetailEntry {
    fn from(case: &CaseResult) -> Self {
        DetailEntry {
            case_name: case.case_name.clone(),
            status: case.verdict.code(),
            statistics: case.stats,
            subcheck: case.subcheck_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_ordering() {
        assert!(Verdict::CompileError < Verdict::WrongAnswer);
        assert!(Verdict::WrongAnswer < Verdict::Accepted);
        assert!(Verdict::Accepted < Verdict::TimeLimitExceeded);
        assert!(Verdict::TimeLimitExceeded < Verdict::MemoryLimitExceeded);
        assert!(Verdict::MemoryLimitExceeded < Verdict::RuntimeError);
        assert!(Verdict::RuntimeError < Verdict::SystemError);
    }

    #[test]
    fn test_verdict_codes() {
        assert_eq!(-2, Verdict::CompileError.code());
        assert_eq!(-1, Verdict::WrongAnswer.code());
        assert_eq!(0, Verdict::Accepted.code());
        assert_eq!(1, Verdict::TimeLimitExceeded.code());
        assert_eq!(2, Verdict::MemoryLimitExceeded.code());
        assert_eq!(3, Verdict::RuntimeError.code());
        assert_eq!(4, Verdict::SystemError.code());
    }

    #[test]
    fn test_subtask_mode_detection() {
        let mut task = sample_task();
        assert!(!task.is_subtask_mode());
        task.cases[0].subcheck_id = Some(1);
        assert!(task.is_subtask_mode());
    }

    fn sample_task() -> Task {
        Task {
            task_id: "t1".to_owned(),
            case_bundle_id: "bundle1".to_owned(),
            spj_id: None,
            cases: vec![TestCaseSpec { name: "test1".to_owned(), score: 10, subcheck_id: None }],
            subchecks: SubcheckConfig::new(),
            source_code: "int main() { return 0; }".to_owned(),
            language_tag: "c".to_owned(),
            limits: TaskLimits { max_cpu_time: Duration::from_millis(1000), max_memory_bytes: 1 << 27 },
        }
    }
}
