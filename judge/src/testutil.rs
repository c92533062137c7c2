//! Test-only `Executor` double. The Grader, Comparator and Evaluator logic is exercised against
//! scripted outcomes instead of forking real sandboxed processes, so unit and integration tests
//! run fast, unprivileged and without an installed compiler toolchain.

use std::sync::Mutex;

use sandbox::{Executor, ExecutorInvocation, SandboxOutcome};

/// An `Executor` whose behavior is supplied by the test as a closure over the invocation it
/// receives. Useful when the outcome must depend on which binary/args/redirections were built
/// (e.g. writing to `invocation.stdout_path` to simulate a program's output).
pub struct FakeExecutor {
    respond: Box<dyn Fn(&ExecutorInvocation) -> SandboxOutcome + Sync + Send>,
    invocations: Mutex<Vec<PathSnapshot>>,
}

/// A minimal, cloneable snapshot of an invocation, kept around so tests can assert on what the
/// driver asked the sandbox to do without fighting `ExecutorInvocation`'s non-`Clone` fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathSnapshot {
    pub program: std::path::PathBuf,
    pub args: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub seccomp_policy: Option<String>,
}

impl FakeExecutor {
    /// Build an executor whose response to every invocation is computed by `respond`.
    pub fn scripted<F>(respond: F) -> Self
        where F: Fn(&ExecutorInvocation) -> SandboxOutcome + Sync + Send + 'static {
        FakeExecutor { respond: Box::new(respond), invocations: Mutex::new(Vec::new()) }
    }

    /// Snapshots of every invocation received so far, in call order.
    pub fn invocations(&self) -> Vec<PathSnapshot> {
        self.invocations.lock().unwrap().clone()
    }
}

impl Executor for FakeExecutor {
    fn run(&self, invocation: ExecutorInvocation) -> SandboxOutcome {
        self.invocations.lock().unwrap().push(PathSnapshot {
            program: invocation.program.clone(),
            args: invocation.args.clone(),
            uid: invocation.uid,
            gid: invocation.gid,
            seccomp_policy: invocation.seccomp_policy.clone(),
        });
        (self.respond)(&invocation)
    }
}
