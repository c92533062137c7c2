//! This crate implements the core grading pipeline of the judge: the Language Registry, the
//! Compiler and Runner Drivers, the Work-Dir Scope, the default and SPJ comparators, the per-case
//! evaluator and the Grader that ties them together into one `grade` call per task.
//!
//! The Sandbox Executor itself lives in the sibling `sandbox` crate and is consumed here only
//! through its `Executor` trait -- this crate never forks a process directly.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate nix;
extern crate sandbox;

pub mod comparator;
pub mod compiler;
pub mod grader;
pub mod model;
pub mod registry;
pub mod runner;
pub mod spj;
pub mod template;
pub mod workdir;

#[cfg(test)]
pub mod testutil;

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Nix(::nix::Error);
    }

    errors {
        /// The per-task working directory could not be created or mode-hardened.
        WorkDirInitFailed {
            description("failed to init runtime dir")
        }

        /// `language_tag` named on the inbound task is not in the Language Registry.
        UnknownLanguage(tag: String) {
            description("unknown language")
            display("unknown language: \"{}\"", tag)
        }

        /// `TEST_CASE_DIR/{case_bundle_id}` does not exist.
        TestBundleNotFound(case_bundle_id: String) {
            description("Test data not found!")
            display("Test data not found!")
        }
    }
}

/// Chown `path` to `(uid, gid)`. Shared by the Compiler and Runner Drivers, which must hand the
/// workdir over to a different principal before each phase.
pub(crate) fn chown_workdir(path: &std::path::Path, uid: u32, gid: u32) -> Result<()> {
    nix::unistd::chown(path, Some(nix::unistd::Uid::from_raw(uid)), Some(nix::unistd::Gid::from_raw(gid)))?;
    Ok(())
}
