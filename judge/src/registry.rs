//! The Language Registry: a process-wide immutable table mapping a language tag to its
//! {compile spec, run spec} pair.
//!
//! This is a `const`-like structure loaded once at startup via a `static mut ... Once` pair.
//! Entries here are data (command templates), not trait objects loaded from a dynamic library:
//! there is no plugin mechanism, just a table.

use std::collections::HashMap;
use std::sync::Once;
use std::time::Duration;

use crate::model::{CompileSpec, LanguageSpec, RunSpec};

const MEGABYTE: u64 = 1024 * 1024;

static mut REGISTRY: Option<HashMap<&'static str, LanguageSpec>> = None;
static REGISTRY_ONCE: Once = Once::new();

fn build_registry() -> HashMap<&'static str, LanguageSpec> {
    let mut table = HashMap::new();

    table.insert("c", LanguageSpec {
        compile: Some(CompileSpec {
            src_name: "main.c".to_owned(),
            exe_name: "main".to_owned(),
            max_cpu_time: Duration::from_secs(10),
            max_real_time: Duration::from_secs(20),
            max_memory_bytes: 256 * MEGABYTE,
            compile_command_template:
                "/usr/bin/gcc -O2 -std=gnu11 -DONLINE_JUDGE -o {exe_path} {src_path} -lm".to_owned(),
            env: Vec::new(),
        }),
        run: RunSpec {
            command_template: "{exe_path}".to_owned(),
            seccomp_rule: "standard".to_owned(),
            env: Vec::new(),
        },
        exe_name: "main".to_owned(),
    });

    table.insert("cpp", LanguageSpec {
        compile: Some(CompileSpec {
            src_name: "main.cpp".to_owned(),
            exe_name: "main".to_owned(),
            max_cpu_time: Duration::from_secs(10),
            max_real_time: Duration::from_secs(20),
            max_memory_bytes: 256 * MEGABYTE,
            compile_command_template:
                "/usr/bin/g++ -O2 -std=c++17 -DONLINE_JUDGE -o {exe_path} {src_path}".to_owned(),
            env: Vec::new(),
        }),
        run: RunSpec {
            command_template: "{exe_path}".to_owned(),
            seccomp_rule: "standard".to_owned(),
            env: Vec::new(),
        },
        exe_name: "main".to_owned(),
    });

    table.insert("python3", LanguageSpec {
        compile: None,
        run: RunSpec {
            command_template: "/usr/bin/python3 {exe_path}".to_owned(),
            seccomp_rule: "interpreted".to_owned(),
            env: Vec::new(),
        },
        exe_name: "main.py".to_owned(),
    });

    // Dedicated entry for the SPJ checker language: always C++, always compiled with the larger
    // limits the SPJ Pipeline applies explicitly, so the compile caps recorded here are
    // descriptive only (the SPJ Pipeline uses its own hardcoded caps per spec).
    table.insert("__spj_checker", LanguageSpec {
        compile: Some(CompileSpec {
            src_name: "checker.cpp".to_owned(),
            exe_name: "checker".to_owned(),
            max_cpu_time: Duration::from_secs(10),
            max_real_time: Duration::from_secs(20),
            max_memory_bytes: 1024 * MEGABYTE,
            compile_command_template:
                "/usr/bin/g++ -O2 -std=c++14 -DONLINE_JUDGE -o {exe_path} {src_path}".to_owned(),
            env: Vec::new(),
        }),
        run: RunSpec {
            command_template: "{exe_path} {in_file_path} {user_out_file_path} {answer_file_path}".to_owned(),
            seccomp_rule: "checker".to_owned(),
            env: Vec::new(),
        },
        exe_name: "checker".to_owned(),
    });

    table
}

/// Look up a language by tag. Returns `None` if the tag is not registered.
pub fn lookup(language_tag: &str) -> Option<LanguageSpec> {
    unsafe {
        REGISTRY_ONCE.call_once(|| {
            REGISTRY = Some(build_registry());
        });
        REGISTRY.as_ref().unwrap().get(language_tag).cloned()
    }
}

/// The fixed language spec used to compile and run the SPJ checker. Not reachable through
/// `lookup` by a submitter-controlled `language_tag`.
pub fn spj_checker_spec() -> LanguageSpec {
    lookup("__spj_checker").expect("__spj_checker entry must always be registered")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_languages() {
        assert!(lookup("c").is_some());
        assert!(lookup("cpp").is_some());
        assert!(lookup("python3").is_some());
    }

    #[test]
    fn test_lookup_unknown_language() {
        assert!(lookup("brainfuck").is_none());
    }

    #[test]
    fn test_spj_checker_not_reachable_by_submitter() {
        assert!(lookup("spj").is_none());
        assert!(spj_checker_spec().compile.is_some());
    }
}
