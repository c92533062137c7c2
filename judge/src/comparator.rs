//! Answer comparison: the default normalized-hash comparator. The SPJ comparator lives in
//! `crate::spj` since it needs the Runner Driver to invoke the checker.

use std::path::Path;

use crate::model::Verdict;

/// Outcome of comparing a program's output against a reference answer.
pub struct ComparisonOutcome {
    pub verdict: Verdict,
    /// Empty for `Accepted`; the offending payload otherwise.
    pub output: Vec<u8>,
}

/// Normalize a captured output blob the way the reference hash was computed: strip trailing
/// whitespace from the whole blob, then right-strip every line, then rejoin with `\n`.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &[u8]) -> Vec<u8> {
    let trimmed = trim_trailing_whitespace(raw);
    let text = String::from_utf8_lossy(trimmed);
    text.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

fn trim_trailing_whitespace(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && raw[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &raw[..end]
}

/// Load and validate a `.md5` reference file: exactly 32 lowercase hex characters, no surrounding
/// whitespace. Anything else (missing file, wrong length, uppercase, stray newline) is treated as
/// "no usable reference" -- both conditions collapse to the same `SystemError` verdict.
pub fn load_reference_hash(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    if text.len() == 32 && text.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        Some(text)
    } else {
        None
    }
}

/// Compare the captured output at `out_path` against the reference hash at `md5_path`. Callers
/// must have already established that `out_path` exists (a missing output file is a distinct
/// `WrongAnswer` case handled by the per-case evaluator, not this function).
pub fn compare_default(out_path: &Path, md5_path: &Path) -> ComparisonOutcome {
    let raw = match std::fs::read(out_path) {
        Ok(bytes) => bytes,
        Err(_) => {
            return ComparisonOutcome {
                verdict: Verdict::SystemError,
                output: b"Test answer hash not found!".to_vec(),
            };
        }
    };

    let digest = format!("{:x}", md5::compute(normalize(&raw)));
    match load_reference_hash(md5_path) {
        None => ComparisonOutcome {
            verdict: Verdict::SystemError,
            output: b"Test answer hash not found!".to_vec(),
        },
        Some(reference) if reference == digest => {
            ComparisonOutcome { verdict: Verdict::Accepted, output: Vec::new() }
        }
        Some(_) => ComparisonOutcome { verdict: Verdict::WrongAnswer, output: raw },
    }
}
