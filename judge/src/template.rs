//! Minimal `{placeholder}` substitution for compile/run command templates, plus the
//! whitespace-tokenization the Compiler and Runner Drivers use to turn a formatted template into
//! an argv list. Templates are not shell syntax: no quoting, no escaping, placeholders expand to
//! exactly one argv token each, so test-bundle and workdir paths must not contain whitespace.

/// Replace every occurrence of `{name}` in `template` with its corresponding value in `vars`.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_owned();
    for (name, value) in vars {
        let placeholder = format!("{{{}}}", name);
        result = result.replace(&placeholder, value);
    }
    result
}

/// Split a formatted command into argv. The first token is the program path, the rest are
/// arguments.
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_owned()).collect()
}
