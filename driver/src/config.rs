//! This module maintains application wide configurations.
//!

use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

use judge::model::{GradingConfig, Principals};

use crate::{Error, ErrorKind, ResultExt, Result};

/// Provide application wide configurations, loaded once at startup from a YAML file.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Network related configuration: where the transport adapter listens.
    pub network: NetworkConfig,

    /// Judge engine related configurations, mapped onto `judge::model::GradingConfig`.
    pub engine: JudgeEngineConfig,
}

/// Provide network related configurations.
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    /// The address the length-prefixed-TCP transport adapter binds and listens on.
    pub listen_addr: String,
}

/// Provide judge engine related configurations: the process-wide configuration constants the
/// grading core needs at startup.
#[derive(Debug, Deserialize)]
pub struct JudgeEngineConfig {
    /// `BASE_DIR`: directory under which per-task working directories are created.
    pub base_dir: PathBuf,

    /// `TEST_CASE_DIR`: directory under which test-case bundles are stored.
    pub test_case_dir: PathBuf,

    /// `SPJ_DIR`: directory under which special-judge bundles are stored.
    pub spj_dir: PathBuf,

    /// `PARALLEL_TESTS`: fixed width of the per-case worker pool.
    pub parallel_tests: usize,

    /// Username of the *compiler* principal.
    pub compiler_user: String,

    /// Username of the *user-code* principal.
    pub code_user: String,

    /// Username of the *SPJ* principal.
    pub spj_user: String,

    /// When set, task working directories are retained after grading instead of being removed.
    /// Meant for local debugging; defaults to `false`.
    #[serde(default)]
    pub debug_retain_workdir: bool,
}

impl JudgeEngineConfig {
    /// Build a `GradingConfig` from this configuration, resolving the three principal usernames
    /// to uid/gid pairs via the passwd/group databases.
    pub fn to_grading_config(&self) -> Result<GradingConfig> {
        let compiler = crate::principals::resolve_user(&self.compiler_user)?;
        let code = crate::principals::resolve_user(&self.code_user)?;
        let spj = crate::principals::resolve_user(&self.spj_user)?;

        Ok(GradingConfig {
            base_dir: self.base_dir.clone(),
            test_case_dir: self.test_case_dir.clone(),
            spj_dir: self.spj_dir.clone(),
            parallel_tests: self.parallel_tests,
            principals: Principals {
                compiler_uid: compiler.0,
                compiler_gid: compiler.1,
                code_uid: code.0,
                code_gid: code.1,
                spj_uid: spj.0,
                spj_gid: spj.1,
            },
            debug_retain_workdir: self.debug_retain_workdir,
        })
    }
}

/// The application wide singleton object of application configuration.
static mut SINGLETON: Option<AppConfig> = None;

/// Get an `AppConfig` value containing application wide configurations. This function panics if
/// the configuration has not been initialized.
pub fn app_config() -> &'static AppConfig {
    unsafe {
        SINGLETON.as_ref().unwrap()
    }
}

/// Initialize configuration from the specified file. This function panics if the configuration
/// has already been initialized.
pub fn init_config<T: AsRef<Path>>(config_file: T) -> Result<()> {
    info!("Initializing application configuration from file: {}", config_file.as_ref().display());

    let config_content = std::fs::read_to_string(config_file)
        .chain_err(|| Error::from(ErrorKind::InvalidConfigFile))?;
    let config: AppConfig = serde_yaml::from_str(&config_content)
        .chain_err(|| Error::from(ErrorKind::InvalidConfigFile))?;

    unsafe {
        SINGLETON.replace(config);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_app_config_yaml() {
        let yaml = r#"
            network:
                listen_addr: "0.0.0.0:9132"
            engine:
                base_dir: "/var/wavejudge/run"
                test_case_dir: "/var/wavejudge/testcases"
                spj_dir: "/var/wavejudge/spj"
                parallel_tests: 4
                compiler_user: "wj-compiler"
                code_user: "wj-code"
                spj_user: "wj-spj"
        "#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!("0.0.0.0:9132", config.network.listen_addr);
        assert_eq!(PathBuf::from("/var/wavejudge/run"), config.engine.base_dir);
        assert_eq!(4, config.engine.parallel_tests);
        assert_eq!("wj-compiler", config.engine.compiler_user);
        assert!(!config.engine.debug_retain_workdir);
    }

    #[test]
    fn deserialize_app_config_yaml_with_debug_retain() {
        let yaml = r#"
            network:
                listen_addr: "127.0.0.1:9132"
            engine:
                base_dir: "/tmp/run"
                test_case_dir: "/tmp/testcases"
                spj_dir: "/tmp/spj"
                parallel_tests: 1
                compiler_user: "root"
                code_user: "root"
                spj_user: "root"
                debug_retain_workdir: true
        "#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.engine.debug_retain_workdir);
    }
}
