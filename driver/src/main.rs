#[macro_use]
extern crate error_chain;
extern crate libc;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;
extern crate clap;

extern crate judge;
extern crate sandbox;

mod config;
mod principals;
mod protocol;
mod transport;

use std::net::TcpListener;
use std::sync::Arc;

use log::info;

use judge::grader::Grader;
use sandbox::{Executor, UnixExecutor};

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        IoError(::std::io::Error);
        SerdeJsonError(::serde_json::Error);
        SerdeYamlError(::serde_yaml::Error);
        LogError(::log4rs::Error);
    }

    links {
        JudgeError(::judge::Error, ::judge::ErrorKind);
    }

    errors {
        InvalidConfigFile {
            description("invalid config file")
        }

        UnknownPrincipal(name: String) {
            description("unknown principal user")
            display("unknown principal user: \"{}\"", name)
        }

        MalformedTask(detail: String) {
            description("malformed task")
            display("malformed task: {}", detail)
        }

        FrameTooLarge(len: i32) {
            description("frame too large")
            display("frame length {} exceeds the maximum allowed size", len)
        }
    }
}

fn init_log(log_config_file: &str) -> Result<()> {
    log4rs::init_file(log_config_file, log4rs::file::Deserializers::default())?;
    Ok(())
}

fn run() -> Result<()> {
    let matches = clap::App::new("wave_judge")
        .version("0.1.0")
        .author("Lancern <msrlancern@126.com>")
        .about("Length-prefixed-TCP transport adapter for the grading core")
        .arg(clap::Arg::with_name("config")
            .short("c")
            .long("config")
            .takes_value(true)
            .default_value("config.yml")
            .help("path to the application configuration file"))
        .arg(clap::Arg::with_name("log_config")
            .long("log-config")
            .takes_value(true)
            .default_value("log4rs.yml")
            .help("path to the log4rs configuration file"))
        .get_matches();

    init_log(matches.value_of("log_config").unwrap())?;
    config::init_config(matches.value_of("config").unwrap())?;

    let app_config = config::app_config();
    let grading_config = app_config.engine.to_grading_config()?;

    let executor: Arc<dyn Executor> = Arc::new(UnixExecutor::new());
    let grader = Arc::new(Grader::new(grading_config, executor));

    let listener = TcpListener::bind(&app_config.network.listen_addr)?;
    info!("wave_judge listening on {}", app_config.network.listen_addr);

    transport::serve(listener, grader)?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
