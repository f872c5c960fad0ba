//! `keel config`: validate a config file and print the effective settings.

use keel_dispatch::DispatcherConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct Effective<'a> {
    dispatcher: &'a DispatcherConfig,
}

pub fn execute(file: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(file.as_deref())?;
    let effective = Effective {
        dispatcher: &config,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&effective)?);
    } else {
        print!("{}", toml::to_string_pretty(&effective)?);
        println!();
        println!(
            "# resolved worker threads: {}",
            config.effective_worker_threads()
        );
    }

    Ok(())
}
