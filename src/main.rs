mod bootstrap;
mod capabilities;
mod config;
mod context;
mod environment;
mod error;
mod filesystem;
mod host;
mod identity;
mod launch;
mod limits;
mod logging;
mod supervisor;

use bootstrap::Bootstrap;
use capabilities::{CapabilityManager, describe};
use clap::Parser;
use config::{Config, Layout};
use environment::EnvTable;
use error::exit_code;
use host::SystemHost;
use identity::{Identity, IdentityResolver, PasswdResolver};
use launch::LaunchSpec;
use log::{error, warn};
use nix::unistd::{Gid, Uid};
use std::process::ExitCode;
use supervisor::ProcessMonitor;

fn main() -> ExitCode {
    let config = Config::parse();
    logging::init(config.debug.log_level);

    let layout = config.layout();

    if config.debug.print_launch {
        return print_launch(&layout);
    }

    let mut bootstrap = Bootstrap::new(layout, SystemHost, PasswdResolver, ProcessMonitor::new());

    match bootstrap.run() {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
        Err(error) => {
            error!("{error:#}");
            ExitCode::from(exit_code(&error))
        }
    }
}

/// Show what would be launched without touching the system.
fn print_launch(layout: &Layout) -> ExitCode {
    let identity = PasswdResolver.resolve(&layout.user).unwrap_or_else(|error| {
        warn!("{error:#}; using a placeholder identity");
        Identity {
            name: layout.user.clone(),
            home: format!("/home/{}", layout.user).into(),
            shell: "/bin/sh".into(),
            uid: Uid::from_raw(65534),
            gid: Gid::from_raw(65534),
        }
    });

    match EnvTable::for_identity(layout, &identity) {
        Ok(table) => {
            for (name, value) in table.iter() {
                println!("{name}={value}");
            }
        }
        Err(error) => {
            error!("{error:#}");
            return ExitCode::from(exit_code(&error));
        }
    }

    let spec = match LaunchSpec::compositor(layout, identity) {
        Ok(spec) => spec,
        Err(error) => {
            error!("{error:#}");
            return ExitCode::from(exit_code(&error));
        }
    };
    println!("[LAUNCH]: {}", spec.argv.join(" "));
    println!("[RETAINED CAPABILITIES]: {}", describe(&spec.capabilities));

    match CapabilityManager::current() {
        Ok(snapshot) => println!("[CAPABILITY SNAP]: {snapshot}"),
        Err(error) => warn!("{error:#}"),
    }

    ExitCode::SUCCESS
}
