//! Command line driver for installing and uninstalling COM shell extension
//! servers, against either the live registry or a deferred `.reg` file.

mod elevation;
mod output;

use std::path::{Path, PathBuf};

use clap::{ErrorKind, Parser, Subcommand};

use shellreg::descriptor::{self, ServerDescriptor};
use shellreg::error::RegistryError;
use shellreg::manager;
use shellreg::regfile::RegFileRegistry;
use shellreg::service::{RegistryKey, RegistryService};

use crate::elevation::ElevationDecision;
use crate::output::Output;

/// The tool's own settings key, maintained under the scope root.
const SETTINGS_KEY_PATH: &str = "SOFTWARE\\ShellReg";

/// Event source installed servers log to.
const EVENT_SOURCE_NAME: &str = "shellreg";

/// A command line tool for registering COM shell extension servers.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Console owner to re-attach to after an elevated re-exec.
    #[clap(long, global = true, hide = true)]
    parent: Option<u32>,

    #[clap(subcommand)]
    verb: Option<Verb>,
}

#[derive(Subcommand, Debug)]
pub enum Verb {
    /// Install and register the servers described by a manifest.
    Install {
        /// The server manifest to install.
        path: PathBuf,

        /// Record the full module path instead of the bare file name.
        #[clap(long)]
        codebase: bool,

        /// Register for the current user only.
        #[clap(long)]
        user: bool,

        /// Write the changes to a .reg file instead of the live registry.
        #[clap(long)]
        outfile: Option<PathBuf>,
    },

    /// Unregister and uninstall the servers described by a manifest.
    Uninstall {
        /// The server manifest to uninstall.
        path: PathBuf,

        /// Unregister from the current user only.
        #[clap(long)]
        user: bool,

        /// Write the changes to a .reg file instead of the live registry.
        #[clap(long)]
        outfile: Option<PathBuf>,
    },

    /// Show or change tool settings.
    Config {
        /// Change settings for the current user only.
        #[clap(long)]
        user: bool,

        /// Settings to change, as name=value (a bare name= deletes).
        params: Vec<String>,
    },

    /// Register the event source installed servers log to.
    #[clap(name = "enableeventlog")]
    EnableEventLog,
}

fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
    let code = run(std::env::args().collect());
    std::process::exit(code);
}

fn run(argv: Vec<String>) -> i32 {
    let mut output = Output::new();

    let args = match Args::try_parse_from(&argv) {
        Ok(args) => args,
        Err(err)
            if err.kind() == ErrorKind::DisplayHelp
                || err.kind() == ErrorKind::DisplayVersion =>
        {
            let _ = err.print();
            return 0;
        }
        Err(err) => {
            // Anything unparseable degrades to the help screen.
            log::debug!("argument error: {}", err);
            show_welcome(&output);
            show_help(&output);
            return 1;
        }
    };

    if let Some(pid) = args.parent {
        if let Err(err) = output.attach_parent_console(pid) {
            // Keep going with the freshly allocated console.
            log::warn!("could not attach to console of process {}: {}", pid, err);
        }
    }

    let verb = match args.verb {
        Some(verb) => verb,
        None => {
            show_welcome(&output);
            show_help(&output);
            return 1;
        }
    };

    if elevation::decide(&verb, args.parent) == ElevationDecision::Required
        && !elevation::is_elevated()
    {
        return match elevation::relaunch_elevated() {
            Ok(code) => code,
            Err(err) => {
                output.error(&format!("Failed to restart with elevation: {}", err));
                2
            }
        };
    }

    show_welcome(&output);

    match verb {
        Verb::Install {
            path,
            codebase,
            user,
            outfile,
        } => install(&output, &path, codebase, user, outfile.as_deref()),
        Verb::Uninstall {
            path,
            user,
            outfile,
        } => uninstall(&output, &path, user, outfile.as_deref()),
        Verb::Config { user, params } => config(&output, user, &params),
        Verb::EnableEventLog => enable_event_log(&output),
    }
}

fn install(
    output: &Output,
    path: &Path,
    codebase: bool,
    user: bool,
    outfile: Option<&Path>,
) -> i32 {
    let servers = match load_servers(output, path) {
        Some(servers) => servers,
        None => return 2,
    };
    let registry = match open_registry(user, outfile) {
        Ok(registry) => registry,
        Err(reason) => {
            output.error(&reason);
            return 2;
        }
    };

    for server in &servers {
        output.message(&format!(
            "Preparing to install ({}): {}",
            registry, server.display_name
        ));
        let result = manager::install_server(server, registry.as_ref(), codebase)
            .and_then(|_| manager::register_server(server, registry.as_ref()));
        match result {
            Ok(()) => output.success(&format!(
                "    {} installed and registered.",
                server.display_name
            )),
            Err(err) => {
                // Report and move on; one bad server never aborts the batch.
                output.error(&format!(
                    "Failed to install and register the server: {}",
                    err
                ));
            }
        }
    }
    0
}

fn uninstall(output: &Output, path: &Path, user: bool, outfile: Option<&Path>) -> i32 {
    let servers = match load_servers(output, path) {
        Some(servers) => servers,
        None => return 2,
    };
    let registry = match open_registry(user, outfile) {
        Ok(registry) => registry,
        Err(reason) => {
            output.error(&reason);
            return 2;
        }
    };

    for server in &servers {
        output.message(&format!(
            "Preparing to uninstall ({}): {}",
            registry, server.display_name
        ));
        let result = manager::unregister_server(server, registry.as_ref())
            .and_then(|_| manager::uninstall_server(server, registry.as_ref()));
        match result {
            Ok(()) => output.success(&format!(
                "    {} unregistered and uninstalled.",
                server.display_name
            )),
            Err(err) => {
                output.error(&format!(
                    "Failed to unregister and uninstall the server: {}",
                    err
                ));
            }
        }
    }
    0
}

fn config(output: &Output, user: bool, params: &[String]) -> i32 {
    let registry = match open_registry(user, None) {
        Ok(registry) => registry,
        Err(reason) => {
            output.error(&reason);
            return 2;
        }
    };
    let settings = match registry
        .open_root_key()
        .and_then(|root| root.create_sub_key(SETTINGS_KEY_PATH))
    {
        Ok(settings) => settings,
        Err(err) => {
            output.error(&format!("Could not open the settings key: {}", err));
            return 2;
        }
    };

    if params.is_empty() {
        return match list_settings(settings.as_ref()) {
            Ok(entries) if entries.is_empty() => {
                output.message("No settings are set.");
                0
            }
            Ok(entries) => {
                for (name, value) in entries {
                    output.message(&format!("  {} = {}", name, value));
                }
                0
            }
            Err(err) => {
                output.error(&format!("Could not read the settings key: {}", err));
                2
            }
        };
    }

    for param in params {
        let result = match param.split_once('=') {
            Some((name, "")) => settings.delete_value(name, false),
            Some((name, value)) => settings.set_value(name, value),
            None => {
                output.error(&format!("Expected name=value, got '{}'.", param));
                return 2;
            }
        };
        if let Err(err) = result {
            output.error(&format!("Could not apply '{}': {}", param, err));
            return 2;
        }
    }
    output.success("Configuration updated.");
    0
}

#[cfg(windows)]
fn enable_event_log(output: &Output) -> i32 {
    match eventlog::register(EVENT_SOURCE_NAME) {
        Ok(()) => {
            output.success("Event log enabled.");
            0
        }
        Err(err) => {
            output.error(&format!("Failed to enable the event log: {}", err));
            2
        }
    }
}

#[cfg(not(windows))]
fn enable_event_log(output: &Output) -> i32 {
    output.error("The event log is only available on Windows.");
    2
}

fn load_servers(output: &Output, path: &Path) -> Option<Vec<ServerDescriptor>> {
    match descriptor::load_descriptors(path) {
        Ok(servers) => Some(servers),
        Err(err) => {
            output.error("Could not load any registrable servers from the target path.");
            output.error(&err.to_string());
            None
        }
    }
}

fn open_registry(
    user: bool,
    outfile: Option<&Path>,
) -> Result<Box<dyn RegistryService>, String> {
    if let Some(path) = outfile {
        return Ok(Box::new(RegFileRegistry::new(user, path)));
    }
    #[cfg(windows)]
    {
        use shellreg::live::LiveRegistry;
        use shellreg::service::RegistrationType;

        return Ok(Box::new(LiveRegistry::new(user, RegistrationType::host())));
    }
    #[cfg(not(windows))]
    {
        Err("the live registry is only available on Windows; use --outfile".to_owned())
    }
}

fn list_settings(
    settings: &dyn RegistryKey,
) -> Result<Vec<(String, String)>, RegistryError> {
    let mut entries = Vec::new();
    for name in settings.get_value_names()? {
        if let Some(value) = settings.get_value(&name)? {
            entries.push((name, value));
        }
    }
    Ok(entries)
}

fn show_welcome(output: &Output) {
    output.message("");
    output.message("========================================");
    output.message("shellreg - Server Registration Manager");
    output.message("========================================");
    output.message("");
}

fn show_help(output: &Output) {
    output.message("Usage: shellreg <verb> [arguments] [options]");
    output.message("");
    output.message("Verbs:");
    output.message("  install <manifest>    Install and register the manifest's servers.");
    output.message("                        Options: --codebase --user --outfile <file>");
    output.message("  uninstall <manifest>  Unregister and uninstall the manifest's servers.");
    output.message("                        Options: --user --outfile <file>");
    output.message("  config [name=value]   Show or change tool settings. Options: --user");
    output.message("  enableeventlog        Register the shellreg event source.");
    output.message("  help                  Show this help.");
}
