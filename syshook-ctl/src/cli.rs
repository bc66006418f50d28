use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "syshook-ctl")]
#[command(version, about = "Control syscall callbacks of a running sandbox", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Inspect the running service
    syshook-ctl hooks
    syshook-ctl callbacks

    # Push callbacks from a script file or inline
    syshook-ctl load callbacks.lua
    syshook-ctl eval 'hooks.AddCbBefore(2, function(path) hooks.log(hooks.readString(path, 256)) end)'

    # Remove callbacks
    syshook-ctl unregister --before 2 --after 60
    syshook-ctl unregister --all
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Command socket (unix:<path>, <path> or <host>:<port>)
    #[arg(
        short,
        long,
        value_name = "ADDR",
        env = "SYSHOOK_SOCKET",
        default_value = "unix:/tmp/syshook.sock",
        global = true
    )]
    pub socket: String,

    /// Print raw protocol responses
    #[arg(long, global = true)]
    pub json: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the hooks scripts can call
    Hooks,

    /// List registered callbacks
    Callbacks,

    /// Run a script file once on the service
    Load {
        /// Lua source file
        file: PathBuf,
    },

    /// Run inline script source once on the service
    Eval {
        /// Lua source
        source: String,
    },

    /// Remove callbacks
    Unregister(UnregisterArgs),
}

#[derive(Args, Debug, Default, PartialEq, Eq)]
#[group(required = true, multiple = true)]
pub struct UnregisterArgs {
    /// Remove every callback
    #[arg(long, conflicts_with_all = ["before", "after"])]
    pub all: bool,

    /// Syscall numbers whose before callback is removed
    #[arg(long, value_name = "SYSNO", num_args = 1..)]
    pub before: Vec<u64>,

    /// Syscall numbers whose after callback is removed
    #[arg(long, value_name = "SYSNO", num_args = 1..)]
    pub after: Vec<u64>,
}
