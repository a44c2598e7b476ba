use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cipherdo",
    about = "Task list with every field encrypted at rest",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to listing tasks when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Check key material and round-trip a sample value through every field transformer.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage tasks.
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum TaskCommand {
    /// List tasks.
    List,
    /// Add a task.
    Add {
        title: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// Estimated effort in hours.
        #[arg(long, default_value_t = 0.0)]
        estimate: f64,
    },
    /// Mark a task done.
    Done { id: String },
    /// Reopen a finished task.
    Reopen { id: String },
    /// Delete a task.
    Rm { id: String },
}
