//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Serve the HTTP API and publish reset requests to the queue
    Api,
    /// Consume reset requests and send the emails
    Worker,
    /// Run the API and the worker in one process over an in-memory queue
    Standalone,
}
