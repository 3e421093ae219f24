pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, Commands, ConfigArgs, ProbeArgs, ProvisionArgs, VerifyArgs};
pub use output::{OutputFormat, OutputFormatter};
