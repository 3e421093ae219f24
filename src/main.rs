use hostrig::cli::commands::{CliArgs, Commands};
use hostrig::cli::handlers::{handle_config, handle_probe, handle_provision, handle_verify};
use hostrig::report::{EXIT_SUCCESS, EXIT_USAGE};
use hostrig::util::{init_logging, LoggingConfig};
use hostrig::VERSION;

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, warn};

#[tokio::main]
async fn main() {
    // clap's own exit code for bad arguments would read as a partial failure
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_logging(LoggingConfig::from_args(
        args.log_level.as_deref(),
        args.verbose,
        args.quiet,
    ));

    debug!("hostrig v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current step and stopping health checks");
            let _ = cancel_tx.send(true);
        }
    });

    let exit_code = match &args.command {
        Commands::Provision(provision_args) => handle_provision(provision_args, cancel_rx).await,
        Commands::Probe(probe_args) => handle_probe(probe_args).await,
        Commands::Verify(verify_args) => handle_verify(verify_args, cancel_rx).await,
        Commands::Config(config_args) => handle_config(config_args),
    };

    std::process::exit(exit_code);
}
