use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use flotilla::{
    AppResult, EchoHandler, FleetConfig, HandlerRegistry, LineDecoder, LineEncoder,
    ProcessLifecycle, ServerOrchestrator,
};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

/// Registers the handlers shipped with the binary: an echo handler for
/// every configured endpoint plus the newline codecs. Library users
/// register their own components instead.
fn builtin_registry(fleet: &FleetConfig) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for endpoint in &fleet.endpoints {
        registry.register_handler(
            "EchoHandler",
            endpoint.name.clone(),
            1,
            true,
            Arc::new(|| Box::new(EchoHandler)),
        );
    }
    registry.register_decoder("LineDecoder", Arc::new(|| Box::new(LineDecoder::default())));
    registry.register_encoder("LineEncoder", Arc::new(|| Box::new(LineEncoder)));
    registry
}

fn main() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();
    if std::env::var("RUST_LOG").is_err() {
        let level = match commandline.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }

    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("conf.toml"), PathBuf::from);
    let fleet = FleetConfig::load(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", fleet);
        return Ok(());
    }

    let _log_guard = flotilla::setup_tracing(&fleet.log);

    let registry = builtin_registry(&fleet).freeze();
    let mut orchestrator = ServerOrchestrator::new(&fleet, &registry)?;
    orchestrator.start()?;

    let mut lifecycle = ProcessLifecycle::new();
    lifecycle.on_shutdown(move || orchestrator.shutdown());
    lifecycle.run()?;

    info!("fleet shutdown complete");
    Ok(())
}
