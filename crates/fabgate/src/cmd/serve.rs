use futures_core::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use fabgate::bridge::BridgeListener;
use fabgate::config::{ConfigError, GatewayConfig, PrinterProfile};
use fabgate::event::GatewayEvent;
use fabgate::sim::{SimCommandTransport, SimLinkTransport};
use fabgate::svc::{
    self,
    command::{CommandService, TcpCommandTransport},
    transfer::TransferService,
    video::VideoService,
};
use fabgate_link::{LinkError, LinkSession, LinkSupervisor, LinkTransport};
use fabgate_service::ServiceManager;

use crate::cmd::ServeArgs;
use crate::exit::{bridge_error, config_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    runtime.block_on(serve(args))
}

async fn serve(args: ServeArgs) -> CliResult<i32> {
    let config = load_config(&args)?;
    let profile = config
        .printer()
        .cloned()
        .ok_or_else(|| CliError::new(USAGE, "no printer configured"))?;

    tracing::info!(
        printer = %profile.name,
        model = %profile.model,
        simulate = args.simulate,
        "gateway starting"
    );

    let manager: ServiceManager<GatewayEvent> = ServiceManager::new();
    let link = if args.simulate {
        LinkSupervisor::new(SimLinkTransport::new(), config.link_config())
    } else {
        LinkSupervisor::new(SessionUnavailable, config.link_config())
    };
    let handle = link.handle();

    let commands = if args.simulate {
        CommandService::new(SimCommandTransport::new(profile.device_id.clone()))
    } else {
        CommandService::new(TcpCommandTransport::new(profile.command_addr.clone()))
    };
    let video = VideoService::new(handle.clone());
    let transfer = TransferService::new(handle.clone(), config.transfer_config());

    for outcome in [
        manager.register(svc::LINK, link),
        manager.register(svc::COMMANDS, commands),
        manager.register(svc::VIDEO, video),
        manager.register(svc::TRANSFER, transfer),
    ] {
        outcome.map_err(|err| CliError::new(INTERNAL, format!("registration failed: {err}")))?;
    }

    // A printer that is off at boot leaves these in Error rather than
    // aborting the daemon; a later client attach or restart retries.
    for name in [svc::LINK, svc::COMMANDS] {
        if let Err(err) = manager.start(name).await {
            tracing::warn!(service = name, error = %err, "service did not start");
        }
    }

    let socket = args.socket.clone().unwrap_or_else(|| config.socket.clone());
    let listener = BridgeListener::bind(&socket, manager.clone(), config, handle)
        .map_err(|err| bridge_error("bridge bind failed", err))?;

    let cancel = CancellationToken::new();
    let accept = tokio::spawn(listener.run(cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::warn!(error = %err, "signal wait failed"),
    }

    cancel.cancel();
    if let Err(err) = accept.await {
        tracing::warn!(error = %err, "bridge listener task panicked");
    }
    manager.shutdown().await;
    tracing::info!("gateway stopped");
    Ok(SUCCESS)
}

fn load_config(args: &ServeArgs) -> CliResult<GatewayConfig> {
    let mut config = match GatewayConfig::load(&args.config) {
        Ok(config) => config,
        Err(err @ ConfigError::Read { .. }) if args.simulate => {
            tracing::debug!(error = %err, "configuration not read, simulating with defaults");
            GatewayConfig::default()
        }
        Err(err) => return Err(config_error("configuration load failed", err)),
    };
    if args.simulate && config.printers.is_empty() {
        config.printers.push(simulated_profile());
    }
    Ok(config)
}

fn simulated_profile() -> PrinterProfile {
    PrinterProfile {
        name: "simulated".to_string(),
        model: "M5".to_string(),
        device_id: "SIM0001".to_string(),
        command_addr: "127.0.0.1:8899".to_string(),
        p2p_addr: "127.0.0.1:8898".to_string(),
    }
}

/// The peer-to-peer session encoding ships as an external provider, not
/// in this binary. Without `--simulate` the link can only report that.
struct SessionUnavailable;

impl LinkTransport for SessionUnavailable {
    fn connect(&self) -> BoxFuture<'_, fabgate_link::Result<Box<dyn LinkSession>>> {
        Box::pin(async {
            Err(LinkError::Connect(
                "no peer-to-peer session provider is built in; run with --simulate".into(),
            ))
        })
    }
}
