use std::time::Duration;

use serde_json::json;

use fabgate::bridge::{BridgeClient, Topic};

use crate::cmd::StatusArgs;
use crate::exit::{bridge_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_status, OutputFormat};

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(args: StatusArgs, format: OutputFormat) -> CliResult<i32> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    runtime.block_on(async {
        match tokio::time::timeout(EXCHANGE_TIMEOUT, query(&args)).await {
            Ok(result) => {
                let reply = result?;
                print_status(&reply, format);
                Ok(SUCCESS)
            }
            Err(_) => Err(CliError::new(TIMEOUT, "gateway did not answer in time")),
        }
    })
}

async fn query(args: &StatusArgs) -> CliResult<serde_json::Value> {
    let mut client = BridgeClient::connect(&args.socket, Topic::Ctrl)
        .await
        .map_err(|err| bridge_error("bridge connect failed", err))?;

    // The control topic greets with a ready marker before taking
    // documents; a close instead means the gate refused us.
    let ready = client
        .recv_json()
        .await
        .map_err(|err| bridge_error("bridge read failed", err))?
        .ok_or_else(|| CliError::new(FAILURE, "gateway closed the connection"))?;
    if ready.get("fabgate").is_none() {
        return Err(CliError::new(FAILURE, "unexpected greeting from gateway"));
    }

    client
        .send_json(&json!({ "status": true }))
        .await
        .map_err(|err| bridge_error("bridge write failed", err))?;
    client
        .recv_json()
        .await
        .map_err(|err| bridge_error("bridge read failed", err))?
        .ok_or_else(|| CliError::new(FAILURE, "gateway closed the connection"))
}
