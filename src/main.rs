mod error;
mod firmware;
mod protocol;
mod transport;
mod transport_btleplug;

use crate::error::OtaError;
use clap::Parser;

/// Perform an OTA update of a Meshtastic firmware via BLE
#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// update.bin firmware to be flashed
    #[arg(short, long)]
    filename: String,

    /// Name of the device to connect to, for example `Meshtastic_857c`
    #[arg(short, long)]
    name: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(err) = send_ota(&args).await {
        let code = err.exit_code();
        log::error!("{:#}", anyhow::Error::from(err));
        std::process::exit(code);
    }
}

async fn send_ota(args: &Args) -> Result<(), OtaError> {
    let image = firmware::load(&args.filename)?;
    let packets = firmware::chunk(&image, protocol::PACKET_SIZE)?;
    let manager = transport_btleplug::OtaTransportManagerBtleplug::new().await?;
    protocol::ota_run(manager, &args.name, &packets, &protocol::TransferConfig::default()).await
}
