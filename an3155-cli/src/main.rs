use anyhow::Context;
use clap::Parser;
use log::info;
use std::fs;

use an3155_core::{FirmwareImage, Options, Segment, DEFAULT_BAUDRATE, FLASH_BASE_ADDRESS};

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Opt {
    /// Serial port
    #[arg(short, long, default_value_t = String::from("/dev/ttyUSB0"))]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUDRATE)]
    baud_rate: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Flash a raw firmware binary to the target
    Flash {
        /// Filename of raw firmware binary
        file: String,

        /// Starting address to write firmware to
        #[arg(short, long, default_value_t = String::from("0x08000000"))]
        address: String,

        /// Erase the whole chip instead of only the pages the image touches
        #[arg(short, long)]
        erase_chip: bool,
    },
}

fn parse_address(address_str: &str) -> anyhow::Result<u32> {
    let address = u32::from_str_radix(address_str.trim_start_matches("0x"), 16)
        .with_context(|| format!("unable to parse address from string: {address_str}"))?;
    if address < FLASH_BASE_ADDRESS {
        anyhow::bail!("invalid starting address: {address_str}");
    }
    Ok(address)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Opt::parse();

    let port = an3155_core::open_serial_port(&cli.port, cli.baud_rate)
        .context("failed to open serial port")?;

    match cli.command {
        Command::Flash {
            file,
            address: address_str,
            erase_chip,
        } => {
            let address = parse_address(&address_str)?;
            let data = fs::read(&file).with_context(|| format!("failed to read {file}"))?;
            info!(
                "flashing {} bytes from {file} to 0x{address:08X}",
                data.len()
            );

            let image = FirmwareImage::new(vec![Segment::new(address, data)]);
            let options = Options {
                erase_chip,
                baud: cli.baud_rate,
            };

            let mut outcome = Ok(());
            an3155_core::flash(port, &image, options, |result| {
                outcome = result;
            });
            outcome.context("flashing failed")?;
            println!("flash complete");
        }
    }

    Ok(())
}
