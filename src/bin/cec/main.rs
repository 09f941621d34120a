//! HDMI-CEC smoke-test tool

use std::{fmt, path::PathBuf};

use anyhow::{Context, Result};
use cec::{events, Cec, Config, EventMask, LogicalAddress, PhysicalAddress, StreamPath};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::debug;

mod handlers;

#[derive(Clone, Parser, Debug)]
#[command(version, author, about)]
struct Opts {
    /// Verbosity level. -v also prints libcec's own log messages, -vv and -vvv show more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Output response format
    #[arg(long = "output", short = 'o', value_enum, default_value_t = OutputFormat::Text)]
    output_format: OutputFormat,

    /// Configuration file
    #[arg(long, env = "CEC_CONFIG")]
    config: Option<PathBuf>,

    /// Use a simulated bus instead of libcec
    #[arg(long)]
    mock: bool,

    /// Adapter to open instead of the first detected one
    #[arg(long, env = "CEC_PORT")]
    port: Option<String>,

    #[command(subcommand)]
    subcmd: Option<SubCommand>,
}

#[derive(Clone, Subcommand, Debug)]
enum SubCommand {
    /// List the attached CEC adapters
    Adapters,

    /// Print the attributes of a device, optionally toggling its power
    Info {
        /// Logical address of the device
        #[arg(default_value = "0")]
        address: LogicalAddress,

        /// Power the device on, then put it into standby
        #[arg(long)]
        power_test: bool,

        /// Seconds given to the device to change its power state
        #[arg(long)]
        settle: Option<u64>,
    },

    /// Print every event received while the adapter is open
    Callbacks {
        /// Seconds to listen once initialized
        #[arg(long, default_value_t = 10)]
        wait: u64,

        /// Seconds between registering the callback and initializing
        #[arg(long, default_value_t = 2)]
        delay: u64,

        /// Also print libcec's log messages
        #[arg(long)]
        with_log: bool,
    },

    /// List the active devices on the bus
    Devices,

    /// Control the power state of a device
    Power {
        #[command(subcommand)]
        cmd: PowerCommand,
    },

    /// Control the volume of the audio system
    Volume {
        #[command(subcommand)]
        cmd: VolumeCommand,
    },

    /// Switch the active stream to a logical address (0-15) or a physical address (a.b.c.d)
    StreamPath { target: StreamPath },

    /// Set the physical address of the adapter
    PhysicalAddress { address: PhysicalAddress },

    /// Set the HDMI port the adapter is connected to
    Port {
        /// Logical address of the device the adapter is plugged into
        device: LogicalAddress,
        /// HDMI port number [0, 15]
        port: u8,
    },

    /// Persist the current configuration in the adapter's eeprom
    PersistConfig,
}

#[derive(Clone, Subcommand, Debug)]
enum PowerCommand {
    On {
        #[arg(default_value = "0")]
        address: LogicalAddress,
    },
    Standby {
        #[arg(default_value = "0")]
        address: LogicalAddress,
    },
    Status {
        #[arg(default_value = "0")]
        address: LogicalAddress,
    },
}

#[derive(Clone, Subcommand, Debug)]
enum VolumeCommand {
    Up,
    Down,
    Mute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    #[value(name = "jsonline")]
    JsonLine,
}

impl OutputFormat {
    pub fn format<T>(self, obj: &T) -> Result<String>
    where
        T: serde::Serialize + fmt::Display,
    {
        Ok(match self {
            OutputFormat::Text => format!("{}", obj),
            OutputFormat::Json => serde_json::to_string_pretty(obj)?,
            OutputFormat::JsonLine => serde_json::to_string(obj)?,
        })
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(opts: &Opts) -> Result<Config> {
    let mut config = match &opts.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("couldn't load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(port) = &opts.port {
        config.port = Some(port.clone());
    }
    Ok(config)
}

#[cfg(feature = "libcec")]
fn make_session(opts: &Opts, config: Config) -> Result<Cec> {
    use cec::backend::{libcec::LibCec, mock::MockBackend};

    if opts.mock {
        return Ok(Cec::new(MockBackend::from_config(&config), config));
    }
    let backend = LibCec::new(&config).context("couldn't initialize libcec")?;
    Ok(Cec::new(backend, config))
}

#[cfg(not(feature = "libcec"))]
fn make_session(opts: &Opts, config: Config) -> Result<Cec> {
    use cec::backend::mock::MockBackend;

    if !opts.mock {
        anyhow::bail!("this build doesn't include libcec support, rebuild with `--features libcec` or pass --mock");
    }
    Ok(Cec::new(MockBackend::from_config(&config), config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts: Opts = Opts::parse();
    init_logging(opts.verbose);

    let config = load_config(&opts)?;
    let cec = make_session(&opts, config)?;
    debug!("libcec version: {:?}", cec::CEC_LIB_VERSION);

    if opts.verbose > 0 {
        cec.add_callback(EventMask::LOG, events::forward_to_log)?;
    }

    let result = handlers::run_command(&cec, opts.subcmd, opts.output_format).await;
    cec.close();
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_output_formats() {
        let opts = Opts::try_parse_from(["cec", "-o", "jsonline", "adapters"]).unwrap();
        assert_eq!(opts.output_format, OutputFormat::JsonLine);

        let opts = Opts::try_parse_from(["cec", "--output", "json"]).unwrap();
        assert_eq!(opts.output_format, OutputFormat::Json);
        assert!(opts.subcmd.is_none());

        assert!(Opts::try_parse_from(["cec", "-o", "json-line"]).is_err());
    }

    #[test]
    fn test_addresses() {
        let opts = Opts::try_parse_from(["cec", "--mock", "info", "5", "--power-test"]).unwrap();
        assert!(opts.mock);
        match opts.subcmd {
            Some(SubCommand::Info {
                address,
                power_test,
                settle,
            }) => {
                assert_eq!(address, LogicalAddress::AUDIO_SYSTEM);
                assert!(power_test);
                assert_eq!(settle, None);
            }
            other => panic!("unexpected subcommand: {:?}", other),
        }

        assert!(Opts::try_parse_from(["cec", "info", "16"]).is_err());
        assert!(Opts::try_parse_from(["cec", "stream-path", "1.0.0.0"]).is_ok());
        assert!(Opts::try_parse_from(["cec", "physical-address", "1.0.0"]).is_err());
    }
}
