use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use battor_agent::config::{AgentConfig, DEFAULT_MAX_READ_RETRIES};
use battor_agent::port::{DEFAULT_BAUD, PortConfig};
use battor_agent::proto::Gain;

#[derive(Parser, Debug, Clone)]
#[command(name = "battor-agent", about = "Start and stop BattOr power tracing")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Reset the BattOr and start sampling to its SD card
    Start(StartOpts),
    /// Download the recorded samples and print the trace
    Stop(StopOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
    /// Per-attempt read timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub read_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct AgentOpts {
    /// Failed reads tolerated on one message before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_READ_RETRIES)]
    pub retries: u32,
    /// Abort if the device makes no progress for this many seconds
    #[arg(long, default_value_t = 30)]
    pub stall_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StartOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub agent: AgentOpts,
    /// Amplifier gain for the current channel
    #[arg(long, value_enum, default_value_t = GainArg::Low)]
    pub gain: GainArg,
    /// Wait after reset before init, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub reset_delay_ms: u64,
    /// Wait after the gain is acked before sampling starts, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub gain_settle_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StopOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub agent: AgentOpts,
    /// Write the trace here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainArg {
    Low,
    High,
}

impl From<GainArg> for Gain {
    fn from(g: GainArg) -> Self {
        match g {
            GainArg::Low => Gain::Low,
            GainArg::High => Gain::High,
        }
    }
}

impl SerialOpts {
    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            dev: self.dev.clone(),
            baud: self.baud,
            rtscts: self.rtscts,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

impl AgentOpts {
    pub fn stall(&self) -> Duration {
        Duration::from_secs(self.stall_secs)
    }
}

impl StartOpts {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_read_retries: self.agent.retries,
            gain: self.gain.into(),
            reset_delay: Duration::from_millis(self.reset_delay_ms),
            gain_settle_delay: Duration::from_millis(self.gain_settle_ms),
        }
    }
}

impl StopOpts {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_read_retries: self.agent.retries,
            ..AgentConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_defaults() {
        let cli = Cli::try_parse_from(["battor-agent", "start"]).unwrap();
        let Cmd::Start(opts) = cli.cmd else {
            panic!("wrong subcommand");
        };
        let cfg = opts.agent_config();
        assert_eq!(cfg.max_read_retries, 20);
        assert_eq!(cfg.gain, Gain::Low);
        assert!(cfg.reset_delay.is_zero());
        assert_eq!(opts.ser.port_config().baud, DEFAULT_BAUD);
    }

    #[test]
    fn stop_with_options() {
        let cli = Cli::try_parse_from([
            "battor-agent",
            "stop",
            "--dev",
            "/dev/ttyACM1",
            "--retries",
            "5",
            "--read-timeout-ms",
            "250",
            "--out",
            "trace.txt",
        ])
        .unwrap();
        let Cmd::Stop(opts) = cli.cmd else {
            panic!("wrong subcommand");
        };
        let port = opts.ser.port_config();
        assert_eq!(port.dev, "/dev/ttyACM1");
        assert_eq!(port.read_timeout, Duration::from_millis(250));
        assert_eq!(opts.agent_config().max_read_retries, 5);
        assert_eq!(opts.out, Some(PathBuf::from("trace.txt")));
    }

    #[test]
    fn high_gain_flag() {
        let cli = Cli::try_parse_from(["battor-agent", "start", "--gain", "high"]).unwrap();
        let Cmd::Start(opts) = cli.cmd else {
            panic!("wrong subcommand");
        };
        assert_eq!(opts.agent_config().gain, Gain::High);
    }
}
