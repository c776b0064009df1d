use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::info;
use std::sync::mpsc;

use battor_agent::agent::{Agent, Command};
use battor_agent::config::AgentConfig;
use battor_agent::port::{PortConfig, SerialConnection};
use battor_agent::session::{CommandOutcome, run_command};

mod cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Cli::parse();
    match args.cmd {
        cli::Cmd::Start(opts) => {
            let outcome = run(
                opts.ser.port_config(),
                opts.agent_config(),
                Command::StartTracing,
                opts.agent.stall(),
            )?;
            outcome
                .start
                .ok_or_else(|| anyhow!("start tracing did not report a result"))?
                .context("start tracing")?;
            info!("tracing started on {}", opts.ser.dev);
        }
        cli::Cmd::Stop(opts) => {
            let outcome = run(
                opts.ser.port_config(),
                opts.agent_config(),
                Command::StopTracing,
                opts.agent.stall(),
            )?;
            let trace = outcome
                .stop
                .ok_or_else(|| anyhow!("stop tracing did not report a result"))?
                .context("stop tracing")?;
            match &opts.out {
                Some(path) => std::fs::write(path, &trace)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{trace}"),
            }
        }
    }
    Ok(())
}

fn run(
    port: PortConfig,
    config: AgentConfig,
    command: Command,
    stall: std::time::Duration,
) -> Result<CommandOutcome> {
    let (tx, rx) = mpsc::channel();
    let dev = port.dev.clone();
    let mut agent = Agent::new(
        SerialConnection::new(port, tx),
        CommandOutcome::default(),
        config,
    );
    run_command(&mut agent, &rx, command, stall)
        .with_context(|| format!("running {:?} on {}", command, dev))?;
    Ok(std::mem::take(agent.listener_mut()))
}
