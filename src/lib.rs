//! Host-side driver for the BattOr power monitor.
//!
//! The [`agent::Agent`] runs the tracing commands as a callback-driven state
//! machine over any [`connection::Connection`]; [`port::SerialConnection`] is
//! the serial implementation and [`session`] pumps events on one thread.
//!
//! ```no_run
//! use std::sync::mpsc;
//! use battor_agent::agent::{Agent, Command};
//! use battor_agent::config::AgentConfig;
//! use battor_agent::port::{PortConfig, SerialConnection};
//! use battor_agent::session::{CommandOutcome, DEFAULT_STALL_TIMEOUT, run_command};
//!
//! # fn main() -> anyhow::Result<()> {
//! let (tx, rx) = mpsc::channel();
//! let conn = SerialConnection::new(PortConfig::new("/dev/ttyUSB0"), tx);
//! let mut agent = Agent::new(conn, CommandOutcome::default(), AgentConfig::default());
//! run_command(&mut agent, &rx, Command::StopTracing, DEFAULT_STALL_TIMEOUT)?;
//! if let Some(Ok(trace)) = &agent.listener().stop {
//!     print!("{trace}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod connection;
pub mod convert;
pub mod error;
pub mod frame;
pub mod port;
pub mod proto;
pub mod session;
pub mod stats;

pub use agent::{Action, Agent, Command, Listener};
pub use connection::{Connection, ConnectionEvent};
pub use error::AgentError;
