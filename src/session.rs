use anyhow::{Result, bail};
use log::debug;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use crate::agent::{Agent, Command, Listener};
use crate::connection::{Connection, ConnectionEvent};
use crate::error::AgentError;

pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Listener that keeps the last result of each command kind.
#[derive(Debug, Default)]
pub struct CommandOutcome {
    pub start: Option<Result<(), AgentError>>,
    pub stop: Option<Result<String, AgentError>>,
}

impl Listener for CommandOutcome {
    fn on_start_tracing_complete(&mut self, result: Result<(), AgentError>) {
        self.start = Some(result);
    }
    fn on_stop_tracing_complete(&mut self, result: Result<String, AgentError>) {
        self.stop = Some(result);
    }
}

/// Issues `command` and pumps the agent until it is idle again.
pub fn run_command<C: Connection, L: Listener>(
    agent: &mut Agent<C, L>,
    events: &Receiver<ConnectionEvent>,
    command: Command,
    stall: Duration,
) -> Result<()> {
    match command {
        Command::StartTracing => agent.start_tracing(),
        Command::StopTracing => agent.stop_tracing(),
    }
    pump(agent, events, stall)
}

/// Delivers connection events and due tasks to the agent on the current
/// thread until it has nothing left to do. Fails if neither an event nor a
/// task shows up within `stall`.
pub fn pump<C: Connection, L: Listener>(
    agent: &mut Agent<C, L>,
    events: &Receiver<ConnectionEvent>,
    stall: Duration,
) -> Result<()> {
    loop {
        agent.run_due_tasks(Instant::now());
        loop {
            match events.try_recv() {
                Ok(ev) => dispatch(agent, ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => bail!("connection event channel closed"),
            }
        }
        if agent.is_idle() {
            return Ok(());
        }

        let wait = match agent.next_task_deadline() {
            Some(due) => due.saturating_duration_since(Instant::now()).min(stall),
            None => stall,
        };
        match events.recv_timeout(wait) {
            Ok(ev) => dispatch(agent, ev),
            Err(RecvTimeoutError::Timeout) => {
                if agent.next_task_deadline().is_none() {
                    bail!(
                        "no progress for {:?} during {:?}",
                        stall,
                        agent.last_action()
                    );
                }
            }
            Err(RecvTimeoutError::Disconnected) => bail!("connection event channel closed"),
        }
    }
}

fn dispatch<C: Connection, L: Listener>(agent: &mut Agent<C, L>, ev: ConnectionEvent) {
    debug!("[session] {:?}", ev);
    agent.handle_event(ev);
}
