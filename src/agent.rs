//! The BattOr agent: a single-threaded state machine that drives one tracing
//! command at a time over a [`Connection`].
//!
//! Every step issues exactly one connection primitive and then waits for the
//! matching `on_*` callback. Completion or failure is reported to the
//! [`Listener`] once, after which the connection is closed and all
//! per-command state is dropped.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::AgentConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::convert::{SampleConverter, samples_to_string};
use crate::error::{AgentError, ProtocolError};
use crate::proto::parser::{
    expect_payload, format_control, parse_ack, parse_eeprom, parse_sample_frame,
};
use crate::proto::{ControlMessage, ControlMessageType, Eeprom, MessageType, RawSample};
use crate::stats::CommandStats;

/// Receives the result of each command.
pub trait Listener {
    fn on_start_tracing_complete(&mut self, result: Result<(), AgentError>);
    fn on_stop_tracing_complete(&mut self, result: Result<String, AgentError>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartTracing,
    StopTracing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    // ---- Connect ----
    RequestConnection,

    // ---- Start tracing ----
    SendReset,
    SendInit,
    ReadInitAck,
    SendSetGain,
    ReadSetGainAck,
    SendStartTracing,
    ReadStartTracingAck,

    // ---- Stop tracing ----
    SendEepromRequest,
    ReadEeprom,
    SendSamplesRequest,
    ReadCalibrationFrame,
    ReadDataFrame,
}

impl Action {
    fn is_read(self) -> bool {
        matches!(
            self,
            Action::ReadInitAck
                | Action::ReadSetGainAck
                | Action::ReadStartTracingAck
                | Action::ReadEeprom
                | Action::ReadCalibrationFrame
                | Action::ReadDataFrame
        )
    }
}

/// What to do once a read has been accepted.
enum Step {
    Perform(Action),
    Delay(Action, Duration),
    Complete,
}

/// State that lives exactly as long as one command.
struct CommandContext {
    command: Command,
    generation: u64,
    last_action: Action,
    read_failures: u32,
    eeprom: Option<Eeprom>,
    calibration: Vec<RawSample>,
    samples: Vec<RawSample>,
    stats: CommandStats,
}

impl CommandContext {
    fn new(command: Command, generation: u64) -> Self {
        Self {
            command,
            generation,
            last_action: Action::RequestConnection,
            read_failures: 0,
            eeprom: None,
            calibration: Vec::new(),
            samples: Vec::new(),
            stats: CommandStats::new(),
        }
    }

    fn accept(
        &mut self,
        config: &AgentConfig,
        kind: MessageType,
        bytes: Option<&[u8]>,
    ) -> Result<Step, ProtocolError> {
        if let Some(b) = bytes {
            self.stats.add_bytes(b.len());
        }
        match self.last_action {
            Action::ReadInitAck => {
                check_ack(kind, bytes, ControlMessageType::Init)?;
                Ok(Step::Perform(Action::SendSetGain))
            }
            Action::ReadSetGainAck => {
                check_ack(kind, bytes, ControlMessageType::SetGain)?;
                Ok(Step::Delay(
                    Action::SendStartTracing,
                    config.gain_settle_delay,
                ))
            }
            Action::ReadStartTracingAck => {
                check_ack(kind, bytes, ControlMessageType::StartSamplingSd)?;
                Ok(Step::Complete)
            }
            Action::ReadEeprom => {
                let payload = expect_payload(MessageType::ControlAck, kind, bytes)?;
                self.eeprom = Some(parse_eeprom(payload)?);
                Ok(Step::Perform(Action::SendSamplesRequest))
            }
            Action::ReadCalibrationFrame => {
                let payload = expect_payload(MessageType::Samples, kind, bytes)?;
                let frame = parse_sample_frame(payload)?;
                if frame.samples.is_empty() {
                    return Err(ProtocolError::EmptyCalibration);
                }
                self.stats.add_frame(frame.samples.len());
                self.calibration = frame.samples;
                Ok(Step::Perform(Action::ReadDataFrame))
            }
            Action::ReadDataFrame => {
                let payload = expect_payload(MessageType::Samples, kind, bytes)?;
                let frame = parse_sample_frame(payload)?;
                self.stats.add_frame(frame.samples.len());
                if frame.is_terminator() {
                    return Ok(Step::Complete);
                }
                self.samples.extend(frame.samples);
                Ok(Step::Perform(Action::ReadDataFrame))
            }
            // Only read actions get here.
            other => Err(ProtocolError::WrongMessageType {
                expected: expected_read_type(other),
                actual: kind,
            }),
        }
    }

    fn trace(&self) -> String {
        match &self.eeprom {
            Some(eeprom) if !self.samples.is_empty() => {
                let converter = SampleConverter::new(*eeprom, &self.calibration);
                samples_to_string(&converter, &self.samples)
            }
            _ => String::new(),
        }
    }
}

fn check_ack(
    kind: MessageType,
    bytes: Option<&[u8]>,
    sent: ControlMessageType,
) -> Result<(), ProtocolError> {
    let ack = parse_ack(expect_payload(MessageType::ControlAck, kind, bytes)?)?;
    if !ack.acks(sent) {
        return Err(ProtocolError::WrongAck {
            expected: sent as u8,
            actual: ack.acked,
        });
    }
    Ok(())
}

fn expected_read_type(action: Action) -> MessageType {
    match action {
        Action::ReadCalibrationFrame | Action::ReadDataFrame => MessageType::Samples,
        _ => MessageType::ControlAck,
    }
}

enum Task {
    Perform { generation: u64, action: Action },
    RejectBusy(Command),
}

struct PendingTask {
    due: Instant,
    task: Task,
}

/// Drives tracing commands against one BattOr.
///
/// The agent is `!Send` and checks that it is only used from the thread that
/// created it. Delayed actions are queued internally; the host runs them via
/// [`Agent::run_due_tasks`] (or [`Agent::run_until_idle`] in tests).
pub struct Agent<C: Connection, L: Listener> {
    connection: C,
    listener: L,
    config: AgentConfig,
    ctx: Option<CommandContext>,
    tasks: VecDeque<PendingTask>,
    generation: u64,
    owner: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl<C: Connection, L: Listener> Agent<C, L> {
    pub fn new(connection: C, listener: L, config: AgentConfig) -> Self {
        Self {
            connection,
            listener,
            config,
            ctx: None,
            tasks: VecDeque::new(),
            generation: 0,
            owner: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    pub fn start_tracing(&mut self) {
        self.begin(Command::StartTracing);
    }

    pub fn stop_tracing(&mut self) {
        self.begin(Command::StopTracing);
    }

    pub fn command(&self) -> Option<Command> {
        self.ctx.as_ref().map(|c| c.command)
    }

    pub fn last_action(&self) -> Option<Action> {
        self.ctx.as_ref().map(|c| c.last_action)
    }

    /// No command in flight and no queued task.
    pub fn is_idle(&self) -> bool {
        self.ctx.is_none() && self.tasks.is_empty()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened(success) => self.on_connection_opened(success),
            ConnectionEvent::BytesSent(success) => self.on_bytes_sent(success),
            ConnectionEvent::MessageRead {
                success,
                kind,
                bytes,
            } => self.on_message_read(success, kind, bytes),
        }
    }

    pub fn on_connection_opened(&mut self, success: bool) {
        self.check_thread();
        let Some((command, last_action)) = self.ctx.as_ref().map(|c| (c.command, c.last_action))
        else {
            warn!("[agent] connection opened with no command in progress");
            return;
        };
        if last_action != Action::RequestConnection {
            warn!("[agent] connection opened during {:?}", last_action);
            return;
        }
        if !success {
            self.complete_command(Err(AgentError::ConnectionFailed));
            return;
        }
        match command {
            Command::StartTracing => self.perform_action(Action::SendReset),
            Command::StopTracing => self.perform_action(Action::SendEepromRequest),
        }
    }

    pub fn on_bytes_sent(&mut self, success: bool) {
        self.check_thread();
        let Some(action) = self.ctx.as_ref().map(|c| c.last_action) else {
            warn!("[agent] bytes sent with no command in progress");
            return;
        };
        let next = match action {
            Action::SendReset => None,
            Action::SendInit => Some(Action::ReadInitAck),
            Action::SendSetGain => Some(Action::ReadSetGainAck),
            Action::SendStartTracing => Some(Action::ReadStartTracingAck),
            Action::SendEepromRequest => Some(Action::ReadEeprom),
            Action::SendSamplesRequest => Some(Action::ReadCalibrationFrame),
            other => {
                warn!("[agent] bytes sent during {:?}", other);
                return;
            }
        };
        if !success {
            warn!("[agent] send failed during {:?}", action);
            self.complete_command(Err(AgentError::SendError));
            return;
        }
        match next {
            Some(next) => self.perform_action(next),
            None => {
                // Reset must reach the device before init goes out.
                self.connection.flush();
                self.perform_delayed_action(Action::SendInit, self.config.reset_delay);
            }
        }
    }

    pub fn on_message_read(&mut self, success: bool, kind: MessageType, bytes: Option<Vec<u8>>) {
        self.check_thread();
        let max_retries = self.config.max_read_retries;
        let Some(ctx) = self.ctx.as_mut() else {
            warn!("[agent] message read with no command in progress");
            return;
        };
        let action = ctx.last_action;
        if !action.is_read() {
            warn!("[agent] message read during {:?}", action);
            return;
        }

        if !success {
            ctx.read_failures += 1;
            ctx.stats.inc_retry();
            if ctx.read_failures > max_retries {
                warn!(
                    "[agent] giving up on {:?} after {} failed reads",
                    action, ctx.read_failures
                );
                self.complete_command(Err(AgentError::ReceiveError));
            } else {
                debug!(
                    "[agent] read failed during {:?}, retry {}/{}",
                    action, ctx.read_failures, max_retries
                );
                self.perform_action(action);
            }
            return;
        }
        ctx.read_failures = 0;

        match ctx.accept(&self.config, kind, bytes.as_deref()) {
            Ok(Step::Perform(next)) => self.perform_action(next),
            Ok(Step::Delay(next, delay)) => self.perform_delayed_action(next, delay),
            Ok(Step::Complete) => self.complete_command(Ok(())),
            Err(e) => {
                warn!("[agent] bad message during {:?}: {}", action, e);
                self.complete_command(Err(AgentError::UnexpectedMessage));
            }
        }
    }

    /// Runs queued tasks whose deadline has passed. Returns how many ran.
    pub fn run_due_tasks(&mut self, now: Instant) -> usize {
        self.check_thread();
        let mut ran = 0;
        while let Some(task) = self.pop_task(Some(now)) {
            self.run_task(task);
            ran += 1;
        }
        ran
    }

    /// Runs every queued task regardless of its deadline, including tasks
    /// queued while running.
    pub fn run_until_idle(&mut self) -> usize {
        self.check_thread();
        let mut ran = 0;
        while let Some(task) = self.pop_task(None) {
            self.run_task(task);
            ran += 1;
        }
        ran
    }

    pub fn next_task_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|t| t.due).min()
    }

    /* ---------- internals ---------- */

    fn begin(&mut self, command: Command) {
        self.check_thread();
        if let Some(ctx) = &self.ctx {
            warn!(
                "[agent] rejecting {:?}: {:?} in progress",
                command, ctx.command
            );
            self.tasks.push_back(PendingTask {
                due: Instant::now(),
                task: Task::RejectBusy(command),
            });
            return;
        }
        self.generation += 1;
        info!("[agent] {:?}", command);
        self.ctx = Some(CommandContext::new(command, self.generation));
        self.perform_action(Action::RequestConnection);
    }

    fn perform_action(&mut self, action: Action) {
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        ctx.last_action = action;
        debug!("[agent] {:?}", action);

        match action {
            Action::RequestConnection => self.connection.open(),

            Action::SendReset => self.send_control(ControlMessageType::Reset, 0, 0),
            Action::SendInit => self.send_control(ControlMessageType::Init, 0, 0),
            Action::SendSetGain => {
                self.send_control(ControlMessageType::SetGain, self.config.gain as u16, 0)
            }
            Action::SendStartTracing => {
                self.send_control(ControlMessageType::StartSamplingSd, 0, 0)
            }
            Action::SendEepromRequest => {
                self.send_control(ControlMessageType::ReadEeprom, Eeprom::SIZE as u16, 0)
            }
            Action::SendSamplesRequest => self.send_control(ControlMessageType::ReadSdUart, 0, 0),

            Action::ReadInitAck
            | Action::ReadSetGainAck
            | Action::ReadStartTracingAck
            | Action::ReadEeprom => self.connection.read_message(MessageType::ControlAck),
            Action::ReadCalibrationFrame | Action::ReadDataFrame => {
                self.connection.read_message(MessageType::Samples)
            }
        }
    }

    fn perform_delayed_action(&mut self, action: Action, delay: Duration) {
        if delay.is_zero() {
            self.perform_action(action);
            return;
        }
        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };
        debug!("[agent] {:?} in {:?}", action, delay);
        self.tasks.push_back(PendingTask {
            due: Instant::now() + delay,
            task: Task::Perform {
                generation: ctx.generation,
                action,
            },
        });
    }

    fn send_control(&mut self, kind: ControlMessageType, param1: u16, param2: u16) {
        let msg = format_control(&ControlMessage::new(kind, param1, param2));
        self.connection.send_bytes(MessageType::Control, &msg);
    }

    fn complete_command(&mut self, result: Result<(), AgentError>) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        self.connection.close();
        match &result {
            Ok(()) => ctx.stats.log(&format!("{:?} complete", ctx.command)),
            Err(e) => ctx.stats.log(&format!("{:?} failed ({})", ctx.command, e)),
        }
        match ctx.command {
            Command::StartTracing => self.listener.on_start_tracing_complete(result),
            Command::StopTracing => self
                .listener
                .on_stop_tracing_complete(result.map(|()| ctx.trace())),
        }
    }

    fn pop_task(&mut self, now: Option<Instant>) -> Option<Task> {
        let idx = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| now.is_none_or(|now| t.due <= now))
            .min_by_key(|(_, t)| t.due)
            .map(|(i, _)| i)?;
        self.tasks.remove(idx).map(|t| t.task)
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Perform { generation, action } => {
                if self.ctx.as_ref().map(|c| c.generation) == Some(generation) {
                    self.perform_action(action);
                }
            }
            Task::RejectBusy(Command::StartTracing) => self
                .listener
                .on_start_tracing_complete(Err(AgentError::Busy)),
            Task::RejectBusy(Command::StopTracing) => self
                .listener
                .on_stop_tracing_complete(Err(AgentError::Busy)),
        }
    }

    fn check_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "BattOr agent used off its owning thread"
        );
    }
}

impl<C: Connection, L: Listener> Drop for Agent<C, L> {
    fn drop(&mut self) {
        if self.ctx.is_some() {
            self.connection.close();
        }
    }
}
