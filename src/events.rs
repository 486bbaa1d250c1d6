//! Events the driver hands to the host application.
//!
//! Each event class has its own bounded ring. Producers never block: a
//! push into a full ring is rejected and the event is dropped, which the
//! sink turns into a log warning (except for log messages themselves).

use crate::types::CecLogicalAddress;
use std::collections::VecDeque;
use std::sync::Mutex;

const LOG_RING_CAPACITY: usize = 256;
const KEY_RING_CAPACITY: usize = 64;
const COMMAND_RING_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Notice,
    Debug,
}

/// A diagnostic message from one of the driver threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// A remote control key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CecKeypress {
    /// Key code, usually one of [CecUserControlCode](crate::CecUserControlCode).
    pub keycode: u8,
    /// Milliseconds the key was held. `0` marks the key-down event.
    pub duration: u64,
}

/// A CEC command seen on the bus, handed through to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CecCommand {
    pub source: CecLogicalAddress,
    pub destination: CecLogicalAddress,
    pub opcode: u8,
    pub parameters: Vec<u8>,
}

/// Bounded FIFO between one driver thread and the host.
#[derive(Debug)]
pub struct EventRing<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> EventRing<T> {
    pub fn new(capacity: usize) -> EventRing<T> {
        EventRing {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// `false` if the ring is full. Never blocks.
    pub fn push(&self, item: T) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() == self.capacity {
            return false;
        }
        queue.push_back(item);
        true
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

/// The three rings, shared by the link, the processor and the façade.
#[derive(Debug)]
pub(crate) struct EventSink {
    log: EventRing<LogMessage>,
    keys: EventRing<CecKeypress>,
    commands: EventRing<CecCommand>,
}

impl EventSink {
    pub(crate) fn new() -> EventSink {
        EventSink {
            log: EventRing::new(LOG_RING_CAPACITY),
            keys: EventRing::new(KEY_RING_CAPACITY),
            commands: EventRing::new(COMMAND_RING_CAPACITY),
        }
    }

    /// A full log ring drops the message. Logging about it would only
    /// recurse.
    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.log.push(LogMessage {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn keypress(&self, keycode: u8, duration: u64) {
        if !self.keys.push(CecKeypress { keycode, duration }) {
            self.log(LogLevel::Warning, "key buffer is full");
        }
    }

    pub(crate) fn command(&self, command: CecCommand) {
        let opcode = command.opcode;
        if self.commands.push(command) {
            self.log(
                LogLevel::Debug,
                format!(
                    "stored command {:#04x} in the command buffer. buffer size = {}",
                    opcode,
                    self.commands.len()
                ),
            );
        } else {
            self.log(LogLevel::Warning, "command buffer is full");
        }
    }

    pub(crate) fn pop_log(&self) -> Option<LogMessage> {
        self.log.pop()
    }
    pub(crate) fn pop_keypress(&self) -> Option<CecKeypress> {
        self.keys.pop()
    }
    pub(crate) fn pop_command(&self) -> Option<CecCommand> {
        self.commands.pop()
    }
}
