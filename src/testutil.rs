//! A scripted adapter endpoint for tests.
//!
//! [FakeAdapter] stands in for the serial port: it decodes the command
//! frames the driver writes, answers them like the firmware would, and
//! lets a test feed CEC traffic to the driver.

use crate::codec::{escape_into, AdapterMessageCode, FrameDecoder, FrameEvent, MSG_START};
use crate::link::AdapterPort;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// How the fake firmware answers host commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponsePolicy {
    /// Accept everything, ack transmits on the bus.
    Accept,
    /// Reject every command.
    Reject,
    /// Answer nothing at all.
    Silent,
    /// Accept commands, but nobody on the bus acks transmits.
    AcceptWithoutBusAck,
    /// Accept commands, transmits fail on the bus.
    FailBusAck,
}

#[derive(Default)]
struct Shared {
    /// bytes on their way adapter → host
    inbound: Mutex<VecDeque<u8>>,
    /// decoded host → adapter command frames
    commands: Mutex<Vec<Vec<u8>>>,
}

impl Shared {
    /// Frame `payload` like the firmware and queue it toward the host.
    fn push_frame(&self, payload: &[u8]) {
        let mut wire = vec![MSG_START];
        for &b in payload {
            escape_into(&mut wire, b);
        }
        wire.push(MSG_START);
        self.inbound.lock().unwrap().extend(wire);
    }
}

pub(crate) struct FakeAdapter {
    shared: Arc<Shared>,
    policy: ResponsePolicy,
    decoder: FrameDecoder,
    frame: Vec<u8>,
}

/// Test-side view of a [FakeAdapter] that the driver owns.
#[derive(Clone)]
pub(crate) struct AdapterHandle {
    shared: Arc<Shared>,
}

impl FakeAdapter {
    pub(crate) fn new(policy: ResponsePolicy) -> (FakeAdapter, AdapterHandle) {
        let shared = Arc::new(Shared::default());
        (
            FakeAdapter {
                shared: Arc::clone(&shared),
                policy,
                decoder: FrameDecoder::new(),
                frame: Vec::new(),
            },
            AdapterHandle { shared },
        )
    }

    fn respond(&self, command: &[u8]) {
        let is_transmit = command[0] == u8::from(AdapterMessageCode::Transmit);
        match self.policy {
            ResponsePolicy::Silent => {}
            ResponsePolicy::Reject => {
                self.shared
                    .push_frame(&[AdapterMessageCode::CommandRejected.into()]);
            }
            ResponsePolicy::Accept => {
                self.shared
                    .push_frame(&[AdapterMessageCode::CommandAccepted.into()]);
                if is_transmit {
                    self.shared
                        .push_frame(&[AdapterMessageCode::TransmitAck.into()]);
                }
            }
            ResponsePolicy::AcceptWithoutBusAck => {
                self.shared
                    .push_frame(&[AdapterMessageCode::CommandAccepted.into()]);
            }
            ResponsePolicy::FailBusAck => {
                self.shared
                    .push_frame(&[AdapterMessageCode::CommandAccepted.into()]);
                if is_transmit {
                    self.shared
                        .push_frame(&[AdapterMessageCode::TransmitFailed.into()]);
                }
            }
        }
    }
}

impl AdapterPort for FakeAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // short blocking window, like a serial read with a timeout
        for _ in 0..2 {
            {
                let mut inbound = self.shared.inbound.lock().unwrap();
                if !inbound.is_empty() {
                    let n = buf.len().min(inbound.len());
                    for slot in buf[..n].iter_mut() {
                        *slot = inbound.pop_front().unwrap();
                    }
                    return Ok(n);
                }
            }
            thread::sleep(Duration::from_millis(3));
        }
        Err(io::ErrorKind::TimedOut.into())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        for &byte in buf {
            match self.decoder.consume_byte(byte) {
                Some(FrameEvent::Byte(b)) => self.frame.push(b),
                Some(FrameEvent::Complete) => {
                    if !self.frame.is_empty() {
                        let command = std::mem::take(&mut self.frame);
                        self.respond(&command);
                        self.shared.commands.lock().unwrap().push(command);
                    }
                }
                Some(FrameEvent::Invalid) => self.frame.clear(),
                None => {}
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AdapterHandle {
    /// Deliver a CEC frame to the host, one byte per adapter frame.
    pub(crate) fn inject_cec(&self, frame: &[u8]) {
        for &b in frame {
            self.shared
                .push_frame(&[AdapterMessageCode::FrameData.into(), b]);
        }
        self.shared.push_frame(&[AdapterMessageCode::FrameEom.into()]);
    }

    /// Every command frame the host wrote so far, `[code, payload...]`.
    pub(crate) fn commands(&self) -> Vec<Vec<u8>> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// The CEC payloads of all `Transmit` commands so far.
    pub(crate) fn transmits(&self) -> Vec<Vec<u8>> {
        self.commands()
            .into_iter()
            .filter(|c| c[0] == u8::from(AdapterMessageCode::Transmit))
            .map(|c| c[1..].to_vec())
            .collect()
    }

    /// Block until the host has transmitted `count` CEC frames.
    /// Panics when `timeout` runs out, with the traffic seen so far.
    pub(crate) fn wait_for_transmits(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let transmits = self.transmits();
            if transmits.len() >= count {
                return transmits;
            }
            if Instant::now() >= deadline {
                panic!(
                    "expected {count} transmits, saw {:x?} (all commands: {:x?})",
                    transmits,
                    self.commands()
                );
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}
