/*!
 * The serial link to the adapter.
 *
 * [AdapterLink] owns the port. A background thread reassembles adapter
 * frames from the byte stream and sorts them into two lanes: CEC frames
 * go to a channel drained by the processor, command responses go to the
 * rendezvous a writer is waiting on.
 */

use crate::codec::{escape_into, AdapterMessageCode, FrameDecoder, FrameEvent, MSG_START};
use crate::error::CecError;
use crate::events::{EventSink, LogLevel};
use crate::types::{CecAckMask, CEC_ACK_TIMEOUT};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What the link needs from a serial port. `serialport` provides the real
/// one; tests feed the link from a scripted endpoint.
///
/// `read` must return [io::ErrorKind::TimedOut] within roughly the
/// configured per-read timeout when no data arrives, the reader thread
/// relies on that to notice the stop flag.
pub(crate) trait AdapterPort: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

impl AdapterPort for Box<dyn serialport::SerialPort> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(self)
    }
}

/// Answer of the firmware to the most recent host command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterResponse {
    Accepted,
    Rejected,
    TransmitAck,
    TransmitFailed,
}

type SharedPort = Arc<Mutex<Option<Box<dyn AdapterPort>>>>;

pub(crate) struct AdapterLink {
    port: SharedPort,
    /// Ack rendezvous. Locking the receiver is what serializes writes:
    /// there is exactly one command in flight per held guard.
    responses: Mutex<Receiver<AdapterResponse>>,
    /// Reassembled CEC frames, in adapter order.
    frames: Mutex<Receiver<Vec<u8>>>,
    stop: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    events: Arc<EventSink>,
}

impl AdapterLink {
    /// Open the serial device and probe for the adapter. Keeps pinging
    /// until the firmware answers or `timeout` runs out.
    pub(crate) fn open(
        path: &str,
        baud_rate: u32,
        timeout: Duration,
        events: Arc<EventSink>,
    ) -> Result<AdapterLink, CecError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;
        let link = AdapterLink::attach(Box::new(port), events);

        let deadline = Instant::now() + timeout;
        loop {
            match link.ping() {
                Ok(()) => return Ok(link),
                Err(CecError::Closed) | Err(CecError::Io(_)) => break,
                Err(_) if Instant::now() >= deadline => break,
                Err(_) => {}
            }
        }
        link.close();
        Err(CecError::NoAdapterResponse)
    }

    /// Wrap an already-open port and start the reader thread.
    pub(crate) fn attach(port: Box<dyn AdapterPort>, events: Arc<EventSink>) -> AdapterLink {
        let port: SharedPort = Arc::new(Mutex::new(Some(port)));
        let stop = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicBool::new(true));
        let (frame_tx, frame_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();

        let reader = {
            let port = Arc::clone(&port);
            let stop = Arc::clone(&stop);
            let open = Arc::clone(&open);
            let events = Arc::clone(&events);
            thread::Builder::new()
                .name("cec-adapter-reader".into())
                .spawn(move || reader_loop(port, stop, open, frame_tx, response_tx, events))
                .expect("failed to spawn the reader thread")
        };

        AdapterLink {
            port,
            responses: Mutex::new(response_rx),
            frames: Mutex::new(frame_rx),
            stop,
            open,
            reader: Mutex::new(Some(reader)),
            events,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// One reassembled CEC frame, oldest first.
    pub(crate) fn read(&self, timeout: Duration) -> Result<Vec<u8>, CecError> {
        let frames = self.frames.lock().unwrap();
        match frames.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(CecError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CecError::Closed),
        }
    }

    /// Put a CEC frame on the bus. With `wait_for_ack` the call only
    /// returns once the destination acked the frame.
    pub(crate) fn write(&self, cec: &[u8], wait_for_ack: bool) -> Result<(), CecError> {
        self.send_command(AdapterMessageCode::Transmit, cec, wait_for_ack)
    }

    pub(crate) fn ping(&self) -> Result<(), CecError> {
        self.send_command(AdapterMessageCode::Ping, &[], false)
            .map_err(no_response)
    }

    pub(crate) fn start_bootloader(&self) -> Result<(), CecError> {
        self.send_command(AdapterMessageCode::StartBootloader, &[], false)
            .map_err(no_response)
    }

    pub(crate) fn set_ack_mask(&self, mask: CecAckMask) -> Result<(), CecError> {
        self.send_command(AdapterMessageCode::SetAckMask, &mask.bits().to_le_bytes(), false)
            .map_err(no_response)
    }

    /// Serialize one command, write it out and wait for the firmware's
    /// verdict.
    fn send_command(
        &self,
        code: AdapterMessageCode,
        payload: &[u8],
        wait_for_transmit_ack: bool,
    ) -> Result<(), CecError> {
        // one in-flight command at a time
        let responses = self.responses.lock().unwrap();
        // answers nobody waited for (a previous timeout) are stale now
        while responses.try_recv().is_ok() {}

        let mut wire = Vec::with_capacity(payload.len() * 2 + 3);
        wire.push(MSG_START);
        escape_into(&mut wire, code.into());
        for &b in payload {
            escape_into(&mut wire, b);
        }
        wire.push(MSG_START);

        {
            let mut guard = self.port.lock().unwrap();
            let port = guard.as_mut().ok_or(CecError::Closed)?;
            if let Err(e) = port.write_all(&wire).and_then(|()| port.flush()) {
                drop(guard);
                self.events
                    .log(LogLevel::Error, format!("serial write failed: {e}"));
                self.open.store(false, Ordering::Relaxed);
                return Err(CecError::Io(e));
            }
        }

        self.wait_for(&responses, false)?;
        if wait_for_transmit_ack {
            self.wait_for(&responses, true)?;
        }
        Ok(())
    }

    /// Wait up to [CEC_ACK_TIMEOUT] for [AdapterResponse::Accepted]
    /// (`transmit_ack == false`) or [AdapterResponse::TransmitAck].
    fn wait_for(
        &self,
        responses: &Receiver<AdapterResponse>,
        transmit_ack: bool,
    ) -> Result<(), CecError> {
        let deadline = Instant::now() + CEC_ACK_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match responses.recv_timeout(remaining) {
                Ok(AdapterResponse::Accepted) if !transmit_ack => return Ok(()),
                Ok(AdapterResponse::TransmitAck) if transmit_ack => return Ok(()),
                Ok(AdapterResponse::Rejected) => return Err(CecError::Rejected),
                Ok(AdapterResponse::TransmitFailed) => return Err(CecError::NotAcked),
                // an ack from a command we stopped waiting for
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return Err(CecError::NotAcked),
                Err(RecvTimeoutError::Disconnected) => return Err(CecError::Closed),
            }
        }
    }

    /// Stop the reader, join it and drop the port. Idempotent.
    pub(crate) fn close(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
        *self.port.lock().unwrap() = None;
        self.open.store(false, Ordering::Relaxed);
    }
}

impl Drop for AdapterLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ping-style commands report a silent adapter, not a nack.
fn no_response(e: CecError) -> CecError {
    match e {
        CecError::NotAcked => CecError::NoAdapterResponse,
        other => other,
    }
}

fn reader_loop(
    port: SharedPort,
    stop: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    frame_tx: Sender<Vec<u8>>,
    response_tx: Sender<AdapterResponse>,
    events: Arc<EventSink>,
) {
    let mut decoder = FrameDecoder::new();
    // adapter frame being reassembled
    let mut frame: Vec<u8> = Vec::with_capacity(8);
    // CEC message being collected from FrameData frames
    let mut cec: Vec<u8> = Vec::with_capacity(16);
    let mut buf = [0u8; 256];

    while !stop.load(Ordering::Relaxed) {
        let n = {
            let mut guard = port.lock().unwrap();
            let Some(port) = guard.as_mut() else { break };
            match port.read(&mut buf) {
                Ok(0) => {
                    events.log(LogLevel::Error, "serial port was closed by the other end");
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
                Err(e) => {
                    events.log(LogLevel::Error, format!("serial read failed: {e}"));
                    break;
                }
            }
        };

        if n == 0 {
            // leave the port lock free for a writer before blocking again
            thread::sleep(Duration::from_millis(1));
            continue;
        }

        for &byte in &buf[..n] {
            match decoder.consume_byte(byte) {
                Some(FrameEvent::Byte(b)) => frame.push(b),
                Some(FrameEvent::Complete) => {
                    if !frame.is_empty() {
                        dispatch(&frame, &mut cec, &frame_tx, &response_tx, &events);
                        frame.clear();
                    }
                }
                Some(FrameEvent::Invalid) => {
                    events.log(LogLevel::Warning, "dropping a frame with a broken escape");
                    frame.clear();
                }
                None => {}
            }
        }
    }
    open.store(false, Ordering::Relaxed);
}

/// Sort one adapter frame into its lane.
fn dispatch(
    frame: &[u8],
    cec: &mut Vec<u8>,
    frame_tx: &Sender<Vec<u8>>,
    response_tx: &Sender<AdapterResponse>,
    events: &EventSink,
) {
    let respond = |r| {
        // nobody listening just means no write is in flight
        let _ = response_tx.send(r);
    };
    match AdapterMessageCode::try_from(frame[0]) {
        Ok(AdapterMessageCode::FrameData) => cec.extend_from_slice(&frame[1..]),
        Ok(AdapterMessageCode::FrameEom) => {
            cec.extend_from_slice(&frame[1..]);
            if cec.is_empty() {
                events.log(LogLevel::Warning, "dropping an empty frame from the adapter");
            } else if frame_tx.send(std::mem::take(cec)).is_err() {
                // link is closing, the processor is gone
            }
        }
        Ok(AdapterMessageCode::CommandAccepted) => respond(AdapterResponse::Accepted),
        Ok(AdapterMessageCode::CommandRejected) => respond(AdapterResponse::Rejected),
        Ok(AdapterMessageCode::TransmitAck) => respond(AdapterResponse::TransmitAck),
        Ok(AdapterMessageCode::TransmitFailed) => respond(AdapterResponse::TransmitFailed),
        Ok(_) | Err(_) => events.log(
            LogLevel::Warning,
            format!("unexpected message code {:#04x} from the adapter", frame[0]),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeAdapter, ResponsePolicy};

    fn link_over(policy: ResponsePolicy) -> (AdapterLink, crate::testutil::AdapterHandle) {
        let (port, handle) = FakeAdapter::new(policy);
        let link = AdapterLink::attach(Box::new(port), Arc::new(EventSink::new()));
        (link, handle)
    }

    #[test]
    fn ping_is_accepted() {
        let (link, handle) = link_over(ResponsePolicy::Accept);
        assert!(link.ping().is_ok());
        assert_eq!(handle.commands()[0], vec![0x01]);
    }

    #[test]
    fn silent_adapter_means_no_response() {
        let (link, _handle) = link_over(ResponsePolicy::Silent);
        assert!(matches!(link.ping(), Err(CecError::NoAdapterResponse)));
    }

    #[test]
    fn rejected_write_surfaces() {
        let (link, _handle) = link_over(ResponsePolicy::Reject);
        assert!(matches!(
            link.write(&[0x40, 0x36], true),
            Err(CecError::Rejected)
        ));
    }

    #[test]
    fn unacked_transmit_surfaces() {
        let (link, _handle) = link_over(ResponsePolicy::AcceptWithoutBusAck);
        assert!(matches!(
            link.write(&[0x40, 0x36], true),
            Err(CecError::NotAcked)
        ));
        // without waiting for the bus ack the same exchange is fine
        assert!(link.write(&[0x40, 0x36], false).is_ok());
    }

    #[test]
    fn bus_failure_surfaces() {
        let (link, _handle) = link_over(ResponsePolicy::FailBusAck);
        assert!(matches!(
            link.write(&[0x40, 0x04], true),
            Err(CecError::NotAcked)
        ));
    }

    #[test]
    fn each_transmit_consumes_its_own_acks() {
        let (link, handle) = link_over(ResponsePolicy::Accept);
        assert!(link.write(&[0x40, 0x04], true).is_ok());
        assert!(link.write(&[0x4f, 0x36], true).is_ok());
        let transmits = handle.transmits();
        assert_eq!(transmits, vec![vec![0x40, 0x04], vec![0x4f, 0x36]]);
    }

    #[test]
    fn set_ack_mask_is_little_endian() {
        let (link, handle) = link_over(ResponsePolicy::Accept);
        link.set_ack_mask(CecAckMask::PLAYBACK1 | CecAckMask::PLAYBACK2)
            .unwrap();
        assert_eq!(handle.commands()[0], vec![0x03, 0x10, 0x01]);
    }

    #[test]
    fn cec_frames_arrive_in_adapter_order() {
        let (link, handle) = link_over(ResponsePolicy::Accept);
        handle.inject_cec(&[0x04, 0x8f]);
        handle.inject_cec(&[0x0f, 0x85]);
        assert_eq!(link.read(Duration::from_secs(1)).unwrap(), vec![0x04, 0x8f]);
        assert_eq!(link.read(Duration::from_secs(1)).unwrap(), vec![0x0f, 0x85]);
        assert!(matches!(
            link.read(Duration::from_millis(20)),
            Err(CecError::Timeout)
        ));
    }

    #[test]
    fn everything_is_closed_after_close() {
        let (link, _handle) = link_over(ResponsePolicy::Accept);
        link.close();
        assert!(!link.is_open());
        assert!(matches!(
            link.read(Duration::from_millis(10)),
            Err(CecError::Closed)
        ));
        assert!(matches!(link.write(&[0x40, 0x36], true), Err(CecError::Closed)));
        // closing twice is fine
        link.close();
    }
}
