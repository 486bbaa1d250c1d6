/*!
 * The CEC side of the driver.
 *
 * [CecProcessor] owns the logical and physical address and runs the
 * responder thread: it drains CEC frames from the link, answers the
 * queries every bus participant must answer, turns remote control
 * traffic into debounced key events and hands every frame to the host
 * as a [CecCommand].
 */

use crate::error::CecError;
use crate::events::{CecCommand, EventSink, LogLevel};
use crate::link::AdapterLink;
use crate::types::{
    CecAbortReason, CecAckMask, CecLogicalAddress, CecMessage, CecOpcode, CecPowerStatus,
    CecVersion, OsdName, TransmitRequest, CEC_BUTTON_TIMEOUT, CEC_FRAME_READ_TIMEOUT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Menu language reported on [CecOpcode::GetMenuLanguage].
const MENU_LANGUAGE: &[u8; 3] = b"eng";

struct DeviceState {
    logical_address: CecLogicalAddress,
    physical_address: u16,
    device_name: OsdName,
    /// remote control key currently held down, and since when
    current_button: Option<(u8, Instant)>,
}

struct ProcessorCore {
    link: Arc<AdapterLink>,
    events: Arc<EventSink>,
    state: Mutex<DeviceState>,
    stop: AtomicBool,
}

pub(crate) struct CecProcessor {
    core: Arc<ProcessorCore>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CecProcessor {
    pub(crate) fn new(
        link: Arc<AdapterLink>,
        events: Arc<EventSink>,
        device_name: OsdName,
        logical_address: CecLogicalAddress,
        physical_address: u16,
    ) -> CecProcessor {
        CecProcessor {
            core: Arc::new(ProcessorCore {
                link,
                events,
                state: Mutex::new(DeviceState {
                    logical_address,
                    physical_address,
                    device_name,
                    current_button: None,
                }),
                stop: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Claim the configured logical address on the adapter and start the
    /// responder thread.
    pub(crate) fn start(&self) -> Result<(), CecError> {
        let logical = self.core.state.lock().unwrap().logical_address;
        self.core.link.set_ack_mask(CecAckMask::from(logical))?;

        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name("cec-processor".into())
            .spawn(move || core.run())
            .expect("failed to spawn the processor thread");
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop and join the responder thread. Idempotent.
    pub(crate) fn stop(&self) {
        self.core.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub(crate) fn transmit(
        &self,
        request: &TransmitRequest,
        wait_for_ack: bool,
    ) -> Result<(), CecError> {
        let fallback = self.core.state.lock().unwrap().logical_address;
        self.core.link.write(&request.encode(fallback), wait_for_ack)
    }

    /// Move to a new logical address and have the firmware ack it on the
    /// bus instead of the old one.
    pub(crate) fn set_logical_address(&self, address: CecLogicalAddress) -> Result<(), CecError> {
        self.core.state.lock().unwrap().logical_address = address;
        self.core.events.log(
            LogLevel::Notice,
            format!("logical address is now {address:?}"),
        );
        self.core.link.set_ack_mask(CecAckMask::from(address))
    }

    pub(crate) fn power_on_devices(&self, address: CecLogicalAddress) -> Result<(), CecError> {
        self.transmit(&TransmitRequest::new(address, CecOpcode::ImageViewOn), true)
    }

    pub(crate) fn standby_devices(&self, address: CecLogicalAddress) -> Result<(), CecError> {
        self.transmit(&TransmitRequest::new(address, CecOpcode::Standby), true)
    }

    /// Announce ourselves as the active source.
    pub(crate) fn set_active_view(&self) -> Result<(), CecError> {
        let physical = self.core.state.lock().unwrap().physical_address;
        self.transmit(
            &TransmitRequest::with_parameters(
                CecLogicalAddress::Broadcast,
                CecOpcode::ActiveSource,
                physical.to_be_bytes().to_vec(),
            ),
            true,
        )
    }

    /// Tell the bus we no longer have video to show.
    pub(crate) fn set_inactive_view(&self) -> Result<(), CecError> {
        let physical = self.core.state.lock().unwrap().physical_address;
        self.transmit(
            &TransmitRequest::with_parameters(
                CecLogicalAddress::Broadcast,
                CecOpcode::InactiveSource,
                physical.to_be_bytes().to_vec(),
            ),
            true,
        )
    }
}

impl ProcessorCore {
    fn run(&self) {
        while !self.stop.load(Ordering::Relaxed) {
            self.check_keypress_timeout();
            match self.link.read(CEC_FRAME_READ_TIMEOUT) {
                Ok(frame) => self.process_frame(&frame),
                Err(CecError::Timeout) => {}
                // link is gone, nothing left to process
                Err(_) => break,
            }
        }
    }

    fn process_frame(&self, frame: &[u8]) {
        let Some(msg) = CecMessage::parse(frame) else {
            self.events
                .log(LogLevel::Warning, format!("discarding short frame {frame:x?}"));
            return;
        };

        let local = self.state.lock().unwrap().logical_address;
        let directed = msg.destination == local;

        match CecOpcode::try_from(msg.opcode) {
            // answered no matter if asked directly or via broadcast
            Ok(CecOpcode::GivePhysicalAddr) if directed || msg.is_broadcast() => {
                self.report_physical_address();
            }
            Ok(CecOpcode::RequestActiveSource) if msg.is_broadcast() => {
                self.broadcast_active_source();
            }
            Ok(opcode) if directed => match opcode {
                CecOpcode::GiveOsdName => self.report_osd_name(msg.source),
                CecOpcode::GiveDeviceVendorId => self.report_vendor_id(),
                CecOpcode::GiveDevicePowerStatus => self.report_power_status(msg.source),
                CecOpcode::GetCecVersion => self.report_cec_version(msg.source),
                CecOpcode::GetMenuLanguage => self.report_menu_language(msg.source),
                CecOpcode::MenuRequest => self.report_menu_status(msg.source),
                CecOpcode::UserControlPressed => self.key_pressed(&msg),
                CecOpcode::UserControlReleased => self.key_released(),
                other => self.transmit_abort(msg.source, other.into()),
            },
            Err(_) if directed => self.transmit_abort(msg.source, msg.opcode),
            // broadcasts we have no part in, and traffic for other devices
            _ => {}
        }

        self.events.command(CecCommand {
            source: msg.source,
            destination: msg.destination,
            opcode: msg.opcode,
            parameters: msg.parameters,
        });
    }

    /// Synthesize the key-up once a button was held past
    /// [CEC_BUTTON_TIMEOUT] without a release from the remote.
    fn check_keypress_timeout(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some((keycode, down)) = state.current_button {
            let held = down.elapsed();
            if held > CEC_BUTTON_TIMEOUT {
                state.current_button = None;
                drop(state);
                self.events.keypress(keycode, held.as_millis() as u64);
            }
        }
    }

    fn key_pressed(&self, msg: &CecMessage) {
        let Some(&keycode) = msg.parameters.first() else {
            self.events
                .log(LogLevel::Warning, "key press without a key code");
            return;
        };
        self.state.lock().unwrap().current_button = Some((keycode, Instant::now()));
        self.events.keypress(keycode, 0);
    }

    /// A release after a timeout-synthesized one comes with no button on
    /// record and is ignored.
    fn key_released(&self) {
        let button = self.state.lock().unwrap().current_button.take();
        if let Some((keycode, down)) = button {
            self.events
                .keypress(keycode, down.elapsed().as_millis() as u64);
        }
    }

    /// Replies are fire-and-forget: a failure is logged, the bus moves on.
    fn reply(&self, request: TransmitRequest) {
        let fallback = self.state.lock().unwrap().logical_address;
        if let Err(e) = self.link.write(&request.encode(fallback), true) {
            self.events.log(
                LogLevel::Warning,
                format!("could not answer {:?}: {e}", request.opcode),
            );
        }
    }

    fn report_physical_address(&self) {
        let (physical, logical) = {
            let state = self.state.lock().unwrap();
            (state.physical_address, state.logical_address)
        };
        let [hi, lo] = physical.to_be_bytes();
        self.reply(TransmitRequest::with_parameters(
            CecLogicalAddress::Broadcast,
            CecOpcode::ReportPhysicalAddr,
            vec![hi, lo, logical.device_type().into()],
        ));
    }

    fn broadcast_active_source(&self) {
        let physical = self.state.lock().unwrap().physical_address;
        self.reply(TransmitRequest::with_parameters(
            CecLogicalAddress::Broadcast,
            CecOpcode::ActiveSource,
            physical.to_be_bytes().to_vec(),
        ));
    }

    fn report_osd_name(&self, to: CecLogicalAddress) {
        let name = self.state.lock().unwrap().device_name;
        self.reply(TransmitRequest::with_parameters(
            to,
            CecOpcode::SetOsdName,
            name.as_bytes().to_vec(),
        ));
    }

    /// We have no vendor ID to report, so report exactly that.
    fn report_vendor_id(&self) {
        self.reply(TransmitRequest::with_parameters(
            CecLogicalAddress::Broadcast,
            CecOpcode::DeviceVendorId,
            vec![0, 0, 0],
        ));
    }

    fn report_power_status(&self, to: CecLogicalAddress) {
        self.reply(TransmitRequest::with_parameters(
            to,
            CecOpcode::ReportPowerStatus,
            vec![CecPowerStatus::On.into()],
        ));
    }

    fn report_cec_version(&self, to: CecLogicalAddress) {
        self.reply(TransmitRequest::with_parameters(
            to,
            CecOpcode::CecVersion,
            vec![CecVersion::V1_3A.into()],
        ));
    }

    fn report_menu_language(&self, to: CecLogicalAddress) {
        self.reply(TransmitRequest::with_parameters(
            to,
            CecOpcode::SetMenuLanguage,
            MENU_LANGUAGE.to_vec(),
        ));
    }

    fn report_menu_status(&self, to: CecLogicalAddress) {
        // 0 = menu active
        self.reply(TransmitRequest::with_parameters(
            to,
            CecOpcode::MenuStatus,
            vec![0],
        ));
    }

    fn transmit_abort(&self, to: CecLogicalAddress, opcode: u8) {
        self.reply(TransmitRequest::with_parameters(
            to,
            CecOpcode::FeatureAbort,
            vec![opcode, CecAbortReason::Unrecognized.into()],
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{AdapterHandle, FakeAdapter, ResponsePolicy};
    use std::time::Duration;

    struct Fixture {
        processor: CecProcessor,
        handle: AdapterHandle,
        events: Arc<EventSink>,
    }

    impl Fixture {
        fn start() -> Fixture {
            let (port, handle) = FakeAdapter::new(ResponsePolicy::Accept);
            let events = Arc::new(EventSink::new());
            let link = Arc::new(AdapterLink::attach(Box::new(port), Arc::clone(&events)));
            let processor = CecProcessor::new(
                link,
                Arc::clone(&events),
                OsdName::from("cec tester"),
                CecLogicalAddress::Playback1,
                0x1000,
            );
            processor.start().unwrap();
            Fixture {
                processor,
                handle,
                events,
            }
        }

        fn drain_keys(&self) -> Vec<(u8, u64)> {
            let mut keys = Vec::new();
            while let Some(k) = self.events.pop_keypress() {
                keys.push((k.keycode, k.duration));
            }
            keys
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.processor.stop();
        }
    }

    #[test]
    fn start_claims_the_logical_address() {
        let fx = Fixture::start();
        // ack mask for Playback1: bit 4
        assert_eq!(fx.handle.commands()[0], vec![0x03, 0x10, 0x00]);
        fx.processor.stop();
    }

    #[test]
    fn answers_a_power_status_query() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x04, 0x8f]);
        let transmits = fx.handle.wait_for_transmits(1, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x40, 0x90, 0x00]);
    }

    #[test]
    fn aborts_an_unknown_opcode() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x04, 0x7e]);
        let transmits = fx.handle.wait_for_transmits(1, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x40, 0x00, 0x7e, 0x04]);
    }

    #[test]
    fn reports_the_physical_address_on_broadcast_query() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x0f, 0x83]);
        let transmits = fx.handle.wait_for_transmits(1, Duration::from_secs(2));
        // physical 1.0.0.0, device type playback
        assert_eq!(transmits[0], vec![0x4f, 0x84, 0x10, 0x00, 0x04]);
    }

    #[test]
    fn answers_version_name_language_and_menu_queries() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x04, 0x9f]);
        fx.handle.inject_cec(&[0x04, 0x46]);
        fx.handle.inject_cec(&[0x04, 0x91]);
        fx.handle.inject_cec(&[0x04, 0x8d, 0x02]);
        let transmits = fx.handle.wait_for_transmits(4, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x40, 0x9e, 0x04]); // version 1.3a
        assert_eq!(transmits[1][..2], [0x40, 0x47]);
        assert_eq!(&transmits[1][2..], b"cec tester");
        assert_eq!(transmits[2], vec![0x40, 0x32, b'e', b'n', b'g']);
        assert_eq!(transmits[3], vec![0x40, 0x8e, 0x00]); // menu active
    }

    #[test]
    fn broadcasts_the_active_source_when_asked() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x0f, 0x85]);
        let transmits = fx.handle.wait_for_transmits(1, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x4f, 0x82, 0x10, 0x00]);
    }

    #[test]
    fn set_active_view_carries_the_physical_address() {
        let fx = Fixture::start();
        fx.processor.set_active_view().unwrap();
        let transmits = fx.handle.wait_for_transmits(1, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x4f, 0x82, 0x10, 0x00]);
        fx.processor.set_inactive_view().unwrap();
        let transmits = fx.handle.wait_for_transmits(2, Duration::from_secs(2));
        assert_eq!(transmits[1], vec![0x4f, 0x9d, 0x10, 0x00]);
    }

    #[test]
    fn transmit_fills_the_source_nibble_idempotently() {
        let fx = Fixture::start();
        let request = TransmitRequest::new(CecLogicalAddress::Tv, CecOpcode::ImageViewOn);
        fx.processor.transmit(&request, true).unwrap();
        fx.processor.transmit(&request, true).unwrap();
        let transmits = fx.handle.wait_for_transmits(2, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x40, 0x04]);
        assert_eq!(transmits[0], transmits[1]);
    }

    #[test]
    fn power_helpers_use_the_documented_defaults() {
        let fx = Fixture::start();
        fx.processor.power_on_devices(CecLogicalAddress::Tv).unwrap();
        fx.processor
            .standby_devices(CecLogicalAddress::Broadcast)
            .unwrap();
        let transmits = fx.handle.wait_for_transmits(2, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x40, 0x04]);
        assert_eq!(transmits[1], vec![0x4f, 0x36]);
    }

    #[test]
    fn key_press_and_release_become_one_pair_of_events() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x04, 0x44, 0x41]); // volume up pressed
        thread::sleep(Duration::from_millis(100));
        fx.handle.inject_cec(&[0x04, 0x45]);
        thread::sleep(Duration::from_millis(100));
        let keys = fx.drain_keys();
        assert_eq!(keys.len(), 2, "expected down + up, got {keys:?}");
        assert_eq!(keys[0], (0x41, 0));
        assert_eq!(keys[1].0, 0x41);
        assert!(keys[1].1 > 0 && keys[1].1 < 300, "duration {:?}", keys[1].1);
    }

    #[test]
    fn a_stuck_key_is_released_by_the_timeout() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x04, 0x44, 0x44]); // play pressed, never released
        thread::sleep(Duration::from_millis(700));
        let keys = fx.drain_keys();
        assert_eq!(keys.len(), 2, "expected down + synthesized up, got {keys:?}");
        assert_eq!(keys[0], (0x44, 0));
        assert_eq!(keys[1].0, 0x44);
        assert!(
            keys[1].1 >= 500 && keys[1].1 < 700,
            "duration {:?}",
            keys[1].1
        );
    }

    #[test]
    fn a_release_after_the_timeout_is_ignored() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x04, 0x44, 0x44]);
        thread::sleep(Duration::from_millis(700));
        fx.handle.inject_cec(&[0x04, 0x45]); // the real release, too late
        thread::sleep(Duration::from_millis(100));
        let keys = fx.drain_keys();
        assert_eq!(keys.len(), 2, "late release must not add an event: {keys:?}");
    }

    #[test]
    fn every_frame_reaches_the_command_queue() {
        let fx = Fixture::start();
        fx.handle.inject_cec(&[0x04, 0x89, 0xaa, 0xbb]); // vendor command
        fx.handle.inject_cec(&[0x05, 0x36]); // standby for somebody else
        thread::sleep(Duration::from_millis(100));
        let first = fx.events.pop_command().unwrap();
        assert_eq!(first.source, CecLogicalAddress::Tv);
        assert_eq!(first.destination, CecLogicalAddress::Playback1);
        assert_eq!(first.opcode, 0x89);
        assert_eq!(first.parameters, vec![0xaa, 0xbb]);
        let second = fx.events.pop_command().unwrap();
        assert_eq!(second.destination, CecLogicalAddress::AudioSystem);
        assert_eq!(second.opcode, 0x36);
    }

    #[test]
    fn set_logical_address_reprograms_the_ack_mask() {
        let fx = Fixture::start();
        fx.processor
            .set_logical_address(CecLogicalAddress::Playback2)
            .unwrap();
        let masks: Vec<_> = fx
            .handle
            .commands()
            .into_iter()
            .filter(|c| c[0] == 0x03)
            .collect();
        assert_eq!(masks, vec![vec![0x03, 0x10, 0x00], vec![0x03, 0x00, 0x01]]);
        // replies now leave from the new address
        fx.handle.inject_cec(&[0x08, 0x8f]);
        let transmits = fx.handle.wait_for_transmits(1, Duration::from_secs(2));
        assert_eq!(transmits[0], vec![0x80, 0x90, 0x00]);
    }
}
