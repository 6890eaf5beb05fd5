//! Scripted in-process transport.
//!
//! `MockTransport` is handed to the device manager; the paired `MockHandle`
//! stays with the test to script replies, change the reported device state
//! and inspect the recorded call log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use dbb_bridge::{BackendType, DeviceError, DeviceIdentifier, DeviceResult, DeviceState, DeviceTransport};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    Close,
    Send(String),
    Find,
    UpgradeStarted {
        firmware_len: usize,
        firmware_size: usize,
        signature_hex: String,
    },
    UpgradeFinished,
}

type Responder = Box<dyn FnMut(&str) -> DeviceResult<String> + Send>;
type FirmwareInspector = Box<dyn FnMut(&[u8]) + Send>;

struct MockState {
    calls: Mutex<Vec<Call>>,
    scripted: Mutex<VecDeque<DeviceResult<String>>>,
    responder: Mutex<Option<Responder>>,
    device: Mutex<(DeviceState, DeviceIdentifier)>,
    busy: AtomicBool,
    overlap_detected: AtomicBool,
    fail_open: AtomicBool,
    fail_upgrade: AtomicBool,
    flash_steps: Mutex<(usize, Duration)>,
    firmware_inspector: Mutex<Option<FirmwareInspector>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Marks the transport busy for the duration of one call.
struct Busy<'a>(&'a MockState);

impl<'a> Busy<'a> {
    fn enter(state: &'a MockState) -> Self {
        if state.busy.swap(true, Ordering::SeqCst) {
            state.overlap_detected.store(true, Ordering::SeqCst);
        }
        Busy(state)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl MockHandle {
    /// Queue a reply; replies are consumed in order before the responder.
    pub fn push_response(&self, response: DeviceResult<String>) {
        lock(&self.state.scripted).push_back(response);
    }

    /// Compute replies from requests once scripted replies run out.
    pub fn set_responder(&self, responder: impl FnMut(&str) -> DeviceResult<String> + Send + 'static) {
        *lock(&self.state.responder) = Some(Box::new(responder));
    }

    pub fn set_device(&self, state: DeviceState, identifier: &str) {
        *lock(&self.state.device) = (state, DeviceIdentifier::new(identifier));
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upgrade(&self, fail: bool) {
        self.state.fail_upgrade.store(fail, Ordering::SeqCst);
    }

    /// Make flashing take `steps` progress reports `delay` apart.
    pub fn slow_flash(&self, steps: usize, delay: Duration) {
        *lock(&self.state.flash_steps) = (steps, delay);
    }

    /// See the flash buffer handed to the transport.
    pub fn inspect_firmware(&self, inspector: impl FnMut(&[u8]) + Send + 'static) {
        *lock(&self.state.firmware_inspector) = Some(Box::new(inspector));
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state.calls).clone()
    }

    /// Payloads of every `send_synchronous_request`, in order.
    pub fn sent(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls().iter().filter(|call| *call == wanted).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.state.calls).clear();
    }

    /// Whether two transport calls ever ran at the same time.
    pub fn overlap_detected(&self) -> bool {
        self.state.overlap_detected.load(Ordering::SeqCst)
    }
}

/// In-process transport driven by a [`MockHandle`].
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// A transport echoing every request, reporting an attached device.
    pub fn new() -> (Box<dyn DeviceTransport>, MockHandle) {
        let state = Arc::new(MockState {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            responder: Mutex::new(None),
            device: Mutex::new((DeviceState::Firmware, DeviceIdentifier::new("mock:1"))),
            busy: AtomicBool::new(false),
            overlap_detected: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_upgrade: AtomicBool::new(false),
            flash_steps: Mutex::new((4, Duration::ZERO)),
            firmware_inspector: Mutex::new(None),
        });
        let handle = MockHandle {
            state: Arc::clone(&state),
        };
        (Box::new(MockTransport { state }), handle)
    }

    fn record(&self, call: Call) {
        lock(&self.state.calls).push(call);
    }
}

impl DeviceTransport for MockTransport {
    fn backend_type(&self) -> BackendType {
        BackendType::InProcess
    }

    fn open(&mut self, _identifier: &DeviceIdentifier) -> DeviceResult<()> {
        let _busy = Busy::enter(&self.state);
        self.record(Call::Open);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceError::ConnectionError("device unplugged".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        let _busy = Busy::enter(&self.state);
        self.record(Call::Close);
    }

    fn send_synchronous_request(&mut self, payload: &str) -> DeviceResult<String> {
        let _busy = Busy::enter(&self.state);
        self.record(Call::Send(payload.to_string()));

        if let Some(response) = lock(&self.state.scripted).pop_front() {
            return response;
        }
        match lock(&self.state.responder).as_mut() {
            Some(responder) => responder(payload),
            None => Ok(payload.to_string()),
        }
    }

    fn find_device(&mut self) -> (DeviceState, DeviceIdentifier) {
        let _busy = Busy::enter(&self.state);
        self.record(Call::Find);
        lock(&self.state.device).clone()
    }

    fn perform_firmware_upgrade(
        &mut self,
        firmware: &[u8],
        firmware_size: usize,
        signature_hex: &str,
        progress: &mut dyn FnMut(f32),
    ) -> DeviceResult<()> {
        let _busy = Busy::enter(&self.state);
        self.record(Call::UpgradeStarted {
            firmware_len: firmware.len(),
            firmware_size,
            signature_hex: signature_hex.to_string(),
        });
        if let Some(inspector) = lock(&self.state.firmware_inspector).as_mut() {
            inspector(firmware);
        }

        let (steps, delay) = *lock(&self.state.flash_steps);
        progress(0.0);
        for step in 1..=steps {
            thread::sleep(delay);
            progress(step as f32 / steps as f32 * 100.0);
        }

        self.record(Call::UpgradeFinished);
        if self.state.fail_upgrade.load(Ordering::SeqCst) {
            return Err(DeviceError::ProtocolError(
                "bootloader rejected signature".to_string(),
            ));
        }
        Ok(())
    }
}
