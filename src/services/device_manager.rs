//! Device manager orchestrating every interaction with the attached device.
//!
//! One manager owns one transport and two worker threads:
//! - the poller, which watches for attach/detach and mode changes and
//!   reports transitions through the state callback
//! - the dispatcher, which drains queued commands in FIFO order and hands
//!   each reply to its completion handler
//!
//! All transport access goes through a single channel lock, so polling,
//! synchronous sends, queued sends and firmware flashing never overlap.
//! The state callback runs outside that lock and may call back into the
//! manager.
//! During a firmware upgrade the poller is additionally paused so it does
//! not queue up behind the flash.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use zeroize::Zeroizing;

use crate::adapters::transport::{connect_best_backend, BackendType, DeviceTransport};
use crate::domain::constants::FIND_DEVICE_POLL_INTERVAL;
use crate::domain::crypto::{decrypt_possible_ciphertext, encrypt_and_encode};
use crate::domain::firmware::{assemble, load_from_source, FirmwareLayout, FirmwareSource};
use crate::domain::types::{CommandStatus, DeviceIdentifier, DeviceState, Passphrase};
use crate::infra::config::{ClientConfiguration, ConfigManager};
use crate::infra::error::{DeviceError, DeviceResult};
use crate::services::command_queue::CommandQueue;
use crate::services::pending::{CommandOutcome, PendingResponse};

/// Called with the new state and identifier whenever the poller sees a change.
pub type StateCallback = Box<dyn FnMut(DeviceState, &DeviceIdentifier) + Send>;

type CompletionHandler = Box<dyn FnOnce(String, CommandStatus) + Send>;

/// A request waiting for the dispatcher.
struct CommandPackage {
    /// Wire payload (already encrypted when requested)
    payload: String,
    handler: CompletionHandler,
}

/// Everything guarded by the channel lock.
struct Channel {
    transport: Box<dyn DeviceTransport>,
}

impl Channel {
    /// Open, send one request and close again.
    fn exchange(&mut self, payload: &str) -> DeviceResult<String> {
        self.transport
            .open(&DeviceIdentifier::any())
            .map_err(as_connection_error)?;
        let result = self.transport.send_synchronous_request(payload);
        self.transport.close();
        result.map_err(as_connection_error)
    }
}

/// State shared between the manager handle and its worker threads.
struct Shared {
    channel: Mutex<Channel>,
    // Empty while the poller is running the callback.
    state_callback: Mutex<Option<StateCallback>>,
    queue: CommandQueue<CommandPackage>,
    stop_polling: AtomicBool,
    poll_paused: AtomicBool,
    poll_interval: Duration,
    // Wakes the poller out of its inter-tick sleep on shutdown.
    poll_sleep: Mutex<()>,
    poll_wakeup: Condvar,
}

impl Shared {
    fn lock_channel(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().unwrap_or_else(|poisoned| {
            log::warn!("Channel lock was poisoned by a panic, recovering");
            poisoned.into_inner()
        })
    }

    fn callback_slot(&self) -> MutexGuard<'_, Option<StateCallback>> {
        self.state_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the state callback with no lock held.
    fn notify_state_change(&self, state: DeviceState, identifier: &DeviceIdentifier) {
        let Some(mut callback) = self.callback_slot().take() else {
            return;
        };
        run_guarded("State callback", || callback(state, identifier));

        // Keep a replacement installed while the callback ran
        let mut slot = self.callback_slot();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }

    fn sleep_until_next_poll(&self) {
        let guard = self
            .poll_sleep
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .poll_wakeup
            .wait_timeout_while(guard, self.poll_interval, |_| {
                !self.stop_polling.load(Ordering::SeqCst)
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn stop(&self) {
        self.stop_polling.store(true, Ordering::SeqCst);
        {
            let _guard = self
                .poll_sleep
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.poll_wakeup.notify_all();
        }
        self.queue.shutdown();
    }
}

/// Keeps the poller paused for as long as it lives.
struct PollPause<'a>(&'a AtomicBool);

impl<'a> PollPause<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        PollPause(flag)
    }
}

impl Drop for PollPause<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Client-side manager for one hardware wallet.
pub struct DeviceManager {
    shared: Arc<Shared>,
    backend: BackendType,
    layout: FirmwareLayout,
    poll_thread: Option<JoinHandle<()>>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl DeviceManager {
    /// Create a manager over `transport` and start its worker threads.
    ///
    /// The poller checks for the device every second.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if a worker thread cannot be spawned.
    pub fn new<C>(transport: Box<dyn DeviceTransport>, state_callback: C) -> DeviceResult<Self>
    where
        C: FnMut(DeviceState, &DeviceIdentifier) + Send + 'static,
    {
        Self::start(transport, Box::new(state_callback), FIND_DEVICE_POLL_INTERVAL)
    }

    /// Create a manager using the poll interval from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for an invalid configuration and
    /// `IoError` if a worker thread cannot be spawned.
    pub fn with_config<C>(
        transport: Box<dyn DeviceTransport>,
        state_callback: C,
        config: &ClientConfiguration,
    ) -> DeviceResult<Self>
    where
        C: FnMut(DeviceState, &DeviceIdentifier) + Send + 'static,
    {
        ConfigManager::validate_config(config)?;
        Self::start(transport, Box::new(state_callback), config.poll_interval())
    }

    /// Open the USB backend using the user's configuration file (or defaults).
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or no backend is
    /// available.
    pub fn connect_default<C>(state_callback: C) -> DeviceResult<Self>
    where
        C: FnMut(DeviceState, &DeviceIdentifier) + Send + 'static,
    {
        let config = ConfigManager::new()?.load_or_default()?;
        let transport = connect_best_backend(&config)?;
        Self::with_config(transport, state_callback, &config)
    }

    fn start(
        transport: Box<dyn DeviceTransport>,
        state_callback: StateCallback,
        poll_interval: Duration,
    ) -> DeviceResult<Self> {
        let backend = transport.backend_type();
        log::debug!("Starting device manager ({backend} backend, poll every {poll_interval:?})");

        let shared = Arc::new(Shared {
            channel: Mutex::new(Channel { transport }),
            state_callback: Mutex::new(Some(state_callback)),
            queue: CommandQueue::new(),
            stop_polling: AtomicBool::new(false),
            poll_paused: AtomicBool::new(false),
            poll_interval,
            poll_sleep: Mutex::new(()),
            poll_wakeup: Condvar::new(),
        });

        // Built before spawning so a failed spawn still stops what did start.
        let mut manager = Self {
            shared,
            backend,
            layout: FirmwareLayout::default(),
            poll_thread: None,
            dispatch_thread: None,
        };

        let poll_shared = Arc::clone(&manager.shared);
        manager.poll_thread = Some(
            thread::Builder::new()
                .name("dbb-poll".to_string())
                .spawn(move || poll_loop(&poll_shared))?,
        );

        let dispatch_shared = Arc::clone(&manager.shared);
        manager.dispatch_thread = Some(
            thread::Builder::new()
                .name("dbb-dispatch".to_string())
                .spawn(move || dispatch_loop(&dispatch_shared))?,
        );

        Ok(manager)
    }

    /// Backend the manager talks through.
    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        self.backend
    }

    /// Replace the state-changed callback.
    pub fn set_state_change_callback<C>(&self, state_callback: C)
    where
        C: FnMut(DeviceState, &DeviceIdentifier) + Send + 'static,
    {
        *self.shared.callback_slot() = Some(Box::new(state_callback));
    }

    /// Query the transport for the current device state.
    pub fn find_device(&self) -> (DeviceState, DeviceIdentifier) {
        self.shared.lock_channel().transport.find_device()
    }

    /// Number of queued commands not yet picked up by the dispatcher.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.shared.queue.len()
    }

    /// Send a command and wait for the reply.
    ///
    /// With `encrypt`, the payload is sent as an encrypted envelope under
    /// `passphrase`. Replies carrying a `"ciphertext"` field are decrypted
    /// (with the new passphrase for a password change); anything else is
    /// returned exactly as received.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` if encryption was requested with an empty
    /// passphrase (nothing is sent), and `ConnectionError` if the transport
    /// fails.
    pub fn send_synchronous_command(
        &self,
        payload: &str,
        passphrase: &str,
        encrypt: bool,
    ) -> DeviceResult<String> {
        let wire = frame_request(payload, passphrase, encrypt)?;

        let response = {
            let mut channel = self.shared.lock_channel();
            log::debug!("[sync] sending command");
            channel.exchange(&wire)?
        };

        Ok(unframe_response(payload, response, passphrase))
    }

    /// Queue a command; `handler` receives the reply on the dispatcher thread.
    ///
    /// Handlers run one at a time, in the order their commands were queued.
    /// A failed exchange is reported as an empty reply with
    /// [`CommandStatus::Failure`].
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` if encryption was requested with an empty
    /// passphrase. Nothing is queued in that case.
    pub fn send_command<H>(
        &self,
        payload: &str,
        passphrase: &str,
        handler: H,
        encrypt: bool,
    ) -> DeviceResult<()>
    where
        H: FnOnce(String, CommandStatus) + Send + 'static,
    {
        let wire = frame_request(payload, passphrase, encrypt)?;
        let original = Zeroizing::new(payload.to_string());
        let passphrase = Passphrase::new(passphrase);

        log::debug!("[queue] adding command");
        self.shared.queue.enqueue(CommandPackage {
            payload: wire,
            handler: Box::new(move |response, status| {
                let response = unframe_response(&original, response, passphrase.as_str());
                handler(response, status);
            }),
        });
        Ok(())
    }

    /// Queue a command and get a handle to wait on its reply.
    ///
    /// # Errors
    ///
    /// Same as [`send_command`](Self::send_command).
    pub fn submit_command(
        &self,
        payload: &str,
        passphrase: &str,
        encrypt: bool,
    ) -> DeviceResult<PendingResponse> {
        let (sender, receiver) = mpsc::channel();
        self.send_command(
            payload,
            passphrase,
            move |response, status| {
                // The caller may have dropped the handle
                let _ = sender.send(CommandOutcome { response, status });
            },
            encrypt,
        )?;
        Ok(PendingResponse::new(receiver))
    }

    /// Flash a production image, which carries its own signature block.
    ///
    /// # Errors
    ///
    /// See [`upgrade_firmware`](Self::upgrade_firmware).
    pub fn upgrade_firmware_production(
        &self,
        source: impl Into<FirmwareSource>,
        progress: impl FnMut(f32),
    ) -> DeviceResult<()> {
        self.upgrade_firmware(source, progress, false, |_| String::new())
    }

    /// Load, assemble and flash a firmware image.
    ///
    /// The poller is paused for the duration and the channel lock is held
    /// while the transport flashes, so nothing else reaches the device.
    /// `progress` receives percentages in `[0, 100]`.
    ///
    /// For development devices `signer` is handed the padded flash buffer
    /// and may return a hex signature; see
    /// [`assemble`](crate::domain::firmware::assemble).
    ///
    /// # Errors
    ///
    /// Returns `FileError` for a missing, empty or oversized image (before
    /// the device is touched) and `ConnectionError` if flashing fails.
    pub fn upgrade_firmware<F>(
        &self,
        source: impl Into<FirmwareSource>,
        mut progress: impl FnMut(f32),
        development_device: bool,
        signer: F,
    ) -> DeviceResult<()>
    where
        F: FnOnce(&[u8]) -> String,
    {
        let (raw, firmware_size) = load_from_source(source.into(), &self.layout)?;
        let image = assemble(&raw, firmware_size, development_device, signer, &self.layout)?;

        log::info!(
            "Starting firmware upgrade: {} bytes, {}",
            image.firmware_size,
            if image.signature_hex.is_empty() {
                "unsigned"
            } else {
                "signed"
            }
        );

        let _pause = PollPause::engage(&self.shared.poll_paused);
        let mut channel = self.shared.lock_channel();
        let result = channel
            .transport
            .perform_firmware_upgrade(
                &image.firmware,
                image.firmware_size,
                &image.signature_hex,
                &mut progress,
            )
            .map_err(as_connection_error);

        match &result {
            Ok(()) => log::info!("Firmware upgrade finished"),
            Err(e) => log::info!("Firmware upgrade failed: {e}"),
        }
        result
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        log::debug!("Stopping device manager");
        self.shared.stop();

        for handle in [self.poll_thread.take(), self.dispatch_thread.take()]
            .into_iter()
            .flatten()
        {
            // Dropped from inside a handler; that thread exits on its own.
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("Device manager worker thread panicked");
            }
        }
    }
}

fn poll_loop(shared: &Shared) {
    log::debug!("Poll loop started");
    let mut last_known_state = DeviceState::NoDevice;

    while !shared.stop_polling.load(Ordering::SeqCst) {
        if !shared.poll_paused.load(Ordering::SeqCst) {
            let (state, identifier) = shared.lock_channel().transport.find_device();
            if state != last_known_state {
                log::info!("Device state changed: {last_known_state} -> {state}");
                last_known_state = state;
                shared.notify_state_change(state, &identifier);
            }
        }
        shared.sleep_until_next_poll();
    }
    log::debug!("Poll loop stopped");
}

fn dispatch_loop(shared: &Shared) {
    log::debug!("Dispatch loop started");

    while let Some(package) = shared.queue.dequeue() {
        let result = {
            let mut channel = shared.lock_channel();
            log::debug!("[dispatch] sending queued command");
            channel.exchange(&package.payload)
        };

        let (response, status) = match result {
            Ok(response) => (response, CommandStatus::Success),
            Err(e) => {
                log::debug!("[dispatch] command failed: {e}");
                (String::new(), CommandStatus::Failure)
            }
        };
        let handler = package.handler;
        run_guarded("Command handler", || handler(response, status));
    }
    log::debug!("Dispatch loop stopped");
}

/// Run a user callback, containing any panic to this call.
fn run_guarded(what: &str, callback: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        log::warn!("{what} panicked");
    }
}

fn frame_request(payload: &str, passphrase: &str, encrypt: bool) -> DeviceResult<String> {
    if encrypt {
        encrypt_and_encode(payload, passphrase)
    } else {
        Ok(payload.to_string())
    }
}

fn unframe_response(original: &str, response: String, passphrase: &str) -> String {
    match decrypt_possible_ciphertext(original, &response, passphrase) {
        Some(mut plaintext) => std::mem::take(&mut *plaintext),
        None => response,
    }
}

fn as_connection_error(error: DeviceError) -> DeviceError {
    match error {
        DeviceError::ConnectionError(_) => error,
        other => DeviceError::ConnectionError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replies with the request it was sent, reports a fixed state.
    struct EchoTransport {
        state: DeviceState,
    }

    impl DeviceTransport for EchoTransport {
        fn backend_type(&self) -> BackendType {
            BackendType::InProcess
        }
        fn open(&mut self, _identifier: &DeviceIdentifier) -> DeviceResult<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn send_synchronous_request(&mut self, payload: &str) -> DeviceResult<String> {
            Ok(payload.to_string())
        }
        fn find_device(&mut self) -> (DeviceState, DeviceIdentifier) {
            (self.state, DeviceIdentifier::new("echo"))
        }
        fn perform_firmware_upgrade(
            &mut self,
            _firmware: &[u8],
            _firmware_size: usize,
            _signature_hex: &str,
            _progress: &mut dyn FnMut(f32),
        ) -> DeviceResult<()> {
            Err(DeviceError::ProtocolError("not a bootloader".to_string()))
        }
    }

    fn echo_manager() -> DeviceManager {
        DeviceManager::new(
            Box::new(EchoTransport {
                state: DeviceState::Firmware,
            }),
            |_, _| {},
        )
        .unwrap()
    }

    #[test]
    fn test_connection_error_not_rewrapped() {
        let err = as_connection_error(DeviceError::ConnectionError("gone".to_string()));
        assert!(matches!(err, DeviceError::ConnectionError(msg) if msg == "gone"));

        let err = as_connection_error(DeviceError::ProtocolError("bad frame".to_string()));
        assert!(matches!(err, DeviceError::ConnectionError(msg) if msg.contains("bad frame")));
    }

    #[test]
    fn test_poll_pause_clears_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _pause = PollPause::engage(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unframe_passes_plain_reply_through() {
        let reply = "{\"led\":\"blink\"}".to_string();
        assert_eq!(unframe_response("{}", reply.clone(), "pw"), reply);
    }

    #[test]
    fn test_sync_command_echo() {
        let manager = echo_manager();
        assert_eq!(manager.backend_type(), BackendType::InProcess);
        let reply = manager
            .send_synchronous_command("{\"ping\":\"\"}", "", false)
            .unwrap();
        assert_eq!(reply, "{\"ping\":\"\"}");
    }

    #[test]
    fn test_encrypt_without_passphrase_queues_nothing() {
        let manager = echo_manager();
        let result = manager.send_command("{}", "", |_, _| {}, true);
        assert!(matches!(result, Err(DeviceError::CryptoError(_))));
        assert_eq!(manager.pending_commands(), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let manager = echo_manager();
        manager
            .send_command("first", "", |_, _| panic!("handler bug"), false)
            .unwrap();
        let pending = manager.submit_command("second", "", false).unwrap();
        let outcome = pending.wait();
        assert_eq!(outcome.response, "second");
        assert!(outcome.status.is_success());
    }

    #[test]
    fn test_drop_is_prompt_with_long_poll_interval() {
        let config = ClientConfiguration {
            poll_interval_ms: 60_000,
            ..ClientConfiguration::default()
        };
        let manager = DeviceManager::with_config(
            Box::new(EchoTransport {
                state: DeviceState::NoDevice,
            }),
            |_, _| {},
            &config,
        )
        .unwrap();
        let started = std::time::Instant::now();
        drop(manager);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_failed_upgrade_is_connection_error() {
        let manager = echo_manager();
        let result = manager.upgrade_firmware(
            FirmwareSource::Buffer {
                bytes: vec![0xAB; 600],
                firmware_size: 600,
            },
            |_| {},
            false,
            |_| String::new(),
        );
        assert!(matches!(result, Err(DeviceError::ConnectionError(_))));
        assert!(!manager.shared.poll_paused.load(Ordering::SeqCst));
    }
}
