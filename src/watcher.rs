//! Background thread reacting to RCM device attach events.
//!
//! The watcher blocks in the libusb event wait with no timeout and is
//! woken by exactly two things: a matching device attach or the
//! one-shot cancellation signal. Every attach gets exactly one
//! injection attempt; acquisition or transfer failures are logged and
//! the watcher keeps waiting for the next attach.
//!
//! The hotplug callback itself runs inside `handle_events` and must
//! not touch the device: synchronous transfers from within the event
//! loop would wait on event handling that the current thread is
//! already performing. The callback therefore only queues the arrived
//! device, and the watcher loop drains the queue between event waits.

use crate::catalog::PayloadEntry;
use crate::error::Error;
use crate::payload::{self, PayloadBuffer, RegionStatus};
use crate::selection::Selection;
use crate::usb::{self, ControlXferBuffer, Rcm};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Presence poll cadence on platforms whose libusb has no hotplug
/// support.
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Exact-match attach filter.
#[derive(Clone, Copy, Debug)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// One-shot cancellation signal for the watcher thread.
///
/// Set exactly once on shutdown and never reset. Cancellation does not
/// interrupt an injection already in flight; it takes effect at the
/// next event wait.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    context: Context,
}

impl CancelHandle {
    /// Signals the watcher to terminate and wakes its event wait.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.context.interrupt_handle_events();
    }
}

type PendingDevices = Arc<Mutex<Vec<Device<Context>>>>;

/// The device watcher. Built on the UI thread, run on its own thread
/// via [`spawn`], stopped through the paired [`CancelHandle`].
pub struct Watcher {
    context: Context,
    cancelled: Arc<AtomicBool>,
    filter: DeviceFilter,
    injector: Injector,
    pending: PendingDevices,
    registration: Option<Registration<Context>>,
}

impl Watcher {
    /// Creates the watcher and its cancellation handle, registering
    /// interest in attach notifications up front.
    ///
    /// Failure here (USB context creation, hotplug registration) is
    /// fatal to the caller: a watcher that cannot see attach events is
    /// useless. `intermezzo` holds the relocator bytes read once at
    /// startup; `None` is tolerated and degrades to a zeroed relocator
    /// region.
    pub fn new(
        filter: DeviceFilter,
        selection: Selection,
        intermezzo: Option<Vec<u8>>,
    ) -> rusb::Result<(Self, CancelHandle)> {
        let context = Context::new()?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let pending = PendingDevices::default();

        // Enumeration of already-present devices counts as an attach;
        // those land in the queue before the watcher loop starts.
        let registration = if rusb::has_hotplug() {
            Some(
                HotplugBuilder::new()
                    .vendor_id(filter.vendor_id)
                    .product_id(filter.product_id)
                    .enumerate(true)
                    .register(
                        &context,
                        Box::new(AttachHandler {
                            pending: pending.clone(),
                        }),
                    )?,
            )
        } else {
            None
        };

        let handle = CancelHandle {
            cancelled: cancelled.clone(),
            context: context.clone(),
        };

        let watcher = Watcher {
            context,
            cancelled,
            filter,
            injector: Injector {
                selection,
                intermezzo,
                buffer: Box::new(PayloadBuffer::new()),
                scratch: Box::new(ControlXferBuffer::new()),
            },
            pending,
            registration,
        };

        Ok((watcher, handle))
    }

    /// Runs until cancelled.
    pub fn run(mut self) {
        if self.registration.is_some() {
            self.run_hotplug();
        } else {
            self.run_polling();
        }
    }

    fn run_hotplug(&mut self) {
        loop {
            // Injection happens here, outside the libusb event loop.
            for device in drain(&self.pending) {
                self.injector.handle_attach(&device);
            }

            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            if let Err(err) = self.context.handle_events(None) {
                if self.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                error!("Failed", "to wait for usb events: {}", err);
                thread::sleep(FALLBACK_POLL_INTERVAL);
            }
        }

        // Unregister attach notifications before the thread exits.
        drop(self.registration.take());
    }

    fn run_polling(&mut self) {
        info!("Waiting", "for RCM devices (no hotplug support, polling)");

        // Edge detection so one attach maps to one injection attempt.
        let mut present = false;

        while !self.cancelled.load(Ordering::SeqCst) {
            match usb::find_rcm_device(&self.context, self.filter.vendor_id, self.filter.product_id)
            {
                Ok(device) => {
                    if !present {
                        present = true;
                        self.injector.handle_attach(&device);
                    }
                }
                Err(_) => present = false,
            }

            thread::sleep(FALLBACK_POLL_INTERVAL);
        }
    }
}

/// Spawns the watcher on its own named thread.
///
/// Spawn failure is fatal to the caller; there is no meaningful
/// recovery without a watcher.
pub fn spawn(watcher: Watcher) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("usb-watcher".into())
        .spawn(move || watcher.run())
}

/// Empties the pending-device queue, preserving arrival order.
fn drain<T>(pending: &Mutex<Vec<T>>) -> Vec<T> {
    mem::take(&mut *pending.lock().unwrap_or_else(|err| err.into_inner()))
}

/// Hotplug callback. Runs inside the libusb event loop, so it performs
/// no device I/O; it only records the arrival.
struct AttachHandler {
    pending: PendingDevices,
}

impl Hotplug<Context> for AttachHandler {
    fn device_arrived(&mut self, device: Device<Context>) {
        self.pending
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(device);
    }

    fn device_left(&mut self, _device: Device<Context>) {}
}

/// Owns everything one injection attempt needs: the current selection,
/// the relocator bytes and the reusable transfer arenas.
struct Injector {
    selection: Selection,
    intermezzo: Option<Vec<u8>>,
    buffer: Box<PayloadBuffer>,
    scratch: Box<ControlXferBuffer>,
}

impl Injector {
    fn handle_attach(&mut self, device: &Device<Context>) {
        // With an empty catalog there is nothing to send.
        let entry = match self.selection.current() {
            Some(entry) => entry,
            None => return,
        };

        info!("Detected", "RCM device");

        let mut rcm = match Rcm::open(device) {
            Ok(rcm) => rcm,
            Err(err) => {
                // Missed this attach; the next one gets a fresh try.
                error!("Failure!", "(rc=0x{:x}) {}", err.code(), err);
                return;
            }
        };

        if let Err(err) = self.inject(&mut rcm, &entry) {
            error!("Failure!", "(rc=0x{:x}) {}", err.code(), err);
        }
    }

    fn inject(&mut self, rcm: &mut Rcm, entry: &PayloadEntry) -> Result<(), Error> {
        info!("Reading", "device id...");
        let device_id = rcm.read_device_id()?;
        info!("Found", "device with id {:02x?}", device_id);

        info!("Constructing", "payload from {}...", entry.label());
        let assembled = payload::assemble(&mut self.buffer, self.intermezzo.as_deref(), entry.path());
        if assembled.intermezzo == RegionStatus::Missing {
            warn!("Warning", "intermezzo missing, relocator region left zeroed");
        }
        if assembled.payload == RegionStatus::Missing {
            warn!("Warning", "{} unreadable, payload region left zeroed", entry.label());
        }

        info!("Transferring", "{} payload bytes...", assembled.used);
        rcm.write_payload(&self.buffer, assembled.used)?;

        info!("Smashing", "the stack...");
        rcm.trigger(&mut self.scratch);

        ok!("Injected", "{}", entry.label());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_queue_in_order() {
        let pending = Mutex::new(vec![1, 2, 3]);

        assert_eq!(drain(&pending), vec![1, 2, 3]);
        assert!(drain(&pending).is_empty());

        pending.lock().unwrap().push(4);
        assert_eq!(drain(&pending), vec![4]);
    }
}
