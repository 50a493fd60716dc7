use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use super::{DeviceAdapter, DeviceEvent};
use crate::capture::CaptureCore;
use crate::error::DeviceError;

/// Owns the `device-hub` thread that drives an adapter into the core.
pub struct DeviceHub {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    core: Arc<CaptureCore>,
    device: String,
}

impl DeviceHub {
    pub fn spawn(
        mut adapter: Box<dyn DeviceAdapter>,
        core: Arc<CaptureCore>,
    ) -> Result<Self, DeviceError> {
        let running = Arc::new(AtomicBool::new(true));
        let device = adapter.name().to_string();

        let running_clone = Arc::clone(&running);
        let core_clone = Arc::clone(&core);

        let handle = thread::Builder::new()
            .name("device-hub".to_string())
            .spawn(move || {
                let mut emit = |event: DeviceEvent| core_clone.handle_event(event);
                if let Err(e) = adapter.run(&mut emit, &running_clone) {
                    error!(device = %adapter.name(), "device adapter failed: {e}");
                    core_clone.handle_event(DeviceEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
            })?;

        info!(device = %device, "device hub started");

        Ok(Self {
            running,
            handle: Mutex::new(Some(handle)),
            core,
            device,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_running(&self) -> bool {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the adapter and join its thread. Idempotent.
    ///
    /// Also puts the core into shutdown, so no new session writes start.
    pub fn shutdown(&self) {
        self.core.request_shutdown();
        self.running.store(false, Ordering::SeqCst);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        // joining ourselves would deadlock
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(device = %self.device, "device hub thread panicked");
        }
        info!(device = %self.device, "device hub stopped");
    }
}

impl Drop for DeviceHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DeviceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHub")
            .field("device", &self.device)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}
