use std::{collections::HashMap, sync::Mutex, time::Duration};

use tokio::time::Instant;

use crate::message::Device;

/// How long a device stays visible after its last announcement.
pub(crate) const DEVICE_TIMEOUT: Duration = Duration::from_millis(5000);

struct Entry {
    device: Device,
    last_seen: Instant,
}

struct Inner {
    devices: HashMap<u8, Entry>,
    first_seen: Option<Instant>,
}

/// The table of devices currently visible on the network. Shared
/// between the port-50000 receive loop (which feeds and sweeps it) and
/// the public handle (which snapshots it).
pub(crate) struct DeviceRegistry {
    inner: Mutex<Inner>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> DeviceRegistry {
        DeviceRegistry {
            inner: Mutex::new(Inner {
                devices: HashMap::new(),
                first_seen: None,
            }),
        }
    }

    /// Records an announcement. Returns the (lost, found) events the
    /// caller must publish: found when the number is new, lost+found
    /// when a different device took over an existing number.
    pub(crate) fn on_announcement(&self, device: Device) -> (Option<Device>, Option<Device>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if inner.first_seen.is_none() {
            inner.first_seen = Some(now);
        }

        let entry = Entry {
            device: device.clone(),
            last_seen: now,
        };
        match inner.devices.insert(device.device_num, entry) {
            None => (None, Some(device)),
            Some(prev) => {
                if prev.device == device {
                    (None, None)
                } else {
                    (Some(prev.device), Some(device))
                }
            }
        }
    }

    /// Removes every entry not heard from within the timeout and
    /// returns them, once each, for device-lost delivery.
    pub(crate) fn expire(&self) -> Vec<Device> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        // This should use extract_if once stabilized.
        let timed_out: Vec<u8> = inner
            .devices
            .iter()
            .filter(|(_, entry)| now - entry.last_seen > DEVICE_TIMEOUT)
            .map(|(num, _)| *num)
            .collect();

        timed_out
            .iter()
            .filter_map(|num| inner.devices.remove(num))
            .map(|entry| entry.device)
            .collect()
    }

    /// Copy of the currently visible devices. Entries past the timeout
    /// that the sweep has not removed yet are excluded.
    pub(crate) fn snapshot(&self) -> Vec<Device> {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        let mut devices: Vec<Device> = inner
            .devices
            .values()
            .filter(|entry| now - entry.last_seen <= DEVICE_TIMEOUT)
            .map(|entry| entry.device.clone())
            .collect();
        devices.sort_by_key(|d| d.device_num);
        devices
    }

    pub(crate) fn contains(&self, device_num: u8) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        match inner.devices.get(&device_num) {
            Some(entry) => now - entry.last_seen <= DEVICE_TIMEOUT,
            None => false,
        }
    }

    /// When the first announcement arrived, if any has.
    pub(crate) fn first_device_seen(&self) -> Option<Instant> {
        self.inner.lock().unwrap().first_seen
    }

    /// Forgets everything, so a restart observes the network afresh.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.devices.clear();
        inner.first_seen = None;
    }
}
