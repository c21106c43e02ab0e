//! Persistent settings.
//!
//! [`KvStore`] is the typed key/value interface over whatever persists the
//! values (flash on target, memory in tests). [`Settings`] is the facade
//! the rest of the firmware uses: it applies defaults, normalises stored
//! values at startup, and owns the monitor-URL canonical form.

use core::fmt::Write;

use heapless::{LinearMap, String};

use crate::config::{
    DEFAULT_MONITOR_URL, DEFAULT_ROTATION_DEG, MONITOR_URL_PREFIX, MONITOR_URL_SUFFIX, PASSWORD_MAX, SSID_MAX,
    URL_MAX,
};
use crate::error::Error;

/// Stored setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Key {
    Ssid,
    Password,
    RgbEnabled,
    MonitorUrl,
    ScreenRotation,
}

impl Key {
    pub const ALL: [Key; 5] = [
        Key::Ssid,
        Key::Password,
        Key::RgbEnabled,
        Key::MonitorUrl,
        Key::ScreenRotation,
    ];

    /// Name used in forms and status output.
    pub const fn name(self) -> &'static str {
        match self {
            Key::Ssid => "ssid",
            Key::Password => "password",
            Key::RgbEnabled => "rgb_enabled",
            Key::MonitorUrl => "monitor_url",
            Key::ScreenRotation => "screen_rotation",
        }
    }

    /// Stable on-flash identifier.
    pub const fn id(self) -> u8 {
        match self {
            Key::Ssid => 1,
            Key::Password => 2,
            Key::RgbEnabled => 3,
            Key::MonitorUrl => 4,
            Key::ScreenRotation => 5,
        }
    }

    pub fn from_id(id: u8) -> Option<Key> {
        Key::ALL.into_iter().find(|k| k.id() == id)
    }

    const fn bit(self) -> u8 {
        1 << self.id()
    }
}

/// Largest string value any key holds.
pub const VALUE_STR_MAX: usize = URL_MAX;

/// A stored value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Str(String<VALUE_STR_MAX>),
    Int(i32),
    Bool(bool),
}

/// Typed key/value store. Missing keys read as `None`; [`Settings`]
/// supplies the defaults.
pub trait KvStore {
    fn get_str(&self, key: Key) -> Option<&str>;
    fn put_str(&mut self, key: Key, value: &str) -> Result<(), Error>;
    fn get_int(&self, key: Key) -> Option<i32>;
    fn put_int(&mut self, key: Key, value: i32) -> Result<(), Error>;
    fn get_bool(&self, key: Key) -> Option<bool>;
    fn put_bool(&mut self, key: Key, value: bool) -> Result<(), Error>;
    /// Remove every key.
    fn clear(&mut self) -> Result<(), Error>;
}

/// In-memory store. Also the cache behind the flash-backed store, hence
/// the change tracking.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: LinearMap<Key, Value, 5>,
    /// Bit per key id written since the last [`take_changes`](Self::take_changes).
    changed: u8,
    /// Set by [`KvStore::clear`]; the backing store must be wiped.
    cleared: bool,
}

/// What changed in a [`MemoryStore`] since it was last persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    pub cleared: bool,
    keys: u8,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.keys == 0
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys & key.bit() != 0
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value without marking it changed (used when loading).
    pub fn restore(&mut self, key: Key, value: Value) -> Result<(), Error> {
        self.entries.insert(key, value).map_err(|_| Error::StoreFull)?;
        Ok(())
    }

    pub fn get(&self, key: Key) -> Option<&Value> {
        self.entries.get(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        self.cleared || self.changed != 0
    }

    /// Return and reset the pending change set.
    pub fn take_changes(&mut self) -> Changes {
        let changes = Changes {
            cleared: self.cleared,
            keys: self.changed,
        };
        self.cleared = false;
        self.changed = 0;
        changes
    }

    /// Put a change set taken with [`take_changes`](Self::take_changes)
    /// back, merged with anything written since.
    pub fn requeue(&mut self, changes: Changes) {
        self.cleared |= changes.cleared;
        self.changed |= changes.keys;
    }

    fn put(&mut self, key: Key, value: Value) -> Result<(), Error> {
        self.entries.insert(key, value).map_err(|_| Error::StoreFull)?;
        self.changed |= key.bit();
        Ok(())
    }
}

impl KvStore for MemoryStore {
    fn get_str(&self, key: Key) -> Option<&str> {
        match self.entries.get(&key)? {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn put_str(&mut self, key: Key, value: &str) -> Result<(), Error> {
        let mut s = String::new();
        s.push_str(value).map_err(|_| Error::BufferOverflow)?;
        self.put(key, Value::Str(s))
    }

    fn get_int(&self, key: Key) -> Option<i32> {
        match self.entries.get(&key)? {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn put_int(&mut self, key: Key, value: i32) -> Result<(), Error> {
        self.put(key, Value::Int(value))
    }

    fn get_bool(&self, key: Key) -> Option<bool> {
        match self.entries.get(&key)? {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn put_bool(&mut self, key: Key, value: bool) -> Result<(), Error> {
        self.put(key, Value::Bool(value))
    }

    fn clear(&mut self) -> Result<(), Error> {
        self.entries.clear();
        self.changed = 0;
        self.cleared = true;
        Ok(())
    }
}

/// Panel rotation in degrees, one of 0, 90, 180, 270.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rotation(u16);

impl Rotation {
    pub const DEFAULT: Rotation = Rotation(DEFAULT_ROTATION_DEG);

    pub const fn degrees(self) -> u16 {
        self.0
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i32> for Rotation {
    type Error = Error;

    fn try_from(degrees: i32) -> Result<Self, Error> {
        match degrees {
            0 | 90 | 180 | 270 => Ok(Rotation(degrees as u16)),
            other => Err(Error::InvalidRotation(other)),
        }
    }
}

/// Saved station credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String<SSID_MAX>,
    pub password: String<PASSWORD_MAX>,
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, Error> {
        let mut c = Self {
            ssid: String::new(),
            password: String::new(),
        };
        c.ssid.push_str(ssid).map_err(|_| Error::BufferOverflow)?;
        c.password.push_str(password).map_err(|_| Error::BufferOverflow)?;
        Ok(c)
    }
}

/// Canonical monitor URL for a host: `http://<host>/metrics`.
pub fn monitor_url_for(host: &str) -> Result<String<URL_MAX>, Error> {
    let mut url = String::new();
    write!(url, "{}{}{}", MONITOR_URL_PREFIX, host, MONITOR_URL_SUFFIX).map_err(|_| Error::BufferOverflow)?;
    Ok(url)
}

/// Host part of a URL: the text between `://` and the next `/`. A string
/// without a scheme is returned whole.
pub fn host_from_url(url: &str) -> &str {
    match url.find("://") {
        Some(pos) => {
            let rest = &url[pos + 3..];
            match rest.find('/') {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => url,
    }
}

/// Settings facade over a [`KvStore`].
pub struct Settings<S: KvStore> {
    store: S,
}

impl<S: KvStore> Settings<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Startup normalisation: a missing monitor URL gets the default, an
    /// invalid stored rotation is replaced by the default.
    pub fn begin(&mut self) -> Result<(), Error> {
        if self.store.get_str(Key::MonitorUrl).map_or(true, str::is_empty) {
            info!("no monitor URL stored, using default");
            self.store.put_str(Key::MonitorUrl, DEFAULT_MONITOR_URL)?;
        }
        if let Some(deg) = self.store.get_int(Key::ScreenRotation) {
            if Rotation::try_from(deg).is_err() {
                warn!("stored rotation {} invalid, resetting", deg);
                self.store
                    .put_int(Key::ScreenRotation, Rotation::DEFAULT.degrees() as i32)?;
            }
        }
        Ok(())
    }

    /// A device is configured once an SSID is stored.
    pub fn is_configured(&self) -> bool {
        self.ssid().map_or(false, |s| !s.is_empty())
    }

    pub fn ssid(&self) -> Option<&str> {
        self.store.get_str(Key::Ssid)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        let ssid = self.ssid().filter(|s| !s.is_empty())?;
        let password = self.store.get_str(Key::Password).unwrap_or("");
        Credentials::new(ssid, password).ok()
    }

    pub fn save_credentials(&mut self, ssid: &str, password: &str) -> Result<(), Error> {
        if ssid.len() > SSID_MAX || password.len() > PASSWORD_MAX {
            return Err(Error::BufferOverflow);
        }
        self.store.put_str(Key::Ssid, ssid)?;
        self.store.put_str(Key::Password, password)
    }

    pub fn monitor_url(&self) -> &str {
        self.store
            .get_str(Key::MonitorUrl)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_MONITOR_URL)
    }

    /// Host of the stored monitor URL.
    pub fn monitor_host(&self) -> &str {
        host_from_url(self.monitor_url())
    }

    /// Store the canonical URL for `host`. Returns whether anything
    /// changed; the same host is not written again.
    pub fn set_monitor_host(&mut self, host: &str) -> Result<bool, Error> {
        if host.is_empty() || host == self.monitor_host() {
            return Ok(false);
        }
        let url = monitor_url_for(host)?;
        self.store.put_str(Key::MonitorUrl, &url)?;
        Ok(true)
    }

    /// Stored rotation, or the default when missing or invalid.
    pub fn rotation(&self) -> Rotation {
        self.store
            .get_int(Key::ScreenRotation)
            .and_then(|deg| Rotation::try_from(deg).ok())
            .unwrap_or_default()
    }

    pub fn set_rotation(&mut self, rotation: Rotation) -> Result<(), Error> {
        self.store.put_int(Key::ScreenRotation, rotation.degrees() as i32)
    }

    pub fn rgb_enabled(&self) -> bool {
        self.store.get_bool(Key::RgbEnabled).unwrap_or(false)
    }

    pub fn set_rgb_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        self.store.put_bool(Key::RgbEnabled, enabled)
    }

    /// Factory reset: wipe everything, then restore the default monitor URL.
    pub fn reset(&mut self) -> Result<(), Error> {
        warn!("factory reset");
        self.store.clear()?;
        self.store.put_str(Key::MonitorUrl, DEFAULT_MONITOR_URL)
    }
}
