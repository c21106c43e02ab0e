//! Flash persistence for the settings store.
//!
//! Each [`Key`] is one item in a `sequential-storage` map keyed by
//! [`Key::id`]; the flash pages are managed by `sequential-storage`, which
//! handles wear levelling and GC. The [`MemoryStore`] is the cache: reads
//! never touch flash, writes are flushed by [`FlashStore::persist`].
//!
//! Item layout: `[tag][payload...]`
//!   - `0` string: UTF-8 bytes
//!   - `1` int:    4 bytes little-endian
//!   - `2` bool:   1 byte

use core::ops::Range;

use embedded_storage_async::nor_flash::NorFlash;
use heapless::String;
use sequential_storage::cache::NoCache;

use crate::config::{STORAGE_FLASH_PAGE_COUNT, STORAGE_FLASH_PAGE_START};
use crate::error::Error;
use crate::settings::{Changes, Key, MemoryStore, Value, VALUE_STR_MAX};

/// Flash page size (4 KB).
const FLASH_PAGE_SIZE: u32 = 4096;

/// Start address of our storage region.
const STORAGE_START: u32 = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;

/// End address (exclusive) of our storage region.
const STORAGE_END: u32 = (STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Largest encoded item plus `sequential-storage` bookkeeping.
const MAX_ITEM_SIZE: usize = 128;

const TAG_STR: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_BOOL: u8 = 2;

/// Encode a value into `buf`, returning the used length.
pub fn encode_value(value: &Value, buf: &mut [u8]) -> Result<usize, Error> {
    let len = match value {
        Value::Str(s) => 1 + s.len(),
        Value::Int(_) => 5,
        Value::Bool(_) => 2,
    };
    if buf.len() < len {
        return Err(Error::BufferOverflow);
    }
    match value {
        Value::Str(s) => {
            buf[0] = TAG_STR;
            buf[1..len].copy_from_slice(s.as_bytes());
        }
        Value::Int(v) => {
            buf[0] = TAG_INT;
            buf[1..5].copy_from_slice(&v.to_le_bytes());
        }
        Value::Bool(v) => {
            buf[0] = TAG_BOOL;
            buf[1] = *v as u8;
        }
    }
    Ok(len)
}

/// Decode an item; `None` for anything malformed.
pub fn decode_value(data: &[u8]) -> Option<Value> {
    let (&tag, payload) = data.split_first()?;
    match tag {
        TAG_STR => {
            let mut s: String<VALUE_STR_MAX> = String::new();
            s.push_str(core::str::from_utf8(payload).ok()?).ok()?;
            Some(Value::Str(s))
        }
        TAG_INT => Some(Value::Int(i32::from_le_bytes(payload.try_into().ok()?))),
        TAG_BOOL => match payload {
            [0] => Some(Value::Bool(false)),
            [1] => Some(Value::Bool(true)),
            _ => None,
        },
        _ => None,
    }
}

/// Settings items in a region of NOR flash.
pub struct FlashStore<F> {
    flash: F,
    range: Range<u32>,
}

impl<F: NorFlash> FlashStore<F> {
    /// Use the region reserved in [`crate::config`].
    pub fn new(flash: F) -> Self {
        Self::with_range(flash, STORAGE_START..STORAGE_END)
    }

    pub fn with_range(flash: F, range: Range<u32>) -> Self {
        Self { flash, range }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Read every key into a fresh cache. Unreadable or malformed items are
    /// skipped, so a damaged store degrades to defaults.
    pub async fn load(&mut self) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut buf = [0u8; MAX_ITEM_SIZE];

        for key in Key::ALL {
            let item = sequential_storage::map::fetch_item::<u8, &[u8], _>(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut buf,
                &key.id(),
            )
            .await;

            match item {
                Ok(Some(data)) => match decode_value(data) {
                    Some(value) => {
                        let _ = store.restore(key, value);
                    }
                    None => warn!("malformed {:?} item in flash, ignoring", key),
                },
                Ok(None) => debug!("{:?} not stored", key),
                Err(_) => error!("flash read error on {:?}", key),
            }
        }

        info!("loaded {} settings from flash", store.len());
        store
    }

    /// Write pending changes. A cleared cache erases the region first and
    /// then rewrites whatever the cache still holds. On failure the change
    /// set stays pending, so the next call writes it again in full.
    pub async fn persist(&mut self, store: &mut MemoryStore) -> Result<(), Error> {
        if !store.has_changes() {
            debug!("settings: no changes to save");
            return Ok(());
        }
        let changes = store.take_changes();
        if let Err(e) = self.write_changes(store, changes).await {
            store.requeue(changes);
            return Err(e);
        }

        info!("settings saved to flash");
        Ok(())
    }

    async fn write_changes(&mut self, store: &MemoryStore, changes: Changes) -> Result<(), Error> {
        if changes.cleared {
            sequential_storage::erase_all(&mut self.flash, self.range.clone())
                .await
                .map_err(|_| {
                    error!("flash erase failed");
                    Error::Storage
                })?;
            info!("settings region erased");
        }

        let mut buf = [0u8; MAX_ITEM_SIZE];
        let mut item_buf = [0u8; MAX_ITEM_SIZE];
        for key in Key::ALL {
            if !(changes.cleared || changes.contains(key)) {
                continue;
            }
            let Some(value) = store.get(key) else {
                continue;
            };
            let len = encode_value(value, &mut item_buf)?;
            let item = &item_buf[..len];

            sequential_storage::map::store_item::<u8, &[u8], _>(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut buf,
                &key.id(),
                &item,
            )
            .await
            .map_err(|_| {
                error!("flash write error on {:?}", key);
                Error::Storage
            })?;
        }
        Ok(())
    }
}
