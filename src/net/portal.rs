//! HTTP server for the configuration portal.
//!
//! One instance per interface: reachable at 192.168.4.1 on the setup
//! network and at the DHCP address once the station is up. Requests are
//! routed and persisted by [`powerview::portal::handle_persisted`]; this
//! task only moves bytes and applies the returned effects.

use core::fmt::Write as _;

use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Timer};
use esp_storage::FlashStorage;
use heapless::String;
use log::{debug, info, warn};
use powerview::config::{
    AP_ADDRESS_STR, AP_SSID, PORTAL_PORT, PORTAL_REQUEST_MAX, RESTART_FLUSH_MS, SSID_MAX,
};
use powerview::portal::{self, Effects, LinkStatus, Request};
use powerview::storage::FlashStore;
use powerview::{Error, MemoryStore, Settings};

use crate::Screens;

/// Seconds a client may stall mid-request.
const SOCKET_TIMEOUT_SECS: u64 = 10;

pub type Flash = BlockingAsync<FlashStorage<'static>>;

/// Settings cache plus the flash it is persisted to.
pub struct SettingsStore {
    pub settings: Settings<MemoryStore>,
    pub flash: FlashStore<Flash>,
}

impl SettingsStore {
    /// Write pending changes to flash.
    pub async fn save(&mut self) -> Result<(), Error> {
        self.flash.persist(self.settings.store_mut()).await
    }
}

pub type SharedSettings = Mutex<CriticalSectionRawMutex, SettingsStore>;

#[embassy_executor::task(pool_size = 2)]
pub async fn portal_task(
    stack: Stack<'static>,
    station: Stack<'static>,
    screens: &'static Screens,
    store: &'static SharedSettings,
) {
    let mut rx_buf = [0u8; PORTAL_REQUEST_MAX];
    let mut tx_buf = [0u8; 2048];
    let mut request = [0u8; PORTAL_REQUEST_MAX];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));

        if let Err(e) = socket.accept(PORTAL_PORT).await {
            warn!("portal: accept failed: {:?}", e);
            continue;
        }

        let effects = match serve(&mut socket, &mut request, station, store).await {
            Ok(effects) => effects,
            Err(e) => {
                debug!("portal: connection dropped: {:?}", e);
                Effects::default()
            }
        };
        socket.close();
        let _ = socket.flush().await;
        drop(socket);

        apply(effects, screens).await;
    }
}

/// Read one request, route it and write the reply.
async fn serve(
    socket: &mut TcpSocket<'_>,
    buf: &mut [u8; PORTAL_REQUEST_MAX],
    station: Stack<'static>,
    store: &SharedSettings,
) -> Result<Effects, Error> {
    let mut len = 0;
    loop {
        let n = socket.read(&mut buf[len..]).await.map_err(|_| Error::Network)?;
        if n == 0 {
            break;
        }
        len += n;
        match portal::expected_len(&buf[..len]) {
            Some(total) if len >= total => break,
            _ if len == buf.len() => return Err(Error::BufferOverflow),
            _ => {}
        }
    }
    let request = Request::parse(&buf[..len])?;
    debug!("portal: {:?} {}", request.method, request.path);

    let mut ip: String<16> = String::new();
    if let Some(config) = station.config_v4() {
        let _ = write!(ip, "{}", config.address.address());
    }

    let outcome = {
        let mut store = store.lock().await;
        let ssid: String<SSID_MAX> = store
            .settings
            .ssid()
            .and_then(|s| String::try_from(s).ok())
            .unwrap_or_default();
        let link = LinkStatus {
            connected: crate::net::link_up(),
            ssid: &ssid,
            ip: &ip,
        };
        let SettingsStore { settings, flash } = &mut *store;
        portal::handle_persisted(settings, flash, &request, &link).await
    };

    let head = outcome.reply.head()?;
    write_all(socket, head.as_bytes()).await?;
    write_all(socket, outcome.reply.body().as_bytes()).await?;
    socket.flush().await.map_err(|_| Error::Network)?;
    Ok(outcome.effects)
}

async fn write_all(socket: &mut TcpSocket<'_>, mut data: &[u8]) -> Result<(), Error> {
    while !data.is_empty() {
        let n = socket.write(data).await.map_err(|_| Error::Network)?;
        if n == 0 {
            return Err(Error::Network);
        }
        data = &data[n..];
    }
    Ok(())
}

/// Apply what the handler asked for, after the reply has gone out.
async fn apply(effects: Effects, screens: &Screens) {
    if let Some(on) = effects.lamp {
        crate::ui::set_lamp(on);
    }
    if let Some(configured) = effects.configured {
        if let Err(e) = screens
            .sync_setup_screen(configured, AP_SSID, AP_ADDRESS_STR)
            .await
        {
            warn!("portal: setup screen update failed: {:?}", e);
        }
    }
    if effects.disconnect {
        crate::net::request_disconnect();
    }
    if effects.restart {
        info!("restarting in {} ms", RESTART_FLUSH_MS);
        Timer::after(Duration::from_millis(RESTART_FLUSH_MS)).await;
        esp_hal::system::software_reset();
    }
}
