//! Application-wide constants and compile-time configuration.
//!
//! Timing parameters, panel geometry, portal defaults and storage layout
//! live here so they can be tuned in one place. Runtime settings (WiFi
//! credentials, rotation, ...) are in [`crate::settings`].

// Link supervision

/// Period of the link sampling tick (ms).
pub const LINK_TICK_MS: u64 = 200;

/// Consecutive same-direction samples required before a link change is
/// trusted. 3 samples at 200 ms ≈ 600 ms of settling.
pub const LINK_DEBOUNCE_THRESHOLD: u8 = 3;

/// Pause between dropping and re-issuing the station connection (ms).
pub const RECONNECT_PAUSE_MS: u64 = 100;

/// Ticks before the first repeated reconnect while still disconnected
/// (50 ticks = 10 s).
pub const RECONNECT_RETRY_TICKS: u32 = 50;

/// Upper bound for the doubling retry interval (1500 ticks = 5 min).
pub const RECONNECT_RETRY_MAX_TICKS: u32 = 1500;

// Rendering

/// Render pump period (ms) - drives widget animations and panel flushes.
pub const RENDER_PUMP_MS: u64 = 10;

/// Period of the power / clock refresh (ms).
pub const UI_REFRESH_MS: u64 = 1000;

/// Consecutive idle refreshes before the home screen drops to the clock.
pub const IDLE_REFRESHES: u32 = 10;

/// Total power (W) at or below which the monitored charger counts as idle.
pub const IDLE_POWER_W: f32 = 0.5;

/// Panel geometry (ST7789, 172x320 visible area).
pub const PANEL_LONG_SIDE: u16 = 320;
pub const PANEL_SHORT_SIDE: u16 = 172;

/// Maximum number of live widgets in the scene (all five screens built).
pub const SCENE_CAPACITY: usize = 64;

/// Backlight duty cycle per brightness level (percent).
pub const BRIGHTNESS_DIM_PCT: u8 = 20;
pub const BRIGHTNESS_NORMAL_PCT: u8 = 100;

// Power monitor

/// Number of monitored output ports.
pub const POWER_PORTS: usize = 5;

/// Full-scale value of a single port bar (W).
pub const PORT_FULL_SCALE_W: f32 = 100.0;

/// Full-scale value of the total-power arc (W).
pub const TOTAL_FULL_SCALE_W: f32 = 160.0;

// Captive portal

/// SSID of the configuration access point.
pub const AP_SSID: &str = "ESP32_Config";

/// Static address of the access-point interface.
pub const AP_ADDRESS: [u8; 4] = [192, 168, 4, 1];
pub const AP_ADDRESS_STR: &str = "192.168.4.1";

/// TCP port of the configuration web server.
pub const PORTAL_PORT: u16 = 80;

/// Largest request (headers + form body) the portal accepts.
pub const PORTAL_REQUEST_MAX: usize = 1024;

/// First host octet handed out by the AP's DHCP server.
pub const DHCP_POOL_FIRST_HOST: u8 = 2;

/// Concurrent DHCP leases; the oldest is recycled when full.
pub const DHCP_MAX_LEASES: usize = 8;

/// Lease time announced to AP clients (s).
pub const DHCP_LEASE_SECS: u32 = 7200;

/// TTL of captive DNS answers (s).
pub const DNS_TTL_SECS: u32 = 60;

/// Delay between sending the final response and restarting (ms),
/// lets the TCP stack flush the page to the client.
pub const RESTART_FLUSH_MS: u64 = 1000;

/// Monitor endpoint used until the user configures one.
pub const DEFAULT_MONITOR_URL: &str = "http://192.168.32.2/metrics";
pub const MONITOR_URL_PREFIX: &str = "http://";
pub const MONITOR_URL_SUFFIX: &str = "/metrics";

// Persistent settings

/// String capacities for stored values.
pub const SSID_MAX: usize = 32;
pub const PASSWORD_MAX: usize = 64;
pub const URL_MAX: usize = 96;

/// Screen rotation applied when none (or an invalid one) is stored.
pub const DEFAULT_ROTATION_DEG: u16 = 90;

/// Flash page index where the settings store starts (4 KB pages).
/// 0x3F0000 - the last 64 KB of the 4 MB flash, outside the app partitions.
pub const STORAGE_FLASH_PAGE_START: u32 = 1008;

/// Number of flash pages reserved for the settings store.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;

/// Bounded wait for the settings store at boot before continuing
/// unconfigured (ms).
pub const STORAGE_LOAD_TIMEOUT_MS: u64 = 2000;

// Power monitor polling

/// Largest monitor response (headers + body) read per refresh.
pub const METRICS_RESPONSE_MAX: usize = 2048;

/// Give up on a monitor request after this long (ms); the refresh then
/// reports a data error.
pub const METRICS_TIMEOUT_MS: u64 = 800;
