//! Power monitor polling.
//!
//! The monitor serves Prometheus-style text at the configured URL:
//!
//! ```text
//! # HELP port_power_w Output power per port
//! port_voltage_mv{port="1"} 20000
//! port_power_w{port="1"} 45.21
//! total_power_w 45.21
//! ```
//!
//! The response's `Date` header doubles as the clock source. Parsing and
//! the idle policy are pure; the firmware owns the HTTP transport.

use core::fmt::Write;

use heapless::String;

use crate::config::{IDLE_POWER_W, IDLE_REFRESHES, POWER_PORTS};
use crate::error::Error;
use crate::power::PowerSnapshot;
use crate::screen::{ClockTime, Screen};

/// One poll of the monitor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub power: PowerSnapshot,
    /// Server time from the `Date` header, when present and valid.
    pub unix_time: Option<u64>,
}

/// Something that can be polled for power readings.
#[allow(async_fn_in_trait)]
pub trait PowerSource {
    async fn fetch(&mut self) -> Result<Sample, Error>;
}

/// Where the monitor listens, split out of its URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

/// Split a plain `http://host[:port]/path` URL.
pub fn endpoint(url: &str) -> Option<Endpoint<'_>> {
    let rest = url.strip_prefix("http://")?;
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, "/"),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (authority, 80),
    };
    if host.is_empty() {
        return None;
    }
    Some(Endpoint { host, port, path })
}

/// Write the GET request for `ep` into `out`.
pub fn write_request<const N: usize>(ep: &Endpoint<'_>, out: &mut String<N>) -> Result<(), Error> {
    write!(
        out,
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nAccept: text/plain\r\n\r\n",
        ep.path, ep.host
    )
    .map_err(|_| Error::BufferOverflow)
}

/// Interpret a complete HTTP response. Anything but a readable 200 is a
/// data error; the `Date` header is used whenever present.
pub fn parse_response(raw: &[u8]) -> Sample {
    let mut sample = Sample {
        power: PowerSnapshot::unavailable(),
        unix_time: None,
    };
    let Ok(text) = core::str::from_utf8(raw) else {
        warn!("metrics: response is not UTF-8");
        return sample;
    };
    let Some((head, body)) = text.split_once("\r\n\r\n") else {
        warn!("metrics: truncated response");
        return sample;
    };

    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .and_then(|code| code.parse::<u16>().ok());
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("date") {
                sample.unix_time = parse_http_date(value);
            }
        }
    }

    match status {
        Some(200) => sample.power = parse_metrics(body),
        Some(code) => warn!("metrics: monitor answered {}", code),
        None => warn!("metrics: bad status line"),
    }
    sample
}

/// Parse a metrics body. Unknown series are skipped; a malformed known
/// series, or a body without any, is a data error.
pub fn parse_metrics(body: &str) -> PowerSnapshot {
    let mut snapshot = PowerSnapshot::unavailable();
    snapshot.data_error = false;
    let mut seen = false;
    let mut total = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((series, value)) = line.rsplit_once(|c: char| c.is_ascii_whitespace()) else {
            continue;
        };
        let (name, labels) = match series.trim_end().split_once('{') {
            Some((name, labels)) => (name, Some(labels)),
            None => (series.trim_end(), None),
        };

        match name {
            "port_voltage_mv" => {
                let (Some(port), Some(v)) = (labels.and_then(port_index), parse_finite(value)) else {
                    return rejected(name);
                };
                snapshot.ports[port].voltage_mv = v as i32;
                seen = true;
            }
            "port_power_w" => {
                let (Some(port), Some(v)) = (labels.and_then(port_index), parse_finite(value)) else {
                    return rejected(name);
                };
                snapshot.ports[port].power_w = v;
                seen = true;
            }
            "total_power_w" => {
                let Some(v) = parse_finite(value) else {
                    return rejected(name);
                };
                total = Some(v);
                seen = true;
            }
            _ => {}
        }
    }

    if !seen {
        warn!("metrics: no power series in response");
        return PowerSnapshot::unavailable();
    }
    snapshot.total_w = total.unwrap_or_else(|| snapshot.ports.iter().map(|p| p.power_w).sum());
    snapshot
}

fn rejected(series: &str) -> PowerSnapshot {
    warn!("metrics: malformed {} sample", series);
    PowerSnapshot::unavailable()
}

fn parse_finite(value: &str) -> Option<f32> {
    value.parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Zero-based port index from a label set such as `port="3"}`.
fn port_index(labels: &str) -> Option<usize> {
    let labels = labels.strip_suffix('}')?;
    let number = labels.split(',').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == "port").then(|| value.trim().trim_matches('"'))
    })?;
    match number.parse::<usize>() {
        Ok(n @ 1..=POWER_PORTS) => Some(n - 1),
        _ => None,
    }
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Unix seconds from an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn parse_http_date(value: &str) -> Option<u64> {
    let (_weekday, rest) = value.trim().split_once(", ")?;
    let mut fields = rest.split(' ');
    let day = fields.next()?.parse().ok()?;
    let month_name = fields.next()?;
    let month = MONTHS.iter().position(|m| *m == month_name)? as u8 + 1;
    let year = fields.next()?.parse().ok()?;
    let mut hms = fields.next()?.split(':');
    let hour = hms.next()?.parse().ok()?;
    let minute = hms.next()?.parse().ok()?;
    let second = hms.next()?.parse().ok()?;
    if fields.next()? != "GMT" || fields.next().is_some() || hms.next().is_some() {
        return None;
    }

    ClockTime {
        year,
        month,
        day,
        hour,
        minute,
        second,
    }
    .to_unix()
}

/// Wall clock anchored to the last server time seen.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock {
    anchor: Option<(u64, u64)>,
}

impl WallClock {
    pub const fn new() -> Self {
        Self { anchor: None }
    }

    /// Re-anchor to `unix` seconds at monotonic time `now_ms`.
    pub fn sync(&mut self, unix: u64, now_ms: u64) {
        self.anchor = Some((unix, now_ms));
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    /// Current time, or `None` before the first sync.
    pub fn now(&self, now_ms: u64) -> Option<ClockTime> {
        let (unix, at_ms) = self.anchor?;
        let elapsed = now_ms.saturating_sub(at_ms) / 1000;
        Some(ClockTime::from_unix(unix + elapsed))
    }
}

/// Whether the monitored charger is idle.
pub fn is_idle(snapshot: &PowerSnapshot, idle_power_w: f32) -> bool {
    !snapshot.data_error && snapshot.total_w <= idle_power_w
}

/// Chooses the home screen from successive power snapshots: the power
/// readout while anything draws power, the dimmed clock once the charger
/// has been idle for a while.
#[derive(Clone, Copy, Debug)]
pub struct HomeSelector {
    idle_refreshes: u32,
    idle_streak: u32,
}

impl HomeSelector {
    pub const fn new() -> Self {
        Self::with_idle_refreshes(IDLE_REFRESHES)
    }

    pub const fn with_idle_refreshes(idle_refreshes: u32) -> Self {
        Self {
            idle_refreshes,
            idle_streak: 0,
        }
    }

    /// Feed one snapshot and get the screen to show.
    pub fn observe(&mut self, snapshot: &PowerSnapshot) -> Screen {
        if is_idle(snapshot, IDLE_POWER_W) {
            self.idle_streak = self.idle_streak.saturating_add(1);
        } else {
            self.idle_streak = 0;
        }
        self.current()
    }

    pub fn current(&self) -> Screen {
        if self.idle_streak >= self.idle_refreshes {
            Screen::Clock
        } else {
            Screen::PowerMonitor
        }
    }
}

impl Default for HomeSelector {
    fn default() -> Self {
        Self::new()
    }
}
