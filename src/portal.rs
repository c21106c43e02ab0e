//! Captive-portal request handling.
//!
//! Transport-free: the firmware's HTTP task reads a request into a buffer,
//! calls [`handle`], writes the [`Reply`] back and then applies the
//! [`Effects`] (lamp, display, restart). Keeping the socket out of here
//! lets the routing rules run in host tests.
//!
//! | Route                  | Result                                          |
//! |------------------------|-------------------------------------------------|
//! | `GET /`                | configuration page                              |
//! | `POST /save`           | store credentials / monitor host, maybe restart |
//! | `GET /status`          | JSON status                                     |
//! | `POST /rgb`            | toggle the status lamp                          |
//! | `POST /screen_rotation`| store rotation, restart when it changed         |
//! | `POST /reset`          | factory reset and restart                       |
//! | anything else          | `302` to `/`                                    |

use core::fmt::Write;

use embedded_storage_async::nor_flash::NorFlash;
use heapless::String;

use crate::config::{PASSWORD_MAX, SSID_MAX, URL_MAX};
use crate::error::Error;
use crate::settings::{host_from_url, KvStore, MemoryStore, Rotation, Settings};
use crate::storage::FlashStore;

/// Capacity of the `/status` JSON body.
pub const STATUS_JSON_MAX: usize = 192;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    Get,
    Post,
    Other,
}

/// A parsed HTTP/1.x request borrowing from the receive buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: &'a str,
    pub body: &'a str,
}

impl<'a> Request<'a> {
    /// Parse a complete request (headers and, if announced, the body).
    pub fn parse(raw: &'a [u8]) -> Result<Self, Error> {
        let text = core::str::from_utf8(raw).map_err(|_| Error::BadRequest)?;
        let (head, rest) = text.split_once("\r\n\r\n").ok_or(Error::BadRequest)?;

        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().ok_or(Error::BadRequest)?.split(' ');
        let method = match request_line.next() {
            Some("GET") => Method::Get,
            Some("POST") => Method::Post,
            Some(_) => Method::Other,
            None => return Err(Error::BadRequest),
        };
        let target = request_line.next().ok_or(Error::BadRequest)?;
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        let length = content_length(lines).unwrap_or(0);
        let body = rest.get(..length).unwrap_or(rest);

        Ok(Self {
            method,
            path,
            query,
            body,
        })
    }

    /// Form argument from the body or, failing that, the query string.
    /// Percent-escapes and `+` are decoded.
    pub fn arg<const N: usize>(&self, name: &str) -> Result<Option<String<N>>, Error> {
        match form_value(self.body, name)? {
            Some(value) => Ok(Some(value)),
            None => form_value(self.query, name),
        }
    }
}

/// Total byte length of the request in `raw` once its headers are
/// complete, so the reader knows how much body is still to come.
pub fn expected_len(raw: &[u8]) -> Option<usize> {
    let end = raw.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = core::str::from_utf8(&raw[..end]).ok()?;
    let length = content_length(head.split("\r\n").skip(1)).unwrap_or(0);
    Some(end + length)
}

fn content_length<'a>(mut headers: impl Iterator<Item = &'a str>) -> Option<usize> {
    headers.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Decode `name` from an `application/x-www-form-urlencoded` string.
///
/// `Ok(None)` when the field is absent. A value longer than `N` bytes is
/// [`Error::BufferOverflow`], one that does not decode to UTF-8 is
/// [`Error::BadRequest`].
pub fn form_value<const N: usize>(encoded: &str, name: &str) -> Result<Option<String<N>>, Error> {
    let Some(raw) = encoded.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == name).then_some(v)
    }) else {
        return Ok(None);
    };

    let bytes = raw.as_bytes();
    let mut i = 0;
    let mut decoded: heapless::Vec<u8, N> = heapless::Vec::new();
    while i < bytes.len() {
        let b = match bytes[i] {
            b'+' => b' ',
            b'%' if i + 2 < bytes.len() => {
                match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        i += 2;
                        hi << 4 | lo
                    }
                    _ => b'%',
                }
            }
            other => other,
        };
        decoded.push(b).map_err(|_| Error::BufferOverflow)?;
        i += 1;
    }
    let text = core::str::from_utf8(&decoded).map_err(|_| Error::BadRequest)?;
    let mut out: String<N> = String::new();
    out.push_str(text).map_err(|_| Error::BufferOverflow)?;
    Ok(Some(out))
}

fn hex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    Found,
    BadRequest,
    InternalError,
}

impl Status {
    pub const fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Found => 302,
            Status::BadRequest => 400,
            Status::InternalError => 500,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Found => "Found",
            Status::BadRequest => "Bad Request",
            Status::InternalError => "Internal Server Error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Static(&'static str),
    Json(String<STATUS_JSON_MAX>),
}

/// Response to send back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub content_type: &'static str,
    pub location: Option<&'static str>,
    pub body: Body,
}

impl Reply {
    fn text(status: Status, body: &'static str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            location: None,
            body: Body::Static(body),
        }
    }

    fn html(body: &'static str) -> Self {
        Self {
            status: Status::Ok,
            content_type: "text/html",
            location: None,
            body: Body::Static(body),
        }
    }

    fn redirect_home() -> Self {
        Self {
            status: Status::Found,
            content_type: "text/plain",
            location: Some("/"),
            body: Body::Static(""),
        }
    }

    pub fn body(&self) -> &str {
        match &self.body {
            Body::Static(s) => s,
            Body::Json(s) => s.as_str(),
        }
    }

    /// Status line and headers, including the blank line.
    pub fn head(&self) -> Result<String<192>, Error> {
        let mut head = String::new();
        write!(
            head,
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status.code(),
            self.status.reason(),
            self.content_type,
            self.body().len()
        )
        .map_err(|_| Error::BufferOverflow)?;
        if let Some(location) = self.location {
            write!(head, "Location: {}\r\n", location).map_err(|_| Error::BufferOverflow)?;
        }
        head.push_str("\r\n").map_err(|_| Error::BufferOverflow)?;
        Ok(head)
    }
}

/// Side effects the caller applies after the reply is sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    /// Restart after the flush delay.
    pub restart: bool,
    /// Switch the status lamp.
    pub lamp: Option<bool>,
    /// New configured state, for the setup screen.
    pub configured: Option<bool>,
    /// Drop the station association.
    pub disconnect: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub reply: Reply,
    pub effects: Effects,
}

impl Outcome {
    fn reply(reply: Reply) -> Self {
        Self {
            reply,
            effects: Effects::default(),
        }
    }
}

/// Live link details for `/status`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStatus<'a> {
    pub connected: bool,
    pub ssid: &'a str,
    pub ip: &'a str,
}

/// Route one request and write whatever it changed to flash. When the
/// write fails the client gets a 500 and no effects are applied, so a
/// save is never followed by a restart that would lose it.
pub async fn handle_persisted<F: NorFlash>(
    settings: &mut Settings<MemoryStore>,
    flash: &mut FlashStore<F>,
    req: &Request<'_>,
    link: &LinkStatus<'_>,
) -> Outcome {
    let outcome = handle(settings, req, link);
    match flash.persist(settings.store_mut()).await {
        Ok(()) => outcome,
        Err(e) => {
            error!("portal {}: saving settings failed: {:?}", req.path, e);
            Outcome::reply(Reply::text(Status::InternalError, "Storage error"))
        }
    }
}

/// Route one request.
pub fn handle<S: KvStore>(settings: &mut Settings<S>, req: &Request<'_>, link: &LinkStatus<'_>) -> Outcome {
    let result = match (req.method, req.path) {
        (Method::Get, "/") => Ok(Outcome::reply(Reply::html(CONFIG_PAGE))),
        (Method::Post, "/save") => save(settings, req),
        (Method::Get, "/status") => status(settings, link).map(Outcome::reply),
        (Method::Post, "/rgb") => rgb(settings, req),
        (Method::Post, "/screen_rotation") => screen_rotation(settings, req),
        (Method::Post, "/reset") => reset(settings),
        _ => Ok(Outcome::reply(Reply::redirect_home())),
    };

    result.unwrap_or_else(|e| {
        error!("portal {} failed: {:?}", req.path, e);
        Outcome::reply(Reply::text(Status::InternalError, "Storage error"))
    })
}

/// Plain-text 400 with no side effects.
fn rejected(reason: &'static str) -> Outcome {
    Outcome::reply(Reply::text(Status::BadRequest, reason))
}

fn save<S: KvStore>(settings: &mut Settings<S>, req: &Request<'_>) -> Result<Outcome, Error> {
    let mut effects = Effects::default();

    // Validate every field before anything is stored
    let ssid: Option<String<SSID_MAX>> = match req.arg("ssid") {
        Ok(ssid) => ssid,
        Err(Error::BufferOverflow) => return Ok(rejected("SSID too long")),
        Err(_) => return Ok(rejected("Invalid SSID")),
    };
    let Ok(password) = req.arg::<PASSWORD_MAX>("password") else {
        return Ok(rejected("Invalid password"));
    };
    let Ok(monitor) = req.arg::<URL_MAX>("monitor_url") else {
        return Ok(rejected("Invalid monitor address"));
    };

    if let Some(ssid) = ssid.filter(|s| !s.is_empty()) {
        let password = password.unwrap_or_default();
        settings.save_credentials(&ssid, &password)?;
        info!("saved network {}", ssid.as_str());
        effects.restart = true;
        effects.configured = Some(true);
    }

    if let Some(monitor) = monitor.filter(|m| !m.is_empty()) {
        if settings.set_monitor_host(host_from_url(&monitor))? {
            info!("monitor URL now {}", settings.monitor_url());
            effects.restart = true;
        }
    }

    if effects.restart {
        Ok(Outcome {
            reply: Reply::html(SAVED_PAGE),
            effects,
        })
    } else {
        Ok(Outcome::reply(Reply::redirect_home()))
    }
}

fn status<S: KvStore>(settings: &Settings<S>, link: &LinkStatus<'_>) -> Result<Reply, Error> {
    let mut json: String<STATUS_JSON_MAX> = String::new();
    json.push_str("{\"connected\":").map_err(|_| Error::BufferOverflow)?;
    json.push_str(if link.connected { "true" } else { "false" })
        .map_err(|_| Error::BufferOverflow)?;
    json.push_str(",\"ssid\":").map_err(|_| Error::BufferOverflow)?;
    push_json_str(&mut json, link.ssid)?;
    json.push_str(",\"ip\":").map_err(|_| Error::BufferOverflow)?;
    push_json_str(&mut json, link.ip)?;
    write!(
        json,
        ",\"rgb_enabled\":{},\"screen_rotation\":{}}}",
        settings.rgb_enabled(),
        settings.rotation().degrees()
    )
    .map_err(|_| Error::BufferOverflow)?;

    Ok(Reply {
        status: Status::Ok,
        content_type: "application/json",
        location: None,
        body: Body::Json(json),
    })
}

fn push_json_str<const N: usize>(out: &mut String<N>, value: &str) -> Result<(), Error> {
    out.push('"').map_err(|_| Error::BufferOverflow)?;
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\').map_err(|_| Error::BufferOverflow)?;
                out.push(c).map_err(|_| Error::BufferOverflow)?;
            }
            c if (c as u32) < 0x20 => {
                write!(out, "\\u{:04x}", c as u32).map_err(|_| Error::BufferOverflow)?;
            }
            c => out.push(c).map_err(|_| Error::BufferOverflow)?,
        }
    }
    out.push('"').map_err(|_| Error::BufferOverflow)
}

fn rgb<S: KvStore>(settings: &mut Settings<S>, req: &Request<'_>) -> Result<Outcome, Error> {
    let enabled = match req.arg::<8>("enabled") {
        Ok(Some(enabled)) => enabled,
        Ok(None) => return Ok(rejected("Missing enabled parameter")),
        Err(_) => return Ok(rejected("Invalid enabled parameter")),
    };
    let enabled = enabled.as_str() == "true";
    settings.set_rgb_enabled(enabled)?;
    Ok(Outcome {
        reply: Reply::text(Status::Ok, "OK"),
        effects: Effects {
            lamp: Some(enabled),
            ..Effects::default()
        },
    })
}

fn screen_rotation<S: KvStore>(settings: &mut Settings<S>, req: &Request<'_>) -> Result<Outcome, Error> {
    let raw = match req.arg::<8>("rotation") {
        Ok(Some(raw)) => raw,
        Ok(None) => return Ok(rejected("Missing rotation parameter")),
        Err(_) => return Ok(rejected("Invalid rotation value")),
    };
    let requested = raw.trim().parse::<i32>().ok();

    if requested == Some(settings.rotation().degrees() as i32) {
        return Ok(Outcome::reply(Reply::text(Status::Ok, "OK")));
    }
    let Some(rotation) = requested.and_then(|deg| Rotation::try_from(deg).ok()) else {
        return Ok(Outcome::reply(Reply::text(Status::BadRequest, "Invalid rotation value")));
    };

    settings.set_rotation(rotation)?;
    info!("rotation now {}", rotation.degrees());
    Ok(Outcome {
        reply: Reply::text(Status::Ok, "OK"),
        effects: Effects {
            restart: true,
            ..Effects::default()
        },
    })
}

fn reset<S: KvStore>(settings: &mut Settings<S>) -> Result<Outcome, Error> {
    settings.reset()?;
    Ok(Outcome {
        reply: Reply::text(Status::Ok, "Configuration reset. Restarting..."),
        effects: Effects {
            restart: true,
            configured: Some(false),
            disconnect: true,
            ..Effects::default()
        },
    })
}

const SAVED_PAGE: &str = "<!DOCTYPE html><html><head><meta name=\"viewport\" content=\"width=device-width\">\
<title>Saved</title></head><body><h2>Saved</h2><p>The device restarts now.</p></body></html>";

const CONFIG_PAGE: &str = "<!DOCTYPE html><html><head><meta name=\"viewport\" content=\"width=device-width\">\
<title>Power Monitor Setup</title><style>body{font-family:sans-serif;max-width:360px;margin:auto;padding:1em}\
input,select,button{width:100%;margin:.3em 0;padding:.5em}</style></head><body>\
<h2>Power Monitor Setup</h2><p id=\"st\"></p>\
<form method=\"POST\" action=\"/save\">\
<input name=\"ssid\" placeholder=\"WiFi name\" maxlength=\"32\">\
<input name=\"password\" type=\"password\" placeholder=\"WiFi password\" maxlength=\"64\">\
<input name=\"monitor_url\" placeholder=\"Monitor IP, e.g. 192.168.32.2\">\
<button>Save</button></form>\
<label><input type=\"checkbox\" id=\"rgb\" style=\"width:auto\"> Status lamp</label>\
<select id=\"rot\"><option>0</option><option>90</option><option>180</option><option>270</option></select>\
<form method=\"POST\" action=\"/reset\"><button>Factory reset</button></form>\
<script>\
function post(p,b){fetch(p,{method:'POST',headers:{'Content-Type':'application/x-www-form-urlencoded'},body:b})}\
fetch('/status').then(r=>r.json()).then(s=>{\
document.getElementById('st').textContent=s.connected?('Connected to '+s.ssid+' ('+s.ip+')'):'Not connected';\
rgb.checked=s.rgb_enabled;rot.value=s.screen_rotation});\
rgb.onchange=()=>post('/rgb','enabled='+rgb.checked);\
rot.onchange=()=>post('/screen_rotation','rotation='+rot.value);\
</script></body></html>";
