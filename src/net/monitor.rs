//! Power monitor client and the UI refresh loop.

use embassy_net::tcp::TcpSocket;
use embassy_net::{IpEndpoint, Ipv4Address, Stack};
use embassy_time::{with_timeout, Duration, Instant, Ticker};
use heapless::String;
use log::{debug, info, warn};
use powerview::config::{METRICS_RESPONSE_MAX, METRICS_TIMEOUT_MS, UI_REFRESH_MS, URL_MAX};
use powerview::metrics::{self, endpoint};
use powerview::power::PowerSnapshot;
use powerview::{Error, HomeSelector, PowerSource, Sample, Screen, WallClock};

use super::{link_up, set_home_screen};
use crate::Screens;

/// Polls the monitor over plain HTTP on the station interface.
pub struct HttpPowerSource {
    stack: Stack<'static>,
    url: String<URL_MAX>,
    rx_buf: [u8; 1024],
    tx_buf: [u8; 256],
    response: [u8; METRICS_RESPONSE_MAX],
}

impl HttpPowerSource {
    pub fn new(stack: Stack<'static>, url: String<URL_MAX>) -> Self {
        Self {
            stack,
            url,
            rx_buf: [0; 1024],
            tx_buf: [0; 256],
            response: [0; METRICS_RESPONSE_MAX],
        }
    }
}

impl PowerSource for HttpPowerSource {
    async fn fetch(&mut self) -> Result<Sample, Error> {
        let ep = endpoint(&self.url).ok_or(Error::BadRequest)?;
        // No resolver on the station stack; the portal stores an address
        let address: Ipv4Address = ep.host.parse().map_err(|_| Error::BadRequest)?;

        let mut request: String<256> = String::new();
        metrics::write_request(&ep, &mut request)?;

        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buf, &mut self.tx_buf);
        socket.set_timeout(Some(Duration::from_millis(METRICS_TIMEOUT_MS)));
        socket
            .connect(IpEndpoint::new(address.into(), ep.port))
            .await
            .map_err(|_| Error::Network)?;

        let mut sent = request.as_bytes();
        while !sent.is_empty() {
            let n = socket.write(sent).await.map_err(|_| Error::Network)?;
            sent = &sent[n..];
        }
        socket.flush().await.map_err(|_| Error::Network)?;

        // Connection: close, so the response ends at EOF
        let mut len = 0;
        while len < self.response.len() {
            match socket.read(&mut self.response[len..]).await {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(_) => return Err(Error::Network),
            }
        }
        socket.close();

        Ok(metrics::parse_response(&self.response[..len]))
    }
}

/// Poll the monitor once per refresh period and update the home screen.
#[embassy_executor::task]
pub async fn refresh_task(screens: &'static Screens, mut source: HttpPowerSource) {
    let mut clock = WallClock::new();
    let mut home = HomeSelector::new();
    let mut ticker = Ticker::every(Duration::from_millis(UI_REFRESH_MS));
    info!("refresh loop running");

    loop {
        ticker.next().await;
        if !link_up() {
            continue;
        }
        // Setup, error and scan screens own the display while shown
        if screens.active().await.is_some_and(Screen::is_modal) {
            continue;
        }

        let snapshot = match with_timeout(Duration::from_millis(METRICS_TIMEOUT_MS * 2), source.fetch()).await {
            Ok(Ok(sample)) => {
                if let Some(unix) = sample.unix_time {
                    if !clock.is_synced() {
                        info!("clock synced from monitor");
                    }
                    clock.sync(unix, Instant::now().as_millis());
                }
                sample.power
            }
            Ok(Err(e)) => {
                debug!("monitor poll failed: {:?}", e);
                PowerSnapshot::unavailable()
            }
            Err(_) => {
                debug!("monitor poll timed out");
                PowerSnapshot::unavailable()
            }
        };

        let target = home.observe(&snapshot);
        set_home_screen(target);
        // Re-checked under the lock: the link may have dropped during the fetch
        match screens.show_home(target).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("showing {:?} failed: {:?}", target, e);
                continue;
            }
        }

        if let Err(e) = screens.update_power(&snapshot).await {
            warn!("power update failed: {:?}", e);
        }
        if let Some(now) = clock.now(Instant::now().as_millis()) {
            if let Err(e) = screens.update_clock(now).await {
                warn!("clock update failed: {:?}", e);
            }
        }
    }
}
