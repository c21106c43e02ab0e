//! DHCP and DNS responders on the access point, so a phone that joins the
//! setup network gets an address and lands on the portal.

use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Address, Stack};
use log::{debug, info, warn};
use powerview::config::{AP_ADDRESS, DNS_TTL_SECS};
use powerview::dhcp::{self, DhcpServer};
use powerview::dns;

const PACKET_MAX: usize = 576;

#[embassy_executor::task]
pub async fn dhcp_task(stack: Stack<'static>) {
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buf = [0u8; PACKET_MAX * 2];
    let mut tx_buf = [0u8; PACKET_MAX * 2];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buf, &mut tx_meta, &mut tx_buf);
    if let Err(e) = socket.bind(dhcp::SERVER_PORT) {
        warn!("dhcp: bind failed: {:?}", e);
        return;
    }
    info!("dhcp: serving on port {}", dhcp::SERVER_PORT);

    let mut server = DhcpServer::new(AP_ADDRESS);
    let broadcast = IpEndpoint::new(IpAddress::Ipv4(Ipv4Address::BROADCAST), dhcp::CLIENT_PORT);
    let mut packet = [0u8; PACKET_MAX];
    let mut reply = [0u8; PACKET_MAX];

    loop {
        let Ok((len, _from)) = socket.recv_from(&mut packet).await else {
            continue;
        };
        let Some(n) = server.respond(&packet[..len], &mut reply) else {
            continue;
        };
        // Clients have no address yet; answer on the broadcast address
        if let Err(e) = socket.send_to(&reply[..n], broadcast).await {
            debug!("dhcp: send failed: {:?}", e);
        }
    }
}

#[embassy_executor::task]
pub async fn dns_task(stack: Stack<'static>) {
    let mut rx_meta = [PacketMetadata::EMPTY; 8];
    let mut tx_meta = [PacketMetadata::EMPTY; 8];
    let mut rx_buf = [0u8; 1024];
    let mut tx_buf = [0u8; 1024];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buf, &mut tx_meta, &mut tx_buf);
    if let Err(e) = socket.bind(dns::PORT) {
        warn!("dns: bind failed: {:?}", e);
        return;
    }
    info!("dns: answering every name with the portal address");

    let mut query = [0u8; 512];
    let mut reply = [0u8; 512];
    loop {
        let Ok((len, meta)) = socket.recv_from(&mut query).await else {
            continue;
        };
        let Some(n) = dns::answer(&query[..len], AP_ADDRESS, DNS_TTL_SECS, &mut reply) else {
            continue;
        };
        if let Err(e) = socket.send_to(&reply[..n], meta.endpoint).await {
            debug!("dns: send failed: {:?}", e);
        }
    }
}
