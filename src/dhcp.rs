//! Minimal DHCP server for the setup access point.
//!
//! Hands out addresses from a small pool on the AP subnet and names this
//! device as router and DNS server, so phones joining the AP reach the
//! portal. Only DISCOVER and REQUEST are answered; everything else is
//! dropped.

use heapless::Vec;

use crate::config::{DHCP_LEASE_SECS, DHCP_MAX_LEASES, DHCP_POOL_FIRST_HOST};

/// UDP ports.
pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Fixed BOOTP header length, up to and including `file`.
const BOOTP_LEN: usize = 236;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
/// Replies are padded to the minimum BOOTP message size.
const MIN_REPLY_LEN: usize = 300;

const OP_REQUEST: u8 = 1;
const OP_REPLY: u8 = 2;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_END: u8 = 255;

/// DHCP message types (option 53).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Ack,
    Nak,
    Other(u8),
}

impl MessageType {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MessageType::Discover,
            2 => MessageType::Offer,
            3 => MessageType::Request,
            5 => MessageType::Ack,
            6 => MessageType::Nak,
            other => MessageType::Other(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            MessageType::Discover => 1,
            MessageType::Offer => 2,
            MessageType::Request => 3,
            MessageType::Ack => 5,
            MessageType::Nak => 6,
            MessageType::Other(v) => v,
        }
    }
}

/// The fields of a client message the server cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientMessage {
    pub kind: MessageType,
    pub xid: [u8; 4],
    pub flags: [u8; 2],
    pub ciaddr: [u8; 4],
    pub mac: [u8; 6],
    pub requested: Option<[u8; 4]>,
}

/// Parse a client message; `None` for anything that is not a well-formed
/// BOOTREQUEST carrying a message type.
pub fn parse(packet: &[u8]) -> Option<ClientMessage> {
    if packet.len() < BOOTP_LEN + MAGIC_COOKIE.len() || packet[0] != OP_REQUEST {
        return None;
    }
    // Ethernet hardware addresses only
    if packet[1] != 1 || packet[2] != 6 {
        return None;
    }
    if packet[BOOTP_LEN..BOOTP_LEN + 4] != MAGIC_COOKIE {
        return None;
    }

    let mut kind = None;
    let mut requested = None;
    let mut options = &packet[BOOTP_LEN + 4..];
    while let Some((&code, rest)) = options.split_first() {
        match code {
            OPT_PAD => {
                options = rest;
                continue;
            }
            OPT_END => break,
            _ => {}
        }
        let (&len, rest) = rest.split_first()?;
        let value = rest.get(..len as usize)?;
        match (code, value) {
            (OPT_MESSAGE_TYPE, [t]) => kind = Some(MessageType::from_u8(*t)),
            (OPT_REQUESTED_IP, [a, b, c, d]) => requested = Some([*a, *b, *c, *d]),
            _ => {}
        }
        options = &rest[len as usize..];
    }

    Some(ClientMessage {
        kind: kind?,
        xid: packet[4..8].try_into().ok()?,
        flags: packet[10..12].try_into().ok()?,
        ciaddr: packet[12..16].try_into().ok()?,
        mac: packet[28..34].try_into().ok()?,
        requested,
    })
}

#[derive(Clone, Copy, Debug)]
struct Lease {
    mac: [u8; 6],
    host: u8,
}

/// Lease table and reply builder.
pub struct DhcpServer {
    server: [u8; 4],
    leases: Vec<Lease, DHCP_MAX_LEASES>,
}

impl DhcpServer {
    /// Serve the /24 that `server` lives in.
    pub const fn new(server: [u8; 4]) -> Self {
        Self {
            server,
            leases: Vec::new(),
        }
    }

    /// Address leased to `mac`, allocating one if needed. When the table is
    /// full the oldest lease is recycled.
    pub fn lease_for(&mut self, mac: [u8; 6]) -> [u8; 4] {
        if let Some(lease) = self.leases.iter().find(|l| l.mac == mac) {
            return self.address(lease.host);
        }

        let free = (0..DHCP_MAX_LEASES as u8)
            .map(|i| DHCP_POOL_FIRST_HOST + i)
            .find(|h| !self.leases.iter().any(|l| l.host == *h));
        let host = match free {
            Some(host) => host,
            None => self.leases.remove(0).host,
        };
        // A slot is free here: either the pool had room or one was removed
        let _ = self.leases.push(Lease { mac, host });
        debug!("dhcp: lease .{} allocated", host);
        self.address(host)
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    fn address(&self, host: u8) -> [u8; 4] {
        [self.server[0], self.server[1], self.server[2], host]
    }

    /// Build the reply to `packet` into `out`, returning its length.
    /// `None` when the packet needs no answer or `out` is too small.
    pub fn respond(&mut self, packet: &[u8], out: &mut [u8]) -> Option<usize> {
        let msg = parse(packet)?;
        let leased = match msg.kind {
            MessageType::Discover | MessageType::Request => self.lease_for(msg.mac),
            _ => return None,
        };

        let kind = match msg.kind {
            MessageType::Discover => MessageType::Offer,
            _ => {
                let asked = msg.requested.unwrap_or(msg.ciaddr);
                if asked == [0; 4] || asked == leased {
                    MessageType::Ack
                } else {
                    MessageType::Nak
                }
            }
        };
        self.build_reply(&msg, kind, leased, out)
    }

    fn build_reply(
        &self,
        msg: &ClientMessage,
        kind: MessageType,
        leased: [u8; 4],
        out: &mut [u8],
    ) -> Option<usize> {
        if out.len() < MIN_REPLY_LEN {
            return None;
        }
        out[..MIN_REPLY_LEN].fill(0);

        out[0] = OP_REPLY;
        out[1] = 1;
        out[2] = 6;
        out[4..8].copy_from_slice(&msg.xid);
        out[10..12].copy_from_slice(&msg.flags);
        if kind != MessageType::Nak {
            out[16..20].copy_from_slice(&leased);
            out[20..24].copy_from_slice(&self.server);
        }
        out[28..34].copy_from_slice(&msg.mac);
        out[BOOTP_LEN..BOOTP_LEN + 4].copy_from_slice(&MAGIC_COOKIE);

        let mut w = OptionWriter {
            buf: out,
            pos: BOOTP_LEN + 4,
        };
        w.put(OPT_MESSAGE_TYPE, &[kind.to_u8()])?;
        w.put(OPT_SERVER_ID, &self.server)?;
        if kind != MessageType::Nak {
            w.put(OPT_LEASE_TIME, &DHCP_LEASE_SECS.to_be_bytes())?;
            w.put(OPT_SUBNET_MASK, &[255, 255, 255, 0])?;
            w.put(OPT_ROUTER, &self.server)?;
            w.put(OPT_DNS, &self.server)?;
        }
        w.end()?;

        Some(w.pos.max(MIN_REPLY_LEN))
    }
}

struct OptionWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl OptionWriter<'_> {
    fn put(&mut self, code: u8, value: &[u8]) -> Option<()> {
        let end = self.pos + 2 + value.len();
        let dst = self.buf.get_mut(self.pos..end)?;
        dst[0] = code;
        dst[1] = value.len() as u8;
        dst[2..].copy_from_slice(value);
        self.pos = end;
        Some(())
    }

    fn end(&mut self) -> Option<()> {
        *self.buf.get_mut(self.pos)? = OPT_END;
        self.pos += 1;
        Some(())
    }
}
