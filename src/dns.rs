//! Captive DNS: every A query is answered with the portal address.

/// UDP port.
pub const PORT: u16 = 53;

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;

/// Build the answer to `query` into `out`, returning its length.
///
/// A and ANY questions get one A record pointing at `address`; other types
/// get an empty answer so the client falls back to A. Responses, malformed
/// queries and queries without a question are dropped (`None`).
pub fn answer(query: &[u8], address: [u8; 4], ttl_secs: u32, out: &mut [u8]) -> Option<usize> {
    if query.len() < HEADER_LEN {
        return None;
    }
    let flags = u16::from_be_bytes([query[2], query[3]]);
    let qdcount = u16::from_be_bytes([query[4], query[5]]);
    // QR set means this is a response, opcode must be a standard query
    if flags & 0x8000 != 0 || (flags >> 11) & 0xF != 0 || qdcount == 0 {
        return None;
    }

    let name_end = skip_name(query, HEADER_LEN)?;
    let question_end = name_end + 4;
    let question = query.get(HEADER_LEN..question_end)?;
    let qtype = u16::from_be_bytes([query[name_end], query[name_end + 1]]);
    let qclass = u16::from_be_bytes([query[name_end + 2], query[name_end + 3]]);
    let answers = (matches!(qtype, TYPE_A | TYPE_ANY) && qclass == CLASS_IN) as u16;

    let len = HEADER_LEN + question.len() + answers as usize * 16;
    let out = out.get_mut(..len)?;

    out[0..2].copy_from_slice(&query[0..2]);
    // QR, AA, and the client's RD bit
    let reply_flags = 0x8400 | (flags & 0x0100);
    out[2..4].copy_from_slice(&reply_flags.to_be_bytes());
    out[4..6].copy_from_slice(&1u16.to_be_bytes());
    out[6..8].copy_from_slice(&answers.to_be_bytes());
    out[8..12].fill(0);
    out[HEADER_LEN..HEADER_LEN + question.len()].copy_from_slice(question);

    if answers == 1 {
        let a = &mut out[HEADER_LEN + question.len()..];
        // Name: pointer to the question at offset 12
        a[0..2].copy_from_slice(&0xC00Cu16.to_be_bytes());
        a[2..4].copy_from_slice(&TYPE_A.to_be_bytes());
        a[4..6].copy_from_slice(&CLASS_IN.to_be_bytes());
        a[6..10].copy_from_slice(&ttl_secs.to_be_bytes());
        a[10..12].copy_from_slice(&4u16.to_be_bytes());
        a[12..16].copy_from_slice(&address);
    }
    Some(len)
}

/// Offset just past the name starting at `pos`. Compression pointers are
/// not expected in a question and are rejected.
fn skip_name(packet: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *packet.get(pos)? as usize;
        if len == 0 {
            return Some(pos + 1);
        }
        if len & 0xC0 != 0 {
            return None;
        }
        pos += 1 + len;
    }
}
