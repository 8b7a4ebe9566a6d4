//! Device-side frames and client frame inspection.
//!
//! The builders produce what an Icom device sends on its control port.
//! Session IDs are given from the device's point of view: `radio_sid` is
//! the source, `pc_sid` the destination.

fn header(len: usize, kind: u16, seq: u16, radio_sid: u32, pc_sid: u32) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    buf[0..4].copy_from_slice(&(len as u32).to_le_bytes());
    buf[4..6].copy_from_slice(&kind.to_le_bytes());
    buf[6..8].copy_from_slice(&seq.to_le_bytes());
    buf[8..12].copy_from_slice(&radio_sid.to_be_bytes());
    buf[12..16].copy_from_slice(&pc_sid.to_be_bytes());
    buf
}

/// Reply to a SID probe (type 4), carrying the device's session ID.
pub fn sid_reply(radio_sid: u32, pc_sid: u32) -> Vec<u8> {
    header(16, 0x04, 0, radio_sid, pc_sid)
}

/// Reply to a SID confirmation (type 6, sequence 1).
pub fn sid_confirm_reply(radio_sid: u32, pc_sid: u32) -> Vec<u8> {
    header(16, 0x06, 1, radio_sid, pc_sid)
}

/// 96-byte login reply. A rejected login carries `FF FF FF FE` at 48.
pub fn login_reply(radio_sid: u32, pc_sid: u32, token: [u8; 6], rejected: bool) -> Vec<u8> {
    let mut buf = header(96, 0x00, 1, radio_sid, pc_sid);
    buf[16..20].copy_from_slice(&80u32.to_be_bytes());
    buf[20] = 0x02;
    buf[26..32].copy_from_slice(&token);
    if rejected {
        buf[48..52].copy_from_slice(&[0xff, 0xff, 0xff, 0xfe]);
    }
    buf
}

/// 64-byte reauth acknowledgement.
pub fn reauth_reply(radio_sid: u32, pc_sid: u32, token: [u8; 6]) -> Vec<u8> {
    let mut buf = header(64, 0x00, 2, radio_sid, pc_sid);
    buf[16..20].copy_from_slice(&48u32.to_be_bytes());
    buf[20] = 0x02;
    buf[26..32].copy_from_slice(&token);
    buf
}

/// 80-byte reauth rejection with `FF FF FF` at 48.
pub fn reauth_failure(radio_sid: u32, pc_sid: u32) -> Vec<u8> {
    let mut buf = header(80, 0x00, 2, radio_sid, pc_sid);
    buf[48..51].copy_from_slice(&[0xff, 0xff, 0xff]);
    buf
}

/// 21-byte echo packet: probe when `reply` is false.
pub fn echo(seq: u16, radio_sid: u32, pc_sid: u32, reply: bool, id: [u8; 4]) -> Vec<u8> {
    let mut buf = header(21, 0x07, seq, radio_sid, pc_sid);
    buf[16] = reply as u8;
    buf[17..21].copy_from_slice(&id);
    buf
}

/// 16-byte plain ping.
pub fn ping(seq: u16, radio_sid: u32, pc_sid: u32) -> Vec<u8> {
    header(16, 0x00, seq, radio_sid, pc_sid)
}

// ---------------------------------------------------------------------------
// Inspection of client frames
// ---------------------------------------------------------------------------

pub fn kind(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[4], buf[5]])
}

pub fn seq(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[6], buf[7]])
}

pub fn src_sid(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]])
}

pub fn dst_sid(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]])
}

/// `true` for an application packet (type 0, with inner envelope).
pub fn is_app(buf: &[u8]) -> bool {
    buf.len() > 32 && kind(buf) == 0x00
}

/// Inner envelope magic of an application packet.
pub fn magic(buf: &[u8]) -> u8 {
    buf[21]
}

/// Inner envelope sequence of an application packet.
pub fn inner_seq(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[23], buf[24]])
}

/// Token slot of an application packet.
pub fn token(buf: &[u8]) -> [u8; 6] {
    let mut token = [0u8; 6];
    token.copy_from_slice(&buf[26..32]);
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_reply_layout() {
        let buf = sid_reply(0xe435_dd72, 0xbed9_f263);
        assert_eq!(
            buf,
            vec![
                0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xe4, 0x35, 0xdd, 0x72, 0xbe, 0xd9,
                0xf2, 0x63
            ]
        );
    }

    #[test]
    fn login_reply_prefix_and_sentinel() {
        let ok = login_reply(1, 2, [1, 2, 3, 4, 5, 6], false);
        assert_eq!(&ok[..8], &[0x60, 0, 0, 0, 0, 0, 0x01, 0]);
        assert_eq!(token(&ok), [1, 2, 3, 4, 5, 6]);
        assert_eq!(&ok[48..52], &[0, 0, 0, 0]);

        let bad = login_reply(1, 2, [0; 6], true);
        assert_eq!(&bad[48..52], &[0xff, 0xff, 0xff, 0xfe]);
    }

    #[test]
    fn echo_inspection() {
        let buf = echo(0x0e1c, 7, 9, false, [1, 2, 3, 4]);
        assert_eq!(buf.len(), 21);
        assert_eq!(kind(&buf), 7);
        assert_eq!(seq(&buf), 0x0e1c);
        assert_eq!(src_sid(&buf), 7);
        assert_eq!(dst_sid(&buf), 9);
        assert!(!is_app(&buf));
    }
}
