//! Shared fixtures: minimal FLAC headers and hand-built Ogg Opus files.
//!
//! The Opus fixtures carry a valid OpusHead + OpusTags pair (correct page
//! CRCs, no audio pages), which is enough for tag readers and writers; no
//! external encoder is needed to stage a destination tree.

use std::path::Path;

/// Minimal FLAC: signature plus one final STREAMINFO block with the given
/// audio MD5.
pub fn flac_bytes(md5: &[u8; 16]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"fLaC");
    buf.push(0x80);
    buf.extend_from_slice(&[0x00, 0x00, 0x22]);
    buf.extend_from_slice(&[0u8; 18]);
    buf.extend_from_slice(md5);
    buf
}

pub fn write_flac(root: &Path, rel: &str, md5: &[u8; 16]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, flac_bytes(md5)).unwrap();
}

fn ogg_crc(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &b in data {
        crc ^= (b as u32) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// One Ogg page holding a single packet.
fn ogg_page(packet: &[u8], header_type: u8, granule: u64, serial: u32, seq: u32) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut remaining = packet.len();
    loop {
        if remaining >= 255 {
            lacing.push(255u8);
            remaining -= 255;
        } else {
            lacing.push(remaining as u8);
            break;
        }
    }

    let mut page = Vec::new();
    page.extend_from_slice(b"OggS");
    page.push(0); // stream structure version
    page.push(header_type);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&seq.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]); // CRC placeholder
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    page.extend_from_slice(packet);

    let crc = ogg_crc(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

fn opus_head_packet() -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(b"OpusHead");
    p.push(1); // version
    p.push(2); // channels
    p.extend_from_slice(&3840u16.to_le_bytes()); // pre-skip
    p.extend_from_slice(&48_000u32.to_le_bytes()); // input sample rate
    p.extend_from_slice(&0i16.to_le_bytes()); // output gain
    p.push(0); // mapping family
    p
}

fn opus_tags_packet(comments: &[(&str, &str)]) -> Vec<u8> {
    let vendor = b"pac-test";
    let mut p = Vec::new();
    p.extend_from_slice(b"OpusTags");
    p.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    p.extend_from_slice(vendor);
    p.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for (k, v) in comments {
        let entry = format!("{k}={v}");
        p.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        p.extend_from_slice(entry.as_bytes());
    }
    p
}

/// A parseable `.opus` file with the given Vorbis comments.
pub fn opus_bytes(comments: &[(&str, &str)]) -> Vec<u8> {
    let serial = 0x0001_e240;
    let mut out = Vec::new();
    out.extend_from_slice(&ogg_page(&opus_head_packet(), 0x02, 0, serial, 0));
    out.extend_from_slice(&ogg_page(&opus_tags_packet(comments), 0x04, 0, serial, 1));
    out
}

pub fn write_opus(root: &Path, rel: &str, comments: &[(&str, &str)]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, opus_bytes(comments)).unwrap();
}

/// Lowercase hex of a constant-byte digest, matching the scanner's form.
pub fn md5_hex(byte: u8) -> String {
    [byte; 16].iter().map(|b| format!("{b:02x}")).collect()
}

/// The five PAC comments for a fixture output.
pub fn pac_comments(
    md5_byte: u8,
    encoder: &str,
    quality: &str,
    version: &str,
    source_rel: &str,
) -> Vec<(String, String)> {
    vec![
        ("PAC_SRC_MD5".to_string(), md5_hex(md5_byte)),
        ("PAC_ENCODER".to_string(), encoder.to_string()),
        ("PAC_QUALITY".to_string(), quality.to_string()),
        ("PAC_VERSION".to_string(), version.to_string()),
        ("PAC_SOURCE_REL".to_string(), source_rel.to_string()),
    ]
}
