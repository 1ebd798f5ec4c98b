//! Builders for synthetic downlink streams.
#![allow(dead_code)]

use xrit::crc::calc_crc16;
use xrit::framing::{FRAME_LEN, PACKET_ZONE_LEN};
use xrit::lrit::headers::{PrimaryHeader, SecondaryHeader};
use xrit::msdu::{Apid, MsduHeader, FILL_APID};
use xrit::transport::TransportHeader;

/// Encode one source packet: header, payload, trailing CRC.
pub fn encode_msdu(apid: Apid, flag: u8, seq: u16, payload: &[u8]) -> Vec<u8> {
    let crc = calc_crc16(payload);
    let total = payload.len() + 2;
    let mut out = Vec::with_capacity(MsduHeader::LEN + total);
    out.extend_from_slice(&apid.to_be_bytes());
    out.extend_from_slice(&((u16::from(flag) << 14) | seq).to_be_bytes());
    out.extend_from_slice(&((total - 1) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// Pad a packet zone out to 884 bytes with a fill packet.
pub fn pad_zone(mut zone: Vec<u8>) -> Vec<u8> {
    let rest = PACKET_ZONE_LEN - zone.len();
    if rest == 0 {
        return zone;
    }
    assert!(rest >= 7, "zone leaves no room for a fill packet");
    zone.extend_from_slice(&FILL_APID.to_be_bytes());
    zone.extend_from_slice(&[0x00, 0x00]);
    zone.extend_from_slice(&((rest - 7) as u16).to_be_bytes());
    zone.resize(PACKET_ZONE_LEN, 0);
    zone
}

/// Encode one 892-byte frame around an 884-byte packet zone.
pub fn frame(vcid: u16, counter: u32, first_header: u16, zone: Vec<u8>) -> Vec<u8> {
    assert_eq!(zone.len(), PACKET_ZONE_LEN);
    assert!(vcid < 64);
    let mut out = Vec::with_capacity(FRAME_LEN);
    out.push(0x40); // version 1, scid 0
    out.push(vcid as u8);
    out.extend_from_slice(&counter.to_be_bytes()[1..]);
    out.push(0x00);
    out.extend_from_slice(&first_header.to_be_bytes());
    out.extend(zone);
    assert_eq!(out.len(), FRAME_LEN);
    out
}

/// One secondary header record with the given body.
pub fn record(htype: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![htype];
    out.extend_from_slice(&((body.len() + 3) as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn image_structure_record(bits_per_pixel: u8, cols: u16, rows: u16, compression: u8) -> Vec<u8> {
    let mut body = vec![bits_per_pixel];
    body.extend_from_slice(&cols.to_be_bytes());
    body.extend_from_slice(&rows.to_be_bytes());
    body.push(compression);
    record(SecondaryHeader::IMAGE_STRUCTURE, &body)
}

pub fn rice_record(flags: u16, pixels_per_block: u8, scanlines_per_packet: u8) -> Vec<u8> {
    let mut body = flags.to_be_bytes().to_vec();
    body.push(pixels_per_block);
    body.push(scanlines_per_packet);
    record(SecondaryHeader::RICE_COMPRESSION, &body)
}

pub fn noaa_record(product_id: u16, compression: u8) -> Vec<u8> {
    let mut body = b"NOAA".to_vec();
    body.extend_from_slice(&product_id.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.push(compression);
    record(SecondaryHeader::NOAA_SPECIFIC, &body)
}

pub fn segment_record(sequence_number: u16) -> Vec<u8> {
    let mut body = 1u16.to_be_bytes().to_vec();
    body.extend_from_slice(&sequence_number.to_be_bytes());
    body.extend_from_slice(&[0u8; 10]);
    record(SecondaryHeader::SEGMENT_IDENTIFICATION, &body)
}

pub fn annotation_record(name: &str) -> Vec<u8> {
    record(SecondaryHeader::ANNOTATION, name.as_bytes())
}

pub fn key_record() -> Vec<u8> {
    record(SecondaryHeader::KEY, &[])
}

/// A complete LRIT byte buffer. `data_len_bits` of the primary header is
/// taken from `declared_len` when given, else from the payload.
pub fn lrit_bytes(
    file_type: u8,
    secondary: &[Vec<u8>],
    payload: &[u8],
    declared_len: Option<u64>,
) -> Vec<u8> {
    let region: Vec<u8> = secondary.concat();
    let all = (PrimaryHeader::LEN + region.len()) as u32;
    let bits = declared_len.unwrap_or(payload.len() as u64) * 8;
    let mut out = vec![0u8];
    out.extend_from_slice(&16u16.to_be_bytes());
    out.push(file_type);
    out.extend_from_slice(&all.to_be_bytes());
    out.extend_from_slice(&bits.to_be_bytes());
    out.extend(region);
    out.extend_from_slice(payload);
    out
}

/// Prepend the 10-byte transport header.
pub fn with_transport(counter: u16, lrit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TransportHeader::LEN + lrit.len());
    out.extend_from_slice(&counter.to_be_bytes());
    out.extend_from_slice(&(lrit.len() as u64).to_be_bytes());
    out.extend_from_slice(lrit);
    out
}
