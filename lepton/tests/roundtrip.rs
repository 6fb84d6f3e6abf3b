// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! End-to-end roundtrips over synthetic JPEGs: every file here is built
//! byte-by-byte in the test, so the suite runs without an external corpus.

use lepton::container::header::LeptonHeader;
use lepton::{decode_bytes, encode_bytes, encode_verify};

/// DQT for table 0 with every entry equal to 3.
fn dqt_segment() -> Vec<u8> {
    let mut s = vec![0xFF, 0xDB, 0x00, 0x43, 0x00];
    s.extend_from_slice(&[3u8; 64]);
    s
}

/// DC table 0: four 2-bit codes for categories 0..=3.
fn dht_dc_segment() -> Vec<u8> {
    let mut s = vec![0xFF, 0xC4, 0x00, 0x17, 0x00];
    s.extend_from_slice(&[0, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    s.extend_from_slice(&[0, 1, 2, 3]);
    s
}

/// AC table 0: EOB as the 1-bit code 0, (run 0, size 1) as the 2-bit code 10.
fn dht_ac_segment() -> Vec<u8> {
    let mut s = vec![0xFF, 0xC4, 0x00, 0x15, 0x10];
    s.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    s.extend_from_slice(&[0x00, 0x01]);
    s
}

fn sof0_gray(width: u16, height: u16) -> Vec<u8> {
    vec![
        0xFF,
        0xC0,
        0x00,
        0x0B,
        8,
        (height >> 8) as u8,
        (height & 0xFF) as u8,
        (width >> 8) as u8,
        (width & 0xFF) as u8,
        1,
        1,
        0x11,
        0,
    ]
}

fn sos_gray_baseline() -> Vec<u8> {
    vec![0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 0, 63, 0]
}

/// 8x8 grayscale baseline JPEG with DC 5 and no AC:
/// scan bits are DC cat 3 (`11` + `101`), EOB (`0`), padded with ones.
fn tiny_gray_jpeg() -> Vec<u8> {
    let mut j = vec![0xFF, 0xD8];
    j.extend_from_slice(&dqt_segment());
    j.extend_from_slice(&sof0_gray(8, 8));
    j.extend_from_slice(&dht_dc_segment());
    j.extend_from_slice(&dht_ac_segment());
    j.extend_from_slice(&sos_gray_baseline());
    j.push(0xEB);
    j.extend_from_slice(&[0xFF, 0xD9]);
    j
}

/// 16x16 grayscale baseline with a restart interval of two blocks. The four
/// blocks carry distinct DC values and an AC coefficient each, and the
/// restart marker sits between byte-aligned segments.
fn gray_restart_jpeg() -> Vec<u8> {
    let mut j = vec![0xFF, 0xD8];
    j.extend_from_slice(&dqt_segment());
    j.extend_from_slice(&sof0_gray(16, 16));
    j.extend_from_slice(&dht_dc_segment());
    j.extend_from_slice(&dht_ac_segment());
    // DRI: restart every 2 MCUs.
    j.extend_from_slice(&[0xFF, 0xDD, 0x00, 0x04, 0x00, 0x02]);
    j.extend_from_slice(&sos_gray_baseline());
    // Blocks 0..1, then RST0, then blocks 2..3.
    j.extend_from_slice(&[0xED, 0x3A, 0xFF, 0xD0, 0xAA, 0x55]);
    j.extend_from_slice(&[0xFF, 0xD9]);
    j
}

/// 8x8 three-component baseline, no subsampling, shared tables.
fn color_jpeg() -> Vec<u8> {
    let mut j = vec![0xFF, 0xD8];
    j.extend_from_slice(&dqt_segment());
    j.extend_from_slice(&[
        0xFF, 0xC0, 0x00, 0x11, 8, 0, 8, 0, 8, 3, 1, 0x11, 0, 2, 0x11, 0, 3, 0x11, 0,
    ]);
    j.extend_from_slice(&dht_dc_segment());
    j.extend_from_slice(&dht_ac_segment());
    j.extend_from_slice(&[
        0xFF, 0xDA, 0x00, 0x0C, 3, 1, 0x00, 2, 0x00, 3, 0x00, 0, 63, 0,
    ]);
    // Y: DC 5, Cb: DC 3, Cr: DC -2, no AC anywhere.
    j.extend_from_slice(&[0xEA, 0xD2]);
    j.extend_from_slice(&[0xFF, 0xD9]);
    j
}

/// 8x8 grayscale progressive JPEG in four scans: DC first (Al=1), DC
/// refine, AC first (Al=1), AC refine. The image has DC 5 and the zigzag-1
/// coefficient equal to 3.
fn progressive_jpeg() -> Vec<u8> {
    let mut j = vec![0xFF, 0xD8];
    j.extend_from_slice(&dqt_segment());
    j.extend_from_slice(&[0xFF, 0xC2, 0x00, 0x0B, 8, 0, 8, 0, 8, 1, 1, 0x11, 0]);
    j.extend_from_slice(&dht_dc_segment());
    j.extend_from_slice(&dht_ac_segment());
    // Scan 1: DC first, Al=1. Codes 5 >> 1 = 2: `10` + `10`, padded.
    j.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 0, 0, 0x01]);
    j.push(0xAF);
    // Scan 2: DC refine (Ah=1, Al=0). One 1-bit, padded: 0xFF, stuffed.
    j.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 0, 0, 0x10]);
    j.extend_from_slice(&[0xFF, 0x00]);
    // Scan 3: AC first over 1..=63, Al=1. Codes 3 >> 1 = 1 at position 1
    // (`10` + sign `1`), then EOB (`0`), padded.
    j.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 1, 63, 0x01]);
    j.push(0xAF);
    // Scan 4: AC refine (Ah=1, Al=0). EOB (`0`) then the correction bit for
    // position 1 (3 & 1 = `1`), padded.
    j.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 1, 63, 0x10]);
    j.push(0x7F);
    j.extend_from_slice(&[0xFF, 0xD9]);
    j
}

fn assert_roundtrip(jpeg: &[u8]) {
    let lepton = encode_bytes(jpeg).expect("encode");
    let restored = decode_bytes(&lepton).expect("decode");
    assert_eq!(restored.len(), jpeg.len(), "length mismatch");
    if restored != jpeg {
        let first_diff = jpeg
            .iter()
            .zip(restored.iter())
            .position(|(a, b)| a != b)
            .unwrap_or(jpeg.len());
        panic!(
            "content mismatch at byte {first_diff}: expected {:#04x}, got {:#04x}",
            jpeg[first_diff], restored[first_diff]
        );
    }
}

#[test]
fn tiny_gray_roundtrip() {
    assert_roundtrip(&tiny_gray_jpeg());
}

#[test]
fn gray_restart_roundtrip() {
    assert_roundtrip(&gray_restart_jpeg());
}

#[test]
fn color_roundtrip() {
    assert_roundtrip(&color_jpeg());
}

#[test]
fn progressive_roundtrip() {
    assert_roundtrip(&progressive_jpeg());
}

#[test]
fn trailing_garbage_is_preserved() {
    let mut jpeg = tiny_gray_jpeg();
    // A trailing RST marker and a large blob of garbage after the EOI.
    jpeg.extend_from_slice(&[0xFF, 0xD0]);
    for i in 0..4096u32 {
        jpeg.push((i * 17 % 256) as u8);
    }

    let lepton = encode_bytes(&jpeg).expect("encode");

    // The garbage section stores the bytes after the scan verbatim
    // (starting with the EOI).
    let header = LeptonHeader::read_from(&mut &lepton[..]).expect("header");
    assert_eq!(header.recovery.garbage_data[..2], [0xFF, 0xD9]);
    assert_eq!(header.recovery.garbage_data.len(), 2 + 2 + 4096);

    let restored = decode_bytes(&lepton).expect("decode");
    assert_eq!(restored, jpeg);
}

#[test]
fn truncated_scan_roundtrip() {
    let full = gray_restart_jpeg();
    // Cut inside the entropy-coded data, one byte into the scan.
    let scan_start = full.len() - 8; // six scan bytes + EOI
    let truncated = full[..scan_start + 1].to_vec();

    let lepton = encode_bytes(&truncated).expect("encode");
    let restored = decode_bytes(&lepton).expect("decode");
    assert_eq!(restored.len(), truncated.len());
    assert_eq!(restored, truncated);
}

/// Re-encoding through two thread handoffs (primed with the captured
/// overhang and truncated to the recorded segment sizes) must reproduce the
/// same bytes as the single-partition path.
#[test]
fn partitioned_reencode_matches_original() {
    use lepton::consts::JpegType;
    use lepton::container::header::ThreadHandoff;
    use lepton::jpeg::{jpeg_header, scan_read, scan_write};

    let jpeg = gray_restart_jpeg();
    let result = scan_read::read_jpeg(&jpeg).expect("read");
    assert_eq!(result.partitions.len(), 2);
    assert_eq!(result.partitions[1].position, 4);
    assert_eq!(result.partitions[1].num_overhang_bits, 0);

    let mut header = lepton::container::header::LeptonHeader::new();
    header.jpeg_type = JpegType::Sequential;
    header.original_file_size = jpeg.len() as u32;
    header.raw_jpeg_header = result.raw_header[2..].to_vec();
    let (jh, read_index) = jpeg_header::parse_stored_header(&header.raw_jpeg_header).expect("header");
    header.jpeg_header = jh;
    header.raw_jpeg_header_read_index = read_index;
    header.recovery.pad_bit = result.pad_bit;
    header.recovery.garbage_data = result.garbage_data.clone();

    // The scan is six bytes: four up to and including the restart marker,
    // then two more.
    header.thread_handoffs = vec![
        ThreadHandoff {
            luma_y_start: result.partitions[0].luma_y_start,
            luma_y_end: result.partitions[1].luma_y_start,
            segment_size: 4,
            overhang_byte: result.partitions[0].overhang_byte,
            num_overhang_bits: result.partitions[0].num_overhang_bits,
            last_dc: result.partitions[0].last_dc,
        },
        ThreadHandoff {
            luma_y_start: result.partitions[1].luma_y_start,
            luma_y_end: result.partitions[1].luma_y_end,
            segment_size: 2,
            overhang_byte: result.partitions[1].overhang_byte,
            num_overhang_bits: result.partitions[1].num_overhang_bits,
            last_dc: result.partitions[1].last_dc,
        },
    ];

    let mut out = Vec::new();
    scan_write::write_jpeg(&mut header, &result.image_data, &mut out).expect("write");
    assert_eq!(out, jpeg);
}

#[test]
fn encode_is_deterministic() {
    let jpeg = gray_restart_jpeg();
    let a = encode_bytes(&jpeg).expect("encode");
    let b = encode_bytes(&jpeg).expect("encode");
    assert_eq!(a, b);
}

#[test]
fn encode_verify_accepts_good_input() {
    let jpeg = color_jpeg();
    let lepton = encode_verify(&jpeg).expect("verify");
    assert!(!lepton.is_empty());
}

#[test]
fn large_uniform_image_roundtrip() {
    // 256 blocks exercise the adaptive model over many rows, including the
    // row-cache alternation and all four neighbor configurations.
    let mut jpeg = vec![0xFF, 0xD8];
    jpeg.extend_from_slice(&dqt_segment());
    jpeg.extend_from_slice(&sof0_gray(128, 128));
    jpeg.extend_from_slice(&dht_dc_segment());
    jpeg.extend_from_slice(&dht_ac_segment());
    jpeg.extend_from_slice(&sos_gray_baseline());
    // 256 blocks: first block DC 1 (cat 1: `01` + `1`), then EOB; the rest
    // have DC diff 0 (`00`) and EOB. 4 bits then 255 * 3 bits = 769 bits.
    let mut bits = String::from("0110");
    for _ in 0..255 {
        bits.push_str("000");
    }
    while bits.len() % 8 != 0 {
        bits.push('1');
    }
    for chunk in bits.as_bytes().chunks(8) {
        let mut byte = 0u8;
        for &c in chunk {
            byte = (byte << 1) | (c - b'0');
        }
        jpeg.push(byte);
    }
    jpeg.extend_from_slice(&[0xFF, 0xD9]);

    let lepton = encode_bytes(&jpeg).expect("encode");
    let restored = decode_bytes(&lepton).expect("decode");
    assert_eq!(restored, jpeg);
}

#[test]
fn rejects_four_component_jpegs() {
    let mut j = vec![0xFF, 0xD8];
    j.extend_from_slice(&dqt_segment());
    j.extend_from_slice(&[
        0xFF, 0xC0, 0x00, 0x14, 8, 0, 8, 0, 8, 4, 1, 0x11, 0, 2, 0x11, 0, 3, 0x11, 0, 4, 0x11, 0,
    ]);
    j.extend_from_slice(&dht_dc_segment());
    j.extend_from_slice(&dht_ac_segment());
    j.extend_from_slice(&sos_gray_baseline());
    assert!(matches!(
        encode_bytes(&j),
        Err(lepton::Error::Unsupported4Colors)
    ));
}

#[test]
fn rejects_non_jpeg_input() {
    assert!(encode_bytes(b"definitely not a jpeg").is_err());
    assert!(decode_bytes(b"definitely not a lepton file either").is_err());
}
