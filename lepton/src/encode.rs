// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Top-level encoding: JPEG bytes in, lepton container out.

use std::io::{Read, Write};

use crate::codec::{LeptonEncoder, QuantizationTables};
use crate::consts::EOI;
use crate::container::header::{LeptonHeader, ThreadHandoff};
use crate::container::multiplex;
use crate::decode::decode_bytes;
use crate::error::{Error, Result};
use crate::jpeg::scan_read;
use crate::util::tracing_wrappers::*;

/// Compresses a JPEG stream into a lepton container.
pub fn encode<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<()> {
    let mut jpeg_data = Vec::new();
    reader.read_to_end(&mut jpeg_data)?;

    let lepton = encode_bytes(&jpeg_data)?;
    writer.write_all(&lepton)?;
    Ok(())
}

/// Compresses an in-memory JPEG into a lepton container.
pub fn encode_bytes(jpeg_data: &[u8]) -> Result<Vec<u8>> {
    let result = scan_read::read_jpeg(jpeg_data)?;

    info!(
        "encoding {}x{} {:?} jpeg, {} bytes",
        result.header.width,
        result.header.height,
        result.header.jpeg_type,
        jpeg_data.len()
    );

    let quantization_tables: Vec<QuantizationTables> = (0..result.header.cmpc)
        .map(|i| {
            let qt_idx = usize::from(result.header.cmp_info[i].q_table_index);
            QuantizationTables::new(&result.header.q_tables[qt_idx])
        })
        .collect();

    let luma_height = result.header.cmp_info[0].bcv;

    let mut encoder = LeptonEncoder::new(&result.header)?;
    encoder.encode_row_range(&quantization_tables, &result.image_data, 0, luma_height)?;
    let scan_stream = encoder.finish()?;

    let multiplexed = multiplex::multiplex(std::slice::from_ref(&scan_stream));

    // Single-partition mode: one handoff covering every luma row. The
    // segment size is left at zero, which the decoder reads as unlimited.
    let handoff = ThreadHandoff {
        luma_y_start: 0,
        luma_y_end: luma_height,
        segment_size: 0,
        overhang_byte: 0,
        num_overhang_bits: 0,
        last_dc: [0; 4],
    };

    let mut header = LeptonHeader::new();
    header.jpeg_type = result.header.jpeg_type;
    header.original_file_size = jpeg_data.len() as u32;
    header.thread_handoffs = vec![handoff];
    header.recovery.pad_bit = result.pad_bit;
    header.recovery.garbage_data = if result.garbage_data.is_empty() {
        EOI.to_vec()
    } else {
        result.garbage_data
    };

    // The stored raw header omits SOI; the decoder writes it back itself.
    let raw = &result.raw_header;
    header.raw_jpeg_header = if raw.len() >= 2 && raw[0] == 0xFF && raw[1] == 0xD8 {
        raw[2..].to_vec()
    } else {
        raw.clone()
    };

    let mut out = Vec::with_capacity(multiplexed.len() + 4096);
    header.write_to(&mut out)?;
    out.extend_from_slice(&multiplexed);

    // Length trailer: total file size including these four bytes.
    let final_size = (out.len() + 4) as u32;
    out.extend_from_slice(&final_size.to_le_bytes());

    Ok(out)
}

/// Encodes, then immediately decodes and compares against the input. Any
/// discrepancy surfaces as a verification error instead of a corrupt file.
pub fn encode_verify(jpeg_data: &[u8]) -> Result<Vec<u8>> {
    let lepton = encode_bytes(jpeg_data)?;

    let decoded = decode_bytes(&lepton)?;

    if decoded.len() != jpeg_data.len() {
        return Err(Error::VerificationLengthMismatch {
            expected: jpeg_data.len(),
            actual: decoded.len(),
        });
    }
    if let Some(first_diff) = jpeg_data.iter().zip(decoded.iter()).position(|(a, b)| a != b) {
        return Err(Error::VerificationContentMismatch(first_diff));
    }

    Ok(lepton)
}
