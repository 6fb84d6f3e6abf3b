// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Huffman-decodes the scans of a baseline or progressive JPEG into
//! per-component coefficient grids, while capturing everything needed to
//! reproduce the original bytes: pad bit, partition boundaries, trailing
//! garbage and early-EOF truncation points.

use crate::consts::*;
use crate::error::{Error, Result};
use crate::image::{AlignedBlock, BlockBasedImage};
use crate::jpeg::bit_reader::BitReader;
use crate::jpeg::huffman::{max_eob_run, next_huff_code, HuffmanTable};
use crate::jpeg::jpeg_header::{self, JpegHeader};
use crate::jpeg::position_state::JpegPositionState;
use crate::util::tracing_wrappers::*;

/// Partition boundary captured at an MCU row: where the entropy stream
/// stood, the partial byte, and the DC predictors in flight.
#[derive(Debug, Clone, Copy)]
pub struct JpegPartition {
    pub position: u64,
    pub overhang_byte: u8,
    pub num_overhang_bits: u8,
    pub last_dc: [i16; MAX_COMPONENTS],
    pub luma_y_start: u32,
    pub luma_y_end: u32,
}

/// Everything extracted from one JPEG file.
pub struct JpegReadResult {
    pub image_data: Vec<BlockBasedImage>,
    pub header: JpegHeader,
    /// Raw header bytes including SOI and every inter-scan segment.
    pub raw_header: Vec<u8>,
    /// Bytes after the last coded scan (for baseline, everything after the
    /// scan; for progressive, the EOI and anything following it).
    pub garbage_data: Vec<u8>,
    pub partitions: Vec<JpegPartition>,
    pub max_dpos: [u32; MAX_COMPONENTS],
    pub early_eof: bool,
    pub pad_bit: Option<u8>,
}

/// Parses a whole JPEG byte stream.
pub fn read_jpeg(data: &[u8]) -> Result<JpegReadResult> {
    if data.len() < 2 || data[0] != 0xFF || data[1] != MARKER_SOI {
        return Err(Error::UnsupportedJpeg("JPEG must start with 0xFF 0xD8".into()));
    }

    let mut header = JpegHeader::new();
    let mut raw_header = Vec::with_capacity(4096);
    raw_header.extend_from_slice(&SOI);

    let mut pos = 2usize;
    let more = parse_live_segments(&mut header, data, &mut pos, &mut raw_header, true)?;
    debug_assert!(more);

    if header.cmpc > COLOR_CHANNEL_NUM_BLOCK_TYPES {
        return Err(Error::Unsupported4Colors);
    }
    if header.jpeg_type == JpegType::Unknown {
        return Err(Error::UnsupportedJpeg("scan without frame header".into()));
    }

    let image_data: Vec<BlockBasedImage> = (0..header.cmpc)
        .map(|i| BlockBasedImage::new(header.cmp_info[i].bch, header.cmp_info[i].bcv))
        .collect();

    let mut result = JpegReadResult {
        image_data,
        header,
        raw_header,
        garbage_data: Vec::new(),
        partitions: Vec::new(),
        max_dpos: [0; MAX_COMPONENTS],
        early_eof: false,
        pad_bit: None,
    };

    if result.header.jpeg_type == JpegType::Sequential {
        let consumed = read_baseline_scan(&data[pos..], &mut result)?;
        result.garbage_data = data[pos + consumed..].to_vec();
    } else {
        read_progressive_scans(data, pos, &mut result)?;
    }

    Ok(result)
}

/// Strictly walks marker segments from `*pos`, mirroring the bytes into
/// `raw_header`, until a SOS (returns true) or an EOI (returns false; the
/// EOI bytes are not kept in `raw_header`). `first` selects the initial
/// header parse where an EOI is malformed.
fn parse_live_segments(
    header: &mut JpegHeader,
    data: &[u8],
    pos: &mut usize,
    raw_header: &mut Vec<u8>,
    first: bool,
) -> Result<bool> {
    loop {
        if *pos + 2 > data.len() {
            return Err(Error::UnsupportedJpeg("truncated marker".into()));
        }
        let marker = [data[*pos], data[*pos + 1]];
        *pos += 2;

        if marker[0] != 0xFF {
            return Err(Error::UnsupportedJpeg("invalid marker".into()));
        }

        let marker_type = marker[1];

        if marker_type == MARKER_EOI {
            if first {
                return Err(Error::UnsupportedJpeg("unexpected EOI marker".into()));
            }
            return Ok(false);
        }

        raw_header.extend_from_slice(&marker);

        if *pos + 2 > data.len() {
            return Err(Error::UnsupportedJpeg("truncated segment length".into()));
        }
        let segment_len = (usize::from(data[*pos]) << 8) | usize::from(data[*pos + 1]);
        if segment_len < 2 {
            return Err(Error::UnsupportedJpeg("segment too short".into()));
        }
        raw_header.extend_from_slice(&data[*pos..*pos + 2]);

        if *pos + segment_len > data.len() {
            return Err(Error::UnsupportedJpeg("truncated segment".into()));
        }
        let segment_data = &data[*pos + 2..*pos + segment_len];
        raw_header.extend_from_slice(segment_data);
        *pos += segment_len;

        match marker_type {
            MARKER_SOF0 | MARKER_SOF1 => {
                jpeg_header::parse_sof(header, segment_data, JpegType::Sequential)?;
            }
            MARKER_SOF2 => {
                jpeg_header::parse_sof(header, segment_data, JpegType::Progressive)?;
            }
            MARKER_DHT => jpeg_header::parse_dht(header, segment_data)?,
            MARKER_DQT => jpeg_header::parse_dqt(header, segment_data)?,
            MARKER_DRI => jpeg_header::parse_dri(header, segment_data)?,
            MARKER_SOS => {
                jpeg_header::parse_sos(header, segment_data)?;
                return Ok(true);
            }
            _ => {} // APP/COM and unknown segments pass through unchanged
        }
    }
}

/// Reads the single baseline scan. Returns the number of scan bytes
/// consumed; the remainder is trailing garbage.
fn read_baseline_scan(scan_data: &[u8], result: &mut JpegReadResult) -> Result<usize> {
    let header = &result.header;
    let mut bit_reader = BitReader::new(scan_data);

    let mut state = JpegPositionState::new(header, 0);

    let mut last_dc = [0i16; MAX_COMPONENTS];
    let mut do_handoff = true;

    loop {
        state.reset_rstw(header);

        loop {
            // Partition descriptors are captured at MCU row boundaries so
            // the scan can later be split across workers.
            if do_handoff {
                let (overhang_bits, overhang_byte) = bit_reader.overhang();
                let mcu_y = state.mcu() / header.mcuh;
                let luma_mul = header.cmp_info[0].bcv / header.mcuv;

                result.partitions.push(JpegPartition {
                    position: bit_reader.stream_position(),
                    overhang_byte,
                    num_overhang_bits: overhang_bits,
                    last_dc,
                    luma_y_start: luma_mul * mcu_y,
                    luma_y_end: luma_mul * (mcu_y + 1),
                });
                do_handoff = false;
            }

            if !bit_reader.is_eof() {
                let cmp = state.cmp();
                if state.dpos() > result.max_dpos[cmp] {
                    result.max_dpos[cmp] = state.dpos();
                }
            }

            let (block, eob) = decode_block_seq(&mut bit_reader, header, state.cmp())?;

            if eob > 1 && block[eob - 1] == 0 {
                return Err(Error::UnsupportedJpeg(
                    "cannot encode image with eob after last 0".into(),
                ));
            }

            let cmp = state.cmp();
            let mut block = block;
            block[0] = block[0].wrapping_add(last_dc[cmp]);
            last_dc[cmp] = block[0];

            result.image_data[cmp].set_block_by_dpos(state.dpos(), AlignedBlock::from_zigzag(&block));

            let old_mcu = state.mcu();
            let sta = state.next_mcu_pos(header);

            if state.mcu() % header.mcuh == 0 && old_mcu != state.mcu() {
                do_handoff = true;
            }

            if bit_reader.is_eof() {
                warn!("early EOF in baseline scan at dpos {}", state.dpos());
                result.early_eof = true;
                return Ok(scan_data.len() - bit_reader.remaining().len());
            }

            match sta {
                JpegDecodeStatus::ScanCompleted => {
                    if result.pad_bit.is_none() {
                        bit_reader.read_and_verify_fill_bits(&mut result.pad_bit)?;
                    }
                    return Ok(scan_data.len() - bit_reader.remaining().len());
                }
                JpegDecodeStatus::RestartIntervalExpired => {
                    bit_reader.read_and_verify_fill_bits(&mut result.pad_bit)?;
                    bit_reader.verify_reset_code()?;
                    last_dc = [0; MAX_COMPONENTS];
                    break;
                }
                JpegDecodeStatus::DecodeInProgress => {}
            }
        }
    }
}

/// Decodes one baseline block in zigzag order. Returns the block and the
/// position the EOB landed on.
fn decode_block_seq(
    bit_reader: &mut BitReader<'_>,
    header: &JpegHeader,
    cmp: usize,
) -> Result<([i16; 64], usize)> {
    let mut block = [0i16; 64];
    let mut eob = 64usize;

    let ci = &header.cmp_info[cmp];
    let dc_table = header.huff_dc[usize::from(ci.huff_dc)]
        .as_ref()
        .ok_or_else(|| Error::UnsupportedJpeg("missing DC Huffman table".into()))?;
    let ac_table = header.huff_ac[usize::from(ci.huff_ac)]
        .as_ref()
        .ok_or_else(|| Error::UnsupportedJpeg("missing AC Huffman table".into()))?;

    block[0] = read_dc(bit_reader, dc_table)?;

    let mut pos = 1usize;
    while pos < 64 {
        let hc = next_huff_code(bit_reader, ac_table)?;

        if hc == 0 {
            eob = pos;
            break;
        }

        let z = usize::from(hc >> 4);
        let s = hc & 0x0F;

        if s == 0 {
            // ZRL: sixteen zeros.
            if z + pos >= 64 {
                if !bit_reader.is_eof() {
                    return Err(Error::UnsupportedJpeg(
                        "run length exceeds block boundary".into(),
                    ));
                }
                break;
            }
            pos += z;
            pos += 1;
            continue;
        }

        if z + pos >= 64 {
            if !bit_reader.is_eof() {
                return Err(Error::UnsupportedJpeg(
                    "run length exceeds block boundary".into(),
                ));
            }
            break;
        }

        pos += z;
        let bits = bit_reader.read(u32::from(s))?;
        block[pos] = decode_vli(s, bits);
        pos += 1;
    }

    Ok((block, eob))
}

fn read_dc(bit_reader: &mut BitReader<'_>, table: &HuffmanTable) -> Result<i16> {
    let code = next_huff_code(bit_reader, table)?;

    if code == 0 {
        return Ok(0);
    }

    let bits = bit_reader.read(u32::from(code))?;
    Ok(decode_vli(code, bits))
}

/// Signed VLI: a value whose top bit is clear encodes a negative number.
fn decode_vli(size: u8, bits: u16) -> i16 {
    if size == 0 {
        return 0;
    }
    if u32::from(bits) < (1u32 << (size - 1)) {
        (i32::from(bits) - ((1i32 << size) - 1)) as i16
    } else {
        bits as i16
    }
}

fn decode_eobrun_bits(s: u8, n: u16) -> u16 {
    n + (1 << s)
}

/// Reads all scans of a progressive JPEG starting at `pos` (just past the
/// first SOS).
fn read_progressive_scans(data: &[u8], mut pos: usize, result: &mut JpegReadResult) -> Result<()> {
    // The first scan must be the DC first stage.
    pos += read_progressive_first_scan(&data[pos..], result)?;

    loop {
        // Header bytes between scans accumulate onto the raw header.
        let mut raw = Vec::new();
        let more_scans = parse_live_segments(&mut result.header, data, &mut pos, &mut raw, false)?;
        result.raw_header.extend_from_slice(&raw);

        if !more_scans {
            // EOI reached; it and anything after it is garbage data.
            result.garbage_data = Vec::with_capacity(2 + data.len() - pos);
            result.garbage_data.extend_from_slice(&EOI);
            result.garbage_data.extend_from_slice(&data[pos..]);
            return Ok(());
        }

        pos += read_progressive_scan(&data[pos..], result)?;
    }
}

fn read_progressive_first_scan(scan_data: &[u8], result: &mut JpegReadResult) -> Result<usize> {
    let header = &result.header;

    if header.cs_to != 0 || header.cs_sah != 0 {
        return Err(Error::UnsupportedJpeg(
            "progressive JPEG must start with DC first stage".into(),
        ));
    }

    for &cmp_idx in &header.scan_component_order {
        if header.huff_dc[usize::from(header.cmp_info[cmp_idx].huff_dc)].is_none() {
            return Err(Error::UnsupportedJpeg(
                "missing DC Huffman table for progressive scan".into(),
            ));
        }
    }

    let mut bit_reader = BitReader::new(scan_data);
    let mut state = JpegPositionState::new(header, 0);
    let mut do_handoff = true;

    let mut last_dc = [0i16; MAX_COMPONENTS];
    let mut sta = JpegDecodeStatus::DecodeInProgress;

    while sta != JpegDecodeStatus::ScanCompleted {
        state.reset_rstw(header);

        while sta == JpegDecodeStatus::DecodeInProgress {
            if do_handoff {
                let (overhang_bits, overhang_byte) = bit_reader.overhang();
                let mcu_y = state.mcu() / header.mcuh;
                let luma_mul = header.cmp_info[0].bcv / header.mcuv;

                result.partitions.push(JpegPartition {
                    position: bit_reader.stream_position(),
                    overhang_byte,
                    num_overhang_bits: overhang_bits,
                    last_dc,
                    luma_y_start: luma_mul * mcu_y,
                    luma_y_end: luma_mul * (mcu_y + 1),
                });
                do_handoff = false;
            }

            let cmp = state.cmp();
            let dc_table = header.huff_dc[usize::from(header.cmp_info[cmp].huff_dc)]
                .as_ref()
                .ok_or_else(|| Error::UnsupportedJpeg("missing DC Huffman table".into()))?;
            let dc_coef = read_dc(&mut bit_reader, dc_table)?;

            let v = dc_coef.wrapping_add(last_dc[cmp]);
            last_dc[cmp] = v;

            let block = result.image_data[cmp].ensure_block(state.dpos());
            block.set_transposed_from_zigzag(0, ((i32::from(v)) << header.cs_sal) as i16);

            let old_mcu = state.mcu();
            sta = state.next_mcu_pos(header);

            if state.mcu() % header.mcuh == 0 && old_mcu != state.mcu() {
                do_handoff = true;
            }
        }

        bit_reader.read_and_verify_fill_bits(&mut result.pad_bit)?;

        if sta == JpegDecodeStatus::RestartIntervalExpired {
            bit_reader.verify_reset_code()?;
            last_dc = [0; MAX_COMPONENTS];
            sta = JpegDecodeStatus::DecodeInProgress;
        }
    }

    Ok(scan_data.len() - bit_reader.remaining().len())
}

/// Reads one refinement or AC scan. Returns bytes consumed.
fn read_progressive_scan(scan_data: &[u8], result: &mut JpegReadResult) -> Result<usize> {
    let header = &result.header;

    if header.cs_to == 0 {
        if header.cs_sah == 0 {
            return Err(Error::UnsupportedJpeg(
                "progressive can't have two DC first stages".into(),
            ));
        }
        return read_progressive_dc_refine(scan_data, result);
    }

    if header.cs_from == 0 || header.cs_to >= 64 || header.cs_from > header.cs_to {
        return Err(Error::UnsupportedJpeg(format!(
            "progressive encoding range was invalid {} to {}",
            header.cs_from, header.cs_to
        )));
    }

    if header.scan_component_order.len() != 1 {
        return Err(Error::UnsupportedJpeg(
            "progressive AC encoding cannot be interleaved".into(),
        ));
    }

    let cmp_idx = header.scan_component_order[0];
    if header.huff_ac[usize::from(header.cmp_info[cmp_idx].huff_ac)].is_none() {
        return Err(Error::UnsupportedJpeg(
            "missing AC Huffman table for progressive scan".into(),
        ));
    }

    if header.cs_sah == 0 {
        read_progressive_ac_first(scan_data, result)
    } else {
        read_progressive_ac_refine(scan_data, result)
    }
}

fn read_progressive_dc_refine(scan_data: &[u8], result: &mut JpegReadResult) -> Result<usize> {
    let header = &result.header;
    let mut bit_reader = BitReader::new(scan_data);
    let mut state = JpegPositionState::new(header, 0);
    let mut sta = JpegDecodeStatus::DecodeInProgress;

    while sta != JpegDecodeStatus::ScanCompleted {
        state.reset_rstw(header);

        while sta == JpegDecodeStatus::DecodeInProgress {
            let cmp = state.cmp();
            let bit = bit_reader.read(1)?;

            let block = result.image_data[cmp].ensure_block(state.dpos());
            let current = block.get_transposed_from_zigzag(0);
            let delta = ((i32::from(bit)) << header.cs_sal) as i16;
            block.set_transposed_from_zigzag(0, current.wrapping_add(delta));

            sta = state.next_mcu_pos(header);
        }

        bit_reader.read_and_verify_fill_bits(&mut result.pad_bit)?;

        if sta == JpegDecodeStatus::RestartIntervalExpired {
            bit_reader.verify_reset_code()?;
            sta = JpegDecodeStatus::DecodeInProgress;
        }
    }

    Ok(scan_data.len() - bit_reader.remaining().len())
}

fn read_progressive_ac_first(scan_data: &[u8], result: &mut JpegReadResult) -> Result<usize> {
    let header = &result.header;
    let cmp_idx = header.scan_component_order[0];
    let ac_table = header.huff_ac[usize::from(header.cmp_info[cmp_idx].huff_ac)]
        .as_ref()
        .ok_or_else(|| Error::UnsupportedJpeg("missing AC Huffman table".into()))?;
    let table_max_eob_run = max_eob_run(ac_table);

    let mut bit_reader = BitReader::new(scan_data);
    let mut state = JpegPositionState::new(header, 0);
    let mut sta = JpegDecodeStatus::DecodeInProgress;

    while sta != JpegDecodeStatus::ScanCompleted {
        state.reset_rstw(header);

        while sta == JpegDecodeStatus::DecodeInProgress {
            let cmp = state.cmp();
            let dpos = state.dpos();

            if state.eobrun == 0 {
                let block = result.image_data[cmp].ensure_block(dpos);
                let eob = decode_ac_progressive_first(
                    &mut bit_reader,
                    ac_table,
                    block,
                    &mut state,
                    header.cs_from,
                    header.cs_to,
                    header.cs_sal,
                )?;

                state.check_optimal_eobrun(eob == header.cs_from, table_max_eob_run)?;
            }

            sta = state.skip_eobrun(header)?;

            if sta == JpegDecodeStatus::DecodeInProgress {
                sta = state.next_mcu_pos(header);
            }
        }

        bit_reader.read_and_verify_fill_bits(&mut result.pad_bit)?;

        if sta == JpegDecodeStatus::RestartIntervalExpired {
            bit_reader.verify_reset_code()?;
            sta = JpegDecodeStatus::DecodeInProgress;
        }
    }

    Ok(scan_data.len() - bit_reader.remaining().len())
}

fn decode_ac_progressive_first(
    bit_reader: &mut BitReader<'_>,
    ac_table: &HuffmanTable,
    block: &mut AlignedBlock,
    state: &mut JpegPositionState,
    cs_from: u8,
    cs_to: u8,
    cs_sal: u8,
) -> Result<u8> {
    let mut bpos = cs_from;

    while bpos <= cs_to {
        let hc = next_huff_code(bit_reader, ac_table)?;

        let l = hc >> 4;
        let r = hc & 0x0F;

        if l == 15 || r > 0 {
            if l + bpos > cs_to {
                return Err(Error::UnsupportedJpeg("AC run length too long".into()));
            }

            // The skipped positions are already zero.
            bpos += l;

            let bits = bit_reader.read(u32::from(r))?;
            let coef = decode_vli(r, bits);

            block.set_transposed_from_zigzag(
                usize::from(bpos),
                ((i32::from(coef)) << cs_sal) as i16,
            );
            bpos += 1;
        } else {
            let n = bit_reader.read(u32::from(l))?;
            state.eobrun = decode_eobrun_bits(l, n);
            state.eobrun -= 1;
            break;
        }
    }

    Ok(bpos)
}

fn read_progressive_ac_refine(scan_data: &[u8], result: &mut JpegReadResult) -> Result<usize> {
    let header = &result.header;
    let cmp_idx = header.scan_component_order[0];
    let ac_table = header.huff_ac[usize::from(header.cmp_info[cmp_idx].huff_ac)]
        .as_ref()
        .ok_or_else(|| Error::UnsupportedJpeg("missing AC Huffman table".into()))?;
    let table_max_eob_run = max_eob_run(ac_table);

    let mut bit_reader = BitReader::new(scan_data);
    let mut state = JpegPositionState::new(header, 0);
    let mut sta = JpegDecodeStatus::DecodeInProgress;

    let cs_from = header.cs_from;
    let cs_to = header.cs_to;
    let cs_sal = header.cs_sal;

    while sta != JpegDecodeStatus::ScanCompleted {
        state.reset_rstw(header);

        while sta == JpegDecodeStatus::DecodeInProgress {
            let cmp = state.cmp();
            let dpos = state.dpos();

            // Work in a temp block holding the current band values so the
            // edit pass stays a plain loop; the caller merges the result
            // back with the successive-approximation shift.
            let mut temp_block = [0i16; 64];
            {
                let block = result.image_data[cmp].ensure_block(dpos);
                for bpos in cs_from..=cs_to {
                    temp_block[usize::from(bpos)] =
                        block.get_transposed_from_zigzag(usize::from(bpos));
                }
            }

            if state.eobrun == 0 {
                let eob = decode_ac_progressive_refine(
                    &mut bit_reader,
                    ac_table,
                    &mut temp_block,
                    &mut state,
                    cs_from,
                    cs_to,
                )?;

                state.check_optimal_eobrun(eob == cs_from, table_max_eob_run)?;
            } else {
                decode_eobrun_refine(&mut bit_reader, &mut temp_block, &mut state, cs_from, cs_to)?;
            }

            // Merge the corrections into the real block.
            let block = result.image_data[cmp].ensure_block(dpos);
            for bpos in cs_from..=cs_to {
                let current = block.get_transposed_from_zigzag(usize::from(bpos));
                let delta = ((i32::from(temp_block[usize::from(bpos)])) << cs_sal) as i16;
                block.set_transposed_from_zigzag(usize::from(bpos), current.wrapping_add(delta));
            }

            // Every block needs its correction bits, even inside an EOB run.
            sta = state.next_mcu_pos(header);
        }

        bit_reader.read_and_verify_fill_bits(&mut result.pad_bit)?;

        if sta == JpegDecodeStatus::RestartIntervalExpired {
            bit_reader.verify_reset_code()?;
            sta = JpegDecodeStatus::DecodeInProgress;
        }
    }

    Ok(scan_data.len() - bit_reader.remaining().len())
}

/// The AC refinement edit pass: either inserts one new ±1 coefficient after
/// a run of zeros, or emits correction bits for already non-zero positions.
/// Returns the position of the EOB.
fn decode_ac_progressive_refine(
    bit_reader: &mut BitReader<'_>,
    ac_table: &HuffmanTable,
    temp_block: &mut [i16; 64],
    state: &mut JpegPositionState,
    cs_from: u8,
    cs_to: u8,
) -> Result<u8> {
    let mut bpos = cs_from;
    let mut eob = cs_to;

    while bpos <= cs_to {
        let hc = next_huff_code(bit_reader, ac_table)?;

        let l = hc >> 4;
        let r = hc & 0x0F;

        if l == 15 || r > 0 {
            let mut z = l;
            let v: i16 = match r {
                0 => 0,
                1 => {
                    if bit_reader.read(1)? == 0 {
                        -1
                    } else {
                        1
                    }
                }
                _ => {
                    return Err(Error::UnsupportedJpeg(
                        "invalid coefficient size in AC refinement".into(),
                    ));
                }
            };

            loop {
                let current = temp_block[usize::from(bpos)];
                if current == 0 {
                    if z > 0 {
                        z -= 1;
                    } else {
                        temp_block[usize::from(bpos)] = v;
                        bpos += 1;
                        break;
                    }
                } else {
                    let n = bit_reader.read(1)?;
                    temp_block[usize::from(bpos)] = if current > 0 { n as i16 } else { -(n as i16) };
                }

                if bpos >= cs_to {
                    return Err(Error::UnsupportedJpeg("AC refinement decoding error".into()));
                }
                bpos += 1;
            }
        } else {
            eob = bpos;
            let n = bit_reader.read(u32::from(l))?;
            state.eobrun = decode_eobrun_bits(l, n);

            // Past the EOB only correction bits remain.
            decode_eobrun_refine_range(bit_reader, temp_block, bpos, cs_to)?;
            state.eobrun -= 1;
            break;
        }
    }

    Ok(eob)
}

fn decode_eobrun_refine(
    bit_reader: &mut BitReader<'_>,
    temp_block: &mut [i16; 64],
    state: &mut JpegPositionState,
    from: u8,
    to: u8,
) -> Result<()> {
    decode_eobrun_refine_range(bit_reader, temp_block, from, to)?;
    state.eobrun -= 1;
    Ok(())
}

fn decode_eobrun_refine_range(
    bit_reader: &mut BitReader<'_>,
    temp_block: &mut [i16; 64],
    from: u8,
    to: u8,
) -> Result<()> {
    for bpos in from..=to {
        if temp_block[usize::from(bpos)] != 0 {
            let n = bit_reader.read(1)?;
            temp_block[usize::from(bpos)] = if temp_block[usize::from(bpos)] > 0 {
                n as i16
            } else {
                -(n as i16)
            };
        }
    }
    Ok(())
}
