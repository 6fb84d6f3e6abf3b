// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Reconstructs the original JPEG bytes from decoded coefficient blocks:
//! the deterministic inverse of the scan reader. Restart markers, pad bits,
//! trailing RST markers, early-EOF truncation and partitioned re-encoding
//! all follow the recovery information captured at encode time.

use std::io::Write;

use crate::consts::*;
use crate::error::{Error, Result};
use crate::image::{AlignedBlock, BlockBasedImage};
use crate::jpeg::bit_writer::BitWriter;
use crate::jpeg::huffman::HuffmanEncodeTable;
use crate::jpeg::jpeg_header::{self, JpegHeader};
use crate::container::header::LeptonHeader;
use crate::util::tracing_wrappers::*;

/// Writes the complete JPEG for `header` to `output`.
pub fn write_jpeg<W: Write>(
    header: &mut LeptonHeader,
    images: &[BlockBasedImage],
    output: &mut W,
) -> Result<()> {
    if !header.recovery.prefix_garbage.is_empty() {
        output.write_all(&header.recovery.prefix_garbage)?;
    }

    // SOI is not part of the stored raw header.
    output.write_all(&SOI)?;

    if header.jpeg_type == JpegType::Progressive {
        write_progressive_jpeg(header, images, output)
    } else {
        write_baseline_jpeg(header, images, output)
    }
}

/// Huffman state for one scan: the encode tables derived from the current
/// DHT set, the bit buffer, and the running DC predictors.
struct ScanEncoder {
    bit_writer: BitWriter,
    dc_codes: [Option<HuffmanEncodeTable>; 4],
    ac_codes: [Option<HuffmanEncodeTable>; 4],
    last_dc: [i16; MAX_COMPONENTS],
}

impl ScanEncoder {
    fn new(jh: &JpegHeader) -> Self {
        let mut enc = ScanEncoder {
            bit_writer: BitWriter::new(65536),
            dc_codes: [None, None, None, None],
            ac_codes: [None, None, None, None],
            last_dc: [0; MAX_COMPONENTS],
        };
        enc.rebuild_tables(jh);
        enc
    }

    fn rebuild_tables(&mut self, jh: &JpegHeader) {
        for i in 0..4 {
            self.dc_codes[i] = jh.huff_dc[i].as_ref().map(HuffmanEncodeTable::from_decode_table);
            self.ac_codes[i] = jh.huff_ac[i].as_ref().map(HuffmanEncodeTable::from_decode_table);
        }
    }

    fn reset_dc(&mut self) {
        self.last_dc = [0; MAX_COMPONENTS];
    }

    /// Huffman-encodes one block (DC differentially, then the AC runs).
    fn write_block(&mut self, jh: &JpegHeader, block: &AlignedBlock, cmp: usize) -> Result<()> {
        let zigzag = block.zigzag_from_transposed();

        let dc = zigzag[0];
        let dc_diff = dc.wrapping_sub(self.last_dc[cmp]);
        self.last_dc[cmp] = dc;

        let dc_table = self.dc_codes[usize::from(jh.cmp_info[cmp].huff_dc)]
            .as_ref()
            .ok_or_else(|| Error::BadLeptonFile("missing DC Huffman table".into()))?;
        encode_dc(&mut self.bit_writer, dc_diff, dc_table);

        let ac_table = self.ac_codes[usize::from(jh.cmp_info[cmp].huff_ac)]
            .as_ref()
            .ok_or_else(|| Error::BadLeptonFile("missing AC Huffman table".into()))?;
        encode_ac(&mut self.bit_writer, &zigzag, ac_table);

        Ok(())
    }

    fn pad(&mut self, recovery_pad_bit: Option<u8>) {
        self.bit_writer.pad(recovery_pad_bit.unwrap_or(0xFF));
    }
}

fn bit_length_i16(v: i16) -> u8 {
    let mut abs = v.unsigned_abs();
    let mut len = 0u8;
    while abs > 0 {
        len += 1;
        abs >>= 1;
    }
    len
}

fn encode_dc(bit_writer: &mut BitWriter, diff: i16, table: &HuffmanEncodeTable) {
    let category = bit_length_i16(diff);

    bit_writer.write(
        u32::from(table.codes[usize::from(category)]),
        u32::from(table.lengths[usize::from(category)]),
    );

    if category > 0 {
        let additional_bits = if diff >= 0 {
            diff as u32
        } else {
            (diff.wrapping_sub(1) as u32) & ((1 << category) - 1)
        };
        bit_writer.write(additional_bits & ((1 << category) - 1), u32::from(category));
    }
}

fn encode_ac(bit_writer: &mut BitWriter, zigzag: &[i16; 64], table: &HuffmanEncodeTable) {
    let mut zero_run_length = 0usize;

    for &coef in zigzag.iter().skip(1) {
        if coef == 0 {
            zero_run_length += 1;
            continue;
        }

        while zero_run_length >= 16 {
            bit_writer.write(u32::from(table.codes[0xF0]), u32::from(table.lengths[0xF0]));
            zero_run_length -= 16;
        }

        write_coef(bit_writer, table, coef, zero_run_length);
        zero_run_length = 0;
    }

    if zero_run_length > 0 {
        bit_writer.write(u32::from(table.codes[0x00]), u32::from(table.lengths[0x00]));
    }
}

fn write_coef(bit_writer: &mut BitWriter, table: &HuffmanEncodeTable, coef: i16, zero_run_length: usize) {
    let category = bit_length_i16(coef);

    let symbol = ((zero_run_length as u8) << 4) | category;
    bit_writer.write(
        u32::from(table.codes[usize::from(symbol)]),
        u32::from(table.lengths[usize::from(symbol)]),
    );

    if category > 0 {
        let additional_bits = if coef >= 0 {
            coef as u32
        } else {
            (coef.wrapping_sub(1) as u32) & ((1 << category) - 1)
        };
        bit_writer.write(additional_bits & ((1 << category) - 1), u32::from(category));
    }
}

/// Divides by `2^p` rounding toward zero, as progressive JPEG requires.
fn div_pow2(v: i16, p: u8) -> i16 {
    if p == 0 {
        return v;
    }
    let mut val = i32::from(v);
    if val < 0 {
        val += (1 << p) - 1;
    }
    (val >> p) as i16
}

/// Output stage that caps the scan bytes for early-EOF files. A negative
/// `max_scan_bytes` means unlimited.
struct LimitedSink<'a, W: Write> {
    output: &'a mut W,
    max_scan_bytes: i64,
    bytes_written: i64,
    reached_limit: bool,
}

impl<'a, W: Write> LimitedSink<'a, W> {
    fn new(output: &'a mut W, max_scan_bytes: i64) -> Self {
        LimitedSink {
            output,
            max_scan_bytes,
            bytes_written: 0,
            reached_limit: false,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() || self.reached_limit {
            return Ok(());
        }
        let mut data = data;
        if self.max_scan_bytes >= 0 {
            let remaining = self.max_scan_bytes - self.bytes_written;
            if remaining <= 0 {
                self.reached_limit = true;
                return Ok(());
            }
            if data.len() as i64 > remaining {
                data = &data[..remaining as usize];
                self.reached_limit = true;
            }
        }
        self.output.write_all(data)?;
        self.bytes_written += data.len() as i64;
        Ok(())
    }
}

fn all_zeros(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

fn write_baseline_jpeg<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    output: &mut W,
) -> Result<()> {
    let header_to_write = &header.raw_jpeg_header[..header.raw_jpeg_header_read_index];
    output.write_all(header_to_write)?;

    // For truncated files the scan output must be capped so that the final
    // all-zero padding of the original file can be recreated around it.
    let mut max_scan_bytes = -1i64;
    if header.recovery.early_eof_encountered {
        let prefix_len = header.recovery.prefix_garbage.len() as i64;
        let header_len = header.raw_jpeg_header_read_index as i64;
        let remaining_header_len =
            (header.raw_jpeg_header.len() - header.raw_jpeg_header_read_index) as i64;

        // All-zero garbage is part of the zero padding, not separate bytes.
        let garbage_len = if all_zeros(&header.recovery.garbage_data) {
            0
        } else {
            header.recovery.garbage_data.len() as i64
        };

        max_scan_bytes = i64::from(header.original_file_size)
            - prefix_len
            - SOI.len() as i64
            - header_len
            - remaining_header_len
            - garbage_len;
    }
    if max_scan_bytes < 0 && header.thread_handoffs.len() == 1 {
        let segment_size = header.thread_handoffs[0].segment_size;
        if segment_size > 0 {
            max_scan_bytes = i64::from(segment_size);
        }
    }

    let mut enc = ScanEncoder::new(&header.jpeg_header);

    // Partitioned paths track the slack of the last segment, which decides
    // whether trailing RST markers still need to be appended.
    let mut last_segment_slack = 0i64;
    let mut used_partitioned_path = false;

    let num_scan_components = header.jpeg_header.scan_component_order.len();
    if num_scan_components == 1 {
        if !header.recovery.early_eof_encountered && header.thread_handoffs.len() > 1 {
            used_partitioned_path = true;
            last_segment_slack =
                write_scan_data_partitioned_non_interleaved(header, images, &mut enc, output)?;
        } else {
            write_scan_data_non_interleaved(header, images, &mut enc, output, max_scan_bytes)?;
        }
    } else if !header.recovery.early_eof_encountered && header.thread_handoffs.len() > 1 {
        used_partitioned_path = true;
        last_segment_slack = write_scan_data_partitioned(header, images, &mut enc, output)?;
    } else {
        write_scan_data(header, images, &mut enc, output, max_scan_bytes)?;
    }

    // Extra RST markers recorded past the natural scan end. On partitioned
    // paths a full final segment already contains them in-band.
    let mut write_rst_err = !header.recovery.rst_err.is_empty();
    if used_partitioned_path && last_segment_slack == 0 {
        write_rst_err = false;
    }

    if write_rst_err {
        let jh = &header.jpeg_header;
        let mut cumulative_reset_markers = 0u8;
        if jh.restart_interval != 0 {
            let mcuc = jh.mcuh * jh.mcuv;
            cumulative_reset_markers = (((mcuc - 1) / u32::from(jh.restart_interval)) & 0xFF) as u8;
        }
        for i in 0..usize::from(header.recovery.rst_err[0]) {
            let rst = MARKER_RST0 + (cumulative_reset_markers.wrapping_add(i as u8) & 7);
            output.write_all(&[0xFF, rst])?;
        }
    }

    // Header segments past the scan (files with trailing header data).
    if header.raw_jpeg_header_read_index < header.raw_jpeg_header.len() {
        output.write_all(&header.raw_jpeg_header[header.raw_jpeg_header_read_index..])?;
    }

    // Trailing garbage (normally at least the EOI). For early-EOF files with
    // all-zero garbage, the zero padding covers it.
    if !header.recovery.garbage_data.is_empty() {
        let skip_garbage =
            header.recovery.early_eof_encountered && all_zeros(&header.recovery.garbage_data);
        if !skip_garbage {
            output.write_all(&header.recovery.garbage_data)?;
        }
    }

    Ok(())
}

/// Interleaved baseline scan, non-partitioned.
fn write_scan_data<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    output: &mut W,
    max_scan_bytes: i64,
) -> Result<()> {
    let jh = &header.jpeg_header;
    let restart_interval = u32::from(jh.restart_interval);
    let early_eof = header.recovery.early_eof_encountered;
    let all_zeros_garbage = all_zeros(&header.recovery.garbage_data);

    let mut sink = LimitedSink::new(output, max_scan_bytes);

    let mut mcu_count = 0u32;
    let mut restart_marker_idx = 0usize;

    enc.reset_dc();

    'mcu_loop: for mcu_y in 0..jh.mcuv {
        for mcu_x in 0..jh.mcuh {
            if sink.reached_limit {
                break 'mcu_loop;
            }

            // Truncated file: stop once every component is past its last
            // coded block.
            if early_eof && mcu_entirely_past_eof(jh, &header.recovery.max_dpos, mcu_x, mcu_y) {
                break 'mcu_loop;
            }

            for &cmp in &jh.scan_component_order {
                let ci = &jh.cmp_info[cmp];

                for v in 0..ci.sfv {
                    for h in 0..ci.sfh {
                        let block_x = mcu_x * ci.sfh + h;
                        let block_y = mcu_y * ci.sfv + v;

                        if early_eof {
                            let dpos = block_y * ci.bch + block_x;
                            if dpos > header.recovery.max_dpos[cmp] {
                                continue;
                            }
                        }

                        let block = images[cmp].get_block_xy(block_x, block_y);
                        enc.write_block(jh, block, cmp)?;
                    }
                }
            }

            mcu_count += 1;

            if restart_interval > 0 && mcu_count >= restart_interval {
                enc.pad(header.recovery.pad_bit);
                let data = enc.bit_writer.detach_buffer();
                sink.write(&data)?;

                // RST goes out unless it would land inside the reserved
                // zero-padding tail of a truncated file.
                if mcu_y < jh.mcuv - 1 || mcu_x < jh.mcuh - 1 {
                    let mut write_rst = true;

                    if early_eof && all_zeros_garbage {
                        let mut next_mcu_x = mcu_x + 1;
                        let mut next_mcu_y = mcu_y;
                        if next_mcu_x >= jh.mcuh {
                            next_mcu_x = 0;
                            next_mcu_y += 1;
                        }
                        if next_mcu_y < jh.mcuv
                            && mcu_entirely_past_eof(
                                jh,
                                &header.recovery.max_dpos,
                                next_mcu_x,
                                next_mcu_y,
                            )
                        {
                            write_rst = false;
                        }

                        if write_rst && max_scan_bytes > 0 {
                            let padding_threshold = rst_padding_threshold(max_scan_bytes);
                            if sink.bytes_written + 2 > max_scan_bytes - padding_threshold {
                                write_rst = false;
                            }
                        }
                    }

                    if write_rst {
                        let rst = [0xFF, MARKER_RST0 + ((restart_marker_idx as u8) & 7)];
                        sink.write(&rst)?;
                        restart_marker_idx += 1;
                    }
                }

                enc.reset_dc();
                mcu_count = 0;
            }
        }
    }

    enc.pad(header.recovery.pad_bit);
    let data = enc.bit_writer.detach_buffer();
    sink.write(&data)?;

    Ok(())
}

/// Reserved tail where RST markers are suppressed on truncated files: the
/// thresholds are empirical, matching the reference encoder.
fn rst_padding_threshold(max_scan_bytes: i64) -> i64 {
    if max_scan_bytes > 10000 {
        256
    } else {
        max_scan_bytes * 30 / 100
    }
}

/// Whether any coded (non-padding) block position follows `dpos`.
fn has_coded_blocks_after(ci: &crate::jpeg::component::ComponentInfo, dpos: u32) -> bool {
    for d in dpos + 1..ci.bch * ci.bcv {
        if d % ci.bch < ci.nch && d / ci.bch < ci.ncv {
            return true;
        }
    }
    false
}

fn mcu_entirely_past_eof(
    jh: &JpegHeader,
    max_dpos: &[u32; MAX_COMPONENTS],
    mcu_x: u32,
    mcu_y: u32,
) -> bool {
    for &cmp in &jh.scan_component_order {
        let ci = &jh.cmp_info[cmp];
        let block_x = mcu_x * ci.sfh;
        let block_y = mcu_y * ci.sfv;
        let dpos = block_y * ci.bch + block_x;
        if dpos <= max_dpos[cmp] {
            return false;
        }
    }
    true
}

/// Single-component baseline scan, non-partitioned. Restart intervals count
/// coded blocks here rather than MCUs.
fn write_scan_data_non_interleaved<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    output: &mut W,
    max_scan_bytes: i64,
) -> Result<()> {
    let jh = &header.jpeg_header;
    let restart_interval = u32::from(jh.restart_interval);
    let early_eof = header.recovery.early_eof_encountered;
    let all_zeros_garbage = all_zeros(&header.recovery.garbage_data);

    let mut sink = LimitedSink::new(output, max_scan_bytes);

    let cmp = jh.scan_component_order[0];
    let ci = &jh.cmp_info[cmp];
    let total_blocks = ci.bch * ci.bcv;

    let mut block_count = 0u32;
    let mut restart_marker_idx = 0usize;

    enc.reset_dc();

    for dpos in 0..total_blocks {
        let block_x = dpos % ci.bch;
        let block_y = dpos / ci.bch;

        // Padding blocks outside the natural dimensions are never coded.
        if block_x >= ci.nch || block_y >= ci.ncv {
            continue;
        }

        let block = images[cmp].get_block_xy(block_x, block_y);
        enc.write_block(jh, block, cmp)?;

        block_count += 1;
        if restart_interval > 0 && block_count >= restart_interval {
            enc.pad(header.recovery.pad_bit);
            let data = enc.bit_writer.detach_buffer();
            sink.write(&data)?;

            if !sink.reached_limit {
                // No marker after the final coded block: the scan simply
                // ends there and any recorded extra RSTs follow separately.
                let mut write_rst = has_coded_blocks_after(ci, dpos);
                if early_eof && all_zeros_garbage && max_scan_bytes >= 0 {
                    let padding_threshold = rst_padding_threshold(max_scan_bytes);
                    if sink.bytes_written + 2 > max_scan_bytes - padding_threshold {
                        write_rst = false;
                    }
                }

                if write_rst {
                    let rst = [0xFF, MARKER_RST0 + ((restart_marker_idx as u8) & 7)];
                    sink.write(&rst)?;
                    restart_marker_idx += 1;
                }
            }

            enc.reset_dc();
            block_count = 0;
        }
    }

    enc.pad(header.recovery.pad_bit);
    let data = enc.bit_writer.detach_buffer();
    sink.write(&data)?;

    Ok(())
}

/// Interleaved baseline scan split across thread handoffs. Each partition
/// re-encodes its MCU rows primed with the stored overhang, and the output
/// is truncated to the recorded segment size. Returns the last segment's
/// slack.
fn write_scan_data_partitioned<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    output: &mut W,
) -> Result<i64> {
    let jh = &header.jpeg_header;
    if jh.cmpc == 0 {
        return Ok(0);
    }

    let luma_sfv = jh.cmp_info[0].sfv;
    if luma_sfv == 0 {
        return Err(Error::BadLeptonFile("invalid luma sampling factor".into()));
    }

    let mut last_segment_slack = 0i64;
    for (idx, handoff) in header.thread_handoffs.iter().enumerate() {
        enc.bit_writer
            .reset_from_overhang(handoff.overhang_byte, u32::from(handoff.num_overhang_bits));

        enc.reset_dc();
        for i in 0..jh.cmpc.min(MAX_COMPONENTS) {
            enc.last_dc[i] = handoff.last_dc[i];
        }

        let mcu_y_start = handoff.luma_y_start / luma_sfv;
        let mcu_y_end = (handoff.luma_y_end / luma_sfv).min(jh.mcuv);

        let pad_at_end = idx == header.thread_handoffs.len() - 1;
        let mut buf = encode_scan_mcu_range(header, images, enc, mcu_y_start, mcu_y_end, pad_at_end)?;

        last_segment_slack = i64::from(handoff.segment_size) - buf.len() as i64;
        if (handoff.segment_size as usize) < buf.len() {
            buf.truncate(handoff.segment_size as usize);
        }
        output.write_all(&buf)?;
    }

    Ok(last_segment_slack)
}

/// Non-interleaved variant of the partitioned path.
fn write_scan_data_partitioned_non_interleaved<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    output: &mut W,
) -> Result<i64> {
    let jh = &header.jpeg_header;
    if jh.cmpc == 0 {
        return Ok(0);
    }
    if jh.scan_component_order.len() != 1 {
        return Err(Error::BadLeptonFile(
            "invalid scan component order for non-interleaved baseline".into(),
        ));
    }

    let cmp = jh.scan_component_order[0];
    let ci = jh.cmp_info[cmp];

    let mut last_segment_slack = 0i64;
    for (idx, handoff) in header.thread_handoffs.iter().enumerate() {
        enc.bit_writer
            .reset_from_overhang(handoff.overhang_byte, u32::from(handoff.num_overhang_bits));

        enc.reset_dc();
        for i in 0..jh.cmpc.min(MAX_COMPONENTS) {
            enc.last_dc[i] = handoff.last_dc[i];
        }

        let start_dpos = handoff.luma_y_start * ci.bch;
        let end_dpos = (handoff.luma_y_end * ci.bch).min(ci.bc);

        let pad_at_end = idx == header.thread_handoffs.len() - 1;
        let mut buf =
            encode_scan_dpos_range(header, images, enc, cmp, start_dpos, end_dpos, pad_at_end)?;

        last_segment_slack = i64::from(handoff.segment_size) - buf.len() as i64;
        if (handoff.segment_size as usize) < buf.len() {
            buf.truncate(handoff.segment_size as usize);
        }
        output.write_all(&buf)?;
    }

    Ok(last_segment_slack)
}

fn encode_scan_dpos_range(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    cmp: usize,
    start_dpos: u32,
    end_dpos: u32,
    pad_at_end: bool,
) -> Result<Vec<u8>> {
    let jh = &header.jpeg_header;
    let ci = &jh.cmp_info[cmp];
    let restart_interval = u32::from(jh.restart_interval);

    let mut block_count = 0u32;
    let mut restart_marker_idx = 0u32;
    if restart_interval > 0 {
        restart_marker_idx = start_dpos / restart_interval;
        block_count = start_dpos % restart_interval;
    }

    for dpos in start_dpos..end_dpos {
        let block_x = dpos % ci.bch;
        let block_y = dpos / ci.bch;

        if block_x >= ci.nch || block_y >= ci.ncv {
            continue;
        }

        let block = images[cmp].get_block_xy(block_x, block_y);
        enc.write_block(jh, block, cmp)?;

        if restart_interval > 0 {
            block_count += 1;
            if block_count >= restart_interval {
                enc.pad(header.recovery.pad_bit);

                // An RST recorded as absent in the original (restart count
                // section) stays absent.
                let should_write_rst = header.recovery.rst_cnt.is_empty()
                    || !header.recovery.rst_cnt_set
                    || restart_marker_idx < header.recovery.rst_cnt[0];

                if should_write_rst {
                    enc.bit_writer.write_byte_unescaped(0xFF);
                    enc.bit_writer
                        .write_byte_unescaped(MARKER_RST0 + ((restart_marker_idx as u8) & 7));
                }
                restart_marker_idx += 1;

                enc.reset_dc();
                block_count = 0;
            }
        }
    }

    if pad_at_end {
        enc.pad(header.recovery.pad_bit);
    }

    Ok(enc.bit_writer.detach_buffer())
}

fn encode_scan_mcu_range(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    mcu_y_start: u32,
    mcu_y_end: u32,
    pad_at_end: bool,
) -> Result<Vec<u8>> {
    let jh = &header.jpeg_header;
    let restart_interval = u32::from(jh.restart_interval);

    let mut mcu_count = 0u32;
    let mut restart_marker_idx = 0u32;
    if restart_interval > 0 {
        let global_start = mcu_y_start * jh.mcuh;
        restart_marker_idx = global_start / restart_interval;
        mcu_count = global_start % restart_interval;
    }

    for mcu_y in mcu_y_start..mcu_y_end {
        for mcu_x in 0..jh.mcuh {
            for &cmp in &jh.scan_component_order {
                let ci = &jh.cmp_info[cmp];

                for v in 0..ci.sfv {
                    for h in 0..ci.sfh {
                        let block_x = mcu_x * ci.sfh + h;
                        let block_y = mcu_y * ci.sfv + v;

                        let block = images[cmp].get_block_xy(block_x, block_y);
                        enc.write_block(jh, block, cmp)?;
                    }
                }
            }

            if restart_interval > 0 {
                mcu_count += 1;
                if mcu_count >= restart_interval {
                    enc.pad(header.recovery.pad_bit);

                    let should_write_rst = header.recovery.rst_cnt.is_empty()
                        || !header.recovery.rst_cnt_set
                        || restart_marker_idx < header.recovery.rst_cnt[0];

                    if should_write_rst {
                        enc.bit_writer.write_byte_unescaped(0xFF);
                        enc.bit_writer
                            .write_byte_unescaped(MARKER_RST0 + ((restart_marker_idx as u8) & 7));
                    }
                    restart_marker_idx += 1;

                    enc.reset_dc();
                    mcu_count = 0;
                }
            }
        }
    }

    if pad_at_end {
        enc.pad(header.recovery.pad_bit);
    }

    Ok(enc.bit_writer.detach_buffer())
}

fn write_progressive_jpeg<W: Write>(
    header: &mut LeptonHeader,
    images: &[BlockBasedImage],
    output: &mut W,
) -> Result<()> {
    let header_to_write = &header.raw_jpeg_header[..header.raw_jpeg_header_read_index];
    output.write_all(header_to_write)?;

    let mut enc = ScanEncoder::new(&header.jpeg_header);

    loop {
        write_progressive_scan_data(header, images, &mut enc, output)?;

        let old_pos = header.raw_jpeg_header_read_index;
        let has_more = advance_next_header_segment(header, &mut enc)?;

        if !has_more {
            // Remaining header bytes (if any) precede the garbage data.
            if old_pos < header.raw_jpeg_header.len() {
                output.write_all(&header.raw_jpeg_header[old_pos..])?;
            }
            break;
        }

        // Inter-scan segments (DHT updates and the next SOS).
        output.write_all(&header.raw_jpeg_header[old_pos..header.raw_jpeg_header_read_index])?;
    }

    if !header.recovery.garbage_data.is_empty() {
        output.write_all(&header.recovery.garbage_data)?;
    }

    Ok(())
}

/// Replays the stored header up to the next SOS, updating the Huffman state
/// along the way. Returns false once the EOI (or the end of the stored
/// header) is reached.
fn advance_next_header_segment(header: &mut LeptonHeader, enc: &mut ScanEncoder) -> Result<bool> {
    let data = &header.raw_jpeg_header;
    let mut pos = header.raw_jpeg_header_read_index;

    while pos < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }

        if pos + 1 >= data.len() {
            break;
        }

        let marker = data[pos + 1];
        pos += 2;

        match marker {
            MARKER_EOI => {
                header.raw_jpeg_header_read_index = pos;
                return Ok(false);
            }
            MARKER_DHT => {
                let length = segment_length(data, pos)?;
                jpeg_header::parse_dht(&mut header.jpeg_header, &data[pos + 2..pos + length])?;
                enc.rebuild_tables(&header.jpeg_header);
                pos += length;
            }
            MARKER_SOS => {
                let length = segment_length(data, pos)?;
                jpeg_header::parse_sos(&mut header.jpeg_header, &data[pos + 2..pos + length])?;
                pos += length;
                header.raw_jpeg_header_read_index = pos;
                return Ok(true);
            }
            MARKER_DRI => {
                let length = segment_length(data, pos)?;
                jpeg_header::parse_dri(&mut header.jpeg_header, &data[pos + 2..pos + length])?;
                pos += length;
            }
            _ => {
                if pos + 2 <= data.len() {
                    let length = segment_length(data, pos)?;
                    pos += length;
                }
            }
        }
    }

    header.raw_jpeg_header_read_index = pos;
    Ok(false)
}

fn segment_length(data: &[u8], pos: usize) -> Result<usize> {
    if pos + 2 > data.len() {
        return Err(Error::BadLeptonFile("truncated header segment".into()));
    }
    let length = (usize::from(data[pos]) << 8) | usize::from(data[pos + 1]);
    if length < 2 || pos + length > data.len() {
        return Err(Error::BadLeptonFile("header segment out of bounds".into()));
    }
    Ok(length)
}

fn write_progressive_scan_data<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    output: &mut W,
) -> Result<()> {
    let jh = &header.jpeg_header;

    enc.reset_dc();

    let is_dc_only = jh.cs_to == 0;
    let is_first_stage = jh.cs_sah == 0;

    debug!(
        "progressive scan dc_only={} first_stage={} band {}..={} sal {}",
        is_dc_only, is_first_stage, jh.cs_from, jh.cs_to, jh.cs_sal
    );

    if jh.scan_component_order.len() == 1 {
        write_progressive_scan_non_interleaved(header, images, enc, output, is_dc_only, is_first_stage)
    } else {
        write_progressive_scan_interleaved(header, images, enc, output, is_dc_only, is_first_stage)
    }
}

fn write_progressive_scan_non_interleaved<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    output: &mut W,
    is_dc_only: bool,
    is_first_stage: bool,
) -> Result<()> {
    let jh = &header.jpeg_header;
    let cmp = jh.scan_component_order[0];
    let ci = &jh.cmp_info[cmp];

    let restart_interval = u32::from(jh.restart_interval);
    let mut block_count = 0u32;
    let mut restart_marker_idx = 0usize;
    let mut eob_run = 0u32;
    let mut correction_bits: Vec<u8> = Vec::new();

    let total_blocks = ci.bch * ci.bcv;

    for dpos in 0..total_blocks {
        let block_x = dpos % ci.bch;
        let block_y = dpos / ci.bch;

        if block_x >= ci.nch || block_y >= ci.ncv {
            continue;
        }

        let block = images[cmp].get_block_xy(block_x, block_y);

        if is_dc_only {
            if is_first_stage {
                encode_dc_first(enc, jh, block, cmp)?;
            } else {
                encode_dc_refine(enc, jh, block);
            }
        } else if is_first_stage {
            eob_run = encode_ac_first(enc, jh, block, cmp, eob_run)?;
        } else {
            eob_run = encode_ac_refine(enc, jh, block, cmp, eob_run, &mut correction_bits)?;
        }

        block_count += 1;

        if restart_interval > 0 && block_count >= restart_interval {
            if !is_dc_only && eob_run > 0 {
                encode_eob_run(enc, jh, cmp, eob_run)?;
                write_correction_bits(enc, &mut correction_bits);
                eob_run = 0;
            }

            enc.pad(header.recovery.pad_bit);
            let data = enc.bit_writer.detach_buffer();
            output.write_all(&data)?;

            if dpos < total_blocks - 1 {
                let rst = [0xFF, MARKER_RST0 + ((restart_marker_idx as u8) & 7)];
                output.write_all(&rst)?;
                restart_marker_idx += 1;
            }

            enc.reset_dc();
            eob_run = 0;
            correction_bits.clear();
            block_count = 0;
        }
    }

    if !is_dc_only && eob_run > 0 {
        encode_eob_run(enc, jh, cmp, eob_run)?;
        write_correction_bits(enc, &mut correction_bits);
    }

    enc.pad(header.recovery.pad_bit);
    let data = enc.bit_writer.detach_buffer();
    output.write_all(&data)?;

    Ok(())
}

fn write_progressive_scan_interleaved<W: Write>(
    header: &LeptonHeader,
    images: &[BlockBasedImage],
    enc: &mut ScanEncoder,
    output: &mut W,
    is_dc_only: bool,
    is_first_stage: bool,
) -> Result<()> {
    let jh = &header.jpeg_header;
    let restart_interval = u32::from(jh.restart_interval);
    let mut mcu_count = 0u32;
    let mut restart_marker_idx = 0usize;
    let mut eob_run = 0u32;
    let mut correction_bits: Vec<u8> = Vec::new();

    for mcu_y in 0..jh.mcuv {
        for mcu_x in 0..jh.mcuh {
            for &cmp in &jh.scan_component_order {
                let ci = &jh.cmp_info[cmp];

                for v in 0..ci.sfv {
                    for h in 0..ci.sfh {
                        let block_x = mcu_x * ci.sfh + h;
                        let block_y = mcu_y * ci.sfv + v;

                        let block = images[cmp].get_block_xy(block_x, block_y);

                        if is_dc_only {
                            if is_first_stage {
                                encode_dc_first(enc, jh, block, cmp)?;
                            } else {
                                encode_dc_refine(enc, jh, block);
                            }
                        } else if is_first_stage {
                            eob_run = encode_ac_first(enc, jh, block, cmp, eob_run)?;
                        } else {
                            eob_run =
                                encode_ac_refine(enc, jh, block, cmp, eob_run, &mut correction_bits)?;
                        }
                    }
                }
            }

            mcu_count += 1;

            if restart_interval > 0 && mcu_count >= restart_interval {
                if !is_dc_only && eob_run > 0 {
                    encode_eob_run(enc, jh, jh.scan_component_order[0], eob_run)?;
                    write_correction_bits(enc, &mut correction_bits);
                    eob_run = 0;
                }

                enc.pad(header.recovery.pad_bit);
                let data = enc.bit_writer.detach_buffer();
                output.write_all(&data)?;

                if mcu_y < jh.mcuv - 1 || mcu_x < jh.mcuh - 1 {
                    let rst = [0xFF, MARKER_RST0 + ((restart_marker_idx as u8) & 7)];
                    output.write_all(&rst)?;
                    restart_marker_idx += 1;
                }

                enc.reset_dc();
                mcu_count = 0;
                correction_bits.clear();
            }
        }
    }

    if !is_dc_only && eob_run > 0 {
        encode_eob_run(enc, jh, jh.scan_component_order[0], eob_run)?;
        write_correction_bits(enc, &mut correction_bits);
    }

    enc.pad(header.recovery.pad_bit);
    let data = enc.bit_writer.detach_buffer();
    output.write_all(&data)?;

    Ok(())
}

fn encode_dc_first(enc: &mut ScanEncoder, jh: &JpegHeader, block: &AlignedBlock, cmp: usize) -> Result<()> {
    let dc = block.raw_data[0];
    let shifted_dc = dc >> jh.cs_sal;

    let diff = shifted_dc.wrapping_sub(enc.last_dc[cmp]);
    enc.last_dc[cmp] = shifted_dc;

    let table = enc.dc_codes[usize::from(jh.cmp_info[cmp].huff_dc)]
        .as_ref()
        .ok_or_else(|| Error::BadLeptonFile("missing DC Huffman table".into()))?;
    encode_dc(&mut enc.bit_writer, diff, table);
    Ok(())
}

fn encode_dc_refine(enc: &mut ScanEncoder, jh: &JpegHeader, block: &AlignedBlock) {
    let dc = block.raw_data[0];
    let bit = (dc >> jh.cs_sal) & 1;
    enc.bit_writer.write(bit as u32, 1);
}

fn missing_ac_table() -> Error {
    Error::BadLeptonFile("missing AC Huffman table".into())
}

fn encode_ac_first(
    enc: &mut ScanEncoder,
    jh: &JpegHeader,
    block: &AlignedBlock,
    cmp: usize,
    mut eob_run: u32,
) -> Result<u32> {
    let zigzag = block.zigzag_from_transposed();
    let ac_idx = usize::from(jh.cmp_info[cmp].huff_ac);
    let max_eob_run = u32::from(enc.ac_codes[ac_idx].as_ref().ok_or_else(missing_ac_table)?.max_eob_run);

    let mut zero_run_length = 0usize;
    for i in usize::from(jh.cs_from)..=usize::from(jh.cs_to) {
        let coef = div_pow2(zigzag[i], jh.cs_sal);
        if coef != 0 {
            if eob_run > 0 {
                encode_eob_run(enc, jh, cmp, eob_run)?;
                eob_run = 0;
            }
            let table = enc.ac_codes[ac_idx].as_ref().ok_or_else(missing_ac_table)?;
            while zero_run_length >= 16 {
                enc.bit_writer
                    .write(u32::from(table.codes[0xF0]), u32::from(table.lengths[0xF0]));
                zero_run_length -= 16;
            }
            write_coef(&mut enc.bit_writer, table, coef, zero_run_length);
            zero_run_length = 0;
        } else {
            zero_run_length += 1;
        }
    }

    if zero_run_length > 0 {
        if max_eob_run == 0 {
            return Err(Error::UnsupportedJpeg("no EOB run symbol in Huffman table".into()));
        }
        eob_run += 1;
        if eob_run == max_eob_run {
            encode_eob_run(enc, jh, cmp, eob_run)?;
            eob_run = 0;
        }
    }

    Ok(eob_run)
}

fn encode_ac_refine(
    enc: &mut ScanEncoder,
    jh: &JpegHeader,
    block: &AlignedBlock,
    cmp: usize,
    mut eob_run: u32,
    correction_bits: &mut Vec<u8>,
) -> Result<u32> {
    let zigzag = block.zigzag_from_transposed();
    let ac_idx = usize::from(jh.cmp_info[cmp].huff_ac);
    let max_eob_run = u32::from(enc.ac_codes[ac_idx].as_ref().ok_or_else(missing_ac_table)?.max_eob_run);

    let from = usize::from(jh.cs_from);
    let to = usize::from(jh.cs_to);

    // The band's end-of-band: the last position whose refined value is a
    // fresh +/-1 in this pass.
    let mut eob = from;
    for bpos in (from..=to).rev() {
        let coef = div_pow2(zigzag[bpos], jh.cs_sal);
        if coef == 1 || coef == -1 {
            eob = bpos + 1;
            break;
        }
    }

    if eob > from && eob_run > 0 {
        encode_eob_run(enc, jh, cmp, eob_run)?;
        write_correction_bits(enc, correction_bits);
        eob_run = 0;
    }

    let mut zero_run_length = 0usize;
    for bpos in from..eob {
        let coef = div_pow2(zigzag[bpos], jh.cs_sal);
        if coef == 0 {
            zero_run_length += 1;
            if zero_run_length == 16 {
                let table = enc.ac_codes[ac_idx].as_ref().ok_or_else(missing_ac_table)?;
                enc.bit_writer
                    .write(u32::from(table.codes[0xF0]), u32::from(table.lengths[0xF0]));
                write_correction_bits(enc, correction_bits);
                zero_run_length = 0;
            }
            continue;
        }

        if coef == 1 || coef == -1 {
            let table = enc.ac_codes[ac_idx].as_ref().ok_or_else(missing_ac_table)?;
            write_coef(&mut enc.bit_writer, table, coef, zero_run_length);
            write_correction_bits(enc, correction_bits);
            zero_run_length = 0;
        } else {
            correction_bits.push((coef & 1) as u8);
        }
    }

    for bpos in eob..=to {
        let coef = div_pow2(zigzag[bpos], jh.cs_sal);
        if coef != 0 {
            correction_bits.push((coef & 1) as u8);
        }
    }

    if eob <= to {
        if max_eob_run == 0 {
            return Err(Error::UnsupportedJpeg("no EOB run symbol in Huffman table".into()));
        }
        eob_run += 1;
        if eob_run == max_eob_run {
            encode_eob_run(enc, jh, cmp, eob_run)?;
            write_correction_bits(enc, correction_bits);
            eob_run = 0;
        }
    }

    Ok(eob_run)
}

fn encode_eob_run(enc: &mut ScanEncoder, jh: &JpegHeader, cmp: usize, eob_run: u32) -> Result<()> {
    if eob_run == 0 {
        return Ok(());
    }

    let table = enc.ac_codes[usize::from(jh.cmp_info[cmp].huff_ac)]
        .as_ref()
        .ok_or_else(missing_ac_table)?;

    // EOBn: n is one less than the run's bit length.
    let mut category = 0u32;
    let mut temp = eob_run;
    while temp > 0 {
        category += 1;
        temp >>= 1;
    }
    category -= 1;

    let symbol = (category << 4) as usize;
    enc.bit_writer
        .write(u32::from(table.codes[symbol]), u32::from(table.lengths[symbol]));

    if category > 0 {
        let additional_bits = eob_run - (1 << category);
        enc.bit_writer.write(additional_bits, category);
    }

    Ok(())
}

fn write_correction_bits(enc: &mut ScanEncoder, bits: &mut Vec<u8>) {
    for &b in bits.iter() {
        enc.bit_writer.write(u32::from(b), 1);
    }
    bits.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_category_and_bits() {
        // Categories follow the JPEG VLI definition.
        assert_eq!(bit_length_i16(0), 0);
        assert_eq!(bit_length_i16(1), 1);
        assert_eq!(bit_length_i16(-1), 1);
        assert_eq!(bit_length_i16(2), 2);
        assert_eq!(bit_length_i16(-3), 2);
        assert_eq!(bit_length_i16(255), 8);
        assert_eq!(bit_length_i16(-1024), 11);
    }

    #[test]
    fn div_pow2_rounds_toward_zero() {
        assert_eq!(div_pow2(5, 1), 2);
        assert_eq!(div_pow2(-5, 1), -2);
        assert_eq!(div_pow2(-1, 1), 0);
        assert_eq!(div_pow2(7, 0), 7);
        assert_eq!(div_pow2(-8, 2), -2);
    }

    #[test]
    fn limited_sink_truncates_and_swallows() {
        let mut out = Vec::new();
        let mut sink = LimitedSink::new(&mut out, 5);
        sink.write(&[1, 2, 3]).unwrap();
        sink.write(&[4, 5, 6, 7]).unwrap();
        assert!(sink.reached_limit);
        sink.write(&[8]).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);

        let mut out = Vec::new();
        let mut sink = LimitedSink::new(&mut out, -1);
        sink.write(&[1, 2, 3]).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn rst_padding_thresholds() {
        assert_eq!(rst_padding_threshold(20000), 256);
        assert_eq!(rst_padding_threshold(1000), 300);
    }
}
