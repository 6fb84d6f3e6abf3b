// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::consts::*;
use crate::error::{Error, Result};
use crate::jpeg::component::ComponentInfo;
use crate::jpeg::huffman::HuffmanTable;
use crate::util::tracing_wrappers::*;

/// Everything parsed from the JPEG headers up to (and including) a SOS
/// marker: frame geometry, tables, and the current scan's parameters.
#[derive(Debug, Clone)]
pub struct JpegHeader {
    pub jpeg_type: JpegType,
    pub cmp_info: [ComponentInfo; MAX_COMPONENTS],
    /// Component count.
    pub cmpc: usize,
    /// Quantization tables in zigzag order as stored in DQT.
    pub q_tables: [[u16; 64]; 4],
    pub huff_dc: [Option<HuffmanTable>; 4],
    pub huff_ac: [Option<HuffmanTable>; 4],
    pub height: u32,
    pub width: u32,
    /// MCU counts and pixel dimensions.
    pub mcuh: u32,
    pub mcuv: u32,
    pub mcu_width: u32,
    pub mcu_height: u32,
    pub restart_interval: u16,
    pub max_sfh: u32,
    pub max_sfv: u32,
    /// Indices into `cmp_info` in the order the current scan codes them.
    pub scan_component_order: Vec<usize>,
    /// Spectral selection start (Ss), inclusive.
    pub cs_from: u8,
    /// Spectral selection end (Se), inclusive.
    pub cs_to: u8,
    /// Successive approximation high bit (Ah).
    pub cs_sah: u8,
    /// Successive approximation low bit (Al).
    pub cs_sal: u8,
    /// Compatibility switches for the DC predictor arithmetic width.
    pub use_16bit_dc_estimate: bool,
    pub use_16bit_adv_predict: bool,
}

impl Default for JpegHeader {
    fn default() -> Self {
        JpegHeader {
            jpeg_type: JpegType::Unknown,
            cmp_info: [ComponentInfo::default(); MAX_COMPONENTS],
            cmpc: 0,
            q_tables: [[0; 64]; 4],
            huff_dc: [None, None, None, None],
            huff_ac: [None, None, None, None],
            height: 0,
            width: 0,
            mcuh: 0,
            mcuv: 0,
            mcu_width: 0,
            mcu_height: 0,
            restart_interval: 0,
            max_sfh: 0,
            max_sfv: 0,
            scan_component_order: Vec::new(),
            cs_from: 0,
            cs_to: 0,
            cs_sah: 0,
            cs_sal: 0,
            use_16bit_dc_estimate: false,
            use_16bit_adv_predict: false,
        }
    }
}

impl JpegHeader {
    pub fn new() -> Self {
        JpegHeader {
            use_16bit_dc_estimate: true,
            use_16bit_adv_predict: true,
            ..Default::default()
        }
    }
}

fn be16(data: &[u8], pos: usize) -> Result<usize> {
    if pos + 2 > data.len() {
        return Err(Error::UnsupportedJpeg("segment length out of bounds".into()));
    }
    Ok((usize::from(data[pos]) << 8) | usize::from(data[pos + 1]))
}

/// Parses a SOF payload (without the 2-byte length) and derives the MCU
/// geometry and per-component block counts.
pub fn parse_sof(header: &mut JpegHeader, data: &[u8], jpeg_type: JpegType) -> Result<()> {
    if data.len() < 6 {
        return Err(Error::UnsupportedJpeg("SOF segment too short".into()));
    }

    if header.jpeg_type != JpegType::Unknown {
        return Err(Error::UnsupportedJpeg("multiple SOF markers".into()));
    }

    header.jpeg_type = jpeg_type;

    let precision = data[0];
    if precision != 8 {
        return Err(Error::UnsupportedJpeg(format!(
            "{precision} bit precision not supported"
        )));
    }

    header.height = (u32::from(data[1]) << 8) | u32::from(data[2]);
    header.width = (u32::from(data[3]) << 8) | u32::from(data[4]);
    header.cmpc = usize::from(data[5]);

    if header.height == 0 || header.width == 0 {
        return Err(Error::UnsupportedJpeg("image dimensions cannot be zero".into()));
    }

    if header.cmpc > MAX_COMPONENTS {
        return Err(Error::UnsupportedJpeg(format!(
            "image has {} components, max 4 supported",
            header.cmpc
        )));
    }

    let mut pos = 6;
    for cmp in 0..header.cmpc {
        if pos + 3 > data.len() {
            return Err(Error::UnsupportedJpeg("SOF segment too short for components".into()));
        }

        let ci = &mut header.cmp_info[cmp];
        ci.jid = data[pos];
        ci.sfh = u32::from(data[pos + 1] >> 4);
        ci.sfv = u32::from(data[pos + 1] & 0x0F);

        if ci.sfh > 2 || ci.sfv > 2 {
            return Err(Error::SamplingBeyondTwoUnsupported);
        }
        if ci.sfh == 0 || ci.sfv == 0 {
            return Err(Error::UnsupportedJpeg("zero sampling factor".into()));
        }

        let q_table_idx = data[pos + 2];
        if q_table_idx >= 4 {
            return Err(Error::UnsupportedJpeg("quantization table index too big".into()));
        }
        ci.q_table_index = q_table_idx;

        pos += 3;
    }

    header.max_sfh = 1;
    header.max_sfv = 1;
    for cmp in 0..header.cmpc {
        header.max_sfh = header.max_sfh.max(header.cmp_info[cmp].sfh);
        header.max_sfv = header.max_sfv.max(header.cmp_info[cmp].sfv);
    }

    header.mcu_width = header.max_sfh * 8;
    header.mcu_height = header.max_sfv * 8;
    header.mcuh = header.width.div_ceil(header.mcu_width);
    header.mcuv = header.height.div_ceil(header.mcu_height);

    for cmp in 0..header.cmpc {
        let max_sfh = header.max_sfh;
        let max_sfv = header.max_sfv;
        let mcuh = header.mcuh;
        let mcuv = header.mcuv;
        let width = header.width;
        let height = header.height;

        let ci = &mut header.cmp_info[cmp];
        ci.mbs = ci.sfh * ci.sfv;
        ci.bch = mcuh * ci.sfh;
        ci.bcv = mcuv * ci.sfv;
        ci.bc = ci.bch * ci.bcv;
        ci.nch = (width * ci.sfh).div_ceil(max_sfh * 8);
        ci.ncv = (height * ci.sfv).div_ceil(max_sfv * 8);
        ci.nc = ci.nch * ci.ncv;
    }

    debug!(
        "SOF: {}x{}, {} components, {}x{} MCUs",
        header.width, header.height, header.cmpc, header.mcuh, header.mcuv
    );

    Ok(())
}

/// Parses a DHT payload; a single segment may define several tables.
pub fn parse_dht(header: &mut JpegHeader, data: &[u8]) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let table_class = (data[pos] >> 4) & 0x0F;
        let table_id = usize::from(data[pos] & 0x0F);
        pos += 1;

        if table_class > 1 || table_id > 3 {
            return Err(Error::UnsupportedJpeg("invalid Huffman table index".into()));
        }

        if pos + 16 > data.len() {
            return Err(Error::UnsupportedJpeg("DHT segment too short".into()));
        }

        let mut table = HuffmanTable::default();
        let mut total_symbols = 0usize;
        for i in 1..=16 {
            table.num_codes[i] = data[pos + i - 1];
            total_symbols += usize::from(table.num_codes[i]);
        }
        pos += 16;

        if pos + total_symbols > data.len() || total_symbols > 256 {
            return Err(Error::UnsupportedJpeg("DHT segment too short for symbols".into()));
        }

        table.symbols[..total_symbols].copy_from_slice(&data[pos..pos + total_symbols]);
        pos += total_symbols;

        table.build_derived_table();

        if table_class == 0 {
            header.huff_dc[table_id] = Some(table);
        } else {
            header.huff_ac[table_id] = Some(table);
        }
    }

    Ok(())
}

/// Parses a DQT payload (8 or 16-bit entries) in zigzag order.
pub fn parse_dqt(header: &mut JpegHeader, data: &[u8]) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let precision = (data[pos] >> 4) & 0x0F;
        let table_id = usize::from(data[pos] & 0x0F);
        pos += 1;

        if table_id > 3 {
            return Err(Error::UnsupportedJpeg("invalid quantization table index".into()));
        }

        if precision == 0 {
            if pos + 64 > data.len() {
                return Err(Error::UnsupportedJpeg("DQT segment too short".into()));
            }
            for i in 0..64 {
                header.q_tables[table_id][i] = u16::from(data[pos + i]);
            }
            pos += 64;
        } else {
            if pos + 128 > data.len() {
                return Err(Error::UnsupportedJpeg("DQT segment too short".into()));
            }
            for i in 0..64 {
                header.q_tables[table_id][i] =
                    (u16::from(data[pos + i * 2]) << 8) | u16::from(data[pos + i * 2 + 1]);
            }
            pos += 128;
        }
    }

    Ok(())
}

pub fn parse_dri(header: &mut JpegHeader, data: &[u8]) -> Result<()> {
    if data.len() < 2 {
        return Err(Error::UnsupportedJpeg("DRI segment too short".into()));
    }
    header.restart_interval = (u16::from(data[0]) << 8) | u16::from(data[1]);
    Ok(())
}

/// Parses a SOS payload: the scan's component order, table assignments and
/// spectral selection parameters.
pub fn parse_sos(header: &mut JpegHeader, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Error::UnsupportedJpeg("SOS segment too short".into()));
    }

    let num_components = usize::from(data[0]);
    if num_components == 0 {
        return Err(Error::UnsupportedJpeg("zero components in scan".into()));
    }
    if num_components > header.cmpc {
        return Err(Error::UnsupportedJpeg("too many components in scan".into()));
    }

    if data.len() < 1 + num_components * 2 + 3 {
        return Err(Error::UnsupportedJpeg("SOS segment too short for components".into()));
    }

    header.scan_component_order = Vec::with_capacity(num_components);

    let mut pos = 1;
    for _ in 0..num_components {
        let component_id = data[pos];
        let cmp_idx = (0..header.cmpc)
            .find(|&j| header.cmp_info[j].jid == component_id)
            .ok_or_else(|| Error::UnsupportedJpeg("component ID mismatch in SOS".into()))?;

        header.scan_component_order.push(cmp_idx);
        header.cmp_info[cmp_idx].huff_dc = (data[pos + 1] >> 4) & 0x0F;
        header.cmp_info[cmp_idx].huff_ac = data[pos + 1] & 0x0F;

        pos += 2;
    }

    header.cs_from = data[pos];
    header.cs_to = data[pos + 1];
    header.cs_sah = (data[pos + 2] >> 4) & 0x0F;
    header.cs_sal = data[pos + 2] & 0x0F;

    Ok(())
}

/// Parses the raw header bytes stored in a lepton container (which exclude
/// SOI) up to and including the first SOS. Non-marker bytes are skipped, so
/// APP/COM payloads pass through untouched. Returns the header and the read
/// index just past the SOS segment.
pub fn parse_stored_header(data: &[u8]) -> Result<(JpegHeader, usize)> {
    let mut header = JpegHeader::new();
    let pos = parse_stored_segments(&mut header, data, 0)?;
    Ok((header, pos))
}

/// Continues parsing stored header bytes from `start`, updating tables and
/// scan parameters, stopping after the next SOS. Returns the new read index.
pub fn parse_stored_segments(header: &mut JpegHeader, data: &[u8], start: usize) -> Result<usize> {
    let mut pos = start;

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
            MARKER_SOI => {}
            MARKER_EOI => return Ok(pos),
            MARKER_SOF0 | MARKER_SOF1 | MARKER_SOF2 => {
                let length = be16(data, pos)?;
                let jpeg_type = if marker == MARKER_SOF2 {
                    JpegType::Progressive
                } else {
                    JpegType::Sequential
                };
                if pos + length > data.len() || length < 2 {
                    return Err(Error::UnsupportedJpeg("SOF segment out of bounds".into()));
                }
                parse_sof(header, &data[pos + 2..pos + length], jpeg_type)?;
                pos += length;
            }
            MARKER_DQT => {
                let length = be16(data, pos)?;
                if pos + length > data.len() || length < 2 {
                    return Err(Error::UnsupportedJpeg("DQT segment out of bounds".into()));
                }
                parse_dqt(header, &data[pos + 2..pos + length])?;
                pos += length;
            }
            MARKER_DHT => {
                let length = be16(data, pos)?;
                if pos + length > data.len() || length < 2 {
                    return Err(Error::UnsupportedJpeg("DHT segment out of bounds".into()));
                }
                parse_dht(header, &data[pos + 2..pos + length])?;
                pos += length;
            }
            MARKER_DRI => {
                let length = be16(data, pos)?;
                if pos + length > data.len() || length < 4 {
                    return Err(Error::UnsupportedJpeg("DRI segment out of bounds".into()));
                }
                parse_dri(header, &data[pos + 2..pos + length])?;
                pos += length;
            }
            MARKER_SOS => {
                let length = be16(data, pos)?;
                if pos + length > data.len() || length < 2 {
                    return Err(Error::UnsupportedJpeg("SOS segment out of bounds".into()));
                }
                parse_sos(header, &data[pos + 2..pos + length])?;
                pos += length;
                return Ok(pos);
            }
            _ => {
                if pos + 2 <= data.len() {
                    let length = be16(data, pos)?;
                    pos += length;
                }
            }
        }
    }

    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_gray_header() -> Vec<u8> {
        let mut h = Vec::new();
        // DQT, table 0, all ones
        h.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        h.extend_from_slice(&[1u8; 64]);
        // SOF0: 8-bit, 16x8, one component id 1, sampling 1x1, qtable 0
        h.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 8, 0, 8, 0, 16, 1, 1, 0x11, 0]);
        // DHT: DC table 0 with a single 1-bit code for symbol 0
        h.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x00]);
        h.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        h.push(0);
        // AC table 0 with a single 1-bit code for symbol 0 (EOB)
        h.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x10]);
        h.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        h.push(0);
        // SOS
        h.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 0, 63, 0]);
        h
    }

    #[test]
    fn parses_minimal_header() {
        let raw = minimal_gray_header();
        let (header, read_index) = parse_stored_header(&raw).unwrap();

        assert_eq!(header.jpeg_type, JpegType::Sequential);
        assert_eq!(header.width, 16);
        assert_eq!(header.height, 8);
        assert_eq!(header.cmpc, 1);
        assert_eq!(header.mcuh, 2);
        assert_eq!(header.mcuv, 1);
        assert_eq!(header.cmp_info[0].bch, 2);
        assert_eq!(header.cmp_info[0].bcv, 1);
        assert_eq!(header.cmp_info[0].nch, 2);
        assert_eq!(header.scan_component_order, vec![0]);
        assert_eq!(header.cs_to, 63);
        assert!(header.huff_dc[0].is_some());
        assert!(header.huff_ac[0].is_some());
        assert_eq!(read_index, raw.len());
    }

    #[test]
    fn rejects_wide_sampling() {
        let mut header = JpegHeader::new();
        // 3x1 sampling on the single component
        let sof = [8, 0, 8, 0, 8, 1, 1, 0x31, 0];
        assert!(matches!(
            parse_sof(&mut header, &sof, JpegType::Sequential),
            Err(Error::SamplingBeyondTwoUnsupported)
        ));
    }

    #[test]
    fn subsampled_geometry() {
        let mut header = JpegHeader::new();
        // 16x16, YCbCr 2x2 / 1x1 / 1x1
        let sof = [8, 0, 16, 0, 16, 3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1];
        parse_sof(&mut header, &sof, JpegType::Sequential).unwrap();

        assert_eq!(header.mcu_width, 16);
        assert_eq!(header.mcu_height, 16);
        assert_eq!(header.mcuh, 1);
        assert_eq!(header.mcuv, 1);
        assert_eq!(header.cmp_info[0].bch, 2);
        assert_eq!(header.cmp_info[0].bcv, 2);
        assert_eq!(header.cmp_info[0].mbs, 4);
        assert_eq!(header.cmp_info[1].bch, 1);
        assert_eq!(header.cmp_info[1].bcv, 1);
        assert_eq!(header.cmp_info[1].nch, 1);
    }
}
