// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The lepton container header: a fixed 28-byte prefix followed by a
//! zlib-compressed list of tagged sections and a `CMP` completion marker.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::consts::*;
use crate::error::{Error, Result};
use crate::jpeg::jpeg_header::{self, JpegHeader};
use crate::util::tracing_wrappers::*;

/// Partition descriptor: the luma row band a worker covers, the size of its
/// re-encoded scan segment, the partial byte at its boundary and the DC
/// predictors entering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadHandoff {
    pub luma_y_start: u32,
    pub luma_y_end: u32,
    pub segment_size: u32,
    pub overhang_byte: u8,
    pub num_overhang_bits: u8,
    pub last_dc: [i16; MAX_COMPONENTS],
}

/// Recovery invariants needed to reproduce the original file byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct ReconstructionInfo {
    /// Pad bit (0x00 or 0xFF) once observed in the scan data.
    pub pad_bit: Option<u8>,
    /// Restart interval counts per scan segment (CRS section).
    pub rst_cnt: Vec<u32>,
    pub rst_cnt_set: bool,
    /// Extra RST markers appended past the natural scan end (FRS section).
    pub rst_err: Vec<u8>,
    /// Bytes after the end of the last scan; defaults to a bare EOI.
    pub garbage_data: Vec<u8>,
    /// Bytes before SOI.
    pub prefix_garbage: Vec<u8>,
    pub early_eof_encountered: bool,
    pub max_cmp: u32,
    pub max_bpos: u32,
    pub max_sah: u8,
    /// Highest valid block position per component for truncated files.
    pub max_dpos: [u32; MAX_COMPONENTS],
}

/// Parsed lepton file header.
pub struct LeptonHeader {
    pub version: u8,
    pub jpeg_type: JpegType,
    pub thread_count: u8,
    pub git_revision: u32,
    pub encoder_version: u8,
    pub use_16bit_dc_estimate: bool,
    pub use_16bit_adv_predict: bool,
    pub original_file_size: u32,
    /// Raw JPEG header bytes (without SOI).
    pub raw_jpeg_header: Vec<u8>,
    /// How much of `raw_jpeg_header` has been consumed; parsing stops after
    /// each SOS so progressive files advance scan by scan.
    pub raw_jpeg_header_read_index: usize,
    pub jpeg_header: JpegHeader,
    pub thread_handoffs: Vec<ThreadHandoff>,
    pub recovery: ReconstructionInfo,
}

impl LeptonHeader {
    pub fn new() -> Self {
        LeptonHeader {
            version: LEPTON_VERSION,
            jpeg_type: JpegType::Unknown,
            thread_count: 0,
            git_revision: 0,
            encoder_version: 0,
            use_16bit_dc_estimate: true,
            use_16bit_adv_predict: true,
            original_file_size: 0,
            raw_jpeg_header: Vec::new(),
            raw_jpeg_header_read_index: 0,
            jpeg_header: JpegHeader::new(),
            thread_handoffs: Vec::new(),
            recovery: ReconstructionInfo::default(),
        }
    }

    /// Reads and parses a header, consuming through the `CMP` marker.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<LeptonHeader> {
        let mut header = LeptonHeader::new();

        let mut fixed = [0u8; 28];
        reader.read_exact(&mut fixed).map_err(|_| Error::ShortRead)?;

        if fixed[0] != LEPTON_FILE_HEADER[0] || fixed[1] != LEPTON_FILE_HEADER[1] {
            return Err(Error::BadLeptonFile("invalid magic number".into()));
        }

        header.version = fixed[2];
        if header.version != LEPTON_VERSION {
            return Err(Error::VersionUnsupported(header.version));
        }

        header.jpeg_type = match fixed[3] {
            LEPTON_HEADER_BASELINE_JPEG_TYPE => JpegType::Sequential,
            LEPTON_HEADER_PROGRESSIVE_JPEG_TYPE => JpegType::Progressive,
            other => {
                return Err(Error::BadLeptonFile(format!(
                    "invalid JPEG type marker {other:#04x}"
                )));
            }
        };

        header.thread_count = fixed[4];
        if usize::from(header.thread_count) > MAX_PARTITIONS {
            return Err(Error::BadLeptonFile("too many partitions".into()));
        }

        // Bytes 8..20 either carry the extended 'MS' block or, in the legacy
        // layout, just a git revision with both compat flags implied on.
        if fixed[8] == b'M' && fixed[9] == b'S' {
            let flags = fixed[14];
            if flags & 0x80 != 0 {
                header.use_16bit_dc_estimate = flags & 0x01 != 0;
                header.use_16bit_adv_predict = flags & 0x02 != 0;
            }
            header.encoder_version = fixed[15];
            header.git_revision = u32::from_le_bytes([fixed[16], fixed[17], fixed[18], fixed[19]]);
        } else {
            header.git_revision = u32::from_le_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]);
        }

        header.original_file_size = u32::from_le_bytes([fixed[20], fixed[21], fixed[22], fixed[23]]);
        let compressed_header_size =
            u32::from_le_bytes([fixed[24], fixed[25], fixed[26], fixed[27]]) as usize;

        let mut compressed_header = vec![0u8; compressed_header_size];
        reader
            .read_exact(&mut compressed_header)
            .map_err(|_| Error::ShortRead)?;

        let mut decompressed = Vec::new();
        ZlibDecoder::new(&compressed_header[..])
            .read_to_end(&mut decompressed)
            .map_err(|e| Error::BadLeptonFile(format!("corrupt compressed header: {e}")))?;

        header.parse_sections(&decompressed)?;

        let mut cmp = [0u8; 3];
        reader.read_exact(&mut cmp).map_err(|_| Error::ShortRead)?;
        if cmp != LEPTON_HEADER_COMPLETION_MARKER {
            return Err(Error::BadLeptonFile("CMP marker not found".into()));
        }

        // The last partition's end row is implicit.
        if let Some(last) = header.thread_handoffs.last_mut() {
            last.luma_y_end = header.jpeg_header.cmp_info[0].bcv;
        }

        debug!(
            "lepton header: {:?}, {} partitions, original size {}",
            header.jpeg_type,
            header.thread_handoffs.len(),
            header.original_file_size
        );

        Ok(header)
    }

    fn parse_sections(&mut self, data: &[u8]) -> Result<()> {
        let mut pos = 0usize;

        while pos + 3 <= data.len() {
            let marker = [data[pos], data[pos + 1], data[pos + 2]];
            pos += 3;

            if marker == LEPTON_HEADER_MARKER {
                let size = read_u32(data, &mut pos)?;
                if pos + size > data.len() {
                    return Err(Error::BadLeptonFile("HDR data beyond end".into()));
                }
                self.raw_jpeg_header = data[pos..pos + size].to_vec();
                pos += size;

                let (jpeg_header, read_index) = jpeg_header::parse_stored_header(&self.raw_jpeg_header)?;
                self.jpeg_header = jpeg_header;
                self.raw_jpeg_header_read_index = read_index;
                self.jpeg_header.jpeg_type = self.jpeg_type;
                self.jpeg_header.use_16bit_dc_estimate = self.use_16bit_dc_estimate;
                self.jpeg_header.use_16bit_adv_predict = self.use_16bit_adv_predict;
            } else if marker[0] == LEPTON_HEADER_LUMA_SPLIT_MARKER[0]
                && marker[1] == LEPTON_HEADER_LUMA_SPLIT_MARKER[1]
            {
                // The third marker byte is the partition count.
                let num_threads = usize::from(marker[2]);
                let handoffs = parse_thread_handoffs(data, &mut pos, num_threads)?;
                self.thread_handoffs.extend_from_slice(&handoffs);
            } else if marker == LEPTON_HEADER_PAD_MARKER {
                if pos >= data.len() {
                    return Err(Error::BadLeptonFile("P0D section too short".into()));
                }
                self.recovery.pad_bit = Some(data[pos]);
                pos += 1;
            } else if marker == LEPTON_HEADER_GARBAGE_MARKER {
                let size = read_u32(data, &mut pos)?;
                if pos + size > data.len() {
                    return Err(Error::BadLeptonFile("GRB data beyond end".into()));
                }
                self.recovery.garbage_data = data[pos..pos + size].to_vec();
                pos += size;
            } else if marker == LEPTON_HEADER_PREFIX_GARBAGE_MARKER {
                let size = read_u32(data, &mut pos)?;
                if pos + size > data.len() {
                    return Err(Error::BadLeptonFile("PGR data beyond end".into()));
                }
                self.recovery.prefix_garbage = data[pos..pos + size].to_vec();
                pos += size;
            } else if marker == LEPTON_HEADER_JPG_RESTARTS_MARKER {
                let count = read_u32(data, &mut pos)?;
                self.recovery.rst_cnt_set = true;
                for _ in 0..count {
                    self.recovery.rst_cnt.push(read_u32(data, &mut pos)? as u32);
                }
            } else if marker == LEPTON_HEADER_JPG_RESTART_ERRORS_MARKER {
                let count = read_u32(data, &mut pos)?;
                if pos + count > data.len() {
                    return Err(Error::BadLeptonFile("FRS data beyond end".into()));
                }
                self.recovery.rst_err = data[pos..pos + count].to_vec();
                pos += count;
            } else if marker == LEPTON_HEADER_EARLY_EOF_MARKER {
                self.recovery.max_cmp = read_u32(data, &mut pos)? as u32;
                self.recovery.max_bpos = read_u32(data, &mut pos)? as u32;
                self.recovery.max_sah = read_u32(data, &mut pos)? as u8;
                for i in 0..MAX_COMPONENTS {
                    self.recovery.max_dpos[i] = read_u32(data, &mut pos)? as u32;
                }
                self.recovery.early_eof_encountered = true;
            } else {
                return Err(Error::BadLeptonFile(format!(
                    "unknown header marker {marker:02x?}"
                )));
            }
        }

        // No garbage section means the plain EOI the scan data stops before.
        if self.recovery.garbage_data.is_empty() {
            self.recovery.garbage_data = EOI.to_vec();
        }

        Ok(())
    }

    /// Writes the full container header including the `CMP` marker.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut sections = Vec::<u8>::new();
        {
            let mut c = Cursor::new(&mut sections);
            self.write_jpeg_header_section(&mut c)?;
            self.write_pad_bit_section(&mut c)?;
            self.write_luma_splits_section(&mut c)?;
            self.write_restarts_section(&mut c)?;
            self.write_restart_errors_section(&mut c)?;
            self.write_early_eof_section(&mut c)?;
            self.write_prefix_garbage_section(&mut c)?;
            self.write_garbage_section(&mut c)?;
        }

        let mut compressed = Vec::<u8>::new();
        {
            let mut encoder = ZlibEncoder::new(Cursor::new(&mut compressed), Compression::default());
            encoder.write_all(&sections)?;
            encoder.finish()?;
        }

        writer.write_all(&LEPTON_FILE_HEADER)?;
        writer.write_u8(LEPTON_VERSION)?;
        writer.write_u8(if self.jpeg_type == JpegType::Progressive {
            LEPTON_HEADER_PROGRESSIVE_JPEG_TYPE
        } else {
            LEPTON_HEADER_BASELINE_JPEG_TYPE
        })?;
        writer.write_u8(self.thread_handoffs.len() as u8)?;
        writer.write_all(&[0; 3])?;

        // The legacy format reserved these bytes for a git revision; the
        // extended layout marks itself with 'MS' and carries the section
        // list length plus the arithmetic-compatibility flags.
        writer.write_all(b"MS")?;
        writer.write_u32::<LittleEndian>(sections.len() as u32)?;
        writer.write_u8(
            0x80 | u8::from(self.use_16bit_dc_estimate) | (u8::from(self.use_16bit_adv_predict) << 1),
        )?;
        writer.write_u8(self.encoder_version)?;
        writer.write_u32::<LittleEndian>(self.git_revision)?;

        writer.write_u32::<LittleEndian>(self.original_file_size)?;
        writer.write_u32::<LittleEndian>(compressed.len() as u32)?;
        writer.write_all(&compressed)?;

        writer.write_all(&LEPTON_HEADER_COMPLETION_MARKER)?;

        Ok(())
    }

    fn write_jpeg_header_section<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&LEPTON_HEADER_MARKER)?;
        w.write_u32::<LittleEndian>(self.raw_jpeg_header.len() as u32)?;
        w.write_all(&self.raw_jpeg_header)?;
        Ok(())
    }

    fn write_pad_bit_section<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&LEPTON_HEADER_PAD_MARKER)?;
        w.write_u8(self.recovery.pad_bit.unwrap_or(0))?;
        Ok(())
    }

    fn write_luma_splits_section<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&LEPTON_HEADER_LUMA_SPLIT_MARKER)?;
        w.write_u8(self.thread_handoffs.len() as u8)?;
        for h in &self.thread_handoffs {
            w.write_u16::<LittleEndian>(h.luma_y_start as u16)?;
            w.write_u32::<LittleEndian>(h.segment_size)?;
            w.write_u8(h.overhang_byte)?;
            w.write_u8(h.num_overhang_bits)?;
            for i in 0..MAX_COMPONENTS {
                w.write_i16::<LittleEndian>(h.last_dc[i])?;
            }
        }
        Ok(())
    }

    fn write_restarts_section<W: Write>(&self, w: &mut W) -> Result<()> {
        if !self.recovery.rst_cnt.is_empty() {
            w.write_all(&LEPTON_HEADER_JPG_RESTARTS_MARKER)?;
            w.write_u32::<LittleEndian>(self.recovery.rst_cnt.len() as u32)?;
            for &c in &self.recovery.rst_cnt {
                w.write_u32::<LittleEndian>(c)?;
            }
        }
        Ok(())
    }

    fn write_restart_errors_section<W: Write>(&self, w: &mut W) -> Result<()> {
        if !self.recovery.rst_err.is_empty() {
            w.write_all(&LEPTON_HEADER_JPG_RESTART_ERRORS_MARKER)?;
            w.write_u32::<LittleEndian>(self.recovery.rst_err.len() as u32)?;
            w.write_all(&self.recovery.rst_err)?;
        }
        Ok(())
    }

    fn write_early_eof_section<W: Write>(&self, w: &mut W) -> Result<()> {
        if self.recovery.early_eof_encountered {
            w.write_all(&LEPTON_HEADER_EARLY_EOF_MARKER)?;
            w.write_u32::<LittleEndian>(self.recovery.max_cmp)?;
            w.write_u32::<LittleEndian>(self.recovery.max_bpos)?;
            w.write_u32::<LittleEndian>(u32::from(self.recovery.max_sah))?;
            for i in 0..MAX_COMPONENTS {
                w.write_u32::<LittleEndian>(self.recovery.max_dpos[i])?;
            }
        }
        Ok(())
    }

    fn write_prefix_garbage_section<W: Write>(&self, w: &mut W) -> Result<()> {
        if !self.recovery.prefix_garbage.is_empty() {
            w.write_all(&LEPTON_HEADER_PREFIX_GARBAGE_MARKER)?;
            w.write_u32::<LittleEndian>(self.recovery.prefix_garbage.len() as u32)?;
            w.write_all(&self.recovery.prefix_garbage)?;
        }
        Ok(())
    }

    fn write_garbage_section<W: Write>(&self, w: &mut W) -> Result<()> {
        let garbage: &[u8] = if self.recovery.garbage_data.is_empty() {
            &EOI
        } else {
            &self.recovery.garbage_data
        };
        w.write_all(&LEPTON_HEADER_GARBAGE_MARKER)?;
        w.write_u32::<LittleEndian>(garbage.len() as u32)?;
        w.write_all(garbage)?;
        Ok(())
    }
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<usize> {
    if *pos + 4 > data.len() {
        return Err(Error::BadLeptonFile("section truncated".into()));
    }
    let v = u32::from_le_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]]);
    *pos += 4;
    Ok(v as usize)
}

fn parse_thread_handoffs(
    data: &[u8],
    pos: &mut usize,
    num_threads: usize,
) -> Result<Vec<ThreadHandoff>> {
    const HANDOFF_SIZE: usize = 16;
    if *pos + num_threads * HANDOFF_SIZE > data.len() {
        return Err(Error::BadLeptonFile("thread handoff data too short".into()));
    }

    let mut handoffs = Vec::with_capacity(num_threads);
    let mut c = Cursor::new(&data[*pos..*pos + num_threads * HANDOFF_SIZE]);

    for _ in 0..num_threads {
        let mut h = ThreadHandoff {
            luma_y_start: u32::from(c.read_u16::<LittleEndian>()?),
            ..Default::default()
        };
        h.segment_size = c.read_u32::<LittleEndian>()?;
        h.overhang_byte = c.read_u8()?;
        h.num_overhang_bits = c.read_u8()?;
        for i in 0..MAX_COMPONENTS {
            h.last_dc[i] = c.read_i16::<LittleEndian>()?;
        }
        handoffs.push(h);
    }
    *pos += num_threads * HANDOFF_SIZE;

    // Each partition ends where the next begins; the caller fills the last.
    for i in 1..num_threads {
        handoffs[i - 1].luma_y_end = handoffs[i].luma_y_start;
    }

    Ok(handoffs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw_header() -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        h.extend_from_slice(&[1u8; 64]);
        h.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 8, 0, 8, 0, 8, 1, 1, 0x11, 0]);
        h.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x00]);
        h.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        h.push(0);
        h.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x10]);
        h.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        h.push(0);
        h.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 0, 63, 0]);
        h
    }

    fn sample_header() -> LeptonHeader {
        let mut h = LeptonHeader::new();
        h.jpeg_type = JpegType::Sequential;
        h.raw_jpeg_header = minimal_raw_header();
        h.original_file_size = 1234;
        h.thread_handoffs = vec![ThreadHandoff {
            luma_y_start: 0,
            luma_y_end: 0,
            segment_size: 99,
            overhang_byte: 0xA0,
            num_overhang_bits: 3,
            last_dc: [1, -2, 3, 0],
        }];
        h.recovery.pad_bit = Some(0xFF);
        h.recovery.garbage_data = vec![0xFF, 0xD9, 0x01, 0x02];
        h
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();

        let mut cursor = &buf[..];
        let parsed = LeptonHeader::read_from(&mut cursor).unwrap();
        assert!(cursor.is_empty());

        assert_eq!(parsed.jpeg_type, JpegType::Sequential);
        assert_eq!(parsed.original_file_size, 1234);
        assert_eq!(parsed.raw_jpeg_header, header.raw_jpeg_header);
        assert_eq!(parsed.thread_handoffs.len(), 1);
        let h = &parsed.thread_handoffs[0];
        assert_eq!(h.segment_size, 99);
        assert_eq!(h.overhang_byte, 0xA0);
        assert_eq!(h.num_overhang_bits, 3);
        assert_eq!(h.last_dc, [1, -2, 3, 0]);
        // Last partition end is filled from the parsed geometry.
        assert_eq!(h.luma_y_end, 1);
        assert_eq!(parsed.recovery.pad_bit, Some(0xFF));
        assert_eq!(parsed.recovery.garbage_data, vec![0xFF, 0xD9, 0x01, 0x02]);
        assert!(parsed.use_16bit_dc_estimate);
        assert!(parsed.use_16bit_adv_predict);
    }

    #[test]
    fn recovery_sections_roundtrip() {
        let mut header = sample_header();
        header.recovery.rst_cnt = vec![7, 9];
        header.recovery.rst_cnt_set = true;
        header.recovery.rst_err = vec![2];
        header.recovery.prefix_garbage = vec![1, 2, 3];
        header.recovery.early_eof_encountered = true;
        header.recovery.max_cmp = 1;
        header.recovery.max_bpos = 63;
        header.recovery.max_sah = 0;
        header.recovery.max_dpos = [10, 4, 4, 0];

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let parsed = LeptonHeader::read_from(&mut &buf[..]).unwrap();

        assert_eq!(parsed.recovery.rst_cnt, vec![7, 9]);
        assert!(parsed.recovery.rst_cnt_set);
        assert_eq!(parsed.recovery.rst_err, vec![2]);
        assert_eq!(parsed.recovery.prefix_garbage, vec![1, 2, 3]);
        assert!(parsed.recovery.early_eof_encountered);
        assert_eq!(parsed.recovery.max_dpos, [10, 4, 4, 0]);
    }

    #[test]
    fn unknown_section_is_fatal() {
        let mut header = LeptonHeader::new();
        assert!(matches!(
            header.parse_sections(b"XYZ\x00\x00\x00\x00"),
            Err(Error::BadLeptonFile(_))
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let data = [0u8; 40];
        assert!(matches!(
            LeptonHeader::read_from(&mut &data[..]),
            Err(Error::BadLeptonFile(_))
        ));
    }

    #[test]
    fn legacy_layout_defaults_flags_on() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        // Rewrite bytes 8..20 as a legacy git revision (no 'MS' marker).
        buf[8] = 0xAB;
        buf[9] = 0xCD;
        for b in &mut buf[10..20] {
            *b = 0;
        }
        buf[10] = 0xEF;

        let parsed = LeptonHeader::read_from(&mut &buf[..]).unwrap();
        assert!(parsed.use_16bit_dc_estimate);
        assert!(parsed.use_16bit_adv_predict);
        assert_eq!(parsed.git_revision, 0x00EF_CDAB);
    }
}
