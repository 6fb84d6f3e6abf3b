// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Top-level decoding: lepton container in, the original JPEG bytes out.

use std::io::{Read, Write};

use crate::codec::LeptonDecoder;
use crate::container::header::LeptonHeader;
use crate::container::multiplex;
use crate::error::{Error, Result};
use crate::image::BlockBasedImage;
use crate::jpeg::scan_write;
use crate::util::tracing_wrappers::*;

/// Caps the output at the original file size; anything the generator would
/// overshoot is silently discarded.
struct LimitedWriter<'a, W: Write> {
    inner: &'a mut W,
    remaining: u64,
}

impl<W: Write> Write for LimitedWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.remaining > 0 {
            let to_write = buf.len().min(self.remaining as usize);
            self.inner.write_all(&buf[..to_write])?;
            self.remaining -= to_write as u64;
        }
        // Report the full length even when truncated.
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Decompresses a lepton container back into the original JPEG.
pub fn decode<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<()> {
    let mut header = LeptonHeader::read_from(reader)?;

    info!(
        "decoding lepton file, original size {} bytes",
        header.original_file_size
    );

    let mut images: Vec<BlockBasedImage> = (0..header.jpeg_header.cmpc)
        .map(|i| {
            let ci = &header.jpeg_header.cmp_info[i];
            BlockBasedImage::new(ci.bch, ci.bcv)
        })
        .collect();

    // Everything after the header is multiplexed scan data plus the
    // four-byte length trailer.
    let mut remaining = Vec::new();
    reader.read_to_end(&mut remaining)?;
    if remaining.len() < 4 {
        return Err(Error::BadLeptonFile("missing file size trailer".into()));
    }
    let multiplexed = &remaining[..remaining.len() - 4];

    let partitions = multiplex::demultiplex(multiplexed, header.thread_handoffs.len());

    for (idx, handoff) in header.thread_handoffs.iter().enumerate() {
        let segment = &partitions[idx];

        let mut decoder = LeptonDecoder::new(&segment[..], &header.jpeg_header)?;
        decoder.decode_row_range(
            &mut images,
            &header.jpeg_header,
            handoff.luma_y_start,
            handoff.luma_y_end,
            header.recovery.max_dpos,
            header.recovery.early_eof_encountered,
        )?;
    }

    let mut limited = LimitedWriter {
        inner: writer,
        remaining: u64::from(header.original_file_size),
    };

    scan_write::write_jpeg(&mut header, &images, &mut limited)?;

    Ok(())
}

/// Decompresses an in-memory lepton container.
pub fn decode_bytes(lepton_data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    decode(&mut &lepton_data[..], &mut output)?;
    Ok(output)
}
