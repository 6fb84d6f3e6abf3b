// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::consts::JpegDecodeStatus;
use crate::error::{Error, Result};
use crate::jpeg::jpeg_header::JpegHeader;

/// Cursor over the block positions of a scan: tracks the current MCU, the
/// component within the scan, the block offset within the MCU and the
/// restart-interval countdown.
pub struct JpegPositionState {
    cmp: usize,
    mcu: u32,
    /// Index of the component within the scan order.
    csc: usize,
    /// Block offset within the current MCU.
    sub: u32,
    /// Linear block position within the current component.
    dpos: u32,
    /// Blocks left until the restart interval expires.
    rstw: u32,
    /// Remaining blocks of the active EOB run (progressive AC scans).
    pub eobrun: u16,
    /// Length of the previous EOB run, reset at restart intervals.
    pub prev_eobrun: u16,
}

impl JpegPositionState {
    pub fn new(jh: &JpegHeader, mcu: u32) -> Self {
        let cmp = jh.scan_component_order[0];
        let mcumul = jh.cmp_info[cmp].mbs;

        let rstw = if jh.restart_interval != 0 {
            u32::from(jh.restart_interval) - (mcu % u32::from(jh.restart_interval))
        } else {
            0
        };

        JpegPositionState {
            cmp,
            mcu,
            csc: 0,
            sub: 0,
            dpos: mcu * mcumul,
            rstw,
            eobrun: 0,
            prev_eobrun: 0,
        }
    }

    pub fn mcu(&self) -> u32 {
        self.mcu
    }

    pub fn dpos(&self) -> u32 {
        self.dpos
    }

    pub fn cmp(&self) -> usize {
        self.cmp
    }

    pub fn reset_rstw(&mut self, jh: &JpegHeader) {
        self.rstw = u32::from(jh.restart_interval);
        // EOB runs never span reset intervals.
        self.prev_eobrun = 0;
    }

    fn next_mcu_pos_non_interleaved(&mut self, jh: &JpegHeader) -> JpegDecodeStatus {
        self.dpos += 1;

        let ci = &jh.cmp_info[self.cmp];

        // Skip the horizontal padding blocks of partial MCUs.
        if ci.bch != ci.nch && self.dpos % ci.bch == ci.nch {
            self.dpos += ci.bch - ci.nch;
        }

        // Same for the vertical padding rows.
        if ci.bcv != ci.ncv && self.dpos / ci.bch == ci.ncv {
            self.dpos = ci.bc;
        }

        if jh.jpeg_type == crate::consts::JpegType::Sequential {
            self.mcu = self.dpos / ci.mbs;
        }

        if self.dpos >= ci.bc {
            JpegDecodeStatus::ScanCompleted
        } else if jh.restart_interval > 0 {
            self.rstw -= 1;
            if self.rstw == 0 {
                JpegDecodeStatus::RestartIntervalExpired
            } else {
                JpegDecodeStatus::DecodeInProgress
            }
        } else {
            JpegDecodeStatus::DecodeInProgress
        }
    }

    /// Advances one block and recomputes `dpos` for the new position.
    pub fn next_mcu_pos(&mut self, jh: &JpegHeader) -> JpegDecodeStatus {
        if jh.scan_component_order.len() == 1 {
            return self.next_mcu_pos_non_interleaved(jh);
        }

        let mut sta = JpegDecodeStatus::DecodeInProgress;
        let local_mcuh = jh.mcuh;

        self.sub += 1;
        if self.sub >= jh.cmp_info[self.cmp].mbs {
            self.sub = 0;
            self.csc += 1;

            if self.csc >= jh.scan_component_order.len() {
                self.csc = 0;
                self.cmp = jh.scan_component_order[0];
                self.mcu += 1;

                let mcuc = jh.mcuh * jh.mcuv;
                if self.mcu >= mcuc {
                    sta = JpegDecodeStatus::ScanCompleted;
                } else if jh.restart_interval > 0 {
                    self.rstw -= 1;
                    if self.rstw == 0 {
                        sta = JpegDecodeStatus::RestartIntervalExpired;
                    }
                }
            } else {
                self.cmp = jh.scan_component_order[self.csc];
            }
        }

        let sfh = jh.cmp_info[self.cmp].sfh;
        let sfv = jh.cmp_info[self.cmp].sfv;

        if sfv > 1 {
            // MCUs stack two block rows; rebuild dpos from MCU coordinates.
            let mcu_row = self.mcu / local_mcuh;
            let mcu_col = self.mcu % local_mcuh;
            let sub_row = self.sub / sfh;
            let sub_col = self.sub % sfh;

            let mut local_dpos = mcu_row * sfv + sub_row;
            local_dpos *= jh.cmp_info[self.cmp].bch;
            local_dpos += mcu_col * sfh + sub_col;

            self.dpos = local_dpos;
        } else if sfh > 1 {
            self.dpos = self.mcu * jh.cmp_info[self.cmp].mbs + self.sub;
        } else {
            self.dpos = self.mcu;
        }

        sta
    }

    /// Skips the blocks covered by the pending EOB run (single-component
    /// progressive scans only).
    pub fn skip_eobrun(&mut self, jh: &JpegHeader) -> Result<JpegDecodeStatus> {
        debug_assert_eq!(jh.scan_component_order.len(), 1);

        if self.eobrun == 0 {
            return Ok(JpegDecodeStatus::DecodeInProgress);
        }

        if jh.restart_interval > 0 {
            if u32::from(self.eobrun) > self.rstw {
                return Err(Error::UnsupportedJpeg(
                    "skip_eobrun: EOB run extends past end of reset interval".into(),
                ));
            }
            self.rstw -= u32::from(self.eobrun);
        }

        let ci = &jh.cmp_info[self.cmp];

        // Padding-block fixups, as in the single-step advance.
        if ci.bch != ci.nch {
            self.dpos +=
                (((self.dpos % ci.bch) + u32::from(self.eobrun)) / ci.nch) * (ci.bch - ci.nch);
        }
        if ci.bcv != ci.ncv && self.dpos / ci.bch >= ci.ncv {
            self.dpos += (ci.bcv - ci.ncv) * ci.bch;
        }

        self.dpos += u32::from(self.eobrun);
        self.eobrun = 0;

        if self.dpos == ci.bc {
            Ok(JpegDecodeStatus::ScanCompleted)
        } else if self.dpos > ci.bc {
            Err(Error::UnsupportedJpeg(
                "skip_eobrun: position extended past block count".into(),
            ))
        } else if jh.restart_interval > 0 && self.rstw == 0 {
            Ok(JpegDecodeStatus::RestartIntervalExpired)
        } else {
            Ok(JpegDecodeStatus::DecodeInProgress)
        }
    }

    /// An empty block is only allowed after an EOB run that was as long as
    /// the Huffman table permits; anything else is a non-canonical encoding
    /// this re-encoder cannot reproduce byte-exactly.
    pub fn check_optimal_eobrun(&mut self, is_current_block_empty: bool, max_eob_run: u16) -> Result<()> {
        if is_current_block_empty && self.prev_eobrun > 0 && self.prev_eobrun < max_eob_run - 1 {
            return Err(Error::UnsupportedJpeg(format!(
                "non optimal eobruns not supported (could have encoded up to {} zero runs, but only did {} followed by {})",
                max_eob_run,
                self.prev_eobrun + 1,
                self.eobrun + 1
            )));
        }

        self.prev_eobrun = self.eobrun;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{JpegDecodeStatus, JpegType};
    use crate::jpeg::jpeg_header::parse_sof;
    use crate::jpeg::jpeg_header::JpegHeader;

    fn header_420_16x16() -> JpegHeader {
        let mut h = JpegHeader::new();
        let sof = [8, 0, 16, 0, 16, 3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1];
        parse_sof(&mut h, &sof, JpegType::Sequential).unwrap();
        h.scan_component_order = vec![0, 1, 2];
        h
    }

    #[test]
    fn interleaved_order_visits_luma_blocks_first() {
        let jh = header_420_16x16();
        let mut state = JpegPositionState::new(&jh, 0);

        // Four luma blocks: dpos 0, 1, then the second block row 2, 3.
        assert_eq!((state.cmp(), state.dpos()), (0, 0));
        state.next_mcu_pos(&jh);
        assert_eq!((state.cmp(), state.dpos()), (0, 1));
        state.next_mcu_pos(&jh);
        assert_eq!((state.cmp(), state.dpos()), (0, 2));
        state.next_mcu_pos(&jh);
        assert_eq!((state.cmp(), state.dpos()), (0, 3));
        // Then one chroma block each.
        state.next_mcu_pos(&jh);
        assert_eq!((state.cmp(), state.dpos()), (1, 0));
        state.next_mcu_pos(&jh);
        assert_eq!((state.cmp(), state.dpos()), (2, 0));
        // Single MCU, so the scan completes.
        assert_eq!(state.next_mcu_pos(&jh), JpegDecodeStatus::ScanCompleted);
    }

    #[test]
    fn restart_interval_counts_blocks_non_interleaved() {
        let mut jh = JpegHeader::new();
        let sof = [8, 0, 8, 0, 32, 1, 1, 0x11, 0];
        parse_sof(&mut jh, &sof, JpegType::Sequential).unwrap();
        jh.scan_component_order = vec![0];
        jh.restart_interval = 2;

        let mut state = JpegPositionState::new(&jh, 0);
        state.reset_rstw(&jh);
        assert_eq!(state.next_mcu_pos(&jh), JpegDecodeStatus::DecodeInProgress);
        assert_eq!(state.next_mcu_pos(&jh), JpegDecodeStatus::RestartIntervalExpired);
    }
}
