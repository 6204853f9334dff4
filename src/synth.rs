use crate::channel::{samples_per_row, Channel, Pan};
use crate::consts::*;
use crate::song::{Effect, Song};

/// The main struct for audio synthesis. `Synth` walks the song's musical
/// clock (sample, tick, row, pattern, order position), drives the four
/// channel synthesizers, and mixes their output. It implements `Iterator`,
/// so calling `next` produces one stereo frame of signed 16-bit PCM at
/// 44.1 kHz.
#[derive(Debug)]
pub struct Synth<'a> {
    song: &'a Song,
    channels: [Channel<'a>; NUM_CHANNELS],
    /// Channel indices allowed to sound; empty means all of them.
    solo: Vec<usize>,

    ticks_per_row: u32,
    bpm: u32,

    // Clock state. Row lookahead is resolved a row ahead of time so that
    // Pattern-Break and Position-Jump land before tick 0 sample 0 of their
    // target row; -1 marks the end of the song.
    order_position: usize,
    row_position: i32,
    tick_position: u32,
    sample_position: f32,
    current_pattern: usize,
    next_row: i32,
    next_row_pattern: usize,
    next_order_position: usize,
    finished: bool,
}

impl<'a> Synth<'a> {
    /// Create a `Synth` that will play the provided `Song` from the top.
    ///
    /// ```no_run
    /// # let data = std::fs::read("song.mod").unwrap();
    /// let song = modplay::Song::from_slice(&data)?;
    /// let synth = modplay::Synth::new(&song);
    /// for [left, right] in synth {
    ///     // Do something with the frame
    /// }
    /// # Ok::<(), modplay::Error>(())
    /// ```
    pub fn new(song: &'a Song) -> Self {
        Synth {
            song,
            channels: [
                Channel::new(Pan::Left),
                Channel::new(Pan::Right),
                Channel::new(Pan::Right),
                Channel::new(Pan::Left),
            ],
            solo: Vec::new(),
            ticks_per_row: DEFAULT_TICKS_PER_ROW,
            bpm: DEFAULT_BPM,
            order_position: 0,
            row_position: 0,
            tick_position: 0,
            sample_position: 0.0,
            current_pattern: usize::from(song.order[0]),
            next_row: 0,
            next_row_pattern: 0,
            next_order_position: 0,
            finished: false,
        }
    }

    /// Restrict the mix to the given channel indices (in 0..4). An empty
    /// set restores all channels.
    pub fn set_solo(&mut self, channels: &[usize]) {
        self.solo = channels.to_vec();
    }

    fn samples_per_tick(&self) -> f32 {
        samples_per_row(self.bpm as f32) / self.ticks_per_row as f32
    }

    /// Enter the row the clock currently points at: apply a tempo change,
    /// dispatch the row to the channels, fire row-start effects, and
    /// resolve where the song goes when this row ends.
    fn enter_row(&mut self) {
        let song = self.song;
        let pattern = &song.patterns[self.current_pattern];
        let row_index = self.row_position as usize;

        // Global effects are scanned across all four channels; the last
        // channel carrying one wins.
        let mut change_speed = None;
        let mut pattern_break = None;
        let mut position_jump = None;
        for channel in &pattern.channels {
            let row = &channel[row_index];
            match row.effect {
                Effect::ChangeSpeed => {
                    change_speed = Some(u32::from(row.effect_x) * 16 + u32::from(row.effect_y));
                }
                Effect::PatternBreak => {
                    pattern_break =
                        Some((usize::from(row.effect_x) * 10 + usize::from(row.effect_y)).min(63));
                }
                Effect::PositionJump => {
                    position_jump = Some(
                        (usize::from(row.effect_x) * 16 + usize::from(row.effect_y))
                            .min(ORDER_TABLE_LENGTH - 1),
                    );
                }
                _ => {}
            }
        }

        if let Some(value) = change_speed {
            if value < 32 {
                self.ticks_per_row = value;
            } else {
                self.bpm = value;
            }
            for channel in &mut self.channels {
                channel.set_speed(self.ticks_per_row, self.bpm);
            }
        }

        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.set_row(&pattern.channels[index][row_index], &song.instruments);
        }
        for channel in &mut self.channels {
            channel.apply_row_effects();
        }

        let last_row = row_index == ROWS_PER_PATTERN - 1;
        if last_row && self.order_position + 1 >= usize::from(song.positions_used) {
            self.next_row = -1;
        } else if pattern_break.is_some() || position_jump.is_some() {
            self.next_row = pattern_break.unwrap_or(0) as i32;
            self.next_order_position =
                position_jump.unwrap_or((self.order_position + 1).min(ORDER_TABLE_LENGTH - 1));
            self.next_row_pattern = usize::from(song.order[self.next_order_position]);
        } else if last_row {
            self.next_row = 0;
            self.next_order_position = self.order_position + 1;
            self.next_row_pattern = usize::from(song.order[self.next_order_position]);
        } else {
            self.next_row = self.row_position + 1;
            self.next_order_position = self.order_position;
            self.next_row_pattern = self.current_pattern;
        }
    }
}

/// Convert a mixed float sample to signed 16-bit, clipping anything the
/// four channels pushed outside full scale.
pub(crate) fn quantize(value: f32) -> i16 {
    (value * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

impl<'a> Iterator for Synth<'a> {
    type Item = [i16; 2];

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.sample_position == 0.0 {
            if self.tick_position == 0 {
                self.enter_row();
            } else {
                for channel in &mut self.channels {
                    channel.apply_tick_effects(self.tick_position);
                }
            }
        }

        // Mix the channels
        let mut left = 0.0;
        let mut right = 0.0;
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let frame = channel.next_sample();
            if self.solo.is_empty() || self.solo.contains(&index) {
                left += frame[0];
                right += frame[1];
            }
        }

        // Advance the clock
        self.sample_position += 1.0;
        if self.sample_position >= self.samples_per_tick() {
            self.sample_position = 0.0;
            self.tick_position += 1;
        }
        if self.tick_position >= self.ticks_per_row {
            self.tick_position = 0;
            self.row_position = self.next_row;
            self.current_pattern = self.next_row_pattern;
            self.order_position = self.next_order_position;
            if self.row_position < 0 {
                self.finished = true;
            }
        }

        Some([quantize(left), quantize(right)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES_PER_ROW: usize = 882;

    /// Module skeleton: "M.K.", the given positions, patterns all zero.
    fn module_bytes(positions_used: u8, num_patterns: usize) -> Vec<u8> {
        let mut data = vec![0_u8; HEADER_LENGTH + num_patterns * PATTERN_LENGTH];
        data[POSITIONS_USED_OFFSET] = positions_used;
        data[FORMAT_ID_OFFSET..FORMAT_ID_OFFSET + 4].copy_from_slice(FORMAT_ID);
        if num_patterns > 1 {
            // Mention the highest pattern so the decoder reads them all.
            data[ORDER_TABLE_OFFSET + ORDER_TABLE_LENGTH - 1] = (num_patterns - 1) as u8;
        }
        data
    }

    /// Give instrument 1 a constant looped waveform at full volume.
    fn add_instrument(data: &mut Vec<u8>) {
        let header = &mut data[TITLE_LENGTH..TITLE_LENGTH + INSTRUMENT_HEADER_LENGTH];
        header[22..24].copy_from_slice(&8_u16.to_be_bytes());
        header[25] = 64;
        header[26..28].copy_from_slice(&1_u16.to_be_bytes());
        header[28..30].copy_from_slice(&7_u16.to_be_bytes());
        data.extend_from_slice(&[64; 16]);
    }

    /// Encode one pattern cell.
    fn set_cell(
        data: &mut [u8],
        pattern: usize,
        row: usize,
        channel: usize,
        period: u16,
        instrument: u8,
        effect: u8,
        x: u8,
        y: u8,
    ) {
        let offset =
            HEADER_LENGTH + pattern * PATTERN_LENGTH + row * NUM_CHANNELS * 4 + channel * 4;
        data[offset] = (instrument & 0x10) | ((period >> 8) as u8 & 0x0F);
        data[offset + 1] = (period & 0xFF) as u8;
        data[offset + 2] = ((instrument & 0x0F) << 4) | (effect & 0x0F);
        data[offset + 3] = (x << 4) | y;
    }

    #[test]
    fn default_timing() {
        let data = module_bytes(1, 1);
        let song = Song::from_slice(&data).unwrap();
        let synth = Synth::new(&song);
        assert!((samples_per_row(125.0) - 882.0).abs() < f32::EPSILON);
        assert!((synth.samples_per_tick() - 147.0).abs() < f32::EPSILON);
    }

    #[test]
    fn silent_module_renders_exact_frame_count() {
        for positions in [1_u8, 2] {
            let data = module_bytes(positions, 1);
            let song = Song::from_slice(&data).unwrap();
            let frames: Vec<_> = Synth::new(&song).collect();
            assert_eq!(frames.len(), usize::from(positions) * 64 * SAMPLES_PER_ROW);
            assert!(frames.iter().all(|frame| *frame == [0, 0]));
        }
    }

    #[test]
    fn note_produces_output_on_the_panned_side() {
        let mut data = module_bytes(1, 1);
        set_cell(&mut data, 0, 0, 1, 428, 1, 0, 0, 0);
        add_instrument(&mut data);

        let song = Song::from_slice(&data).unwrap();
        let mut synth = Synth::new(&song);
        let frame = synth.next().unwrap();
        // Channel 1 is panned right: 0.5 waveform at full volume.
        assert_eq!(frame[0], 0);
        assert_eq!(frame[1], 16384);
    }

    #[test]
    fn solo_mutes_other_channels() {
        let mut data = module_bytes(1, 1);
        set_cell(&mut data, 0, 0, 1, 428, 1, 0, 0, 0);
        add_instrument(&mut data);

        let song = Song::from_slice(&data).unwrap();
        let mut synth = Synth::new(&song);
        synth.set_solo(&[0]);
        assert!(synth.all(|frame| frame == [0, 0]));
    }

    #[test]
    fn pattern_break_skips_to_the_target_row() {
        let mut data = module_bytes(2, 1);
        // Break out of row 0 to row 4 of the next position.
        set_cell(&mut data, 0, 0, 2, 0, 0, 13, 0, 4);

        let song = Song::from_slice(&data).unwrap();
        let frames = Synth::new(&song).count();
        // Row 0, then rows 4..64 of the second position.
        assert_eq!(frames, (1 + 60) * SAMPLES_PER_ROW);
    }

    #[test]
    fn position_jump_changes_the_order_position() {
        let mut data = module_bytes(2, 2);
        data[ORDER_TABLE_OFFSET] = 0;
        data[ORDER_TABLE_OFFSET + 1] = 1;
        // Jump from row 0 of pattern 0 straight to position 1.
        set_cell(&mut data, 0, 0, 0, 0, 0, 11, 0, 1);

        let song = Song::from_slice(&data).unwrap();
        let frames = Synth::new(&song).count();
        assert_eq!(frames, (1 + 64) * SAMPLES_PER_ROW);
    }

    #[test]
    fn last_global_effect_in_channel_order_wins() {
        let mut data = module_bytes(2, 1);
        set_cell(&mut data, 0, 0, 0, 0, 0, 13, 0, 8);
        set_cell(&mut data, 0, 0, 3, 0, 0, 13, 0, 4);

        let song = Song::from_slice(&data).unwrap();
        let frames = Synth::new(&song).count();
        assert_eq!(frames, (1 + 60) * SAMPLES_PER_ROW);
    }

    #[test]
    fn change_speed_sets_ticks_per_row() {
        let mut data = module_bytes(1, 1);
        set_cell(&mut data, 0, 0, 0, 0, 0, 15, 0, 3);

        let song = Song::from_slice(&data).unwrap();
        let mut synth = Synth::new(&song);
        synth.next().unwrap();
        // Ticks subdivide the row, so the row length is unchanged but each
        // of the 3 ticks covers a third of it.
        assert_eq!(synth.ticks_per_row, 3);
        assert!((synth.samples_per_tick() - 294.0).abs() < f32::EPSILON);
        assert_eq!(synth.count() + 1, 64 * SAMPLES_PER_ROW);
    }

    #[test]
    fn change_speed_sets_bpm() {
        let mut data = module_bytes(1, 1);
        // 250 is past the tick-count range, so it retimes the rows.
        set_cell(&mut data, 0, 0, 0, 0, 0, 15, 15, 10);

        let song = Song::from_slice(&data).unwrap();
        let frames = Synth::new(&song).count();
        assert_eq!(frames, 64 * 6 * 74);
    }

    #[test]
    fn quantize_clips_to_16_bits() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32767);
        assert_eq!(quantize(2.5), 32767);
        assert_eq!(quantize(-2.5), -32768);
        assert_eq!(quantize(0.5), 16384);
    }

    #[test]
    fn mixed_output_stays_within_16_bits() {
        let mut data = module_bytes(1, 1);
        // Both left channels at full volume on a full-scale waveform.
        set_cell(&mut data, 0, 0, 0, 428, 1, 0, 0, 0);
        set_cell(&mut data, 0, 0, 3, 428, 1, 0, 0, 0);
        {
            let header = &mut data[TITLE_LENGTH..TITLE_LENGTH + INSTRUMENT_HEADER_LENGTH];
            header[22..24].copy_from_slice(&8_u16.to_be_bytes());
            header[25] = 64;
            header[26..28].copy_from_slice(&1_u16.to_be_bytes());
            header[28..30].copy_from_slice(&7_u16.to_be_bytes());
        }
        data.extend_from_slice(&[127; 16]);

        let song = Song::from_slice(&data).unwrap();
        for [left, right] in Synth::new(&song).take(4 * SAMPLES_PER_ROW) {
            // Two channels at 0.992 sum to 1.98; the mix pins at full scale
            // instead of wrapping.
            assert_eq!(left, 32767);
            assert_eq!(right, 0);
        }
    }
}
