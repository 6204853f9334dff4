use crate::consts::*;
use crate::resampler::Resampler;
use crate::song::{signed_nibble, Effect, Instrument, Row};

/// Which side of the stereo field a channel is hard-panned to. The Amiga
/// wires channels 0 and 3 left and channels 1 and 2 right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pan {
    Left,
    Right,
}

/// Samples in one row at the given tempo; 125 BPM corresponds to the
/// 50 Hz PAL vblank rate (882 samples at 44.1 kHz).
pub(crate) fn samples_per_row(bpm: f32) -> f32 {
    OUTPUT_SAMPLE_RATE * 60.0 / (bpm * 24.0)
}

/// Vibrato runs per-sample, so its tick-based speed nibble is converted
/// into sample-domain cycle lengths whenever the nibbles or the song
/// tempo change.
#[derive(Debug)]
struct Vibrato {
    /// Last non-zero speed nibble.
    speed: u8,
    /// Last non-zero depth nibble.
    depth: f32,
    samples_per_cycle: f32,
    samples_per_cycle_position: f32,
    samples_elapsed: f32,
}

impl Vibrato {
    fn new() -> Self {
        Vibrato {
            speed: 0,
            depth: 0.0,
            samples_per_cycle: f32::INFINITY,
            samples_per_cycle_position: f32::INFINITY,
            samples_elapsed: 0.0,
        }
    }

    fn retime(&mut self, ticks_per_row: f32, bpm: f32) {
        let cycles_per_row = f32::from(self.speed) * ticks_per_row / 64.0;
        self.samples_per_cycle = samples_per_row(bpm) / cycles_per_row;
        self.samples_per_cycle_position = self.samples_per_cycle / 64.0;
    }
}

/// One monophonic voice: the bound instrument, the note it was ordered to
/// play, and the effect state that perturbs it row by row, tick by tick,
/// and sample by sample.
#[derive(Debug)]
pub(crate) struct Channel<'a> {
    pan: Pan,
    instrument_number: u8,
    instrument: Option<&'a Instrument>,
    /// Period the current note was ordered to play.
    specified_period: f32,
    /// Effective period; diverges from `specified_period` under
    /// pitch-modifying effects.
    actual_period: f32,
    is_playing: bool,
    fine_tune: i8,
    volume: u8,
    effect: Effect,
    effect_x: u8,
    effect_y: u8,
    slide_to_note_shift: f32,
    vibrato: Vibrato,
    ticks_per_row: f32,
    bpm: f32,
    resampler: Resampler<'a>,
}

impl<'a> Channel<'a> {
    pub(crate) fn new(pan: Pan) -> Self {
        Channel {
            pan,
            instrument_number: 0,
            instrument: None,
            specified_period: 0.0,
            actual_period: 0.0,
            is_playing: false,
            fine_tune: 0,
            volume: 0,
            effect: Effect::None,
            effect_x: 0,
            effect_y: 0,
            slide_to_note_shift: 0.0,
            vibrato: Vibrato::new(),
            ticks_per_row: DEFAULT_TICKS_PER_ROW as f32,
            bpm: DEFAULT_BPM as f32,
            resampler: Resampler::new(),
        }
    }

    /// Adopt a tempo change; vibrato cycle lengths are derived from the
    /// row and tick rates.
    pub(crate) fn set_speed(&mut self, ticks_per_row: u32, bpm: u32) {
        self.ticks_per_row = ticks_per_row as f32;
        self.bpm = bpm as f32;
        self.vibrato.retime(self.ticks_per_row, self.bpm);
    }

    /// Take in a new row. Runs at the start of the row, before its first
    /// tick and sample.
    pub(crate) fn set_row(&mut self, row: &Row, instruments: &'a [Instrument]) {
        if row.instrument_number != 0 {
            if row.instrument_number != self.instrument_number {
                self.instrument_number = row.instrument_number;
                let instrument = &instruments[usize::from(row.instrument_number) - 1];
                self.instrument = Some(instrument);
                self.resampler.bind(instrument);

                // A bare instrument change cuts the voice; under
                // slide-to-note the old note keeps sounding.
                if row.period == 0.0 && row.effect != Effect::SlideToNote {
                    self.is_playing = false;
                }
                if row.effect != Effect::SlideToNote {
                    self.resampler.set_position(WAVEFORM_PLAY_START);
                }
            }
            if let Some(instrument) = self.instrument {
                self.volume = instrument.volume;
            }
        }

        if row.period != 0.0 {
            self.fine_tune = if row.effect == Effect::SetFineTune {
                signed_nibble(row.effect_y)
            } else {
                self.instrument.map_or(0, |instrument| instrument.fine_tune)
            };
            self.specified_period =
                row.period / FINE_TUNE_BASE.powi(i32::from(self.fine_tune));

            let sliding = matches!(
                row.effect,
                Effect::SlideToNote | Effect::SlideToNoteVolumeSlide
            );
            if !sliding {
                self.actual_period = self.specified_period;
                self.resampler.set_position(WAVEFORM_PLAY_START);
            }
            self.is_playing = self
                .instrument
                .map_or(false, |instrument| !instrument.waveform.is_empty());
            self.resampler.recalculate_step(self.actual_period);
        }

        match row.effect {
            Effect::SlideToNote | Effect::SlideToNoteVolumeSlide => {
                if row.effect_x != 0 || row.effect_y != 0 {
                    self.slide_to_note_shift =
                        f32::from(row.effect_x) * 16.0 + f32::from(row.effect_y);
                }
            }
            Effect::Vibrato | Effect::VibratoVolumeSlide => {
                let was_vibrato = matches!(
                    self.effect,
                    Effect::Vibrato | Effect::VibratoVolumeSlide
                );
                if !was_vibrato {
                    self.vibrato.samples_elapsed = 0.0;
                }
                if row.effect == Effect::Vibrato {
                    if row.effect_x != 0 {
                        self.vibrato.speed = row.effect_x;
                    }
                    if row.effect_y != 0 {
                        self.vibrato.depth = f32::from(row.effect_y);
                    }
                }
                self.vibrato.retime(self.ticks_per_row, self.bpm);
            }
            _ => {}
        }

        self.effect = row.effect;
        self.effect_x = row.effect_x;
        self.effect_y = row.effect_y;
    }

    /// Effects that fire once, before the row's first sample is emitted.
    pub(crate) fn apply_row_effects(&mut self) {
        match self.effect {
            Effect::FineVolumeSlideUp => {
                self.volume = (self.volume + self.effect_y).min(64);
            }
            Effect::FineVolumeSlideDown => {
                self.volume = self.volume.saturating_sub(self.effect_y);
            }
            Effect::SetVolume => {
                self.volume = (self.effect_x * 16 + self.effect_y).min(64);
            }
            Effect::InstrumentOffset => {
                self.resampler.set_position(
                    f32::from(self.effect_x) * 4096.0 + f32::from(self.effect_y) * 256.0,
                );
            }
            _ => {}
        }
    }

    /// Effects that fire at every tick boundary except tick 0.
    pub(crate) fn apply_tick_effects(&mut self, tick: u32) {
        match self.effect {
            Effect::VolumeSlide | Effect::VibratoVolumeSlide => self.slide_volume(),
            Effect::SlideToNote => self.slide_to_note(),
            Effect::SlideToNoteVolumeSlide => {
                self.slide_to_note();
                self.slide_volume();
            }
            Effect::PitchSlideUp => {
                let shift = f32::from(self.effect_x) * 16.0 + f32::from(self.effect_y);
                self.actual_period = (self.actual_period - shift).max(PERIOD_MIN);
                self.specified_period = self.actual_period;
                self.resampler.recalculate_step(self.actual_period);
            }
            Effect::PitchSlideDown => {
                let shift = f32::from(self.effect_x) * 16.0 + f32::from(self.effect_y);
                self.actual_period = (self.actual_period + shift).min(PERIOD_MAX);
                self.specified_period = self.actual_period;
                self.resampler.recalculate_step(self.actual_period);
            }
            Effect::Arpeggio => {
                let semitones = match tick % 3 {
                    1 => i32::from(self.effect_x),
                    2 => i32::from(self.effect_y),
                    _ => 0,
                };
                self.actual_period =
                    self.specified_period / FINE_TUNE_BASE.powi(8 * semitones);
                self.resampler.recalculate_step(self.actual_period);
            }
            _ => {}
        }
    }

    fn slide_volume(&mut self) {
        if self.effect_x > 0 {
            self.volume = (self.volume + self.effect_x).min(64);
        } else {
            self.volume = self.volume.saturating_sub(self.effect_y);
        }
    }

    /// Move the effective period toward the ordered one without overshoot.
    fn slide_to_note(&mut self) {
        if self.actual_period < self.specified_period {
            self.actual_period =
                (self.actual_period + self.slide_to_note_shift).min(self.specified_period);
        } else {
            self.actual_period =
                (self.actual_period - self.slide_to_note_shift).max(self.specified_period);
        }
        self.resampler.recalculate_step(self.actual_period);
    }

    /// Produce this channel's contribution to one stereo frame.
    pub(crate) fn next_sample(&mut self) -> [f32; 2] {
        if !self.is_playing {
            return [0.0, 0.0];
        }

        let vibrating = matches!(self.effect, Effect::Vibrato | Effect::VibratoVolumeSlide);
        if vibrating {
            let cycle_pos =
                self.vibrato.samples_elapsed / self.vibrato.samples_per_cycle_position;
            let sine = f32::from(SINE_TABLE[cycle_pos as usize & 63]);
            let target = self.specified_period + sine * self.vibrato.depth / 128.0;
            if self.actual_period != target {
                self.actual_period = target;
                self.resampler.recalculate_step(target);
            }
        }

        let mut sample = self.resampler.next_sample();
        if self.volume != 64 {
            sample *= f32::from(self.volume) / 64.0;
        }

        if vibrating {
            self.vibrato.samples_elapsed =
                (self.vibrato.samples_elapsed + 1.0) % self.vibrato.samples_per_cycle;
        }

        match self.pan {
            Pan::Left => [sample, 0.0],
            Pan::Right => [0.0, sample],
        }
    }
}
