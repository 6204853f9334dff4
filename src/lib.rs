//! A ProTracker (MOD) module player with streaming support.
//!
//! [`Song::from_slice`] decodes the canonical 4-channel, 31-instrument
//! `"M.K."` module layout into an immutable song model, and [`Synth`]
//! plays it back: an `Iterator` yielding stereo frames of signed 16-bit
//! PCM at 44.1 kHz, mixed from four hard-panned channels with the classic
//! ProTracker effect set (slides, vibrato, arpeggio, pattern breaks and
//! jumps, tempo changes).

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::float_cmp)]
#![forbid(unsafe_code)]

mod channel;
mod consts;
mod resampler;
mod song;
mod synth;

pub use song::{Effect, Error, Instrument, Pattern, Row, Song};
pub use synth::Synth;
