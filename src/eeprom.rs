//! EEPROM parameter block codec.
//!
//! The controller stores its machine parameters as a flat block of 32-bit
//! words. [`EepromV1`] is the versioned view over that block: named offsets
//! map fields onto word indices, with 8-bit sub-fields packed inside words
//! and per-axis fields at `AXIS_BASE + axis * AXIS_STRIDE`. [`Eeprom`] is the
//! structured record a caller edits.
//!
//! The codec never talks to the connection itself. Reading goes through the
//! dispatcher (`$?`, one `$n=value` reply line per word), writing emits a
//! `$slot=value` command sequence for the dispatcher to send.
//!
//! The offset table below is the single source of truth for the layout;
//! nothing outside this module assumes word positions.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::constants::{EEPROM_READ_TIMEOUT, EEPROM_SIGNATURE, EEPROM_WORDS, MAX_AXES};
use crate::error::{CncError, Result};
use crate::protocol::Controller;

/// First word of an axis block.
const AXIS_BASE: usize = 10;
/// Words per axis block.
const AXIS_STRIDE: usize = 2;

/// 32-bit fields at fixed word offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOfs32 {
    Info1,
    Info2,
    RefMoveStepRate,
    MoveAwayFromReference,
    MaxStepRate,
    Acc,
    Dec,
    StepsPerMm1000,
}

impl ValueOfs32 {
    const fn word(self) -> usize {
        match self {
            ValueOfs32::Info1 => 2,
            ValueOfs32::Info2 => 3,
            ValueOfs32::RefMoveStepRate => 4,
            ValueOfs32::MoveAwayFromReference => 5,
            ValueOfs32::MaxStepRate => 6,
            ValueOfs32::Acc => 7,
            ValueOfs32::Dec => 8,
            ValueOfs32::StepsPerMm1000 => 9,
        }
    }
}

/// 8-bit sub-fields packed into words: (word index, byte index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOfs8 {
    NumAxis,
    UseAxis,
}

impl ValueOfs8 {
    const fn location(self) -> (usize, usize) {
        match self {
            ValueOfs8::NumAxis => (1, 0),
            ValueOfs8::UseAxis => (1, 1),
        }
    }
}

/// 32-bit per-axis fields, word offset within the axis block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOfs32 {
    Size,
}

impl AxisOfs32 {
    const fn word(self) -> usize {
        match self {
            AxisOfs32::Size => 0,
        }
    }
}

/// 8-bit per-axis sub-fields: (word offset within block, byte index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOfs8 {
    ReferenceType,
    ReferenceSequence,
}

impl AxisOfs8 {
    const fn location(self) -> (usize, usize) {
        match self {
            AxisOfs8::ReferenceType => (1, 0),
            AxisOfs8::ReferenceSequence => (1, 1),
        }
    }
}

/// How an axis performs its reference (homing) move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferenceType {
    /// Axis has no reference switch.
    #[default]
    None = 0,
    /// Home towards the minimum switch.
    ToMin = 1,
    /// Home towards the maximum switch.
    ToMax = 2,
}

impl ReferenceType {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ReferenceType::ToMin,
            2 => ReferenceType::ToMax,
            0 => ReferenceType::None,
            other => {
                warn!("unknown reference type {other}, treating as none");
                ReferenceType::None
            }
        }
    }
}

/// Position of an axis in the homing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferenceSequence {
    First = 0,
    Second = 1,
    Third = 2,
    Fourth = 3,
    Fifth = 4,
    Sixth = 5,
    /// Axis takes no part in the homing sequence.
    #[default]
    No = 255,
}

impl ReferenceSequence {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReferenceSequence::First,
            1 => ReferenceSequence::Second,
            2 => ReferenceSequence::Third,
            3 => ReferenceSequence::Fourth,
            4 => ReferenceSequence::Fifth,
            5 => ReferenceSequence::Sixth,
            255 => ReferenceSequence::No,
            other => {
                warn!("unknown reference sequence {other}, treating as no");
                ReferenceSequence::No
            }
        }
    }
}

/// Versioned view over a raw EEPROM word image.
///
/// Only constructible from a valid image (or blank), so field access can
/// never read a block whose signature does not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EepromV1 {
    words: Vec<u32>,
}

impl EepromV1 {
    /// Whether a raw image carries the v1 signature.
    pub fn is_valid_image(words: &[u32]) -> bool {
        words.len() >= EEPROM_WORDS && words[0] == EEPROM_SIGNATURE
    }

    /// Adopt a raw word image read back from the controller.
    ///
    /// Fails with [`CncError::InvalidEepromImage`] on a signature mismatch;
    /// no field is decoded in that case.
    pub fn try_from_words(words: Vec<u32>) -> Result<Self> {
        if !Self::is_valid_image(&words) {
            return Err(CncError::InvalidEepromImage);
        }
        Ok(EepromV1 { words })
    }

    /// A blank image with only the signature set.
    pub fn blank() -> Self {
        let mut words = vec![0u32; EEPROM_WORDS];
        words[0] = EEPROM_SIGNATURE;
        EepromV1 { words }
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn get32(&self, ofs: ValueOfs32) -> u32 {
        self.words[ofs.word()]
    }

    pub fn set32(&mut self, ofs: ValueOfs32, value: u32) {
        self.words[ofs.word()] = value;
    }

    pub fn get8(&self, ofs: ValueOfs8) -> u8 {
        let (word, byte) = ofs.location();
        extract_byte(self.words[word], byte)
    }

    pub fn set8(&mut self, ofs: ValueOfs8, value: u8) {
        let (word, byte) = ofs.location();
        self.words[word] = replace_byte(self.words[word], byte, value);
    }

    pub fn axis_get32(&self, axis: usize, ofs: AxisOfs32) -> Result<u32> {
        Ok(self.words[axis_word(axis, ofs.word())?])
    }

    pub fn axis_set32(&mut self, axis: usize, ofs: AxisOfs32, value: u32) -> Result<()> {
        self.words[axis_word(axis, ofs.word())?] = value;
        Ok(())
    }

    pub fn axis_get8(&self, axis: usize, ofs: AxisOfs8) -> Result<u8> {
        let (word, byte) = ofs.location();
        Ok(extract_byte(self.words[axis_word(axis, word)?], byte))
    }

    pub fn axis_set8(&mut self, axis: usize, ofs: AxisOfs8, value: u8) -> Result<()> {
        let (word, byte) = ofs.location();
        let index = axis_word(axis, word)?;
        self.words[index] = replace_byte(self.words[index], byte, value);
        Ok(())
    }

    /// The steps-per-mm field is stored as raw IEEE-754 bits; reinterpret,
    /// never numerically convert.
    pub fn steps_per_mm_1000(&self) -> f32 {
        f32::from_bits(self.get32(ValueOfs32::StepsPerMm1000))
    }

    pub fn set_steps_per_mm_1000(&mut self, value: f32) {
        self.set32(ValueOfs32::StepsPerMm1000, value.to_bits());
    }

    /// Command lines that program this image into the controller.
    ///
    /// Slot 0 (the signature) is owned by the firmware and not emitted.
    pub fn to_gcode(&self) -> Vec<String> {
        self.words
            .iter()
            .enumerate()
            .skip(1)
            .map(|(slot, value)| format!("${}={}", slot, value))
            .collect()
    }

    /// Persist the command sequence to a file for diagnostics before
    /// transmission.
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for line in self.to_gcode() {
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
        Ok(())
    }
}

fn extract_byte(word: u32, byte: usize) -> u8 {
    (word >> (byte * 8)) as u8
}

fn replace_byte(word: u32, byte: usize, value: u8) -> u32 {
    let shift = byte * 8;
    (word & !(0xFFu32 << shift)) | ((value as u32) << shift)
}

fn axis_word(axis: usize, word_in_block: usize) -> Result<usize> {
    if axis >= MAX_AXES {
        return Err(CncError::AxisOutOfRange {
            axis,
            max: MAX_AXES - 1,
        });
    }
    Ok(AXIS_BASE + axis * AXIS_STRIDE + word_in_block)
}

/// Reference-move parameters of one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisParams {
    /// Travel size in machine units.
    pub size: u32,
    pub ref_move: ReferenceType,
    pub ref_sequence: ReferenceSequence,
}

/// Structured machine parameter record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Eeprom {
    pub num_axis: u8,
    pub use_axis: u8,
    pub info1: u32,
    pub info2: u32,
    /// Only the first `num_axis` entries are meaningful.
    pub axis: [AxisParams; MAX_AXES],
    pub ref_move_step_rate: u32,
    pub move_away_from_reference: u32,
    pub max_step_rate: u32,
    pub acc: u32,
    pub dec: u32,
    pub steps_per_mm_1000: f32,
}

impl Eeprom {
    /// Decode a validated image into the structured record.
    ///
    /// Axis entries beyond `num_axis` stay at their defaults, mirroring the
    /// layout where only the first `num_axis` blocks are meaningful.
    pub fn decode(view: &EepromV1) -> Result<Self> {
        let num_axis = view.get8(ValueOfs8::NumAxis);
        let mut eeprom = Eeprom {
            num_axis,
            use_axis: view.get8(ValueOfs8::UseAxis),
            info1: view.get32(ValueOfs32::Info1),
            info2: view.get32(ValueOfs32::Info2),
            axis: Default::default(),
            ref_move_step_rate: view.get32(ValueOfs32::RefMoveStepRate),
            move_away_from_reference: view.get32(ValueOfs32::MoveAwayFromReference),
            max_step_rate: view.get32(ValueOfs32::MaxStepRate),
            acc: view.get32(ValueOfs32::Acc),
            dec: view.get32(ValueOfs32::Dec),
            steps_per_mm_1000: view.steps_per_mm_1000(),
        };
        for index in 0..(num_axis as usize).min(MAX_AXES) {
            eeprom.axis[index] = AxisParams {
                size: view.axis_get32(index, AxisOfs32::Size)?,
                ref_move: ReferenceType::from_u8(view.axis_get8(index, AxisOfs8::ReferenceType)?),
                ref_sequence: ReferenceSequence::from_u8(
                    view.axis_get8(index, AxisOfs8::ReferenceSequence)?,
                ),
            };
        }
        Ok(eeprom)
    }

    /// Encode the record into a fresh image.
    pub fn encode(&self) -> Result<EepromV1> {
        if self.num_axis as usize > MAX_AXES {
            return Err(CncError::AxisOutOfRange {
                axis: self.num_axis as usize,
                max: MAX_AXES,
            });
        }
        let mut view = EepromV1::blank();
        view.set8(ValueOfs8::NumAxis, self.num_axis);
        view.set8(ValueOfs8::UseAxis, self.use_axis);
        view.set32(ValueOfs32::Info1, self.info1);
        view.set32(ValueOfs32::Info2, self.info2);
        view.set32(ValueOfs32::RefMoveStepRate, self.ref_move_step_rate);
        view.set32(
            ValueOfs32::MoveAwayFromReference,
            self.move_away_from_reference,
        );
        view.set32(ValueOfs32::MaxStepRate, self.max_step_rate);
        view.set32(ValueOfs32::Acc, self.acc);
        view.set32(ValueOfs32::Dec, self.dec);
        view.set_steps_per_mm_1000(self.steps_per_mm_1000);
        for index in 0..self.num_axis as usize {
            let params = &self.axis[index];
            view.axis_set32(index, AxisOfs32::Size, params.size)?;
            view.axis_set8(index, AxisOfs8::ReferenceType, params.ref_move as u8)?;
            view.axis_set8(index, AxisOfs8::ReferenceSequence, params.ref_sequence as u8)?;
        }
        Ok(view)
    }
}

/// Parse `$n=value` reply lines into a raw word image.
///
/// Non-`$` lines (the ok terminator, info output) are skipped; a `$` line
/// that does not parse is a [`CncError::MalformedReply`].
pub fn parse_dollar_lines(reply: &str) -> Result<Vec<u32>> {
    let mut words: Vec<u32> = Vec::new();
    let mut seen = false;
    for line in reply.lines() {
        let line = line.trim();
        let Some(assignment) = line.strip_prefix('$') else {
            continue;
        };
        let (slot, value) = assignment
            .split_once('=')
            .ok_or_else(|| CncError::MalformedReply(line.to_string()))?;
        let slot: usize = slot
            .trim()
            .parse()
            .map_err(|_| CncError::MalformedReply(line.to_string()))?;
        let value: u32 = value
            .trim()
            .parse()
            .map_err(|_| CncError::MalformedReply(line.to_string()))?;
        if slot >= words.len() {
            words.resize(slot + 1, 0);
        }
        words[slot] = value;
        seen = true;
    }
    if !seen {
        return Err(CncError::MalformedReply(reply.trim().to_string()));
    }
    Ok(words)
}

/// Read the raw EEPROM word image from the controller (`$?`).
pub async fn get_eeprom_words(controller: &Controller) -> Result<Vec<u32>> {
    let reply = controller
        .send_command_timeout("$?", EEPROM_READ_TIMEOUT)
        .await?;
    parse_dollar_lines(&reply)
}

/// Read and decode the machine parameter block.
pub async fn read_eeprom(controller: &Controller) -> Result<Eeprom> {
    let words = get_eeprom_words(controller).await?;
    let view = EepromV1::try_from_words(words)?;
    Eeprom::decode(&view)
}

/// Program the machine parameter block.
///
/// Sends `$!` (hold) first, then the `$slot=value` sequence in order. With
/// `dump_path` set, the command sequence is written to that file before
/// anything goes on the wire.
pub async fn write_eeprom(
    controller: &Controller,
    eeprom: &Eeprom,
    dump_path: Option<&Path>,
) -> Result<()> {
    let view = eeprom.encode()?;
    if let Some(path) = dump_path {
        view.dump(path)?;
    }
    controller.send_command("$!").await?;
    controller.send_commands(view.to_gcode()).await?;
    Ok(())
}

/// Erase the parameter block (`$!` then `$0=0`).
///
/// The hold command must be fully acknowledged before the erase is written.
pub async fn erase_eeprom(controller: &Controller) -> Result<()> {
    controller.send_command("$!").await?;
    controller.send_command("$0=0").await?;
    Ok(())
}
