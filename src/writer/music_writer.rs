use crate::parser::song_parser::{
    Beat, BeatEffects, BeatStatus, BendEffect, Duration, HarmonicEffect, Measure, MeasureHeader,
    MixTableChange, MixTableItem, Note, NoteEffect, NoteType, Song, Tempo, Text, Track, Voice,
    BEAT_BREAK_SECONDARY, BEAT_EFFECT1_SLAP, BEAT_EFFECT1_STROKE, BEAT_EFFECT2_PICK_STROKE,
    BEAT_EFFECT2_TREMOLO_BAR, MAX_VOICES, NOTE_EFFECT1_BEND, NOTE_EFFECT1_GRACE,
    NOTE_EFFECT2_HARMONIC, NOTE_EFFECT2_SLIDE, NOTE_EFFECT2_TREMOLO_PICKING, NOTE_EFFECT2_TRILL,
    NOTE_STYLE_FLAGS,
};
use crate::writer::primitive_writer::{
    write_bool, write_f64, write_i8, write_int, write_int_byte_sized_string, write_len,
    write_short, write_u8,
};
use crate::writer::song_writer::SongWriter;
use crate::SetlistError;
use std::borrow::Cow;

impl SongWriter {
    /// Write measures in file order, measure by measure then track by track.
    ///
    /// Tracks shorter than the song are padded with empty measures.
    /// Measure texts and tempo changes have no place in the measure layout,
    /// they are carried by the first beat of the measure.
    pub(super) fn write_measures(
        &mut self,
        song: &Song,
        headers: &[&MeasureHeader],
    ) -> Result<(), SetlistError> {
        for (measure_index, header) in headers.iter().enumerate() {
            let tempo_change = header.tempo.as_ref().filter(|tempo| {
                measure_index > 0 || tempo.value != song.tempo.value
            });
            let tempo_track = tempo_change.and_then(|_| {
                song.tracks.iter().position(|track| {
                    track
                        .measures
                        .get(measure_index)
                        .and_then(|measure| measure.voices.first())
                        .is_some_and(|voice| !voice.beats.is_empty())
                })
            });
            for (track_index, track) in song.tracks.iter().enumerate() {
                let tempo = tempo_change.filter(|_| tempo_track == Some(track_index));
                match track.measures.get(measure_index) {
                    Some(measure) => self.write_measure(track, measure, tempo)?,
                    None => {
                        log::debug!("Padding track '{}' at measure {measure_index}", track.name);
                        let padding = Measure::empty((*header).clone());
                        self.write_measure(track, &padding, None)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_measure(
        &mut self,
        track: &Track,
        measure: &Measure,
        tempo: Option<&Tempo>,
    ) -> Result<(), SetlistError> {
        let empty_voice = Voice::default();
        for voice_index in 0..MAX_VOICES {
            let voice = measure.voices.get(voice_index).unwrap_or(&empty_voice);
            write_len(&mut self.data, voice.beats.len());
            for (beat_index, beat) in voice.beats.iter().enumerate() {
                if voice_index == 0 && beat_index == 0 {
                    let beat = decorate_first_beat(beat, measure.text.as_ref(), tempo);
                    self.write_beat(track, &beat)?;
                } else {
                    self.write_beat(track, beat)?;
                }
            }
            if voice_index == 0 && voice.beats.is_empty() && measure.text.is_some() {
                log::warn!("Measure text dropped on track '{}', no beat to carry it", track.name);
            }
        }
        write_u8(&mut self.data, measure.line_break);
        Ok(())
    }

    fn write_beat(&mut self, track: &Track, beat: &Beat) -> Result<(), SetlistError> {
        let mut flags = 0u8;
        if beat.duration.dotted {
            flags |= 0x01;
        }
        if beat.chord.is_some() {
            flags |= 0x02;
        }
        if beat.text.is_some() {
            flags |= 0x04;
        }
        if beat.effect.is_some() {
            flags |= 0x08;
        }
        if beat.mix_table_change.is_some() {
            flags |= 0x10;
        }
        if beat.duration.has_tuplet() {
            flags |= 0x20;
        }
        if beat.status != BeatStatus::Normal {
            flags |= 0x40;
        }
        write_u8(&mut self.data, flags);
        if flags & 0x40 != 0 {
            write_u8(&mut self.data, beat.status.to_byte());
        }
        self.write_duration(&beat.duration)?;
        if let Some(chord) = &beat.chord {
            self.data.extend_from_slice(&chord.data);
        }
        if let Some(text) = &beat.text {
            write_int_byte_sized_string(&mut self.data, text);
        }
        if let Some(effect) = &beat.effect {
            self.write_beat_effects(effect);
        }
        if let Some(mix_table_change) = &beat.mix_table_change {
            self.write_mix_table_change(mix_table_change);
        }
        self.write_notes(track, &beat.notes)?;

        let display_flags = match beat.break_secondary {
            Some(_) => beat.display_flags | BEAT_BREAK_SECONDARY,
            None => beat.display_flags & !BEAT_BREAK_SECONDARY,
        };
        write_short(&mut self.data, display_flags);
        if let Some(break_secondary) = beat.break_secondary {
            write_u8(&mut self.data, break_secondary);
        }
        Ok(())
    }

    /// Inverse of the duration byte: whole note is -2, quarter note is 0.
    fn write_duration(&mut self, duration: &Duration) -> Result<(), SetlistError> {
        if !duration.value.is_power_of_two() || duration.value > 64 {
            return Err(SetlistError::EncodingError(format!(
                "unsupported duration {}",
                duration.value
            )));
        }
        write_i8(&mut self.data, duration.value.trailing_zeros() as i8 - 2);
        if duration.has_tuplet() {
            write_int(&mut self.data, i32::from(duration.tuplet_enters));
        }
        Ok(())
    }

    fn write_beat_effects(&mut self, effect: &BeatEffects) {
        let mut flags1 = effect.flags1 & !(BEAT_EFFECT1_SLAP | BEAT_EFFECT1_STROKE);
        let mut flags2 = effect.flags2 & !(BEAT_EFFECT2_PICK_STROKE | BEAT_EFFECT2_TREMOLO_BAR);
        if effect.slap.is_some() {
            flags1 |= BEAT_EFFECT1_SLAP;
        }
        if effect.stroke.is_some() {
            flags1 |= BEAT_EFFECT1_STROKE;
        }
        if effect.tremolo_bar.is_some() {
            flags2 |= BEAT_EFFECT2_TREMOLO_BAR;
        }
        if effect.pick_stroke.is_some() {
            flags2 |= BEAT_EFFECT2_PICK_STROKE;
        }
        write_u8(&mut self.data, flags1);
        write_u8(&mut self.data, flags2);
        if let Some(slap) = effect.slap {
            write_u8(&mut self.data, slap);
        }
        if let Some(tremolo_bar) = &effect.tremolo_bar {
            self.write_bend_effect(tremolo_bar);
        }
        if let Some(stroke) = &effect.stroke {
            write_i8(&mut self.data, stroke.up);
            write_i8(&mut self.data, stroke.down);
        }
        if let Some(pick_stroke) = effect.pick_stroke {
            write_i8(&mut self.data, pick_stroke);
        }
    }

    fn write_bend_effect(&mut self, bend: &BendEffect) {
        write_i8(&mut self.data, bend.kind);
        write_int(&mut self.data, bend.value);
        write_len(&mut self.data, bend.points.len());
        for point in &bend.points {
            write_int(&mut self.data, point.position);
            write_int(&mut self.data, point.value);
            write_bool(&mut self.data, point.vibrato);
        }
    }

    fn write_mix_table_change(&mut self, mix: &MixTableChange) {
        write_i8(&mut self.data, mix.instrument);
        self.write_rse_instrument(&mix.rse);
        write_u8(&mut self.data, 0);

        let values: Vec<Option<(i8, i8)>> = [
            &mix.volume,
            &mix.balance,
            &mix.chorus,
            &mix.reverb,
            &mix.phaser,
            &mix.tremolo,
        ]
        .into_iter()
        .map(|item| item.as_ref().and_then(mix_table_value))
        .collect();
        for value in &values {
            write_i8(&mut self.data, value.map_or(-1, |(value, _)| value));
        }

        write_int_byte_sized_string(&mut self.data, &mix.tempo_name);
        let tempo = mix.tempo.as_ref().filter(|tempo| tempo.value >= 0);
        write_int(&mut self.data, tempo.map_or(-1, |tempo| tempo.value));

        for (_, duration) in values.iter().flatten() {
            write_i8(&mut self.data, *duration);
        }
        if let Some(tempo) = tempo {
            write_i8(&mut self.data, tempo.duration);
        }
        write_u8(&mut self.data, mix.all_tracks);
        write_i8(&mut self.data, mix.wah);
    }

    /// Notes are announced by a string bitmask and written from the highest string.
    fn write_notes(&mut self, track: &Track, notes: &[Note]) -> Result<(), SetlistError> {
        let string_count = track.strings.len();
        let mut string_flags = 0u8;
        for note in notes {
            if note.string < 1 || note.string as usize > string_count {
                return Err(SetlistError::EncodingError(format!(
                    "note on string {} but track '{}' has {string_count} strings",
                    note.string, track.name
                )));
            }
            let bit = 1u8 << (7 - note.string);
            if string_flags & bit != 0 {
                return Err(SetlistError::EncodingError(format!(
                    "several notes on string {} in track '{}'",
                    note.string, track.name
                )));
            }
            string_flags |= bit;
        }
        write_u8(&mut self.data, string_flags);
        for string in 1..=string_count as i8 {
            if let Some(note) = notes.iter().find(|note| note.string == string) {
                self.write_note(note);
            }
        }
        Ok(())
    }

    fn write_note(&mut self, note: &Note) {
        let mut flags = note.flags & NOTE_STYLE_FLAGS;
        if note.duration_percent.is_some() {
            flags |= 0x01;
        }
        if note.effect.is_some() {
            flags |= 0x08;
        }
        if note.velocity.is_some() {
            flags |= 0x10;
        }
        if note.kind.is_some() || note.fret.is_some() {
            flags |= 0x20;
        }
        if note.fingering.is_some() {
            flags |= 0x80;
        }
        write_u8(&mut self.data, flags);

        if flags & 0x20 != 0 {
            let kind = note.kind.as_ref().unwrap_or(&NoteType::Normal);
            write_u8(&mut self.data, kind.to_byte());
        }
        if let Some(velocity) = note.velocity {
            write_i8(&mut self.data, velocity);
        }
        if flags & 0x20 != 0 {
            write_i8(&mut self.data, note.fret.unwrap_or(0));
        }
        if let Some((left, right)) = note.fingering {
            write_i8(&mut self.data, left);
            write_i8(&mut self.data, right);
        }
        if let Some(duration_percent) = note.duration_percent {
            write_f64(&mut self.data, duration_percent);
        }
        write_u8(&mut self.data, note.accidental_flags);
        if let Some(effect) = &note.effect {
            self.write_note_effects(effect);
        }
    }

    fn write_note_effects(&mut self, effect: &NoteEffect) {
        let mut flags1 = effect.flags1 & !(NOTE_EFFECT1_BEND | NOTE_EFFECT1_GRACE);
        let mut flags2 = effect.flags2
            & !(NOTE_EFFECT2_TREMOLO_PICKING
                | NOTE_EFFECT2_SLIDE
                | NOTE_EFFECT2_HARMONIC
                | NOTE_EFFECT2_TRILL);
        if effect.bend.is_some() {
            flags1 |= NOTE_EFFECT1_BEND;
        }
        if effect.grace.is_some() {
            flags1 |= NOTE_EFFECT1_GRACE;
        }
        if effect.tremolo_picking.is_some() {
            flags2 |= NOTE_EFFECT2_TREMOLO_PICKING;
        }
        if effect.slide.is_some() {
            flags2 |= NOTE_EFFECT2_SLIDE;
        }
        if effect.harmonic.is_some() {
            flags2 |= NOTE_EFFECT2_HARMONIC;
        }
        if effect.trill.is_some() {
            flags2 |= NOTE_EFFECT2_TRILL;
        }
        write_u8(&mut self.data, flags1);
        write_u8(&mut self.data, flags2);

        if let Some(bend) = &effect.bend {
            self.write_bend_effect(bend);
        }
        if let Some(grace) = &effect.grace {
            self.data.extend_from_slice(&[
                grace.fret,
                grace.velocity,
                grace.transition,
                grace.duration,
                grace.flags,
            ]);
        }
        if let Some(tremolo_picking) = effect.tremolo_picking {
            write_u8(&mut self.data, tremolo_picking);
        }
        if let Some(slide) = effect.slide {
            write_u8(&mut self.data, slide);
        }
        if let Some(harmonic) = &effect.harmonic {
            write_i8(&mut self.data, harmonic.to_byte());
            match harmonic {
                HarmonicEffect::Artificial {
                    semitone,
                    accidental,
                    octave,
                } => {
                    write_u8(&mut self.data, *semitone);
                    write_i8(&mut self.data, *accidental);
                    write_u8(&mut self.data, *octave);
                }
                HarmonicEffect::Tapped { right_hand_fret } => {
                    write_u8(&mut self.data, *right_hand_fret);
                }
                HarmonicEffect::Natural | HarmonicEffect::Pinch | HarmonicEffect::Semi => {}
            }
        }
        if let Some(trill) = &effect.trill {
            write_i8(&mut self.data, trill.fret);
            write_i8(&mut self.data, trill.period);
        }
    }
}

/// A mix table value is only written when it fits the file range.
fn mix_table_value(item: &MixTableItem) -> Option<(i8, i8)> {
    i8::try_from(item.value)
        .ok()
        .filter(|value| *value >= 0)
        .map(|value| (value, item.duration))
}

/// Attach the measure text and the measure tempo to the first beat of a measure.
fn decorate_first_beat<'a>(
    beat: &'a Beat,
    text: Option<&Text>,
    tempo: Option<&Tempo>,
) -> Cow<'a, Beat> {
    let has_tempo_change = beat
        .mix_table_change
        .as_ref()
        .is_some_and(|mix| mix.tempo.is_some());
    let tempo = tempo.filter(|_| !has_tempo_change);
    if text.is_none() && tempo.is_none() {
        return Cow::Borrowed(beat);
    }

    let mut beat = beat.clone();
    if let Some(text) = text {
        beat.text = Some(match beat.text.take() {
            Some(existing) if !existing.is_empty() => format!("{} {existing}", text.value),
            _ => text.value.clone(),
        });
    }
    if let Some(tempo) = tempo {
        match &mut beat.mix_table_change {
            Some(mix) => {
                mix.tempo = Some(MixTableItem::new(tempo.value, 0));
                mix.tempo_name = tempo.name.clone().unwrap_or_default();
            }
            None => beat.mix_table_change = Some(MixTableChange::tempo_change(tempo)),
        }
    }
    Cow::Owned(beat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::music_parser::{parse_mix_table_change, parse_note};
    use crate::parser::song_parser::{parse_duration, GpVersion, GraceEffect, TrillEffect};

    #[test]
    fn test_write_duration() {
        let mut writer = SongWriter::new();
        let duration = Duration {
            value: 8,
            tuplet_enters: 3,
            tuplet_times: 2,
            ..Default::default()
        };
        writer.write_duration(&duration).unwrap();
        assert_eq!(writer.data, vec![0x01, 0x03, 0x00, 0x00, 0x00]);
        let (_rest, parsed) = parse_duration(0x20)(&writer.data).unwrap();
        assert_eq!(parsed, duration);
    }

    #[test]
    fn test_reject_unknown_duration() {
        let mut writer = SongWriter::new();
        let duration = Duration {
            value: 12,
            ..Default::default()
        };
        assert!(writer.write_duration(&duration).is_err());
    }

    #[test]
    fn test_write_note_with_effects() {
        let note = Note {
            flags: 0x04,
            kind: Some(NoteType::Normal),
            fret: Some(5),
            velocity: Some(6),
            effect: Some(NoteEffect {
                flags1: 0x02,
                grace: Some(GraceEffect {
                    fret: 3,
                    velocity: 6,
                    transition: 1,
                    duration: 1,
                    flags: 0,
                }),
                harmonic: Some(HarmonicEffect::Artificial {
                    semitone: 0,
                    accidental: 0,
                    octave: 1,
                }),
                trill: Some(TrillEffect { fret: 7, period: 2 }),
                ..Default::default()
            }),
            ..Note::new(2)
        };
        let mut writer = SongWriter::new();
        writer.write_note(&note);
        let (rest, parsed) = parse_note(2)(&writer.data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.kind, note.kind);
        assert_eq!(parsed.fret, note.fret);
        assert_eq!(parsed.velocity, note.velocity);
        assert_eq!(parsed.flags & NOTE_STYLE_FLAGS, 0x04);
        let effect = parsed.effect.unwrap();
        assert_eq!(effect.grace, note.effect.unwrap().grace);
        assert_eq!(effect.flags1, 0x02 | NOTE_EFFECT1_GRACE);
        assert_eq!(effect.flags2, NOTE_EFFECT2_HARMONIC | NOTE_EFFECT2_TRILL);
        assert_eq!(effect.trill, Some(TrillEffect { fret: 7, period: 2 }));
    }

    #[test]
    fn test_write_tempo_mix_table() {
        let mix = MixTableChange {
            volume: Some(MixTableItem::new(10, 2)),
            ..MixTableChange::tempo_change(&Tempo::new(90, Some("Slow".to_string())))
        };
        let mut writer = SongWriter::new();
        writer.write_mix_table_change(&mix);
        let (rest, parsed) = parse_mix_table_change(GpVersion::GP5)(&writer.data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, mix);
    }

    #[test]
    fn test_decorate_first_beat() {
        let beat = Beat {
            text: Some("let ring".to_string()),
            ..Default::default()
        };
        let text = Text::new("--- Outro ---");
        let tempo = Tempo::new(100, None);
        let decorated = decorate_first_beat(&beat, Some(&text), Some(&tempo));
        assert_eq!(decorated.text.as_deref(), Some("--- Outro --- let ring"));
        let mix = decorated.mix_table_change.as_ref().unwrap();
        assert_eq!(mix.tempo, Some(MixTableItem::new(100, 0)));

        let untouched = decorate_first_beat(&beat, None, None);
        assert!(matches!(untouched, Cow::Borrowed(_)));
    }

    #[test]
    fn test_existing_tempo_change_is_kept() {
        let beat = Beat {
            mix_table_change: Some(MixTableChange::tempo_change(&Tempo::new(140, None))),
            ..Default::default()
        };
        let decorated = decorate_first_beat(&beat, None, Some(&Tempo::new(100, None)));
        assert!(matches!(decorated, Cow::Borrowed(_)));
    }
}
