use crate::parser::primitive_parser::{
    parse_bool, parse_byte_size_string, parse_f64, parse_i8, parse_int,
    parse_int_byte_sized_string, parse_short, parse_u8, skip,
};
use crate::parser::song_parser::{
    invalid_value, parse_beat_effects, parse_chord, parse_color, parse_count, parse_duration,
    parse_measure_headers, parse_note_effects, Beat, BeatStatus, GpVersion, Measure,
    MeasureHeader, MidiChannel, MixTableChange, MixTableItem, Note, NoteType, RseInstrument, Song,
    Track, TrackRse, Voice, BEAT_BREAK_SECONDARY, MAX_STRINGS, MAX_VOICES,
    MIDI_CHANNEL_COUNT,
};
use nom::combinator::{cond, map};
use nom::multi::count;
use nom::{IResult, Parser};

pub struct MusicParser {
    song: Song,
}

impl MusicParser {
    pub const fn new(song: Song) -> Self {
        Self { song }
    }

    pub fn take_song(&mut self) -> Song {
        std::mem::take(&mut self.song)
    }

    pub fn parse_music_data<'a>(&'a mut self, i: &'a [u8]) -> IResult<&'a [u8], ()> {
        let (i, (measure_count, track_count)) = (
            parse_count, // Measure count
            parse_count, // Track count
        )
            .parse(i)?;

        log::debug!(
            "Parsing music data -> track_count: {track_count} measure_count {measure_count}"
        );

        let (i, mut measure_headers) = parse_measure_headers(measure_count)(i)?;
        // the song tempo is the tempo of the first measure
        if let Some(first_header) = measure_headers.first_mut() {
            first_header.tempo = Some(self.song.tempo.clone());
        }

        let (i, tracks) = self.parse_tracks(track_count)(i)?;
        self.song.tracks = tracks;

        let (i, ()) = self.parse_measures(&measure_headers)(i)?;

        Ok((i, ()))
    }

    pub fn parse_tracks(
        &self,
        tracks_count: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Vec<Track>> + '_ {
        move |i| {
            log::debug!("Parsing {tracks_count} tracks");
            let mut i = i;
            let mut tracks = Vec::with_capacity(tracks_count);
            for number in 1..=tracks_count {
                let (inner, track) = self.parse_track(number)(i)?;
                i = inner;
                tracks.push(track);
            }
            // tracks done
            let padding = if self.song.version == GpVersion::GP5 {
                2
            } else {
                1
            };
            let (i, ()) = skip(padding)(i)?;
            Ok((i, tracks))
        }
    }

    pub fn parse_track(
        &self,
        number: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Track> + '_ {
        move |i| {
            log::debug!("--------");
            log::debug!("Parsing track {number}");
            let version = self.song.version;
            let mut i = i;
            if number == 1 || version == GpVersion::GP5 {
                let (inner, ()) = skip(1)(i)?;
                i = inner;
            }

            let (inner, flags) = parse_u8(i)?;
            i = inner;
            let mut track = Track {
                number: number as i32,
                percussion: flags & 0x01 != 0,
                twelve_stringed: flags & 0x02 != 0,
                banjo: flags & 0x04 != 0,
                visible: flags & 0x08 != 0,
                solo: flags & 0x10 != 0,
                mute: flags & 0x20 != 0,
                use_rse: flags & 0x40 != 0,
                indicate_tuning: flags & 0x80 != 0,
                ..Default::default()
            };

            // track name
            let (inner, name) = parse_byte_size_string(40)(i)?;
            i = inner;
            log::debug!("Track name:{name}");
            track.name = name;

            // string count
            let (inner, string_count) = parse_count(i)?;
            if !(1..=MAX_STRINGS).contains(&string_count) {
                return invalid_value(i, "string count");
            }
            i = inner;
            log::debug!("String count: {string_count}");

            // tunings
            let (inner, tunings) = count(parse_int, MAX_STRINGS).parse(i)?;
            i = inner;
            log::debug!("Tunings: {tunings:?}");
            track.strings = tunings
                .iter()
                .take(string_count)
                .enumerate()
                .map(|(i, &t)| (i as i32 + 1, t))
                .collect();

            // midi port
            let (inner, port) = parse_int(i)?;
            log::debug!("Midi port: {port:?}");
            i = inner;
            track.midi_port = port;

            // parse track channel info
            let (inner, channel) = self.parse_track_channel()(i)?;
            log::debug!("Midi channel id: {}", channel.channel_id);
            i = inner;
            track.percussion |= channel.is_percussion();
            track.channel = channel;

            // fret
            let (inner, fret_count) = parse_int(i)?;
            log::debug!("Fret count: {fret_count:?}");
            i = inner;
            track.fret_count = fret_count;

            // offset
            let (inner, offset) = parse_int(i)?;
            log::debug!("Offset: {offset:?}");
            i = inner;
            track.offset = offset;

            // color
            let (inner, color) = parse_color(i)?;
            log::debug!("Color: {color:?}");
            i = inner;
            track.color = color;

            // settings
            let (inner, (settings_flags, auto_accentuation, bank)) =
                (parse_short, parse_u8, parse_u8).parse(i)?;
            i = inner;
            track.settings_flags = settings_flags;
            track.auto_accentuation = auto_accentuation;
            track.channel.bank = bank;

            let (inner, rse) = parse_track_rse(version)(i)?;
            i = inner;
            track.rse = rse;

            Ok((i, track))
        }
    }

    /// Read MIDI channel. MIDI channel in Guitar Pro is represented by two integers.
    /// First is one-based number of channel, second is one-based number of channel used for effects.
    pub fn parse_track_channel(&self) -> impl FnMut(&[u8]) -> IResult<&[u8], MidiChannel> + '_ {
        log::debug!("Parsing track channel");
        move |i| {
            let (inner, (gm_channel_1, gm_channel_2)) = (parse_int, parse_int).parse(i)?;
            log::debug!("Track channel gm1: {gm_channel_1} gm2: {gm_channel_2}");
            let (Ok(channel_id), Ok(effect_channel_id)) =
                (u8::try_from(gm_channel_1 - 1), u8::try_from(gm_channel_2 - 1))
            else {
                return invalid_value(i, "track channel");
            };
            if usize::from(channel_id) >= MIDI_CHANNEL_COUNT
                || usize::from(effect_channel_id) >= MIDI_CHANNEL_COUNT
            {
                log::debug!("Track channel out of range {channel_id}/{effect_channel_id}");
                return invalid_value(i, "track channel");
            }

            let mut channel = self
                .song
                .midi_channels
                .get(channel_id as usize)
                .cloned()
                .unwrap_or_else(|| {
                    log::debug!("channel {channel_id} not found");
                    MidiChannel::new(channel_id)
                });
            channel.channel_id = channel_id;
            channel.effect_channel_id = effect_channel_id;
            Ok((inner, channel))
        }
    }

    /// Read measures. Measures are written in the following order:
    /// - measure 1/track 1
    /// - measure 1/track 2
    /// - ...
    /// - measure 1/track m
    /// - measure 2/track 1
    /// - ...
    /// - measure n/track m
    pub fn parse_measures<'a>(
        &'a mut self,
        measure_headers: &'a [MeasureHeader],
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], ()> + 'a {
        move |i: &[u8]| {
            log::debug!("--------");
            log::debug!("Parsing measures");
            let mut i = i;
            for (measure_index, header) in measure_headers.iter().enumerate() {
                for track_index in 0..self.song.tracks.len() {
                    let (inner, measure) =
                        self.parse_measure(header, measure_index, track_index)(i)?;
                    i = inner;
                    // push measure on track
                    self.song.tracks[track_index].measures.push(measure);
                }
            }
            Ok((i, ()))
        }
    }

    pub fn parse_measure<'a>(
        &'a self,
        header: &'a MeasureHeader,
        measure_index: usize,
        track_index: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Measure> + 'a {
        move |i: &[u8]| {
            log::debug!("--------");
            log::debug!("Parsing measure {measure_index} for track {track_index}");
            let mut i = i;
            let mut voices = Vec::with_capacity(MAX_VOICES);
            for voice_index in 0..MAX_VOICES {
                log::debug!("Parsing voice {voice_index}");
                let (inner, voice) = self.parse_voice(track_index)(i)?;
                i = inner;
                voices.push(voice);
            }
            let (i, line_break) = parse_u8(i)?;
            let measure = Measure {
                header: header.clone(),
                text: None,
                voices,
                line_break,
            };
            Ok((i, measure))
        }
    }

    pub fn parse_voice(&self, track_index: usize) -> impl FnMut(&[u8]) -> IResult<&[u8], Voice> + '_ {
        move |i: &[u8]| {
            let (mut i, beats) = parse_count(i)?;
            log::debug!("...with {beats} beats");
            let mut voice = Voice {
                beats: Vec::with_capacity(beats),
            };
            for b in 1..=beats {
                log::debug!("Parsing beat {b}");
                let (inner, beat) = self.parse_beat(track_index)(i)?;
                i = inner;
                voice.beats.push(beat);
            }
            Ok((i, voice))
        }
    }

    pub fn parse_beat(&self, track_index: usize) -> impl FnMut(&[u8]) -> IResult<&[u8], Beat> + '_ {
        move |i: &[u8]| {
            let version = self.song.version;
            let (mut i, flags) = parse_u8(i)?;
            let mut beat = Beat::default();

            // beat status
            if (flags & 0x40) != 0 {
                let (inner, status) = parse_u8(i)?;
                beat.status = match status {
                    0 => BeatStatus::Empty,
                    1 => BeatStatus::Normal,
                    2 => BeatStatus::Rest,
                    _ => return invalid_value(i, "beat status"),
                };
                i = inner;
            }

            let (inner, duration) = parse_duration(flags)(i)?;
            beat.duration = duration;
            i = inner;

            // beat chords
            if (flags & 0x02) != 0 {
                let (inner, chord) = parse_chord(i)?;
                i = inner;
                beat.chord = Some(chord);
            }

            // beat text
            if (flags & 0x04) != 0 {
                let (inner, text) = parse_int_byte_sized_string(i)?;
                i = inner;
                log::debug!("Beat text: {text}");
                beat.text = Some(text);
            }

            // beat effect
            if (flags & 0x08) != 0 {
                let (inner, effect) = parse_beat_effects(i)?;
                i = inner;
                beat.effect = Some(effect);
            }

            // parse mix change
            if (flags & 0x10) != 0 {
                let (inner, mix_table_change) = parse_mix_table_change(version)(i)?;
                i = inner;
                beat.mix_table_change = Some(mix_table_change);
            }

            // parse notes
            let (inner, string_flags) = parse_u8(i)?;
            i = inner;
            let track = &self.song.tracks[track_index];
            log::debug!(
                "Parsing notes for beat strings:{}, flags:{string_flags:08b}",
                track.strings.len()
            );
            for &(string_number, _tuning) in &track.strings {
                if string_flags & (1u8 << (7 - string_number)) != 0 {
                    log::debug!("Parsing note for string {string_number}");
                    let (inner, note) = parse_note(string_number as i8)(i)?;
                    i = inner;
                    beat.notes.push(note);
                }
            }

            let (inner, display_flags) = parse_short(i)?;
            i = inner;
            beat.display_flags = display_flags;
            if display_flags & BEAT_BREAK_SECONDARY != 0 {
                let (inner, break_secondary) = parse_u8(i)?;
                i = inner;
                beat.break_secondary = Some(break_secondary);
            }
            Ok((i, beat))
        }
    }
}

/// Track RSE settings, the layout differs between GP5.00 and GP5.10.
pub fn parse_track_rse(version: GpVersion) -> impl FnMut(&[u8]) -> IResult<&[u8], TrackRse> {
    move |i: &[u8]| {
        log::debug!("Parsing track RSE");
        map(
            (
                parse_u8,
                count(parse_int, 3),
                skip(12),
                parse_rse_instrument(version),
                cond(version > GpVersion::GP5, count(parse_i8, 4)),
                cond(
                    version > GpVersion::GP5,
                    (parse_int_byte_sized_string, parse_int_byte_sized_string),
                ),
            ),
            |(humanize, unknown, (), instrument, equalizer, effect)| TrackRse {
                humanize,
                unknown,
                instrument,
                equalizer,
                effect,
            },
        )
        .parse(i)
    }
}

pub fn parse_rse_instrument(
    version: GpVersion,
) -> impl FnMut(&[u8]) -> IResult<&[u8], RseInstrument> {
    move |i: &[u8]| {
        let (i, (instrument, unknown, sound_bank)) = (parse_int, parse_int, parse_int).parse(i)?;
        let (i, effect_number) = if version == GpVersion::GP5 {
            let (i, effect_number) = parse_short(i)?;
            let (i, ()) = skip(1)(i)?;
            (i, i32::from(effect_number))
        } else {
            parse_int(i)?
        };
        Ok((
            i,
            RseInstrument {
                instrument,
                unknown,
                sound_bank,
                effect_number,
            },
        ))
    }
}

/// Mix table values are only followed by a transition duration when they change.
fn mix_table_item(value: i8, durations: &mut impl Iterator<Item = i8>) -> Option<MixTableItem> {
    (value >= 0).then(|| MixTableItem::new(i32::from(value), durations.next().unwrap_or(0)))
}

pub fn parse_mix_table_change(
    version: GpVersion,
) -> impl FnMut(&[u8]) -> IResult<&[u8], MixTableChange> {
    move |i: &[u8]| {
        log::debug!("Parsing mix change");
        let (mut i, instrument) = parse_i8(i)?;

        let (inner, rse) = parse_rse_instrument(version)(i)?;
        i = inner;
        if version == GpVersion::GP5 {
            let (inner, ()) = skip(1)(i)?;
            i = inner;
        }

        let (inner, values) = count(parse_i8, 6).parse(i)?;
        i = inner;

        let (inner, tempo_name) = parse_int_byte_sized_string(i)?;
        log::debug!("Tempo name: {tempo_name}");
        i = inner;

        let (inner, tempo_value) = parse_int(i)?;
        i = inner;

        let changed = values.iter().filter(|v| **v >= 0).count();
        let (inner, durations) = count(parse_i8, changed).parse(i)?;
        i = inner;
        let mut durations = durations.into_iter();
        let mut items = values
            .iter()
            .map(|value| mix_table_item(*value, &mut durations));

        let mut mix_table_change = MixTableChange {
            instrument,
            rse,
            volume: items.next().flatten(),
            balance: items.next().flatten(),
            chorus: items.next().flatten(),
            reverb: items.next().flatten(),
            phaser: items.next().flatten(),
            tremolo: items.next().flatten(),
            tempo_name,
            tempo: None,
            hide_tempo: None,
            all_tracks: 0,
            wah: -1,
            rse_effect: None,
        };

        if tempo_value >= 0 {
            let (inner, duration) = parse_i8(i)?;
            i = inner;
            mix_table_change.tempo = Some(MixTableItem::new(tempo_value, duration));
            if version > GpVersion::GP5 {
                let (inner, hide_tempo) = parse_bool(i)?;
                i = inner;
                mix_table_change.hide_tempo = Some(hide_tempo);
            }
        }

        let (inner, (all_tracks, wah)) = (parse_u8, parse_i8).parse(i)?;
        i = inner;
        mix_table_change.all_tracks = all_tracks;
        mix_table_change.wah = wah;

        if version > GpVersion::GP5 {
            let (inner, rse_effect) =
                (parse_int_byte_sized_string, parse_int_byte_sized_string).parse(i)?;
            i = inner;
            mix_table_change.rse_effect = Some(rse_effect);
        }

        Ok((i, mix_table_change))
    }
}

pub fn parse_note(string: i8) -> impl FnMut(&[u8]) -> IResult<&[u8], Note> {
    move |i| {
        log::debug!("Parsing note on string {string}");
        let (mut i, flags) = parse_u8(i)?;
        let mut note = Note::new(string);
        note.flags = flags;

        // note type
        if (flags & 0x20) != 0 {
            let (inner, note_type) = parse_u8(i)?;
            i = inner;
            note.kind = Some(NoteType::get_note_type(note_type));
        }

        // note velocity
        if (flags & 0x10) != 0 {
            let (inner, velocity) = parse_i8(i)?;
            i = inner;
            note.velocity = Some(velocity);
        }

        // note value
        if (flags & 0x20) != 0 {
            let (inner, fret) = parse_i8(i)?;
            i = inner;
            note.fret = Some(fret);
        }

        // fingering
        if (flags & 0x80) != 0 {
            let (inner, fingering) = (parse_i8, parse_i8).parse(i)?;
            i = inner;
            note.fingering = Some(fingering);
        }

        // duration percent
        if (flags & 0x01) != 0 {
            let (inner, duration_percent) = parse_f64(i)?;
            i = inner;
            note.duration_percent = Some(duration_percent);
        }

        // swap accidentals
        let (inner, accidental_flags) = parse_u8(i)?;
        i = inner;
        note.accidental_flags = accidental_flags;

        if (flags & 0x08) != 0 {
            let (inner, effect) = parse_note_effects(i)?;
            i = inner;
            note.effect = Some(effect);
        }

        Ok((i, note))
    }
}
