use crate::parser::song_parser::{
    GpVersion, KeySignature, Lyrics, MeasureHeader, MidiChannel, PageSetup, RseInstrument, Song,
    SongInfo, TimeSignature, Track, TrackRse, DIRECTION_COUNT, LYRICS_LINE_COUNT, MAX_STRINGS,
    MIDI_CHANNEL_COUNT,
};
use crate::writer::primitive_writer::{
    write_blank, write_byte_size_string, write_color, write_i8, write_int,
    write_int_byte_sized_string, write_int_sized_string, write_len, write_short, write_u8,
};
use crate::SetlistError;
use std::path::Path;

/// Serializes a [`Song`] to the Guitar Pro 5.00 layout.
///
/// Data only known to GP5.10 files (RSE master effect, hidden tempo, equalizers)
/// has no place in that layout and is dropped.
pub struct SongWriter {
    pub(super) data: Vec<u8>,
}

impl SongWriter {
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn write_song(mut self, song: &Song) -> Result<Vec<u8>, SetlistError> {
        validate_tracks(&song.tracks)?;
        let headers = collect_measure_headers(song);
        log::debug!(
            "Writing song '{}' with {} tracks and {} measures",
            song.title(),
            song.tracks.len(),
            headers.len()
        );

        write_byte_size_string(&mut self.data, GpVersion::GP5.version_string(), 30);
        self.write_info(&song.song_info);
        self.write_lyrics(&song.lyrics);
        self.write_page_setup(&song.page_setup);
        write_int_byte_sized_string(
            &mut self.data,
            song.tempo.name.as_deref().unwrap_or_default(),
        );
        write_int(&mut self.data, song.tempo.value);
        write_i8(&mut self.data, song.key_signature);
        write_int(&mut self.data, song.octave);
        self.write_midi_channels(song);
        for index in 0..DIRECTION_COUNT {
            write_short(
                &mut self.data,
                song.directions.get(index).copied().unwrap_or(-1),
            );
        }
        write_int(&mut self.data, song.master_reverb);

        write_len(&mut self.data, headers.len());
        write_len(&mut self.data, song.tracks.len());
        self.write_measure_headers(&headers);
        self.write_tracks(&song.tracks);
        self.write_measures(song, &headers)?;
        Ok(self.data)
    }

    fn write_info(&mut self, info: &SongInfo) {
        for value in [
            &info.title,
            &info.subtitle,
            &info.artist,
            &info.album,
            &info.words,
            &info.music,
            &info.copyright,
            &info.tab,
            &info.instructions,
        ] {
            write_int_byte_sized_string(&mut self.data, value);
        }
        write_len(&mut self.data, info.notices.len());
        for notice in &info.notices {
            write_int_byte_sized_string(&mut self.data, notice);
        }
    }

    fn write_lyrics(&mut self, lyrics: &Lyrics) {
        write_int(&mut self.data, lyrics.track_choice);
        for index in 0..LYRICS_LINE_COUNT {
            match lyrics.lines.get(index) {
                Some((start_measure, text)) => {
                    write_int(&mut self.data, *start_measure);
                    write_int_sized_string(&mut self.data, text);
                }
                None => {
                    write_int(&mut self.data, 1);
                    write_int_sized_string(&mut self.data, "");
                }
            }
        }
    }

    fn write_page_setup(&mut self, page_setup: &PageSetup) {
        write_int(&mut self.data, page_setup.page_size.x);
        write_int(&mut self.data, page_setup.page_size.y);
        let margin = &page_setup.page_margin;
        for value in [margin.right, margin.top, margin.left, margin.bottom] {
            write_int(&mut self.data, value);
        }
        write_int(&mut self.data, page_setup.score_size_proportion);
        write_short(&mut self.data, page_setup.header_and_footer);
        for value in [
            &page_setup.title,
            &page_setup.subtitle,
            &page_setup.artist,
            &page_setup.album,
            &page_setup.words,
            &page_setup.music,
            &page_setup.word_and_music,
            &page_setup.copyright,
            &page_setup.copyright_notice,
            &page_setup.page_number,
        ] {
            write_int_byte_sized_string(&mut self.data, value);
        }
    }

    /// The track channel settings are stored in the song channel table.
    /// When several tracks share a channel the first one wins.
    fn write_midi_channels(&mut self, song: &Song) {
        let mut channels: Vec<MidiChannel> = (0..MIDI_CHANNEL_COUNT as u8)
            .map(|id| {
                song.midi_channels
                    .get(id as usize)
                    .cloned()
                    .unwrap_or_else(|| MidiChannel::new(id))
            })
            .collect();
        for track in song.tracks.iter().rev() {
            let channel = &track.channel;
            for id in [channel.channel_id, channel.effect_channel_id] {
                match channels.get_mut(id as usize) {
                    Some(slot) => {
                        *slot = MidiChannel {
                            channel_id: slot.channel_id,
                            effect_channel_id: slot.effect_channel_id,
                            bank: slot.bank,
                            ..channel.clone()
                        };
                    }
                    None => log::warn!("Track '{}' uses unknown channel {id}", track.name),
                }
            }
        }
        for channel in &channels {
            write_int(&mut self.data, channel.instrument);
            for value in [
                channel.volume,
                channel.balance,
                channel.chorus,
                channel.reverb,
                channel.phaser,
                channel.tremolo,
            ] {
                write_i8(&mut self.data, value);
            }
            write_blank(&mut self.data, 2);
        }
    }

    fn write_measure_headers(&mut self, headers: &[&MeasureHeader]) {
        let mut previous: Option<&MeasureHeader> = None;
        for (index, &header) in headers.iter().enumerate() {
            if index > 0 {
                write_blank(&mut self.data, 1);
            }
            self.write_measure_header(header, previous);
            previous = Some(header);
        }
    }

    /// Time and key signatures are only written when they differ from the previous measure.
    pub fn write_measure_header(&mut self, header: &MeasureHeader, previous: Option<&MeasureHeader>) {
        let default_time_signature = TimeSignature::default();
        let default_key_signature = KeySignature::new(0, false);
        let (previous_time_signature, previous_key_signature) = previous.map_or(
            (&default_time_signature, &default_key_signature),
            |p| (&p.time_signature, &p.key_signature),
        );

        let mut flags = 0u8;
        if previous.is_none() || header.time_signature != *previous_time_signature {
            flags |= 0x01 | 0x02;
        }
        if header.repeat_open {
            flags |= 0x04;
        }
        if header.repeat_close.is_some() {
            flags |= 0x08;
        }
        if header.repeat_alternative.is_some() {
            flags |= 0x10;
        }
        if header.marker.is_some() {
            flags |= 0x20;
        }
        if header.key_signature != *previous_key_signature {
            flags |= 0x40;
        }
        if header.double_bar {
            flags |= 0x80;
        }
        write_u8(&mut self.data, flags);

        let time_signature = &header.time_signature;
        if flags & 0x01 != 0 {
            write_i8(&mut self.data, time_signature.numerator);
        }
        if flags & 0x02 != 0 {
            write_i8(&mut self.data, time_signature.denominator);
        }
        if let Some(repeat_close) = header.repeat_close {
            write_i8(&mut self.data, repeat_close);
        }
        if let Some(marker) = &header.marker {
            write_int_byte_sized_string(&mut self.data, &marker.title);
            write_color(&mut self.data, marker.color);
        }
        if let Some(alternative) = header.repeat_alternative {
            write_u8(&mut self.data, alternative);
        }
        if flags & 0x40 != 0 {
            write_i8(&mut self.data, header.key_signature.key);
            write_i8(&mut self.data, i8::from(header.key_signature.is_minor));
        }
        if flags & 0x03 != 0 {
            self.data.extend_from_slice(&time_signature.beams);
        }
        if flags & 0x10 == 0 {
            write_blank(&mut self.data, 1);
        }
        write_u8(&mut self.data, header.triplet_feel.to_byte());
    }

    fn write_tracks(&mut self, tracks: &[Track]) {
        for (index, track) in tracks.iter().enumerate() {
            log::debug!("Writing track {} '{}'", index + 1, track.name);
            self.write_track(track);
        }
        write_blank(&mut self.data, 2);
    }

    fn write_track(&mut self, track: &Track) {
        write_blank(&mut self.data, 1);
        let mut flags = 0u8;
        for (set, bit) in [
            (track.percussion, 0x01),
            (track.twelve_stringed, 0x02),
            (track.banjo, 0x04),
            (track.visible, 0x08),
            (track.solo, 0x10),
            (track.mute, 0x20),
            (track.use_rse, 0x40),
            (track.indicate_tuning, 0x80),
        ] {
            if set {
                flags |= bit;
            }
        }
        write_u8(&mut self.data, flags);
        write_byte_size_string(&mut self.data, &track.name, 40);

        write_len(&mut self.data, track.strings.len());
        for index in 0..MAX_STRINGS {
            let tuning = track.strings.get(index).map_or(0, |&(_, tuning)| tuning);
            write_int(&mut self.data, tuning);
        }
        write_int(&mut self.data, track.midi_port);
        write_int(&mut self.data, i32::from(track.channel.channel_id) + 1);
        write_int(&mut self.data, i32::from(track.channel.effect_channel_id) + 1);
        write_int(&mut self.data, track.fret_count);
        write_int(&mut self.data, track.offset);
        write_color(&mut self.data, track.color);

        write_short(&mut self.data, track.settings_flags);
        write_u8(&mut self.data, track.auto_accentuation);
        write_u8(&mut self.data, track.channel.bank);
        self.write_track_rse(&track.rse);
    }

    fn write_track_rse(&mut self, rse: &TrackRse) {
        write_u8(&mut self.data, rse.humanize);
        for index in 0..3 {
            write_int(&mut self.data, rse.unknown.get(index).copied().unwrap_or(0));
        }
        write_blank(&mut self.data, 12);
        self.write_rse_instrument(&rse.instrument);
    }

    pub(super) fn write_rse_instrument(&mut self, instrument: &RseInstrument) {
        write_int(&mut self.data, instrument.instrument);
        write_int(&mut self.data, instrument.unknown);
        write_int(&mut self.data, instrument.sound_bank);
        write_short(
            &mut self.data,
            i16::try_from(instrument.effect_number).unwrap_or(-1),
        );
        write_blank(&mut self.data, 1);
    }
}

impl Default for SongWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_tracks(tracks: &[Track]) -> Result<(), SetlistError> {
    for track in tracks {
        if !(1..=MAX_STRINGS).contains(&track.strings.len()) {
            return Err(SetlistError::EncodingError(format!(
                "track '{}' has {} strings",
                track.name,
                track.strings.len()
            )));
        }
        if track.channel.channel_id as usize >= MIDI_CHANNEL_COUNT {
            return Err(SetlistError::EncodingError(format!(
                "track '{}' uses channel {}",
                track.name, track.channel.channel_id
            )));
        }
    }
    Ok(())
}

/// One header per measure position, taken from the first track reaching that position.
pub fn collect_measure_headers(song: &Song) -> Vec<&MeasureHeader> {
    (0..song.measure_count())
        .filter_map(|index| {
            song.tracks
                .iter()
                .find_map(|track| track.measures.get(index))
                .map(|measure| &measure.header)
        })
        .collect()
}

/// Encode a song as Guitar Pro 5.00 bytes.
pub fn write_gp_data(song: &Song) -> Result<Vec<u8>, SetlistError> {
    SongWriter::new().write_song(song).inspect_err(|e| {
        log::error!("Failed to write GP data: {e}");
    })
}

/// Encode a song and write it to `path`.
///
/// The file is only created once the whole song is encoded.
pub fn write_gp_file(song: &Song, path: &Path) -> Result<(), SetlistError> {
    let data = write_gp_data(song)?;
    std::fs::write(path, &data)?;
    log::debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::song_parser::{parse_measure_header, Marker, Measure};

    fn header_bytes(header: &MeasureHeader, previous: Option<&MeasureHeader>) -> Vec<u8> {
        let mut writer = SongWriter::new();
        writer.write_measure_header(header, previous);
        writer.data
    }

    #[test]
    fn test_first_header_writes_time_signature() {
        let header = MeasureHeader::default();
        let data = header_bytes(&header, None);
        assert_eq!(data, vec![0x03, 4, 4, 2, 2, 2, 2, 0x00, 0x00]);
    }

    #[test]
    fn test_header_only_writes_changes() {
        let previous = MeasureHeader::default();
        let header = MeasureHeader {
            double_bar: true,
            ..Default::default()
        };
        let data = header_bytes(&header, Some(&previous));
        assert_eq!(data, vec![0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_header_is_read_back() {
        let previous = MeasureHeader::default();
        let header = MeasureHeader {
            time_signature: TimeSignature {
                numerator: 3,
                denominator: 4,
                beams: [2, 2, 2, 0],
            },
            key_signature: KeySignature::new(-2, true),
            marker: Some(Marker {
                title: "Chorus".to_string(),
                color: 0x00FF00,
            }),
            repeat_open: true,
            repeat_close: Some(2),
            repeat_alternative: Some(1),
            ..Default::default()
        };
        let data = header_bytes(&header, Some(&previous));
        let (rest, parsed) = parse_measure_header(
            previous.time_signature.clone(),
            previous.key_signature.clone(),
        )(&data)
        .unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_collect_headers_from_longest_track() {
        let short_header = MeasureHeader::default();
        let long_header = MeasureHeader {
            double_bar: true,
            ..Default::default()
        };
        let song = Song {
            tracks: vec![
                Track {
                    measures: vec![Measure::empty(short_header.clone())],
                    ..Default::default()
                },
                Track {
                    measures: vec![
                        Measure::empty(long_header.clone()),
                        Measure::empty(long_header.clone()),
                    ],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let headers = collect_measure_headers(&song);
        assert_eq!(headers, vec![&short_header, &long_header]);
    }

    #[test]
    fn test_reject_track_without_strings() {
        let song = Song {
            tracks: vec![Track {
                strings: vec![],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            write_gp_data(&song),
            Err(SetlistError::EncodingError(_))
        ));
    }
}
