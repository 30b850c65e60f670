use crate::parser::song_parser::{
    GpVersion, Measure, Song, Tempo, Text, Track, MIDI_CHANNEL_COUNT,
};
use crate::SetlistError;
use std::path::{Path, PathBuf};

pub const TITLE_PREFIX: &str = "Setlist - ";

/// Text attached to the first measure of a merged song.
pub fn separator_text(title: &str) -> String {
    format!("--- {title} ---")
}

/// Songs accumulated so far.
///
/// Built from the first song of the setlist, every following song is appended track by track.
/// Tracks are aligned by index, the track count only grows.
#[derive(Debug, Clone)]
pub struct Setlist {
    song: Song,
}

impl Setlist {
    pub fn new(first: Song) -> Self {
        let mut song = first;
        song.song_info.title = format!("{TITLE_PREFIX}{}", song.song_info.title);
        song.version = GpVersion::GP5;
        Self { song }
    }

    pub const fn song(&self) -> &Song {
        &self.song
    }

    /// Append the measures of `next` to the setlist.
    ///
    /// The separator text goes on the first measure each track received from `next`.
    /// Nothing is modified when `next` does not fit the setlist.
    pub fn append(&mut self, next: Song) -> Result<(), SetlistError> {
        self.check_structure(&next)?;
        let separator = separator_text(next.title());
        let tracks = &mut self.song.tracks;

        // new tracks start empty and take their settings from the incoming song
        for (index, track) in next.tracks.iter().enumerate().skip(tracks.len()) {
            log::debug!("Adding track {} '{}'", index + 1, track.name);
            tracks.push(Track::empty_like(track, index as i32 + 1));
        }

        // close the previous song
        for track in tracks.iter_mut() {
            if let Some(last) = track.measures.last_mut() {
                last.header.double_bar = true;
            }
        }

        let starts: Vec<usize> = tracks.iter().map(|track| track.measures.len()).collect();
        for (track, incoming) in tracks.iter_mut().zip(next.tracks) {
            let received = incoming.measures.len();
            track.measures.extend(incoming.measures.into_iter().map(|mut measure| {
                if let Some(tempo) = measure.header.tempo.take() {
                    measure.header.tempo = Some(Tempo::new(tempo.value, tempo.name));
                }
                measure
            }));
            log::debug!("Track '{}' received {received} measures", track.name);
        }

        for (track, start) in tracks.iter_mut().zip(starts) {
            match track.measures.get_mut(start) {
                Some(measure) if measure.text.is_none() => {
                    measure.text = Some(Text::new(separator.as_str()));
                }
                Some(_) => log::debug!("Measure {start} of '{}' already has a text", track.name),
                None => {}
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Song {
        self.song
    }

    /// Every note of `next` must land on a string of its target track.
    /// Every track of `next` must use a channel of the MIDI channel table.
    fn check_structure(&self, next: &Song) -> Result<(), SetlistError> {
        if next.tracks.is_empty() {
            return Err(SetlistError::StructureError(format!(
                "'{}' has no track",
                next.title()
            )));
        }
        for (index, incoming) in next.tracks.iter().enumerate() {
            let channel = &incoming.channel;
            if usize::from(channel.channel_id) >= MIDI_CHANNEL_COUNT
                || usize::from(channel.effect_channel_id) >= MIDI_CHANNEL_COUNT
            {
                return Err(SetlistError::StructureError(format!(
                    "track {} '{}' uses channel {}/{}",
                    index + 1,
                    incoming.name,
                    channel.channel_id,
                    channel.effect_channel_id
                )));
            }
            let target = self.song.tracks.get(index).unwrap_or(incoming);
            let string_count = target.strings.len();
            let misplaced = incoming
                .measures
                .iter()
                .flat_map(Measure::notes)
                .find(|note| note.string < 1 || note.string as usize > string_count);
            if let Some(note) = misplaced {
                return Err(SetlistError::StructureError(format!(
                    "track {} has a note on string {} but '{}' has {string_count} strings",
                    index + 1,
                    note.string,
                    target.name
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of merging a list of files.
#[derive(Debug)]
pub struct MergeReport {
    pub song: Song,
    /// Files that made it into the setlist, in order.
    pub merged: Vec<PathBuf>,
    /// One `MergeStepError` per skipped file.
    pub warnings: Vec<SetlistError>,
}

/// Merge the songs found at `paths` in order.
///
/// The first song is the base of the setlist and must load. A later song that fails
/// to load or to merge is skipped and reported in the warnings.
pub fn merge_setlist<P, F>(paths: &[P], mut load: F) -> Result<MergeReport, SetlistError>
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> Result<Song, SetlistError>,
{
    let (first, rest) = paths.split_first().ok_or(SetlistError::EmptyInputError)?;
    let first = first.as_ref();
    let song = load(first).map_err(|cause| SetlistError::LoadError {
        path: first.to_path_buf(),
        cause: Box::new(cause),
    })?;
    log::info!("Starting setlist with '{}'", song.title());

    let mut setlist = Setlist::new(song);
    let mut merged = vec![first.to_path_buf()];
    let mut warnings = vec![];
    for path in rest {
        let path = path.as_ref();
        match load(path).and_then(|next| setlist.append(next)) {
            Ok(()) => {
                log::info!("Merged {}", path.display());
                merged.push(path.to_path_buf());
            }
            Err(cause) => {
                log::debug!("Skipping {}: {cause}", path.display());
                warnings.push(SetlistError::MergeStepError {
                    path: path.to_path_buf(),
                    cause: Box::new(cause),
                });
            }
        }
    }
    Ok(MergeReport {
        song: setlist.finish(),
        merged,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::song_parser::{Beat, MeasureHeader, Note, SongInfo, Voice, MAX_VOICES};

    fn init_logger() {
        env_logger::builder()
            .is_test(true)
            .try_init()
            .unwrap_or_default();
    }

    /// Measure with a single note whose fret identifies it.
    fn measure(fret: i8) -> Measure {
        let beat = Beat {
            notes: vec![Note {
                fret: Some(fret),
                ..Note::new(1)
            }],
            ..Default::default()
        };
        let mut voices = vec![Voice { beats: vec![beat] }];
        voices.resize(MAX_VOICES, Voice::default());
        Measure {
            header: MeasureHeader::default(),
            text: None,
            voices,
            line_break: 0,
        }
    }

    fn track(name: &str, frets: &[i8]) -> Track {
        Track {
            name: name.to_string(),
            measures: frets.iter().copied().map(measure).collect(),
            ..Default::default()
        }
    }

    fn song(title: &str, tracks: Vec<Track>) -> Song {
        let mut song = Song {
            song_info: SongInfo {
                title: title.to_string(),
                ..Default::default()
            },
            tracks,
            ..Default::default()
        };
        // decoded songs carry their tempo on the first measure
        for track in &mut song.tracks {
            if let Some(first) = track.measures.first_mut() {
                first.header.tempo = Some(Tempo::new(song.tempo.value, Some("Moderate".into())));
            }
        }
        song
    }

    fn frets(track: &Track) -> Vec<Option<i8>> {
        track.measures.iter().map(|m| m.notes().next().and_then(|n| n.fret)).collect()
    }

    #[test]
    fn test_single_song() {
        let first = song("Intro", vec![track("Guitar", &[1, 2])]);
        let setlist = Setlist::new(first.clone());
        let merged = setlist.finish();
        assert_eq!(merged.title(), "Setlist - Intro");
        assert_eq!(merged.version, GpVersion::GP5);
        assert_eq!(merged.tracks, first.tracks);
    }

    #[test]
    fn test_title_prefix_of_empty_title() {
        let setlist = Setlist::new(song("", vec![track("Guitar", &[1])]));
        assert_eq!(setlist.song().title(), "Setlist - ");
    }

    #[test]
    fn test_equal_track_counts() {
        let a = song("A", vec![track("Guitar", &[1, 2]), track("Bass", &[3, 4])]);
        let b = song("B", vec![track("Guitar", &[5]), track("Bass", &[6])]);
        let mut setlist = Setlist::new(a);
        setlist.append(b).unwrap();
        let merged = setlist.finish();
        assert_eq!(merged.tracks.len(), 2);
        assert_eq!(frets(&merged.tracks[0]), vec![Some(1), Some(2), Some(5)]);
        assert_eq!(frets(&merged.tracks[1]), vec![Some(3), Some(4), Some(6)]);
    }

    #[test]
    fn test_double_bar_and_separator_on_every_track() {
        let a = song("A", vec![track("Guitar", &[1, 2]), track("Bass", &[3, 4])]);
        let b = song("B", vec![track("Guitar", &[5, 6]), track("Bass", &[7, 8])]);
        let mut setlist = Setlist::new(a);
        setlist.append(b).unwrap();
        let merged = setlist.finish();
        for track in &merged.tracks {
            let double_bars: Vec<bool> =
                track.measures.iter().map(|m| m.header.double_bar).collect();
            assert_eq!(double_bars, vec![false, true, false, false]);
            let texts: Vec<Option<&str>> = track
                .measures
                .iter()
                .map(|m| m.text.as_ref().map(|t| t.value.as_str()))
                .collect();
            assert_eq!(texts, vec![None, None, Some("--- B ---"), None]);
        }
    }

    #[test]
    fn test_incoming_tempo_is_rebuilt() {
        let a = song("A", vec![track("Guitar", &[1])]);
        let mut b = song("B", vec![track("Guitar", &[2, 3])]);
        b.tempo = Tempo::new(90, Some("Slow".to_string()));
        b.tracks[0].measures[0].header.tempo = Some(b.tempo.clone());
        let mut setlist = Setlist::new(a);
        setlist.append(b).unwrap();
        let merged = setlist.finish();
        let tempos: Vec<Option<Tempo>> = merged.tracks[0]
            .measures
            .iter()
            .map(|m| m.header.tempo.clone())
            .collect();
        assert_eq!(
            tempos,
            vec![
                Some(Tempo::new(120, Some("Moderate".to_string()))),
                Some(Tempo::new(90, Some("Slow".to_string()))),
                None
            ]
        );
    }

    #[test]
    fn test_more_tracks_in_next_song() {
        let a = song("A", vec![track("Guitar", &[1, 2])]);
        let mut bass = track("Bass", &[7, 8, 9]);
        bass.strings = vec![(1, 43), (2, 38), (3, 33), (4, 28)];
        bass.channel.channel_id = 2;
        let b = song("B", vec![track("Guitar", &[5, 6, 7]), bass.clone()]);
        let mut setlist = Setlist::new(a);
        setlist.append(b).unwrap();
        let merged = setlist.finish();
        assert_eq!(merged.tracks.len(), 2);
        let added = &merged.tracks[1];
        assert_eq!(added.number, 2);
        assert_eq!(added.name, "Bass");
        assert_eq!(added.strings, bass.strings);
        assert_eq!(added.channel, bass.channel);
        assert_eq!(frets(added), vec![Some(7), Some(8), Some(9)]);
        // the new track starts with the separator
        assert_eq!(
            added.measures[0].text.as_ref().map(|t| t.value.as_str()),
            Some("--- B ---")
        );
        assert!(added.measures.iter().all(|m| !m.header.double_bar));
    }

    #[test]
    fn test_fewer_tracks_in_next_song() {
        let a = song("A", vec![track("Guitar", &[1]), track("Bass", &[2])]);
        let b = song("B", vec![track("Guitar", &[3, 4])]);
        let mut setlist = Setlist::new(a);
        setlist.append(b).unwrap();
        let merged = setlist.finish();
        assert_eq!(frets(&merged.tracks[0]), vec![Some(1), Some(3), Some(4)]);
        assert_eq!(frets(&merged.tracks[1]), vec![Some(2)]);
        assert!(merged.tracks[1].measures[0].header.double_bar);
    }

    #[test]
    fn test_existing_text_is_kept() {
        let a = song("A", vec![track("Guitar", &[1])]);
        let mut b = song("B", vec![track("Guitar", &[2])]);
        b.tracks[0].measures[0].text = Some(Text::new("Verse"));
        let mut setlist = Setlist::new(a);
        setlist.append(b).unwrap();
        let merged = setlist.finish();
        assert_eq!(merged.tracks[0].measures[1].text, Some(Text::new("Verse")));
    }

    #[test]
    fn test_song_without_measures() {
        let a = song("A", vec![track("Guitar", &[1])]);
        let b = song("B", vec![track("Guitar", &[])]);
        let mut setlist = Setlist::new(a);
        setlist.append(b).unwrap();
        let merged = setlist.finish();
        assert_eq!(merged.tracks[0].measures.len(), 1);
        assert!(merged.tracks[0].measures[0].header.double_bar);
        assert_eq!(merged.tracks[0].measures[0].text, None);
    }

    #[test]
    fn test_rejected_song_leaves_setlist_untouched() {
        let mut bass = track("Bass", &[1]);
        bass.strings.truncate(4);
        let mut setlist = Setlist::new(song("A", vec![bass]));
        let before = setlist.song().clone();

        // string 6 does not exist on the bass
        let mut guitar = track("Guitar", &[3]);
        guitar.measures[0].voices[0].beats[0].notes[0].string = 6;
        let result = setlist.append(song("B", vec![guitar]));
        assert!(matches!(result, Err(SetlistError::StructureError(_))));
        assert_eq!(setlist.song(), &before);

        let result = setlist.append(song("C", vec![]));
        assert!(matches!(result, Err(SetlistError::StructureError(_))));
        assert_eq!(setlist.song(), &before);
    }

    #[test]
    fn test_merge_setlist_empty_input() {
        let paths: [PathBuf; 0] = [];
        let result = merge_setlist(&paths, |_| Ok(Song::default()));
        assert!(matches!(result, Err(SetlistError::EmptyInputError)));
    }

    #[test]
    fn test_merge_setlist_first_load_fails() {
        let result = merge_setlist(&["a.gp5", "b.gp5"], |path| {
            Err(SetlistError::IoError(format!("missing {}", path.display())))
        });
        match result {
            Err(SetlistError::LoadError { path, cause }) => {
                assert_eq!(path, PathBuf::from("a.gp5"));
                assert!(matches!(*cause, SetlistError::IoError(_)));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_merge_setlist_skips_failing_song() {
        init_logger();
        let load = |path: &Path| match path.to_str() {
            Some("a.gp5") => Ok(song("A", vec![track("Guitar", &[1, 2])])),
            Some("c.gp5") => Ok(song("C", vec![track("Guitar", &[3])])),
            _ => Err(SetlistError::ParsingError("Failed to parse GP data".to_string())),
        };
        let with_failure = merge_setlist(&["a.gp5", "b.gp5", "c.gp5"], load).unwrap();
        let without = merge_setlist(&["a.gp5", "c.gp5"], load).unwrap();

        assert_eq!(with_failure.song, without.song);
        assert_eq!(
            with_failure.merged,
            vec![PathBuf::from("a.gp5"), PathBuf::from("c.gp5")]
        );
        assert_eq!(with_failure.warnings.len(), 1);
        assert!(without.warnings.is_empty());
        match &with_failure.warnings[0] {
            SetlistError::MergeStepError { path, cause } => {
                assert_eq!(path, &PathBuf::from("b.gp5"));
                assert!(matches!(**cause, SetlistError::ParsingError(_)));
            }
            other => panic!("unexpected warning {other:?}"),
        }
    }

    #[test]
    fn test_merge_setlist_skips_song_with_unknown_channel() {
        init_logger();
        let load = |path: &Path| match path.to_str() {
            Some("a.gp5") => Ok(song("A", vec![track("Guitar", &[1, 2])])),
            Some("b.gp5") => {
                let mut guitar = track("Guitar", &[3]);
                guitar.channel.channel_id = 70;
                Ok(song("B", vec![guitar]))
            }
            _ => Ok(song("C", vec![track("Guitar", &[4])])),
        };
        let with_failure = merge_setlist(&["a.gp5", "b.gp5", "c.gp5"], load).unwrap();
        let without = merge_setlist(&["a.gp5", "c.gp5"], load).unwrap();

        assert_eq!(with_failure.song, without.song);
        assert_eq!(with_failure.warnings.len(), 1);
        match &with_failure.warnings[0] {
            SetlistError::MergeStepError { path, cause } => {
                assert_eq!(path, &PathBuf::from("b.gp5"));
                assert!(matches!(**cause, SetlistError::StructureError(_)));
            }
            other => panic!("unexpected warning {other:?}"),
        }
        // the setlist stays encodable
        assert!(crate::writer::song_writer::write_gp_data(&with_failure.song).is_ok());
    }

    #[test]
    fn test_intro_outro_scenario() {
        init_logger();
        let load = |path: &Path| match path.to_str() {
            Some("intro.gp5") => Ok(song("Intro", vec![track("Guitar", &[1, 2])])),
            _ => Ok(song("Outro", vec![track("Guitar", &[3, 4, 5])])),
        };
        let report = merge_setlist(&["intro.gp5", "outro.gp5"], load).unwrap();
        let merged = report.song;
        assert_eq!(merged.title(), "Setlist - Intro");
        let measures = &merged.tracks[0].measures;
        assert_eq!(measures.len(), 5);
        assert!(measures[1].header.double_bar);
        assert_eq!(measures[2].text, Some(Text::new("--- Outro ---")));
        let texts = measures.iter().filter(|m| m.text.is_some()).count();
        assert_eq!(texts, 1);
    }
}
