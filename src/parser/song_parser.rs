use crate::parser::music_parser::MusicParser;
use crate::parser::primitive_parser::{
    parse_bool, parse_byte_size_string, parse_i8, parse_int, parse_int_byte_sized_string,
    parse_int_sized_string, parse_short, parse_u8, skip,
};
use crate::SetlistError;
use nom::bytes::complete::take;
use nom::combinator::{cond, consumed, flat_map, map};
use nom::error::{Error, ErrorKind};
use nom::multi::count;
use nom::sequence::preceded;
use nom::IResult;
use nom::Parser;

// GP5 docs thanks to Tuxguitar and <https://github.com/slundi/guitarpro> for the help

pub const MAX_VOICES: usize = 2;
pub const MAX_STRINGS: usize = 7;
pub const MIDI_CHANNEL_COUNT: usize = 64;
pub const DIRECTION_COUNT: usize = 19;
pub const LYRICS_LINE_COUNT: usize = 5;

pub const QUARTER: u16 = 4;

pub const PERCUSSION_CHANNEL: u8 = 9;
pub const DEFAULT_PERCUSSION_BANK: u8 = 128;
pub const DEFAULT_BANK: u8 = 0;

/// Beat display flag announcing a secondary beam break byte.
pub const BEAT_BREAK_SECONDARY: i16 = 0x0800;

/// Fail the current parser on a value outside of the known format.
pub fn invalid_value<'a, T>(i: &'a [u8], what: &str) -> IResult<&'a [u8], T> {
    log::debug!("Invalid value for {what}");
    Err(nom::Err::Error(Error::new(i, ErrorKind::Verify)))
}

/// Converts a count read from the file into a usize.
pub fn parse_count(i: &[u8]) -> IResult<&[u8], usize> {
    let (inner, value) = parse_int(i)?;
    match usize::try_from(value) {
        Ok(n) => Ok((inner, n)),
        Err(_) => invalid_value(i, "count"),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Default)]
pub enum GpVersion {
    #[default]
    GP5,
    GP5_10,
}

impl GpVersion {
    /// Version string found at the start of the file.
    pub const fn version_string(self) -> &'static str {
        match self {
            Self::GP5 => "FICHIER GUITAR PRO v5.00",
            Self::GP5_10 => "FICHIER GUITAR PRO v5.10",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub version: GpVersion,
    pub song_info: SongInfo,
    pub lyrics: Lyrics,
    pub master_effect: Option<Vec<u8>>, // only GP5.10
    pub page_setup: PageSetup,
    pub tempo: Tempo,
    pub hide_tempo: Option<bool>, // only GP5.10
    pub key_signature: i8,
    pub octave: i32,
    pub midi_channels: Vec<MidiChannel>,
    pub directions: Vec<i16>,
    pub master_reverb: i32,
    pub tracks: Vec<Track>,
}

impl Default for Song {
    fn default() -> Self {
        Song {
            version: GpVersion::GP5,
            song_info: SongInfo::default(),
            lyrics: Lyrics::default(),
            master_effect: None,
            page_setup: PageSetup::default(),
            tempo: Tempo::default(),
            hide_tempo: None,
            key_signature: 0,
            octave: 0,
            midi_channels: (0..MIDI_CHANNEL_COUNT as u8).map(MidiChannel::new).collect(),
            directions: vec![-1; DIRECTION_COUNT],
            master_reverb: 0,
            tracks: vec![],
        }
    }
}

impl Song {
    pub fn title(&self) -> &str {
        &self.song_info.title
    }

    /// Number of measures of the longest track.
    pub fn measure_count(&self) -> usize {
        self.tracks
            .iter()
            .map(|track| track.measures.len())
            .max()
            .unwrap_or(0)
    }
}

/// MIDI channel settings, volume and effects are kept in their raw file scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiChannel {
    pub channel_id: u8,
    pub effect_channel_id: u8,
    pub instrument: i32,
    pub volume: i8,
    pub balance: i8,
    pub chorus: i8,
    pub reverb: i8,
    pub phaser: i8,
    pub tremolo: i8,
    pub bank: u8,
}

impl MidiChannel {
    pub const fn new(channel_id: u8) -> Self {
        let percussion = channel_id == PERCUSSION_CHANNEL;
        MidiChannel {
            channel_id,
            effect_channel_id: channel_id,
            instrument: if percussion { 0 } else { 25 },
            volume: 13,
            balance: 8,
            chorus: 0,
            reverb: 0,
            phaser: 0,
            tremolo: 0,
            bank: if percussion {
                DEFAULT_PERCUSSION_BANK
            } else {
                DEFAULT_BANK
            },
        }
    }

    pub const fn is_percussion(&self) -> bool {
        self.channel_id == PERCUSSION_CHANNEL
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Padding {
    pub right: i32,
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSetup {
    pub page_size: Point,
    pub page_margin: Padding,
    /// Percentage
    pub score_size_proportion: i32,
    pub header_and_footer: i16,
    pub title: String,
    pub subtitle: String,
    pub artist: String,
    pub album: String,
    pub words: String,
    pub music: String,
    pub word_and_music: String,
    pub copyright: String,
    pub copyright_notice: String,
    pub page_number: String,
}

impl Default for PageSetup {
    fn default() -> Self {
        PageSetup {
            page_size: Point { x: 210, y: 297 },
            page_margin: Padding {
                right: 10,
                top: 15,
                left: 10,
                bottom: 10,
            },
            score_size_proportion: 100,
            header_and_footer: 0x01FF,
            title: "%TITLE%".to_string(),
            subtitle: "%SUBTITLE%".to_string(),
            artist: "%ARTIST%".to_string(),
            album: "%ALBUM%".to_string(),
            words: "Words by %WORDS%".to_string(),
            music: "Music by %MUSIC%".to_string(),
            word_and_music: "Words & Music by %WORDSMUSIC%".to_string(),
            copyright: "Copyright %COPYRIGHT%".to_string(),
            copyright_notice: "All Rights Reserved - International Copyright Secured".to_string(),
            page_number: "Page %N%/%P%".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lyrics {
    pub track_choice: i32,
    /// Starting measure and text of each lyrics line
    pub lines: Vec<(i32, String)>,
}

impl Default for Lyrics {
    fn default() -> Self {
        Lyrics {
            track_choice: 0,
            lines: vec![(1, String::new()); LYRICS_LINE_COUNT],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SongInfo {
    pub title: String,
    pub subtitle: String,
    pub artist: String,
    pub album: String,
    pub words: String,
    pub music: String,
    pub copyright: String,
    pub tab: String,
    pub instructions: String,
    pub notices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub title: String,
    pub color: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySignature {
    pub key: i8,
    pub is_minor: bool,
}

impl KeySignature {
    pub const fn new(key: i8, is_minor: bool) -> Self {
        KeySignature { key, is_minor }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripletFeel {
    None,
    Eighth,
    Sixteenth,
}

impl TripletFeel {
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Eighth => 1,
            Self::Sixteenth => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tempo {
    pub value: i32,
    pub name: Option<String>,
}

impl Tempo {
    pub const fn new(value: i32, name: Option<String>) -> Self {
        Tempo { value, name }
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            value: 120,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: i8,
    pub denominator: i8,
    pub beams: [u8; 4],
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature {
            numerator: 4,
            denominator: 4,
            beams: [2, 2, 2, 2],
        }
    }
}

/// Header of a measure.
///
/// Guitar Pro shares one header between the measures of all tracks at the same position,
/// here every measure owns a copy so that tracks can be extended independently.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureHeader {
    pub time_signature: TimeSignature,
    pub key_signature: KeySignature,
    /// Tempo in effect from the start of this measure, when it is known at that level.
    pub tempo: Option<Tempo>,
    pub marker: Option<Marker>,
    pub repeat_open: bool,
    pub repeat_close: Option<i8>,
    pub repeat_alternative: Option<u8>,
    pub double_bar: bool,
    pub triplet_feel: TripletFeel,
}

impl Default for MeasureHeader {
    fn default() -> Self {
        MeasureHeader {
            time_signature: TimeSignature::default(),
            key_signature: KeySignature::new(0, false),
            tempo: None,
            marker: None,
            repeat_open: false,
            repeat_close: None,
            repeat_alternative: None,
            double_bar: false,
            triplet_feel: TripletFeel::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duration {
    pub value: u16,
    pub dotted: bool,
    pub tuplet_enters: u8,
    pub tuplet_times: u8,
}

impl Default for Duration {
    fn default() -> Self {
        Duration {
            value: QUARTER,
            dotted: false,
            tuplet_enters: 1,
            tuplet_times: 1,
        }
    }
}

impl Duration {
    pub const fn has_tuplet(&self) -> bool {
        self.tuplet_enters != 1 || self.tuplet_times != 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BendPoint {
    pub position: i32,
    pub value: i32,
    pub vibrato: bool,
}

/// Bend or tremolo bar, points are kept in file units.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BendEffect {
    pub kind: i8,
    pub value: i32,
    pub points: Vec<BendPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraceEffect {
    pub fret: u8,
    pub velocity: u8,
    pub transition: u8,
    pub duration: u8,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarmonicEffect {
    Natural,
    Artificial {
        semitone: u8,
        accidental: i8,
        octave: u8,
    },
    Tapped {
        right_hand_fret: u8,
    },
    Pinch,
    Semi,
}

impl HarmonicEffect {
    pub const fn to_byte(&self) -> i8 {
        match self {
            Self::Natural => 1,
            Self::Artificial { .. } => 2,
            Self::Tapped { .. } => 3,
            Self::Pinch => 4,
            Self::Semi => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrillEffect {
    pub fret: i8,
    pub period: i8,
}

/// Note effect flags carrying a payload, the other bits are kept as read.
pub const NOTE_EFFECT1_BEND: u8 = 0x01;
pub const NOTE_EFFECT1_GRACE: u8 = 0x10;
pub const NOTE_EFFECT2_TREMOLO_PICKING: u8 = 0x04;
pub const NOTE_EFFECT2_SLIDE: u8 = 0x08;
pub const NOTE_EFFECT2_HARMONIC: u8 = 0x10;
pub const NOTE_EFFECT2_TRILL: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoteEffect {
    /// hammer, let ring...
    pub flags1: u8,
    /// staccato, palm mute, vibrato...
    pub flags2: u8,
    pub bend: Option<BendEffect>,
    pub grace: Option<GraceEffect>,
    pub tremolo_picking: Option<u8>,
    pub slide: Option<u8>,
    pub harmonic: Option<HarmonicEffect>,
    pub trill: Option<TrillEffect>,
}

/// Chord diagram, kept as raw bytes since nothing here interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chord {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatStroke {
    pub up: i8,
    pub down: i8,
}

pub const BEAT_EFFECT1_SLAP: u8 = 0x20;
pub const BEAT_EFFECT1_STROKE: u8 = 0x40;
pub const BEAT_EFFECT2_PICK_STROKE: u8 = 0x02;
pub const BEAT_EFFECT2_TREMOLO_BAR: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeatEffects {
    /// vibrato, fade in...
    pub flags1: u8,
    /// rasgueado...
    pub flags2: u8,
    pub slap: Option<u8>,
    pub tremolo_bar: Option<BendEffect>,
    pub stroke: Option<BeatStroke>,
    pub pick_stroke: Option<i8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RseInstrument {
    pub instrument: i32,
    pub unknown: i32,
    pub sound_bank: i32,
    pub effect_number: i32,
}

impl Default for RseInstrument {
    fn default() -> Self {
        RseInstrument {
            instrument: -1,
            unknown: -1,
            sound_bank: -1,
            effect_number: -1,
        }
    }
}

/// A value of a mix table change with its transition duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixTableItem {
    pub value: i32,
    pub duration: i8,
}

impl MixTableItem {
    pub const fn new(value: i32, duration: i8) -> Self {
        MixTableItem { value, duration }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixTableChange {
    pub instrument: i8,
    pub rse: RseInstrument,
    pub volume: Option<MixTableItem>,
    pub balance: Option<MixTableItem>,
    pub chorus: Option<MixTableItem>,
    pub reverb: Option<MixTableItem>,
    pub phaser: Option<MixTableItem>,
    pub tremolo: Option<MixTableItem>,
    pub tempo_name: String,
    pub tempo: Option<MixTableItem>,
    pub hide_tempo: Option<bool>, // only GP5.10
    pub all_tracks: u8,
    pub wah: i8,
    pub rse_effect: Option<(String, String)>, // only GP5.10
}

impl MixTableChange {
    /// Mix table changing only the tempo.
    pub fn tempo_change(tempo: &Tempo) -> Self {
        MixTableChange {
            instrument: -1,
            rse: RseInstrument::default(),
            volume: None,
            balance: None,
            chorus: None,
            reverb: None,
            phaser: None,
            tremolo: None,
            tempo_name: tempo.name.clone().unwrap_or_default(),
            tempo: Some(MixTableItem::new(tempo.value, 0)),
            hide_tempo: None,
            all_tracks: 0,
            wah: -1,
            rse_effect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteType {
    Rest,
    Normal,
    Tie,
    Dead,
    Unknown(u8),
}

impl NoteType {
    pub const fn get_note_type(value: u8) -> NoteType {
        match value {
            0 => NoteType::Rest,
            1 => NoteType::Normal,
            2 => NoteType::Tie,
            3 => NoteType::Dead,
            _ => NoteType::Unknown(value),
        }
    }

    pub const fn to_byte(&self) -> u8 {
        match self {
            NoteType::Rest => 0,
            NoteType::Normal => 1,
            NoteType::Tie => 2,
            NoteType::Dead => 3,
            NoteType::Unknown(value) => *value,
        }
    }
}

/// Note flags without payload: heavy accentuation, ghost note and accentuation.
pub const NOTE_STYLE_FLAGS: u8 = 0x02 | 0x04 | 0x40;

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// 1-based string number
    pub string: i8,
    pub flags: u8,
    pub kind: Option<NoteType>,
    pub fret: Option<i8>,
    pub velocity: Option<i8>,
    pub fingering: Option<(i8, i8)>,
    pub duration_percent: Option<f64>,
    pub accidental_flags: u8,
    pub effect: Option<NoteEffect>,
}

impl Note {
    pub const fn new(string: i8) -> Self {
        Note {
            string,
            flags: 0,
            kind: None,
            fret: None,
            velocity: None,
            fingering: None,
            duration_percent: None,
            accidental_flags: 0,
            effect: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatStatus {
    Empty,
    Normal,
    Rest,
}

impl BeatStatus {
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Normal => 1,
            Self::Rest => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beat {
    pub status: BeatStatus,
    pub duration: Duration,
    pub chord: Option<Chord>,
    pub text: Option<String>,
    pub effect: Option<BeatEffects>,
    pub mix_table_change: Option<MixTableChange>,
    pub notes: Vec<Note>,
    pub display_flags: i16,
    pub break_secondary: Option<u8>,
}

impl Default for Beat {
    fn default() -> Self {
        Beat {
            status: BeatStatus::Normal,
            duration: Duration::default(),
            chord: None,
            text: None,
            effect: None,
            mix_table_change: None,
            notes: vec![],
            display_flags: 0,
            break_secondary: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Voice {
    pub beats: Vec<Beat>,
}

/// Free text attached to a measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    pub value: String,
}

impl Text {
    pub fn new(value: impl Into<String>) -> Self {
        Text {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub header: MeasureHeader,
    pub text: Option<Text>,
    pub voices: Vec<Voice>,
    pub line_break: u8,
}

impl Measure {
    /// Measure holding a single empty beat per voice.
    pub fn empty(header: MeasureHeader) -> Self {
        let empty_beat = Beat {
            status: BeatStatus::Empty,
            ..Default::default()
        };
        Measure {
            header,
            text: None,
            voices: vec![
                Voice {
                    beats: vec![empty_beat],
                };
                MAX_VOICES
            ],
            line_break: 0,
        }
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.voices
            .iter()
            .flat_map(|v| v.beats.iter())
            .flat_map(|b| b.notes.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRse {
    pub humanize: u8,
    pub unknown: Vec<i32>,
    pub instrument: RseInstrument,
    pub equalizer: Option<Vec<i8>>,       // only GP5.10
    pub effect: Option<(String, String)>, // only GP5.10
}

impl Default for TrackRse {
    fn default() -> Self {
        TrackRse {
            humanize: 0,
            unknown: vec![0; 3],
            instrument: RseInstrument::default(),
            equalizer: None,
            effect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub number: i32,
    pub percussion: bool,
    pub twelve_stringed: bool,
    pub banjo: bool,
    pub visible: bool,
    pub solo: bool,
    pub mute: bool,
    pub use_rse: bool,
    pub indicate_tuning: bool,
    pub name: String,
    /// (string number, tuning)
    pub strings: Vec<(i32, i32)>,
    pub midi_port: i32,
    pub channel: MidiChannel,
    pub fret_count: i32,
    pub offset: i32,
    pub color: i32,
    pub settings_flags: i16,
    pub auto_accentuation: u8,
    pub rse: TrackRse,
    pub measures: Vec<Measure>,
}

impl Default for Track {
    fn default() -> Self {
        Track {
            number: 1,
            percussion: false,
            twelve_stringed: false,
            banjo: false,
            visible: true,
            solo: false,
            mute: false,
            use_rse: false,
            indicate_tuning: false,
            name: String::new(),
            strings: vec![(1, 64), (2, 59), (3, 55), (4, 50), (5, 45), (6, 40)],
            midi_port: 1,
            channel: MidiChannel::new(0),
            fret_count: 24,
            offset: 0,
            color: 0xFF0000,
            settings_flags: 0,
            auto_accentuation: 0,
            rse: TrackRse::default(),
            measures: vec![],
        }
    }
}

impl Track {
    /// Copy of the track settings without any measure.
    pub fn empty_like(source: &Track, number: i32) -> Self {
        Track {
            number,
            percussion: source.percussion,
            twelve_stringed: source.twelve_stringed,
            banjo: source.banjo,
            visible: source.visible,
            solo: source.solo,
            mute: source.mute,
            use_rse: source.use_rse,
            indicate_tuning: source.indicate_tuning,
            name: source.name.clone(),
            strings: source.strings.clone(),
            midi_port: source.midi_port,
            channel: source.channel.clone(),
            fret_count: source.fret_count,
            offset: source.offset,
            color: source.color,
            settings_flags: source.settings_flags,
            auto_accentuation: source.auto_accentuation,
            rse: source.rse.clone(),
            measures: vec![],
        }
    }
}

/// Chords come in two formats, both are kept verbatim.
pub fn parse_chord(i: &[u8]) -> IResult<&[u8], Chord> {
    log::debug!("Parsing chord");
    map(consumed(parse_chord_name), |(data, name): (&[u8], String)| {
        Chord {
            name,
            data: data.to_vec(),
        }
    })
    .parse(i)
}

fn parse_chord_name(i: &[u8]) -> IResult<&[u8], String> {
    let (i, new_format) = parse_bool(i)?;
    if new_format {
        // sharp, root, type, extension, bass, tonality, add
        let (i, ()) = skip(16)(i)?;
        let (i, name) = parse_byte_size_string(21)(i)?;
        // alterations, first fret, frets, barres, omissions, fingerings, show
        let (i, ()) = skip(68)(i)?;
        Ok((i, name))
    } else {
        let (i, name) = parse_int_byte_sized_string(i)?;
        let (mut i, first_fret) = parse_int(i)?;
        if first_fret != 0 {
            let (inner, _frets) = count(parse_int, 6).parse(i)?;
            i = inner;
        }
        Ok((i, name))
    }
}

pub fn parse_note_effects(i: &[u8]) -> IResult<&[u8], NoteEffect> {
    log::debug!("Parsing note effects");
    let (mut i, (flags1, flags2)) = (parse_u8, parse_u8).parse(i)?;
    let mut effect = NoteEffect {
        flags1,
        flags2,
        ..Default::default()
    };

    if flags1 & NOTE_EFFECT1_BEND != 0 {
        let (inner, bend_effect) = parse_bend_effect(i)?;
        i = inner;
        effect.bend = Some(bend_effect);
    }

    if flags1 & NOTE_EFFECT1_GRACE != 0 {
        let (inner, grace_effect) = parse_grace_effect(i)?;
        i = inner;
        effect.grace = Some(grace_effect);
    }

    if flags2 & NOTE_EFFECT2_TREMOLO_PICKING != 0 {
        let (inner, tremolo_picking) = parse_u8(i)?;
        i = inner;
        effect.tremolo_picking = Some(tremolo_picking);
    }

    if flags2 & NOTE_EFFECT2_SLIDE != 0 {
        let (inner, slide) = parse_u8(i)?;
        i = inner;
        effect.slide = Some(slide);
    }

    if flags2 & NOTE_EFFECT2_HARMONIC != 0 {
        let (inner, harmonic_effect) = parse_harmonic_effect(i)?;
        i = inner;
        effect.harmonic = Some(harmonic_effect);
    }

    if flags2 & NOTE_EFFECT2_TRILL != 0 {
        let (inner, (fret, period)) = (parse_i8, parse_i8).parse(i)?;
        i = inner;
        effect.trill = Some(TrillEffect { fret, period });
    }

    Ok((i, effect))
}

pub fn parse_harmonic_effect(i: &[u8]) -> IResult<&[u8], HarmonicEffect> {
    let (inner, harmonic_type) = parse_i8(i)?;
    log::debug!("Parsing harmonic effect {harmonic_type}");
    match harmonic_type {
        1 => Ok((inner, HarmonicEffect::Natural)),
        2 => map((parse_u8, parse_i8, parse_u8), |(semitone, accidental, octave)| {
            HarmonicEffect::Artificial {
                semitone,
                accidental,
                octave,
            }
        })
        .parse(inner),
        3 => map(parse_u8, |right_hand_fret| HarmonicEffect::Tapped { right_hand_fret })
            .parse(inner),
        4 => Ok((inner, HarmonicEffect::Pinch)),
        5 => Ok((inner, HarmonicEffect::Semi)),
        _ => invalid_value(i, "harmonic type"),
    }
}

pub fn parse_grace_effect(i: &[u8]) -> IResult<&[u8], GraceEffect> {
    log::debug!("Parsing grace effect");
    map(
        (parse_u8, parse_u8, parse_u8, parse_u8, parse_u8),
        |(fret, velocity, transition, duration, flags)| GraceEffect {
            fret,
            velocity,
            transition,
            duration,
            flags,
        },
    )
    .parse(i)
}

pub fn parse_beat_effects(i: &[u8]) -> IResult<&[u8], BeatEffects> {
    log::debug!("Parsing beat effects");
    let (mut i, (flags1, flags2)) = (parse_u8, parse_u8).parse(i)?;
    let mut effects = BeatEffects {
        flags1,
        flags2,
        ..Default::default()
    };

    if flags1 & BEAT_EFFECT1_SLAP != 0 {
        let (inner, slap) = parse_u8(i)?;
        i = inner;
        effects.slap = Some(slap);
    }

    if flags2 & BEAT_EFFECT2_TREMOLO_BAR != 0 {
        let (inner, effect) = parse_bend_effect(i)?;
        i = inner;
        effects.tremolo_bar = Some(effect);
    }

    if flags1 & BEAT_EFFECT1_STROKE != 0 {
        let (inner, (up, down)) = (parse_i8, parse_i8).parse(i)?;
        i = inner;
        effects.stroke = Some(BeatStroke { up, down });
    }

    if flags2 & BEAT_EFFECT2_PICK_STROKE != 0 {
        let (inner, pick_stroke) = parse_i8(i)?;
        i = inner;
        effects.pick_stroke = Some(pick_stroke);
    }

    Ok((i, effects))
}

pub fn parse_bend_effect(i: &[u8]) -> IResult<&[u8], BendEffect> {
    log::debug!("Parsing bend effect");
    map(
        (
            parse_i8,
            parse_int,
            flat_map(parse_count, |num_points| {
                count(
                    map(
                        (parse_int, parse_int, parse_bool),
                        |(position, value, vibrato)| BendPoint {
                            position,
                            value,
                            vibrato,
                        },
                    ),
                    num_points,
                )
            }),
        ),
        |(kind, value, points)| BendEffect {
            kind,
            value,
            points,
        },
    )
    .parse(i)
}

/// Read beat duration.
/// Duration is composed of byte signifying duration and an integer that maps to `Tuplet`. The byte maps to following values:
///
/// * *-2*: whole note
/// * *-1*: half note
/// * *0*: quarter note
/// * *1*: eighth note
/// * *2*: sixteenth note
/// * *3*: thirty-second note
///
/// If flag at *0x20* is true, the tuplet is read
pub fn parse_duration(flags: u8) -> impl FnMut(&[u8]) -> IResult<&[u8], Duration> {
    move |i: &[u8]| {
        log::debug!("Parsing duration");
        let (mut i, value) = parse_i8(i)?;
        if !(-2..=4).contains(&value) {
            return invalid_value(i, "duration");
        }
        let mut d = Duration {
            value: (2_u32.pow((value + 4) as u32) / 4) as u16,
            dotted: flags & 0x01 != 0,
            ..Default::default()
        };
        log::debug!("Duration value: {}", d.value);

        if (flags & 0x20) == 0x20 {
            let (inner, i_tuplet) = parse_int(i)?;
            let times = match i_tuplet {
                1 => 1,
                3 => 2,
                5..=7 => 4,
                9..=13 => 8,
                _ => return invalid_value(i, "tuplet"),
            };
            i = inner;
            d.tuplet_enters = i_tuplet as u8;
            d.tuplet_times = times;
        }

        Ok((i, d))
    }
}

pub fn parse_color(i: &[u8]) -> IResult<&[u8], i32> {
    log::debug!("Parsing RGB color");
    map(
        (parse_u8, parse_u8, parse_u8, parse_u8),
        |(r, g, b, _ignore)| i32::from(r) << 16 | i32::from(g) << 8 | i32::from(b),
    )
    .parse(i)
}

pub fn parse_marker(i: &[u8]) -> IResult<&[u8], Marker> {
    log::debug!("Parsing marker");
    map((parse_int_byte_sized_string, parse_color), |(title, color)| {
        Marker { title, color }
    })
    .parse(i)
}

pub fn parse_triplet_feel(i: &[u8]) -> IResult<&[u8], TripletFeel> {
    log::debug!("Parsing triplet feel");
    let (inner, triplet_feel) = parse_u8(i)?;
    match triplet_feel {
        0 => Ok((inner, TripletFeel::None)),
        1 => Ok((inner, TripletFeel::Eighth)),
        2 => Ok((inner, TripletFeel::Sixteenth)),
        _ => invalid_value(i, "triplet feel"),
    }
}

/// Parse measure header.
/// the time and key signatures are propagated to the next measure
pub fn parse_measure_header(
    previous_time_signature: TimeSignature,
    previous_key_signature: KeySignature,
) -> impl FnMut(&[u8]) -> IResult<&[u8], MeasureHeader> {
    move |i: &[u8]| {
        log::debug!("Parsing measure header");
        let (mut i, flags) = parse_u8(i)?;
        log::debug!("Flags: {flags:08b}");
        let mut mh = MeasureHeader {
            time_signature: previous_time_signature.clone(),
            key_signature: previous_key_signature.clone(),
            repeat_open: (flags & 0x04) == 0x04,
            double_bar: (flags & 0x80) == 0x80,
            ..Default::default()
        };

        // Numerator of the (key) signature
        if (flags & 0x01) != 0 {
            let (inner, numerator) = parse_i8(i)?;
            i = inner;
            mh.time_signature.numerator = numerator;
        }

        // Denominator of the (key) signature
        if (flags & 0x02) != 0 {
            let (inner, denominator) = parse_i8(i)?;
            i = inner;
            mh.time_signature.denominator = denominator;
        }

        // End of repeat
        if (flags & 0x08) != 0 {
            let (inner, repeat_close) = parse_i8(i)?;
            i = inner;
            mh.repeat_close = Some(repeat_close);
        }

        // Presence of a marker
        if (flags & 0x20) != 0 {
            let (inner, marker) = parse_marker(i)?;
            i = inner;
            mh.marker = Some(marker);
        }

        // Number of alternate ending
        if (flags & 0x10) != 0 {
            let (inner, alternative) = parse_u8(i)?;
            i = inner;
            mh.repeat_alternative = Some(alternative);
        }

        // Tonality of the measure
        if (flags & 0x40) != 0 {
            let (inner, (key, is_minor)) = (parse_i8, parse_i8).parse(i)?;
            i = inner;
            mh.key_signature = KeySignature::new(key, is_minor != 0);
        }

        if (flags & 0x03) != 0 {
            let (inner, (b0, b1, b2, b3)) = (parse_u8, parse_u8, parse_u8, parse_u8).parse(i)?;
            i = inner;
            mh.time_signature.beams = [b0, b1, b2, b3];
        }

        if (flags & 0x10) == 0 {
            let (inner, ()) = skip(1)(i)?;
            i = inner;
        }

        let (inner, triplet_feel) = parse_triplet_feel(i)?;
        i = inner;
        mh.triplet_feel = triplet_feel;
        log::debug!("{mh:?}");

        Ok((i, mh))
    }
}

pub fn parse_measure_headers(
    measure_count: usize,
) -> impl FnMut(&[u8]) -> IResult<&[u8], Vec<MeasureHeader>> {
    move |i: &[u8]| {
        log::debug!("Parsing {measure_count} measure headers");
        let mut i = i;
        let mut headers: Vec<MeasureHeader> = Vec::with_capacity(measure_count);
        for index in 0..measure_count {
            let (time_signature, key_signature) = headers.last().map_or_else(
                || (TimeSignature::default(), KeySignature::new(0, false)),
                |previous| {
                    (
                        previous.time_signature.clone(),
                        previous.key_signature.clone(),
                    )
                },
            );
            // a blank byte separates headers
            let (rest, header) = preceded(
                cond(index > 0, parse_u8),
                parse_measure_header(time_signature, key_signature),
            )
            .parse(i)?;
            i = rest;
            headers.push(header);
        }
        Ok((i, headers))
    }
}

pub fn parse_midi_channels(i: &[u8]) -> IResult<&[u8], Vec<MidiChannel>> {
    log::debug!("Parsing midi channels");
    let mut channels = Vec::with_capacity(MIDI_CHANNEL_COUNT);
    let mut i = i;
    for channel_index in 0..MIDI_CHANNEL_COUNT as u8 {
        let (inner, channel) = parse_midi_channel(channel_index)(i)?;
        i = inner;
        channels.push(channel);
    }
    Ok((i, channels))
}

pub fn parse_midi_channel(channel_id: u8) -> impl FnMut(&[u8]) -> IResult<&[u8], MidiChannel> {
    move |i: &[u8]| {
        map(
            (
                parse_int,
                parse_i8,
                parse_i8,
                parse_i8,
                parse_i8,
                parse_i8,
                parse_i8,
                skip(2),
            ),
            |(instrument, volume, balance, chorus, reverb, phaser, tremolo, ())| MidiChannel {
                channel_id,
                effect_channel_id: channel_id, // filled at the track level
                instrument,
                volume,
                balance,
                chorus,
                reverb,
                phaser,
                tremolo,
                bank: MidiChannel::new(channel_id).bank,
            },
        )
        .parse(i)
    }
}

pub fn parse_page_setup(i: &[u8]) -> IResult<&[u8], PageSetup> {
    log::debug!("Parsing page setup");
    map(
        (
            parse_point,
            parse_padding,
            parse_int,
            parse_short,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
        ),
        |(
            page_size,
            page_margin,
            score_size_proportion,
            header_and_footer,
            title,
            subtitle,
            artist,
            album,
            words,
            music,
            word_and_music,
            copyright,
            copyright_notice,
            page_number,
        )| PageSetup {
            page_size,
            page_margin,
            score_size_proportion,
            header_and_footer,
            title,
            subtitle,
            artist,
            album,
            words,
            music,
            word_and_music,
            copyright,
            copyright_notice,
            page_number,
        },
    )
    .parse(i)
}

pub fn parse_point(i: &[u8]) -> IResult<&[u8], Point> {
    log::debug!("Parsing point");
    map((parse_int, parse_int), |(x, y)| Point { x, y }).parse(i)
}

pub fn parse_padding(i: &[u8]) -> IResult<&[u8], Padding> {
    log::debug!("Parsing padding");
    map(
        (parse_int, parse_int, parse_int, parse_int),
        |(right, top, left, bottom)| Padding {
            right,
            top,
            left,
            bottom,
        },
    )
    .parse(i)
}

pub fn parse_lyrics(i: &[u8]) -> IResult<&[u8], Lyrics> {
    log::debug!("Parsing lyrics");
    map(
        (
            parse_int,
            count((parse_int, parse_int_sized_string), LYRICS_LINE_COUNT),
        ),
        |(track_choice, lines)| Lyrics {
            track_choice,
            lines,
        },
    )
    .parse(i)
}

/// Parse the version string from the file header.
///
/// 30 character string (not counting the byte announcing the real length of the string)
pub fn parse_gp_version(i: &[u8]) -> IResult<&[u8], GpVersion> {
    log::debug!("Parsing GP version");
    let (inner, version_string) = parse_byte_size_string(30)(i)?;
    match version_string.as_str() {
        "FICHIER GUITAR PRO v5.00" => Ok((inner, GpVersion::GP5)),
        "FICHIER GUITAR PRO v5.10" => Ok((inner, GpVersion::GP5_10)),
        _ => {
            log::warn!("Unsupported GP version: {version_string}");
            invalid_value(i, "version")
        }
    }
}

/// Master volume and equalizer, kept verbatim.
fn parse_master_effect(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    log::debug!("Parsing RSE master effect");
    map(take(19usize), <[u8]>::to_vec).parse(i)
}

fn parse_notices(i: &[u8]) -> IResult<&[u8], Vec<String>> {
    flat_map(parse_count, |notice_count| {
        log::debug!("Notice count: {notice_count}");
        count(parse_int_byte_sized_string, notice_count)
    })
    .parse(i)
}

/// Parse information about the piece of music.
fn parse_info(i: &[u8]) -> IResult<&[u8], SongInfo> {
    log::debug!("Parsing song info");
    map(
        (
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_notices,
        ),
        |(title, subtitle, artist, album, words, music, copyright, tab, instructions, notices)| {
            SongInfo {
                title,
                subtitle,
                artist,
                album,
                words,
                music,
                copyright,
                tab,
                instructions,
                notices,
            }
        },
    )
    .parse(i)
}

pub fn parse_gp_data(file_data: &[u8]) -> Result<Song, SetlistError> {
    let (rest, base_song) = flat_map(parse_gp_version, |version| {
        map(
            (
                parse_info,                                         // Song info
                parse_lyrics,                                       // Lyrics
                cond(version > GpVersion::GP5, parse_master_effect), // RSE master effect
                parse_page_setup,                                   // Page setup
                parse_int_byte_sized_string,                        // Tempo name
                parse_int,                                          // Tempo
                cond(version > GpVersion::GP5, parse_bool),         // Tempo hide
                parse_i8,                                           // Key signature
                parse_int,                                          // Octave
                parse_midi_channels,                                // Midi channels
                count(parse_short, DIRECTION_COUNT),                // Directions
                parse_int,                                          // Master reverb
            ),
            move |(
                song_info,
                lyrics,
                master_effect,
                page_setup,
                tempo_name,
                tempo,
                hide_tempo,
                key_signature,
                octave,
                midi_channels,
                directions,
                master_reverb,
            )| {
                // init base song
                Song {
                    version,
                    song_info,
                    lyrics,
                    master_effect,
                    page_setup,
                    tempo: Tempo::new(tempo, Some(tempo_name)),
                    hide_tempo,
                    key_signature,
                    octave,
                    midi_channels,
                    directions,
                    master_reverb,
                    tracks: vec![],
                }
            },
        )
    })
    .parse(file_data)
    .map_err(|_err| {
        log::error!("Failed to parse GP data");
        SetlistError::ParsingError("Failed to parse GP data".to_string())
    })?;

    // make parser and parse music data
    let mut parser = MusicParser::new(base_song);
    let (_rest, ()) = parser.parse_music_data(rest).map_err(|e| {
        log::error!("Failed to parse music data: {e:?}");
        SetlistError::ParsingError("Failed to parse music data".to_string())
    })?;
    Ok(parser.take_song())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gp_ordering() {
        assert!(GpVersion::GP5 < GpVersion::GP5_10);
        assert!(GpVersion::GP5 >= GpVersion::GP5);
    }

    #[test]
    fn test_parse_duration_with_tuplet() {
        // eighth note triplet
        let data = vec![0x01, 0x03, 0x00, 0x00, 0x00];
        let (rest, duration) = parse_duration(0x20)(&data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(duration.value, 8);
        assert_eq!(duration.tuplet_enters, 3);
        assert_eq!(duration.tuplet_times, 2);
        assert!(!duration.dotted);
    }

    #[test]
    fn test_parse_unknown_tuplet_fails() {
        let data = vec![0x00, 0x04, 0x00, 0x00, 0x00];
        assert!(parse_duration(0x20)(&data).is_err());
    }

    #[test]
    fn test_parse_measure_header_propagates_signatures() {
        let previous = TimeSignature {
            numerator: 3,
            denominator: 4,
            beams: [2, 2, 2, 0],
        };
        // double bar only, no alternative so blank byte, no triplet feel
        let data = vec![0x80, 0x00, 0x00];
        let (rest, header) =
            parse_measure_header(previous.clone(), KeySignature::new(2, true))(&data).unwrap();
        assert!(rest.is_empty());
        assert!(header.double_bar);
        assert_eq!(header.time_signature, previous);
        assert_eq!(header.key_signature, KeySignature::new(2, true));
        assert_eq!(header.tempo, None);
    }

    #[test]
    fn test_parse_chord_old_format() {
        let mut data = vec![0x00];
        data.extend([0x03, 0x00, 0x00, 0x00, 0x02, b'A', b'm']);
        data.extend([0x00, 0x00, 0x00, 0x00]);
        data.push(0xAA);
        let (rest, chord) = parse_chord(&data).unwrap();
        assert_eq!(rest, &[0xAA]);
        assert_eq!(chord.name, "Am");
        assert_eq!(chord.data.len(), 12);
    }

    #[test]
    fn test_reject_unknown_version() {
        let mut data = vec![0x18];
        data.extend(b"FICHIER GUITAR PRO v3.00");
        data.extend([0x00; 6]);
        assert!(parse_gp_version(&data).is_err());
        assert!(matches!(
            parse_gp_data(&data),
            Err(SetlistError::ParsingError(_))
        ));
    }
}
