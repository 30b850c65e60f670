use crate::parser::song_parser::{parse_gp_data, Song};
use crate::setlist::merge::{merge_setlist, MergeReport};
use crate::writer::song_writer::write_gp_file;
use crate::SetlistError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub const GP5_EXTENSION: &str = "gp5";

fn has_gp5_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|extension| extension.eq_ignore_ascii_case(GP5_EXTENSION))
}

/// List the GP5 files directly inside `folder`, sorted by path.
pub fn discover_songs(folder: &Path) -> Result<Vec<PathBuf>, SetlistError> {
    let mut songs = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() && has_gp5_extension(&path) {
            songs.push(path);
        }
    }
    songs.sort();
    log::debug!("Found {} songs in {}", songs.len(), folder.display());
    Ok(songs)
}

/// Force the `.gp5` extension, replacing the current one if any.
pub fn normalize_output_path(path: &Path) -> PathBuf {
    if has_gp5_extension(path) {
        path.to_path_buf()
    } else {
        let normalized = path.with_extension(GP5_EXTENSION);
        log::info!(
            "Output {} renamed to {}",
            path.display(),
            normalized.display()
        );
        normalized
    }
}

/// Read and decode a single GP5 file.
pub fn load_song(path: &Path) -> Result<Song, SetlistError> {
    log::info!("Loading {}", path.display());
    let data = std::fs::read(path)?;
    parse_gp_data(&data)
}

/// Merge `inputs` in order and write the setlist to `output`.
///
/// Returns the path actually written and the merge report.
/// Nothing is written when the merge fails.
pub fn run<P: AsRef<Path>>(
    inputs: &[P],
    output: &Path,
) -> Result<(PathBuf, MergeReport), SetlistError> {
    let output = normalize_output_path(output);
    let report = merge_setlist(inputs, load_song)?;
    for warning in &report.warnings {
        log::warn!("{warning}");
    }
    write_gp_file(&report.song, &output).map_err(|cause| SetlistError::SaveError {
        path: output.clone(),
        cause: Box::new(cause),
    })?;
    Ok((output, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::song_parser::{SongInfo, Track};
    use crate::writer::song_writer::write_gp_data;

    fn init_logger() {
        env_logger::builder()
            .is_test(true)
            .try_init()
            .unwrap_or_default();
    }

    fn write_song(folder: &Path, file_name: &str, title: &str) -> PathBuf {
        let song = Song {
            song_info: SongInfo {
                title: title.to_string(),
                ..Default::default()
            },
            tracks: vec![Track {
                name: "Guitar".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let path = folder.join(file_name);
        std::fs::write(&path, write_gp_data(&song).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_normalize_output_path() {
        assert_eq!(
            normalize_output_path(Path::new("out.txt")),
            PathBuf::from("out.gp5")
        );
        assert_eq!(
            normalize_output_path(Path::new("dir/set.list.bak")),
            PathBuf::from("dir/set.list.gp5")
        );
        assert_eq!(
            normalize_output_path(Path::new("Show.GP5")),
            PathBuf::from("Show.GP5")
        );
        assert_eq!(normalize_output_path(Path::new("out")), PathBuf::from("out.gp5"));
    }

    #[test]
    fn test_discover_songs() {
        let dir = tempfile::tempdir().unwrap();
        write_song(dir.path(), "b.gp5", "B");
        write_song(dir.path(), "a.GP5", "A");
        std::fs::write(dir.path().join("notes.txt"), "not a song").unwrap();
        std::fs::create_dir(dir.path().join("nested.gp5")).unwrap();

        let songs = discover_songs(dir.path()).unwrap();
        assert_eq!(
            songs,
            vec![dir.path().join("a.GP5"), dir.path().join("b.gp5")]
        );
    }

    #[test]
    fn test_discover_songs_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_songs(&dir.path().join("missing"));
        assert!(matches!(result, Err(SetlistError::IoError(_))));
    }

    #[test]
    fn test_run_writes_setlist() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let intro = write_song(dir.path(), "01.gp5", "Intro");
        let broken = dir.path().join("02.gp5");
        std::fs::write(&broken, b"not a guitar pro file").unwrap();
        let outro = write_song(dir.path(), "03.gp5", "Outro");

        let (output, report) = run(&[intro, broken, outro], &dir.path().join("show.txt")).unwrap();
        assert_eq!(output, dir.path().join("show.gp5"));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.merged.len(), 2);

        let written = load_song(&output).unwrap();
        assert_eq!(written.title(), "Setlist - Intro");
        assert_eq!(written.tracks.len(), 1);
    }

    #[test]
    fn test_run_without_first_song() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("show.gp5");
        let result = run(&[dir.path().join("missing.gp5")], &output);
        assert!(matches!(result, Err(SetlistError::LoadError { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_run_save_error() {
        let dir = tempfile::tempdir().unwrap();
        let intro = write_song(dir.path(), "intro.gp5", "Intro");
        let output = dir.path().join("missing").join("show.gp5");
        let result = run(&[intro], &output);
        assert!(matches!(result, Err(SetlistError::SaveError { .. })));
    }
}
