use std::{
    fs::{create_dir_all, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use home::home_dir;
use serde::{Deserialize, Serialize};

use gpsetlist::SetlistError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    songs_folder: PathBuf,
    output_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            songs_folder: PathBuf::from("setlist_songs"),
            output_file: PathBuf::from("merged_setlist.gp5"),
        }
    }
}

impl Config {
    // folder placed in $HOME directory
    const FOLDER: &'static str = ".gpsetlist";
    const FILE: &'static str = "config.json";

    pub fn songs_folder(&self) -> &Path {
        &self.songs_folder
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Remember new defaults, the file is only rewritten on change.
    pub fn update(
        &mut self,
        songs_folder: Option<PathBuf>,
        output_file: Option<PathBuf>,
    ) -> Result<(), SetlistError> {
        let updated = Self {
            songs_folder: songs_folder.unwrap_or_else(|| self.songs_folder.clone()),
            output_file: output_file.unwrap_or_else(|| self.output_file.clone()),
        };
        if *self == updated {
            // no op
            Ok(())
        } else {
            *self = updated;
            self.save_config_in(&Self::get_base_path()?)
        }
    }

    fn get_base_path() -> Result<PathBuf, SetlistError> {
        let home = home_dir()
            .ok_or_else(|| SetlistError::ConfigError("Could not find home directory".to_string()))?;
        Ok(home.join(Self::FOLDER))
    }

    /// Creates config if it does not exist
    pub fn read_config() -> Result<Self, SetlistError> {
        Self::read_config_in(&Self::get_base_path()?)
    }

    fn read_config_in(base_path: &Path) -> Result<Self, SetlistError> {
        if !base_path.exists() {
            create_dir_all(base_path)?;
        }
        let config_path = base_path.join(Self::FILE);
        if !config_path.exists() {
            // create default config
            Config::default().save_config_in(base_path)?;
        }
        let file = File::open(config_path)?;
        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader).map_err(|err| {
            SetlistError::ConfigError(format!("Could not read local configuration {err:}"))
        })?;
        Ok(config)
    }

    /// Assumes the config folder exists
    fn save_config_in(&self, base_path: &Path) -> Result<(), SetlistError> {
        let config_path = base_path.join(Self::FILE);
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            SetlistError::ConfigError(format!("Could not save local configuration {err:}"))
        })?;
        let mut file = File::create(config_path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let base_path = dir.path().join(Config::FOLDER);
        let config = Config::read_config_in(&base_path).unwrap();
        assert_eq!(config, Config::default());
        assert!(base_path.join(Config::FILE).exists());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(Config::FILE),
            r#"{"songs_folder": "/srv/gigs"}"#,
        )
        .unwrap();
        let config = Config::read_config_in(dir.path()).unwrap();
        assert_eq!(config.songs_folder(), Path::new("/srv/gigs"));
        assert_eq!(config.output_file(), Path::new("merged_setlist.gp5"));
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(Config::FILE), "songs_folder=gigs").unwrap();
        let result = Config::read_config_in(dir.path());
        assert!(matches!(result, Err(SetlistError::ConfigError(_))));
    }
}
