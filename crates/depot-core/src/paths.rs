use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the depot home directory, or None if the user's home cannot be resolved.
pub fn try_depot_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("DEPOT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".depot"))
}

/// Config file: ~/.depot/config.toml
pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.toml")
}

/// Default library root: ~/.depot/library
pub fn default_library(home: &Path) -> PathBuf {
    home.join("library")
}

/// Library index database: <library>/library.db
pub fn db_path(library: &Path) -> PathBuf {
    library.join("library.db")
}

/// Installed packages: <library>/packages
pub fn packages_path(library: &Path) -> PathBuf {
    library.join("packages")
}

/// Directory of one installed package: <library>/packages/<game_id>
pub fn package_dir(library: &Path, game_id: depot_schema::GameId) -> PathBuf {
    packages_path(library).join(game_id.to_string())
}

/// Staging area: <library>/tmp (guaranteed same volume as packages)
pub fn tmp_path(library: &Path) -> PathBuf {
    library.join("tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_at_library() {
        let lib = Path::new("/srv/lib");
        assert_eq!(db_path(lib), Path::new("/srv/lib/library.db"));
        assert_eq!(
            package_dir(lib, depot_schema::GameId::new(730)),
            Path::new("/srv/lib/packages/730")
        );
        assert_eq!(tmp_path(lib), Path::new("/srv/lib/tmp"));
    }
}
