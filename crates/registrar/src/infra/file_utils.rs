use log::{error, info};
use std::fs;
use std::path::Path;

/// Creates `root_path` if it doesn't already exist. Used for the SQLite data
/// folder and the card-document output folder at startup.
pub fn create_folder(root_path: &str) {
    let path = Path::new(root_path);

    if !path.exists() || !path.is_dir() {
        if let Err(err) = fs::create_dir_all(path) {
            error!("error creating folder: {err}");
        } else {
            info!("folder created: {root_path}");
        }
    } else {
        info!("folder already exists: {root_path}");
    }
}
