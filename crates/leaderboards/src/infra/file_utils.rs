use log::info;
use std::{fs, io, path::Path};

/// Make sure the sqlite data folder exists before the pools try to open files in it
pub fn create_folder(root_path: &str) -> Result<(), io::Error> {
    let path = Path::new(root_path);
    if path.is_dir() {
        info!("data folder already exists: {}", root_path);
        return Ok(());
    }
    fs::create_dir_all(path)?;
    info!("data folder created: {}", root_path);
    Ok(())
}
