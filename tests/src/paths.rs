use std::path::PathBuf;

pub const DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

pub fn get_path(dir: &str, file_name: &str) -> PathBuf {
    PathBuf::from(DATA_DIR).join(dir).join(file_name)
}
