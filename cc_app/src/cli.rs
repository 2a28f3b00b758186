use std::path::PathBuf;

/// Config file path from the first command-line argument
pub fn get_config_path(default: &str) -> PathBuf {
    config_path_from(std::env::args().skip(1), default)
}

fn config_path_from(mut args: impl Iterator<Item = String>, default: &str) -> PathBuf {
    args.next().filter(|arg| !arg.is_empty()).map_or_else(|| PathBuf::from(default), PathBuf::from)
}
