use std::path::PathBuf;

/// The --config option lets you specify the path of the config file
/// to use. It's optional; if omitted, we'll use bookmanager.toml in the current
/// working directory.
pub fn config_path() -> Option<PathBuf> {
    find_config_path(std::env::args())
}

fn find_config_path(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.into_iter();
    args.find(|a| a == "--config")?;
    let Some(p) = args.next() else {
        // This runs before we have a tracing subscriber, so we have to log rudely.
        println!("Startup: received --config without a config path; ignoring!");
        return None;
    };
    Some(PathBuf::from(p))
}
