use std::path::PathBuf;
use std::process::ExitCode;

use kaa_cli::{cli, commands, logging, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli::command().get_matches();
    logging::init(matches.get_flag("verbose"), matches.get_flag("log-json"));

    let config = matches.get_one::<PathBuf>("config").map(PathBuf::as_path);
    let base_url = matches.get_one::<String>("base-url").map(String::as_str);
    let settings = match Settings::load(config) {
        Ok(settings) => settings.with_overrides(base_url),
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let mut stdout = std::io::stdout().lock();
    match commands::run(&matches, &settings, &mut stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Command failed: {:?}", e);
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
