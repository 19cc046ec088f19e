use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use clap::{App, Arg};
use env_logger::{Target, WriteStyle};
use failure::{Error, ResultExt};

use crate::config::{self, Config};
use crate::{AUTHOR, VERSION};

/// Create the base set of clap options common to all cli commands
pub fn base_opts<'a, 'b>() -> App<'a, 'b> {
    App::new("camwatch")
        .version(VERSION)
        .author(AUTHOR)
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .help("Path to configuration file"),
        )
}

/// Load the configuration named by `--config`, or the default one.
pub fn load_config(matches: &clap::ArgMatches<'_>) -> Result<Config, Error> {
    let path = matches
        .value_of("config")
        .unwrap_or(config::DEFAULT_CONFIG_PATH);
    Config::from_file(path)
}

/// Writes every log line to stderr and to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Console write failures are ignored.
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

fn open_log_file(path: &Path) -> Result<File, Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|_| format!("Creating log directory {:?}", parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|_| format!("Opening log file {:?}", path))?;
    Ok(file)
}

/// Setup logging for camwatch. This sets the log level to INFO if `RUST_LOG` is unset. With a
/// `log_file`, lines are appended there as well as written to stderr, without colours.
pub fn init_logging(log_file: Option<&Path>) -> Result<(), Error> {
    let filters = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.parse_filters(&filters);
    if let Some(path) = log_file {
        let file = open_log_file(path)?;
        builder
            .target(Target::Pipe(Box::new(Tee { file })))
            .write_style(WriteStyle::Never);
    }
    builder
        .try_init()
        .map_err(|e| format_err!("Couldn't initialise logging: {}", e))
}

/// Run a given closure with logging configured, and deal with any errors. This allows you to have
/// a fairly simple main, eg:
///
/// ```
/// use camwatch::cli::run;
///
/// fn main() {
///     run(None, || {
///         // Do stuff here, including using the ? operator with reckless abandon.
///         // ...
///         // You must however return Ok(())
///         Ok(())
///     });
/// }
/// ```
pub fn run<F>(log_file: Option<&Path>, main: F)
where
    F: FnOnce() -> Result<(), Error>,
{
    if let Err(e) = init_logging(log_file) {
        eprintln!("{}", e);
        ::std::process::exit(1);
    }
    if let Err(e) = main() {
        error!("Error running camwatch");
        for cause in e.iter_chain() {
            error!("  {}", cause);
        }
        if env::var("RUST_BACKTRACE").is_ok() {
            error!("{:?}", e.backtrace());
        }
        ::std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers;

    #[test]
    fn test_tee_writes_to_the_file() {
        let temp = test_helpers::tempdir();
        let path = temp.path().join("logs/camwatch.log");
        let mut tee = Tee {
            file: open_log_file(&path).unwrap(),
        };
        tee.write_all(b"first line\n").unwrap();
        tee.flush().unwrap();

        // Reopening appends rather than truncating
        let mut tee = Tee {
            file: open_log_file(&path).unwrap(),
        };
        tee.write_all(b"second line\n").unwrap();
        tee.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first line\nsecond line\n");
    }

    #[test]
    fn test_base_opts_accepts_config() {
        let matches = base_opts().get_matches_from(vec!["camwatch", "--config", "/tmp/cw.toml"]);
        assert_eq!(matches.value_of("config"), Some("/tmp/cw.toml"));
    }
}
