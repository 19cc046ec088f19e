#[macro_use]
extern crate log;

use std::process;
use std::sync::Arc;

use clap::{App, Arg};
use failure::Error;

use camwatch::cli;
use camwatch::config::{self, Config};
use camwatch::ctx::Ctx;
use camwatch::hotplug::EventLoop;
use camwatch::udev_source::UdevSource;
use camwatch::{AUTHOR, VERSION};

fn cli_opts<'a, 'b>() -> App<'a, 'b> {
    App::new("camwatchd")
        .version(VERSION)
        .author(AUTHOR)
        .about("Watches for USB cameras and ingests their photos and videos")
        .arg(
            Arg::with_name("CONFIG")
                .help("Path to configuration file")
                .index(1),
        )
}

fn daemon(cfg: Config) -> Result<(), Error> {
    let ctx = Ctx::create(cfg)?;
    ctx.setup_signal_handler()?;
    info!("camwatchd {} starting, archiving into {:?}", VERSION, ctx.cfg.incoming_dir());

    let ingest = Arc::new(ctx.ingestor()?);
    let source = UdevSource::usb()?;
    let event_loop = EventLoop::new(
        source,
        ctx.dispatcher(ingest),
        ctx.cfg.event_poll_interval(),
        ctx.cancel_token().clone(),
    );

    let abandoned = event_loop.run(ctx.cfg.shutdown_grace());
    if abandoned > 0 {
        warn!("Exiting with {} workers unfinished", abandoned);
    }
    info!("camwatchd stopped");
    Ok(())
}

fn main() {
    let matches = cli_opts().get_matches();

    // Loading config here lets us bail before we get in the weeds, and tells us where to log.
    let path = matches
        .value_of("CONFIG")
        .unwrap_or(config::DEFAULT_CONFIG_PATH);
    let cfg = match Config::from_file(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("camwatchd: {}", e);
            for cause in e.iter_causes() {
                eprintln!("  {}", cause);
            }
            process::exit(1);
        }
    };

    let log_file = cfg.log_file().to_path_buf();
    cli::run(Some(&log_file), move || daemon(cfg));
}
