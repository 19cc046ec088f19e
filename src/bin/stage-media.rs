use std::path::Path;
use std::time::Instant;

use clap::{App, Arg};
use failure::format_err;

use camwatch::cli;
use camwatch::ctx::Ctx;
use camwatch::mass_storage;
use camwatch::reporting::IngestReport;

fn cli_opts<'a, 'b>() -> App<'a, 'b> {
    cli::base_opts()
        .about("Archives media from the local filesystem, eg a card reader")
        .arg(
            Arg::with_name("PATH")
                .help("Path to ingest from")
                .required(true)
                .index(1),
        )
}

fn main() {
    cli::run(None, || {
        let matches = cli_opts().get_matches();
        let ctx = Ctx::create_without_lock(cli::load_config(&matches)?)?;
        ctx.setup_signal_handler()?;

        let path = Path::new(
            matches
                .value_of("PATH")
                .ok_or_else(|| format_err!("Couldn't get path"))?,
        );
        let triage = ctx.ffmpeg_triage()?;

        let started = Instant::now();
        let mut report = IngestReport::new(path.display().to_string(), "local directory");
        mass_storage::ingest_mount(path, &triage, ctx.cancel_token(), &mut report)?;
        report.finish(started.elapsed());
        report.log();
        Ok(())
    })
}
