use clap::Arg;
use failure::Error;

use camwatch::cli;
use camwatch::ctx::Ctx;
use camwatch::device::Classifier;
use camwatch::hotplug::EventSource;
use camwatch::udev_source::UdevSource;

fn cli_opts<'a, 'b>() -> clap::App<'a, 'b> {
    cli::base_opts()
        .about("Prints USB hotplug events and what camwatch makes of them, without ingesting anything")
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print one JSON object per event"),
        )
}

fn watch(json: bool, ctx: &Ctx) -> Result<(), Error> {
    let classifier = Classifier::new(ctx.cfg.camera_models());
    let mut source = UdevSource::usb()?;
    println!("Listening for USB events (Ctrl-C to quit)");

    while ctx.running() {
        for event in source.poll()? {
            let classification = classifier.classify(&event);
            if json {
                let line = serde_json::json!({
                    "event": &event,
                    "classification": &classification,
                });
                println!("{}", line);
            } else {
                println!(
                    "{:<6} {} => {} ({})",
                    event.action,
                    event.description(),
                    classification.protocol,
                    classification.evidence
                );
                for (key, value) in &event.properties {
                    println!("         {}={}", key, value);
                }
            }
        }
        ctx.cancel_token().sleep(ctx.cfg.event_poll_interval());
    }
    Ok(())
}

fn main() {
    cli::run(None, || {
        let matches = cli_opts().get_matches();
        let ctx = Ctx::create_without_lock(cli::load_config(&matches)?)?;
        ctx.setup_signal_handler()?;
        watch(matches.is_present("json"), &ctx)
    })
}
