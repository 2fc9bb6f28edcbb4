use clap::Parser as _;
use igntc_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Registers(commands::registers::Args),
    Read(commands::read::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description =
        std::env::var("IGNTC_TOOLS_LOG").unwrap_or_else(|_| String::from("warn"));
    let filter = match filter_description.parse::<tracing_subscriber::filter::targets::Targets>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("error: IGNTC_TOOLS_LOG is not a valid filter: {e}");
            std::process::exit(1);
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Read(args) => end(commands::read::run(args)),
    }
}
