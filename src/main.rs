use clap::Parser;
use tinycoin::{Cli, CliHandler};

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let handler = CliHandler::new(&cli.data_dir);

    if let Err(e) = handler.run(cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
