use clap::Parser;
use flowcal_core::cli::{run, Cli};
use flowcal_core::logging::{default_directive, init_logging};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_format, default_directive(cli.verbose, cli.quiet)) {
        eprintln!("warning: logging unavailable: {e}");
    }
    let code = run(&cli);
    std::process::exit(code.as_i32());
}
