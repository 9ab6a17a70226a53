//! `ai`: suggest shell commands for a plain-language request and run them.

use aish::cli;
use aish::session::Mode;

fn main() {
    std::process::exit(cli::run(std::env::args_os(), Mode::Execute));
}
