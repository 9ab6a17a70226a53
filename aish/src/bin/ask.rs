//! `ask`: show the suggested command for a request without running anything.

use aish::cli;
use aish::session::Mode;

fn main() {
    std::process::exit(cli::run(std::env::args_os(), Mode::SuggestOnly));
}
