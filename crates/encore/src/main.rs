//! Encore.
//!
//! Encore is the command line front end of the request orchestration layer. It reads artist
//! profiles and charts from the backend through the same caches, coalescing and fallbacks that an
//! embedding application would use, and prints what each read resolved to.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
