use std::process;

use p11nethsm::cli::Options;

fn main() {
    match Options::from_args().run() {
        Ok(report) => print!("{}", report),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}
