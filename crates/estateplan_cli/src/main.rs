//! CLI smoke check for `estateplan_core`.
//!
//! Prints the core version and an equal split preview, e.g.
//! `estateplan_cli 3` prints `33.33 33.33 33.34`.

use estateplan_core::{equal_split, Percentage};
use std::process::ExitCode;

const DEFAULT_BENEFICIARIES: usize = 3;

fn main() -> ExitCode {
    let count = match std::env::args().nth(1) {
        None => DEFAULT_BENEFICIARIES,
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(count) => count,
            Err(_) => {
                eprintln!("usage: estateplan_cli [beneficiary-count]");
                return ExitCode::FAILURE;
            }
        },
    };

    println!("estateplan_core ping={}", estateplan_core::ping());
    println!("estateplan_core version={}", estateplan_core::core_version());

    let slots: Vec<usize> = (0..count).collect();
    let shares: Vec<Percentage> = equal_split(&slots)
        .into_iter()
        .map(|(_, share)| share)
        .collect();
    let rendered: Vec<String> = shares.iter().map(ToString::to_string).collect();
    println!("equal_split n={count} shares={}", rendered.join(" "));
    ExitCode::SUCCESS
}
