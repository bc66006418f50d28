//! Signal names and signal-mask helpers

use nix::sys::signal::Signal;
use std::str::FromStr;

/// First and last realtime signal numbers as the Linux kernel sees them
pub const SIGRTMIN: i32 = 32;
pub const SIGRTMAX: i32 = 64;

/// Canonical name of `signo` (`SIGINT`, `SIGRTMIN+3`, ...)
pub fn signal_name(signo: i32) -> Option<String> {
    if let Ok(signal) = Signal::try_from(signo) {
        return Some(signal.as_str().to_string());
    }
    match signo {
        SIGRTMAX => Some("SIGRTMAX".to_string()),
        SIGRTMIN => Some("SIGRTMIN".to_string()),
        n if n > SIGRTMIN && n < SIGRTMAX => Some(format!("SIGRTMIN+{}", n - SIGRTMIN)),
        _ => None,
    }
}

/// Signal number of `name`, accepting `SIGINT`, `INT` or `sigint`
pub fn signal_number(name: &str) -> Option<i32> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };

    if let Ok(signal) = Signal::from_str(&full) {
        return Some(signal as i32);
    }
    match full.as_str() {
        "SIGRTMIN" => Some(SIGRTMIN),
        "SIGRTMAX" => Some(SIGRTMAX),
        other => {
            let offset: i32 = other.strip_prefix("SIGRTMIN+")?.parse().ok()?;
            let signo = SIGRTMIN + offset;
            (signo < SIGRTMAX).then_some(signo)
        }
    }
}

/// Names of the signals set in a kernel signal mask (bit `n - 1` is signal `n`)
pub fn mask_to_names(mask: u64) -> Vec<String> {
    (1..=SIGRTMAX)
        .filter(|signo| mask & (1u64 << (signo - 1)) != 0)
        .filter_map(signal_name)
        .collect()
}
