use chrono::NaiveDateTime;
use log::{error, info};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Command;

/// Sends SIGTERM to the own process: the signal path performs the
/// graceful teardown and the supervisor takes over recovery.
pub fn terminate_self() {
    info!("sending SIGTERM to self");
    if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
        error!("unable to signal self: {}", e);
    }
}

/// Sets the system clock via `sudo date` (sudoers must allow it without
/// a password on kiosk installs). Privilege failures are reported, not
/// fatal.
pub fn set_system_clock(target: &NaiveDateTime) -> bool {
    // date(1) accepts MMDDhhmmYYYY.SS
    let stamp = target.format("%m%d%H%M%Y.%S").to_string();
    match Command::new("sudo").arg("date").arg(&stamp).output() {
        Ok(output) if output.status.success() => {
            info!("system clock set to {}", target);
            true
        }
        Ok(output) => {
            error!(
                "failed to set system clock: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            error!("failed to run date: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    #[test]
    fn date_stamp_format() {
        let t = NaiveDate::from_ymd_opt(2025, 11, 13)
            .unwrap()
            .and_hms_opt(14, 30, 45)
            .unwrap();
        assert_eq!(t.format("%m%d%H%M%Y.%S").to_string(), "111314302025.45");
    }
}
