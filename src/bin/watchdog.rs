use plcwatch::settings::WatchdogSettings;
use plcwatch::watchdog::Watchdog;
use std::fs;
use std::process;

fn main() {
    plcwatch::init("watchdog");
    plcwatch::register_signals();
    plcwatch::refresh_boot_marker();
    let pid_file = plcwatch::write_pid_file();
    let code = Watchdog::new(WatchdogSettings::from_env()).run();
    let _ = fs::remove_file(pid_file);
    process::exit(code);
}
