use log::{error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use plcwatch::watchdog::child::resolve_program;
use std::env;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

const POLL_STEP: Duration = Duration::from_millis(500);

fn spawn(command: &[String]) -> Option<Child> {
    let (program, args) = command.split_first()?;
    match Command::new(resolve_program(program))
        .args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
    {
        Ok(child) => {
            info!("{} started (pid={})", program, child.id());
            Some(child)
        }
        Err(e) => {
            error!("failed to start {}: {}", program, e);
            None
        }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn send_term(child: &Child) {
    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
}

fn main() {
    plcwatch::init("launcher");
    plcwatch::register_signals();

    let watchdog_command: Vec<String> = env::var("WATCHDOG_COMMAND")
        .unwrap_or_else(|_| "plcwatch-watchdog".to_owned())
        .split_whitespace()
        .map(ToOwned::to_owned)
        .collect();
    let presentation_command: Vec<String> = env::var("PRESENTATION_COMMAND")
        .unwrap_or_default()
        .split_whitespace()
        .map(ToOwned::to_owned)
        .collect();

    let Some(mut watchdog) = spawn(&watchdog_command) else {
        std::process::exit(1);
    };
    let mut presentation = if presentation_command.is_empty() {
        None
    } else {
        spawn(&presentation_command)
    };

    // forward shutdown signals to the watchdog, exit when it does
    let mut term_sent = false;
    let code = loop {
        if plcwatch::sigterm_received() && !term_sent {
            info!("forwarding shutdown to watchdog");
            send_term(&watchdog);
            term_sent = true;
        }
        match watchdog.try_wait() {
            Ok(Some(status)) => break status.code().unwrap_or(1),
            Ok(None) => {}
            Err(e) => {
                error!("error waiting for watchdog: {}", e);
                break 1;
            }
        }
        thread::sleep(POLL_STEP);
    };

    if let Some(child) = presentation.as_mut() {
        if child.try_wait().ok().flatten().is_none() {
            warn!("stopping presentation process");
            send_term(child);
            let _ = child.wait();
        }
    }
    info!("launcher exiting ({})", code);
    std::process::exit(code);
}
