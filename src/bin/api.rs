use log::{error, info};
use plcwatch::api::{self, ApiState, AppState};
use plcwatch::master::Master;
use plcwatch::plc::PlcService;
use plcwatch::settings::{DeviceMap, Settings};
use std::fs;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    plcwatch::init("api");
    let settings = Settings::from_env();
    let devices = DeviceMap::from_env();
    let master = match Master::load(&settings.line_name) {
        Ok(master) => Arc::new(master),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    plcwatch::refresh_boot_marker();
    let pid_file = plcwatch::write_pid_file();

    let service = Arc::new(PlcService::new(&settings, devices, master));
    let state: AppState = Arc::new(ApiState {
        service: Arc::clone(&service),
        allow_frontend_restart: settings.allow_frontend_restart,
    });

    let addr = format!("{}:{}", settings.api_host, settings.api_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("unable to bind {}: {}", addr, e);
            process::exit(1);
        }
    };
    info!("API server listening on {}", addr);

    let app = api::router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("API server error: {}", e);
    }

    service.shutdown();
    let _ = fs::remove_file(pid_file);
    info!("API server shutdown complete");
}

/// Resolves on SIGTERM or SIGINT; both mean graceful stop.
///
/// # Panics
///
/// Will panic if the signal handlers can not be installed
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).unwrap();
    let mut int = signal(SignalKind::interrupt()).unwrap();
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
    info!("shutdown signal received");
}
