use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use env_logger::Env;

use pinbridge::{AppConfig, AppState, GpioBackend, GpioPlugin, MemoryRegistry};

#[cfg(feature = "hardware-gpio")]
use pinbridge::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use pinbridge::MockGpioBackend;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PINBRIDGE_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(
        AppConfig::load_from_file(&config_path)
            .unwrap_or_else(|e| panic!("Failed to load config: {e}")),
    );

    env_logger::Builder::from_env(
        Env::default().default_filter_or(config.debug.level_filter().as_str()),
    )
    .init();

    let backend = {
        #[cfg(feature = "hardware-gpio")]
        {
            Arc::new(
                LibgpiodBackend::new(&config.gpio_chip)
                    .unwrap_or_else(|e| panic!("Failed to init libgpiod backend: {e}")),
            )
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            Arc::new(MockGpioBackend::default())
        }
    };

    run(config, backend).await
}

async fn run<B: GpioBackend + 'static>(
    config: Arc<AppConfig>,
    backend: Arc<B>,
) -> std::io::Result<()> {
    let registry = Arc::new(MemoryRegistry::default());
    let plugin = Arc::new(GpioPlugin::new(config.clone(), backend, registry));

    if let Err(e) = plugin.on_start() {
        error!("GPIO bridge failed to start: {e}");
        if let Err(e) = plugin.on_stop() {
            warn!("releasing pins after failed start: {e}");
        }
        std::process::exit(1);
    }

    let heartbeat = {
        let plugin = plugin.clone();
        let period = config.heartbeat_secs.period();
        actix_web::rt::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = plugin.on_heartbeat() {
                    warn!("heartbeat failed: {e}");
                }
            }
        })
    };

    let served = match config.http.clone() {
        Some(http_cfg) => serve(http_cfg, AppState { plugin: plugin.clone() }).await,
        None => {
            info!("No http section configured, running headless");
            tokio::signal::ctrl_c().await
        }
    };

    heartbeat.abort();
    if let Err(e) = plugin.on_stop() {
        error!("releasing pins failed: {e}");
    }
    info!("Stopped");

    served
}

async fn serve<B: GpioBackend + 'static>(
    http_cfg: pinbridge::HttpConfig,
    app_state: AppState<B, MemoryRegistry>,
) -> std::io::Result<()> {
    let scope_path = http_cfg.path.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    });

    let bind_addrs: String;
    let server = match (&http_cfg.unix_socket, &http_cfg.host) {
        (Some(socket_path), Some(host)) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = format!("{} and {}", socket_path, host);

            server.bind_uds(socket_path)?.bind_auto_h2c(host)?
        }
        (Some(socket_path), None) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = socket_path.clone();

            server.bind_uds(socket_path)?
        }
        (None, Some(host)) => {
            bind_addrs = host.clone();

            server.bind_auto_h2c(host)?
        }
        (None, None) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "http config needs 'unix_socket' or 'host'",
            ));
        }
    };

    info!("Serving device commands on {}...", bind_addrs);

    server.run().await
}
