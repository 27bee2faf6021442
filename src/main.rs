/*!
Here we go!

```bash
campus [path/to/config.toml]
```
*/
use std::sync::Arc;
use std::time::Duration;

use simplelog::{ColorChoice, TerminalMode, TermLogger};
use tokio::sync::RwLock;

use campus::{config, inter};

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(15 * 60);

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Unable to listen for shutdown signal: {}", &e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("campus")
        .build();
    if let Err(e) = TermLogger::init(
        campus::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ) {
        eprintln!("Unable to start logging: {}", &e);
    }
    log::info!("Logging started.");

    let config_path = std::env::args().nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_owned());

    let (cfg, glob) = match config::load_configuration(&config_path).await {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error loading configuration from {:?}: {}", &config_path, &e);
            std::process::exit(1);
        },
    };

    if let Err(e) = inter::init(&cfg.templates_dir) {
        log::error!("Error initializing templates: {}", &e);
        std::process::exit(1);
    }

    let addr = glob.addr;
    let glob = Arc::new(RwLock::new(glob));

    {
        let glob = glob.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                let glob = glob.read().await;
                let mut sessions = glob.sessions.write().await;
                sessions.prune();
                log::trace!("{} sessions live after pruning.", sessions.len());
            }
        });
    }

    let app = inter::router(glob, &cfg.static_dir);

    log::info!("Listening on {}", &addr);

    if let Err(e) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("Server error: {}", &e);
        std::process::exit(1);
    }
}
