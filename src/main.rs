//! HTTP server for the Only One client core.
//!
//! Configuration comes from the environment; see [`only_one::config`].

use log::{error, info};
use only_one::population_gen::{seed_users, Generator, PopulationConfig};
use only_one::{api, Config, Service};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    let config = Config::from_env();

    let service = match Service::from_config(&config) {
        Ok(s) => s.with_audit(Arc::new(only_one::audit::StdoutAuditSink)),
        Err(e) => {
            error!("failed to load state: {}", e);
            std::process::exit(1);
        }
    };

    if config.seed_demo_users > 0 {
        let forms = Generator::new(PopulationConfig {
            seed: config.seed,
            num_users: config.seed_demo_users,
            ..Default::default()
        })
        .users();
        match seed_users(&service, &forms) {
            Ok(uids) => info!("seeded {} demo users (password \"password\")", uids.len()),
            Err(e) => error!("demo seeding stopped: {}", e),
        }
    }

    let app = api::create_router(Arc::new(service));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.expect("bind");
    info!("listening on http://{}", addr);
    axum::serve(listener, app.into_make_service())
        .await
        .expect("serve");
}
