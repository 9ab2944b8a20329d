// Entry point for the queue consumer: conversions and tip refreshes.

use anyhow::Result;
use clap::Parser;
use codenav::application::{application::Application, config::configuration::Configuration};
use codenav::queue::worker::{schedule_update_tips, Worker};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();

    Application::install_logging(&configuration);
    let application = Application::initialize(configuration).await?;
    info!("code navigation worker 🚀");

    let mut joins = tokio::task::JoinSet::new();

    // the scheduler never returns a result worth supervising
    tokio::spawn(schedule_update_tips(application.clone()));

    let metrics_port = application.config.worker_metrics_port;
    joins.spawn(codenav::webserver::start_ops(application.clone(), metrics_port));
    joins.spawn(Worker::new(application).run());

    while let Some(result) = joins.join_next().await {
        if let Ok(Err(err)) = result {
            error!(?err, "worker failed");
            return Err(err);
        }
    }

    Ok(())
}
