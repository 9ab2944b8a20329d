// Entry point for the HTTP surface: uploads and code-intelligence queries.

use anyhow::Result;
use clap::Parser;
use codenav::application::{application::Application, config::configuration::Configuration};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();

    Application::install_logging(&configuration);
    let application = Application::initialize(configuration).await?;
    info!("code navigation webserver 🚀");

    codenav::webserver::start(application).await
}
