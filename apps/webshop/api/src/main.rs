//! Webshop Backend - Entry Point
//!
//! Minimal entry point that delegates to the server module.

use core_config::tracing::install_color_eyre;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output (before any fallible operations)
    install_color_eyre();

    webshop_api::run().await
}
