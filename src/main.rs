#[tokio::main]
async fn main() {
    if let Err(error) = trade_sniper_lib::run().await {
        tracing::error!("trade-sniper failed: {error}");
        std::process::exit(1);
    }
}
