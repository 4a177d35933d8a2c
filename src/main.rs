#[tokio::main]
async fn main() -> anyhow::Result<()> {
    compressor_bridge_lib::run().await
}
