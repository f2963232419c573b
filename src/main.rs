use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    mi_bridge::run().await
}
