#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notary_service::server::run().await
}
