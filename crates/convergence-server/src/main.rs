#[tokio::main]
async fn main() -> anyhow::Result<()> {
    convergence_server::run().await
}
