//! Tollgate server binary.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tollgate::server::run().await
}
