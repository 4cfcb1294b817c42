#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pocket_ledger_api::cli::run_with_sys_args().await
}
