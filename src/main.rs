use prompt_tree_lib::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    prompt_tree_lib::init_tracing()?;
    prompt_tree_lib::run(config).await
}
