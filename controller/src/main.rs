mod activity;
mod buttons;
mod context;
mod coordinator;
mod countdown;
mod executor;
mod gpio;
mod host;
mod mqtt;
mod relay;
mod scheduler;
mod store;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
