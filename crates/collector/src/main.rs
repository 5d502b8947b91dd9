#[tokio::main]
async fn main() -> std::process::ExitCode {
    collector::start(std::env::args()).await
}
