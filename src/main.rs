use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    interface_modpacks::run().await
}
