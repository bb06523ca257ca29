#[tokio::main]
async fn main() {
    if let Err(e) = pilot_control_lib::run().await {
        eprintln!("pilot-control: {}", e);
        std::process::exit(1);
    }
}
