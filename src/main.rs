#[tokio::main]
async fn main() {
  if let Err(e) = coach_timeline_lib::run().await {
    eprintln!("coach-timeline failed: {}", e);
    std::process::exit(1);
  }
}
