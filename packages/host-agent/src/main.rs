// ABOUTME: The per-container host agent binary launched under the container user's credentials
// ABOUTME: Prints the readiness line, then idles until stdin closes or the job grouping kills it

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncReadExt;

use palisade_container::READY_LINE;

#[derive(Parser)]
#[command(name = "palisade-host")]
#[command(about = "Container host agent; runs inside one container's job grouping")]
#[command(version)]
struct Cli {
    /// Id of the container this agent serves.
    #[arg(long)]
    container_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    eprintln!("palisade-host serving container {}", cli.container_id);

    // The engine waits for this exact line before handing out the client.
    println!("{READY_LINE}");
    std::io::stdout().flush()?;

    // Idle until the supervising service closes our stdin; work dispatch
    // arrives out-of-band through the engine's process runner.
    let mut stdin = tokio::io::stdin();
    let mut sink = [0u8; 1024];
    loop {
        match stdin.read(&mut sink).await {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) => {
                eprintln!("palisade-host stdin error: {e}");
                break;
            }
        }
    }

    eprintln!("palisade-host for {} exiting", cli.container_id);
    Ok(())
}
