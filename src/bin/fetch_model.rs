//! Binary for downloading segmentation model checkpoints

use maskflow::config::OrchestratorConfig;
use maskflow::error::SegmentationError;
use maskflow::models::ModelFetcher;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), SegmentationError> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: fetch_model <model_name>");
        eprintln!("Available models: mobile_sam");
        std::process::exit(1);
    }

    let model_name = args[1].to_lowercase();
    let config = OrchestratorConfig::default();
    let fetcher = ModelFetcher::new(Arc::new(config));

    match model_name.as_str() {
        "mobile_sam" => {
            println!("Downloading MobileSAM checkpoint...");
            let path = fetcher.get_mobile_sam().await?;
            println!("MobileSAM checkpoint downloaded to: {:?}", path);
            println!("Note: this is the published PyTorch checkpoint; export it to ONNX before use.");
        }
        _ => {
            eprintln!("Unknown model: {}", model_name);
            eprintln!("Available models: mobile_sam");
            std::process::exit(1);
        }
    }

    Ok(())
}
