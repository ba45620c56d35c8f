use std::sync::Arc;

use anyhow::Result;
use sightline::config::{AnalysisConfig, ServerConfig};
use sightline::logging::{self, obj, v_int, v_str, Domain};
use sightline::server::{serve, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env();
    let analysis = AnalysisConfig::from_env();
    logging::info(
        Domain::System,
        "startup",
        obj(&[
            ("host", v_str(&config.host)),
            ("port", v_int(config.port as u64)),
            ("cache_dir", v_str(&config.cache_dir.display().to_string())),
            ("max_upload_mb", v_int(config.max_upload_mb)),
            ("faceit", serde_json::json!(config.faceit_api_key.is_some())),
            ("sight_mode", v_str(&format!("{:?}", analysis.sight_mode))),
        ]),
    );

    for dir in [&config.upload_dir, &config.download_dir, &config.cache_dir] {
        std::fs::create_dir_all(dir)?;
    }

    let state = Arc::new(AppState::new(config, analysis)?);
    serve(state).await
}
