use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};
use voicekeeper::{
    common::{
        banner::{BannerInfo, print_banner},
        logger,
    },
    configs::Config,
    session::{PlayOptions, SessionRegistry},
    voice::{AudioSource, CallerContext, LoopbackEngine, LoopbackTransport},
};

const DEMO_GUILD: &str = "0";
const DEMO_USER: u64 = 1;
const DEMO_CHANNEL: u64 = 1;

/// Plays each file given on the command line through the loopback backend,
/// one after another, then waits for Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            voicekeeper::log_println!("Using built-in configuration ({})", e);
            Config::default()
        }
    };

    logger::init(config.logging.as_ref());
    print_banner(&BannerInfo::default());

    let registry = SessionRegistry::new(
        Arc::new(LoopbackTransport::new()),
        Arc::new(LoopbackEngine::new()),
        &config.voice,
    );
    info!(
        "Idle timeout {:?}, default volume {}",
        config.voice.idle_timeout(),
        config.voice.default_volume
    );

    let files: Vec<String> = std::env::args().skip(1).collect();
    let player = tokio::spawn(play_all(registry.clone(), files));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    player.abort();
    registry.shutdown().await;

    Ok(())
}

async fn play_all(registry: SessionRegistry, files: Vec<String>) {
    let ctx = CallerContext::discord(DEMO_GUILD, DEMO_USER).in_voice(DEMO_CHANNEL);

    for file in files {
        match registry
            .play(&ctx, AudioSource::Locator(file.clone()), PlayOptions::default())
            .await
        {
            Ok(resource) => info!("Queued '{}' as resource {}", file, resource.id()),
            Err(e) => {
                error!("Cannot play '{}': {} ({})", file, e, e.code());
                continue;
            }
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            match registry.get_active_resource(&ctx).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    warn!("Status check failed: {}", e);
                    break;
                }
            }
        }
    }

    info!("Nothing left to play; press Ctrl-C to exit");
}
