use std::error::Error;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald::{CreateRequest, LinkBuilder, LinkConfig, LinkError, LinkReport, Side};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Optional JSON config path; missing fields keep their defaults.
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| LinkError::Configuration(format!("cannot read {}: {}", path, e)))?;
            LinkConfig::from_json(&json)?
        }
        None => LinkConfig::default(),
    };

    println!("═══════════════════════════════════════════════════════");
    println!("  Herald — Heralded Entanglement Link");
    println!("  cadence {} ns, classical delay {} ns, window {} ns, p = {}",
        config.cadence, config.classical_delay, config.detection_window, config.success_probability);
    println!("═══════════════════════════════════════════════════════");
    println!();

    // ── Run 1 and its replay ──────────────────────────────────
    let first = run_link(config, "Run 1")?;
    let replay = run_link(config, "Run 2")?;

    // ── Verify ────────────────────────────────────────────────
    println!("  Verification:");
    println!("    Run 1 log hash: {:016x}", first.log_hash.unwrap_or_default());
    println!("    Run 2 log hash: {:016x}", replay.log_hash.unwrap_or_default());
    if first.log_hash == replay.log_hash {
        println!("    ✓ Logs are IDENTICAL — deterministic replay confirmed.");
    } else {
        println!("    ✗ MISMATCH — determinism violation detected!");
    }
    println!();
    println!("{}", first.to_json()?);
    Ok(())
}

fn run_link(config: LinkConfig, label: &str) -> Result<LinkReport, LinkError> {
    let (sim, rt, topology, processed) = LinkBuilder::new(config)
        .with_logging()
        .request_at(0, Side::A, CreateRequest::new(1, 3))
        .request_at(2 * config.classical_delay, Side::B, CreateRequest::new(2, 2))
        .run()?;

    let report = LinkReport::collect(&sim, &rt, &topology)?;
    let (alice, bob) = report.delivered_pairs();
    info!(run = label, processed, alice, bob, "link run finished");
    println!("  {}: {} events, pairs delivered A={} B={}, {} joint measurements",
        label, processed, alice, bob, report.backend.joint_measurements);
    Ok(report)
}
