//! Sparse Merkle Tree Benchmarker
//!
//! Measures update throughput of one shared tree.
//!
//! Flow:
//! 1. Pick distinct random leaf keys (deterministic seed)
//! 2. Update every key concurrently against the same tree
//! 3. Rewrite a subset through one proof-checked batch update
//! 4. Purge the nodes replaced along the way

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollup_smt::{LeafUpdate, MemoryStore, SmtConfig, SparseMerkleTree, U256};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Benchmarker configuration
struct BenchConfig {
    updates: usize,
    key_range: u64,
    seed: u64,
    batch_size: usize,
}

impl BenchConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            updates: env_or("BENCH_UPDATES", 1_000)?,
            key_range: env_or("BENCH_KEY_RANGE", u64::MAX)?,
            seed: env_or("BENCH_SEED", 12345)?,
            batch_size: env_or("BENCH_BATCH_SIZE", 100)?,
        })
    }

    /// Key range clamped to the leaf slots of a tree of `height`, so no two keys alias
    fn effective_key_range(&self, height: usize) -> u64 {
        match 1u64.checked_shl(height.saturating_sub(1) as u32) {
            Some(capacity) => self.key_range.min(capacity),
            None => self.key_range,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| anyhow::anyhow!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

/// Statistics
#[derive(Default)]
struct Stats {
    success: AtomicU64,
    failed: AtomicU64,
    total_latency_us: AtomicU64,
}

impl Stats {
    fn record_success(&self, latency: Duration) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.success.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.total_latency_us.load(Ordering::Relaxed),
        )
    }
}

/// Machine-readable run summary
#[derive(Serialize)]
struct BenchSummary {
    height: usize,
    updates: u64,
    failed: u64,
    updates_per_sec: f64,
    avg_latency_us: f64,
    batch_size: usize,
    batch_ms: f64,
    purged_nodes: usize,
    root_hash: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = BenchConfig::from_env()?;
    let smt_config = SmtConfig::from_env()?;
    let key_range = config.effective_key_range(smt_config.height);
    if (config.updates as u64) > key_range {
        bail!("cannot pick {} distinct keys from a range of {}", config.updates, key_range);
    }
    print_banner(&config, &smt_config, key_range);

    let tree = Arc::new(
        SparseMerkleTree::from_config(MemoryStore::new(), &smt_config)
            .await
            .context("failed to create tree")?,
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    info!("Generating {} distinct keys...", config.updates);
    let leaves = generate_leaves(&mut rng, config.updates, key_range);
    info!("  ✓ Generated {} keys", leaves.len());

    // Concurrent updates
    let stats = Arc::new(Stats::default());
    let start_time = Instant::now();
    let mut tasks = JoinSet::new();
    for (key, value) in leaves.iter().cloned() {
        let tree = tree.clone();
        let stats = stats.clone();
        tasks.spawn(async move {
            let started = Instant::now();
            match tree.update(key, &value).await {
                Ok(true) => stats.record_success(started.elapsed()),
                Ok(false) => {
                    warn!("Update of key {} was rejected", key);
                    stats.record_failure();
                }
                Err(e) => {
                    warn!("Update of key {} failed: {}", key, e);
                    stats.record_failure();
                }
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.context("update task panicked")?;
    }
    let update_elapsed = start_time.elapsed();
    info!("  ✓ Updates done in {:.2}s", update_elapsed.as_secs_f64());

    // Batch update
    let batch_len = config.batch_size.min(leaves.len());
    let mut updates = Vec::with_capacity(batch_len);
    for (key, value) in &leaves[..batch_len] {
        let proof = tree
            .get_merkle_proof(*key, value)
            .await?
            .into_proof()
            .with_context(|| format!("no proof available for key {key}"))?;
        let new_value: [u8; 32] = rng.gen();
        updates.push(LeafUpdate::from_proof(proof, new_value.to_vec()));
    }
    let batch_start = Instant::now();
    if !tree.batch_update(&updates).await? {
        bail!("batch update of {} leaves was rejected", updates.len());
    }
    let batch_elapsed = batch_start.elapsed();
    info!(
        "  ✓ Batch of {} updates applied in {:.1}ms",
        updates.len(),
        batch_elapsed.as_secs_f64() * 1000.0
    );

    // Purge
    let purged_nodes = tree.pending_deletions().await;
    tree.purge_old_nodes().await?;
    info!("  ✓ Purged {} stale nodes", purged_nodes);

    let summary = print_final_report(
        &stats,
        update_elapsed,
        BenchSummary {
            height: tree.height(),
            updates: 0,
            failed: 0,
            updates_per_sec: 0.0,
            avg_latency_us: 0.0,
            batch_size: updates.len(),
            batch_ms: batch_elapsed.as_secs_f64() * 1000.0,
            purged_nodes,
            root_hash: format!("0x{}", hex::encode(tree.root_hash().await)),
        },
    );
    info!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

fn print_banner(config: &BenchConfig, smt_config: &SmtConfig, key_range: u64) {
    info!("╔═══════════════════════════════════════════════╗");
    info!("║         Sparse Merkle Tree Benchmarker        ║");
    info!("╚═══════════════════════════════════════════════╝");
    info!("");
    info!("Configuration:");
    info!("  Height:       {}", smt_config.height);
    info!("  Hasher:       {:?}", smt_config.hasher);
    info!("  Updates:      {}", config.updates);
    info!("  Key range:    {}", key_range);
    info!("  Batch size:   {}", config.batch_size);
    info!("  Seed:         {}", config.seed);
    info!("");
}

/// Distinct random keys below `key_range`, each with a random 32-byte value
fn generate_leaves(rng: &mut StdRng, count: usize, key_range: u64) -> Vec<(U256, Vec<u8>)> {
    let mut seen = HashSet::with_capacity(count);
    let mut leaves = Vec::with_capacity(count);
    while leaves.len() < count {
        let key = rng.gen_range(0..key_range);
        if seen.insert(key) {
            let value: [u8; 32] = rng.gen();
            leaves.push((U256::from(key), value.to_vec()));
        }
    }
    leaves
}

fn print_final_report(stats: &Stats, elapsed: Duration, summary: BenchSummary) -> BenchSummary {
    let (success, failed, total_latency) = stats.snapshot();
    let elapsed_secs = elapsed.as_secs_f64();
    let updates_per_sec = if elapsed_secs > 0.0 { success as f64 / elapsed_secs } else { 0.0 };
    let avg_latency = if success > 0 { total_latency as f64 / success as f64 } else { 0.0 };

    info!("");
    info!("═══════════════════════════════════════════════════════════════");
    info!("                    BENCHMARK COMPLETE                         ");
    info!("═══════════════════════════════════════════════════════════════");
    info!("Duration:        {:.2}s", elapsed_secs);
    info!("───────────────────────────────────────────────────────────────");
    info!("Updates:");
    info!("  Applied:       {}", success);
    info!("  Failed:        {}", failed);
    info!("  Throughput:    {:.1} updates/s", updates_per_sec);
    info!("  Avg Latency:   {:.1}us", avg_latency);
    info!("───────────────────────────────────────────────────────────────");
    info!("Batch:");
    info!("  Size:          {}", summary.batch_size);
    info!("  Time:          {:.1}ms", summary.batch_ms);
    info!("  Purged nodes:  {}", summary.purged_nodes);
    info!("Root:            {}", summary.root_hash);
    info!("═══════════════════════════════════════════════════════════════");

    BenchSummary {
        updates: success,
        failed,
        updates_per_sec,
        avg_latency_us: avg_latency,
        ..summary
    }
}
