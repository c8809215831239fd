//! Multi-threaded traversal workload against a file-backed pool.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use swizzlepool::primitives::bufferpool::{
    BackgroundCleaner, BufferPool, FixOptions, LatchMode, PageGuard, PoolOptions, PoolStats,
};
use swizzlepool::primitives::volume::{FileVolume, Volume, VolumeIoStats};
use swizzlepool::primitives::wal::{LogManager, MemLog};
use swizzlepool::types::node::{self, ChildSlot, NodeViewMut, LEAF_LEVEL};
use swizzlepool::types::page;
use swizzlepool::types::{ChildRef, Lsn, PageId, Result, StoreId, VolumeId};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VOL: VolumeId = VolumeId(1);
const STORE: StoreId = StoreId(1);
const ROOT: PageId = PageId(1);

#[derive(Parser, Debug)]
#[command(
    name = "swizzlepool-stress",
    version,
    about = "Random root-to-leaf traversals against a small buffer pool"
)]
struct Args {
    #[arg(long, default_value_t = 4, help = "Worker threads")]
    threads: usize,

    #[arg(long, default_value_t = 10_000, help = "Traversals per thread")]
    ops: usize,

    #[arg(long, help = "Frames in the pool (overrides the config file)")]
    blocks: Option<usize>,

    #[arg(long, default_value_t = 32, help = "Children per inner node")]
    fanout: u32,

    #[arg(long, default_value_t = 0.1, help = "Share of traversals that update the leaf")]
    write_ratio: f64,

    #[arg(long, default_value_t = 42, env = "SWIZZLEPOOL_SEED", help = "RNG seed")]
    seed: u64,

    #[arg(long, help = "Disable pointer swizzling")]
    no_swizzle: bool,

    #[arg(long, value_name = "FILE", help = "Pool options in TOML")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Volume file; a temp file when omitted")]
    volume: Option<PathBuf>,

    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    threads: usize,
    traversals: u64,
    updates: u64,
    retries: u64,
    elapsed_ms: u64,
    pool: PoolStats,
    volume: IoReport,
    cleaner_passes: u64,
}

#[derive(Serialize)]
struct IoReport {
    pages_read: u64,
    pages_written: u64,
    read_calls: u64,
    write_calls: u64,
}

impl From<VolumeIoStats> for IoReport {
    fn from(s: VolumeIoStats) -> Self {
        Self {
            pages_read: s.pages_read,
            pages_written: s.pages_written,
            read_calls: s.read_calls,
            write_calls: s.write_calls,
        }
    }
}

#[derive(Default)]
struct Counters {
    traversals: AtomicU64,
    updates: AtomicU64,
    retries: AtomicU64,
}

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swizzlepool=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Args::parse()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> std::result::Result<(), Box<dyn Error>> {
    if args.fanout == 0 || args.threads == 0 {
        return Err("fanout and threads must be positive".into());
    }
    let mut options = match &args.config {
        Some(path) => PoolOptions::load(path)?,
        None => PoolOptions::default().with_cleaner_interval_ms(10),
    };
    if let Some(blocks) = args.blocks {
        options.block_count = blocks;
    }
    if args.no_swizzle {
        options.swizzling = false;
    }

    let tmp_dir = tempfile::tempdir()?;
    let path = args
        .volume
        .clone()
        .unwrap_or_else(|| tmp_dir.path().join("stress.vol"));
    let volume = Arc::new(FileVolume::open(&path, options.page_size as usize)?);
    let leaves = build_tree(&*volume, args.fanout)?;
    info!(path = %path.display(), leaves, blocks = options.block_count, "stress.tree_ready");

    let log = Arc::new(MemLog::new());
    let pool = Arc::new(BufferPool::new(options, log.clone())?);
    pool.install_volume(VOL, volume.clone(), &[(STORE, ROOT)])?;
    let cleaner = BackgroundCleaner::start(&pool);
    let counters = Arc::new(Counters::default());

    let started = Instant::now();
    let handles: Vec<_> = (0..args.threads)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let log = Arc::clone(&log);
            let counters = Arc::clone(&counters);
            let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(t as u64));
            let (ops, fanout, write_ratio) = (args.ops, args.fanout, args.write_ratio);
            thread::spawn(move || -> Result<()> {
                for _ in 0..ops {
                    let write = rng.gen_bool(write_ratio.clamp(0.0, 1.0));
                    let path = (rng.gen_range(0..fanout), rng.gen_range(0..fanout));
                    loop {
                        match traverse(&pool, path, write) {
                            Ok(mut leaf) => {
                                if write {
                                    let lsn = log.append_update(leaf.key());
                                    pool.set_page_lsn(&mut leaf, lsn);
                                    counters.updates.fetch_add(1, Ordering::Relaxed);
                                }
                                break;
                            }
                            Err(err) if err.is_retryable() => {
                                counters.retries.fetch_add(1, Ordering::Relaxed);
                                thread::sleep(Duration::from_micros(100));
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    counters.traversals.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().map_err(|_| "worker panicked")??;
    }
    cleaner.shutdown();
    pool.force_all()?;
    let elapsed = started.elapsed();

    let report = Report {
        threads: args.threads,
        traversals: counters.traversals.load(Ordering::Relaxed),
        updates: counters.updates.load(Ordering::Relaxed),
        retries: counters.retries.load(Ordering::Relaxed),
        elapsed_ms: elapsed.as_millis() as u64,
        pool: pool.stats(),
        volume: volume.io_stats().into(),
        cleaner_passes: cleaner.passes(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} traversals ({} updates, {} retries) on {} threads in {:?}",
            report.traversals, report.updates, report.retries, report.threads, elapsed
        );
        println!("pool: {}", report.pool);
        println!(
            "volume: {} pages read, {} pages written in {} writes; log durable at {}",
            report.volume.pages_read,
            report.volume.pages_written,
            report.volume.write_calls,
            log.durable_lsn()
        );
    }
    Ok(())
}

fn traverse(pool: &BufferPool, (i, j): (u32, u32), write: bool) -> Result<PageGuard<'_>> {
    let mut root = pool.fix_root(VOL, STORE, LatchMode::Shared, false)?;
    let inner_ref = root.node().child(ChildSlot::Child(i as u16));
    let mut inner = pool.fix_nonroot(&mut root, inner_ref, FixOptions::shared())?;
    drop(root);
    let leaf_ref = inner.node().child(ChildSlot::Child(j as u16));
    let opts = if write {
        FixOptions::exclusive()
    } else {
        FixOptions::shared()
    };
    pool.fix_nonroot(&mut inner, leaf_ref, opts)
}

/// Writes a three-level tree rooted at page 1 and returns the leaf count.
fn build_tree(volume: &dyn Volume, fanout: u32) -> Result<u32> {
    let page_size = volume.page_size();
    let mut buf = vec![0u8; page_size];
    let mut write = |pid: PageId, level: u16, children: &mut dyn Iterator<Item = PageId>| {
        buf.fill(0);
        node::format_node(&mut buf, pid, STORE, level)?;
        let mut view = NodeViewMut::new(&mut buf);
        for child in children {
            view.push_child(ChildRef::Disk(child), Lsn::NULL)?;
        }
        page::stamp_crc32(&mut buf);
        volume.write_many_pages(pid, &buf, 1)
    };
    let first_leaf = 2 + fanout;
    write(ROOT, LEAF_LEVEL + 2, &mut (0..fanout).map(|i| PageId(2 + i)))?;
    for i in 0..fanout {
        let base = first_leaf + i * fanout;
        write(PageId(2 + i), LEAF_LEVEL + 1, &mut (0..fanout).map(|j| PageId(base + j)))?;
    }
    for leaf in first_leaf..first_leaf + fanout * fanout {
        write(PageId(leaf), LEAF_LEVEL, &mut std::iter::empty())?;
    }
    volume.sync()?;
    Ok(fanout * fanout)
}
