use clap::{Parser, Subcommand, ValueEnum};
use rcwt::demux::{DemuxOptions, RcwtDemuxer};
use rcwt::header::{has_rcwt_extension, probe, PROBE_SCORE_MAX, RCWT_HEADER_SIZE};
use rcwt::index::{IndexOptions, Packet, SeekPolicy, SortOrder};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rcwt", about = "Inspect RCWT (Raw Captions With Time) caption files")]
struct Cli {
    /// Log per-packet details (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Ts,
    Pos,
}

#[derive(Subcommand)]
enum Commands {
    /// Score how likely a file is RCWT
    Probe {
        input: PathBuf,
    },
    /// Show header, stream and packet summary
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List packets
    Dump {
        input: PathBuf,
        #[arg(long)]
        json: bool,
        /// Packet order: by timestamp (default) or source position
        #[arg(long, value_enum, default_value = "ts")]
        sort: SortArg,
        /// Drop packets identical to their predecessor
        #[arg(long)]
        drop_duplicates: bool,
        /// Start at the first packet at or after this timestamp (ms)
        #[arg(long)]
        from: Option<i64>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show the packet a seek to a timestamp (ms) lands on
    Seek {
        input: PathBuf,
        #[arg(allow_hyphen_values = true)]
        timestamp: i64,
        /// Land on the nearest packet at or before the timestamp
        #[arg(long)]
        before: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {

        // ── Probe ────────────────────────────────────────────────────────────
        Commands::Probe { input } => {
            let mut buf = Vec::new();
            std::fs::File::open(&input)?
                .take(RCWT_HEADER_SIZE as u64 + 1)
                .read_to_end(&mut buf)?;
            println!("{}: score {}/{}, extension {}",
                     input.display(), probe(&buf), PROBE_SCORE_MAX,
                     if has_rcwt_extension(&input) { "matches" } else { "does not match" });
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let demux = RcwtDemuxer::open(&input, DemuxOptions::default())?;
            let index = demux.index();
            let digest = hex::encode(index.digest());

            if json {
                let doc = serde_json::json!({
                    "path":   input.display().to_string(),
                    "header": demux.header(),
                    "stream": demux.stream(),
                    "stats":  demux.stats(),
                    "first_timestamp": index.first_timestamp(),
                    "last_timestamp":  index.last_timestamp(),
                    "digest": digest,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }

            let header = demux.header();
            let stats  = demux.stats();
            println!("── RCWT ─────────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Writer         {} ({:#04x}, version {:#04x})",
                     header.writer.name(), header.writer.id(), header.writer_version);
            println!("  Format version {:#06x}", header.format_version);
            println!("  Time base      {}/{}", demux.stream().time_base.0, demux.stream().time_base.1);
            println!("  Clusters       {} ({} empty)", stats.clusters, stats.empty_clusters);
            println!("  Packets        {}", index.len());
            println!("  Payload        {} B", index.total_payload_bytes());
            if let (Some(first), Some(last)) = (index.first_timestamp(), index.last_timestamp()) {
                println!("  Time range     {} .. {}", format_ms(first), format_ms(last));
            }
            println!("  Digest         {}", digest);
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, json, sort, drop_duplicates, from, limit } => {
            let opts = DemuxOptions {
                index: IndexOptions {
                    sort: match sort {
                        SortArg::Ts  => SortOrder::Timestamp,
                        SortArg::Pos => SortOrder::Position,
                    },
                    keep_duplicates: !drop_duplicates,
                },
            };
            let mut demux = RcwtDemuxer::open(&input, opts)?;
            if let Some(ts) = from {
                if demux.seek(ts, SeekPolicy::AtOrAfter).is_none() {
                    return Ok(());
                }
            }

            let limit = limit.unwrap_or(usize::MAX);
            let mut shown = 0;
            while shown < limit {
                let Some(packet) = demux.read_packet() else { break };
                if json {
                    println!("{}", serde_json::to_string(packet)?);
                } else {
                    print_packet(packet);
                }
                shown += 1;
            }
        }

        // ── Seek ─────────────────────────────────────────────────────────────
        Commands::Seek { input, timestamp, before } => {
            let policy = if before { SeekPolicy::AtOrBefore } else { SeekPolicy::AtOrAfter };
            let mut demux = RcwtDemuxer::open(&input, DemuxOptions::default())?;
            match demux.seek(timestamp, policy) {
                Some(packet) => print_packet(packet),
                None         => println!("no packet {} {}",
                                         if before { "at or before" } else { "at or after" },
                                         format_ms(timestamp)),
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn print_packet(p: &Packet) {
    println!("#{:<6} {:>14} pos={:<10} blocks={:<4} {}",
             p.id, format_ms(p.timestamp), p.position, p.block_count(), hex::encode(&p.payload));
}

/// `[-]HH:MM:SS.mmm`
fn format_ms(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let ms = ms.unsigned_abs();
    format!("{}{:02}:{:02}:{:02}.{:03}",
            sign, ms / 3_600_000, ms / 60_000 % 60, ms / 1000 % 60, ms % 1000)
}
