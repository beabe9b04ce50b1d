use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context as _, Result};
use clap::{Parser, ValueHint};
use tokio::runtime::Handle;
use tracing::info;
use url::Url;
use witness_state::{
    env::load_dotenvy_vars_if_present,
    preflight::{prepare, AccessList},
    remote::{ProviderNode, RemoteConfig},
};
use witness_trie::store::MemoryNodeStore;

/// Fetches and verifies the state proofs needed to re-execute one block.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The node RPC URL.
    #[arg(short = 'u', long, env = "WITNESS_RPC_URL", value_hint = ValueHint::Url)]
    rpc_url: Url,
    /// The block to prepare. Its parent provides the pre-state.
    #[arg(short, long, env = "WITNESS_BLOCK")]
    block: u64,
    /// JSON file mapping each accessed address to its accessed slots.
    #[arg(short, long, env = "WITNESS_ACCESS_LIST", value_hint = ValueHint::FilePath)]
    access_list: PathBuf,
    /// Where to write the prepared snapshot. Defaults to stdout.
    #[arg(short, long, env = "WITNESS_OUTPUT", value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
    /// Timeout of a single RPC request, in seconds.
    #[arg(long, env = "WITNESS_RPC_TIMEOUT", default_value_t = 30)]
    rpc_timeout: u64,
}

fn read_access_list(path: &Path) -> Result<AccessList> {
    let file = File::open(path)
        .with_context(|| format!("opening access list {}", path.display()))?;
    let de = &mut serde_json::Deserializer::from_reader(io::BufReader::new(file));

    serde_path_to_error::deserialize(de)
        .with_context(|| format!("parsing access list {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = load_dotenvy_vars_if_present();
    witness_state::tracing::init();
    dotenv.log();

    let args = Cli::parse();
    let access_list = read_access_list(&args.access_list)?;
    let config = RemoteConfig {
        rpc_url: args.rpc_url,
        timeout: Duration::from_secs(args.rpc_timeout),
    };

    let block = args.block;
    let runtime = Handle::current();
    let snapshot = tokio::task::spawn_blocking(move || {
        let remote = ProviderNode::connect(&config, runtime);
        let snapshot = prepare(&remote, block, &access_list)?;

        // Proves the whole snapshot before anything is written out.
        let mut store = MemoryNodeStore::new();
        snapshot.write_nodes(&mut store)?;

        anyhow::Ok(snapshot)
    })
    .await
    .context("snapshot preparation panicked")??;

    match args.output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            serde_json::to_writer_pretty(io::BufWriter::new(file), &snapshot)?;
            info!("Wrote the snapshot of block {} to {}", block, path.display());
        }
        None => serde_json::to_writer_pretty(io::stdout().lock(), &snapshot)?,
    }

    Ok(())
}
