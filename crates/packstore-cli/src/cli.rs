use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use packstore_codec::CompressionKind;

#[derive(Parser)]
#[command(
    name = "packstore",
    about = "Inspect and operate a sharded packed-object store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the store
    #[arg(short, long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Reject stored values larger than this many bytes
    #[arg(long, global = true)]
    pub max_value_size: Option<usize>,

    /// Root key width in bits (only used on first start)
    #[arg(long, global = true, default_value = "8")]
    pub base_bits: u32,

    /// Bits added per split
    #[arg(long, global = true, default_value = "4")]
    pub shard_bits: u32,

    #[arg(long, global = true, default_value = "snappy")]
    pub compression: CompressionKind,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store an item
    Put(PutArgs),
    /// Print an item
    Get(GetArgs),
    /// Delete items
    Delete(DeleteArgs),
    /// List cached buckets
    Buckets(BucketsArgs),
    /// List every item
    Items(ItemsArgs),
    /// Show bucket-tree statistics
    Stats,
    /// Reload one bucket from storage and report the item delta
    Invalidate(InvalidateArgs),
    /// Copy v1 buckets into the sharded layout
    Upgrade(UpgradeArgs),
}

#[derive(Args)]
pub struct PutArgs {
    pub id: String,
    /// Item data as a string
    #[arg(conflicts_with = "file")]
    pub data: Option<String>,
    /// Read item data from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    /// Print the bucket holding the item instead of its data
    #[arg(long)]
    pub bucket: bool,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
}

#[derive(Args)]
pub struct BucketsArgs {
    /// Only buckets whose key starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
    /// Include interior buckets
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ItemsArgs {
    /// Print IDs only
    #[arg(long)]
    pub ids_only: bool,
}

#[derive(Args)]
pub struct InvalidateArgs {
    /// Bucket storage key, e.g. "00/3"
    pub key: String,
}

#[derive(Args)]
pub struct UpgradeArgs {
    /// Delete v1 buckets after copying
    #[arg(long)]
    pub discard: bool,
}
