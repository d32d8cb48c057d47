use std::sync::Arc;

use anyhow::Context as _;
use colored::Colorize;
use serde_json::json;
use tracing::{debug, info};

use packstore::{LegacyReader, Packer, PackerConfig, UpgradeOptions};
use packstore_storage::{Context, FileStorage, Storage, StorageView};
use packstore_types::Item;

use crate::cli::*;

const BUCKET_PREFIX: &str = "packer/buckets/";
const CONFIG_PREFIX: &str = "packer/config/";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::background();
    let packer = open_packer(&ctx, &cli)?;
    let format = cli.format;
    match cli.command {
        Command::Put(args) => cmd_put(&ctx, &packer, args),
        Command::Get(args) => cmd_get(&ctx, &packer, format, args),
        Command::Delete(args) => cmd_delete(&ctx, &packer, args),
        Command::Buckets(args) => cmd_buckets(&ctx, &packer, format, args),
        Command::Items(args) => cmd_items(&ctx, &packer, format, args),
        Command::Stats => cmd_stats(&ctx, &packer, format),
        Command::Invalidate(args) => cmd_invalidate(&ctx, &packer, format, args),
        Command::Upgrade(args) => cmd_upgrade(&ctx, &packer, format, args),
    }
}

fn open_packer(ctx: &Context, cli: &Cli) -> anyhow::Result<Packer> {
    let mut storage = FileStorage::open(&cli.root)
        .with_context(|| format!("opening store at {}", cli.root.display()))?;
    if let Some(max) = cli.max_value_size {
        storage = storage.with_max_value_size(max);
    }
    debug!(root = %cli.root.display(), max_value_size = ?cli.max_value_size, "opening file storage");
    let backend: Arc<dyn Storage> = Arc::new(storage);
    let config = PackerConfig::default()
        .with_base_bucket_bits(cli.base_bits)
        .with_bucket_shard_bits(cli.shard_bits)
        .with_compression(cli.compression);
    let packer = Packer::open(
        ctx,
        StorageView::new(Arc::clone(&backend), BUCKET_PREFIX),
        StorageView::new(backend, CONFIG_PREFIX),
        config,
    )
    .context("loading packer")?;
    if let Some(geometry) = packer.geometry() {
        info!(
            root = %cli.root.display(),
            base_bits = geometry.base_bucket_bits(),
            shard_bits = geometry.bucket_shard_bits(),
            "packer loaded"
        );
    }
    Ok(packer)
}

/// Data as text when it is UTF-8, hex otherwise.
fn display_data(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(data)),
    }
}

fn print_json(value: serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn item_json(item: &Item) -> serde_json::Value {
    json!({ "id": item.id, "data": display_data(&item.data), "size": item.data.len() })
}

fn cmd_put(ctx: &Context, packer: &Packer, args: PutArgs) -> anyhow::Result<()> {
    let data = match (args.data, args.file) {
        (Some(data), None) => data.into_bytes(),
        (None, Some(path)) => {
            std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?
        }
        _ => anyhow::bail!("give item data either inline or with --file"),
    };
    let size = data.len();
    packer.put_item(ctx, Item::new(args.id.clone(), data))?;
    let bucket = packer.bucket_key_for_item_id(ctx, &args.id)?;
    debug!(id = %args.id, size, bucket = %bucket, "item stored");
    println!(
        "{} Stored {} ({} bytes) in bucket {}",
        "✓".green().bold(),
        args.id.bold(),
        size,
        bucket.yellow()
    );
    Ok(())
}

fn cmd_get(ctx: &Context, packer: &Packer, format: OutputFormat, args: GetArgs) -> anyhow::Result<()> {
    if args.bucket {
        let key = packer.bucket_key_for_item_id(ctx, &args.id)?;
        return match format {
            OutputFormat::Json => print_json(json!({ "id": args.id, "bucket": key })),
            OutputFormat::Text => {
                println!("{key}");
                Ok(())
            }
        };
    }
    let Some(item) = packer.get_item(ctx, &args.id)? else {
        anyhow::bail!("item {:?} not found", args.id);
    };
    match format {
        OutputFormat::Json => print_json(item_json(&item)),
        OutputFormat::Text => {
            println!("{}", display_data(&item.data));
            Ok(())
        }
    }
}

fn cmd_delete(ctx: &Context, packer: &Packer, args: DeleteArgs) -> anyhow::Result<()> {
    packer.delete_items(ctx, &args.ids[..])?;
    debug!(count = args.ids.len(), "items deleted");
    for id in &args.ids {
        println!("  {} {}", "deleted:".red(), id);
    }
    Ok(())
}

fn cmd_buckets(
    ctx: &Context,
    packer: &Packer,
    format: OutputFormat,
    args: BucketsArgs,
) -> anyhow::Result<()> {
    let buckets: Vec<_> = packer
        .buckets(ctx)?
        .into_iter()
        .filter(|lb| args.all || !lb.has_shards())
        .filter(|lb| args.prefix.as_deref().map_or(true, |p| lb.key().starts_with(p)))
        .collect();
    match format {
        OutputFormat::Json => print_json(json!(buckets
            .iter()
            .map(|lb| json!({
                "key": lb.key(),
                "has_shards": lb.has_shards(),
                "items": lb.item_count(),
            }))
            .collect::<Vec<_>>())),
        OutputFormat::Text => {
            if buckets.is_empty() {
                println!("No buckets.");
            }
            for lb in &buckets {
                if lb.has_shards() {
                    println!("{:<16} {}", lb.key().yellow(), "sharded".dimmed());
                } else {
                    println!("{:<16} {} items", lb.key().yellow(), lb.item_count());
                }
            }
            Ok(())
        }
    }
}

fn cmd_items(
    ctx: &Context,
    packer: &Packer,
    format: OutputFormat,
    args: ItemsArgs,
) -> anyhow::Result<()> {
    let mut items = packer.all_items(ctx)?;
    items.sort_by(|a, b| a.id.cmp(&b.id));
    match format {
        OutputFormat::Json if args.ids_only => {
            print_json(json!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>()))
        }
        OutputFormat::Json => print_json(json!(items.iter().map(item_json).collect::<Vec<_>>())),
        OutputFormat::Text => {
            for item in &items {
                if args.ids_only {
                    println!("{}", item.id);
                } else {
                    println!("{}  {} bytes", item.id.bold(), item.data.len());
                }
            }
            Ok(())
        }
    }
}

fn cmd_stats(ctx: &Context, packer: &Packer, format: OutputFormat) -> anyhow::Result<()> {
    let stats = packer.stats(ctx)?;
    match format {
        OutputFormat::Json => print_json(serde_json::to_value(&stats)?),
        OutputFormat::Text => {
            let geometry = packer.geometry();
            if let Some(geometry) = geometry {
                println!(
                    "Geometry: {} base bits, {} shard bits",
                    geometry.base_bucket_bits().to_string().cyan(),
                    geometry.bucket_shard_bits().to_string().cyan()
                );
            }
            println!(
                "Buckets: {} ({} leaf, {} sharded)",
                stats.buckets.to_string().bold(),
                stats.leaf_buckets,
                stats.interior_buckets
            );
            println!("Items: {}", stats.items.to_string().bold());
            println!("Max depth: {}", stats.max_depth);
            Ok(())
        }
    }
}

fn cmd_invalidate(
    ctx: &Context,
    packer: &Packer,
    format: OutputFormat,
    args: InvalidateArgs,
) -> anyhow::Result<()> {
    let storage = packer.bucket_storage();
    let path = storage.expand_key(&args.key);
    let value = storage.get(ctx, &args.key)?.map(|entry| entry.value);
    let result = packer.invalidate_items(ctx, &path, value.as_deref())?;
    match format {
        OutputFormat::Json => print_json(json!({
            "bucket": args.key,
            "removed": value.is_none(),
            "present": result.present.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            "deleted": result.deleted.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
        })),
        OutputFormat::Text => {
            println!(
                "{} Reloaded {}: {} present, {} deleted",
                "✓".green().bold(),
                args.key.yellow(),
                result.present.len(),
                result.deleted.len()
            );
            for item in &result.deleted {
                println!("  {} {}", "deleted:".red(), item.id);
            }
            Ok(())
        }
    }
}

fn cmd_upgrade(
    ctx: &Context,
    packer: &Packer,
    format: OutputFormat,
    args: UpgradeArgs,
) -> anyhow::Result<()> {
    let reader = LegacyReader::new(packer.bucket_view().clone());
    let report = packer.upgrade_from_legacy(
        ctx,
        &reader,
        UpgradeOptions {
            discard_legacy: args.discard,
        },
    )?;
    match format {
        OutputFormat::Json => print_json(serde_json::to_value(&report)?),
        OutputFormat::Text => {
            println!(
                "{} Copied {} items from {} v1 buckets",
                "✓".green().bold(),
                report.items_copied.to_string().bold(),
                report.legacy_buckets
            );
            if args.discard {
                println!("  Removed {} v1 buckets", report.legacy_deleted);
            }
            Ok(())
        }
    }
}
