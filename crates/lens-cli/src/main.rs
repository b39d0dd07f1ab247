use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::Address;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use lens_data::{ChainClient, RecordStore, RpcChainClient, SqliteStore};
use lens_decode::{
    AbiResolver, AbiSource, BlockDecoder, BundlerRpcIndexer, BytecodeDb, ContractAbi,
    DecodedBlock, DecoderConfig, NoSignatures, OpenChainSignatures, SignatureService, Sourcify,
};
use lens_identity::{
    consolidate_ones, EnsResolver, Erc20Metadata, IdentityConfig, LoopringApi, PeerRegistry,
    TokenRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct AppContext {
    db_path: String,
    rpc_url: Option<String>,
    bundler_url: Option<String>,
    sourcify_url: Option<String>,
    signature_url: Option<String>,
    exchange_url: Option<String>,
}

impl AppContext {
    fn rpc_url(&self) -> Result<&str> {
        self.rpc_url
            .as_deref()
            .ok_or_else(|| eyre!("LENS_RPC_URL (or --rpc-url) is required for this command"))
    }

    fn open_store(&self) -> Result<Arc<SqliteStore>> {
        if let Some(parent) = std::path::Path::new(&self.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let store = SqliteStore::new(&self.db_path).wrap_err("failed to open SQLite store")?;
        Ok(Arc::new(store))
    }

    fn decoder_config(&self) -> DecoderConfig {
        let mut config = DecoderConfig::default();
        if let Some(url) = &self.sourcify_url {
            config.sourcify_url = Some(url.clone());
        }
        if let Some(url) = &self.signature_url {
            config.signature_url = Some(url.clone());
        }
        config.bundler_url = self.bundler_url.clone();
        config
    }

    fn identity_config(&self) -> IdentityConfig {
        let mut config = IdentityConfig::default();
        if let Some(url) = &self.exchange_url {
            config.exchange_url = url.clone();
        }
        config
    }
}

#[derive(Parser, Debug)]
#[command(name = "lens")]
#[command(about = "Decode Ethereum blocks and resolve the identities behind them")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/lens.sqlite")]
    db_path: String,

    #[arg(long, global = true, env = "LENS_RPC_URL")]
    rpc_url: Option<String>,

    #[arg(long, global = true, env = "LENS_BUNDLER_URL")]
    bundler_url: Option<String>,

    #[arg(long, global = true, env = "LENS_SOURCIFY_URL")]
    sourcify_url: Option<String>,

    #[arg(long, global = true, env = "LENS_SIGNATURE_URL")]
    signature_url: Option<String>,

    #[arg(long, global = true, env = "LENS_EXCHANGE_URL")]
    exchange_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a block range into named calls and events.
    Decode(DecodeArgs),
    /// Show or import the ABI used for a contract.
    Abi(AbiArgs),
    /// Look up a peer or token and fill in its unresolved fields.
    Resolve(ResolveArgs),
    /// Merge peers and tokens into one record per address.
    Consolidate,
    /// Show what the database holds.
    Status,
    /// Show the normalized transactions of an exchange block.
    ExchangeBlock(ExchangeBlockArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Store decoded transactions in the database.
    Store,
    /// Print one decoded transaction per line to stdout.
    Jsonl,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[arg(long)]
    start_block: u64,

    /// Last block to decode (inclusive).
    #[arg(long)]
    end_block: u64,

    #[arg(long, value_enum, default_value_t = Output::Store)]
    output: Output,
}

#[derive(Args, Debug)]
struct AbiArgs {
    #[arg(long)]
    address: Address,

    /// JSON ABI file to remember for this contract's bytecode.
    #[arg(long)]
    import: Option<PathBuf>,

    /// Origin recorded with an imported ABI.
    #[arg(long, default_value = "manual")]
    source: String,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Address, ENS name, exchange name, exchange account id or token symbol.
    value: String,

    /// Treat the value as a token rather than a peer.
    #[arg(long)]
    token: bool,
}

#[derive(Args, Debug)]
struct ExchangeBlockArgs {
    #[arg(long)]
    id: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        db_path: cli.db_path,
        rpc_url: cli.rpc_url,
        bundler_url: cli.bundler_url,
        sourcify_url: cli.sourcify_url,
        signature_url: cli.signature_url,
        exchange_url: cli.exchange_url,
    };

    match cli.command {
        Commands::Decode(args) => handle_decode(&ctx, args).await,
        Commands::Abi(args) => handle_abi(&ctx, args).await,
        Commands::Resolve(args) => handle_resolve(&ctx, args).await,
        Commands::Consolidate => handle_consolidate(&ctx),
        Commands::Status => handle_status(&ctx),
        Commands::ExchangeBlock(args) => handle_exchange_block(&ctx, args).await,
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Cancels `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current block");
            token.cancel();
        }
    });
}

fn abi_resolver(
    config: &DecoderConfig,
    chain: Arc<dyn ChainClient>,
    store: Arc<SqliteStore>,
    client: &reqwest::Client,
    cancel: CancellationToken,
) -> AbiResolver {
    let mut sources: Vec<Arc<dyn AbiSource>> = vec![Arc::new(BytecodeDb::new(chain, store))];
    if let Some(url) = &config.sourcify_url {
        sources.push(Arc::new(Sourcify::new(client.clone(), url, config.chain_id)));
    }
    AbiResolver::new(sources, config.max_concurrent_fetches, cancel)
}

async fn handle_decode(ctx: &AppContext, args: DecodeArgs) -> Result<()> {
    if args.start_block > args.end_block {
        return Err(eyre!(
            "invalid range: start-block {} is greater than end-block {}",
            args.start_block,
            args.end_block
        ));
    }

    let store = ctx.open_store()?;
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::connect(ctx.rpc_url()?).await?);
    let config = ctx.decoder_config();
    let client = config.http_client()?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let resolver = Arc::new(abi_resolver(
        &config,
        chain.clone(),
        store.clone(),
        &client,
        cancel.clone(),
    ));
    let signatures: Arc<dyn SignatureService> = match &config.signature_url {
        Some(url) => Arc::new(OpenChainSignatures::new(
            client.clone(),
            url,
            config.signature_batch_size,
        )),
        None => Arc::new(NoSignatures),
    };
    let mut decoder = BlockDecoder::new(resolver.clone(), signatures, cancel.clone())
        .with_entry_points(config.entry_points.iter().copied());
    if let Some(url) = &config.bundler_url {
        decoder = decoder.with_user_ops(Arc::new(BundlerRpcIndexer::new(
            chain.clone(),
            client.clone(),
            url.clone(),
        )));
    }

    let pb = ProgressBar::new(args.end_block - args.start_block + 1);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40}] {pos}/{len} blocks {msg}")
            .wrap_err("failed to create progress style")?,
    );

    let mut totals = (0usize, 0usize, 0usize);
    let output = args.output;
    let sink_store = store.clone();
    let sink_pb = pb.clone();
    let delivered = decoder
        .decode_range(chain.as_ref(), args.start_block, args.end_block, |block| {
            let (txs, methods, events) = block.stats();
            totals = (totals.0 + txs, totals.1 + methods, totals.2 + events);
            match output {
                Output::Store => store_block(&sink_store, &block)?,
                Output::Jsonl => print_block(&block)?,
            }
            sink_pb.set_message(format!("block {}", block.number));
            sink_pb.inc(1);
            Ok(())
        })
        .await
        .wrap_err("failed to decode block range")?;

    pb.finish_with_message("decode completed");
    info!(
        start_block = args.start_block,
        end_block = args.end_block,
        blocks = delivered,
        transactions = totals.0,
        named_methods = totals.1,
        named_events = totals.2,
        abi_fetches = resolver.outbound_fetches(),
        cancelled = cancel.is_cancelled(),
        "decode command finished"
    );
    Ok(())
}

fn store_block(store: &SqliteStore, block: &DecodedBlock) -> Result<()> {
    let rows = block
        .transactions
        .iter()
        .map(|tx| serde_json::to_value(tx).map(|body| (tx.index, tx.hash, body)))
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("failed to serialize decoded transactions")?;
    store
        .insert_decoded_txs(block.number, &rows)
        .wrap_err_with(|| format!("failed to store block {}", block.number))?;
    Ok(())
}

fn print_block(block: &DecodedBlock) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for tx in &block.transactions {
        serde_json::to_writer(&mut out, tx).wrap_err("failed to write decoded transaction")?;
        writeln!(out)?;
    }
    Ok(())
}

async fn handle_abi(ctx: &AppContext, args: AbiArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::connect(ctx.rpc_url()?).await?);

    if let Some(path) = &args.import {
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        ContractAbi::parse(&json, &args.source)
            .wrap_err_with(|| format!("{} is not a JSON ABI", path.display()))?;
        let code_hash = BytecodeDb::new(chain, store)
            .import(args.address, &json, &args.source)
            .await?;
        info!(address = %args.address, %code_hash, source = %args.source, "ABI imported");
        return Ok(());
    }

    let config = ctx.decoder_config();
    let client = config.http_client()?;
    let resolver = abi_resolver(&config, chain, store, &client, CancellationToken::new());
    let abi = resolver
        .resolve(args.address)
        .await
        .ok_or_else(|| eyre!("no ABI found for {}", args.address))?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Kind", "Signature"]);
    for (kind, signature) in abi.signatures() {
        table.add_row(vec![kind.to_string(), signature]);
    }
    println!("{} (source: {})", args.address, abi.source());
    println!("{table}");
    Ok(())
}

async fn handle_resolve(ctx: &AppContext, args: ResolveArgs) -> Result<()> {
    let store: Arc<dyn RecordStore> = ctx.open_store()?;
    let chain = RpcChainClient::connect(ctx.rpc_url()?).await?;
    let config = ctx.identity_config();
    let exchange = Arc::new(LoopringApi::new(config.http_client()?, &config.exchange_url));

    let record = if args.token {
        let tokens = TokenRegistry::load(
            store,
            Arc::new(Erc20Metadata::new(chain.provider())),
            exchange,
        )?;
        let id = tokens.get(&args.value)?;
        serde_json::to_value(tokens.resolve_all(id).await?)?
    } else {
        let peers = PeerRegistry::load(
            store,
            Arc::new(EnsResolver::new(chain.provider())),
            exchange,
            &config,
        )?;
        let id = peers.get(&args.value)?;
        serde_json::to_value(peers.resolve_all(id).await?)?
    };

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Field", "Value"]);
    if let serde_json::Value::Object(fields) = record {
        for (name, value) in fields {
            table.add_row(vec![name, describe_field(&value)]);
        }
    }
    println!("{table}");
    Ok(())
}

/// Human-readable form of a stored field.
fn describe_field(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some("") => "(not looked up)".to_string(),
        Some(".") => "(none)".to_string(),
        Some("!") => "(lookup failed)".to_string(),
        Some(text) => text.to_string(),
        None => value.to_string(),
    }
}

fn handle_consolidate(ctx: &AppContext) -> Result<()> {
    let store = ctx.open_store()?;
    let ones = consolidate_ones(store.as_ref()).wrap_err("failed to consolidate identities")?;
    info!(ones = ones.len(), db_path = %ctx.db_path, "consolidate command finished");
    Ok(())
}

fn handle_status(ctx: &AppContext) -> Result<()> {
    let store = ctx.open_store()?;
    let sizes = store.set_sizes().wrap_err("failed to query record sets")?;

    let db_size_str = if ctx.db_path == ":memory:" {
        "N/A (in-memory)".to_string()
    } else {
        match std::fs::metadata(&ctx.db_path) {
            Ok(metadata) => format!("{} KB", metadata.len() / 1_000),
            Err(_) => "N/A (file not found)".to_string(),
        }
    };

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Database Path", ctx.db_path.as_str()]);
    table.add_row(vec!["DB Size", &db_size_str]);
    if sizes.is_empty() {
        table.add_row(vec!["Records", "0"]);
    }
    for (set, count) in &sizes {
        table.add_row(vec![format!("Records: {set}"), count.to_string()]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_exchange_block(ctx: &AppContext, args: ExchangeBlockArgs) -> Result<()> {
    let config = ctx.identity_config();
    let api = LoopringApi::new(config.http_client()?, &config.exchange_url);
    let block = api
        .block(args.id)
        .await?
        .ok_or_else(|| eyre!("exchange block {} not found", args.id))?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "#", "Kind", "From", "To", "Token", "Value", "Token 2", "Value 2", "Fee", "Fee bips",
    ]);
    let account = |id: Option<u32>| id.map_or_else(|| "-".to_string(), |id| id.to_string());
    for tx in block.normalized() {
        table.add_row(vec![
            tx.index.to_string(),
            format!("{:?}", tx.kind),
            account(tx.from_account),
            account(tx.to_account),
            account(tx.token),
            tx.value.to_string(),
            account(tx.token2),
            tx.value2.to_string(),
            tx.fee.to_string(),
            tx.fee_bips.to_string(),
        ]);
    }
    println!(
        "exchange block {} ({} transactions, {})",
        block.block_id,
        block.transactions.len(),
        block.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{table}");
    Ok(())
}
