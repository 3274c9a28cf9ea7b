use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use filebridge_base::{
    FileModel, FileParams, FileStream, Filesystem, FsError, ServerModel, ServerType,
};
use filebridge_core::{open_local, open_server, BridgeConfig};

#[derive(Parser, Debug)]
#[command(name = "filebridge")]
#[command(about = "Browse and edit files on local disks, FTP(S), SFTP and WebDAV servers")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "FILEBRIDGE_CONFIG_PATH", global = true)]
    config_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "FILEBRIDGE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Configured server to operate on, by name or uuid (local disk when omitted)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Root directory of the local filesystem (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Character set for reading and writing text
    #[arg(long, default_value = "utf-8", global = true)]
    charset: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured servers
    Servers,
    /// Register a server in the config file
    AddServer(AddServer),
    /// List a directory
    Ls { path: Option<String> },
    /// Print a text file
    Cat { path: String },
    /// Write a text file from stdin or a local file
    Put {
        path: String,
        /// Local file to read instead of stdin
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Create an empty file
    Touch { path: String },
    /// Rename or move an entry
    Mv { source: String, dest: String },
    /// Copy an entry
    Cp { source: String, dest: String },
    /// Delete an entry
    Rm {
        path: String,
        /// The entry is a directory; delete it with its contents
        #[arg(long)]
        dir: bool,
    },
    /// Report whether an entry exists
    Exists { path: String },
    /// Pack entries into a zip archive
    Zip {
        dest: String,
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Unpack a zip archive into a directory
    Unzip { archive: String, dest: String },
}

#[derive(Args, Debug)]
struct AddServer {
    name: String,
    /// ftp, ftps, sftp, webdav or webdavs
    #[arg(long = "type", value_parser = parse_server_type)]
    server_type: ServerType,
    #[arg(long)]
    address: String,
    /// Defaults to the protocol's standard port
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, default_value = "")]
    username: String,
    #[arg(long, env = "FILEBRIDGE_PASSWORD", default_value = "")]
    password: String,
    #[arg(long, default_value = "/")]
    initial_dir: String,
    /// Trust self-signed certificates
    #[arg(long)]
    accept_invalid_certs: bool,
}

fn parse_server_type(value: &str) -> std::result::Result<ServerType, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown server type {:?}", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config_path
        .map(PathBuf::from)
        .unwrap_or_else(BridgeConfig::default_path);
    let mut config = BridgeConfig::load_or_default(&config_path)?;

    let command = match cli.command {
        Commands::Servers => {
            for server in &config.servers {
                println!(
                    "{}\t{}\t{}\t{}",
                    server.name,
                    server.server_type,
                    server.endpoint(),
                    server.uuid
                );
            }
            return Ok(());
        }
        Commands::AddServer(args) => {
            let mut server = ServerModel::new(
                args.name,
                args.server_type,
                args.address,
                args.username,
                args.password,
            );
            if let Some(port) = args.port {
                server.port = port;
            }
            server.initial_dir = args.initial_dir;
            server.accept_invalid_certs = args.accept_invalid_certs;
            server.connect_timeout_secs = config.connect_timeout_secs;

            let uuid = config.add_server(server)?.uuid.clone();
            config.save(&config_path)?;
            info!("saved config to {}", config_path.display());
            println!("{}", uuid);
            return Ok(());
        }
        command => command,
    };

    let fs: Box<dyn Filesystem> = match &cli.server {
        Some(key) => {
            let server = config
                .find_server(key)
                .with_context(|| format!("no server named {:?} in {}", key, config_path.display()))?;
            open_server(server, &config.cache_dir)?
        }
        None => {
            let root = match cli.root {
                Some(root) => root,
                None => std::env::current_dir().context("failed to read current directory")?,
            };
            open_local(root)
        }
    };
    let params = FileParams::for_label(&cli.charset)
        .with_context(|| format!("unknown charset {:?}", cli.charset))?;

    // Dropping the command future on Ctrl+C cancels the transfer in flight.
    tokio::select! {
        result = run(command, fs.as_ref(), &params) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("received Ctrl+C, cancelling");
            bail!("interrupted");
        }
    }
}

/// Model for a path given on the command line, relative to the default
/// location unless absolute.
fn model(fs: &dyn Filesystem, path: &str, directory: bool) -> FileModel {
    let root = fs.default_location();
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", root.path().trim_end_matches('/'), path)
    };
    FileModel {
        directory,
        ..FileModel::new(root.scheme(), root.filesystem_uuid.clone(), &path)
    }
}

/// Resolve an existing entry with its metadata by listing its parent.
async fn lookup(fs: &dyn Filesystem, path: &str) -> Result<FileModel> {
    let target = model(fs, path, false);
    if target.is_root() {
        return Ok(FileModel { directory: true, ..target });
    }
    let parent_path = target.parent_path().unwrap_or("/").to_string();
    let parent = FileModel::directory(target.scheme(), target.filesystem_uuid.clone(), &parent_path);
    let tree = fs.provide_directory(&parent).await?;
    match tree.children.into_iter().find(|c| c.path() == target.path()) {
        Some(found) => Ok(found),
        None => Err(FsError::not_found(target.path()).into()),
    }
}

async fn print_progress(mut stream: FileStream) -> Result<()> {
    let mut count = 0;
    while let Some(item) = stream.next().await {
        println!("{}", item?.path());
        count += 1;
    }
    info!("{} entries", count);
    Ok(())
}

async fn run(command: Commands, fs: &dyn Filesystem, params: &FileParams) -> Result<()> {
    match command {
        Commands::Ls { path } => {
            let dir = model(fs, path.as_deref().unwrap_or(""), true);
            let tree = fs.provide_directory(&dir).await?;
            for child in &tree.children {
                println!(
                    "{}{} {:>12} {}{}",
                    if child.directory { 'd' } else { '-' },
                    child.permission,
                    child.size,
                    child.name(),
                    if child.directory { "/" } else { "" }
                );
            }
        }
        Commands::Cat { path } => {
            let text = fs.load_file(&model(fs, &path, false), params).await?;
            print!("{}", text);
        }
        Commands::Put { path, from } => {
            let text = match from {
                Some(local) => tokio::fs::read_to_string(&local)
                    .await
                    .with_context(|| format!("failed to read {}", local.display()))?,
                None => {
                    let mut text = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut text)
                        .await
                        .context("failed to read stdin")?;
                    text
                }
            };
            fs.save_file(&model(fs, &path, false), &text, params).await?;
        }
        Commands::Mkdir { path } => fs.create_file(&model(fs, &path, true)).await?,
        Commands::Touch { path } => fs.create_file(&model(fs, &path, false)).await?,
        Commands::Mv { source, dest } => {
            let source = lookup(fs, &source).await?;
            let dest = model(fs, &dest, source.directory);
            fs.rename_file(&source, &dest).await?;
        }
        Commands::Cp { source, dest } => {
            let source = lookup(fs, &source).await?;
            let dest = model(fs, &dest, source.directory);
            fs.copy_file(&source, &dest).await?;
        }
        Commands::Rm { path, dir } => fs.delete_file(&model(fs, &path, dir)).await?,
        Commands::Exists { path } => {
            let exists = fs.exists(&model(fs, &path, false)).await?;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
        Commands::Zip { dest, sources } => {
            let mut models = Vec::with_capacity(sources.len());
            for source in &sources {
                models.push(lookup(fs, source).await?);
            }
            let stream = fs.compress_files(&models, &model(fs, &dest, false)).await?;
            print_progress(stream).await?;
        }
        Commands::Unzip { archive, dest } => {
            let stream = fs
                .extract_files(&model(fs, &archive, false), &model(fs, &dest, true))
                .await?;
            print_progress(stream).await?;
        }
        Commands::Servers | Commands::AddServer(_) => {}
    }
    Ok(())
}
