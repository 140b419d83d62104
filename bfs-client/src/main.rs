use anyhow::{Context, Result};
use bfs_client::config::load_config;
use bfs_client::local::LocalCluster;
use bfs_client::{ClientConfig, FileInfo, FileSystemClient};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "bfs")]
#[command(about = "Command line client for the BFS block file system", long_about = None)]
struct Cli {
    /// Name server address
    #[arg(long, env = "BFS_NAMESERVER", default_value = "127.0.0.1:8828")]
    nameserver: String,

    /// YAML file overriding call policies and buffer size
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Client(ClientCommand),
    #[command(about = "Run an in-memory name server and chunk servers on --nameserver")]
    ServeLocal {
        #[arg(long, default_value_t = 3)]
        replicas: usize,
    },
}

/// Commands that talk to a running name server.
#[derive(Subcommand)]
enum ClientCommand {
    #[command(about = "Create a directory and its missing parents")]
    Mkdir { path: String },
    #[command(about = "List a directory")]
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    #[command(about = "Show file or directory attributes")]
    Stat { path: String },
    #[command(about = "Delete a file")]
    Rm { path: String },
    #[command(about = "Delete a directory")]
    Rmdir {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    #[command(about = "Rename a file or directory")]
    Mv { old_path: String, new_path: String },
    #[command(about = "Copy a local file into the file system")]
    Put { local: PathBuf, remote: String },
    #[command(about = "Copy a file out of the file system")]
    Get { remote: String, local: PathBuf },
    #[command(about = "Print a file to stdout")]
    Cat { remote: String },
}

fn mode_string(info: &FileInfo) -> String {
    let mut s = String::with_capacity(10);
    s.push(if info.is_dir() { 'd' } else { '-' });
    let perms = info.permissions();
    for shift in [6, 3, 0] {
        let bits = (perms >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

async fn put(client: &FileSystemClient, local: &Path, remote: &str) -> Result<u64> {
    let mut src = File::open(local)
        .await
        .with_context(|| format!("Failed to open {}", local.display()))?;
    let handle = client.open_write(remote).await?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        handle.write(&buf[..n]).await?;
        total += n as u64;
    }
    handle.close().await?;
    Ok(total)
}

async fn copy_out<W: AsyncWrite + Unpin>(
    client: &FileSystemClient,
    remote: &str,
    out: &mut W,
) -> Result<u64> {
    let handle = client.open_read(remote).await?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = handle.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    out.flush().await?;
    handle.close().await?;
    Ok(total)
}

async fn serve_local(nameserver: &str, replicas: usize) -> Result<()> {
    let cluster = LocalCluster::start(nameserver, replicas)
        .await
        .with_context(|| format!("Failed to start local cluster on {nameserver}"))?;
    info!(nameserver = %cluster.nameserver_addr(), replicas, "serving");
    cluster.run_until_ctrl_c().await?;
    Ok(())
}

async fn run_client(nameserver: &str, config: ClientConfig, command: ClientCommand) -> Result<()> {
    let client = FileSystemClient::connect(nameserver, config).await?;
    match command {
        ClientCommand::Mkdir { path } => client.create_directory(&path).await?,
        ClientCommand::Ls { path } => {
            for entry in client.list_directory(&path).await? {
                println!(
                    "{} {:>12} {:>12} {}",
                    mode_string(&entry),
                    entry.size,
                    entry.ctime,
                    entry.name
                );
            }
        }
        ClientCommand::Stat { path } => {
            let info = client.stat(&path).await?;
            println!("name:  {}", info.name);
            println!("type:  {}", if info.is_dir() { "directory" } else { "file" });
            println!("mode:  {} ({:o})", mode_string(&info), info.permissions());
            println!("size:  {}", info.size);
            println!("ctime: {}", info.ctime);
        }
        ClientCommand::Rm { path } => client.delete_file(&path).await?,
        ClientCommand::Rmdir { path, recursive } => client.delete_directory(&path, recursive).await?,
        ClientCommand::Mv { old_path, new_path } => client.rename(&old_path, &new_path).await?,
        ClientCommand::Put { local, remote } => {
            let n = put(&client, &local, &remote).await?;
            info!(bytes = n, %remote, "put done");
        }
        ClientCommand::Get { remote, local } => {
            let mut out = File::create(&local)
                .await
                .with_context(|| format!("Failed to create {}", local.display()))?;
            let n = copy_out(&client, &remote, &mut out).await?;
            info!(bytes = n, local = %local.display(), "get done");
        }
        ClientCommand::Cat { remote } => {
            let mut out = tokio::io::stdout();
            copy_out(&client, &remote, &mut out).await?;
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::ServeLocal { replicas } => serve_local(&cli.nameserver, replicas).await,
        Commands::Client(command) => {
            let config = match &cli.config {
                Some(path) => load_config(path)?,
                None => ClientConfig::default(),
            };
            run_client(&cli.nameserver, config, command).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_commands_split_by_role() {
        let cli = Cli::try_parse_from(["bfs", "serve-local", "--replicas", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::ServeLocal { replicas: 2 }));

        let cli = Cli::try_parse_from(["bfs", "mv", "/a", "/b"]).unwrap();
        match cli.command {
            Commands::Client(ClientCommand::Mv { old_path, new_path }) => {
                assert_eq!((old_path.as_str(), new_path.as_str()), ("/a", "/b"));
            }
            _ => panic!("mv parsed as the wrong command"),
        }

        let cli = Cli::try_parse_from(["bfs", "ls"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Client(ClientCommand::Ls { path }) if path == "/"
        ));
    }
}
