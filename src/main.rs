//! nfs-store - Remote File-Store Client
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use nfs_store::config::{
    ClientOptions, CliArgs, Command, Credentials, FileStoreConfig, FileSystemConfig, ServerUrl,
};
use nfs_store::nfs::{create_client, NfsClient, NfsTarget};
use nfs_store::progress::{
    print_download_summary, print_folder, print_header, print_resource, print_tree,
    DownloadProgress,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    let config = FileSystemConfig::load(&args.config)
        .with_context(|| format!("Invalid configuration {}", args.config.display()))?;
    let credentials = credentials_from_args(&args)?;
    let options = ClientOptions {
        timeout: Duration::from_secs(args.timeout),
        ..ClientOptions::default()
    };

    let client = create_client(&config, credentials, &options)
        .with_context(|| format!("Cannot use file system '{}'", config.name))?;

    if !args.quiet {
        let server = ServerUrl::parse(&config.url)
            .map(|url| url.to_display_string())
            .unwrap_or_else(|_| config.url.clone());
        print_header(&server, &config.protocol.to_string(), client.username());
    }

    let result = execute(client.as_ref(), &config, &args);
    client.close_session();
    result
}

fn execute(client: &dyn NfsClient, config: &FileSystemConfig, args: &CliArgs) -> Result<()> {
    match &args.command {
        Command::Check { path } => {
            client
                .try_connect_and_read_target(path)
                .with_context(|| format!("Cannot read '{}'", path))?;
            info!(path = %path, "Target is readable");
            if !args.quiet {
                println!("OK");
            }
        }

        Command::Ls {
            path,
            order,
            anchor_path,
            anchor_id,
        } => {
            let anchor = match (anchor_id, anchor_path) {
                (Some(id), Some(anchor_path)) => {
                    let mut store = FileStoreConfig::new(*id, anchor_path.clone());
                    store.file_system_id = config.id;
                    Some(store)
                }
                _ => None,
            };
            let tree = client
                .create_file_tree(path, order, anchor.as_ref())
                .with_context(|| format!("Cannot list '{}'", path))?;
            print_tree(&tree);
        }

        Command::Stat { path, id, folder } => {
            let target = NfsTarget::new(path.clone(), *id);
            if *folder {
                match client.query_for_nfs_folder(&target)? {
                    Some(details) => print_folder(&details),
                    None => bail!("Folder {} not found", target),
                }
            } else {
                match client.query_for_nfs_file(&target)? {
                    Some(file) => print_resource(&file.details),
                    None => bail!("File {} not found", target),
                }
            }
        }

        Command::Get { path, id, output } => {
            let target = NfsTarget::new(path.clone(), *id);
            download(client, &target, output.clone(), args.quiet)?;
        }
    }

    Ok(())
}

/// Stream a remote file into a local one
fn download(
    client: &dyn NfsClient,
    target: &NfsTarget,
    output: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let start = Instant::now();
    let mut file = client
        .query_nfs_file_for_download(target)
        .with_context(|| format!("Cannot download {}", target))?;

    let output = output.unwrap_or_else(|| PathBuf::from(file.name()));
    let stream = file
        .take_stream()
        .with_context(|| format!("No content stream for {}", file.full_path()))?;

    let progress = if quiet {
        DownloadProgress::hidden()
    } else {
        DownloadProgress::new(file.name(), file.size())
    };

    let local = File::create(&output)
        .with_context(|| format!("Cannot create {}", output.display()))?;
    let mut writer = BufWriter::new(local);
    let mut reader = progress.wrap(stream);
    let bytes = io::copy(&mut reader, &mut writer)
        .with_context(|| format!("Transfer of {} failed", file.full_path()))?;
    writer.flush().context("Failed to flush output file")?;

    progress.finish_and_clear();
    info!(remote = %file.full_path(), bytes, "Download finished");

    if !quiet {
        print_download_summary(
            file.full_path(),
            &output.display().to_string(),
            bytes,
            start.elapsed(),
        );
    }

    Ok(())
}

/// Build credentials from the password or key file arguments
fn credentials_from_args(args: &CliArgs) -> Result<Credentials> {
    match (&args.password, &args.key_file) {
        (Some(_), Some(_)) => bail!("Use either --password or --key-file, not both"),
        (Some(password), None) => Ok(Credentials::password(&args.username, password)),
        (None, Some(key_file)) => {
            let private_key = std::fs::read_to_string(key_file)
                .with_context(|| format!("Cannot read key file {}", key_file.display()))?;
            Ok(Credentials::key_pair(
                &args.username,
                private_key,
                args.passphrase.clone(),
            ))
        }
        (None, None) => bail!("A --password or a --key-file is required"),
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("nfs_store=debug,warn")
    } else {
        EnvFilter::new("nfs_store=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr)
        .init();

    Ok(())
}
