use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Result};
use clap::{Arg, Command};
use tracing::{error, info};

mod utils;

use utils::download::download_pdf;
use utils::http::build_client;
use utils::resolver::extract_pdf_url;

/// Print `message` and read one trimmed line from stdin.
fn prompt(message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn run(output: PathBuf, referer: Option<String>, timeout: u64, insecure: bool) -> Result<()> {
    let input_url = prompt("Enter a PDF.js viewer URL or a direct PDF link: ")?;
    if input_url.is_empty() {
        bail!("URL must not be empty");
    }

    let client = build_client(timeout, insecure)?;

    info!("Resolving the direct PDF URL...");
    let pdf_url = extract_pdf_url(&client, &input_url, referer.as_deref()).await?;
    println!("Found PDF URL: {pdf_url}");

    info!("Downloading the PDF...");
    let saved = download_pdf(&client, &pdf_url, &output, referer.as_deref()).await?;
    println!("Saved: {}", saved.display());

    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = Command::new("pdfjs-dl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Download the PDF behind a PDF.js viewer page (viewer.html/viewer.js)")
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Destination file or directory (default: server-suggested name in the current directory)")
                .default_value(".")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("referer")
                .long("referer")
                .value_name("URL")
                .help("Referer header, for sites that require one")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("Per-request timeout in seconds (default: 25)")
                .value_parser(clap::value_parser!(u64))
                .default_value("25"),
        )
        .arg(
            Arg::new("insecure")
                .long("insecure")
                .help("Skip TLS certificate verification (not recommended)")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Logs go to stderr; stdout carries the resolved URL and saved path.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let output = PathBuf::from(matches.get_one::<String>("output").unwrap());
    let referer = matches.get_one::<String>("referer").cloned();
    let timeout = *matches.get_one::<u64>("timeout").unwrap();
    let insecure = matches.get_flag("insecure");

    let result = run(output, referer, timeout, insecure).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }

    // Keep the console window open when the binary is launched by double-click.
    let _ = prompt("Press Enter to exit...");

    if result.is_err() {
        process::exit(1);
    }
}
