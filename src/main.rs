use std::io::ErrorKind;
use std::sync::Arc;

use anyhow::{Context, Result};
use mailsink::{Config, ConsoleHandler, Error, Logger, MailServer, Opt};
use structopt::StructOpt;

fn bind_hint(port: u16, kind: ErrorKind) {
    match kind {
        ErrorKind::PermissionDenied if port < 1024 => {
            eprintln!("[ERROR] Port {} requires root privileges", port);
            eprintln!("[INFO] Try a port >= 1024, e.g. --port {}", port as u32 + 1000);
        }
        ErrorKind::AddrInUse => {
            eprintln!("[ERROR] Port {} is already in use", port);
            eprintln!("[INFO] Check what's using it: lsof -i :{}", port);
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    println!("==========================================");
    println!("mailsink v{}", env!("CARGO_PKG_VERSION"));
    println!("==========================================");

    if let Some(data_dir) = &opt.data_dir {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
            eprintln!("[INFO] Created data directory: {:?}", data_dir);
        }
    }

    let logger = Logger::new(opt.log_file.clone(), opt.raw_display, opt.verbose)
        .context("Failed to open log file")?;

    let config = match Config::from_opt(&opt) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            eprintln!("[INFO] Use --no-tls to run without STARTTLS");
            std::process::exit(1);
        }
    };

    let handler = Arc::new(ConsoleHandler::new(opt.raw_display, opt.data_dir.clone()));
    let server = MailServer::new(config, handler, logger);

    println!("[INFO] PID: {}", std::process::id());
    println!("[INFO] Hostname: {}", server.config().hostname);
    if let (true, Some(cert)) = (server.config().tls_enabled(), &opt.tls_cert) {
        println!("[INFO] STARTTLS enabled with certificate: {:?}", cert);
    } else {
        println!("[WARNING] TLS disabled - connections will be unencrypted");
    }
    println!("[INFO] Idle timeout: {}s", opt.timeout);

    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            if let Error::Bind { source, .. } = &e {
                bind_hint(opt.port, source.kind());
            }
            std::process::exit(1);
        }
    };

    println!("[INFO] Waiting for connections on {}", listener.local_addr()?);
    println!("[INFO] Press Ctrl+C to stop");

    listener
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("[ERROR] Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            println!("\n[INFO] Shutdown requested, waiting for open sessions");
        })
        .await?;

    println!("[INFO] Server stopped");
    Ok(())
}
