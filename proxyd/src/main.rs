use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use proxyd::{Proxy, SHUTDOWN};

/// HTTP/1.0 caching forward proxy.
#[derive(Parser)]
#[command(name = "proxyd", version, about)]
struct Cli {
    /// TCP port to listen on.
    port: u16,
}

extern "C" fn on_sigint(_sig: libc::c_int) {
    // Nothing but an atomic store is safe here; the accept loop does the
    // actual draining.
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // SAFETY: installed before any worker thread exists. SIGPIPE is ignored
    // so a vanished client surfaces as a write error in its worker instead
    // of killing the process.
    unsafe {
        let handler: extern "C" fn(libc::c_int) = on_sigint;
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let proxy = match Proxy::bind(cli.port) {
        Ok(proxy) => proxy,
        Err(err) => {
            error!(%err, port = cli.port, "could not bind listener");
            return ExitCode::FAILURE;
        }
    };

    match proxy.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "proxy terminated");
            ExitCode::FAILURE
        }
    }
}
