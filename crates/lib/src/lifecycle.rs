//! Process lifecycle: detaching from the terminal and reacting to SIGINT/SIGTERM.

use std::io;
use std::thread::JoinHandle;

/// Detach from the controlling terminal (double fork + setsid). Must run before any
/// other thread is started. stdio is redirected to /dev/null and the working
/// directory becomes `/`.
#[cfg(unix)]
pub fn daemonize() -> io::Result<()> {
    // SAFETY: called while the process is still single-threaded; only
    // async-signal-safe libc calls happen between fork and the parent's exit.
    unsafe {
        fork_and_exit_parent()?;
        if libc::setsid() < 0 {
            return Err(io::Error::last_os_error());
        }
        fork_and_exit_parent()?;
        libc::umask(0o022);
    }
    std::env::set_current_dir("/")?;
    redirect_stdio_to_null()
}

#[cfg(not(unix))]
pub fn daemonize() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "daemon mode is only supported on unix",
    ))
}

#[cfg(unix)]
unsafe fn fork_and_exit_parent() -> io::Result<()> {
    match libc::fork() {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(()),
        _ => libc::_exit(0),
    }
}

#[cfg(unix)]
fn redirect_stdio_to_null() -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    let fd = null.as_raw_fd();
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Completes on Ctrl+C or (unix) SIGTERM. If a handler cannot be installed that
/// branch never completes.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// Wait for [`shutdown_signal`] on a background thread and then run `on_signal` once.
pub fn spawn_shutdown_watcher<F>(on_signal: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name("shutdown-watcher".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::warn!("shutdown watcher disabled: {}", e);
                    return;
                }
            };
            rt.block_on(shutdown_signal());
            on_signal();
        })
}
