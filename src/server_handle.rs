use crate::application::Application;
use crate::error::Error;
use crate::event_loop;
use arc_swap::ArcSwap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Starts serving `app` with FastCGI on `address`.
///
/// The server runs on its own thread. Requests are handled by a pool of worker threads sized by
/// [`Settings::threads`](crate::Settings::threads).
pub fn start(address: impl ToSocketAddrs, app: Application) -> Result<ServerHandle, Error> {
    let address = address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
    })?;

    Ok(event_loop::create_handle(app, address)?)
}

/// The reason the server exited
#[derive(Debug, Default)]
pub enum ServerExitReason {
    /// It was gracefully shutdown
    #[default]
    Normal,
    /// Polling the server socket for new connections failed somehow.
    Err(io::Error),
    /// The server panicked. The payload will contain the panic message.
    Panic(String),
}

/// Handle to a running FastCGI server
pub struct ServerHandle {
    pub(crate) address: SocketAddr,
    pub(crate) apps: Arc<ArcSwap<Application>>,
    pub(crate) server_loop: JoinHandle<ServerExitReason>,
    pub(crate) server_waker: mio::Waker,
    pub(crate) observe_shutdown: Receiver<()>,
}

impl ServerHandle {
    /// Blocks until the server terminates and returns the reason.
    ///
    /// This function does not attempt to stop the server.
    /// It waits (potentially indefinitely) until the server exits.
    /// If you want to stop the server, use [`stop()`](crate::ServerHandle::stop).
    pub fn join(self) -> ServerExitReason {
        match self.server_loop.join() {
            Ok(r) => r,
            Err(any) => match any.as_ref().downcast_ref::<String>() {
                Some(s) => ServerExitReason::Panic(s.clone()),
                None => match any.as_ref().downcast_ref::<&str>() {
                    Some(s) => ServerExitReason::Panic(s.to_string()),
                    None => ServerExitReason::Panic(String::new()),
                },
            },
        }
    }

    /// Stops the FastCGI server
    ///
    /// The server waits for all in-flight requests to complete before it is shutdown
    pub fn stop(self) {
        // If the wake fails, the server thread may never reach the rendezvous, so don't wait on
        // it. Shutdown is best effort.
        let Ok(()) = self.server_waker.wake() else {
            return;
        };

        // An error here means the server loop already exited on its own
        let _ = self.observe_shutdown.recv();
    }

    /// Replaces the application serving new connections.
    ///
    /// Requests already in flight finish with the application they started with.
    pub fn reload(&self, app: Application) {
        log::info!("Reloading application");
        self.apps.store(Arc::new(app));
    }

    /// Returns the address at which the server is currently listening
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}
