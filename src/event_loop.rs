use crate::application::Application;
use crate::fastcgi::{self, Connection};
use crate::server_handle::{ServerExitReason, ServerHandle};
use arc_swap::ArcSwap;
use mio::event::Events;
use mio::net::TcpListener;
use mio::{Interest, Poll, Token, Waker};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::OwnedFd;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread;

// Tokens used for the MIO event loop
const SERVER: Token = Token(0);
const SHUTDOWN: Token = Token(1);

struct EventLoop {
    socket: TcpListener,
    apps: Arc<ArcSwap<Application>>,
    poll: Poll,
    events: Events,
    signal_shutdown: SyncSender<()>,
}

pub(crate) fn create_handle(app: Application, address: SocketAddr) -> Result<ServerHandle, io::Error> {
    // The server thread blocks on `Poll::poll()` instead of `accept()`, so a `Waker` can interrupt
    // it when the handle asks for a stop. The thread then drains the worker pool and meets the
    // stopping thread on a zero-capacity channel.
    // See https://docs.rs/mio/latest/mio/struct.Poll.html#portability
    let mut socket = TcpListener::bind(address)?;

    let address = socket.local_addr()?;

    if !app.settings().quiet {
        log::info!(environment = app.settings().environment.as_str(); "FastCGI server listening on {address}");
    }

    let poll = Poll::new()?;

    let events = Events::with_capacity(128);

    let server_waker = Waker::new(poll.registry(), SHUTDOWN)?;

    poll.registry()
        .register(&mut socket, SERVER, Interest::READABLE)?;

    let (signal_shutdown, observe_shutdown) = sync_channel(0);

    let apps = Arc::new(ArcSwap::from_pointee(app));

    let event_loop = EventLoop {
        socket,
        apps: Arc::clone(&apps),
        poll,
        events,
        signal_shutdown,
    };

    let handle = thread::spawn(move || start(event_loop));

    Ok(ServerHandle {
        address,
        apps,
        server_loop: handle,
        server_waker,
        observe_shutdown,
    })
}

fn start(mut evloop: EventLoop) -> ServerExitReason {
    // `shutdown_threadpool` should always be called before exiting this function, regardless of
    // cause, so in-flight requests finish.
    let mut builder = threadpool::Builder::new().thread_name(String::from("crooner-worker"));
    if let Some(threads) = evloop.apps.load().settings().threads {
        builder = builder.num_threads(threads.max(1));
    }
    let pool = builder.build();

    loop {
        if let Err(err) = evloop.poll.poll(&mut evloop.events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::warn!(error:err = err; "Poll call failed. Server loop will exit");
            shutdown_threadpool(pool);
            return ServerExitReason::Err(err);
        }

        for event in evloop.events.iter() {
            match event.token() {
                SERVER => loop {
                    match evloop.socket.accept() {
                        Ok((stream, peer)) => {
                            let stream = match into_blocking(stream) {
                                Ok(s) => s,
                                Err(err) => {
                                    log::warn!(error:err = err, peer:% = peer; "Could not configure accepted socket");
                                    continue;
                                }
                            };
                            // Each connection sees the application that was current when it
                            // was accepted
                            let app = evloop.apps.load_full();
                            pool.execute(move || {
                                let mut connection = Connection::new(stream);
                                fastcgi::handle_connection(&mut connection, &app);
                            });
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            log::warn!(error:err = err; "Socket accept call failed. Server loop will exit");
                            shutdown_threadpool(pool);
                            return ServerExitReason::Err(err);
                        }
                    }
                },
                SHUTDOWN => {
                    shutdown_threadpool(pool);
                    if evloop.signal_shutdown.send(()).is_err() {
                        // The receiver lives in the handle, which blocks on it right after waking
                        // this thread
                        log::error!("unreachable code reached! failed to notify main thread of shutdown.");
                        unreachable!("failed to notify main thread of shutdown");
                    }
                    return ServerExitReason::Normal;
                }
                _ => unreachable!(),
            }
        }
    }
}

// Accepted sockets inherit the listener's non-blocking mode. Workers use plain blocking IO.
fn into_blocking(stream: mio::net::TcpStream) -> Result<TcpStream, io::Error> {
    let stream = TcpStream::from(OwnedFd::from(stream));
    stream.set_nonblocking(false)?;
    Ok(stream)
}

fn shutdown_threadpool(pool: threadpool::ThreadPool) {
    pool.join();
    drop(pool);
}
