mod error;
mod handler;
mod interest;
mod pool;
mod reactor;

#[cfg(all(unix, target_os = "linux"))]
mod epoll;
#[cfg(all(unix, not(target_os = "linux")))]
mod kqueue;
#[cfg(windows)]
mod iocp;

pub use error::ReactorError;
pub use handler::AsyncIoHandler;
pub use interest::Interest;
pub use pool::ReactorPool;
pub use reactor::{POLL_TIMEOUT_MS, Reactor};

/// Raw OS socket/file-descriptor handle. `i32` on Unix, the native `SOCKET`
/// width on Windows.
#[cfg(unix)]
pub type Fd = std::os::raw::c_int;
#[cfg(windows)]
pub type Fd = usize;

#[cfg(all(unix, target_os = "linux"))]
pub use epoll::EpollReactor as DefaultReactor;
#[cfg(all(unix, not(target_os = "linux")))]
pub use kqueue::KqueueReactor as DefaultReactor;
#[cfg(windows)]
pub use iocp::IocpReactor as DefaultReactor;

#[cfg(all(test, unix))]
mod tests {
    use std::{
        io::{Read, Write},
        net::{TcpListener, TcpStream},
        os::fd::AsRawFd,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use netcore_memory::Pool;

    use super::*;

    struct RecordingHandler {
        read: AtomicBool,
    }

    impl AsyncIoHandler for RecordingHandler {
        fn on_read(&self, _fd: Fd, bytes: &[u8]) {
            assert_eq!(bytes, b"ping");
            self.read.store(true, Ordering::SeqCst);
        }
        fn on_write(&self, _fd: Fd) {}
        fn on_close(&self, _fd: Fd) {}
        fn on_error(&self, _fd: Fd, _err: std::io::Error) {}
    }

    #[test]
    fn delivers_on_read_for_ready_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let reactor = Arc::new(DefaultReactor::new(Pool::default()).unwrap());
        let handler = Arc::new(RecordingHandler { read: AtomicBool::new(false) });
        reactor.add(server.as_raw_fd(), Interest::READ, handler.clone()).unwrap();

        let r = reactor.clone();
        let thread = std::thread::spawn(move || r.run());

        client.write_all(b"ping").unwrap();
        std::thread::sleep(Duration::from_millis(250));
        reactor.stop();
        thread.join().unwrap();

        assert!(handler.read.load(Ordering::SeqCst));
        let _ = client.read(&mut [0u8; 1]);
    }
}
