use std::{
    collections::HashMap,
    os::fd::RawFd,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use netcore_memory::Pool;
use tracing::{error, warn};

use crate::{Fd, Interest, ReactorError, handler::AsyncIoHandler, reactor::{POLL_TIMEOUT_MS, Reactor}};

fn to_epoll_events(interest: Interest) -> u32 {
    let mut events = libc::EPOLLET as u32;
    if interest.contains(Interest::READ) {
        events |= libc::EPOLLIN as u32;
    }
    if interest.contains(Interest::WRITE) {
        events |= libc::EPOLLOUT as u32;
    }
    events
}

/// Edge-triggered epoll reactor. A reader must drain a readable fd until
/// `EAGAIN` per notification, since epoll will not re-signal a still-ready
/// fd on its own.
pub struct EpollReactor {
    epfd: RawFd,
    handlers: RwLock<HashMap<Fd, Arc<dyn AsyncIoHandler>>>,
    running: AtomicBool,
    pool: Pool,
}

impl EpollReactor {
    pub fn new(pool: Pool) -> Result<Self, ReactorError> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(EpollReactor { epfd, handlers: RwLock::new(HashMap::new()), running: AtomicBool::new(false), pool })
    }

    fn ctl(&self, op: i32, fd: Fd, interest: Option<Interest>) -> Result<(), ReactorError> {
        let mut event = libc::epoll_event { events: interest.map(to_epoll_events).unwrap_or(0), u64: fd as u64 };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) };
        if rc < 0 { Err(std::io::Error::last_os_error().into()) } else { Ok(()) }
    }
}

impl Reactor for EpollReactor {
    fn add(&self, fd: Fd, interest: Interest, handler: Arc<dyn AsyncIoHandler>) -> Result<(), ReactorError> {
        self.handlers.write().unwrap().insert(fd, handler);
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some(interest))
    }

    fn modify(&self, fd: Fd, interest: Interest) -> Result<(), ReactorError> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some(interest))
    }

    fn remove(&self, fd: Fd) -> Result<(), ReactorError> {
        self.handlers.write().unwrap().remove(&fd);
        self.ctl(libc::EPOLL_CTL_DEL, fd, None)
    }

    fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; 1024];

        while self.running.load(Ordering::SeqCst) {
            let n = unsafe {
                libc::epoll_wait(self.epfd, events.as_mut_ptr(), events.len() as i32, POLL_TIMEOUT_MS)
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                error!(%err, "epoll_wait failed");
                break;
            }

            for ev in &events[..n as usize] {
                let fd = ev.u64 as Fd;
                let handler = self.handlers.read().unwrap().get(&fd).cloned();
                let Some(handler) = handler else { continue };

                if ev.events & (libc::EPOLLIN as u32) != 0 {
                    // Edge-triggered: keep reading until EAGAIN, a close, or
                    // a hard error, since epoll will not re-signal a still-
                    // readable fd on its own.
                    loop {
                        let mut buf = self.pool.acquire();
                        let n = unsafe { libc::read(fd, buf.data_mut().as_mut_ptr().cast(), buf.capacity()) };
                        if n < 0 {
                            let err = std::io::Error::last_os_error();
                            if err.raw_os_error() != Some(libc::EAGAIN) {
                                handler.on_error(fd, err);
                            }
                            break;
                        } else if n == 0 {
                            handler.on_close(fd);
                            break;
                        } else {
                            buf.set_length(n as usize);
                            handler.on_read(fd, buf.bytes());
                        }
                    }
                }

                if ev.events & (libc::EPOLLOUT as u32) != 0 {
                    handler.on_write(fd);
                }

                if ev.events & ((libc::EPOLLERR | libc::EPOLLHUP) as u32) != 0 {
                    handler.on_error(fd, std::io::Error::from_raw_os_error(libc::ECONNRESET));
                }
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn close(&self) -> Result<(), ReactorError> {
        self.stop();
        let rc = unsafe { libc::close(self.epfd) };
        if rc < 0 {
            warn!(err = %std::io::Error::last_os_error(), "epoll close failed");
        }
        Ok(())
    }
}

impl Drop for EpollReactor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
