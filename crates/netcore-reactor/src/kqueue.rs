use std::{
    collections::HashMap,
    mem::MaybeUninit,
    os::fd::RawFd,
    ptr,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use netcore_memory::Pool;
use tracing::{error, warn};

use crate::{Fd, Interest, ReactorError, handler::AsyncIoHandler, reactor::{POLL_TIMEOUT_MS, Reactor}};

/// kqueue reactor. Naturally edge-triggered, unlike epoll there is no
/// separate "modify" primitive — changing interest re-issues delete+add.
pub struct KqueueReactor {
    kq: RawFd,
    handlers: RwLock<HashMap<Fd, Arc<dyn AsyncIoHandler>>>,
    running: AtomicBool,
    pool: Pool,
}

impl KqueueReactor {
    pub fn new(pool: Pool) -> Result<Self, ReactorError> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(KqueueReactor { kq, handlers: RwLock::new(HashMap::new()), running: AtomicBool::new(false), pool })
    }

    fn changelist(fd: Fd, interest: Interest, flags: i16) -> Vec<libc::kevent> {
        let mut changes = Vec::with_capacity(2);
        if interest.contains(Interest::READ) {
            changes.push(libc::kevent {
                ident: fd as usize,
                filter: libc::EVFILT_READ,
                flags: flags as u16,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            });
        }
        if interest.contains(Interest::WRITE) {
            changes.push(libc::kevent {
                ident: fd as usize,
                filter: libc::EVFILT_WRITE,
                flags: flags as u16,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            });
        }
        changes
    }

    fn apply(&self, changes: &mut [libc::kevent]) -> Result<(), ReactorError> {
        if changes.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            libc::kevent(self.kq, changes.as_ptr(), changes.len() as i32, ptr::null_mut(), 0, ptr::null())
        };
        if rc < 0 { Err(std::io::Error::last_os_error().into()) } else { Ok(()) }
    }

    fn remove_raw(&self, fd: Fd) {
        let mut changes = Self::changelist(fd, Interest::READ_WRITE, (libc::EV_DELETE) as i16);
        // best-effort: the fd may already be gone from the kernel's interest set
        let _ = self.apply(&mut changes);
    }
}

impl Reactor for KqueueReactor {
    fn add(&self, fd: Fd, interest: Interest, handler: Arc<dyn AsyncIoHandler>) -> Result<(), ReactorError> {
        self.handlers.write().unwrap().insert(fd, handler);
        let mut changes = Self::changelist(fd, interest, (libc::EV_ADD | libc::EV_ENABLE) as i16);
        self.apply(&mut changes)
    }

    fn modify(&self, fd: Fd, interest: Interest) -> Result<(), ReactorError> {
        self.remove_raw(fd);
        let mut changes = Self::changelist(fd, interest, (libc::EV_ADD | libc::EV_ENABLE) as i16);
        self.apply(&mut changes)
    }

    fn remove(&self, fd: Fd) -> Result<(), ReactorError> {
        self.handlers.write().unwrap().remove(&fd);
        self.remove_raw(fd);
        Ok(())
    }

    fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut events: Vec<libc::kevent> = (0..1024)
            .map(|_| unsafe { MaybeUninit::<libc::kevent>::zeroed().assume_init() })
            .collect();
        let timeout = libc::timespec { tv_sec: 0, tv_nsec: (POLL_TIMEOUT_MS as i64) * 1_000_000 };

        while self.running.load(Ordering::SeqCst) {
            let n = unsafe {
                libc::kevent(self.kq, ptr::null(), 0, events.as_mut_ptr(), events.len() as i32, &timeout)
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                error!(%err, "kevent wait failed");
                break;
            }

            for ev in &events[..n as usize] {
                let fd = ev.ident as Fd;
                let handler = self.handlers.read().unwrap().get(&fd).cloned();
                let Some(handler) = handler else { continue };

                if ev.filter == libc::EVFILT_READ {
                    // kqueue is naturally edge-triggered too: drain until
                    // EAGAIN, a close, or a hard error per notification.
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

                if ev.filter == libc::EVFILT_WRITE {
                    handler.on_write(fd);
                }

                if ev.flags & (libc::EV_ERROR as u16) != 0 {
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
        let rc = unsafe { libc::close(self.kq) };
        if rc < 0 {
            warn!(err = %std::io::Error::last_os_error(), "kqueue close failed");
        }
        Ok(())
    }
}

impl Drop for KqueueReactor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
