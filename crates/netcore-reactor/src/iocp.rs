//! IOCP adapts Windows' completion model to the same readiness interface the
//! Unix backends expose. Exactly one `WSARecv` is kept outstanding per
//! socket; when it completes, the reactor hands the received bytes to
//! `on_read` and immediately re-issues another recv so the next arrival of
//! data produces another completion, i.e. another readiness event. Writes go
//! through the ordinary IOCP completion path: `on_write` fires once a queued
//! send completes.
use std::{
    collections::HashMap,
    ptr,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use netcore_memory::{Buffer, Pool};
use tracing::{error, warn};
use windows_sys::Win32::{
    Foundation::{CloseHandle, ERROR_IO_PENDING, HANDLE, WAIT_TIMEOUT},
    Networking::WinSock::{SOCKET, WSABUF, WSAGetLastError, WSARecv},
    System::IO::{CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED, PostQueuedCompletionStatus},
};

use crate::{Fd, Interest, ReactorError, handler::AsyncIoHandler, reactor::{POLL_TIMEOUT_MS, Reactor}};

/// Sentinel completion key used to wake `run()` out of `GetQueuedCompletionStatus`
/// when `stop()` is called.
const WAKE_KEY: usize = 0;

enum PendingKind {
    Read,
    Write,
}

#[repr(C)]
struct PendingIo {
    overlapped: OVERLAPPED,
    fd: Fd,
    kind: PendingKind,
    buffer: Buffer,
}

pub struct IocpReactor {
    port: HANDLE,
    handlers: RwLock<HashMap<Fd, Arc<dyn AsyncIoHandler>>>,
    running: AtomicBool,
    pool: Pool,
}

unsafe impl Send for IocpReactor {}
unsafe impl Sync for IocpReactor {}

impl IocpReactor {
    pub fn new(pool: Pool) -> Result<Self, ReactorError> {
        let port = unsafe { CreateIoCompletionPort(HANDLE::default(), HANDLE::default(), 0, 0) };
        if port.is_null() {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(IocpReactor { port, handlers: RwLock::new(HashMap::new()), running: AtomicBool::new(false), pool })
    }

    fn issue_read(&self, fd: Fd) -> Result<(), ReactorError> {
        let buffer = self.pool.acquire();
        let mut pending =
            Box::new(PendingIo { overlapped: unsafe { std::mem::zeroed() }, fd, kind: PendingKind::Read, buffer });
        let wsabuf = WSABUF { len: pending.buffer.capacity() as u32, buf: pending.buffer.data_mut().as_mut_ptr() };
        let overlapped_ptr = ptr::addr_of_mut!(pending.overlapped);
        let mut flags: u32 = 0;
        let mut bytes_received: u32 = 0;

        let rc = unsafe {
            WSARecv(fd as SOCKET, &wsabuf, 1, &mut bytes_received, &mut flags, overlapped_ptr, None)
        };

        if rc != 0 {
            let err = unsafe { WSAGetLastError() };
            if err.0 != ERROR_IO_PENDING.0 as i32 {
                drop(unsafe { Box::from_raw(overlapped_ptr.cast::<PendingIo>()) });
                return Err(std::io::Error::from_raw_os_error(err.0).into());
            }
        }

        // the kernel now owns `pending` until completion; leak it deliberately
        std::mem::forget(pending);
        Ok(())
    }
}

impl IocpReactor {
    /// Windows has no writable-readiness notification; a queued `WSASend`
    /// itself produces the completion that later surfaces as `on_write`.
    /// Peers on this platform submit writes through the reactor instead of
    /// calling a raw non-blocking write.
    pub fn submit_write(&self, fd: Fd, buffer: Buffer) -> Result<(), ReactorError> {
        let mut pending =
            Box::new(PendingIo { overlapped: unsafe { std::mem::zeroed() }, fd, kind: PendingKind::Write, buffer });
        let wsabuf = windows_sys::Win32::Networking::WinSock::WSABUF {
            len: pending.buffer.len() as u32,
            buf: pending.buffer.data_mut().as_mut_ptr(),
        };
        let overlapped_ptr = ptr::addr_of_mut!(pending.overlapped);
        let mut bytes_sent: u32 = 0;

        let rc = unsafe {
            windows_sys::Win32::Networking::WinSock::WSASend(
                fd as SOCKET,
                &wsabuf,
                1,
                &mut bytes_sent,
                0,
                overlapped_ptr,
                None,
            )
        };

        if rc != 0 {
            let err = unsafe { WSAGetLastError() };
            if err.0 != ERROR_IO_PENDING.0 as i32 {
                drop(unsafe { Box::from_raw(overlapped_ptr.cast::<PendingIo>()) });
                return Err(std::io::Error::from_raw_os_error(err.0).into());
            }
        }

        std::mem::forget(pending);
        Ok(())
    }
}

impl Reactor for IocpReactor {
    fn add(&self, fd: Fd, interest: Interest, handler: Arc<dyn AsyncIoHandler>) -> Result<(), ReactorError> {
        self.handlers.write().unwrap().insert(fd, handler);
        let rc = unsafe { CreateIoCompletionPort(fd as HANDLE, self.port, fd as usize, 0) };
        if rc.is_null() {
            return Err(std::io::Error::last_os_error().into());
        }
        if interest.contains(Interest::READ) {
            self.issue_read(fd)?;
        }
        Ok(())
    }

    fn modify(&self, fd: Fd, interest: Interest) -> Result<(), ReactorError> {
        // the completion association can't be changed once made; re-arming
        // the outstanding read is the only adjustable piece of interest.
        if interest.contains(Interest::READ) {
            self.issue_read(fd)?;
        }
        Ok(())
    }

    fn remove(&self, fd: Fd) -> Result<(), ReactorError> {
        self.handlers.write().unwrap().remove(&fd);
        Ok(())
    }

    fn run(&self) {
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            let mut bytes_transferred: u32 = 0;
            let mut completion_key: usize = 0;
            let mut overlapped_ptr: *mut OVERLAPPED = ptr::null_mut();

            let ok = unsafe {
                GetQueuedCompletionStatus(
                    self.port,
                    &mut bytes_transferred,
                    &mut completion_key,
                    &mut overlapped_ptr,
                    POLL_TIMEOUT_MS as u32,
                )
            };

            if completion_key == WAKE_KEY && overlapped_ptr.is_null() {
                continue;
            }

            if overlapped_ptr.is_null() {
                if ok == 0 {
                    let err = std::io::Error::last_os_error();
                    if err.raw_os_error() == Some(WAIT_TIMEOUT as i32) {
                        continue;
                    }
                    error!(%err, "GetQueuedCompletionStatus failed");
                    break;
                }
                continue;
            }

            let pending = unsafe { Box::from_raw(overlapped_ptr.cast::<PendingIo>()) };
            let PendingIo { fd, kind, mut buffer, .. } = *pending;

            let handler = self.handlers.read().unwrap().get(&fd).cloned();
            let Some(handler) = handler else { continue };

            if ok == 0 {
                handler.on_error(fd, std::io::Error::last_os_error());
                continue;
            }

            match kind {
                PendingKind::Read => {
                    if bytes_transferred == 0 {
                        handler.on_close(fd);
                        continue;
                    }
                    buffer.set_length(bytes_transferred as usize);
                    handler.on_read(fd, buffer.bytes());

                    if let Err(err) = self.issue_read(fd) {
                        warn!(%err, fd, "failed to re-arm outstanding read");
                        handler.on_error(fd, std::io::Error::last_os_error());
                    }
                }
                PendingKind::Write => {
                    // the writer's own buffer is dropped here along with `pending`
                    handler.on_write(fd);
                }
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        unsafe {
            PostQueuedCompletionStatus(self.port, 0, WAKE_KEY, ptr::null_mut());
        }
    }

    fn close(&self) -> Result<(), ReactorError> {
        self.stop();
        unsafe { CloseHandle(self.port) };
        Ok(())
    }
}

impl Drop for IocpReactor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
