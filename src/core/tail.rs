//! Purpose: Block a caller until the log file has plausibly grown.
//! Exports: `TailWatcher`, `WaitOutcome`.
//! Role: Signals presence of change only; callers must re-check the file size
//! themselves, and boundary checks in the reader stay mandatory.
//! Invariants: Kernel notification (inotify) is preferred on Linux; elsewhere
//! size polling with exponential backoff between 10 ms and 100 ms.
//! Invariants: Watch handles are released on drop on every exit path.
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::error::{Error, ErrorKind};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    Modified,
    TimedOut,
}

#[derive(Debug)]
pub struct TailWatcher {
    backend: Backend,
}

#[derive(Debug)]
enum Backend {
    #[cfg(target_os = "linux")]
    Inotify(InotifyWatch),
    Poll(PollWatch),
}

impl TailWatcher {
    /// Watch `path`, preferring kernel file-change notification. Setup
    /// failure (cannot create or register the watch) is fatal.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, Error> {
        #[cfg(target_os = "linux")]
        {
            Ok(Self {
                backend: Backend::Inotify(InotifyWatch::new(path.as_ref())?),
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::new_polling(path)
        }
    }

    /// Watch `path` by polling its size, regardless of platform.
    pub fn new_polling(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self {
            backend: Backend::Poll(PollWatch::new(path.as_ref())),
        })
    }

    pub fn is_kernel_notified(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            matches!(self.backend, Backend::Inotify(_))
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }

    /// Block until the file is modified or `timeout` elapses. `None` blocks
    /// forever. A `Modified` outcome promises only that something changed,
    /// not that a complete record is readable.
    pub fn wait_for_modification(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, Error> {
        match &mut self.backend {
            #[cfg(target_os = "linux")]
            Backend::Inotify(watch) => watch.wait(timeout),
            Backend::Poll(watch) => watch.wait(timeout),
        }
    }
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
struct InotifyWatch {
    fd: std::os::fd::OwnedFd,
    wd: libc::c_int,
    path: PathBuf,
}

#[cfg(target_os = "linux")]
impl InotifyWatch {
    fn new(path: &Path) -> Result<Self, Error> {
        use std::os::fd::FromRawFd;
        use std::os::unix::ffi::OsStrExt;

        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to initialize inotify")
                .with_source(std::io::Error::last_os_error()));
        }
        let fd = unsafe { std::os::fd::OwnedFd::from_raw_fd(raw) };

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            Error::new(ErrorKind::Usage)
                .with_message("path contains an interior NUL byte")
                .with_path(path)
        })?;
        let wd = unsafe {
            libc::inotify_add_watch(raw, c_path.as_ptr(), libc::IN_MODIFY | libc::IN_CLOSE_WRITE)
        };
        if wd < 0 {
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to add inotify watch")
                .with_path(path)
                .with_source(std::io::Error::last_os_error()));
        }

        Ok(Self {
            fd,
            wd,
            path: path.to_path_buf(),
        })
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome, Error> {
        use std::os::fd::AsRawFd;

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let poll_ms: libc::c_int = match deadline {
                None => -1,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(WaitOutcome::TimedOut);
                    }
                    remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
                }
            };

            let mut pfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pfd, 1, poll_ms) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(Error::new(ErrorKind::Io)
                    .with_message("poll failed on inotify fd")
                    .with_path(&self.path)
                    .with_source(err));
            }
            if ret == 0 {
                return Ok(WaitOutcome::TimedOut);
            }

            self.drain()?;
            return Ok(WaitOutcome::Modified);
        }
    }

    // Events are discarded; the caller re-checks the file size itself.
    fn drain(&mut self) -> Result<(), Error> {
        use std::os::fd::AsRawFd;

        let mut buf = [0u8; 4096];
        loop {
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n > 0 {
                continue;
            }
            if n == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => return Ok(()),
                Some(code) if code == libc::EINTR => continue,
                _ => {
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("failed to read inotify events")
                        .with_path(&self.path)
                        .with_source(err))
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for InotifyWatch {
    fn drop(&mut self) {
        use std::os::fd::AsRawFd;
        unsafe {
            libc::inotify_rm_watch(self.fd.as_raw_fd(), self.wd);
        }
    }
}

#[derive(Debug)]
struct PollWatch {
    path: PathBuf,
    last_size: u64,
    backoff: Duration,
}

impl PollWatch {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last_size: file_size(path),
            backoff: MIN_POLL_INTERVAL,
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let size = file_size(&self.path);
            if size > self.last_size {
                self.last_size = size;
                self.backoff = MIN_POLL_INTERVAL;
                return Ok(WaitOutcome::Modified);
            }

            let sleep = match deadline {
                None => self.backoff,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(WaitOutcome::TimedOut);
                    }
                    self.backoff.min(remaining)
                }
            };
            std::thread::sleep(sleep);
            self.backoff = (self.backoff * 2).min(MAX_POLL_INTERVAL);
        }
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}
