// Sync file descriptor helpers
//
// Dequeue and release fences are kernel sync objects surfaced as file
// descriptors. We only ever need to duplicate one for the driver or
// block until one signals.
//
// Austin Shafer - 2024
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use nix::poll::{poll, PollFd, PollFlags};

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

use utils::log;

/// Duplicate a fence fd. Returns None if the fd table is exhausted;
/// the caller is expected to fall back to a CPU-side wait.
pub fn dup_fence(fence: &OwnedFd) -> Option<OwnedFd> {
    match fcntl(fence.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(0)) {
        Ok(fd) => Some(unsafe { OwnedFd::from_raw_fd(fd) }),
        Err(e) => {
            log::error!("could not dup fence fd: {:?}", e);
            None
        }
    }
}

/// Block until the fence signals.
pub fn wait_fence(fence: &OwnedFd) {
    let mut fds = [PollFd::new(fence.as_raw_fd(), PollFlags::POLLIN)];

    loop {
        match poll(&mut fds, -1) {
            Ok(_) => return,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                log::error!("poll on fence fd failed: {:?}", e);
                return;
            }
        }
    }
}
