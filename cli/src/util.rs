// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::OsStr;
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::fs::OpenOptions;
#[cfg(unix)]
use std::mem::MaybeUninit;
#[cfg(unix)]
use std::os::fd::AsRawFd as _;


/// The name we go by if the program name is unavailable.
const DEFAULT_PROGRAM: &str = "postmail";


/// Derive the program name to show in usage output from the first
/// program argument.
pub(crate) fn program_name(arg0: Option<&OsStr>) -> String {
  arg0
    .map(Path::new)
    .and_then(Path::file_name)
    .map(|name| name.to_string_lossy().into_owned())
    .filter(|name| !name.is_empty())
    .unwrap_or_else(|| DEFAULT_PROGRAM.to_string())
}


/// The attributes of the controlling terminal at one point in time.
///
/// A password prompt turns off echoing and only turns it back on once
/// a line was read. If the prompt is abandoned, the attributes have to
/// be reinstated explicitly.
#[cfg(unix)]
pub(crate) struct TerminalState {
  tty: File,
  attrs: libc::termios,
}

#[cfg(unix)]
impl TerminalState {
  /// Capture the attributes of the controlling terminal, if we have
  /// one.
  pub(crate) fn capture() -> Option<Self> {
    let tty = OpenOptions::new()
      .read(true)
      .write(true)
      .open("/dev/tty")
      .ok()?;
    Self::from_file(tty).ok()
  }

  fn from_file(tty: File) -> io::Result<Self> {
    let mut attrs = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: The descriptor is open and `attrs` is valid for writes.
    let rc = unsafe { libc::tcgetattr(tty.as_raw_fd(), attrs.as_mut_ptr()) };
    if rc != 0 {
      return Err(io::Error::last_os_error())
    }
    // SAFETY: `tcgetattr` succeeded and initialized `attrs`.
    let attrs = unsafe { attrs.assume_init() };
    Ok(Self { tty, attrs })
  }

  /// Reinstate the captured attributes.
  pub(crate) fn restore(&self) -> io::Result<()> {
    // SAFETY: The descriptor is open and `attrs` was filled in by
    //         `tcgetattr`.
    let rc = unsafe { libc::tcsetattr(self.tty.as_raw_fd(), libc::TCSANOW, &self.attrs) };
    if rc != 0 {
      return Err(io::Error::last_os_error())
    }
    Ok(())
  }
}


#[cfg(not(unix))]
pub(crate) struct TerminalState;

#[cfg(not(unix))]
impl TerminalState {
  pub(crate) fn capture() -> Option<Self> {
    None
  }

  pub(crate) fn restore(&self) -> io::Result<()> {
    Ok(())
  }
}


#[cfg(test)]
mod tests {
  use super::*;


  /// Check that we strip directories from the program name.
  #[test]
  fn program_names() {
    assert_eq!(program_name(Some(OsStr::new("/usr/bin/postmail"))), "postmail");
    assert_eq!(program_name(Some(OsStr::new("sendmail"))), "sendmail");
    assert_eq!(program_name(Some(OsStr::new(""))), "postmail");
    assert_eq!(program_name(None), "postmail");
  }

  /// Check that echoing is turned back on after it was disabled, as
  /// happens when a password prompt is interrupted.
  #[cfg(target_os = "linux")]
  #[test]
  fn terminal_restore() {
    use std::os::fd::FromRawFd as _;
    use std::os::fd::RawFd;
    use std::ptr;

    fn attrs(fd: RawFd) -> libc::termios {
      let mut attrs = MaybeUninit::<libc::termios>::uninit();
      let rc = unsafe { libc::tcgetattr(fd, attrs.as_mut_ptr()) };
      assert_eq!(rc, 0, "{}", io::Error::last_os_error());
      unsafe { attrs.assume_init() }
    }

    let mut master = -1;
    let mut slave = -1;
    let rc = unsafe {
      libc::openpty(
        &mut master,
        &mut slave,
        ptr::null_mut(),
        ptr::null_mut(),
        ptr::null_mut(),
      )
    };
    assert_eq!(rc, 0, "{}", io::Error::last_os_error());
    let _master = unsafe { File::from_raw_fd(master) };
    let slave = unsafe { File::from_raw_fd(slave) };
    let fd = slave.as_raw_fd();
    assert_ne!(attrs(fd).c_lflag & libc::ECHO, 0);

    let state = TerminalState::from_file(slave.try_clone().unwrap()).unwrap();

    let mut silent = attrs(fd);
    silent.c_lflag &= !libc::ECHO;
    let rc = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &silent) };
    assert_eq!(rc, 0);
    assert_eq!(attrs(fd).c_lflag & libc::ECHO, 0);

    let () = state.restore().unwrap();
    assert_ne!(attrs(fd).c_lflag & libc::ECHO, 0);
  }
}
