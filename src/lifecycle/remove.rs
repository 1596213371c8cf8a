/// Symlink-safe recursive removal of store locations.
///
/// Walks the tree with openat/fstatat/unlinkat so a symlink planted inside a
/// location never redirects deletion outside of it, and refuses to cross
/// filesystem boundaries.
use std::io;
use std::path::Path;

#[cfg(target_os = "linux")]
mod imp {
    use std::ffi::{CStr, CString};
    use std::io;
    use std::os::fd::RawFd;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    struct Fd(RawFd);

    impl Drop for Fd {
        fn drop(&mut self) {
            if self.0 >= 0 {
                unsafe {
                    libc::close(self.0);
                }
            }
        }
    }

    fn c_name(path: &Path) -> io::Result<CString> {
        CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Path contains NUL byte: {}", path.display()),
            )
        })
    }

    fn last_error(what: &str) -> io::Error {
        let e = io::Error::last_os_error();
        io::Error::new(e.kind(), format!("{}: {}", what, e))
    }

    const DIR_FLAGS: libc::c_int = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;

    fn lstat_at(dir: RawFd, name: &CStr) -> io::Result<libc::stat> {
        let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
        let rc = unsafe { libc::fstatat(dir, name.as_ptr(), st.as_mut_ptr(), libc::AT_SYMLINK_NOFOLLOW) };
        if rc != 0 {
            return Err(last_error("fstatat"));
        }
        Ok(unsafe { st.assume_init() })
    }

    fn unlink_at(dir: RawFd, name: &CStr, flags: libc::c_int) -> io::Result<()> {
        if unsafe { libc::unlinkat(dir, name.as_ptr(), flags) } != 0 {
            return Err(last_error(&format!("unlinkat {:?}", name)));
        }
        Ok(())
    }

    fn remove_dir_at(parent: RawFd, name: &CStr, dev: libc::dev_t) -> io::Result<()> {
        let fd = unsafe { libc::openat(parent, name.as_ptr(), DIR_FLAGS) };
        if fd < 0 {
            return Err(last_error(&format!("openat {:?}", name)));
        }
        let child = Fd(fd);
        empty_dir(child.0, dev)?;
        unlink_at(parent, name, libc::AT_REMOVEDIR)
    }

    fn empty_dir(dir_fd: RawFd, dev: libc::dev_t) -> io::Result<()> {
        // fdopendir takes ownership of the descriptor it is given
        let iter_fd = unsafe { libc::dup(dir_fd) };
        if iter_fd < 0 {
            return Err(last_error("dup"));
        }
        let dir = unsafe { libc::fdopendir(iter_fd) };
        if dir.is_null() {
            unsafe {
                libc::close(iter_fd);
            }
            return Err(last_error("fdopendir"));
        }

        let mut entries = Vec::new();
        loop {
            unsafe {
                *libc::__errno_location() = 0;
            }
            let entry = unsafe { libc::readdir(dir) };
            if entry.is_null() {
                let errno = unsafe { *libc::__errno_location() };
                unsafe {
                    libc::closedir(dir);
                }
                if errno != 0 {
                    return Err(io::Error::from_raw_os_error(errno));
                }
                break;
            }
            let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
            if name.to_bytes() != b"." && name.to_bytes() != b".." {
                entries.push(name.to_owned());
            }
        }

        for name in entries {
            let st = lstat_at(dir_fd, &name)?;
            if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
                if st.st_dev != dev {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("Refusing to cross filesystem boundary at {:?}", name),
                    ));
                }
                remove_dir_at(dir_fd, &name, dev)?;
            } else {
                unlink_at(dir_fd, &name, 0)?;
            }
        }
        Ok(())
    }

    pub fn remove_tree(path: &Path) -> io::Result<()> {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Cannot remove path without file name: {}", path.display()),
            )
        })?;
        let name = c_name(Path::new(name))?;
        let parent_c = c_name(parent)?;

        let fd = unsafe { libc::open(parent_c.as_ptr(), DIR_FLAGS) };
        if fd < 0 {
            return Err(last_error(&format!("open {}", parent.display())));
        }
        let parent_fd = Fd(fd);

        let st = lstat_at(parent_fd.0, &name)?;
        if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
            remove_dir_at(parent_fd.0, &name, st.st_dev)
        } else {
            unlink_at(parent_fd.0, &name, 0)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::io;
    use std::path::Path;

    pub fn remove_tree(path: &Path) -> io::Result<()> {
        let meta = std::fs::symlink_metadata(path)?;
        if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

/// Remove `path` and everything below it. Missing paths are not an error.
pub fn remove_tree_secure(path: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }
    imp::remove_tree(path)
}

/// Remove `path` only if it is an empty directory
pub fn remove_if_empty(path: &Path) -> io::Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Ok(false);
            }
            std::fs::remove_dir(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
