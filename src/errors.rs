use core::fmt;

/// Kernel error codes, surfaced to user code through the system-call layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    PermissionDenied,
    FileNotFound,
    InvalidFd,
    InvalidMode,
    InvalidWhence,
    InvalidArgument,
    InvalidPriority,
    InvalidSignal,
    InvalidFilename,
    InvalidFatConfig,
    DiskFull,
    TooManyOpenFiles,
    NotMounted,
    FileInUse,
    IoError,
    NoSuchProcess,
    /// The caller has no parent record (waitpid from an unregistered thread).
    NoParent,
    /// The caller has children to wait on, but the list is empty.
    NoChildren,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Errno::PermissionDenied => write!(f, "Permission denied"),
            Errno::FileNotFound => write!(f, "File not found"),
            Errno::InvalidFd => write!(f, "Invalid file descriptor"),
            Errno::InvalidMode => write!(f, "Invalid mode specified"),
            Errno::InvalidWhence => write!(f, "Invalid 'whence' argument for seek"),
            Errno::InvalidArgument => write!(f, "Invalid argument"),
            Errno::InvalidPriority => write!(f, "Priority must be between 0 and 2"),
            Errno::InvalidSignal => write!(f, "Invalid signal"),
            Errno::InvalidFilename => write!(f, "Invalid filename"),
            Errno::InvalidFatConfig => write!(f, "Invalid FAT file system configuration"),
            Errno::DiskFull => write!(f, "Disk full"),
            Errno::TooManyOpenFiles => write!(f, "Too many open files"),
            Errno::NotMounted => write!(f, "File system not mounted"),
            Errno::FileInUse => write!(f, "File in use"),
            Errno::IoError => write!(f, "I/O error"),
            Errno::NoSuchProcess => write!(f, "No such process"),
            Errno::NoParent => write!(f, "Failed to waitpid: no parent record"),
            Errno::NoChildren => write!(f, "Failed to waitpid: no children to wait on"),
        }
    }
}

impl From<std::io::Error> for Errno {
    fn from(_: std::io::Error) -> Errno {
        Errno::IoError
    }
}

pub type Result<T> = core::result::Result<T, Errno>;
