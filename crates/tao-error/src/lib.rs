//! Taxonomic error kinds and frame-stack error propagation.
//!
//! Every fallible operation in the fabric returns [`Result<T>`], whose error
//! side is a [`TaoError`]: a small, taxonomic [`ErrorKind`] plus a stack of
//! [`Frame`]s recording every function that touched the error on its way
//! out. This mirrors `rust_daq`'s `DaqError`/`AppResult` split (see
//! `src/error.rs` in the teacher crate) but keeps a call stack instead of a
//! single flat message, per the propagation contract in the specification.

use std::fmt;

/// Number of frames kept inline before the stack spills onto the heap.
///
/// Most errors never travel more than a few call frames before being
/// reported, so this keeps the common case allocation-free. The stack still
/// grows without bound past this point; it never refuses to record a frame.
pub const INLINE_FRAMES: usize = 4;

/// Taxonomic error kinds, independent of any particular message string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success,
    BadAddress,
    BadArgument,
    BadMagic,
    BadSize,
    BadRank,
    BadType,
    BadSerial,
    BadEncoding,
    BadRoi,
    BadExposureTime,
    BadFramerate,
    BadGain,
    BadBias,
    BadDepth,
    BadDevice,
    BadName,
    BadCharacter,
    BadEscape,
    UnclosedString,
    MissingSeparator,
    Destroyed,
    Corrupted,
    OutOfRange,
    AlreadyExists,
    AlreadyInUse,
    NotFound,
    NotReady,
    NoAcquisition,
    AcquisitionRunning,
    Unsupported,
    Unreadable,
    Unwritable,
    AssertionFailed,
    /// A host system call failed; the payload is the raw `errno` value.
    SystemError(i32),
    /// An error surfaced by a foreign collaborator (e.g. the vendor camera
    /// SDK) that doesn't map onto one of the kinds above. `tag` names the
    /// collaborator, `code` is its native error code.
    ForeignError(&'static str, i32),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Success => write!(f, "success"),
            ErrorKind::BadAddress => write!(f, "bad address"),
            ErrorKind::BadArgument => write!(f, "bad argument"),
            ErrorKind::BadMagic => write!(f, "bad magic number"),
            ErrorKind::BadSize => write!(f, "bad size"),
            ErrorKind::BadRank => write!(f, "bad rank"),
            ErrorKind::BadType => write!(f, "bad type"),
            ErrorKind::BadSerial => write!(f, "bad serial number"),
            ErrorKind::BadEncoding => write!(f, "bad pixel encoding"),
            ErrorKind::BadRoi => write!(f, "bad region of interest"),
            ErrorKind::BadExposureTime => write!(f, "bad exposure time"),
            ErrorKind::BadFramerate => write!(f, "bad framerate"),
            ErrorKind::BadGain => write!(f, "bad gain"),
            ErrorKind::BadBias => write!(f, "bad bias"),
            ErrorKind::BadDepth => write!(f, "bad depth"),
            ErrorKind::BadDevice => write!(f, "bad device"),
            ErrorKind::BadName => write!(f, "bad name"),
            ErrorKind::BadCharacter => write!(f, "bad character"),
            ErrorKind::BadEscape => write!(f, "bad escape sequence"),
            ErrorKind::UnclosedString => write!(f, "unclosed quoted string"),
            ErrorKind::MissingSeparator => write!(f, "missing word separator"),
            ErrorKind::Destroyed => write!(f, "object has been destroyed"),
            ErrorKind::Corrupted => write!(f, "object is corrupted"),
            ErrorKind::OutOfRange => write!(f, "value out of range"),
            ErrorKind::AlreadyExists => write!(f, "already exists"),
            ErrorKind::AlreadyInUse => write!(f, "already in use"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::NotReady => write!(f, "not ready"),
            ErrorKind::NoAcquisition => write!(f, "no acquisition in progress"),
            ErrorKind::AcquisitionRunning => write!(f, "acquisition already running"),
            ErrorKind::Unsupported => write!(f, "unsupported"),
            ErrorKind::Unreadable => write!(f, "unreadable"),
            ErrorKind::Unwritable => write!(f, "unwritable"),
            ErrorKind::AssertionFailed => write!(f, "internal assertion failed"),
            ErrorKind::SystemError(code) => write!(f, "system error (errno {code})"),
            ErrorKind::ForeignError(tag, code) => write!(f, "{tag} error (code {code})"),
        }
    }
}

/// One entry in an error's call-frame stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub function: &'static str,
    pub kind: ErrorKind,
}

/// A stack of [`Frame`]s in occurrence order: index 0 is the first failure
/// observed, the last entry is the most recently added (outermost) frame.
///
/// The first [`INLINE_FRAMES`] frames live inline; anything beyond that
/// spills into a `Vec`. This keeps the fatal-allocation-failure policy in
/// §7 of the specification honest: recording the *first* few frames of any
/// error never allocates, so reporting an error cannot itself fail from
/// allocation pressure in the common case.
#[derive(Debug, Clone)]
pub struct TaoError {
    inline: [Option<Frame>; INLINE_FRAMES],
    inline_len: usize,
    overflow: Vec<Frame>,
}

impl TaoError {
    /// Start a new error stack with a single frame.
    pub fn new(function: &'static str, kind: ErrorKind) -> Self {
        let mut err = TaoError {
            inline: [None; INLINE_FRAMES],
            inline_len: 0,
            overflow: Vec::new(),
        };
        err.push(function, kind);
        err
    }

    /// Push a new frame onto the top of the stack.
    pub fn push(&mut self, function: &'static str, kind: ErrorKind) {
        if self.inline_len < INLINE_FRAMES {
            self.inline[self.inline_len] = Some(Frame { function, kind });
            self.inline_len += 1;
        } else {
            self.overflow.push(Frame { function, kind });
        }
    }

    /// Builder-style variant of [`TaoError::push`].
    #[must_use]
    pub fn framed(mut self, function: &'static str, kind: ErrorKind) -> Self {
        self.push(function, kind);
        self
    }

    /// The outermost (most recently observed) error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.frames()
            .last()
            .map(|f| f.kind)
            .unwrap_or(ErrorKind::AssertionFailed)
    }

    /// All frames, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.inline[..self.inline_len]
            .iter()
            .filter_map(|f| *f)
            .chain(self.overflow.iter().copied())
    }

    /// Move every frame from `src` onto the end of `dst`'s stack, leaving
    /// `src` empty-bodied (its frames now live in `dst`, in the same
    /// occurrence order they held in `src`).
    pub fn transfer(dst: &mut TaoError, src: TaoError) {
        for frame in src.frames() {
            dst.push(frame.function, frame.kind);
        }
    }

    /// Drop `src`'s frames silently. Provided for symmetry with
    /// [`TaoError::transfer`] at call sites that intentionally ignore a
    /// secondary failure (e.g. a best-effort cleanup error).
    pub fn discard(_src: TaoError) {}
}

impl fmt::Display for TaoError {
    /// Prints the stack oldest-first, one frame per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for frame in self.frames() {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{}: {}", frame.function, frame.kind)?;
            first = false;
        }
        if first {
            write!(f, "(empty error stack)")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaoError {}

/// Convenience alias used throughout the fabric.
pub type Result<T> = std::result::Result<T, TaoError>;

/// Construct a single-frame [`TaoError`] as a `Result::Err`.
pub fn bail<T>(function: &'static str, kind: ErrorKind) -> Result<T> {
    Err(TaoError::new(function, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_fills_inline_before_overflow() {
        let mut err = TaoError::new("a", ErrorKind::BadArgument);
        for i in 1..10 {
            err.push("f", ErrorKind::NotReady);
            assert_eq!(err.frames().count(), i + 1);
        }
        assert_eq!(err.inline_len, INLINE_FRAMES);
        assert_eq!(err.overflow.len(), 10 - INLINE_FRAMES);
    }

    #[test]
    fn frames_preserve_occurrence_order() {
        let err = TaoError::new("inner", ErrorKind::BadSize)
            .framed("middle", ErrorKind::BadRoi)
            .framed("outer", ErrorKind::Unsupported);
        let kinds: Vec<_> = err.frames().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::BadSize, ErrorKind::BadRoi, ErrorKind::Unsupported]
        );
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn transfer_moves_all_frames_in_order() {
        let src = TaoError::new("leaf", ErrorKind::Destroyed).framed("mid", ErrorKind::Corrupted);
        let mut dst = TaoError::new("caller", ErrorKind::AssertionFailed);
        TaoError::transfer(&mut dst, src);
        let kinds: Vec<_> = dst.frames().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::AssertionFailed,
                ErrorKind::Destroyed,
                ErrorKind::Corrupted
            ]
        );
    }

    #[test]
    fn display_prints_oldest_first() {
        let err = TaoError::new("a", ErrorKind::BadSize).framed("b", ErrorKind::BadRoi);
        let text = err.to_string();
        let a_pos = text.find("a:").unwrap();
        let b_pos = text.find("b:").unwrap();
        assert!(a_pos < b_pos);
    }
}
