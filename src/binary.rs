//! Access to the external ffmpeg executable.
//!
//! Everything this crate learns about a source, or about what the installed
//! ffmpeg build can do, comes from running the executable and reading its
//! text output. [`MediaBinary`] is the seam for that: the real implementation
//! is [`FfmpegBinary`], and tests substitute canned output.

use std::{
    fmt,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    error::DecoderError,
    helpers::process::{Capture, run_program},
};

/// A runnable multimedia-decoding executable.
///
/// All invocations are argv-style and never shell-interpreted. `args` never
/// include the program itself.
pub trait MediaBinary: fmt::Debug + Send + Sync {
    /// The path used to launch the executable.
    fn path(&self) -> &Path;

    /// Runs an introspection command (such as `-pix_fmts`) and returns stdout.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be spawned or exits unsuccessfully.
    fn query(&self, args: &[&str]) -> Result<String, DecoderError>;

    /// Runs a command for its diagnostic banner and returns the stderr text.
    ///
    /// The exit status is ignored: a metadata-only run without an output file
    /// always "fails" after printing what we want.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be spawned.
    fn diagnostics(&self, args: &[String]) -> Result<String, DecoderError>;

    /// Launches a long-running pipeline whose stdout carries raw frames.
    ///
    /// Stdin is piped so it can be closed on teardown. Stderr is inherited
    /// when `verbose` is set and discarded otherwise.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be spawned.
    fn spawn_pipeline(&self, args: &[String], verbose: bool) -> Result<Child, DecoderError>;
}

impl<T: MediaBinary + ?Sized> MediaBinary for Arc<T> {
    #[inline]
    fn path(&self) -> &Path {
        (**self).path()
    }

    #[inline]
    fn query(&self, args: &[&str]) -> Result<String, DecoderError> {
        (**self).query(args)
    }

    #[inline]
    fn diagnostics(&self, args: &[String]) -> Result<String, DecoderError> {
        (**self).diagnostics(args)
    }

    #[inline]
    fn spawn_pipeline(&self, args: &[String], verbose: bool) -> Result<Child, DecoderError> {
        (**self).spawn_pipeline(args, verbose)
    }
}

/// The system ffmpeg executable at a validated path.
#[derive(Debug, Clone)]
pub struct FfmpegBinary {
    path: PathBuf,
    version: String,
}

impl FfmpegBinary {
    /// Validates the executable at `path` by running `-version`.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::BinaryNotFound` if the executable cannot be run
    /// or does not print a recognizable version banner.
    #[inline]
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self, DecoderError> {
        let path = path.into();
        let banner =
            run_program(&path, &["-version"], Capture::Stdout).map_err(|e| {
                DecoderError::BinaryNotFound {
                    cause: e.to_string(),
                }
            })?;
        let version = parse_version(&banner).ok_or_else(|| DecoderError::BinaryNotFound {
            cause: format!("`{}` did not report a version", path.display()),
        })?;
        debug!(path = %path.display(), %version, "found valid ffmpeg executable");
        Ok(Self { path, version })
    }

    /// The version token reported by `-version`, e.g. `6.1.1`.
    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl MediaBinary for FfmpegBinary {
    #[inline]
    fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    fn query(&self, args: &[&str]) -> Result<String, DecoderError> {
        run_program(&self.path, args, Capture::Stdout)
    }

    #[inline]
    fn diagnostics(&self, args: &[String]) -> Result<String, DecoderError> {
        run_program(&self.path, args, Capture::Diagnostics)
    }

    #[inline]
    fn spawn_pipeline(&self, args: &[String], verbose: bool) -> Result<Child, DecoderError> {
        Command::new(&self.path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .spawn()
            .map_err(|e| DecoderError::SpawnError {
                command: self.path.to_string_lossy().into_owned(),
                cause: e.to_string(),
            })
    }
}

/// Extracts the version token from the first line of `-version` output.
fn parse_version(banner: &str) -> Option<String> {
    let first = banner.lines().next()?;
    let mut words = first.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(_), Some("version"), Some(version)) => Some(version.to_string()),
        _ => None,
    }
}

/// Locates a working ffmpeg executable.
///
/// Implementations may search, download, or simply trust a configured path.
/// The decoder treats this as a single synchronous call.
pub trait BinaryLocator: fmt::Debug + Send + Sync {
    /// Returns a validated executable.
    ///
    /// `custom` is an explicit file or directory supplied by the user.
    /// `download_dir` is a hint for locators that fetch static builds.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::BinaryNotFound` if no executable can be produced.
    fn locate(
        &self,
        custom: Option<&Path>,
        download_dir: Option<&Path>,
    ) -> Result<FfmpegBinary, DecoderError>;
}

/// Finds ffmpeg at a custom location or on `PATH`. Never downloads anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLocator;

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "ffmpeg";

impl BinaryLocator for SystemLocator {
    #[inline]
    fn locate(
        &self,
        custom: Option<&Path>,
        download_dir: Option<&Path>,
    ) -> Result<FfmpegBinary, DecoderError> {
        if let Some(dir) = download_dir {
            debug!(dir = %dir.display(), "system locator ignores the download directory");
        }
        let candidate = match custom {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) if path.join(EXECUTABLE_NAME).is_file() => path.join(EXECUTABLE_NAME),
            Some(path) => {
                warn!(path = %path.display(), "no ffmpeg executable at custom path");
                return Err(DecoderError::BinaryNotFound {
                    cause: format!("nothing executable at `{}`", path.display()),
                });
            }
            None => PathBuf::from(EXECUTABLE_NAME),
        };
        FfmpegBinary::new(candidate)
    }
}


#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;
    use crate::{diagnostics::samples, helpers::capabilities::samples as listings};

    /// Canned ffmpeg. Pipelines stream `stream_len` zero bytes through `sh`.
    #[derive(Debug)]
    pub(crate) struct FakeBinary {
        pub(crate) banner: String,
        pub(crate) stream_len: usize,
        pub(crate) launched: Mutex<Vec<Vec<String>>>,
    }

    impl FakeBinary {
        pub(crate) fn new(banner: &str) -> Self {
            Self {
                banner: banner.to_string(),
                stream_len: 0,
                launched: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn mp4() -> Self {
            Self::new(samples::MP4_BANNER)
        }

        pub(crate) fn streaming(mut self, stream_len: usize) -> Self {
            self.stream_len = stream_len;
            self
        }

        pub(crate) fn last_launch(&self) -> Vec<String> {
            self.launched.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    impl MediaBinary for FakeBinary {
        fn path(&self) -> &Path {
            Path::new("/usr/bin/ffmpeg")
        }

        fn query(&self, args: &[&str]) -> Result<String, DecoderError> {
            let listing = match args.last().copied() {
                Some("-pix_fmts") => listings::PIX_FMTS,
                Some("-decoders") => listings::DECODERS,
                Some("-demuxers") => listings::DEMUXERS,
                Some("-protocols") => listings::PROTOCOLS,
                Some("-formats") => listings::FORMATS,
                Some("-version") => "ffmpeg version 6.1.1 Copyright (c) 2000-2023\n",
                other => panic!("unexpected query {other:?}"),
            };
            Ok(listing.to_string())
        }

        fn diagnostics(&self, args: &[String]) -> Result<String, DecoderError> {
            self.launched.lock().unwrap().push(args.to_vec());
            Ok(self.banner.clone())
        }

        fn spawn_pipeline(&self, args: &[String], _verbose: bool) -> Result<Child, DecoderError> {
            self.launched.lock().unwrap().push(args.to_vec());
            Command::new("sh")
                .arg("-c")
                .arg(format!("head -c {} /dev/zero", self.stream_len))
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| DecoderError::SpawnError {
                    command: "sh".to_string(),
                    cause: e.to_string(),
                })
        }
    }
}
